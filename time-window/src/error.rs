use thiserror::Error;

pub type Result<T> = std::result::Result<T, WindowError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("{ring} ring capacity must be non-zero")]
    ZeroCapacity { ring: &'static str },
    #[error("{field} must not be negative, got {value}")]
    NegativeSeconds { field: &'static str, value: i64 },
}

pub(crate) fn ensure_capacity(ring: &'static str, len: usize) -> Result<()> {
    if len == 0 {
        return Err(WindowError::ZeroCapacity { ring });
    }
    Ok(())
}

pub(crate) fn ensure_seconds(field: &'static str, value: i64) -> Result<()> {
    if value < 0 {
        return Err(WindowError::NegativeSeconds { field, value });
    }
    Ok(())
}
