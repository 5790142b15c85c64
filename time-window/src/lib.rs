//! Sliding-window aggregation for live telemetry.
//!
//! The crate exposes:
//! - [`SecondClock`]: coalesces calls into wall-clock seconds over an injectable [`TimeSource`].
//! - [`RollingWindow`]: single-key ring of recent points plus a rolling maximum, with
//!   per-call, last-write-wins, or summing second alignment ([`Coalesce`]).
//! - [`MultiKeyWindow`]: per-second nodes of many keys with merge-key totals, per-key maxima
//!   and an optional history ring for graphing.
//! - [`WindowRegistry`]: lazily creates one rolling window per external key.

pub mod clock;
pub mod error;
pub mod multi_key;
pub mod registry;
mod ring;
pub mod rolling;

pub use clock::{ManualTimeSource, SecondClock, SystemTimeSource, TimeSource};
pub use core_types::{Entry, Keyed, KeyedPoint, Point};
pub use error::{Result, WindowError};
pub use multi_key::{MultiKeyWindow, MultiKeyWindowBuilder};
pub use registry::WindowRegistry;
pub use rolling::{
    Coalesce, DEFAULT_DURATION_SECS, DEFAULT_RING_LEN, DEFAULT_TIMEOUT_SECS, RollingWindow,
    RollingWindowBuilder,
};
