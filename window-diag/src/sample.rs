use core_types::{Entry, Keyed};
use serde::Serialize;

/// Requests served by one host during a second. Group totals carry the group name in both
/// `host` and `group`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostSample {
    pub host: String,
    pub group: String,
    pub requests: u64,
}

impl HostSample {
    pub fn new(host: impl Into<String>, group: impl Into<String>, requests: u64) -> Self {
        Self {
            host: host.into(),
            group: group.into(),
            requests,
        }
    }

    /// Zero-valued sample used as the fallback for reads of `key`.
    pub fn template(key: &str, group: &str) -> Self {
        Self::new(key, group, 0)
    }
}

impl Entry for HostSample {
    fn less(&self, other: &Self) -> bool {
        self.requests < other.requests
    }

    fn sum(&self, other: &Self) -> Self {
        Self::new(
            self.group.clone(),
            self.group.clone(),
            self.requests.saturating_add(other.requests),
        )
    }
}

impl Keyed for HostSample {
    type Key = String;

    fn key(&self) -> String {
        self.host.clone()
    }

    fn merge_key(&self) -> String {
        self.group.clone()
    }
}
