use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;

/// Source of epoch seconds. Windows never read the wall clock directly.
pub trait TimeSource: Send + Sync {
    fn now_secs(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_secs(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// Hand-driven time source for tests and replays.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    secs: AtomicI64,
}

impl ManualTimeSource {
    pub fn new(start_secs: i64) -> Self {
        Self {
            secs: AtomicI64::new(start_secs),
        }
    }

    /// Shared handle, ready to hand to window builders while the caller keeps driving it.
    pub fn shared(start_secs: i64) -> Arc<Self> {
        Arc::new(Self::new(start_secs))
    }

    pub fn advance(&self, secs: i64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, secs: i64) {
        self.secs.store(secs, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_secs(&self) -> i64 {
        self.secs.load(Ordering::SeqCst)
    }
}

pub fn system_time() -> Arc<dyn TimeSource> {
    Arc::new(SystemTimeSource)
}

/// Coalesces calls into per-second buckets.
///
/// [`SecondClock::same_second`] reports `false` exactly once per newly observed second and
/// `true` for every later call inside it. The observed second never goes backwards: if the
/// source steps back, the last observed second is reported as a repeat.
pub struct SecondClock {
    source: Arc<dyn TimeSource>,
    last: Mutex<Option<i64>>,
}

impl SecondClock {
    pub fn new(source: Arc<dyn TimeSource>) -> Self {
        Self {
            source,
            last: Mutex::new(None),
        }
    }

    /// A clock that already considers the current second observed.
    pub fn primed(source: Arc<dyn TimeSource>) -> Self {
        let now = source.now_secs();
        Self {
            source,
            last: Mutex::new(Some(now)),
        }
    }

    pub fn same_second(&self) -> (i64, bool) {
        let now = self.source.now_secs();
        let mut last = self.last.lock();
        match *last {
            Some(prev) if now <= prev => (prev, true),
            _ => {
                *last = Some(now);
                (now, false)
            }
        }
    }

    /// Current second of the underlying source, without touching the coalescing state.
    pub fn now(&self) -> i64 {
        self.source.now_secs()
    }

    pub fn source(&self) -> Arc<dyn TimeSource> {
        Arc::clone(&self.source)
    }
}

impl fmt::Debug for SecondClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecondClock")
            .field("last", &*self.last.lock())
            .finish()
    }
}
