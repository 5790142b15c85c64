use std::{fmt, sync::Arc};

use core_types::{Entry, Point, WindowSettings};
use log::debug;
use parking_lot::RwLock;

use crate::{
    clock::{SecondClock, TimeSource, system_time},
    error::{Result, ensure_capacity, ensure_seconds},
    ring::Ring,
};

pub const DEFAULT_RING_LEN: usize = 3;
pub const DEFAULT_DURATION_SECS: i64 = 300;
pub const DEFAULT_TIMEOUT_SECS: i64 = 3;

/// How pushes landing in the same wall-clock second are folded into the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coalesce {
    /// One push, one slot. The ring holds the last N calls, not the last N seconds, so the
    /// caller has to push at a fixed one-second cadence for `duration`/`timeout` to line up.
    #[default]
    Tick,
    /// At most one slot per second; the last push of a second wins.
    Overwrite,
    /// At most one slot per second; pushes within a second are combined with [`Entry::sum`].
    Merge,
}

struct RollingState<E> {
    ring: Ring<Point<E>>,
    max: Point<E>,
}

impl<E: Entry> RollingState<E> {
    /// An expired (or cleared) max is replaced outright; otherwise ties go to the newcomer.
    fn offer_max(&mut self, candidate: &Point<E>, duration_secs: i64, now: i64) {
        let Some(entry) = candidate.entry.as_ref() else {
            return;
        };
        let replace = match self.max.entry.as_ref() {
            None => true,
            Some(_) if self.max.age(now) > duration_secs => true,
            Some(max) => !entry.less(max),
        };
        if replace {
            self.max = candidate.clone();
        }
    }
}

/// Single-key sliding window: the last N points plus a rolling maximum that is valid for
/// `duration_secs`. Point reads older than `timeout_secs` report no data.
pub struct RollingWindow<E> {
    state: RwLock<RollingState<E>>,
    clock: SecondClock,
    coalesce: Coalesce,
    ring_len: usize,
    duration_secs: i64,
    timeout_secs: i64,
}

impl<E: Entry> RollingWindow<E> {
    pub fn push(&self, entry: E) {
        let mut state = self.state.write();
        let (now, same_second) = match self.coalesce {
            Coalesce::Tick => (self.clock.now(), false),
            Coalesce::Overwrite | Coalesce::Merge => self.clock.same_second(),
        };
        let committed = if same_second {
            let slot = state.ring.head_mut();
            let value = match (self.coalesce, slot.entry.take()) {
                (Coalesce::Merge, Some(prev)) => entry.sum(&prev),
                _ => entry,
            };
            *slot = Point::new(value, now);
            slot.clone()
        } else {
            let slot = state.ring.advance();
            *slot = Point::new(entry, now);
            slot.clone()
        };
        state.offer_max(&committed, self.duration_secs, now);
    }

    pub fn prev(&self) -> Point<E> {
        self.prev_n(1)
    }

    /// The point `n` slots behind the cursor (`1` is the latest, `0` is read as `1`).
    ///
    /// The returned `ctime` is always the read time; the entry is `None` when the slot was
    /// never written or is older than `timeout_secs`.
    pub fn prev_n(&self, n: usize) -> Point<E> {
        let state = self.state.read();
        let now = self.clock.now();
        let mut point = state.ring.back(n.max(1) - 1).clone();
        if point.age(now) > self.timeout_secs {
            point.entry = None;
        }
        point.ctime = now;
        point
    }

    /// Raw slot `n` behind the cursor, without the staleness rewrite of `prev_n`.
    pub(crate) fn committed(&self, n: usize) -> Point<E> {
        let state = self.state.read();
        state.ring.back(n.max(1) - 1).clone()
    }

    pub fn max(&self) -> Point<E> {
        let state = self.state.read();
        self.unexpired(state.max.clone())
    }

    /// Like [`RollingWindow::max`], then forgets the stored maximum.
    pub fn pop_max(&self) -> Point<E> {
        let mut state = self.state.write();
        let max = state.max.clone();
        state.max.entry = None;
        self.unexpired(max)
    }

    /// Committed points, oldest first.
    pub fn points(&self) -> Vec<Point<E>> {
        let state = self.state.read();
        state
            .ring
            .iter_oldest()
            .filter(|p| !p.is_empty())
            .cloned()
            .collect()
    }

    fn unexpired(&self, mut max: Point<E>) -> Point<E> {
        if max.age(self.clock.now()) > self.duration_secs {
            max.entry = None;
        }
        max
    }
}

impl<E> RollingWindow<E> {
    pub fn capacity(&self) -> usize {
        self.ring_len
    }

    pub fn coalesce(&self) -> Coalesce {
        self.coalesce
    }

    pub fn duration_secs(&self) -> i64 {
        self.duration_secs
    }

    pub fn timeout_secs(&self) -> i64 {
        self.timeout_secs
    }
}

impl<E> fmt::Debug for RollingWindow<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollingWindow")
            .field("coalesce", &self.coalesce)
            .field("ring_len", &self.ring_len)
            .field("duration_secs", &self.duration_secs)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Clone)]
pub struct RollingWindowBuilder {
    ring_len: usize,
    duration_secs: i64,
    timeout_secs: i64,
    coalesce: Coalesce,
    source: Option<Arc<dyn TimeSource>>,
}

impl RollingWindowBuilder {
    pub fn new() -> Self {
        Self {
            ring_len: DEFAULT_RING_LEN,
            duration_secs: DEFAULT_DURATION_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            coalesce: Coalesce::default(),
            source: None,
        }
    }

    pub fn from_settings(settings: &WindowSettings) -> Self {
        Self::new()
            .ring_len(settings.ring_len)
            .duration_secs(settings.duration_secs)
            .timeout_secs(settings.timeout_secs)
    }

    pub fn ring_len(mut self, len: usize) -> Self {
        self.ring_len = len;
        self
    }

    pub fn duration_secs(mut self, secs: i64) -> Self {
        self.duration_secs = secs;
        self
    }

    pub fn timeout_secs(mut self, secs: i64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn coalesce(mut self, coalesce: Coalesce) -> Self {
        self.coalesce = coalesce;
        self
    }

    pub fn time_source(mut self, source: Arc<dyn TimeSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn validate(&self) -> Result<()> {
        ensure_capacity("rolling window", self.ring_len)?;
        ensure_seconds("duration_secs", self.duration_secs)?;
        ensure_seconds("timeout_secs", self.timeout_secs)
    }

    pub fn build<E: Entry>(self) -> Result<RollingWindow<E>> {
        self.validate()?;
        debug!(
            "rolling window: {:?} ring_len={} duration={}s timeout={}s",
            self.coalesce, self.ring_len, self.duration_secs, self.timeout_secs
        );
        Ok(self.assemble())
    }

    /// Builds without validation; callers must have run [`RollingWindowBuilder::validate`].
    pub(crate) fn assemble<E: Entry>(self) -> RollingWindow<E> {
        let source = self.source.unwrap_or_else(system_time);
        RollingWindow {
            state: RwLock::new(RollingState {
                ring: Ring::new(self.ring_len, Point::default),
                max: Point::default(),
            }),
            clock: SecondClock::new(source),
            coalesce: self.coalesce,
            ring_len: self.ring_len,
            duration_secs: self.duration_secs,
            timeout_secs: self.timeout_secs,
        }
    }
}

impl Default for RollingWindowBuilder {
    fn default() -> Self {
        Self::new()
    }
}
