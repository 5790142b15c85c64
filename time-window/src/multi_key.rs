use std::{collections::HashMap, fmt, sync::Arc};

use core_types::{Keyed, KeyedPoint, MultiKeySettings};
use log::debug;
use parking_lot::RwLock;

use crate::{
    clock::{SecondClock, TimeSource, system_time},
    error::{Result, ensure_capacity, ensure_seconds},
    ring::Ring,
    rolling::{DEFAULT_DURATION_SECS, DEFAULT_RING_LEN},
};

/// Everything pushed during one second, keyed by identity, plus the merge-key totals.
#[derive(Clone)]
struct Node<T: Keyed> {
    data: HashMap<T::Key, T>,
    timestamp: i64,
}

impl<T: Keyed> Default for Node<T> {
    fn default() -> Self {
        Self {
            data: HashMap::new(),
            timestamp: 0,
        }
    }
}

impl<T: Keyed> Node<T> {
    /// Re-sums every identity value into `merge_key`. Folding order follows the map, which is
    /// fine as long as `sum` is commutative. With no identity besides `merge_key` the stored
    /// value is left as pushed.
    fn recompute_merge(&mut self, merge_key: &T::Key) {
        let total = self
            .data
            .iter()
            .filter(|(key, _)| *key != merge_key)
            .fold(None::<T>, |acc, (_, value)| match acc {
                None => Some(value.clone()),
                Some(acc) => Some(value.sum(&acc)),
            });
        if let Some(total) = total {
            self.data.insert(merge_key.clone(), total);
        }
    }
}

#[derive(Clone)]
struct MaxEntry<T> {
    value: T,
    ctime: i64,
}

struct MultiKeyState<T: Keyed> {
    seg: Ring<Node<T>>,
    series: Option<Ring<Node<T>>>,
    max: HashMap<T::Key, MaxEntry<T>>,
}

impl<T: Keyed> MultiKeyState<T> {
    /// Closes the current second: archive it into the series, fold it into the maxima for
    /// the pushed keys, then move the seg cursor onto a fresh node.
    fn rotate(&mut self, sample: &T, duration_secs: i64, now: i64) {
        if let Some(series) = self.series.as_mut() {
            *series.advance() = self.seg.head().clone();
        }
        self.offer_max(sample.key(), duration_secs, now);
        self.offer_max(sample.merge_key(), duration_secs, now);
        *self.seg.advance() = Node::default();
    }

    /// Ties keep the stored maximum; only a strictly greater value replaces it.
    fn offer_max(&mut self, key: T::Key, duration_secs: i64, now: i64) {
        let node = self.seg.head();
        let Some(candidate) = node.data.get(&key) else {
            return;
        };
        let replace = match self.max.get(&key) {
            None => true,
            Some(stored) if now.saturating_sub(stored.ctime) > duration_secs => true,
            Some(stored) => stored.value.less(candidate),
        };
        if replace {
            let entry = MaxEntry {
                value: candidate.clone(),
                ctime: node.timestamp,
            };
            self.max.insert(key, entry);
        }
    }

    fn node_at(&self, timestamp: i64) -> Option<&Node<T>> {
        self.seg.iter_newest().find(|node| node.timestamp == timestamp)
    }
}

/// Multi-key per-second aggregator.
///
/// A short *seg* ring holds the live per-second nodes used for point reads and maxima; an
/// optional, longer *series* ring keeps finalized nodes for graphing. Every push recomputes
/// the sample's merge-key total for the current second.
pub struct MultiKeyWindow<T: Keyed> {
    state: RwLock<MultiKeyState<T>>,
    clock: SecondClock,
    seg_len: usize,
    series_len: Option<usize>,
    duration_secs: i64,
}

impl<T: Keyed> MultiKeyWindow<T> {
    pub fn push(&self, sample: T) {
        let mut state = self.state.write();
        let (now, same_second) = self.clock.same_second();
        if !same_second {
            state.rotate(&sample, self.duration_secs, now);
        }
        let key = sample.key();
        let merge_key = sample.merge_key();
        let node = state.seg.head_mut();
        node.timestamp = now;
        node.data.insert(key, sample);
        node.recompute_merge(&merge_key);
    }

    /// Rolling maximum for `key`, or `None` when absent or older than `duration_secs`.
    pub fn max(&self, key: &T::Key) -> Option<T> {
        let state = self.state.read();
        let now = self.clock.now();
        state
            .max
            .get(key)
            .filter(|m| now.saturating_sub(m.ctime) <= self.duration_secs)
            .map(|m| m.value.clone())
    }

    /// Takes every unexpired maximum and clears the whole table.
    pub fn pop_max(&self) -> Vec<T> {
        let mut state = self.state.write();
        let now = self.clock.now();
        state
            .max
            .drain()
            .filter(|(_, m)| now.saturating_sub(m.ctime) <= self.duration_secs)
            .map(|(_, m)| m.value)
            .collect()
    }

    /// Value stored for `template.key()` at second `timestamp`, or `template` itself when that
    /// second has left the seg ring or the key was not pushed in it.
    pub fn get(&self, timestamp: i64, template: T) -> T {
        let state = self.state.read();
        state
            .node_at(timestamp)
            .and_then(|node| node.data.get(&template.key()).cloned())
            .unwrap_or(template)
    }

    pub fn get_point(&self, timestamp: i64, template: T) -> KeyedPoint<T> {
        KeyedPoint::new(self.get(timestamp, template), timestamp)
    }

    /// Reads the last complete second.
    pub fn get_last(&self, template: T) -> T {
        self.get(self.clock.now() - 1, template)
    }

    pub fn get_last_point(&self, template: T) -> KeyedPoint<T> {
        self.get_point(self.clock.now() - 1, template)
    }

    /// Every value (identities and merge totals) recorded at `timestamp`.
    pub fn list(&self, timestamp: i64) -> Vec<T> {
        let state = self.state.read();
        state
            .node_at(timestamp)
            .map(|node| node.data.values().cloned().collect())
            .unwrap_or_default()
    }

    /// One point per second over `[now - series_len, now)` for `template.key()`. Seconds
    /// without data carry `template`. Empty when the window keeps no series.
    pub fn series(&self, template: &T) -> Vec<KeyedPoint<T>> {
        let state = self.state.read();
        let Some(series) = state.series.as_ref() else {
            return Vec::new();
        };
        let end = self.clock.now();
        let start = end - series.len() as i64;
        let mut points: Vec<_> = (start..end)
            .map(|time| KeyedPoint::new(template.clone(), time))
            .collect();
        let key = template.key();
        for node in series.iter_newest() {
            if node.timestamp < start || node.timestamp >= end {
                continue;
            }
            if let Some(value) = node.data.get(&key) {
                points[(node.timestamp - start) as usize].value = value.clone();
            }
        }
        points
    }

    pub fn seg_len(&self) -> usize {
        self.seg_len
    }

    pub fn series_len(&self) -> Option<usize> {
        self.series_len
    }

    pub fn duration_secs(&self) -> i64 {
        self.duration_secs
    }
}

impl<T: Keyed> fmt::Debug for MultiKeyWindow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiKeyWindow")
            .field("seg_len", &self.seg_len)
            .field("series_len", &self.series_len)
            .field("duration_secs", &self.duration_secs)
            .finish()
    }
}

pub struct MultiKeyWindowBuilder {
    seg_len: usize,
    series_len: Option<usize>,
    duration_secs: i64,
    source: Option<Arc<dyn TimeSource>>,
}

impl MultiKeyWindowBuilder {
    pub fn new() -> Self {
        Self {
            seg_len: DEFAULT_RING_LEN,
            series_len: None,
            duration_secs: DEFAULT_DURATION_SECS,
            source: None,
        }
    }

    pub fn from_settings(settings: &MultiKeySettings) -> Self {
        Self {
            seg_len: settings.seg_len,
            series_len: settings.series_len,
            duration_secs: settings.duration_secs,
            source: None,
        }
    }

    pub fn seg_len(mut self, len: usize) -> Self {
        self.seg_len = len;
        self
    }

    /// Enables the history ring used by [`MultiKeyWindow::series`].
    pub fn series_len(mut self, len: usize) -> Self {
        self.series_len = Some(len);
        self
    }

    pub fn duration_secs(mut self, secs: i64) -> Self {
        self.duration_secs = secs;
        self
    }

    pub fn time_source(mut self, source: Arc<dyn TimeSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn build<T: Keyed>(self) -> Result<MultiKeyWindow<T>> {
        ensure_capacity("seg", self.seg_len)?;
        if let Some(len) = self.series_len {
            ensure_capacity("series", len)?;
        }
        ensure_seconds("duration_secs", self.duration_secs)?;
        debug!(
            "multi-key window: seg_len={} series_len={:?} duration={}s",
            self.seg_len, self.series_len, self.duration_secs
        );
        let source = self.source.unwrap_or_else(system_time);
        let state = MultiKeyState {
            seg: Ring::new(self.seg_len, Node::default),
            series: self.series_len.map(|len| Ring::new(len, Node::default)),
            max: HashMap::new(),
        };
        Ok(MultiKeyWindow {
            state: RwLock::new(state),
            clock: SecondClock::primed(source),
            seg_len: self.seg_len,
            series_len: self.series_len,
            duration_secs: self.duration_secs,
        })
    }
}

impl Default for MultiKeyWindowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTimeSource;
    use core_types::Entry;

    #[derive(Debug, Clone, PartialEq)]
    struct HostLoad {
        host: &'static str,
        group: &'static str,
        value: i64,
    }

    impl Entry for HostLoad {
        fn less(&self, other: &Self) -> bool {
            self.value < other.value
        }

        fn sum(&self, other: &Self) -> Self {
            HostLoad {
                host: self.group,
                group: self.group,
                value: self.value + other.value,
            }
        }
    }

    impl Keyed for HostLoad {
        type Key = &'static str;

        fn key(&self) -> Self::Key {
            self.host
        }

        fn merge_key(&self) -> Self::Key {
            self.group
        }
    }

    fn load(host: &'static str, value: i64) -> HostLoad {
        HostLoad {
            host,
            group: "grp",
            value,
        }
    }

    fn template(host: &'static str) -> HostLoad {
        load(host, 0)
    }

    fn window(time: &Arc<ManualTimeSource>) -> MultiKeyWindow<HostLoad> {
        MultiKeyWindowBuilder::new()
            .series_len(5)
            .time_source(time.clone())
            .build()
            .expect("valid window")
    }

    #[test]
    fn merge_key_holds_group_total() {
        let time = ManualTimeSource::shared(1_000);
        let w = window(&time);
        w.push(load("h1", 10));
        w.push(load("h2", 20));
        assert_eq!(w.get(1_000, template("grp")).value, 30);
        assert_eq!(w.get(1_000, template("h1")).value, 10);
    }

    #[test]
    fn repeated_key_within_second_replaces_contribution() {
        let time = ManualTimeSource::shared(1_000);
        let w = window(&time);
        w.push(load("h1", 10));
        w.push(load("h2", 20));
        w.push(load("h1", 5));
        assert_eq!(w.get(1_000, template("grp")).value, 25);
    }

    #[test]
    fn push_under_merge_key_is_replaced_by_identity_total() {
        let time = ManualTimeSource::shared(1_000);
        let w = window(&time);
        w.push(load("h1", 10));
        w.push(load("h2", 20));
        w.push(load("grp", 7));
        assert_eq!(w.get(1_000, template("grp")).value, 30);
    }

    #[test]
    fn push_under_merge_key_alone_is_kept() {
        let time = ManualTimeSource::shared(1_000);
        let w = window(&time);
        w.push(load("grp", 7));
        assert_eq!(w.get(1_000, template("grp")).value, 7);
    }

    #[test]
    fn get_falls_back_to_template() {
        let time = ManualTimeSource::shared(1_000);
        let w = window(&time);
        w.push(load("h1", 10));
        assert_eq!(w.get(1_000, template("h9")), template("h9"));
        assert_eq!(w.get(999, template("h1")), template("h1"));
    }

    #[test]
    fn get_last_reads_previous_second() {
        let time = ManualTimeSource::shared(1_000);
        let w = window(&time);
        w.push(load("h1", 4));
        time.advance(1);
        w.push(load("h1", 9));
        assert_eq!(w.get_last(template("h1")).value, 4);
        let point = w.get_last_point(template("grp"));
        assert_eq!((point.value.value, point.time), (4, 1_000));
    }

    #[test]
    fn seg_ring_only_keeps_recent_seconds() {
        let time = ManualTimeSource::shared(1_000);
        let w = window(&time);
        for value in 1..=4 {
            w.push(load("h1", value));
            time.advance(1);
        }
        assert_eq!(w.get(1_000, template("h1")), template("h1"));
        assert_eq!(w.get(1_001, template("h1")).value, 2);
        assert_eq!(w.get(1_003, template("h1")).value, 4);
    }

    #[test]
    fn list_returns_identities_and_total() {
        let time = ManualTimeSource::shared(1_000);
        let w = window(&time);
        w.push(load("h1", 1));
        w.push(load("h2", 2));
        let mut values: Vec<_> = w.list(1_000).into_iter().map(|v| (v.host, v.value)).collect();
        values.sort();
        assert_eq!(values, vec![("grp", 3), ("h1", 1), ("h2", 2)]);
        assert!(w.list(42).is_empty());
    }

    #[test]
    fn max_is_folded_in_when_the_second_closes() {
        let time = ManualTimeSource::shared(1_000);
        let w = window(&time);
        w.push(load("h1", 10));
        w.push(load("h2", 5));
        assert_eq!(w.max(&"h1"), None);
        time.advance(1);
        w.push(load("h1", 3));
        assert_eq!(w.max(&"h1").map(|m| m.value), Some(10));
        assert_eq!(w.max(&"grp").map(|m| m.value), Some(15));
        // h2 was not pushed in the new second, so its max was never offered
        assert_eq!(w.max(&"h2"), None);
        time.advance(1);
        w.push(load("h1", 1));
        assert_eq!(w.max(&"h1").map(|m| m.value), Some(10));
    }

    #[test]
    fn max_ties_keep_the_existing_value() {
        let time = ManualTimeSource::shared(1_000);
        let w = window(&time);
        w.push(HostLoad { host: "h1", group: "first", value: 8 });
        time.advance(1);
        w.push(HostLoad { host: "h1", group: "second", value: 8 });
        time.advance(1);
        w.push(load("h1", 0));
        assert_eq!(w.max(&"h1").map(|m| m.group), Some("first"));
    }

    #[test]
    fn max_expires_after_duration() {
        let time = ManualTimeSource::shared(0);
        let w = window(&time);
        w.push(load("h1", 10));
        time.advance(1);
        w.push(load("h1", 1));
        time.advance(299);
        assert_eq!(w.max(&"h1").map(|m| m.value), Some(10));
        time.advance(1);
        assert_eq!(w.max(&"h1"), None);
        // closing second 1 offers h1=1, which replaces the expired 10
        w.push(load("h1", 2));
        assert_eq!(w.max(&"h1").map(|m| m.value), Some(1));
    }

    #[test]
    fn pop_max_drains_every_key() {
        let time = ManualTimeSource::shared(1_000);
        let w = window(&time);
        w.push(load("h1", 10));
        w.push(load("h2", 20));
        time.advance(1);
        w.push(load("h2", 1));
        let mut popped: Vec<_> = w.pop_max().into_iter().map(|m| (m.host, m.value)).collect();
        popped.sort();
        assert_eq!(popped, vec![("grp", 30), ("h2", 20)]);
        assert!(w.pop_max().is_empty());
        assert_eq!(w.max(&"h2"), None);
    }

    #[test]
    fn series_spans_the_last_seconds_with_template_gaps() {
        let time = ManualTimeSource::shared(100);
        let w = window(&time);
        for value in 1..=3 {
            w.push(load("h1", value));
            time.advance(1);
        }
        time.set(104);
        w.push(load("h1", 9));
        let series = w.series(&template("h1"));
        let times: Vec<_> = series.iter().map(|p| p.time).collect();
        let values: Vec<_> = series.iter().map(|p| p.value.value).collect();
        assert_eq!(times, vec![99, 100, 101, 102, 103]);
        assert_eq!(values, vec![0, 1, 2, 3, 0]);
        assert_eq!(series[0].value, template("h1"));
    }

    #[test]
    fn series_is_empty_without_history_ring() {
        let time = ManualTimeSource::shared(100);
        let w: MultiKeyWindow<HostLoad> = MultiKeyWindowBuilder::new()
            .time_source(time.clone())
            .build()
            .expect("valid window");
        w.push(load("h1", 1));
        assert!(w.series(&template("h1")).is_empty());
        assert_eq!(w.series_len(), None);
    }

    #[test]
    fn builder_rejects_zero_rings() {
        let err = MultiKeyWindowBuilder::new()
            .series_len(0)
            .build::<HostLoad>()
            .unwrap_err();
        assert_eq!(err, crate::WindowError::ZeroCapacity { ring: "series" });
        assert!(MultiKeyWindowBuilder::new().seg_len(0).build::<HostLoad>().is_err());
    }
}
