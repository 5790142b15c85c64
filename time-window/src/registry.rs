use std::{collections::HashMap, fmt::Debug, hash::Hash, sync::Arc};

use core_types::{Entry, Point, RegistrySettings};
use log::debug;
use parking_lot::RwLock;

use crate::{
    clock::{TimeSource, system_time},
    error::Result,
    rolling::{Coalesce, RollingWindow, RollingWindowBuilder},
};

/// Lazily creates one per-second summing [`RollingWindow`] per external key (host,
/// connection, ...). At most one window is ever created for a key, even when several threads
/// ask for it at once.
pub struct WindowRegistry<K, E> {
    windows: RwLock<HashMap<K, Arc<RollingWindow<E>>>>,
    template: RollingWindowBuilder,
    source: Arc<dyn TimeSource>,
    ring_len: usize,
    timeout_secs: i64,
}

impl<K, E> WindowRegistry<K, E>
where
    K: Hash + Eq + Clone + Debug,
    E: Entry,
{
    pub fn new(settings: &RegistrySettings) -> Result<Self> {
        Self::with_time_source(settings, system_time())
    }

    pub fn with_time_source(
        settings: &RegistrySettings,
        source: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        let template = RollingWindowBuilder::new()
            .ring_len(settings.ring_len)
            .timeout_secs(settings.timeout_secs)
            .coalesce(Coalesce::Merge)
            .time_source(Arc::clone(&source));
        template.validate()?;
        Ok(Self {
            windows: RwLock::new(HashMap::new()),
            template,
            source,
            ring_len: settings.ring_len,
            timeout_secs: settings.timeout_secs,
        })
    }

    pub fn load_or_store(&self, key: &K) -> Arc<RollingWindow<E>> {
        if let Some(window) = self.windows.read().get(key) {
            return Arc::clone(window);
        }
        let mut windows = self.windows.write();
        let window = windows.entry(key.clone()).or_insert_with(|| {
            debug!("registry: creating window for {key:?}");
            Arc::new(self.template.clone().assemble())
        });
        Arc::clone(window)
    }

    /// Total of the last complete second for `key`, or `if_empty` stamped now when that second
    /// is missing or older than the registry timeout.
    pub fn last(&self, key: &K, if_empty: E) -> Point<E> {
        let window = self.load_or_store(key);
        let now = self.source.now_secs();
        let point = window.committed(2);
        if point.is_empty() || point.age(now) > self.timeout_secs {
            return Point::new(if_empty, now);
        }
        point
    }

    /// Committed points for `key` from the last `ring_len` seconds, oldest first.
    pub fn points(&self, key: &K) -> Vec<Point<E>> {
        let window = self.load_or_store(key);
        let horizon = self.source.now_secs() - self.ring_len as i64;
        window
            .points()
            .into_iter()
            .filter(|p| p.ctime > horizon)
            .collect()
    }

    /// Visits every window until `f` returns `false`. The registry stays read-locked during
    /// the walk, so `f` must not call [`WindowRegistry::load_or_store`] for a new key.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&K, &Arc<RollingWindow<E>>) -> bool,
    {
        let windows = self.windows.read();
        for (key, window) in windows.iter() {
            if !f(key, window) {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.windows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTimeSource;

    fn registry(time: &Arc<ManualTimeSource>) -> WindowRegistry<String, u64> {
        WindowRegistry::with_time_source(&RegistrySettings::default(), time.clone())
            .expect("valid registry")
    }

    #[test]
    fn load_or_store_reuses_windows() {
        let time = ManualTimeSource::shared(1_000);
        let reg = registry(&time);
        let a = reg.load_or_store(&"10.0.0.1".to_string());
        let b = reg.load_or_store(&"10.0.0.1".to_string());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
        assert_eq!(a.coalesce(), Coalesce::Merge);
        assert_eq!(a.capacity(), 300);
    }

    #[test]
    fn last_reads_previous_complete_second() {
        let time = ManualTimeSource::shared(1_000);
        let reg = registry(&time);
        let key = "conn-1".to_string();
        let window = reg.load_or_store(&key);
        window.push(3);
        window.push(4);
        time.advance(1);
        window.push(1);
        assert_eq!(reg.last(&key, 0), Point::new(7, 1_000));
    }

    #[test]
    fn last_substitutes_when_stale_or_missing() {
        let time = ManualTimeSource::shared(1_000);
        let reg = registry(&time);
        let key = "conn-1".to_string();
        assert_eq!(reg.last(&key, 0), Point::new(0, 1_000));
        let window = reg.load_or_store(&key);
        window.push(3);
        time.advance(1);
        window.push(1);
        time.advance(4);
        assert_eq!(reg.last(&key, 0), Point::new(3, 1_000));
        time.advance(1);
        assert_eq!(reg.last(&key, 0), Point::new(0, 1_006));
    }

    #[test]
    fn points_keeps_only_the_ring_horizon() {
        let time = ManualTimeSource::shared(1_000);
        let settings = RegistrySettings {
            ring_len: 3,
            timeout_secs: 5,
        };
        let reg: WindowRegistry<&'static str, u64> =
            WindowRegistry::with_time_source(&settings, time.clone()).expect("valid registry");
        let window = reg.load_or_store(&"k");
        window.push(1);
        time.advance(1);
        window.push(2);
        time.advance(2);
        let ctimes: Vec<_> = reg.points(&"k").iter().map(|p| p.ctime).collect();
        assert_eq!(ctimes, vec![1_001]);
    }

    #[test]
    fn range_stops_when_visitor_declines() {
        let time = ManualTimeSource::shared(1_000);
        let reg = registry(&time);
        for key in ["a", "b", "c"] {
            reg.load_or_store(&key.to_string());
        }
        let mut visited = 0;
        reg.range(|_, _| {
            visited += 1;
            visited < 2
        });
        assert_eq!(visited, 2);
    }

    #[test]
    fn rejects_invalid_settings() {
        let settings = RegistrySettings {
            ring_len: 0,
            timeout_secs: 5,
        };
        assert!(WindowRegistry::<String, u64>::new(&settings).is_err());
        let settings = RegistrySettings {
            ring_len: 3,
            timeout_secs: -1,
        };
        let err = WindowRegistry::<String, u64>::new(&settings)
            .err()
            .expect("negative timeout");
        assert_eq!(
            err,
            crate::WindowError::NegativeSeconds {
                field: "timeout_secs",
                value: -1
            }
        );
    }
}
