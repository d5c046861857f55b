//! Named trackers with a default

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::tracker::Tracker;

#[derive(Default)]
struct Inner {
    trackers: BTreeMap<String, Arc<Tracker>>,
    default: Option<String>,
}

/// Process-wide lookup of trackers by name.
///
/// The first tracker inserted becomes the default until another is chosen
/// with [`TrackerRegistry::set_default`].
#[derive(Default)]
pub struct TrackerRegistry {
    inner: RwLock<Inner>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a tracker, returning the one it replaced
    pub fn insert(&self, name: impl Into<String>, tracker: Tracker) -> Option<Arc<Tracker>> {
        let name = name.into();
        let mut inner = self.write();
        if inner.default.is_none() {
            inner.default = Some(name.clone());
        }
        inner.trackers.insert(name, Arc::new(tracker))
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tracker>> {
        self.read().trackers.get(name).cloned()
    }

    /// Unregister a tracker and stop its emitter
    pub fn remove(&self, name: &str) -> Option<Arc<Tracker>> {
        let removed = {
            let mut inner = self.write();
            let removed = inner.trackers.remove(name);
            if inner.default.as_deref() == Some(name) {
                inner.default = None;
            }
            removed
        };

        if let Some(tracker) = &removed {
            tracker.stop();
            tracing::debug!(name, "Tracker removed");
        }
        removed
    }

    pub fn default_tracker(&self) -> Option<Arc<Tracker>> {
        let inner = self.read();
        inner
            .default
            .as_ref()
            .and_then(|name| inner.trackers.get(name).cloned())
    }

    /// Make `name` the default; returns false if no such tracker is registered
    pub fn set_default(&self, name: &str) -> bool {
        let mut inner = self.write();
        if !inner.trackers.contains_key(name) {
            return false;
        }
        inner.default = Some(name.to_string());
        true
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.read().trackers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmitterConfig, NetworkConfig};
    use crate::db::Database;
    use crate::emitter::Emitter;
    use crate::http::mock::MockHttpClient;
    use crate::tracker::TrackerSettings;

    fn create_tracker(namespace: &str) -> Tracker {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let emitter = Emitter::with_http_client(
            Arc::new(db),
            &NetworkConfig::new("collector.test"),
            &EmitterConfig::default(),
            Arc::new(MockHttpClient::new(200)),
        )
        .unwrap();
        let settings = TrackerSettings {
            namespace: namespace.to_string(),
            ..Default::default()
        };
        Tracker::new(emitter, None, settings)
    }

    #[test]
    fn test_first_insert_becomes_default() {
        let registry = TrackerRegistry::new();
        assert!(registry.default_tracker().is_none());

        registry.insert("web", create_tracker("web"));
        registry.insert("jobs", create_tracker("jobs"));

        let default = registry.default_tracker().unwrap();
        assert_eq!(default.settings().namespace, "web");
        assert_eq!(registry.names(), vec!["jobs".to_string(), "web".to_string()]);
    }

    #[test]
    fn test_set_default() {
        let registry = TrackerRegistry::new();
        registry.insert("web", create_tracker("web"));
        registry.insert("jobs", create_tracker("jobs"));

        assert!(registry.set_default("jobs"));
        assert!(!registry.set_default("missing"));
        assert_eq!(
            registry.default_tracker().unwrap().settings().namespace,
            "jobs"
        );
    }

    #[test]
    fn test_remove_stops_tracker_and_clears_default() {
        let registry = TrackerRegistry::new();
        registry.insert("web", create_tracker("web"));
        registry.get("web").unwrap().start().unwrap();

        let removed = registry.remove("web").unwrap();
        assert!(!removed.emitter().is_running());
        assert!(registry.get("web").is_none());
        assert!(registry.default_tracker().is_none());
        assert!(registry.remove("web").is_none());
    }
}
