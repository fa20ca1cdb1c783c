//! Concurrent key/value storage backing the metadata directory.

use dashmap::DashMap;

/// Thread-safe string map keyed by metadata label.
///
/// Entries for different keys never interfere with each other; publishers and
/// retrievers may hit the store concurrently.
#[derive(Default)]
pub struct MetadataStore {
    entries: DashMap<String, String>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, overwriting any previous entry under the same key.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Drop every stored entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries.
    ///
    /// Approximate under concurrent mutation.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::MetadataStore;

    #[test]
    fn set_get_overwrite() {
        let store = MetadataStore::new();
        assert_eq!(store.get("a"), None);

        store.set("a", "1");
        assert_eq!(store.get("a"), Some("1".to_string()));

        store.set("a", "2");
        assert_eq!(store.get("a"), Some("2".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn clear_drops_everything() {
        let store = MetadataStore::new();
        store.set("a", "1");
        store.set("b", "2");
        assert_eq!(store.len(), 2);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.get("a"), None);
    }

    #[test]
    fn concurrent_distinct_keys_do_not_interfere() {
        let store = Arc::new(MetadataStore::new());

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("worker-{worker}-key-{i}");
                        store.set(key.clone(), format!("{i}"));
                        assert_eq!(store.get(&key), Some(format!("{i}")));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("worker panicked");
        }
        assert_eq!(store.len(), 800);
    }
}
