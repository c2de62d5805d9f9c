use std::collections::HashMap;
use std::hash::Hash;

/// Resources every node serves until they are overwritten or deleted.
pub const STATIC_RESOURCES: &[(&str, &[u8])] = &[
    ("/static/foo", b"Foo"),
    ("/static/bar", b"Bar"),
    ("/static/baz", b"Baz"),
];

/// In-memory key/value store backing the HTTP resources of this node.
///
/// Only the event loop touches it, so there is no locking.
#[derive(Clone, Debug, Default)]
pub struct Store<K, V> {
    entries: HashMap<K, V>,
}

impl<K, V> Store<K, V>
where
    K: Hash + Eq,
{
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    // Stores/replaces the value, true if a value was replaced
    pub fn put(&mut self, key: K, value: V) -> bool {
        self.entries.insert(key, value).is_some()
    }

    // true if something was removed
    pub fn delete(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Store<String, Vec<u8>> {
    pub fn with_static_resources() -> Self {
        let mut store = Self::new();
        for (key, value) in STATIC_RESOURCES {
            store.put(key.to_string(), value.to_vec());
        }
        store
    }
}
