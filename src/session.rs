//! Connection-scoped session storage.
//!
//! A thread-safe, untyped key -> value store, separate from the per-message session
//! carried on a [`crate::context::RequestContext`]. Backed by [`dashmap`] so reads and
//! writes from concurrently dispatched handler tasks never need an external lock.

use dashmap::DashMap;
use serde_json::Value;

#[derive(Debug, Default)]
pub struct Session {
    data: DashMap<String, Value>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.get(key).map(|v| v.clone())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.data.remove(key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_get_remove_roundtrip() {
        let s = Session::new();
        s.set("k", json!(42));
        assert_eq!(s.get("k"), Some(json!(42)));
        assert!(s.contains("k"));
        assert_eq!(s.remove("k"), Some(json!(42)));
        assert_eq!(s.get("k"), None);
    }
}
