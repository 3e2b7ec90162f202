use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single identity claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// Ordered multimap of identity claims.
///
/// Duplicate keys are permitted; `get` returns the first match. Iteration
/// order equals insertion order, which keeps claim hashing deterministic.
/// Claims may additionally reference policy rule IDs; those are kept in an
/// auxiliary `id -> position` index consulted by the lookup engine for
/// force-matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagStore {
    tags: Vec<Tag>,
    ids: HashMap<String, usize>,
}

impl TagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from flat `"key=value"` entries. Entries without an
    /// `=` separator are recorded as rule-ID claims.
    pub fn from_slice<S: AsRef<str>>(entries: &[S]) -> Self {
        let mut store = Self::new();
        for entry in entries {
            match entry.as_ref().split_once('=') {
                Some((k, v)) => store.append(k, v),
                None => store.append_id(entry.as_ref()),
            }
        }
        store
    }

    /// Append a claim. Existing claims with the same key are kept.
    pub fn append(&mut self, key: &str, value: &str) {
        self.tags.push(Tag {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    /// Append a claim carrying a rule ID.
    pub fn append_tagged(&mut self, key: &str, value: &str, id: &str) {
        self.ids.insert(id.to_string(), self.tags.len());
        self.append(key, value);
    }

    /// Record a bare rule-ID claim with no key/value pair.
    pub fn append_id(&mut self, id: &str) {
        self.ids.insert(id.to_string(), self.tags.len());
    }

    /// First value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(|t| t.key.as_str())
    }

    /// Claims in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|t| (t.key.as_str(), t.value.as_str()))
    }

    /// Rule-ID claims carried by this store.
    pub fn claim_ids(&self) -> impl Iterator<Item = &str> {
        self.ids.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.ids.is_empty()
    }

    /// Flatten back to `"key=value"` entries (insertion order).
    pub fn to_slice(&self) -> Vec<String> {
        self.tags
            .iter()
            .map(|t| format!("{}={}", t.key, t.value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_store() {
        let store = TagStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
        assert!(store.get("app").is_none());
    }

    #[test]
    fn append_and_get_first() {
        let mut store = TagStore::new();
        store.append("app", "web");
        store.append("app", "db");
        assert_eq!(store.get("app"), Some("web"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn iteration_order_is_insertion_order() {
        let mut store = TagStore::new();
        store.append("b", "2");
        store.append("a", "1");
        store.append("c", "3");
        let pairs: Vec<_> = store.iter().collect();
        assert_eq!(pairs, vec![("b", "2"), ("a", "1"), ("c", "3")]);
    }

    #[test]
    fn from_slice_splits_pairs() {
        let store = TagStore::from_slice(&["app=web", "env=demo"]);
        assert_eq!(store.get("app"), Some("web"));
        assert_eq!(store.get("env"), Some("demo"));
    }

    #[test]
    fn from_slice_bare_entries_become_ids() {
        let store = TagStore::from_slice(&["1", "app=web"]);
        let ids: Vec<_> = store.claim_ids().collect();
        assert_eq!(ids, vec!["1"]);
        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
    }

    #[test]
    fn value_may_contain_equals() {
        let store = TagStore::from_slice(&["query=a=b"]);
        assert_eq!(store.get("query"), Some("a=b"));
    }

    #[test]
    fn to_slice_roundtrip() {
        let mut store = TagStore::new();
        store.append("app", "web");
        store.append("env", "demo");
        assert_eq!(store.to_slice(), vec!["app=web", "env=demo"]);
    }

    #[test]
    fn tagged_claim_recorded_in_id_index() {
        let mut store = TagStore::new();
        store.append_tagged("app", "web", "42");
        assert_eq!(store.get("app"), Some("web"));
        assert_eq!(store.claim_ids().collect::<Vec<_>>(), vec!["42"]);
    }
}
