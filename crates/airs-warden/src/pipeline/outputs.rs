//! Pipeline Outputs Bag

// Layer 2: Third-party crate imports
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

/// Mutable bag shared across the pipeline
///
/// Writers namespace their entries by mechanism id. Insertion order is
/// preserved, matching the configured mechanism order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Outputs(IndexMap<String, Value>);

impl Outputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, value: Value) {
        self.0.insert(id.into(), value);
    }

    pub fn get(&self, id: &str) -> Option<&Value> {
        self.0.get(id)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_insertion_order_is_preserved() {
        let mut outputs = Outputs::new();
        outputs.insert("c", json!(1));
        outputs.insert("a", json!(2));
        outputs.insert("b", json!(3));

        let keys: Vec<&str> = outputs.keys().collect();
        assert_eq!(keys, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_get_by_id() {
        let mut outputs = Outputs::new();
        outputs.insert("ctx", json!({"group": "dev"}));
        assert_eq!(outputs.get("ctx"), Some(&json!({"group": "dev"})));
        assert_eq!(outputs.get("other"), None);
    }
}
