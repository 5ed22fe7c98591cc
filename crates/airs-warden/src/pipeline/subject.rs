//! Authenticated Subject

// Layer 2: Third-party crate imports
use serde::Serialize;
use serde_json::Value;

/// The authenticated principal for a request
///
/// Created exactly once per request by a successful authenticator. The id is
/// immutable; attributes may be enriched by later pipeline stages, namespaced
/// under the enriching mechanism's id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subject {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Attributes")]
    pub attributes: Value,
}

impl Subject {
    /// Create a subject without attributes
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Value::Object(serde_json::Map::new()),
        }
    }

    /// Create a subject with the given attributes
    pub fn with_attributes(id: impl Into<String>, attributes: Value) -> Self {
        Self {
            id: id.into(),
            attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_new_subject_has_empty_attributes() {
        let subject = Subject::new("anonymous");
        assert_eq!(subject.id, "anonymous");
        assert_eq!(subject.attributes, json!({}));
    }

    #[test]
    fn test_template_value_field_names() {
        let subject = Subject::with_attributes("alice", json!({"role": "admin"}));
        let value = serde_json::to_value(&subject).unwrap();
        assert_eq!(value, json!({"ID": "alice", "Attributes": {"role": "admin"}}));
    }
}
