//! Subject Extraction from Claim Sets

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Layer 3: Internal module imports
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::Subject;

fn default_id_pointer() -> String {
    "/sub".to_string()
}

/// How to map a decoded claim set into a [`Subject`]
///
/// Pointers use JSON pointer syntax. By default the subject id comes from the
/// `sub` claim and the whole claim set becomes the subject's attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectInfo {
    #[serde(default = "default_id_pointer")]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<String>,
}

impl Default for SubjectInfo {
    fn default() -> Self {
        Self {
            id: default_id_pointer(),
            attributes: None,
        }
    }
}

impl SubjectInfo {
    pub fn create_subject(&self, claims: &Value) -> PipelineResult<Subject> {
        let id_value = claims.pointer(&self.id).ok_or_else(|| {
            PipelineError::internal(format!(
                "no value present at subject id pointer {:?}",
                self.id
            ))
        })?;

        let id = match id_value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            other => {
                return Err(PipelineError::internal(format!(
                    "value at subject id pointer {:?} is not usable as an id: {other}",
                    self.id
                )));
            }
        };

        let attributes = match &self.attributes {
            Some(pointer) => claims
                .pointer(pointer)
                .cloned()
                .ok_or_else(|| {
                    PipelineError::internal(format!(
                        "no value present at subject attributes pointer {pointer:?}"
                    ))
                })?,
            None => claims.clone(),
        };

        Ok(Subject::with_attributes(id, attributes))
    }
}
