//! Rule Mechanisms
//!
//! The five mechanism categories executed by the rule pipeline:
//! authenticators, contextualizers, authorizers, finalizers and error
//! handlers. Each category owns a factory table keyed by mechanism kind;
//! `create_prototype` builds load-time prototypes, and every prototype can be
//! specialized per rule via `override_with`.

// Layer 2: Third-party crate imports
use serde::de::DeserializeOwned;
use serde_json::Value;

// Layer 3: Internal module imports
use crate::error::{PipelineError, PipelineResult};

pub mod authenticators;
pub mod authorizers;
pub mod contextualizers;
pub mod error_handlers;
pub mod finalizers;

mod subject_info;

pub use subject_info::SubjectInfo;

/// Parse a mechanism configuration that must be present
pub(crate) fn parse_config<T: DeserializeOwned>(
    kind: &str,
    id: &str,
    config: Option<&Value>,
) -> PipelineResult<T> {
    let config = config.ok_or_else(|| {
        PipelineError::configuration(format!("{kind} mechanism {id:?} requires a configuration"))
    })?;

    serde_json::from_value(config.clone()).map_err(|e| {
        PipelineError::configuration(format!(
            "failed to parse the configuration of {kind} mechanism {id:?}"
        ))
        .with_source(e)
    })
}

/// Parse an optional mechanism configuration, falling back to defaults
pub(crate) fn parse_config_or_default<T: DeserializeOwned + Default>(
    kind: &str,
    id: &str,
    config: Option<&Value>,
) -> PipelineResult<T> {
    match config {
        Some(_) => parse_config(kind, id, config),
        None => Ok(T::default()),
    }
}
