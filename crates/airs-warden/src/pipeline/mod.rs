//! Pipeline State
//!
//! The per-request state carried through the rule pipeline: the
//! authenticated [`Subject`], the [`Outputs`] bag enriched by
//! contextualizers and authorizers, and the read-only request view.

mod context;
mod outputs;
mod subject;

pub use context::{PipelineContext, RequestInfo};
pub use outputs::Outputs;
pub use subject::Subject;
