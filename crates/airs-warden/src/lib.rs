//! AIRS Warden - Identity-Aware Policy Decision and Enforcement Gateway
//!
//! Warden sits in front of upstream services and evaluates a configured
//! pipeline of authentication, contextualization, authorization,
//! finalization and error-handling mechanisms against rules matched to each
//! incoming request. The outcome is either a policy decision signalled to
//! an external reverse proxy (decision mode) or a proxied call to the
//! rule's backend (proxy mode).
//!
//! # Architecture
//!
//! The crate is organized in layers:
//!
//! - **Primitives** (`template`, `expression`, `cache`): the text template
//!   dialect used for URLs, headers and payloads; the condition expression
//!   dialect used by authorizers and error handlers; and the singleflight
//!   TTL cache shared by all remote lookups.
//! - **Endpoint Layer** (`endpoint`): templated outgoing HTTP calls with
//!   retry, response caching and pluggable authentication strategies.
//! - **OAuth2 Layer** (`oauth2`): authorization server metadata discovery
//!   (RFC 8414), JWKS resolution with key rotation, JWT verification and
//!   token introspection.
//! - **Pipeline Layer** (`pipeline`, `mechanisms`): the per-request state
//!   (subject, outputs) and the five mechanism categories with their
//!   factory registries.
//! - **Rules Layer** (`rules`): rule configuration, the path template trie,
//!   the rule set with snapshot swapping, and the executor.
//! - **Service Layer** (`handler`, `app`): the decision, proxy and
//!   management services and the explicit application lifecycle.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use airs_warden::app::{App, Config, OperationMode};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_yaml(
//!     r#"
//!     mechanisms:
//!       authenticators:
//!         - id: anon
//!           type: anonymous
//!     rules:
//!       - id: rule:anything
//!         match:
//!           path: /anything
//!         execute:
//!           - authenticator: anon
//!     "#,
//! )?;
//!
//! let app = App::bootstrap(config, OperationMode::Decision)?;
//! let shutdown = CancellationToken::new();
//! app.start(shutdown).await?;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod cache;
pub mod endpoint;
pub mod error;
pub mod expression;
pub mod handler;
pub mod mechanisms;
pub mod oauth2;
pub mod pipeline;
pub mod rules;
pub mod template;

pub use app::{App, AppContext, Config, OperationMode};
pub use error::{ErrorKind, PipelineError, PipelineResult};
pub use pipeline::{Outputs, PipelineContext, RequestInfo, Subject};
pub use rules::{Outcome, RuleExecutor};
