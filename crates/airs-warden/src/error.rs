//! Pipeline Error Model
//!
//! Structured errors for the rule pipeline with a closed set of error kinds.
//! Every mechanism reports errors through this type; the executor routes them
//! to the error-handler phase based on the kind.

// Layer 1: Standard library imports
use std::error::Error;
use std::fmt;

/// Closed set of error kinds surfaced by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request could not be authenticated
    Authentication,

    /// The authenticated subject is not allowed to perform the request
    Authorization,

    /// Communication with an upstream collaborator failed
    Communication,

    /// The loaded configuration is unusable
    Configuration,

    /// An implementation-level failure
    Internal,

    /// No rule matched the request
    NoRuleFound,

    /// A rule matched the request path, but not the method
    MethodNotAllowed,

    /// Template parsing or rendering failed
    Template,

    /// A mechanism kind is not registered (load-time only)
    UnsupportedType,
}

impl ErrorKind {
    /// Stable identifier used by error-handler condition expressions
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::Authorization => "authorization_error",
            ErrorKind::Communication => "communication_error",
            ErrorKind::Configuration => "configuration_error",
            ErrorKind::Internal => "internal_error",
            ErrorKind::NoRuleFound => "no_rule_error",
            ErrorKind::MethodNotAllowed => "method_not_allowed_error",
            ErrorKind::Template => "template_error",
            ErrorKind::UnsupportedType => "unsupported_type_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error carried through the rule pipeline
///
/// Carries a kind tag, a human readable message and an optional cause. The
/// kind is queryable for error-handler predicates and test assertions.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct PipelineError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

/// Result alias used across the pipeline
pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    /// Create an error with the given kind and message
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, message)
    }

    pub fn communication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Communication, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn no_rule_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoRuleFound, message)
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MethodNotAllowed, message)
    }

    pub fn template(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Template, message)
    }

    /// Attach the underlying cause
    pub fn with_source(mut self, source: impl Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Check whether this error is of the given kind
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// Normalize the kind for the pipeline boundary
    ///
    /// Templates are an implementation detail of mechanisms; their errors
    /// surface as internal errors once the pipeline hands over to the
    /// error-handler phase.
    pub fn into_boundary_error(self) -> Self {
        match self.kind {
            ErrorKind::Template => Self {
                kind: ErrorKind::Internal,
                message: self.message,
                source: self.source,
            },
            _ => self,
        }
    }
}
