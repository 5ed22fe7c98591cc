//! Rule Matching
//!
//! A rule accepts a request when all of its configured constraints match:
//! method set (or any), scheme, glob host pattern, path template and query
//! constraints. Path templates are indexed in a [`PathTrie`] by the rule
//! set; the remaining constraints are checked per rule.

// Layer 1: Standard library imports
use std::collections::{HashMap, HashSet};

// Layer 2: Third-party crate imports
use glob::Pattern;

// Layer 3: Internal module imports
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::RequestInfo;
use crate::rules::config::MatcherConfig;

mod path_trie;

pub use path_trie::PathTrie;

/// Compiled matcher of one rule
#[derive(Debug, Clone)]
pub struct RuleMatcher {
    /// Uppercased method set; `None` matches any method
    methods: Option<HashSet<String>>,
    scheme: Option<String>,
    host: Option<(String, Pattern)>,
    path: String,

    /// Expected query parameters; the value `"*"` requires presence only
    query: HashMap<String, String>,
}

impl RuleMatcher {
    pub fn from_config(config: &MatcherConfig) -> PipelineResult<Self> {
        let methods = if config.methods.is_empty() {
            None
        } else {
            Some(
                config
                    .methods
                    .iter()
                    .map(|method| method.to_uppercase())
                    .collect(),
            )
        };

        let host = config
            .host
            .as_deref()
            .map(|host| {
                Pattern::new(host)
                    .map(|pattern| (host.to_string(), pattern))
                    .map_err(|e| {
                        PipelineError::configuration(format!("invalid host pattern {host:?}"))
                            .with_source(e)
                    })
            })
            .transpose()?;

        Ok(Self {
            methods,
            scheme: config.scheme.clone(),
            host,
            path: config.path.clone(),
            query: config.query.clone(),
        })
    }

    /// The rule's path template
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn allows_method(&self, method: &str) -> bool {
        match &self.methods {
            Some(methods) => methods.contains(&method.to_uppercase()),
            None => true,
        }
    }

    /// Check every constraint except method and path
    pub fn accepts_request(&self, request: &RequestInfo) -> bool {
        if let Some(scheme) = &self.scheme {
            if !scheme.eq_ignore_ascii_case(&request.scheme) {
                return false;
            }
        }

        if let Some((_, pattern)) = &self.host {
            if !pattern.matches(&request.host) {
                return false;
            }
        }

        for (name, expected) in &self.query {
            match request.query.get(name) {
                Some(actual) if expected == "*" || actual == expected => {}
                _ => return false,
            }
        }

        true
    }

    /// Whether two matchers for the same path template cannot be told apart
    ///
    /// Such rule pairs are rejected at load time as ambiguous.
    pub fn conflicts_with(&self, other: &RuleMatcher) -> bool {
        let methods_overlap = match (&self.methods, &other.methods) {
            (Some(a), Some(b)) => !a.is_disjoint(b),
            _ => true,
        };

        methods_overlap
            && self.scheme == other.scheme
            && self.host.as_ref().map(|(raw, _)| raw) == other.host.as_ref().map(|(raw, _)| raw)
            && self.query == other.query
    }
}
