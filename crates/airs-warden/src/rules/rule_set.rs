//! Rule Set and Snapshot Repository

// Layer 1: Standard library imports
use std::sync::{Arc, RwLock};

// Layer 2: Third-party crate imports
use indexmap::IndexMap;
use tracing::debug;

// Layer 3: Internal module imports
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::RequestInfo;
use crate::rules::matcher::PathTrie;
use crate::rules::rule::Rule;

/// An indexed, immutable set of rules plus an optional default rule
///
/// Lookup walks the path trie most specific template first and returns the
/// first rule whose remaining constraints accept the request. A request
/// whose path matches but whose method is not allowed by any candidate
/// fails with a method-not-allowed error; everything else falls back to the
/// default rule, if present.
pub struct RuleSet {
    trie: PathTrie<Vec<Arc<Rule>>>,
    default_rule: Option<Arc<Rule>>,
    len: usize,
}

impl RuleSet {
    pub fn new(rules: Vec<Arc<Rule>>, default_rule: Option<Arc<Rule>>) -> PipelineResult<Self> {
        let len = rules.len();
        let mut trie: PathTrie<Vec<Arc<Rule>>> = PathTrie::new();

        for rule in rules {
            let peers = trie.get_or_insert_with(rule.matcher.path(), Vec::new)?;

            if let Some(peer) = peers
                .iter()
                .find(|peer| peer.matcher.conflicts_with(&rule.matcher))
            {
                return Err(PipelineError::configuration(format!(
                    "rules {:?} and {:?} are ambiguous: their matchers cannot be told apart",
                    peer.id, rule.id
                )));
            }

            peers.push(rule);
        }

        Ok(Self {
            trie,
            default_rule,
            len,
        })
    }

    /// An empty set without a default rule
    pub fn empty() -> Self {
        Self {
            trie: PathTrie::new(),
            default_rule: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Find the rule responsible for the request
    ///
    /// On success the captures of the winning path template are returned
    /// alongside the rule.
    pub fn find(
        &self,
        request: &RequestInfo,
    ) -> PipelineResult<(Arc<Rule>, IndexMap<String, String>)> {
        let mut method_mismatch = false;

        for (peers, captures) in self.trie.find(&request.path) {
            for rule in peers {
                if !rule.matcher.accepts_request(request) {
                    continue;
                }
                if !rule.matcher.allows_method(&request.method) {
                    method_mismatch = true;
                    continue;
                }

                debug!(rule = %rule.id, path = %request.path, "rule matched");
                return Ok((Arc::clone(rule), captures));
            }
        }

        if method_mismatch {
            return Err(PipelineError::method_not_allowed(format!(
                "method {} is not allowed on {}",
                request.method, request.path
            )));
        }

        if let Some(default_rule) = &self.default_rule {
            debug!(path = %request.path, "falling back to the default rule");
            return Ok((Arc::clone(default_rule), IndexMap::new()));
        }

        Err(PipelineError::no_rule_found(format!(
            "no rule matches {} {}",
            request.method, request.path
        )))
    }
}

/// Shared handle to the active rule set snapshot
///
/// Configuration updates publish a new snapshot via [`swap`](Self::swap);
/// in-flight requests keep operating on the snapshot they started with.
pub struct RuleRepository {
    current: RwLock<Arc<RuleSet>>,
}

impl RuleRepository {
    pub fn new(rule_set: RuleSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(rule_set)),
        }
    }

    /// The active snapshot
    pub fn snapshot(&self) -> Arc<RuleSet> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            // a poisoned lock still holds a usable snapshot
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Publish a new snapshot
    pub fn swap(&self, rule_set: RuleSet) {
        let rule_set = Arc::new(rule_set);
        match self.current.write() {
            Ok(mut guard) => *guard = rule_set,
            Err(poisoned) => *poisoned.into_inner() = rule_set,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::app::AppContext;
    use crate::error::ErrorKind;
    use crate::rules::config::RuleConfig;
    use crate::rules::factory::{MechanismCatalogue, MechanismRegistry, RuleFactory};

    fn factory() -> RuleFactory {
        let app = AppContext::create().unwrap();
        let catalogue: MechanismCatalogue = serde_json::from_value(json!({
            "authenticators": [{"id": "anon", "type": "anonymous"}],
        }))
        .unwrap();
        RuleFactory::new(MechanismRegistry::from_catalogue(&app, &catalogue).unwrap())
    }

    fn rule(value: serde_json::Value) -> Arc<Rule> {
        let config: RuleConfig = serde_json::from_value(value).unwrap();
        Arc::new(factory().build_rule(&config, None).unwrap())
    }

    fn books_rule() -> Arc<Rule> {
        rule(json!({
            "id": "rule:books",
            "match": {"methods": ["GET"], "path": "/api/books/{id}"},
            "execute": [{"authenticator": "anon"}],
        }))
    }

    #[test]
    fn test_lookup_returns_the_matching_rule_with_captures() {
        let set = RuleSet::new(vec![books_rule()], None).unwrap();

        let (found, captures) = set
            .find(&RequestInfo::new("GET", "http", "test.local", "/api/books/42"))
            .unwrap();
        assert_eq!(found.id, "rule:books");
        assert_eq!(captures.get("id").map(String::as_str), Some("42"));
    }

    #[test]
    fn test_no_rule_found() {
        let set = RuleSet::new(vec![books_rule()], None).unwrap();

        let err = set
            .find(&RequestInfo::new("GET", "http", "test.local", "/other"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoRuleFound);
    }

    #[test]
    fn test_method_mismatch_is_method_not_allowed() {
        let set = RuleSet::new(vec![books_rule()], None).unwrap();

        let err = set
            .find(&RequestInfo::new("DELETE", "http", "test.local", "/api/books/42"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MethodNotAllowed);
    }

    #[test]
    fn test_same_path_with_disjoint_methods_is_allowed() {
        let get = books_rule();
        let post = rule(json!({
            "id": "rule:books:create",
            "match": {"methods": ["POST"], "path": "/api/books/{id}"},
            "execute": [{"authenticator": "anon"}],
        }));

        let set = RuleSet::new(vec![get, post], None).unwrap();
        let (found, _) = set
            .find(&RequestInfo::new("POST", "http", "test.local", "/api/books/42"))
            .unwrap();
        assert_eq!(found.id, "rule:books:create");
    }

    #[test]
    fn test_ambiguous_rules_are_rejected_at_load_time() {
        let first = books_rule();
        let second = rule(json!({
            "id": "rule:conflict",
            "match": {"methods": ["GET"], "path": "/api/books/{name}"},
            "execute": [{"authenticator": "anon"}],
        }));

        let err = RuleSet::new(vec![first, second], None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.message().contains("ambiguous"));
    }

    #[test]
    fn test_default_rule_applies_when_nothing_matches() {
        let default_rule = rule(json!({
            "id": "default",
            "match": {"path": "/"},
            "execute": [{"authenticator": "anon"}],
        }));

        let set = RuleSet::new(vec![books_rule()], Some(default_rule)).unwrap();
        let (found, _) = set
            .find(&RequestInfo::new("GET", "http", "test.local", "/other"))
            .unwrap();
        assert_eq!(found.id, "default");
    }

    #[test]
    fn test_more_specific_template_wins() {
        let by_template = rule(json!({
            "id": "rule:capture",
            "match": {"path": "/api/{resource}"},
            "execute": [{"authenticator": "anon"}],
        }));
        let exact = rule(json!({
            "id": "rule:exact",
            "match": {"path": "/api/books"},
            "execute": [{"authenticator": "anon"}],
        }));

        let set = RuleSet::new(vec![by_template, exact], None).unwrap();
        let (found, _) = set
            .find(&RequestInfo::new("GET", "http", "test.local", "/api/books"))
            .unwrap();
        assert_eq!(found.id, "rule:exact");
    }

    #[test]
    fn test_repository_swap_publishes_a_new_snapshot() {
        let repository = RuleRepository::new(RuleSet::empty());
        assert!(repository.snapshot().is_empty());

        let old_snapshot = repository.snapshot();
        repository.swap(RuleSet::new(vec![books_rule()], None).unwrap());

        // the held snapshot is unaffected; new lookups see the new set
        assert!(old_snapshot.is_empty());
        assert_eq!(repository.snapshot().len(), 1);
    }
}
