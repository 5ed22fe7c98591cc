//! Rule Set, Matching and Execution
//!
//! Rules pair a request matcher with an execution pipeline of mechanism
//! instances and an ordered error-handler list. The rule set indexes rules
//! in a path template trie; the executor runs the matched rule's pipeline
//! and produces the decision.

pub mod config;
pub mod executor;
pub mod factory;
pub mod matcher;
pub mod rule;
pub mod rule_set;

pub use config::{RuleConfig, RuleSetDocument};
pub use executor::{AllowedOutcome, Outcome, RuleExecutor};
pub use factory::{MechanismCatalogue, MechanismRegistry, RuleFactory};
pub use rule::{Backend, Rule};
pub use rule_set::{RuleRepository, RuleSet};
