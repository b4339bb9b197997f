//! Error taxonomy.
//!
//! - [`ConfigError`] is raised while compiling account configuration and is
//!   never produced at request time.
//! - [`RuleError`] is raised by [`crate::Rule::process`]. Its
//!   [`RuleError::NoMatchingRule`] variant is an expected control-flow signal
//!   consumed by alternative rules; everything else propagates unchanged.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("malformed account configuration: {0}")]
    Malformed(String),
    #[error("invalid configuration timestamp '{0}'")]
    InvalidTimestamp(String),
    #[error("unknown schema function '{0}'")]
    UnknownSchemaFunction(String),
    #[error("unknown result function '{0}'")]
    UnknownResultFunction(String),
    #[error("invalid configuration for function '{function}': {reason}")]
    InvalidFunctionConfig { function: String, reason: String },
    #[error("model group weight must be positive, got {0}")]
    NonPositiveWeight(i64),
    #[error("model group weight {0} is out of range")]
    WeightOverflow(i64),
    #[error("weighted list must contain at least one entry")]
    EmptyWeightedList,
    #[error("model group declares no schema functions")]
    EmptySchema,
    #[error("condition '{condition}' has {actual} tokens, schema declares {expected}")]
    ConditionLength { condition: String, expected: usize, actual: usize },
    #[error("condition '{0}' is declared more than once")]
    DuplicateCondition(String),
    #[error("condition paths disagree on length below '{prefix}'")]
    InconsistentPathLength { prefix: String },
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Malformed(err.to_string())
    }
}

/// Why a trie lookup produced no leaf.
///
/// Callers only see [`RuleError::NoMatchingRule`]; the kind is diagnostic.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MatchFailure {
    #[error("no action for '{token}' at position {position} and no wildcard")]
    ActionAbsent { position: usize, token: String },
    #[error("lookup path has {actual} arguments, conditions have {expected}")]
    ArgumentCountMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("no matching rule: {0}")]
    NoMatchingRule(#[source] MatchFailure),
    #[error("seed {seed} is outside [0, {max_seed}]")]
    SeedOutOfRange { seed: u64, max_seed: u64 },
    #[error("function '{function}' failed: {message}")]
    Function { function: String, message: String },
}

impl RuleError {
    pub fn function(function: impl Into<String>, message: impl Into<String>) -> Self {
        RuleError::Function { function: function.into(), message: message.into() }
    }

    pub fn is_no_matching_rule(&self) -> bool {
        matches!(self, RuleError::NoMatchingRule(_))
    }
}

impl From<MatchFailure> for RuleError {
    fn from(failure: MatchFailure) -> Self {
        RuleError::NoMatchingRule(failure)
    }
}
