//! Function contracts.
//!
//! Account configuration refers to functions by name. A [`StageSpecification`]
//! resolves those names to:
//!
//! - [`SchemaFunction`]s, which extract one characteristic string from the
//!   request context (one token of a trie lookup path), and
//! - [`ResultFunction`]s, which apply a configured transformation to the
//!   value and report what they did.
//!
//! Compiled rules are shared across concurrent requests, so implementations
//! must be `Send + Sync` and free of per-call mutable state.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{ConfigError, RuleError};
use crate::{RuleResult, Stage};

/// Condition reported to result functions applied as a default action.
pub const DEFAULT_CONDITION: &str = "default";

pub struct SchemaFunctionArguments<'a, C> {
    pub context: &'a C,
    pub config: Option<&'a Value>,
}

pub trait SchemaFunction<C>: Send + Sync {
    /// Extract the characteristic used as one lookup token.
    fn extract(&self, args: &SchemaFunctionArguments<'_, C>) -> Result<String, RuleError>;

    /// Check `config` at compile time.
    fn validate_config(&self, _config: Option<&Value>) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// Per-invocation facts a result function may report in its audit record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunMetadata {
    pub analytics_key: Option<String>,
    pub model_version: Option<String>,
    /// Pipe-joined condition that fired, or [`DEFAULT_CONDITION`].
    pub condition_fired: String,
    /// `(schema function, extracted characteristic)` in schema order.
    pub schema_values: Vec<(String, String)>,
}

pub struct ResultFunctionArguments<'a, T, C> {
    pub value: T,
    pub config: Option<&'a Value>,
    pub context: &'a C,
    pub metadata: &'a RunMetadata,
    /// Name the function was referenced by.
    pub function: &'a str,
}

pub trait ResultFunction<T, C>: Send + Sync {
    fn apply(&self, args: ResultFunctionArguments<'_, T, C>) -> Result<RuleResult<T>, RuleError>;

    /// Check `config` at compile time.
    fn validate_config(&self, _config: Option<&Value>) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// Name registry for the functions available at one stage.
pub trait StageSpecification<T, C> {
    fn characteristic_function_by_name(&self, name: &str) -> Option<Arc<dyn SchemaFunction<C>>>;

    fn result_function_by_name(&self, name: &str) -> Option<Arc<dyn ResultFunction<T, C>>>;

    /// Whether rules may run at `stage` at all.
    fn supports(&self, _stage: Stage) -> bool {
        true
    }
}

/// A schema function bound to its configured arguments.
pub struct BoundSchemaFunction<C> {
    pub name: String,
    pub function: Arc<dyn SchemaFunction<C>>,
    pub config: Option<Value>,
}

impl<C> BoundSchemaFunction<C> {
    pub fn extract(&self, context: &C) -> Result<String, RuleError> {
        self.function.extract(&SchemaFunctionArguments { context, config: self.config.as_ref() })
    }
}

impl<C> Clone for BoundSchemaFunction<C> {
    fn clone(&self) -> Self {
        BoundSchemaFunction { name: self.name.clone(), function: Arc::clone(&self.function), config: self.config.clone() }
    }
}

impl<C> std::fmt::Debug for BoundSchemaFunction<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundSchemaFunction").field("name", &self.name).field("config", &self.config).finish()
    }
}

/// A result function bound to its configured arguments.
pub struct BoundResultFunction<T, C> {
    pub name: String,
    pub function: Arc<dyn ResultFunction<T, C>>,
    pub config: Option<Value>,
}

impl<T, C> BoundResultFunction<T, C> {
    pub fn apply(&self, value: T, context: &C, metadata: &RunMetadata) -> Result<RuleResult<T>, RuleError> {
        self.function.apply(ResultFunctionArguments {
            value,
            config: self.config.as_ref(),
            context,
            metadata,
            function: &self.name,
        })
    }
}

impl<T, C> Clone for BoundResultFunction<T, C> {
    fn clone(&self) -> Self {
        BoundResultFunction { name: self.name.clone(), function: Arc::clone(&self.function), config: self.config.clone() }
    }
}

impl<T, C> std::fmt::Debug for BoundResultFunction<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundResultFunction").field("name", &self.name).field("config", &self.config).finish()
    }
}
