//! Rule engine.
//!
//! This module holds the building blocks of a compiled stage rule and the
//! compiler that wires them together from account configuration.
//!
//! ## How the parts work together
//!
//! ```text
//! AccountConfig ──┐
//!                 │  StageCompiler::compile             (compiler.rs)
//! registry ───────┤   - resolve function names          (function.rs, registry.rs)
//!                 │   - build condition tries           (trie.rs)
//!                 │   - group model groups by weight    (weighted.rs)
//!                 v
//!            Rule<T, C>  ── cached per account/stage ── (cache.rs)
//!                 │
//! (value, ctx) ── Rule::process                         (rule.rs)
//!                 │   - pick a model group (seeded)
//!                 │   - extract characteristics, walk the trie
//!                 │   - apply leaf or default actions in order
//!                 v
//!            RuleResult<T>  (value, updated flag, audit trail)
//! ```
//!
//! ## Responsibilities by module
//!
//! - `trie.rs`: multi-level condition lookup with `*` fallback at each level.
//! - `weighted.rs`: discrete cumulative weighted selection and seed sources.
//! - `function.rs`: schema/result function contracts and run metadata.
//! - `registry.rs`: name-keyed function registry, the stock `StageSpecification`.
//! - `rule.rs`: the closed set of rule variants and their `process` semantics.
//! - `compiler.rs`: configuration → rule, with all validation done up front.
//! - `cache.rs`: immutable compiled snapshots keyed by configuration timestamp.
//!
//! ## Concurrency
//!
//! Nothing here performs I/O or blocks. Compiled rules are immutable; any
//! number of threads may call `process` on the same rule as long as the
//! injected functions and seed source are themselves thread-safe.
//!
//! ## Debugging
//!
//! Compilation emits `tracing` events at `debug`; request-time lookups and
//! weighted draws emit at `trace`.

#[path = "engine/cache.rs"]
mod cache;
#[path = "engine/compiler.rs"]
mod compiler;
#[path = "engine/function.rs"]
pub mod function;
#[path = "engine/registry.rs"]
pub mod registry;
#[path = "engine/rule.rs"]
pub mod rule;
#[path = "engine/trie.rs"]
pub mod trie;
#[path = "engine/weighted.rs"]
pub mod weighted;

pub use cache::RuleCache;
pub use compiler::StageCompiler;
pub use function::{
    BoundResultFunction, BoundSchemaFunction, DEFAULT_CONDITION, ResultFunction, ResultFunctionArguments, RunMetadata,
    SchemaFunction, SchemaFunctionArguments, StageSpecification,
};
pub use registry::{FunctionRegistry, ResultFn, SchemaFn, StageSet};
pub use rule::{ActionList, AnalyticsInfo, ConditionalAction, MatchingRule, RandomWeightedRule, Rule};
pub use trie::{ConditionTrie, PATH_SEPARATOR, TrieNode, WILDCARD};
pub use weighted::{ConstantSeed, SeedSource, ThreadRngSource, WeightedEntry, WeightedList};
