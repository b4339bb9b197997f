//! Rule variants.
//!
//! A compiled stage rule is a tree of [`Rule`] values. Every variant exposes
//! the same operation, [`Rule::process`], which threads a value through the
//! tree and returns it (possibly updated) together with an audit trail.
//!
//! ```text
//! Composite ─┬─ RandomWeighted ─┬─ Alternative ─┬─ Matching (trie → ActionList)
//!            │   (rule set)     │  (model group)└─ DefaultAction (ActionList)
//!            │                  └─ Matching
//!            └─ RandomWeighted ── ...
//! ```
//!
//! Rules hold no mutable state and can be shared freely across threads once
//! built.

use std::sync::Arc;

use tracing::trace;

use super::function::{BoundResultFunction, BoundSchemaFunction, DEFAULT_CONDITION, RunMetadata};
use super::trie::{ConditionTrie, PATH_SEPARATOR};
use super::weighted::{SeedSource, WeightedList};
use crate::RuleResult;
use crate::error::RuleError;

/// Audit identity of a model group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyticsInfo {
    pub analytics_key: Option<String>,
    pub model_version: Option<String>,
}

/// Ordered result functions applied one after another.
#[derive(Debug, Clone)]
pub struct ActionList<T, C> {
    pub actions: Vec<BoundResultFunction<T, C>>,
    pub analytics: AnalyticsInfo,
}

impl<T, C> ActionList<T, C> {
    pub fn new(actions: Vec<BoundResultFunction<T, C>>, analytics: AnalyticsInfo) -> Self {
        ActionList { actions, analytics }
    }

    /// Fold the actions over `value`; each action sees the previous output.
    fn apply(
        &self,
        value: T,
        context: &C,
        condition_fired: String,
        schema_values: Vec<(String, String)>,
    ) -> Result<RuleResult<T>, RuleError> {
        let metadata = RunMetadata {
            analytics_key: self.analytics.analytics_key.clone(),
            model_version: self.analytics.model_version.clone(),
            condition_fired,
            schema_values,
        };

        let mut result = RuleResult::unaltered(value);
        for action in &self.actions {
            result = result.and_then(|value| action.apply(value, context, &metadata))?;
        }
        Ok(result)
    }
}

/// Leaf action stored in a condition trie.
#[derive(Debug, Clone)]
pub struct ConditionalAction<T, C> {
    /// Condition as declared, pipe-joined.
    pub condition: String,
    pub actions: ActionList<T, C>,
}

/// Extract characteristics, look them up in the trie and apply the leaf.
#[derive(Debug, Clone)]
pub struct MatchingRule<T, C> {
    pub schema: Vec<BoundSchemaFunction<C>>,
    pub trie: ConditionTrie<ConditionalAction<T, C>>,
}

impl<T, C> MatchingRule<T, C> {
    fn process(&self, value: T, context: &C) -> Result<RuleResult<T>, RuleError> {
        let mut path = Vec::with_capacity(self.schema.len());
        for function in &self.schema {
            path.push(function.extract(context)?);
        }

        let leaf = self.trie.lookup(path.as_slice()).inspect_err(|failure| {
            trace!(path = %path.join(PATH_SEPARATOR), %failure, "no condition matched");
        })?;

        trace!(condition = %leaf.condition, "condition matched");
        let schema_values = self.schema.iter().map(|function| function.name.clone()).zip(path).collect();
        leaf.actions.apply(value, context, leaf.condition.clone(), schema_values)
    }
}

/// Picks one sibling rule per call from a weighted list.
#[derive(Clone)]
pub struct RandomWeightedRule<T, C> {
    pub choices: WeightedList<Rule<T, C>>,
    pub seeds: Arc<dyn SeedSource>,
}

impl<T, C> RandomWeightedRule<T, C> {
    fn select(&self) -> Result<&Rule<T, C>, RuleError> {
        let max_seed = self.choices.max_seed();
        let seed = self.seeds.draw(max_seed);
        trace!(seed, max_seed, "weighted draw");
        self.choices.pick(seed).ok_or(RuleError::SeedOutOfRange { seed, max_seed })
    }
}

impl<T, C> std::fmt::Debug for RandomWeightedRule<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomWeightedRule").field("choices", &self.choices.len()).finish()
    }
}

#[derive(Debug, Clone)]
pub enum Rule<T, C> {
    /// Leaves the value untouched.
    NoOp,
    Matching(MatchingRule<T, C>),
    /// Sub-rules in order, each fed the previous output.
    Composite(Vec<Rule<T, C>>),
    /// `primary`, or `fallback` when `primary` finds no matching condition.
    Alternative { primary: Box<Rule<T, C>>, fallback: Box<Rule<T, C>> },
    /// Unconditional ordered actions.
    DefaultAction(ActionList<T, C>),
    RandomWeighted(RandomWeightedRule<T, C>),
}

impl<T: Clone, C> Rule<T, C> {
    pub fn process(&self, value: T, context: &C) -> Result<RuleResult<T>, RuleError> {
        match self {
            Rule::NoOp => Ok(RuleResult::unaltered(value)),
            Rule::Matching(rule) => rule.process(value, context),
            Rule::Composite(rules) => {
                let mut result = RuleResult::unaltered(value);
                for rule in rules {
                    result = result.and_then(|value| rule.process(value, context))?;
                }
                Ok(result)
            }
            Rule::Alternative { primary, fallback } => match primary.process(value.clone(), context) {
                Err(RuleError::NoMatchingRule(failure)) => {
                    trace!(%failure, "falling back to default action");
                    fallback.process(value, context)
                }
                other => other,
            },
            Rule::DefaultAction(actions) => actions.apply(value, context, DEFAULT_CONDITION.to_string(), Vec::new()),
            Rule::RandomWeighted(rule) => rule.select()?.process(value, context),
        }
    }
}
