//! Stage compilation.
//!
//! Turns the account configuration for one stage into a single [`Rule`]:
//!
//! ```text
//! AccountConfig (stage S)
//!   └─ RuleSetConfig ×n  ──▶ Composite[ RandomWeighted ×n ]         (declaration order)
//!        └─ ModelGroupConfig ×m ──▶ WeightedEntry(weight, group rule) ×m
//!             ├─ schema    ──▶ BoundSchemaFunction ×k   (trie path order)
//!             ├─ rules     ──▶ ConditionTrie<ConditionalAction>
//!             └─ default?  ──▶ Alternative(Matching, DefaultAction) | Matching
//! ```
//!
//! Every name is resolved and every function config validated here, so a
//! compiled rule never fails for configuration reasons at request time. A
//! broken model group fails the whole compilation; nothing is partially
//! applied.

use std::sync::Arc;

use tracing::debug;

use super::function::{BoundResultFunction, BoundSchemaFunction, StageSpecification};
use super::rule::{ActionList, AnalyticsInfo, ConditionalAction, MatchingRule, RandomWeightedRule, Rule};
use super::trie::{ConditionTrie, PATH_SEPARATOR};
use super::weighted::{SeedSource, WeightedEntry, WeightedList};
use crate::Stage;
use crate::config::{AccountConfig, FunctionConfig, ModelGroupConfig, RuleSetConfig};
use crate::error::ConfigError;

pub struct StageCompiler<'a, T, C> {
    specification: &'a dyn StageSpecification<T, C>,
    seeds: Arc<dyn SeedSource>,
}

impl<'a, T, C> StageCompiler<'a, T, C> {
    /// `seeds` is shared by every weighted rule the compiler produces.
    pub fn new(specification: &'a dyn StageSpecification<T, C>, seeds: Arc<dyn SeedSource>) -> Self {
        StageCompiler { specification, seeds }
    }

    /// Compile every rule set declared for `stage` into one rule.
    pub fn compile(&self, config: &AccountConfig, stage: Stage) -> Result<Rule<T, C>, ConfigError> {
        if !config.is_enabled() {
            debug!(%stage, "account rules disabled");
            return Ok(Rule::NoOp);
        }
        if !self.specification.supports(stage) {
            debug!(%stage, "stage not served by function registry");
            return Ok(Rule::NoOp);
        }

        let mut rules = Vec::new();
        for rule_set in config.rule_sets_for(stage) {
            match self.compile_rule_set(rule_set)? {
                Rule::NoOp => {}
                rule => rules.push(rule),
            }
        }

        debug!(%stage, rule_sets = rules.len(), "stage compiled");
        if rules.is_empty() { Ok(Rule::NoOp) } else { Ok(Rule::Composite(rules)) }
    }

    /// One weighted choice among the enabled model groups of `rule_set`.
    pub fn compile_rule_set(&self, rule_set: &RuleSetConfig) -> Result<Rule<T, C>, ConfigError> {
        let name = rule_set.name.as_deref().unwrap_or("<unnamed>");
        if !rule_set.enabled {
            debug!(rule_set = name, "rule set disabled");
            return Ok(Rule::NoOp);
        }

        let mut entries = Vec::new();
        for group in rule_set.model_groups.iter().filter(|group| group.enabled) {
            let weight = validate_weight(group.weight)?;
            entries.push(WeightedEntry::new(weight, self.compile_model_group(group)?));
        }

        if entries.is_empty() {
            debug!(rule_set = name, "rule set has no enabled model groups");
            return Ok(Rule::NoOp);
        }

        debug!(rule_set = name, model_groups = entries.len(), "rule set compiled");
        Ok(Rule::RandomWeighted(RandomWeightedRule {
            choices: WeightedList::new(entries)?,
            seeds: Arc::clone(&self.seeds),
        }))
    }

    pub fn compile_model_group(&self, group: &ModelGroupConfig) -> Result<Rule<T, C>, ConfigError> {
        if group.schema.is_empty() {
            return Err(ConfigError::EmptySchema);
        }

        let analytics = AnalyticsInfo { analytics_key: group.analytics_key.clone(), model_version: group.version.clone() };
        let schema = group.schema.iter().map(|function| self.bind_schema(function)).collect::<Result<Vec<_>, _>>()?;

        let mut leaves = Vec::with_capacity(group.rules.len());
        for rule in &group.rules {
            let condition = rule.conditions.join(PATH_SEPARATOR);
            let tokens = condition.split(PATH_SEPARATOR).count();
            if rule.conditions.len() != schema.len() || tokens != schema.len() {
                return Err(ConfigError::ConditionLength { condition, expected: schema.len(), actual: tokens });
            }

            let actions = self.bind_results(&rule.results)?;
            let leaf = ConditionalAction { condition: condition.clone(), actions: ActionList::new(actions, analytics.clone()) };
            leaves.push((condition, leaf));
        }

        let matching = Rule::Matching(MatchingRule { schema, trie: ConditionTrie::build(leaves)? });

        debug!(
            analytics_key = group.analytics_key.as_deref().unwrap_or(""),
            conditions = group.rules.len(),
            has_default = group.default_action.is_some(),
            "model group compiled"
        );

        match &group.default_action {
            None => Ok(matching),
            Some(defaults) => Ok(Rule::Alternative {
                primary: Box::new(matching),
                fallback: Box::new(Rule::DefaultAction(ActionList::new(self.bind_results(defaults)?, analytics))),
            }),
        }
    }

    fn bind_schema(&self, config: &FunctionConfig) -> Result<BoundSchemaFunction<C>, ConfigError> {
        let function = self
            .specification
            .characteristic_function_by_name(&config.function)
            .ok_or_else(|| ConfigError::UnknownSchemaFunction(config.function.clone()))?;
        function.validate_config(config.args.as_ref())?;

        Ok(BoundSchemaFunction { name: config.function.clone(), function, config: config.args.clone() })
    }

    fn bind_results(&self, configs: &[FunctionConfig]) -> Result<Vec<BoundResultFunction<T, C>>, ConfigError> {
        configs
            .iter()
            .map(|config| {
                let function = self
                    .specification
                    .result_function_by_name(&config.function)
                    .ok_or_else(|| ConfigError::UnknownResultFunction(config.function.clone()))?;
                function.validate_config(config.args.as_ref())?;

                Ok(BoundResultFunction { name: config.function.clone(), function, config: config.args.clone() })
            })
            .collect()
    }
}

fn validate_weight(weight: i64) -> Result<u32, ConfigError> {
    if weight <= 0 {
        return Err(ConfigError::NonPositiveWeight(weight));
    }
    u32::try_from(weight).map_err(|_| ConfigError::WeightOverflow(weight))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::{Map, Value, json};

    use super::*;
    use crate::engine::registry::{FunctionRegistry, ResultFn, SchemaFn};
    use crate::engine::function::ResultFunctionArguments;
    use crate::engine::weighted::ConstantSeed;
    use crate::error::{MatchFailure, RuleError};
    use crate::{Activity, AppliedTo, AuditTrail, RuleResult, UpdateResult};

    #[derive(Debug, Clone, PartialEq)]
    struct Request {
        country: String,
        device: String,
    }

    fn request(country: &str, device: &str) -> Request {
        Request { country: country.to_string(), device: device.to_string() }
    }

    fn bump_price(args: ResultFunctionArguments<'_, i64, Request>) -> Result<RuleResult<i64>, RuleError> {
        let by = args.config.and_then(|c| c.get("by")).and_then(Value::as_i64).unwrap_or(1);
        let mut values = Map::new();
        values.insert("conditionFired".into(), Value::String(args.metadata.condition_fired.clone()));
        values.insert("resultFunction".into(), Value::String(args.function.to_string()));
        let activity = Activity::success("price-bump", values, AppliedTo::request());
        Ok(RuleResult::new(UpdateResult::updated(args.value + by), AuditTrail::single(activity)))
    }

    fn registry() -> FunctionRegistry<i64, Request> {
        FunctionRegistry::new()
            .with_schema("country", SchemaFn(|r: &Request| r.country.clone()))
            .with_schema("device", SchemaFn(|r: &Request| r.device.clone()))
            .with_result("bump_price", ResultFn(bump_price))
            .with_result("no_op", ResultFn(|args: ResultFunctionArguments<'_, i64, Request>| Ok(RuleResult::unaltered(args.value))))
    }

    fn compile(registry: &FunctionRegistry<i64, Request>, config: serde_json::Value) -> Result<Rule<i64, Request>, ConfigError> {
        let config = AccountConfig::from_value(config).unwrap();
        StageCompiler::new(registry, Arc::new(ConstantSeed(0))).compile(&config, Stage::ProcessedAuctionRequest)
    }

    fn geo_group(enabled: bool) -> serde_json::Value {
        json!({
            "enabled": enabled,
            "weight": 1,
            "analyticsKey": "geo",
            "version": "v1",
            "schema": [{ "function": "country" }, { "function": "device" }],
            "rules": [
                { "conditions": ["US", "mobile"], "results": [{ "function": "bump_price", "args": { "by": 5 } }] },
                { "conditions": ["*", "*"], "results": [{ "function": "no_op" }] }
            ]
        })
    }

    #[test]
    fn enabled_group_matches_exact_and_wildcard_conditions() {
        let registry = registry();
        let rule = compile(
            &registry,
            json!({ "ruleSets": [{ "stage": "processed-auction-request", "modelGroups": [geo_group(false), geo_group(true)] }] }),
        )
        .unwrap();

        let hit = rule.process(100, &request("US", "mobile")).unwrap();
        assert!(hit.is_updated());
        assert_eq!(*hit.value(), 105);
        assert_eq!(hit.audit_trail.len(), 1);
        let activity = &hit.audit_trail.activities()[0];
        assert_eq!(activity.name, "price-bump");
        assert_eq!(activity.values["conditionFired"], json!("US|mobile"));

        let miss = rule.process(100, &request("FR", "desktop")).unwrap();
        assert!(!miss.is_updated());
        assert_eq!(*miss.value(), 100);
        assert!(miss.audit_trail.is_empty());
    }

    #[test]
    fn disabled_rule_set_compiles_to_no_op() {
        let registry = registry();
        let rule = compile(
            &registry,
            json!({ "ruleSets": [{ "stage": "processed-auction-request", "enabled": false, "modelGroups": [geo_group(true)] }] }),
        )
        .unwrap();

        assert!(matches!(rule, Rule::NoOp));
        for (country, device) in [("US", "mobile"), ("FR", "desktop")] {
            assert_eq!(rule.process(7, &request(country, device)).unwrap(), RuleResult::unaltered(7));
        }
    }

    #[test]
    fn disabled_account_ignores_rule_sets() {
        let registry = registry();
        let rule = compile(
            &registry,
            json!({ "enabled": false, "ruleSets": [{ "stage": "processed-auction-request", "modelGroups": [geo_group(true)] }] }),
        )
        .unwrap();
        assert!(matches!(rule, Rule::NoOp));
    }

    #[test]
    fn other_stages_are_not_compiled() {
        let registry = registry();
        let rule = compile(&registry, json!({ "ruleSets": [{ "stage": "bidder-request", "modelGroups": [geo_group(true)] }] }))
            .unwrap();
        assert!(matches!(rule, Rule::NoOp));
    }

    #[test]
    fn default_action_runs_when_no_condition_matches() {
        let registry = registry();
        let rule = compile(
            &registry,
            json!({ "ruleSets": [{ "stage": "processed-auction-request", "modelGroups": [{
                "schema": [{ "function": "country" }],
                "rules": [{ "conditions": ["US"], "results": [{ "function": "bump_price", "args": { "by": 1 } }] }],
                "default": [{ "function": "bump_price", "args": { "by": 10 } }, { "function": "bump_price", "args": { "by": 100 } }]
            }] }] }),
        )
        .unwrap();

        assert_eq!(*rule.process(0, &request("US", "x")).unwrap().value(), 1);

        let fallback = rule.process(0, &request("DE", "x")).unwrap();
        assert_eq!(*fallback.value(), 110);
        assert_eq!(fallback.audit_trail.len(), 2);
        assert_eq!(fallback.audit_trail.activities()[0].values["conditionFired"], json!("default"));
    }

    #[test]
    fn missing_condition_without_default_is_no_matching_rule() {
        let registry = registry();
        let rule = compile(
            &registry,
            json!({ "ruleSets": [{ "stage": "processed-auction-request", "modelGroups": [{
                "schema": [{ "function": "country" }],
                "rules": [{ "conditions": ["US"], "results": [{ "function": "no_op" }] }]
            }] }] }),
        )
        .unwrap();

        let err = rule.process(0, &request("DE", "x")).unwrap_err();
        assert_eq!(err, RuleError::NoMatchingRule(MatchFailure::ActionAbsent { position: 0, token: "DE".into() }));
    }

    #[test]
    fn rule_sets_compose_in_declaration_order() {
        let registry = registry();
        let group = |by: i64| {
            json!({
                "schema": [{ "function": "country" }],
                "rules": [{ "conditions": ["*"], "results": [{ "function": "bump_price", "args": { "by": by } }] }]
            })
        };
        let rule = compile(
            &registry,
            json!({ "ruleSets": [
                { "stage": "processed-auction-request", "name": "first", "modelGroups": [group(1)] },
                { "stage": "processed-auction-request", "name": "second", "modelGroups": [group(2)] }
            ] }),
        )
        .unwrap();

        let result = rule.process(0, &request("US", "x")).unwrap();
        assert_eq!(*result.value(), 3);
        assert_eq!(result.audit_trail.len(), 2);
    }

    #[test]
    fn weighted_groups_follow_the_seed() {
        let registry = registry();
        let config = AccountConfig::from_value(json!({ "ruleSets": [{ "stage": "processed-auction-request", "modelGroups": [
            { "weight": 2, "schema": [{ "function": "country" }], "rules": [{ "conditions": ["*"], "results": [{ "function": "bump_price", "args": { "by": 1 } }] }] },
            { "weight": 3, "schema": [{ "function": "country" }], "rules": [{ "conditions": ["*"], "results": [{ "function": "bump_price", "args": { "by": 2 } }] }] }
        ] }] }))
        .unwrap();

        for (seed, expected) in [(0, 1), (1, 1), (2, 2), (4, 2)] {
            let rule = StageCompiler::new(&registry, Arc::new(ConstantSeed(seed)))
                .compile(&config, Stage::ProcessedAuctionRequest)
                .unwrap();
            assert_eq!(*rule.process(0, &request("US", "x")).unwrap().value(), expected, "seed {seed}");
        }
    }

    #[test]
    fn configuration_errors_fail_fast() {
        let registry = registry();
        let with_group = |group: serde_json::Value| json!({ "ruleSets": [{ "stage": "processed-auction-request", "modelGroups": [group] }] });

        let unknown_schema = compile(&registry, with_group(json!({ "schema": [{ "function": "nope" }], "rules": [] })));
        assert_eq!(unknown_schema.unwrap_err(), ConfigError::UnknownSchemaFunction("nope".into()));

        let unknown_result = compile(
            &registry,
            with_group(json!({ "schema": [{ "function": "country" }], "rules": [{ "conditions": ["US"], "results": [{ "function": "nope" }] }] })),
        );
        assert_eq!(unknown_result.unwrap_err(), ConfigError::UnknownResultFunction("nope".into()));

        let short = compile(
            &registry,
            with_group(json!({ "schema": [{ "function": "country" }, { "function": "device" }], "rules": [{ "conditions": ["US"], "results": [] }] })),
        );
        assert_eq!(short.unwrap_err(), ConfigError::ConditionLength { condition: "US".into(), expected: 2, actual: 1 });

        let zero_weight = compile(&registry, with_group(json!({ "weight": 0, "schema": [{ "function": "country" }] })));
        assert_eq!(zero_weight.unwrap_err(), ConfigError::NonPositiveWeight(0));

        let no_schema = compile(&registry, with_group(json!({ "rules": [] })));
        assert_eq!(no_schema.unwrap_err(), ConfigError::EmptySchema);

        let duplicate = compile(
            &registry,
            with_group(json!({ "schema": [{ "function": "country" }], "rules": [
                { "conditions": ["US"], "results": [] },
                { "conditions": ["US"], "results": [] }
            ] })),
        );
        assert_eq!(duplicate.unwrap_err(), ConfigError::DuplicateCondition("US".into()));
    }

    #[test]
    fn fallback_is_not_invoked_when_primary_matches() {
        static FALLBACK_CALLS: AtomicUsize = AtomicUsize::new(0);

        let registry = registry().with_result(
            "spy",
            ResultFn(|args: ResultFunctionArguments<'_, i64, Request>| {
                FALLBACK_CALLS.fetch_add(1, Ordering::SeqCst);
                Ok(RuleResult::unaltered(args.value))
            }),
        );
        let rule = compile(
            &registry,
            json!({ "ruleSets": [{ "stage": "processed-auction-request", "modelGroups": [{
                "schema": [{ "function": "country" }],
                "rules": [{ "conditions": ["US"], "results": [{ "function": "no_op" }] }],
                "default": [{ "function": "spy" }]
            }] }] }),
        )
        .unwrap();

        rule.process(0, &request("US", "x")).unwrap();
        assert_eq!(FALLBACK_CALLS.load(Ordering::SeqCst), 0);

        rule.process(0, &request("FR", "x")).unwrap();
        assert_eq!(FALLBACK_CALLS.load(Ordering::SeqCst), 1);
    }
}
