//! Name-keyed function registry.
//!
//! [`FunctionRegistry`] is the stock [`StageSpecification`]: two maps from
//! function name to implementation plus the set of stages it serves.
//! Closures can be registered through the [`SchemaFn`] and [`ResultFn`]
//! adapters.

use std::collections::HashMap;
use std::sync::Arc;

use super::function::{ResultFunction, ResultFunctionArguments, SchemaFunction, SchemaFunctionArguments, StageSpecification};
use crate::error::RuleError;
use crate::{RuleResult, Stage};

bitflags::bitflags! {
    /// Stages a registry serves.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StageSet: u8 {
        const ENTRYPOINT                  = 1 << 0;
        const RAW_AUCTION_REQUEST         = 1 << 1;
        const PROCESSED_AUCTION_REQUEST   = 1 << 2;
        const BIDDER_REQUEST              = 1 << 3;
        const RAW_BIDDER_RESPONSE         = 1 << 4;
        const PROCESSED_BIDDER_RESPONSE   = 1 << 5;
        const ALL_PROCESSED_BID_RESPONSES = 1 << 6;
        const AUCTION_RESPONSE            = 1 << 7;
    }
}

impl From<Stage> for StageSet {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Entrypoint => StageSet::ENTRYPOINT,
            Stage::RawAuctionRequest => StageSet::RAW_AUCTION_REQUEST,
            Stage::ProcessedAuctionRequest => StageSet::PROCESSED_AUCTION_REQUEST,
            Stage::BidderRequest => StageSet::BIDDER_REQUEST,
            Stage::RawBidderResponse => StageSet::RAW_BIDDER_RESPONSE,
            Stage::ProcessedBidderResponse => StageSet::PROCESSED_BIDDER_RESPONSE,
            Stage::AllProcessedBidResponses => StageSet::ALL_PROCESSED_BID_RESPONSES,
            Stage::AuctionResponse => StageSet::AUCTION_RESPONSE,
        }
    }
}

/// Adapter turning `Fn(&C) -> String` into a [`SchemaFunction`].
pub struct SchemaFn<F>(pub F);

impl<C, F> SchemaFunction<C> for SchemaFn<F>
where
    F: Fn(&C) -> String + Send + Sync,
{
    fn extract(&self, args: &SchemaFunctionArguments<'_, C>) -> Result<String, RuleError> {
        Ok((self.0)(args.context))
    }
}

/// Adapter turning a closure over [`ResultFunctionArguments`] into a [`ResultFunction`].
pub struct ResultFn<F>(pub F);

impl<T, C, F> ResultFunction<T, C> for ResultFn<F>
where
    F: Fn(ResultFunctionArguments<'_, T, C>) -> Result<RuleResult<T>, RuleError> + Send + Sync,
{
    fn apply(&self, args: ResultFunctionArguments<'_, T, C>) -> Result<RuleResult<T>, RuleError> {
        (self.0)(args)
    }
}

pub struct FunctionRegistry<T, C> {
    schema: HashMap<String, Arc<dyn SchemaFunction<C>>>,
    results: HashMap<String, Arc<dyn ResultFunction<T, C>>>,
    stages: StageSet,
}

impl<T, C> FunctionRegistry<T, C> {
    /// Empty registry serving every stage.
    pub fn new() -> Self {
        FunctionRegistry { schema: HashMap::new(), results: HashMap::new(), stages: StageSet::all() }
    }

    pub fn for_stages(mut self, stages: StageSet) -> Self {
        self.stages = stages;
        self
    }

    pub fn with_schema(mut self, name: impl Into<String>, function: impl SchemaFunction<C> + 'static) -> Self {
        self.schema.insert(name.into(), Arc::new(function));
        self
    }

    pub fn with_result(mut self, name: impl Into<String>, function: impl ResultFunction<T, C> + 'static) -> Self {
        self.results.insert(name.into(), Arc::new(function));
        self
    }

    pub fn schema_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schema.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn result_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.results.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl<T, C> Default for FunctionRegistry<T, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C> StageSpecification<T, C> for FunctionRegistry<T, C> {
    fn characteristic_function_by_name(&self, name: &str) -> Option<Arc<dyn SchemaFunction<C>>> {
        self.schema.get(name).cloned()
    }

    fn result_function_by_name(&self, name: &str) -> Option<Arc<dyn ResultFunction<T, C>>> {
        self.results.get(name).cloned()
    }

    fn supports(&self, stage: Stage) -> bool {
        self.stages.contains(StageSet::from(stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_names_only() {
        let registry: FunctionRegistry<u32, String> = FunctionRegistry::new()
            .with_schema("echo", SchemaFn(|ctx: &String| ctx.clone()))
            .with_result("keep", ResultFn(|args: ResultFunctionArguments<'_, u32, String>| Ok(RuleResult::unaltered(args.value))));

        assert!(registry.characteristic_function_by_name("echo").is_some());
        assert!(registry.characteristic_function_by_name("keep").is_none());
        assert!(registry.result_function_by_name("keep").is_some());
        assert_eq!(registry.schema_names(), vec!["echo"]);
        assert_eq!(registry.result_names(), vec!["keep"]);
    }

    #[test]
    fn stage_set_limits_support() {
        let registry: FunctionRegistry<u32, String> =
            FunctionRegistry::new().for_stages(StageSet::PROCESSED_AUCTION_REQUEST);

        assert!(registry.supports(Stage::ProcessedAuctionRequest));
        assert!(!registry.supports(Stage::AuctionResponse));
    }
}
