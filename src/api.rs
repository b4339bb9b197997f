use crate::config::AccountConfig;
use crate::engine::{Rule, SeedSource, StageCompiler};
use crate::error::{ConfigError, RuleError};
use crate::functions::{self, BidRequest, Granularity, RequestContext};
use crate::{AuditTrail, RuleResult, SeatNonBid, Stage};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A stage rule over bid requests, compiled with the built-in catalog.
pub type RequestRule = Rule<BidRequest, RequestContext>;

/// Result from [`process_request`].
#[derive(Debug, Clone)]
pub struct StageRun {
    /// The request after the rule ran.
    pub request: BidRequest,
    /// Whether any action changed the request.
    pub updated: bool,
    pub audit_trail: AuditTrail,
    pub seat_non_bids: Vec<SeatNonBid>,
    /// The request must not go on to auction.
    pub rejected: bool,
    /// Time spent inside `Rule::process`.
    pub elapsed: Duration,
}

/// Compile the account's `stage` rules against the built-in request catalog.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use bidrule::{AccountConfig, Stage, ThreadRngSource, compile_stage};
///
/// let config = AccountConfig::from_json_str(r#"{ "ruleSets": [] }"#).unwrap();
/// let rule = compile_stage(&config, Stage::ProcessedAuctionRequest, Arc::new(ThreadRngSource)).unwrap();
/// assert!(matches!(rule, bidrule::Rule::NoOp));
/// ```
pub fn compile_stage(
    config: &AccountConfig,
    stage: Stage,
    seeds: Arc<dyn SeedSource>,
) -> Result<RequestRule, ConfigError> {
    StageCompiler::new(functions::request_functions(), seeds).compile(config, stage)
}

/// Run `rule` once over `request` as seen from `datacenter`.
///
/// Schema functions read the request as it entered the stage; result
/// functions transform a working copy.
pub fn process_request(rule: &RequestRule, request: BidRequest, datacenter: &str) -> Result<StageRun, RuleError> {
    process_request_at(rule, request, datacenter, Granularity::Request)
}

/// Like [`process_request`], with result functions limited to `granularity`.
pub fn process_request_at(
    rule: &RequestRule,
    request: BidRequest,
    datacenter: &str,
    granularity: Granularity,
) -> Result<StageRun, RuleError> {
    let context = RequestContext::new(request.clone(), datacenter).with_granularity(granularity);

    let started = Instant::now();
    let RuleResult { update_result, audit_trail, seat_non_bids, rejected } = rule.process(request, &context)?;
    let elapsed = started.elapsed();

    Ok(StageRun {
        request: update_result.value,
        updated: update_result.updated,
        audit_trail,
        seat_non_bids,
        rejected,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ConstantSeed;
    use serde_json::json;

    fn request() -> BidRequest {
        serde_json::from_value(json!({
            "id": "req-1",
            "imp": [{ "id": "1", "banner": {}, "ext": { "prebid": { "bidder": { "alpha": {}, "beta": {} } } } }],
            "device": { "geo": { "country": "USA" } }
        }))
        .unwrap()
    }

    #[test]
    fn compile_and_process_round_trip() {
        let config = AccountConfig::from_value(json!({ "ruleSets": [{ "stage": "processed-auction-request", "modelGroups": [{
            "analyticsKey": "geo",
            "schema": [{ "function": "deviceCountry" }],
            "rules": [{ "conditions": ["USA"], "results": [{ "function": "excludeBidders", "args": { "bidders": ["beta"] } }] }]
        }] }] }))
        .unwrap();

        let rule = compile_stage(&config, Stage::ProcessedAuctionRequest, Arc::new(ConstantSeed(0))).unwrap();
        let run = process_request(&rule, request(), "us-east").unwrap();

        assert!(run.updated);
        assert_eq!(run.request.imp[0].bidders(), vec!["alpha".to_string()]);
        assert_eq!(run.audit_trail.len(), 1);
        assert!(!run.rejected);
        assert_eq!(run.seat_non_bids.len(), 1);
        assert_eq!(run.seat_non_bids[0].seat, "beta");
        assert!(run.elapsed >= Duration::ZERO);
    }

    #[test]
    fn response_stages_are_not_served() {
        let config = AccountConfig::from_value(json!({ "ruleSets": [{ "stage": "auction-response", "modelGroups": [{
            "schema": [{ "function": "deviceCountry" }],
            "rules": [{ "conditions": ["*"], "results": [{ "function": "logATag", "args": { "analyticsValue": "x" } }] }]
        }] }] }))
        .unwrap();

        let rule = compile_stage(&config, Stage::AuctionResponse, Arc::new(ConstantSeed(0))).unwrap();
        assert!(matches!(rule, Rule::NoOp));

        let run = process_request(&rule, request(), "us-east").unwrap();
        assert!(!run.updated);
        assert!(run.audit_trail.is_empty());
        assert!(run.seat_non_bids.is_empty());
        assert_eq!(run.request, request());
    }

    #[test]
    fn removing_every_bidder_rejects_the_request() {
        let config = AccountConfig::from_value(json!({ "ruleSets": [{ "stage": "processed-auction-request", "modelGroups": [{
            "schema": [{ "function": "deviceCountry" }],
            "rules": [{ "conditions": ["*"], "results": [{ "function": "includeBidders", "args": { "bidders": ["omega"] } }] }]
        }] }] }))
        .unwrap();

        let rule = compile_stage(&config, Stage::ProcessedAuctionRequest, Arc::new(ConstantSeed(0))).unwrap();
        let run = process_request(&rule, request(), "us-east").unwrap();

        assert!(run.rejected);
        assert!(run.request.imp.is_empty());
        assert_eq!(run.seat_non_bids.len(), 2);
        assert!(run.audit_trail.is_empty());
    }

    #[test]
    fn imp_granularity_leaves_other_impressions_alone() {
        let config = AccountConfig::from_value(json!({ "ruleSets": [{ "stage": "processed-auction-request", "modelGroups": [{
            "schema": [{ "function": "deviceCountry" }],
            "rules": [{ "conditions": ["*"], "results": [{ "function": "excludeBidders", "args": { "bidders": ["beta"] } }] }]
        }] }] }))
        .unwrap();
        let mut two_imps = request();
        let mut second = two_imps.imp[0].clone();
        second.id = "2".to_string();
        two_imps.imp.push(second);

        let rule = compile_stage(&config, Stage::ProcessedAuctionRequest, Arc::new(ConstantSeed(0))).unwrap();
        let run = process_request_at(&rule, two_imps, "us-east", Granularity::Imp("2".to_string())).unwrap();

        assert!(run.updated);
        assert_eq!(run.request.imp[0].bidders(), vec!["alpha".to_string(), "beta".to_string()]);
        assert_eq!(run.request.imp[1].bidders(), vec!["alpha".to_string()]);
        assert_eq!(run.seat_non_bids[0].non_bid[0].imp_id, "2");
    }

    #[test]
    fn unmatched_request_without_default_is_an_error() {
        let config = AccountConfig::from_value(json!({ "ruleSets": [{ "stage": "processed-auction-request", "modelGroups": [{
            "schema": [{ "function": "deviceCountry" }],
            "rules": [{ "conditions": ["CAN"], "results": [{ "function": "logATag", "args": { "analyticsValue": "x" } }] }]
        }] }] }))
        .unwrap();

        let rule = compile_stage(&config, Stage::ProcessedAuctionRequest, Arc::new(ConstantSeed(0))).unwrap();
        let err = process_request(&rule, request(), "us-east").unwrap_err();
        assert!(err.is_no_matching_rule());
    }
}
