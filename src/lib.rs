//! Account-configurable rule engine for auction stages.
//!
//! A stage rule is compiled once from account configuration and then
//! applied to every request passing through that stage:
//!
//! ```text
//! AccountConfig ── StageCompiler::compile ──▶ Rule<T, C>   (once per config load)
//!                                              │
//! (value, context) ──────── Rule::process ─────┘──▶ RuleResult<T>   (once per request)
//! ```
//!
//! See [`engine`] for the building blocks and [`functions`] for the built-in
//! request function catalog.

mod api;
pub mod config;
pub mod engine;
mod error;
pub mod functions;

pub use api::{RequestRule, StageRun, compile_stage, process_request, process_request_at};
pub use config::AccountConfig;
pub use engine::{
    ConditionTrie, ConstantSeed, FunctionRegistry, ResultFunction, Rule, RuleCache, SchemaFunction, SeedSource,
    StageCompiler, StageSpecification, ThreadRngSource,
};
pub use error::{ConfigError, MatchFailure, RuleError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// --- Stages -----------------------------------------------------------------

/// Auction stage at which a compiled rule may run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Entrypoint,
    RawAuctionRequest,
    ProcessedAuctionRequest,
    BidderRequest,
    RawBidderResponse,
    ProcessedBidderResponse,
    AllProcessedBidResponses,
    AuctionResponse,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entrypoint => "entrypoint",
            Self::RawAuctionRequest => "raw-auction-request",
            Self::ProcessedAuctionRequest => "processed-auction-request",
            Self::BidderRequest => "bidder-request",
            Self::RawBidderResponse => "raw-bidder-response",
            Self::ProcessedBidderResponse => "processed-bidder-response",
            Self::AllProcessedBidResponses => "all-processed-bid-responses",
            Self::AuctionResponse => "auction-response",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "entrypoint" => Some(Self::Entrypoint),
            "raw-auction-request" => Some(Self::RawAuctionRequest),
            "processed-auction-request" => Some(Self::ProcessedAuctionRequest),
            "bidder-request" => Some(Self::BidderRequest),
            "raw-bidder-response" => Some(Self::RawBidderResponse),
            "processed-bidder-response" => Some(Self::ProcessedBidderResponse),
            "all-processed-bid-responses" => Some(Self::AllProcessedBidResponses),
            "auction-response" => Some(Self::AuctionResponse),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Results ----------------------------------------------------------------

/// A value, possibly changed.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResult<T> {
    pub value: T,
    pub updated: bool,
}

impl<T> UpdateResult<T> {
    pub fn updated(value: T) -> Self {
        UpdateResult { value, updated: true }
    }

    pub fn unaltered(value: T) -> Self {
        UpdateResult { value, updated: false }
    }
}

/// Outcome of a single rule invocation: the (possibly) updated value and the
/// evidence of what happened.
///
/// A rejected result tells the pipeline to drop the value altogether. Nothing
/// runs after a rejection; `and_then` returns it untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleResult<T> {
    pub update_result: UpdateResult<T>,
    pub audit_trail: AuditTrail,
    /// Bidders taken out of the auction, with the reason per impression.
    pub seat_non_bids: Vec<SeatNonBid>,
    pub rejected: bool,
}

impl<T> RuleResult<T> {
    pub fn new(update_result: UpdateResult<T>, audit_trail: AuditTrail) -> Self {
        RuleResult { update_result, audit_trail, seat_non_bids: Vec::new(), rejected: false }
    }

    /// `value` untouched, empty audit trail.
    pub fn unaltered(value: T) -> Self {
        Self::new(UpdateResult::unaltered(value), AuditTrail::empty())
    }

    /// The value must not continue down the pipeline.
    pub fn rejected(value: T, audit_trail: AuditTrail, seat_non_bids: Vec<SeatNonBid>) -> Self {
        RuleResult { update_result: UpdateResult::updated(value), audit_trail, seat_non_bids, rejected: true }
    }

    pub fn with_seat_non_bids(mut self, seat_non_bids: Vec<SeatNonBid>) -> Self {
        self.seat_non_bids = seat_non_bids;
        self
    }

    /// Merge a later result into this one.
    ///
    /// The later value and rejection win and `updated` is OR-ed. Audit trails
    /// and seat non-bids are concatenated in call order. A rejected result
    /// absorbs nothing.
    pub fn merge(mut self, later: RuleResult<T>) -> RuleResult<T> {
        if self.rejected {
            return self;
        }
        self.audit_trail.extend(later.audit_trail);
        self.seat_non_bids.extend(later.seat_non_bids);

        RuleResult {
            update_result: UpdateResult {
                value: later.update_result.value,
                updated: self.update_result.updated || later.update_result.updated,
            },
            audit_trail: self.audit_trail,
            seat_non_bids: self.seat_non_bids,
            rejected: later.rejected,
        }
    }

    /// Feed this result's value to `next` and merge what it returns.
    ///
    /// `next` is not called once the result is rejected.
    pub fn and_then<E>(self, next: impl FnOnce(T) -> Result<RuleResult<T>, E>) -> Result<RuleResult<T>, E> {
        if self.rejected {
            return Ok(self);
        }
        let RuleResult { update_result, mut audit_trail, mut seat_non_bids, .. } = self;
        let later = next(update_result.value)?;
        audit_trail.extend(later.audit_trail);
        seat_non_bids.extend(later.seat_non_bids);

        Ok(RuleResult {
            update_result: UpdateResult {
                value: later.update_result.value,
                updated: update_result.updated || later.update_result.updated,
            },
            audit_trail,
            seat_non_bids,
            rejected: later.rejected,
        })
    }

    pub fn value(&self) -> &T {
        &self.update_result.value
    }

    pub fn is_updated(&self) -> bool {
        self.update_result.updated
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected
    }

    pub fn into_value(self) -> T {
        self.update_result.value
    }
}

// --- Seat non-bids ------------------------------------------------------------

/// One impression a seat was removed from, with the rejection reason code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NonBid {
    pub imp_id: String,
    pub status_code: u16,
}

/// A bidder (seat) removed before bidding, per impression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeatNonBid {
    pub seat: String,
    pub non_bid: Vec<NonBid>,
}

// --- Audit trail --------------------------------------------------------------

/// Identifiers an activity applied to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppliedTo {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imp_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bidders: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub request: bool,
}

impl AppliedTo {
    pub fn imps<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AppliedTo { imp_ids: ids.into_iter().map(Into::into).collect(), ..AppliedTo::default() }
    }

    pub fn request() -> Self {
        AppliedTo { request: true, ..AppliedTo::default() }
    }
}

/// One named audit record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub name: String,
    pub status: String,
    /// Structured details, e.g. `analyticsKey`, `conditionFired`.
    pub values: Map<String, Value>,
    pub applied_to: AppliedTo,
}

impl Activity {
    pub fn success(name: impl Into<String>, values: Map<String, Value>, applied_to: AppliedTo) -> Self {
        Activity { name: name.into(), status: "success".to_string(), values, applied_to }
    }
}

/// Ordered audit records. Order reflects execution order and is never
/// rearranged or deduplicated.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct AuditTrail {
    activities: Vec<Activity>,
}

impl AuditTrail {
    pub fn empty() -> Self {
        AuditTrail { activities: Vec::new() }
    }

    pub fn single(activity: Activity) -> Self {
        AuditTrail { activities: vec![activity] }
    }

    pub fn push(&mut self, activity: Activity) {
        self.activities.push(activity);
    }

    pub fn extend(&mut self, other: AuditTrail) {
        self.activities.extend(other.activities);
    }

    pub fn activities(&self) -> &[Activity] {
        &self.activities
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }
}

impl From<Vec<Activity>> for AuditTrail {
    fn from(activities: Vec<Activity>) -> Self {
        AuditTrail { activities }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(name: &str) -> Activity {
        Activity::success(name, Map::new(), AppliedTo::request())
    }

    #[test]
    fn merge_keeps_later_value_and_ors_flags() {
        let first = RuleResult::new(UpdateResult::updated(1), AuditTrail::single(activity("a")));
        let second = RuleResult::new(UpdateResult::unaltered(2), AuditTrail::single(activity("b")));

        let merged = first.merge(second);

        assert_eq!(merged.update_result, UpdateResult { value: 2, updated: true });
        let names: Vec<&str> = merged.audit_trail.activities().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn merge_of_unaltered_results_stays_unaltered() {
        let merged = RuleResult::unaltered("x").merge(RuleResult::unaltered("y"));
        assert!(!merged.is_updated());
        assert!(merged.audit_trail.is_empty());
        assert_eq!(*merged.value(), "y");
    }

    fn seat(name: &str, imp: &str) -> SeatNonBid {
        SeatNonBid { seat: name.into(), non_bid: vec![NonBid { imp_id: imp.into(), status_code: 203 }] }
    }

    #[test]
    fn merge_concatenates_seat_non_bids_in_call_order() {
        let first = RuleResult::unaltered(1).with_seat_non_bids(vec![seat("a", "imp-1")]);
        let second = RuleResult::unaltered(2).with_seat_non_bids(vec![seat("b", "imp-1"), seat("c", "imp-2")]);

        let merged = first.merge(second);
        let seats: Vec<&str> = merged.seat_non_bids.iter().map(|s| s.seat.as_str()).collect();
        assert_eq!(seats, vec!["a", "b", "c"]);
    }

    #[test]
    fn rejection_stops_the_chain() {
        let rejected = RuleResult::rejected(1, AuditTrail::single(activity("reject")), vec![seat("a", "imp-1")]);

        let chained = rejected.clone().and_then(|_| -> Result<RuleResult<i32>, ()> { panic!("must not run") });
        assert_eq!(chained, Ok(rejected.clone()));
        assert_eq!(rejected.clone().merge(RuleResult::new(UpdateResult::updated(2), AuditTrail::single(activity("x")))), rejected);
    }

    #[test]
    fn later_rejection_keeps_earlier_evidence() {
        let first = RuleResult::new(UpdateResult::updated(1), AuditTrail::single(activity("a")));
        let chained = first
            .and_then(|value| Ok::<_, ()>(RuleResult::rejected(value + 1, AuditTrail::single(activity("b")), vec![seat("s", "i")])))
            .unwrap();

        assert!(chained.is_rejected());
        assert_eq!(chained.audit_trail.len(), 2);
        assert_eq!(chained.seat_non_bids, vec![seat("s", "i")]);
    }

    #[test]
    fn seat_non_bid_serializes_camel_case() {
        let json = serde_json::to_value(seat("alpha", "imp-1")).unwrap();
        assert_eq!(json, serde_json::json!({ "seat": "alpha", "nonBid": [{ "impId": "imp-1", "statusCode": 203 }] }));
    }

    #[test]
    fn stage_names_round_trip_through_serde() {
        let json = serde_json::to_string(&Stage::ProcessedAuctionRequest).unwrap();
        assert_eq!(json, "\"processed-auction-request\"");
        assert_eq!(Stage::parse("processed-auction-request"), Some(Stage::ProcessedAuctionRequest));
        assert_eq!(Stage::parse("unknown"), None);
    }
}
