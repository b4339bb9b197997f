//! Built-in result functions over [`BidRequest`].
//!
//! Each function reports what it did as a single `pb-rule-engine` activity,
//! provided the model group declares an `analyticsKey`; without one the
//! change still applies but nothing is tagged. Bidder filters stay silent
//! when they remove nothing.
//!
//! Bidder filters only touch impressions covered by the context
//! [`Granularity`](super::request::Granularity). An impression left without
//! bidders is dropped, and a request left without impressions is rejected.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::request::{BidRequest, RequestContext};
use super::schema::{parse_config, runtime_config};
use crate::engine::{ResultFunction, ResultFunctionArguments, RunMetadata};
use crate::error::{ConfigError, RuleError};
use crate::{Activity, AppliedTo, AuditTrail, NonBid, RuleResult, SeatNonBid, UpdateResult};

/// Activity name shared by every built-in result function.
pub const ACTIVITY_NAME: &str = "pb-rule-engine";

/// Rejection reason reported for removed bidders unless configured:
/// request blocked by optimization.
pub const DEFAULT_SEAT_NON_BID: u16 = 203;

fn default_seat_non_bid() -> u16 {
    DEFAULT_SEAT_NON_BID
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BiddersConfig {
    #[serde(default)]
    bidders: Vec<String>,
    #[serde(default = "default_seat_non_bid")]
    seat_non_bid: u16,
    #[serde(default)]
    analytics_value: Option<String>,
}

impl BiddersConfig {
    fn lists(&self, bidder: &str) -> bool {
        self.bidders.iter().any(|b| b.eq_ignore_ascii_case(bidder))
    }
}

fn validate_bidders(function: &str, config: Option<&Value>) -> Result<(), ConfigError> {
    let config: BiddersConfig = parse_config(function, config)?;
    if config.bidders.is_empty() {
        return Err(ConfigError::InvalidFunctionConfig {
            function: function.to_string(),
            reason: "'bidders' field is required".to_string(),
        });
    }
    Ok(())
}

fn activity_values(
    metadata: &RunMetadata,
    function: &str,
    analytics_value: Option<&str>,
) -> Map<String, Value> {
    let mut values = Map::new();
    values.insert("analyticsKey".into(), json!(metadata.analytics_key));
    values.insert("analyticsValue".into(), json!(analytics_value));
    values.insert("modelVersion".into(), json!(metadata.model_version));
    values.insert("conditionFired".into(), json!(metadata.condition_fired));
    values.insert("resultFunction".into(), json!(function));
    values
}

/// A single activity, or nothing when the run has no analytics key.
fn tag(metadata: &RunMetadata, values: Map<String, Value>, applied_to: AppliedTo) -> AuditTrail {
    match metadata.analytics_key {
        Some(_) => AuditTrail::single(Activity::success(ACTIVITY_NAME, values, applied_to)),
        None => AuditTrail::empty(),
    }
}

fn record_non_bid(seat_non_bids: &mut Vec<SeatNonBid>, seat: &str, imp_id: &str, status_code: u16) {
    let non_bid = NonBid { imp_id: imp_id.to_string(), status_code };
    match seat_non_bids.iter_mut().find(|entry| entry.seat == seat) {
        Some(entry) => entry.non_bid.push(non_bid),
        None => seat_non_bids.push(SeatNonBid { seat: seat.to_string(), non_bid: vec![non_bid] }),
    }
}

/// Apply `keep` to the bidders of every covered impression and report the
/// removals.
fn filter_bidders(
    args: ResultFunctionArguments<'_, BidRequest, RequestContext>,
    keep: impl Fn(&BiddersConfig, &str) -> bool,
) -> Result<RuleResult<BidRequest>, RuleError> {
    let config: BiddersConfig = runtime_config(args.function, args.config)?;
    let granularity = &args.context.granularity;
    let mut request = args.value;

    let mut imp_ids = Vec::new();
    let mut removed: Vec<String> = Vec::new();
    let mut seat_non_bids = Vec::new();
    request.imp.retain_mut(|imp| {
        if !granularity.covers(imp) {
            return true;
        }
        let dropped = imp.retain_bidders(|bidder| keep(&config, bidder));
        if dropped.is_empty() {
            return true;
        }

        imp_ids.push(imp.id.clone());
        for bidder in dropped {
            record_non_bid(&mut seat_non_bids, &bidder, &imp.id, config.seat_non_bid);
            if !removed.contains(&bidder) {
                removed.push(bidder);
            }
        }
        !imp.bidders().is_empty()
    });

    if removed.is_empty() {
        return Ok(RuleResult::unaltered(request));
    }

    let mut values = activity_values(args.metadata, args.function, config.analytics_value.as_deref());
    values.insert("biddersRemoved".into(), json!(removed));
    values.insert("seatNonBid".into(), json!(config.seat_non_bid));
    let audit_trail = tag(args.metadata, values, AppliedTo::imps(imp_ids));

    if request.imp.is_empty() {
        return Ok(RuleResult::rejected(request, audit_trail, seat_non_bids));
    }
    Ok(RuleResult::new(UpdateResult::updated(request), audit_trail).with_seat_non_bids(seat_non_bids))
}

/// Removes the configured bidders.
pub struct ExcludeBidders;

impl ResultFunction<BidRequest, RequestContext> for ExcludeBidders {
    fn apply(
        &self,
        args: ResultFunctionArguments<'_, BidRequest, RequestContext>,
    ) -> Result<RuleResult<BidRequest>, RuleError> {
        filter_bidders(args, |config, bidder| !config.lists(bidder))
    }

    fn validate_config(&self, config: Option<&Value>) -> Result<(), ConfigError> {
        validate_bidders("excludeBidders", config)
    }
}

/// Keeps only the configured bidders.
pub struct IncludeBidders;

impl ResultFunction<BidRequest, RequestContext> for IncludeBidders {
    fn apply(
        &self,
        args: ResultFunctionArguments<'_, BidRequest, RequestContext>,
    ) -> Result<RuleResult<BidRequest>, RuleError> {
        filter_bidders(args, |config, bidder| config.lists(bidder))
    }

    fn validate_config(&self, config: Option<&Value>) -> Result<(), ConfigError> {
        validate_bidders("includeBidders", config)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogATagConfig {
    analytics_value: String,
}

/// Records an analytics tag; the request is never changed.
pub struct LogATag;

impl ResultFunction<BidRequest, RequestContext> for LogATag {
    fn apply(
        &self,
        args: ResultFunctionArguments<'_, BidRequest, RequestContext>,
    ) -> Result<RuleResult<BidRequest>, RuleError> {
        let config: LogATagConfig = runtime_config(args.function, args.config)?;
        let values = activity_values(args.metadata, args.function, Some(&config.analytics_value));
        let granularity = &args.context.granularity;
        let imp_ids = args.value.imp.iter().filter(|imp| granularity.covers(imp)).map(|imp| imp.id.clone());
        let audit_trail = tag(args.metadata, values, AppliedTo::imps(imp_ids));

        Ok(RuleResult::new(UpdateResult::unaltered(args.value), audit_trail))
    }

    fn validate_config(&self, config: Option<&Value>) -> Result<(), ConfigError> {
        parse_config::<LogATagConfig>("logATag", config).map(|_| ())
    }
}
