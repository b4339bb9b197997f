//! Account rule configuration.
//!
//! These are plain value objects decoded from the account JSON. They carry no
//! behavior beyond decoding; validation happens in one pass when a stage is
//! compiled (see [`crate::StageCompiler`]).
//!
//! ```json
//! {
//!   "enabled": true,
//!   "timestamp": "2025-01-31T00:00:00",
//!   "ruleSets": [{
//!     "stage": "processed-auction-request",
//!     "name": "exclude-by-geo",
//!     "modelGroups": [{
//!       "weight": 100,
//!       "analyticsKey": "geo-model",
//!       "version": "v1",
//!       "schema": [{ "function": "deviceCountry" }, { "function": "deviceType" }],
//!       "rules": [{
//!         "conditions": ["US", "mobile"],
//!         "results": [{ "function": "excludeBidders", "args": { "bidders": ["b1"] } }]
//!       }],
//!       "default": [{ "function": "logATag", "args": { "analyticsValue": "none" } }]
//!     }]
//!   }]
//! }
//! ```

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Stage;
use crate::error::ConfigError;

const DEFAULT_WEIGHT: i64 = 100;
const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountConfig {
    /// Absent means enabled; an explicit `false` disables every rule set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Version marker of this configuration, used for cache invalidation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub rule_sets: Vec<RuleSetConfig>,
}

impl AccountConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Parsed `timestamp`, if one is declared.
    pub fn parsed_timestamp(&self) -> Result<Option<NaiveDateTime>, ConfigError> {
        let Some(raw) = self.timestamp.as_deref() else {
            return Ok(None);
        };

        TIMESTAMP_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw.trim(), format).ok())
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidTimestamp(raw.to_string()))
    }

    /// Rule sets declared for `stage`, in declaration order.
    pub fn rule_sets_for(&self, stage: Stage) -> impl Iterator<Item = &RuleSetConfig> {
        self.rule_sets.iter().filter(move |rule_set| rule_set.stage == stage)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleSetConfig {
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub model_groups: Vec<ModelGroupConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelGroupConfig {
    #[serde(default = "default_weight")]
    pub weight: i64,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub schema: Vec<FunctionConfig>,
    #[serde(default)]
    pub rules: Vec<ConditionalRuleConfig>,
    #[serde(default, rename = "default", skip_serializing_if = "Option::is_none")]
    pub default_action: Option<Vec<FunctionConfig>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalRuleConfig {
    /// One matcher per schema function; `*` matches anything.
    pub conditions: Vec<String>,
    pub results: Vec<FunctionConfig>,
}

/// Named function reference with its opaque arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionConfig {
    pub function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

impl FunctionConfig {
    pub fn named(function: impl Into<String>) -> Self {
        FunctionConfig { function: function.into(), args: None }
    }

    pub fn with_args(function: impl Into<String>, args: Value) -> Self {
        FunctionConfig { function: function.into(), args: Some(args) }
    }
}

fn enabled_by_default() -> bool {
    true
}

fn default_weight() -> i64 {
    DEFAULT_WEIGHT
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_account_json_with_defaults() {
        let config = AccountConfig::from_value(json!({
            "ruleSets": [{
                "stage": "processed-auction-request",
                "modelGroups": [{
                    "schema": [{ "function": "deviceCountry" }],
                    "rules": [{ "conditions": ["US"], "results": [{ "function": "logATag" }] }],
                    "default": [{ "function": "logATag", "args": { "analyticsValue": "x" } }]
                }]
            }]
        }))
        .unwrap();

        assert!(config.is_enabled());
        let rule_set = &config.rule_sets[0];
        assert!(rule_set.enabled);
        let group = &rule_set.model_groups[0];
        assert_eq!(group.weight, 100);
        assert!(group.enabled);
        assert_eq!(group.default_action.as_ref().map(Vec::len), Some(1));
        assert_eq!(config.rule_sets_for(Stage::ProcessedAuctionRequest).count(), 1);
        assert_eq!(config.rule_sets_for(Stage::BidderRequest).count(), 0);
    }

    #[test]
    fn explicit_false_disables_account() {
        let config = AccountConfig::from_json_str(r#"{"enabled": false, "ruleSets": []}"#).unwrap();
        assert!(!config.is_enabled());
    }

    #[test]
    fn unknown_stage_is_malformed() {
        let err = AccountConfig::from_json_str(r#"{"ruleSets": [{"stage": "nowhere"}]}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)));
    }

    #[test]
    fn timestamp_accepts_both_separators() {
        let expected = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap().and_hms_opt(12, 30, 0).unwrap();
        for raw in ["2025-01-31T12:30:00", "2025-01-31 12:30:00"] {
            let config = AccountConfig { timestamp: Some(raw.to_string()), ..AccountConfig::default() };
            assert_eq!(config.parsed_timestamp().unwrap(), Some(expected));
        }

        let bad = AccountConfig { timestamp: Some("yesterday".to_string()), ..AccountConfig::default() };
        assert_eq!(bad.parsed_timestamp(), Err(ConfigError::InvalidTimestamp("yesterday".to_string())));
    }
}
