//! Built-in schema functions over [`RequestContext`].
//!
//! Plain extractors return the characteristic as found (empty string when
//! absent). `*In` and `*Available` functions return `"true"` or `"false"`.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::request::{MediaTypes, RequestContext};
use crate::engine::{SchemaFunction, SchemaFunctionArguments};
use crate::error::{ConfigError, RuleError};

pub(crate) const TRUE: &str = "true";
pub(crate) const FALSE: &str = "false";

fn flag(value: bool) -> String {
    if value { TRUE.to_string() } else { FALSE.to_string() }
}

/// Decode a function's `args`, failing at compile time when they are absent or
/// do not fit `T`.
pub(crate) fn parse_config<T: DeserializeOwned>(function: &str, config: Option<&Value>) -> Result<T, ConfigError> {
    let config = config.ok_or_else(|| ConfigError::InvalidFunctionConfig {
        function: function.to_string(),
        reason: "Configuration is required, but not provided".to_string(),
    })?;

    T::deserialize(config)
        .map_err(|err| ConfigError::InvalidFunctionConfig { function: function.to_string(), reason: err.to_string() })
}

/// Request-time variant of [`parse_config`]; the compiler has already
/// validated the same config, so failures here are function errors.
pub(crate) fn runtime_config<T: DeserializeOwned>(function: &str, config: Option<&Value>) -> Result<T, RuleError> {
    parse_config(function, config).map_err(|err| RuleError::function(function, err.to_string()))
}

fn require_non_empty(function: &str, field: &str, values: &[String]) -> Result<(), ConfigError> {
    if values.is_empty() {
        return Err(ConfigError::InvalidFunctionConfig {
            function: function.to_string(),
            reason: format!("'{field}' field is required"),
        });
    }
    Ok(())
}

// --- Plain extractors ---------------------------------------------------------

pub struct DeviceCountry;

impl SchemaFunction<RequestContext> for DeviceCountry {
    fn extract(&self, args: &SchemaFunctionArguments<'_, RequestContext>) -> Result<String, RuleError> {
        Ok(device_country(args.context).unwrap_or_default().to_string())
    }
}

pub struct DataCenter;

impl SchemaFunction<RequestContext> for DataCenter {
    fn extract(&self, args: &SchemaFunctionArguments<'_, RequestContext>) -> Result<String, RuleError> {
        Ok(args.context.datacenter.clone())
    }
}

/// `ext.prebid.channel.name`, else `app` or `web` depending on the request.
pub struct Channel;

impl SchemaFunction<RequestContext> for Channel {
    fn extract(&self, args: &SchemaFunctionArguments<'_, RequestContext>) -> Result<String, RuleError> {
        let request = &args.context.request;
        let declared = request.ext.as_ref().and_then(|ext| ext.pointer("/prebid/channel/name")).and_then(Value::as_str);

        Ok(match declared {
            Some(name) => name.to_string(),
            None if request.app.is_some() => "app".to_string(),
            None if request.site.is_some() => "web".to_string(),
            None => String::new(),
        })
    }
}

pub struct Domain;

impl SchemaFunction<RequestContext> for Domain {
    fn extract(&self, args: &SchemaFunctionArguments<'_, RequestContext>) -> Result<String, RuleError> {
        Ok(domain(args.context).unwrap_or_default().to_string())
    }
}

pub struct Bundle;

impl SchemaFunction<RequestContext> for Bundle {
    fn extract(&self, args: &SchemaFunctionArguments<'_, RequestContext>) -> Result<String, RuleError> {
        let bundle = args.context.request.app.as_ref().and_then(|app| app.bundle.as_deref());
        Ok(bundle.unwrap_or_default().to_string())
    }
}

/// OpenRTB `devicetype` mapped to a name.
pub struct DeviceType;

impl SchemaFunction<RequestContext> for DeviceType {
    fn extract(&self, args: &SchemaFunctionArguments<'_, RequestContext>) -> Result<String, RuleError> {
        let code = args.context.request.device.as_ref().and_then(|device| device.devicetype);
        let name = match code {
            Some(1) => "mobile",
            Some(2) => "desktop",
            Some(3) => "ctv",
            Some(4) => "phone",
            Some(5) => "tablet",
            Some(6) => "connected-device",
            Some(7) => "set-top-box",
            _ => "",
        };
        Ok(name.to_string())
    }
}

pub struct EidAvailable;

impl SchemaFunction<RequestContext> for EidAvailable {
    fn extract(&self, args: &SchemaFunctionArguments<'_, RequestContext>) -> Result<String, RuleError> {
        let available = args.context.request.user.as_ref().is_some_and(|user| !user.eids.is_empty());
        Ok(flag(available))
    }
}

// --- Membership tests -----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CountriesConfig {
    countries: Vec<String>,
}

pub struct DeviceCountryIn;

impl DeviceCountryIn {
    const NAME: &'static str = "deviceCountryIn";
}

impl SchemaFunction<RequestContext> for DeviceCountryIn {
    fn extract(&self, args: &SchemaFunctionArguments<'_, RequestContext>) -> Result<String, RuleError> {
        let config: CountriesConfig = runtime_config(Self::NAME, args.config)?;
        let country = device_country(args.context);
        Ok(flag(country.is_some_and(|country| config.countries.iter().any(|c| c.eq_ignore_ascii_case(country)))))
    }

    fn validate_config(&self, config: Option<&Value>) -> Result<(), ConfigError> {
        let config: CountriesConfig = parse_config(Self::NAME, config)?;
        require_non_empty(Self::NAME, "countries", &config.countries)
    }
}

#[derive(Debug, Deserialize)]
struct DataCentersConfig {
    datacenters: Vec<String>,
}

pub struct DataCenterIn;

impl DataCenterIn {
    const NAME: &'static str = "dataCenterIn";
}

impl SchemaFunction<RequestContext> for DataCenterIn {
    fn extract(&self, args: &SchemaFunctionArguments<'_, RequestContext>) -> Result<String, RuleError> {
        let config: DataCentersConfig = runtime_config(Self::NAME, args.config)?;
        Ok(flag(config.datacenters.iter().any(|dc| dc.eq_ignore_ascii_case(&args.context.datacenter))))
    }

    fn validate_config(&self, config: Option<&Value>) -> Result<(), ConfigError> {
        let config: DataCentersConfig = parse_config(Self::NAME, config)?;
        require_non_empty(Self::NAME, "datacenters", &config.datacenters)
    }
}

#[derive(Debug, Deserialize)]
struct DomainsConfig {
    domains: Vec<String>,
}

pub struct DomainIn;

impl DomainIn {
    const NAME: &'static str = "domainIn";
}

impl SchemaFunction<RequestContext> for DomainIn {
    fn extract(&self, args: &SchemaFunctionArguments<'_, RequestContext>) -> Result<String, RuleError> {
        let config: DomainsConfig = runtime_config(Self::NAME, args.config)?;
        let domain = domain(args.context);
        Ok(flag(domain.is_some_and(|domain| config.domains.iter().any(|d| d == domain))))
    }

    fn validate_config(&self, config: Option<&Value>) -> Result<(), ConfigError> {
        let config: DomainsConfig = parse_config(Self::NAME, config)?;
        require_non_empty(Self::NAME, "domains", &config.domains)
    }
}

#[derive(Debug, Deserialize)]
struct MediaTypesConfig {
    types: Vec<String>,
}

/// True when any impression accepts any of the configured media types.
pub struct MediaTypeIn;

impl MediaTypeIn {
    const NAME: &'static str = "mediaTypeIn";

    fn wanted(config: &MediaTypesConfig) -> Result<MediaTypes, String> {
        config.types.iter().try_fold(MediaTypes::empty(), |acc, name| {
            MediaTypes::parse(name).map(|t| acc | t).ok_or_else(|| format!("unknown media type '{name}'"))
        })
    }
}

impl SchemaFunction<RequestContext> for MediaTypeIn {
    fn extract(&self, args: &SchemaFunctionArguments<'_, RequestContext>) -> Result<String, RuleError> {
        let config: MediaTypesConfig = runtime_config(Self::NAME, args.config)?;
        let wanted = Self::wanted(&config).map_err(|reason| RuleError::function(Self::NAME, reason))?;
        Ok(flag(args.context.request.media_types().intersects(wanted)))
    }

    fn validate_config(&self, config: Option<&Value>) -> Result<(), ConfigError> {
        let config: MediaTypesConfig = parse_config(Self::NAME, config)?;
        require_non_empty(Self::NAME, "types", &config.types)?;
        Self::wanted(&config)
            .map(|_| ())
            .map_err(|reason| ConfigError::InvalidFunctionConfig { function: Self::NAME.to_string(), reason })
    }
}

#[derive(Debug, Deserialize)]
struct SourcesConfig {
    sources: Vec<String>,
}

pub struct EidIn;

impl EidIn {
    const NAME: &'static str = "eidIn";
}

impl SchemaFunction<RequestContext> for EidIn {
    fn extract(&self, args: &SchemaFunctionArguments<'_, RequestContext>) -> Result<String, RuleError> {
        let config: SourcesConfig = runtime_config(Self::NAME, args.config)?;
        let eids = args.context.request.user.as_ref().map(|user| user.eids.as_slice()).unwrap_or_default();
        Ok(flag(eids.iter().any(|eid| config.sources.contains(&eid.source))))
    }

    fn validate_config(&self, config: Option<&Value>) -> Result<(), ConfigError> {
        let config: SourcesConfig = parse_config(Self::NAME, config)?;
        require_non_empty(Self::NAME, "sources", &config.sources)
    }
}

// --- Helpers ----------------------------------------------------------------------

fn device_country(context: &RequestContext) -> Option<&str> {
    context.request.device.as_ref()?.geo.as_ref()?.country.as_deref()
}

/// Site domain, then site publisher domain, then app domain and app publisher domain.
fn domain(context: &RequestContext) -> Option<&str> {
    let request = &context.request;
    let site = request.site.as_ref();
    let app = request.app.as_ref();

    site.and_then(|site| site.domain.as_deref())
        .or_else(|| site.and_then(|site| site.publisher.as_ref()?.domain.as_deref()))
        .or_else(|| app.and_then(|app| app.domain.as_deref()))
        .or_else(|| app.and_then(|app| app.publisher.as_ref()?.domain.as_deref()))
}
