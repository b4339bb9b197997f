//! Minimal OpenRTB-shaped bid request the built-in functions operate on.
//!
//! Only the fields the built-in catalog reads or writes are modelled. Bidders
//! an impression is offered to live under `imp[].ext.prebid.bidder`, keyed by
//! bidder name.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

bitflags::bitflags! {
    /// Media types an impression accepts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MediaTypes: u8 {
        const BANNER = 1 << 0;
        const VIDEO  = 1 << 1;
        const NATIVE = 1 << 2;
        const AUDIO  = 1 << 3;
    }
}

impl MediaTypes {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "banner" => Some(MediaTypes::BANNER),
            "video" => Some(MediaTypes::VIDEO),
            "native" => Some(MediaTypes::NATIVE),
            "audio" => Some(MediaTypes::AUDIO),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BidRequest {
    pub id: String,
    #[serde(default)]
    pub imp: Vec<Imp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<Site>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<App>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,
}

impl BidRequest {
    pub fn media_types(&self) -> MediaTypes {
        self.imp.iter().fold(MediaTypes::empty(), |acc, imp| acc | imp.media_types())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Imp {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,
}

impl Imp {
    pub fn media_types(&self) -> MediaTypes {
        let mut types = MediaTypes::empty();
        types.set(MediaTypes::BANNER, self.banner.is_some());
        types.set(MediaTypes::VIDEO, self.video.is_some());
        types.set(MediaTypes::NATIVE, self.native.is_some());
        types.set(MediaTypes::AUDIO, self.audio.is_some());
        types
    }

    /// Bidder names, sorted.
    pub fn bidders(&self) -> Vec<String> {
        self.ext
            .as_ref()
            .and_then(|ext| ext.pointer("/prebid/bidder"))
            .and_then(Value::as_object)
            .map(|bidders| bidders.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Keep only bidders accepted by `keep`; returns the removed names.
    pub fn retain_bidders(&mut self, mut keep: impl FnMut(&str) -> bool) -> Vec<String> {
        let Some(bidders) = self.ext.as_mut().and_then(|ext| ext.pointer_mut("/prebid/bidder")).and_then(Value::as_object_mut)
        else {
            return Vec::new();
        };

        let removed: Vec<String> = bidders.keys().filter(|name| !keep(name)).cloned().collect();
        for name in &removed {
            bidders.remove(name);
        }
        removed
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Publisher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Site {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<Publisher>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct App {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<Publisher>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Geo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Device {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<Geo>,
    /// OpenRTB `devicetype` code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devicetype: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Eid {
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct User {
    #[serde(default)]
    pub eids: Vec<Eid>,
}

/// Scope a rule run applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Granularity {
    /// Every impression of the request.
    #[default]
    Request,
    /// Only the impression with this id.
    Imp(String),
}

impl Granularity {
    pub fn covers(&self, imp: &Imp) -> bool {
        match self {
            Granularity::Request => true,
            Granularity::Imp(id) => *id == imp.id,
        }
    }
}

/// Context the built-in schema functions read from.
///
/// `request` is the request as it entered the stage; rules transform a
/// separate working copy.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request: Arc<BidRequest>,
    pub datacenter: String,
    pub granularity: Granularity,
}

impl RequestContext {
    pub fn new(request: BidRequest, datacenter: impl Into<String>) -> Self {
        RequestContext { request: Arc::new(request), datacenter: datacenter.into(), granularity: Granularity::Request }
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }
}
