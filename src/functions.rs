//! Built-in request function catalog.
//!
//! Rules compiled against [`request_functions`] transform a [`BidRequest`]
//! while reading characteristics from a [`RequestContext`]. The catalog
//! serves the request stages only; response stages compile to no-ops.

#[path = "functions/request.rs"]
pub mod request;
#[path = "functions/results.rs"]
mod results;
#[path = "functions/schema.rs"]
mod schema;

use once_cell::sync::Lazy;

pub use request::{
    App, BidRequest, Device, Eid, Geo, Granularity, Imp, MediaTypes, Publisher, RequestContext, Site, User,
};
pub use results::{ACTIVITY_NAME, DEFAULT_SEAT_NON_BID, ExcludeBidders, IncludeBidders, LogATag};
pub use schema::{
    Bundle, Channel, DataCenter, DataCenterIn, DeviceCountry, DeviceCountryIn, DeviceType, Domain, DomainIn,
    EidAvailable, EidIn, MediaTypeIn,
};

use crate::engine::{FunctionRegistry, StageSet};

pub type RequestFunctions = FunctionRegistry<BidRequest, RequestContext>;

static REQUEST_FUNCTIONS: Lazy<RequestFunctions> = Lazy::new(|| {
    FunctionRegistry::new()
        .for_stages(
            StageSet::ENTRYPOINT
                | StageSet::RAW_AUCTION_REQUEST
                | StageSet::PROCESSED_AUCTION_REQUEST
                | StageSet::BIDDER_REQUEST,
        )
        .with_schema("deviceCountry", DeviceCountry)
        .with_schema("deviceCountryIn", DeviceCountryIn)
        .with_schema("dataCenter", DataCenter)
        .with_schema("dataCenterIn", DataCenterIn)
        .with_schema("channel", Channel)
        .with_schema("domain", Domain)
        .with_schema("domainIn", DomainIn)
        .with_schema("bundle", Bundle)
        .with_schema("deviceType", DeviceType)
        .with_schema("mediaTypeIn", MediaTypeIn)
        .with_schema("eidAvailable", EidAvailable)
        .with_schema("eidIn", EidIn)
        .with_result("excludeBidders", ExcludeBidders)
        .with_result("includeBidders", IncludeBidders)
        .with_result("logATag", LogATag)
});

/// The shared built-in registry.
pub fn request_functions() -> &'static RequestFunctions {
    &REQUEST_FUNCTIONS
}
