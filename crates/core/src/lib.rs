pub mod config;
pub mod enrichment;
pub mod errors;
pub mod routes;
pub mod status;
pub mod upstream;
pub mod validator;

pub use enrichment::{
    render_payload, truncate_payload, DogmaAttribute, DogmaEffect, EnrichedType, EnrichmentFanout,
    FanoutSettings, TypeLookup, TypeResource, TRUNCATION_MARKER, UNRESOLVED_NAME,
};
pub use errors::{CommandError, ErrorSeverity};
pub use routes::{RouteTable, RouteTemplate, Segment};
pub use status::{
    RefreshOutcome, RouteDelta, RouteSnapshot, RouteStatus, StatusCache, StatusError, StatusTier,
};
pub use upstream::{
    fetch_with_timeout, FetchOptions, InMemoryUpstream, UpstreamClient, UpstreamError,
    UpstreamResponse,
};
pub use validator::{PathValidator, ValidatedPath, DEFAULT_VERSION, VERSION_TOKENS};
