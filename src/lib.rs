//! Version-tag admission engine for conditional GET requests.
//!
//! Decides whether a client's `If-None-Match` tag is still current for a
//! set of tracked resources and, when it is not, computes the fresh `ETag`.

pub mod admission;
pub mod aggregate;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod layer;
pub mod logging;
pub mod metrics;
pub mod options;
pub mod resolver;
pub mod routes;
pub mod source;
pub mod tag;

pub use context::{RequestContext, ResponseHead, TraceId};
pub use error::{ConfigError, Result, SourceError, TrackerError};
pub use handler::{RequestHandler, RequestOutcome};
pub use layer::{TrackLayer, TrackService};
pub use options::{CacheControl, TrackOptions, TrackOptionsBuilder, TrackedResources};
pub use resolver::{ProviderLease, ProviderRegistry, ProviderResolver};
pub use routes::RouteTable;
pub use source::{MemorySource, SourceProvider, SqliteSource};
pub use tag::{Epoch, TagCodec};
