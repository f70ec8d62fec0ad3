//! Source providers
//!
//! A source provider reports monotonically non-decreasing version numbers
//! for tracked keys (tables, partitions, arbitrary keyed resources) and for
//! the source as a whole. The decision engine only ever asks "what is the
//! version now"; how versions are maintained is the backend's business.
//!
//! Backends:
//! - [`SqliteSource`]: trigger-maintained version table in SQLite
//! - [`MemorySource`]: in-process versions, bumped programmatically

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;

pub mod memory;
pub mod sqlite;

pub use memory::MemorySource;
pub use sqlite::SqliteSource;

/// Version lookups and tracking administration for one data source.
///
/// Implementations must be safe to call concurrently; the engine shares a
/// registered provider across all in-flight requests. Every call receives the
/// request's cancellation token and should return [`SourceError::Cancelled`]
/// once it fires.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Stable identifier used for keyed lookup in the registry.
    fn id(&self) -> &str;

    /// Current version of one tracked key.
    ///
    /// Fails with [`SourceError::NotFound`] if the key is not tracked.
    async fn version_of(&self, key: &str, cancel: &CancellationToken) -> Result<i64, SourceError>;

    /// Current versions of `keys`, in the same order.
    ///
    /// Either every key resolves or the whole call fails.
    async fn versions_of(
        &self,
        keys: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<i64>, SourceError>;

    /// Version of the source as a whole; changes whenever any tracked key changes.
    async fn source_version(&self, cancel: &CancellationToken) -> Result<i64, SourceError>;

    /// Starts tracking `key`. Returns `false` if it was already tracked.
    async fn enable_tracking(&self, key: &str, cancel: &CancellationToken)
        -> Result<bool, SourceError>;

    /// Stops tracking `key`. Returns `false` if it was not tracked.
    async fn disable_tracking(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, SourceError>;

    async fn is_tracking(&self, key: &str, cancel: &CancellationToken) -> Result<bool, SourceError>;
}

/// Fails fast when the request is already gone.
#[inline]
pub(crate) fn ensure_live(cancel: &CancellationToken) -> Result<(), SourceError> {
    if cancel.is_cancelled() {
        Err(SourceError::Cancelled)
    } else {
        Ok(())
    }
}
