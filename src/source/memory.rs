//! In-process source provider backed by DashMap.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio_util::sync::CancellationToken;

use super::{ensure_live, SourceProvider};
use crate::error::SourceError;

/// Versions kept in memory and advanced by the application itself.
///
/// Every change draws from one shared sequence, so the source-wide version is
/// the highest version handed out so far.
pub struct MemorySource {
    id: String,
    versions: DashMap<String, i64>,
    sequence: AtomicI64,
}

impl MemorySource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            versions: DashMap::new(),
            sequence: AtomicI64::new(0),
        }
    }

    /// Tracks `keys`, all starting at the current sequence value.
    pub fn with_keys<I, K>(id: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let source = Self::new(id);
        for key in keys {
            source.versions.insert(key.into(), 0);
        }
        source
    }

    /// Records a change to `key` and returns its new version.
    ///
    /// Fails with [`SourceError::NotFound`] if the key is not tracked.
    pub fn bump(&self, key: &str) -> Result<i64, SourceError> {
        let mut entry = self
            .versions
            .get_mut(key)
            .ok_or_else(|| SourceError::NotFound(key.to_string()))?;
        let version = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        *entry = version;
        Ok(version)
    }

    /// Raises `key` to at least `version`, tracking it if needed. A lower
    /// version is ignored so versions never move backwards.
    pub fn set_version(&self, key: impl Into<String>, version: i64) {
        self.versions
            .entry(key.into())
            .and_modify(|current| *current = (*current).max(version))
            .or_insert(version);
        self.sequence.fetch_max(version, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceProvider for MemorySource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn version_of(&self, key: &str, cancel: &CancellationToken) -> Result<i64, SourceError> {
        ensure_live(cancel)?;
        self.versions
            .get(key)
            .map(|v| *v)
            .ok_or_else(|| SourceError::NotFound(key.to_string()))
    }

    async fn versions_of(
        &self,
        keys: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<i64>, SourceError> {
        ensure_live(cancel)?;
        keys.iter()
            .map(|key| {
                self.versions
                    .get(key)
                    .map(|v| *v)
                    .ok_or_else(|| SourceError::NotFound(key.clone()))
            })
            .collect()
    }

    async fn source_version(&self, cancel: &CancellationToken) -> Result<i64, SourceError> {
        ensure_live(cancel)?;
        Ok(self.sequence.load(Ordering::SeqCst))
    }

    async fn enable_tracking(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, SourceError> {
        ensure_live(cancel)?;
        if self.versions.contains_key(key) {
            return Ok(false);
        }
        let current = self.sequence.load(Ordering::SeqCst);
        Ok(self.versions.insert(key.to_string(), current).is_none())
    }

    async fn disable_tracking(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, SourceError> {
        ensure_live(cancel)?;
        Ok(self.versions.remove(key).is_some())
    }

    async fn is_tracking(&self, key: &str, cancel: &CancellationToken) -> Result<bool, SourceError> {
        ensure_live(cancel)?;
        Ok(self.versions.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bump_advances_key_and_source() {
        let source = MemorySource::with_keys("mem", ["roles", "users"]);
        let cancel = CancellationToken::new();

        assert_eq!(source.version_of("roles", &cancel).await.unwrap(), 0);
        assert_eq!(source.bump("roles").unwrap(), 1);
        assert_eq!(source.bump("users").unwrap(), 2);
        assert_eq!(source.bump("roles").unwrap(), 3);

        assert_eq!(source.version_of("roles", &cancel).await.unwrap(), 3);
        assert_eq!(source.version_of("users", &cancel).await.unwrap(), 2);
        assert_eq!(source.source_version(&cancel).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_set_version_never_lowers() {
        let source = MemorySource::new("mem");
        let cancel = CancellationToken::new();

        source.set_version("roles", 9);
        source.set_version("roles", 4);
        assert_eq!(source.version_of("roles", &cancel).await.unwrap(), 9);
        assert_eq!(source.source_version(&cancel).await.unwrap(), 9);

        source.set_version("roles", 12);
        assert_eq!(source.version_of("roles", &cancel).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_versions_of_keeps_order() {
        let source = MemorySource::new("mem");
        source.set_version("a", 10);
        source.set_version("b", 20);
        let cancel = CancellationToken::new();

        let keys = vec!["b".to_string(), "a".to_string()];
        assert_eq!(source.versions_of(&keys, &cancel).await.unwrap(), vec![20, 10]);
        assert_eq!(source.source_version(&cancel).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_versions_of_fails_atomically() {
        let source = MemorySource::with_keys("mem", ["a"]);
        let cancel = CancellationToken::new();

        let keys = vec!["a".to_string(), "missing".to_string()];
        let err = source.versions_of(&keys, &cancel).await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound(key) if key == "missing"));
    }

    #[tokio::test]
    async fn test_tracking_administration() {
        let source = MemorySource::new("mem");
        let cancel = CancellationToken::new();

        assert!(!source.is_tracking("roles", &cancel).await.unwrap());
        assert!(source.enable_tracking("roles", &cancel).await.unwrap());
        assert!(!source.enable_tracking("roles", &cancel).await.unwrap());
        assert!(source.is_tracking("roles", &cancel).await.unwrap());
        assert!(source.disable_tracking("roles", &cancel).await.unwrap());
        assert!(!source.disable_tracking("roles", &cancel).await.unwrap());
        assert!(source.bump("roles").is_err());
    }

    #[tokio::test]
    async fn test_cancelled_calls_fail() {
        let source = MemorySource::with_keys("mem", ["roles"]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            source.version_of("roles", &cancel).await,
            Err(SourceError::Cancelled)
        ));
        assert!(matches!(
            source.source_version(&cancel).await,
            Err(SourceError::Cancelled)
        ));
    }
}
