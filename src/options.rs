//! Per-route tracking options
//!
//! Options are configured through [`TrackOptionsBuilder`] at startup and
//! frozen into an immutable [`TrackOptions`], which request handling shares
//! through an `Arc` without further synchronization.

use http::HeaderValue;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::{ConfigError, SourceError};
use crate::source::SourceProvider;

pub const DEFAULT_CACHE_CONTROL: &str = "no-cache";
pub const DEFAULT_INVALID_REQUEST_DIRECTIVES: [&str; 2] = ["no-store", "no-transform"];
pub const DEFAULT_INVALID_RESPONSE_DIRECTIVES: [&str; 3] = ["no-store", "no-transform", "immutable"];

/// Computes the tag suffix for a request.
pub type SuffixFn = Arc<dyn Fn(&RequestContext<'_>) -> String + Send + Sync>;

/// Extra eligibility check; returning `false` skips the request.
pub type FilterFn = Arc<dyn Fn(&RequestContext<'_>) -> bool + Send + Sync>;

/// Builds a provider owned by a single request.
pub type ProviderFactory =
    Arc<dyn Fn(&RequestContext<'_>) -> Result<Box<dyn SourceProvider>, SourceError> + Send + Sync>;

/// Ordered, duplicate-free list of tracked keys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackedResources(Arc<[String]>);

impl TrackedResources {
    /// Keeps the first occurrence of every key; later duplicates are dropped
    /// with a warning.
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for key in keys {
            let key = key.into();
            if unique.contains(&key) {
                tracing::warn!(key = %key, "Duplicate tracked key dropped");
                continue;
            }
            unique.push(key);
        }
        Self(unique.into())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl Deref for TrackedResources {
    type Target = [String];

    fn deref(&self) -> &[String] {
        &self.0
    }
}

/// Builder for `Cache-Control` header values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    directives: Vec<String>,
}

impl CacheControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_cache(self) -> Self {
        self.directive("no-cache")
    }

    pub fn no_store(self) -> Self {
        self.directive("no-store")
    }

    pub fn private(self) -> Self {
        self.directive("private")
    }

    pub fn public(self) -> Self {
        self.directive("public")
    }

    pub fn must_revalidate(self) -> Self {
        self.directive("must-revalidate")
    }

    pub fn max_age(self, seconds: u64) -> Self {
        self.directive(format!("max-age={}", seconds))
    }

    /// Appends an arbitrary directive. Repeats are ignored.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        let directive = directive.into();
        if !self.directives.contains(&directive) {
            self.directives.push(directive);
        }
        self
    }

    /// Comma-separated header value; `no-cache` when nothing was added.
    pub fn build(&self) -> String {
        if self.directives.is_empty() {
            DEFAULT_CACHE_CONTROL.to_string()
        } else {
            self.directives.join(", ")
        }
    }
}

impl fmt::Display for CacheControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build())
    }
}

/// Mutable configuration for one tracked route.
pub struct TrackOptionsBuilder {
    keys: Vec<String>,
    provider_id: Option<String>,
    provider: Option<Arc<dyn SourceProvider>>,
    provider_factory: Option<ProviderFactory>,
    suffix: Option<SuffixFn>,
    filter: Option<FilterFn>,
    cache_control: String,
    invalid_request_directives: Vec<String>,
    invalid_response_directives: Vec<String>,
}

impl Default for TrackOptionsBuilder {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            provider_id: None,
            provider: None,
            provider_factory: None,
            suffix: None,
            filter: None,
            cache_control: DEFAULT_CACHE_CONTROL.to_string(),
            invalid_request_directives: to_strings(DEFAULT_INVALID_REQUEST_DIRECTIVES),
            invalid_response_directives: to_strings(DEFAULT_INVALID_RESPONSE_DIRECTIVES),
        }
    }
}

fn to_strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

impl TrackOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends tracked keys, keeping their order.
    pub fn keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.keys.push(key.into());
        self
    }

    pub fn provider_id(mut self, id: impl Into<String>) -> Self {
        self.provider_id = Some(id.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn SourceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn provider_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&RequestContext<'_>) -> Result<Box<dyn SourceProvider>, SourceError>
            + Send
            + Sync
            + 'static,
    {
        self.provider_factory = Some(Arc::new(factory));
        self
    }

    pub fn suffix<F>(mut self, suffix: F) -> Self
    where
        F: Fn(&RequestContext<'_>) -> String + Send + Sync + 'static,
    {
        self.suffix = Some(Arc::new(suffix));
        self
    }

    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&RequestContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn cache_control(mut self, value: impl Into<String>) -> Self {
        self.cache_control = value.into();
        self
    }

    pub fn cache_control_with(self, builder: &CacheControl) -> Self {
        self.cache_control(builder.build())
    }

    /// Replaces the request `Cache-Control` directives that make a request ineligible.
    pub fn invalid_request_directives<I, S>(mut self, directives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invalid_request_directives = to_strings(directives);
        self
    }

    /// Replaces the response `Cache-Control` directives that make a request ineligible.
    pub fn invalid_response_directives<I, S>(mut self, directives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invalid_response_directives = to_strings(directives);
        self
    }

    /// Freezes the configuration.
    pub fn build(self) -> Result<TrackOptions, ConfigError> {
        let cache_control = HeaderValue::from_str(&self.cache_control)
            .map_err(|_| ConfigError::InvalidHeader(self.cache_control.clone()))?;

        let invalid_request_directives = normalize_directives(self.invalid_request_directives)?;
        let invalid_response_directives = normalize_directives(self.invalid_response_directives)?;

        if let Some(id) = &self.provider_id {
            if id.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "Provider id must not be empty".into(),
                ));
            }
        }

        Ok(TrackOptions {
            keys: TrackedResources::new(self.keys),
            provider_id: self.provider_id,
            provider: self.provider,
            provider_factory: self.provider_factory,
            suffix: self.suffix,
            filter: self.filter,
            cache_control,
            invalid_request_directives: invalid_request_directives.into(),
            invalid_response_directives: invalid_response_directives.into(),
        })
    }
}

fn normalize_directives(directives: Vec<String>) -> Result<Vec<String>, ConfigError> {
    directives
        .into_iter()
        .map(|directive| {
            let directive = directive.trim().to_ascii_lowercase();
            if directive.is_empty() {
                Err(ConfigError::Validation(
                    "Cache-Control directive must not be empty".into(),
                ))
            } else {
                Ok(directive)
            }
        })
        .collect()
}

/// Frozen configuration for one tracked route.
#[derive(Clone)]
pub struct TrackOptions {
    keys: TrackedResources,
    provider_id: Option<String>,
    provider: Option<Arc<dyn SourceProvider>>,
    provider_factory: Option<ProviderFactory>,
    suffix: Option<SuffixFn>,
    filter: Option<FilterFn>,
    cache_control: HeaderValue,
    invalid_request_directives: Arc<[String]>,
    invalid_response_directives: Arc<[String]>,
}

impl TrackOptions {
    pub fn builder() -> TrackOptionsBuilder {
        TrackOptionsBuilder::new()
    }

    pub fn keys(&self) -> &TrackedResources {
        &self.keys
    }

    pub fn provider_id(&self) -> Option<&str> {
        self.provider_id.as_deref()
    }

    pub fn provider(&self) -> Option<&Arc<dyn SourceProvider>> {
        self.provider.as_ref()
    }

    pub fn provider_factory(&self) -> Option<&ProviderFactory> {
        self.provider_factory.as_ref()
    }

    /// Suffix for this request; empty when no suffix function is configured.
    pub fn suffix_for(&self, ctx: &RequestContext<'_>) -> String {
        self.suffix.as_ref().map(|f| f(ctx)).unwrap_or_default()
    }

    /// Result of the custom filter; `true` when none is configured.
    pub fn passes_filter(&self, ctx: &RequestContext<'_>) -> bool {
        self.filter.as_ref().map_or(true, |f| f(ctx))
    }

    pub fn cache_control(&self) -> &HeaderValue {
        &self.cache_control
    }

    /// Lowercased request directives that make a request ineligible.
    pub fn invalid_request_directives(&self) -> &[String] {
        &self.invalid_request_directives
    }

    /// Lowercased response directives that make a request ineligible.
    pub fn invalid_response_directives(&self) -> &[String] {
        &self.invalid_response_directives
    }
}

impl Default for TrackOptions {
    fn default() -> Self {
        Self {
            keys: TrackedResources::default(),
            provider_id: None,
            provider: None,
            provider_factory: None,
            suffix: None,
            filter: None,
            cache_control: HeaderValue::from_static(DEFAULT_CACHE_CONTROL),
            invalid_request_directives: to_strings(DEFAULT_INVALID_REQUEST_DIRECTIVES).into(),
            invalid_response_directives: to_strings(DEFAULT_INVALID_RESPONSE_DIRECTIVES).into(),
        }
    }
}

impl fmt::Debug for TrackOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackOptions")
            .field("keys", &self.keys)
            .field("provider_id", &self.provider_id)
            .field("provider", &self.provider.as_ref().map(|p| p.id().to_string()))
            .field("provider_factory", &self.provider_factory.is_some())
            .field("suffix", &self.suffix.is_some())
            .field("filter", &self.filter.is_some())
            .field("cache_control", &self.cache_control)
            .field("invalid_request_directives", &self.invalid_request_directives)
            .field("invalid_response_directives", &self.invalid_response_directives)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, Method, Uri};

    #[test]
    fn test_tracked_resources_dedup_keeps_first() {
        let keys = TrackedResources::new(["b", "a", "b", "c", "a"]);
        assert_eq!(keys.as_slice(), ["b", "a", "c"]);
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_tracked_resources_shared_without_copy() {
        let keys = TrackedResources::new(["a", "b"]);
        let shared = keys.clone();
        assert!(std::ptr::eq(keys.as_slice(), shared.as_slice()));
    }

    #[test]
    fn test_cache_control_builder() {
        assert_eq!(CacheControl::new().build(), "no-cache");
        assert_eq!(
            CacheControl::new().private().max_age(60).must_revalidate().build(),
            "private, max-age=60, must-revalidate"
        );
        assert_eq!(CacheControl::new().no_cache().no_cache().build(), "no-cache");
        assert_eq!(
            CacheControl::new().public().directive("stale-if-error=30").to_string(),
            "public, stale-if-error=30"
        );
    }

    #[test]
    fn test_builder_defaults() {
        let options = TrackOptions::builder().build().unwrap();
        assert!(options.keys().is_empty());
        assert_eq!(options.cache_control(), "no-cache");
        assert_eq!(options.invalid_request_directives(), ["no-store", "no-transform"]);
        assert_eq!(
            options.invalid_response_directives(),
            ["no-store", "no-transform", "immutable"]
        );
        assert!(options.provider_id().is_none());
    }

    #[test]
    fn test_builder_normalizes_directives() {
        let options = TrackOptions::builder()
            .invalid_request_directives([" No-Store "])
            .build()
            .unwrap();
        assert_eq!(options.invalid_request_directives(), ["no-store"]);

        let err = TrackOptions::builder()
            .invalid_response_directives(["  "])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_builder_rejects_bad_header() {
        let err = TrackOptions::builder()
            .cache_control("max-age=60\n")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHeader(_)));
    }

    #[test]
    fn test_suffix_and_filter() {
        let options = TrackOptions::builder()
            .keys(["roles", "roles"])
            .suffix(|ctx| ctx.path().trim_start_matches('/').to_string())
            .filter(|ctx| ctx.headers.contains_key("x-track"))
            .build()
            .unwrap();
        assert_eq!(options.keys().as_slice(), ["roles"]);

        let method = Method::GET;
        let uri: Uri = "/roles".parse().unwrap();
        let headers = HeaderMap::new();
        let ctx = RequestContext::new(&method, &uri, &headers);

        assert_eq!(options.suffix_for(&ctx), "roles");
        assert!(!options.passes_filter(&ctx));
        assert!(TrackOptions::default().passes_filter(&ctx));
        assert_eq!(TrackOptions::default().suffix_for(&ctx), "");
    }
}
