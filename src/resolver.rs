//! Provider registry and per-request provider resolution.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::{ConfigError, Result};
use crate::options::TrackOptions;
use crate::source::SourceProvider;

/// Collects providers before the registry is frozen.
#[derive(Default)]
pub struct ProviderRegistryBuilder {
    providers: Vec<Arc<dyn SourceProvider>>,
}

impl ProviderRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, provider: Arc<dyn SourceProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Freezes the registry. The first registered provider becomes the default.
    pub fn build(self) -> std::result::Result<ProviderRegistry, ConfigError> {
        let mut by_id = HashMap::with_capacity(self.providers.len());
        for provider in &self.providers {
            let id = provider.id().to_string();
            if by_id.contains_key(&id) {
                return Err(ConfigError::Validation(format!(
                    "Source provider '{}' registered twice",
                    id
                )));
            }
            by_id.insert(id, Arc::clone(provider));
        }

        Ok(ProviderRegistry {
            default: self.providers.into_iter().next(),
            by_id,
        })
    }
}

/// Immutable set of long-lived providers, keyed by id.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    by_id: HashMap<String, Arc<dyn SourceProvider>>,
    default: Option<Arc<dyn SourceProvider>>,
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::new()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn SourceProvider>> {
        self.by_id.get(id)
    }

    pub fn default_provider(&self) -> Option<&Arc<dyn SourceProvider>> {
        self.default.as_ref()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.by_id.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("ids", &self.by_id.keys().collect::<Vec<_>>())
            .field("default", &self.default.as_ref().map(|p| p.id().to_string()))
            .finish()
    }
}

/// Provider acquired for one request.
///
/// A borrowed provider is shared with the registry or the options; an owned
/// provider was built for this request and is released when the lease drops.
pub enum ProviderLease {
    Borrowed(Arc<dyn SourceProvider>),
    Owned(Box<dyn SourceProvider>),
}

impl ProviderLease {
    pub fn is_owned(&self) -> bool {
        matches!(self, ProviderLease::Owned(_))
    }

    pub fn provider(&self) -> &(dyn SourceProvider + 'static) {
        match self {
            ProviderLease::Borrowed(provider) => provider.as_ref(),
            ProviderLease::Owned(provider) => provider.as_ref(),
        }
    }
}

impl Deref for ProviderLease {
    type Target = dyn SourceProvider;

    fn deref(&self) -> &Self::Target {
        self.provider()
    }
}

impl Drop for ProviderLease {
    fn drop(&mut self) {
        if let ProviderLease::Owned(provider) = self {
            tracing::debug!(source_id = provider.id(), "Releasing request-owned provider");
        }
    }
}

impl fmt::Debug for ProviderLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderLease")
            .field("id", &self.provider().id())
            .field("owned", &self.is_owned())
            .finish()
    }
}

/// Picks the provider for a request, most specific configuration first:
/// explicit id, then a supplied instance, then a factory, then the registry default.
#[derive(Debug, Clone)]
pub struct ProviderResolver {
    registry: Arc<ProviderRegistry>,
}

impl ProviderResolver {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn resolve(&self, ctx: &RequestContext<'_>, options: &TrackOptions) -> Result<ProviderLease> {
        if let Some(id) = options.provider_id() {
            let provider = self
                .registry
                .get(id)
                .ok_or_else(|| ConfigError::ProviderNotRegistered(id.to_string()))?;
            tracing::debug!(trace_id = %ctx.trace_id, source_id = id, "Resolved provider by id");
            return Ok(ProviderLease::Borrowed(Arc::clone(provider)));
        }

        if let Some(provider) = options.provider() {
            tracing::debug!(
                trace_id = %ctx.trace_id,
                source_id = provider.id(),
                "Using configured provider instance"
            );
            return Ok(ProviderLease::Borrowed(Arc::clone(provider)));
        }

        if let Some(factory) = options.provider_factory() {
            let provider = factory(ctx)?;
            tracing::debug!(
                trace_id = %ctx.trace_id,
                source_id = provider.id(),
                "Created request-owned provider"
            );
            return Ok(ProviderLease::Owned(provider));
        }

        let provider = self
            .registry
            .default_provider()
            .ok_or(ConfigError::NoProviderRegistered)?;
        tracing::debug!(
            trace_id = %ctx.trace_id,
            source_id = provider.id(),
            "Using default provider"
        );
        Ok(ProviderLease::Borrowed(Arc::clone(provider)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SourceError, TrackerError};
    use crate::source::MemorySource;
    use http::{HeaderMap, Method, Uri};

    fn memory(id: &str) -> Arc<dyn SourceProvider> {
        Arc::new(MemorySource::new(id))
    }

    fn registry(ids: &[&str]) -> ProviderResolver {
        let builder = ids
            .iter()
            .fold(ProviderRegistry::builder(), |b, id| b.register(memory(id)));
        ProviderResolver::new(Arc::new(builder.build().unwrap()))
    }

    fn resolve(resolver: &ProviderResolver, options: &TrackOptions) -> Result<ProviderLease> {
        let method = Method::GET;
        let uri: Uri = "/roles".parse().unwrap();
        let headers = HeaderMap::new();
        let ctx = RequestContext::new(&method, &uri, &headers);
        resolver.resolve(&ctx, options)
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let err = ProviderRegistry::builder()
            .register(memory("main"))
            .register(memory("main"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_explicit_id_wins_over_everything() {
        let resolver = registry(&["first", "second"]);
        let options = TrackOptions::builder()
            .provider_id("second")
            .provider(memory("instance"))
            .provider_factory(|_| Ok(Box::new(MemorySource::new("factory"))))
            .build()
            .unwrap();

        let lease = resolve(&resolver, &options).unwrap();
        assert_eq!(lease.id(), "second");
        assert!(!lease.is_owned());
    }

    #[test]
    fn test_instance_wins_over_factory() {
        let resolver = registry(&["first"]);
        let options = TrackOptions::builder()
            .provider(memory("instance"))
            .provider_factory(|_| Ok(Box::new(MemorySource::new("factory"))))
            .build()
            .unwrap();

        let lease = resolve(&resolver, &options).unwrap();
        assert_eq!(lease.id(), "instance");
        assert!(!lease.is_owned());
    }

    #[test]
    fn test_factory_result_is_owned() {
        let resolver = registry(&["first"]);
        let options = TrackOptions::builder()
            .provider_factory(|ctx| Ok(Box::new(MemorySource::new(ctx.path()))))
            .build()
            .unwrap();

        let lease = resolve(&resolver, &options).unwrap();
        assert_eq!(lease.id(), "/roles");
        assert!(lease.is_owned());
    }

    #[test]
    fn test_factory_error_propagates() {
        let resolver = registry(&["first"]);
        let options = TrackOptions::builder()
            .provider_factory(|_| Err(SourceError::Unavailable("pool exhausted".into())))
            .build()
            .unwrap();

        let err = resolve(&resolver, &options).unwrap_err();
        assert!(matches!(err, TrackerError::Source(SourceError::Unavailable(_))));
    }

    #[test]
    fn test_default_is_first_registered() {
        let resolver = registry(&["first", "second", "third"]);
        let lease = resolve(&resolver, &TrackOptions::default()).unwrap();
        assert_eq!(lease.id(), "first");
        assert!(!lease.is_owned());
    }

    #[test]
    fn test_unknown_id_is_configuration_error() {
        let resolver = registry(&["first"]);
        let options = TrackOptions::builder().provider_id("missing").build().unwrap();

        let err = resolve(&resolver, &options).unwrap_err();
        assert!(matches!(
            err,
            TrackerError::Config(ConfigError::ProviderNotRegistered(id)) if id == "missing"
        ));
    }

    #[test]
    fn test_empty_registry() {
        let resolver = registry(&[]);
        let err = resolve(&resolver, &TrackOptions::default()).unwrap_err();
        assert!(matches!(err, TrackerError::Config(ConfigError::NoProviderRegistered)));

        // an explicit instance needs no registry
        let options = TrackOptions::builder().provider(memory("instance")).build().unwrap();
        assert_eq!(resolve(&resolver, &options).unwrap().id(), "instance");
    }
}
