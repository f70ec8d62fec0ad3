//! Explicit route table mapping request paths to tracking options.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::options::TrackOptions;

#[derive(Default)]
pub struct RouteTableBuilder {
    routes: Vec<(String, TrackOptions)>,
    fallback: Option<TrackOptions>,
}

impl RouteTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, path: impl Into<String>, options: TrackOptions) -> Self {
        self.routes.push((path.into(), options));
        self
    }

    /// Options used for paths without their own route.
    pub fn fallback(mut self, options: TrackOptions) -> Self {
        self.fallback = Some(options);
        self
    }

    pub fn build(self) -> Result<RouteTable, ConfigError> {
        let mut routes = HashMap::with_capacity(self.routes.len());
        for (path, options) in self.routes {
            if !path.starts_with('/') {
                return Err(ConfigError::Validation(format!(
                    "Route '{}' must start with '/'",
                    path
                )));
            }
            if routes.contains_key(&path) {
                return Err(ConfigError::Validation(format!(
                    "Route '{}' configured twice",
                    path
                )));
            }
            tracing::debug!(path = %path, keys = ?options.keys().as_slice(), "Registered tracked route");
            routes.insert(path, Arc::new(options));
        }

        Ok(RouteTable {
            routes,
            fallback: self.fallback.map(Arc::new),
        })
    }
}

/// Frozen path → options lookup. Paths match exactly.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, Arc<TrackOptions>>,
    fallback: Option<Arc<TrackOptions>>,
}

impl RouteTable {
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::new()
    }

    pub fn lookup(&self, path: &str) -> Option<&Arc<TrackOptions>> {
        self.routes.get(path).or(self.fallback.as_ref())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.fallback.is_none()
    }
}
