pub mod loader;
pub mod schema;

pub use loader::{load_from_env_or_file, load_from_path, validate};
pub use schema::{Config, DefaultsConfig, RouteConfig, ServerConfig, SourceConfig};

use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::options::TrackOptions;
use crate::resolver::ProviderRegistry;
use crate::routes::RouteTable;
use crate::source::{MemorySource, SourceProvider, SqliteSource};

/// Providers opened from configuration, with typed handles kept for the
/// application's own use.
pub struct Sources {
    pub registry: ProviderRegistry,
    pub sqlite: HashMap<String, Arc<SqliteSource>>,
    pub memory: HashMap<String, Arc<MemorySource>>,
}

/// Opens every configured source and enables tracking on its tables.
pub async fn open_sources(config: &Config, cancel: &CancellationToken) -> Result<Sources> {
    let mut builder = ProviderRegistry::builder();
    let mut sqlite = HashMap::new();
    let mut memory = HashMap::new();

    for source in &config.sources {
        match source {
            SourceConfig::Sqlite { id, path, tables } => {
                let provider = Arc::new(SqliteSource::open(id.as_str(), path)?);
                for table in tables {
                    provider.enable_tracking(table, cancel).await?;
                }
                tracing::info!(source_id = %id, path = %path, tables = tables.len(), "Opened SQLite source");
                sqlite.insert(id.clone(), Arc::clone(&provider));
                builder = builder.register(provider);
            }
            SourceConfig::Memory { id, tables } => {
                let provider = Arc::new(MemorySource::with_keys(id.as_str(), tables.iter().cloned()));
                tracing::info!(source_id = %id, keys = tables.len(), "Created in-memory source");
                memory.insert(id.clone(), Arc::clone(&provider));
                builder = builder.register(provider);
            }
        }
    }

    Ok(Sources {
        registry: builder.build()?,
        sqlite,
        memory,
    })
}

/// Freezes the configured routes, applying `defaults` where a route is silent.
pub fn build_routes(config: &Config) -> Result<RouteTable> {
    let defaults = &config.defaults;
    let mut table = RouteTable::builder();

    for route in &config.routes {
        let mut options = TrackOptions::builder()
            .keys(route.tables.iter().cloned())
            .cache_control(
                route
                    .cache_control
                    .clone()
                    .unwrap_or_else(|| defaults.cache_control.clone()),
            )
            .invalid_request_directives(defaults.invalid_request_directives.iter().cloned())
            .invalid_response_directives(defaults.invalid_response_directives.iter().cloned());
        if let Some(source) = &route.source {
            options = options.provider_id(source.as_str());
        }
        table = table.route(route.path.as_str(), options.build()?);
    }

    Ok(table.build()?)
}
