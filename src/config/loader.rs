use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

use super::schema::{Config, SourceConfig};
use crate::error::{ConfigError, Result};
use crate::source::sqlite::validate_table_name;
use crate::tag::Epoch;

const ENV_PREFIX: &str = "TRACKER_";

pub async fn load_from_env_or_file() -> Result<Config> {
    let config: Config = Figment::new()
        .merge(Toml::file("etag-tracker.toml"))
        .merge(Json::file("etag-tracker.json"))
        .merge(Yaml::file("etag-tracker.yaml"))
        .merge(Yaml::file("etag-tracker.yml"))
        // TRACKER_SERVER_PORT=9000 overrides server.port
        .merge(Env::prefixed(ENV_PREFIX).split("_"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    finish(config)
}

pub async fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::new().merge(Toml::file(path)),
        Some("json") => Figment::new().merge(Json::file(path)),
        Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into(),
            )
            .into())
        }
    };

    let config: Config = figment
        .merge(Env::prefixed(ENV_PREFIX).split("_"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    finish(config)
}

fn finish(config: Config) -> Result<Config> {
    let config = apply_env_substitutions(config)?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        return Err(ConfigError::Validation("Server port must be greater than 0".into()).into());
    }

    if let Some(epoch) = &config.epoch {
        Epoch::new(epoch.as_str())?;
    }

    let mut ids = HashSet::new();
    for source in &config.sources {
        let id = source.id();
        if id.trim().is_empty() {
            return Err(ConfigError::Validation("Source id must not be empty".into()).into());
        }
        if !ids.insert(id) {
            return Err(
                ConfigError::Validation(format!("Source '{}' is configured twice", id)).into(),
            );
        }

        match source {
            SourceConfig::Sqlite { path, tables, .. } => {
                if path.trim().is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "Source '{}' has an empty database path",
                        id
                    ))
                    .into());
                }
                for table in tables {
                    validate_table_name(table).map_err(|_| {
                        ConfigError::Validation(format!(
                            "Source '{}' has invalid table name '{}'",
                            id, table
                        ))
                    })?;
                }
            }
            SourceConfig::Memory { tables, .. } => {
                if tables.iter().any(|t| t.trim().is_empty()) {
                    return Err(ConfigError::Validation(format!(
                        "Source '{}' has an empty key",
                        id
                    ))
                    .into());
                }
            }
        }
    }

    let mut paths = HashSet::new();
    for route in &config.routes {
        if !route.path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "Route '{}' must start with '/'",
                route.path
            ))
            .into());
        }
        if !paths.insert(route.path.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Route '{}' is configured twice",
                route.path
            ))
            .into());
        }

        match &route.source {
            Some(source) if !ids.contains(source.as_str()) => {
                return Err(ConfigError::Validation(format!(
                    "Route '{}' references unknown source '{}'",
                    route.path, source
                ))
                .into());
            }
            None if config.sources.is_empty() => {
                return Err(ConfigError::Validation(format!(
                    "Route '{}' needs a source but none are configured",
                    route.path
                ))
                .into());
            }
            _ => {}
        }
    }

    Ok(())
}

fn apply_env_substitutions(mut config: Config) -> Result<Config> {
    if let Some(epoch) = &mut config.epoch {
        *epoch = substitute_env_vars(epoch)?;
    }

    config.defaults.cache_control = substitute_env_vars(&config.defaults.cache_control)?;

    for source in config.sources.iter_mut() {
        if let SourceConfig::Sqlite { path, .. } = source {
            *path = substitute_env_vars(path)?;
        }
    }

    for route in config.routes.iter_mut() {
        if let Some(cache_control) = &mut route.cache_control {
            *cache_control = substitute_env_vars(cache_control)?;
        }
    }

    Ok(config)
}

/// Expands `${VAR}` and `${VAR:-default}`.
fn substitute_env_vars(input: &str) -> Result<String> {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER
        .get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern is valid"));

    let mut result = input.to_string();
    for cap in re.captures_iter(input) {
        let expr = &cap[1];
        let (name, default) = match expr.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (expr, None),
        };

        let value = match (std::env::var(name), default) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.to_string(),
            (Err(_), None) => {
                return Err(ConfigError::EnvVar(format!(
                    "Environment variable '{}' not found",
                    name
                ))
                .into())
            }
        };
        result = result.replace(&cap[0], &value);
    }

    Ok(result)
}
