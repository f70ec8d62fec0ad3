use serde::{Deserialize, Serialize};

use crate::options::{
    DEFAULT_CACHE_CONTROL, DEFAULT_INVALID_REQUEST_DIRECTIVES, DEFAULT_INVALID_RESPONSE_DIRECTIVES,
};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Pins the tag epoch, e.g. so several replicas issue identical tags.
    #[serde(default)]
    pub epoch: Option<String>,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Values applied to every route unless the route overrides them.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultsConfig {
    #[serde(default = "default_cache_control")]
    pub cache_control: String,
    #[serde(default = "default_invalid_request_directives")]
    pub invalid_request_directives: Vec<String>,
    #[serde(default = "default_invalid_response_directives")]
    pub invalid_response_directives: Vec<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            cache_control: default_cache_control(),
            invalid_request_directives: default_invalid_request_directives(),
            invalid_response_directives: default_invalid_response_directives(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceConfig {
    #[serde(rename_all = "camelCase")]
    Sqlite {
        id: String,
        path: String,
        /// Tables to enable change tracking on at startup.
        #[serde(default)]
        tables: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Memory {
        id: String,
        #[serde(default)]
        tables: Vec<String>,
    },
}

impl SourceConfig {
    pub fn id(&self) -> &str {
        match self {
            SourceConfig::Sqlite { id, .. } | SourceConfig::Memory { id, .. } => id,
        }
    }

    pub fn tables(&self) -> &[String] {
        match self {
            SourceConfig::Sqlite { tables, .. } | SourceConfig::Memory { tables, .. } => tables,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    pub path: String,
    /// Tracked keys in fold order.
    #[serde(default)]
    pub tables: Vec<String>,
    /// Source id; the first configured source when omitted.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub cache_control: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cache_control() -> String {
    DEFAULT_CACHE_CONTROL.to_string()
}

fn default_invalid_request_directives() -> Vec<String> {
    DEFAULT_INVALID_REQUEST_DIRECTIVES
        .iter()
        .map(|d| d.to_string())
        .collect()
}

fn default_invalid_response_directives() -> Vec<String> {
    DEFAULT_INVALID_RESPONSE_DIRECTIVES
        .iter()
        .map(|d| d.to_string())
        .collect()
}

impl Config {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.defaults.cache_control, "no-cache");
        assert_eq!(
            config.defaults.invalid_response_directives,
            vec!["no-store", "no-transform", "immutable"]
        );
        assert!(config.sources.is_empty());
        assert!(config.epoch.is_none());
    }

    #[test]
    fn test_yaml_document() {
        let yaml = r#"
server:
  port: 9000
epoch: "build-42"
sources:
  - type: sqlite
    id: main
    path: ./app.db
    tables: [roles, users]
  - type: memory
    id: flags
routes:
  - path: /roles
    tables: [roles]
  - path: /users
    tables: [users, roles]
    source: main
    cacheControl: "private, max-age=0"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:9000");
        assert_eq!(config.epoch.as_deref(), Some("build-42"));
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].tables(), ["roles", "users"]);
        assert!(matches!(config.source("flags"), Some(SourceConfig::Memory { .. })));
        assert_eq!(config.routes[1].source.as_deref(), Some("main"));
        assert_eq!(
            config.routes[1].cache_control.as_deref(),
            Some("private, max-age=0")
        );
    }
}
