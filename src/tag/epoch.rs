//! Process-lifetime epoch segment of the version tag.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{ConfigError, Result};

/// Leading tag segment that changes whenever the running binary changes.
///
/// Tags minted by a binary with a different epoch never compare equal, so a
/// deployment invalidates every tag clients hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Epoch(Arc<str>);

impl Epoch {
    /// Explicit epoch, e.g. pinned in configuration so replicas share tags.
    pub fn new(value: impl Into<String>) -> std::result::Result<Self, ConfigError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ConfigError::Validation("Epoch must not be empty".into()));
        }
        if let Some(c) = value
            .chars()
            .find(|c| !c.is_ascii_graphic() || *c == '"')
        {
            return Err(ConfigError::Validation(format!(
                "Epoch contains invalid character {:?}",
                c
            )));
        }
        Ok(Self(value.into()))
    }

    /// Microseconds since the Unix epoch of `time`, in decimal.
    pub fn from_system_time(time: SystemTime) -> Self {
        let time: DateTime<Utc> = time.into();
        Self(time.timestamp_micros().to_string().into())
    }

    /// Epoch derived from the current wall clock; distinct for every process start.
    pub fn startup() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Epoch derived from the modification time of the running executable.
    pub fn from_executable() -> Result<Self> {
        let path = std::env::current_exe()?;
        let modified = std::fs::metadata(&path)?.modified()?;
        Ok(Self::from_system_time(modified))
    }

    /// Uses `configured` when present, then the executable's build time,
    /// then the process start time.
    pub fn detect(configured: Option<&str>) -> std::result::Result<Self, ConfigError> {
        if let Some(value) = configured {
            return Self::new(value);
        }

        match Self::from_executable() {
            Ok(epoch) => Ok(epoch),
            Err(e) => {
                tracing::warn!(
                    "Could not read executable timestamp ({}), falling back to startup time",
                    e
                );
                Ok(Self::startup())
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
