use std::path::Path;

use tracing::warn;

use crate::error::PipelineError;
use crate::queue::InsertionPolicy;

use super::types::PipelineConfig;

impl PipelineConfig {
    /// Parse config from a TOML string, apply env overrides, and validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, PipelineError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Default config with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_insertion(mut self, insertion: InsertionPolicy) -> Self {
        self.insertion = insertion;
        self
    }

    pub fn with_default_topic(mut self, topic: impl Into<String>) -> Self {
        self.default_topic = topic.into();
        self
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// - `REDPIPE_NAME` -> `name`
    /// - `REDPIPE_INSERTION` -> `insertion` (`fifo` | `random`)
    /// - `REDPIPE_DEFAULT_TOPIC` -> `default_topic`
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides read through `lookup` (keyed by env var name).
    pub(crate) fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("REDPIPE_NAME") {
            self.name = v;
        }
        if let Some(v) = lookup("REDPIPE_INSERTION") {
            match v.parse::<InsertionPolicy>() {
                Ok(policy) => self.insertion = policy,
                Err(e) => warn!(error = %e, "ignoring REDPIPE_INSERTION"),
            }
        }
        if let Some(v) = lookup("REDPIPE_DEFAULT_TOPIC") {
            self.default_topic = v;
        }
    }
}
