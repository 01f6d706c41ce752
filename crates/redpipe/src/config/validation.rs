use super::types::PipelineConfig;
use crate::error::PipelineError;
use crate::topics;

impl PipelineConfig {
    /// Validate the config: non-empty name, usable default topic.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::Config("pipeline name must not be empty".into()));
        }
        self.validate_default_topic()
    }

    /// The default topic must be ordinary, otherwise plain submissions would
    /// masquerade as lifecycle events.
    fn validate_default_topic(&self) -> Result<(), PipelineError> {
        if self.default_topic.is_empty() {
            return Err(PipelineError::Config("default_topic must not be empty".into()));
        }
        if topics::is_reserved(&self.default_topic) {
            return Err(PipelineError::Config(format!(
                "default_topic '{}' is reserved",
                self.default_topic
            )));
        }
        Ok(())
    }
}
