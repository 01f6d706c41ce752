use serde::{Deserialize, Serialize};

use crate::queue::InsertionPolicy;
use crate::topics;

/// Settings for a single [`Pipeline`](crate::Pipeline).
///
/// ```toml
/// name = "ingest"
/// insertion = "fifo"
/// default_topic = "message"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name attached to every log line of the pipeline.
    #[serde(default = "default_name")]
    pub name: String,

    /// Queue placement of forwarded messages.
    #[serde(default)]
    pub insertion: InsertionPolicy,

    /// Topic given to submissions that arrive without one.
    #[serde(default = "default_topic")]
    pub default_topic: String,
}

fn default_name() -> String {
    "redpipe".into()
}

fn default_topic() -> String {
    topics::DEFAULT.into()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            insertion: InsertionPolicy::default(),
            default_topic: default_topic(),
        }
    }
}
