pub mod bus;
pub mod config;
pub mod error;
pub mod message;
pub mod node;
pub mod pipeline;
pub mod queue;
mod scheduler;
pub mod stats;
pub mod topics;
pub mod traits;

pub use bus::{Subscriber, Subscription, SubscriptionId, TopicBus};
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use message::Message;
pub use node::{AsyncState, Node};
pub use pipeline::Pipeline;
pub use queue::InsertionPolicy;
pub use stats::Stats;
pub use topics::Event;
pub use traits::{Stage, StageResult};
