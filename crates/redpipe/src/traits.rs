use crate::message::Message;
use crate::node::Node;

/// Outcome of one stage invocation.
///
/// `Ok(Some(msg))` forwards `msg` to the next stage, `Ok(None)` forwards
/// nothing (the stage may already have used the [`Node`]), and `Err` counts
/// as a stage failure published on the error topic.
pub type StageResult = anyhow::Result<Option<Message>>;

/// One transformation step of a pipeline.
///
/// Invoked synchronously by the scheduler, one message at a time. Deferred
/// work must go through [`Node::lock`] / [`Node::unlock`] rather than block.
pub trait Stage: Send + Sync {
    fn process(&self, message: Message, node: &Node) -> StageResult;
}

impl<F> Stage for F
where
    F: Fn(Message, &Node) -> StageResult + Send + Sync,
{
    fn process(&self, message: Message, node: &Node) -> StageResult {
        self(message, node)
    }
}
