use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::message::Message;
use crate::pipeline::Pipeline;

const IDLE: u8 = 0;
const LOCKED: u8 = 1;
const RELEASED: u8 = 2;

/// Progress of a node's single-use async lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncState {
    /// Never locked.
    Idle,
    /// Holding the lock: the batch cannot finish.
    Locked,
    /// Lock released; further lock/unlock calls are no-ops.
    Released,
}

/// Handle given to a stage for the message it is processing.
///
/// Cloning is cheap and clones share the async lock, so a clone can be moved
/// into deferred work (a spawned task, a timer) that forwards results and
/// releases the lock when done.
#[derive(Clone)]
pub struct Node {
    pipeline: Pipeline,
    index: usize,
    message: Arc<Message>,
    state: Arc<AtomicU8>,
}

impl Node {
    pub(crate) fn new(pipeline: Pipeline, index: usize, message: Message) -> Self {
        Self {
            pipeline,
            index,
            message: Arc::new(message),
            state: Arc::new(AtomicU8::new(IDLE)),
        }
    }

    /// Index of the stage this node belongs to.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The message as it was dequeued, before the stage touched it.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Forward `message` to the next stage, or publish it as a pipeline
    /// output when this is the last stage.
    pub fn send(&self, message: Message) {
        self.pipeline.route(self, self.index + 1, message);
    }

    /// Forward loosely-typed JSON. Values without a string `topic` and a
    /// `payload` key are dropped.
    pub fn send_value(&self, value: Value) {
        match Message::from_value(value) {
            Ok(message) => self.send(message),
            Err(e) => debug!(stage = self.index, error = %e, "dropping malformed message"),
        }
    }

    /// Queue the original message for another pass through this stage.
    pub fn retry(&self) {
        self.pipeline
            .route(self, self.index, self.message.as_ref().clone());
    }

    /// Take the async lock, keeping the batch open until [`unlock`](Self::unlock).
    ///
    /// Returns `false` if the lock was already taken (or released) before.
    pub fn lock(&self) -> bool {
        let taken = self
            .state
            .compare_exchange(IDLE, LOCKED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if taken {
            self.pipeline.lock_async();
        }
        taken
    }

    /// Release the async lock. Returns `false` unless the lock was held.
    ///
    /// Forwarding past the last stage releases it implicitly.
    pub fn unlock(&self) -> bool {
        let released = self
            .state
            .compare_exchange(LOCKED, RELEASED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if released {
            self.pipeline.release_async();
        }
        released
    }

    pub fn async_state(&self) -> AsyncState {
        match self.state.load(Ordering::Acquire) {
            IDLE => AsyncState::Idle,
            LOCKED => AsyncState::Locked,
            _ => AsyncState::Released,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.async_state() == AsyncState::Locked
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("pipeline", &self.pipeline.name())
            .field("index", &self.index)
            .field("topic", &self.message.topic)
            .field("async", &self.async_state())
            .finish()
    }
}
