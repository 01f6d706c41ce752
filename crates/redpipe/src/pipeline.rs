//! The pipeline handle: stage registration, submission, and the tick driver.
//!
//! A [`Pipeline`] owns an ordered list of stages, each with its own queue,
//! plus a [`TopicBus`]. Submitted messages enter stage 0; a driver task
//! dequeues exactly one message per tick, runs its stage, and yields back to
//! the runtime before the next tick. Messages forwarded past the last stage
//! are published on the bus; when nothing is pending and no node holds an
//! async lock, the batch's [`Stats`] are published on [`topics::FINISHED`].

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::bus::{Subscription, SubscriptionId, TopicBus};
use crate::config::PipelineConfig;
use crate::error::panic_message;
use crate::message::Message;
use crate::node::Node;
use crate::scheduler::{Admission, Route, Scheduler, Step};
use crate::stats::Stats;
use crate::topics::{self, Event};
use crate::traits::{Stage, StageResult};

struct Shared {
    id: Uuid,
    config: PipelineConfig,
    bus: TopicBus,
    scheduler: Mutex<Scheduler>,
}

/// Multi-stage message pipeline with an embedded topic bus.
///
/// Cloning yields another handle to the same pipeline. Registration and
/// submission methods return `&Self` for chaining:
///
/// ```ignore
/// let pipeline = Pipeline::new();
/// pipeline
///     .pipe(|msg, _node| Ok(Some(msg)))
///     .on(Event::Finished, |msg| println!("done: {}", msg.payload))
///     .send(Message::new("orders", 1));
/// ```
///
/// Ticks are scheduled on the ambient tokio runtime; without one, pending
/// work is drained inline by the call that submitted it.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Shared>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let scheduler = Scheduler::new(config.insertion);
        Self {
            inner: Arc::new(Shared {
                id: Uuid::new_v4(),
                config,
                bus: TopicBus::new(),
                scheduler: Mutex::new(scheduler),
            }),
        }
    }

    /// Unique id of this pipeline instance (for log correlation).
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// The bus outputs and lifecycle events are published on.
    pub fn bus(&self) -> &TopicBus {
        &self.inner.bus
    }

    fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
        self.inner
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ── Stages ──────────────────────────────────────────────────────────

    /// Append a stage given as a closure.
    pub fn pipe<F>(&self, stage: F) -> &Self
    where
        F: Fn(Message, &Node) -> StageResult + Send + Sync + 'static,
    {
        self.pipe_stage(stage)
    }

    /// Append a stage.
    pub fn pipe_stage<S>(&self, stage: S) -> &Self
    where
        S: Stage + 'static,
    {
        let count = self.scheduler().add_stage(Arc::new(stage));
        debug!(pipeline = %self.name(), stages = count, "stage added");
        self
    }

    pub fn stage_count(&self) -> usize {
        self.scheduler().stage_count()
    }

    // ── Submission ──────────────────────────────────────────────────────

    /// Submit a message to stage 0. An empty topic is replaced by the
    /// configured default topic.
    ///
    /// If the pipeline was idle, the first tick runs before this returns.
    /// Without stages the call does nothing.
    pub fn send(&self, mut message: Message) -> &Self {
        if message.topic.is_empty() {
            message.topic = self.inner.config.default_topic.clone();
        }
        let admission = self.scheduler().submit(message);
        match admission {
            Admission::Rejected => {
                debug!(pipeline = %self.name(), "no stages configured, dropping submission")
            }
            Admission::Queued => {}
            Admission::Woke => self.kick(),
        }
        self
    }

    /// Submit loosely-typed JSON: the topic defaults when missing, empty or
    /// not a string, the payload defaults to `null`. Non-objects are ignored.
    pub fn send_value(&self, value: Value) -> &Self {
        match Message::from_input(value, &self.inner.config.default_topic) {
            Some(message) => self.send(message),
            None => {
                debug!(pipeline = %self.name(), "ignoring non-object submission");
                self
            }
        }
    }

    // ── Bus ─────────────────────────────────────────────────────────────

    /// Register a subscriber. Returns `None` for an empty topic.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> Option<Subscription>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(topic, callback)
    }

    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        self.inner.bus.unsubscribe(topic, id)
    }

    /// Subscribe to one of the convenience events.
    pub fn on<F>(&self, event: Event, callback: F) -> &Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(event.topic(), callback);
        self
    }

    /// Subscribe by event name (`"data"`, `"error"`, `"finished"`).
    /// Unknown names register nothing.
    pub fn on_named<F>(&self, name: &str, callback: F) -> &Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        match name.parse::<Event>() {
            Ok(event) => self.on(event, callback),
            Err(e) => {
                debug!(pipeline = %self.name(), error = %e, "ignoring subscription");
                self
            }
        }
    }

    /// Publish directly on the bus, optionally under another topic.
    pub fn publish(&self, message: &Message, topic: Option<&str>) -> &Self {
        self.inner.bus.publish(message, topic);
        self
    }

    // ── Introspection ───────────────────────────────────────────────────

    /// Counters of the batch in progress.
    pub fn stats(&self) -> Stats {
        self.scheduler().stats()
    }

    /// Messages waiting across all stage queues.
    pub fn pending(&self) -> usize {
        self.scheduler().pending()
    }

    /// Nodes currently holding an async lock.
    pub fn async_locks(&self) -> usize {
        self.scheduler().async_locks()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler().is_running()
    }

    // ── Driver ──────────────────────────────────────────────────────────

    /// Start ticking if no driver is active: the first tick runs inline,
    /// the rest on a driver task.
    fn kick(&self) {
        if !self.scheduler().claim_driver() {
            return;
        }
        if self.step() {
            self.drive();
        }
    }

    fn drive(&self) {
        match Handle::try_current() {
            Ok(handle) => {
                let pipeline = self.clone();
                handle.spawn(async move {
                    loop {
                        tokio::task::yield_now().await;
                        if !pipeline.step() {
                            break;
                        }
                    }
                    trace!(pipeline = %pipeline.name(), "driver idle");
                });
            }
            Err(_) => {
                trace!(pipeline = %self.name(), "no tokio runtime, draining inline");
                while self.step() {}
            }
        }
    }

    /// Run one tick. Returns `false` once the pipeline has gone idle.
    fn step(&self) -> bool {
        let step = self.scheduler().next_step();
        match step {
            Step::Idle { finished } => {
                if let Some(stats) = finished {
                    self.publish_finished(stats);
                }
                false
            }
            Step::Run {
                index,
                message,
                stage,
            } => {
                self.run_stage(index, message, stage.as_ref());
                self.scheduler().complete(index);
                true
            }
        }
    }

    fn run_stage(&self, index: usize, message: Message, stage: &dyn Stage) {
        let node = Node::new(self.clone(), index, message.clone());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| stage.process(message, &node)));

        let failure = match outcome {
            Ok(Ok(Some(output))) => {
                node.send(output);
                return;
            }
            Ok(Ok(None)) => return,
            Ok(Err(e)) => format!("{e:#}"),
            Err(payload) => format!("stage panicked: {}", panic_message(payload.as_ref())),
        };

        self.scheduler().record_error();
        warn!(pipeline = %self.name(), stage = index, error = %failure, "stage failed");
        self.inner
            .bus
            .publish(&Message::stage_error(failure, node.message()), None);
    }

    // ── Node callbacks ──────────────────────────────────────────────────

    pub(crate) fn route(&self, node: &Node, target: usize, message: Message) {
        let route = self.scheduler().route(target, message);
        match route {
            Route::Queued(Admission::Woke) => {
                debug!(pipeline = %self.name(), stage = target, "work arrived while idle");
                self.kick();
            }
            Route::Queued(_) => {}
            Route::Output(message) => {
                debug!(pipeline = %self.name(), topic = %message.topic, "pipeline output");
                self.inner.bus.publish(&message, None);
                node.unlock();
                self.finish_if_quiescent();
            }
        }
    }

    pub(crate) fn lock_async(&self) {
        self.scheduler().lock_async();
    }

    pub(crate) fn release_async(&self) {
        self.scheduler().release_async();
        self.finish_if_quiescent();
    }

    fn finish_if_quiescent(&self) {
        let finished = self.scheduler().finish_if_quiescent();
        if let Some(stats) = finished {
            self.publish_finished(stats);
        }
    }

    fn publish_finished(&self, stats: Stats) {
        info!(
            pipeline = %self.name(),
            inputs = stats.inputs,
            outputs = stats.outputs,
            errors = stats.errors,
            "batch finished"
        );
        self.inner
            .bus
            .publish(&Message::new(topics::FINISHED, stats.to_payload()), None);
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.inner.id)
            .field("name", &self.inner.config.name)
            .finish()
    }
}
