//! Cursor state machine behind a [`Pipeline`](crate::Pipeline).
//!
//! Nothing here invokes stages or subscribers: each method mutates the
//! state and tells the caller what to do next, so the owning pipeline can
//! run callbacks with its lock released.
//!
//! Cursor fields:
//! - `reader`: stage the next scan starts from.
//! - `start`: lower bound hint, the earliest stage that may hold work.
//! - `nb_data`: messages pending across all queues.
//! - `nb_async`: nodes currently holding an async lock.
//! - `running`: a batch is in progress (set by submission, cleared on finish).
//! - `driving`: a driver owns the tick loop.

use std::sync::Arc;

use tracing::{trace, warn};

use crate::message::Message;
use crate::queue::{InsertionPolicy, StageQueue};
use crate::stats::Stats;
use crate::traits::Stage;

struct StageSlot {
    stage: Arc<dyn Stage>,
    queue: StageQueue,
}

/// Result of queueing a message.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Admission {
    /// No stages are configured; nothing was queued.
    Rejected,
    /// Queued behind other pending work.
    Queued,
    /// Queued into an idle pipeline; the caller must kick the driver.
    Woke,
}

/// Where a node's message went.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Route {
    Queued(Admission),
    /// Past the last stage: the message is a pipeline output.
    Output(Message),
}

/// What the driver should do after asking for the next message.
pub(crate) enum Step {
    Run {
        index: usize,
        message: Message,
        stage: Arc<dyn Stage>,
    },
    /// Nothing pending; the driver must stop. Carries the batch stats when
    /// this quiescence point completed a batch.
    Idle { finished: Option<Stats> },
}

pub(crate) struct Scheduler {
    slots: Vec<StageSlot>,
    insertion: InsertionPolicy,
    reader: usize,
    start: usize,
    nb_data: usize,
    nb_async: usize,
    running: bool,
    driving: bool,
    stats: Stats,
}

impl Scheduler {
    pub(crate) fn new(insertion: InsertionPolicy) -> Self {
        Self {
            slots: Vec::new(),
            insertion,
            reader: 0,
            start: 0,
            nb_data: 0,
            nb_async: 0,
            running: false,
            driving: false,
            stats: Stats::default(),
        }
    }

    pub(crate) fn add_stage(&mut self, stage: Arc<dyn Stage>) -> usize {
        self.slots.push(StageSlot {
            stage,
            queue: StageQueue::new(),
        });
        self.slots.len()
    }

    pub(crate) fn stage_count(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn pending(&self) -> usize {
        self.nb_data
    }

    pub(crate) fn async_locks(&self) -> usize {
        self.nb_async
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn stats(&self) -> Stats {
        self.stats
    }

    // ── Submission & forwarding ─────────────────────────────────────────

    /// Append an external submission to stage 0 and open (or extend) the batch.
    pub(crate) fn submit(&mut self, message: Message) -> Admission {
        let Some(first) = self.slots.first_mut() else {
            return Admission::Rejected;
        };
        first.queue.push_back(message);
        self.start = 0;
        self.stats.inputs += 1;
        self.running = true;

        if self.nb_data == 0 {
            self.nb_data = 1;
            self.reader = 0;
            Admission::Woke
        } else {
            self.nb_data += 1;
            Admission::Queued
        }
    }

    /// Queue `message` for stage `target`, or hand it back as an output when
    /// `target` is past the last stage.
    pub(crate) fn route(&mut self, target: usize, message: Message) -> Route {
        let count = self.slots.len();
        if target >= count {
            self.stats.outputs += 1;
            return Route::Output(message);
        }

        self.slots[target].queue.insert(message, self.insertion);
        self.start = self.start.min(target.saturating_sub(1));

        if self.nb_data == 0 {
            self.nb_data = 1;
            self.reader = self.start.max(self.reader % count);
            Route::Queued(Admission::Woke)
        } else {
            self.nb_data += 1;
            Route::Queued(Admission::Queued)
        }
    }

    // ── Tick loop ───────────────────────────────────────────────────────

    /// Claim the tick loop. Returns `false` when a driver is already active.
    pub(crate) fn claim_driver(&mut self) -> bool {
        if self.driving {
            return false;
        }
        self.driving = true;
        true
    }

    /// Dequeue the next message to run, scanning round-robin from `reader`.
    ///
    /// The scan wraps, so every stage is examined once per tick and a stale
    /// `start` can only shift the cursor, never hide pending work.
    pub(crate) fn next_step(&mut self) -> Step {
        let count = self.slots.len();
        if count == 0 || self.nb_data == 0 {
            return self.idle();
        }

        for offset in 0..count {
            let index = (self.reader + offset) % count;
            let slot = &mut self.slots[index];
            if let Some(message) = slot.queue.pop_front() {
                trace!(stage = index, pending = self.nb_data, "tick");
                return Step::Run {
                    index,
                    message,
                    stage: slot.stage.clone(),
                };
            }
            self.start = self.start.max(index + 1);
        }

        warn!(pending = self.nb_data, "pending count out of sync with stage queues, resetting");
        self.nb_data = 0;
        self.idle()
    }

    /// Account for the message taken from stage `index` and move the cursor.
    pub(crate) fn complete(&mut self, index: usize) {
        self.nb_data = self.nb_data.saturating_sub(1);
        let count = self.slots.len().max(1);
        self.reader = self.start.max((index + 1) % count);
    }

    fn idle(&mut self) -> Step {
        self.driving = false;
        let finished = if self.nb_async == 0 { self.finish() } else { None };
        Step::Idle { finished }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    pub(crate) fn record_error(&mut self) {
        self.stats.errors += 1;
    }

    pub(crate) fn lock_async(&mut self) {
        self.nb_async += 1;
    }

    pub(crate) fn release_async(&mut self) {
        self.nb_async = self.nb_async.saturating_sub(1);
    }

    /// Close the batch if nothing is pending and no node holds an async lock.
    pub(crate) fn finish_if_quiescent(&mut self) -> Option<Stats> {
        if self.nb_data == 0 && self.nb_async == 0 {
            self.finish()
        } else {
            None
        }
    }

    /// Close the running batch, returning its stats. `None` if no batch is open.
    fn finish(&mut self) -> Option<Stats> {
        if !self.running {
            return None;
        }
        self.running = false;
        Some(self.stats.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::traits::StageResult;

    fn identity() -> Arc<dyn Stage> {
        Arc::new(|msg: Message, _: &Node| -> StageResult { Ok(Some(msg)) })
    }

    fn scheduler(stages: usize) -> Scheduler {
        let mut sched = Scheduler::new(InsertionPolicy::Fifo);
        for _ in 0..stages {
            sched.add_stage(identity());
        }
        sched
    }

    /// Run one tick, returning (stage index, payload) of the processed message.
    fn tick(sched: &mut Scheduler) -> Option<(usize, i64)> {
        match sched.next_step() {
            Step::Run { index, message, .. } => {
                sched.complete(index);
                Some((index, message.payload.as_i64().unwrap()))
            }
            Step::Idle { .. } => None,
        }
    }

    #[test]
    fn submit_without_stages_is_rejected() {
        let mut sched = scheduler(0);
        assert_eq!(sched.submit(Message::new("t", 1)), Admission::Rejected);
        assert_eq!(sched.stats().inputs, 0);
        assert!(!sched.is_running());
    }

    #[test]
    fn first_submission_wakes_and_later_ones_queue() {
        let mut sched = scheduler(1);
        assert_eq!(sched.submit(Message::new("t", 1)), Admission::Woke);
        assert_eq!(sched.submit(Message::new("t", 2)), Admission::Queued);
        assert_eq!(sched.pending(), 2);
        assert_eq!(sched.stats().inputs, 2);
        assert!(sched.is_running());
    }

    #[test]
    fn processes_one_message_per_tick() {
        let mut sched = scheduler(1);
        sched.submit(Message::new("t", 1));
        sched.submit(Message::new("t", 2));

        assert_eq!(tick(&mut sched), Some((0, 1)));
        assert_eq!(sched.pending(), 1);
        assert_eq!(tick(&mut sched), Some((0, 2)));
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn round_robin_prefers_cursor_over_stage_zero() {
        let mut sched = scheduler(3);
        sched.submit(Message::new("t", 1));
        assert_eq!(tick(&mut sched), Some((0, 1)));
        sched.route(1, Message::new("t", 10));
        sched.submit(Message::new("t", 2));

        // Cursor sits on stage 1, so the forwarded message runs first.
        assert_eq!(tick(&mut sched), Some((1, 10)));
        sched.route(2, Message::new("t", 20));
        assert_eq!(tick(&mut sched), Some((2, 20)));
        assert_eq!(tick(&mut sched), Some((0, 2)));
    }

    #[test]
    fn scan_wraps_past_stale_lower_bound() {
        let mut sched = scheduler(2);
        sched.submit(Message::new("t", 1));
        sched.submit(Message::new("t", 2));
        assert_eq!(tick(&mut sched), Some((0, 1)));

        // Cursor sits on empty stage 1: the scan raises `start` past it but
        // still wraps around to stage 0.
        assert_eq!(tick(&mut sched), Some((0, 2)));
        assert!(matches!(sched.next_step(), Step::Idle { .. }));
    }

    #[test]
    fn route_past_last_stage_is_output() {
        let mut sched = scheduler(2);
        sched.submit(Message::new("t", 1));
        let route = sched.route(2, Message::new("t", 1));
        assert_eq!(route, Route::Output(Message::new("t", 1)));
        assert_eq!(sched.stats().outputs, 1);
        assert_eq!(sched.pending(), 1, "outputs do not touch the pending count");
    }

    #[test]
    fn route_into_idle_pipeline_wakes() {
        let mut sched = scheduler(2);
        sched.submit(Message::new("t", 1));
        tick(&mut sched);
        assert_eq!(sched.pending(), 0);

        assert_eq!(
            sched.route(1, Message::new("t", 2)),
            Route::Queued(Admission::Woke)
        );
        assert_eq!(
            sched.route(1, Message::new("t", 3)),
            Route::Queued(Admission::Queued)
        );
        assert_eq!(sched.pending(), 2);
    }

    #[test]
    fn idle_finishes_batch_once() {
        let mut sched = scheduler(1);
        sched.submit(Message::new("t", 1));
        sched.route(1, Message::new("t", 1));
        tick(&mut sched);

        assert!(sched.claim_driver());
        match sched.next_step() {
            Step::Idle { finished } => assert_eq!(
                finished,
                Some(Stats {
                    inputs: 1,
                    outputs: 1,
                    errors: 0
                })
            ),
            Step::Run { .. } => panic!("nothing should be pending"),
        }
        assert!(!sched.is_running());
        assert_eq!(sched.stats(), Stats::default());
        assert!(sched.claim_driver(), "idle releases the driver");

        match sched.next_step() {
            Step::Idle { finished } => assert!(finished.is_none()),
            Step::Run { .. } => panic!("nothing should be pending"),
        }
    }

    #[test]
    fn async_lock_defers_finish() {
        let mut sched = scheduler(1);
        sched.submit(Message::new("t", 1));
        sched.lock_async();
        tick(&mut sched);

        match sched.next_step() {
            Step::Idle { finished } => assert!(finished.is_none()),
            Step::Run { .. } => panic!("nothing should be pending"),
        }
        assert!(sched.is_running());

        sched.release_async();
        assert!(sched.finish_if_quiescent().is_some());
        assert!(sched.finish_if_quiescent().is_none());
    }

    #[test]
    fn claim_driver_is_exclusive() {
        let mut sched = scheduler(1);
        assert!(sched.claim_driver());
        assert!(!sched.claim_driver());
    }
}
