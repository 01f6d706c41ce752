//! Reserved topics and the event names that map onto them.
//!
//! Any topic not listed in [`RESERVED`] is "ordinary": publishing on it also
//! fans out to [`ANY`] subscribers.

use std::fmt;
use std::str::FromStr;

// ── Reserved topics ───────────────────────────────────────────────────────

/// Wildcard topic. Receives every message published on an ordinary topic.
pub const ANY: &str = "*";

/// Stage failures. Payload is the error text, `msg` carries the input message.
pub const ERROR: &str = "redpipe::error";

/// Batch completion. Payload is a [`Stats`](crate::Stats) snapshot.
pub const FINISHED: &str = "redpipe::finished";

/// Topics that never fan out to [`ANY`].
pub const RESERVED: [&str; 3] = [ANY, ERROR, FINISHED];

// ── Defaults ──────────────────────────────────────────────────────────────

/// Topic assigned to submitted messages that do not carry one.
pub const DEFAULT: &str = "message";

/// Whether `topic` is one of the lifecycle/wildcard topics.
pub fn is_reserved(topic: &str) -> bool {
    RESERVED.contains(&topic)
}

// ── Events ────────────────────────────────────────────────────────────────

/// Convenience event names accepted by [`Pipeline::on`](crate::Pipeline::on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Every ordinary output (subscribes to [`ANY`]).
    Data,
    /// Stage failures (subscribes to [`ERROR`]).
    Error,
    /// Batch completion (subscribes to [`FINISHED`]).
    Finished,
}

impl Event {
    /// The topic this event subscribes to.
    pub fn topic(self) -> &'static str {
        match self {
            Event::Data => ANY,
            Event::Error => ERROR,
            Event::Finished => FINISHED,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Event::Data => "data",
            Event::Error => "error",
            Event::Finished => "finished",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Event {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data" => Ok(Event::Data),
            "error" => Ok(Event::Error),
            "finished" => Ok(Event::Finished),
            other => Err(format!("unknown event '{other}'")),
        }
    }
}
