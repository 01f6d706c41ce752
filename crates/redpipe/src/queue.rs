use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Where a forwarded message lands in the next stage's queue.
///
/// Submissions through `send` always append; the policy only governs
/// messages forwarded (or retried) by a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertionPolicy {
    /// Append to the tail: strict FIFO per stage.
    #[default]
    Fifo,
    /// Insert before a uniformly chosen pending message, interleaving
    /// branches of different inputs.
    Random,
}

impl fmt::Display for InsertionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertionPolicy::Fifo => f.write_str("fifo"),
            InsertionPolicy::Random => f.write_str("random"),
        }
    }
}

impl FromStr for InsertionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(InsertionPolicy::Fifo),
            "random" => Ok(InsertionPolicy::Random),
            other => Err(format!(
                "invalid insertion policy '{other}', expected 'fifo' or 'random'"
            )),
        }
    }
}

/// Unbounded queue of messages waiting for one stage.
#[derive(Debug, Default)]
pub struct StageQueue {
    pending: VecDeque<Message>,
}

impl StageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, message: Message) {
        self.pending.push_back(message);
    }

    /// Insert according to `policy`.
    pub fn insert(&mut self, message: Message, policy: InsertionPolicy) {
        match policy {
            InsertionPolicy::Fifo => self.pending.push_back(message),
            InsertionPolicy::Random => {
                let pos = if self.pending.is_empty() {
                    0
                } else {
                    rand::thread_rng().gen_range(0..self.pending.len())
                };
                self.pending.insert(pos, message);
            }
        }
    }

    pub fn pop_front(&mut self) -> Option<Message> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads(queue: &mut StageQueue) -> Vec<i64> {
        std::iter::from_fn(|| queue.pop_front())
            .map(|m| m.payload.as_i64().unwrap())
            .collect()
    }

    #[test]
    fn fifo_preserves_order() {
        let mut queue = StageQueue::new();
        for i in 0..5 {
            queue.insert(Message::new("t", i), InsertionPolicy::Fifo);
        }
        assert_eq!(payloads(&mut queue), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn random_keeps_every_message() {
        let mut queue = StageQueue::new();
        for i in 0..50 {
            queue.insert(Message::new("t", i), InsertionPolicy::Random);
        }
        assert_eq!(queue.len(), 50);

        let mut seen = payloads(&mut queue);
        seen.sort_unstable();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn random_never_appends_behind_pending_tail() {
        let mut queue = StageQueue::new();
        queue.push_back(Message::new("t", 0));
        queue.insert(Message::new("t", 1), InsertionPolicy::Random);
        assert_eq!(payloads(&mut queue), vec![1, 0]);
    }

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!("FIFO".parse::<InsertionPolicy>().unwrap(), InsertionPolicy::Fifo);
        assert_eq!("random".parse::<InsertionPolicy>().unwrap(), InsertionPolicy::Random);
        assert!("lifo".parse::<InsertionPolicy>().is_err());
        assert_eq!(InsertionPolicy::Random.to_string(), "random");
    }
}
