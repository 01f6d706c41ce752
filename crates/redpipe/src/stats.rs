use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Per-batch counters, published as the payload of the finished event.
///
/// A batch spans from the first submission after quiescence to the next
/// quiescence point; the counters reset to zero when it completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Messages submitted through `send`.
    pub inputs: u64,
    /// Messages that exited past the last stage.
    pub outputs: u64,
    /// Stage failures (errors and panics).
    pub errors: u64,
}

impl Stats {
    /// JSON form used as the finished-event payload.
    pub fn to_payload(&self) -> Value {
        json!({
            "inputs": self.inputs,
            "outputs": self.outputs,
            "errors": self.errors,
        })
    }

    /// Take the current counters, leaving zeroes behind.
    pub(crate) fn take(&mut self) -> Stats {
        std::mem::take(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_decodes_back() {
        let stats = Stats {
            inputs: 3,
            outputs: 5,
            errors: 1,
        };
        let decoded: Stats = serde_json::from_value(stats.to_payload()).unwrap();
        assert_eq!(decoded, stats);
    }

    #[test]
    fn take_resets() {
        let mut stats = Stats {
            inputs: 1,
            outputs: 1,
            errors: 0,
        };
        let snapshot = stats.take();
        assert_eq!(snapshot.inputs, 1);
        assert_eq!(stats, Stats::default());
    }
}
