//! Token-budgeted pull backend.

use super::{EventSink, EventSource, Pump, Step, Tokenizer};
use crate::config::Backend;
use crate::error::Result;

/// Pulls at most `token_budget` events per pump and yields as soon as the
/// sink holds a completed feature, so callers get features one at a time.
pub struct PullSource {
    tokenizer: Tokenizer,
    token_budget: usize,
}

impl PullSource {
    pub(super) fn new(tokenizer: Tokenizer, token_budget: usize) -> Self {
        Self {
            tokenizer,
            token_budget: token_budget.max(1),
        }
    }
}

impl EventSource for PullSource {
    fn backend(&self) -> Backend {
        Backend::Pull
    }

    fn pump(&mut self, sink: &mut dyn EventSink) -> Result<Pump> {
        let mut delivered = 0;
        while delivered < self.token_budget {
            match self.tokenizer.step(sink)? {
                Step::Finished => return Ok(Pump { more_available: false }),
                Step::Skipped => continue,
                Step::Delivered => delivered += 1,
            }
            if sink.should_stop() {
                return Ok(Pump { more_available: false });
            }
            if sink.has_completed() {
                break;
            }
        }
        Ok(Pump { more_available: true })
    }

    fn bytes_read(&self) -> u64 {
        self.tokenizer.position()
    }
}
