//! Byte-budgeted batch backend.

use super::{EventSink, EventSource, Pump, Step, Tokenizer};
use crate::config::Backend;
use crate::error::Result;

/// Consumes roughly `batch_bytes` of input per pump regardless of how many
/// features complete meanwhile; the caller buffers the surplus.
pub struct BatchSource {
    tokenizer: Tokenizer,
    batch_bytes: u64,
}

impl BatchSource {
    pub(super) fn new(tokenizer: Tokenizer, batch_bytes: usize) -> Self {
        Self {
            tokenizer,
            batch_bytes: batch_bytes.max(1) as u64,
        }
    }
}

impl EventSource for BatchSource {
    fn backend(&self) -> Backend {
        Backend::Batch
    }

    fn pump(&mut self, sink: &mut dyn EventSink) -> Result<Pump> {
        let start = self.tokenizer.position();
        loop {
            if self.tokenizer.step(sink)? == Step::Finished {
                return Ok(Pump { more_available: false });
            }
            if sink.should_stop() {
                return Ok(Pump { more_available: false });
            }
            if self.tokenizer.position().saturating_sub(start) >= self.batch_bytes {
                return Ok(Pump { more_available: true });
            }
        }
    }

    fn bytes_read(&self) -> u64 {
        self.tokenizer.position()
    }
}
