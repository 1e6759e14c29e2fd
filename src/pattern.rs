//! Deterministic test pattern for the write/read-back steps.
//!
//! The payload is the 0..=255 cycle repeated over the configured length,
//! terminated by a single zero byte.

pub struct PatternSource {
    emitted: u32,
    payload_len: u32,
}

impl PatternSource {
    pub fn new(payload_len: u32) -> Self {
        Self {
            emitted: 0,
            payload_len,
        }
    }

    /// Payload plus the terminating zero.
    pub fn total_len(&self) -> u32 {
        self.payload_len + 1
    }

    /// Fills `buf` with the next run of pattern bytes and returns how many
    /// were produced. Returns 0 once the pattern (terminator included) is
    /// exhausted.
    pub fn fill(&mut self, buf: &mut [u8]) -> usize {
        let mut produced = 0;
        while produced < buf.len() && self.emitted < self.total_len() {
            buf[produced] = if self.emitted < self.payload_len {
                self.emitted as u8
            } else {
                0
            };
            self.emitted += 1;
            produced += 1;
        }
        produced
    }
}
