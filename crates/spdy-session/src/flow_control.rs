//! Per-stream flow-control windows

use spdy_proto::MAX_WINDOW_SIZE;

/// Credit counter for one direction of a stream.
///
/// Never negative: `consume` refuses amounts above the remaining credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    available: u32,
}

/// Returned when a window operation would leave the valid range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowError;

impl Window {
    pub fn new(initial: u32) -> Self {
        Self {
            available: initial.min(MAX_WINDOW_SIZE),
        }
    }

    pub fn available(&self) -> u32 {
        self.available
    }

    pub fn consume(&mut self, n: u32) -> Result<(), WindowError> {
        if n > self.available {
            return Err(WindowError);
        }
        self.available -= n;
        Ok(())
    }

    pub fn replenish(&mut self, n: u32) -> Result<(), WindowError> {
        let next = self.available as u64 + n as u64;
        if next > MAX_WINDOW_SIZE as u64 {
            return Err(WindowError);
        }
        self.available = next as u32;
        Ok(())
    }
}
