use std::time::Duration;

use crate::protocol::{FRAME_OVERHEAD, MAX_FRAME_LEN};
use crate::{Error, Result};

/// Block size for file reads (512 KB)
pub const BLOCK_SIZE: usize = 512 * 1024;

/// Default throughput ceiling (50 MB/s)
pub const TARGET_THROUGHPUT: u64 = 50 * 1024 * 1024;

/// Default depth of the queue between the reader and the sender
pub const QUEUE_DEPTH: usize = 1000;

/// Largest block whose chunk frame still fits under the frame cap
pub const MAX_BLOCK_SIZE: usize = MAX_FRAME_LEN - FRAME_OVERHEAD;

/// Tunables for a single upload
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Size of each chunk read from the source; only the last may be shorter
    pub block_size: usize,

    /// Throughput ceiling in bytes per second, 0 disables pacing
    pub throughput: u64,

    /// Blocks buffered between the reader and the sender
    pub queue_depth: usize,

    /// How long to wait for the final acknowledgments once every chunk is sent
    pub drain_timeout: Option<Duration>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            throughput: TARGET_THROUGHPUT,
            queue_depth: QUEUE_DEPTH,
            drain_timeout: None,
        }
    }
}

impl UploadConfig {
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_throughput(mut self, bytes_per_sec: u64) -> Self {
        self.throughput = bytes_per_sec;
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = Some(timeout);
        self
    }

    /// Minimum time between two block reads.
    ///
    /// One block per interval keeps the read rate at or below `throughput`.
    pub fn pacing_interval(&self) -> Duration {
        if self.throughput == 0 {
            return Duration::ZERO;
        }
        let nanos = (self.block_size as u128 * 1_000_000_000) / self.throughput as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::InvalidConfig("block size must be non-zero".into()));
        }
        if self.block_size > MAX_BLOCK_SIZE {
            return Err(Error::InvalidConfig(format!(
                "block size {} exceeds the {} byte limit",
                self.block_size, MAX_BLOCK_SIZE
            )));
        }
        if self.queue_depth == 0 {
            return Err(Error::InvalidConfig("queue depth must be non-zero".into()));
        }
        Ok(())
    }
}
