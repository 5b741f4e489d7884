//! A [`BlockDevice`] wrapper that adds configurable random IO latency.
//!
//! `SlowDevice` wraps any `Arc<dyn BlockDevice>` and sleeps for a random
//! duration before each read or write. The RNG is seeded for deterministic,
//! reproducible behaviour across test runs.
//!
//! # Example
//!
//! ```ignore
//! let slow = SlowDevice::new(inner)
//!     .read_latency(5, 20)    // 5–20 ms per read
//!     .write_latency(10, 30)  // 10–30 ms per write
//!     .seed(42);
//! ```

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use reef_types::{BlkAllocHints, ChunkId, MultiBlkId};

use crate::error::StoreError;
use crate::traits::{BlockDevice, ChunkInfo};

/// A [`BlockDevice`] wrapper that injects random latency before IO operations.
///
/// Useful for chaos testing to surface race conditions and timing bugs that
/// don't appear with an instant in-memory device.
pub struct SlowDevice {
    inner: Arc<dyn BlockDevice>,
    read_latency_ms: (u64, u64),
    write_latency_ms: (u64, u64),
    rng: Mutex<StdRng>,
}

impl SlowDevice {
    /// Wrap an existing device with zero latency (pass-through) by default.
    pub fn new(inner: Arc<dyn BlockDevice>) -> Self {
        Self {
            inner,
            read_latency_ms: (0, 0),
            write_latency_ms: (0, 0),
            rng: Mutex::new(StdRng::seed_from_u64(0)),
        }
    }

    /// Set the read latency range in milliseconds (uniform random).
    pub fn read_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.read_latency_ms = (min_ms, max_ms);
        self
    }

    /// Set the write latency range in milliseconds (uniform random).
    pub fn write_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.write_latency_ms = (min_ms, max_ms);
        self
    }

    /// Set the RNG seed for deterministic behaviour.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Sleep for a random duration in `[min, max]` milliseconds.
    async fn delay(&self, range: (u64, u64)) {
        let (min, max) = range;

        if max == 0 {
            return;
        }

        let ms = if min == max {
            min
        } else {
            self.rng.lock().unwrap().random_range(min..=max)
        };

        if ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait::async_trait]
impl BlockDevice for SlowDevice {
    fn block_size(&self) -> u32 {
        self.inner.block_size()
    }

    fn chunk_size(&self) -> u64 {
        self.inner.chunk_size()
    }

    fn chunks(&self) -> Vec<ChunkInfo> {
        self.inner.chunks()
    }

    fn chunk_info(&self, chunk_id: ChunkId) -> Option<ChunkInfo> {
        self.inner.chunk_info(chunk_id)
    }

    async fn alloc(&self, nblks: u16, hints: &BlkAllocHints) -> Result<MultiBlkId, StoreError> {
        self.inner.alloc(nblks, hints).await
    }

    async fn write(&self, blkid: &MultiBlkId, data: &[Bytes]) -> Result<(), StoreError> {
        self.delay(self.write_latency_ms).await;
        self.inner.write(blkid, data).await
    }

    async fn read(&self, blkid: &MultiBlkId, offset: u32, len: u32) -> Result<Bytes, StoreError> {
        self.delay(self.read_latency_ms).await;
        self.inner.read(blkid, offset, len).await
    }

    async fn free(&self, blkid: &MultiBlkId) -> Result<(), StoreError> {
        self.inner.free(blkid).await
    }
}
