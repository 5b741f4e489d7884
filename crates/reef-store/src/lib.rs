//! Block device port and reference backends for Reef.
//!
//! The replicated engine treats the block allocator and raw device I/O as an
//! external service behind the [`BlockDevice`] trait: chunks are enumerated,
//! extents are allocated inside chunks (optionally biased by
//! [`BlkAllocHints`](reef_types::BlkAllocHints)), and payloads are written and
//! read at block granularity.
//!
//! Two backends are provided: [`MemoryDevice`] (volatile, for tests and
//! memory-only nodes) and [`FileDevice`] (one file per chunk, allocator state
//! persisted in a sidecar map). [`SlowDevice`] wraps any device with seeded
//! random latency for chaos tests.

mod alloc;
pub mod error;
pub mod file_device;
pub mod memory_device;
pub mod slow_device;
pub mod traits;

pub use error::StoreError;
pub use file_device::FileDevice;
pub use memory_device::MemoryDevice;
pub use slow_device::SlowDevice;
pub use traits::{BlockDevice, ChunkInfo};
