//! Checkpointing: periodic flush of durable counters.
//!
//! Blob traffic mutates per-PG counters in memory and marks the PG dirty;
//! the checkpoint pass publishes them to the PG superblock (and refreshes
//! shard capacity records). Each superblock write is all-or-nothing, so a
//! crash between checkpoints only loses counter deltas that recovery
//! re-derives from the log's idempotent replay.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use reef_types::superblk::ShardInfoSuperblk;
use tracing::{debug, warn};

use crate::engine::ReefEngine;
use crate::error::EngineError;

/// Process-wide checkpoint hooks.
pub trait CheckpointCallbacks: Send + Sync {
    /// A new checkpoint epoch begins.
    fn on_switchover(&self);

    /// Flush dirtied durable state. Crash-safe per record.
    fn flush(&self) -> Result<(), EngineError>;

    /// Post-flush cleanup.
    fn cleanup(&self);

    /// Rough progress of the current flush, 0–100.
    fn progress_percent(&self) -> u8;
}

impl CheckpointCallbacks for ReefEngine {
    fn on_switchover(&self) {
        debug!("checkpoint switchover");
    }

    fn flush(&self) -> Result<(), EngineError> {
        let pgs: Vec<_> = {
            let map = self.pg_map.read().expect("lock poisoned");
            map.iter().map(|(&id, pg)| (id, pg.clone())).collect()
        };

        for (pg_id, pg) in pgs {
            if !pg.sb_dirty.swap(false, Ordering::AcqRel) {
                continue;
            }
            let sb = self.build_pg_sb(pg_id, &pg);
            if let Err(e) = self.meta.put_pg_sb(&sb) {
                // Put the dirty mark back; the next pass retries.
                pg.mark_dirty();
                return Err(e.into());
            }

            let shard_sbs: Vec<ShardInfoSuperblk> = {
                let shards = pg.shards.read().expect("lock poisoned");
                shards
                    .values()
                    .map(|h| ShardInfoSuperblk::new(h.info.clone(), h.p_chunk_id, h.v_chunk_id))
                    .collect()
            };
            for sb in shard_sbs {
                self.meta.put_shard_sb(&sb)?;
            }
            debug!(pg_id, "checkpoint flushed pg");
        }
        Ok(())
    }

    fn cleanup(&self) {
        debug!("checkpoint cleanup");
    }

    fn progress_percent(&self) -> u8 {
        let map = self.pg_map.read().expect("lock poisoned");
        let total = map.len();
        if total == 0 {
            return 100;
        }
        let dirty = map
            .values()
            .filter(|pg| pg.sb_dirty.load(Ordering::Acquire))
            .count();
        (100 * (total - dirty) / total) as u8
    }
}

/// Drive the checkpoint callbacks on a fixed interval.
pub fn spawn_checkpoint_task(
    engine: Arc<ReefEngine>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            engine.on_switchover();
            if let Err(e) = engine.flush() {
                warn!(%e, "checkpoint flush failed");
            }
            engine.cleanup();
        }
    })
}
