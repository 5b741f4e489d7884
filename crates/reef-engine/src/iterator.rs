//! Restartable cursor over a PG's blobs.
//!
//! Walks blobs in `(shard_seq, blob_id)` order via the PG's index, reading
//! each live blob's payload. Used for snapshot transfer when a new member
//! joins a replica set.

use std::sync::Arc;

use reef_types::{Blob, BlobId, GroupId, MultiBlkId, PgId, ShardId, make_shard_id};
use tracing::debug;

use crate::engine::ReefEngine;
use crate::error::BlobError;

/// One blob with its route and payload, as yielded by [`PgBlobIterator`].
#[derive(Debug, Clone)]
pub struct BlobInfoData {
    /// Owning shard.
    pub shard_id: ShardId,
    /// Blob identifier.
    pub blob_id: BlobId,
    /// Physical extent of the payload.
    pub pbas: MultiBlkId,
    /// The blob itself.
    pub blob: Blob,
}

/// A restartable, finite cursor over one PG's blobs.
pub struct PgBlobIterator {
    engine: Arc<ReefEngine>,
    pg_id: PgId,
    cur_shard_seq: u64,
    next_blob_id: BlobId,
    max_shard_seq: u64,
}

/// Index routes fetched per scan step.
const SCAN_BATCH: usize = 64;

impl PgBlobIterator {
    /// Open a cursor over the PG backing `group_id`. Returns `None` when no
    /// local PG maps to the group.
    pub fn new(engine: Arc<ReefEngine>, group_id: GroupId) -> Option<Self> {
        let (pg_id, pg) = engine.pg_by_group(group_id)?;
        let max_shard_seq = pg
            .shards
            .read()
            .expect("lock poisoned")
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0);
        debug!(pg_id, max_shard_seq, "opened pg blob iterator");
        Some(Self {
            engine,
            pg_id,
            cur_shard_seq: 1,
            next_blob_id: 0,
            max_shard_seq,
        })
    }

    /// The PG this cursor walks.
    pub fn pg_id(&self) -> PgId {
        self.pg_id
    }

    /// Whether every shard has been exhausted.
    pub fn end_of_scan(&self) -> bool {
        self.max_shard_seq == 0 || self.cur_shard_seq > self.max_shard_seq
    }

    /// Fetch the next batch of live blobs.
    ///
    /// Stops early at `max_count` blobs or `max_bytes` of payload. The
    /// returned flag is true when the batch ended because a shard boundary
    /// was crossed.
    pub async fn next_batch(
        &mut self,
        max_count: usize,
        max_bytes: u64,
    ) -> Result<(Vec<BlobInfoData>, bool), BlobError> {
        let mut batch = Vec::new();
        let mut batch_bytes = 0u64;

        while !self.end_of_scan() {
            let shard_id = make_shard_id(self.pg_id, self.cur_shard_seq);

            // A gap in the shard sequence (never committed here) is skipped.
            if self.engine.get_shard(shard_id).is_err() {
                self.advance_shard();
                continue;
            }

            loop {
                let routes =
                    self.engine
                        .query_blobs_in_shard(shard_id, self.next_blob_id, SCAN_BATCH)?;
                if routes.is_empty() {
                    break;
                }
                for (blob_id, pbas) in routes {
                    self.next_blob_id = blob_id + 1;
                    if pbas.is_tombstone() {
                        continue;
                    }
                    let blob = self.engine.get_blob(shard_id, blob_id, 0, 0).await?;
                    batch_bytes += blob.body.len() as u64;
                    batch.push(BlobInfoData {
                        shard_id,
                        blob_id,
                        pbas,
                        blob,
                    });
                    if batch.len() >= max_count || batch_bytes >= max_bytes {
                        return Ok((batch, false));
                    }
                }
            }

            // Shard exhausted; report the boundary to the caller.
            self.advance_shard();
            return Ok((batch, true));
        }

        Ok((batch, false))
    }

    fn advance_shard(&mut self) {
        self.cur_shard_seq += 1;
        self.next_blob_id = 0;
    }
}
