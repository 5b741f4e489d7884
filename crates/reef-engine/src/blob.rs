//! Blob engine: put/get/delete against the replicated log.
//!
//! A blob payload persists as `BlobHeader || user_key || blob_bytes ||
//! padding`: the blob bytes start at a 512-aligned `data_offset` and the
//! whole payload is zero-padded to the data block size. Allocation is biased
//! to the shard's chunk via the replication layer's hint callback; commit
//! inserts the `(shard_id, blob_id) → extent` route into the PG's index.
//! Deletes tombstone the route without reclaiming the extent.

use bytes::Bytes;
use reef_meta::PutOutcome;
use reef_repl::{Proposal, ProposalCtx, ReplError, ReplMessageHeader, ReplMsgType};
use reef_types::superblk::{
    BLOB_MAX_HASH_LEN, BlobHeader, DATA_BLOCK_SIZE, DEVICE_BLOCK_ALIGN, HashAlgorithm,
};
use reef_types::{Blob, BlobId, BlkAllocHints, MultiBlkId, ShardId, shard_seq};
use std::sync::atomic::Ordering;
use tracing::{debug, error, warn};

use crate::engine::ReefEngine;
use crate::error::BlobError;
use crate::result_ctx::{ResultCtx, resolve};

fn align_up(v: usize, align: usize) -> usize {
    v.div_ceil(align) * align
}

/// Compute the payload hash over `user_key || blob_bytes`.
///
/// Only CRC-32 is computed; MD5 and SHA-1 are wire-reserved values this
/// implementation does not produce.
pub fn compute_blob_payload_hash(
    algorithm: HashAlgorithm,
    user_key: &[u8],
    blob_bytes: &[u8],
) -> Result<[u8; BLOB_MAX_HASH_LEN], BlobError> {
    let mut hash = [0u8; BLOB_MAX_HASH_LEN];
    match algorithm {
        HashAlgorithm::None => Ok(hash),
        HashAlgorithm::Crc32 => {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(user_key);
            hasher.update(blob_bytes);
            hash[0..4].copy_from_slice(&hasher.finalize().to_le_bytes());
            Ok(hash)
        }
        HashAlgorithm::Md5 | HashAlgorithm::Sha1 => {
            warn!(?algorithm, "unsupported blob hash algorithm");
            Err(BlobError::InvalidArg)
        }
    }
}

impl ReefEngine {
    /// Write a blob into an open shard.
    ///
    /// The leader assigns the blob id from the PG's sequence counter and
    /// returns it once the entry commits locally.
    pub async fn put_blob(&self, shard_id: ShardId, blob: Blob) -> Result<BlobId, BlobError> {
        let (pg, handle) = self
            .shard_handle(shard_id)
            .ok_or(BlobError::UnknownShard)?;
        if !handle.info.is_open() {
            return Err(BlobError::InvalidArg);
        }
        if !pg.repl_dev.is_leader() {
            return Err(BlobError::NotLeader);
        }
        if blob.body.is_empty() {
            return Err(BlobError::InvalidArg);
        }

        let Blob {
            body,
            user_key,
            object_offset,
        } = blob;

        let blob_id = pg.durable.blob_sequence_num.fetch_add(1, Ordering::SeqCst) + 1;
        pg.mark_dirty();

        let blk_size = pg.repl_dev.block_size().max(DATA_BLOCK_SIZE) as usize;
        let data_offset =
            align_up(BlobHeader::ENCODED_LEN + user_key.len(), DEVICE_BLOCK_ALIGN as usize);
        let total = align_up(data_offset + body.len(), blk_size);

        let header = BlobHeader {
            hash_algorithm: self.cfg.hash_algorithm,
            hash: compute_blob_payload_hash(self.cfg.hash_algorithm, &user_key, &body)?,
            shard_id,
            blob_id,
            blob_size: body.len() as u32,
            object_offset,
            data_offset: data_offset as u32,
            user_key_size: user_key.len() as u32,
        };

        // Payload scatter list: header block (header + key, zero-padded to
        // data_offset), blob bytes, tail padding to the block boundary.
        let mut head = header.to_bytes();
        head.extend_from_slice(&user_key);
        head.resize(data_offset, 0);
        let tail_pad = total - data_offset - body.len();
        let mut data = vec![Bytes::from(head), Bytes::from(body)];
        if tail_pad > 0 {
            data.push(Bytes::from(vec![0u8; tail_pad]));
        }

        let frame = ReplMessageHeader::frame(ReplMsgType::PutBlob, &header.to_bytes());
        let (ctx, rx) = ResultCtx::<(), BlobError>::make();
        pg.repl_dev
            .propose(Proposal {
                header: Bytes::from(frame),
                key: Bytes::from(user_key),
                data,
                ctx: Some(ctx as ProposalCtx),
            })
            .await
            .map_err(BlobError::from)?;

        rx.await.unwrap_or(Err(BlobError::Unknown))?;
        Ok(blob_id)
    }

    /// Read a blob, or a sub-range of it when `len > 0`.
    pub async fn get_blob(
        &self,
        shard_id: ShardId,
        blob_id: BlobId,
        off: u64,
        len: u64,
    ) -> Result<Blob, BlobError> {
        let (pg, _) = self
            .shard_handle(shard_id)
            .ok_or(BlobError::UnknownShard)?;

        let blkid = pg
            .index_table
            .get(shard_id, blob_id)
            .map_err(|e| {
                error!(shard_id, blob_id, %e, "index lookup failed");
                BlobError::Unknown
            })?
            .ok_or(BlobError::UnknownBlob)?;
        if blkid.is_tombstone() {
            return Err(BlobError::UnknownBlob);
        }

        let blk_size = pg.repl_dev.block_size();
        let extent_len = u32::from(blkid.nblks) * blk_size;
        let bytes = pg
            .repl_dev
            .read(&blkid, 0, extent_len)
            .await
            .map_err(BlobError::from)?;

        let header = BlobHeader::from_bytes(&bytes).map_err(|e| {
            error!(shard_id, blob_id, %e, "stored blob header invalid");
            BlobError::CrcMismatch
        })?;
        if header.shard_id != shard_id || header.blob_id != blob_id {
            error!(shard_id, blob_id, "stored blob header routes to a different blob");
            return Err(BlobError::CrcMismatch);
        }

        let key_start = BlobHeader::ENCODED_LEN;
        let key_end = key_start + header.user_key_size as usize;
        let data_start = header.data_offset as usize;
        let data_end = data_start + header.blob_size as usize;
        if key_end > bytes.len() || data_end > bytes.len() {
            return Err(BlobError::CrcMismatch);
        }
        let user_key = &bytes[key_start..key_end];
        let body = &bytes[data_start..data_end];

        if header.hash_algorithm != HashAlgorithm::None {
            let computed = compute_blob_payload_hash(header.hash_algorithm, user_key, body)?;
            if computed != header.hash {
                error!(shard_id, blob_id, "blob payload hash mismatch");
                return Err(BlobError::CrcMismatch);
            }
        }

        let blob_size = u64::from(header.blob_size);
        if off > blob_size {
            return Err(BlobError::InvalidArg);
        }
        let end = if len == 0 {
            blob_size
        } else {
            (off + len).min(blob_size)
        };

        Ok(Blob {
            body: body[off as usize..end as usize].to_vec(),
            user_key: user_key.to_vec(),
            object_offset: header.object_offset,
        })
    }

    /// Tombstone a blob. Space reclaim is deferred to a future GC pass.
    pub async fn del_blob(&self, shard_id: ShardId, blob_id: BlobId) -> Result<(), BlobError> {
        let (pg, _) = self
            .shard_handle(shard_id)
            .ok_or(BlobError::UnknownShard)?;
        if !pg.repl_dev.is_leader() {
            return Err(BlobError::NotLeader);
        }

        let header = BlobHeader {
            hash_algorithm: HashAlgorithm::None,
            hash: [0u8; BLOB_MAX_HASH_LEN],
            shard_id,
            blob_id,
            blob_size: 0,
            object_offset: 0,
            data_offset: 0,
            user_key_size: 0,
        };
        let frame = ReplMessageHeader::frame(ReplMsgType::DelBlob, &header.to_bytes());
        let (ctx, rx) = ResultCtx::<(), BlobError>::make();
        pg.repl_dev
            .propose(Proposal {
                header: Bytes::from(frame),
                key: Bytes::new(),
                data: Vec::new(),
                ctx: Some(ctx as ProposalCtx),
            })
            .await
            .map_err(BlobError::from)?;

        rx.await.unwrap_or(Err(BlobError::Unknown))
    }

    // -------------------------------------------------------------------
    // Replication hooks
    // -------------------------------------------------------------------

    /// Allocation hints for a `PUT_BLOB`: pin the write to the shard's chunk.
    pub(crate) fn blob_put_get_blk_alloc_hints(
        &self,
        frame: &[u8],
    ) -> Result<BlkAllocHints, ReplError> {
        let (header, payload) = ReplMessageHeader::split(frame)?;
        if header.msg_type != ReplMsgType::PutBlob {
            return Err(ReplError::BadRequest);
        }
        let blob_header = BlobHeader::from_bytes(payload).map_err(|_| ReplError::BadRequest)?;
        let Some((_, handle)) = self.shard_handle(blob_header.shard_id) else {
            error!(shard_id = blob_header.shard_id, "alloc hints for unknown shard");
            return Err(ReplError::Failed);
        };
        Ok(BlkAllocHints {
            chunk_id: Some(handle.p_chunk_id),
            ..Default::default()
        })
    }

    /// Apply a committed `PUT_BLOB`: insert the route and bump counters.
    pub(crate) fn on_blob_put_commit(
        &self,
        lsn: u64,
        payload: &[u8],
        pbas: MultiBlkId,
        ctx: Option<&ProposalCtx>,
    ) {
        let header = match BlobHeader::from_bytes(payload) {
            Ok(h) => h,
            Err(e) => {
                error!(lsn, %e, "put blob payload undecodable at commit");
                resolve::<(), BlobError>(ctx, Err(BlobError::InvalidArg));
                return;
            }
        };
        let Some((pg, _)) = self.shard_handle(header.shard_id) else {
            error!(lsn, shard_id = header.shard_id, "put blob commit on unknown shard");
            resolve::<(), BlobError>(ctx, Err(BlobError::UnknownShard));
            return;
        };

        match pg
            .index_table
            .put_if_absent(header.shard_id, header.blob_id, pbas)
        {
            Ok(PutOutcome::Inserted) => {
                pg.durable.active_blob_count.fetch_add(1, Ordering::Relaxed);
                pg.durable
                    .total_occupied_blk_count
                    .fetch_add(u64::from(pbas.nblks), Ordering::Relaxed);
                pg.durable
                    .blob_sequence_num
                    .fetch_max(header.blob_id, Ordering::Relaxed);
                pg.mark_dirty();

                let blk_size = u64::from(pg.repl_dev.block_size());
                let mut shards = pg.shards.write().expect("lock poisoned");
                if let Some(handle) = shards.get_mut(&shard_seq(header.shard_id)) {
                    handle.info.used_capacity_bytes += u64::from(pbas.nblks) * blk_size;
                }
                debug!(lsn, shard_id = header.shard_id, blob_id = header.blob_id, %pbas, "blob committed");
                resolve::<(), BlobError>(ctx, Ok(()));
            }
            Ok(PutOutcome::Exists(existing)) => {
                // Replayed commit; the index keeps its first answer. A
                // differing live extent is a replica-local alarm.
                if existing != pbas && !existing.is_tombstone() {
                    warn!(
                        lsn,
                        blob_id = header.blob_id,
                        %existing,
                        new = %pbas,
                        "replayed put blob carries a different extent"
                    );
                }
                resolve::<(), BlobError>(ctx, Ok(()));
            }
            Err(e) => {
                error!(lsn, blob_id = header.blob_id, %e, "index insert failed");
                resolve::<(), BlobError>(ctx, Err(BlobError::Unknown));
            }
        }
    }

    /// Apply a committed `DEL_BLOB`: move the route to the tombstone
    /// sentinel and adjust counters. The extent stays allocated.
    pub(crate) fn on_blob_del_commit(&self, lsn: u64, payload: &[u8], ctx: Option<&ProposalCtx>) {
        let header = match BlobHeader::from_bytes(payload) {
            Ok(h) => h,
            Err(e) => {
                error!(lsn, %e, "del blob payload undecodable at commit");
                resolve::<(), BlobError>(ctx, Err(BlobError::InvalidArg));
                return;
            }
        };
        let Some((pg, _)) = self.shard_handle(header.shard_id) else {
            resolve::<(), BlobError>(ctx, Err(BlobError::UnknownShard));
            return;
        };

        let existing = match pg.index_table.get(header.shard_id, header.blob_id) {
            Ok(Some(blkid)) => blkid,
            Ok(None) => {
                resolve::<(), BlobError>(ctx, Err(BlobError::UnknownBlob));
                return;
            }
            Err(e) => {
                error!(lsn, %e, "index lookup failed at del commit");
                resolve::<(), BlobError>(ctx, Err(BlobError::Unknown));
                return;
            }
        };
        if existing.is_tombstone() {
            // Replayed delete.
            resolve::<(), BlobError>(ctx, Ok(()));
            return;
        }

        if let Err(e) =
            pg.index_table
                .upsert(header.shard_id, header.blob_id, MultiBlkId::TOMBSTONE)
        {
            error!(lsn, %e, "tombstone write failed");
            resolve::<(), BlobError>(ctx, Err(BlobError::Unknown));
            return;
        }

        pg.durable.active_blob_count.fetch_sub(1, Ordering::Relaxed);
        pg.durable
            .tombstone_blob_count
            .fetch_add(1, Ordering::Relaxed);
        pg.mark_dirty();

        let blk_size = u64::from(pg.repl_dev.block_size());
        let mut shards = pg.shards.write().expect("lock poisoned");
        if let Some(handle) = shards.get_mut(&shard_seq(header.shard_id)) {
            handle.info.deleted_capacity_bytes += u64::from(existing.nblks) * blk_size;
        }
        debug!(lsn, shard_id = header.shard_id, blob_id = header.blob_id, "blob tombstoned");
        resolve::<(), BlobError>(ctx, Ok(()));
    }

    /// Routes of one shard in blob-id order, tombstones included.
    pub(crate) fn query_blobs_in_shard(
        &self,
        shard_id: ShardId,
        start_blob_id: BlobId,
        max: usize,
    ) -> Result<Vec<(BlobId, MultiBlkId)>, BlobError> {
        let (pg, _) = self
            .shard_handle(shard_id)
            .ok_or(BlobError::UnknownShard)?;
        pg.index_table
            .scan_shard(shard_id, start_blob_id, max)
            .map_err(|e| {
                error!(shard_id, %e, "index scan failed");
                BlobError::Unknown
            })
    }
}
