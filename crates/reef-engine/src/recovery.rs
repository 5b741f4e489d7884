//! Restart recovery.
//!
//! The three on-disk stores replay in a strict order:
//!
//! 1. Index tables are enumerated and opened; each uuid is registered with
//!    a pending PG.
//! 2. PG superblocks attach their index table (it is a fatal startup error
//!    if the table was not recovered first), re-register their chunk
//!    ownership, and rebuild the in-memory PG.
//! 3. Shard superblocks attach to their PG and rebind their chunks.
//! 4. The per-device free-chunk heaps are rebuilt from whatever no PG owns.
//!
//! A PG serves operations only after all four steps complete.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use reef_types::superblk::{PgInfoSuperblk, ShardInfoSuperblk};
use reef_types::shard_seq;
use tracing::{error, info, warn};

use crate::engine::{DurableEntities, PgEntry, PgIndexEntry, ReefEngine, ShardHandle};
use crate::error::EngineError;
use crate::pg::pg_info_from_sb;

impl ReefEngine {
    /// Recover PGs and shards from the metadata store after a restart.
    pub fn on_replica_restart(&self) -> Result<(), EngineError> {
        // Step 1: index tables first; PG recovery depends on them.
        for uuid in self.meta.list_index_tables()? {
            let table = self.meta.open_index_table(uuid)?;
            self.index_map
                .write()
                .expect("lock poisoned")
                .insert(uuid, PgIndexEntry { pg_id: 0, table });
            info!(%uuid, "recovered index table");
        }

        // Step 2: PG superblocks.
        for sb in self.meta.iter_pg_sbs()? {
            self.on_pg_sb_found(sb);
        }

        // Step 3: shard superblocks.
        for sb in self.meta.iter_shard_sbs()? {
            self.on_shard_sb_found(sb);
        }

        // Step 4: whatever no PG owns goes back to the free heaps.
        self.chunk_selector.recover_per_dev_chunk_heap();

        self.recovery_done.store(true, Ordering::Release);
        info!(pgs = self.list_pg_ids().len(), "replica restart recovery complete");
        Ok(())
    }

    fn on_pg_sb_found(&self, sb: PgInfoSuperblk) {
        let pg_id = sb.id;
        let repl_dev = match self.repl.get_repl_dev(sb.replica_set_uuid) {
            Ok(dev) => dev,
            Err(e) => {
                // Without its replication group every operation on the PG
                // will fail; surface loudly and leave the PG offline.
                error!(pg_id, group_id = %sb.replica_set_uuid, %e, "replication group missing for recovered pg");
                return;
            }
        };

        assert!(
            self.chunk_selector
                .recover_pg_chunks(pg_id, sb.chunk_ids.clone()),
            "failed to recover chunk ownership for pg {pg_id}"
        );

        let index_table = {
            let mut index_map = self.index_map.write().expect("lock poisoned");
            let entry = index_map.get_mut(&sb.index_table_uuid).unwrap_or_else(|| {
                panic!(
                    "index table {} must be recovered before pg {pg_id}",
                    sb.index_table_uuid
                )
            });
            entry.pg_id = pg_id;
            entry.table.clone()
        };

        let mut info = pg_info_from_sb(&sb);
        info.chunk_size = self.chunk_selector.chunk_size();

        let entry = Arc::new(PgEntry {
            info: RwLock::new(info),
            repl_dev,
            index_table,
            shards: RwLock::new(BTreeMap::new()),
            durable: DurableEntities {
                blob_sequence_num: AtomicU64::new(sb.blob_sequence_num),
                active_blob_count: AtomicU64::new(sb.active_blob_count),
                tombstone_blob_count: AtomicU64::new(sb.tombstone_blob_count),
                total_occupied_blk_count: AtomicU64::new(sb.total_occupied_blk_count),
            },
            next_shard_seq: AtomicU64::new(0),
            sb_dirty: AtomicBool::new(false),
        });
        self.add_pg_to_map(entry);
        info!(pg_id, chunks = sb.chunk_ids.len(), "recovered pg");
    }

    fn on_shard_sb_found(&self, sb: ShardInfoSuperblk) {
        let pg_id = sb.info.placement_group;
        let Some(pg) = self.pg(pg_id) else {
            warn!(shard_id = sb.info.id, pg_id, "recovered shard references an offline pg");
            return;
        };

        // Rebind the shard's chunk; open and sealed shards both hold their
        // chunk under the one-shard-per-chunk policy.
        if self
            .chunk_selector
            .reserve_chunk(pg_id, sb.p_chunk_id)
            .is_none()
        {
            warn!(
                shard_id = sb.info.id,
                p_chunk_id = sb.p_chunk_id,
                "recovered shard's chunk binding unavailable"
            );
        }

        let seq = shard_seq(sb.info.id);
        pg.shards.write().expect("lock poisoned").insert(
            seq,
            ShardHandle {
                info: sb.info.clone(),
                p_chunk_id: sb.p_chunk_id,
                v_chunk_id: sb.v_chunk_id,
            },
        );
        pg.next_shard_seq.fetch_max(seq, Ordering::SeqCst);
        info!(shard_id = sb.info.id, state = ?sb.info.state, "recovered shard");
    }
}
