//! The engine's replication listener: dispatches log entries to the
//! per-message handlers.
//!
//! Header corruption at commit cannot retroactively reject the consensus
//! decision; the replica leaves its state untouched, raises a local
//! integrity alarm and fails the proposer's waiter with a CRC error.

use reef_repl::{
    ProposalCtx, ReplError, ReplListener, ReplMemberInfo, ReplMessageHeader, ReplMsgType,
};
use reef_types::{BlkAllocHints, GroupId, MultiBlkId, ShardInfo};
use tracing::error;

use crate::engine::ReefEngine;
use crate::error::{BlobError, PGError, ShardError};
use crate::result_ctx::resolve;

impl ReplListener for ReefEngine {
    fn on_pre_commit(&self, lsn: u64, header: &mut Vec<u8>, _key: &[u8]) -> bool {
        let msg_type = match ReplMessageHeader::split(header) {
            Ok((h, payload)) if !h.corrupted() && h.payload_matches(payload) => h.msg_type,
            _ => {
                error!(lsn, "corrupted message header at pre-commit");
                return false;
            }
        };
        match msg_type {
            ReplMsgType::CreateShard => self.on_shard_message_pre_commit(lsn, header),
            _ => true,
        }
    }

    fn on_commit(
        &self,
        lsn: u64,
        header: &[u8],
        _key: &[u8],
        blkids: MultiBlkId,
        ctx: Option<&ProposalCtx>,
    ) {
        let (msg_header, payload) = match ReplMessageHeader::split(header) {
            Ok(parts) => parts,
            Err(e) => {
                error!(lsn, %e, "unparseable message header at commit");
                return;
            }
        };

        if msg_header.corrupted() || !msg_header.payload_matches(payload) {
            error!(lsn, ?msg_header, "message header corrupted at commit");
            match msg_header.msg_type {
                ReplMsgType::CreatePg => {
                    resolve::<(), PGError>(ctx, Err(PGError::CrcMismatch));
                }
                ReplMsgType::CreateShard | ReplMsgType::SealShard => {
                    resolve::<ShardInfo, ShardError>(ctx, Err(ShardError::InvalidArg));
                }
                ReplMsgType::PutBlob | ReplMsgType::DelBlob => {
                    resolve::<(), BlobError>(ctx, Err(BlobError::CrcMismatch));
                }
            }
            return;
        }

        match msg_header.msg_type {
            ReplMsgType::CreatePg => self.on_create_pg_commit(lsn, payload, ctx),
            ReplMsgType::CreateShard | ReplMsgType::SealShard => {
                self.on_shard_message_commit(lsn, msg_header.msg_type, payload, ctx)
            }
            ReplMsgType::PutBlob => self.on_blob_put_commit(lsn, payload, blkids, ctx),
            ReplMsgType::DelBlob => self.on_blob_del_commit(lsn, payload, ctx),
        }
    }

    fn on_rollback(&self, lsn: u64, header: &[u8], _key: &[u8]) {
        if let Ok((h, _)) = ReplMessageHeader::split(header)
            && h.msg_type == ReplMsgType::CreateShard
        {
            self.on_shard_message_rollback(lsn, header);
        }
    }

    fn on_replace_member(
        &self,
        group_id: GroupId,
        member_out: &ReplMemberInfo,
        member_in: &ReplMemberInfo,
    ) {
        self.handle_replace_member(group_id, member_out, member_in);
    }

    fn blob_alloc_hints(&self, header: &[u8]) -> Result<BlkAllocHints, ReplError> {
        self.blob_put_get_blk_alloc_hints(header)
    }
}
