//! Public error taxonomies of the three managers, plus the internal
//! infrastructure error used by recovery and checkpointing.
//!
//! Success travels through `Result`, so none of the taxonomies carries an
//! `OK` variant. Replication-layer errors are folded in through the `From`
//! impls below; anything unrecognised or benign-but-unactionable becomes
//! `INVALID_ARG`, and `FAILED` becomes `UNKNOWN`.

use reef_repl::ReplError;

/// Errors returned by PG manager operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PGError {
    /// Quorum was not reached in time.
    #[error("timeout")]
    Timeout,
    /// The operation requires the group leader.
    #[error("not leader")]
    NotLeader,
    /// No such placement group.
    #[error("unknown pg")]
    UnknownPg,
    /// No such peer in the replica set.
    #[error("unknown peer")]
    UnknownPeer,
    /// Malformed or inapplicable request.
    #[error("invalid argument")]
    InvalidArg,
    /// Header or payload checksum mismatch.
    #[error("crc mismatch")]
    CrcMismatch,
    /// Not enough free chunks or blocks.
    #[error("no space left")]
    NoSpaceLeft,
    /// The local drive rejected a write.
    #[error("drive write error")]
    DriveWriteError,
    /// Transient failure; retry the request.
    #[error("retry request")]
    RetryRequest,
    /// Unclassified failure.
    #[error("unknown error")]
    Unknown,
}

impl From<ReplError> for PGError {
    fn from(e: ReplError) -> Self {
        match e {
            ReplError::NotLeader => PGError::NotLeader,
            ReplError::CannotRemoveLeader => PGError::UnknownPeer,
            ReplError::Timeout => PGError::Timeout,
            ReplError::ServerNotFound => PGError::UnknownPg,
            ReplError::NoSpaceLeft => PGError::NoSpaceLeft,
            ReplError::DriveWriteError => PGError::DriveWriteError,
            ReplError::RetryRequest => PGError::RetryRequest,
            ReplError::Failed => PGError::Unknown,
            ReplError::BadRequest
            | ReplError::Cancelled
            | ReplError::ConfigChanging
            | ReplError::ServerAlreadyExists
            | ReplError::ServerIsJoining
            | ReplError::ServerIsLeaving
            | ReplError::ResultNotExistYet
            | ReplError::TermMismatch
            | ReplError::NotImplemented => PGError::InvalidArg,
        }
    }
}

/// Errors returned by shard manager operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ShardError {
    /// Quorum was not reached in time.
    #[error("timeout")]
    Timeout,
    /// The operation requires the group leader.
    #[error("not leader")]
    NotLeader,
    /// Malformed or inapplicable request.
    #[error("invalid argument")]
    InvalidArg,
    /// No such placement group.
    #[error("unknown pg")]
    UnknownPg,
    /// No such shard.
    #[error("unknown shard")]
    UnknownShard,
}

impl From<ReplError> for ShardError {
    fn from(e: ReplError) -> Self {
        match e {
            ReplError::NotLeader => ShardError::NotLeader,
            ReplError::Timeout => ShardError::Timeout,
            ReplError::ServerNotFound => ShardError::UnknownPg,
            _ => ShardError::InvalidArg,
        }
    }
}

/// Errors returned by blob engine operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BlobError {
    /// No such blob, or the blob is tombstoned.
    #[error("unknown blob")]
    UnknownBlob,
    /// No such shard.
    #[error("unknown shard")]
    UnknownShard,
    /// No such placement group.
    #[error("unknown pg")]
    UnknownPg,
    /// Malformed or inapplicable request (including puts to sealed shards).
    #[error("invalid argument")]
    InvalidArg,
    /// The operation requires the group leader.
    #[error("not leader")]
    NotLeader,
    /// Quorum was not reached in time.
    #[error("timeout")]
    Timeout,
    /// Header, payload or stored-data checksum mismatch.
    #[error("crc mismatch")]
    CrcMismatch,
    /// Not enough free blocks in the shard's chunk.
    #[error("no space left")]
    NoSpaceLeft,
    /// Transient failure; retry the request.
    #[error("retry request")]
    RetryRequest,
    /// Unclassified failure.
    #[error("unknown error")]
    Unknown,
}

impl From<ReplError> for BlobError {
    fn from(e: ReplError) -> Self {
        match e {
            ReplError::NotLeader => BlobError::NotLeader,
            ReplError::Timeout => BlobError::Timeout,
            ReplError::ServerNotFound => BlobError::UnknownPg,
            ReplError::NoSpaceLeft => BlobError::NoSpaceLeft,
            ReplError::RetryRequest => BlobError::RetryRequest,
            ReplError::DriveWriteError | ReplError::Failed => BlobError::Unknown,
            _ => BlobError::InvalidArg,
        }
    }
}

/// Infrastructure errors surfaced by recovery and checkpointing.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Metadata store failure.
    #[error("meta error: {0}")]
    Meta(#[from] reef_meta::MetaError),

    /// Block device failure.
    #[error("store error: {0}")]
    Store(#[from] reef_store::StoreError),

    /// Replication layer failure.
    #[error("replication error: {0}")]
    Repl(#[from] ReplError),
}
