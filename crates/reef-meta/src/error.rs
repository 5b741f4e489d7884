//! Error types for the metadata store.

/// Errors returned by [`MetaStore`](crate::MetaStore) and
/// [`IndexTable`](crate::IndexTable) operations.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// Fjall database error.
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    /// I/O error (e.g. while creating a temporary store).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted superblock failed to decode.
    #[error("superblock decode error: {0}")]
    Decode(#[from] reef_types::superblk::DecodeError),

    /// Stored bytes are structurally invalid.
    #[error("corrupt metadata: {0}")]
    CorruptData(String),

    /// The referenced index table does not exist.
    #[error("unknown index table: {0}")]
    UnknownIndexTable(uuid::Uuid),
}
