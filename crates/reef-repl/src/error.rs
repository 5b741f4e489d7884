//! Error taxonomy of the replication layer.

/// Errors surfaced by the replication port.
///
/// Success is expressed through `Result`, so there is no `OK` variant; the
/// engine maps these into its per-manager error enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReplError {
    /// Malformed or inapplicable request.
    #[error("bad request")]
    BadRequest,

    /// The request was cancelled before completion.
    #[error("cancelled")]
    Cancelled,

    /// A membership change is in flight.
    #[error("config changing")]
    ConfigChanging,

    /// The peer being added already exists in the group.
    #[error("server already exists")]
    ServerAlreadyExists,

    /// The peer being added is still joining another group.
    #[error("server is joining")]
    ServerIsJoining,

    /// The peer being removed is still leaving.
    #[error("server is leaving")]
    ServerIsLeaving,

    /// The operation's result is not yet available.
    #[error("result not exist yet")]
    ResultNotExistYet,

    /// Raft term mismatch.
    #[error("term mismatch")]
    TermMismatch,

    /// The operation is not implemented by this replication backend.
    #[error("not implemented")]
    NotImplemented,

    /// This replica is not the group leader.
    #[error("not leader")]
    NotLeader,

    /// The group leader cannot be removed.
    #[error("cannot remove leader")]
    CannotRemoveLeader,

    /// Quorum was not reached in time.
    #[error("timeout")]
    Timeout,

    /// No such replication group.
    #[error("server not found")]
    ServerNotFound,

    /// Block allocation failed for lack of space.
    #[error("no space left")]
    NoSpaceLeft,

    /// The local drive rejected a write.
    #[error("drive write error")]
    DriveWriteError,

    /// Transient failure; the caller should retry.
    #[error("retry request")]
    RetryRequest,

    /// Unclassified failure.
    #[error("failed")]
    Failed,
}
