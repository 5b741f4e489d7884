//! Replication port for Reef.
//!
//! The engine drives every state change through a PG-scoped replicated log.
//! This crate defines the wire framing ([`ReplMessageHeader`]), the port
//! traits the consensus layer implements ([`ReplDev`], [`ReplService`]) and
//! the hooks the engine implements ([`ReplListener`]), plus the
//! [`ReplError`] taxonomy the engine maps into its public errors.
//!
//! [`local`] provides an in-process, multi-replica implementation with a
//! deterministic commit order and fault injection, used by tests and
//! single-process deployments.

pub mod error;
pub mod local;
pub mod message;
pub mod traits;

pub use error::ReplError;
pub use local::{LocalReplFabric, LocalReplService};
pub use message::{ReplMessageHeader, ReplMsgType};
pub use traits::{
    PeerReplStatus, Proposal, ProposalCtx, ReplDev, ReplListener, ReplMemberInfo, ReplService,
};
