//! Typed proposer contexts.
//!
//! A [`ResultCtx`] travels with a proposal as its opaque
//! [`ProposalCtx`](reef_repl::ProposalCtx); the commit handler on the
//! proposing replica downcasts it and resolves the caller's typed result.

use std::sync::{Arc, Mutex};

use reef_repl::ProposalCtx;
use tokio::sync::oneshot;

/// One-shot result slot for a single proposal.
pub(crate) struct ResultCtx<T, E> {
    tx: Mutex<Option<oneshot::Sender<Result<T, E>>>>,
}

impl<T: Send + 'static, E: Send + 'static> ResultCtx<T, E> {
    /// Create a context and the receiver the proposer awaits.
    pub(crate) fn make() -> (Arc<Self>, oneshot::Receiver<Result<T, E>>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    /// Resolve the proposer's waiter. Later calls are ignored.
    pub(crate) fn set(&self, value: Result<T, E>) {
        if let Some(tx) = self.tx.lock().expect("lock poisoned").take() {
            let _ = tx.send(value);
        }
    }
}

/// Downcast an opaque proposal context back to a typed [`ResultCtx`].
pub(crate) fn downcast<T, E>(ctx: Option<&ProposalCtx>) -> Option<&ResultCtx<T, E>>
where
    T: Send + 'static,
    E: Send + 'static,
{
    ctx.and_then(|c| c.as_ref().downcast_ref::<ResultCtx<T, E>>())
}

/// Resolve a typed waiter if one is attached.
pub(crate) fn resolve<T, E>(ctx: Option<&ProposalCtx>, value: Result<T, E>)
where
    T: Send + 'static,
    E: Send + 'static,
{
    if let Some(rc) = downcast::<T, E>(ctx) {
        rc.set(value);
    }
}
