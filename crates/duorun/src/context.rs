//! # Call Contexts
//!
//! A call context stands in for a thread identity. It is carried in a task-local
//! and persists across a task's awaits, so a peer can address an inbound call at
//! "the caller that is blocked waiting on me" rather than at any free worker.
//!
//! ## Invariants
//! - **Unique**: `ContextId`s are process-wide and never reused.
//! - **Scoped Servicing**: A context remembers, per connection, the remote
//!   context whose call it is executing. That id is attached to outbound calls as
//!   the target context only when they go back over the same connection, so a
//!   chain of callbacks through several peers can always reach the caller that
//!   is blocked on each link.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::connection::ConnectionId;

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static CURRENT: CallContext;
}

/// Identity of a logical caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Allocates a fresh identity.
    pub fn next() -> Self {
        Self(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// A logical caller, plus the remote callers it is servicing on each connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallContext {
    pub id: ContextId,
    /// For each connection, the peer's context whose call this one is executing.
    servicing: BTreeMap<ConnectionId, ContextId>,
}

impl CallContext {
    /// A fresh context that is not servicing anything.
    pub fn new() -> Self {
        Self {
            id: ContextId::next(),
            servicing: BTreeMap::new(),
        }
    }

    /// Context `id` servicing `remote` over `connection`. Entries for other
    /// connections are kept from the running context when it is `id` itself,
    /// so a callback delivered to a blocked caller can still reach every peer
    /// upstream of it.
    pub(crate) fn servicing(id: ContextId, connection: ConnectionId, remote: ContextId) -> Self {
        let mut call = Self::current()
            .filter(|current| current.id == id)
            .unwrap_or_else(|| Self {
                id,
                servicing: BTreeMap::new(),
            });
        call.servicing.insert(connection, remote);
        call
    }

    /// The context of the running task, if it has one.
    pub fn current() -> Option<Self> {
        CURRENT.try_with(|ctx| ctx.clone()).ok()
    }

    /// The context of the running task, or a fresh one for a task outside any scope.
    pub fn current_or_new() -> Self {
        Self::current().unwrap_or_else(Self::new)
    }

    /// The remote context to address an outbound call on `connection` at.
    pub fn target_on(&self, connection: ConnectionId) -> Option<ContextId> {
        self.servicing.get(&connection).copied()
    }

    /// Runs `fut` with this context as the current one.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT.scope(self, fut).await
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `fut` under a fresh call context, so every remote call it makes is
/// issued by the same logical caller.
pub async fn with_new_context<F: Future>(fut: F) -> F::Output {
    CallContext::new().scope(fut).await
}

/// Id of the running task's call context, if it has one.
pub fn current_context() -> Option<ContextId> {
    CallContext::current().map(|ctx| ctx.id)
}
