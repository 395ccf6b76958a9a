//! # Reentrancy Coordinator
//!
//! Lets a call context that is blocked on its own remote call service inbound
//! calls addressed to it, instead of having them wait for a worker that would
//! deadlock against the blocked caller.
//!
//! ## Protocol
//!
//! While a context awaits a response it is registered here. An inbound call
//! whose target context is registered is pushed onto that context's queue and
//! the waiter is signalled. The waiter drains the queue in place, one job at a
//! time, then resumes waiting. A signal with an empty queue is ignored.
//!
//! ## Invariants
//! - **Depth**: Nested waits on one context share one entry; the entry is removed
//!   when the outermost wait completes.
//! - **Drain Before Observe**: A waiter runs every job delivered before its
//!   response resolves, ahead of returning that response.
//! - **No Lost Jobs**: A job that lands after the entry was removed is spawned
//!   on a fresh context rather than dropped.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::Mutex;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::BoxFuture;
use tokio::sync::Notify;
use tracing::debug;
use tracing::warn;

use crate::context::ContextId;

/// An inbound call waiting to run on a given context. It receives the context
/// it ends up running on.
pub type PendingJob = Box<dyn FnOnce(ContextId) -> BoxFuture<'static, ()> + Send>;

static SHARED: LazyLock<Arc<Coordinator>> = LazyLock::new(|| Arc::new(Coordinator::new()));

#[derive(Default)]
struct WaitState {
    depth: usize,
    pending: VecDeque<PendingJob>,
}

#[derive(Default)]
struct WaitingContext {
    state: Mutex<WaitState>,
    signal: Notify,
}

impl WaitingContext {
    fn pop(&self) -> Option<PendingJob> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).pending.pop_front()
    }
}

#[derive(Default)]
pub struct Coordinator {
    waiting: DashMap<ContextId, Arc<WaitingContext>>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide coordinator.
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED)
    }

    /// Number of nested waits `ctx` is currently blocked in.
    pub fn depth(&self, ctx: ContextId) -> usize {
        self.waiting
            .get(&ctx)
            .map(|entry| entry.state.lock().unwrap_or_else(|e| e.into_inner()).depth)
            .unwrap_or(0)
    }

    pub fn is_waiting(&self, ctx: ContextId) -> bool {
        self.waiting.contains_key(&ctx)
    }

    /// Hands `job` to `ctx` if it is waiting. Gives the job back otherwise.
    pub fn deliver(&self, ctx: ContextId, job: PendingJob) -> Result<(), PendingJob> {
        // The map guard is held across the push so the entry cannot be removed
        // between the lookup and the enqueue.
        let Some(entry) = self.waiting.get(&ctx) else {
            return Err(job);
        };
        entry.state.lock().unwrap_or_else(|e| e.into_inner()).pending.push_back(job);
        entry.signal.notify_one();
        debug!(context = %ctx, "delivered inbound call to waiting context");
        Ok(())
    }

    /// Awaits `response` on behalf of `ctx`, running any job delivered to `ctx`
    /// in the meantime.
    pub async fn await_response<F: Future>(&self, ctx: ContextId, response: F) -> F::Output {
        let waiting = self.register(ctx);
        let _registration = Registration { coordinator: self, ctx };
        tokio::pin!(response);

        loop {
            while let Some(job) = waiting.pop() {
                job(ctx).await;
            }

            tokio::select! {
                biased;
                _ = waiting.signal.notified() => continue,
                output = &mut response => {
                    while let Some(job) = waiting.pop() {
                        job(ctx).await;
                    }
                    return output;
                }
            }
        }
    }

    fn register(&self, ctx: ContextId) -> Arc<WaitingContext> {
        let entry = self.waiting.entry(ctx).or_default();
        entry.state.lock().unwrap_or_else(|e| e.into_inner()).depth += 1;
        Arc::clone(entry.value())
    }

    /// Leaves one level of waiting. Returns jobs stranded by the last level.
    fn unregister(&self, ctx: ContextId) -> Vec<PendingJob> {
        let Entry::Occupied(entry) = self.waiting.entry(ctx) else {
            return Vec::new();
        };
        let stranded = {
            let mut state = entry.get().state.lock().unwrap_or_else(|e| e.into_inner());
            state.depth = state.depth.saturating_sub(1);
            if state.depth > 0 {
                return Vec::new();
            }
            state.pending.drain(..).collect()
        };
        entry.remove();
        stranded
    }
}

/// Unregisters a wait when it finishes or is cancelled.
struct Registration<'a> {
    coordinator: &'a Coordinator,
    ctx: ContextId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let stranded = self.coordinator.unregister(self.ctx);
        if stranded.is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(context = %self.ctx, count = stranded.len(), "dropping inbound calls: no runtime");
            return;
        };
        for job in stranded {
            handle.spawn(job(ContextId::next()));
        }
    }
}
