//! # Object Monitors
//!
//! The mutual-exclusion handle behind synchronized methods. One monitor exists
//! per live local object, shared by every connection that exports it.
//!
//! ## Invariants
//! - **Reentrant**: The owning call context may enter again without blocking;
//!   the monitor is released when the outermost guard drops.
//! - **Exclusive**: Two different contexts never hold the same monitor at once.

use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::Mutex;
use std::sync::Weak;

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::context::ContextId;
use crate::object::ObjectRef;
use crate::object::identity;

static MONITORS: LazyLock<DashMap<usize, Weak<Monitor>>> = LazyLock::new(DashMap::new);

#[derive(Default)]
struct Ownership {
    owner: Option<ContextId>,
    depth: usize,
}

pub struct Monitor {
    key: Option<usize>,
    state: Mutex<Ownership>,
    released: Notify,
}

impl Monitor {
    /// A monitor not tied to any object.
    pub fn new() -> Self {
        Self {
            key: None,
            state: Mutex::new(Ownership::default()),
            released: Notify::new(),
        }
    }

    /// The monitor of `object`, created on first use.
    pub fn for_object(object: &ObjectRef) -> Arc<Self> {
        let key = identity(object);
        let mut slot = MONITORS.entry(key).or_default();
        if let Some(monitor) = slot.upgrade() {
            return monitor;
        }
        let monitor = Arc::new(Self {
            key: Some(key),
            state: Mutex::new(Ownership::default()),
            released: Notify::new(),
        });
        *slot = Arc::downgrade(&monitor);
        monitor
    }

    /// Waits until `ctx` owns the monitor.
    pub async fn enter(self: &Arc<Self>, ctx: ContextId) -> MonitorGuard {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if self.try_acquire(ctx) {
                return MonitorGuard {
                    monitor: Arc::clone(self),
                };
            }
            released.await;
        }
    }

    fn try_acquire(&self, ctx: ContextId) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.owner {
            None => {
                state.owner = Some(ctx);
                state.depth = 1;
                true
            }
            Some(owner) if owner == ctx => {
                state.depth += 1;
                true
            }
            Some(_) => false,
        }
    }

    pub fn owner(&self) -> Option<ContextId> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).owner
    }

    fn exit(&self) {
        let released = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.depth = state.depth.saturating_sub(1);
            if state.depth == 0 {
                state.owner = None;
            }
            state.owner.is_none()
        };
        if released {
            self.released.notify_waiters();
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(key) = self.key {
            MONITORS.remove_if(&key, |_, slot| slot.strong_count() == 0);
        }
    }
}

/// Held while a context owns a monitor.
pub struct MonitorGuard {
    monitor: Arc<Monitor>,
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        self.monitor.exit();
    }
}
