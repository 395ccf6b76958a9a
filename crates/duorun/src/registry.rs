//! # Object Registry
//!
//! Per-connection table of the local objects a peer may call: object identity
//! to descriptor for exports, id to object for inbound calls, and published
//! names for lookups.
//!
//! ## Invariants
//! - **Idempotent Export**: An object keeps one descriptor for as long as it
//!   stays exported.
//! - **Monotonic Ids**: Ids start at 1, strictly increase, and are never reused,
//!   not even after `remove`.
//! - **Paired Maps**: For every exported object, `targets[descriptor.id]` is that
//!   object. `remove` drops both directions at once.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use duorpc::ObjectDescriptor;

use crate::monitor::Monitor;
use crate::object::ObjectRef;
use crate::object::identity;

struct Target {
    object: ObjectRef,
    key: usize,
    monitor: Arc<Monitor>,
}

struct State {
    next_id: u64,
    exported: HashMap<usize, ObjectDescriptor>,
    targets: HashMap<u64, Target>,
    named: HashMap<String, ObjectRef>,
}

pub struct ObjectRegistry {
    state: Mutex<State>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1,
                exported: HashMap::new(),
                targets: HashMap::new(),
                named: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the descriptor of `object`, exporting it first if needed.
    pub fn export(&self, object: &ObjectRef) -> ObjectDescriptor {
        let key = identity(object);
        let mut state = self.lock();
        if let Some(descriptor) = state.exported.get(&key) {
            return descriptor.clone();
        }

        let id = state.next_id;
        state.next_id += 1;
        let descriptor = ObjectDescriptor::new(id, object.capabilities());
        state.exported.insert(key, descriptor.clone());
        state.targets.insert(
            id,
            Target {
                object: Arc::clone(object),
                key,
                monitor: Monitor::for_object(object),
            },
        );
        descriptor
    }

    pub fn resolve(&self, id: u64) -> Option<ObjectRef> {
        self.lock().targets.get(&id).map(|target| Arc::clone(&target.object))
    }

    pub(crate) fn resolve_target(&self, id: u64) -> Option<(ObjectRef, Arc<Monitor>)> {
        self.lock()
            .targets
            .get(&id)
            .map(|target| (Arc::clone(&target.object), Arc::clone(&target.monitor)))
    }

    /// Drops the object exported under `id`. Returns whether it was present.
    pub fn remove(&self, id: u64) -> bool {
        let removed = {
            let mut state = self.lock();
            let Some(target) = state.targets.remove(&id) else {
                return false;
            };
            state.exported.remove(&target.key);
            target
        };
        // The object may own proxies whose drop re-enters the registry.
        drop(removed);
        true
    }

    /// Binds `name` to `object` for peer lookups, replacing any previous binding.
    pub fn publish(&self, name: impl Into<String>, object: ObjectRef) {
        let previous = self.lock().named.insert(name.into(), object);
        drop(previous);
    }

    pub fn named(&self, name: &str) -> Option<ObjectRef> {
        self.lock().named.get(name).cloned()
    }

    /// Number of objects currently exported.
    pub fn len(&self) -> usize {
        self.lock().targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every export and binding. Ids are still not reused afterwards.
    pub fn clear(&self) {
        let (targets, named) = {
            let mut state = self.lock();
            state.exported.clear();
            (std::mem::take(&mut state.targets), std::mem::take(&mut state.named))
        };
        drop(targets);
        drop(named);
    }
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}
