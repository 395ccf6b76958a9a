//! # Remote Object Proxies
//!
//! A `Proxy` is the local stand-in for an object exported by the peer. Every
//! call on it becomes an outbound invocation over the connection it is bound
//! to.
//!
//! ## Invariants
//! - **One Live Proxy per Id**: The cache holds proxies weakly and serializes
//!   creation, so concurrent imports of one id observe the same proxy.
//! - **Local Accessor**: `remote_reference()` (and the `getRemoteObjectReference`
//!   method) answer without touching the network.
//! - **Best-Effort Release**: Dropping the last handle to a proxy sends a
//!   one-way `finalize` to the peer. Failure to deliver it is logged, not raised.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;

use duorpc::ObjectDescriptor;
use duorpc::RemoteObjectReference;

use crate::connection::Shared;
use crate::error::Error;
use crate::error::Result;
use crate::object::Failure;
use crate::object::GET_REMOTE_REFERENCE;
use crate::object::MethodSignature;
use crate::object::REMOTE_REFERENCE_ACCESSOR;
use crate::object::RemoteObject;
use crate::object::Value;

pub struct Proxy {
    shared: Arc<Shared>,
    reference: RemoteObjectReference,
    capabilities: BTreeSet<String>,
}

impl Proxy {
    /// The identity of the remote object. Never goes over the wire.
    pub fn remote_reference(&self) -> RemoteObjectReference {
        self.reference
    }

    /// Whether this proxy answers for `capability`.
    pub fn implements(&self, capability: &str) -> bool {
        capability == REMOTE_REFERENCE_ACCESSOR || self.capabilities.contains(capability)
    }

    /// Invokes `method` on the remote object.
    pub async fn call(&self, method: &MethodSignature, args: Vec<Value>) -> Result<Value> {
        if method.is(GET_REMOTE_REFERENCE, 0) {
            return Ok(Value::Int(self.reference.id as i64));
        }
        self.shared.invoke_remote(self.reference, method, args).await
    }

    /// Whether this proxy was imported over the connection behind `shared`.
    pub(crate) fn belongs_to(&self, shared: &Shared) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.shared), shared)
    }
}

#[async_trait::async_trait]
impl RemoteObject for Proxy {
    fn capabilities(&self) -> Vec<String> {
        self.capabilities.iter().cloned().collect()
    }

    async fn invoke(&self, method: &MethodSignature, args: Vec<Value>) -> std::result::Result<Value, Failure> {
        self.call(method, args).await.map_err(|e| match e {
            Error::Application(app) => Failure::Application(app),
            other => Failure::Internal(other.to_string()),
        })
    }

    fn as_proxy(&self) -> Option<&Proxy> {
        Some(self)
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("reference", &self.reference)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        if self.shared.proxies.forget(self.reference.id) {
            self.shared.release(self.reference);
        }
    }
}

/// Weak, per-connection cache of imported proxies.
#[derive(Default)]
pub(crate) struct ProxyCache {
    entries: Mutex<HashMap<u64, Weak<Proxy>>>,
}

impl ProxyCache {
    /// Returns the live proxy for `descriptor`, creating it if there is none.
    pub(crate) fn get_or_create(&self, shared: &Arc<Shared>, descriptor: ObjectDescriptor) -> Arc<Proxy> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let id = descriptor.id();
        if let Some(proxy) = entries.get(&id).and_then(Weak::upgrade) {
            return proxy;
        }
        let proxy = Arc::new(Proxy {
            shared: Arc::clone(shared),
            reference: descriptor.remote_object_reference(),
            capabilities: descriptor.capabilities,
        });
        entries.insert(id, Arc::downgrade(&proxy));
        proxy
    }

    /// Removes a dead slot for `id`. Returns false if a newer proxy holds it.
    pub(crate) fn forget(&self, id: u64) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(&id) {
            Some(slot) if slot.strong_count() > 0 => false,
            _ => {
                entries.remove(&id);
                true
            }
        }
    }

    /// Number of live proxies.
    pub(crate) fn live(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values().filter(|slot| slot.strong_count() > 0).count()
    }
}
