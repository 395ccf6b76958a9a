//! # Connection with Async Pump
//!
//! A `Connection` is one side of a peer-to-peer link. It owns the object
//! registry and proxy cache scoped to that link and runs a background pump that
//! demultiplexes incoming frames: responses are routed to the pending call with
//! the same sequence number, requests are dispatched to workers or delivered to
//! the waiting call context they name.
//!
//! ## Invariants
//! - **Pump Never Blocks**: Requests are spawned or queued, never executed on
//!   the pump, so a slow target cannot starve response routing.
//! - **No Hangs Past Teardown**: When the link closes every pending call fails
//!   with `ConnectionClosed`, and new calls fail immediately.
//! - **Every Received Call Is Answered**: Unless it is one-way, each request
//!   gets a response, falling back to a bare 500 if the real one cannot be
//!   encoded.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use duorpc::Fault;
use duorpc::Frame;
use duorpc::ObjectDescriptor;
use duorpc::RemoteObjectReference;
use duorpc::Request;
use duorpc::RequestKind;
use duorpc::Response;
use duorpc::STATUS_ERROR;
use duorpc::STATUS_OK;
use duorpc::WireValue;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::builder::ConnectionBuilder;
use crate::context::CallContext;
use crate::context::ContextId;
use crate::error::Error;
use crate::error::Result;
use crate::invocation::LocalInvocation;
use crate::invocation::RemoteInvocation;
use crate::listener::ErasedListener;
use crate::object::MethodSignature;
use crate::object::ObjectRef;
use crate::object::Value;
use crate::proxy::Proxy;
use crate::proxy::ProxyCache;
use crate::reentrancy::Coordinator;
use crate::reentrancy::PendingJob;
use crate::registry::ObjectRegistry;
use crate::transport::Transport;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Process-wide identity of a connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Settings a connection is started with.
pub(crate) struct Config {
    pub name: String,
    pub uri: String,
    pub bidirectional: bool,
    pub listener: Option<Arc<dyn ErasedListener>>,
    pub response_timeout: Option<Duration>,
    pub coordinator: Arc<Coordinator>,
}

/// State shared by a connection handle, its proxies and its pump.
pub(crate) struct Shared {
    pub id: ConnectionId,
    pub name: String,
    pub uri: String,
    pub bidirectional: bool,
    pub listener: Option<Arc<dyn ErasedListener>>,
    pub registry: ObjectRegistry,
    pub proxies: ProxyCache,
    coordinator: Arc<Coordinator>,
    response_timeout: Option<Duration>,
    transport: Arc<dyn Transport>,
    pending: DashMap<u64, oneshot::Sender<Response>>,
    seq_gen: AtomicU64,
    closed: AtomicBool,
    pump: Mutex<Option<AbortHandle>>,
}

/// Removes a pending slot when its call completes or is abandoned.
struct PendingSlot<'a> {
    pending: &'a DashMap<u64, oneshot::Sender<Response>>,
    seq: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.seq);
    }
}

impl Shared {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn next_seq(&self) -> u64 {
        self.seq_gen.fetch_add(1, Ordering::Relaxed)
    }

    async fn send_frame(&self, frame: &Frame) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let bytes = frame.encode()?;
        self.transport.send(&bytes).await?;
        Ok(())
    }

    /// Sends `request` and waits for its response. With `waiter` set, the wait
    /// goes through the coordinator so inbound calls for that context run in
    /// the meantime; without it the wait is uninterruptible.
    async fn round_trip(&self, mut request: Request, waiter: Option<ContextId>) -> Result<Response> {
        let seq = self.next_seq();
        request.seq = seq;
        request.expects_response = true;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(seq, tx);
        let _slot = PendingSlot {
            pending: &self.pending,
            seq,
        };
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        self.send_frame(&Frame::Request(request)).await?;

        let response = async move {
            match self.response_timeout {
                Some(limit) => match tokio::time::timeout(limit, rx).await {
                    Ok(received) => received.map_err(|_| Error::ConnectionClosed),
                    Err(_) => Err(Error::Timeout),
                },
                None => rx.await.map_err(|_| Error::ConnectionClosed),
            }
        };
        match waiter {
            Some(ctx) => self.coordinator.await_response(ctx, response).await,
            None => response.await,
        }
    }

    pub async fn invoke_remote(
        self: &Arc<Self>,
        target: RemoteObjectReference,
        method: &MethodSignature,
        args: Vec<Value>,
    ) -> Result<Value> {
        let call = CallContext::current_or_new();
        let mut request = RemoteInvocation { target, method, args }.into_request(self, &call)?;

        if method.is_asynchronous() {
            request.seq = self.next_seq();
            if let Err(e) = self.send_frame(&Frame::Request(request)).await {
                debug!(connection = %self.id, id = target.id, method = %method, "one-way call not sent: {}", e);
            }
            return Ok(Value::Null);
        }

        let response = self.round_trip(request, Some(call.id)).await?;
        if !response.is_ok() {
            return Err(failure(&response));
        }
        if !response.has_content() {
            return Ok(Value::Null);
        }
        let wire: WireValue = response.content_object()?;
        let missing = match &wire {
            WireValue::Reference(reference) => reference.id,
            _ => 0,
        };
        self.import(wire).ok_or_else(|| Error::TargetNotFound {
            id: missing,
            method: method.name().to_string(),
        })
    }

    /// Turns a received wire value into a local value. Returns `None` for a
    /// reference to an object we no longer export.
    pub fn import(self: &Arc<Self>, wire: WireValue) -> Option<Value> {
        match wire {
            WireValue::Descriptor(descriptor) => Some(Value::Object(self.proxies.get_or_create(self, descriptor))),
            WireValue::Reference(reference) => self.registry.resolve(reference.id).map(Value::Object),
            plain => Value::from_plain_wire(plain),
        }
    }

    /// Classifies a result for the wire.
    pub fn marshal_result(&self, value: Value) -> WireValue {
        match value {
            Value::Object(object) => match object.as_proxy().filter(|proxy| proxy.belongs_to(self)) {
                Some(proxy) => WireValue::Reference(proxy.remote_reference()),
                None => WireValue::Descriptor(self.registry.export(&object)),
            },
            plain => plain.to_plain_wire().unwrap_or(WireValue::Null),
        }
    }

    pub async fn respond<T: Serialize>(&self, seq: u64, outcome: std::result::Result<T, Fault>) {
        let response = match &outcome {
            Ok(value) => encoded(seq, STATUS_OK, value),
            Err(fault) => encoded(seq, fault.status(), fault),
        };
        let response = response.unwrap_or_else(|e| {
            error!(connection = %self.id, seq, "could not encode response: {}", e);
            let fault = Fault::Internal(format!("response could not be encoded: {}", e));
            encoded(seq, STATUS_ERROR, &fault).unwrap_or_else(|_| Response::with_status(seq, STATUS_ERROR))
        });
        if let Err(e) = self.send_frame(&Frame::Response(response)).await {
            error!(connection = %self.id, seq, "could not send response: {}", e);
        }
    }

    /// Sends a one-way release notice for `reference`, off the caller's task.
    pub fn release(self: &Arc<Self>, reference: RemoteObjectReference) {
        if self.is_closed() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(connection = %self.id, id = reference.id, "release notice dropped: no runtime");
            return;
        };
        let shared = Arc::clone(self);
        handle.spawn(async move {
            let mut request = Request::new(RequestKind::Finalize, shared.uri.clone());
            request.seq = shared.next_seq();
            request.expects_response = false;
            let sent = match request.set_content_object(&reference.id) {
                Ok(()) => shared.send_frame(&Frame::Request(request)).await,
                Err(e) => Err(e.into()),
            };
            match sent {
                Ok(()) => debug!(connection = %shared.id, id = reference.id, "sent release notice"),
                Err(e) => warn!(connection = %shared.id, id = reference.id, "release notice not delivered: {}", e),
            }
        });
    }

    fn complete(&self, response: Response) {
        match self.pending.remove(&response.seq) {
            Some((_, tx)) => {
                let _ = tx.send(response);
            }
            None => debug!(connection = %self.id, seq = response.seq, "response for no pending call"),
        }
    }

    fn dispatch(self: &Arc<Self>, request: Request) {
        match request.kind {
            RequestKind::Invoke => self.dispatch_invoke(request),
            RequestKind::Finalize => match request.content_object::<u64>() {
                Ok(id) => {
                    let removed = self.registry.remove(id);
                    debug!(connection = %self.id, id, removed, "peer released proxy");
                }
                Err(e) => warn!(connection = %self.id, "malformed release notice: {}", e),
            },
            RequestKind::Lookup => {
                let shared = Arc::clone(self);
                tokio::spawn(async move {
                    let outcome = request
                        .content_object::<String>()
                        .map(|name| shared.registry.named(&name).map(|object| shared.registry.export(&object)))
                        .map_err(|e| Fault::BadRequest(e.to_string()));
                    shared.respond::<Option<ObjectDescriptor>>(request.seq, outcome).await;
                });
            }
        }
    }

    fn dispatch_invoke(self: &Arc<Self>, request: Request) {
        let invocation = match LocalInvocation::from_request(&request) {
            Ok(invocation) => invocation,
            Err(fault) => {
                warn!(connection = %self.id, seq = request.seq, %fault, "rejecting invocation");
                if request.expects_response {
                    let shared = Arc::clone(self);
                    tokio::spawn(async move { shared.respond::<WireValue>(request.seq, Err(fault)).await });
                }
                return;
            }
        };

        let target_context = invocation.target_context;
        let mut job = self.job(invocation);
        if let Some(ctx) = target_context {
            match self.coordinator.deliver(ctx, job) {
                Ok(()) => return,
                Err(returned) => job = returned,
            }
        }
        tokio::spawn(job(ContextId::next()));
    }

    fn job(self: &Arc<Self>, invocation: LocalInvocation) -> PendingJob {
        let shared = Arc::clone(self);
        Box::new(move |ctx| {
            // Called on the waiter's task when delivered, so `ctx` keeps what it
            // is servicing on other connections.
            let call = CallContext::servicing(ctx, shared.id, invocation.requesting_context);
            call.scope(invocation.run(shared, ctx)).boxed()
        })
    }

    /// Fails every pending call and drops everything this link exported.
    fn teardown(&self, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(connection = %self.id, name = %self.name, reason, "connection torn down");
        self.pending.clear();
        self.registry.clear();
        if let Some(pump) = self.pump.lock().unwrap_or_else(|e| e.into_inner()).take() {
            pump.abort();
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            pump.abort();
        }
    }
}

fn encoded<T: Serialize + ?Sized>(seq: u64, status: u16, body: &T) -> duorpc::Result<Response> {
    let mut response = Response::with_status(seq, status);
    response.set_content_object(body)?;
    Ok(response)
}

/// The caller-side error for a non-200 response.
fn failure(response: &Response) -> Error {
    match response.content_object::<Fault>() {
        Ok(fault) => Error::from_fault(response.status, fault),
        Err(_) => Error::Remote {
            status: response.status,
            message: None,
        },
    }
}

/// Reads frames until the transport ends, then tears the link down.
async fn pump(transport: Arc<dyn Transport>, link: Weak<Shared>) {
    let reason = loop {
        let frame = match transport.recv().await {
            Ok(Some(bytes)) => Frame::decode(&bytes),
            Ok(None) => break "peer closed the transport".to_string(),
            Err(e) => break e.to_string(),
        };
        let Some(shared) = link.upgrade() else {
            return;
        };
        match frame {
            Ok(Frame::Response(response)) => shared.complete(response),
            Ok(Frame::Request(request)) => shared.dispatch(request),
            Err(e) => warn!(connection = %shared.id, "discarding undecodable frame: {}", e),
        }
    };

    let closed = transport.close().await;
    if let Some(shared) = link.upgrade() {
        if let Err(e) = closed {
            debug!(connection = %shared.id, "transport close failed: {}", e);
        }
        shared.teardown(&reason);
    }
}

/// One side of a bidirectional object link.
///
/// Cloning is cheap; clones share the registry, proxies and pump.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Starts the pump. Must be called within a tokio runtime.
    pub(crate) fn start(config: Config, transport: Arc<dyn Transport>) -> Self {
        let shared = Arc::new(Shared {
            id: ConnectionId::next(),
            name: config.name,
            uri: config.uri,
            bidirectional: config.bidirectional,
            listener: config.listener,
            registry: ObjectRegistry::new(),
            proxies: ProxyCache::default(),
            coordinator: config.coordinator,
            response_timeout: config.response_timeout,
            transport: Arc::clone(&transport),
            pending: DashMap::new(),
            seq_gen: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            pump: Mutex::new(None),
        });

        let task = tokio::spawn(pump(transport, Arc::downgrade(&shared)));
        *shared.pump.lock().unwrap_or_else(|e| e.into_inner()) = Some(task.abort_handle());
        debug!(connection = %shared.id, name = %shared.name, bidirectional = shared.bidirectional, "connection started");
        Self { shared }
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_bidirectional(&self) -> bool {
        self.shared.bidirectional
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// The objects this side exposes over this connection.
    pub fn registry(&self) -> &ObjectRegistry {
        &self.shared.registry
    }

    /// Exposes `object` to the peer and returns its descriptor.
    pub fn export(&self, object: &ObjectRef) -> ObjectDescriptor {
        self.shared.registry.export(object)
    }

    /// Binds `name` so the peer can `lookup` it.
    pub fn publish(&self, name: impl Into<String>, object: ObjectRef) {
        self.shared.registry.publish(name, object);
    }

    /// Resolves a name the peer published. The wait is not interruptible by
    /// inbound calls.
    pub async fn lookup(&self, name: &str) -> Result<Option<Arc<Proxy>>> {
        let mut request = Request::new(RequestKind::Lookup, self.shared.uri.clone());
        request.set_content_object(name)?;
        let response = self.shared.round_trip(request, None).await?;
        if !response.is_ok() {
            return Err(failure(&response));
        }
        let descriptor: Option<ObjectDescriptor> = response.content_object()?;
        Ok(descriptor.map(|descriptor| self.shared.proxies.get_or_create(&self.shared, descriptor)))
    }

    /// The proxy for remote object `id`, created if no live one exists.
    pub fn proxy<I, S>(&self, id: u64, capabilities: I) -> Arc<Proxy>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let descriptor = ObjectDescriptor::new(id, capabilities);
        self.shared.proxies.get_or_create(&self.shared, descriptor)
    }

    /// Number of proxies imported over this connection that are still alive.
    pub fn live_proxies(&self) -> usize {
        self.shared.proxies.live()
    }

    /// Closes the transport and fails every pending call.
    pub async fn close(&self) {
        if self.shared.is_closed() {
            return;
        }
        if let Err(e) = self.shared.transport.close().await {
            debug!(connection = %self.shared.id, "transport close failed: {}", e);
        }
        self.shared.teardown("closed locally");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}
