//! # Invocations
//!
//! A `LocalInvocation` is a call a peer asked us to run; a `RemoteInvocation`
//! is a call we are about to ship to the peer.
//!
//! ## Marshaling Rules
//!
//! Arguments going out:
//! - a proxy of this connection travels as its bare reference;
//! - any other object travels as a descriptor, but only in a bidirectional
//!   context and only for an interface-typed parameter;
//! - every other value travels by content.
//!
//! Results going out travel by content when plain, as the bare reference when
//! they are a proxy of this connection, and as a freshly exported descriptor
//! otherwise.
//!
//! ## Invariants
//! - **No Silent Misses**: An unknown target is a `TargetNotFound` fault.
//! - **Ordered Synchronized Calls**: Listener hooks and the call itself run inside
//!   the target's monitor when the target declares the method synchronized.
//! - **Contained Panics**: A panicking target becomes an internal fault.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use duorpc::Fault;
use duorpc::InvocationHeaders;
use duorpc::RemoteObjectReference;
use duorpc::Request;
use duorpc::RequestKind;
use duorpc::WireValue;
use futures::FutureExt;
use tracing::error;
use tracing::warn;

use crate::connection::Shared;
use crate::context::CallContext;
use crate::context::ContextId;
use crate::error::Error;
use crate::error::Result;
use crate::monitor::Monitor;
use crate::object::Failure;
use crate::object::MethodSignature;
use crate::object::ObjectRef;
use crate::object::ParamType;
use crate::object::Value;

/// An inbound call, decoded but not yet run.
pub(crate) struct LocalInvocation {
    pub seq: u64,
    pub expects_response: bool,
    pub target_id: u64,
    pub method: MethodSignature,
    pub args: Vec<WireValue>,
    /// The caller's context, in the peer's numbering.
    pub requesting_context: ContextId,
    /// Our context the caller wants this serviced on.
    pub target_context: Option<ContextId>,
}

impl LocalInvocation {
    pub fn from_request(request: &Request) -> std::result::Result<Self, Fault> {
        let bad_request = |e: duorpc::Error| Fault::BadRequest(e.to_string());

        let headers = InvocationHeaders::parse(&request.headers).map_err(bad_request)?;
        let method =
            MethodSignature::from_wire(&headers.method_name, &headers.parameter_types).map_err(bad_request)?;
        let args: Vec<WireValue> = if request.content_type.is_none() && headers.argument_count == 0 {
            Vec::new()
        } else {
            request.content_object().map_err(bad_request)?
        };
        headers.check_arguments(args.len()).map_err(bad_request)?;

        Ok(Self {
            seq: request.seq,
            expects_response: request.expects_response,
            target_id: headers.target_id,
            method,
            args,
            requesting_context: ContextId::from_raw(headers.requesting_context),
            target_context: headers.target_context.map(ContextId::from_raw),
        })
    }

    /// Runs the call on `ctx` and sends its outcome back, if one is expected.
    pub async fn run(self, shared: Arc<Shared>, ctx: ContextId) {
        let seq = self.seq;
        let expects_response = self.expects_response;
        let method = self.method.name().to_string();

        let outcome = self.execute(&shared, ctx).await;
        if expects_response {
            shared.respond(seq, outcome).await;
        } else if let Err(fault) = outcome {
            warn!(seq, method = %method, %fault, "one-way call failed");
        }
    }

    async fn execute(self, shared: &Arc<Shared>, ctx: ContextId) -> std::result::Result<WireValue, Fault> {
        let Some((target, monitor)) = shared.registry.resolve_target(self.target_id) else {
            warn!(id = self.target_id, method = %self.method, "invocation target not found");
            return Err(Fault::TargetNotFound {
                id: self.target_id,
                method: self.method.name().to_string(),
            });
        };

        let mut args = Vec::with_capacity(self.args.len());
        for wire in self.args {
            let missing = match &wire {
                WireValue::Reference(reference) => Some(reference.id),
                _ => None,
            };
            match shared.import(wire) {
                Some(value) => args.push(value),
                None => {
                    let id = missing.unwrap_or_default();
                    warn!(id, method = %self.method, "argument refers to an object no longer exported");
                    return Err(Fault::TargetNotFound {
                        id,
                        method: self.method.name().to_string(),
                    });
                }
            }
        }

        match call_target(shared, &target, &monitor, ctx, self.target_id, &self.method, args).await {
            Ok(value) => Ok(shared.marshal_result(value)),
            Err(Failure::Application(e)) => Err(Fault::Application(e)),
            Err(Failure::Internal(msg)) => {
                error!(id = self.target_id, method = %self.method, context = %ctx, "internal failure: {}", msg);
                Err(Fault::Internal(msg))
            }
        }
    }
}

async fn call_target(
    shared: &Shared,
    target: &ObjectRef,
    monitor: &Arc<Monitor>,
    ctx: ContextId,
    target_id: u64,
    method: &MethodSignature,
    args: Vec<Value>,
) -> std::result::Result<Value, Failure> {
    let _guard = match target.is_synchronized(method) {
        true => Some(monitor.enter(ctx).await),
        false => None,
    };

    let token = shared.listener.as_ref().map(|listener| listener.before(target, target_id, method, &args));
    let outcome = AssertUnwindSafe(target.invoke(method, args))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(Failure::Internal(panic_message(panic))));
    if let (Some(listener), Some(token)) = (shared.listener.as_ref(), token) {
        listener.after(token, outcome.as_ref());
    }
    outcome
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let detail = match panic.downcast::<String>() {
        Ok(msg) => *msg,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(msg) => msg.to_string(),
            Err(_) => "non-string payload".to_string(),
        },
    };
    format!("target panicked: {}", detail)
}

/// An outbound call, before marshaling.
pub(crate) struct RemoteInvocation<'a> {
    pub target: RemoteObjectReference,
    pub method: &'a MethodSignature,
    pub args: Vec<Value>,
}

impl RemoteInvocation<'_> {
    /// Marshals the call into an `invoke` request issued by `call`.
    pub fn into_request(self, shared: &Shared, call: &CallContext) -> Result<Request> {
        let params = self.method.params();
        if params.len() != self.args.len() {
            return Err(Error::ArgumentMismatch {
                method: self.method.name().to_string(),
                expected: params.len(),
                found: self.args.len(),
            });
        }

        let wire = self
            .args
            .into_iter()
            .zip(params)
            .enumerate()
            .map(|(index, (value, param))| marshal_argument(shared, self.method, index, param, value))
            .collect::<Result<Vec<_>>>()?;

        let mut request = Request::new(RequestKind::Invoke, shared.uri.clone());
        request.expects_response = !self.method.is_asynchronous();
        InvocationHeaders {
            method_name: self.method.name().to_string(),
            target_id: self.target.id,
            parameter_types: self.method.wire_types(),
            argument_count: wire.len(),
            requesting_context: call.id.get(),
            target_context: call.target_on(shared.id).map(|ctx| ctx.get()),
        }
        .write_to(&mut request.headers);
        if !wire.is_empty() {
            request.set_content_object(&wire)?;
        }
        Ok(request)
    }
}

fn marshal_argument(
    shared: &Shared,
    method: &MethodSignature,
    index: usize,
    param: &ParamType,
    value: Value,
) -> Result<WireValue> {
    let object = match value {
        Value::Object(object) => object,
        plain => {
            return plain.to_plain_wire().ok_or(Error::NotSerializable {
                method: method.name().to_string(),
                index,
            });
        }
    };
    if let Some(proxy) = object.as_proxy().filter(|proxy| proxy.belongs_to(shared)) {
        return Ok(WireValue::Reference(proxy.remote_reference()));
    }
    if shared.bidirectional && param.is_interface() {
        return Ok(WireValue::Descriptor(shared.registry.export(&object)));
    }
    Err(Error::NotSerializable {
        method: method.name().to_string(),
        index,
    })
}
