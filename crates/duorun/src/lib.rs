//! # DuoRun
//!
//! A runtime for calling methods on objects that live on a peer, over any
//! reliable duplex transport, in both directions at once.
//!
//! ## Architecture
//!
//! - `Connection` owns one link: an `ObjectRegistry` of what this side exports,
//!   a weak cache of `Proxy`s for what the peer exports, and a pump task that
//!   routes frames.
//! - A call on a `Proxy` is marshaled by the invocation engine, sent, and awaited
//!   through the `Coordinator`.
//! - While a call context waits, the `Coordinator` lets inbound calls addressed
//!   to that context run in place, so callbacks into a blocked caller do not
//!   deadlock.

pub mod builder;
pub mod channel;
pub mod connection;
pub mod context;
pub mod error;
mod invocation;
pub mod listener;
pub mod monitor;
pub mod object;
pub mod proxy;
pub mod reentrancy;
pub mod registry;
pub mod stream;
pub mod transport;


pub use builder::ConnectionBuilder;
pub use channel::ChannelTransport;
pub use connection::Connection;
pub use connection::ConnectionId;
pub use context::CallContext;
pub use context::ContextId;
pub use error::Error;
pub use error::Result;
pub use listener::InvocationListener;
pub use object::Failure;
pub use object::MethodSignature;
pub use object::ObjectRef;
pub use object::ParamType;
pub use object::RemoteObject;
pub use object::Value;
pub use proxy::Proxy;
pub use reentrancy::Coordinator;
pub use registry::ObjectRegistry;
pub use stream::StreamTransport;
pub use transport::Transport;

pub use duorpc::AppError;
pub use duorpc::ObjectDescriptor;
pub use duorpc::RemoteObjectReference;
