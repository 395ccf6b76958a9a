//! # DuoRPC
//!
//! The wire protocol of a bidirectional distributed-object runtime.
//!
//! ## Architecture
//!
//! Every exchange is a `Frame`: a `Request` (invoke, finalize or lookup) or the
//! `Response` correlated to it by sequence number. Invocation routing lives in
//! headers (`InvocationHeaders`); arguments and results travel as `WireValue`s
//! in a body of the single recognized content type. Objects never travel by
//! content: they cross as an `ObjectDescriptor` on first exposure and as a bare
//! `RemoteObjectReference` when handed back to the peer that owns them.
//!
//! This crate holds no runtime state. The registry, proxies and call contexts
//! live in `duorun`.


pub mod codec;
pub mod error;
pub mod frame;
pub mod headers;
pub mod reference;
pub mod value;

pub use codec::CONTENT_TYPE;
pub use error::AppError;
pub use error::Error;
pub use error::Fault;
pub use error::Result;
pub use frame::Frame;
pub use frame::Headers;
pub use frame::Request;
pub use frame::RequestKind;
pub use frame::Response;
pub use frame::STATUS_BAD_REQUEST;
pub use frame::STATUS_ERROR;
pub use frame::STATUS_NOT_FOUND;
pub use frame::STATUS_OK;
pub use headers::InvocationHeaders;
pub use reference::ObjectDescriptor;
pub use reference::RemoteObjectReference;
pub use value::WireValue;
