//! # Wire Values
//!
//! What an argument or a result looks like once it has been marshaled: either a
//! plain value sent by content, or an object sent by identity.

use serde::Deserialize;
use serde::Serialize;

use crate::reference::ObjectDescriptor;
use crate::reference::RemoteObjectReference;

/// A marshaled argument or result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// A variant of a named enumeration, sent by value.
    Enum { ty: String, variant: String },
    /// An object the receiver itself exported; resolves to the receiver's local target.
    Reference(RemoteObjectReference),
    /// An object the sender exported; resolves to a proxy on the receiver.
    Descriptor(ObjectDescriptor),
}

impl WireValue {
    /// True for values that travel by content.
    pub fn is_plain(&self) -> bool {
        !matches!(self, Self::Reference(_) | Self::Descriptor(_))
    }
}
