//! # Remote Identities
//!
//! A `RemoteObjectReference` is the bare identity of an exported object. An
//! `ObjectDescriptor` adds the capability set so the importer knows which
//! interfaces its proxy should answer for; it travels with the first exposure of
//! an object, later exposures may use the bare reference.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

/// Opaque identity of an object exported by a peer.
///
/// Equality and hashing are by `id` only.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteObjectReference {
    pub id: u64,
}

impl RemoteObjectReference {
    pub fn new(id: u64) -> Self {
        Self { id }
    }
}

impl std::fmt::Display for RemoteObjectReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "object-{}", self.id)
    }
}

/// A reference plus the capability interfaces of the referenced object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub reference: RemoteObjectReference,
    pub capabilities: BTreeSet<String>,
}

impl ObjectDescriptor {
    pub fn new<I, S>(id: u64, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reference: RemoteObjectReference::new(id),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }

    pub fn id(&self) -> u64 {
        self.reference.id
    }

    /// Strips the capability set.
    pub fn remote_object_reference(&self) -> RemoteObjectReference {
        self.reference
    }

    pub fn implements(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}
