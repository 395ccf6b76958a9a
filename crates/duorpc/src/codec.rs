//! # Codec
//!
//! The one body encoding this protocol recognizes: a serde value packed with
//! postcard and labelled `CONTENT_TYPE`.
//!
//! ## Invariants
//! - **Type Strictness**: Decoding refuses bodies whose content type is not `CONTENT_TYPE`.
//! - **Panic Safety**: Malformed bytes surface as `Error::Decode`, never as a panic.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::error::Result;

/// Media type of every body produced by this protocol.
pub const CONTENT_TYPE: &str = "application/x-duorpc-serialized-object";

/// Serializes `value` into a body.
pub fn encode_object<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(value).map_err(|e| Error::Encode(e.to_string()))
}

/// Deserializes a body, checking its content type first.
pub fn decode_object<T: DeserializeOwned>(content_type: Option<&str>, bytes: &[u8]) -> Result<T> {
    match content_type {
        Some(CONTENT_TYPE) => (),
        other => return Err(Error::UnexpectedContentType(other.map(str::to_string))),
    }
    postcard::from_bytes(bytes).map_err(|e| Error::Decode(e.to_string()))
}
