//! # Protocol Frames
//!
//! Defines the envelope exchanged over a connection: a request (invoke,
//! finalize or lookup) or the response correlated to it by sequence number.
//!
//! ## Invariants
//! - **Panic Safety**: All decoding paths return `Result`, never panicking on unknown data.
//! - **Correlation**: A response carries the `seq` of the request it answers.
//! - **One-Way Requests**: A request with `expects_response == false` is never answered.

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec::CONTENT_TYPE;
use crate::codec::decode_object;
use crate::codec::encode_object;
use crate::error::Error;
use crate::error::Result;

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_ERROR: u16 = 500;

/// What a request asks the receiving peer to do.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    /// Call a method on an exported object.
    Invoke,
    /// The sender released its proxy; the body is the bare object id.
    Finalize,
    /// Resolve a published name; the body is the name.
    Lookup,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoke => "invoke",
            Self::Finalize => "finalize",
            Self::Lookup => "lookup",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered message headers. Names compare case-insensitively.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Sets a header, replacing any previous value under the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(&name)) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An outbound or inbound request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Assigned by the sending connection; echoed by the response.
    pub seq: u64,
    pub kind: RequestKind,
    /// Names the service endpoint the request is addressed to.
    pub uri: String,
    pub headers: Headers,
    pub expects_response: bool,
    pub content_type: Option<String>,
    pub content: Vec<u8>,
}

impl Request {
    pub fn new(kind: RequestKind, uri: impl Into<String>) -> Self {
        Self {
            seq: 0,
            kind,
            uri: uri.into(),
            headers: Headers::new(),
            expects_response: true,
            content_type: None,
            content: Vec::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Serializes `value` as the request body.
    pub fn set_content_object<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.content = encode_object(value)?;
        self.content_type = Some(CONTENT_TYPE.to_string());
        Ok(())
    }

    pub fn content_object<T: DeserializeOwned>(&self) -> Result<T> {
        decode_object(self.content_type.as_deref(), &self.content)
    }
}

/// The answer to a request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub seq: u64,
    pub status: u16,
    pub content_type: Option<String>,
    pub content: Vec<u8>,
}

impl Response {
    /// An empty response to `request` with status 200.
    pub fn to(request: &Request) -> Self {
        Self::with_status(request.seq, STATUS_OK)
    }

    pub fn with_status(seq: u64, status: u16) -> Self {
        Self {
            seq,
            status,
            content_type: None,
            content: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn has_content(&self) -> bool {
        self.content_type.is_some()
    }

    /// Serializes `value` as the response body.
    pub fn set_content_object<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.content = encode_object(value)?;
        self.content_type = Some(CONTENT_TYPE.to_string());
        Ok(())
    }

    pub fn content_object<T: DeserializeOwned>(&self) -> Result<T> {
        decode_object(self.content_type.as_deref(), &self.content)
    }
}

/// Top-level frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Request(Request),
    Response(Response),
}

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|e| Error::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        postcard::from_bytes(bytes).map_err(|e| Error::Decode(e.to_string()))
    }

    pub fn seq(&self) -> u64 {
        match self {
            Self::Request(r) => r.seq,
            Self::Response(r) => r.seq,
        }
    }
}
