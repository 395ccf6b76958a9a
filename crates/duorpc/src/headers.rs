//! # Invocation Headers
//!
//! The header block of an `invoke` request. The body carries only the
//! marshaled arguments; everything needed to route and type-check the call
//! lives here.
//!
//! ## Invariants
//! - **Required Fields**: `Method-Name`, `Target-Proxy-Id` and `Requesting-Thread-Id`
//!   must be present; their absence is a `MissingHeader` error.
//! - **Counts Agree**: `Argument-Count` must equal the number of `Parameter-Types`
//!   entries. A missing count or type list means zero.

use crate::error::Error;
use crate::error::Result;
use crate::frame::Headers;

pub const METHOD_NAME: &str = "Method-Name";
pub const TARGET_PROXY_ID: &str = "Target-Proxy-Id";
pub const PARAMETER_TYPES: &str = "Parameter-Types";
pub const ARGUMENT_COUNT: &str = "Argument-Count";
pub const REQUESTING_THREAD_ID: &str = "Requesting-Thread-Id";
pub const TARGET_THREAD_ID: &str = "Target-Thread-Id";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvocationHeaders {
    pub method_name: String,
    pub target_id: u64,
    /// Wire names of the declared parameter types, in declaration order.
    pub parameter_types: Vec<String>,
    pub argument_count: usize,
    /// Call context of the caller.
    pub requesting_context: u64,
    /// Call context the call must be serviced on, if any.
    pub target_context: Option<u64>,
}

impl InvocationHeaders {
    pub fn write_to(&self, headers: &mut Headers) {
        headers.set(METHOD_NAME, self.method_name.clone());
        headers.set(TARGET_PROXY_ID, self.target_id.to_string());
        headers.set(PARAMETER_TYPES, self.parameter_types.join(","));
        headers.set(ARGUMENT_COUNT, self.argument_count.to_string());
        headers.set(REQUESTING_THREAD_ID, self.requesting_context.to_string());
        if let Some(target) = self.target_context {
            headers.set(TARGET_THREAD_ID, target.to_string());
        }
    }

    pub fn parse(headers: &Headers) -> Result<Self> {
        let method_name = required(headers, METHOD_NAME)?.to_string();
        if method_name.is_empty() {
            return Err(Error::InvalidHeader { name: METHOD_NAME, value: method_name });
        }
        let target_id = parse_number(TARGET_PROXY_ID, required(headers, TARGET_PROXY_ID)?)?;
        let requesting_context = parse_number(REQUESTING_THREAD_ID, required(headers, REQUESTING_THREAD_ID)?)?;
        let target_context = match headers.get(TARGET_THREAD_ID) {
            Some(raw) => Some(parse_number(TARGET_THREAD_ID, raw)?),
            None => None,
        };

        let parameter_types: Vec<String> = match headers.get(PARAMETER_TYPES) {
            Some(raw) if !raw.trim().is_empty() => raw.split(',').map(|ty| ty.trim().to_string()).collect(),
            _ => Vec::new(),
        };
        if parameter_types.iter().any(String::is_empty) {
            return Err(Error::InvalidHeader {
                name: PARAMETER_TYPES,
                value: parameter_types.join(","),
            });
        }

        let argument_count = match headers.get(ARGUMENT_COUNT) {
            Some(raw) => parse_number(ARGUMENT_COUNT, raw)? as usize,
            None => 0,
        };
        if argument_count != parameter_types.len() {
            return Err(Error::ProtocolViolation(format!(
                "'{}' declares {} parameter types but {} arguments",
                method_name,
                parameter_types.len(),
                argument_count
            )));
        }

        Ok(Self {
            method_name,
            target_id,
            parameter_types,
            argument_count,
            requesting_context,
            target_context,
        })
    }

    /// Checks that a decoded argument list matches the declared count.
    pub fn check_arguments(&self, found: usize) -> Result<()> {
        if found == self.argument_count {
            Ok(())
        } else {
            Err(Error::ProtocolViolation(format!(
                "'{}' expects {} arguments, body carries {}",
                self.method_name, self.argument_count, found
            )))
        }
    }
}

fn required<'a>(headers: &'a Headers, name: &'static str) -> Result<&'a str> {
    headers.get(name).ok_or(Error::MissingHeader(name))
}

fn parse_number(name: &'static str, raw: &str) -> Result<u64> {
    raw.trim().parse().map_err(|_| Error::InvalidHeader {
        name,
        value: raw.to_string(),
    })
}
