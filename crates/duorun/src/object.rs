//! # Object Model
//!
//! What the runtime calls into and hands around: `RemoteObject` is the single
//! dispatch entry point every exported object and every proxy implements, and
//! `Value` is what flows in and out of it.
//!
//! ## Philosophy
//!
//! - **One Entry Point**: An object is a capability set plus
//!   `invoke(signature, args)`. There is no reflection; a method is identified by
//!   its name and its declared parameter types.
//! - **Identity, not Content**: `Value::Object` compares by pointer. Objects never
//!   cross the wire by content.

use std::str::FromStr;
use std::sync::Arc;

use duorpc::AppError;
use duorpc::WireValue;

use crate::proxy::Proxy;

/// Interface name every proxy answers for, besides its descriptor's set.
pub const REMOTE_REFERENCE_ACCESSOR: &str = "RemoteReferenceAccessor";

/// Method that returns a proxy's remote reference without a round trip.
///
/// `Value` has no reference kind, so the reference is returned as its id,
/// `Value::Int(id)`; `RemoteObjectReference::new(id)` rebuilds it. Typed callers
/// can use `Proxy::remote_reference` instead.
pub const GET_REMOTE_REFERENCE: &str = "getRemoteObjectReference";

/// An object that can be invoked by name.
#[async_trait::async_trait]
pub trait RemoteObject: Send + Sync + 'static {
    /// Interfaces this object implements. Sent to peers in its descriptor.
    fn capabilities(&self) -> Vec<String>;

    /// Whether `method` must run under this object's monitor.
    fn is_synchronized(&self, _method: &MethodSignature) -> bool {
        false
    }

    async fn invoke(&self, method: &MethodSignature, args: Vec<Value>) -> Result<Value, Failure>;

    /// Returns the proxy behind this object, if it is one.
    fn as_proxy(&self) -> Option<&Proxy> {
        None
    }
}

pub type ObjectRef = Arc<dyn RemoteObject>;

/// Identity key of a local object: the address of its allocation.
pub(crate) fn identity(object: &ObjectRef) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

/// Declared type of a method parameter.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParamType {
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    /// A named enumeration, always passed by value.
    Enum(String),
    /// A capability interface. Objects passed here may be exported by reference.
    Interface(String),
}

impl ParamType {
    pub fn is_interface(&self) -> bool {
        matches!(self, Self::Interface(_))
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("i64"),
            Self::Float => f.write_str("f64"),
            Self::Str => f.write_str("str"),
            Self::Bytes => f.write_str("bytes"),
            Self::Enum(name) => write!(f, "enum:{}", name),
            Self::Interface(name) => write!(f, "interface:{}", name),
        }
    }
}

impl FromStr for ParamType {
    type Err = duorpc::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || duorpc::Error::InvalidHeader {
            name: duorpc::headers::PARAMETER_TYPES,
            value: s.to_string(),
        };
        match s {
            "bool" => Ok(Self::Bool),
            "i64" => Ok(Self::Int),
            "f64" => Ok(Self::Float),
            "str" => Ok(Self::Str),
            "bytes" => Ok(Self::Bytes),
            _ => match s.split_once(':') {
                Some(("enum", name)) if !name.is_empty() => Ok(Self::Enum(name.to_string())),
                Some(("interface", name)) if !name.is_empty() => Ok(Self::Interface(name.to_string())),
                _ => Err(invalid()),
            },
        }
    }
}

/// Name, parameter types and call metadata of a method.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    name: String,
    params: Vec<ParamType>,
    asynchronous: bool,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            asynchronous: false,
        }
    }

    pub fn param(mut self, ty: ParamType) -> Self {
        self.params.push(ty);
        self
    }

    /// Marks the method one-way: callers neither wait for nor observe its outcome.
    pub fn asynchronous(mut self) -> Self {
        self.asynchronous = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    pub fn is_asynchronous(&self) -> bool {
        self.asynchronous
    }

    /// True if this signature has the given name and arity.
    pub fn is(&self, name: &str, arity: usize) -> bool {
        self.name == name && self.params.len() == arity
    }

    pub(crate) fn wire_types(&self) -> Vec<String> {
        self.params.iter().map(ToString::to_string).collect()
    }

    pub(crate) fn from_wire(name: &str, types: &[String]) -> duorpc::Result<Self> {
        let params = types.iter().map(|ty| ty.parse()).collect::<duorpc::Result<Vec<_>>>()?;
        Ok(Self {
            name: name.to_string(),
            params,
            asynchronous: false,
        })
    }
}

impl std::fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", param)?;
        }
        f.write_str(")")
    }
}

/// An argument or result.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Enum { ty: String, variant: String },
    Object(ObjectRef),
}

impl Value {
    pub fn object<T: RemoteObject>(object: Arc<T>) -> Self {
        Self::Object(object)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    /// The wire form of a value that travels by content, or `None` for objects.
    pub(crate) fn to_plain_wire(&self) -> Option<WireValue> {
        Some(match self {
            Self::Null => WireValue::Null,
            Self::Bool(b) => WireValue::Bool(*b),
            Self::Int(i) => WireValue::Int(*i),
            Self::Float(x) => WireValue::Float(*x),
            Self::Str(s) => WireValue::Str(s.clone()),
            Self::Bytes(b) => WireValue::Bytes(b.clone()),
            Self::Enum { ty, variant } => WireValue::Enum {
                ty: ty.clone(),
                variant: variant.clone(),
            },
            Self::Object(_) => return None,
        })
    }

    /// The value of a plain wire value, or `None` for identities.
    pub(crate) fn from_plain_wire(wire: WireValue) -> Option<Self> {
        Some(match wire {
            WireValue::Null => Self::Null,
            WireValue::Bool(b) => Self::Bool(b),
            WireValue::Int(i) => Self::Int(i),
            WireValue::Float(x) => Self::Float(x),
            WireValue::Str(s) => Self::Str(s),
            WireValue::Bytes(b) => Self::Bytes(b),
            WireValue::Enum { ty, variant } => Self::Enum { ty, variant },
            WireValue::Reference(_) | WireValue::Descriptor(_) => return None,
        })
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({})", b),
            Self::Int(i) => write!(f, "Int({})", i),
            Self::Float(x) => write!(f, "Float({})", x),
            Self::Str(s) => write!(f, "Str({:?})", s),
            Self::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Self::Enum { ty, variant } => write!(f, "Enum({}::{})", ty, variant),
            Self::Object(object) => match object.as_proxy() {
                Some(proxy) => write!(f, "Object(proxy {})", proxy.remote_reference()),
                None => write!(f, "Object({:?})", object.capabilities()),
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Enum { ty: t1, variant: v1 }, Self::Enum { ty: t2, variant: v2 }) => t1 == t2 && v1 == v2,
            (Self::Object(a), Self::Object(b)) => identity(a) == identity(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<ObjectRef> for Value {
    fn from(object: ObjectRef) -> Self {
        Self::Object(object)
    }
}

/// How a target method failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    /// A recoverable error; crosses the wire and is re-raised to the caller.
    Application(AppError),
    /// Anything else; logged where it happens, reported to the caller only generically.
    Internal(String),
}

impl Failure {
    pub fn application(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Application(AppError::new(kind, message))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn no_such_method(method: &MethodSignature) -> Self {
        Self::Internal(format!("no such method {}", method))
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Application(e) => write!(f, "{}", e),
            Self::Internal(msg) => write!(f, "internal failure: {}", msg),
        }
    }
}

impl std::error::Error for Failure {}

impl From<AppError> for Failure {
    fn from(e: AppError) -> Self {
        Self::Application(e)
    }
}
