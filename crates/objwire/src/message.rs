//! Request and response messages
//!
//! A request is the 4-tuple `(object_id | none, operation, args, kwargs)`.
//! A response is `(kind, payload)` with kind one of RETURN, PROXY, ERROR,
//! TRACEBACK or UNSERIALIZABLE.

use crate::codec::{self, get_opt_str, get_str, get_u32, get_u8, put_opt_str, put_str};
use crate::error::{Result, WireError};
use crate::token::ProxyDescriptor;
use crate::value::Value;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use std::fmt;

/// Operation names understood by the object store
pub mod op {
    pub const CREATE: &str = "create";
    pub const CALL: &str = "call";
    pub const INCREF: &str = "incref";
    pub const DECREF: &str = "decref";
    pub const GET_EXPOSED_METHODS: &str = "get_exposed_methods";
    pub const INTROSPECT: &str = "introspect";
    pub const NUMBER_OF_OBJECTS: &str = "number_of_objects";
    pub const ACCEPT_CONNECTION: &str = "accept_connection";
    pub const SHUTDOWN: &str = "shutdown";
    pub const PING: &str = "ping";

    /// Every privileged operation, in wire order
    pub const ALL: &[&str] = &[
        CREATE,
        CALL,
        INCREF,
        DECREF,
        GET_EXPOSED_METHODS,
        INTROSPECT,
        NUMBER_OF_OBJECTS,
        ACCEPT_CONNECTION,
        SHUTDOWN,
        PING,
    ];
}

/// A single request frame
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Request {
    pub object_id: Option<String>,
    pub operation: String,
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
}

impl Request {
    /// Create a privileged request (no target object)
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            object_id: None,
            operation: operation.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }

    /// Create a method call on a shared object
    pub fn method(object_id: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            object_id: Some(object_id.into()),
            operation: method.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn with_kwargs(mut self, kwargs: BTreeMap<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_opt_str(&mut buf, self.object_id.as_deref());
        put_str(&mut buf, &self.operation);
        buf.put_u32_le(self.args.len() as u32);
        for arg in &self.args {
            arg.encode(&mut buf);
        }
        buf.put_u32_le(self.kwargs.len() as u32);
        for (key, value) in &self.kwargs {
            put_str(&mut buf, key);
            value.encode(&mut buf);
        }
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let object_id = get_opt_str(&mut buf)?;
        let operation = get_str(&mut buf)?;

        let arg_count = get_u32(&mut buf)? as usize;
        codec::ensure(&buf, arg_count)?;
        let mut args = Vec::with_capacity(arg_count);
        for _ in 0..arg_count {
            args.push(Value::decode(&mut buf)?);
        }

        let kwarg_count = get_u32(&mut buf)? as usize;
        codec::ensure(&buf, kwarg_count.saturating_mul(5))?;
        let mut kwargs = BTreeMap::new();
        for _ in 0..kwarg_count {
            let key = get_str(&mut buf)?;
            kwargs.insert(key, Value::decode(&mut buf)?);
        }

        codec::finish(&buf)?;
        Ok(Self {
            object_id,
            operation,
            args,
            kwargs,
        })
    }
}

/// Response kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseKind {
    Return = 0,
    Proxy = 1,
    Error = 2,
    Traceback = 3,
    Unserializable = 4,
}

impl ResponseKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Return),
            1 => Some(Self::Proxy),
            2 => Some(Self::Error),
            3 => Some(Self::Traceback),
            4 => Some(Self::Unserializable),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Return => "RETURN",
            Self::Proxy => "PROXY",
            Self::Error => "ERROR",
            Self::Traceback => "TRACEBACK",
            Self::Unserializable => "UNSERIALIZABLE",
        }
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error reported by the store
///
/// `kind` names the error class, `detail` carries structured fields the
/// receiver may use to rebuild a typed error.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteError {
    pub kind: String,
    pub message: String,
    pub detail: Value,
}

impl RemoteError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            detail: Value::None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        put_str(buf, &self.kind);
        put_str(buf, &self.message);
        self.detail.encode(buf);
    }

    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        Ok(Self {
            kind: get_str(buf)?,
            message: get_str(buf)?,
            detail: Value::decode(buf)?,
        })
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A single response frame
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    Return(Value),
    Proxy(ProxyDescriptor),
    Error(RemoteError),
    Traceback(String),
    Unserializable(String),
}

impl Response {
    pub fn kind(&self) -> ResponseKind {
        match self {
            Response::Return(_) => ResponseKind::Return,
            Response::Proxy(_) => ResponseKind::Proxy,
            Response::Error(_) => ResponseKind::Error,
            Response::Traceback(_) => ResponseKind::Traceback,
            Response::Unserializable(_) => ResponseKind::Unserializable,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.kind() as u8);
        match self {
            Response::Return(value) => value.encode(&mut buf),
            Response::Proxy(desc) => desc.encode(&mut buf),
            Response::Error(err) => err.encode(&mut buf),
            Response::Traceback(text) | Response::Unserializable(text) => put_str(&mut buf, text),
        }
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let raw_kind = get_u8(&mut buf)?;
        let kind = ResponseKind::from_u8(raw_kind).ok_or(WireError::InvalidResponseKind(raw_kind))?;
        let response = match kind {
            ResponseKind::Return => Response::Return(Value::decode(&mut buf)?),
            ResponseKind::Proxy => Response::Proxy(ProxyDescriptor::decode(&mut buf)?),
            ResponseKind::Error => Response::Error(RemoteError::decode(&mut buf)?),
            ResponseKind::Traceback => Response::Traceback(get_str(&mut buf)?),
            ResponseKind::Unserializable => Response::Unserializable(get_str(&mut buf)?),
        };
        codec::finish(&buf)?;
        Ok(response)
    }
}
