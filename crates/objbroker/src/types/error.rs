//! Broker error types

use objwire::{RemoteError, Value, WireError};
use std::collections::BTreeMap;
use thiserror::Error;

/// Result type for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Broker errors
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Transport, codec or handshake failure
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Object id found in neither the object table nor the residency table
    #[error("unknown object: {0}")]
    UnknownObject(String),

    #[error("method '{method}' of object {object_id} is not exposed")]
    MethodNotExposed { object_id: String, method: String },

    /// Wrong number of arguments for a constructor-less create
    #[error("arity error: {0}")]
    Arity(String),

    /// The reference counting protocol was violated
    #[error("consistency error: {0}")]
    Consistency(String),

    #[error("type '{0}' is already registered")]
    DuplicateType(String),

    #[error("type '{0}' is not registered")]
    UnknownType(String),

    /// The type is registered without a create-and-handle operation
    #[error("type '{0}' has no create operation")]
    NoCreateMethod(String),

    /// Malformed privileged request
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An application method failed
    #[error("method failed: {0}")]
    Method(ObjectError),

    /// The store failed while serving the request
    #[error("remote traceback: {0}")]
    Traceback(String),

    /// The store could not encode the result
    #[error("unserializable result: {0}")]
    Unserializable(String),

    /// An error reported by the store that has no local counterpart
    #[error("remote error {kind}: {message}")]
    Remote { kind: String, message: String },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("expected a '{expected}' handle, got '{found}'")]
    ProxyKindMismatch { expected: String, found: String },

    #[error("manager has been shut down")]
    ManagerClosed,

    #[error("handle has already been released")]
    Released,
}

impl BrokerError {
    /// Error class name used on the wire
    pub fn kind(&self) -> &str {
        match self {
            BrokerError::Wire(_) => "WireError",
            BrokerError::UnknownObject(_) => "UnknownObjectError",
            BrokerError::MethodNotExposed { .. } => "MethodNotExposedError",
            BrokerError::Arity(_) => "ArityError",
            BrokerError::Consistency(_) => "ConsistencyError",
            BrokerError::DuplicateType(_) => "DuplicateTypeError",
            BrokerError::UnknownType(_) => "UnknownTypeError",
            BrokerError::NoCreateMethod(_) => "NoCreateMethodError",
            BrokerError::Protocol(_) => "ProtocolError",
            BrokerError::Method(err) => &err.kind,
            BrokerError::Traceback(_) => "Traceback",
            BrokerError::Unserializable(_) => "Unserializable",
            BrokerError::Remote { kind, .. } => kind,
            BrokerError::UnexpectedResponse(_) => "UnexpectedResponseError",
            BrokerError::ProxyKindMismatch { .. } => "ProxyKindMismatchError",
            BrokerError::ManagerClosed => "ManagerClosedError",
            BrokerError::Released => "ReleasedError",
        }
    }

    /// Convert to the form carried by an `ERROR` response
    pub fn to_remote(&self) -> RemoteError {
        let detail = match self {
            BrokerError::UnknownObject(id) => Value::from(id.as_str()),
            BrokerError::MethodNotExposed { object_id, method } => {
                Value::List(vec![object_id.as_str().into(), method.as_str().into()])
            }
            BrokerError::Arity(msg)
            | BrokerError::Consistency(msg)
            | BrokerError::Protocol(msg)
            | BrokerError::DuplicateType(msg)
            | BrokerError::UnknownType(msg)
            | BrokerError::NoCreateMethod(msg) => Value::from(msg.as_str()),
            BrokerError::Method(err) => {
                let mut map = BTreeMap::new();
                map.insert("origin".to_string(), Value::from("method"));
                map.insert("message".to_string(), Value::from(err.message.as_str()));
                Value::Map(map)
            }
            _ => Value::None,
        };
        RemoteError::new(self.kind(), self.to_string()).with_detail(detail)
    }

    /// Rebuild a typed error from an `ERROR` response
    pub fn from_remote(err: RemoteError) -> Self {
        let RemoteError {
            kind,
            message,
            detail,
        } = err;
        let text = detail.as_str().map(str::to_string);
        match (kind.as_str(), text) {
            ("UnknownObjectError", Some(id)) => BrokerError::UnknownObject(id),
            ("ArityError", Some(msg)) => BrokerError::Arity(msg),
            ("ConsistencyError", Some(msg)) => BrokerError::Consistency(msg),
            ("ProtocolError", Some(msg)) => BrokerError::Protocol(msg),
            ("DuplicateTypeError", Some(msg)) => BrokerError::DuplicateType(msg),
            ("UnknownTypeError", Some(msg)) => BrokerError::UnknownType(msg),
            ("NoCreateMethodError", Some(msg)) => BrokerError::NoCreateMethod(msg),
            ("MethodNotExposedError", _) => match detail.as_list() {
                Some([Value::Str(object_id), Value::Str(method)]) => BrokerError::MethodNotExposed {
                    object_id: object_id.clone(),
                    method: method.clone(),
                },
                _ => BrokerError::Remote {
                    kind: kind.clone(),
                    message,
                },
            },
            _ => {
                let fields = detail.as_map();
                let origin = fields.and_then(|m| m.get("origin")).and_then(Value::as_str);
                if origin == Some("method") {
                    let message = fields
                        .and_then(|m| m.get("message"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or(message);
                    BrokerError::Method(ObjectError::new(kind.clone(), message))
                } else {
                    BrokerError::Remote {
                        kind: kind.clone(),
                        message,
                    }
                }
            }
        }
    }

    /// True for failures of the connection itself rather than of the request
    pub fn is_transport(&self) -> bool {
        matches!(self, BrokerError::Wire(e) if !e.is_decode_error())
    }
}

/// Error returned by a shared object's method
///
/// Crosses the wire as an `ERROR` response and is rebuilt on the caller's
/// side as [`BrokerError::Method`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ObjectError {
    pub kind: String,
    pub message: String,
}

impl ObjectError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new("InvalidArgument", message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new("OutOfRange", message)
    }

    pub fn missing_key(key: &str) -> Self {
        Self::new("MissingKey", format!("no such key: {key:?}"))
    }

    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::new("Unsupported", what)
    }
}

impl From<BrokerError> for ObjectError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Method(inner) => inner,
            other => ObjectError::new(other.kind(), other.to_string()),
        }
    }
}
