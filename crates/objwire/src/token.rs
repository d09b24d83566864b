//! Object identity on the wire
//!
//! A [`Token`] names one shared object for the lifetime of the store that
//! hosts it. [`HandleDescriptor`] is the compact form a client-side handle
//! takes when it is serialized, and [`ProxyDescriptor`] is the payload of a
//! `PROXY` response.

use crate::codec::{self, get_opt_str, get_str, get_u8, put_opt_str, put_str};
use crate::error::{Result, WireError};
use bytes::{Buf, BufMut};
use std::fmt;
use std::net::SocketAddr;

/// Identity of a shared object: type id, store address, object id
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Token {
    pub type_id: String,
    pub address: SocketAddr,
    pub object_id: String,
}

impl Token {
    pub fn new(type_id: impl Into<String>, address: SocketAddr, object_id: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            address,
            object_id: object_id.into(),
        }
    }

    /// Encode to buffer
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        put_str(buf, &self.type_id);
        put_str(buf, &self.address.to_string());
        put_str(buf, &self.object_id);
    }

    /// Decode from buffer
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        let type_id = get_str(buf)?;
        let address = get_str(buf)?;
        let address = address
            .parse()
            .map_err(|_| WireError::InvalidAddress(address))?;
        let object_id = get_str(buf)?;
        Ok(Self {
            type_id,
            address,
            object_id,
        })
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(type_id={:?}, address={}, id={})",
            self.type_id, self.address, self.object_id
        )
    }
}

/// Serialized form of a client-side handle
///
/// `exposed` is only carried when the receiver cannot derive it from the
/// handle kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandleDescriptor {
    pub handle_kind: String,
    pub token: Token,
    pub exposed: Option<Vec<String>>,
}

impl HandleDescriptor {
    pub fn new(handle_kind: impl Into<String>, token: Token, exposed: Option<Vec<String>>) -> Self {
        Self {
            handle_kind: handle_kind.into(),
            token,
            exposed,
        }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        put_str(buf, &self.handle_kind);
        self.token.encode(buf);
        match &self.exposed {
            Some(exposed) => {
                buf.put_u8(1);
                codec::put_str_list(buf, exposed);
            }
            None => buf.put_u8(0),
        }
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        let handle_kind = get_str(buf)?;
        let token = Token::decode(buf)?;
        let exposed = match get_u8(buf)? {
            0 => None,
            1 => Some(codec::get_str_list(buf)?),
            other => {
                return Err(WireError::Malformed(format!(
                    "invalid exposed marker 0x{other:02x}"
                )))
            }
        };
        Ok(Self {
            handle_kind,
            token,
            exposed,
        })
    }
}

/// Payload of a `PROXY` response: the new object's exposed methods and token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyDescriptor {
    pub exposed: Vec<String>,
    pub token: Token,
    /// Handle kind registered for the token's type, when the store knows it
    pub handle_kind: Option<String>,
}

impl ProxyDescriptor {
    pub fn new(exposed: Vec<String>, token: Token) -> Self {
        Self {
            exposed,
            token,
            handle_kind: None,
        }
    }

    pub fn with_handle_kind(mut self, kind: impl Into<String>) -> Self {
        self.handle_kind = Some(kind.into());
        self
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        codec::put_str_list(buf, &self.exposed);
        self.token.encode(buf);
        put_opt_str(buf, self.handle_kind.as_deref());
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        let exposed = codec::get_str_list(buf)?;
        let token = Token::decode(buf)?;
        let handle_kind = get_opt_str(buf)?;
        Ok(Self {
            exposed,
            token,
            handle_kind,
        })
    }
}
