//! Structured values carried by requests and responses
//!
//! Every value is a one-byte tag followed by its body. Handles travel as
//! [`HandleDescriptor`]s; turning a descriptor back into a live handle is the
//! broker's job, not the codec's.

use crate::codec::{self, get_bytes, get_f64, get_i64, get_str, get_u32, get_u8, put_bytes, put_str};
use crate::error::{Result, WireError};
use crate::token::HandleDescriptor;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

/// Maximum nesting of lists and maps accepted by the decoder
pub const MAX_NESTING_DEPTH: usize = 64;

/// Value tags
pub mod tag {
    pub const NONE: u8 = 0x00;
    pub const BOOL: u8 = 0x01;
    pub const INT: u8 = 0x02;
    pub const FLOAT: u8 = 0x03;
    pub const STR: u8 = 0x04;
    pub const BYTES: u8 = 0x05;
    pub const LIST: u8 = 0x06;
    pub const MAP: u8 = 0x07;
    pub const HANDLE: u8 = 0x08;
}

/// A structured value
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Bytes),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Handle(HandleDescriptor),
}

impl Value {
    /// Short name of the variant, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Handle(_) => "handle",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&HandleDescriptor> {
        match self {
            Value::Handle(desc) => Some(desc),
            _ => None,
        }
    }

    /// Collect every handle descriptor reachable from this value
    pub fn handles(&self) -> Vec<&HandleDescriptor> {
        let mut found = Vec::new();
        self.collect_handles(&mut found);
        found
    }

    fn collect_handles<'a>(&'a self, found: &mut Vec<&'a HandleDescriptor>) {
        match self {
            Value::Handle(desc) => found.push(desc),
            Value::List(items) => items.iter().for_each(|v| v.collect_handles(found)),
            Value::Map(map) => map.values().for_each(|v| v.collect_handles(found)),
            _ => {}
        }
    }

    /// Encode to buffer
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            Value::None => buf.put_u8(tag::NONE),
            Value::Bool(b) => {
                buf.put_u8(tag::BOOL);
                buf.put_u8(*b as u8);
            }
            Value::Int(i) => {
                buf.put_u8(tag::INT);
                buf.put_i64_le(*i);
            }
            Value::Float(f) => {
                buf.put_u8(tag::FLOAT);
                buf.put_f64_le(*f);
            }
            Value::Str(s) => {
                buf.put_u8(tag::STR);
                put_str(buf, s);
            }
            Value::Bytes(b) => {
                buf.put_u8(tag::BYTES);
                put_bytes(buf, b);
            }
            Value::List(items) => {
                buf.put_u8(tag::LIST);
                buf.put_u32_le(items.len() as u32);
                for item in items {
                    item.encode(buf);
                }
            }
            Value::Map(map) => {
                buf.put_u8(tag::MAP);
                buf.put_u32_le(map.len() as u32);
                for (key, value) in map {
                    put_str(buf, key);
                    value.encode(buf);
                }
            }
            Value::Handle(desc) => {
                buf.put_u8(tag::HANDLE);
                desc.encode(buf);
            }
        }
    }

    /// Decode from buffer
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        Self::decode_nested(buf, 0)
    }

    fn decode_nested<B: Buf>(buf: &mut B, depth: usize) -> Result<Self> {
        if depth > MAX_NESTING_DEPTH {
            return Err(WireError::Malformed(format!(
                "value nesting exceeds {MAX_NESTING_DEPTH}"
            )));
        }

        let value = match get_u8(buf)? {
            tag::NONE => Value::None,
            tag::BOOL => Value::Bool(get_u8(buf)? != 0),
            tag::INT => Value::Int(get_i64(buf)?),
            tag::FLOAT => Value::Float(get_f64(buf)?),
            tag::STR => Value::Str(get_str(buf)?),
            tag::BYTES => Value::Bytes(get_bytes(buf)?),
            tag::LIST => {
                let count = get_u32(buf)? as usize;
                // Each element needs at least its tag byte.
                codec::ensure(buf, count)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(Self::decode_nested(buf, depth + 1)?);
                }
                Value::List(items)
            }
            tag::MAP => {
                let count = get_u32(buf)? as usize;
                codec::ensure(buf, count.saturating_mul(5))?;
                let mut map = BTreeMap::new();
                for _ in 0..count {
                    let key = get_str(buf)?;
                    let value = Self::decode_nested(buf, depth + 1)?;
                    map.insert(key, value);
                }
                Value::Map(map)
            }
            tag::HANDLE => Value::Handle(HandleDescriptor::decode(buf)?),
            other => return Err(WireError::InvalidTag(other)),
        };
        Ok(value)
    }

    /// Encode into a standalone buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode a standalone buffer, rejecting trailing bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = data;
        let value = Self::decode(&mut cursor)?;
        codec::finish(&cursor)?;
        Ok(value)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl From<HandleDescriptor> for Value {
    fn from(desc: HandleDescriptor) -> Self {
        Value::Handle(desc)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::None)
    }
}
