//! Wire protocol for the shared-object broker
//!
//! This crate provides:
//! - A length-prefixed frame transport over any async byte stream
//! - The structured [`Value`] codec carried in requests and responses
//! - [`Token`] and the serialized forms of handles and proxy results
//! - The [`Request`]/[`Response`] messages exchanged with an object store
//! - Mutual HMAC challenge/response authentication
//! - [`Connection`], an authenticated request/response channel

pub mod auth;
pub mod codec;
pub mod connection;
pub mod error;
pub mod message;
pub mod token;
pub mod transport;
pub mod value;

pub use auth::AuthKey;
pub use connection::Connection;
pub use error::{Result, WireError};
pub use message::{op, RemoteError, Request, Response, ResponseKind};
pub use token::{HandleDescriptor, ProxyDescriptor, Token};
pub use transport::{FrameTransport, DEFAULT_MAX_FRAME_SIZE};
pub use value::Value;
