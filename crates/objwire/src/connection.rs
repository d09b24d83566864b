//! Authenticated request/response connection
//!
//! A [`Connection`] carries strictly alternating request and response
//! frames. It is owned by exactly one task at a time.

use crate::auth::{self, AuthKey};
use crate::error::Result;
use crate::message::{Request, Response};
use crate::transport::FrameTransport;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::trace;

/// A framed connection to or from an object store
pub struct Connection<S = TcpStream> {
    transport: FrameTransport<S>,
    peer: Option<SocketAddr>,
}

impl Connection<TcpStream> {
    /// Connect to a store and authenticate
    pub async fn connect(addr: SocketAddr, key: &AuthKey) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let mut conn = Self::new(stream).with_peer(addr);
        conn.client_handshake(key).await?;
        trace!(%addr, "connected");
        Ok(conn)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            transport: FrameTransport::new(stream),
            peer: None,
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn with_max_frame_size(mut self, max_size: usize) -> Self {
        self.transport = self.transport.with_max_frame_size(max_size);
        self
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Connecting side of the handshake: answer, then challenge
    pub async fn client_handshake(&mut self, key: &AuthKey) -> Result<()> {
        auth::answer_challenge(&mut self.transport, key).await?;
        auth::deliver_challenge(&mut self.transport, key).await
    }

    /// Accepting side of the handshake: challenge, then answer
    pub async fn server_handshake(&mut self, key: &AuthKey) -> Result<()> {
        auth::deliver_challenge(&mut self.transport, key).await?;
        auth::answer_challenge(&mut self.transport, key).await
    }

    pub async fn send_request(&mut self, request: &Request) -> Result<()> {
        self.transport.write_frame(&request.encode()).await
    }

    pub async fn recv_request(&mut self) -> Result<Request> {
        let frame = self.transport.read_frame().await?;
        Request::decode(&frame)
    }

    pub async fn send_response(&mut self, response: &Response) -> Result<()> {
        self.transport.write_frame(&response.encode()).await
    }

    pub async fn recv_response(&mut self) -> Result<Response> {
        let frame = self.transport.read_frame().await?;
        Response::decode(&frame)
    }

    /// Send a request and wait for its response
    pub async fn request(&mut self, request: &Request) -> Result<Response> {
        self.send_request(request).await?;
        self.recv_response().await
    }

    /// Close the write half; the peer sees end-of-stream
    pub async fn shutdown(&mut self) -> Result<()> {
        self.transport.shutdown().await
    }
}
