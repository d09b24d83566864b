//! Framed transport
//!
//! Every frame is a u32 little-endian length followed by that many bytes.
//! The transport knows nothing about what a frame contains.

use crate::error::{Result, WireError};
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (16 MB default)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Size of the length prefix
pub const FRAME_HEADER_SIZE: usize = 4;

/// Length-prefixed frame reader/writer over a byte stream
pub struct FrameTransport<T> {
    inner: T,
    max_frame_size: usize,
    read_buf: BytesMut,
}

impl<T> FrameTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_buf: BytesMut::with_capacity(8192),
        }
    }

    pub fn with_max_frame_size(mut self, max_size: usize) -> Self {
        self.max_frame_size = max_size;
        self
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: AsyncRead + Unpin> FrameTransport<T> {
    /// Read one complete frame
    pub async fn read_frame(&mut self) -> Result<Bytes> {
        while self.read_buf.len() < FRAME_HEADER_SIZE {
            let n = self.fill_buf().await?;
            if n == 0 {
                if self.read_buf.is_empty() {
                    return Err(WireError::ConnectionClosed);
                } else {
                    return Err(WireError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "incomplete frame header",
                    )));
                }
            }
        }

        let frame_len = (&self.read_buf[..FRAME_HEADER_SIZE]).get_u32_le() as usize;
        if frame_len > self.max_frame_size {
            return Err(WireError::FrameTooLarge {
                size: frame_len,
                max: self.max_frame_size,
            });
        }

        let total = FRAME_HEADER_SIZE + frame_len;
        while self.read_buf.len() < total {
            let n = self.fill_buf().await?;
            if n == 0 {
                return Err(WireError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "incomplete frame: expected {} bytes, got {}",
                        total,
                        self.read_buf.len()
                    ),
                )));
            }
        }

        self.read_buf.advance(FRAME_HEADER_SIZE);
        Ok(self.read_buf.split_to(frame_len).freeze())
    }

    async fn fill_buf(&mut self) -> Result<usize> {
        if self.read_buf.capacity() - self.read_buf.len() < 4096 {
            self.read_buf.reserve(8192);
        }
        Ok(self.inner.read_buf(&mut self.read_buf).await?)
    }
}

impl<T: AsyncWrite + Unpin> FrameTransport<T> {
    /// Write one complete frame
    pub async fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.max_frame_size {
            return Err(WireError::FrameTooLarge {
                size: data.len(),
                max: self.max_frame_size,
            });
        }
        self.inner.write_all(&(data.len() as u32).to_le_bytes()).await?;
        self.inner.write_all(data).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write half
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
