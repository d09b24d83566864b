//! Shared-secret challenge/response authentication
//!
//! Both sides prove knowledge of the key. The accepting side challenges
//! first and then answers; the connecting side answers first and then
//! challenges. A challenge frame is `#CHALLENGE#` followed by a random
//! nonce, the answer is HMAC-SHA256(key, nonce), and the verdict frame is
//! `#WELCOME#` or `#FAILURE#`.

use crate::error::{Result, WireError};
use crate::transport::FrameTransport;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

pub const CHALLENGE: &[u8] = b"#CHALLENGE#";
pub const WELCOME: &[u8] = b"#WELCOME#";
pub const FAILURE: &[u8] = b"#FAILURE#";

/// Length of the random nonce in a challenge
pub const NONCE_SIZE: usize = 32;

/// Shared secret used by both sides of a connection
#[derive(Clone, PartialEq, Eq)]
pub struct AuthKey(Arc<[u8]>);

impl AuthKey {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// Generate a fresh random key
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::new(key)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.0)
            .map_err(|e| WireError::AuthenticationFailed(format!("unusable key: {e}")))
    }

    fn digest(&self, nonce: &[u8]) -> Result<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(nonce);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn verify(&self, nonce: &[u8], digest: &[u8]) -> Result<bool> {
        let mut mac = self.mac()?;
        mac.update(nonce);
        Ok(mac.verify_slice(digest).is_ok())
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthKey(<redacted>)")
    }
}

impl From<&str> for AuthKey {
    fn from(key: &str) -> Self {
        Self::new(key.as_bytes())
    }
}

impl From<Vec<u8>> for AuthKey {
    fn from(key: Vec<u8>) -> Self {
        Self(Arc::from(key))
    }
}

/// Send a challenge and check the peer's answer
pub async fn deliver_challenge<S>(transport: &mut FrameTransport<S>, key: &AuthKey) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let mut frame = Vec::with_capacity(CHALLENGE.len() + NONCE_SIZE);
    frame.extend_from_slice(CHALLENGE);
    frame.extend_from_slice(&nonce);
    transport.write_frame(&frame).await?;

    let answer = transport.read_frame().await?;
    if key.verify(&nonce, &answer)? {
        transport.write_frame(WELCOME).await?;
        debug!("peer answered challenge");
        Ok(())
    } else {
        transport.write_frame(FAILURE).await?;
        warn!("peer answered challenge with a wrong digest");
        Err(WireError::AuthenticationFailed(
            "digest received was wrong".to_string(),
        ))
    }
}

/// Answer the peer's challenge and wait for its verdict
pub async fn answer_challenge<S>(transport: &mut FrameTransport<S>, key: &AuthKey) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = transport.read_frame().await?;
    let Some(nonce) = frame.strip_prefix(CHALLENGE) else {
        return Err(WireError::AuthenticationFailed(
            "expected a challenge frame".to_string(),
        ));
    };

    transport.write_frame(&key.digest(nonce)?).await?;

    let verdict = transport.read_frame().await?;
    if verdict.as_ref() == WELCOME {
        Ok(())
    } else {
        Err(WireError::AuthenticationFailed(
            "digest sent was rejected".to_string(),
        ))
    }
}
