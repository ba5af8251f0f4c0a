//! Content digests in the canonical `sha256:<hex>` form.

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use tokio::io::AsyncWrite;

const PREFIX: &str = "sha256:";
const HEX_LEN: usize = 64;

/// A string failed the canonical digest pattern.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid digest: {0:?}")]
pub struct InvalidDigest(pub String);

/// A SHA-256 content digest, always `sha256:` followed by 64 lowercase hex characters.
///
/// Equality is exact string equality; parsing performs no normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Hash a byte slice.
    pub fn compute(data: &[u8]) -> Self {
        Self::from_hash(Sha256::digest(data).as_slice())
    }

    fn from_hash(hash: &[u8]) -> Self {
        Digest(format!("{PREFIX}{}", hex::encode(hash)))
    }

    /// Whether `value` is a canonical digest string.
    pub fn validate(value: &str) -> bool {
        value
            .strip_prefix(PREFIX)
            .is_some_and(|hex| {
                hex.len() == HEX_LEN && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
            })
    }

    /// Parse a canonical digest string.
    pub fn parse(value: &str) -> Result<Self, InvalidDigest> {
        if Self::validate(value) {
            Ok(Digest(value.to_owned()))
        } else {
            Err(InvalidDigest(value.to_owned()))
        }
    }

    /// The algorithm tag, without the separator.
    pub fn algorithm(&self) -> &str {
        "sha256"
    }

    /// The hex-encoded hash.
    pub fn hex(&self) -> &str {
        &self.0[PREFIX.len()..]
    }

    /// The full canonical string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Digest {
    type Err = InvalidDigest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Digest::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = InvalidDigest;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if Digest::validate(&value) {
            Ok(Digest(value))
        } else {
            Err(InvalidDigest(value))
        }
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.0
    }
}

/// An [`AsyncWrite`] sink that hashes everything written to it.
///
/// Used to digest an object while it streams out of storage, without
/// buffering it.
#[derive(Default)]
pub struct DigestWriter {
    hasher: Sha256,
    written: u64,
}

impl fmt::Debug for DigestWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestWriter")
            .field("written", &self.written)
            .finish()
    }
}

impl DigestWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish hashing, returning the digest and the number of bytes seen.
    pub fn finish(self) -> (Digest, u64) {
        (Digest::from_hash(self.hasher.finalize().as_slice()), self.written)
    }
}

impl AsyncWrite for DigestWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        this.hasher.update(buf);
        this.written += buf.len() as u64;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
