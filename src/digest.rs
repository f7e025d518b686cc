//! Content digests and streaming digest verification.
//!
//! A [`Digest`] is the content-addressed name of a blob: an algorithm
//! identifier plus a hex hash value. [`DigestingReader`] wraps a blob stream
//! and verifies, without buffering or a second pass, that the bytes flowing
//! through it hash to an expected digest.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use sha2::{Digest as _, Sha256, Sha384, Sha512};
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::{Error, Result};

/// Hash algorithms accepted in digest strings.
///
/// sha256 is the canonical algorithm: diffIDs and manifest digests are always
/// sha256. The others are accepted for declared blob digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// The algorithm prefix as it appears in a digest string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Expected length of the hex-encoded hash value.
    fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha384 => 96,
            Self::Sha512 => 128,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "sha256" => Some(Self::Sha256),
            "sha384" => Some(Self::Sha384),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    fn hasher(&self) -> Hasher {
        match self {
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
            Self::Sha384 => Hasher::Sha384(Sha384::new()),
            Self::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }
}

/// Incremental hasher dispatching over the supported algorithms.
enum Hasher {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(bytes),
            Self::Sha384(h) => h.update(bytes),
            Self::Sha512(h) => h.update(bytes),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha384(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// A content digest in `algorithm:hex` form.
///
/// Equality is bytewise: two digests are equal iff algorithm and hex value
/// match exactly. Parsing validates the algorithm against the supported set
/// and the hex value against the algorithm's expected length and charset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl Digest {
    /// The digest algorithm.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// The hex-encoded hash value, without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Computes the canonical (sha256) digest of a byte slice.
    pub fn sha256_of(bytes: &[u8]) -> Self {
        Self {
            algorithm: DigestAlgorithm::Sha256,
            hex: hex::encode(Sha256::digest(bytes)),
        }
    }

    /// Re-checks the structural validity of this digest.
    ///
    /// Parsing already guarantees validity; this exists so stream wrappers
    /// can fail fast with [`Error::InvalidDigest`] instead of mid-transfer.
    pub fn validate(&self) -> Result<()> {
        validate_hex(self.algorithm, &self.hex).map_err(|reason| Error::InvalidDigest {
            digest: self.to_string(),
            reason,
        })
    }
}

fn validate_hex(algorithm: DigestAlgorithm, hex: &str) -> std::result::Result<(), String> {
    if hex.len() != algorithm.hex_len() {
        return Err(format!(
            "{} hash must be {} hex characters, got {}",
            algorithm.as_str(),
            algorithm.hex_len(),
            hex.len()
        ));
    }
    if !hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
        return Err("hash contains non-hex characters".to_string());
    }
    Ok(())
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidDigest {
            digest: s.to_string(),
            reason: reason.to_string(),
        };
        let (algo, hex) = s.split_once(':').ok_or_else(|| invalid("missing ':' separator"))?;
        let algorithm = DigestAlgorithm::parse(algo)
            .ok_or_else(|| invalid(&format!("unsupported algorithm '{}'", algo)))?;
        validate_hex(algorithm, hex).map_err(|reason| Error::InvalidDigest {
            digest: s.to_string(),
            reason,
        })?;
        Ok(Self {
            algorithm,
            hex: hex.to_string(),
        })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.hex)
    }
}

/// Observer handle for a [`DigestingReader`]'s verification outcome.
///
/// The reader is usually consumed by the destination backend; this handle
/// lets the pipeline detect a verification failure afterwards even if the
/// backend swallowed the read error.
#[derive(Clone)]
pub struct ValidationHandle(Arc<AtomicBool>);

impl ValidationHandle {
    /// Whether digest verification failed at end of input.
    pub fn failed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Stream wrapper that hashes all bytes read through it and, at end of
/// input, verifies the computed digest against an expected one.
///
/// Reads pass through unchanged. A mismatch converts end-of-input into a
/// [`Error::DigestMismatch`] read error and latches the sticky failure flag
/// observable through [`DigestingReader::validation_handle`].
pub struct DigestingReader<R> {
    inner: R,
    hasher: Option<Hasher>,
    expected: Digest,
    validation_failed: Arc<AtomicBool>,
}

impl<R: AsyncRead + Unpin> DigestingReader<R> {
    /// Wraps `inner`, verifying against `expected`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidDigest`] if the expected digest is structurally
    /// invalid.
    pub fn new(inner: R, expected: Digest) -> Result<Self> {
        expected.validate()?;
        Ok(Self {
            inner,
            hasher: Some(expected.algorithm().hasher()),
            expected,
            validation_failed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Returns the sticky verification-failure handle.
    pub fn validation_handle(&self) -> ValidationHandle {
        ValidationHandle(Arc::clone(&self.validation_failed))
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DigestingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let me = &mut *self;
        let before = buf.filled().len();
        ready!(Pin::new(&mut me.inner).poll_read(cx, buf))?;
        let filled = &buf.filled()[before..];

        if !filled.is_empty() {
            if let Some(hasher) = me.hasher.as_mut() {
                hasher.update(filled);
            }
            return Poll::Ready(Ok(()));
        }

        // End of input: compare exactly once.
        if let Some(hasher) = me.hasher.take() {
            let actual = hasher.finalize_hex();
            if actual != me.expected.hex() {
                me.validation_failed.store(true, Ordering::SeqCst);
                let err = Error::DigestMismatch {
                    expected: me.expected.to_string(),
                    actual: format!("{}:{}", me.expected.algorithm().as_str(), actual),
                };
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::InvalidData, err)));
            }
        }
        Poll::Ready(Ok(()))
    }
}
