//! Error types for the image copy engine.

/// Result type alias for copy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while copying an image.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Integrity Errors
    // =========================================================================
    /// Digest string is malformed or names an unsupported algorithm.
    #[error("invalid digest '{digest}': {reason}")]
    InvalidDigest { digest: String, reason: String },

    /// Transferred bytes did not hash to the declared digest.
    #[error("digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// A blob already at the destination has a different size than declared.
    #[error("blob {digest} is already present, but with size {actual} instead of {expected}")]
    SizeMismatch {
        digest: String,
        expected: i64,
        actual: i64,
    },

    /// An internal consistency check failed after a blob was written.
    #[error("internal integrity error: {0}")]
    InternalIntegrity(String),

    // =========================================================================
    // Admission and Compatibility Errors
    // =========================================================================
    /// The source image was rejected by the admission policy.
    #[error("source image rejected: {0}")]
    PolicyDenied(String),

    /// The image operating system is incompatible with the destination runtime.
    #[error("image operating system '{image_os}' cannot be used on '{wanted_os}'")]
    OsIncompatible { image_os: String, wanted_os: String },

    // =========================================================================
    // Manifest Errors
    // =========================================================================
    /// The destination rejected a manifest format. The only retriable error:
    /// the commit loop tries the next candidate format on this kind alone.
    #[error("manifest type {media_type} rejected by destination: {reason}")]
    ManifestRejected { media_type: String, reason: String },

    /// An operation would modify a manifest whose signatures must be preserved.
    #[error("operation would invalidate existing signatures: {0}")]
    SignatureConflict(String),

    /// The destination cannot store a multi-image manifest.
    #[error("destination '{reference}' does not support copying multiple images")]
    MultiImageUnsupported { reference: String },

    /// A manifest list was found where a single-image manifest was required.
    #[error("unexpectedly received a manifest list instead of a single-image manifest")]
    UnexpectedNestedList,

    /// A defined but unsupported operation was requested.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    // =========================================================================
    // Pass-Through Errors
    // =========================================================================
    /// A source or destination backend failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid caller-supplied options.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error from the streaming pipeline.
    #[error("I/O error: {0}")]
    Io(std::io::Error),

    /// Manifest or config serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // =========================================================================
    // Compound Errors
    // =========================================================================
    /// A primary failure plus a teardown failure observed while releasing a
    /// source or destination handle. The primary error keeps its identity;
    /// the teardown error is carried as context.
    #[error("{primary} ({context}: {teardown})")]
    Teardown {
        primary: Box<Error>,
        context: String,
        teardown: Box<Error>,
    },
}

impl Error {
    /// Whether this error means the destination rejected the manifest
    /// *format*, as opposed to failing for any other reason. Only this kind
    /// triggers the format fallback loop.
    pub fn is_manifest_rejected(&self) -> bool {
        match self {
            Error::ManifestRejected { .. } => true,
            Error::Teardown { primary, .. } => primary.is_manifest_rejected(),
            _ => false,
        }
    }
}

// Engine errors raised inside an `AsyncRead` chain travel through the I/O
// layer boxed in an `std::io::Error`. Unwrap them here so the original kind
// (for example a digest mismatch) survives the round trip.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            return Error::Io(err);
        }
        let kind = err.kind();
        match err.into_inner() {
            Some(boxed) => match boxed.downcast::<Error>() {
                Ok(inner) => *inner,
                Err(other) => Error::Io(std::io::Error::new(kind, other)),
            },
            None => Error::Io(std::io::Error::from(kind)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Combines a primary outcome with a teardown outcome, keeping the primary
/// error's identity and appending the teardown failure as context.
pub(crate) fn with_teardown(primary: Result<()>, context: &str, teardown: Result<()>) -> Result<()> {
    match (primary, teardown) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(td)) => Err(td),
        (Err(p), Ok(())) => Err(p),
        (Err(p), Err(td)) => Err(Error::Teardown {
            primary: Box::new(p),
            context: context.to_string(),
            teardown: Box::new(td),
        }),
    }
}
