//! Backend interfaces consumed by the copy engine.
//!
//! The engine never talks to a registry, directory layout, or daemon
//! directly. It drives two narrow trait objects, [`ImageSource`] and
//! [`ImageDestination`], supplied by the caller, plus an admission
//! [`Policy`] and an optional [`Signer`]. Concrete transports live outside
//! this crate.

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::digest::Digest;
use crate::error::Result;

/// An opaque blob stream handed across the backend boundary.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Identity and declared properties of a blob.
///
/// A blob is named by its digest; everything else is advisory. A `size` of
/// `-1` means the size is unknown. A non-empty `urls` list marks a *foreign*
/// layer: one referenced by URL and not owned by the image's registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    /// Content digest, if known.
    pub digest: Option<Digest>,
    /// Size in bytes; `-1` when unknown.
    pub size: i64,
    /// Media type, if known.
    pub media_type: Option<String>,
    /// URLs the blob may be fetched from instead of the registry.
    pub urls: Vec<String>,
}

impl BlobInfo {
    /// A blob info carrying only a digest, with unknown size.
    pub fn for_digest(digest: Digest) -> Self {
        Self {
            digest: Some(digest),
            size: -1,
            media_type: None,
            urls: Vec::new(),
        }
    }

    /// The digest for display purposes, tolerating its absence.
    pub(crate) fn digest_label(&self) -> String {
        self.digest
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_else(|| "(unknown)".to_string())
    }
}

/// Platform selection context for a source or destination.
///
/// Unset fields fall back to the current runtime's values where a value is
/// required (instance selection, OS compatibility checks).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemContext {
    /// Operating system, e.g. `linux` or `windows`.
    pub os: Option<String>,
    /// CPU architecture in OCI notation, e.g. `amd64` or `arm64`.
    pub architecture: Option<String>,
    /// Architecture variant, e.g. `v7` for arm.
    pub variant: Option<String>,
}

/// A readable image location.
///
/// Implementations must be `Send + Sync`; the engine may hold the handle
/// across await points while side tasks are running.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// A human-readable name for this source, used in errors and logs.
    fn reference(&self) -> &str;

    /// Returns the raw manifest bytes and their media type.
    ///
    /// With `instance` set, returns the manifest of that instance of a
    /// manifest list; otherwise the top-level manifest. An empty media type
    /// asks the engine to probe the bytes.
    async fn manifest(&self, instance: Option<&Digest>) -> Result<(Vec<u8>, String)>;

    /// Opens a blob for reading, returning the stream and the blob size
    /// (`-1` if unknown).
    async fn blob(&self, info: &BlobInfo) -> Result<(BlobReader, i64)>;

    /// Returns the signatures attached to the image (or to the list when
    /// `instance` is `None` on a multi-image source).
    async fn signatures(&self, instance: Option<&Digest>) -> Result<Vec<Vec<u8>>>;

    /// A substituted layer list the destination should receive instead of
    /// the manifest's own, or `None` to copy the manifest's layers as-is.
    ///
    /// A substitution rewrites the output manifest and is therefore refused
    /// when signatures must be preserved.
    fn layer_infos_for_copy(&self) -> Option<Vec<BlobInfo>> {
        None
    }

    /// Releases the source. Called exactly once, on all exit paths.
    async fn close(&self) -> Result<()>;
}

/// A writable image location.
#[async_trait]
pub trait ImageDestination: Send + Sync {
    /// A canonical reference for this destination, used in errors, logs,
    /// and the schema1 embedded-reference check. Empty when the destination
    /// has no canonical reference.
    fn reference(&self) -> &str;

    /// Manifest media types this destination accepts, in no particular
    /// order. Empty means any type is accepted.
    fn supported_manifest_media_types(&self) -> Vec<String>;

    /// Whether foreign (URL-referenced) layers may be recorded without
    /// transferring their bytes.
    fn accepts_foreign_layer_urls(&self) -> bool;

    /// Whether uncompressed layers should be gzip-compressed in flight.
    fn should_compress_layers(&self) -> bool;

    /// Whether images must match the runtime operating system.
    fn must_match_runtime_os(&self) -> bool;

    /// Checks for a preexisting blob. Returns whether the blob is present
    /// and, if so, its size (`-1` if present with unknown size).
    async fn has_blob(&self, info: &BlobInfo) -> Result<(bool, i64)>;

    /// Bookkeeping hook for a blob that is known to already exist; returns
    /// the info of the retained blob.
    async fn reapply_blob(&self, info: &BlobInfo) -> Result<BlobInfo>;

    /// Uploads a blob. `info` carries what is known about the stream: the
    /// digest may be absent and the size unknown when the engine compresses
    /// in flight, in which case the destination computes both. Returns the
    /// info of the stored blob, with its digest set.
    ///
    /// The stream is borrowed: the engine may keep draining it after this
    /// call returns, so implementations must not assume they observed the
    /// full stream if they returned early.
    async fn put_blob(
        &self,
        stream: &mut (dyn AsyncRead + Send + Unpin),
        info: &BlobInfo,
    ) -> Result<BlobInfo>;

    /// Stores a manifest, for the given list instance when `instance` is
    /// set.
    ///
    /// # Errors
    ///
    /// [`crate::Error::ManifestRejected`] when the manifest *format* is not
    /// acceptable; the engine then retries with converted formats. Any
    /// other error aborts the copy.
    async fn put_manifest(&self, manifest: &[u8], instance: Option<&Digest>) -> Result<()>;

    /// Succeeds iff this destination can store signatures.
    async fn supports_signatures(&self) -> Result<()>;

    /// Stores the signature set for the image (or for the list when
    /// `instance` is `None`).
    async fn put_signatures(&self, signatures: &[Vec<u8>], instance: Option<&Digest>)
        -> Result<()>;

    /// Marks the image complete. Called exactly once, after every blob,
    /// manifest, and signature write has succeeded.
    async fn commit(&self) -> Result<()>;

    /// Releases the destination. Called exactly once, on all exit paths.
    async fn close(&self) -> Result<()>;
}

/// Admission policy consulted before an image is parsed.
#[async_trait]
pub trait Policy: Send + Sync {
    /// Whether the image with the given raw manifest may be copied.
    ///
    /// Both signals are consulted: returning `Ok(false)` or `Err(_)` each
    /// reject the image.
    async fn is_allowed(&self, manifest: &[u8], media_type: &str, reference: &str)
        -> Result<bool>;
}

/// Detached-signature producer.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Signs exactly the manifest bytes that were stored, with the key
    /// named by `key_id`.
    async fn sign(&self, manifest: &[u8], key_id: &str) -> Result<Vec<u8>>;
}
