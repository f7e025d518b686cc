//! # ocicopy
//!
//! **Streaming copy engine for OCI and Docker container images**
//!
//! This crate transfers an image, or an index of images, from a pluggable
//! source backend to a pluggable destination backend. It verifies content
//! integrity on the fly, negotiates a manifest format the destination
//! accepts, converts between formats where permitted, and optionally
//! re-signs the result. Concrete transports (registry client, directory
//! layout, daemon socket) live outside this crate and plug in through the
//! [`ImageSource`] and [`ImageDestination`] traits.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         copy_image()                             │
//! │   option validation │ single vs. list dispatch │ commit          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  per image: policy gate → OS check → signature policy →          │
//! │             format negotiation → layer loop → config + manifest  │
//! │             (format fallback retry) → sign                       │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  per blob: the streaming pipeline                                │
//! │                                                                  │
//! │  source ─ digest verify ─ detect gzip/zstd ─ progress ─ tee ──┐  │
//! │                │                                        │     │  │
//! │                │                              (compress task) │  │
//! │                ▼                                        ▼     │  │
//! │          DigestMismatch                          put_blob     │  │
//! │                                                               │  │
//! │                                   diffID task ◄───────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - **Integrity**: every transferred blob is hashed in flight and checked
//!   against its declared digest; a mismatch fails the copy. Blob bytes are
//!   never rewritten (digests are preserved) except for optional gzip
//!   compression of uncompressed layers, in which case the destination
//!   computes the stored digest itself.
//! - **Signature safety**: if existing signatures are carried, no byte of
//!   any manifest is modified; operations that would need to fail instead.
//! - **Ordering**: layer order and list instance order are preserved
//!   exactly.
//! - **Sequential core**: layers within an image and images within a list
//!   are copied one at a time; per blob, at most two auxiliary tasks run
//!   (on-the-fly compression and diffID hashing), and both terminate
//!   before the enclosing operation returns.
//!
//! # Example
//!
//! ```rust,ignore
//! use ocicopy::{copy_image, MultipleImages, Options};
//!
//! #[tokio::main]
//! async fn main() -> ocicopy::Result<()> {
//!     let source = my_transport::registry_source("docker.io/library/alpine:3.20")?;
//!     let dest = my_transport::dir_destination("/tmp/alpine")?;
//!     let policy = my_policy::allow_all();
//!
//!     copy_image(
//!         &policy,
//!         source,
//!         dest,
//!         None,
//!         &Options {
//!             multiple_images: MultipleImages::OnlyCurrentRuntime,
//!             ..Default::default()
//!         },
//!     )
//!     .await
//! }
//! ```

// =============================================================================
// Internal Modules
// =============================================================================

mod compress;
mod constants;
mod copy;
mod digest;
mod error;
mod image;
mod manifest;
mod pipeline;
mod progress;
mod transport;

// =============================================================================
// Public API
// =============================================================================

pub use compress::{decompress, detect_compression, CompressionFormat};
pub use copy::{copy_image, MultipleImages, Options};
pub use digest::{Digest, DigestAlgorithm, DigestingReader, ValidationHandle};
pub use error::{Error, Result};
pub use manifest::{
    is_multi_image, manifest_digest, probe_media_type, Descriptor, ImageManifest, ListEntry,
    ListUpdate, ManifestList, PlatformSpec, Schema1FsLayer, Schema1History, Schema1Manifest,
};
pub use progress::{ProgressReader, ProgressUpdate};
pub use transport::{
    BlobInfo, BlobReader, ImageDestination, ImageSource, Policy, Signer, SystemContext,
};

/// Media type constants for manifest negotiation and backend
/// implementations.
pub mod media_types {
    pub use crate::constants::{
        DOCKER_FOREIGN_LAYER_MEDIA_TYPE_GZIP, DOCKER_LAYER_MEDIA_TYPE_GZIP,
        DOCKER_V2_CONFIG_MEDIA_TYPE, DOCKER_V2_LIST_MEDIA_TYPE, DOCKER_V2_SCHEMA1_MEDIA_TYPE,
        DOCKER_V2_SCHEMA1_SIGNED_MEDIA_TYPE, DOCKER_V2_SCHEMA2_MEDIA_TYPE,
        OCI_IMAGE_CONFIG_MEDIA_TYPE, OCI_IMAGE_INDEX_MEDIA_TYPE, OCI_IMAGE_MANIFEST_MEDIA_TYPE,
        OCI_LAYER_MEDIA_TYPE_GZIP, OCI_LAYER_MEDIA_TYPE_NONDIST_GZIP, OCI_LAYER_MEDIA_TYPE_TAR,
    };
}
