//! Constants for the image copy engine.
//!
//! All media types, buffer sizes, and defaults are defined here to ensure
//! consistency and prevent magic values throughout the codebase.

use std::time::Duration;

// =============================================================================
// Docker Media Types
// =============================================================================

/// Docker schema 1 manifest media type.
pub const DOCKER_V2_SCHEMA1_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v1+json";

/// Docker schema 1 manifest media type, with a JWS signature envelope.
pub const DOCKER_V2_SCHEMA1_SIGNED_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";

/// Docker schema 2 manifest media type.
pub const DOCKER_V2_SCHEMA2_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Docker schema 2 manifest list media type.
pub const DOCKER_V2_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// Docker image config media type.
pub const DOCKER_V2_CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.container.image.v1+json";

/// Docker layer media type (gzip compressed).
pub const DOCKER_LAYER_MEDIA_TYPE_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Docker foreign (URL-referenced) layer media type (gzip compressed).
pub const DOCKER_FOREIGN_LAYER_MEDIA_TYPE_GZIP: &str =
    "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip";

// =============================================================================
// OCI Media Types
// =============================================================================

/// OCI image manifest media type.
pub const OCI_IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// OCI image index media type.
pub const OCI_IMAGE_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// OCI image config media type.
pub const OCI_IMAGE_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";

/// OCI layer media type (gzip compressed).
pub const OCI_LAYER_MEDIA_TYPE_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// OCI layer media type (uncompressed).
pub const OCI_LAYER_MEDIA_TYPE_TAR: &str = "application/vnd.oci.image.layer.v1.tar";

/// OCI non-distributable layer media type (gzip compressed).
pub const OCI_LAYER_MEDIA_TYPE_NONDIST_GZIP: &str =
    "application/vnd.oci.image.layer.nondistributable.v1.tar+gzip";

// =============================================================================
// Format Negotiation
// =============================================================================

/// Single-image manifest types in order of preference when the destination
/// forces a conversion.
pub const PREFERRED_MANIFEST_TYPES: &[&str] = &[
    DOCKER_V2_SCHEMA2_MEDIA_TYPE,
    OCI_IMAGE_MANIFEST_MEDIA_TYPE,
    DOCKER_V2_SCHEMA1_SIGNED_MEDIA_TYPE,
    DOCKER_V2_SCHEMA1_MEDIA_TYPE,
];

/// Multi-image manifest types in order of preference.
pub const PREFERRED_LIST_TYPES: &[&str] = &[DOCKER_V2_LIST_MEDIA_TYPE, OCI_IMAGE_INDEX_MEDIA_TYPE];

// =============================================================================
// Pipeline Tuning
// =============================================================================

/// Number of bytes peeked from a blob stream to identify compression framing.
/// Covers the gzip (2 bytes) and zstd (4 bytes) magic numbers.
pub const COMPRESSION_PEEK_LEN: usize = 8;

/// Capacity of the in-memory pipes connecting the main transfer task to its
/// side tasks (diffID hashing, on-the-fly compression).
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// Chunk size used when draining or hashing a stream.
pub const COPY_CHUNK_LEN: usize = 32 * 1024;

// =============================================================================
// Progress Reporting
// =============================================================================

/// Default minimum interval between events on the progress channel.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
