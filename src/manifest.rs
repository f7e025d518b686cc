//! Manifest wire types, MIME probing, and format negotiation.
//!
//! Two manifest families exist: single-image manifests (docker schema 1,
//! docker schema 2, OCI image manifest) and multi-image manifests (docker
//! schema 2 manifest list, OCI image index). The docker schema 2 and OCI
//! image manifests share one wire shape and are distinguished by media type,
//! as are the two list types.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DOCKER_V2_LIST_MEDIA_TYPE, DOCKER_V2_SCHEMA1_MEDIA_TYPE, DOCKER_V2_SCHEMA1_SIGNED_MEDIA_TYPE,
    DOCKER_V2_SCHEMA2_MEDIA_TYPE, OCI_IMAGE_INDEX_MEDIA_TYPE, OCI_IMAGE_MANIFEST_MEDIA_TYPE,
    PREFERRED_LIST_TYPES, PREFERRED_MANIFEST_TYPES,
};
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::transport::SystemContext;

// =============================================================================
// Wire Types
// =============================================================================

/// A reference to another object: media type, digest, size, and for layers
/// optionally the foreign URLs the content may be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
}

/// Docker schema 2 or OCI image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

/// One `fsLayers` entry of a docker schema 1 manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema1FsLayer {
    #[serde(rename = "blobSum")]
    pub blob_sum: String,
}

/// One `history` entry of a docker schema 1 manifest: an opaque JSON string
/// describing the corresponding layer's v1 image state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema1History {
    #[serde(rename = "v1Compatibility")]
    pub v1_compatibility: String,
}

/// Docker schema 1 manifest, with or without its JWS signature envelope.
///
/// `fsLayers` and `history` are parallel arrays ordered newest-first, the
/// reverse of the schema 2 layer order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema1Manifest {
    pub schema_version: u8,
    pub name: String,
    pub tag: String,
    #[serde(default)]
    pub architecture: String,
    pub fs_layers: Vec<Schema1FsLayer>,
    pub history: Vec<Schema1History>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signatures: Option<serde_json::Value>,
}

/// Platform selector inside a manifest list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSpec {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// One instance entry of a manifest list or image index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEntry {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestListDoc {
    schema_version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    media_type: Option<String>,
    manifests: Vec<ListEntry>,
}

// =============================================================================
// MIME Probing
// =============================================================================

#[derive(Deserialize)]
struct Probe {
    #[serde(default, rename = "mediaType")]
    media_type: Option<String>,
    #[serde(default, rename = "schemaVersion")]
    schema_version: Option<i64>,
    #[serde(default)]
    manifests: Option<serde_json::Value>,
    #[serde(default, rename = "fsLayers")]
    fs_layers: Option<serde_json::Value>,
    #[serde(default)]
    signatures: Option<serde_json::Value>,
}

/// Guesses the media type of an unparsed manifest.
///
/// An explicit `mediaType` field wins. Otherwise the structure decides:
/// a `manifests` array is an OCI index (docker lists always declare their
/// type), `fsLayers` is schema 1, anything else with a `config` is an OCI
/// image manifest.
pub fn probe_media_type(manifest: &[u8]) -> Result<String> {
    let probe: Probe = serde_json::from_slice(manifest)?;
    if let Some(media_type) = probe.media_type {
        if !media_type.is_empty() {
            return Ok(media_type);
        }
    }
    if probe.manifests.is_some() {
        return Ok(OCI_IMAGE_INDEX_MEDIA_TYPE.to_string());
    }
    if probe.fs_layers.is_some() || probe.schema_version == Some(1) {
        if probe.signatures.is_some() {
            return Ok(DOCKER_V2_SCHEMA1_SIGNED_MEDIA_TYPE.to_string());
        }
        return Ok(DOCKER_V2_SCHEMA1_MEDIA_TYPE.to_string());
    }
    Ok(OCI_IMAGE_MANIFEST_MEDIA_TYPE.to_string())
}

/// Whether a media type names a multi-image manifest.
pub fn is_multi_image(media_type: &str) -> bool {
    media_type == DOCKER_V2_LIST_MEDIA_TYPE || media_type == OCI_IMAGE_INDEX_MEDIA_TYPE
}

/// Canonical digest of serialized manifest bytes.
pub fn manifest_digest(manifest: &[u8]) -> Digest {
    Digest::sha256_of(manifest)
}

// =============================================================================
// Runtime Platform
// =============================================================================

/// The current OS in OCI notation.
pub(crate) fn runtime_os() -> String {
    match std::env::consts::OS {
        "macos" => "darwin".to_string(),
        other => other.to_string(),
    }
}

/// The current architecture in OCI notation.
pub(crate) fn runtime_architecture() -> String {
    match std::env::consts::ARCH {
        "x86_64" => "amd64".to_string(),
        "aarch64" => "arm64".to_string(),
        "x86" => "386".to_string(),
        other => other.to_string(),
    }
}

// =============================================================================
// Manifest Lists
// =============================================================================

/// Replacement data for one instance of a manifest list, recorded after the
/// instance was copied.
#[derive(Debug, Clone)]
pub struct ListUpdate {
    pub digest: Digest,
    pub size: i64,
    pub media_type: String,
}

/// A parsed multi-image manifest: docker schema 2 manifest list or OCI
/// image index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestList {
    media_type: String,
    doc: ManifestListDoc,
}

impl ManifestList {
    /// Parses a multi-image manifest of the given media type.
    pub fn parse(manifest: &[u8], media_type: &str) -> Result<Self> {
        if !is_multi_image(media_type) {
            return Err(Error::Serialization(format!(
                "'{}' is not a manifest list media type",
                media_type
            )));
        }
        let doc: ManifestListDoc = serde_json::from_slice(manifest)?;
        Ok(Self {
            media_type: media_type.to_string(),
            doc,
        })
    }

    /// The list's media type.
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// The instance entries, in list order.
    pub fn instances(&self) -> &[ListEntry] {
        &self.doc.manifests
    }

    /// The instance digests, in list order.
    pub fn instance_digests(&self) -> Result<Vec<Digest>> {
        self.doc
            .manifests
            .iter()
            .map(|entry| entry.digest.parse())
            .collect()
    }

    /// Replaces each instance's digest, size, and media type with the
    /// post-copy values, preserving order and platform data.
    pub fn update_instances(&mut self, updates: Vec<ListUpdate>) -> Result<()> {
        if updates.len() != self.doc.manifests.len() {
            return Err(Error::InternalIntegrity(format!(
                "manifest list has {} instances but {} updates were recorded",
                self.doc.manifests.len(),
                updates.len()
            )));
        }
        for (entry, update) in self.doc.manifests.iter_mut().zip(updates) {
            entry.digest = update.digest.to_string();
            entry.size = update.size;
            entry.media_type = update.media_type;
        }
        Ok(())
    }

    /// Picks the instance matching the wanted platform: architecture and OS
    /// must match, the variant only when the caller specifies one.
    ///
    /// Unset context fields fall back to the current runtime.
    pub fn choose_instance(&self, ctx: &SystemContext) -> Result<Digest> {
        let wanted_os = ctx.os.clone().unwrap_or_else(runtime_os);
        let wanted_arch = ctx.architecture.clone().unwrap_or_else(runtime_architecture);

        let found = self.doc.manifests.iter().find(|entry| {
            entry.platform.as_ref().is_some_and(|p| {
                p.os == wanted_os
                    && p.architecture == wanted_arch
                    && ctx
                        .variant
                        .as_ref()
                        .is_none_or(|wanted| p.variant.as_deref() == Some(wanted))
            })
        });

        match found {
            Some(entry) => entry.digest.parse(),
            None => {
                let available: Vec<String> = self
                    .doc
                    .manifests
                    .iter()
                    .filter_map(|entry| entry.platform.as_ref())
                    .map(|p| format!("{}/{}", p.os, p.architecture))
                    .collect();
                Err(Error::Config(format!(
                    "no image found in manifest list for {}/{} (available: {})",
                    wanted_os,
                    wanted_arch,
                    available.join(", ")
                )))
            }
        }
    }

    /// Converts the list to a docker schema 2 manifest list.
    pub fn to_schema2_list(mut self) -> Self {
        self.media_type = DOCKER_V2_LIST_MEDIA_TYPE.to_string();
        self.doc.media_type = Some(DOCKER_V2_LIST_MEDIA_TYPE.to_string());
        for entry in &mut self.doc.manifests {
            if entry.media_type == OCI_IMAGE_MANIFEST_MEDIA_TYPE {
                entry.media_type = DOCKER_V2_SCHEMA2_MEDIA_TYPE.to_string();
            }
        }
        self
    }

    /// Converts the list to an OCI image index.
    pub fn to_oci1_index(mut self) -> Self {
        self.media_type = OCI_IMAGE_INDEX_MEDIA_TYPE.to_string();
        self.doc.media_type = Some(OCI_IMAGE_INDEX_MEDIA_TYPE.to_string());
        for entry in &mut self.doc.manifests {
            if entry.media_type == DOCKER_V2_SCHEMA2_MEDIA_TYPE {
                entry.media_type = OCI_IMAGE_MANIFEST_MEDIA_TYPE.to_string();
            }
        }
        self
    }

    /// Serializes the list.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.doc)?)
    }
}

// =============================================================================
// Format Negotiation
// =============================================================================

/// Ranks the destination-supported types by the engine's preference order,
/// keeping unknown types at the end in their reported order.
fn rank_supported(supported: &[String], preference: &[&str]) -> Vec<String> {
    let mut ranked: Vec<String> = Vec::with_capacity(supported.len());
    for preferred in preference {
        if supported.iter().any(|t| t == preferred) {
            ranked.push((*preferred).to_string());
        }
    }
    for other in supported {
        if !ranked.contains(other) {
            ranked.push(other.clone());
        }
    }
    ranked
}

/// Whether the source type may be stored as-is given the supported set.
/// The signed and unsigned schema 1 types count for each other.
fn source_type_acceptable(src_type: &str, supported: &[String]) -> bool {
    if supported.iter().any(|t| t == src_type) {
        return true;
    }
    let sibling = match src_type {
        DOCKER_V2_SCHEMA1_MEDIA_TYPE => DOCKER_V2_SCHEMA1_SIGNED_MEDIA_TYPE,
        DOCKER_V2_SCHEMA1_SIGNED_MEDIA_TYPE => DOCKER_V2_SCHEMA1_MEDIA_TYPE,
        _ => return false,
    };
    supported.iter().any(|t| t == sibling)
}

/// Selects the manifest type to try first and the ordered fallbacks.
///
/// A forced type short-circuits negotiation. Otherwise the source's own type
/// is preferred whenever the destination accepts it (empty supported set
/// means anything goes); a conversion target is picked by ranked preference
/// only when it does not. Fallbacks are the remaining supported types in
/// ranked order; they are attempted only when the destination rejects the
/// preferred format.
pub(crate) fn determine_manifest_conversion(
    src_type: &str,
    supported: &[String],
    forced: Option<&str>,
) -> (String, Vec<String>) {
    if let Some(forced) = forced {
        return (forced.to_string(), Vec::new());
    }
    if supported.is_empty() {
        return (src_type.to_string(), Vec::new());
    }

    let ranked = rank_supported(supported, PREFERRED_MANIFEST_TYPES);
    let preferred = if source_type_acceptable(src_type, supported) {
        src_type.to_string()
    } else {
        // Supported set is non-empty, so ranking produced at least one type.
        ranked[0].clone()
    };
    let fallbacks = ranked.into_iter().filter(|t| *t != preferred).collect();
    (preferred, fallbacks)
}

/// Selects the list type to store, converting only when the destination
/// does not accept the source's list type.
pub(crate) fn determine_list_conversion(
    src_type: &str,
    supported: &[String],
    dest_reference: &str,
) -> Result<String> {
    if supported.is_empty() || supported.iter().any(|t| t == src_type) {
        return Ok(src_type.to_string());
    }
    for candidate in PREFERRED_LIST_TYPES {
        if supported.iter().any(|t| t == candidate) {
            return Ok((*candidate).to_string());
        }
    }
    Err(Error::MultiImageUnsupported {
        reference: dest_reference.to_string(),
    })
}
