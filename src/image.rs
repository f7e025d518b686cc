//! Typed single-image model and manifest rewriting.
//!
//! [`SourceImage`] wraps one parsed single-image manifest and answers the
//! questions the copy engine asks of it: layer order, config identity,
//! whether a planned set of [`ManifestUpdates`] forces diffID computation,
//! and how the manifest looks after the updates are applied (including
//! format conversion between the docker and OCI families, and upgrade from
//! docker schema 1).

use serde_json::{json, Value};
use tokio::io::AsyncReadExt;

use crate::constants::{
    DOCKER_FOREIGN_LAYER_MEDIA_TYPE_GZIP, DOCKER_LAYER_MEDIA_TYPE_GZIP,
    DOCKER_V2_CONFIG_MEDIA_TYPE, DOCKER_V2_SCHEMA1_MEDIA_TYPE,
    DOCKER_V2_SCHEMA1_SIGNED_MEDIA_TYPE, DOCKER_V2_SCHEMA2_MEDIA_TYPE,
    OCI_IMAGE_CONFIG_MEDIA_TYPE, OCI_IMAGE_MANIFEST_MEDIA_TYPE, OCI_LAYER_MEDIA_TYPE_GZIP,
    OCI_LAYER_MEDIA_TYPE_NONDIST_GZIP,
};
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::manifest::{is_multi_image, Descriptor, ImageManifest, Schema1Manifest};
use crate::transport::{BlobInfo, ImageSource};

// =============================================================================
// Manifest Updates
// =============================================================================

/// Data recorded during the copy that does not by itself require rewriting
/// the manifest: the destination-side layer infos and any computed diffIDs,
/// kept for conversions that need them.
#[derive(Debug, Clone, Default)]
pub struct InformationOnly {
    pub layer_infos: Vec<BlobInfo>,
    pub layer_diff_ids: Vec<Option<Digest>>,
}

/// Accumulator for every modification requested of the source manifest.
///
/// The non-`information_only` fields each force a manifest rewrite, which is
/// refused when signatures must be preserved.
#[derive(Debug, Clone, Default)]
pub struct ManifestUpdates {
    /// Replacement layer list, when destination digests differ from the
    /// source's or the source substituted its layer set.
    pub layer_infos: Option<Vec<BlobInfo>>,
    /// Replacement for a conflicting embedded schema 1 reference.
    pub embedded_reference: Option<String>,
    /// Target media type, when format conversion is required.
    pub media_type: Option<String>,
    /// Non-rewriting bookkeeping.
    pub information_only: InformationOnly,
}

impl ManifestUpdates {
    /// Whether applying these updates would leave the manifest bytes
    /// untouched.
    pub fn is_trivial(&self) -> bool {
        self.layer_infos.is_none()
            && self.embedded_reference.is_none()
            && self.media_type.is_none()
    }
}

// =============================================================================
// Pending Image
// =============================================================================

/// The config blob the destination must receive for a pending image.
#[derive(Debug, Clone)]
pub enum PendingConfig {
    /// The image has no config blob (docker schema 1).
    None,
    /// The source's config blob, unchanged.
    FromSource(BlobInfo),
    /// A config synthesized during schema 1 conversion.
    Synthesized { info: BlobInfo, bytes: Vec<u8> },
}

/// A manifest ready to store, plus the config blob it references.
#[derive(Debug, Clone)]
pub struct PendingImage {
    pub manifest: Vec<u8>,
    pub media_type: String,
    pub config: PendingConfig,
}

// =============================================================================
// Source Image
// =============================================================================

#[derive(Debug, Clone)]
enum ParsedImage {
    Schema1(Schema1Manifest),
    Image(ImageManifest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Docker2,
    Oci,
}

/// A parsed single-image manifest together with its raw bytes.
#[derive(Debug, Clone)]
pub struct SourceImage {
    bytes: Vec<u8>,
    media_type: String,
    parsed: ParsedImage,
}

impl SourceImage {
    /// Parses a single-image manifest.
    ///
    /// # Errors
    ///
    /// [`Error::UnexpectedNestedList`] for multi-image media types,
    /// [`Error::Serialization`] for malformed documents.
    pub fn from_manifest(bytes: Vec<u8>, media_type: String) -> Result<Self> {
        if is_multi_image(&media_type) {
            return Err(Error::UnexpectedNestedList);
        }
        let parsed = match media_type.as_str() {
            DOCKER_V2_SCHEMA1_MEDIA_TYPE | DOCKER_V2_SCHEMA1_SIGNED_MEDIA_TYPE => {
                let manifest: Schema1Manifest = serde_json::from_slice(&bytes)?;
                if manifest.fs_layers.len() != manifest.history.len() {
                    return Err(Error::Serialization(format!(
                        "schema 1 manifest has {} layers but {} history entries",
                        manifest.fs_layers.len(),
                        manifest.history.len()
                    )));
                }
                ParsedImage::Schema1(manifest)
            }
            _ => ParsedImage::Image(serde_json::from_slice(&bytes)?),
        };
        Ok(Self {
            bytes,
            media_type,
            parsed,
        })
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn manifest_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Layer infos in manifest order, oldest first.
    ///
    /// Schema 1 lists layers newest-first; they are reversed here so every
    /// caller sees one order.
    pub fn layer_infos(&self) -> Result<Vec<BlobInfo>> {
        match &self.parsed {
            ParsedImage::Image(m) => m
                .layers
                .iter()
                .map(|layer| {
                    Ok(BlobInfo {
                        digest: Some(layer.digest.parse()?),
                        size: layer.size,
                        media_type: Some(layer.media_type.clone()),
                        urls: layer.urls.clone().unwrap_or_default(),
                    })
                })
                .collect(),
            ParsedImage::Schema1(m) => m
                .fs_layers
                .iter()
                .rev()
                .map(|layer| {
                    Ok(BlobInfo {
                        digest: Some(layer.blob_sum.parse()?),
                        size: -1,
                        media_type: None,
                        urls: Vec::new(),
                    })
                })
                .collect(),
        }
    }

    /// The config blob reference, if the format has one.
    pub fn config_info(&self) -> Result<Option<BlobInfo>> {
        match &self.parsed {
            ParsedImage::Image(m) => Ok(Some(BlobInfo {
                digest: Some(m.config.digest.parse()?),
                size: m.config.size,
                media_type: Some(m.config.media_type.clone()),
                urls: Vec::new(),
            })),
            ParsedImage::Schema1(_) => Ok(None),
        }
    }

    /// Whether a schema 1 manifest embeds a reference conflicting with the
    /// destination's canonical reference.
    pub fn embedded_reference_conflicts(&self, dest_reference: &str) -> bool {
        match &self.parsed {
            ParsedImage::Schema1(m) => {
                let (name, tag) = parse_reference(dest_reference);
                m.name != name || m.tag != tag
            }
            ParsedImage::Image(_) => false,
        }
    }

    /// The image's operating system, read from the config blob (or from the
    /// newest v1Compatibility entry for schema 1). Defaults to `linux` when
    /// the config does not say.
    pub async fn os(&self, source: &dyn ImageSource) -> Result<String> {
        let config: Value = match &self.parsed {
            ParsedImage::Image(_) => {
                let info = self
                    .config_info()?
                    .ok_or_else(|| Error::InternalIntegrity("image without config".to_string()))?;
                let (mut stream, _size) = source.blob(&info).await?;
                let mut bytes = Vec::new();
                stream.read_to_end(&mut bytes).await?;
                serde_json::from_slice(&bytes)?
            }
            ParsedImage::Schema1(m) => match m.history.first() {
                Some(entry) => serde_json::from_str(&entry.v1_compatibility)?,
                None => Value::Null,
            },
        };
        Ok(config
            .get("os")
            .and_then(Value::as_str)
            .unwrap_or("linux")
            .to_string())
    }

    /// Whether applying `updates` requires per-layer diffIDs. True only when
    /// converting from schema 1 to a config-bearing format, whose config
    /// must list the uncompressed layer digests.
    pub fn needs_layer_diff_ids(&self, updates: &ManifestUpdates) -> bool {
        let target = updates.media_type.as_deref().unwrap_or(&self.media_type);
        matches!(self.parsed, ParsedImage::Schema1(_))
            && (target == DOCKER_V2_SCHEMA2_MEDIA_TYPE || target == OCI_IMAGE_MANIFEST_MEDIA_TYPE)
    }

    /// The image as-is: original manifest bytes and the source config.
    pub fn pending_unchanged(&self) -> Result<PendingImage> {
        Ok(PendingImage {
            manifest: self.bytes.clone(),
            media_type: self.media_type.clone(),
            config: match self.config_info()? {
                Some(info) => PendingConfig::FromSource(info),
                None => PendingConfig::None,
            },
        })
    }

    /// Applies `updates` and returns the rewritten image.
    ///
    /// # Errors
    ///
    /// [`Error::Unimplemented`] for conversions to docker schema 1;
    /// [`Error::InternalIntegrity`] when the recorded update data is
    /// inconsistent with the manifest.
    pub fn updated_image(&self, updates: &ManifestUpdates) -> Result<PendingImage> {
        let target = updates
            .media_type
            .clone()
            .unwrap_or_else(|| self.media_type.clone());
        match &self.parsed {
            ParsedImage::Image(m) => updated_from_image(m.clone(), updates, &target),
            ParsedImage::Schema1(m) => updated_from_schema1(m.clone(), updates, &target),
        }
    }
}

fn family_of(media_type: &str) -> Result<Family> {
    match media_type {
        DOCKER_V2_SCHEMA2_MEDIA_TYPE => Ok(Family::Docker2),
        OCI_IMAGE_MANIFEST_MEDIA_TYPE => Ok(Family::Oci),
        DOCKER_V2_SCHEMA1_MEDIA_TYPE | DOCKER_V2_SCHEMA1_SIGNED_MEDIA_TYPE => Err(
            Error::Unimplemented("converting a manifest to docker schema 1 is not supported".to_string()),
        ),
        other => Err(Error::Unimplemented(format!(
            "conversion to manifest type '{}' is not supported",
            other
        ))),
    }
}

fn convert_config_media_type(current: &str, target: Family) -> String {
    match (current, target) {
        (DOCKER_V2_CONFIG_MEDIA_TYPE, Family::Oci) => OCI_IMAGE_CONFIG_MEDIA_TYPE.to_string(),
        (OCI_IMAGE_CONFIG_MEDIA_TYPE, Family::Docker2) => DOCKER_V2_CONFIG_MEDIA_TYPE.to_string(),
        _ => current.to_string(),
    }
}

fn convert_layer_media_type(current: &str, target: Family) -> String {
    match (current, target) {
        (DOCKER_LAYER_MEDIA_TYPE_GZIP, Family::Oci) => OCI_LAYER_MEDIA_TYPE_GZIP.to_string(),
        (DOCKER_FOREIGN_LAYER_MEDIA_TYPE_GZIP, Family::Oci) => {
            OCI_LAYER_MEDIA_TYPE_NONDIST_GZIP.to_string()
        }
        (OCI_LAYER_MEDIA_TYPE_GZIP, Family::Docker2) => DOCKER_LAYER_MEDIA_TYPE_GZIP.to_string(),
        (OCI_LAYER_MEDIA_TYPE_NONDIST_GZIP, Family::Docker2) => {
            DOCKER_FOREIGN_LAYER_MEDIA_TYPE_GZIP.to_string()
        }
        _ => current.to_string(),
    }
}

fn updated_from_image(
    mut manifest: ImageManifest,
    updates: &ManifestUpdates,
    target: &str,
) -> Result<PendingImage> {
    if let Some(infos) = &updates.layer_infos {
        if infos.len() != manifest.layers.len() {
            return Err(Error::InternalIntegrity(format!(
                "manifest has {} layers but {} replacements were recorded",
                manifest.layers.len(),
                infos.len()
            )));
        }
        for (layer, info) in manifest.layers.iter_mut().zip(infos) {
            let digest = info.digest.as_ref().ok_or_else(|| {
                Error::InternalIntegrity("layer replacement without a digest".to_string())
            })?;
            layer.digest = digest.to_string();
            layer.size = info.size;
            layer.urls = if info.urls.is_empty() {
                None
            } else {
                Some(info.urls.clone())
            };
        }
    }

    let target_family = family_of(target)?;
    manifest.media_type = Some(target.to_string());
    manifest.config.media_type = convert_config_media_type(&manifest.config.media_type, target_family);
    for layer in &mut manifest.layers {
        layer.media_type = convert_layer_media_type(&layer.media_type, target_family);
    }

    let config = PendingConfig::FromSource(BlobInfo {
        digest: Some(manifest.config.digest.parse()?),
        size: manifest.config.size,
        media_type: Some(manifest.config.media_type.clone()),
        urls: Vec::new(),
    });
    Ok(PendingImage {
        manifest: serde_json::to_vec(&manifest)?,
        media_type: target.to_string(),
        config,
    })
}

fn updated_from_schema1(
    mut manifest: Schema1Manifest,
    updates: &ManifestUpdates,
    target: &str,
) -> Result<PendingImage> {
    if let Some(reference) = &updates.embedded_reference {
        let (name, tag) = parse_reference(reference);
        manifest.name = name;
        manifest.tag = tag;
    }

    match target {
        DOCKER_V2_SCHEMA1_MEDIA_TYPE | DOCKER_V2_SCHEMA1_SIGNED_MEDIA_TYPE => {
            // Reserializing drops the signature envelope; a rewrite always
            // invalidates it anyway.
            manifest.signatures = None;
            Ok(PendingImage {
                manifest: serde_json::to_vec(&manifest)?,
                media_type: DOCKER_V2_SCHEMA1_MEDIA_TYPE.to_string(),
                config: PendingConfig::None,
            })
        }
        DOCKER_V2_SCHEMA2_MEDIA_TYPE | OCI_IMAGE_MANIFEST_MEDIA_TYPE => {
            schema1_to_image(&manifest, updates, target)
        }
        other => Err(Error::Unimplemented(format!(
            "conversion to manifest type '{}' is not supported",
            other
        ))),
    }
}

/// Upgrades a schema 1 manifest to a config-bearing format, synthesizing
/// the config blob from the v1Compatibility history and the diffIDs
/// recorded while copying the layers.
fn schema1_to_image(
    manifest: &Schema1Manifest,
    updates: &ManifestUpdates,
    target: &str,
) -> Result<PendingImage> {
    let layers = updates
        .layer_infos
        .clone()
        .unwrap_or_else(|| updates.information_only.layer_infos.clone());
    if layers.len() != manifest.fs_layers.len() {
        return Err(Error::InternalIntegrity(format!(
            "schema 1 conversion needs {} copied layers, have {}",
            manifest.fs_layers.len(),
            layers.len()
        )));
    }
    if updates.information_only.layer_diff_ids.len() != layers.len() {
        return Err(Error::InternalIntegrity(
            "schema 1 conversion requires a diffID for every layer".to_string(),
        ));
    }
    let diff_ids = updates
        .information_only
        .layer_diff_ids
        .iter()
        .map(|d| {
            d.clone().ok_or_else(|| {
                Error::InternalIntegrity("schema 1 conversion is missing a layer diffID".to_string())
            })
        })
        .collect::<Result<Vec<Digest>>>()?;

    // The newest history entry carries the image-level configuration.
    let newest: Value = match manifest.history.first() {
        Some(entry) => serde_json::from_str(&entry.v1_compatibility)?,
        None => Value::Null,
    };
    let mut config = serde_json::Map::new();
    for key in [
        "architecture",
        "author",
        "config",
        "container_config",
        "created",
        "docker_version",
        "os",
    ] {
        if let Some(value) = newest.get(key) {
            config.insert(key.to_string(), value.clone());
        }
    }
    if !config.contains_key("os") {
        config.insert("os".to_string(), json!("linux"));
    }
    if !config.contains_key("architecture") && !manifest.architecture.is_empty() {
        config.insert("architecture".to_string(), json!(manifest.architecture));
    }

    // History entries, oldest first to match the layer order.
    let mut history = Vec::with_capacity(manifest.history.len());
    for entry in manifest.history.iter().rev() {
        let compat: Value = serde_json::from_str(&entry.v1_compatibility)?;
        let mut item = serde_json::Map::new();
        for key in ["created", "author", "comment"] {
            if let Some(value) = compat.get(key) {
                item.insert(key.to_string(), value.clone());
            }
        }
        if let Some(cmd) = compat
            .pointer("/container_config/Cmd")
            .and_then(Value::as_array)
        {
            let created_by = cmd
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" ");
            item.insert("created_by".to_string(), json!(created_by));
        }
        history.push(Value::Object(item));
    }
    config.insert(
        "rootfs".to_string(),
        json!({
            "type": "layers",
            "diff_ids": diff_ids.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
        }),
    );
    config.insert("history".to_string(), Value::Array(history));

    let config_bytes = serde_json::to_vec(&Value::Object(config))?;
    let config_digest = Digest::sha256_of(&config_bytes);

    let (config_media_type, layer_media_type) = match family_of(target)? {
        Family::Docker2 => (DOCKER_V2_CONFIG_MEDIA_TYPE, DOCKER_LAYER_MEDIA_TYPE_GZIP),
        Family::Oci => (OCI_IMAGE_CONFIG_MEDIA_TYPE, OCI_LAYER_MEDIA_TYPE_GZIP),
    };

    let layer_descriptors = layers
        .iter()
        .map(|info| {
            let digest = info.digest.as_ref().ok_or_else(|| {
                Error::InternalIntegrity("copied layer without a digest".to_string())
            })?;
            Ok(Descriptor {
                media_type: layer_media_type.to_string(),
                digest: digest.to_string(),
                size: info.size,
                urls: None,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let image = ImageManifest {
        schema_version: 2,
        media_type: Some(target.to_string()),
        config: Descriptor {
            media_type: config_media_type.to_string(),
            digest: config_digest.to_string(),
            size: config_bytes.len() as i64,
            urls: None,
        },
        layers: layer_descriptors,
    };

    Ok(PendingImage {
        manifest: serde_json::to_vec(&image)?,
        media_type: target.to_string(),
        config: PendingConfig::Synthesized {
            info: BlobInfo {
                digest: Some(config_digest),
                size: config_bytes.len() as i64,
                media_type: Some(config_media_type.to_string()),
                urls: Vec::new(),
            },
            bytes: config_bytes,
        },
    })
}

/// Splits a reference string into `(name, tag)`, dropping a registry host
/// prefix and any digest suffix. The tag defaults to `latest`.
fn parse_reference(reference: &str) -> (String, String) {
    let reference = reference.split('@').next().unwrap_or(reference);
    let slash = reference.rfind('/').unwrap_or(0);
    let (path, tag) = match reference.rfind(':') {
        Some(i) if i > slash => (&reference[..i], &reference[i + 1..]),
        _ => (reference, "latest"),
    };
    let name = match path.split_once('/') {
        Some((host, rest)) if host.contains('.') || host.contains(':') || host == "localhost" => {
            rest
        }
        _ => path,
    };
    (name.to_string(), tag.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DOCKER_V2_LIST_MEDIA_TYPE;

    fn schema2_manifest() -> (Vec<u8>, String) {
        let manifest = json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_V2_SCHEMA2_MEDIA_TYPE,
            "config": {
                "mediaType": DOCKER_V2_CONFIG_MEDIA_TYPE,
                "digest": Digest::sha256_of(b"config").to_string(),
                "size": 6
            },
            "layers": [
                {
                    "mediaType": DOCKER_LAYER_MEDIA_TYPE_GZIP,
                    "digest": Digest::sha256_of(b"layer-a").to_string(),
                    "size": 7
                },
                {
                    "mediaType": DOCKER_LAYER_MEDIA_TYPE_GZIP,
                    "digest": Digest::sha256_of(b"layer-b").to_string(),
                    "size": 7
                }
            ]
        });
        (
            serde_json::to_vec(&manifest).unwrap(),
            DOCKER_V2_SCHEMA2_MEDIA_TYPE.to_string(),
        )
    }

    fn schema1_manifest() -> (Vec<u8>, String) {
        let manifest = json!({
            "schemaVersion": 1,
            "name": "library/busybox",
            "tag": "latest",
            "architecture": "amd64",
            "fsLayers": [
                { "blobSum": Digest::sha256_of(b"newest-layer").to_string() },
                { "blobSum": Digest::sha256_of(b"oldest-layer").to_string() }
            ],
            "history": [
                { "v1Compatibility": "{\"os\":\"linux\",\"created\":\"2024-01-02T00:00:00Z\",\"container_config\":{\"Cmd\":[\"/bin/sh\",\"-c\",\"touch b\"]}}" },
                { "v1Compatibility": "{\"created\":\"2024-01-01T00:00:00Z\",\"container_config\":{\"Cmd\":[\"/bin/sh\",\"-c\",\"touch a\"]}}" }
            ]
        });
        (
            serde_json::to_vec(&manifest).unwrap(),
            DOCKER_V2_SCHEMA1_MEDIA_TYPE.to_string(),
        )
    }

    #[test]
    fn test_rejects_list_media_type() {
        let err =
            SourceImage::from_manifest(b"{}".to_vec(), DOCKER_V2_LIST_MEDIA_TYPE.to_string())
                .unwrap_err();
        assert!(matches!(err, Error::UnexpectedNestedList));
    }

    #[test]
    fn test_schema2_layer_infos_keep_order() {
        let (bytes, media_type) = schema2_manifest();
        let image = SourceImage::from_manifest(bytes, media_type).unwrap();
        let layers = image.layer_infos().unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].digest, Some(Digest::sha256_of(b"layer-a")));
        assert_eq!(layers[1].digest, Some(Digest::sha256_of(b"layer-b")));
        assert_eq!(layers[0].size, 7);
    }

    #[test]
    fn test_schema1_layer_infos_reversed_to_oldest_first() {
        let (bytes, media_type) = schema1_manifest();
        let image = SourceImage::from_manifest(bytes, media_type).unwrap();
        let layers = image.layer_infos().unwrap();
        assert_eq!(layers[0].digest, Some(Digest::sha256_of(b"oldest-layer")));
        assert_eq!(layers[1].digest, Some(Digest::sha256_of(b"newest-layer")));
        assert_eq!(layers[0].size, -1);
    }

    #[test]
    fn test_config_info() {
        let (bytes, media_type) = schema2_manifest();
        let image = SourceImage::from_manifest(bytes, media_type).unwrap();
        let config = image.config_info().unwrap().unwrap();
        assert_eq!(config.digest, Some(Digest::sha256_of(b"config")));

        let (bytes, media_type) = schema1_manifest();
        let image = SourceImage::from_manifest(bytes, media_type).unwrap();
        assert!(image.config_info().unwrap().is_none());
    }

    #[test]
    fn test_needs_layer_diff_ids_only_for_schema1_upgrade() {
        let (bytes, media_type) = schema1_manifest();
        let image = SourceImage::from_manifest(bytes, media_type).unwrap();

        let mut updates = ManifestUpdates::default();
        assert!(!image.needs_layer_diff_ids(&updates));

        updates.media_type = Some(DOCKER_V2_SCHEMA2_MEDIA_TYPE.to_string());
        assert!(image.needs_layer_diff_ids(&updates));

        let (bytes, media_type) = schema2_manifest();
        let schema2 = SourceImage::from_manifest(bytes, media_type).unwrap();
        let mut updates = ManifestUpdates::default();
        updates.media_type = Some(OCI_IMAGE_MANIFEST_MEDIA_TYPE.to_string());
        assert!(!schema2.needs_layer_diff_ids(&updates));
    }

    #[test]
    fn test_embedded_reference_conflict_detection() {
        let (bytes, media_type) = schema1_manifest();
        let image = SourceImage::from_manifest(bytes, media_type).unwrap();

        assert!(!image.embedded_reference_conflicts("docker.io/library/busybox:latest"));
        assert!(!image.embedded_reference_conflicts("library/busybox:latest"));
        assert!(image.embedded_reference_conflicts("docker.io/library/busybox:edge"));
        assert!(image.embedded_reference_conflicts("example.com/other/name:latest"));

        let (bytes, media_type) = schema2_manifest();
        let schema2 = SourceImage::from_manifest(bytes, media_type).unwrap();
        assert!(!schema2.embedded_reference_conflicts("anything:at-all"));
    }

    #[test]
    fn test_updated_image_docker_to_oci_media_types() {
        let (bytes, media_type) = schema2_manifest();
        let image = SourceImage::from_manifest(bytes, media_type).unwrap();
        let updates = ManifestUpdates {
            media_type: Some(OCI_IMAGE_MANIFEST_MEDIA_TYPE.to_string()),
            ..Default::default()
        };
        let pending = image.updated_image(&updates).unwrap();
        assert_eq!(pending.media_type, OCI_IMAGE_MANIFEST_MEDIA_TYPE);

        let converted: ImageManifest = serde_json::from_slice(&pending.manifest).unwrap();
        assert_eq!(
            converted.media_type.as_deref(),
            Some(OCI_IMAGE_MANIFEST_MEDIA_TYPE)
        );
        assert_eq!(converted.config.media_type, OCI_IMAGE_CONFIG_MEDIA_TYPE);
        assert!(converted
            .layers
            .iter()
            .all(|l| l.media_type == OCI_LAYER_MEDIA_TYPE_GZIP));
        // Digests are untouched by conversion.
        assert_eq!(
            converted.layers[0].digest,
            Digest::sha256_of(b"layer-a").to_string()
        );
    }

    #[test]
    fn test_updated_image_layer_substitution() {
        let (bytes, media_type) = schema2_manifest();
        let image = SourceImage::from_manifest(bytes, media_type).unwrap();
        let replacement = vec![
            BlobInfo {
                digest: Some(Digest::sha256_of(b"new-a")),
                size: 11,
                media_type: None,
                urls: Vec::new(),
            },
            BlobInfo {
                digest: Some(Digest::sha256_of(b"new-b")),
                size: 22,
                media_type: None,
                urls: Vec::new(),
            },
        ];
        let updates = ManifestUpdates {
            layer_infos: Some(replacement),
            ..Default::default()
        };
        let pending = image.updated_image(&updates).unwrap();
        let rewritten: ImageManifest = serde_json::from_slice(&pending.manifest).unwrap();
        assert_eq!(
            rewritten.layers[0].digest,
            Digest::sha256_of(b"new-a").to_string()
        );
        assert_eq!(rewritten.layers[1].size, 22);
    }

    #[test]
    fn test_updated_image_to_schema1_unimplemented() {
        let (bytes, media_type) = schema2_manifest();
        let image = SourceImage::from_manifest(bytes, media_type).unwrap();
        let updates = ManifestUpdates {
            media_type: Some(DOCKER_V2_SCHEMA1_MEDIA_TYPE.to_string()),
            ..Default::default()
        };
        assert!(matches!(
            image.updated_image(&updates),
            Err(Error::Unimplemented(_))
        ));
    }

    #[test]
    fn test_schema1_upgrade_synthesizes_config() {
        let (bytes, media_type) = schema1_manifest();
        let image = SourceImage::from_manifest(bytes, media_type).unwrap();

        let copied = vec![
            BlobInfo {
                digest: Some(Digest::sha256_of(b"oldest-layer")),
                size: 100,
                media_type: None,
                urls: Vec::new(),
            },
            BlobInfo {
                digest: Some(Digest::sha256_of(b"newest-layer")),
                size: 200,
                media_type: None,
                urls: Vec::new(),
            },
        ];
        let diff_ids = vec![
            Some(Digest::sha256_of(b"diff-oldest")),
            Some(Digest::sha256_of(b"diff-newest")),
        ];
        let updates = ManifestUpdates {
            media_type: Some(DOCKER_V2_SCHEMA2_MEDIA_TYPE.to_string()),
            information_only: InformationOnly {
                layer_infos: copied,
                layer_diff_ids: diff_ids,
            },
            ..Default::default()
        };

        let pending = image.updated_image(&updates).unwrap();
        assert_eq!(pending.media_type, DOCKER_V2_SCHEMA2_MEDIA_TYPE);

        let manifest: ImageManifest = serde_json::from_slice(&pending.manifest).unwrap();
        assert_eq!(manifest.schema_version, 2);
        assert_eq!(manifest.layers.len(), 2);
        assert_eq!(
            manifest.layers[0].digest,
            Digest::sha256_of(b"oldest-layer").to_string()
        );

        let PendingConfig::Synthesized { info, bytes } = &pending.config else {
            panic!("expected a synthesized config");
        };
        assert_eq!(info.digest, Some(Digest::sha256_of(bytes)));
        assert_eq!(manifest.config.digest, Digest::sha256_of(bytes).to_string());

        let config: Value = serde_json::from_slice(bytes).unwrap();
        assert_eq!(config["os"], "linux");
        assert_eq!(config["architecture"], "amd64");
        assert_eq!(config["rootfs"]["type"], "layers");
        let ids = config["rootfs"]["diff_ids"].as_array().unwrap();
        assert_eq!(ids[0], Digest::sha256_of(b"diff-oldest").to_string());
        assert_eq!(ids[1], Digest::sha256_of(b"diff-newest").to_string());
        // History is oldest-first after the reversal.
        let history = config["history"].as_array().unwrap();
        assert_eq!(history[0]["created"], "2024-01-01T00:00:00Z");
        assert!(history[1]["created_by"]
            .as_str()
            .unwrap()
            .contains("touch b"));
    }

    #[test]
    fn test_schema1_upgrade_requires_diff_ids() {
        let (bytes, media_type) = schema1_manifest();
        let image = SourceImage::from_manifest(bytes, media_type).unwrap();
        let updates = ManifestUpdates {
            media_type: Some(DOCKER_V2_SCHEMA2_MEDIA_TYPE.to_string()),
            information_only: InformationOnly {
                layer_infos: vec![
                    BlobInfo::for_digest(Digest::sha256_of(b"a")),
                    BlobInfo::for_digest(Digest::sha256_of(b"b")),
                ],
                layer_diff_ids: vec![Some(Digest::sha256_of(b"d")), None],
            },
            ..Default::default()
        };
        assert!(matches!(
            image.updated_image(&updates),
            Err(Error::InternalIntegrity(_))
        ));
    }

    #[test]
    fn test_parse_reference() {
        assert_eq!(
            parse_reference("docker.io/library/busybox:latest"),
            ("library/busybox".to_string(), "latest".to_string())
        );
        assert_eq!(
            parse_reference("library/busybox"),
            ("library/busybox".to_string(), "latest".to_string())
        );
        assert_eq!(
            parse_reference("localhost:5000/app:v1"),
            ("app".to_string(), "v1".to_string())
        );
        assert_eq!(
            parse_reference("example.com/app@sha256:abcd"),
            ("app".to_string(), "latest".to_string())
        );
    }

    #[test]
    fn test_trivial_updates() {
        let updates = ManifestUpdates::default();
        assert!(updates.is_trivial());

        let updates = ManifestUpdates {
            information_only: InformationOnly {
                layer_infos: vec![BlobInfo::for_digest(Digest::sha256_of(b"x"))],
                layer_diff_ids: Vec::new(),
            },
            ..Default::default()
        };
        assert!(updates.is_trivial());

        let updates = ManifestUpdates {
            media_type: Some(OCI_IMAGE_MANIFEST_MEDIA_TYPE.to_string()),
            ..Default::default()
        };
        assert!(!updates.is_trivial());
    }
}
