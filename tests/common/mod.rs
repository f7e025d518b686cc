//! In-memory source and destination backends plus fixture builders shared
//! by the integration tests.

// Not every test binary uses every fixture.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt};

use ocicopy::media_types::*;
use ocicopy::{
    probe_media_type, BlobInfo, BlobReader, Digest, Error, ImageDestination, ImageSource, Policy,
    Result, Signer,
};

// =============================================================================
// Fixtures
// =============================================================================

/// Gzips `data` with default settings.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Builds an OCI or docker schema 2 image manifest over the given config
/// and layer blobs.
pub fn image_manifest(media_type: &str, config: &[u8], layers: &[&[u8]]) -> Vec<u8> {
    let (config_type, layer_type) = match media_type {
        DOCKER_V2_SCHEMA2_MEDIA_TYPE => (DOCKER_V2_CONFIG_MEDIA_TYPE, DOCKER_LAYER_MEDIA_TYPE_GZIP),
        _ => (OCI_IMAGE_CONFIG_MEDIA_TYPE, OCI_LAYER_MEDIA_TYPE_GZIP),
    };
    let manifest = json!({
        "schemaVersion": 2,
        "mediaType": media_type,
        "config": {
            "mediaType": config_type,
            "digest": sha256(config).to_string(),
            "size": config.len()
        },
        "layers": layers.iter().map(|layer| json!({
            "mediaType": layer_type,
            "digest": sha256(layer).to_string(),
            "size": layer.len()
        })).collect::<Vec<_>>()
    });
    serde_json::to_vec(&manifest).unwrap()
}

/// Builds a minimal image config blob for the given OS.
pub fn config_blob(os: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "architecture": "amd64",
        "os": os,
        "rootfs": { "type": "layers", "diff_ids": [] }
    }))
    .unwrap()
}

/// Builds a docker schema 1 manifest over the given gzip layer blobs,
/// oldest layer first (the manifest itself stores them newest-first).
pub fn schema1_manifest(name: &str, tag: &str, layers_oldest_first: &[&[u8]]) -> Vec<u8> {
    let fs_layers: Vec<_> = layers_oldest_first
        .iter()
        .rev()
        .map(|layer| json!({ "blobSum": sha256(layer).to_string() }))
        .collect();
    let history: Vec<_> = (0..layers_oldest_first.len())
        .rev()
        .map(|i| {
            json!({
                "v1Compatibility": json!({
                    "os": "linux",
                    "architecture": "amd64",
                    "created": format!("2024-01-0{}T00:00:00Z", i + 1),
                    "container_config": { "Cmd": ["/bin/sh", "-c", format!("step {}", i)] }
                })
                .to_string()
            })
        })
        .collect();
    serde_json::to_vec(&json!({
        "schemaVersion": 1,
        "name": name,
        "tag": tag,
        "architecture": "amd64",
        "fsLayers": fs_layers,
        "history": history
    }))
    .unwrap()
}

pub fn sha256(data: &[u8]) -> Digest {
    Digest::sha256_of(data)
}

// =============================================================================
// In-Memory Source
// =============================================================================

pub struct MemSource {
    reference: String,
    top_manifest: (Vec<u8>, String),
    instance_manifests: HashMap<String, (Vec<u8>, String)>,
    blobs: HashMap<String, Vec<u8>>,
    signatures: Vec<Vec<u8>>,
    layer_substitution: Option<Vec<BlobInfo>>,
    closed: Arc<AtomicBool>,
}

impl MemSource {
    pub fn new(manifest: Vec<u8>, media_type: &str) -> Self {
        Self {
            reference: "mem://source".to_string(),
            top_manifest: (manifest, media_type.to_string()),
            instance_manifests: HashMap::new(),
            blobs: HashMap::new(),
            signatures: Vec::new(),
            layer_substitution: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle observing whether the source was closed, surviving the move
    /// of the source into `copy_image`.
    pub fn closed_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    /// Registers a blob; its digest is derived from the content.
    pub fn with_blob(mut self, data: &[u8]) -> Self {
        self.blobs.insert(sha256(data).to_string(), data.to_vec());
        self
    }

    /// Registers a blob under an arbitrary digest, for corruption tests.
    pub fn with_blob_at(mut self, digest: Digest, data: Vec<u8>) -> Self {
        self.blobs.insert(digest.to_string(), data);
        self
    }

    /// Registers the manifest of one list instance.
    pub fn with_instance(mut self, manifest: Vec<u8>, media_type: &str) -> Self {
        self.instance_manifests.insert(
            sha256(&manifest).to_string(),
            (manifest, media_type.to_string()),
        );
        self
    }

    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signatures.push(signature);
        self
    }

    pub fn with_layer_substitution(mut self, layers: Vec<BlobInfo>) -> Self {
        self.layer_substitution = Some(layers);
        self
    }
}

#[async_trait]
impl ImageSource for MemSource {
    fn reference(&self) -> &str {
        &self.reference
    }

    async fn manifest(&self, instance: Option<&Digest>) -> Result<(Vec<u8>, String)> {
        match instance {
            None => Ok(self.top_manifest.clone()),
            Some(digest) => self
                .instance_manifests
                .get(&digest.to_string())
                .cloned()
                .ok_or_else(|| Error::Transport(format!("no manifest for instance {}", digest))),
        }
    }

    async fn blob(&self, info: &BlobInfo) -> Result<(BlobReader, i64)> {
        let digest = info
            .digest
            .as_ref()
            .ok_or_else(|| Error::Transport("blob request without digest".to_string()))?;
        let data = self
            .blobs
            .get(&digest.to_string())
            .ok_or_else(|| Error::Transport(format!("blob {} not found", digest)))?;
        let size = data.len() as i64;
        let reader: BlobReader = Box::new(Cursor::new(data.clone()));
        Ok((reader, size))
    }

    async fn signatures(&self, _instance: Option<&Digest>) -> Result<Vec<Vec<u8>>> {
        Ok(self.signatures.clone())
    }

    fn layer_infos_for_copy(&self) -> Option<Vec<BlobInfo>> {
        self.layer_substitution.clone()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// In-Memory Destination
// =============================================================================

#[derive(Debug, Clone)]
pub struct StoredManifest {
    pub bytes: Vec<u8>,
    pub instance: Option<String>,
}

#[derive(Debug, Default)]
pub struct DestState {
    pub blobs: HashMap<String, Vec<u8>>,
    pub manifests: Vec<StoredManifest>,
    pub signatures: Vec<(Vec<Vec<u8>>, Option<String>)>,
    pub reapplied: Vec<String>,
    pub put_blob_calls: usize,
    pub committed: bool,
    pub closed: bool,
}

pub struct MemDest {
    reference: String,
    supported: Vec<String>,
    accepts_foreign: bool,
    compress_layers: bool,
    match_os: bool,
    signature_support: bool,
    rejected_types: Vec<String>,
    size_overrides: Mutex<HashMap<String, i64>>,
    state: Arc<Mutex<DestState>>,
}

impl MemDest {
    pub fn new(supported: &[&str]) -> Self {
        Self {
            reference: String::new(),
            supported: supported.iter().map(|t| t.to_string()).collect(),
            accepts_foreign: false,
            compress_layers: false,
            match_os: false,
            signature_support: false,
            rejected_types: Vec::new(),
            size_overrides: Mutex::new(HashMap::new()),
            state: Arc::new(Mutex::new(DestState::default())),
        }
    }

    /// Handle observing the destination's state, surviving the move of the
    /// destination into `copy_image`.
    pub fn state_handle(&self) -> Arc<Mutex<DestState>> {
        Arc::clone(&self.state)
    }

    pub fn with_reference(mut self, reference: &str) -> Self {
        self.reference = reference.to_string();
        self
    }

    pub fn with_compression(mut self) -> Self {
        self.compress_layers = true;
        self
    }

    pub fn with_foreign_layers(mut self) -> Self {
        self.accepts_foreign = true;
        self
    }

    pub fn with_os_match(mut self) -> Self {
        self.match_os = true;
        self
    }

    pub fn with_signature_support(mut self) -> Self {
        self.signature_support = true;
        self
    }

    /// Manifests whose media type is listed here are rejected with
    /// [`Error::ManifestRejected`] on store.
    pub fn rejecting(mut self, media_types: &[&str]) -> Self {
        self.rejected_types = media_types.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Seeds a blob as already present at the destination.
    pub fn with_preexisting_blob(self, data: &[u8]) -> Self {
        self.state
            .lock()
            .unwrap()
            .blobs
            .insert(sha256(data).to_string(), data.to_vec());
        self
    }

    /// Makes `has_blob` report the given size for a digest, regardless of
    /// the stored content.
    pub fn with_reported_size(self, digest: Digest, size: i64) -> Self {
        self.state
            .lock()
            .unwrap()
            .blobs
            .entry(digest.to_string())
            .or_default();
        self.size_overrides
            .lock()
            .unwrap()
            .insert(digest.to_string(), size);
        self
    }
}

#[async_trait]
impl ImageDestination for MemDest {
    fn reference(&self) -> &str {
        &self.reference
    }

    fn supported_manifest_media_types(&self) -> Vec<String> {
        self.supported.clone()
    }

    fn accepts_foreign_layer_urls(&self) -> bool {
        self.accepts_foreign
    }

    fn should_compress_layers(&self) -> bool {
        self.compress_layers
    }

    fn must_match_runtime_os(&self) -> bool {
        self.match_os
    }

    async fn has_blob(&self, info: &BlobInfo) -> Result<(bool, i64)> {
        let Some(digest) = &info.digest else {
            return Ok((false, -1));
        };
        let key = digest.to_string();
        if let Some(size) = self.size_overrides.lock().unwrap().get(&key) {
            return Ok((true, *size));
        }
        let state = self.state.lock().unwrap();
        match state.blobs.get(&key) {
            Some(data) => Ok((true, data.len() as i64)),
            None => Ok((false, -1)),
        }
    }

    async fn reapply_blob(&self, info: &BlobInfo) -> Result<BlobInfo> {
        let digest = info
            .digest
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default();
        self.state.lock().unwrap().reapplied.push(digest);
        Ok(info.clone())
    }

    async fn put_blob(
        &self,
        stream: &mut (dyn AsyncRead + Send + Unpin),
        info: &BlobInfo,
    ) -> Result<BlobInfo> {
        let mut data = Vec::new();
        stream.read_to_end(&mut data).await?;
        let digest = sha256(&data);
        let size = data.len() as i64;
        let mut state = self.state.lock().unwrap();
        state.put_blob_calls += 1;
        state.blobs.insert(digest.to_string(), data);
        let mut stored = info.clone();
        stored.digest = Some(digest);
        stored.size = size;
        Ok(stored)
    }

    async fn put_manifest(&self, manifest: &[u8], instance: Option<&Digest>) -> Result<()> {
        let media_type = probe_media_type(manifest)?;
        if self.rejected_types.contains(&media_type) {
            return Err(Error::ManifestRejected {
                media_type,
                reason: "manifest type not acceptable to this destination".to_string(),
            });
        }
        let mut state = self.state.lock().unwrap();
        state.manifests.push(StoredManifest {
            bytes: manifest.to_vec(),
            instance: instance.map(|d| d.to_string()),
        });
        Ok(())
    }

    async fn supports_signatures(&self) -> Result<()> {
        if self.signature_support {
            Ok(())
        } else {
            Err(Error::Transport(
                "destination does not support signatures".to_string(),
            ))
        }
    }

    async fn put_signatures(
        &self,
        signatures: &[Vec<u8>],
        instance: Option<&Digest>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .signatures
            .push((signatures.to_vec(), instance.map(|d| d.to_string())));
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.state.lock().unwrap().committed = true;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

// =============================================================================
// Policies and Signer
// =============================================================================

pub struct AllowAll;

#[async_trait]
impl Policy for AllowAll {
    async fn is_allowed(&self, _manifest: &[u8], _media_type: &str, _ref: &str) -> Result<bool> {
        Ok(true)
    }
}

pub struct DenyAll;

#[async_trait]
impl Policy for DenyAll {
    async fn is_allowed(&self, _manifest: &[u8], _media_type: &str, _ref: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Signs by prefixing the manifest digest with the key id.
pub struct FakeSigner;

#[async_trait]
impl Signer for FakeSigner {
    async fn sign(&self, manifest: &[u8], key_id: &str) -> Result<Vec<u8>> {
        Ok(format!("{}:{}", key_id, sha256(manifest)).into_bytes())
    }
}
