//! # Image Copy Orchestration
//!
//! The entry point [`copy_image`] transfers one image, or an index of
//! images, from an [`ImageSource`] to an [`ImageDestination`]:
//!
//! 1. Validate options, probe the top-level manifest, and dispatch:
//!    a single image is copied directly; a manifest list is either reduced
//!    to the instance matching the current runtime or copied in full.
//! 2. Per image: admission check, OS compatibility check, signature policy,
//!    manifest format negotiation, sequential layer copy through the
//!    streaming pipeline, config copy, manifest store with format
//!    fallback, signing.
//! 3. Commit the destination exactly once after everything succeeded.
//!
//! ## Signature safety
//!
//! Signatures cover manifest bytes, so any modification invalidates them.
//! `can_modify_manifest` is derived once per image (true iff no signatures
//! will be carried) and consulted before every potential mutation: layer
//! substitution, embedded-reference rewrite, format conversion, and list
//! rewriting all fail rather than silently breaking signatures.
//!
//! ## Retry policy
//!
//! The only automatic retry is the manifest format fallback: when the
//! destination answers a store with [`Error::ManifestRejected`], the next
//! negotiated candidate format is tried. Every other error aborts.

use std::collections::HashMap;
use std::time::Duration;

use indicatif::MultiProgress;
use tokio::sync::mpsc;
use tracing::debug;

use crate::constants::{
    DEFAULT_PROGRESS_INTERVAL, DOCKER_V2_LIST_MEDIA_TYPE, OCI_IMAGE_INDEX_MEDIA_TYPE,
};
use crate::digest::Digest;
use crate::error::{with_teardown, Error, Result};
use crate::image::{ManifestUpdates, PendingConfig, PendingImage, SourceImage};
use crate::manifest::{
    determine_list_conversion, determine_manifest_conversion, is_multi_image, manifest_digest,
    probe_media_type, runtime_os, ListUpdate, ManifestList,
};
use crate::pipeline::{copy_blob_from_stream, ProgressChannel};
use crate::progress::{ProgressUpdate, ReportSink};
use crate::transport::{
    BlobInfo, BlobReader, ImageDestination, ImageSource, Policy, Signer, SystemContext,
};

// =============================================================================
// Options
// =============================================================================

/// How a multi-image source is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultipleImages {
    /// Reduce a manifest list to the single instance matching the source
    /// context (or the current runtime); the destination never sees a list.
    #[default]
    OnlyCurrentRuntime,
    /// Copy every instance and store the (possibly converted) list.
    All,
}

/// Caller-facing configuration for one copy invocation.
#[derive(Clone)]
pub struct Options {
    /// Drop any preexisting signatures. `sign_by` still adds a new one.
    pub remove_signatures: bool,
    /// Key identifier to sign the stored manifest with. Requires a signer.
    pub sign_by: Option<String>,
    /// Sink for human-readable progress; hidden when absent.
    pub report: Option<MultiProgress>,
    /// Platform context describing what to select from a manifest list.
    pub source_context: SystemContext,
    /// Platform context of the destination runtime.
    pub destination_context: SystemContext,
    /// Minimum interval between events on the progress channel.
    pub progress_interval: Duration,
    /// Machine-readable progress events, rate-limited and best-effort.
    pub progress: Option<mpsc::Sender<ProgressUpdate>>,
    /// Store exactly this manifest type, skipping negotiation.
    pub force_manifest_media_type: Option<String>,
    /// Single-instance or whole-list behavior for multi-image sources.
    pub multiple_images: MultipleImages,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            remove_signatures: false,
            sign_by: None,
            report: None,
            source_context: SystemContext::default(),
            destination_context: SystemContext::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            progress: None,
            force_manifest_media_type: None,
            multiple_images: MultipleImages::default(),
        }
    }
}

fn validate_options(options: &Options, have_signer: bool) -> Result<()> {
    if let Some(key_id) = &options.sign_by {
        if key_id.is_empty() {
            return Err(Error::Config("sign_by must name a key".to_string()));
        }
        if !have_signer {
            return Err(Error::Config(
                "sign_by is set but no signer was provided".to_string(),
            ));
        }
    }
    if options.progress.is_some() && options.progress_interval.is_zero() {
        return Err(Error::Config(
            "a progress channel requires a non-zero progress_interval".to_string(),
        ));
    }
    if let Some(forced) = &options.force_manifest_media_type {
        if forced.is_empty() {
            return Err(Error::Config(
                "force_manifest_media_type must not be empty".to_string(),
            ));
        }
    }
    Ok(())
}

// =============================================================================
// Entry Point
// =============================================================================

/// Copies the image (or index of images) from `source` to `dest`.
///
/// Both handles are released on every exit path; teardown failures are
/// appended to the primary error as context. The destination is committed
/// exactly once, after all blobs, manifests, and signatures were stored;
/// if this function fails, the destination's state is whatever its backend
/// guarantees, never a claimed partial success.
///
/// # Errors
///
/// Any error kind in [`Error`]; see the per-step documentation in this
/// module. The caller owns retry policy, except for the built-in manifest
/// format fallback.
pub async fn copy_image(
    policy: &dyn Policy,
    source: Box<dyn ImageSource>,
    dest: Box<dyn ImageDestination>,
    signer: Option<&dyn Signer>,
    options: &Options,
) -> Result<()> {
    validate_options(options, signer.is_some())?;

    let result = run_copy(policy, &*source, &*dest, signer, options).await;

    let result = with_teardown(result, "src", source.close().await);
    with_teardown(result, "dest", dest.close().await)
}

async fn run_copy(
    policy: &dyn Policy,
    source: &dyn ImageSource,
    dest: &dyn ImageDestination,
    signer: Option<&dyn Signer>,
    options: &Options,
) -> Result<()> {
    let mut copier = Copier {
        source,
        dest,
        copied_blobs: HashMap::new(),
        cached_diff_ids: HashMap::new(),
        report: ReportSink::new(options.report.clone()),
        progress: options.progress.clone().map(|sender| ProgressChannel {
            sender,
            interval: options.progress_interval,
        }),
    };

    let (manifest_bytes, mut media_type) = source.manifest(None).await?;
    if media_type.is_empty() {
        media_type = probe_media_type(&manifest_bytes)?;
    }

    if !is_multi_image(&media_type) {
        copier
            .copy_one_image(policy, options, signer, None, None)
            .await?;
    } else {
        match options.multiple_images {
            MultipleImages::OnlyCurrentRuntime => {
                let list = ManifestList::parse(&manifest_bytes, &media_type)?;
                let instance = list.choose_instance(&options.source_context)?;
                debug!(%instance, "source is a manifest list; copying only the matching instance");
                copier
                    .copy_one_image(policy, options, signer, Some(&instance), None)
                    .await?;
            }
            MultipleImages::All => {
                if !supports_multiple_images(dest) {
                    return Err(Error::MultiImageUnsupported {
                        reference: dest.reference().to_string(),
                    });
                }
                debug!("source is a manifest list; copying all instances");
                copier
                    .copy_multiple_images(policy, options, signer, manifest_bytes, media_type)
                    .await?;
            }
        }
    }

    dest.commit().await
}

/// Whether the destination can store at least one multi-image manifest
/// type. An empty supported set means anything goes.
fn supports_multiple_images(dest: &dyn ImageDestination) -> bool {
    let supported = dest.supported_manifest_media_types();
    supported.is_empty() || supported.iter().any(|t| is_multi_image(t))
}

// =============================================================================
// Copier
// =============================================================================

/// State shared across all images of one invocation.
///
/// Layers and instances are processed strictly sequentially, so the maps
/// need no locking: only one image-copy task is ever active.
struct Copier<'a> {
    source: &'a dyn ImageSource,
    dest: &'a dyn ImageDestination,
    /// Digest substitutions for blobs uploaded this run.
    copied_blobs: HashMap<Digest, Digest>,
    /// Compressed digest to uncompressed digest, filled as diffIDs are
    /// computed and consulted to skip recomputation.
    cached_diff_ids: HashMap<Digest, Digest>,
    report: ReportSink,
    progress: Option<ProgressChannel>,
}

/// State specific to one single-image copy (possibly one instance of a
/// manifest list).
struct ImageCopier<'a, 'c> {
    c: &'c mut Copier<'a>,
    updates: ManifestUpdates,
    src: SourceImage,
    diff_ids_are_needed: bool,
    can_modify_manifest: bool,
}

impl<'a> Copier<'a> {
    /// Copies one single image and returns the stored manifest bytes and
    /// their media type.
    async fn copy_one_image(
        &mut self,
        policy: &dyn Policy,
        options: &Options,
        signer: Option<&dyn Signer>,
        source_instance: Option<&Digest>,
        target_instance: Option<&Digest>,
    ) -> Result<(Vec<u8>, String)> {
        let (manifest_bytes, mut media_type) = self.source.manifest(source_instance).await?;
        if media_type.is_empty() {
            media_type = probe_media_type(&manifest_bytes)?;
        }
        // A list inside a list is not supported; fail cleanly before doing
        // any work.
        if is_multi_image(&media_type) {
            return Err(Error::UnexpectedNestedList);
        }

        // The admission check runs before any parsing beyond the media
        // type, and both a negative answer and an error reject.
        match policy
            .is_allowed(&manifest_bytes, &media_type, self.source.reference())
            .await
        {
            Ok(true) => {}
            Ok(false) => return Err(Error::PolicyDenied("denied by policy".to_string())),
            Err(err) => return Err(Error::PolicyDenied(err.to_string())),
        }

        let src = SourceImage::from_manifest(manifest_bytes, media_type)?;
        self.check_destination_runtime_os(options, &src).await?;

        let signatures = if options.remove_signatures {
            Vec::new()
        } else {
            self.report.println("getting image source signatures");
            self.source.signatures(source_instance).await?
        };
        if !signatures.is_empty() {
            self.report
                .println("checking if image destination supports signatures");
            self.dest.supports_signatures().await?;
        }

        let can_modify_manifest = signatures.is_empty();
        let mut ic = ImageCopier {
            updates: ManifestUpdates::default(),
            src,
            diff_ids_are_needed: false,
            can_modify_manifest,
            c: self,
        };

        ic.update_embedded_reference()?;

        let supported = ic.c.dest.supported_manifest_media_types();
        let (preferred, fallbacks) = determine_manifest_conversion(
            ic.src.media_type(),
            &supported,
            options.force_manifest_media_type.as_deref(),
        );
        if preferred != ic.src.media_type() {
            ic.updates.media_type = Some(preferred.clone());
        }
        ic.diff_ids_are_needed = ic.src.needs_layer_diff_ids(&ic.updates);

        ic.copy_layers().await?;

        let mut stored_type = preferred.clone();
        let stored = match ic.copy_updated_config_and_manifest(target_instance).await {
            Ok(manifest) => manifest,
            Err(err) => {
                debug!(media_type = %preferred, error = %err, "writing manifest with preferred type failed");
                // Only a format rejection is retriable, and only when
                // other candidates exist.
                if !err.is_manifest_rejected() || fallbacks.is_empty() {
                    return Err(err);
                }
                // Converting means modifying; with signatures present each
                // candidate would fail the same way, so bail out with a
                // clearer message.
                if !ic.can_modify_manifest {
                    return Err(Error::ManifestRejected {
                        media_type: preferred.clone(),
                        reason: format!(
                            "{}; converting the manifest is not possible because existing \
                             signatures would be invalidated",
                            err
                        ),
                    });
                }

                let mut attempts = vec![format!("{}({})", preferred, err)];
                let mut accepted = None;
                for candidate in &fallbacks {
                    debug!(media_type = %candidate, "trying next manifest type");
                    ic.updates.media_type = Some(candidate.clone());
                    match ic.copy_updated_config_and_manifest(target_instance).await {
                        Ok(manifest) => {
                            accepted = Some((manifest, candidate.clone()));
                            break;
                        }
                        Err(err) => {
                            debug!(media_type = %candidate, error = %err, "manifest upload failed");
                            attempts.push(format!("{}({})", candidate, err));
                        }
                    }
                }
                match accepted {
                    Some((manifest, candidate)) => {
                        stored_type = candidate;
                        manifest
                    }
                    None => {
                        return Err(Error::ManifestRejected {
                            media_type: preferred,
                            reason: format!(
                                "uploading manifest failed, attempted the following formats: {}",
                                attempts.join(", ")
                            ),
                        });
                    }
                }
            }
        };

        let mut signatures = signatures;
        if let Some(key_id) = &options.sign_by {
            let signer = signer.ok_or_else(|| {
                Error::Config("sign_by is set but no signer was provided".to_string())
            })?;
            ic.c.report.println("signing manifest");
            signatures.push(signer.sign(&stored, key_id).await?);
        }

        ic.c.report.println("storing signatures");
        ic.c.dest.put_signatures(&signatures, target_instance).await?;

        Ok((stored, stored_type))
    }

    /// Enforces the asymmetric OS rule when the destination requires a
    /// runtime OS match: a windows destination only accepts windows images,
    /// everything else accepts anything except windows images.
    async fn check_destination_runtime_os(
        &self,
        options: &Options,
        src: &SourceImage,
    ) -> Result<()> {
        if !self.dest.must_match_runtime_os() {
            return Ok(());
        }
        let wanted_os = options
            .destination_context
            .os
            .clone()
            .unwrap_or_else(runtime_os);
        let image_os = src.os(self.source).await?;
        if (image_os == "windows") != (wanted_os == "windows") {
            return Err(Error::OsIncompatible {
                image_os,
                wanted_os,
            });
        }
        Ok(())
    }

    /// Copies every instance of a manifest list, then stores the list
    /// itself, converting its type when the destination requires it.
    async fn copy_multiple_images(
        &mut self,
        policy: &dyn Policy,
        options: &Options,
        signer: Option<&dyn Signer>,
        manifest_bytes: Vec<u8>,
        media_type: String,
    ) -> Result<()> {
        let mut list = ManifestList::parse(&manifest_bytes, &media_type)?;
        let original_instances = list.instances().to_vec();

        let signatures = if options.remove_signatures {
            Vec::new()
        } else {
            self.report.println("getting image list signatures");
            self.source.signatures(None).await?
        };
        if !signatures.is_empty() {
            self.report
                .println("checking if image list destination supports signatures");
            self.dest.supports_signatures().await?;
        }

        // Copy each instance, in list order, addressing source and target
        // by the instance digest.
        let instance_digests = list.instance_digests()?;
        let total = instance_digests.len();
        let mut updates = Vec::with_capacity(total);
        for (index, instance) in instance_digests.iter().enumerate() {
            debug!(%instance, index = index + 1, total, "copying list instance");
            let (stored, stored_type) = self
                .copy_one_image(policy, options, signer, Some(instance), Some(instance))
                .await?;
            updates.push(ListUpdate {
                digest: manifest_digest(&stored),
                size: stored.len() as i64,
                media_type: stored_type,
            });
        }
        list.update_instances(updates)?;

        let mut list_is_modified = list.instances() != original_instances;

        let selected = determine_list_conversion(
            &media_type,
            &self.dest.supported_manifest_media_types(),
            self.dest.reference(),
        )?;
        if selected != list.media_type() {
            list_is_modified = true;
            list = match selected.as_str() {
                DOCKER_V2_LIST_MEDIA_TYPE => list.to_schema2_list(),
                OCI_IMAGE_INDEX_MEDIA_TYPE => list.to_oci1_index(),
                other => {
                    return Err(Error::Unimplemented(format!(
                        "conversion to manifest list type '{}' is not supported",
                        other
                    )));
                }
            };
        }

        // Byte-exact round trip whenever nothing changed; otherwise
        // reserialize, which requires that no signatures are carried.
        let list_bytes = if list_is_modified {
            if !signatures.is_empty() {
                return Err(Error::SignatureConflict(
                    "the manifest list changed during the copy but its signatures must be \
                     preserved"
                        .to_string(),
                ));
            }
            debug!("manifest list has been updated");
            list.serialize()?
        } else {
            manifest_bytes
        };

        self.dest.put_manifest(&list_bytes, None).await?;

        let mut signatures = signatures;
        if let Some(key_id) = &options.sign_by {
            let signer = signer.ok_or_else(|| {
                Error::Config("sign_by is set but no signer was provided".to_string())
            })?;
            signatures.push(signer.sign(&list_bytes, key_id).await?);
        }
        self.report.println("storing list signatures");
        self.dest.put_signatures(&signatures, None).await?;

        Ok(())
    }
}

// =============================================================================
// Per-Image Copy
// =============================================================================

impl ImageCopier<'_, '_> {
    /// Records a rewrite of a conflicting embedded schema 1 reference, or
    /// refuses when the manifest must stay untouched.
    fn update_embedded_reference(&mut self) -> Result<()> {
        let dest_reference = self.c.dest.reference();
        if dest_reference.is_empty() {
            // Destination has no canonical reference to conflict with.
            return Ok(());
        }
        if !self.src.embedded_reference_conflicts(dest_reference) {
            return Ok(());
        }
        if !self.can_modify_manifest {
            return Err(Error::SignatureConflict(format!(
                "copying an image with an embedded reference to '{}' would invalidate existing \
                 signatures; remove signatures to proceed",
                dest_reference
            )));
        }
        self.updates.embedded_reference = Some(dest_reference.to_string());
        Ok(())
    }

    /// Copies all layers in manifest order, accumulating destination infos
    /// and diffIDs in the manifest updates.
    async fn copy_layers(&mut self) -> Result<()> {
        let mut src_infos = self.src.layer_infos()?;
        let mut src_infos_updated = false;
        if let Some(substituted) = self.c.source.layer_infos_for_copy() {
            if substituted != src_infos {
                if !self.can_modify_manifest {
                    return Err(Error::SignatureConflict(
                        "the source substituted the layer list but the manifest cannot be \
                         modified"
                            .to_string(),
                    ));
                }
                src_infos = substituted;
                src_infos_updated = true;
            }
        }

        let mut dest_infos = Vec::with_capacity(src_infos.len());
        let mut diff_ids = Vec::with_capacity(src_infos.len());
        for src_layer in &src_infos {
            if self.c.dest.accepts_foreign_layer_urls() && !src_layer.urls.is_empty() {
                // Schema 1 does not support URLs, so the formats needing
                // diffIDs never produce foreign layers; if the combination
                // appears anyway there is no defined way to compute one.
                if self.diff_ids_are_needed {
                    return Err(Error::Unimplemented(
                        "computing a diffID for a foreign layer is not supported".to_string(),
                    ));
                }
                self.c.report.println(format!(
                    "skipping foreign layer {} copy to {}",
                    src_layer.digest_label(),
                    self.c.dest.reference()
                ));
                dest_infos.push(src_layer.clone());
                diff_ids.push(None);
                continue;
            }
            let (dest_info, diff_id) = self.copy_layer(src_layer).await?;
            dest_infos.push(dest_info);
            diff_ids.push(diff_id);
        }

        self.updates.information_only.layer_infos = dest_infos.clone();
        if self.diff_ids_are_needed {
            self.updates.information_only.layer_diff_ids = diff_ids;
        }
        if src_infos_updated || layer_digests_differ(&src_infos, &dest_infos) {
            self.updates.layer_infos = Some(dest_infos);
        }
        Ok(())
    }

    /// Copies a single layer: skip when the destination already has it and
    /// no diffID is pending, otherwise stream it through the pipeline.
    async fn copy_layer(&mut self, src_info: &BlobInfo) -> Result<(BlobInfo, Option<Digest>)> {
        let digest = src_info.digest.clone().ok_or_else(|| Error::InvalidDigest {
            digest: String::new(),
            reason: "layer has no digest".to_string(),
        })?;

        let (present, extant_size) = self.c.dest.has_blob(src_info).await?;
        let diff_id_is_needed =
            self.diff_ids_are_needed && !self.c.cached_diff_ids.contains_key(&digest);

        if present && !diff_id_is_needed {
            // Sizes must agree when both sides assert one.
            if src_info.size != -1 && src_info.size != extant_size {
                return Err(Error::SizeMismatch {
                    digest: digest.to_string(),
                    expected: src_info.size,
                    actual: extant_size,
                });
            }
            let mut known = src_info.clone();
            known.size = extant_size;
            let reapplied = self.c.dest.reapply_blob(&known).await?;
            self.c
                .report
                .println(format!("skipping fetch of repeat blob {}", digest));
            return Ok((reapplied, self.c.cached_diff_ids.get(&digest).cloned()));
        }

        self.c.report.println(format!("copying blob {}", digest));
        let (stream, blob_size) = self.c.source.blob(src_info).await?;
        let pipeline_info = BlobInfo {
            digest: Some(digest.clone()),
            size: blob_size,
            media_type: src_info.media_type.clone(),
            urls: Vec::new(),
        };
        let outcome = copy_blob_from_stream(
            self.c.dest,
            &self.c.report,
            self.c.progress.as_ref(),
            stream,
            &pipeline_info,
            diff_id_is_needed,
            self.can_modify_manifest,
        )
        .await?;

        let mut diff_id = None;
        if let Some(mut receiver) = outcome.diff_id {
            match receiver.recv().await {
                Some(Ok(computed)) => {
                    debug!(layer = %digest, diff_id = %computed, "computed layer diffID");
                    self.c.cached_diff_ids.insert(digest.clone(), computed.clone());
                    diff_id = Some(computed);
                }
                Some(Err(err)) => return Err(err),
                None => {
                    return Err(Error::InternalIntegrity(
                        "diffID task ended without reporting a result".to_string(),
                    ));
                }
            }
        }

        if let Some(stored) = &outcome.uploaded.digest {
            self.c.copied_blobs.insert(digest, stored.clone());
        }
        Ok((outcome.uploaded, diff_id))
    }

    /// Materializes the pending image (source as-is, or rewritten per the
    /// accumulated updates), stores its config blob, and stores the
    /// manifest.
    async fn copy_updated_config_and_manifest(
        &mut self,
        target_instance: Option<&Digest>,
    ) -> Result<Vec<u8>> {
        let pending = if self.updates.is_trivial() {
            self.src.pending_unchanged()?
        } else {
            if !self.can_modify_manifest {
                return Err(Error::SignatureConflict(
                    "the copy needs an updated manifest but modification is forbidden".to_string(),
                ));
            }
            if !self.diff_ids_are_needed && self.src.needs_layer_diff_ids(&self.updates) {
                // Reached only when a fallback candidate needs diffIDs the
                // preferred format did not, so none were recorded.
                return Err(Error::Unimplemented(format!(
                    "cannot convert the image to {}; layer diffIDs were not prepared for this \
                     format",
                    self.updates.media_type.as_deref().unwrap_or("(unchanged)")
                )));
            }
            self.src.updated_image(&self.updates)?
        };

        self.copy_config(&pending).await?;

        self.c.report.println("writing manifest to image destination");
        // A list instance is addressed by the manifest actually stored,
        // which conversion may have changed.
        let instance = target_instance.map(|_| manifest_digest(&pending.manifest));
        self.c
            .dest
            .put_manifest(&pending.manifest, instance.as_ref())
            .await?;
        Ok(pending.manifest)
    }

    /// Copies the config blob, never compressing it, and verifies the
    /// destination preserved its digest exactly.
    async fn copy_config(&mut self, pending: &PendingImage) -> Result<()> {
        let (info, stream): (BlobInfo, BlobReader) = match &pending.config {
            PendingConfig::None => return Ok(()),
            PendingConfig::FromSource(info) => {
                self.c
                    .report
                    .println(format!("copying config {}", info.digest_label()));
                let (stream, size) = self.c.source.blob(info).await?;
                let mut fetched = info.clone();
                if fetched.size == -1 {
                    fetched.size = size;
                }
                (fetched, stream)
            }
            PendingConfig::Synthesized { info, bytes } => {
                self.c
                    .report
                    .println(format!("writing config {}", info.digest_label()));
                (info.clone(), Box::new(std::io::Cursor::new(bytes.clone())))
            }
        };

        let outcome = copy_blob_from_stream(
            self.c.dest,
            &self.c.report,
            self.c.progress.as_ref(),
            stream,
            &info,
            false,
            false,
        )
        .await?;
        if outcome.uploaded.digest != info.digest {
            return Err(Error::InternalIntegrity(format!(
                "copying the uncompressed config blob {} changed its digest to {}",
                info.digest_label(),
                outcome.uploaded.digest_label()
            )));
        }
        Ok(())
    }
}

/// True iff the digest sequences differ, ignoring sizes and other fields.
fn layer_digests_differ(a: &[BlobInfo], b: &[BlobInfo]) -> bool {
    if a.len() != b.len() {
        return true;
    }
    a.iter().zip(b).any(|(x, y)| x.digest != y.digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_options_defaults() {
        assert!(validate_options(&Options::default(), false).is_ok());
    }

    #[test]
    fn test_validate_options_sign_by_requires_signer() {
        let options = Options {
            sign_by: Some("key0".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            validate_options(&options, false),
            Err(Error::Config(_))
        ));
        assert!(validate_options(&options, true).is_ok());
    }

    #[test]
    fn test_validate_options_empty_sign_by() {
        let options = Options {
            sign_by: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(
            validate_options(&options, true),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_validate_options_progress_needs_interval() {
        let (sender, _receiver) = mpsc::channel(1);
        let options = Options {
            progress: Some(sender),
            progress_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            validate_options(&options, false),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_layer_digests_differ() {
        let a = BlobInfo::for_digest(Digest::sha256_of(b"a"));
        let b = BlobInfo::for_digest(Digest::sha256_of(b"b"));
        let mut a_resized = a.clone();
        a_resized.size = 999;

        assert!(!layer_digests_differ(&[a.clone()], &[a_resized]));
        assert!(layer_digests_differ(&[a.clone()], &[b.clone()]));
        assert!(layer_digests_differ(&[a.clone()], &[a, b]));
    }
}
