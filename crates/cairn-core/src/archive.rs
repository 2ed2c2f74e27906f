//! Archives: one manifest artifact listing many child artifacts.

use bytes::Bytes;
use cairn_cas::{
    MANIFEST_MAGIC, Manifest, build_manifest, deserialize_manifest, is_manifest,
};
use cairn_types::{ArtifactRef, ByteRange, Cid, ManifestEntry, validate_name};
use tracing::{debug, info};

use crate::error::ArtifactError;
use crate::layer::ArtifactLayer;
use crate::request::{FetchRequest, Fetched, StoreReceipt};

impl ArtifactLayer {
    /// Upload every `(relative_path, bytes)` child, then the manifest that
    /// lists them, and version the manifest under `declared_name`.
    ///
    /// Paths are validated before anything is uploaded.
    pub async fn store_archive(
        &self,
        files: Vec<(String, Bytes)>,
        declared_name: Option<&str>,
    ) -> Result<StoreReceipt, ArtifactError> {
        if let Some(name) = declared_name {
            validate_name(name)?;
        }
        let entries = files
            .iter()
            .map(|(path, data)| ManifestEntry {
                path: path.clone(),
                cid: cairn_cas::compute(data),
                size: data.len() as u64,
            })
            .collect();
        let manifest = build_manifest(entries)?;

        for (_, data) in files {
            self.store(data, None).await?;
        }

        let bytes = cairn_cas::serialize_manifest(&manifest)?;
        info!(
            entries = manifest.entries.len(),
            total_size = manifest.total_size(),
            "storing archive manifest"
        );
        self.store(Bytes::from(bytes), declared_name).await
    }

    /// The children of the archive at `cid`.
    ///
    /// A plain object expands to a single entry with an empty path.
    pub async fn expand(&self, cid: Cid) -> Result<Vec<ManifestEntry>, ArtifactError> {
        match self.open_manifest(cid).await? {
            Some(manifest) => Ok(manifest.entries),
            None => Ok(vec![ManifestEntry {
                path: String::new(),
                cid,
                size: self.object_size(cid).await?,
            }]),
        }
    }

    /// Fetch the child at `path` of the archive `target`, or part of it.
    ///
    /// For a plain object the only valid path is the empty one.
    pub async fn fetch_entry(
        &self,
        target: &ArtifactRef,
        path: &str,
        range: Option<ByteRange>,
    ) -> Result<Fetched, ArtifactError> {
        let cid = self.resolve(target)?;
        let entry = match self.open_manifest(cid).await? {
            Some(manifest) => manifest.entry(path).cloned(),
            None => path.is_empty().then_some(ManifestEntry {
                path: String::new(),
                cid,
                size: self.object_size(cid).await?,
            }),
        }
        .ok_or_else(|| ArtifactError::NotFound(format!("{path:?} in {cid}")))?;

        debug!(archive = %cid, path, child = %entry.cid, "fetching archive entry");
        // The manifest was verified, so its sizes can be trusted.
        self.inner.remember_size(entry.cid, entry.size);
        self.fetch(FetchRequest {
            target: ArtifactRef::Direct(entry.cid),
            range,
            strict: false,
        })
        .await
    }

    /// Decode the manifest at `cid`, or `None` if the object is not one.
    ///
    /// Objects without the magic prefix are rejected after reading just the
    /// prefix. The rest are materialized and verified in full; a verified
    /// object that does not decode is plain content that happens to start
    /// with the magic.
    async fn open_manifest(&self, cid: Cid) -> Result<Option<Manifest>, ArtifactError> {
        let size = self.object_size(cid).await?;
        let magic_len = MANIFEST_MAGIC.len() as u64;
        if size < magic_len {
            return Ok(None);
        }
        let (prefix, _) = self.assemble(cid, ByteRange::at(0, magic_len)).await?;
        if !is_manifest(&prefix) {
            return Ok(None);
        }
        let bytes = self
            .materialize(cid, size, self.inner.verify_on_read)
            .await?;
        match deserialize_manifest(&bytes) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                debug!(%cid, error = %e, "magic prefix without a manifest, treating as plain");
                Ok(None)
            }
        }
    }
}
