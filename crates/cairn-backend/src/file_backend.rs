//! File-based object backend.
//!
//! Stores one file per object with a 2-level fan-out directory structure:
//! `{base_dir}/{hex[0..2]}/{hex[2..4]}/{hex}`.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use cairn_types::{Cid, Credential, ObjectInfo};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use crate::error::BackendError;
use crate::traits::{ObjectBackend, RangeRead};

/// File-based object backend with 2-level fan-out directory layout.
///
/// Writes are atomic: data is written to a temporary file first, then
/// renamed into place, so a crashed upload never leaves a partial object
/// under its CID.
pub struct FileBackend {
    base_dir: PathBuf,
}

impl FileBackend {
    /// Create a new backend rooted at the given directory.
    ///
    /// The directory is created if it does not exist.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, BackendError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Compute the full file path for a CID.
    fn object_path(&self, cid: &Cid) -> PathBuf {
        let hex = cid.to_string();
        self.base_dir.join(&hex[0..2]).join(&hex[2..4]).join(&hex)
    }

    async fn open(&self, cid: Cid) -> Result<tokio::fs::File, BackendError> {
        match tokio::fs::File::open(self.object_path(&cid)).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BackendError::NotFound(cid)),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait::async_trait]
impl ObjectBackend for FileBackend {
    async fn put(&self, _credential: &Credential, data: Bytes) -> Result<Cid, BackendError> {
        let cid = Cid::from_data(&data);
        let path = self.object_path(&cid);
        if tokio::fs::try_exists(&path).await? {
            debug!(%cid, "object already present, skipping write");
            return Ok(cid);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!(%cid, path = %path.display(), size = data.len(), "stored object to file");
        Ok(cid)
    }

    async fn get_range(
        &self,
        _credential: &Credential,
        cid: Cid,
        offset: u64,
        length: u64,
    ) -> Result<RangeRead, BackendError> {
        let mut file = self.open(cid).await?;
        let size = file.metadata().await?.len();
        if offset > size {
            return Err(BackendError::Malformed(format!(
                "offset {offset} beyond object end {size}"
            )));
        }

        let end = offset.saturating_add(length);
        let truncated = end > size;
        let to_read = (end.min(size) - offset) as usize;

        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; to_read];
        file.read_exact(&mut buf).await?;

        Ok(RangeRead {
            data: Bytes::from(buf),
            truncated,
        })
    }

    async fn exists(&self, _credential: &Credential, cid: Cid) -> Result<bool, BackendError> {
        Ok(tokio::fs::try_exists(self.object_path(&cid)).await?)
    }

    async fn stat(&self, _credential: &Credential, cid: Cid) -> Result<ObjectInfo, BackendError> {
        match tokio::fs::metadata(self.object_path(&cid)).await {
            Ok(meta) => Ok(ObjectInfo {
                cid,
                size: meta.len(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BackendError::NotFound(cid)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        _credential: &Credential,
        prefix: &str,
    ) -> Result<Vec<ObjectInfo>, BackendError> {
        let mut listed = Vec::new();

        // Walk the 2-level fan-out: base/XX/YY/<hex>
        let mut level0 = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(d0) = level0.next_entry().await? {
            if !d0.file_type().await?.is_dir() {
                continue;
            }
            let mut level1 = tokio::fs::read_dir(d0.path()).await?;
            while let Some(d1) = level1.next_entry().await? {
                if !d1.file_type().await?.is_dir() {
                    continue;
                }
                let mut files = tokio::fs::read_dir(d1.path()).await?;
                while let Some(entry) = files.next_entry().await? {
                    if !entry.file_type().await?.is_file() {
                        continue;
                    }
                    if let Some(name) = entry.file_name().to_str()
                        && name.starts_with(prefix)
                        && let Ok(cid) = name.parse::<Cid>()
                    {
                        let size = entry.metadata().await?.len();
                        listed.push(ObjectInfo { cid, size });
                    }
                }
            }
        }

        listed.sort_by_key(|info| info.cid);
        Ok(listed)
    }
}
