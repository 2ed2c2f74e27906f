//! On-disk span files.
//!
//! Each span is one file at `{root}/{hex[0..2]}/{hex}/{start:020}-{end:020}`.
//! Writes go to a `.tmp` sibling first and are renamed into place, so a
//! crash never leaves a short span under a valid name.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use cairn_types::{ByteRange, Cid};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

/// Directory holding every span of `cid`.
pub(crate) fn key_dir(root: &Path, cid: &Cid) -> PathBuf {
    let hex = cid.to_string();
    root.join(&hex[0..2]).join(hex)
}

/// File path of one span.
pub(crate) fn span_path(root: &Path, cid: &Cid, range: ByteRange) -> PathBuf {
    key_dir(root, cid).join(format!("{:020}-{:020}", range.start, range.end))
}

fn parse_span_name(name: &str) -> Option<ByteRange> {
    let (start, end) = name.split_once('-')?;
    if start.len() != 20 || end.len() != 20 {
        return None;
    }
    let range = ByteRange::new(start.parse().ok()?, end.parse().ok()?)?;
    (!range.is_empty()).then_some(range)
}

pub(crate) async fn write_span(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, data).await?;
    tokio::fs::rename(&tmp_path, path).await
}

pub(crate) async fn read_span(path: &Path, offset: u64, len: u64) -> std::io::Result<Bytes> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

pub(crate) async fn remove_span(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove span file");
    }
}

/// Remove the directory of a key once it holds no spans. Errors are ignored:
/// a non-empty or already-missing directory is fine.
pub(crate) async fn remove_key_dir(root: &Path, cid: &Cid) {
    let _ = tokio::fs::remove_dir(key_dir(root, cid)).await;
}

/// Walk the cache directory and return every intact span file.
///
/// Leftover `.tmp` files and files whose size does not match the range in
/// their name are deleted.
pub(crate) async fn scan(root: &Path) -> std::io::Result<Vec<(Cid, ByteRange, PathBuf)>> {
    let mut found = Vec::new();

    let mut level0 = tokio::fs::read_dir(root).await?;
    while let Some(d0) = level0.next_entry().await? {
        if !d0.file_type().await?.is_dir() {
            continue;
        }
        let mut level1 = tokio::fs::read_dir(d0.path()).await?;
        while let Some(d1) = level1.next_entry().await? {
            let Some(cid) = d1
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<Cid>().ok())
            else {
                continue;
            };
            if !d1.file_type().await?.is_dir() {
                continue;
            }

            let mut files = tokio::fs::read_dir(d1.path()).await?;
            while let Some(entry) = files.next_entry().await? {
                let path = entry.path();
                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    continue;
                };
                if name.ends_with(".tmp") {
                    debug!(path = %path.display(), "dropping interrupted span write");
                    remove_span(&path).await;
                    continue;
                }
                let Some(range) = parse_span_name(name) else {
                    continue;
                };
                if entry.metadata().await?.len() != range.len() {
                    warn!(%cid, %range, "span file has the wrong size, dropping it");
                    remove_span(&path).await;
                    continue;
                }
                found.push((cid, range, path));
            }
        }
    }

    Ok(found)
}
