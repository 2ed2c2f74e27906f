//! [`VersionIndex`] implementation wrapping Fjall keyspaces.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use cairn_types::{Cid, Fingerprint, Selector, VersionEntry, validate_name};
use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::IndexError;

type Result<T> = std::result::Result<T, IndexError>;

/// What is persisted per version.
#[derive(Serialize, Deserialize)]
struct StoredVersion {
    entry: VersionEntry,
    fingerprint: Fingerprint,
}

/// Outcome of [`VersionIndex::record_version`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    /// The version the content is bound to.
    pub entry: VersionEntry,
    /// `false` when the content matched the latest version and nothing was
    /// written.
    pub created: bool,
}

/// Append-only version index backed by Fjall.
///
/// Version creation is serialized per name; reads take no name lock and may
/// observe the index one write behind a concurrent `record_version`, but
/// never a half-written entry: the head pointer only moves after the entry
/// it points to is stored.
pub struct VersionIndex {
    #[allow(dead_code)]
    db: Database,
    /// `name ++ 0x00 ++ version BE` → [`StoredVersion`].
    versions: Keyspace,
    /// `name` → latest version BE.
    heads: Keyspace,
    /// One writer lock per name, present only while a writer holds or
    /// waits on it.
    writers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Keeps the backing directory of a temporary index alive.
    _tmp: Option<TempDir>,
}

impl VersionIndex {
    /// Open a persistent index at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open()?;
        Self::init_keyspaces(db, None)
    }

    /// Open a temporary index that is removed on drop.
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir()?;
        let db = Database::builder(tmp.path()).temporary(true).open()?;
        Self::init_keyspaces(db, Some(tmp))
    }

    fn init_keyspaces(db: Database, tmp: Option<TempDir>) -> Result<Self> {
        let versions = db.keyspace("versions", KeyspaceCreateOptions::default)?;
        let heads = db.keyspace("heads", KeyspaceCreateOptions::default)?;
        Ok(Self {
            db,
            versions,
            heads,
            writers: Mutex::new(HashMap::new()),
            _tmp: tmp,
        })
    }

    fn writer_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.writers
            .lock()
            .expect("writers lock poisoned")
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Drop the writer lock of `name` once no other writer holds a handle.
    fn release_writer(&self, name: &str, lock: Arc<Mutex<()>>) {
        let mut writers = self.writers.lock().expect("writers lock poisoned");
        // One reference in the map, one in `lock`.
        if Arc::strong_count(&lock) == 2 {
            writers.remove(name);
        }
    }

    /// Bind `cid` to `name` as a new version, unless the latest version
    /// already has the same content fingerprint.
    ///
    /// The first version of a name is 1; each new version is the previous
    /// one plus one. Calls for the same name are serialized.
    pub fn record_version(
        &self,
        name: &str,
        cid: Cid,
        fingerprint: Fingerprint,
    ) -> Result<Recorded> {
        validate_name(name)?;
        let lock = self.writer_lock(name);
        let recorded = {
            let _writer = lock.lock().expect("writer lock poisoned");
            self.append_version(name, cid, fingerprint)
        };
        self.release_writer(name, lock);
        recorded
    }

    fn append_version(&self, name: &str, cid: Cid, fingerprint: Fingerprint) -> Result<Recorded> {
        let head = self.head(name)?;
        if let Some(latest) = head {
            let stored = self.stored(name, latest)?.ok_or_else(|| {
                IndexError::Corrupt(format!("{name:?} head points at missing version {latest}"))
            })?;
            if stored.fingerprint == fingerprint {
                debug!(name, version = latest, %cid, "content unchanged, reusing version");
                return Ok(Recorded {
                    entry: stored.entry,
                    created: false,
                });
            }
        }

        let version = head.unwrap_or(0) + 1;
        let entry = VersionEntry {
            name: name.to_string(),
            version,
            cid,
            created_at: unix_now(),
        };
        let value = postcard::to_allocvec(&StoredVersion {
            entry: entry.clone(),
            fingerprint,
        })?;
        self.versions
            .insert(version_key(name, version).as_slice(), value.as_slice())?;
        self.heads
            .insert(name.as_bytes(), version.to_be_bytes().as_slice())?;

        info!(name, version, %cid, "recorded new version");
        Ok(Recorded {
            entry,
            created: true,
        })
    }

    /// Resolve `selector` for `name` to a CID.
    ///
    /// A CID selector is passed through without consulting the index.
    pub fn resolve(&self, name: &str, selector: Selector) -> Result<Cid> {
        match selector {
            Selector::Cid(cid) => Ok(cid),
            Selector::Latest => self
                .latest(name)?
                .map(|entry| entry.cid)
                .ok_or_else(|| IndexError::UnknownName(name.to_string())),
            Selector::Version(version) => match self.get(name, version)? {
                Some(entry) => Ok(entry.cid),
                None if self.head(name)?.is_none() => {
                    Err(IndexError::UnknownName(name.to_string()))
                }
                None => Err(IndexError::UnknownVersion {
                    name: name.to_string(),
                    version,
                }),
            },
        }
    }

    /// The latest version of `name`, if any.
    pub fn latest(&self, name: &str) -> Result<Option<VersionEntry>> {
        match self.head(name)? {
            Some(version) => self.get(name, version),
            None => Ok(None),
        }
    }

    /// A specific version of `name`.
    pub fn get(&self, name: &str, version: u64) -> Result<Option<VersionEntry>> {
        match self.head(name)? {
            Some(head) if version >= 1 && version <= head => {
                Ok(self.stored(name, version)?.map(|stored| stored.entry))
            }
            _ => Ok(None),
        }
    }

    /// Every version of `name` in increasing order. Empty for an unknown
    /// name.
    pub fn history(&self, name: &str) -> Result<Vec<VersionEntry>> {
        let Some(head) = self.head(name)? else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::with_capacity(head as usize);
        for guard in self.versions.prefix(name_prefix(name).as_slice()) {
            let value = guard.value()?;
            let stored: StoredVersion = postcard::from_bytes(&value)?;
            // Entries past the head belong to an interrupted write.
            if stored.entry.version <= head {
                entries.push(stored.entry);
            }
        }
        Ok(entries)
    }

    /// The newest version of `name` bound to `cid`.
    pub fn find_version(&self, name: &str, cid: Cid) -> Result<Option<VersionEntry>> {
        Ok(self
            .history(name)?
            .into_iter()
            .rev()
            .find(|entry| entry.cid == cid))
    }

    fn head(&self, name: &str) -> Result<Option<u64>> {
        match self.heads.get(name.as_bytes())? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes[..].try_into().map_err(|_| {
                    IndexError::Corrupt(format!("head of {name:?} is {} bytes", bytes.len()))
                })?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    fn stored(&self, name: &str, version: u64) -> Result<Option<StoredVersion>> {
        match self.versions.get(version_key(name, version).as_slice())? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// `name ++ 0x00`. Names never contain NUL, so one name's prefix never
/// matches another name.
fn name_prefix(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(name.len() + 9);
    key.extend_from_slice(name.as_bytes());
    key.push(0);
    key
}

/// `name ++ 0x00 ++ version (8 bytes BE)`; big-endian keeps versions in
/// numeric order within a name.
fn version_key(name: &str, version: u64) -> Vec<u8> {
    let mut key = name_prefix(name);
    key.extend_from_slice(&version.to_be_bytes());
    key
}
