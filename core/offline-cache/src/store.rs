//! Cache store registry.
//!
//! Stores are directories under the registry root, one per store name. Each
//! entry is a metadata JSON file (`<digest>.json`) naming its body file, plus
//! that raw body file. Both are written to temp files and renamed into place;
//! the metadata rename is the commit point, so a reader sees either the old or
//! the new snapshot.
//!
//! Writers of the same entry are serialized within the process, so each put
//! retires exactly the body the previous commit named.
//!
//! Names starting with `.` are reserved for in-flight temp files and stores
//! being deleted; they never show up in [`StoreRegistry::list_store_names`].

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};
use crate::request::{FetchResponse, RequestIdentity};

const META_EXT: &str = "json";
const BODY_EXT: &str = "body";

static UNIQUE: AtomicU64 = AtomicU64::new(0);

fn unique_suffix() -> String {
    format!(
        "{}-{}",
        std::process::id(),
        UNIQUE.fetch_add(1, Ordering::Relaxed)
    )
}

const WRITE_LOCK_STRIPES: usize = 64;

static WRITE_LOCKS: OnceLock<Vec<Mutex<()>>> = OnceLock::new();

/// Lock shared by every writer of the entry stored at `meta_path`.
pub(crate) fn write_lock(meta_path: &Path) -> MutexGuard<'static, ()> {
    let locks = WRITE_LOCKS.get_or_init(|| (0..WRITE_LOCK_STRIPES).map(|_| Mutex::new(())).collect());
    let digest = md5::compute(meta_path.as_os_str().as_encoded_bytes());
    let stripe = usize::from(digest.0[0]) % WRITE_LOCK_STRIPES;
    locks[stripe].lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stored snapshot of a response. Never mutated; a re-fetch writes a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub identity: RequestIdentity,
    pub response: FetchResponse,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    identity: RequestIdentity,
    status: u16,
    headers: Vec<(String, String)>,
    body_file: String,
    stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoreRegistry {
    root: PathBuf,
}

impl StoreRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Opens a store, creating it if absent.
    pub fn open(&self, name: &str) -> Result<CacheStore> {
        validate_store_name(name)?;
        let dir = self.root.join(name);
        fs::create_dir_all(&dir).map_err(|err| CacheError::io("open store", err))?;
        Ok(CacheStore {
            name: name.to_string(),
            dir,
        })
    }

    /// Deletes a store. Returns `false` if it did not exist.
    pub fn delete_store(&self, name: &str) -> Result<bool> {
        validate_store_name(name)?;
        let dir = self.root.join(name);
        let doomed = self.root.join(format!(".deleting-{}-{}", name, unique_suffix()));

        match fs::rename(&dir, &doomed) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(CacheError::io("detach store", err)),
        }

        if let Err(err) = fs::remove_dir_all(&doomed) {
            // Already invisible to lookups; leftovers are swept on the next delete.
            warn!(error = %err, store = name, "Failed to remove detached store");
        }
        info!(store = name, "Deleted cache store");
        Ok(true)
    }

    pub fn list_store_names(&self) -> Result<BTreeSet<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(err) => return Err(CacheError::io("list stores", err)),
        };

        let mut names = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|err| CacheError::io("list stores", err))?;
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().to_string();
            if is_dir && !name.starts_with('.') {
                names.insert(name);
            }
        }
        Ok(names)
    }

    /// Deletes every store. Returns how many were removed.
    pub fn delete_all(&self) -> Result<usize> {
        let mut deleted = 0;
        for name in self.list_store_names()? {
            if self.delete_store(&name)? {
                deleted += 1;
            }
        }
        self.sweep_detached();
        Ok(deleted)
    }

    fn sweep_detached(&self) {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(".deleting-") {
                if let Err(err) = fs::remove_dir_all(entry.path()) {
                    debug!(error = %err, path = %entry.path().display(), "Detached store still present");
                }
            }
        }
    }
}

fn validate_store_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidStoreName(name.to_string()))
    }
}

/// Handle to one named store.
#[derive(Debug, Clone)]
pub struct CacheStore {
    name: String,
    dir: PathBuf,
}

impl CacheStore {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Writes a snapshot, fully replacing any prior one for `identity`.
    pub fn put(&self, identity: &RequestIdentity, response: &FetchResponse) -> Result<()> {
        let digest = identity.digest();
        let body_file = format!("{}-{}.{}", digest, unique_suffix(), BODY_EXT);
        let meta_path = self.meta_path(&digest);
        let _writer = write_lock(&meta_path);
        let previous = self.read_meta(&meta_path).ok().flatten();

        self.write_atomic(&body_file, &response.body)?;

        let meta = EntryMeta {
            identity: identity.clone(),
            status: response.status,
            headers: response.headers.clone(),
            body_file: body_file.clone(),
            stored_at: Utc::now(),
        };
        let payload = serde_json::to_vec_pretty(&meta).map_err(|source| CacheError::Json {
            context: "serialize cache entry".to_string(),
            source,
        })?;
        let meta_name = format!("{}.{}", digest, META_EXT);
        if let Err(err) = self.write_atomic(&meta_name, &payload) {
            let _ = fs::remove_file(self.dir.join(&body_file));
            return Err(err);
        }

        if let Some(previous) = previous {
            if previous.body_file != body_file {
                let _ = fs::remove_file(self.dir.join(previous.body_file));
            }
        }
        debug!(store = %self.name, url = %identity.url, status = response.status, "Stored cache entry");
        Ok(())
    }

    /// Looks up the snapshot for `identity`.
    pub fn match_entry(&self, identity: &RequestIdentity) -> Result<Option<CacheEntry>> {
        let meta_path = self.meta_path(&identity.digest());

        // A concurrent put can retire the body between the two reads; retry once
        // against the newer metadata.
        for _ in 0..2 {
            let Some(meta) = self.read_meta(&meta_path)? else {
                return Ok(None);
            };
            if &meta.identity != identity {
                return Ok(None);
            }
            match fs::read(self.dir.join(&meta.body_file)) {
                Ok(body) => {
                    return Ok(Some(CacheEntry {
                        identity: meta.identity,
                        response: FetchResponse {
                            status: meta.status,
                            headers: meta.headers,
                            body,
                        },
                        stored_at: meta.stored_at,
                    }))
                }
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(CacheError::io("read cache body", err)),
            }
        }
        Ok(None)
    }

    /// Number of committed entries.
    pub fn len(&self) -> Result<usize> {
        let entries = fs::read_dir(&self.dir).map_err(|err| CacheError::io("count entries", err))?;
        Ok(entries
            .flatten()
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                !name.starts_with('.') && name.ends_with(&format!(".{}", META_EXT))
            })
            .count())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub(crate) fn meta_path(&self, digest: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", digest, META_EXT))
    }

    fn read_meta(&self, path: &Path) -> Result<Option<EntryMeta>> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(CacheError::io("read cache entry", err)),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| CacheError::Json {
                context: format!("parse {}", path.display()),
                source,
            })
    }

    fn write_atomic(&self, file_name: &str, contents: &[u8]) -> Result<()> {
        let tmp_path = self.dir.join(format!(".{}.tmp-{}", file_name, unique_suffix()));
        fs::write(&tmp_path, contents).map_err(|err| CacheError::io("write cache entry", err))?;
        fs::rename(&tmp_path, self.dir.join(file_name)).map_err(|err| {
            let _ = fs::remove_file(&tmp_path);
            CacheError::io("commit cache entry", err)
        })
    }
}
