//! Content-addressed, write-once artifact cache.
//!
//! Entries live on disk below the cache directory as
//! `<namespace>/<source-hash>` with a CBOR sidecar `<source-hash>.meta`
//! describing the stored output. The namespace carries the transform
//! configuration, so changing e.g. the JPEG quality never returns outputs
//! produced with the old settings.
//!
//! Writes go to a unique temporary file first and are published with a hard
//! link, which fails if the key already exists. The first published value for
//! a key therefore stays authoritative and concurrent writers never observe a
//! partially written entry.

use std::fs;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::Hash32;
use crate::error::CacheError;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct EntryMeta {
    len: u64,
    hash: [u8; 32],
}

/// Cache statistics for a single store instance.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub writes: usize,
}

#[derive(Debug)]
pub struct CacheStore {
    root: Utf8PathBuf,
    hits: AtomicUsize,
    misses: AtomicUsize,
    writes: AtomicUsize,
}

impl CacheStore {
    /// Opens a store rooted at `root`. Nothing is touched on disk until the
    /// first [`put`](Self::put).
    pub fn open(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }

    /// Looks up the output previously stored for `key`.
    ///
    /// Entries whose sidecar is missing or doesn't describe the stored bytes
    /// count as a miss and are removed, so the next [`put`](Self::put) can
    /// replace them.
    pub fn get(&self, namespace: &str, key: Hash32) -> Option<Vec<u8>> {
        let (path_data, path_meta) = self.paths(namespace, key);
        let present = path_data.exists();

        match read_entry(&path_data, &path_meta) {
            Some(data) => {
                debug!(%key, namespace, "cache hit");
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(data)
            }
            None => {
                debug!(%key, namespace, "cache miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                if present {
                    discard_stale(&path_data, &path_meta);
                }
                None
            }
        }
    }

    /// Stores `output` under `key` unless the key already holds a valid value.
    ///
    /// Returns `true` if this call published the entry.
    pub fn put(&self, namespace: &str, key: Hash32, output: &[u8]) -> Result<bool, CacheError> {
        let (path_data, path_meta) = self.paths(namespace, key);
        let dir = self.root.join(namespace);

        fs::create_dir_all(&dir).map_err(|e| CacheError::Io(dir.clone(), e))?;

        // A sidecar without data is a write in progress, data without a
        // matching sidecar is a broken entry.
        let present = path_data.exists();
        if read_entry(&path_data, &path_meta).is_some() {
            return Ok(false);
        }
        if present {
            discard_stale(&path_data, &path_meta);
        }

        let meta = EntryMeta {
            len: output.len() as u64,
            hash: *Hash32::hash(output).as_bytes(),
        };
        let mut meta_bytes = Vec::new();
        ciborium::into_writer(&meta, &mut meta_bytes)
            .map_err(|e| CacheError::Encode(e.to_string()))?;

        // The sidecar goes first, a data file without it reads as a miss.
        publish(&dir, &path_meta, &meta_bytes)?;
        let published = publish(&dir, &path_data, output)?;

        if published {
            self.writes.fetch_add(1, Ordering::Relaxed);
        }

        Ok(published)
    }

    fn paths(&self, namespace: &str, key: Hash32) -> (Utf8PathBuf, Utf8PathBuf) {
        let hex = key.to_hex();
        let dir = self.root.join(namespace);
        let data = dir.join(&hex);
        let meta = dir.join(format!("{hex}.meta"));
        (data, meta)
    }
}

/// The stored bytes, if both files exist and the sidecar matches them.
fn read_entry(path_data: &Utf8Path, path_meta: &Utf8Path) -> Option<Vec<u8>> {
    let data = fs::read(path_data).ok()?;
    let meta = fs::File::open(path_meta).ok()?;
    let meta: EntryMeta = ciborium::from_reader(meta).ok()?;

    let valid = meta.len == data.len() as u64 && meta.hash == *Hash32::hash(&data).as_bytes();
    valid.then_some(data)
}

/// Removes both files of an invalid entry.
fn discard_stale(path_data: &Utf8Path, path_meta: &Utf8Path) {
    for path in [path_data, path_meta] {
        match fs::remove_file(path) {
            Ok(()) => debug!(%path, "removed stale cache file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => debug!(%path, "couldn't remove stale cache file: {e}"),
        }
    }
}

/// Writes `bytes` to `target` if it doesn't exist yet.
fn publish(dir: &Utf8Path, target: &Utf8Path, bytes: &[u8]) -> Result<bool, CacheError> {
    let temp = dir.join(format!(
        ".{}.{}.tmp",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    fs::write(&temp, bytes).map_err(|e| CacheError::Io(temp.clone(), e))?;

    let result = match fs::hard_link(&temp, target) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        // Filesystems without hard links, last rename wins but the content is
        // identical for identical keys.
        Err(_) => match fs::rename(&temp, target) {
            Ok(()) => return Ok(true),
            Err(e) => Err(CacheError::Io(target.to_owned(), e)),
        },
    };

    let _ = fs::remove_file(&temp);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, CacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().join(".cache");
        (dir, CacheStore::open(root))
    }

    #[test]
    fn open_is_lazy() {
        let (_dir, store) = store();
        assert!(!store.root().exists());
        assert!(store.get("img", Hash32::hash(b"x")).is_none());
        assert!(!store.root().exists());
    }

    #[test]
    fn put_then_get() {
        let (_dir, store) = store();
        let key = Hash32::hash(b"source");

        assert!(store.put("img", key, b"optimized").unwrap());
        assert_eq!(store.get("img", key).unwrap(), b"optimized");
        assert_eq!(store.stats(), CacheStats { hits: 1, misses: 0, writes: 1 });
    }

    #[test]
    fn first_put_is_authoritative() {
        let (_dir, store) = store();
        let key = Hash32::hash(b"source");

        assert!(store.put("img", key, b"first").unwrap());
        assert!(!store.put("img", key, b"second").unwrap());
        assert_eq!(store.get("img", key).unwrap(), b"first");
    }

    #[test]
    fn namespaces_are_isolated() {
        let (_dir, store) = store();
        let key = Hash32::hash(b"source");

        store.put("img-q85", key, b"a").unwrap();
        assert!(store.get("img-q60", key).is_none());
    }

    #[test]
    fn corrupted_entry_is_a_miss() {
        let (_dir, store) = store();
        let key = Hash32::hash(b"source");
        store.put("img", key, b"optimized").unwrap();

        let (data, _) = store.paths("img", key);
        fs::remove_file(&data).unwrap();
        fs::write(&data, b"truncat").unwrap();

        assert!(store.get("img", key).is_none());

        assert!(store.put("img", key, b"optimized").unwrap());
        assert_eq!(store.get("img", key).unwrap(), b"optimized");
        assert_eq!(store.stats(), CacheStats { hits: 1, misses: 1, writes: 2 });
    }

    #[test]
    fn entry_without_sidecar_is_replaced() {
        let (_dir, store) = store();
        let key = Hash32::hash(b"source");
        store.put("img", key, b"optimized").unwrap();

        let (_, meta) = store.paths("img", key);
        fs::remove_file(&meta).unwrap();

        assert!(store.put("img", key, b"optimized").unwrap());
        assert_eq!(store.get("img", key).unwrap(), b"optimized");
    }

    #[test]
    fn concurrent_puts_on_same_key() {
        use rayon::prelude::*;

        let (_dir, store) = store();
        let key = Hash32::hash(b"source");

        let published: usize = (0..16)
            .into_par_iter()
            .map(|_| store.put("img", key, b"same-output").unwrap() as usize)
            .sum();

        assert_eq!(published, 1);
        assert_eq!(store.get("img", key).unwrap(), b"same-output");
    }

    #[test]
    fn persists_across_instances() {
        let (_dir, store) = store();
        let key = Hash32::hash(b"source");
        store.put("img", key, b"kept").unwrap();

        let reopened = CacheStore::open(store.root().to_owned());
        assert_eq!(reopened.get("img", key).unwrap(), b"kept");
    }
}
