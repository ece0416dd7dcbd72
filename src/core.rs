use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

/// A 32-byte BLAKE3 hash used for content-addressing.
///
/// In `tsumiki`, this serves two purposes:
/// 1. It is the identity of an artifact's content, so two artifacts with the
///    same hash are interchangeable regardless of where they live.
/// 2. It is the key of the [`CacheStore`](crate::CacheStore), which makes
///    repeated work on unchanged inputs unnecessary.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in self.0.iter() {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

impl std::fmt::Display for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A single file flowing through the build, either read from the source tree
/// or produced by a stage.
///
/// Identity is `(path, hash)`. The path is relative to the tree the artifact
/// belongs to (source, temporary or distribution).
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: Utf8PathBuf,
    pub bytes: Vec<u8>,
    pub hash: Hash32,
}

impl Artifact {
    pub fn new(path: impl Into<Utf8PathBuf>, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        Self {
            path: path.into(),
            hash: Hash32::hash(&bytes),
            bytes,
        }
    }

    /// Writes the artifact below `root`, creating parent directories.
    pub fn write_to(&self, root: &Utf8Path) -> std::io::Result<Utf8PathBuf> {
        let target = root.join(&self.path);

        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)?;
        }

        fs::write(&target, &self.bytes)?;
        Ok(target)
    }

    pub fn text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("path", &self.path)
            .field("len", &self.bytes.len())
            .field("hash", &self.hash)
            .finish()
    }
}
