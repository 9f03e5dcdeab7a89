//! The content-addressed bytecode cache: `<cache-root>/<16-hex-digit-hash>`
//! (spec.md §6). The hash is a content digest of the *source* bytes a
//! module was compiled from, distinct from the per-object identity hash
//! `talon_core::heap` computes with SipHash — this one only needs to be a
//! good content-addressing digest, not something rebuilt on every
//! allocation, so it uses `sha2` (a genuine workspace dependency the
//! teacher's manifest already carries) rather than hand-rolling another
//! hash.

use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};

/// First 8 bytes (16 hex digits) of the SHA-256 digest of `source_bytes`,
/// formatted the way spec.md's cache directory layout names entries.
pub fn cache_key(source_bytes: &[u8]) -> String {
    let digest = Sha256::digest(source_bytes);
    let mut out = String::with_capacity(16);
    for byte in &digest[..8] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

pub struct BytecodeCache {
    root: PathBuf,
}

impl BytecodeCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        BytecodeCache { root: root.into() }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub fn lookup(&self, source_bytes: &[u8]) -> Option<Vec<u8>> {
        let path = self.entry_path(&cache_key(source_bytes));
        std::fs::read(path).ok()
    }

    pub fn store(&self, source_bytes: &[u8], marshaled: &[u8]) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.entry_path(&cache_key(source_bytes));
        std::fs::write(&path, marshaled)?;
        Ok(path)
    }

    pub fn contains(&self, source_bytes: &[u8]) -> bool {
        self.entry_path(&cache_key(source_bytes)).is_file()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
