use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use tempfile::NamedTempFile;
use tracing::warn;

/// File-byte tier of the persistent store, keyed by canonical path.
///
/// Keys are either canonical `/texlive/...` paths or reserved pseudo-paths
/// such as `bundle:<name>`. Writes land via a temp file plus rename in the
/// destination directory, so a concurrent reader observes the old bytes or
/// the new bytes, never a torn value; the last writer wins.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// # Errors
    /// Returns an error if the root directory cannot be created.
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create blob store at {}", root.display()))?;
        Ok(Self { root })
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf> {
        let rel = key.trim_start_matches('/');
        if rel.is_empty() {
            return Err(anyhow!("empty blob key"));
        }
        if rel.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(anyhow!("blob key {key} escapes the store root"));
        }
        Ok(self.root.join(rel))
    }

    /// # Errors
    /// Returns an error if the bytes cannot be persisted.
    pub fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let dest = self.entry_path(key)?;
        let parent = dest
            .parent()
            .ok_or_else(|| anyhow!("blob key {key} has no parent directory"))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
        let mut tmp = NamedTempFile::new_in(parent)
            .with_context(|| format!("failed to stage blob for {key}"))?;
        tmp.write_all(bytes)
            .with_context(|| format!("failed to stage blob for {key}"))?;
        tmp.persist(&dest)
            .map_err(|err| err.error)
            .with_context(|| format!("failed to persist blob {}", dest.display()))?;
        Ok(())
    }

    /// Read a blob. Misses and I/O errors are both soft: the caller falls
    /// back to the network path.
    #[must_use]
    pub fn read(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.entry_path(key).ok()?;
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(key, %err, "blob read failed; treating as miss");
                None
            }
        }
    }

    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        self.entry_path(key).map(|path| path.is_file()).unwrap_or(false)
    }

    /// # Errors
    /// Returns an error if the entry exists but cannot be removed.
    pub fn delete(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to delete blob {}", path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    fn store() -> (tempfile::TempDir, BlobStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = BlobStore::new(temp.path().join("blobs")).expect("store");
        (temp, store)
    }

    #[test]
    fn write_read_round_trip_under_canonical_path() {
        let (_temp, store) = store();
        let key = "/texlive/texmf-dist/tex/latex/foo/foo.sty";
        store.write(key, b"\\ProvidesPackage{foo}").expect("write");
        assert!(store.exists(key));
        assert_eq!(store.read(key).as_deref(), Some(b"\\ProvidesPackage{foo}".as_ref()));
    }

    #[test]
    fn reserved_bundle_keys_are_accepted() {
        let (_temp, store) = store();
        store.write("bundle:amsmath", b"payload").expect("write");
        assert_eq!(store.read("bundle:amsmath").as_deref(), Some(b"payload".as_ref()));
    }

    #[test]
    fn read_miss_is_none_not_an_error() {
        let (_temp, store) = store();
        assert_eq!(store.read("/texlive/absent.sty"), None);
        assert!(!store.exists("/texlive/absent.sty"));
    }

    #[test]
    fn traversal_keys_are_rejected() {
        let (_temp, store) = store();
        assert!(store.write("/texlive/../../etc/passwd", b"x").is_err());
        assert!(store.write("", b"x").is_err());
    }

    #[test]
    fn delete_is_idempotent() {
        let (_temp, store) = store();
        store.write("/texlive/a.sty", b"a").expect("write");
        store.delete("/texlive/a.sty").expect("delete");
        store.delete("/texlive/a.sty").expect("second delete");
        assert!(!store.exists("/texlive/a.sty"));
    }

    #[test]
    fn concurrent_writers_leave_one_winner_never_a_torn_value() {
        let (_temp, store) = store();
        let store = Arc::new(store);
        let barrier = Arc::new(Barrier::new(2));
        let key = "/texlive/contended.sty";

        let a = {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                store.write(key, &[b'a'; 4096])
            })
        };
        let b = {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                store.write(key, &[b'b'; 4096])
            })
        };
        a.join().expect("thread a").expect("write a");
        b.join().expect("thread b").expect("write b");

        let bytes = store.read(key).expect("read");
        assert_eq!(bytes.len(), 4096);
        assert!(bytes.iter().all(|c| *c == bytes[0]), "torn write observed");
    }
}
