use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dirs_next::home_dir;

mod blob;
mod records;

pub use blob::BlobStore;
pub use records::RecordStore;

/// Root directory of the persistent cache and where the choice came from.
#[derive(Debug, Clone)]
pub struct CacheLocation {
    pub path: PathBuf,
    pub source: &'static str,
}

#[derive(Debug, Clone)]
pub struct CacheUsage {
    pub exists: bool,
    pub total_entries: u64,
    pub total_size_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CacheWalk {
    pub exists: bool,
    pub files: Vec<CacheEntry>,
    pub dirs: Vec<PathBuf>,
    pub total_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CachePruneResult {
    pub candidate_entries: u64,
    pub candidate_size_bytes: u64,
    pub deleted_entries: u64,
    pub deleted_size_bytes: u64,
    pub deleted_dirs: u64,
    pub errors: Vec<String>,
}

/// Determine the root directory for the on-disk cache.
///
/// # Errors
///
/// Returns an error if a relative override cannot be absolutized.
pub fn resolve_cache_store_path(override_path: Option<&str>) -> Result<CacheLocation> {
    if let Some(raw) = override_path {
        let path = absolutize(PathBuf::from(raw))?;
        return Ok(CacheLocation {
            path,
            source: "LTX_CACHE_PATH",
        });
    }
    if let Some(home) = home_dir() {
        return Ok(CacheLocation {
            path: home.join(".ltx").join("cache"),
            source: "HOME/.ltx",
        });
    }
    Ok(CacheLocation {
        path: PathBuf::from("/tmp/ltx/cache"),
        source: "default (/tmp/ltx)",
    })
}

fn absolutize(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()
            .context("failed to resolve LTX_CACHE_PATH")?
            .join(path))
    }
}

/// The two persistence tiers behind one handle: a blob store for file bytes
/// keyed by canonical path, and a record store for small JSON records.
pub struct Store {
    blobs: BlobStore,
    records: RecordStore,
}

impl Store {
    /// Open (or create) the cache under `root`.
    ///
    /// # Errors
    /// Returns an error if the directories or the record index cannot be
    /// created.
    pub fn open(root: &Path) -> Result<Self> {
        let blobs = BlobStore::new(root.join("blobs"))?;
        let records = RecordStore::open(&root.join("records.sqlite"))?;
        Ok(Self { blobs, records })
    }

    #[must_use]
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    #[must_use]
    pub fn records(&self) -> &RecordStore {
        &self.records
    }
}

/// Compute aggregate statistics for every file under the cache path.
///
/// # Errors
///
/// Returns an error if the directory tree cannot be traversed.
pub fn compute_cache_usage(path: &Path) -> Result<CacheUsage> {
    if !path.exists() {
        return Ok(CacheUsage {
            exists: false,
            total_entries: 0,
            total_size_bytes: 0,
        });
    }
    let walk = collect_cache_walk(path)?;
    Ok(CacheUsage {
        exists: true,
        total_entries: walk.files.len() as u64,
        total_size_bytes: walk.total_bytes,
    })
}

/// Gather every entry under the cache directory.
///
/// # Errors
///
/// Returns an error if reading the directory tree fails at any point.
pub fn collect_cache_walk(path: &Path) -> Result<CacheWalk> {
    if !path.exists() {
        return Ok(CacheWalk::default());
    }

    let mut walk = CacheWalk {
        exists: true,
        ..CacheWalk::default()
    };
    let mut stack = vec![path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let entry_path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_symlink() {
                continue;
            }
            if file_type.is_dir() {
                stack.push(entry_path.clone());
                if entry_path != path {
                    walk.dirs.push(entry_path);
                }
            } else if file_type.is_file() {
                let size = entry.metadata()?.len();
                walk.total_bytes += size;
                walk.files.push(CacheEntry {
                    path: entry_path,
                    size,
                });
            }
        }
    }

    walk.files.sort_by(|a, b| a.path.cmp(&b.path));
    walk.dirs.sort();
    Ok(walk)
}

#[must_use]
pub fn prune_cache_entries(walk: &CacheWalk) -> CachePruneResult {
    let mut result = CachePruneResult {
        candidate_entries: walk.files.len() as u64,
        candidate_size_bytes: walk.total_bytes,
        ..CachePruneResult::default()
    };

    for entry in &walk.files {
        match std::fs::remove_file(&entry.path) {
            Ok(()) => {
                result.deleted_entries += 1;
                result.deleted_size_bytes += entry.size;
            }
            Err(err) => result
                .errors
                .push(format!("{}: {err}", entry.path.display())),
        }
    }

    for dir in walk.dirs.iter().rev() {
        match std::fs::remove_dir(dir) {
            Ok(()) => result.deleted_dirs += 1,
            Err(err) => result.errors.push(format!("{}: {err}", dir.display())),
        }
    }

    result
}
