use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Prefix every mounted path must carry. Metadata entries outside it are
/// rejected as malformed.
pub const CANONICAL_ROOT: &str = "/texlive/";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const LZ4_MAGIC: [u8; 4] = [0x04, 0x22, 0x4D, 0x18];

/// One file extent inside a bundle payload. Offsets index the decompressed
/// payload; `end` is exclusive.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BundleExtent {
    pub path: String,
    pub name: String,
    pub start: u64,
    pub end: u64,
}

impl BundleExtent {
    #[must_use]
    pub fn canonical_path(&self) -> String {
        format!("{}/{}", self.path.trim_end_matches('/'), self.name)
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Bundle metadata as published in `<name>.meta.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BundleMeta {
    pub name: String,
    pub files: Vec<BundleExtent>,
    #[serde(rename = "totalSize")]
    pub total_size: u64,
}

/// A metadata entry that survived validation and is ready to mount.
#[derive(Clone, Debug)]
pub struct MountEntry {
    pub canonical_path: String,
    pub start: usize,
    pub end: usize,
}

/// A metadata entry rejected at load, with the reason for the log.
#[derive(Clone, Debug)]
pub struct RejectedExtent {
    pub canonical_path: String,
    pub reason: String,
}

/// The outcome of validating a bundle's metadata against its payload.
#[derive(Clone, Debug, Default)]
pub struct BundleAudit {
    pub entries: Vec<MountEntry>,
    pub rejected: Vec<RejectedExtent>,
}

impl BundleMeta {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("invalid bundle metadata")
    }

    /// Validate every extent against the invariants: canonical path rooted at
    /// `/texlive/`, offsets ordered and within both the declared total size
    /// and the actual payload, extents non-overlapping in declaration order.
    /// Violations reject the entry, never the whole bundle.
    #[must_use]
    pub fn audit(&self, payload_len: usize) -> BundleAudit {
        let mut audit = BundleAudit::default();
        let mut previous_end: u64 = 0;
        for extent in &self.files {
            let canonical = extent.canonical_path();
            let reason = if !canonical.starts_with(CANONICAL_ROOT) {
                Some(format!("path escapes {CANONICAL_ROOT}"))
            } else if extent.end < extent.start {
                Some(format!("extent ends before it starts ({}..{})", extent.start, extent.end))
            } else if extent.end > self.total_size {
                Some(format!(
                    "extent end {} exceeds declared size {}",
                    extent.end, self.total_size
                ))
            } else if extent.end > payload_len as u64 {
                Some(format!(
                    "extent end {} exceeds payload length {payload_len}",
                    extent.end
                ))
            } else if extent.start < previous_end {
                Some(format!(
                    "extent start {} overlaps previous end {previous_end}",
                    extent.start
                ))
            } else {
                None
            };
            match reason {
                Some(reason) => audit.rejected.push(RejectedExtent {
                    canonical_path: canonical,
                    reason,
                }),
                None => {
                    previous_end = extent.end;
                    audit.entries.push(MountEntry {
                        canonical_path: canonical,
                        start: extent.start as usize,
                        end: extent.end as usize,
                    });
                }
            }
        }
        audit
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadCompression {
    Gzip,
    Lz4,
    Unknown,
}

/// Sniff the payload container from its first bytes. Only gzip is supported;
/// an LZ4 frame is recognised so it can be reported as such.
#[must_use]
pub fn payload_compression(head: &[u8]) -> PayloadCompression {
    if head.len() >= 2 && head[..2] == GZIP_MAGIC {
        PayloadCompression::Gzip
    } else if head.len() >= 4 && head[..4] == LZ4_MAGIC {
        PayloadCompression::Lz4
    } else {
        PayloadCompression::Unknown
    }
}
