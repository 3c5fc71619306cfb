#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod bundle;
pub mod engine;
pub mod fingerprint;
pub mod missing;
pub mod registry;
pub mod scan;
pub mod select;
pub mod stats;

pub use bundle::{
    payload_compression, BundleAudit, BundleExtent, BundleMeta, MountEntry, PayloadCompression,
    RejectedExtent,
};
pub use engine::Engine;
pub use fingerprint::preamble_fingerprint;
pub use missing::{
    has_legacy_font_expansion, package_from_missing_file, parse_missing_files,
    LEGACY_FONT_EXPANSION_TOKEN,
};
pub use registry::{FileLocation, Registry, CORE_BUNDLES};
pub use scan::{extract_packages, requires_unicode_engine, strip_comments};
pub use select::{select_engine, Confidence, EngineChoice};
pub use stats::EngineStats;
