#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

mod bundles;
mod config;
mod engine;
mod error;
mod fetcher;
mod flight;
mod http;
mod orchestrate;
mod stats;
mod store;

pub use bundles::BundleManager;
pub use config::{Config, DEFAULT_BUNDLE_BASE, DEFAULT_PROXY_BASE};
pub use engine::{DirFs, EngineFs, EngineRun, MemoryFs, ProcessEngine, TexEngine};
pub use error::LtxError;
pub use fetcher::{FetchedPackage, PackageFetcher, PackageRecord, CACHE_VERSION};
pub use orchestrate::{
    CancelToken, CompileMetrics, CompileOutcome, CompileRequest, Orchestrator,
};
pub use stats::{CompileReport, StatsStore, LEGACY_FONT_EXPANSION_FLAG};
pub use store::{
    collect_cache_walk, compute_cache_usage, prune_cache_entries, resolve_cache_store_path,
    BlobStore, CacheEntry, CacheLocation, CachePruneResult, CacheUsage, CacheWalk, RecordStore,
    Store,
};
