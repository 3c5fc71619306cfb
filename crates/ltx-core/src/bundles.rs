use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use ltx_domain::{payload_compression, BundleMeta, Engine, PayloadCompression, Registry};

use crate::config::Config;
use crate::engine::EngineFs;
use crate::error::LtxError;
use crate::flight::Singleflight;
use crate::http::{build_http_client, RemoteBase};
use crate::store::Store;

struct RegistryState {
    loaded: bool,
    registry: Registry,
}

/// Turns a (package set, engine) pair into a mounted working set of files.
///
/// Payloads are looked up in three tiers: the in-process map, the blob store
/// (under `bundle:<name>`), then the network. Decompressed payloads are
/// persisted best-effort so the next session starts warm.
pub struct BundleManager {
    base: RemoteBase,
    client: Client,
    store: Arc<Store>,
    online: bool,
    state: Mutex<RegistryState>,
    load_lock: Mutex<()>,
    payloads: Mutex<HashMap<String, Arc<Vec<u8>>>>,
    metas: Mutex<HashMap<String, Arc<BundleMeta>>>,
    mounted: Mutex<HashSet<String>>,
    flight: Singleflight<Option<Arc<Vec<u8>>>>,
    bytes_downloaded: AtomicU64,
    network_fetches: AtomicU64,
}

impl BundleManager {
    /// # Errors
    /// Returns `Fatal` if the HTTP client cannot be constructed.
    pub fn new(config: &Config, store: Arc<Store>) -> Result<Self, LtxError> {
        Ok(Self {
            base: RemoteBase::parse(&config.bundle_base),
            client: build_http_client()?,
            store,
            online: config.online,
            state: Mutex::new(RegistryState {
                loaded: false,
                registry: Registry::bootstrap(),
            }),
            load_lock: Mutex::new(()),
            payloads: Mutex::new(HashMap::new()),
            metas: Mutex::new(HashMap::new()),
            mounted: Mutex::new(HashSet::new()),
            flight: Singleflight::new(),
            bytes_downloaded: AtomicU64::new(0),
            network_fetches: AtomicU64::new(0),
        })
    }

    /// Fetch the registry manifests once. Subsequent calls are no-ops; until
    /// the first succeeds, resolution runs against the compiled-in bootstrap
    /// table.
    ///
    /// # Errors
    /// Returns `Fatal` when a required manifest cannot be fetched or parsed:
    /// without a registry nothing downstream can resolve.
    pub fn load_registry(&self) -> Result<(), LtxError> {
        let _guard = self.load_lock.lock().expect("registry load lock poisoned");
        if self.state.lock().expect("registry state poisoned").loaded {
            return Ok(());
        }
        if !self.online {
            return Err(LtxError::Fatal(
                "registry is not loaded and the network is disabled".to_string(),
            ));
        }

        let registry_json = self.require_manifest("registry.json")?;
        let package_map = self.require_manifest("package-map.json")?;
        let file_manifest = self.require_manifest("file-manifest.json")?;
        let bundle_deps = self.optional_manifest("bundle-deps.json");
        let package_deps = self.optional_manifest("package-deps.json");

        let registry = Registry::from_manifests(
            &registry_json,
            &package_map,
            &file_manifest,
            bundle_deps.as_deref(),
            package_deps.as_deref(),
        )
        .map_err(|err| LtxError::Fatal(format!("registry manifests are malformed: {err}")))?;

        let mut state = self.state.lock().expect("registry state poisoned");
        state.registry = registry;
        state.loaded = true;
        debug!(bundles = state.registry.bundle_names().len(), "registry loaded");
        Ok(())
    }

    fn require_manifest(&self, rel: &str) -> Result<Vec<u8>, LtxError> {
        match self.base.get(&self.client, rel)? {
            Some(bytes) => Ok(bytes),
            None => Err(LtxError::Fatal(format!("registry manifest {rel} is missing"))),
        }
    }

    fn optional_manifest(&self, rel: &str) -> Option<Vec<u8>> {
        match self.base.get(&self.client, rel) {
            Ok(found) => found,
            Err(err) => {
                warn!(manifest = rel, %err, "optional manifest fetch failed");
                None
            }
        }
    }

    /// A snapshot of the current registry (bootstrap until `load_registry`
    /// succeeds).
    #[must_use]
    pub fn registry(&self) -> Registry {
        self.state
            .lock()
            .expect("registry state poisoned")
            .registry
            .clone()
    }

    /// Pure closure resolution over the loaded registry.
    #[must_use]
    pub fn resolve_bundles(&self, packages: &[String], engine: Engine) -> Vec<String> {
        self.registry().resolve_bundles(packages, engine)
    }

    /// Load one bundle's decompressed payload. Concurrent callers for the
    /// same name share a single in-flight load. Failures are soft.
    #[must_use]
    pub fn load_bundle(&self, name: &str) -> Option<Arc<Vec<u8>>> {
        if let Some(payload) = self.payloads.lock().expect("payload map poisoned").get(name) {
            return Some(Arc::clone(payload));
        }
        self.flight.run(name, || self.load_bundle_slow(name))
    }

    fn load_bundle_slow(&self, name: &str) -> Option<Arc<Vec<u8>>> {
        // A caller that lost the in-flight race may have populated the map.
        if let Some(payload) = self.payloads.lock().expect("payload map poisoned").get(name) {
            return Some(Arc::clone(payload));
        }

        let blob_key = format!("bundle:{name}");
        let digest_key = format!("bundle-digest:{name}");
        if let Some(bytes) = self.store.blobs().read(&blob_key) {
            let expected = self
                .store
                .records()
                .get_record(&digest_key)
                .and_then(|value| value.as_str().map(ToOwned::to_owned));
            let actual = hex::encode(Sha256::digest(&bytes));
            match expected {
                Some(expected) if expected != actual => {
                    warn!(bundle = name, "cached payload digest mismatch; refetching");
                }
                _ => {
                    let payload = Arc::new(bytes);
                    self.payloads
                        .lock()
                        .expect("payload map poisoned")
                        .insert(name.to_string(), Arc::clone(&payload));
                    return Some(payload);
                }
            }
        }

        if !self.online {
            warn!(bundle = name, "bundle is uncached and the network is disabled");
            return None;
        }
        let compressed = match self.base.get(&self.client, &format!("{name}.data.gz")) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                warn!(bundle = name, "bundle payload not published");
                return None;
            }
            Err(err) => {
                warn!(bundle = name, %err, "bundle fetch failed");
                return None;
            }
        };
        self.network_fetches.fetch_add(1, Ordering::SeqCst);
        self.bytes_downloaded
            .fetch_add(compressed.len() as u64, Ordering::SeqCst);

        let decompressed = match decompress(&compressed) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(bundle = name, %err, "bundle payload rejected");
                return None;
            }
        };

        // Persistence is fire-and-forget: losing the write costs a refetch,
        // never correctness.
        if let Err(err) = self.store.blobs().write(&blob_key, &decompressed) {
            warn!(bundle = name, %err, "bundle payload not persisted");
        }
        let digest = hex::encode(Sha256::digest(&decompressed));
        if let Err(err) = self
            .store
            .records()
            .put_record(&digest_key, &serde_json::Value::String(digest))
        {
            warn!(bundle = name, %err, "bundle digest not persisted");
        }

        let payload = Arc::new(decompressed);
        self.payloads
            .lock()
            .expect("payload map poisoned")
            .insert(name.to_string(), Arc::clone(&payload));
        Some(payload)
    }

    /// Load several bundles, letting the fetch-and-decompress work progress
    /// in parallel. Returns the names that loaded.
    #[must_use]
    pub fn load_bundles(&self, names: &[String]) -> Vec<String> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = names
                .iter()
                .map(|name| {
                    let name = name.clone();
                    scope.spawn(move || (self.load_bundle(&name).is_some(), name))
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| match handle.join() {
                    Ok((true, name)) => Some(name),
                    Ok((false, _)) => None,
                    Err(_) => None,
                })
                .collect()
        })
    }

    fn load_meta(&self, name: &str) -> Option<Arc<BundleMeta>> {
        if let Some(meta) = self.metas.lock().expect("meta map poisoned").get(name) {
            return Some(Arc::clone(meta));
        }
        let record_key = format!("bundle-meta:{name}");
        if let Some(value) = self.store.records().get_record(&record_key) {
            if let Ok(meta) = serde_json::from_value::<BundleMeta>(value) {
                let meta = Arc::new(meta);
                self.metas
                    .lock()
                    .expect("meta map poisoned")
                    .insert(name.to_string(), Arc::clone(&meta));
                return Some(meta);
            }
        }
        if !self.online {
            return None;
        }
        let bytes = match self.base.get(&self.client, &format!("{name}.meta.json")) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                warn!(bundle = name, "bundle metadata not published");
                return None;
            }
            Err(err) => {
                warn!(bundle = name, %err, "bundle metadata fetch failed");
                return None;
            }
        };
        let meta = match BundleMeta::parse(&bytes) {
            Ok(meta) => meta,
            Err(err) => {
                warn!(bundle = name, %err, "bundle metadata rejected");
                return None;
            }
        };
        if let Ok(value) = serde_json::to_value(&meta) {
            if let Err(err) = self.store.records().put_record(&record_key, &value) {
                warn!(bundle = name, %err, "bundle metadata not persisted");
            }
        }
        let meta = Arc::new(meta);
        self.metas
            .lock()
            .expect("meta map poisoned")
            .insert(name.to_string(), Arc::clone(&meta));
        Some(meta)
    }

    /// Write every validated extent of `name` into the engine filesystem.
    /// A bundle already mounted this session is a no-op. Returns the number
    /// of files written; failures degrade to 0 with the cause logged.
    pub fn mount_bundle(&self, name: &str, fs: &mut dyn EngineFs) -> usize {
        if self.mounted.lock().expect("mounted set poisoned").contains(name) {
            return 0;
        }
        let Some(payload) = self.load_bundle(name) else {
            return 0;
        };
        let Some(meta) = self.load_meta(name) else {
            return 0;
        };

        let audit = meta.audit(payload.len());
        for rejected in &audit.rejected {
            warn!(
                bundle = name,
                path = %rejected.canonical_path,
                reason = %rejected.reason,
                "malformed bundle entry skipped"
            );
        }
        let mut written = 0;
        for entry in &audit.entries {
            match fs.write_file(&entry.canonical_path, &payload[entry.start..entry.end]) {
                Ok(()) => written += 1,
                Err(err) => {
                    warn!(bundle = name, path = %entry.canonical_path, %err, "mount write failed");
                }
            }
        }
        self.mounted
            .lock()
            .expect("mounted set poisoned")
            .insert(name.to_string());
        debug!(bundle = name, files = written, "bundle mounted");
        written
    }

    #[must_use]
    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn network_fetches(&self) -> u64 {
        self.network_fetches.load(Ordering::SeqCst)
    }
}

fn decompress(compressed: &[u8]) -> Result<Vec<u8>, LtxError> {
    match payload_compression(compressed) {
        PayloadCompression::Gzip => {
            let mut decoder = GzDecoder::new(compressed);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|err| LtxError::Malformed(format!("gzip stream: {err}")))?;
            Ok(out)
        }
        PayloadCompression::Lz4 => Err(LtxError::Malformed(
            "LZ4-framed payloads are not supported".to_string(),
        )),
        PayloadCompression::Unknown => {
            Err(LtxError::Malformed("unrecognised payload container".to_string()))
        }
    }
}
