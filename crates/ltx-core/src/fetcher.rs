use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use base64::prelude::{Engine as _, BASE64_STANDARD};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::LtxError;
use crate::flight::Singleflight;
use crate::http::{build_http_client, RemoteBase};
use crate::store::Store;

/// Bumped when the package record layout or the proxy contract changes.
/// Records stamped with any other version are ignored on read.
pub const CACHE_VERSION: u32 = 3;

const ALIASES_KEY: &str = "aliases";

/// Persisted metadata for one fetched package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    #[serde(default)]
    pub canonical_paths: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub cache_version: u32,
    #[serde(default)]
    pub not_found: bool,
}

/// A package's files as returned to the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct FetchedPackage {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dependencies: Vec<String>,
}

#[derive(Deserialize)]
struct ProxyFetchBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    files: BTreeMap<String, ProxyFile>,
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Deserialize)]
struct ProxyFile {
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Deserialize)]
struct ProxyPkgInfo {
    #[serde(default)]
    miktex: Option<String>,
    #[serde(default)]
    texlive: Option<String>,
}

enum CacheLookup {
    Miss,
    Negative,
    Hit(FetchedPackage),
}

/// Resolves packages no bundle provides through the repository proxy,
/// caching both positives and negatives in the persistent store.
pub struct PackageFetcher {
    base: RemoteBase,
    client: Client,
    store: Arc<Store>,
    online: bool,
    flight: Singleflight<Option<FetchedPackage>>,
    mounted: Mutex<Vec<String>>,
    aliases: Mutex<HashMap<String, String>>,
    bytes_downloaded: AtomicU64,
    network_requests: AtomicU64,
}

impl PackageFetcher {
    /// # Errors
    /// Returns `Fatal` if the HTTP client cannot be constructed.
    pub fn new(config: &Config, store: Arc<Store>) -> Result<Self, LtxError> {
        let aliases = store
            .records()
            .get_record(ALIASES_KEY)
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();
        Ok(Self {
            base: RemoteBase::parse(&config.proxy_base),
            client: build_http_client()?,
            store,
            online: config.online,
            flight: Singleflight::new(),
            mounted: Mutex::new(Vec::new()),
            aliases: Mutex::new(aliases),
            bytes_downloaded: AtomicU64::new(0),
            network_requests: AtomicU64::new(0),
        })
    }

    /// Resolve one package. Cached results (positive or negative) answer
    /// without network; concurrent callers for the same name share one
    /// in-flight request. `None` means unresolvable right now.
    #[must_use]
    pub fn fetch_package(&self, name: &str) -> Option<FetchedPackage> {
        self.flight.run(name, || self.fetch_package_slow(name))
    }

    fn fetch_package_slow(&self, name: &str) -> Option<FetchedPackage> {
        match self.from_cache(name) {
            CacheLookup::Hit(package) => {
                debug!(package = name, "package served from cache");
                return Some(package);
            }
            CacheLookup::Negative => {
                debug!(package = name, "package is negatively cached");
                return None;
            }
            CacheLookup::Miss => {}
        }
        if !self.online {
            warn!(package = name, "package is uncached and the network is disabled");
            return None;
        }

        let lookup = self
            .aliases
            .lock()
            .expect("alias table poisoned")
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string());

        match self.fetch_remote(&lookup) {
            Ok(Some(package)) => {
                self.persist(name, &package);
                Some(package)
            }
            Ok(None) => {
                if lookup == name {
                    if let Some(parent) = self.discover_alias(name) {
                        self.remember_alias(name, &parent);
                        if let Ok(Some(package)) = self.fetch_remote(&parent) {
                            self.persist(name, &package);
                            return Some(package);
                        }
                    }
                }
                self.persist_negative(name);
                None
            }
            Err(err) => {
                // Transient failures stay fetchable: no negative record.
                warn!(package = name, %err, "package fetch failed");
                None
            }
        }
    }

    /// Transitive closure over proxy-reported dependencies. Cycles in the
    /// live repository graph terminate via the visited set.
    #[must_use]
    pub fn fetch_with_dependencies(&self, name: &str) -> BTreeMap<String, Vec<u8>> {
        let mut visited = HashSet::new();
        let mut queue = vec![name.to_string()];
        let mut files = BTreeMap::new();
        while let Some(current) = queue.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(package) = self.fetch_package(&current) {
                files.extend(package.files);
                queue.extend(package.dependencies);
            }
        }
        files
    }

    /// Record canonical paths the orchestrator mounted from this fetcher.
    pub fn note_mounted(&self, paths: &[String]) {
        self.mounted
            .lock()
            .expect("mounted list poisoned")
            .extend(paths.iter().cloned());
    }

    /// Paths mounted this session, in mount order.
    #[must_use]
    pub fn mounted_files(&self) -> Vec<String> {
        self.mounted.lock().expect("mounted list poisoned").clone()
    }

    #[must_use]
    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn network_requests(&self) -> u64 {
        self.network_requests.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn alias_for(&self, name: &str) -> Option<String> {
        self.aliases
            .lock()
            .expect("alias table poisoned")
            .get(name)
            .cloned()
    }

    fn from_cache(&self, name: &str) -> CacheLookup {
        let Some(value) = self.store.records().get_record(&format!("pkg:{name}")) else {
            return CacheLookup::Miss;
        };
        let Ok(record) = serde_json::from_value::<PackageRecord>(value) else {
            return CacheLookup::Miss;
        };
        if record.cache_version != CACHE_VERSION {
            return CacheLookup::Miss;
        }
        if record.not_found {
            return CacheLookup::Negative;
        }
        let mut files = BTreeMap::new();
        for path in &record.canonical_paths {
            match self.store.blobs().read(path) {
                Some(bytes) => {
                    files.insert(path.clone(), bytes);
                }
                // A missing blob invalidates the hit; refetch instead.
                None => return CacheLookup::Miss,
            }
        }
        CacheLookup::Hit(FetchedPackage {
            files,
            dependencies: record.dependencies,
        })
    }

    fn fetch_remote(&self, name: &str) -> Result<Option<FetchedPackage>, LtxError> {
        self.network_requests.fetch_add(1, Ordering::SeqCst);
        let body = match self.base.get(&self.client, &format!("api/fetch/{name}"))? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        self.bytes_downloaded
            .fetch_add(body.len() as u64, Ordering::SeqCst);
        let parsed: ProxyFetchBody = serde_json::from_slice(&body)
            .map_err(|err| LtxError::Malformed(format!("proxy response for {name}: {err}")))?;
        if let Some(error) = parsed.error {
            debug!(package = name, error, "proxy reported a miss");
            return Ok(None);
        }

        let mut files = BTreeMap::new();
        for (path, file) in parsed.files {
            if !path.starts_with("/texlive/") {
                warn!(package = name, path, "proxy path outside /texlive/ skipped");
                continue;
            }
            let bytes = match file.encoding.as_deref() {
                Some("base64") => BASE64_STANDARD.decode(file.content.as_bytes()).map_err(
                    |err| LtxError::Malformed(format!("base64 content for {path}: {err}")),
                )?,
                _ => file.content.into_bytes(),
            };
            files.insert(path, bytes);
        }
        Ok(Some(FetchedPackage {
            files,
            dependencies: parsed.dependencies,
        }))
    }

    fn discover_alias(&self, name: &str) -> Option<String> {
        self.network_requests.fetch_add(1, Ordering::SeqCst);
        let body = match self.base.get(&self.client, &format!("api/pkg/{name}")) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                warn!(package = name, %err, "alias lookup failed");
                return None;
            }
        };
        let info: ProxyPkgInfo = serde_json::from_slice(&body).ok()?;
        info.miktex
            .or(info.texlive)
            .filter(|parent| parent.as_str() != name)
    }

    fn remember_alias(&self, name: &str, parent: &str) {
        debug!(package = name, parent, "alias learned");
        let snapshot = {
            let mut aliases = self.aliases.lock().expect("alias table poisoned");
            aliases.insert(name.to_string(), parent.to_string());
            aliases.clone()
        };
        match serde_json::to_value(&snapshot) {
            Ok(value) => {
                if let Err(err) = self.store.records().put_record(ALIASES_KEY, &value) {
                    warn!(%err, "alias table not persisted");
                }
            }
            Err(err) => warn!(%err, "alias table not serializable"),
        }
    }

    fn persist(&self, name: &str, package: &FetchedPackage) {
        for (path, bytes) in &package.files {
            if let Err(err) = self.store.blobs().write(path, bytes) {
                warn!(package = name, path, %err, "fetched file not persisted");
            }
        }
        let record = PackageRecord {
            name: name.to_string(),
            canonical_paths: package.files.keys().cloned().collect(),
            dependencies: package.dependencies.clone(),
            cache_version: CACHE_VERSION,
            not_found: false,
        };
        self.put_record(name, &record);
    }

    fn persist_negative(&self, name: &str) {
        let record = PackageRecord {
            name: name.to_string(),
            canonical_paths: Vec::new(),
            dependencies: Vec::new(),
            cache_version: CACHE_VERSION,
            not_found: true,
        };
        self.put_record(name, &record);
    }

    fn put_record(&self, name: &str, record: &PackageRecord) {
        match serde_json::to_value(record) {
            Ok(value) => {
                if let Err(err) = self.store.records().put_record(&format!("pkg:{name}"), &value) {
                    warn!(package = name, %err, "package record not persisted");
                }
            }
            Err(err) => warn!(package = name, %err, "package record not serializable"),
        }
    }
}
