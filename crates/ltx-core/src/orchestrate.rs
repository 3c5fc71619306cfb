use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use ltx_domain::{
    extract_packages, has_legacy_font_expansion, package_from_missing_file, parse_missing_files,
    preamble_fingerprint, select_engine, Engine, EngineChoice,
};

use crate::bundles::BundleManager;
use crate::config::Config;
use crate::engine::{EngineFs, EngineRun, TexEngine};
use crate::error::LtxError;
use crate::fetcher::PackageFetcher;
use crate::stats::{CompileReport, StatsStore};
use crate::store::Store;

const WORK_DIR: &str = "/work";

/// Cooperative cancellation: checked at every suspension point, so a new
/// compile can abandon an outstanding one without tearing shared state.
/// In-flight fetches are never cancelled; their results enter the cache.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// One compile request as submitted by the caller.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub source: String,
    /// File name of the root document, e.g. `main.tex`.
    pub main_file: String,
    /// Additional input files written next to the root document.
    pub extra_files: Vec<(String, Vec<u8>)>,
    pub engine_override: Option<Engine>,
}

impl CompileRequest {
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            main_file: "main.tex".to_string(),
            extra_files: Vec::new(),
            engine_override: None,
        }
    }
}

/// Resource accounting for one compile.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompileMetrics {
    pub bundles_loaded: u64,
    pub bytes_downloaded: u64,
    pub retries: u32,
    pub packages_fetched: u32,
}

/// The composed result handed back to the caller.
#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub ok: bool,
    pub pdf: Option<Vec<u8>>,
    pub log: String,
    pub choice: EngineChoice,
    pub stats: CompileMetrics,
}

// The recovery loop as an explicit machine: missing-file detection is a
// data-driven signal, not an exception.
enum Phase {
    Mount,
    Run,
    Inspect(EngineRun),
    Recover(Vec<String>),
    Done(bool),
}

/// Drives select, mount, run, recover and retry for one document at a time.
pub struct Orchestrator {
    bundles: Arc<BundleManager>,
    fetcher: Arc<PackageFetcher>,
    stats: StatsStore,
    retry_limit: u32,
}

impl Orchestrator {
    /// # Errors
    /// Returns `Fatal` if the HTTP clients cannot be constructed.
    pub fn new(config: &Config, store: Arc<Store>) -> Result<Self, LtxError> {
        Ok(Self {
            bundles: Arc::new(BundleManager::new(config, Arc::clone(&store))?),
            fetcher: Arc::new(PackageFetcher::new(config, Arc::clone(&store))?),
            stats: StatsStore::new(store),
            retry_limit: config.retry_limit,
        })
    }

    #[must_use]
    pub fn bundles(&self) -> &BundleManager {
        &self.bundles
    }

    #[must_use]
    pub fn fetcher(&self) -> &PackageFetcher {
        &self.fetcher
    }

    /// Pick the engine for a document the way a compile would, without
    /// running one.
    #[must_use]
    pub fn choose_engine(&self, source: &str) -> EngineChoice {
        let fingerprint = preamble_fingerprint(source);
        let packages = extract_packages(source);
        select_engine(
            source,
            &packages,
            &self.stats.load(&fingerprint),
            self.stats.legacy_font_expansion(&fingerprint),
        )
    }

    /// Compile one document.
    ///
    /// # Errors
    /// Only `Fatal` conditions (no registry, engine cannot start) surface as
    /// `Err`; a failing document is an `Ok` outcome with `ok == false`.
    pub fn compile(
        &self,
        request: &CompileRequest,
        engine: &mut dyn TexEngine,
        fs: &mut dyn EngineFs,
        cancel: &CancelToken,
    ) -> Result<CompileOutcome, LtxError> {
        let started = Instant::now();
        let fingerprint = preamble_fingerprint(&request.source);
        let bytes_before = self.bundles.bytes_downloaded() + self.fetcher.bytes_downloaded();

        self.bundles.load_registry()?;
        let packages = extract_packages(&request.source);
        let choice = match request.engine_override {
            Some(engine) => EngineChoice {
                engine,
                reason: "engine forced by caller".to_string(),
                confidence: ltx_domain::Confidence::High,
            },
            None => select_engine(
                &request.source,
                &packages,
                &self.stats.load(&fingerprint),
                self.stats.legacy_font_expansion(&fingerprint),
            ),
        };
        let closure = self.bundles.resolve_bundles(&packages, choice.engine);
        debug!(
            engine = %choice.engine,
            fingerprint = %fingerprint,
            bundles = closure.len(),
            "compile planned"
        );

        let mut metrics = CompileMetrics::default();
        let mut attempted: HashSet<String> = HashSet::new();
        let mut log = String::new();
        let mut ok = false;
        let mut was_cancelled = false;
        let mut phase = Phase::Mount;

        loop {
            if cancel.cancelled() {
                warn!("compile cancelled");
                log.push_str("\ncompile cancelled before completion\n");
                was_cancelled = true;
                break;
            }
            phase = match phase {
                Phase::Mount => {
                    let loaded = self.bundles.load_bundles(&closure);
                    metrics.bundles_loaded = loaded.len() as u64;
                    for name in &loaded {
                        self.bundles.mount_bundle(name, fs);
                    }
                    fs.mkdir(WORK_DIR)
                        .map_err(|err| LtxError::Fatal(format!("cannot prepare workdir: {err}")))?;
                    for (name, bytes) in &request.extra_files {
                        self.write_input(fs, name, bytes)?;
                    }
                    self.write_input(fs, &request.main_file, request.source.as_bytes())?;
                    Phase::Run
                }
                Phase::Run => {
                    let argv = choice.engine.argv(&request.main_file);
                    let run = engine
                        .run(&argv, fs)
                        .map_err(|err| LtxError::Fatal(format!("engine did not start: {err}")))?;
                    Phase::Inspect(run)
                }
                Phase::Inspect(run) => {
                    log = run.log;
                    let artifact = fs.read_file(&self.artifact_path(&request.main_file));
                    match artifact {
                        Some(pdf) if !pdf.is_empty() => Phase::Done(true),
                        _ => {
                            let missing = parse_missing_files(&log);
                            if missing.is_empty() {
                                debug!(exit_code = run.exit_code, "no missing files extractable");
                                Phase::Done(false)
                            } else {
                                Phase::Recover(missing)
                            }
                        }
                    }
                }
                Phase::Recover(missing) => {
                    if metrics.retries >= self.retry_limit {
                        warn!(retries = metrics.retries, "retry bound reached");
                        Phase::Done(false)
                    } else {
                        let mounted = self.recover(&missing, &mut attempted, &mut metrics, fs);
                        if mounted == 0 {
                            Phase::Done(false)
                        } else {
                            metrics.retries += 1;
                            Phase::Run
                        }
                    }
                }
                Phase::Done(success) => {
                    ok = success;
                    break;
                }
            };
        }

        let elapsed_ms = started.elapsed().as_millis() as f64;
        if !was_cancelled {
            self.stats.record_result(
                &fingerprint,
                &CompileReport {
                    engine: choice.engine,
                    success: ok,
                    time_ms: elapsed_ms,
                    triggered_legacy_font_expansion: has_legacy_font_expansion(&log),
                },
            );
        }
        metrics.bytes_downloaded =
            self.bundles.bytes_downloaded() + self.fetcher.bytes_downloaded() - bytes_before;

        let pdf = if ok {
            fs.read_file(&self.artifact_path(&request.main_file))
        } else {
            None
        };
        info!(
            ok,
            engine = %choice.engine,
            elapsed_ms,
            retries = metrics.retries,
            "compile finished"
        );
        Ok(CompileOutcome {
            ok,
            pdf,
            log,
            choice,
            stats: metrics,
        })
    }

    // Mount whatever the fetcher can produce for the missing files. Names
    // already attempted this compile are skipped, so every retry either
    // strictly grows the mounted set or the loop exits.
    fn recover(
        &self,
        missing: &[String],
        attempted: &mut HashSet<String>,
        metrics: &mut CompileMetrics,
        fs: &mut dyn EngineFs,
    ) -> usize {
        let mut mounted = Vec::new();
        for file in missing {
            let Some(package) = package_from_missing_file(file) else {
                debug!(file, "missing file does not map to a package");
                continue;
            };
            if !attempted.insert(package.clone()) {
                continue;
            }
            let Some(fetched) = self.fetcher.fetch_package(&package) else {
                continue;
            };
            metrics.packages_fetched += 1;
            for (path, bytes) in &fetched.files {
                match fs.write_file(path, bytes) {
                    Ok(()) => mounted.push(path.clone()),
                    Err(err) => warn!(path, %err, "fetched file not mounted"),
                }
            }
        }
        self.fetcher.note_mounted(&mounted);
        mounted.len()
    }

    fn write_input(&self, fs: &mut dyn EngineFs, name: &str, bytes: &[u8]) -> Result<(), LtxError> {
        let path = format!("{WORK_DIR}/{name}");
        fs.write_file(&path, bytes)
            .map_err(|err| LtxError::Fatal(format!("cannot write input {name}: {err}")))
    }

    fn artifact_path(&self, main_file: &str) -> String {
        let stem = main_file.strip_suffix(".tex").unwrap_or(main_file);
        format!("{WORK_DIR}/{stem}.pdf")
    }
}
