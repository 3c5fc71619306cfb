use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use tracing::debug;

/// Capability the engine's virtual filesystem exposes to the orchestrator.
///
/// The orchestrator only ever writes bytes at canonical paths and reads the
/// output artifact back; the TeX engine binding is the one implementation
/// that maps these onto engine-native calls.
pub trait EngineFs {
    /// Write `bytes` at `path`, creating parent directories.
    fn write_file(&mut self, path: &str, bytes: &[u8]) -> Result<()>;
    /// Read a file; `None` when absent.
    fn read_file(&self, path: &str) -> Option<Vec<u8>>;
    fn mkdir(&mut self, path: &str) -> Result<()>;
    fn unlink(&mut self, path: &str) -> Result<()>;
}

/// In-memory filesystem used by tests and library consumers.
#[derive(Debug, Default)]
pub struct MemoryFs {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryFs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl EngineFs for MemoryFs {
    fn write_file(&mut self, path: &str, bytes: &[u8]) -> Result<()> {
        self.files.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.get(path).cloned()
    }

    fn mkdir(&mut self, _path: &str) -> Result<()> {
        Ok(())
    }

    fn unlink(&mut self, path: &str) -> Result<()> {
        self.files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| anyhow!("unlink {path}: not found"))
    }
}

/// Maps the engine filesystem onto a directory tree rooted at `root`, so a
/// real TeX binary can be pointed at the mounted working set.
#[derive(Debug)]
pub struct DirFs {
    root: PathBuf,
}

impl DirFs {
    /// # Errors
    /// Returns an error if the root directory cannot be created.
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create {}", root.display()))?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, path: &str) -> Result<PathBuf> {
        let rel = path.trim_start_matches('/');
        if rel.is_empty() || rel.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(anyhow!("path {path} escapes the engine root"));
        }
        Ok(self.root.join(rel))
    }
}

impl EngineFs for DirFs {
    fn write_file(&mut self, path: &str, bytes: &[u8]) -> Result<()> {
        let dest = self.host_path(path)?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&dest, bytes)
            .with_context(|| format!("failed to write {}", dest.display()))
    }

    fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        let host = self.host_path(path).ok()?;
        std::fs::read(host).ok()
    }

    fn mkdir(&mut self, path: &str) -> Result<()> {
        let dest = self.host_path(path)?;
        std::fs::create_dir_all(&dest)
            .with_context(|| format!("failed to create {}", dest.display()))
    }

    fn unlink(&mut self, path: &str) -> Result<()> {
        let dest = self.host_path(path)?;
        std::fs::remove_file(&dest)
            .with_context(|| format!("failed to unlink {}", dest.display()))
    }
}

/// One engine invocation's observable outcome.
#[derive(Debug, Clone)]
pub struct EngineRun {
    pub exit_code: i32,
    pub log: String,
}

/// The TeX engine as the orchestrator sees it: a black box taking argv and a
/// filesystem, producing an exit code and a log.
pub trait TexEngine {
    /// # Errors
    /// Returns an error only when the engine cannot be started at all;
    /// a failing compile is an `EngineRun` with a non-zero exit code.
    fn run(&mut self, argv: &[String], fs: &mut dyn EngineFs) -> Result<EngineRun>;
}

/// Runs a real TeX binary over a `DirFs` working directory.
///
/// `argv[0]` names the engine; `bin_override` substitutes a specific binary
/// while keeping the rest of the argv intact.
pub struct ProcessEngine {
    workdir: PathBuf,
    bin_override: Option<PathBuf>,
}

impl ProcessEngine {
    #[must_use]
    pub fn new(workdir: PathBuf, bin_override: Option<PathBuf>) -> Self {
        Self {
            workdir,
            bin_override,
        }
    }
}

impl TexEngine for ProcessEngine {
    fn run(&mut self, argv: &[String], fs: &mut dyn EngineFs) -> Result<EngineRun> {
        let engine_name = argv.first().ok_or_else(|| anyhow!("empty engine argv"))?;
        let program = self
            .bin_override
            .clone()
            .unwrap_or_else(|| PathBuf::from(engine_name));
        debug!(engine = %engine_name, workdir = %self.workdir.display(), "invoking engine");
        let output = Command::new(&program)
            .args(&argv[1..])
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("failed to invoke {}", program.display()))?;

        let mut log = String::new();
        log.push_str(&String::from_utf8_lossy(&output.stdout));
        log.push_str(&String::from_utf8_lossy(&output.stderr));
        // The transcript file usually carries the errors nonstopmode swallows.
        if let Some(main_file) = argv.last() {
            let transcript = format!(
                "/work/{}.log",
                main_file.rsplit('/').next().unwrap_or(main_file).trim_end_matches(".tex")
            );
            if let Some(bytes) = fs.read_file(&transcript) {
                log.push_str(&String::from_utf8_lossy(&bytes));
            }
        }

        Ok(EngineRun {
            exit_code: output.status.code().unwrap_or(-1),
            log,
        })
    }
}
