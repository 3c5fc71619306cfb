use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ltx",
    version,
    about = "Compile TeX documents against lazily resolved bundles"
)]
pub struct LtxCli {
    /// Emit machine-readable JSON instead of human output.
    #[arg(long, global = true)]
    pub json: bool,
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    /// Log everything.
    #[arg(long, global = true)]
    pub trace: bool,
    #[command(subcommand)]
    pub command: CommandCli,
}

#[derive(Subcommand)]
pub enum CommandCli {
    /// Compile a document to PDF.
    Compile(CompileArgs),
    /// Show which engine would be selected for a document.
    Engine(EngineArgs),
    /// Show the bundle closure a document would mount.
    Resolve(ResolveArgs),
    /// Inspect or prune the persistent cache.
    Cache(CacheArgs),
    /// Drop learned statistics, aliases and cached packages.
    Reset,
}

#[derive(Args)]
pub struct CompileArgs {
    /// Root .tex document.
    pub file: PathBuf,
    /// Force an engine instead of selecting one.
    #[arg(long)]
    pub engine: Option<String>,
    /// Run this binary as the engine (keeps the selected argv).
    #[arg(long)]
    pub engine_bin: Option<PathBuf>,
    /// Where to write the PDF (defaults to the input path with .pdf).
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct EngineArgs {
    /// Root .tex document.
    pub file: PathBuf,
}

#[derive(Args)]
pub struct ResolveArgs {
    /// Root .tex document.
    pub file: PathBuf,
    /// Resolve for this engine instead of the selected one.
    #[arg(long)]
    pub engine: Option<String>,
}

#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Subcommand)]
pub enum CacheCommand {
    /// Report entry count and total size.
    Stats,
    /// Delete every cached entry.
    Prune,
}
