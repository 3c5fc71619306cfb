#![deny(clippy::all, warnings)]

use std::fs;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use color_eyre::eyre::eyre;
use serde_json::{json, Value};

use ltx_core::{
    collect_cache_walk, compute_cache_usage, prune_cache_entries, CancelToken, CompileRequest,
    Config, DirFs, Orchestrator, ProcessEngine, Store,
};
use ltx_domain::{extract_packages, preamble_fingerprint, Engine};

mod cli;

use cli::{CacheCommand, CommandCli, CompileArgs, EngineArgs, LtxCli, ResolveArgs};

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = LtxCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let (code, details) = run(&cli).map_err(|err| eyre!("{err:?}"))?;
    emit(&cli, code == 0, &details);
    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("ltx={level},ltx_cli={level},ltx_core={level},ltx_domain={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn run(cli: &LtxCli) -> Result<(i32, Value)> {
    match &cli.command {
        CommandCli::Compile(args) => cmd_compile(args),
        CommandCli::Engine(args) => cmd_engine(args),
        CommandCli::Resolve(args) => cmd_resolve(args),
        CommandCli::Cache(args) => match args.command {
            CacheCommand::Stats => cmd_cache_stats(),
            CacheCommand::Prune => cmd_cache_prune(),
        },
        CommandCli::Reset => cmd_reset(),
    }
}

fn emit(cli: &LtxCli, ok: bool, details: &Value) {
    if cli.json {
        let payload = json!({
            "status": if ok { "ok" } else { "failed" },
            "details": details,
        });
        println!("{payload}");
        return;
    }
    if let Some(object) = details.as_object() {
        for (key, value) in object {
            match value.as_str() {
                Some(text) => println!("{key}: {text}"),
                None => println!("{key}: {value}"),
            }
        }
    }
}

fn open_orchestrator() -> Result<(Config, Orchestrator)> {
    let config = Config::from_env()?;
    let store = Arc::new(Store::open(&config.cache.path)?);
    let orchestrator = Orchestrator::new(&config, store)?;
    Ok((config, orchestrator))
}

fn parse_engine(raw: &str) -> Result<Engine> {
    Engine::parse(raw).ok_or_else(|| anyhow!("unknown engine `{raw}`"))
}

fn cmd_compile(args: &CompileArgs) -> Result<(i32, Value)> {
    let source = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let main_file = args
        .file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("input path has no file name"))?
        .to_string();

    let (config, orchestrator) = open_orchestrator()?;
    let mut request = CompileRequest::new(source);
    request.main_file = main_file;
    if let Some(raw) = &args.engine {
        request.engine_override = Some(parse_engine(raw)?);
    }

    let workroot = tempfile::tempdir().context("failed to create engine workspace")?;
    let mut fs_view = DirFs::new(workroot.path().to_path_buf())?;
    let mut engine = ProcessEngine::new(workroot.path().join("work"), args.engine_bin.clone());

    let outcome = orchestrator.compile(&request, &mut engine, &mut fs_view, &CancelToken::new())?;

    let mut details = json!({
        "engine": outcome.choice.engine.as_str(),
        "reason": outcome.choice.reason,
        "confidence": outcome.choice.confidence.as_str(),
        "cache": config.cache.path.display().to_string(),
        "bundles_loaded": outcome.stats.bundles_loaded,
        "bytes_downloaded": outcome.stats.bytes_downloaded,
        "retries": outcome.stats.retries,
        "packages_fetched": outcome.stats.packages_fetched,
    });

    if outcome.ok {
        let output = args
            .output
            .clone()
            .unwrap_or_else(|| args.file.with_extension("pdf"));
        let pdf = outcome
            .pdf
            .ok_or_else(|| anyhow!("compile reported success without a PDF"))?;
        fs::write(&output, pdf)
            .with_context(|| format!("failed to write {}", output.display()))?;
        details["output"] = Value::String(output.display().to_string());
        Ok((0, details))
    } else {
        details["log_tail"] = Value::String(tail(&outcome.log, 2000));
        Ok((1, details))
    }
}

fn cmd_engine(args: &EngineArgs) -> Result<(i32, Value)> {
    let source = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let (_config, orchestrator) = open_orchestrator()?;
    let choice = orchestrator.choose_engine(&source);
    let details = json!({
        "engine": choice.engine.as_str(),
        "reason": choice.reason,
        "confidence": choice.confidence.as_str(),
        "fingerprint": preamble_fingerprint(&source),
    });
    Ok((0, details))
}

fn cmd_resolve(args: &ResolveArgs) -> Result<(i32, Value)> {
    let source = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let (_config, orchestrator) = open_orchestrator()?;
    orchestrator.bundles().load_registry()?;

    let engine = match &args.engine {
        Some(raw) => parse_engine(raw)?,
        None => orchestrator.choose_engine(&source).engine,
    };
    let packages = extract_packages(&source);
    let closure = orchestrator.bundles().resolve_bundles(&packages, engine);
    let details = json!({
        "engine": engine.as_str(),
        "packages": packages,
        "bundles": closure,
    });
    Ok((0, details))
}

fn cmd_cache_stats() -> Result<(i32, Value)> {
    let config = Config::from_env()?;
    let usage = compute_cache_usage(&config.cache.path)?;
    let details = json!({
        "cache": config.cache.path.display().to_string(),
        "cache_source": config.cache.source,
        "cache_exists": usage.exists,
        "total_entries": usage.total_entries,
        "total_size_bytes": usage.total_size_bytes,
    });
    Ok((0, details))
}

fn cmd_cache_prune() -> Result<(i32, Value)> {
    let config = Config::from_env()?;
    let walk = collect_cache_walk(&config.cache.path)?;
    let result = prune_cache_entries(&walk);
    let details = json!({
        "cache": config.cache.path.display().to_string(),
        "deleted_entries": result.deleted_entries,
        "deleted_size_bytes": result.deleted_size_bytes,
        "deleted_dirs": result.deleted_dirs,
        "errors": result.errors,
    });
    Ok((0, details))
}

fn cmd_reset() -> Result<(i32, Value)> {
    let config = Config::from_env()?;
    let store = Store::open(&config.cache.path)?;
    store.records().clear()?;
    let blobs = config.cache.path.join("blobs");
    let walk = collect_cache_walk(&blobs)?;
    let pruned = prune_cache_entries(&walk);
    let details = json!({
        "cache": config.cache.path.display().to_string(),
        "records_cleared": true,
        "blobs_deleted": pruned.deleted_entries,
    });
    Ok((0, details))
}

fn tail(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
