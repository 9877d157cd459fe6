// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Argus: AI file analysis with a content-addressed result cache
//!
//! Analyzes files with Gemini or a local Ollama model, caches results per
//! content and model, and optionally renames, tags and annotates the files.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

use argus::analyzer::{build_analyzer, OllamaAnalyzer};
use argus::batch::{stop_signal, tasks_for, BatchCoordinator, BatchReport, FileOutcome, StopHandle};
use argus::cache::ResultCache;
use argus::collect::collect_files;
use argus::config::{default_config_path, Backend};
use argus::{AppConfig, ArgusError, Result};

/// Argus CLI - AI file analysis and organization
#[derive(Parser, Debug)]
#[command(name = "argus")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "AI-powered file analysis with a persistent result cache", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a file or every file in a directory
    Process {
        /// File or directory to process
        path: PathBuf,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// Rename files to the suggested name
        #[arg(long)]
        rename: bool,

        /// Show what would happen without touching files
        #[arg(long)]
        dry_run: bool,

        /// Do not embed metadata into files
        #[arg(long)]
        no_embed: bool,

        /// Do not write JSON sidecar files
        #[arg(long)]
        no_sidecar: bool,

        /// Use the local Ollama backend
        #[arg(long)]
        local: bool,

        /// Model to use with the selected backend
        #[arg(short, long)]
        model: Option<String>,

        /// Number of concurrent workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Seconds each worker pauses after a file
        #[arg(long)]
        rate_limit: Option<f64>,

        /// Bypass the analysis cache
        #[arg(long)]
        no_cache: bool,

        /// Directory for the results file
        #[arg(long, default_value = ".")]
        results_dir: PathBuf,
    },

    /// Analysis cache operations
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show AI engine and cache status
    Status,
}

#[derive(Subcommand, Debug)]
enum CacheCommands {
    /// Show cache statistics
    Stats,

    /// Remove entries older than the configured TTL
    Sweep,

    /// Remove all entries
    Clear {
        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path (.json or .toml)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Overrides `process` applies on top of the loaded configuration
#[derive(Debug, Default)]
struct ProcessArgs {
    recursive: bool,
    rename: bool,
    dry_run: bool,
    no_embed: bool,
    no_sidecar: bool,
    local: bool,
    model: Option<String>,
    workers: Option<usize>,
    rate_limit: Option<f64>,
    no_cache: bool,
    results_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = AppConfig::load(&config_path)?;

    match cli.command {
        Commands::Process {
            path,
            recursive,
            rename,
            dry_run,
            no_embed,
            no_sidecar,
            local,
            model,
            workers,
            rate_limit,
            no_cache,
            results_dir,
        } => {
            let args = ProcessArgs {
                recursive,
                rename,
                dry_run,
                no_embed,
                no_sidecar,
                local,
                model,
                workers,
                rate_limit,
                no_cache,
                results_dir,
            };
            run_process(config, &path, args, &cli.format).await
        }
        Commands::Cache { action } => run_cache_command(config, action, &cli.format),
        Commands::Config { action } => run_config_command(config, action, &config_path),
        Commands::Status => run_status(config).await,
    }
}

/// Apply command line overrides and re-check the result
fn apply_overrides(mut config: AppConfig, args: &ProcessArgs) -> Result<AppConfig> {
    if args.local {
        config.engine.backend = Backend::Ollama;
    }
    if let Some(model) = &args.model {
        config.set_active_model(model);
    }
    if let Some(workers) = args.workers {
        config.processing.max_workers = workers;
    }
    if let Some(delay) = args.rate_limit {
        config.processing.rate_limit_delay_secs = delay;
    }
    if args.no_cache {
        config.cache.enabled = false;
    }

    config.features.rename_files |= args.rename;
    config.features.dry_run |= args.dry_run;
    if args.no_embed {
        config.features.embed_metadata = false;
    }
    if args.no_sidecar {
        config.features.create_json_sidecar = false;
    }

    config.validate()?;
    Ok(config)
}

/// Run a batch over a file or directory
async fn run_process(config: AppConfig, path: &Path, args: ProcessArgs, format: &str) -> Result<()> {
    let config = apply_overrides(config, &args)?;
    let options = config.task_options();

    let files = collect_files(path, args.recursive)?;
    if files.is_empty() {
        warn!("No files to process in {:?}", path);
        return Ok(());
    }

    info!(
        "Processing {} files with {} ({})",
        files.len(),
        config.active_model(),
        if config.engine.backend == Backend::Ollama { "local" } else { "cloud" }
    );
    if options.dry_run {
        warn!("DRY RUN MODE - files will not be modified");
    }

    let analyzer = build_analyzer(&config)?;
    let cache = if config.cache.enabled {
        let cache = ResultCache::open(&config.cache.path, config.processing.max_workers)?;
        sweep(&cache, config.cache_ttl());
        Some(cache)
    } else {
        None
    };

    let (handle, stop) = stop_signal();
    spawn_stop_on_signal(handle);

    let coordinator = BatchCoordinator::new(analyzer, cache.clone()).with_stop_signal(stop);
    let report = coordinator
        .run(tasks_for(files, options), config.batch_settings()?)
        .await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, options.dry_run);
    }

    if !options.dry_run {
        let saved = report.save(&args.results_dir)?;
        info!("Results saved to {:?}", saved);
    }

    if let Some(cache) = cache {
        sweep(&cache, config.cache_ttl());
        cache.close()?;
    }

    Ok(())
}

fn sweep(cache: &ResultCache, ttl: Duration) {
    match cache.sweep_expired(ttl) {
        Ok(0) => {}
        Ok(n) => info!("Removed {} expired cache entries", n),
        Err(e) => warn!("Cache sweep failed: {}", e),
    }
}

/// Stop starting new files on Ctrl+C or SIGTERM
fn spawn_stop_on_signal(handle: StopHandle) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Cannot listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, finishing files in progress..."),
            _ = terminate => info!("Received SIGTERM, finishing files in progress..."),
        }

        handle.stop();
    });
}

fn outcome_line(outcome: &FileOutcome) -> String {
    let name = outcome.path.display();
    if !outcome.success {
        return format!("✗ {}: {}", name, outcome.error.as_deref().unwrap_or("failed"));
    }

    let mut line = match &outcome.result {
        Some(r) => format!("✓ {}: {} [{}]", name, r.title, r.category),
        None => format!("✓ {}", name),
    };
    if let Some(to) = &outcome.final_path {
        line.push_str(&format!(" → {}", to.display()));
    }
    if outcome.cache_hit {
        line.push_str(" (cached)");
    }
    if outcome.degraded {
        line.push_str(" (degraded)");
    }
    for w in &outcome.warnings {
        line.push_str(&format!("\n    warning: {}", w));
    }
    line
}

fn print_report(report: &BatchReport, dry_run: bool) {
    for outcome in &report.outcomes {
        println!("{}", outcome_line(outcome));
    }

    println!();
    println!("Processed {} files in {:.1}s", report.total(), report.elapsed_secs);
    println!("  Succeeded: {}", report.succeeded());
    println!("  Degraded:  {}", report.degraded());
    println!("  Failed:    {}", report.failed());
    println!("  Cached:    {}", report.cache_hits());
    if dry_run {
        println!("\nDry run: no files were changed");
    }
}

/// Run cache commands
fn run_cache_command(config: AppConfig, action: CacheCommands, format: &str) -> Result<()> {
    let cache = ResultCache::open(&config.cache.path, 1)?;

    match action {
        CacheCommands::Stats => {
            let stats = cache.stats()?;
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Cache ({}):", config.cache.path.display());
                println!("  Entries: {}", stats.entries);
                for (analyzer, count) in &stats.by_analyzer {
                    println!("    {}: {}", analyzer, count);
                }
                if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
                    println!("  Oldest: {}", oldest.format("%Y-%m-%d %H:%M"));
                    println!("  Newest: {}", newest.format("%Y-%m-%d %H:%M"));
                }
                println!("  TTL: {} days", config.cache.ttl_days);
            }
        }
        CacheCommands::Sweep => {
            let removed = cache.sweep_expired(config.cache_ttl())?;
            println!("Removed {} expired entries", removed);
        }
        CacheCommands::Clear { force } => {
            if !force {
                eprintln!("Use --force to confirm clearing the cache");
                return Ok(());
            }
            let removed = cache.clear()?;
            println!("Cleared {} entries", removed);
        }
    }

    cache.close()
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let mut shown = config;
            if shown.engine.api_key.is_some() {
                shown.engine.api_key = Some("********".to_string());
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        ConfigCommands::Generate { output, force } => {
            let output = output.unwrap_or_else(|| config_path.to_path_buf());
            if output.exists() && !force {
                return Err(ArgusError::Config(format!(
                    "{} already exists. Use --force to overwrite",
                    output.display()
                )));
            }
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
    }

    Ok(())
}

/// Run status check
async fn run_status(config: AppConfig) -> Result<()> {
    println!("Argus v{} Status", env!("CARGO_PKG_VERSION"));
    println!("==================");

    match config.engine.backend {
        Backend::Ollama => {
            let client = OllamaAnalyzer::new(
                &config.engine.ollama_url,
                &config.engine.ollama_model,
                config.engine.timeout_secs,
                config.schema.allowed_categories.clone(),
            )?;
            match client.health_check().await {
                Ok(()) => println!("Ollama ({}): Running", config.engine.ollama_url),
                Err(e) => println!("Ollama ({}): Error - {}", config.engine.ollama_url, e),
            }
            match client.list_models().await {
                Ok(models) => {
                    println!("\nAvailable models:");
                    for m in &models {
                        let marker = if m.starts_with(config.engine.ollama_model.as_str()) { "→" } else { " " };
                        println!("  {} {}", marker, m);
                    }
                }
                Err(e) => println!("  Error listing models: {}", e),
            }
        }
        Backend::Gemini => {
            let key = if config.engine.api_key.is_some() { "configured" } else { "missing" };
            println!("Gemini: model {}, API key {}", config.engine.gemini_model, key);
        }
    }

    if config.cache.enabled && config.cache.path.exists() {
        let cache = ResultCache::open(&config.cache.path, 1)?;
        let stats = cache.stats()?;
        println!("\nCache ({}):", config.cache.path.display());
        println!("  Entries: {}", stats.entries);
        cache.close()?;
    } else if !config.cache.enabled {
        println!("\nCache: disabled");
    } else {
        println!("\nCache: empty");
    }

    println!("\nConfiguration:");
    println!("  Workers: {}", config.processing.max_workers);
    println!("  Rate limit: {}s", config.processing.rate_limit_delay_secs);
    println!("  Rename: {}", config.features.rename_files);

    Ok(())
}
