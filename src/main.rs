use std::env;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};
use bench_front::cms::CmsPublisher;
use bench_front::config::{BenchConfig, generate_default_config};
use bench_front::observability::{RunSummary, log_report};
use bench_front::pipeline::{Orchestrator, RunOutcome, Stage, preview};
use bench_front::selector::{self, IndexSource, SeededSource, ThreadRngSource};
use bench_front::validation::validate_config;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::to_writer_pretty;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

fn main() -> Result<()> {
    let Cli { command, log_file } = Cli::parse();

    configure_tracing(log_file.as_deref())?;

    match command {
        Commands::Run {
            config,
            seed,
            dry_run,
            print_metrics,
            metrics_json,
            metrics_prometheus,
        } => {
            let options = RunOptions {
                seed,
                dry_run,
                print_metrics,
                metrics_json,
                metrics_prometheus,
            };
            run_command(&config, options)
        }
        Commands::Candidates { config } => candidates_command(&config),
        Commands::Validate { config } => validate_command(&config),
        Commands::Init { work_dir, output } => init_command(work_dir, output),
    }
}

fn configure_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
            .try_init()
            .map_err(|err| anyhow!(err.to_string()))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|err| anyhow!(err.to_string()))?;
    }

    Ok(())
}

struct RunOptions {
    seed: Option<u64>,
    dry_run: bool,
    print_metrics: bool,
    metrics_json: Option<PathBuf>,
    metrics_prometheus: Option<PathBuf>,
}

fn build_picker(seed: Option<u64>) -> Box<dyn IndexSource> {
    match seed {
        Some(seed) => {
            info!(seed, "Using seeded product selection");
            Box::new(SeededSource::new(seed))
        }
        None => Box::new(ThreadRngSource),
    }
}

fn run_command(config_path: &Path, options: RunOptions) -> Result<()> {
    let config = BenchConfig::load(config_path)?;
    let mut picker = build_picker(options.seed);

    if options.dry_run {
        let catalog = config.build_catalog();
        let query = config.catalog_query(Utc::now());
        let window = config.selection_window()?;
        let outcome = preview(catalog.as_ref(), &query, &window, picker.as_mut());
        for entry in outcome.stages.entries() {
            info!(stage = entry.stage.as_str(), duration_s = entry.seconds, "Stage metrics");
        }
        let product = outcome.result?;
        println!(
            "Would process {} ({:.2} MiB, {:.2}% cloud cover) out of {} eligible product(s)",
            product.title,
            product.size_bytes as f64 / (1024.0 * 1024.0),
            product.cloud_cover,
            outcome.eligible
        );
        return Ok(());
    }

    let validation = validate_config(&config);
    for warning in &validation.warnings {
        warn!(file = %config_path.display(), "{warning}");
    }
    if !validation.is_ok() {
        for error_msg in &validation.errors {
            error!(file = %config_path.display(), "{error_msg}");
        }
        bail!(
            "Config validation failed with {} error(s)",
            validation.errors.len()
        );
    }

    let pipeline_config = config.pipeline_config(Utc::now())?;
    let store = match config.build_store() {
        Ok(store) => store,
        Err(err) => {
            error!(stage = Stage::Upload.name(), error = %format!("{err:#}"), "Run failed");
            let cleanup = pipeline_config.cleanup.run();
            info!(
                removed = cleanup.removed.len(),
                warnings = cleanup.warnings.len(),
                "Cleanup finished"
            );
            return Err(err.context(format!("Run failed at stage {}", Stage::Upload)));
        }
    };
    let mut orchestrator = Orchestrator::new(
        pipeline_config,
        config.build_catalog(),
        Box::new(config.build_converter()),
        store,
        picker,
    );
    if let Some(cms) = config.cms_settings() {
        orchestrator = orchestrator.with_cms(CmsPublisher::new(cms));
    }

    let report = orchestrator.run();
    info!("END_PROCESSING");

    let summary = RunSummary::from_report(&report);
    if options.print_metrics {
        log_report(&report);
    }
    if let Some(path) = options.metrics_json {
        ensure_parent(&path)?;
        let file = File::create(&path)
            .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
        to_writer_pretty(file, &summary)
            .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
        info!(metrics = %path.display(), "Metrics JSON written");
    }
    if let Some(path) = options.metrics_prometheus {
        ensure_parent(&path)?;
        fs::write(&path, summary.to_prometheus()).with_context(|| {
            format!("Failed to write Prometheus metrics: {}", path.display())
        })?;
        info!(metrics = %path.display(), "Prometheus metrics written");
    }

    match &report.outcome {
        RunOutcome::Success {
            artifact_url,
            total,
            ..
        } => {
            println!(
                "Published {} in {:.2}s",
                artifact_url,
                total.as_secs_f64()
            );
            Ok(())
        }
        RunOutcome::Failed { stage, error } => {
            bail!("Run failed at stage {stage}: {error}")
        }
    }
}

fn candidates_command(config_path: &Path) -> Result<()> {
    let config = BenchConfig::load(config_path)?;
    let catalog = config.build_catalog();
    let window = config.selection_window()?;
    let candidates = catalog.search(&config.catalog_query(Utc::now()))?;

    let eligible = selector::eligible(&candidates, &window);
    println!(
        "{} candidate(s), {} within [{}, {}] bytes:",
        candidates.len(),
        eligible.len(),
        window.min_size(),
        window.max_size()
    );
    for product in &candidates {
        let marker = if window.contains(product.size_bytes) {
            '*'
        } else {
            ' '
        };
        println!(
            "{marker} {}  {:>9.2} MiB  {:>6.2}%  {}",
            product.title,
            product.size_bytes as f64 / (1024.0 * 1024.0),
            product.cloud_cover,
            product.start_date.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn validate_command(config_path: &Path) -> Result<()> {
    let config = BenchConfig::load(config_path)?;
    let report = validate_config(&config);

    for warning in &report.warnings {
        warn!(file = %config_path.display(), "{warning}");
    }

    if report.is_ok() {
        info!(file = %config_path.display(), "Config validation passed");
        Ok(())
    } else {
        for error_msg in &report.errors {
            error!(file = %config_path.display(), "{error_msg}");
        }
        Err(anyhow!(
            "Config validation failed with {} error(s)",
            report.errors.len()
        ))
    }
}

fn init_command(work_dir: Option<PathBuf>, output: PathBuf) -> Result<()> {
    let work_dir = match work_dir {
        Some(dir) => dir,
        None => env::var("HOME")
            .map(|home| PathBuf::from(home).join("bench-front"))
            .context("HOME is not set; pass --work-dir")?,
    };
    let generated = generate_default_config(&work_dir, &output)?;
    info!(
        work_dir = %work_dir.display(),
        path = %generated.display(),
        "Default config generated"
    );
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create metrics directory: {}", parent.display())
        })?;
    }
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "bench-front",
    version,
    about = "Satellite scene benchmark: query, convert, publish, time"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Append logs to this file instead of stdout.
    #[arg(long = "log-file", global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline once.
    Run {
        #[arg(long)]
        config: PathBuf,
        /// Seed the product draw for a reproducible selection.
        #[arg(long)]
        seed: Option<u64>,
        /// Query and select only.
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        print_metrics: bool,
        #[arg(long = "metrics-json")]
        metrics_json: Option<PathBuf>,
        #[arg(long = "metrics-prometheus")]
        metrics_prometheus: Option<PathBuf>,
    },
    /// List catalog candidates and mark the ones inside the size window.
    Candidates {
        #[arg(long)]
        config: PathBuf,
    },
    Validate {
        #[arg(long)]
        config: PathBuf,
    },
    /// Write a config with the default deployment settings.
    Init {
        #[arg(long = "work-dir")]
        work_dir: Option<PathBuf>,
        #[arg(long, default_value = "bench-front.yaml")]
        output: PathBuf,
    },
}
