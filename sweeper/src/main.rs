use anyhow::Result;
#[cfg(feature = "verify")]
use anyhow::anyhow;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
#[cfg(any(feature = "sweep", feature = "verify"))]
use std::sync::Arc;
use std::time::Duration;
#[cfg(any(feature = "sweep", feature = "verify"))]
use sweeper_core::{run_stage, RunContext, RunStatus, RunSummary, StageSettings, Target, TargetKind};
#[cfg(any(feature = "sweep", feature = "verify"))]
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
#[cfg(feature = "models")]
mod inventory;

/// Exit code for a run that was interrupted after saving its checkpoint.
/// Rerunning the same command resumes it.
pub const EXIT_PAUSED: u8 = 75;

const RANGES_FILE: &str = "data.json";
const SWEEP_PORTS: &str = "11434";
const SWEEP_WORKERS: usize = 24;
const SWEEP_RETRIES: u32 = 2;
const SWEEP_RETRY_DELAY_MS: u64 = 500;
const SWEEP_TIMEOUT_MS: u64 = 2000;
const SWEEP_OUTPUT: &str = "sweep_results.csv";
const SWEEP_CHECKPOINT: &str = "sweep-state.json";

const VERIFY_WORKERS: usize = 8;
const VERIFY_TIMEOUT_MS: u64 = 5000;
const VERIFY_OUTPUT: &str = "ollama.csv";
const VERIFY_CHECKPOINT: &str = "ollama-state.json";

const MODELS_WORKERS: usize = 20;
const MODELS_TIMEOUT_MS: u64 = 5000;
const MODELS_JSON: &str = "ollama_hosts.json";
const MODELS_CSV: &str = "ollama_hosts.csv";
const MODELS_FILTERED: &str = "ollama_hosts_with_models.json";

const CHECKPOINT_EVERY: u64 = 10;
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Parser)]
#[command(name = "sweeper", version, about = "Resumable Ollama discovery: port sweep, service verification, model inventory")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./sweeper.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Stage 1: sweep the address ranges in data.json for open ports
    #[cfg(feature = "sweep")]
    Sweep,
    /// Stage 2: confirm an Ollama API behind every open port found by `sweep`
    #[cfg(feature = "verify")]
    Verify,
    /// List the models served by verified hosts
    #[cfg(feature = "models")]
    Models {
        /// Hosts file: one host per line, or a CSV such as ollama.csv
        #[arg(long)]
        hosts: Option<PathBuf>,
        /// Full JSON output
        #[arg(long)]
        output_json: Option<PathBuf>,
        /// CSV output
        #[arg(long)]
        output_csv: Option<PathBuf>,
        /// JSON with only the hosts that serve models
        #[arg(long)]
        output_filtered: Option<PathBuf>,
        /// HTTP timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Max concurrent requests
        #[arg(long)]
        workers: Option<usize>,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let cfg = config::load_config(cli.config.as_deref())?.unwrap_or_default();

    match cli.command {
        Commands::Version => {
            println!("sweeper {} (core {})", env!("CARGO_PKG_VERSION"), sweeper_core::version());
            Ok(ExitCode::SUCCESS)
        }
        #[cfg(feature = "sweep")]
        Commands::Sweep => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(sweep(cfg.sweep.unwrap_or_default()))
        }
        #[cfg(feature = "verify")]
        Commands::Verify => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(verify(cfg.verify.unwrap_or_default()))
        }
        #[cfg(feature = "models")]
        Commands::Models { hosts, output_json, output_csv, output_filtered, timeout_ms, workers } => {
            let mut m = cfg.models.unwrap_or_default();
            if hosts.is_some() { m.hosts = hosts; }
            if output_json.is_some() { m.output_json = output_json; }
            if output_csv.is_some() { m.output_csv = output_csv; }
            if output_filtered.is_some() { m.output_filtered = output_filtered; }
            if timeout_ms.is_some() { m.timeout_ms = timeout_ms; }
            if workers.is_some() { m.workers = workers; }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(models(m))
        }
    }
}

/// Ctrl-C stops dispatching; in-flight probes finish and the checkpoint is written.
#[cfg(any(feature = "sweep", feature = "verify"))]
fn cancel_on_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight probes and saving checkpoint");
            cancel.cancel();
        }
    });
}

#[cfg(any(feature = "sweep", feature = "verify"))]
fn finish(stage: &str, summary: &RunSummary, output: &std::path::Path) -> ExitCode {
    match summary.status {
        RunStatus::Completed => {
            info!(
                stage,
                completed = summary.completed,
                total = summary.total,
                found = summary.found_total,
                new = summary.found_this_run,
                output = %output.display(),
                "scan completed"
            );
            ExitCode::SUCCESS
        }
        RunStatus::Paused => {
            info!(
                stage,
                completed = summary.completed,
                total = summary.total,
                found = summary.found_total,
                "scan paused, progress saved; run the same command again to resume"
            );
            ExitCode::from(EXIT_PAUSED)
        }
    }
}

#[cfg(feature = "sweep")]
async fn sweep(c: config::SweepConfig) -> Result<ExitCode> {
    use port_scan::{parse_ports, PortSweepProbe, ProbeOptions};
    use sweeper_core::{expand, load_ranges, total_len};

    let ranges_path = c.ranges.unwrap_or_else(|| PathBuf::from(RANGES_FILE));
    let ranges = load_ranges(&ranges_path)?;
    let ports = parse_ports(c.ports.as_deref().unwrap_or(SWEEP_PORTS))?;
    let opts = ProbeOptions {
        timeout: Duration::from_millis(c.timeout_ms.unwrap_or(SWEEP_TIMEOUT_MS)),
        retries: c.retries.unwrap_or(SWEEP_RETRIES),
        retry_delay: Duration::from_millis(c.retry_delay_ms.unwrap_or(SWEEP_RETRY_DELAY_MS)),
    };
    let output = c.output.unwrap_or_else(|| PathBuf::from(SWEEP_OUTPUT));
    let ctx = RunContext::new(StageSettings {
        name: "sweep".into(),
        kind: TargetKind::Host,
        workers: c.workers.unwrap_or(SWEEP_WORKERS),
        checkpoint_path: c.checkpoint.unwrap_or_else(|| PathBuf::from(SWEEP_CHECKPOINT)),
        output_path: output.clone(),
        checkpoint_every: c.checkpoint_every.unwrap_or(CHECKPOINT_EVERY),
        progress_interval: PROGRESS_INTERVAL,
    });
    info!(ranges = ranges.len(), ports = ?ports, "loaded {}", ranges_path.display());
    cancel_on_interrupt(ctx.cancel.clone());

    let probe = Arc::new(PortSweepProbe::new(ports, opts));
    let summary = run_stage(&ctx, expand(&ranges).map(Target::host), total_len(&ranges), probe).await?;
    Ok(finish("sweep", &summary, &output))
}

#[cfg(feature = "verify")]
fn parse_schemes(names: &[String]) -> Result<Vec<service_check::Scheme>> {
    use service_check::Scheme;
    let schemes = names
        .iter()
        .map(|n| match n.to_ascii_lowercase().as_str() {
            "https" => Ok(Scheme::Https),
            "http" => Ok(Scheme::Http),
            other => Err(anyhow!("unknown scheme {:?} (expected http or https)", other)),
        })
        .collect::<Result<Vec<_>>>()?;
    if schemes.is_empty() {
        return Err(anyhow!("verify.schemes must not be empty"));
    }
    Ok(schemes)
}

#[cfg(feature = "verify")]
async fn verify(c: config::VerifyConfig) -> Result<ExitCode> {
    use service_check::{CheckOptions, OllamaProbe};
    use sweeper_core::load_service_targets;

    let input = c.input.unwrap_or_else(|| PathBuf::from(SWEEP_OUTPUT));
    let targets = load_service_targets(&input)?;
    let mut opts = CheckOptions { timeout_ms: c.timeout_ms.unwrap_or(VERIFY_TIMEOUT_MS), ..CheckOptions::default() };
    if let Some(names) = &c.schemes {
        opts.schemes = parse_schemes(names)?;
    }
    if let Some(lenient) = c.lenient {
        opts.lenient = lenient;
    }
    let output = c.output.unwrap_or_else(|| PathBuf::from(VERIFY_OUTPUT));
    let ctx = RunContext::new(StageSettings {
        name: "verify".into(),
        kind: TargetKind::Service,
        workers: c.workers.unwrap_or(VERIFY_WORKERS),
        checkpoint_path: c.checkpoint.unwrap_or_else(|| PathBuf::from(VERIFY_CHECKPOINT)),
        output_path: output.clone(),
        checkpoint_every: c.checkpoint_every.unwrap_or(CHECKPOINT_EVERY),
        progress_interval: PROGRESS_INTERVAL,
    });
    info!(targets = targets.len(), "loaded {}", input.display());
    cancel_on_interrupt(ctx.cancel.clone());

    let probe = Arc::new(OllamaProbe::new(&opts)?);
    let total = targets.len() as u64;
    let summary = run_stage(&ctx, targets.into_iter(), total, probe).await?;
    Ok(finish("verify", &summary, &output))
}

#[cfg(feature = "models")]
async fn models(c: config::ModelsConfig) -> Result<ExitCode> {
    use service_check::{build_client, list_models, CheckOptions};

    let hosts_path = c.hosts.unwrap_or_else(|| PathBuf::from(VERIFY_OUTPUT));
    let hosts = inventory::load_hosts(&hosts_path)?;
    let workers = c.workers.unwrap_or(MODELS_WORKERS);
    info!(hosts = hosts.len(), workers, "listing models");

    let opts = CheckOptions { timeout_ms: c.timeout_ms.unwrap_or(MODELS_TIMEOUT_MS), ..CheckOptions::default() };
    let reports = list_models(hosts, build_client(&opts)?, workers).await;

    let json = c.output_json.unwrap_or_else(|| PathBuf::from(MODELS_JSON));
    let csv = c.output_csv.unwrap_or_else(|| PathBuf::from(MODELS_CSV));
    let filtered = c.output_filtered.unwrap_or_else(|| PathBuf::from(MODELS_FILTERED));
    inventory::write_json(&json, &reports)?;
    inventory::write_csv(&csv, &reports)?;
    let with_models = inventory::write_filtered(&filtered, &reports)?;

    for r in &reports {
        match &r.error {
            None => info!(host = %r.host, models = r.models.len(), "{}", r.models.join(", ")),
            Some(e) => warn!(host = %r.host, error = %e, "no model list"),
        }
    }
    info!(hosts = reports.len(), with_models, json = %json.display(), csv = %csv.display(), "inventory written");
    Ok(ExitCode::SUCCESS)
}

#[cfg(all(test, any(feature = "sweep", feature = "verify")))]
mod tests {
    use super::*;
    use std::path::Path;

    fn summary(status: RunStatus, completed: u64) -> RunSummary {
        RunSummary { status, completed, total: 4, processed: completed, found_this_run: 1, found_total: 2 }
    }

    #[test]
    fn exit_codes_follow_run_status() {
        let out = Path::new("sweep_results.csv");
        assert_eq!(finish("sweep", &summary(RunStatus::Completed, 4), out), ExitCode::SUCCESS);
        assert_eq!(finish("sweep", &summary(RunStatus::Paused, 2), out), ExitCode::from(75));
        assert_eq!(EXIT_PAUSED, 75);
    }
}
