//! NBAR Classifier - QoS classification for NBAR protocol lists
//!
//! Reads protocol names (one per line), resolves each one through the cache,
//! the rule engine and the configured AI providers, and prints the result as
//! a text report or as Cisco configuration.
//!
//! # Usage
//!
//! ```bash
//! # Text report
//! nbar-classifier --input-file protocols.txt
//!
//! # Cisco class-maps and ingress policy
//! nbar-classifier --input-file protocols.txt --output cisco > qos.cfg
//!
//! # Custom config, no cache
//! nbar-classifier --config ./classifier.toml --input-file protocols.txt --no-cache
//!
//! # Verbose logging
//! RUST_LOG=debug nbar-classifier --input-file protocols.txt
//! ```
//!
//! Without `--input-file` the list is read from stdin. Ctrl-C cancels the
//! run; the cache is still saved.

mod input;
mod output;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use classifier_core::qos::{class_statistics, source_statistics};
use classifier_core::{config, Classification, ConfigOverrides, Orchestrator, QosClass};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Output format
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Numbered protocol lists per class
    Text,
    /// Cisco class-maps and ingress policy-map
    Cisco,
}

/// NBAR Classifier - Classify NBAR protocols into QoS classes
#[derive(Parser, Debug)]
#[command(name = "nbar-classifier")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "NBAR_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Protocol list, one name per line (stdin when omitted)
    #[arg(short = 'i', long, value_name = "FILE")]
    input_file: Option<PathBuf>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Protocols per AI request (overrides config)
    #[arg(short = 'b', long, value_name = "N")]
    batch_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "NBAR_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Neither read nor write the classification cache
    #[arg(long)]
    no_cache: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(batch_size) = self.batch_size {
            overrides = overrides.with_batch_size(batch_size);
        }
        if self.no_cache {
            overrides = overrides.with_cache_enabled(false);
        }
        overrides
    }
}

/// Initialize logging with the specified level
///
/// Logs go to stderr so rendered output on stdout stays clean.
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "nbar_classifier={level},classifier_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

/// Read the protocol list from a file, or stdin
async fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read protocol list: {}", path.display())),
        None => {
            let mut contents = String::new();
            tokio::io::stdin()
                .read_to_string(&mut contents)
                .await
                .context("Failed to read protocol list from stdin")?;
            Ok(contents)
        }
    }
}

fn log_statistics(classifications: &HashMap<String, Classification>) {
    let classes = class_statistics(classifications);
    let count = |class: QosClass| classes.get(&class).copied().unwrap_or(0);
    info!(
        total_protocols = classifications.len(),
        ef_count = count(QosClass::EF),
        af41_count = count(QosClass::AF41),
        af21_count = count(QosClass::AF21),
        cs1_count = count(QosClass::CS1),
        "Classification statistics"
    );

    for (source, n) in source_statistics(classifications) {
        info!(source = source.as_str(), count = n, "Classifications by source");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;
    info!(version = env!("CARGO_PKG_VERSION"), "NBAR classifier starting");

    let config_path = args.config.clone().or_else(config::default_config_path);
    let mut config =
        config::load_config_from_path(config_path).context("Failed to load configuration")?;
    let overrides = args.overrides();
    if !overrides.is_empty() {
        overrides
            .apply(&mut config)
            .context("Invalid command-line option")?;
    }
    info!(
        source = %config.source(),
        provider = %config.ai.provider,
        batch_size = config.app.batch_size,
        cache_enabled = config.cache.enabled,
        "Configuration loaded"
    );

    let contents = read_input(args.input_file.as_deref()).await?;
    let protocols = input::parse_protocol_list(&contents);
    info!(count = protocols.len(), "Protocols to classify");

    let orchestrator = Orchestrator::from_config(&config)
        .await
        .context("Failed to initialize classification pipeline")?;
    for status in orchestrator.provider_statuses() {
        info!(
            provider = %status.name,
            available = status.available,
            is_fallback = status.is_fallback,
            circuit = ?status.circuit_state,
            "Provider configured"
        );
    }

    let cancel = CancellationToken::new();
    let signal_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, cancelling");
                cancel.cancel();
            }
        })
    };

    let resolution = orchestrator.resolve(&protocols, &cancel).await;
    for error in &resolution.errors {
        warn!(error = %error, "Classification error");
    }

    if cancel.is_cancelled() {
        signal_task.abort();
        if let Err(e) = orchestrator.shutdown().await {
            warn!(error = %e, "Failed to save cache");
        }
        anyhow::bail!("Classification cancelled");
    }

    let classifications = orchestrator.apply_defaults(resolution);
    log_statistics(&classifications);

    let rendered = match args.output {
        OutputFormat::Text => {
            output::render_text(&classifications, chrono::Local::now().date_naive())
        }
        OutputFormat::Cisco => output::render_cisco(&classifications),
    }
    .context("Failed to render output")?;
    print!("{rendered}");

    signal_task.abort();
    match orchestrator.shutdown().await {
        Ok(saved) => info!(entries = saved, "Shutdown complete"),
        Err(e) => warn!(error = %e, "Failed to save cache"),
    }

    Ok(())
}
