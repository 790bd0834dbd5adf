//! VoxRay CLI
//!
//! Runs the ensemble prediction core from the command line: diagnose an image,
//! render a Grad-CAM overlay, inspect the label set or write a default config.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use voxray_serving::backend::backend_name;
use voxray_serving::explain::ExplanationOutcome;
use voxray_serving::inference::clinical::Condition;
use voxray_serving::utils::logging::{init_logging, timed, LogConfig};
use voxray_serving::utils::{format_percent, format_probability_bar};
use voxray_serving::{DiagnosisCode, DiagnosisReport, ModelServer, ServingConfig};

/// VoxRay ensemble X-ray diagnosis
///
/// Soft-vote ensemble prediction with optional Monte Carlo Dropout
/// uncertainty and Grad-CAM explanations, built on Burn.
#[derive(Parser, Debug)]
#[command(name = "voxray")]
#[command(version)]
#[command(about = "Ensemble X-ray diagnosis with uncertainty and Grad-CAM", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, default_value = "false")]
    quiet: bool,

    /// JSON serving config
    #[arg(short, long, global = true, env = "VOXRAY_CONFIG")]
    config: Option<PathBuf>,

    /// Ensemble member (repeatable); replaces the config's model list
    #[arg(short, long = "model", global = true, env = "VOXRAY_MODELS", value_delimiter = ',')]
    models: Vec<PathBuf>,

    /// Input resolution override
    #[arg(long, global = true)]
    image_size: Option<u32>,

    /// MC Dropout pass count override
    #[arg(long, global = true)]
    passes: Option<usize>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Diagnose an image and print the JSON report
    Predict {
        /// Path to the input image
        #[arg(short, long)]
        input: PathBuf,

        /// Run Monte Carlo Dropout (slower)
        #[arg(long, default_value = "false")]
        uncertainty: bool,
    },

    /// Render a Grad-CAM overlay for an image
    Explain {
        /// Path to the input image
        #[arg(short, long)]
        input: PathBuf,

        /// Class index to explain (defaults to the predicted class)
        #[arg(long = "class")]
        class_index: Option<usize>,

        /// Where to write the overlay PNG
        #[arg(short, long, default_value = "heatmap.png")]
        output: PathBuf,
    },

    /// Show the configured class labels
    Labels,

    /// Write a config file with default values
    InitConfig {
        /// Output path
        #[arg(short, long, default_value = "voxray.json")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::from_env()
    };

    if let Err(e) = init_logging(&log_config) {
        eprintln!("{} {}", "Warning:".yellow(), e);
    }

    let config = resolve_config(&cli)?;

    match &cli.command {
        Commands::Predict { input, uncertainty } => cmd_predict(&config, input, *uncertainty),
        Commands::Explain {
            input,
            class_index,
            output,
        } => cmd_explain(&config, input, *class_index, output),
        Commands::Labels => cmd_labels(&config),
        Commands::InitConfig { output } => cmd_init_config(&config, output),
    }
}

/// Config file (or defaults) with command-line overrides applied
fn resolve_config(cli: &Cli) -> Result<ServingConfig> {
    let mut config = match &cli.config {
        Some(path) => ServingConfig::from_file(path)
            .with_context(|| format!("Failed to read config {:?}", path))?,
        None => ServingConfig::default(),
    };

    if !cli.models.is_empty() {
        config.model_paths = cli.models.clone();
    }
    if let Some(size) = cli.image_size {
        config.image_size = size;
    }
    if let Some(passes) = cli.passes {
        config.mc_dropout_passes = passes;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn load_server(config: &ServingConfig) -> Result<ModelServer> {
    info!(
        "Loading {} model(s) on {}",
        config.model_paths.len(),
        backend_name()
    );
    let (server, elapsed) = timed("ensemble load", || ModelServer::load(config));
    let server = server.context("Failed to load the ensemble")?;

    eprintln!(
        "{} {} member(s) in {:.1} s",
        "Loaded".green().bold(),
        server.ensemble().len(),
        elapsed.as_secs_f64()
    );
    Ok(server)
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read image {:?}", path))
}

fn cmd_predict(config: &ServingConfig, input: &Path, uncertainty: bool) -> Result<()> {
    let server = load_server(config)?;
    let bytes = read_image(input)?;

    let report = server.predict_image(&bytes, uncertainty)?;
    print_summary(&report);

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Human-readable report on stderr, so stdout stays valid JSON
fn print_summary(report: &DiagnosisReport) {
    eprintln!();
    eprintln!(
        "{} {} ({})",
        "Diagnosis:".cyan().bold(),
        report.diagnosis.bold(),
        format_percent(report.confidence)
    );
    eprintln!(
        "  Ensemble: {} member(s), margin {}, entropy {:.4}",
        report.ensemble.model_count,
        format_percent(report.margin),
        report.entropy
    );
    if !report.ensemble.failed_members.is_empty() {
        eprintln!(
            "  {} {}",
            "Failed members:".yellow(),
            report.ensemble.failed_members.join(", ")
        );
    }
    for (label, p) in report.probabilities.iter() {
        eprintln!("  {:<22} {}", label, format_probability_bar(p, 30));
    }
    if let Some(u) = &report.uncertainty {
        eprintln!(
            "  MC Dropout: {} passes, entropy {:.4}",
            u.passes, u.entropy
        );
    }
    eprintln!("  {}", report.benchmark_comparison.italic());
    eprintln!();
}

fn cmd_explain(
    config: &ServingConfig,
    input: &Path,
    class_index: Option<usize>,
    output: &Path,
) -> Result<()> {
    let server = load_server(config)?;
    let bytes = read_image(input)?;

    match server.explain(&bytes, class_index)? {
        ExplanationOutcome::Ready(explanation) => {
            let png = STANDARD
                .decode(&explanation.heatmap_png_base64)
                .context("Overlay is not valid base64")?;
            if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(output, png)
                .with_context(|| format!("Failed to write {:?}", output))?;

            eprintln!(
                "{} class {} ({}) -> {:?}",
                "Explained".green().bold(),
                explanation.target_class,
                explanation.label.as_deref().unwrap_or("unlabelled"),
                output
            );
        }
        ExplanationOutcome::Unavailable { reason } => {
            eprintln!("{} {}", "Explanation unavailable:".yellow(), reason);
        }
    }
    Ok(())
}

fn cmd_labels(config: &ServingConfig) -> Result<()> {
    if config.class_labels.is_empty() {
        bail!("No class labels configured");
    }

    println!("{}", "Class labels (training order):".cyan().bold());
    for (index, label) in config.class_labels.iter().enumerate() {
        let code = DiagnosisCode::from_label(label);
        let benchmark = match Condition::for_diagnosis(&code) {
            Some(condition) => format!("benchmark: {:?}", condition),
            None => "no benchmark".dimmed().to_string(),
        };
        let known = if code.is_known() {
            "known".green()
        } else {
            "unknown".red()
        };
        println!("  {:>2}. {:<22} {:<8} {}", index, label, known, benchmark);
    }
    Ok(())
}

fn cmd_init_config(config: &ServingConfig, output: &Path) -> Result<()> {
    if output.exists() {
        bail!("{:?} already exists", output);
    }
    config.save(output)?;
    println!("{} {:?}", "Wrote config to".green(), output);
    Ok(())
}
