use anyhow::{Context, Result};
use arkia::{
    ArkiaConfig, ProcessingStep, ProgressModal, ProgressSource, RandomIncrement,
    ReportExporterBuilder, ReportSummary, StepStatus, format_clock, rows_from_json,
    summary_from_json,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "arkia",
    version = env!("CARGO_PKG_VERSION"),
    about = "Green-financing report export and processing progress simulation"
)]
struct Cli {
    /// Increase verbosity (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress log output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file merged over ./arkia.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the report table to a paged landscape PDF
    Export(ExportArgs),
    /// Run the processing progress simulation in the terminal
    Simulate(SimulateArgs),
    /// Print the merged configuration
    Config,
}

#[derive(Args)]
struct ExportArgs {
    /// JSON array of report rows; omitted means an empty table
    #[arg(long)]
    rows: Option<PathBuf>,

    /// JSON object with the summary counters
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Output file name (".pdf" is appended when missing)
    #[arg(long)]
    out: Option<String>,

    /// Output directory
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Output pixels per layout unit
    #[arg(long)]
    device_pixel_ratio: Option<f32>,
}

#[derive(Args)]
struct SimulateArgs {
    /// File name shown in the header
    #[arg(long, default_value = "digital-book.pdf")]
    file_name: String,

    /// File size in bytes
    #[arg(long, default_value_t = 0)]
    file_size: u64,

    /// Seed for reproducible increments
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);
    let config = ArkiaConfig::load_with_custom_config(cli.config.as_deref())
        .context("failed to load configuration")?;

    match cli.command {
        Commands::Export(args) => export(args, config).await,
        Commands::Simulate(args) => {
            simulate(args, config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config => {
            println!("{}", config.to_pretty_json()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        match verbose {
            0 => tracing_subscriber::EnvFilter::new("warn"),
            1 => tracing_subscriber::EnvFilter::new("info"),
            2 => tracing_subscriber::EnvFilter::new("debug"),
            _ => tracing_subscriber::EnvFilter::new("trace"),
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn export(args: ExportArgs, mut config: ArkiaConfig) -> Result<ExitCode> {
    if let Some(dir) = args.output_dir {
        config.export.output_dir = dir;
    }
    if let Some(ratio) = args.device_pixel_ratio {
        config.export.device_pixel_ratio = ratio;
    }
    let rows = match &args.rows {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read rows from {}", path.display()))?;
            rows_from_json(&raw)?
        }
        None => Vec::new(),
    };
    let summary = match &args.summary {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read summary from {}", path.display()))?;
            summary_from_json(&raw)?
        }
        None => ReportSummary::default(),
    };

    let exporter = ReportExporterBuilder::from_config(&config.export).build()?;
    // The exporter already alerted the user and logged the cause.
    let Ok(outcome) = exporter
        .export(&rows, &summary, args.out.as_deref())
        .await
    else {
        return Ok(ExitCode::FAILURE);
    };
    println!(
        "{} ({} page(s), {}x{} px, sha256 {})",
        outcome.path.display(),
        outcome.page_count,
        outcome.image_width_px,
        outcome.image_height_px,
        outcome.sha256
    );
    Ok(ExitCode::SUCCESS)
}

async fn simulate(args: SimulateArgs, config: ArkiaConfig) -> Result<()> {
    let progress = config.progress;
    let seed = args.seed.or(progress.seed);
    let max_increment = progress.max_increment;
    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();

    let mut modal = ProgressModal::new(args.file_name, args.file_size)
        .with_steps(progress.steps.clone())
        .with_settings(progress.simulator_settings())
        .with_source(move || -> Box<dyn ProgressSource> {
            match seed {
                Some(seed) => Box::new(RandomIncrement::seeded(seed, max_increment)),
                None => Box::new(RandomIncrement::new(max_increment)),
            }
        })
        .on_complete(move |result| {
            let _ = done_tx.send(result);
        });
    println!("{} ({})", modal.file_name, modal.file_size_label());
    modal.open();

    let Some(mut updates) = modal.subscribe() else {
        anyhow::bail!("progress simulation did not start");
    };
    loop {
        let snapshot = updates.borrow_and_update().clone();
        println!(
            "{:>5.1}%  {:<28} elapsed {}  remaining {}",
            snapshot.progress,
            active_label(&snapshot.steps),
            format_clock(snapshot.time_elapsed),
            format_clock(snapshot.estimated_remaining)
        );
        if !snapshot.running || updates.changed().await.is_err() {
            break;
        }
    }
    modal.close();
    drop(modal);

    let result = done_rx
        .recv()
        .await
        .context("simulation stopped before completion")?;
    println!("{} ({} sections)", result.message, result.sections_generated);
    Ok(())
}

fn active_label(steps: &[ProcessingStep]) -> &str {
    steps
        .iter()
        .find(|step| step.status == StepStatus::Active)
        .map(|step| step.label.as_str())
        .unwrap_or("done")
}
