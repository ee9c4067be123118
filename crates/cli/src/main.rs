use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::output;
use segcompare_core::config::{self, AppConfig};
use segcompare_core::pipeline::{self, PipelineMode};
use storage::ArtifactStore;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Extract { json } => run_pipeline(cfg, PipelineMode::Extract, json).await,
        Commands::Segment { json } => run_pipeline(cfg, PipelineMode::Segment, json).await,
        Commands::Match { json } => run_pipeline(cfg, PipelineMode::Match, json).await,
        Commands::Measure { json } => run_pipeline(cfg, PipelineMode::Measure, json).await,
        Commands::Report { json } => run_pipeline(cfg, PipelineMode::Report, json).await,
        Commands::All { json } => run_pipeline(cfg, PipelineMode::All, json).await,
        Commands::Inspect { artifact, json } => run_inspect(cfg, &artifact, json),
    }
}

#[derive(Parser)]
#[command(name = "segcompare")]
#[command(about = "Compare segmented areas between two videos of the same scene", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode both videos into timestamped frames
    Extract {
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Run (or collect) segmentation labels for both frame sets
    Segment {
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Pair labeled baseline frames with their nearest followup frames
    Match {
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Measure per-class polygon areas for the paired frames
    Measure {
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Write the area change report
    Report {
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Run every stage in order
    All {
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Print a stored stage artifact, e.g. `pairing` or `areas_baseline`
    Inspect {
        artifact: String,
        /// Print the whole envelope as JSON
        #[arg(long)]
        json: bool,
    },
}

async fn run_pipeline(cfg: AppConfig, mode: PipelineMode, json: bool) -> Result<()> {
    let label = output::mode_label(mode);
    info!(mode = label, "running pipeline");
    let summary = match pipeline::run_with_mode_summary(cfg, mode).await {
        Ok(summary) => summary,
        Err(e) => {
            error!(mode = label, "pipeline failed: {e:#}");
            return Err(e);
        }
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&output::summary_json(mode, &summary)?)?);
    } else {
        println!("{}", output::summary_text(mode, &summary));
    }
    Ok(())
}

fn run_inspect(cfg: AppConfig, artifact: &str, json: bool) -> Result<()> {
    let store = ArtifactStore::open(&cfg.artifacts.dir)?;
    println!("{}", output::inspect(&store, artifact, json)?);
    Ok(())
}
