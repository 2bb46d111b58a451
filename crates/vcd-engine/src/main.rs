//! Command line front end for the copy detection engine.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use tracing::{info, warn};
use url::Url;

use vcd_engine::{
    build_reference_database, init_tracing, CopyDetectionPipeline, DetectionRequest,
    EngineConfig, QuerySource, RunControl,
};
use vcd_models::media::format_size;
use vcd_models::{format_hhmmss, DetectedCopy, Preset};
use vcd_process::StatusSink;

#[derive(Parser, Debug)]
#[command(name = "vcd", version, about = "Video copy detection with the P-VCD tools")]
struct Cli {
    /// Data directory; takes precedence over VCD_DATA_DIR
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search a query for copies in reference databases
    #[command(group(ArgGroup::new("query").required(true).args(["file", "url", "query_db"])))]
    Detect {
        /// Local image or video file
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
        /// Media URL or page embedding a video
        #[arg(long)]
        url: Option<Url>,
        /// Existing query database directory
        #[arg(long, value_name = "DIR")]
        query_db: Option<PathBuf>,
        /// Reference database name; repeat for several (default: all)
        #[arg(short, long = "reference", value_name = "NAME")]
        references: Vec<String>,
        /// Option preset: global or local
        #[arg(long, default_value = "global")]
        preset: Preset,
        /// Print detections as JSON
        #[arg(long)]
        json: bool,
    },

    /// List reference databases
    Databases,

    /// Create a reference database from videos and directories
    CreateDb {
        name: String,
        #[arg(required = true, value_name = "PATH")]
        files: Vec<PathBuf>,
    },
}

/// Tool output and progress on stderr; results go to stdout.
struct ConsoleSink;

impl StatusSink for ConsoleSink {
    fn on_output_line(&self, line: &str) {
        eprintln!("{}", line);
    }

    fn on_progress(&self, phase: &str, fraction: f64) {
        eprintln!("[{:>5.1}%] {}", fraction * 100.0, phase);
    }

    fn on_terminal(&self, success: bool, detail: Option<&str>) {
        if !success {
            eprintln!("FAILED: {}", detail.unwrap_or("unknown error"));
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = EngineConfig::from_env_in(cli.data_dir);
    info!("Engine config: {:?}", config);

    let pipeline = CopyDetectionPipeline::from_config(config);
    let sink: Arc<dyn StatusSink> = Arc::new(ConsoleSink);

    match cli.command {
        Commands::Detect {
            file,
            url,
            query_db,
            references,
            preset,
            json,
        } => {
            let query = match (file, url, query_db) {
                (Some(file), _, _) => QuerySource::File(file),
                (_, Some(url), _) => QuerySource::Url(url),
                (_, _, Some(dir)) => QuerySource::Database(
                    pipeline
                        .registry()
                        .open(&dir)
                        .await
                        .with_context(|| format!("Failed to open query database {}", dir.display()))?,
                ),
                _ => anyhow::bail!("no query given"),
            };

            let references = if references.is_empty() {
                pipeline.registry().reference_databases().await?
            } else {
                let mut selected = Vec::with_capacity(references.len());
                for name in &references {
                    selected.push(pipeline.registry().reference_database(name).await?);
                }
                selected
            };

            let request = DetectionRequest::new(query, references).with_options(preset.options());
            let handle = pipeline.spawn(request, sink);
            info!(run_id = %handle.run_id(), "Detection started");
            cancel_on_ctrl_c(handle.control());

            let detections = handle.wait().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&detections)?);
            } else {
                print_detections(&detections);
            }
        }

        Commands::Databases => {
            for db in pipeline.registry().reference_databases().await? {
                println!(
                    "{}\t{} object(s)\t{}\t{}\t{}",
                    db.name(),
                    db.len(),
                    format_size(db.total_bytes()),
                    format_hhmmss(db.total_seconds()),
                    db.root_dir().display()
                );
            }
        }

        Commands::CreateDb { name, files } => {
            let control = Arc::new(RunControl::new());
            cancel_on_ctrl_c(control.clone());
            let runner = pipeline.stage_runner(sink, control);
            let db = build_reference_database(&name, &files, pipeline.registry(), &runner).await?;
            println!("{}\t{} object(s)", db.name(), db.len());
        }
    }

    Ok(())
}

fn cancel_on_ctrl_c(control: Arc<RunControl>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt, cancelling");
            control.cancel();
        }
    });
}

fn print_detections(detections: &[DetectedCopy]) {
    if detections.is_empty() {
        println!("No copies detected");
        return;
    }
    for (rank, copy) in detections.iter().enumerate() {
        println!(
            "{:>3}. {:.4}  {} {}-{}  ->  {} {}-{}  ({})",
            rank + 1,
            copy.score(),
            copy.query().filename(),
            copy.query_from_text(),
            copy.query_to_text(),
            copy.reference().filename(),
            copy.reference_from_text(),
            copy.reference_to_text(),
            copy.length_text()
        );
    }
}
