use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rmf_core::{ParishRecord, WeightConfig};
use rmf_rank::browse::{BrowseEvent, BrowseSession};
use rmf_rank::notes::JsonFileNoteStore;
use rmf_rank::format_detail_label;
use rmf_storage::DatasetStore;
use tracing::{debug, warn};

#[derive(Debug, Parser)]
#[command(name = "rmf-cli")]
#[command(about = "ReverentMass Finder command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Rebuild the parish dataset from the seed files.
    Sync {
        /// Print the run summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Serve the static page and JSON endpoints.
    Serve,
    /// Filter and rank parishes from the dataset.
    Rank {
        #[arg(long, short, default_value = "")]
        query: String,
        #[arg(long = "detail", short)]
        details: Vec<String>,
        #[arg(long, default_value_t = 3.0)]
        confession: f64,
        #[arg(long, default_value_t = 2.0)]
        adoration: f64,
        #[arg(long, default_value_t = 2.0)]
        review: f64,
        #[arg(long, env = "RMF_DATASET_PATH", default_value = "data/parishes.json")]
        dataset: PathBuf,
        #[arg(long, env = "RMF_NOTES_PATH", default_value = "data/user-notes.json")]
        notes: PathBuf,
        /// Print the ranked records as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Add a community note for a parish.
    Note {
        parish_id: String,
        #[arg(long, allow_negative_numbers = true)]
        rating: i64,
        #[arg(long)]
        comment: String,
        #[arg(long, env = "RMF_DATASET_PATH", default_value = "data/parishes.json")]
        dataset: PathBuf,
        #[arg(long, env = "RMF_NOTES_PATH", default_value = "data/user-notes.json")]
        notes: PathBuf,
    },
}

async fn load_dataset(path: PathBuf) -> Vec<ParishRecord> {
    match DatasetStore::new(path).read_json::<Vec<ParishRecord>>().await {
        Ok(parishes) => parishes,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "dataset unavailable; using built-in parishes");
            Vec::new()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync { json: false }) {
        Commands::Sync { json: true } => {
            let summary = rmf_sync::run_sync_once_from_env().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Sync { json: false } => {
            let summary = rmf_sync::run_sync_once_from_env().await?;
            println!(
                "sync complete: run_id={} diocesan={} places={:?} merged={} output={} sha256={}",
                summary.run_id,
                summary.diocesan_records,
                summary.places,
                summary.merged_records,
                summary.output_path,
                summary.dataset_sha256
            );
        }
        Commands::Serve => {
            rmf_web::serve_from_env().await?;
        }
        Commands::Rank {
            query,
            details,
            confession,
            adoration,
            review,
            dataset,
            notes,
            json,
        } => {
            let mut session = BrowseSession::new(JsonFileNoteStore::new(notes));
            session.dispatch(BrowseEvent::DatasetLoaded(load_dataset(dataset).await));
            session.dispatch(BrowseEvent::WeightsChanged(WeightConfig {
                confession,
                adoration,
                review,
            }));
            session.dispatch(BrowseEvent::DetailsChanged { query, details });

            let ranked = session.state().ranked();
            if json {
                let parishes: Vec<&ParishRecord> = ranked.iter().map(|r| &r.parish).collect();
                println!("{}", serde_json::to_string_pretty(&parishes)?);
            } else {
                println!("{}", session.state().summary());
                for entry in &ranked {
                    let labels = entry
                        .parish
                        .details
                        .iter()
                        .map(|d| format_detail_label(d))
                        .collect::<Vec<_>>()
                        .join(", ");
                    println!(
                        "{:>3}/100  {}  ({} {})  [{}]  {}",
                        entry.score,
                        entry.parish.name,
                        entry.parish.location,
                        entry.parish.zip,
                        labels,
                        entry.parish.source.as_str()
                    );
                }
            }
        }
        Commands::Note {
            parish_id,
            rating,
            comment,
            dataset,
            notes,
        } => {
            let mut session = BrowseSession::new(JsonFileNoteStore::new(notes));
            session.dispatch(BrowseEvent::DatasetLoaded(load_dataset(dataset).await));
            if session.submit_note(&parish_id, rating, &comment)? {
                println!("note recorded for {parish_id}");
            } else {
                debug!(%parish_id, rating, "note not recorded");
            }
        }
    }

    Ok(())
}
