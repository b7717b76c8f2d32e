use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Notify;
use tracing::{error, info};

use ocrqueue::config::{config_from_env, default_config_path};
use ocrqueue::telemetry::init_logging;
use ocrqueue::{load_config, App, Config, JobState, OcrMode, OcrQueueError};

#[derive(Parser, Debug)]
#[command(name = "ocrqueue")]
#[command(version)]
#[command(about = "Persistent OCR job queue")]
struct Cli {
    /// Path to a JSON config file (default: ~/.ocrqueue/config.json if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the job database path
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the worker pool until interrupted
    Serve,
    /// Queue a PDF or image for recognition
    Submit {
        path: PathBuf,
        /// text, table or auto (default from config)
        #[arg(short, long)]
        mode: Option<OcrMode>,
    },
    /// Show the state of a job
    Status { id: String },
    /// Print the result of a completed job
    Result {
        id: String,
        /// Print only the concatenated markdown
        #[arg(long)]
        markdown: bool,
    },
    /// List jobs, newest first
    List {
        /// queued, processing, completed or failed
        #[arg(short, long)]
        state: Option<JobState>,
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 20)]
        page_size: i64,
    },
    /// Delete a job and its stored file
    Delete { id: String },
    /// Report queue depth and database location
    Health,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn resolve_config(cli: &Cli) -> Result<Config, OcrQueueError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => load_config(path)?,
            None => config_from_env()?,
        },
    };
    if let Some(db) = &cli.db {
        config.database_path = Some(db.clone());
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), OcrQueueError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<(), OcrQueueError> {
    let config = resolve_config(&cli)?;
    init_logging(&config.log_level, config.log_json)?;

    let app = App::open(config)?;
    let service = app.service();

    match cli.command {
        Command::Serve => serve(&app).await?,
        Command::Submit { path, mode } => {
            let id = service.submit_file(&path, mode)?;
            print_json(&json!({ "id": id }))?;
        }
        Command::Status { id } => print_json(&service.status(&id)?)?,
        Command::Result { id, markdown } => {
            let output = service.result(&id)?;
            if markdown {
                println!("{}", output.markdown);
            } else {
                print_json(&output)?;
            }
        }
        Command::List {
            state,
            page,
            page_size,
        } => print_json(&service.list(state, page, page_size)?)?,
        Command::Delete { id } => {
            service.delete(&id)?;
            print_json(&json!({ "deleted": id }))?;
        }
        Command::Health => print_json(&service.health(None)?)?,
    }

    Ok(())
}

async fn serve(app: &App) -> Result<(), OcrQueueError> {
    let pool = app.start_pool().await?;

    let interrupted = Arc::new(Notify::new());
    let notify = Arc::clone(&interrupted);
    if let Err(e) = ctrlc::set_handler(move || notify.notify_one()) {
        error!("Failed to install Ctrl-C handler: {}", e);
    }

    info!(
        workers = pool.worker_count(),
        queued = app.service().queue_depth()?,
        "Serving, press Ctrl-C to stop"
    );
    interrupted.notified().await;

    info!("Interrupted, finishing in-flight jobs");
    pool.wait().await;
    Ok(())
}
