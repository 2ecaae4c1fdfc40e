use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use shared::domain::{Mode, RecordId};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wizard_core::{
    BlobStore, HttpRecordStore, InMemoryRecordStore, RecordStore, SqliteRecordStore,
    StepSequence, WizardController,
};

mod script;

/// Replays a scripted wizard session and prints one JSON line per action.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "create")]
    mode: Mode,
    /// Record to load in edit/view mode (or to use as a template in create mode).
    #[arg(long)]
    record_id: Option<String>,
    /// TOML step sequence; defaults to the contractor/employee tabs.
    #[arg(long)]
    steps: Option<PathBuf>,
    #[arg(long)]
    script: PathBuf,
    #[arg(long, conflicts_with = "database_url")]
    server_url: Option<String>,
    /// Local SQLite database used instead of a server.
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long, default_value = "contractor_employee")]
    collection: String,
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
    #[arg(long)]
    print_draft: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let steps = match &args.steps {
        Some(path) => StepSequence::load(path)
            .with_context(|| format!("failed to load steps from '{}'", path.display()))?,
        None => StepSequence::contractor_employee(),
    };
    let (records, blobs) = open_stores(&args).await?;
    let actions = script::load_script(&args.script)?;
    let base_dir = args
        .script
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let controller = WizardController::new_with_store(steps, records);
    controller
        .initialize(args.mode, args.record_id.clone().map(RecordId::from))
        .await
        .context("failed to initialize wizard session")?;

    let reports = script::run_script(&controller, blobs.as_ref(), actions, &base_dir).await?;
    for report in &reports {
        println!("{}", serde_json::to_string(report)?);
    }

    let mut summary = json!({
        "mode": controller.mode(),
        "active_step": controller.active_step(),
        "record_id": controller.record_id(),
        "completion": controller.completion(),
    });
    if args.print_draft {
        summary["draft"] = serde_json::to_value(controller.draft())?;
    }
    println!("{summary}");
    controller.dispose();
    Ok(())
}

async fn open_stores(args: &Args) -> Result<(Arc<dyn RecordStore>, Arc<dyn BlobStore>)> {
    if let Some(server_url) = &args.server_url {
        let store = Arc::new(
            HttpRecordStore::with_timeout(
                server_url,
                args.collection.clone(),
                Duration::from_secs(args.timeout_secs),
            )
            .with_context(|| format!("invalid server url '{server_url}'"))?,
        );
        info!(%server_url, collection = %args.collection, "using record server");
        return Ok(shared_store(store));
    }
    if let Some(database_url) = &args.database_url {
        let store = Arc::new(
            SqliteRecordStore::initialize(database_url, args.collection.clone())
                .await
                .with_context(|| format!("failed to open '{database_url}'"))?,
        );
        return Ok(shared_store(store));
    }
    info!("no backend given; running against an in-memory store");
    Ok(shared_store(Arc::new(InMemoryRecordStore::new())))
}

fn shared_store<S>(store: Arc<S>) -> (Arc<dyn RecordStore>, Arc<dyn BlobStore>)
where
    S: RecordStore + BlobStore + 'static,
{
    (store.clone(), store)
}
