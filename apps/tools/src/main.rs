use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use shared::domain::{Draft, RecordId};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/records.db")]
    database_url: String,
    #[arg(long, default_value = "contractor_employee")]
    collection: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints `id  updated_at  groups` for every record.
    List,
    Show {
        record_id: String,
    },
    /// Upserts a record from a JSON object file.
    Import {
        file: PathBuf,
        #[arg(long)]
        record_id: Option<String>,
    },
    Delete {
        record_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url)
        .await
        .with_context(|| format!("failed to open '{}'", cli.database_url))?;

    match cli.command {
        Command::List => {
            for record in storage.list_records(&cli.collection).await? {
                let groups: Vec<&str> = record.data.groups().collect();
                println!(
                    "{}\t{}\t{}",
                    record.id,
                    record.updated_at.to_rfc3339(),
                    groups.join(",")
                );
            }
        }
        Command::Show { record_id } => {
            let id = RecordId::from(record_id);
            let Some(record) = storage.find_record(&cli.collection, &id).await? else {
                bail!("record '{id}' not found in '{}'", cli.collection);
            };
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Import { file, record_id } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read '{}'", file.display()))?;
            let value: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("'{}' is not valid JSON", file.display()))?;
            let Some(data) = Draft::from_value(value) else {
                bail!("'{}' must contain a JSON object", file.display());
            };
            let id = record_id.map(RecordId::from);
            let record = storage
                .upsert_record(&cli.collection, id.as_ref(), &data)
                .await?;
            println!("imported record_id={}", record.id);
        }
        Command::Delete { record_id } => {
            let id = RecordId::from(record_id);
            if storage.delete_record(&cli.collection, &id).await? {
                println!("deleted record_id={id}");
            } else {
                bail!("record '{id}' not found in '{}'", cli.collection);
            }
        }
    }

    Ok(())
}
