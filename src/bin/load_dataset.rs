//! Creates the compensation database from a CSV file or the demo dataset.

use anyhow::{Context, Result};
use clap::Parser;
use payscope::store::{demo_records, CompRecord, Store};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "load_dataset")]
#[command(about = "Load compensation survey records into SQLite")]
struct Args {
    /// CSV with header: function,level,p10,p25,p50,p75,p90,emp_count
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Target SQLite database path
    #[arg(long, default_value = "compensation_data.db")]
    db: PathBuf,

    /// Delete an existing database first
    #[arg(long)]
    replace: bool,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if args.replace && args.db.exists() {
        std::fs::remove_file(&args.db)
            .with_context(|| format!("Failed to remove {}", args.db.display()))?;
        info!("Removed existing database {}", args.db.display());
    }

    let store = Store::new(&args.db);
    store.create_schema()?;

    let records = match &args.csv {
        Some(path) => read_csv(path)?,
        None => {
            info!("No CSV given, seeding the demo dataset");
            demo_records()
        }
    };

    let inserted = store.insert_records(&records)?;
    println!("Loaded {} records into {}", inserted, args.db.display());

    let snapshot = store.distinct_values_snapshot(&["job_function", "job_level"])?;
    for dimension in ["job_function", "job_level"] {
        if let Some(values) = snapshot.get(dimension) {
            println!("  {}: {} distinct values", dimension, values.len());
        }
    }
    Ok(())
}

fn read_csv(path: &PathBuf) -> Result<Vec<CompRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        let record: CompRecord = row.context("Malformed CSV row")?;
        records.push(record);
    }
    info!("Read {} records from {}", records.len(), path.display());
    Ok(records)
}
