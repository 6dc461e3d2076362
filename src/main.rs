use anyhow::Result;
use clap::Parser;
use payscope::config::Config;
use payscope::format::{render_table, render_validation, Exporter};
use payscope::pipeline::{CoreResponse, QueryAnswer, QueryPipeline};
use payscope::resolver::ResolvedEntity;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "payscope")]
#[command(about = "Ask questions about the compensation dataset, with validated results")]
struct Args {
    /// One-shot question; omit to start the interactive prompt
    question: Option<String>,

    /// Path to the SQLite compensation database
    #[arg(long)]
    db: Option<PathBuf>,

    /// Directory scanned for workspace tool scripts
    #[arg(long)]
    tools_dir: Option<PathBuf>,

    /// Directory for CSV/JSON/report exports
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Cap on returned records (truncation is always disclosed)
    #[arg(long)]
    limit: Option<u32>,

    /// Export each answer: csv, json, or report
    #[arg(long)]
    export: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(db) = args.db {
        config.db_path = db;
    }
    if let Some(tools_dir) = args.tools_dir {
        config.tools_dir = tools_dir;
    }
    if let Some(export_dir) = args.export_dir {
        config.export_dir = export_dir;
    }

    info!("Using database {}", config.db_path.display());
    let mut pipeline = QueryPipeline::new(&config)?;
    let exporter = Exporter::new(&config.export_dir);

    match args.question {
        Some(question) => {
            ask(&pipeline, &exporter, &question, args.limit, args.export.as_deref()).await?;
        }
        None => {
            repl(
                &mut pipeline,
                &exporter,
                &config.export_dir,
                args.limit,
                args.export.as_deref(),
            )
            .await?;
        }
    }
    Ok(())
}

async fn repl(
    pipeline: &mut QueryPipeline,
    exporter: &Exporter,
    export_dir: &std::path::Path,
    limit: Option<u32>,
    export: Option<&str>,
) -> Result<()> {
    println!("payscope interactive prompt. Ask a question, or :help for commands.");
    let stdin = io::stdin();
    loop {
        print!("payscope> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            ":quit" | ":q" | "exit" => break,
            ":help" => print_help(),
            ":audit" => print_audit(pipeline),
            ":export-audit" => match pipeline.audit().export_json(export_dir) {
                Ok(path) => println!("Audit trail written to {}", path.display()),
                Err(e) => println!("Audit export failed: {}", e),
            },
            ":refresh" => match pipeline.refresh() {
                Ok(()) => println!("Catalog and tool inventory refreshed."),
                Err(e) => println!("Refresh failed: {}", e),
            },
            ":values" => print_values(pipeline),
            question => {
                if let Err(e) = ask(pipeline, exporter, question, limit, export).await {
                    println!("Error: {}", e);
                }
            }
        }
    }
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  :values        list the known dimension values");
    println!("  :audit         per-stage audit event counts");
    println!("  :export-audit  write the audit trail to exports/");
    println!("  :refresh       reload dimension values and rescan tools");
    println!("  :quit          leave the prompt");
    println!("Anything else is treated as a question.");
}

fn print_audit(pipeline: &QueryPipeline) {
    let summary = pipeline.audit().summary();
    if summary.is_empty() {
        println!("No audit events yet.");
        return;
    }
    for (stage, count) in summary {
        println!("{:>12}  {}", stage, count);
    }
}

fn print_values(pipeline: &QueryPipeline) {
    let snapshot = pipeline.catalog().snapshot();
    for dimension in payscope::catalog::dimension_names() {
        let mut values: Vec<&String> = snapshot.values(dimension).iter().collect();
        if dimension == "job_level" {
            values.sort_by(|a, b| {
                payscope::levels::level_rank(a)
                    .cmp(&payscope::levels::level_rank(b))
                    .then_with(|| a.cmp(b))
            });
        }
        println!("{} ({} values):", dimension, values.len());
        for value in values {
            println!("  {}", value);
        }
    }
}

async fn ask(
    pipeline: &QueryPipeline,
    exporter: &Exporter,
    question: &str,
    limit: Option<u32>,
    export: Option<&str>,
) -> Result<()> {
    let response = pipeline.process_with_limit(question, limit).await?;
    match response {
        CoreResponse::Answer(answer) => {
            print_answer(&answer);
            export_answer(exporter, question, &answer, export)?;
        }
        CoreResponse::NeedsConfirmation { resolved, pending, .. } => {
            confirm_and_retry(pipeline, exporter, question, resolved, pending, export).await?;
        }
    }
    Ok(())
}

/// A fuzzy resolution never becomes a filter without an explicit yes. The
/// already-exact entities are kept and retried together with the confirmed
/// ones.
async fn confirm_and_retry(
    pipeline: &QueryPipeline,
    exporter: &Exporter,
    question: &str,
    resolved: Vec<ResolvedEntity>,
    pending: Vec<ResolvedEntity>,
    export: Option<&str>,
) -> Result<()> {
    println!("No exact match for:");
    for entity in &pending {
        let candidates: Vec<String> = entity
            .candidates
            .iter()
            .map(|c| format!("{} ({:.0}%)", c.value, c.similarity * 100.0))
            .collect();
        println!(
            "  '{}' in {} -> {}",
            entity.raw_text,
            entity.dimension,
            candidates.join(", ")
        );
    }
    let tops: Vec<String> = pending
        .iter()
        .filter_map(|e| e.candidates.first().map(|c| c.value.clone()))
        .collect();
    print!("Use {}? [y/N] ", tops.join(" and "));
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    if !matches!(line.trim().to_lowercase().as_str(), "y" | "yes") {
        println!("Not confirmed; nothing was queried.");
        return Ok(());
    }

    let mut entities = resolved;
    entities.extend(
        pending
            .iter()
            .filter_map(|e| e.candidates.first().and_then(|c| e.confirm(&c.value))),
    );
    let response = pipeline.process_confirmed(question, entities).await?;
    match response {
        CoreResponse::Answer(answer) => {
            print_answer(&answer);
            export_answer(exporter, question, &answer, export)?;
        }
        CoreResponse::NeedsConfirmation { .. } => {
            println!("Still ambiguous; please name the value exactly.");
        }
    }
    Ok(())
}

fn print_answer(answer: &QueryAnswer) {
    println!();
    if let Some(tool) = &answer.tool_used {
        println!("Answered by tool: {}", tool);
    }
    match &answer.tool_output {
        Some(output) => print!("{}", output),
        None => print!("{}", render_table(&answer.result)),
    }
    print!("{}", render_validation(&answer.validation));
    println!("Plan: {}", answer.plan_summary);
    if let Some(chart) = &answer.chart_intent {
        println!("Chart intent: {} (group by {})", chart,
            answer.group_by_dimension.as_deref().unwrap_or("none"));
    }
}

fn export_answer(
    exporter: &Exporter,
    question: &str,
    answer: &QueryAnswer,
    export: Option<&str>,
) -> Result<()> {
    let Some(kind) = export else {
        return Ok(());
    };
    let path = match kind {
        "csv" => exporter.to_csv(question, &answer.result)?,
        "json" => exporter.to_json(question, &answer.result, &answer.validation)?,
        "report" => {
            exporter.report_markdown(question, &answer.question, &answer.result, &answer.validation)?
        }
        other => {
            println!("Unknown export format '{}'; use csv, json, or report.", other);
            return Ok(());
        }
    };
    println!("Exported to {}", path.display());
    Ok(())
}
