//! Result rendering and file export.
//!
//! Terminal rendering is plain aligned text. Exports land under the
//! configured export directory in `csv/`, `json/`, and `reports/`
//! subdirectories with timestamped names, and every export path is
//! returned to the caller.

use crate::error::{PayscopeError, Result};
use crate::executor::QueryResult;
use crate::validation::ValidationReport;
use chrono::Utc;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Cell text for terminal, CSV, and markdown output.
fn value_text(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(f) = n.as_f64() {
                format!("{:.2}", f)
            } else {
                n.to_string()
            }
        }
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Renders rows as an aligned text table with a count footer.
pub fn render_table(result: &QueryResult) -> String {
    if result.rows.is_empty() {
        return format!(
            "No matching records ({} available).\n",
            result.total_available_count
        );
    }

    let columns = &result.columns;
    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    let mut cells: Vec<Vec<String>> = Vec::with_capacity(result.rows.len());
    for row in &result.rows {
        let rendered: Vec<String> = columns
            .iter()
            .map(|c| row.get(c).map(value_text).unwrap_or_else(|| "-".to_string()))
            .collect();
        for (i, cell) in rendered.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
        cells.push(rendered);
    }

    let mut out = String::new();
    for (i, column) in columns.iter().enumerate() {
        out.push_str(&format!("{:<width$}  ", column, width = widths[i]));
    }
    out.push('\n');
    out.push_str(&"-".repeat(widths.iter().map(|w| w + 2).sum::<usize>()));
    out.push('\n');
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            out.push_str(&format!("{:<width$}  ", cell, width = widths[i]));
        }
        out.push('\n');
    }
    out.push_str(&format!(
        "\n{} rows, {} of {} records, {} ms\n",
        result.rows.len(),
        result.row_count,
        result.total_available_count,
        result.execution_time_ms
    ));
    out
}

/// Renders the validation outcome under the table.
pub fn render_validation(report: &ValidationReport) -> String {
    let mut out = String::new();
    if report.is_complete {
        out.push_str("Validation: complete\n");
    } else {
        out.push_str("Validation: INCOMPLETE\n");
    }
    for discrepancy in &report.discrepancies {
        out.push_str(&format!("Discrepancy: {}\n", discrepancy));
    }
    for warning in &report.warnings {
        out.push_str(&format!("Warning: {}\n", warning));
    }
    out
}

/// Writes query results to disk in the formats callers ask for.
pub struct Exporter {
    export_dir: PathBuf,
}

impl Exporter {
    pub fn new(export_dir: &Path) -> Self {
        Self {
            export_dir: export_dir.to_path_buf(),
        }
    }

    fn target(&self, sub: &str, name: &str, extension: &str) -> Result<PathBuf> {
        let dir = self.export_dir.join(sub);
        fs::create_dir_all(&dir)?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        Ok(dir.join(format!("{}_{}.{}", slug(name), stamp, extension)))
    }

    pub fn to_csv(&self, name: &str, result: &QueryResult) -> Result<PathBuf> {
        let path = self.target("csv", name, "csv")?;
        let mut writer = csv::Writer::from_path(&path)
            .map_err(|e| PayscopeError::Export(format!("Failed to open {}: {}", path.display(), e)))?;
        writer
            .write_record(&result.columns)
            .map_err(|e| PayscopeError::Export(format!("Failed to write CSV header: {}", e)))?;
        for row in &result.rows {
            let record: Vec<String> = result
                .columns
                .iter()
                .map(|c| row.get(c).map(value_text).unwrap_or_default())
                .collect();
            writer
                .write_record(&record)
                .map_err(|e| PayscopeError::Export(format!("Failed to write CSV row: {}", e)))?;
        }
        writer
            .flush()
            .map_err(|e| PayscopeError::Export(format!("Failed to flush CSV: {}", e)))?;
        info!("Exported CSV to {}", path.display());
        Ok(path)
    }

    pub fn to_json(
        &self,
        name: &str,
        result: &QueryResult,
        report: &ValidationReport,
    ) -> Result<PathBuf> {
        let path = self.target("json", name, "json")?;
        let payload = serde_json::json!({
            "exported_at": Utc::now().to_rfc3339(),
            "result": result,
            "validation": report,
        });
        fs::write(&path, serde_json::to_string_pretty(&payload)?)?;
        info!("Exported JSON to {}", path.display());
        Ok(path)
    }

    pub fn report_markdown(
        &self,
        name: &str,
        question: &str,
        result: &QueryResult,
        report: &ValidationReport,
    ) -> Result<PathBuf> {
        let path = self.target("reports", name, "md")?;
        let mut out = String::new();
        out.push_str(&format!("# Compensation Report: {}\n\n", name));
        out.push_str(&format!("Question: {}\n\n", question));
        out.push_str(&format!("Generated: {}\n\n", Utc::now().to_rfc3339()));

        out.push_str("## Result\n\n");
        if result.rows.is_empty() {
            out.push_str("No matching records.\n\n");
        } else {
            out.push_str(&format!("| {} |\n", result.columns.join(" | ")));
            out.push_str(&format!(
                "|{}\n",
                result.columns.iter().map(|_| "---|").collect::<String>()
            ));
            for row in &result.rows {
                let cells: Vec<String> = result
                    .columns
                    .iter()
                    .map(|c| row.get(c).map(value_text).unwrap_or_default())
                    .collect();
                out.push_str(&format!("| {} |\n", cells.join(" | ")));
            }
            out.push('\n');
        }
        out.push_str(&format!(
            "{} of {} matching records represented.\n\n",
            result.row_count, result.total_available_count
        ));

        out.push_str("## Validation\n\n");
        out.push_str(&format!(
            "Complete: {}\n\n",
            if report.is_complete { "yes" } else { "no" }
        ));
        for discrepancy in &report.discrepancies {
            out.push_str(&format!("- Discrepancy: {}\n", discrepancy));
        }
        for warning in &report.warnings {
            out.push_str(&format!("- Warning: {}\n", warning));
        }

        fs::write(&path, out)?;
        info!("Exported report to {}", path.display());
        Ok(path)
    }
}

fn slug(name: &str) -> String {
    let mut slug = String::new();
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('_') && !slug.is_empty() {
            slug.push('_');
        }
    }
    let trimmed = slug.trim_end_matches('_');
    if trimmed.is_empty() {
        "query".to_string()
    } else {
        trimmed.to_string()
    }
}
