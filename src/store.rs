//! SQLite access layer for the compensation dataset.
//!
//! Schema: `job_positions` (categorical dimensions) joined 1:1 with
//! `compensation_metrics` (percentile/count columns) on the position id.
//! The `Store` holds only the database path; every operation opens a
//! short-lived connection that is released at scope end, so concurrent
//! pipeline invocations never share a handle.

use crate::error::{PayscopeError, Result};
use rusqlite::{params, Connection, ToSql};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// One survey record: a position and its metric row.
///
/// Field names match the ingestion CSV header
/// (`function,level,p10,p25,p50,p75,p90,emp_count`). Metric fields are
/// optional; a record with missing percentiles is still a record and must
/// never be silently dropped by a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompRecord {
    pub function: String,
    pub level: String,
    pub p10: Option<f64>,
    pub p25: Option<f64>,
    pub p50: Option<f64>,
    pub p75: Option<f64>,
    pub p90: Option<f64>,
    pub emp_count: Option<i64>,
}

/// Handle to the compensation database.
#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection> {
        Connection::open(&self.db_path)
            .map_err(|e| PayscopeError::StoreUnavailable(format!("Failed to open database: {}", e)))
    }

    /// Create the two-table schema and its indexes if they do not exist.
    pub fn create_schema(&self) -> Result<()> {
        let conn = self.open()?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS job_positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_function TEXT NOT NULL,
                job_level TEXT NOT NULL
            )
            "#,
            [],
        )
        .map_err(|e| PayscopeError::StoreUnavailable(format!("Failed to create job_positions: {}", e)))?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS compensation_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_position_id INTEGER NOT NULL,
                base_salary_lfy_p10 REAL,
                base_salary_lfy_p25 REAL,
                base_salary_lfy_p50 REAL,
                base_salary_lfy_p75 REAL,
                base_salary_lfy_p90 REAL,
                base_salary_lfy_emp_count INTEGER,
                FOREIGN KEY (job_position_id) REFERENCES job_positions(id)
            )
            "#,
            [],
        )
        .map_err(|e| {
            PayscopeError::StoreUnavailable(format!("Failed to create compensation_metrics: {}", e))
        })?;

        for index_sql in [
            "CREATE INDEX IF NOT EXISTS idx_positions_function ON job_positions(job_function)",
            "CREATE INDEX IF NOT EXISTS idx_positions_level ON job_positions(job_level)",
            "CREATE INDEX IF NOT EXISTS idx_metrics_position ON compensation_metrics(job_position_id)",
        ] {
            conn.execute(index_sql, [])
                .map_err(|e| PayscopeError::StoreUnavailable(format!("Failed to create index: {}", e)))?;
        }

        Ok(())
    }

    /// Insert records in a single transaction. Returns the number inserted.
    pub fn insert_records(&self, records: &[CompRecord]) -> Result<usize> {
        let mut conn = self.open()?;
        let tx = conn
            .transaction()
            .map_err(|e| PayscopeError::StoreUnavailable(format!("Failed to start transaction: {}", e)))?;

        for record in records {
            tx.execute(
                "INSERT INTO job_positions (job_function, job_level) VALUES (?1, ?2)",
                params![record.function, record.level],
            )
            .map_err(|e| PayscopeError::StoreUnavailable(format!("Failed to insert position: {}", e)))?;

            let position_id = tx.last_insert_rowid();

            tx.execute(
                r#"
                INSERT INTO compensation_metrics
                (job_position_id, base_salary_lfy_p10, base_salary_lfy_p25, base_salary_lfy_p50,
                 base_salary_lfy_p75, base_salary_lfy_p90, base_salary_lfy_emp_count)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    position_id,
                    record.p10,
                    record.p25,
                    record.p50,
                    record.p75,
                    record.p90,
                    record.emp_count
                ],
            )
            .map_err(|e| PayscopeError::StoreUnavailable(format!("Failed to insert metrics: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| PayscopeError::StoreUnavailable(format!("Failed to commit: {}", e)))?;

        info!("Inserted {} records into {}", records.len(), self.db_path.display());
        Ok(records.len())
    }

    /// Distinct non-null values of each dimension column, alphabetical,
    /// read under one transaction so the caller sees a consistent snapshot.
    ///
    /// Column names come from the dimension registry, never from user input.
    pub fn distinct_values_snapshot(
        &self,
        columns: &[&str],
    ) -> Result<HashMap<String, Vec<String>>> {
        let mut conn = self.open()?;
        let tx = conn
            .transaction()
            .map_err(|e| PayscopeError::StoreUnavailable(format!("Failed to start transaction: {}", e)))?;

        let mut out = HashMap::new();
        for column in columns {
            let sql = format!(
                "SELECT DISTINCT {col} FROM job_positions WHERE {col} IS NOT NULL ORDER BY {col}",
                col = column
            );
            let mut stmt = tx
                .prepare(&sql)
                .map_err(|e| PayscopeError::StoreUnavailable(format!("Failed to prepare query: {}", e)))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| PayscopeError::StoreUnavailable(format!("Failed to query values: {}", e)))?;

            let mut values = Vec::new();
            for row in rows {
                values.push(row.map_err(|e| {
                    PayscopeError::StoreUnavailable(format!("Failed to read row: {}", e))
                })?);
            }
            out.insert((*column).to_string(), values);
        }
        Ok(out)
    }

    /// Run a single-value COUNT query.
    pub fn query_count(&self, sql: &str, params: &[&dyn ToSql]) -> Result<i64> {
        let conn = self.open()?;
        conn.query_row(sql, params, |row| row.get(0))
            .map_err(|e| PayscopeError::StoreUnavailable(format!("Count query failed: {}", e)))
    }

    /// Run a query, mapping each row through `f`.
    pub fn query_map<T, F>(&self, sql: &str, params: &[&dyn ToSql], f: F) -> Result<Vec<T>>
    where
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| PayscopeError::StoreUnavailable(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params, f)
            .map_err(|e| PayscopeError::StoreUnavailable(format!("Query failed: {}", e)))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(
                row.map_err(|e| PayscopeError::StoreUnavailable(format!("Failed to read row: {}", e)))?,
            );
        }
        Ok(out)
    }
}

/// Deterministic demo dataset: every function gets the full career ladder
/// plus a roll-up and an executive band row, so the inclusion toggles have
/// something to exclude.
pub fn demo_records() -> Vec<CompRecord> {
    const FUNCTIONS: &[(&str, f64)] = &[
        ("Engineering", 110_000.0),
        ("Finance", 95_000.0),
        ("Sales", 85_000.0),
        ("Marketing", 82_000.0),
        ("Human Resources", 78_000.0),
        ("Legal", 120_000.0),
        ("Operations", 75_000.0),
        ("Creative", 80_000.0),
    ];
    const LEVELS: &[&str] = &[
        "Entry (P1)",
        "Developing (P2)",
        "Career (P3)",
        "Advanced (P4)",
        "Manager (M3)",
        "Expert (P5)",
        "Sr Manager (M4)",
        "Director (M5)",
        "Principal (P6)",
        "Senior Director (M6)",
        "Function Roll-Up",
        "Executive Band",
    ];

    let mut records = Vec::new();
    for (fidx, (function, base)) in FUNCTIONS.iter().enumerate() {
        for (lidx, level) in LEVELS.iter().enumerate() {
            let p50 = base + 16_000.0 * lidx as f64;
            records.push(CompRecord {
                function: (*function).to_string(),
                level: (*level).to_string(),
                p10: Some((p50 * 0.80).round()),
                p25: Some((p50 * 0.90).round()),
                p50: Some(p50.round()),
                p75: Some((p50 * 1.15).round()),
                p90: Some((p50 * 1.30).round()),
                emp_count: Some(3 + ((fidx + lidx) % 5) as i64),
            });
        }
    }
    records
}
