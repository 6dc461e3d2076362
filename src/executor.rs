//! Query plan execution against the store.
//!
//! Every execution runs two passes: a count-only pass with the plan's
//! filters and no limit (`total_available_count`), then the main pass with
//! the limit applied. Grouped aggregation averages the requested percentile
//! columns per group; averaging percentiles across sub-populations is an
//! approximation of the true percentile, and results disclose it as such
//! rather than recomputing. A record with NULL metrics is still a record:
//! the join is LEFT and no metric predicate is ever added.

use crate::catalog::dimension_column;
use crate::error::Result;
use crate::levels;
use crate::plan::{OrderBy, QueryPlan};
use crate::store::Store;
use itertools::Itertools;
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;

/// Bucket name in `per_group_counts` for ungrouped results.
pub const UNGROUPED_KEY: &str = "all";

/// Output column holding the number of underlying records per group row.
pub const RECORD_COUNT_COLUMN: &str = "record_count";

/// Executed result, consumed read-only by the validator and formatter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Grouped plans: one row per group. Ungrouped plans: one row per record.
    pub rows: Vec<BTreeMap<String, Value>>,
    /// Output columns in display order.
    pub columns: Vec<String>,
    /// Underlying records represented by `rows`.
    pub row_count: u64,
    /// Matching records with the same filters and no row limit.
    pub total_available_count: u64,
    /// Records per group; a single `"all"` bucket when ungrouped.
    pub per_group_counts: BTreeMap<String, u64>,
    pub execution_time_ms: u64,
}

#[derive(Clone, Copy)]
enum ColKind {
    Text,
    Real,
    Int,
}

pub struct QueryExecutor {
    store: Store,
}

impl QueryExecutor {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn execute(&self, plan: &QueryPlan) -> Result<QueryResult> {
        let start = Instant::now();
        info!("Executing plan: {}", plan.summary());

        let (where_sql, params) = build_where(plan)?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();

        let count_sql = format!("SELECT COUNT(*) FROM job_positions jp WHERE {}", where_sql);
        let total_available_count = self.store.query_count(&count_sql, &param_refs)? as u64;

        let grouping = grouping_columns(plan)?;
        let result = if grouping.is_empty() {
            self.run_ungrouped(plan, &where_sql, &params, total_available_count)?
        } else {
            self.run_grouped(plan, &grouping, &where_sql, &params, total_available_count)?
        };

        let elapsed = start.elapsed().as_millis() as u64;
        info!(
            "Query completed in {}ms: {} of {} records in {} rows",
            elapsed,
            result.row_count,
            result.total_available_count,
            result.rows.len()
        );
        Ok(QueryResult {
            execution_time_ms: elapsed,
            ..result
        })
    }

    fn run_ungrouped(
        &self,
        plan: &QueryPlan,
        where_sql: &str,
        params: &[String],
        total_available_count: u64,
    ) -> Result<QueryResult> {
        let mut select = vec![
            ("job_function".to_string(), "jp.job_function".to_string(), ColKind::Text),
            ("job_level".to_string(), "jp.job_level".to_string(), ColKind::Text),
        ];
        for column in &plan.metric_columns {
            select.push((column.clone(), format!("cm.{}", column), ColKind::Real));
        }
        select.push((
            "base_salary_lfy_emp_count".to_string(),
            "cm.base_salary_lfy_emp_count".to_string(),
            ColKind::Int,
        ));

        let select_sql = select
            .iter()
            .map(|(name, expr, _)| format!("{} AS {}", expr, name))
            .join(", ");
        let sql = format!(
            "SELECT {} FROM job_positions jp \
             LEFT JOIN compensation_metrics cm ON cm.job_position_id = jp.id \
             WHERE {} ORDER BY {} LIMIT ?",
            select_sql,
            where_sql,
            record_order_sql(plan.order_by, "jp"),
        );

        let limit = plan.row_limit.map(|n| n as i64).unwrap_or(-1);
        let mut param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
        param_refs.push(&limit);

        let columns: Vec<String> = select.iter().map(|(name, _, _)| name.clone()).collect();
        let specs: Vec<(String, ColKind)> =
            select.into_iter().map(|(name, _, kind)| (name, kind)).collect();
        let rows = self.store.query_map(&sql, &param_refs, move |row| {
            let mut out = BTreeMap::new();
            for (i, (name, kind)) in specs.iter().enumerate() {
                out.insert(name.clone(), read_value(row, i, *kind)?);
            }
            Ok(out)
        })?;

        let row_count = rows.len() as u64;
        let mut per_group_counts = BTreeMap::new();
        per_group_counts.insert(UNGROUPED_KEY.to_string(), row_count);

        Ok(QueryResult {
            rows,
            columns,
            row_count,
            total_available_count,
            per_group_counts,
            execution_time_ms: 0,
        })
    }

    fn run_grouped(
        &self,
        plan: &QueryPlan,
        grouping: &[&'static str],
        where_sql: &str,
        params: &[String],
        total_available_count: u64,
    ) -> Result<QueryResult> {
        // Dimensions filtered to a single value are constant within every
        // group; select them bare so the validator can see them.
        let mut constant_dims: Vec<&'static str> = Vec::new();
        for (dimension, values) in &plan.filters {
            let column = dimension_column(dimension)?;
            if values.len() == 1 && !grouping.contains(&column) {
                constant_dims.push(column);
            }
        }

        let mut inner_cols = vec![
            "jp.job_function AS job_function".to_string(),
            "jp.job_level AS job_level".to_string(),
        ];
        inner_cols.extend(plan.metric_columns.iter().map(|c| format!("cm.{} AS {}", c, c)));
        inner_cols.push("cm.base_salary_lfy_emp_count AS base_salary_lfy_emp_count".to_string());
        let inner_sql = format!(
            "SELECT {} FROM job_positions jp \
             LEFT JOIN compensation_metrics cm ON cm.job_position_id = jp.id \
             WHERE {} ORDER BY {} LIMIT ?",
            inner_cols.join(", "),
            where_sql,
            record_order_sql(plan.order_by, "jp"),
        );

        let mut select: Vec<(String, String, ColKind)> = Vec::new();
        for column in grouping {
            select.push(((*column).to_string(), format!("t.{}", column), ColKind::Text));
        }
        for column in &constant_dims {
            select.push(((*column).to_string(), format!("t.{}", column), ColKind::Text));
        }
        for column in &plan.metric_columns {
            select.push((column.clone(), format!("AVG(t.{})", column), ColKind::Real));
        }
        select.push((
            "employees".to_string(),
            "SUM(t.base_salary_lfy_emp_count)".to_string(),
            ColKind::Int,
        ));
        select.push((
            RECORD_COUNT_COLUMN.to_string(),
            "COUNT(*)".to_string(),
            ColKind::Int,
        ));

        let select_sql = select
            .iter()
            .map(|(name, expr, _)| format!("{} AS {}", expr, name))
            .join(", ");
        let sql = format!(
            "SELECT {} FROM ({}) t GROUP BY {} ORDER BY {}",
            select_sql,
            inner_sql,
            grouping.iter().map(|c| format!("t.{}", c)).join(", "),
            group_order_sql(plan.order_by, grouping),
        );

        let limit = plan.row_limit.map(|n| n as i64).unwrap_or(-1);
        let mut param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
        param_refs.push(&limit);

        let group_width = grouping.len();
        let count_index = select.len() - 1;
        let columns: Vec<String> = select.iter().map(|(name, _, _)| name.clone()).collect();
        let specs: Vec<(String, ColKind)> = select
            .into_iter()
            .map(|(name, _, kind)| (name, kind))
            .collect();

        let mapped = self.store.query_map(&sql, &param_refs, move |row| {
            let mut out = BTreeMap::new();
            let mut key_parts = Vec::new();
            for (i, (name, kind)) in specs.iter().enumerate() {
                let value = read_value(row, i, *kind)?;
                if i < group_width {
                    if let Value::String(s) = &value {
                        key_parts.push(s.clone());
                    }
                }
                out.insert(name.clone(), value);
            }
            let group_count: i64 = row.get(count_index)?;
            Ok((key_parts.join(" / "), group_count as u64, out))
        })?;

        let mut rows = Vec::with_capacity(mapped.len());
        let mut per_group_counts = BTreeMap::new();
        let mut row_count = 0u64;
        for (key, count, row) in mapped {
            per_group_counts.insert(key, count);
            row_count += count;
            rows.push(row);
        }

        Ok(QueryResult {
            rows,
            columns,
            row_count,
            total_available_count,
            per_group_counts,
            execution_time_ms: 0,
        })
    }
}

fn read_value(row: &rusqlite::Row<'_>, index: usize, kind: ColKind) -> rusqlite::Result<Value> {
    Ok(match kind {
        ColKind::Text => Value::String(row.get::<_, String>(index)?),
        ColKind::Real => row
            .get::<_, Option<f64>>(index)?
            .map(Value::from)
            .unwrap_or(Value::Null),
        ColKind::Int => row
            .get::<_, Option<i64>>(index)?
            .map(Value::from)
            .unwrap_or(Value::Null),
    })
}

/// WHERE clause from the plan's explicit filters and inclusion toggles.
/// Returns the SQL and its positional parameters.
fn build_where(plan: &QueryPlan) -> Result<(String, Vec<String>)> {
    let mut conditions = Vec::new();
    let mut params = Vec::new();

    for (dimension, values) in &plan.filters {
        let column = dimension_column(dimension)?;
        let placeholders = std::iter::repeat("?").take(values.len()).join(", ");
        conditions.push(format!("jp.{} IN ({})", column, placeholders));
        params.extend(values.iter().cloned());
    }
    if !plan.include_rollup {
        conditions.push("jp.job_level NOT LIKE '%Roll-Up%'".to_string());
    }
    if !plan.include_executive {
        conditions.push("jp.job_level NOT LIKE '%Executive%'".to_string());
    }

    let where_sql = if conditions.is_empty() {
        "1=1".to_string()
    } else {
        conditions.join(" AND ")
    };
    Ok((where_sql, params))
}

/// Columns the main pass groups by: multi-value filter dimensions first
/// (each group must be unambiguous about them), then the requested grouping
/// dimension.
fn grouping_columns(plan: &QueryPlan) -> Result<Vec<&'static str>> {
    let mut grouping = Vec::new();
    for (dimension, values) in &plan.filters {
        if values.len() > 1 {
            let column = dimension_column(dimension)?;
            if !grouping.contains(&column) {
                grouping.push(column);
            }
        }
    }
    if let Some(dimension) = &plan.group_by_dimension {
        let column = dimension_column(dimension)?;
        if !grouping.contains(&column) {
            grouping.push(column);
        }
    }
    Ok(grouping)
}

/// Record-level ORDER BY (ungrouped output and the record scan feeding
/// groups). Ends with the row id so limits are deterministic.
fn record_order_sql(order_by: OrderBy, alias: &str) -> String {
    match order_by {
        OrderBy::CareerLadder => format!(
            "{alias}.job_function, {}, {alias}.job_level, {alias}.id",
            levels::order_case_sql(&format!("{alias}.job_level")),
            alias = alias
        ),
        OrderBy::Alphabetical => {
            format!("{alias}.job_function, {alias}.job_level, {alias}.id", alias = alias)
        }
    }
}

/// Group-level ORDER BY over the aggregated subquery.
fn group_order_sql(order_by: OrderBy, grouping: &[&'static str]) -> String {
    grouping
        .iter()
        .map(|column| {
            if *column == "job_level" && order_by == OrderBy::CareerLadder {
                format!("{}, t.job_level", levels::order_case_sql("t.job_level"))
            } else {
                format!("t.{}", column)
            }
        })
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{PlanOptions, QueryIntent, QueryPlanBuilder};
    use crate::resolver::{MatchKind, ResolvedEntity};
    use crate::store::CompRecord;

    fn exact(dimension: &str, value: &str) -> ResolvedEntity {
        ResolvedEntity {
            raw_text: value.to_string(),
            dimension: dimension.to_string(),
            matched_value: Some(value.to_string()),
            match_kind: MatchKind::Exact,
            candidates: Vec::new(),
            confidence: 1.0,
        }
    }

    fn record(function: &str, level: &str, p50: Option<f64>) -> CompRecord {
        CompRecord {
            function: function.to_string(),
            level: level.to_string(),
            p10: p50.map(|v| v * 0.8),
            p25: p50.map(|v| v * 0.9),
            p50,
            p75: p50.map(|v| v * 1.15),
            p90: p50.map(|v| v * 1.3),
            emp_count: Some(4),
        }
    }

    /// 57 Creative records across 13 levels, plus noise from another
    /// function.
    fn creative_store(tag: &str) -> (Store, Vec<(String, u64)>) {
        let path =
            std::env::temp_dir().join(format!("payscope_exec_{}_{}.db", tag, uuid::Uuid::new_v4()));
        let store = Store::new(&path);
        store.create_schema().unwrap();

        let levels_and_counts: Vec<(&str, u64)> = vec![
            ("Entry (P1)", 5),
            ("Developing (P2)", 4),
            ("Career (P3)", 6),
            ("Advanced (P4)", 3),
            ("Manager (M3)", 5),
            ("Expert (P5)", 4),
            ("Sr Manager (M4)", 5),
            ("Director (M5)", 4),
            ("Principal (P6)", 5),
            ("Senior Director (M6)", 4),
            ("Creative Roll-Up", 4),
            ("Executive Band", 4),
            ("Fellow (P7)", 4),
        ];

        let mut records = Vec::new();
        for (level, count) in &levels_and_counts {
            for i in 0..*count {
                records.push(record("Creative", level, Some(80_000.0 + 1_000.0 * i as f64)));
            }
        }
        records.push(record("Engineering", "Entry (P1)", Some(100_000.0)));
        records.push(record("Engineering", "Career (P3)", Some(140_000.0)));
        store.insert_records(&records).unwrap();

        let expected = levels_and_counts
            .iter()
            .map(|(l, c)| ((*l).to_string(), *c))
            .collect();
        (store, expected)
    }

    fn creative_plan(group_by: Option<&str>, row_limit: Option<u32>) -> QueryPlan {
        QueryPlanBuilder::build(
            &[exact("job_function", "Creative")],
            QueryIntent::Query,
            &PlanOptions {
                row_limit,
                group_by: group_by.map(|s| s.to_string()),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_grouped_counts_cover_every_level() {
        let (store, expected) = creative_store("grouped");
        let executor = QueryExecutor::new(store);
        let result = executor.execute(&creative_plan(Some("job_level"), None)).unwrap();

        assert_eq!(result.rows.len(), 13);
        assert_eq!(result.row_count, 57);
        assert_eq!(result.total_available_count, 57);
        for (level, count) in expected {
            assert_eq!(result.per_group_counts.get(&level), Some(&count), "{}", level);
        }
        let summed: u64 = result.per_group_counts.values().sum();
        assert_eq!(summed, result.row_count);
    }

    #[test]
    fn test_ungrouped_returns_every_record() {
        let (store, _) = creative_store("ungrouped");
        let executor = QueryExecutor::new(store);
        let result = executor.execute(&creative_plan(None, None)).unwrap();

        assert_eq!(result.row_count, 57);
        assert_eq!(result.rows.len(), 57);
        assert_eq!(result.per_group_counts.get(UNGROUPED_KEY), Some(&57));
        for row in &result.rows {
            assert_eq!(row["job_function"], Value::String("Creative".to_string()));
        }
    }

    #[test]
    fn test_row_limit_caps_records_but_not_total() {
        let (store, _) = creative_store("limit");
        let executor = QueryExecutor::new(store);
        let result = executor.execute(&creative_plan(None, Some(10))).unwrap();

        assert_eq!(result.row_count, 10);
        assert_eq!(result.total_available_count, 57);
    }

    #[test]
    fn test_limit_on_grouped_plan_caps_underlying_records() {
        let (store, _) = creative_store("grouped_limit");
        let executor = QueryExecutor::new(store);
        let result = executor
            .execute(&creative_plan(Some("job_level"), Some(10)))
            .unwrap();

        assert_eq!(result.row_count, 10);
        assert_eq!(result.total_available_count, 57);
        let summed: u64 = result.per_group_counts.values().sum();
        assert_eq!(summed, 10);
    }

    #[test]
    fn test_toggles_exclude_rollup_and_executive_only_when_asked() {
        let (store, _) = creative_store("toggles");
        let executor = QueryExecutor::new(store);

        let mut plan = creative_plan(Some("job_level"), None);
        plan.include_rollup = false;
        plan.include_executive = false;
        let result = executor.execute(&plan).unwrap();

        // 57 minus 4 roll-up and 4 executive records.
        assert_eq!(result.row_count, 49);
        assert_eq!(result.total_available_count, 49);
        assert!(!result.per_group_counts.contains_key("Creative Roll-Up"));
        assert!(!result.per_group_counts.contains_key("Executive Band"));
    }

    #[test]
    fn test_career_ladder_ordering_of_groups() {
        let (store, _) = creative_store("order");
        let executor = QueryExecutor::new(store);
        let result = executor.execute(&creative_plan(Some("job_level"), None)).unwrap();

        let levels: Vec<String> = result
            .rows
            .iter()
            .map(|row| row["job_level"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(levels[0], "Entry (P1)");
        assert_eq!(levels[9], "Senior Director (M6)");
        // Off-ladder levels come after the standard ten, alphabetically.
        assert_eq!(levels[10], "Creative Roll-Up");
    }

    #[test]
    fn test_null_metric_records_are_never_dropped() {
        let path = std::env::temp_dir().join(format!("payscope_exec_null_{}.db", uuid::Uuid::new_v4()));
        let store = Store::new(&path);
        store.create_schema().unwrap();
        store
            .insert_records(&[
                record("Creative", "Entry (P1)", Some(80_000.0)),
                record("Creative", "Entry (P1)", None),
            ])
            .unwrap();

        let executor = QueryExecutor::new(store);
        let result = executor.execute(&creative_plan(Some("job_level"), None)).unwrap();
        assert_eq!(result.row_count, 2);
        assert_eq!(result.per_group_counts.get("Entry (P1)"), Some(&2));
    }

    #[test]
    fn test_empty_result_is_valid() {
        let (store, _) = creative_store("empty");
        let executor = QueryExecutor::new(store);
        let mut plan = creative_plan(None, None);
        plan.filters
            .get_mut("job_function")
            .unwrap()
            .clear();
        plan.filters
            .get_mut("job_function")
            .unwrap()
            .insert("Astronomy".to_string());
        let result = executor.execute(&plan).unwrap();
        assert_eq!(result.row_count, 0);
        assert_eq!(result.total_available_count, 0);
        assert!(result.rows.is_empty());
    }

    #[test]
    fn test_compare_groups_by_function() {
        let (store, _) = creative_store("compare");
        let executor = QueryExecutor::new(store);
        let plan = QueryPlanBuilder::build(
            &[
                exact("job_function", "Creative"),
                exact("job_function", "Engineering"),
            ],
            QueryIntent::Compare,
            &PlanOptions::default(),
        )
        .unwrap();
        let result = executor.execute(&plan).unwrap();

        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.per_group_counts.get("Creative"), Some(&57));
        assert_eq!(result.per_group_counts.get("Engineering"), Some(&2));
        assert_eq!(result.row_count, 59);
    }
}
