//! Post-execution result validation.
//!
//! Four independent checks run on every result: completeness against the
//! unlimited count, the per-group aggregation invariant, truncation
//! transparency, and filter sanity. Discrepancies mean a bug and force
//! `is_complete = false`; warnings disclose expected limitations and never
//! affect completeness. The validator only reports; it never mutates or
//! drops rows, and it is never retried.

use crate::catalog::dimension_column;
use crate::executor::QueryResult;
use crate::plan::QueryPlan;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True iff there are zero discrepancies.
    pub is_complete: bool,
    /// Records that should be represented given the plan's limit.
    pub expected_count: u64,
    /// Records actually represented in the result.
    pub actual_count: u64,
    pub discrepancies: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct ResultValidator;

impl ResultValidator {
    pub fn validate(result: &QueryResult, plan: &QueryPlan) -> ValidationReport {
        let mut discrepancies = Vec::new();
        let mut warnings = Vec::new();

        // Completeness: with no limit requested, anything short of the
        // unlimited count is silent data loss.
        if plan.row_limit.is_none() && result.row_count != result.total_available_count {
            discrepancies.push(format!(
                "Missing records: {} available but {} returned with no limit requested",
                result.total_available_count, result.row_count
            ));
        }

        // Aggregation invariant.
        let summed: u64 = result.per_group_counts.values().sum();
        if summed != result.row_count {
            discrepancies.push(format!(
                "Aggregation mismatch: per-group counts sum to {} but row_count is {}",
                summed, result.row_count
            ));
        }

        // Truncation transparency: expected under a limit, but both numbers
        // must reach the caller.
        if plan.row_limit.is_some() && result.row_count < result.total_available_count {
            warnings.push(format!(
                "Result truncated: showing {} of {} matching records",
                result.row_count, result.total_available_count
            ));
        }

        // Filter sanity: every row must carry each filtered dimension as a
        // string value inside the requested set. A missing column or an
        // unexpected type is a discrepancy, not a pass.
        for (dimension, values) in &plan.filters {
            let column = match dimension_column(dimension) {
                Ok(column) => column,
                Err(_) => {
                    discrepancies.push(format!(
                        "Plan filters on unregistered dimension '{}'",
                        dimension
                    ));
                    continue;
                }
            };
            for (index, row) in result.rows.iter().enumerate() {
                match row.get(column) {
                    Some(Value::String(actual)) if values.contains(actual) => {}
                    Some(Value::String(actual)) => {
                        discrepancies.push(format!(
                            "Row {} has {}='{}', outside the requested filter",
                            index, dimension, actual
                        ));
                    }
                    Some(other) => {
                        discrepancies.push(format!(
                            "Row {} has a non-string {} value: {}",
                            index, dimension, other
                        ));
                    }
                    None => {
                        discrepancies.push(format!(
                            "Row {} is missing the filtered {} column",
                            index, dimension
                        ));
                    }
                }
            }
        }

        for discrepancy in &discrepancies {
            warn!("Validation discrepancy: {}", discrepancy);
        }

        let expected_count = match plan.row_limit {
            Some(limit) => result.total_available_count.min(limit as u64),
            None => result.total_available_count,
        };

        ValidationReport {
            is_complete: discrepancies.is_empty(),
            expected_count,
            actual_count: result.row_count,
            discrepancies,
            warnings,
        }
    }
}
