//! Query plan construction from resolved entities and intent.
//!
//! The builder's one hard rule: a filter is added for a dimension only when
//! at least one entity for that dimension resolved exactly (a confirmed
//! fuzzy match counts, because confirmation upgrades it). Nothing else ever
//! becomes a WHERE clause, and nothing is excluded unless the caller asked.

use crate::error::{PayscopeError, Result};
use crate::resolver::ResolvedEntity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Recognized question intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Query,
    Analyze,
    Visualize,
    Compare,
    Progression,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::Query => "query",
            QueryIntent::Analyze => "analyze",
            QueryIntent::Visualize => "visualize",
            QueryIntent::Compare => "compare",
            QueryIntent::Progression => "progression",
        }
    }
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryIntent {
    type Err = PayscopeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "query" => Ok(QueryIntent::Query),
            "analyze" => Ok(QueryIntent::Analyze),
            "visualize" => Ok(QueryIntent::Visualize),
            "compare" => Ok(QueryIntent::Compare),
            "progression" => Ok(QueryIntent::Progression),
            other => Err(PayscopeError::AmbiguousIntent(format!(
                "'{}' does not map to a known query shape",
                other
            ))),
        }
    }
}

/// Metric short names and their backing fact-table columns.
const METRICS: &[(&str, &str)] = &[
    ("p10", "base_salary_lfy_p10"),
    ("p25", "base_salary_lfy_p25"),
    ("p50", "base_salary_lfy_p50"),
    ("p75", "base_salary_lfy_p75"),
    ("p90", "base_salary_lfy_p90"),
];

/// Percentile columns selected when a question names none.
const DEFAULT_METRICS: &[&str] = &["p25", "p50", "p75"];

pub fn metric_column(short: &str) -> Option<&'static str> {
    METRICS
        .iter()
        .find(|(name, _)| *name == short)
        .map(|(_, column)| *column)
}

/// Row ordering applied by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    /// Career-ladder rank on the level column, then alphabetical.
    CareerLadder,
    /// Plain alphabetical on the grouping column.
    Alphabetical,
}

/// Caller-side knobs for plan construction. Everything defaults to the
/// non-destructive choice.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Bounded page size. Absent means no truncation.
    pub row_limit: Option<u32>,
    /// Explicit "standard levels only" request; flips both inclusion
    /// toggles to false.
    pub standard_levels_only: bool,
    /// Metric short names ("p50"); empty selects the default set.
    pub metrics: Vec<String>,
    /// Explicit grouping request ("by level"), overriding intent defaults.
    pub group_by: Option<String>,
}

/// Immutable description of one query. Built fresh per question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    /// Fact-table columns to aggregate or project.
    pub metric_columns: Vec<String>,
    pub group_by_dimension: Option<String>,
    /// Required values per dimension. Only exactly resolved entities land
    /// here.
    pub filters: BTreeMap<String, BTreeSet<String>>,
    pub include_rollup: bool,
    pub include_executive: bool,
    pub row_limit: Option<u32>,
    pub order_by: OrderBy,
    pub intent: QueryIntent,
}

impl QueryPlan {
    /// One-line description for responses and the audit trail.
    pub fn summary(&self) -> String {
        let filters = if self.filters.is_empty() {
            "none".to_string()
        } else {
            self.filters
                .iter()
                .map(|(dimension, values)| {
                    format!("{}={}", dimension, values.iter().cloned().collect::<Vec<_>>().join("|"))
                })
                .collect::<Vec<_>>()
                .join(", ")
        };
        let grouping = self
            .group_by_dimension
            .as_deref()
            .unwrap_or("none")
            .to_string();
        let limit = match self.row_limit {
            Some(n) => n.to_string(),
            None => "none".to_string(),
        };
        format!(
            "intent={} filters=[{}] group_by={} limit={} rollup={} executive={}",
            self.intent, filters, grouping, limit, self.include_rollup, self.include_executive
        )
    }
}

pub struct QueryPlanBuilder;

impl QueryPlanBuilder {
    /// Build a plan from resolved entities. Fails with `NoExactEntities`
    /// when nothing usable resolved, so the caller can surface candidates
    /// instead of querying.
    pub fn build(
        entities: &[ResolvedEntity],
        intent: QueryIntent,
        options: &PlanOptions,
    ) -> Result<QueryPlan> {
        let mut filters: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for entity in entities {
            if let (true, Some(value)) = (entity.is_exact(), entity.matched_value.as_ref()) {
                filters
                    .entry(entity.dimension.clone())
                    .or_default()
                    .insert(value.clone());
            }
        }

        if filters.is_empty() {
            let unresolved: Vec<&str> = entities.iter().map(|e| e.raw_text.as_str()).collect();
            return Err(PayscopeError::NoExactEntities(format!(
                "no fragment resolved exactly (saw: {})",
                if unresolved.is_empty() {
                    "nothing".to_string()
                } else {
                    unresolved.join(", ")
                }
            )));
        }

        if intent == QueryIntent::Compare {
            let compared = filters.values().map(|v| v.len()).max().unwrap_or(0);
            if compared < 2 {
                return Err(PayscopeError::NoExactEntities(
                    "comparison needs at least two exactly resolved values".to_string(),
                ));
            }
        }

        let group_by_dimension = options.group_by.clone().or_else(|| match intent {
            QueryIntent::Progression | QueryIntent::Analyze | QueryIntent::Visualize => {
                Some("job_level".to_string())
            }
            // Group by whichever dimension is being compared.
            QueryIntent::Compare => filters
                .iter()
                .find(|(_, values)| values.len() >= 2)
                .map(|(dimension, _)| dimension.clone()),
            QueryIntent::Query => None,
        });

        let mut metric_columns = Vec::new();
        for short in &options.metrics {
            match metric_column(short) {
                Some(column) => metric_columns.push(column.to_string()),
                None => {
                    tracing::warn!("Ignoring unknown metric '{}'", short);
                }
            }
        }
        if metric_columns.is_empty() {
            for short in DEFAULT_METRICS {
                if let Some(column) = metric_column(short) {
                    metric_columns.push(column.to_string());
                }
            }
        }

        let order_by = match group_by_dimension.as_deref() {
            Some("job_function") => OrderBy::Alphabetical,
            _ => OrderBy::CareerLadder,
        };

        Ok(QueryPlan {
            metric_columns,
            group_by_dimension,
            filters,
            include_rollup: !options.standard_levels_only,
            include_executive: !options.standard_levels_only,
            row_limit: options.row_limit,
            order_by,
            intent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{Candidate, MatchKind};

    fn exact(dimension: &str, value: &str) -> ResolvedEntity {
        ResolvedEntity {
            raw_text: value.to_lowercase(),
            dimension: dimension.to_string(),
            matched_value: Some(value.to_string()),
            match_kind: MatchKind::Exact,
            candidates: Vec::new(),
            confidence: 1.0,
        }
    }

    fn fuzzy(dimension: &str, raw: &str, candidate: &str) -> ResolvedEntity {
        ResolvedEntity {
            raw_text: raw.to_string(),
            dimension: dimension.to_string(),
            matched_value: None,
            match_kind: MatchKind::Fuzzy,
            candidates: vec![Candidate {
                value: candidate.to_string(),
                similarity: 0.95,
            }],
            confidence: 0.95,
        }
    }

    #[test]
    fn test_defaults_are_non_destructive() {
        let plan = QueryPlanBuilder::build(
            &[exact("job_function", "Creative")],
            QueryIntent::Query,
            &PlanOptions::default(),
        )
        .unwrap();
        assert!(plan.include_rollup);
        assert!(plan.include_executive);
        assert!(plan.row_limit.is_none());
        assert!(plan.group_by_dimension.is_none());
    }

    #[test]
    fn test_fuzzy_entity_never_becomes_a_filter() {
        let entities = vec![
            exact("job_function", "Creative"),
            fuzzy("job_level", "experrt", "Expert (P5)"),
        ];
        let plan =
            QueryPlanBuilder::build(&entities, QueryIntent::Query, &PlanOptions::default()).unwrap();
        assert!(plan.filters.contains_key("job_function"));
        assert!(!plan.filters.contains_key("job_level"));
    }

    #[test]
    fn test_confirmed_fuzzy_counts_as_exact() {
        let confirmed = fuzzy("job_level", "experrt", "Expert (P5)")
            .confirm("Expert (P5)")
            .unwrap();
        let plan = QueryPlanBuilder::build(
            &[exact("job_function", "Creative"), confirmed],
            QueryIntent::Query,
            &PlanOptions::default(),
        )
        .unwrap();
        assert!(plan.filters["job_level"].contains("Expert (P5)"));
    }

    #[test]
    fn test_no_exact_entities_is_an_error() {
        let err = QueryPlanBuilder::build(
            &[fuzzy("job_function", "Creativz", "Creative")],
            QueryIntent::Query,
            &PlanOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PayscopeError::NoExactEntities(_)));
    }

    #[test]
    fn test_compare_needs_two_values() {
        let err = QueryPlanBuilder::build(
            &[exact("job_function", "Creative")],
            QueryIntent::Compare,
            &PlanOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PayscopeError::NoExactEntities(_)));

        let plan = QueryPlanBuilder::build(
            &[
                exact("job_function", "Engineering"),
                exact("job_function", "Finance"),
            ],
            QueryIntent::Compare,
            &PlanOptions::default(),
        )
        .unwrap();
        assert_eq!(plan.group_by_dimension.as_deref(), Some("job_function"));
        assert_eq!(plan.filters["job_function"].len(), 2);
    }

    #[test]
    fn test_group_by_derivation_and_override() {
        let by_level = QueryPlanBuilder::build(
            &[exact("job_function", "Creative")],
            QueryIntent::Progression,
            &PlanOptions::default(),
        )
        .unwrap();
        assert_eq!(by_level.group_by_dimension.as_deref(), Some("job_level"));
        assert_eq!(by_level.order_by, OrderBy::CareerLadder);

        let explicit = QueryPlanBuilder::build(
            &[exact("job_function", "Creative")],
            QueryIntent::Query,
            &PlanOptions {
                group_by: Some("job_level".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(explicit.group_by_dimension.as_deref(), Some("job_level"));
    }

    #[test]
    fn test_standard_levels_only_flips_toggles() {
        let plan = QueryPlanBuilder::build(
            &[exact("job_function", "Creative")],
            QueryIntent::Query,
            &PlanOptions {
                standard_levels_only: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!plan.include_rollup);
        assert!(!plan.include_executive);
    }

    #[test]
    fn test_metric_selection_defaults_and_explicit() {
        let default_plan = QueryPlanBuilder::build(
            &[exact("job_function", "Creative")],
            QueryIntent::Query,
            &PlanOptions::default(),
        )
        .unwrap();
        assert_eq!(
            default_plan.metric_columns,
            vec![
                "base_salary_lfy_p25".to_string(),
                "base_salary_lfy_p50".to_string(),
                "base_salary_lfy_p75".to_string(),
            ]
        );

        let median_only = QueryPlanBuilder::build(
            &[exact("job_function", "Creative")],
            QueryIntent::Query,
            &PlanOptions {
                metrics: vec!["p50".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(median_only.metric_columns, vec!["base_salary_lfy_p50".to_string()]);
    }

    #[test]
    fn test_intent_parsing() {
        assert_eq!("compare".parse::<QueryIntent>().unwrap(), QueryIntent::Compare);
        assert_eq!(" Query ".parse::<QueryIntent>().unwrap(), QueryIntent::Query);
        let err = "summon".parse::<QueryIntent>().unwrap_err();
        assert!(matches!(err, PayscopeError::AmbiguousIntent(_)));
    }

    #[test]
    fn test_summary_mentions_filters_and_limit() {
        let plan = QueryPlanBuilder::build(
            &[exact("job_function", "Creative")],
            QueryIntent::Query,
            &PlanOptions {
                row_limit: Some(10),
                ..Default::default()
            },
        )
        .unwrap();
        let summary = plan.summary();
        assert!(summary.contains("job_function=Creative"));
        assert!(summary.contains("limit=10"));
    }
}
