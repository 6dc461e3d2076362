//! End-to-end question processing.
//!
//! One pipeline invocation per question: extract fragments, resolve them
//! against the catalog, try the tool inventory, otherwise build and
//! execute a plan, then validate. Every stage is audited under one
//! correlation id. Store failures are retried with bounded backoff; tool
//! failures fall back to the plan path; fuzzy resolutions come back as a
//! confirmation request instead of a silent filter.

use crate::audit::{AuditStage, QueryAudit};
use crate::catalog::DimensionCatalog;
use crate::config::Config;
use crate::error::{PayscopeError, Result};
use crate::executor::{QueryExecutor, QueryResult};
use crate::extraction::{self, ExtractedQuestion, Fragment};
use crate::plan::{OrderBy, QueryIntent, QueryPlan, QueryPlanBuilder};
use crate::resolver::{EntityResolver, ResolvedEntity};
use crate::store::Store;
use crate::tools::{ToolInventory, ToolOutcome, ToolPayload};
use crate::validation::{ResultValidator, ValidationReport};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Attempts against an unavailable store before giving up.
const MAX_STORE_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 200;
const BACKOFF_JITTER_MS: u64 = 100;

/// Everything the response and chart layers need for one answered question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub correlation_id: Uuid,
    pub question: String,
    pub result: QueryResult,
    pub validation: ValidationReport,
    pub tool_used: Option<String>,
    /// Raw stdout when a tool completed without a structured result.
    pub tool_output: Option<String>,
    pub plan_summary: String,
    pub group_by_dimension: Option<String>,
    pub chart_intent: Option<String>,
}

/// Outcome of one pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoreResponse {
    Answer(QueryAnswer),
    /// The plan needs more exact entities and candidates exist. The caller
    /// must confirm before any filter is applied; entities that already
    /// resolved exactly ride along in `resolved` so the retry keeps them.
    NeedsConfirmation {
        question: String,
        resolved: Vec<ResolvedEntity>,
        pending: Vec<ResolvedEntity>,
    },
}

pub struct QueryPipeline {
    catalog: Arc<DimensionCatalog>,
    resolver: EntityResolver,
    inventory: ToolInventory,
    executor: QueryExecutor,
    audit: Arc<QueryAudit>,
    tools_dir: PathBuf,
    tool_timeout: Duration,
}

impl QueryPipeline {
    /// Builds the pipeline against the configured store, refreshing the
    /// catalog and scanning the tools directory once.
    pub fn new(config: &Config) -> Result<Self> {
        let store = Store::new(&config.db_path);
        let catalog = Arc::new(DimensionCatalog::new(store.clone()));
        catalog.refresh()?;
        let resolver = EntityResolver::with_floor(catalog.clone(), config.similarity_floor);
        let inventory = ToolInventory::build(&config.tools_dir, &catalog.snapshot())?;
        let executor = QueryExecutor::new(store);
        Ok(Self {
            catalog,
            resolver,
            inventory,
            executor,
            audit: Arc::new(QueryAudit::new()),
            tools_dir: config.tools_dir.clone(),
            tool_timeout: Duration::from_secs(config.tool_timeout_secs),
        })
    }

    pub fn audit(&self) -> Arc<QueryAudit> {
        self.audit.clone()
    }

    pub fn catalog(&self) -> Arc<DimensionCatalog> {
        self.catalog.clone()
    }

    /// Reloads dimension values and rescans the tools directory.
    pub fn refresh(&mut self) -> Result<()> {
        self.catalog.refresh()?;
        self.inventory = ToolInventory::build(&self.tools_dir, &self.catalog.snapshot())?;
        Ok(())
    }

    /// Full path: extract fragments from the question text, then answer.
    pub async fn process(&self, question: &str) -> Result<CoreResponse> {
        self.process_with_limit(question, None).await
    }

    /// Same as [`process`](Self::process) with an explicit record cap that
    /// overrides anything phrased in the question.
    pub async fn process_with_limit(
        &self,
        question: &str,
        row_limit: Option<u32>,
    ) -> Result<CoreResponse> {
        let mut extracted = extraction::extract(question);
        if row_limit.is_some() {
            extracted.options.row_limit = row_limit;
        }
        self.answer(extracted).await
    }

    /// Answer with caller-supplied fragments and intent, for callers that
    /// do their own language handling. An unknown intent string is an
    /// `AmbiguousIntent` error; plan options still come from the text.
    pub async fn process_with_fragments(
        &self,
        question: &str,
        fragments: Vec<Fragment>,
        intent: &str,
    ) -> Result<CoreResponse> {
        let mut extracted = extraction::extract(question);
        extracted.fragments = fragments;
        extracted.intent = intent.parse()?;
        self.answer(extracted).await
    }

    /// Answer with entities the caller has already confirmed.
    pub async fn process_confirmed(
        &self,
        question: &str,
        entities: Vec<ResolvedEntity>,
    ) -> Result<CoreResponse> {
        let extracted = extraction::extract(question);
        let correlation_id = Uuid::new_v4();
        self.audit.record(
            correlation_id,
            AuditStage::Resolution,
            json!({ "confirmed": true, "entities": entities }),
        );
        self.run(extracted, entities, correlation_id).await
    }

    async fn answer(&self, extracted: ExtractedQuestion) -> Result<CoreResponse> {
        let correlation_id = Uuid::new_v4();
        info!("[{}] Processing question: {}", correlation_id, extracted.question);
        let entities = self.resolve_fragments(&extracted, correlation_id)?;
        self.run(extracted, entities, correlation_id).await
    }

    fn resolve_fragments(
        &self,
        extracted: &ExtractedQuestion,
        correlation_id: Uuid,
    ) -> Result<Vec<ResolvedEntity>> {
        let mut entities = Vec::with_capacity(extracted.fragments.len());
        for fragment in &extracted.fragments {
            match self.resolver.resolve(&fragment.text, &fragment.dimension) {
                Ok(entity) => entities.push(entity),
                Err(e) => {
                    self.audit.record_error(correlation_id, &e.to_string());
                    return Err(e);
                }
            }
        }
        self.audit.record(
            correlation_id,
            AuditStage::Resolution,
            json!({
                "fragments": extracted.fragments.len(),
                "exact": entities.iter().filter(|e| e.is_exact()).count(),
                "entities": entities,
            }),
        );
        Ok(entities)
    }

    async fn run(
        &self,
        extracted: ExtractedQuestion,
        entities: Vec<ResolvedEntity>,
        correlation_id: Uuid,
    ) -> Result<CoreResponse> {
        if let Some(tool) = self.inventory.match_tool(&entities, extracted.intent) {
            self.audit.record(
                correlation_id,
                AuditStage::ToolMatched,
                json!({ "tool": tool.name, "specificity": tool.specificity_score }),
            );
            match self.inventory.execute(tool, self.tool_timeout).await {
                ToolOutcome::Completed {
                    tool: name,
                    payload,
                    duration_ms,
                } => {
                    self.audit.record(
                        correlation_id,
                        AuditStage::ToolRun,
                        json!({ "tool": name, "status": "completed", "duration_ms": duration_ms }),
                    );
                    return Ok(self.tool_answer(extracted, name, payload, correlation_id));
                }
                ToolOutcome::Failed { tool: name, reason } => {
                    warn!(
                        "[{}] Tool '{}' failed ({}), falling back to plan path",
                        correlation_id, name, reason
                    );
                    self.audit.record(
                        correlation_id,
                        AuditStage::ToolRun,
                        json!({ "tool": name, "status": "failed", "reason": reason }),
                    );
                }
            }
        }

        let plan = match QueryPlanBuilder::build(&entities, extracted.intent, &extracted.options) {
            Ok(plan) => plan,
            Err(PayscopeError::NoExactEntities(detail)) => {
                let pending: Vec<ResolvedEntity> = entities
                    .iter()
                    .filter(|e| !e.is_exact() && !e.candidates.is_empty())
                    .cloned()
                    .collect();
                if pending.is_empty() {
                    self.audit.record_error(correlation_id, &detail);
                    return Err(PayscopeError::NoExactEntities(detail));
                }
                let resolved: Vec<ResolvedEntity> =
                    entities.iter().filter(|e| e.is_exact()).cloned().collect();
                info!(
                    "[{}] Plan blocked ({}); asking for confirmation of {} fragment(s)",
                    correlation_id,
                    detail,
                    pending.len()
                );
                self.audit.record(
                    correlation_id,
                    AuditStage::PlanBuilt,
                    json!({
                        "needs_confirmation": true,
                        "pending": pending.len(),
                        "resolved": resolved.len(),
                    }),
                );
                return Ok(CoreResponse::NeedsConfirmation {
                    question: extracted.question,
                    resolved,
                    pending,
                });
            }
            Err(e) => {
                self.audit.record_error(correlation_id, &e.to_string());
                return Err(e);
            }
        };
        self.audit.record(
            correlation_id,
            AuditStage::PlanBuilt,
            json!({ "summary": plan.summary() }),
        );

        let result = self.execute_with_retry(&plan, correlation_id).await?;
        self.audit.record(
            correlation_id,
            AuditStage::PreCount,
            json!({ "total_available_count": result.total_available_count }),
        );
        self.audit.record(
            correlation_id,
            AuditStage::Execution,
            json!({
                "row_count": result.row_count,
                "groups": result.per_group_counts.len(),
                "execution_time_ms": result.execution_time_ms,
            }),
        );

        let validation = ResultValidator::validate(&result, &plan);
        self.audit.record(
            correlation_id,
            AuditStage::Validation,
            json!({
                "is_complete": validation.is_complete,
                "discrepancies": validation.discrepancies.len(),
                "warnings": validation.warnings.len(),
            }),
        );
        if !validation.is_complete {
            warn!(
                "[{}] Result flagged incomplete: {:?}",
                correlation_id, validation.discrepancies
            );
        }

        Ok(CoreResponse::Answer(QueryAnswer {
            correlation_id,
            question: extracted.question,
            plan_summary: plan.summary(),
            group_by_dimension: plan.group_by_dimension.clone(),
            chart_intent: chart_intent(extracted.intent),
            result,
            validation,
            tool_used: None,
            tool_output: None,
        }))
    }

    fn tool_answer(
        &self,
        extracted: ExtractedQuestion,
        name: String,
        payload: ToolPayload,
        correlation_id: Uuid,
    ) -> CoreResponse {
        let (result, validation, tool_output) = match payload {
            ToolPayload::Structured(result) => {
                let plan = unconstrained_plan(extracted.intent);
                let validation = ResultValidator::validate(&result, &plan);
                self.audit.record(
                    correlation_id,
                    AuditStage::Validation,
                    json!({ "is_complete": validation.is_complete, "source": "tool" }),
                );
                (result, validation, None)
            }
            ToolPayload::Opaque(text) => {
                let result = empty_result();
                let validation = ValidationReport {
                    is_complete: true,
                    expected_count: 0,
                    actual_count: 0,
                    discrepancies: Vec::new(),
                    warnings: vec![
                        "Tool output is opaque; counts were not validated".to_string()
                    ],
                };
                (result, validation, Some(text))
            }
        };
        CoreResponse::Answer(QueryAnswer {
            correlation_id,
            question: extracted.question,
            plan_summary: format!("tool={}", name),
            group_by_dimension: extracted.options.group_by.clone(),
            chart_intent: chart_intent(extracted.intent),
            result,
            validation,
            tool_used: Some(name),
            tool_output,
        })
    }

    async fn execute_with_retry(
        &self,
        plan: &QueryPlan,
        correlation_id: Uuid,
    ) -> Result<QueryResult> {
        let mut attempt = 1u32;
        loop {
            match self.executor.execute(plan) {
                Ok(result) => return Ok(result),
                Err(PayscopeError::StoreUnavailable(reason)) if attempt < MAX_STORE_ATTEMPTS => {
                    let backoff = Duration::from_millis(
                        BACKOFF_BASE_MS * 2u64.pow(attempt - 1)
                            + rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS),
                    );
                    warn!(
                        "[{}] Store unavailable (attempt {} of {}): {}; retrying in {:?}",
                        correlation_id, attempt, MAX_STORE_ATTEMPTS, reason, backoff
                    );
                    self.audit.record_error(
                        correlation_id,
                        &format!("store unavailable on attempt {}: {}", attempt, reason),
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.audit.record_error(correlation_id, &e.to_string());
                    return Err(e);
                }
            }
        }
    }
}

fn chart_intent(intent: QueryIntent) -> Option<String> {
    match intent {
        QueryIntent::Visualize => Some(intent.as_str().to_string()),
        _ => None,
    }
}

/// Plan used to validate tool-produced results: no filters, no limit, so
/// only the internal count checks apply.
fn unconstrained_plan(intent: QueryIntent) -> QueryPlan {
    QueryPlan {
        metric_columns: Vec::new(),
        group_by_dimension: None,
        filters: BTreeMap::new(),
        include_rollup: true,
        include_executive: true,
        row_limit: None,
        order_by: OrderBy::CareerLadder,
        intent,
    }
}

fn empty_result() -> QueryResult {
    QueryResult {
        rows: Vec::new(),
        columns: Vec::new(),
        row_count: 0,
        total_available_count: 0,
        per_group_counts: BTreeMap::new(),
        execution_time_ms: 0,
    }
}
