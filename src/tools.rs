//! Workspace tool inventory.
//!
//! Pre-existing analysis and chart scripts in the tools directory are
//! indexed once at startup into read-only [`ToolDescriptor`]s. A query is
//! routed to a tool only on exactly resolved entities, and a tool that
//! names concrete values serves exactly those values, so a narrower or
//! fuzzier question never lands on a precomputed script built for a
//! different population. Execution reports failure instead of raising so
//! the caller can fall back to the plan path.

use crate::catalog::{dimension_names, CatalogSnapshot};
use crate::error::Result;
use crate::executor::QueryResult;
use crate::plan::QueryIntent;
use crate::resolver::ResolvedEntity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Which values of one dimension a tool can answer for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionSelector {
    /// The tool does not constrain this dimension.
    Any,
    /// The tool is built for exactly these canonical values.
    Values(BTreeSet<String>),
}

impl DimensionSelector {
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            DimensionSelector::Any => true,
            DimensionSelector::Values(values) => values.contains(value),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub serves_dimensions: BTreeMap<String, DimensionSelector>,
    pub serves_intents: Vec<QueryIntent>,
    /// Total concrete values the tool names across all dimensions.
    pub specificity_score: u32,
    /// Position in the deterministic (alphabetical) scan order.
    pub declaration_index: usize,
}

impl ToolDescriptor {
    /// A tool applies when it serves the intent, accepts every exactly
    /// matched value, and everything it names was actually asked for.
    fn applies_to(&self, exact: &BTreeMap<&str, BTreeSet<&str>>, intent: QueryIntent) -> bool {
        if !self.serves_intents.contains(&intent) {
            return false;
        }
        for (dimension, values) in exact {
            match self.serves_dimensions.get(*dimension) {
                Some(selector) => {
                    if !values.iter().all(|value| selector.accepts(value)) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        for (dimension, selector) in &self.serves_dimensions {
            if let DimensionSelector::Values(named) = selector {
                let asked = exact.get(dimension.as_str());
                let fully_requested = named
                    .iter()
                    .all(|value| asked.map_or(false, |set| set.contains(value.as_str())));
                if !fully_requested {
                    return false;
                }
            }
        }
        true
    }
}

/// Result of running a tool. Failures are values, not errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ToolOutcome {
    Completed {
        tool: String,
        payload: ToolPayload,
        duration_ms: u64,
    },
    Failed {
        tool: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPayload {
    /// Stdout parsed as a full query result.
    Structured(QueryResult),
    /// Raw stdout; the caller decides what to do with it.
    Opaque(String),
}

#[derive(Debug, Default)]
pub struct ToolInventory {
    tools: Vec<ToolDescriptor>,
}

impl ToolInventory {
    /// Scans `tools_dir` for analysis scripts and indexes them against the
    /// catalog snapshot. Scan order is alphabetical so descriptor order is
    /// stable across runs.
    pub fn build(tools_dir: &Path, snapshot: &CatalogSnapshot) -> Result<Self> {
        if !tools_dir.is_dir() {
            debug!(
                "Tools directory {} not present, inventory is empty",
                tools_dir.display()
            );
            return Ok(Self::default());
        }

        let mut scripts: Vec<(String, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(tools_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("py") {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };
            if stem.starts_with("test_") || stem.starts_with("enhanced_") {
                continue;
            }
            if !is_tool_stem(&stem) {
                continue;
            }
            scripts.push((stem, path));
        }
        scripts.sort_by(|a, b| a.0.cmp(&b.0));

        let mut tools = Vec::with_capacity(scripts.len());
        for (index, (stem, path)) in scripts.into_iter().enumerate() {
            let mut serves_dimensions = BTreeMap::new();
            let mut specificity = 0u32;
            for dimension in dimension_names() {
                let named: BTreeSet<String> = snapshot
                    .values(dimension)
                    .iter()
                    .filter(|value| stem_names_value(&stem, value))
                    .cloned()
                    .collect();
                let selector = if named.is_empty() {
                    DimensionSelector::Any
                } else {
                    specificity += named.len() as u32;
                    DimensionSelector::Values(named)
                };
                serves_dimensions.insert(dimension.to_string(), selector);
            }
            debug!("Registered tool '{}' (specificity {})", stem, specificity);
            tools.push(ToolDescriptor {
                serves_intents: infer_intents(&stem),
                name: stem,
                path,
                serves_dimensions,
                specificity_score: specificity,
                declaration_index: index,
            });
        }

        info!("Discovered {} workspace tools", tools.len());
        Ok(Self { tools })
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Picks the most specific applicable tool, or none. Only exactly
    /// resolved entities participate; ties go to the earliest descriptor.
    pub fn match_tool(
        &self,
        entities: &[ResolvedEntity],
        intent: QueryIntent,
    ) -> Option<&ToolDescriptor> {
        let mut exact: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for entity in entities {
            if !entity.is_exact() {
                continue;
            }
            if let Some(value) = entity.matched_value.as_deref() {
                exact
                    .entry(entity.dimension.as_str())
                    .or_default()
                    .insert(value);
            }
        }
        if exact.is_empty() {
            debug!("No exactly resolved entities, skipping tool match");
            return None;
        }

        let mut best: Option<&ToolDescriptor> = None;
        for tool in &self.tools {
            if !tool.applies_to(&exact, intent) {
                continue;
            }
            let wins = match best {
                Some(current) => tool.specificity_score > current.specificity_score,
                None => true,
            };
            if wins {
                best = Some(tool);
            }
        }

        if let Some(tool) = best {
            info!(
                "Matched tool '{}' for intent {} (specificity {})",
                tool.name,
                intent.as_str(),
                tool.specificity_score
            );
        }
        best
    }

    /// Runs the tool as an external process under a hard timeout. Missing
    /// artifact, non-zero exit, and timeout all come back as `Failed`.
    pub async fn execute(&self, tool: &ToolDescriptor, timeout: Duration) -> ToolOutcome {
        if !tool.path.is_file() {
            warn!("Tool artifact missing: {}", tool.path.display());
            return ToolOutcome::Failed {
                tool: tool.name.clone(),
                reason: format!("artifact missing: {}", tool.path.display()),
            };
        }

        let mut command = if tool.path.extension().and_then(|e| e.to_str()) == Some("py") {
            let mut c = Command::new("python3");
            c.arg(&tool.path);
            c
        } else {
            Command::new(&tool.path)
        };
        // The timeout drops the output future; the child must not outlive it.
        command.kill_on_drop(true);
        if let Some(parent) = tool.path.parent() {
            command.current_dir(parent);
        }

        info!("Executing tool '{}'", tool.name);
        let started = Instant::now();
        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Tool '{}' failed to spawn: {}", tool.name, e);
                return ToolOutcome::Failed {
                    tool: tool.name.clone(),
                    reason: format!("failed to spawn: {}", e),
                };
            }
            Err(_) => {
                warn!("Tool '{}' timed out after {:?}", tool.name, timeout);
                return ToolOutcome::Failed {
                    tool: tool.name.clone(),
                    reason: format!("timed out after {}s", timeout.as_secs()),
                };
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Tool '{}' exited with {}: {}", tool.name, output.status, stderr.trim());
            return ToolOutcome::Failed {
                tool: tool.name.clone(),
                reason: format!("exit status {}: {}", output.status, stderr.trim()),
            };
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        ToolOutcome::Completed {
            tool: tool.name.clone(),
            payload: classify_stdout(&tool.name, &stdout),
            duration_ms,
        }
    }
}

/// Stdout is opaque unless it parses as a structured result.
fn classify_stdout(tool: &str, stdout: &str) -> ToolPayload {
    match serde_json::from_str::<QueryResult>(stdout.trim()) {
        Ok(result) => {
            debug!("Tool '{}' produced a structured result", tool);
            ToolPayload::Structured(result)
        }
        Err(_) => ToolPayload::Opaque(stdout.to_string()),
    }
}

fn is_tool_stem(stem: &str) -> bool {
    let lower = stem.to_lowercase();
    lower.ends_with("_analysis")
        || lower.ends_with("_chart")
        || lower.contains("salary")
        || lower.contains("salaries")
        || lower.starts_with("compare_")
        || lower.contains("_vs_")
}

/// True when the script stem names the canonical value as a whole
/// underscore-bounded token, e.g. "creative_vs_engineering_chart" names
/// "Creative" but "recreative_chart" does not.
fn stem_names_value(stem: &str, value: &str) -> bool {
    let token = value_token(value);
    if token.is_empty() {
        return false;
    }
    let padded = format!("_{}_", stem.to_lowercase());
    padded.contains(&format!("_{}_", token))
}

/// "Senior Director (M6)" -> "senior_director_m6".
fn value_token(value: &str) -> String {
    let mut token = String::new();
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            token.push(ch.to_ascii_lowercase());
        } else if !token.ends_with('_') && !token.is_empty() {
            token.push('_');
        }
    }
    token.trim_end_matches('_').to_string()
}

fn infer_intents(stem: &str) -> Vec<QueryIntent> {
    let lower = stem.to_lowercase();
    let mut intents = Vec::new();
    if lower.contains("compare") || lower.contains("_vs_") {
        add_intent(&mut intents, QueryIntent::Compare);
        add_intent(&mut intents, QueryIntent::Query);
    }
    if lower.contains("analysis") {
        add_intent(&mut intents, QueryIntent::Analyze);
        add_intent(&mut intents, QueryIntent::Query);
    }
    if lower.contains("chart") || lower.contains("graph") {
        add_intent(&mut intents, QueryIntent::Visualize);
    }
    if lower.contains("salary") || lower.contains("salaries") {
        add_intent(&mut intents, QueryIntent::Query);
    }
    if intents.is_empty() {
        intents.push(QueryIntent::Query);
    }
    intents
}

fn add_intent(intents: &mut Vec<QueryIntent>, intent: QueryIntent) {
    if !intents.contains(&intent) {
        intents.push(intent);
    }
}
