//! Free-text fragment resolution against canonical dimension values.
//!
//! Resolution is classified, never guessed: an exact (case-insensitive)
//! catalog hit resolves with confidence 1.0; anything else is offered as
//! scored candidates that the caller must confirm before they can act as a
//! filter. The resolver itself never promotes a fuzzy match.

use crate::catalog::{dimension_column, DimensionCatalog};
use crate::error::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use strsim::jaro_winkler;
use tracing::debug;

/// Maximum number of candidates offered for a fuzzy fragment.
const MAX_CANDIDATES: usize = 3;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// How a fragment related to the canonical value set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Fuzzy,
    Unresolved,
}

/// A scored canonical value proposed for a non-exact fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub value: String,
    pub similarity: f64,
}

/// Outcome of resolving one fragment against one dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedEntity {
    /// The fragment as extracted from the question.
    pub raw_text: String,
    pub dimension: String,
    /// Canonical value; present only for exact (or confirmed) resolutions.
    pub matched_value: Option<String>,
    pub match_kind: MatchKind,
    /// Up to three candidates above the floor, best first, ties alphabetical.
    pub candidates: Vec<Candidate>,
    pub confidence: f64,
}

impl ResolvedEntity {
    pub fn is_exact(&self) -> bool {
        self.match_kind == MatchKind::Exact
    }

    /// Confirm one of the offered candidates, upgrading this entity to an
    /// exact-equivalent resolution. Returns `None` if `value` was not among
    /// the candidates; the caller should re-prompt rather than guess.
    pub fn confirm(&self, value: &str) -> Option<ResolvedEntity> {
        let candidate = self.candidates.iter().find(|c| c.value == value)?;
        Some(ResolvedEntity {
            raw_text: self.raw_text.clone(),
            dimension: self.dimension.clone(),
            matched_value: Some(candidate.value.clone()),
            match_kind: MatchKind::Exact,
            candidates: self.candidates.clone(),
            confidence: candidate.similarity,
        })
    }
}

/// Resolves fragments using the catalog's current snapshot.
pub struct EntityResolver {
    catalog: Arc<DimensionCatalog>,
    /// Minimum similarity for a candidate to be offered.
    pub similarity_floor: f64,
}

impl EntityResolver {
    pub fn new(catalog: Arc<DimensionCatalog>) -> Self {
        Self {
            catalog,
            similarity_floor: 0.85,
        }
    }

    pub fn with_floor(catalog: Arc<DimensionCatalog>, similarity_floor: f64) -> Self {
        Self {
            catalog,
            similarity_floor,
        }
    }

    /// Resolve one fragment. Never fails on fragment content; only an
    /// unregistered dimension is an error.
    pub fn resolve(&self, fragment: &str, dimension: &str) -> Result<ResolvedEntity> {
        dimension_column(dimension)?;
        let snapshot = self.catalog.snapshot();
        let trimmed = fragment.trim();

        if trimmed.is_empty() {
            return Ok(unresolved(fragment, dimension));
        }

        if let Some(canonical) = snapshot.lookup_exact(dimension, trimmed) {
            return Ok(ResolvedEntity {
                raw_text: fragment.to_string(),
                dimension: dimension.to_string(),
                matched_value: Some(canonical.to_string()),
                match_kind: MatchKind::Exact,
                candidates: Vec::new(),
                confidence: 1.0,
            });
        }

        let mut candidates: Vec<Candidate> = snapshot
            .values(dimension)
            .iter()
            .filter_map(|value| {
                let score = similarity(trimmed, value);
                debug!("Similarity '{}' vs '{}': {:.3}", trimmed, value, score);
                if score >= self.similarity_floor {
                    Some(Candidate {
                        value: value.clone(),
                        similarity: score,
                    })
                } else {
                    None
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.value.cmp(&b.value))
        });
        candidates.truncate(MAX_CANDIDATES);

        if candidates.is_empty() {
            return Ok(unresolved(fragment, dimension));
        }

        let confidence = candidates[0].similarity;
        Ok(ResolvedEntity {
            raw_text: fragment.to_string(),
            dimension: dimension.to_string(),
            matched_value: None,
            match_kind: MatchKind::Fuzzy,
            candidates,
            confidence,
        })
    }
}

fn unresolved(fragment: &str, dimension: &str) -> ResolvedEntity {
    ResolvedEntity {
        raw_text: fragment.to_string(),
        dimension: dimension.to_string(),
        matched_value: None,
        match_kind: MatchKind::Unresolved,
        candidates: Vec::new(),
        confidence: 0.0,
    }
}

/// Normalize for scoring: lowercase, strip punctuation, collapse whitespace.
fn normalize(s: &str) -> String {
    let lowered: String = s
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    WHITESPACE.replace_all(lowered.trim(), " ").to_string()
}

/// Similarity in 0..=1: Jaro-Winkler over normalized strings, with a small
/// bonus when one side contains the other (catches "Director" against
/// "Senior Director"), capped at 1.0.
fn similarity(a: &str, b: &str) -> f64 {
    let norm_a = normalize(a);
    let norm_b = normalize(b);

    let jw = jaro_winkler(&norm_a, &norm_b);

    let is_substring = !norm_a.is_empty()
        && !norm_b.is_empty()
        && (norm_a.contains(&norm_b) || norm_b.contains(&norm_a));
    let bonus = if is_substring {
        let len_diff = (norm_a.len() as f64 - norm_b.len() as f64).abs();
        let max_len = norm_a.len().max(norm_b.len()) as f64;
        (1.0 - len_diff / max_len) * 0.1
    } else {
        0.0
    };

    (jw + bonus).min(1.0)
}
