//! Question-side fragment extraction.
//!
//! Deterministic keyword and regex tables turn free text into dimension
//! fragments, an intent, and plan options. Nothing here decides whether a
//! fragment names a real value; that is the resolver's job against the
//! live catalog.

use crate::plan::{PlanOptions, QueryIntent};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One piece of the question believed to name a value of a dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub text: String,
    pub dimension: String,
}

#[derive(Debug, Clone)]
pub struct ExtractedQuestion {
    pub question: String,
    pub fragments: Vec<Fragment>,
    pub intent: QueryIntent,
    pub options: PlanOptions,
}

/// Keyword -> representative function name handed to the resolver.
const FUNCTION_KEYWORDS: &[(&str, &str)] = &[
    ("engineering", "Engineering"),
    ("engineer", "Engineering"),
    ("software", "Engineering"),
    ("technical", "Engineering"),
    ("finance", "Finance"),
    ("financial", "Finance"),
    ("accounting", "Finance"),
    ("treasury", "Finance"),
    ("sales", "Sales"),
    ("selling", "Sales"),
    ("marketing", "Marketing"),
    ("advertising", "Marketing"),
    ("human resources", "Human Resources"),
    ("people operations", "Human Resources"),
    ("talent", "Human Resources"),
    ("legal", "Legal"),
    ("counsel", "Legal"),
    ("compliance", "Legal"),
    ("operations", "Operations"),
    ("creative", "Creative"),
    ("design", "Creative"),
];

/// Keyword -> canonical level form. Longer phrases come first and matched
/// text is masked, so "senior director" never also yields "director".
const LEVEL_KEYWORDS: &[(&str, &str)] = &[
    ("senior director", "Senior Director (M6)"),
    ("sr director", "Senior Director (M6)"),
    ("senior manager", "Sr Manager (M4)"),
    ("sr manager", "Sr Manager (M4)"),
    ("mid-level", "Career (P3)"),
    ("developing", "Developing (P2)"),
    ("principal", "Principal (P6)"),
    ("advanced", "Advanced (P4)"),
    ("director", "Director (M5)"),
    ("manager", "Manager (M3)"),
    ("career", "Career (P3)"),
    ("expert", "Expert (P5)"),
    ("junior", "Entry (P1)"),
    ("senior", "Advanced (P4)"),
    ("entry", "Entry (P1)"),
    ("mgr", "Manager (M3)"),
];

/// Percentile keyword -> metric short name.
const METRIC_KEYWORDS: &[(&str, &str)] = &[
    ("10th", "p10"),
    ("25th", "p25"),
    ("median", "p50"),
    ("50th", "p50"),
    ("75th", "p75"),
    ("90th", "p90"),
];

lazy_static! {
    static ref LEVEL_CODE: Regex = Regex::new(r"\b(p[1-6]|m[3-6])\b").unwrap();
    static ref SHORT_FUNCTION: Regex = Regex::new(r"\b(hr|ops)\b").unwrap();
    static ref VS_WORD: Regex = Regex::new(r"\bvs\.?\b").unwrap();
    static ref ROW_LIMIT: Regex = Regex::new(r"\b(?:top|first|limit)\s+(\d+)\b").unwrap();
    static ref FUNCTION_HINT: Regex =
        Regex::new(r"\b([a-z][a-z-]*)\s+(?:function|department|team)\b").unwrap();
}

/// Words before "function"/"department" that are not function names.
const HINT_STOPWORDS: &[&str] = &[
    "the", "a", "an", "each", "every", "all", "any", "this", "that", "by", "per", "which",
    "what", "job", "one", "same", "other",
];

/// Extracts fragments, intent, and plan options from a question.
pub fn extract(question: &str) -> ExtractedQuestion {
    let text = question.to_lowercase();

    let mut fragments = scan_functions(&text);
    fragments.extend(scan_levels(&text));

    let intent = scan_intent(&text);
    let options = PlanOptions {
        row_limit: scan_row_limit(&text),
        standard_levels_only: scan_standard_only(&text),
        metrics: scan_metrics(&text),
        group_by: scan_group_by(&text),
    };

    debug!(
        "Extracted {} fragments, intent {} from question",
        fragments.len(),
        intent.as_str()
    );
    ExtractedQuestion {
        question: question.to_string(),
        fragments,
        intent,
        options,
    }
}

fn push_fragment(fragments: &mut Vec<Fragment>, text: &str, dimension: &str) {
    if !fragments.iter().any(|f| f.text == text) {
        fragments.push(Fragment {
            text: text.to_string(),
            dimension: dimension.to_string(),
        });
    }
}

fn scan_functions(text: &str) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    for (keyword, function) in FUNCTION_KEYWORDS {
        if text.contains(keyword) {
            push_fragment(&mut fragments, function, "job_function");
        }
    }
    for capture in SHORT_FUNCTION.captures_iter(text) {
        let function = match &capture[1] {
            "hr" => "Human Resources",
            _ => "Operations",
        };
        push_fragment(&mut fragments, function, "job_function");
    }
    // "Creativz function" style mentions: hand the unknown word to the
    // resolver rather than dropping it.
    for capture in FUNCTION_HINT.captures_iter(text) {
        let word = &capture[1];
        if HINT_STOPWORDS.contains(&word)
            || FUNCTION_KEYWORDS.iter().any(|(keyword, _)| keyword.contains(word))
            || fragments.iter().any(|f| f.text.to_lowercase().contains(word))
        {
            continue;
        }
        push_fragment(&mut fragments, word, "job_function");
    }
    fragments
}

fn scan_levels(text: &str) -> Vec<Fragment> {
    // "career" the level word vs "career progression" the intent phrase.
    let mut text = text
        .replace("career progression", " ")
        .replace("career path", " ");

    let mut fragments = Vec::new();
    for (keyword, level) in LEVEL_KEYWORDS {
        if text.contains(keyword) {
            push_fragment(&mut fragments, level, "job_level");
            text = text.replace(keyword, " ");
        }
    }
    for capture in LEVEL_CODE.captures_iter(&text) {
        if let Some(level) = code_level(&capture[1]) {
            push_fragment(&mut fragments, level, "job_level");
        }
    }
    fragments
}

fn code_level(code: &str) -> Option<&'static str> {
    match code {
        "p1" => Some("Entry (P1)"),
        "p2" => Some("Developing (P2)"),
        "p3" => Some("Career (P3)"),
        "p4" => Some("Advanced (P4)"),
        "p5" => Some("Expert (P5)"),
        "p6" => Some("Principal (P6)"),
        "m3" => Some("Manager (M3)"),
        "m4" => Some("Sr Manager (M4)"),
        "m5" => Some("Director (M5)"),
        "m6" => Some("Senior Director (M6)"),
        _ => None,
    }
}

fn scan_intent(text: &str) -> QueryIntent {
    let contains_any = |words: &[&str]| words.iter().any(|w| text.contains(w));

    if contains_any(&["compare", "versus", "difference between"]) || VS_WORD.is_match(text) {
        QueryIntent::Compare
    } else if contains_any(&["show", "display", "chart", "graph", "plot", "visualize"]) {
        QueryIntent::Visualize
    } else if contains_any(&["analyze", "analysis", "breakdown", "examine"]) {
        QueryIntent::Analyze
    } else if contains_any(&["progression", "career path", "growth", "advancement"]) {
        QueryIntent::Progression
    } else {
        QueryIntent::Query
    }
}

fn scan_metrics(text: &str) -> Vec<String> {
    let mut metrics = Vec::new();
    for (keyword, short) in METRIC_KEYWORDS {
        if text.contains(keyword) && !metrics.iter().any(|m| m == short) {
            metrics.push((*short).to_string());
        }
    }
    metrics
}

fn scan_row_limit(text: &str) -> Option<u32> {
    ROW_LIMIT
        .captures(text)
        .and_then(|c| c[1].parse::<u32>().ok())
}

fn scan_standard_only(text: &str) -> bool {
    if text.contains("standard levels") {
        return true;
    }
    let opts_out = text.contains("exclude") || text.contains("excluding") || text.contains("without");
    opts_out
        && (text.contains("roll-up")
            || text.contains("rollup")
            || text.contains("roll up")
            || text.contains("executive"))
}

fn scan_group_by(text: &str) -> Option<String> {
    for phrase in ["by level", "per level", "across levels", "at each level"] {
        if text.contains(phrase) {
            return Some("job_level".to_string());
        }
    }
    for phrase in ["by function", "per function", "across functions"] {
        if text.contains(phrase) {
            return Some("job_function".to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment_texts(extracted: &ExtractedQuestion, dimension: &str) -> Vec<String> {
        extracted
            .fragments
            .iter()
            .filter(|f| f.dimension == dimension)
            .map(|f| f.text.clone())
            .collect()
    }

    #[test]
    fn test_function_and_level_extraction() {
        let extracted = extract("What's the salary for Finance Managers?");
        assert_eq!(fragment_texts(&extracted, "job_function"), vec!["Finance"]);
        assert_eq!(
            fragment_texts(&extracted, "job_level"),
            vec!["Manager (M3)"]
        );
        assert_eq!(extracted.intent, QueryIntent::Query);
    }

    #[test]
    fn test_compare_extraction() {
        let extracted = extract("Compare engineering and sales at director level");
        assert_eq!(
            fragment_texts(&extracted, "job_function"),
            vec!["Engineering", "Sales"]
        );
        assert_eq!(
            fragment_texts(&extracted, "job_level"),
            vec!["Director (M5)"]
        );
        assert_eq!(extracted.intent, QueryIntent::Compare);
    }

    #[test]
    fn test_progression_phrase_is_not_a_level() {
        let extracted = extract("Show me career progression in HR");
        assert_eq!(
            fragment_texts(&extracted, "job_function"),
            vec!["Human Resources"]
        );
        assert!(fragment_texts(&extracted, "job_level").is_empty());
        assert_eq!(extracted.intent, QueryIntent::Visualize);
    }

    #[test]
    fn test_compound_level_masks_its_parts() {
        let extracted = extract("senior director compensation");
        assert_eq!(
            fragment_texts(&extracted, "job_level"),
            vec!["Senior Director (M6)"]
        );
    }

    #[test]
    fn test_level_codes_and_vs() {
        let extracted = extract("p1 vs p3 in engineering");
        assert_eq!(
            fragment_texts(&extracted, "job_level"),
            vec!["Entry (P1)", "Career (P3)"]
        );
        assert_eq!(extracted.intent, QueryIntent::Compare);
    }

    #[test]
    fn test_percentile_code_does_not_leak_into_levels() {
        let extracted = extract("90th percentile for senior engineers");
        assert_eq!(
            fragment_texts(&extracted, "job_level"),
            vec!["Advanced (P4)"]
        );
        assert_eq!(extracted.options.metrics, vec!["p90"]);
    }

    #[test]
    fn test_row_limit_and_group_by() {
        let extracted = extract("Top 10 creative salaries by level");
        assert_eq!(extracted.options.row_limit, Some(10));
        assert_eq!(extracted.options.group_by.as_deref(), Some("job_level"));
        assert_eq!(fragment_texts(&extracted, "job_function"), vec!["Creative"]);
    }

    #[test]
    fn test_standard_levels_toggle() {
        assert!(extract("creative pay, standard levels only").options.standard_levels_only);
        assert!(extract("engineering excluding roll-up rows").options.standard_levels_only);
        assert!(!extract("creative pay").options.standard_levels_only);
    }

    #[test]
    fn test_unknown_function_word_becomes_a_fragment() {
        let extracted = extract("What does the Creativz function pay?");
        assert_eq!(fragment_texts(&extracted, "job_function"), vec!["creativz"]);

        // Known keywords and stopwords are not duplicated by the hint.
        let known = extract("What does the creative function pay?");
        assert_eq!(fragment_texts(&known, "job_function"), vec!["Creative"]);
        let stopword = extract("What does each function pay?");
        assert!(fragment_texts(&stopword, "job_function").is_empty());
    }

    #[test]
    fn test_default_intent_is_query() {
        assert_eq!(extract("creative pay").intent, QueryIntent::Query);
        assert_eq!(
            extract("median for operations").intent,
            QueryIntent::Query
        );
    }
}
