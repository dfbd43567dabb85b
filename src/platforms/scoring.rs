//! Contribution scoring heuristics
//!
//! Fixed rules shared by the generic platforms. Scores are clamped to
//! `[0, 100]` and a contribution is valid at 50 or above.

use serde_json::{json, Value};

use crate::models::Requirement;
use crate::platforms::{ContributionData, ContributionType, ValidationResult};

pub const MAX_SCORE: f64 = 100.0;
pub const VALIDITY_THRESHOLD: f64 = 50.0;
/// Ceiling for an unmerged pull request when a merge is required
pub const UNMERGED_CAP: f64 = VALIDITY_THRESHOLD - 10.0;

pub const BASE_PULL_REQUEST: f64 = 50.0;
pub const BASE_ISSUE: f64 = 30.0;
pub const BASE_COMMIT: f64 = 20.0;
pub const BASE_REVIEW: f64 = 25.0;

const MERGED_BONUS: f64 = 20.0;
const APPROVED_BONUS: f64 = 10.0;
const LINES_BONUS: f64 = 10.0;
const LARGE_CHANGE_BONUS: f64 = 5.0;
const LARGE_CHANGE_LINES: u64 = 100;
const EXCLUDED_LABEL_PENALTY: f64 = 40.0;
const DRAFT_PENALTY: f64 = 20.0;
const KEYWORD_BONUS: f64 = 5.0;
const CLOSED_ISSUE_BONUS: f64 = 10.0;

pub const DOC_KEYWORDS: &[&str] = &["docs", "documentation", "readme", "guide", "tutorial"];
pub const TEST_KEYWORDS: &[&str] = &["test", "tests", "testing", "spec", "coverage"];

pub const DEFAULT_MIN_LINES_CHANGED: u64 = 10;
pub const DEFAULT_EXCLUDED_LABELS: &[&str] = &["invalid", "spam", "wontfix", "duplicate"];

/// Acceptance knobs read from requirement criteria
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringCriteria {
    pub min_lines_changed: u64,
    pub excluded_labels: Vec<String>,
    pub require_merged: bool,
}

impl Default for ScoringCriteria {
    fn default() -> Self {
        Self {
            min_lines_changed: DEFAULT_MIN_LINES_CHANGED,
            excluded_labels: DEFAULT_EXCLUDED_LABELS.iter().map(|s| s.to_string()).collect(),
            require_merged: false,
        }
    }
}

impl ScoringCriteria {
    /// Later requirements override earlier ones; unknown keys are ignored
    pub fn from_requirements(requirements: &[Requirement]) -> Self {
        let mut criteria = Self::default();
        for req in requirements {
            let map = &req.criteria;
            if let Some(min) = lookup(map, &["min_lines_changed", "minLinesChanged"])
                .and_then(Value::as_u64)
            {
                criteria.min_lines_changed = min;
            }
            if let Some(labels) = lookup(map, &["excluded_labels", "excludeLabels"])
                .and_then(Value::as_array)
            {
                criteria.excluded_labels = labels
                    .iter()
                    .filter_map(|l| l.as_str().map(str::to_lowercase))
                    .collect();
            }
            if let Some(required) = lookup(map, &["require_merged", "requireMerged"])
                .and_then(Value::as_bool)
            {
                criteria.require_merged = required;
            }
        }
        criteria
    }
}

fn lookup<'a>(map: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| map.get(*k))
}

pub fn base_score(kind: ContributionType) -> f64 {
    match kind {
        ContributionType::PullRequest => BASE_PULL_REQUEST,
        ContributionType::Issue => BASE_ISSUE,
        ContributionType::Commit => BASE_COMMIT,
        ContributionType::Review => BASE_REVIEW,
    }
}

pub fn contains_keyword(text: &str, keywords: &[&str]) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|word| keywords.contains(&word))
}

/// Running score with its reasons, clamped on completion
#[derive(Debug, Clone)]
pub struct ScoreSheet {
    score: f64,
    reasons: Vec<String>,
    metadata: serde_json::Map<String, Value>,
}

impl ScoreSheet {
    pub fn new(base: f64, reason: impl Into<String>) -> Self {
        Self {
            score: base,
            reasons: vec![reason.into()],
            metadata: serde_json::Map::new(),
        }
    }

    pub fn adjust(&mut self, delta: f64, reason: impl Into<String>) {
        self.score += delta;
        self.reasons.push(reason.into());
    }

    pub fn floor(&mut self, min: f64, reason: impl Into<String>) {
        if self.score < min {
            self.score = min;
            self.reasons.push(reason.into());
        }
    }

    pub fn cap(&mut self, max: f64, reason: impl Into<String>) {
        if self.score > max {
            self.score = max;
            self.reasons.push(reason.into());
        }
    }

    pub fn note(&mut self, reason: impl Into<String>) {
        self.reasons.push(reason.into());
    }

    pub fn meta(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    pub fn score(&self) -> f64 {
        self.score.clamp(0.0, MAX_SCORE)
    }

    pub fn finish(self, threshold: f64) -> ValidationResult {
        let score = self.score();
        ValidationResult {
            valid: score >= threshold,
            score,
            max_score: MAX_SCORE,
            reasons: self.reasons,
            metadata: self.metadata,
        }
    }
}

/// Generic heuristic used by GitHub and GitLab
pub fn score_contribution(
    contribution: &ContributionData,
    requirements: &[Requirement],
) -> ValidationResult {
    let criteria = ScoringCriteria::from_requirements(requirements);
    let kind = contribution.kind;
    let mut sheet = ScoreSheet::new(
        base_score(kind),
        format!("Base score for {}: {}", kind, base_score(kind)),
    );

    match kind {
        ContributionType::PullRequest => {
            if contribution.is_merged() {
                sheet.adjust(MERGED_BONUS, "Merged");
            } else if contribution.is_approved() {
                sheet.adjust(APPROVED_BONUS, "Approved but not merged");
            }

            if let Some(lines) = contribution.lines_changed() {
                if lines >= criteria.min_lines_changed {
                    sheet.adjust(
                        LINES_BONUS,
                        format!("{} lines changed (minimum {})", lines, criteria.min_lines_changed),
                    );
                    if lines >= LARGE_CHANGE_LINES {
                        sheet.adjust(LARGE_CHANGE_BONUS, "Substantial change");
                    }
                } else {
                    sheet.adjust(
                        -LINES_BONUS,
                        format!(
                            "Only {} lines changed (minimum {})",
                            lines, criteria.min_lines_changed
                        ),
                    );
                }
                sheet.meta("lines_changed", json!(lines));
            }

            if contribution.is_draft() {
                sheet.adjust(-DRAFT_PENALTY, "Draft pull request");
            }

            if criteria.require_merged && !contribution.is_merged() {
                sheet.meta("merge_required", json!(true));
            }
        }
        ContributionType::Issue => {
            if contribution.status == "closed" {
                sheet.adjust(CLOSED_ISSUE_BONUS, "Issue closed");
            }
        }
        ContributionType::Commit | ContributionType::Review => {}
    }

    let excluded: Vec<&String> = contribution
        .labels
        .iter()
        .filter(|l| criteria.excluded_labels.contains(&l.to_lowercase()))
        .collect();
    if !excluded.is_empty() {
        sheet.adjust(
            -EXCLUDED_LABEL_PENALTY,
            format!(
                "Excluded label(s): {}",
                excluded.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            ),
        );
        sheet.meta("excluded_labels", json!(excluded));
    }

    let text = contribution.text();
    if contains_keyword(&text, DOC_KEYWORDS) {
        sheet.adjust(KEYWORD_BONUS, "Documentation improvement");
    }
    if contains_keyword(&text, TEST_KEYWORDS) {
        sheet.adjust(KEYWORD_BONUS, "Test improvement");
    }

    // applied last so no bonus can lift it back over the threshold
    if criteria.require_merged && kind == ContributionType::PullRequest && !contribution.is_merged()
    {
        sheet.cap(UNMERGED_CAP, "Requirement demands a merged pull request");
    }
    sheet.finish(VALIDITY_THRESHOLD)
}
