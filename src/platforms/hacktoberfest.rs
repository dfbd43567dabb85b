//! Hacktoberfest rules on top of the GitHub adapter
//!
//! Wraps a shared [`GitHubAdapter`] for everything except scoring. Only pull
//! requests opened in October of the configured year count, spam/invalid
//! labels disqualify, and unmerged unapproved PRs are capped below the
//! acceptance threshold.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::error::{ExternalApiError, Result};
use crate::models::Requirement;
use crate::platforms::scoring::{contains_keyword, ScoreSheet, DOC_KEYWORDS, TEST_KEYWORDS};
use crate::platforms::{
    AdapterHealth, AuthOutcome, ContributionData, ContributionType, GitHubAdapter,
    PlatformAdapter, ProfileCheck, UserProfile, ValidationResult, HACKTOBERFEST,
};
use crate::rate_limit::RateLimitInfo;

pub const VALIDITY_THRESHOLD: f64 = 60.0;
pub const DEFAULT_REQUIRED_PRS: usize = 4;
pub const ACCEPTED_LABEL: &str = "hacktoberfest-accepted";
pub const PARTICIPATING_TOPIC: &str = "hacktoberfest";
pub const DISQUALIFYING_LABELS: &[&str] = &["spam", "invalid", "hacktoberfest-invalid"];

const BASE_SCORE: f64 = 50.0;
const MERGED_BONUS: f64 = 20.0;
const APPROVED_BONUS: f64 = 10.0;
const TOPIC_BONUS: f64 = 10.0;
const DRAFT_PENALTY: f64 = 20.0;
const ACCEPTED_FLOOR: f64 = 80.0;
const UNAPPROVED_CAP: f64 = 40.0;
const KEYWORD_BONUS: f64 = 5.0;
const DESCRIPTION_BONUS: f64 = 5.0;
const DESCRIPTION_SHORT: usize = 100;
const DESCRIPTION_LONG: usize = 300;
const LINES_BONUS: f64 = 10.0;
const TRIVIAL_PENALTY: f64 = 10.0;
const TRIVIAL_LINES: u64 = 3;
const MIN_QUALITY_LINES: u64 = 10;
const MAX_QUALITY_LINES: u64 = 1000;

/// Years a campaign can be configured for
pub const EVENT_YEARS: std::ops::RangeInclusive<i32> = 2014..=9999;

/// October 1st 00:00:00 to October 31st 23:59:59 UTC; `None` outside
/// [`EVENT_YEARS`]
pub fn event_window(year: i32) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    if !EVENT_YEARS.contains(&year) {
        return None;
    }
    let start = Utc.with_ymd_and_hms(year, 10, 1, 0, 0, 0).single()?;
    let end = Utc.with_ymd_and_hms(year, 10, 31, 23, 59, 59).single()?;
    Some((start, end))
}

fn rejected(reason: impl Into<String>) -> ScoreSheet {
    ScoreSheet::new(0.0, reason)
}

/// Score a contribution under the event rules
pub fn score_hacktoberfest(contribution: &ContributionData, year: i32) -> ValidationResult {
    if let Some(label) = DISQUALIFYING_LABELS
        .iter()
        .find(|label| contribution.has_label(label))
    {
        // checked before eligibility so a spam label always disqualifies
        let mut sheet = rejected(format!("Disqualified: labelled '{}'", label));
        sheet.meta("disqualified", json!(true));
        return sheet.finish(VALIDITY_THRESHOLD);
    }

    if contribution.kind != ContributionType::PullRequest {
        let mut sheet = rejected(format!(
            "Only pull requests count towards Hacktoberfest (got {})",
            contribution.kind
        ));
        sheet.meta("eligible", json!(false));
        return sheet.finish(VALIDITY_THRESHOLD);
    }

    let Some((start, end)) = event_window(year) else {
        let mut sheet = rejected(format!("No Hacktoberfest event in {}", year));
        sheet.meta("eligible", json!(false));
        return sheet.finish(VALIDITY_THRESHOLD);
    };
    if contribution.created_at < start || contribution.created_at > end {
        let mut sheet = rejected(format!(
            "Created {} outside Hacktoberfest {} (Oct 1-31)",
            contribution.created_at.format("%Y-%m-%d"),
            year
        ));
        sheet.meta("eligible", json!(false));
        sheet.meta("outside_window", json!(true));
        return sheet.finish(VALIDITY_THRESHOLD);
    }

    let accepted = contribution.has_label(ACCEPTED_LABEL);
    let merged = contribution.is_merged();
    let approved = contribution.is_approved() || accepted;

    let mut sheet = ScoreSheet::new(BASE_SCORE, format!("Base score for pull request: {}", BASE_SCORE));
    sheet.meta("disqualified", json!(false));
    sheet.meta("accepted", json!(accepted));

    if merged {
        sheet.adjust(MERGED_BONUS, "Merged");
    } else if approved {
        sheet.adjust(APPROVED_BONUS, "Approved by a maintainer");
    }

    if contribution
        .repository_topics()
        .iter()
        .any(|t| t.eq_ignore_ascii_case(PARTICIPATING_TOPIC))
    {
        sheet.adjust(TOPIC_BONUS, "Repository participates in Hacktoberfest");
    }

    if contribution.is_draft() {
        sheet.adjust(-DRAFT_PENALTY, "Draft pull request");
    }

    let description_len = contribution
        .description
        .as_deref()
        .map(|d| d.trim().chars().count())
        .unwrap_or(0);
    if description_len >= DESCRIPTION_SHORT {
        sheet.adjust(DESCRIPTION_BONUS, "Descriptive pull request body");
    }
    if description_len >= DESCRIPTION_LONG {
        sheet.adjust(DESCRIPTION_BONUS, "Detailed pull request body");
    }

    if let Some(lines) = contribution.lines_changed() {
        if lines < TRIVIAL_LINES {
            sheet.adjust(-TRIVIAL_PENALTY, format!("Trivial change ({} lines)", lines));
        } else if (MIN_QUALITY_LINES..=MAX_QUALITY_LINES).contains(&lines) {
            sheet.adjust(LINES_BONUS, format!("Meaningful change ({} lines)", lines));
        }
        sheet.meta("lines_changed", json!(lines));
    }

    let text = contribution.text();
    if contains_keyword(&text, DOC_KEYWORDS) {
        sheet.adjust(KEYWORD_BONUS, "Documentation improvement");
    }
    if contains_keyword(&text, TEST_KEYWORDS) {
        sheet.adjust(KEYWORD_BONUS, "Test improvement");
    }

    if accepted {
        sheet.floor(ACCEPTED_FLOOR, format!("Labelled '{}'", ACCEPTED_LABEL));
    }

    if !merged && !approved {
        sheet.cap(UNAPPROVED_CAP, "Not merged or approved yet");
    }

    sheet.finish(VALIDITY_THRESHOLD)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPullRequest {
    pub title: String,
    pub url: String,
    pub repository: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub score: f64,
    pub valid: bool,
    pub reasons: Vec<String>,
}

impl ScoredPullRequest {
    fn new(c: &ContributionData, r: &ValidationResult) -> Self {
        Self {
            title: c.title.clone(),
            url: c.url.clone(),
            repository: c.repository.full_name.clone(),
            created_at: c.created_at,
            status: c.status.clone(),
            score: r.score,
            valid: r.valid,
            reasons: r.reasons.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HacktoberfestProgress {
    pub valid_prs: usize,
    pub required_prs: usize,
    pub completed: bool,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategorizedPullRequests {
    pub valid: Vec<ScoredPullRequest>,
    pub pending: Vec<ScoredPullRequest>,
    pub invalid: Vec<ScoredPullRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HacktoberfestStatus {
    pub username: String,
    pub year: i32,
    pub progress: HacktoberfestProgress,
    pub total_score: f64,
    pub pull_requests: CategorizedPullRequests,
    pub recommendations: Vec<String>,
}

/// Categorise scored pull requests and derive progress
pub fn summarize_status(
    username: &str,
    year: i32,
    required_prs: usize,
    scored: &[(ContributionData, ValidationResult)],
) -> HacktoberfestStatus {
    let mut prs = CategorizedPullRequests::default();
    let mut total_score = 0.0;
    let mut disqualified = 0;

    for (c, r) in scored {
        let entry = ScoredPullRequest::new(c, r);
        if r.valid {
            total_score += r.score;
            prs.valid.push(entry);
        } else if r.is_disqualified() {
            disqualified += 1;
            prs.invalid.push(entry);
        } else if c.status == "open" && c.kind == ContributionType::PullRequest {
            prs.pending.push(entry);
        } else {
            prs.invalid.push(entry);
        }
    }

    let valid_prs = prs.valid.len();
    let completed = valid_prs >= required_prs;
    let percentage = if required_prs == 0 {
        100.0
    } else {
        (valid_prs as f64 / required_prs as f64 * 100.0).min(100.0)
    };

    let mut recommendations = Vec::new();
    if completed {
        recommendations.push(format!(
            "Congratulations! You completed Hacktoberfest {} with {} valid pull requests",
            year, valid_prs
        ));
    } else {
        let missing = required_prs - valid_prs;
        recommendations.push(format!(
            "Submit {} more valid pull request{} to complete Hacktoberfest {}",
            missing,
            if missing == 1 { "" } else { "s" },
            year
        ));
    }
    if scored.is_empty() {
        recommendations.push(format!(
            "Look for repositories with the '{}' topic to get started",
            PARTICIPATING_TOPIC
        ));
    }
    if !prs.pending.is_empty() {
        recommendations.push(format!(
            "{} pull request{} awaiting maintainer review or merge",
            prs.pending.len(),
            if prs.pending.len() == 1 { " is" } else { "s are" }
        ));
    }
    if disqualified > 0 {
        recommendations.push(
            "Some pull requests were labelled spam or invalid; focus on meaningful contributions"
                .to_string(),
        );
    }

    HacktoberfestStatus {
        username: username.to_string(),
        year,
        progress: HacktoberfestProgress {
            valid_prs,
            required_prs,
            completed,
            percentage,
        },
        total_score,
        pull_requests: prs,
        recommendations,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub username: String,
    pub score: f64,
    pub valid_prs: usize,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Descending by score; the sort is stable so ties keep input order
pub fn rank_entries(mut entries: Vec<LeaderboardEntry>) -> Vec<LeaderboardEntry> {
    entries.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.rank = (i + 1) as u32;
    }
    entries
}

pub struct HacktoberfestAdapter {
    github: Arc<GitHubAdapter>,
    year: i32,
    required_prs: usize,
}

impl HacktoberfestAdapter {
    pub fn new(github: Arc<GitHubAdapter>, year: i32, required_prs: usize) -> Self {
        Self {
            github,
            year,
            required_prs,
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    async fn enrich_topics(&self, contributions: &mut [ContributionData]) -> Result<()> {
        let mut cache: HashMap<String, Vec<String>> = HashMap::new();
        for c in contributions.iter_mut() {
            let full_name = c.repository.full_name.clone();
            if !cache.contains_key(&full_name) {
                let topics = self.github.repository_topics(&full_name).await?;
                cache.insert(full_name.clone(), topics);
            }
            if let Some(topics) = cache.get(&full_name) {
                c.metadata
                    .insert("repository_topics".into(), json!(topics));
            }
        }
        Ok(())
    }

    pub async fn hacktoberfest_status(&self, username: &str) -> Result<HacktoberfestStatus> {
        let (start, end) = event_window(self.year).ok_or_else(|| {
            ExternalApiError::configuration(
                HACKTOBERFEST,
                format!("No Hacktoberfest event in {}", self.year),
            )
        })?;
        let prs = self.fetch_contributions(username, start, end).await?;
        let scored: Vec<_> = prs
            .into_iter()
            .map(|c| {
                let r = score_hacktoberfest(&c, self.year);
                (c, r)
            })
            .collect();
        let status = summarize_status(username, self.year, self.required_prs, &scored);
        info!(
            "Hacktoberfest {} status for {}: {}/{} valid",
            self.year, username, status.progress.valid_prs, self.required_prs
        );
        Ok(status)
    }

    /// Score every user concurrently; a failed user ranks with score 0
    pub async fn hacktoberfest_leaderboard(&self, usernames: &[String]) -> Vec<LeaderboardEntry> {
        let statuses = join_all(usernames.iter().map(|u| self.hacktoberfest_status(u))).await;

        let entries = usernames
            .iter()
            .zip(statuses)
            .map(|(username, status)| match status {
                Ok(s) => LeaderboardEntry {
                    rank: 0,
                    username: username.clone(),
                    score: s.total_score,
                    valid_prs: s.progress.valid_prs,
                    completed: s.progress.completed,
                    error: None,
                },
                Err(e) => {
                    warn!("Hacktoberfest scoring failed for {}: {}", username, e);
                    LeaderboardEntry {
                        rank: 0,
                        username: username.clone(),
                        score: 0.0,
                        valid_prs: 0,
                        completed: false,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect();

        rank_entries(entries)
    }
}

#[async_trait]
impl PlatformAdapter for HacktoberfestAdapter {
    fn name(&self) -> &'static str {
        HACKTOBERFEST
    }

    async fn authenticate(&self, user_id: &str, auth_code: Option<&str>) -> Result<AuthOutcome> {
        self.github.authenticate(user_id, auth_code).await
    }

    async fn validate_profile(&self, username: &str) -> Result<ProfileCheck> {
        self.github.validate_profile(username).await
    }

    /// Pull requests only, with repository topics attached
    async fn fetch_contributions(
        &self,
        username: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ContributionData>> {
        let mut prs = self.github.fetch_pull_requests(username, start, end).await?;
        self.enrich_topics(&mut prs).await?;
        for pr in prs.iter_mut() {
            pr.platform = HACKTOBERFEST.to_string();
        }
        crate::platforms::sort_newest_first(&mut prs);
        Ok(prs)
    }

    fn validate_contribution(
        &self,
        contribution: &ContributionData,
        _requirements: &[Requirement],
    ) -> ValidationResult {
        score_hacktoberfest(contribution, self.year)
    }

    async fn get_user_profile(&self, username: &str) -> Result<UserProfile> {
        self.github.get_user_profile(username).await
    }

    fn get_rate_limit(&self) -> RateLimitInfo {
        self.github.get_rate_limit()
    }

    async fn health_check(&self) -> AdapterHealth {
        let mut health = self.github.health_check().await;
        health.platform = HACKTOBERFEST.to_string();
        health
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::fixtures::pull_request;

    const YEAR: i32 = 2024;

    fn october_pr(id: &str) -> ContributionData {
        let mut pr = pull_request(id);
        pr.created_at = Utc.with_ymd_and_hms(YEAR, 10, 12, 9, 0, 0).unwrap();
        pr
    }

    fn merged(mut pr: ContributionData) -> ContributionData {
        pr.merged_at = Some(pr.created_at + chrono::Duration::days(1));
        pr.status = "merged".into();
        pr.metadata.insert("additions".into(), json!(40));
        pr.metadata.insert("deletions".into(), json!(5));
        pr
    }

    #[test]
    fn test_spam_label_disqualifies() {
        for label in ["spam", "hacktoberfest-invalid", "Invalid"] {
            let mut pr = merged(october_pr("1"));
            pr.labels = vec![label.to_string(), ACCEPTED_LABEL.to_string()];
            let result = score_hacktoberfest(&pr, YEAR);
            assert_eq!(result.score, 0.0);
            assert!(!result.valid);
            assert!(result.is_disqualified());
        }
    }

    #[test]
    fn test_spam_label_disqualifies_outside_october() {
        let mut pr = merged(october_pr("11"));
        pr.created_at = Utc.with_ymd_and_hms(YEAR, 11, 5, 12, 0, 0).unwrap();
        pr.labels = vec!["spam".to_string()];
        let result = score_hacktoberfest(&pr, YEAR);
        assert_eq!(result.score, 0.0);
        assert!(!result.valid);
        assert!(result.is_disqualified());
    }

    #[test]
    fn test_invalid_label_disqualifies_issue() {
        let mut issue = october_pr("12");
        issue.kind = ContributionType::Issue;
        issue.labels = vec!["hacktoberfest-invalid".to_string()];
        let result = score_hacktoberfest(&issue, YEAR);
        assert_eq!(result.score, 0.0);
        assert!(!result.valid);
        assert!(result.is_disqualified());
    }

    #[test]
    fn test_outside_window_is_zero() {
        let mut pr = merged(october_pr("2"));
        pr.created_at = Utc.with_ymd_and_hms(YEAR, 11, 1, 0, 0, 0).unwrap();
        let result = score_hacktoberfest(&pr, YEAR);
        assert_eq!(result.score, 0.0);
        assert!(!result.valid);

        pr.created_at = Utc.with_ymd_and_hms(YEAR, 9, 30, 23, 59, 59).unwrap();
        assert_eq!(score_hacktoberfest(&pr, YEAR).score, 0.0);

        pr.created_at = Utc.with_ymd_and_hms(YEAR, 10, 31, 23, 59, 59).unwrap();
        assert!(score_hacktoberfest(&pr, YEAR).valid);
    }

    #[test]
    fn test_event_window_bounds() {
        assert!(event_window(2013).is_none());
        assert!(event_window(i32::MAX).is_none());
        let (start, end) = event_window(YEAR).unwrap();
        assert_eq!(start.format("%Y-%m-%d").to_string(), "2024-10-01");
        assert_eq!(end.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-10-31 23:59:59");

        let result = score_hacktoberfest(&merged(october_pr("13")), 1999);
        assert_eq!(result.score, 0.0);
        assert!(!result.valid);
    }

    #[test]
    fn test_non_pull_request_rejected() {
        let mut issue = october_pr("3");
        issue.kind = ContributionType::Issue;
        let result = score_hacktoberfest(&issue, YEAR);
        assert_eq!(result.score, 0.0);
        assert!(!result.valid);
    }

    #[test]
    fn test_unmerged_unapproved_capped() {
        let mut pr = october_pr("4");
        pr.description = Some("x".repeat(400));
        pr.metadata
            .insert("repository_topics".into(), json!(["hacktoberfest"]));
        pr.metadata.insert("additions".into(), json!(200));
        let result = score_hacktoberfest(&pr, YEAR);
        assert_eq!(result.score, 40.0);
        assert!(!result.valid);
    }

    #[test]
    fn test_accepted_label_floor() {
        let mut pr = october_pr("5");
        pr.labels = vec![ACCEPTED_LABEL.to_string()];
        pr.metadata.insert("additions".into(), json!(1));
        let result = score_hacktoberfest(&pr, YEAR);
        assert_eq!(result.score, 80.0);
        assert!(result.valid);
    }

    #[test]
    fn test_merged_with_topic() {
        let mut pr = merged(october_pr("6"));
        pr.metadata
            .insert("repository_topics".into(), json!(["rust", "Hacktoberfest"]));
        let result = score_hacktoberfest(&pr, YEAR);
        // base 50 + merged 20 + topic 10 + lines 10
        assert_eq!(result.score, 90.0);
        assert!(result.valid);
    }

    #[test]
    fn test_threshold_is_sixty() {
        let mut pr = october_pr("7");
        pr.metadata.insert("approved".into(), json!(true));
        // base 50 + approved 10
        let result = score_hacktoberfest(&pr, YEAR);
        assert_eq!(result.score, 60.0);
        assert!(result.valid);

        pr.metadata.insert("draft".into(), json!(true));
        assert!(!score_hacktoberfest(&pr, YEAR).valid);
    }

    #[test]
    fn test_status_completion() {
        let scored: Vec<_> = (0..4)
            .map(|i| {
                let pr = merged(october_pr(&i.to_string()));
                let r = score_hacktoberfest(&pr, YEAR);
                (pr, r)
            })
            .collect();
        let status = summarize_status("octocat", YEAR, DEFAULT_REQUIRED_PRS, &scored);
        assert!(status.progress.completed);
        assert_eq!(status.progress.valid_prs, 4);
        assert_eq!(status.progress.percentage, 100.0);

        let status = summarize_status("octocat", YEAR, DEFAULT_REQUIRED_PRS, &scored[..3]);
        assert!(!status.progress.completed);
        assert!(status.recommendations[0].contains("1 more valid pull request "));
    }

    #[test]
    fn test_status_categories() {
        let open = october_pr("a");
        let mut spam = october_pr("b");
        spam.labels = vec!["spam".into()];
        let good = merged(october_pr("c"));
        let scored: Vec<_> = [open, spam, good]
            .into_iter()
            .map(|c| {
                let r = score_hacktoberfest(&c, YEAR);
                (c, r)
            })
            .collect();
        let status = summarize_status("octocat", YEAR, DEFAULT_REQUIRED_PRS, &scored);
        assert_eq!(status.pull_requests.valid.len(), 1);
        assert_eq!(status.pull_requests.pending.len(), 1);
        assert_eq!(status.pull_requests.invalid.len(), 1);
        assert!(status.recommendations.iter().any(|r| r.contains("spam")));
    }

    #[test]
    fn test_rank_entries_stable() {
        let entry = |name: &str, score: f64| LeaderboardEntry {
            rank: 0,
            username: name.to_string(),
            score,
            valid_prs: 0,
            completed: false,
            error: None,
        };
        let ranked = rank_entries(vec![
            entry("a", 10.0),
            entry("b", 90.0),
            entry("c", 10.0),
            entry("d", 50.0),
        ]);
        let order: Vec<_> = ranked.iter().map(|e| e.username.as_str()).collect();
        assert_eq!(order, vec!["b", "d", "a", "c"]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[3].rank, 4);
    }
}
