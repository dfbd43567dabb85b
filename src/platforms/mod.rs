//! External platform adapters
//!
//! Each adapter owns authentication, contribution fetching/normalisation and
//! scoring for one code-hosting platform. Adapters are long-lived and shared
//! behind `Arc<dyn PlatformAdapter>` in the gateway registry.

pub mod github;
pub mod gitlab;
pub mod hacktoberfest;
pub mod http;
pub mod oauth;
pub mod scoring;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{ExternalApiError, Result};
use crate::models::Requirement;
use crate::rate_limit::{HealthStatus, RateLimitInfo};

pub use github::GitHubAdapter;
pub use gitlab::GitLabAdapter;
pub use hacktoberfest::HacktoberfestAdapter;

pub const GITHUB: &str = "github";
pub const GITLAB: &str = "gitlab";
pub const HACKTOBERFEST: &str = "hacktoberfest";

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Page size used for every paginated listing
pub const PER_PAGE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionType {
    PullRequest,
    Issue,
    Commit,
    Review,
}

impl ContributionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PullRequest => "pull_request",
            Self::Issue => "issue",
            Self::Commit => "commit",
            Self::Review => "review",
        }
    }

    /// Accepts the platform spellings (`merge_request`, `pr`, ...)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pull_request" | "pr" | "merge_request" | "mr" => Some(Self::PullRequest),
            "issue" => Some(Self::Issue),
            "commit" => Some(Self::Commit),
            "review" => Some(Self::Review),
            _ => None,
        }
    }
}

impl fmt::Display for ContributionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub url: String,
}

impl RepositoryRef {
    pub fn from_full_name(full_name: &str, web_base: &str) -> Self {
        let (owner, name) = full_name.rsplit_once('/').unwrap_or(("", full_name));
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            full_name: full_name.to_string(),
            url: format!("{}/{}", web_base.trim_end_matches('/'), full_name),
        }
    }
}

/// Normalised unit of external activity. Re-derived on every fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributionData {
    pub id: String,
    pub platform: String,
    #[serde(rename = "type")]
    pub kind: ContributionType,
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub repository: RepositoryRef,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    /// `open`, `closed`, `merged`
    pub status: String,
    pub labels: Vec<String>,
    /// Platform specific bag: `additions`, `deletions`, `draft`, `approved`,
    /// `repository_topics`, ...
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ContributionData {
    /// Stable identity across fetches
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.platform, self.id)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
    }

    pub fn is_merged(&self) -> bool {
        self.merged_at.is_some()
            || self.status == "merged"
            || self.meta_bool("merged").unwrap_or(false)
    }

    pub fn is_approved(&self) -> bool {
        self.meta_bool("approved").unwrap_or(false)
    }

    pub fn is_draft(&self) -> bool {
        self.meta_bool("draft").unwrap_or(false)
    }

    pub fn lines_changed(&self) -> Option<u64> {
        let additions = self.meta_u64("additions");
        let deletions = self.meta_u64("deletions");
        match (additions, deletions) {
            (None, None) => self.meta_u64("changes"),
            (a, d) => Some(a.unwrap_or(0) + d.unwrap_or(0)),
        }
    }

    pub fn repository_topics(&self) -> Vec<String> {
        self.metadata
            .get("repository_topics")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Title and description, lowercased, for keyword checks
    pub fn text(&self) -> String {
        let mut text = self.title.to_lowercase();
        if let Some(desc) = &self.description {
            text.push('\n');
            text.push_str(&desc.to_lowercase());
        }
        text
    }

    pub fn meta_bool(&self, key: &str) -> Option<bool> {
        self.metadata.get(key).and_then(|v| v.as_bool())
    }

    pub fn meta_u64(&self, key: &str) -> Option<u64> {
        self.metadata.get(key).and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_str().and_then(|s| s.trim_end_matches('+').parse().ok()))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub score: f64,
    pub max_score: f64,
    pub reasons: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ValidationResult {
    /// Result for an item that could not be evaluated at all
    pub fn degraded(reason: impl Into<String>) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert("degraded".to_string(), serde_json::Value::Bool(true));
        Self {
            valid: false,
            score: 0.0,
            max_score: 100.0,
            reasons: vec![reason.into()],
            metadata,
        }
    }

    pub fn is_disqualified(&self) -> bool {
        self.metadata
            .get("disqualified")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub client_id: String,
    pub client_secret: String,
    pub base_url: String,
    /// OAuth host, e.g. `https://github.com`
    pub oauth_base_url: String,
    pub redirect_uri: Option<String>,
    pub scopes: Vec<String>,
    pub timeout: Duration,
    /// Server token for API reads (raises anonymous limits)
    pub api_token: Option<String>,
}

impl AdapterConfig {
    /// Fail fast, platform-tagged, on missing fields
    pub fn validate(&self, platform: &str) -> std::result::Result<(), ExternalApiError> {
        if self.client_id.trim().is_empty() {
            return Err(ExternalApiError::configuration(platform, "client_id is required"));
        }
        if self.client_secret.trim().is_empty() {
            return Err(ExternalApiError::configuration(platform, "client_secret is required"));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ExternalApiError::configuration(
                platform,
                format!("base_url must be an http(s) URL, got '{}'", self.base_url),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ExternalApiError::configuration(platform, "timeout must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthOutcome {
    Redirect {
        url: String,
        state: String,
    },
    Tokens {
        access_token: String,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        scopes: Vec<String>,
        username: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileCheck {
    pub valid: bool,
    pub profile_url: Option<String>,
    pub verified: bool,
    pub public_profile: bool,
}

impl ProfileCheck {
    pub fn not_found() -> Self {
        Self {
            valid: false,
            profile_url: None,
            verified: false,
            public_profile: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub platform: String,
    pub id: String,
    pub username: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub profile_url: String,
    pub bio: Option<String>,
    pub public_repos: Option<u64>,
    pub followers: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterHealth {
    pub platform: String,
    pub status: HealthStatus,
    pub rate_limit: RateLimitInfo,
    pub message: Option<String>,
}

#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Registry key
    fn name(&self) -> &'static str;

    /// Without a code: OAuth redirect. With a code: token exchange plus
    /// profile verification.
    async fn authenticate(&self, user_id: &str, auth_code: Option<&str>) -> Result<AuthOutcome>;

    /// A missing user is a normal outcome, not an error
    async fn validate_profile(&self, username: &str) -> Result<ProfileCheck>;

    /// Merged PRs/MRs, issues and commits in `[start, end]`, newest first
    async fn fetch_contributions(
        &self,
        username: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ContributionData>>;

    fn validate_contribution(
        &self,
        contribution: &ContributionData,
        requirements: &[Requirement],
    ) -> ValidationResult;

    async fn get_user_profile(&self, username: &str) -> Result<UserProfile>;

    fn get_rate_limit(&self) -> RateLimitInfo;

    async fn health_check(&self) -> AdapterHealth;
}

/// Newest first, stable for equal timestamps
pub fn sort_newest_first(contributions: &mut [ContributionData]) {
    contributions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn pull_request(id: &str) -> ContributionData {
        ContributionData {
            id: id.to_string(),
            platform: GITHUB.to_string(),
            kind: ContributionType::PullRequest,
            title: "Fix race in watcher".to_string(),
            description: Some("Fixes a race condition when the watcher restarts".to_string()),
            url: format!("https://github.com/acme/widgets/pull/{}", id),
            repository: RepositoryRef::from_full_name("acme/widgets", "https://github.com"),
            author: "octocat".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 10, 10, 12, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 10, 11, 12, 0, 0).unwrap(),
            merged_at: None,
            closed_at: None,
            status: "open".to_string(),
            labels: vec![],
            metadata: serde_json::Map::new(),
        }
    }
}
