//! GitHub adapter
//!
//! Uses the Search API to find a user's pull requests, issues and commits in
//! a date window, then enriches pull requests with diff stats and review
//! approval from the pulls API.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{ExternalApiError, ExternalErrorKind, Result};
use crate::models::Requirement;
use crate::platforms::http::{ApiClient, AuthHeader};
use crate::platforms::oauth::{self, OAuthEndpoints};
use crate::platforms::{
    scoring, sort_newest_first, AdapterConfig, AdapterHealth, AuthOutcome, ContributionData,
    ContributionType, PlatformAdapter, ProfileCheck, RepositoryRef, UserProfile,
    ValidationResult, GITHUB, PER_PAGE,
};
use crate::rate_limit::{HealthStatus, RateLimitInfo, RateLimitTracker};

/// Unauthenticated core limit until the first response says otherwise
const DEFAULT_LIMIT: u32 = 60;
/// Search stops at 1000 results; later pages answer 422
const SEARCH_MAX_PAGES: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub public_repos: Option<u64>,
    #[serde(default)]
    pub followers: Option<u64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "type")]
    pub account_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubLabel {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestRef {
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
}

/// Item of `/search/issues` (issues and pull requests)
#[derive(Debug, Clone, Deserialize)]
pub struct SearchIssueItem {
    pub id: u64,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    pub html_url: String,
    pub repository_url: String,
    pub user: GitHubUser,
    #[serde(default)]
    pub labels: Vec<GitHubLabel>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub draft: Option<bool>,
    #[serde(default)]
    pub pull_request: Option<PullRequestRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchCommitItem {
    pub sha: String,
    pub html_url: String,
    pub commit: CommitDetail,
    pub repository: SearchRepository,
    #[serde(default)]
    pub author: Option<GitHubUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitDetail {
    pub message: String,
    pub author: CommitAuthor,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitAuthor {
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRepository {
    pub full_name: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullDetails {
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub changed_files: u64,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub draft: bool,
}

#[derive(Debug, Deserialize)]
struct Review {
    state: String,
}

#[derive(Debug, Deserialize)]
struct Topics {
    #[serde(default)]
    names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    rate: RateLimitCore,
}

#[derive(Debug, Deserialize)]
struct RateLimitCore {
    limit: u32,
    remaining: u32,
    reset: i64,
}

pub struct GitHubAdapter {
    config: AdapterConfig,
    api: ApiClient,
    oauth: OAuthEndpoints,
    rate_limit: Arc<RateLimitTracker>,
}

impl GitHubAdapter {
    /// Validate config, build the client and check connectivity
    pub async fn initialize(config: AdapterConfig) -> Result<Self> {
        let adapter = Self::build(config)?;
        adapter.refresh_rate_limit().await?;
        if adapter.config.api_token.is_some() {
            info!("GitHub adapter initialized with API token");
        } else {
            warn!("GitHub adapter initialized WITHOUT API token - rate limits will be very low");
        }
        Ok(adapter)
    }

    /// Build without the connectivity check
    pub fn build(config: AdapterConfig) -> Result<Self> {
        config.validate(GITHUB)?;
        let rate_limit = Arc::new(RateLimitTracker::new(GITHUB, DEFAULT_LIMIT));
        let api = ApiClient::new(GITHUB, &config, AuthHeader::Bearer, rate_limit.clone())?;
        let oauth = OAuthEndpoints::github(&config);
        Ok(Self {
            config,
            api,
            oauth,
            rate_limit,
        })
    }

    fn web_base(&self) -> &str {
        self.config.oauth_base_url.trim_end_matches('/')
    }

    /// `/rate_limit` does not count against the budget
    async fn refresh_rate_limit(&self) -> Result<RateLimitInfo> {
        let data: RateLimitResponse = self.api.get("rate_limit").await?;
        let info = RateLimitInfo {
            limit: data.rate.limit,
            remaining: data.rate.remaining,
            reset_time: DateTime::from_timestamp(data.rate.reset, 0).unwrap_or_else(Utc::now),
        };
        self.rate_limit.record(info.clone());
        Ok(info)
    }

    async fn search_issues(
        &self,
        username: &str,
        kind: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SearchIssueItem>> {
        let query = format!(
            "author:{} type:{} created:{}..{}",
            username,
            kind,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        );
        let encoded = urlencoding::encode(&query).into_owned();
        self.api
            .paginate_capped(
                |page| {
                    format!(
                        "search/issues?q={}&sort=created&order=desc&per_page={}&page={}",
                        encoded, PER_PAGE, page
                    )
                },
                |body: SearchResponse<SearchIssueItem>| body.items,
                SEARCH_MAX_PAGES,
            )
            .await
    }

    async fn search_commits(
        &self,
        username: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SearchCommitItem>> {
        let query = format!(
            "author:{} author-date:{}..{}",
            username,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        );
        let encoded = urlencoding::encode(&query).into_owned();
        self.api
            .paginate_capped(
                |page| {
                    format!(
                        "search/commits?q={}&sort=author-date&order=desc&per_page={}&page={}",
                        encoded, PER_PAGE, page
                    )
                },
                |body: SearchResponse<SearchCommitItem>| body.items,
                SEARCH_MAX_PAGES,
            )
            .await
    }

    async fn pull_details(&self, repo: &RepositoryRef, number: &str) -> Result<PullDetails> {
        self.api
            .get(&format!("repos/{}/pulls/{}", repo.full_name, number))
            .await
    }

    async fn is_approved(&self, repo: &RepositoryRef, number: &str) -> Result<bool> {
        let reviews: Vec<Review> = self
            .api
            .get(&format!(
                "repos/{}/pulls/{}/reviews?per_page={}",
                repo.full_name, number, PER_PAGE
            ))
            .await?;
        Ok(reviews.iter().any(|r| r.state == "APPROVED"))
    }

    /// Topics of a repository; empty when the repository is gone
    pub async fn repository_topics(&self, full_name: &str) -> Result<Vec<String>> {
        let topics: Option<Topics> = self
            .api
            .get_optional(&format!("repos/{}/topics", full_name))
            .await?;
        Ok(topics.map(|t| t.names).unwrap_or_default())
    }

    /// Pull requests only, enriched with diff stats and approval
    pub async fn fetch_pull_requests(
        &self,
        username: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ContributionData>> {
        let items = self.search_issues(username, "pr", start, end).await?;
        let mut prs = Vec::with_capacity(items.len());
        for item in items {
            let mut contribution = normalize_issue_item(&item, self.web_base());
            if !in_window(&contribution, start, end) {
                continue;
            }
            let number = item.number.to_string();
            let details = self.pull_details(&contribution.repository, &number).await?;
            let approved = self.is_approved(&contribution.repository, &number).await?;
            apply_pull_details(&mut contribution, &details, approved);
            prs.push(contribution);
        }
        Ok(prs)
    }

    async fn fetch_user(&self, username: &str) -> Result<Option<GitHubUser>> {
        self.api
            .get_optional(&format!("users/{}", urlencoding::encode(username)))
            .await
    }

    async fn verify_token(&self, access_token: &str) -> Result<GitHubUser> {
        let verify_error =
            |msg: String| ExternalApiError::new(GITHUB, ExternalErrorKind::ProfileVerification, msg);

        let response = self
            .api
            .http()
            .get(self.api.url("user"))
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| verify_error(format!("user request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(verify_error(format!("user endpoint returned {}", response.status())).into());
        }

        let user: GitHubUser = response
            .json()
            .await
            .map_err(|e| verify_error(format!("invalid user response: {}", e)))?;
        info!("GitHub user verified: {}", user.login);
        Ok(user)
    }
}

fn repo_full_name(repository_url: &str) -> String {
    // https://api.github.com/repos/{owner}/{repo}
    match repository_url.split_once("/repos/") {
        Some((_, rest)) => rest.to_string(),
        None => repository_url.to_string(),
    }
}

fn in_window(c: &ContributionData, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    c.created_at >= start && c.created_at <= end
}

/// Search item to the common shape
pub fn normalize_issue_item(item: &SearchIssueItem, web_base: &str) -> ContributionData {
    let full_name = repo_full_name(&item.repository_url);
    let (kind, merged_at) = match &item.pull_request {
        Some(pr) => (ContributionType::PullRequest, pr.merged_at),
        None => (ContributionType::Issue, None),
    };
    let status = if merged_at.is_some() {
        "merged".to_string()
    } else {
        item.state.clone()
    };

    let mut metadata = serde_json::Map::new();
    metadata.insert("number".into(), json!(item.number));
    if let Some(draft) = item.draft {
        metadata.insert("draft".into(), json!(draft));
    }

    ContributionData {
        id: item.id.to_string(),
        platform: GITHUB.to_string(),
        kind,
        title: item.title.clone(),
        description: item.body.clone(),
        url: item.html_url.clone(),
        repository: RepositoryRef::from_full_name(&full_name, web_base),
        author: item.user.login.clone(),
        created_at: item.created_at,
        updated_at: item.updated_at,
        merged_at,
        closed_at: item.closed_at,
        status,
        labels: item.labels.iter().map(|l| l.name.clone()).collect(),
        metadata,
    }
}

pub fn apply_pull_details(c: &mut ContributionData, details: &PullDetails, approved: bool) {
    c.metadata.insert("additions".into(), json!(details.additions));
    c.metadata.insert("deletions".into(), json!(details.deletions));
    c.metadata.insert("changed_files".into(), json!(details.changed_files));
    c.metadata.insert("draft".into(), json!(details.draft));
    c.metadata.insert("merged".into(), json!(details.merged));
    c.metadata.insert("approved".into(), json!(approved));
    if details.merged {
        c.merged_at = details.merged_at.or(c.merged_at);
        c.status = "merged".to_string();
    }
}

pub fn normalize_commit_item(item: &SearchCommitItem, web_base: &str) -> ContributionData {
    let title = item.commit.message.lines().next().unwrap_or_default().to_string();
    let author = item
        .author
        .as_ref()
        .map(|a| a.login.clone())
        .or_else(|| item.commit.author.name.clone())
        .unwrap_or_default();

    ContributionData {
        id: item.sha.clone(),
        platform: GITHUB.to_string(),
        kind: ContributionType::Commit,
        title,
        description: Some(item.commit.message.clone()),
        url: item.html_url.clone(),
        repository: RepositoryRef::from_full_name(&item.repository.full_name, web_base),
        author,
        created_at: item.commit.author.date,
        updated_at: item.commit.author.date,
        merged_at: None,
        closed_at: None,
        status: "committed".to_string(),
        labels: vec![],
        metadata: serde_json::Map::new(),
    }
}

fn profile_from_user(user: GitHubUser, web_base: &str) -> UserProfile {
    let profile_url = user
        .html_url
        .clone()
        .unwrap_or_else(|| format!("{}/{}", web_base, user.login));
    UserProfile {
        platform: GITHUB.to_string(),
        id: user.id.to_string(),
        username: user.login,
        name: user.name,
        email: user.email,
        avatar_url: user.avatar_url,
        profile_url,
        bio: user.bio,
        public_repos: user.public_repos,
        followers: user.followers,
        created_at: user.created_at,
    }
}

#[async_trait]
impl PlatformAdapter for GitHubAdapter {
    fn name(&self) -> &'static str {
        GITHUB
    }

    async fn authenticate(&self, user_id: &str, auth_code: Option<&str>) -> Result<AuthOutcome> {
        let Some(code) = auth_code else {
            let state = oauth::new_state(user_id);
            let url = oauth::authorize_url(&self.oauth, &self.config, &state);
            return Ok(AuthOutcome::Redirect { url, state });
        };

        let grant =
            oauth::exchange_code(GITHUB, self.api.http(), &self.oauth, &self.config, code).await?;
        let user = self.verify_token(&grant.access_token).await?;

        Ok(AuthOutcome::Tokens {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: grant.expires_at,
            scopes: grant.scopes,
            username: user.login,
        })
    }

    async fn validate_profile(&self, username: &str) -> Result<ProfileCheck> {
        let Some(user) = self.fetch_user(username).await? else {
            debug!("GitHub user {} not found", username);
            return Ok(ProfileCheck::not_found());
        };
        let is_user = user.account_type.as_deref().unwrap_or("User") == "User";
        Ok(ProfileCheck {
            valid: is_user,
            profile_url: user.html_url.clone(),
            verified: is_user,
            public_profile: true,
        })
    }

    async fn fetch_contributions(
        &self,
        username: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ContributionData>> {
        let mut contributions = self.fetch_pull_requests(username, start, end).await?;

        let issues = self.search_issues(username, "issue", start, end).await?;
        contributions.extend(
            issues
                .iter()
                .map(|item| normalize_issue_item(item, self.web_base()))
                .filter(|c| in_window(c, start, end)),
        );

        let commits = self.search_commits(username, start, end).await?;
        contributions.extend(
            commits
                .iter()
                .map(|item| normalize_commit_item(item, self.web_base()))
                .filter(|c| in_window(c, start, end)),
        );

        sort_newest_first(&mut contributions);
        info!(
            "Fetched {} GitHub contributions for {}",
            contributions.len(),
            username
        );
        Ok(contributions)
    }

    fn validate_contribution(
        &self,
        contribution: &ContributionData,
        requirements: &[Requirement],
    ) -> ValidationResult {
        scoring::score_contribution(contribution, requirements)
    }

    async fn get_user_profile(&self, username: &str) -> Result<UserProfile> {
        let user = self.fetch_user(username).await?.ok_or_else(|| {
            crate::error::CompetitionError::not_found(format!("GitHub user {}", username))
        })?;
        Ok(profile_from_user(user, self.web_base()))
    }

    fn get_rate_limit(&self) -> RateLimitInfo {
        self.rate_limit.snapshot()
    }

    async fn health_check(&self) -> AdapterHealth {
        match self.refresh_rate_limit().await {
            Ok(info) => AdapterHealth {
                platform: GITHUB.to_string(),
                status: self.rate_limit.health(),
                rate_limit: info,
                message: None,
            },
            Err(e) => AdapterHealth {
                platform: GITHUB.to_string(),
                status: HealthStatus::Unhealthy,
                rate_limit: self.rate_limit.snapshot(),
                message: Some(e.to_string()),
            },
        }
    }
}
