//! GitLab adapter (REST API v4)
//!
//! Merge requests, issues and push events of a user are listed by author id.
//! Push events stand in for commits since GitLab has no cross-project commit
//! search.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::error::{CompetitionError, ExternalApiError, ExternalErrorKind, Result};
use crate::models::Requirement;
use crate::platforms::http::{ApiClient, AuthHeader};
use crate::platforms::oauth::{self, OAuthEndpoints};
use crate::platforms::{
    scoring, sort_newest_first, AdapterConfig, AdapterHealth, AuthOutcome, ContributionData,
    ContributionType, PlatformAdapter, ProfileCheck, RepositoryRef, UserProfile,
    ValidationResult, GITLAB, PER_PAGE,
};
use crate::rate_limit::{HealthStatus, RateLimitInfo, RateLimitTracker};

/// gitlab.com authenticated API limit per minute
const DEFAULT_LIMIT: u32 = 2000;

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabUser {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub public_email: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub followers: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabMergeRequest {
    pub id: u64,
    pub iid: u64,
    pub project_id: u64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub state: String,
    pub web_url: String,
    pub author: GitLabUser,
    #[serde(default)]
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub work_in_progress: bool,
    #[serde(default)]
    pub upvotes: u64,
    #[serde(default)]
    pub changes_count: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabIssue {
    pub id: u64,
    pub iid: u64,
    pub project_id: u64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub state: String,
    pub web_url: String,
    pub author: GitLabUser,
    #[serde(default)]
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabPushEvent {
    pub id: u64,
    pub project_id: u64,
    pub created_at: DateTime<Utc>,
    pub push_data: PushData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushData {
    #[serde(default)]
    pub commit_count: u64,
    #[serde(default)]
    pub commit_to: Option<String>,
    #[serde(default)]
    pub commit_title: Option<String>,
    #[serde(rename = "ref", default)]
    pub git_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Project {
    path_with_namespace: String,
    web_url: String,
}

#[derive(Debug, Deserialize)]
struct Approvals {
    #[serde(default)]
    approved: bool,
}

pub struct GitLabAdapter {
    config: AdapterConfig,
    api: ApiClient,
    oauth: OAuthEndpoints,
    rate_limit: Arc<RateLimitTracker>,
}

impl GitLabAdapter {
    pub async fn initialize(config: AdapterConfig) -> Result<Self> {
        let adapter = Self::build(config)?;
        adapter.ping().await?;
        info!("GitLab adapter initialized for {}", adapter.api.base_url());
        Ok(adapter)
    }

    pub fn build(config: AdapterConfig) -> Result<Self> {
        config.validate(GITLAB)?;
        let rate_limit = Arc::new(RateLimitTracker::new(GITLAB, DEFAULT_LIMIT));
        let api = ApiClient::new(GITLAB, &config, AuthHeader::PrivateToken, rate_limit.clone())?;
        let oauth = OAuthEndpoints::gitlab(&config);
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

    async fn ping(&self) -> Result<()> {
        let _: Vec<serde_json::Value> = self.api.get("projects?per_page=1&simple=true").await?;
        Ok(())
    }

    async fn find_user(&self, username: &str) -> Result<Option<GitLabUser>> {
        let users: Vec<GitLabUser> = self
            .api
            .get(&format!("users?username={}", urlencoding::encode(username)))
            .await?;
        Ok(users.into_iter().next())
    }

    async fn require_user(&self, username: &str) -> Result<GitLabUser> {
        self.find_user(username)
            .await?
            .ok_or_else(|| CompetitionError::not_found(format!("GitLab user {}", username)))
    }

    async fn merge_requests(
        &self,
        author_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GitLabMergeRequest>> {
        let (after, before) = (iso(start), iso(end));
        self.api
            .paginate(|page| {
                format!(
                    "merge_requests?author_id={}&scope=all&created_after={}&created_before={}&per_page={}&page={}",
                    author_id, after, before, PER_PAGE, page
                )
            })
            .await
    }

    async fn issues(
        &self,
        author_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GitLabIssue>> {
        let (after, before) = (iso(start), iso(end));
        self.api
            .paginate(|page| {
                format!(
                    "issues?author_id={}&scope=all&created_after={}&created_before={}&per_page={}&page={}",
                    author_id, after, before, PER_PAGE, page
                )
            })
            .await
    }

    async fn push_events(
        &self,
        user_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GitLabPushEvent>> {
        // `after`/`before` are exclusive day bounds
        let after = (start - chrono::Duration::days(1)).format("%Y-%m-%d").to_string();
        let before = (end + chrono::Duration::days(1)).format("%Y-%m-%d").to_string();
        self.api
            .paginate(|page| {
                format!(
                    "users/{}/events?action=pushed&after={}&before={}&per_page={}&page={}",
                    user_id, after, before, PER_PAGE, page
                )
            })
            .await
    }

    async fn merge_request_details(&self, mr: &GitLabMergeRequest) -> Result<(Option<String>, bool)> {
        let detail: GitLabMergeRequest = self
            .api
            .get(&format!("projects/{}/merge_requests/{}", mr.project_id, mr.iid))
            .await?;
        let approvals: Option<Approvals> = self
            .api
            .get_optional(&format!(
                "projects/{}/merge_requests/{}/approvals",
                mr.project_id, mr.iid
            ))
            .await?;
        let approved = approvals.map(|a| a.approved).unwrap_or(false) || detail.upvotes > 0;
        Ok((detail.changes_count, approved))
    }

    async fn project(
        &self,
        cache: &mut HashMap<u64, RepositoryRef>,
        project_id: u64,
    ) -> Result<RepositoryRef> {
        if let Some(repo) = cache.get(&project_id) {
            return Ok(repo.clone());
        }
        let project: Option<Project> = self
            .api
            .get_optional(&format!("projects/{}", project_id))
            .await?;
        let repo = match project {
            Some(p) => {
                let mut repo = RepositoryRef::from_full_name(&p.path_with_namespace, self.web_base());
                repo.url = p.web_url;
                repo
            }
            None => RepositoryRef::from_full_name(&format!("project-{}", project_id), self.web_base()),
        };
        cache.insert(project_id, repo.clone());
        Ok(repo)
    }

    async fn verify_token(&self, access_token: &str) -> Result<GitLabUser> {
        let verify_error =
            |msg: String| ExternalApiError::new(GITLAB, ExternalErrorKind::ProfileVerification, msg);

        let response = self
            .api
            .http()
            .get(self.api.url("user"))
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(|e| verify_error(format!("user request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(verify_error(format!("user endpoint returned {}", response.status())).into());
        }

        response
            .json()
            .await
            .map_err(|e| verify_error(format!("invalid user response: {}", e)).into())
    }
}

fn iso(t: DateTime<Utc>) -> String {
    urlencoding::encode(&t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)).into_owned()
}

/// `https://gitlab.com/group/sub/proj/-/merge_requests/3` -> `group/sub/proj`
fn project_path_from_web_url(web_url: &str, web_base: &str) -> String {
    let path = web_url
        .strip_prefix(web_base)
        .unwrap_or(web_url)
        .trim_start_matches('/');
    path.split("/-/").next().unwrap_or(path).to_string()
}

fn normalize_state(state: &str) -> String {
    match state {
        "opened" => "open".to_string(),
        other => other.to_string(),
    }
}

pub fn normalize_merge_request(mr: &GitLabMergeRequest, web_base: &str) -> ContributionData {
    let full_name = project_path_from_web_url(&mr.web_url, web_base);
    let mut metadata = serde_json::Map::new();
    metadata.insert("iid".into(), json!(mr.iid));
    metadata.insert("project_id".into(), json!(mr.project_id));
    metadata.insert("draft".into(), json!(mr.draft || mr.work_in_progress));
    metadata.insert("upvotes".into(), json!(mr.upvotes));
    metadata.insert("approved".into(), json!(mr.upvotes > 0));
    if let Some(changes) = &mr.changes_count {
        metadata.insert("changes".into(), json!(changes));
    }

    ContributionData {
        id: mr.id.to_string(),
        platform: GITLAB.to_string(),
        kind: ContributionType::PullRequest,
        title: mr.title.clone(),
        description: mr.description.clone(),
        url: mr.web_url.clone(),
        repository: RepositoryRef::from_full_name(&full_name, web_base),
        author: mr.author.username.clone(),
        created_at: mr.created_at,
        updated_at: mr.updated_at,
        merged_at: mr.merged_at,
        closed_at: mr.closed_at,
        status: normalize_state(&mr.state),
        labels: mr.labels.clone(),
        metadata,
    }
}

pub fn normalize_issue(issue: &GitLabIssue, web_base: &str) -> ContributionData {
    let full_name = project_path_from_web_url(&issue.web_url, web_base);
    let mut metadata = serde_json::Map::new();
    metadata.insert("iid".into(), json!(issue.iid));
    metadata.insert("project_id".into(), json!(issue.project_id));

    ContributionData {
        id: issue.id.to_string(),
        platform: GITLAB.to_string(),
        kind: ContributionType::Issue,
        title: issue.title.clone(),
        description: issue.description.clone(),
        url: issue.web_url.clone(),
        repository: RepositoryRef::from_full_name(&full_name, web_base),
        author: issue.author.username.clone(),
        created_at: issue.created_at,
        updated_at: issue.updated_at,
        merged_at: None,
        closed_at: issue.closed_at,
        status: normalize_state(&issue.state),
        labels: issue.labels.clone(),
        metadata,
    }
}

pub fn normalize_push_event(
    event: &GitLabPushEvent,
    repository: RepositoryRef,
    author: &str,
) -> ContributionData {
    let sha = event.push_data.commit_to.clone().unwrap_or_default();
    let url = if sha.is_empty() {
        repository.url.clone()
    } else {
        format!("{}/-/commit/{}", repository.url, sha)
    };
    let mut metadata = serde_json::Map::new();
    metadata.insert("commit_count".into(), json!(event.push_data.commit_count));
    if let Some(git_ref) = &event.push_data.git_ref {
        metadata.insert("ref".into(), json!(git_ref));
    }

    ContributionData {
        id: if sha.is_empty() { format!("event-{}", event.id) } else { sha },
        platform: GITLAB.to_string(),
        kind: ContributionType::Commit,
        title: event.push_data.commit_title.clone().unwrap_or_default(),
        description: None,
        url,
        repository,
        author: author.to_string(),
        created_at: event.created_at,
        updated_at: event.created_at,
        merged_at: None,
        closed_at: None,
        status: "committed".to_string(),
        labels: vec![],
        metadata,
    }
}

#[async_trait]
impl PlatformAdapter for GitLabAdapter {
    fn name(&self) -> &'static str {
        GITLAB
    }

    async fn authenticate(&self, user_id: &str, auth_code: Option<&str>) -> Result<AuthOutcome> {
        let Some(code) = auth_code else {
            let state = oauth::new_state(user_id);
            let url = oauth::authorize_url(&self.oauth, &self.config, &state);
            return Ok(AuthOutcome::Redirect { url, state });
        };

        let grant =
            oauth::exchange_code(GITLAB, self.api.http(), &self.oauth, &self.config, code).await?;
        let user = self.verify_token(&grant.access_token).await?;
        info!("GitLab user verified: {}", user.username);

        Ok(AuthOutcome::Tokens {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: grant.expires_at,
            scopes: grant.scopes,
            username: user.username,
        })
    }

    async fn validate_profile(&self, username: &str) -> Result<ProfileCheck> {
        let Some(user) = self.find_user(username).await? else {
            debug!("GitLab user {} not found", username);
            return Ok(ProfileCheck::not_found());
        };
        let active = user.state.as_deref().unwrap_or("active") == "active";
        Ok(ProfileCheck {
            valid: active,
            profile_url: user.web_url,
            verified: active,
            public_profile: true,
        })
    }

    async fn fetch_contributions(
        &self,
        username: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ContributionData>> {
        let user = self.require_user(username).await?;
        let web_base = self.web_base().to_string();
        let mut contributions = Vec::new();

        for mr in self.merge_requests(user.id, start, end).await? {
            let mut c = normalize_merge_request(&mr, &web_base);
            let (changes, approved) = self.merge_request_details(&mr).await?;
            if let Some(changes) = changes {
                c.metadata.insert("changes".into(), json!(changes));
            }
            c.metadata.insert("approved".into(), json!(approved));
            contributions.push(c);
        }

        contributions.extend(
            self.issues(user.id, start, end)
                .await?
                .iter()
                .map(|issue| normalize_issue(issue, &web_base)),
        );

        let mut projects = HashMap::new();
        for event in self.push_events(user.id, start, end).await? {
            if event.created_at < start || event.created_at > end {
                continue;
            }
            let repo = self.project(&mut projects, event.project_id).await?;
            contributions.push(normalize_push_event(&event, repo, &user.username));
        }

        sort_newest_first(&mut contributions);
        info!(
            "Fetched {} GitLab contributions for {}",
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
        let summary = self.require_user(username).await?;
        let user: GitLabUser = self
            .api
            .get_optional(&format!("users/{}", summary.id))
            .await?
            .unwrap_or(summary);
        let profile_url = user
            .web_url
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.web_base(), user.username));
        Ok(UserProfile {
            platform: GITLAB.to_string(),
            id: user.id.to_string(),
            username: user.username,
            name: user.name,
            email: user.public_email.filter(|e| !e.is_empty()),
            avatar_url: user.avatar_url,
            profile_url,
            bio: user.bio.filter(|b| !b.is_empty()),
            public_repos: None,
            followers: user.followers,
            created_at: user.created_at,
        })
    }

    fn get_rate_limit(&self) -> RateLimitInfo {
        self.rate_limit.snapshot()
    }

    async fn health_check(&self) -> AdapterHealth {
        match self.ping().await {
            Ok(()) => AdapterHealth {
                platform: GITLAB.to_string(),
                status: self.rate_limit.health(),
                rate_limit: self.rate_limit.snapshot(),
                message: None,
            },
            Err(e) => AdapterHealth {
                platform: GITLAB.to_string(),
                status: HealthStatus::Unhealthy,
                rate_limit: self.rate_limit.snapshot(),
                message: Some(e.to_string()),
            },
        }
    }
}
