//! External contribution gateway
//!
//! Name-keyed registry of platform adapters. Single-platform calls are
//! routed to one adapter; activity summaries and health checks fan out to
//! several concurrently and tolerate partial failure.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{CompetitionError, Result};
use crate::models::{Requirement, ValidationRule};
use crate::platforms::{
    AdapterHealth, AuthOutcome, ContributionData, GitHubAdapter, GitLabAdapter,
    HacktoberfestAdapter, PlatformAdapter, ProfileCheck, UserProfile, ValidationResult,
    HACKTOBERFEST,
};
use crate::rate_limit::HealthStatus;
use crate::validation::ContributionValidationEngine;

const TOP_REPOSITORIES: usize = 10;

/// A user's handle on one platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedProfile {
    pub platform: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryActivity {
    pub full_name: String,
    pub url: String,
    pub contributions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyActivity {
    pub date: NaiveDate,
    pub contributions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformFailure {
    pub platform: String,
    pub username: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub total_contributions: usize,
    pub by_platform: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub top_repositories: Vec<RepositoryActivity>,
    /// Ascending by date
    pub timeline: Vec<DailyActivity>,
    pub contributions: Vec<ContributionData>,
    pub errors: Vec<PlatformFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayHealth {
    pub status: HealthStatus,
    pub platforms: Vec<AdapterHealth>,
}

#[derive(Default)]
pub struct ExternalContributionGateway {
    adapters: HashMap<String, Arc<dyn PlatformAdapter>>,
    hacktoberfest: Option<Arc<HacktoberfestAdapter>>,
    engine: ContributionValidationEngine,
}

impl ExternalContributionGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialise every platform that has credentials. A failing platform is
    /// logged and left out rather than aborting startup.
    pub async fn from_config(config: &Config) -> Self {
        let mut gateway = Self::new();

        if config.github.is_configured() {
            match GitHubAdapter::initialize(config.github.adapter_config()).await {
                Ok(github) => {
                    let github = Arc::new(github);
                    gateway.register(github.clone());
                    if config.hacktoberfest.enabled {
                        gateway.register_hacktoberfest(Arc::new(HacktoberfestAdapter::new(
                            github,
                            config.hacktoberfest.year,
                            config.hacktoberfest.required_prs,
                        )));
                    }
                }
                Err(e) => error!("GitHub adapter disabled: {}", e),
            }
        } else {
            info!("GitHub credentials not set, platform disabled");
        }

        if config.gitlab.is_configured() {
            match GitLabAdapter::initialize(config.gitlab.adapter_config()).await {
                Ok(gitlab) => gateway.register(Arc::new(gitlab)),
                Err(e) => error!("GitLab adapter disabled: {}", e),
            }
        } else {
            info!("GitLab credentials not set, platform disabled");
        }

        info!(
            "Contribution gateway ready with platforms: [{}]",
            gateway.platforms().join(", ")
        );
        gateway
    }

    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn register_hacktoberfest(&mut self, adapter: Arc<HacktoberfestAdapter>) {
        self.register(adapter.clone());
        self.hacktoberfest = Some(adapter);
    }

    /// Registered platform names, sorted
    pub fn platforms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_adapter(&self, platform: &str) -> Result<Arc<dyn PlatformAdapter>> {
        self.adapters
            .get(&platform.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| {
                CompetitionError::domain(
                    "PLATFORM_UNAVAILABLE",
                    format!("Platform '{}' is not configured", platform),
                )
            })
    }

    pub fn hacktoberfest(&self) -> Result<Arc<HacktoberfestAdapter>> {
        self.hacktoberfest.clone().ok_or_else(|| {
            CompetitionError::domain(
                "PLATFORM_UNAVAILABLE",
                format!("Platform '{}' is not configured", HACKTOBERFEST),
            )
        })
    }

    pub async fn authenticate_user(
        &self,
        platform: &str,
        user_id: &str,
        auth_code: Option<&str>,
    ) -> Result<AuthOutcome> {
        self.get_adapter(platform)?
            .authenticate(user_id, auth_code)
            .await
    }

    pub async fn validate_user_profile(&self, platform: &str, username: &str) -> Result<ProfileCheck> {
        self.get_adapter(platform)?.validate_profile(username).await
    }

    pub async fn fetch_user_contributions(
        &self,
        platform: &str,
        username: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ContributionData>> {
        if end < start {
            return Err(CompetitionError::validation("end date must not precede start date"));
        }
        self.get_adapter(platform)?
            .fetch_contributions(username, start, end)
            .await
    }

    pub async fn get_user_profile(&self, platform: &str, username: &str) -> Result<UserProfile> {
        self.get_adapter(platform)?.get_user_profile(username).await
    }

    /// Score with the contribution's own platform plus the competition rules
    pub fn validate_contribution(
        &self,
        contribution: &ContributionData,
        requirements: &[Requirement],
        rules: &[ValidationRule],
    ) -> Result<ValidationResult> {
        let adapter = self.get_adapter(&contribution.platform)?;
        Ok(self
            .engine
            .evaluate(adapter.as_ref(), contribution, requirements, rules))
    }

    /// One result per input, in order. Items that cannot be scored come back
    /// degraded instead of failing the batch.
    pub fn validate_multiple_contributions(
        &self,
        contributions: &[ContributionData],
        requirements: &[Requirement],
        rules: &[ValidationRule],
    ) -> Vec<ValidationResult> {
        contributions
            .iter()
            .map(|c| {
                self.validate_contribution(c, requirements, rules)
                    .unwrap_or_else(|e| {
                        warn!("Could not validate {}: {}", c.idempotency_key(), e);
                        ValidationResult::degraded(e.to_string())
                    })
            })
            .collect()
    }

    pub fn engine(&self) -> &ContributionValidationEngine {
        &self.engine
    }

    /// Fetch every linked profile concurrently and merge the results
    pub async fn get_user_activity_summary(
        &self,
        profiles: &[LinkedProfile],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ActivitySummary {
        let fetches = profiles.iter().map(|p| async move {
            let result = self
                .fetch_user_contributions(&p.platform, &p.username, start, end)
                .await;
            (p, result)
        });

        let mut contributions = Vec::new();
        let mut errors = Vec::new();
        for (profile, result) in join_all(fetches).await {
            match result {
                Ok(items) => contributions.extend(items),
                Err(e) => {
                    warn!(
                        "Activity fetch failed for {} on {}: {}",
                        profile.username, profile.platform, e
                    );
                    errors.push(PlatformFailure {
                        platform: profile.platform.clone(),
                        username: profile.username.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        summarize_activity(contributions, errors)
    }

    pub async fn health_check(&self) -> GatewayHealth {
        let mut platforms = join_all(self.adapters.values().map(|a| a.health_check())).await;
        platforms.sort_by(|a, b| a.platform.cmp(&b.platform));
        GatewayHealth {
            status: aggregate_health(&platforms),
            platforms,
        }
    }
}

/// All healthy, none healthy, or somewhere in between
pub fn aggregate_health(platforms: &[AdapterHealth]) -> HealthStatus {
    let healthy = platforms
        .iter()
        .filter(|p| p.status == HealthStatus::Healthy)
        .count();
    if platforms.is_empty() || healthy == 0 {
        HealthStatus::Unhealthy
    } else if healthy == platforms.len() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

pub fn summarize_activity(
    mut contributions: Vec<ContributionData>,
    errors: Vec<PlatformFailure>,
) -> ActivitySummary {
    crate::platforms::sort_newest_first(&mut contributions);

    let mut by_platform = BTreeMap::new();
    let mut by_type = BTreeMap::new();
    let mut repos: HashMap<&str, RepositoryActivity> = HashMap::new();
    let mut days: BTreeMap<NaiveDate, usize> = BTreeMap::new();

    for c in &contributions {
        *by_platform.entry(c.platform.clone()).or_insert(0) += 1;
        *by_type.entry(c.kind.as_str().to_string()).or_insert(0) += 1;
        repos
            .entry(c.repository.full_name.as_str())
            .or_insert_with(|| RepositoryActivity {
                full_name: c.repository.full_name.clone(),
                url: c.repository.url.clone(),
                contributions: 0,
            })
            .contributions += 1;
        *days.entry(c.created_at.date_naive()).or_insert(0) += 1;
    }

    let mut top_repositories: Vec<RepositoryActivity> = repos.into_values().collect();
    top_repositories.sort_by(|a, b| {
        b.contributions
            .cmp(&a.contributions)
            .then_with(|| a.full_name.cmp(&b.full_name))
    });
    top_repositories.truncate(TOP_REPOSITORIES);

    ActivitySummary {
        total_contributions: contributions.len(),
        by_platform,
        by_type,
        top_repositories,
        timeline: days
            .into_iter()
            .map(|(date, contributions)| DailyActivity {
                date,
                contributions,
            })
            .collect(),
        contributions,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExternalApiError;
    use crate::platforms::fixtures::pull_request;
    use crate::platforms::{scoring, ContributionType, RepositoryRef, GITHUB, GITLAB};
    use crate::rate_limit::RateLimitInfo;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};

    struct StubAdapter {
        name: &'static str,
        contributions: Vec<ContributionData>,
        fail: bool,
        status: HealthStatus,
    }

    impl StubAdapter {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                contributions: vec![],
                fail: false,
                status: HealthStatus::Healthy,
            }
        }
    }

    #[async_trait]
    impl PlatformAdapter for StubAdapter {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn authenticate(&self, user_id: &str, _code: Option<&str>) -> Result<AuthOutcome> {
            Ok(AuthOutcome::Redirect {
                url: format!("https://{}.example.com/authorize", self.name),
                state: user_id.to_string(),
            })
        }

        async fn validate_profile(&self, _username: &str) -> Result<ProfileCheck> {
            Ok(ProfileCheck::not_found())
        }

        async fn fetch_contributions(
            &self,
            _username: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<ContributionData>> {
            if self.fail {
                return Err(ExternalApiError::from_status(self.name, 429, "").into());
            }
            Ok(self.contributions.clone())
        }

        fn validate_contribution(
            &self,
            contribution: &ContributionData,
            requirements: &[Requirement],
        ) -> ValidationResult {
            scoring::score_contribution(contribution, requirements)
        }

        async fn get_user_profile(&self, username: &str) -> Result<UserProfile> {
            Err(CompetitionError::not_found(username.to_string()))
        }

        fn get_rate_limit(&self) -> RateLimitInfo {
            RateLimitInfo::unknown(5000)
        }

        async fn health_check(&self) -> AdapterHealth {
            AdapterHealth {
                platform: self.name.to_string(),
                status: self.status,
                rate_limit: RateLimitInfo::unknown(5000),
                message: None,
            }
        }
    }

    fn contribution(platform: &str, id: &str, repo: &str, day: u32) -> ContributionData {
        let mut c = pull_request(id);
        c.platform = platform.to_string();
        c.repository = RepositoryRef::from_full_name(repo, "https://example.com");
        c.created_at = Utc.with_ymd_and_hms(2024, 10, day, 8, 0, 0).unwrap();
        c
    }

    #[tokio::test]
    async fn test_unknown_platform() {
        let gateway = ExternalContributionGateway::new();
        let err = gateway
            .authenticate_user("bitbucket", "u1", None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "PLATFORM_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_activity_summary_partial_failure() {
        let mut github = StubAdapter::new(GITHUB);
        github.contributions = vec![
            contribution(GITHUB, "1", "acme/widgets", 3),
            contribution(GITHUB, "2", "acme/widgets", 3),
            contribution(GITHUB, "3", "acme/gears", 5),
        ];
        let mut gitlab = StubAdapter::new(GITLAB);
        gitlab.fail = true;

        let mut gateway = ExternalContributionGateway::new();
        gateway.register(Arc::new(github));
        gateway.register(Arc::new(gitlab));

        let profiles = vec![
            LinkedProfile {
                platform: GITHUB.into(),
                username: "octocat".into(),
            },
            LinkedProfile {
                platform: GITLAB.into(),
                username: "tanuki".into(),
            },
        ];
        let now = Utc::now();
        let summary = gateway
            .get_user_activity_summary(&profiles, now - Duration::days(30), now)
            .await;

        assert_eq!(summary.total_contributions, 3);
        assert_eq!(summary.by_platform[GITHUB], 3);
        assert_eq!(summary.by_type["pull_request"], 3);
        assert_eq!(summary.top_repositories[0].full_name, "acme/widgets");
        assert_eq!(summary.top_repositories[0].contributions, 2);
        assert_eq!(summary.timeline.len(), 2);
        assert_eq!(summary.timeline[0].contributions, 2);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].platform, GITLAB);
    }

    #[test]
    fn test_top_repositories_capped() {
        let contributions = (0..15)
            .map(|i| contribution(GITHUB, &i.to_string(), &format!("acme/repo{:02}", i), 1))
            .collect();
        let summary = summarize_activity(contributions, vec![]);
        assert_eq!(summary.top_repositories.len(), 10);
        assert_eq!(summary.top_repositories[0].full_name, "acme/repo00");
    }

    #[test]
    fn test_batch_degrades_per_item() {
        let mut gateway = ExternalContributionGateway::new();
        gateway.register(Arc::new(StubAdapter::new(GITHUB)));

        let mut orphan = pull_request("2");
        orphan.platform = "bitbucket".into();
        let mut issue = pull_request("3");
        issue.kind = ContributionType::Issue;

        let results =
            gateway.validate_multiple_contributions(&[pull_request("1"), orphan, issue], &[], &[]);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].score, 50.0);
        assert!(results[1].metadata.contains_key("degraded"));
        assert!(!results[1].valid);
        assert_eq!(results[2].score, 30.0);
    }

    #[tokio::test]
    async fn test_health_tiers() {
        let mut gateway = ExternalContributionGateway::new();
        assert_eq!(gateway.health_check().await.status, HealthStatus::Unhealthy);

        gateway.register(Arc::new(StubAdapter::new(GITHUB)));
        assert_eq!(gateway.health_check().await.status, HealthStatus::Healthy);

        let mut gitlab = StubAdapter::new(GITLAB);
        gitlab.status = HealthStatus::Degraded;
        gateway.register(Arc::new(gitlab));
        let health = gateway.health_check().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.platforms[0].platform, GITHUB);
    }

    #[test]
    fn test_aggregate_none_healthy() {
        let sick = AdapterHealth {
            platform: GITHUB.into(),
            status: HealthStatus::Degraded,
            rate_limit: RateLimitInfo::unknown(1),
            message: None,
        };
        assert_eq!(aggregate_health(&[sick]), HealthStatus::Unhealthy);
    }
}
