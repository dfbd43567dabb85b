//! Contest server API client

use anyhow::{anyhow, Result};
use contest_core::models::{Competition, CompetitionStats};
use contest_core::platforms::AdapterHealth;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: String,
    pub uptime_secs: u64,
    pub integrations: Integrations,
}

#[derive(Debug, Deserialize)]
pub struct Integrations {
    pub status: String,
    pub platforms: Vec<AdapterHealth>,
}

#[derive(Debug, Deserialize)]
pub struct HacktoberfestProgress {
    pub valid_prs: usize,
    pub required_prs: usize,
    pub completed: bool,
    pub percentage: f64,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestLine {
    pub title: String,
    pub url: String,
    pub score: f64,
    #[serde(default)]
    pub reasons: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PullRequestGroups {
    #[serde(default)]
    pub valid: Vec<PullRequestLine>,
    #[serde(default)]
    pub pending: Vec<PullRequestLine>,
    #[serde(default)]
    pub invalid: Vec<PullRequestLine>,
}

#[derive(Debug, Deserialize)]
pub struct HacktoberfestStatus {
    pub username: String,
    pub year: i32,
    pub progress: HacktoberfestProgress,
    pub total_score: f64,
    #[serde(default)]
    pub pull_requests: PullRequestGroups,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub username: String,
    pub score: f64,
    pub valid_prs: usize,
    pub completed: bool,
    pub error: Option<String>,
}

pub struct ContestClient {
    client: Client,
    base_url: String,
}

impl ContestClient {
    pub fn new(server_url: &str) -> Self {
        // Fall back to the default client if the builder fails
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let resp = self.client.get(self.url(path)).send().await?;
        decode(resp, what).await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.get("health", "health").await
    }

    pub async fn competitions(&self, status: Option<&str>) -> Result<Vec<Competition>> {
        let path = match status {
            Some(s) => format!("competitions?status={}", urlencoding::encode(s)),
            None => "competitions".to_string(),
        };
        self.get(&path, "competitions").await
    }

    pub async fn competition(&self, id: Uuid) -> Result<Competition> {
        self.get(&format!("competitions/{}", id), "competition").await
    }

    pub async fn stats(&self, id: Uuid) -> Result<CompetitionStats> {
        self.get(&format!("competitions/{}/stats", id), "stats")
            .await
    }

    pub async fn hacktoberfest_status(&self, username: &str) -> Result<HacktoberfestStatus> {
        self.get(
            &format!("hacktoberfest/status/{}", urlencoding::encode(username)),
            "Hacktoberfest status",
        )
        .await
    }

    pub async fn hacktoberfest_leaderboard(&self, users: &[String]) -> Result<Vec<LeaderboardEntry>> {
        let joined = users.join(",");
        self.get(
            &format!("hacktoberfest/leaderboard?users={}", urlencoding::encode(&joined)),
            "leaderboard",
        )
        .await
    }
}

async fn decode<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp.json().await?)
    } else {
        let error_text = resp.text().await.unwrap_or_else(|_| "Unknown error".into());
        Err(anyhow!("Failed to fetch {} ({}): {}", what, status, error_text))
    }
}
