//! Shared JSON-over-HTTP plumbing for the adapters

use std::sync::Arc;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{ExternalApiError, Result};
use crate::platforms::AdapterConfig;
use crate::rate_limit::RateLimitTracker;

const USER_AGENT: &str = concat!("contest-core/", env!("CARGO_PKG_VERSION"));

pub struct ApiClient {
    platform: &'static str,
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    auth_header: AuthHeader,
    rate_limit: Arc<RateLimitTracker>,
}

/// How the API token is presented
#[derive(Debug, Clone, Copy)]
pub enum AuthHeader {
    /// `Authorization: Bearer <token>` (GitHub)
    Bearer,
    /// `PRIVATE-TOKEN: <token>` (GitLab)
    PrivateToken,
}

impl ApiClient {
    pub fn new(
        platform: &'static str,
        config: &AdapterConfig,
        auth_header: AuthHeader,
        rate_limit: Arc<RateLimitTracker>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ExternalApiError::configuration(platform, e.to_string()))?;

        Ok(Self {
            platform,
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone().filter(|t| !t.is_empty()),
            auth_header,
            rate_limit,
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn build_request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url);
        if let AuthHeader::Bearer = self.auth_header {
            req = req
                .header("Accept", "application/vnd.github+json")
                .header("X-GitHub-Api-Version", "2022-11-28");
        }
        if let Some(token) = &self.token {
            req = match self.auth_header {
                AuthHeader::Bearer => req.header("Authorization", format!("Bearer {}", token)),
                AuthHeader::PrivateToken => req.header("PRIVATE-TOKEN", token.as_str()),
            };
        }
        req
    }

    /// GET and decode; `None` on 404
    pub async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = self.url(path);
        debug!("{} GET {}", self.platform, url);

        let response = self
            .build_request(&url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.rate_limit.update_from_headers(response.headers());

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("{} API error {}: {}", self.platform, status, body);
            return Err(ExternalApiError::from_status(self.platform, status.as_u16(), &body).into());
        }

        let value = response
            .json()
            .await
            .map_err(|e| ExternalApiError::generic(self.platform, format!("invalid JSON: {}", e)))?;
        Ok(Some(value))
    }

    /// GET and decode; 404 is an error
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get_optional(path).await?.ok_or_else(|| {
            ExternalApiError::generic(self.platform, format!("{} not found", path)).into()
        })
    }

    /// Fetch pages sequentially until a short page. Each page's response
    /// headers update the rate limit before the next request is issued.
    pub async fn paginate<T, F>(&self, path_for_page: F) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn(usize) -> String,
    {
        self.paginate_with(path_for_page, |page: Vec<T>| page).await
    }

    /// Like [`paginate`](Self::paginate) for envelopes such as search results
    pub async fn paginate_with<P, T, F, X>(&self, path_for_page: F, extract: X) -> Result<Vec<T>>
    where
        P: DeserializeOwned,
        F: Fn(usize) -> String,
        X: Fn(P) -> Vec<T>,
    {
        self.paginate_capped(path_for_page, extract, usize::MAX).await
    }

    /// Stop after `max_pages` even when the last page was full
    pub async fn paginate_capped<P, T, F, X>(
        &self,
        path_for_page: F,
        extract: X,
        max_pages: usize,
    ) -> Result<Vec<T>>
    where
        P: DeserializeOwned,
        F: Fn(usize) -> String,
        X: Fn(P) -> Vec<T>,
    {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let body: P = self.get(&path_for_page(page)).await?;
            let items = extract(body);
            let count = items.len();
            debug!("{} page {}: {} items", self.platform, page, count);
            all.extend(items);

            if !has_next_page(page, count, max_pages) {
                if count >= super::PER_PAGE {
                    debug!("{} stopped at page cap {}", self.platform, max_pages);
                }
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    fn transport_error(&self, e: reqwest::Error) -> crate::error::CompetitionError {
        let message = if e.is_timeout() {
            "request timed out".to_string()
        } else {
            e.to_string()
        };
        ExternalApiError::generic(self.platform, message).into()
    }
}

/// A full page below the cap means more may follow
fn has_next_page(page: usize, count: usize, max_pages: usize) -> bool {
    count >= super::PER_PAGE && page < max_pages
}
