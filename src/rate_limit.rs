//! Per-adapter rate limit tracking
//!
//! The tracker is a best-effort signal: adapters are shared across concurrent
//! requests, so a snapshot may already be stale when it is read. Nothing here
//! blocks or delays a request.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Remaining calls below which a soft back-pressure warning is logged
pub const LOW_REMAINING_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
}

impl RateLimitInfo {
    /// Unknown budget: assume a full window until the first response
    pub fn unknown(limit: u32) -> Self {
        Self {
            limit,
            remaining: limit,
            reset_time: Utc::now(),
        }
    }

    pub fn is_low(&self) -> bool {
        self.remaining < LOW_REMAINING_THRESHOLD
    }

    pub fn seconds_until_reset(&self) -> i64 {
        (self.reset_time - Utc::now()).num_seconds().max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

pub struct RateLimitTracker {
    platform: &'static str,
    info: Mutex<RateLimitInfo>,
}

impl RateLimitTracker {
    pub fn new(platform: &'static str, default_limit: u32) -> Self {
        Self {
            platform,
            info: Mutex::new(RateLimitInfo::unknown(default_limit)),
        }
    }

    pub fn snapshot(&self) -> RateLimitInfo {
        self.info.lock().clone()
    }

    pub fn record(&self, info: RateLimitInfo) {
        if info.is_low() {
            warn!(
                "{} rate limit low: {}/{} remaining, resets in {}s",
                self.platform,
                info.remaining,
                info.limit,
                info.seconds_until_reset()
            );
        }
        *self.info.lock() = info;
    }

    /// Update from `x-ratelimit-*` (GitHub) or `ratelimit-*` (GitLab) headers.
    /// Responses without rate limit headers leave the snapshot untouched.
    pub fn update_from_headers(&self, headers: &HeaderMap) {
        if let Some(info) = parse_headers(headers) {
            self.record(info);
        }
    }

    /// Degraded once the remaining budget drops to the threshold
    pub fn health(&self) -> HealthStatus {
        if self.info.lock().remaining > LOW_REMAINING_THRESHOLD {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        }
    }
}

fn header_u64(headers: &HeaderMap, names: &[&str]) -> Option<u64> {
    names.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    })
}

fn parse_headers(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let limit = header_u64(headers, &["x-ratelimit-limit", "ratelimit-limit"])?;
    let remaining = header_u64(headers, &["x-ratelimit-remaining", "ratelimit-remaining"])?;
    let reset_time = header_u64(headers, &["x-ratelimit-reset", "ratelimit-reset"])
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now);

    Some(RateLimitInfo {
        limit: u32::try_from(limit).unwrap_or(u32::MAX),
        remaining: u32::try_from(remaining).unwrap_or(u32::MAX),
        reset_time,
    })
}
