//! Competition and participation records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompetitionStatus {
    Upcoming,
    Active,
    Completed,
    Cancelled,
}

impl CompetitionStatus {
    /// Allowed transitions of the competition state machine
    pub fn can_transition_to(self, next: CompetitionStatus) -> bool {
        use CompetitionStatus::*;
        matches!(
            (self, next),
            (Upcoming, Active) | (Upcoming, Cancelled) | (Active, Completed) | (Active, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upcoming => "UPCOMING",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "UPCOMING" => Some(Self::Upcoming),
            "ACTIVE" => Some(Self::Active),
            "COMPLETED" => Some(Self::Completed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for CompetitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipationStatus {
    Registered,
    Active,
    Completed,
    Dropped,
}

impl ParticipationStatus {
    /// Whether this participation counts towards `participant_count`
    pub fn is_counted(self) -> bool {
        !matches!(self, Self::Dropped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "REGISTERED",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Dropped => "DROPPED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    /// Opaque criteria, e.g. `min_lines_changed`, `excluded_labels`, `count`
    #[serde(default)]
    pub criteria: serde_json::Map<String, serde_json::Value>,
    pub points: u32,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

/// Per-competition acceptance rule fed to the validation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub name: String,
    /// Platform name or `"any"`
    pub platform: String,
    /// Contribution type (`pull_request`, `issue`, ...) or `"any"`
    pub contribution_type: String,
    #[serde(default)]
    pub min_score: Option<f64>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub required_labels: Vec<String>,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Competition {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: CompetitionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub requirements: Vec<Requirement>,
    pub rewards: Vec<Reward>,
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub participant_count: u32,
    pub max_participants: Option<u32>,
    pub registration_deadline: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Competition {
    pub fn is_full(&self) -> bool {
        self.max_participants
            .map(|max| self.participant_count >= max)
            .unwrap_or(false)
    }
}

/// Organizer request for a new competition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCompetition {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub rewards: Vec<Reward>,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub max_participants: Option<u32>,
    #[serde(default)]
    pub registration_deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompetitionPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub requirements: Option<Vec<Requirement>>,
    pub rewards: Option<Vec<Reward>>,
    pub validation_rules: Option<Vec<ValidationRule>>,
    pub tags: Option<Vec<String>>,
    pub max_participants: Option<u32>,
    pub registration_deadline: Option<DateTime<Utc>>,
    pub status: Option<CompetitionStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompetitionFilter {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<CompetitionStatus>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl CompetitionFilter {
    pub fn by_status(status: CompetitionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn matches(&self, c: &Competition) -> bool {
        if let Some(kind) = &self.kind {
            if !c.kind.eq_ignore_ascii_case(kind) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if c.status != status {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| c.tags.contains(t)) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub completed_requirements: u32,
    pub total_requirements: u32,
    pub completion_percentage: f64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_activity: Option<DateTime<Utc>>,
}

impl Progress {
    pub fn new(total_requirements: u32) -> Self {
        Self {
            total_requirements,
            ..Default::default()
        }
    }

    /// Register activity at `at`, extending the day streak when consecutive
    pub fn touch(&mut self, at: DateTime<Utc>) {
        let day = at.date_naive();
        match self.last_activity.map(|t| t.date_naive()) {
            Some(last) if last == day => {}
            Some(last) if last.succ_opt() == Some(day) => self.current_streak += 1,
            Some(last) if last > day => {}
            _ => self.current_streak = 1,
        }
        self.longest_streak = self.longest_streak.max(self.current_streak);
        if self.last_activity.map(|t| t < at).unwrap_or(true) {
            self.last_activity = Some(at);
        }
    }

    pub fn recompute(&mut self) {
        self.completion_percentage = if self.total_requirements == 0 {
            0.0
        } else {
            (self.completed_requirements as f64 / self.total_requirements as f64 * 100.0)
                .min(100.0)
        };
    }
}

/// A participant's claim: which contribution, on which platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributionClaim {
    pub platform: String,
    /// Platform-native id, as returned by the adapter's fetch
    pub contribution_id: String,
}

impl ContributionClaim {
    /// Same key as `ContributionData::idempotency_key` for the claimed record
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.platform, self.contribution_id)
    }
}

/// A scored contribution credited to a participation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedContribution {
    /// `platform:native_id`
    pub key: String,
    pub platform: String,
    pub contribution_type: String,
    pub url: String,
    pub title: String,
    pub score: f64,
    pub validated_at: DateTime<Utc>,
    #[serde(default)]
    pub requirement_indices: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participation {
    pub id: Uuid,
    pub competition_id: Uuid,
    pub user_id: String,
    pub status: ParticipationStatus,
    pub registered_at: DateTime<Utc>,
    /// Platform name -> external username
    pub platform_handles: HashMap<String, String>,
    pub progress: Progress,
    pub total_score: f64,
    pub contributions: Vec<ValidatedContribution>,
    /// Requirement indices already satisfied
    #[serde(default)]
    pub completed_requirement_indices: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformerSummary {
    pub user_id: String,
    pub total_score: f64,
    pub completion_percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitionStats {
    pub total_participants: u32,
    pub active_participants: u32,
    pub completed_participants: u32,
    pub average_progress: f64,
    pub top_performers: Vec<PerformerSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_transition_table() {
        use CompetitionStatus::*;
        assert!(Upcoming.can_transition_to(Active));
        assert!(Upcoming.can_transition_to(Cancelled));
        assert!(Active.can_transition_to(Completed));
        assert!(Active.can_transition_to(Cancelled));
        assert!(!Upcoming.can_transition_to(Completed));
        assert!(!Active.can_transition_to(Upcoming));
        for next in [Upcoming, Active, Completed, Cancelled] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn test_streaks() {
        let mut p = Progress::new(2);
        let d1 = Utc.with_ymd_and_hms(2024, 10, 1, 10, 0, 0).unwrap();
        p.touch(d1);
        p.touch(d1 + chrono::Duration::hours(3));
        assert_eq!(p.current_streak, 1);
        p.touch(d1 + chrono::Duration::days(1));
        assert_eq!(p.current_streak, 2);
        p.touch(d1 + chrono::Duration::days(5));
        assert_eq!(p.current_streak, 1);
        assert_eq!(p.longest_streak, 2);
    }

    #[test]
    fn test_progress_percentage() {
        let mut p = Progress::new(4);
        p.completed_requirements = 1;
        p.recompute();
        assert!((p.completion_percentage - 25.0).abs() < f64::EPSILON);
    }
}
