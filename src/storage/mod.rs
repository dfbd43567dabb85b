//! Persistence for competitions and participations
//!
//! The store is authoritative. Anything touching `participant_count` is a
//! single atomic store operation so the count always equals the number of
//! counted participations.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{CompetitionError, Result};
use crate::models::{Competition, CompetitionFilter, CompetitionStatus, Participation};

#[async_trait]
pub trait CompetitionStore: Send + Sync {
    async fn insert_competition(&self, competition: &Competition) -> Result<()>;

    async fn find_competition(&self, id: Uuid) -> Result<Option<Competition>>;

    /// Ordered by start date, then id
    async fn list_competitions(&self, filter: &CompetitionFilter) -> Result<Vec<Competition>>;

    /// Writes the editable fields only; status and participant_count are
    /// owned by `transition_status` and the participation operations.
    async fn update_competition(&self, competition: &Competition) -> Result<Competition>;

    async fn delete_competition(&self, id: Uuid) -> Result<()>;

    /// Compare-and-set on the current status
    async fn transition_status(
        &self,
        id: Uuid,
        from: CompetitionStatus,
        to: CompetitionStatus,
        at: DateTime<Utc>,
    ) -> Result<Competition>;

    /// Insert and increment `participant_count` in one step. Fails on a
    /// duplicate (user, competition) or when the competition is full.
    async fn insert_participation(&self, participation: &Participation) -> Result<Competition>;

    async fn find_participation(
        &self,
        competition_id: Uuid,
        user_id: &str,
    ) -> Result<Option<Participation>>;

    async fn list_participations(&self, competition_id: Uuid) -> Result<Vec<Participation>>;

    /// Compare-and-set on a participation: overwrite it only while the stored
    /// record still matches `expected` (the version the caller read), and
    /// shift `participant_count` by `count_delta` in the same step. A positive
    /// delta is refused when the competition is full.
    async fn replace_participation(
        &self,
        expected: &Participation,
        participation: &Participation,
        count_delta: i32,
    ) -> Result<Competition>;
}

pub(crate) fn competition_not_found(id: Uuid) -> CompetitionError {
    CompetitionError::not_found(format!("Competition {} not found", id))
}

pub(crate) fn participation_not_found(p: &Participation) -> CompetitionError {
    CompetitionError::not_found(format!(
        "Participation of {} in competition {} not found",
        p.user_id, p.competition_id
    ))
}

pub(crate) fn participation_changed(p: &Participation) -> CompetitionError {
    CompetitionError::validation(format!(
        "Participation of {} in competition {} changed concurrently",
        p.user_id, p.competition_id
    ))
}

/// Status and recorded contributions identify the version a caller read
pub(crate) fn same_version(stored: &Participation, expected: &Participation) -> bool {
    stored.status == expected.status && stored.contributions.len() == expected.contributions.len()
}

pub(crate) fn invalid_transition(from: CompetitionStatus, to: CompetitionStatus) -> CompetitionError {
    CompetitionError::validation(format!("Invalid status transition from {} to {}", from, to))
}

pub(crate) fn already_registered() -> CompetitionError {
    CompetitionError::validation("User is already registered for this competition")
}

pub(crate) fn competition_full() -> CompetitionError {
    CompetitionError::validation("Competition has reached maximum participants")
}

pub(crate) fn shift_count(count: u32, delta: i32) -> u32 {
    (count as i64 + delta as i64).max(0) as u32
}

/// Filter, order and page a full listing
pub(crate) fn apply_filter(
    mut competitions: Vec<Competition>,
    filter: &CompetitionFilter,
) -> Vec<Competition> {
    competitions.retain(|c| filter.matches(c));
    competitions.sort_by(|a, b| a.start_date.cmp(&b.start_date).then(a.id.cmp(&b.id)));
    competitions
        .into_iter()
        .skip(filter.offset.unwrap_or(0))
        .take(filter.limit.unwrap_or(usize::MAX))
        .collect()
}

/// Copy the fields `update_competition` is allowed to change
pub(crate) fn merge_editable(stored: &mut Competition, update: &Competition) {
    stored.name = update.name.clone();
    stored.description = update.description.clone();
    stored.kind = update.kind.clone();
    stored.start_date = update.start_date;
    stored.end_date = update.end_date;
    stored.requirements = update.requirements.clone();
    stored.rewards = update.rewards.clone();
    stored.validation_rules = update.validation_rules.clone();
    stored.tags = update.tags.clone();
    stored.max_participants = update.max_participants;
    stored.registration_deadline = update.registration_deadline;
    stored.updated_at = update.updated_at;
}
