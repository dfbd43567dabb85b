//! Competition lifecycle
//!
//! [`CompetitionLifecycleManager`] is the only writer of competition status.
//! Every transition goes through the table in
//! [`CompetitionStatus::can_transition_to`] and then a compare-and-set in the
//! store, so a transition attempted twice (reconciliation loop vs. organizer)
//! fails cleanly the second time.
//!
//! Participation counts are maintained by the store in the same step as the
//! participation write.

pub mod cache;
pub mod reconcile;

pub use cache::CompetitionCache;
pub use reconcile::ReconcileReport;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CompetitionError, Result};
use crate::events::{DomainEvent, EventKind, EventSink};
use crate::gateway::ExternalContributionGateway;
use crate::models::{
    Competition, CompetitionFilter, CompetitionPatch, CompetitionStats, CompetitionStatus,
    ContributionClaim, CreateCompetition, Participation, ParticipationStatus, PerformerSummary,
    Progress, ValidatedContribution,
};
use crate::platforms::{ValidationResult, GITHUB, HACKTOBERFEST};
use crate::storage::CompetitionStore;

const TOP_PERFORMERS: usize = 10;
const MILESTONES: [f64; 4] = [25.0, 50.0, 75.0, 100.0];
const FLIP_ATTEMPTS: usize = 3;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays
pub struct FixedClock {
    now: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.write() += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

pub struct CompetitionLifecycleManager {
    store: Arc<dyn CompetitionStore>,
    cache: CompetitionCache,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl CompetitionLifecycleManager {
    pub fn new(store: Arc<dyn CompetitionStore>, events: Arc<dyn EventSink>) -> Self {
        Self::with_clock(store, events, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn CompetitionStore>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            cache: CompetitionCache::new(),
            events,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn cache(&self) -> &CompetitionCache {
        &self.cache
    }

    // ------------------------------------------------------------------
    // Competitions
    // ------------------------------------------------------------------

    pub async fn create(&self, request: CreateCompetition, created_by: &str) -> Result<Competition> {
        let now = self.now();
        if request.name.trim().is_empty() {
            return Err(CompetitionError::validation("Competition name is required"));
        }
        if request.description.trim().is_empty() {
            return Err(CompetitionError::validation(
                "Competition description is required",
            ));
        }
        if request.end_date <= request.start_date {
            return Err(CompetitionError::validation(
                "End date must be after start date",
            ));
        }
        if request.start_date < now {
            return Err(CompetitionError::validation(
                "Start date cannot be in the past",
            ));
        }
        if request.requirements.is_empty() {
            return Err(CompetitionError::validation(
                "At least one requirement is required",
            ));
        }

        let competition = Competition {
            id: Uuid::new_v4(),
            name: request.name.trim().to_string(),
            description: request.description,
            kind: request.kind,
            status: CompetitionStatus::Upcoming,
            start_date: request.start_date,
            end_date: request.end_date,
            requirements: request.requirements,
            rewards: request.rewards,
            validation_rules: request.validation_rules,
            tags: request.tags,
            participant_count: 0,
            max_participants: request.max_participants,
            registration_deadline: request.registration_deadline,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        };

        self.store.insert_competition(&competition).await?;
        self.cache.put(&competition);
        info!(
            "Created competition {} ({}) starting {}",
            competition.name, competition.id, competition.start_date
        );
        Ok(competition)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Competition>> {
        if let Some(hit) = self.cache.get(&id) {
            return Ok(Some(hit));
        }
        let found = self.store.find_competition(id).await?;
        if let Some(c) = &found {
            self.cache.put(c);
        }
        Ok(found)
    }

    async fn require(&self, id: Uuid) -> Result<Competition> {
        self.get(id)
            .await?
            .ok_or_else(|| CompetitionError::not_found(format!("Competition {} not found", id)))
    }

    pub async fn list(&self, filter: &CompetitionFilter) -> Result<Vec<Competition>> {
        let competitions = self.store.list_competitions(filter).await?;
        for c in &competitions {
            self.cache.put(c);
        }
        Ok(competitions)
    }

    pub async fn update(&self, id: Uuid, patch: CompetitionPatch) -> Result<Competition> {
        let current = self.require(id).await?;

        if let Some(next) = patch.status {
            if !current.status.can_transition_to(next) {
                return Err(invalid_transition(current.status, next));
            }
        }
        let leaving_upcoming = patch
            .status
            .is_some_and(|next| next != CompetitionStatus::Upcoming);
        if patch.requirements.is_some()
            && (current.status != CompetitionStatus::Upcoming || leaving_upcoming)
        {
            return Err(CompetitionError::validation(
                "Requirements cannot change once the competition has started",
            ));
        }

        let mut edited = current.clone();
        let mut changed = false;
        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(CompetitionError::validation("Competition name is required"));
            }
            edited.name = name.trim().to_string();
            changed = true;
        }
        if let Some(description) = patch.description {
            if description.trim().is_empty() {
                return Err(CompetitionError::validation(
                    "Competition description is required",
                ));
            }
            edited.description = description;
            changed = true;
        }
        if let Some(start) = patch.start_date {
            edited.start_date = start;
            changed = true;
        }
        if let Some(end) = patch.end_date {
            edited.end_date = end;
            changed = true;
        }
        if edited.end_date <= edited.start_date {
            return Err(CompetitionError::validation(
                "End date must be after start date",
            ));
        }
        if let Some(requirements) = patch.requirements {
            if requirements.is_empty() {
                return Err(CompetitionError::validation(
                    "At least one requirement is required",
                ));
            }
            edited.requirements = requirements;
            changed = true;
        }
        if let Some(rewards) = patch.rewards {
            edited.rewards = rewards;
            changed = true;
        }
        if let Some(rules) = patch.validation_rules {
            edited.validation_rules = rules;
            changed = true;
        }
        if let Some(tags) = patch.tags {
            edited.tags = tags;
            changed = true;
        }
        if let Some(max) = patch.max_participants {
            edited.max_participants = Some(max);
            changed = true;
        }
        if let Some(deadline) = patch.registration_deadline {
            edited.registration_deadline = Some(deadline);
            changed = true;
        }

        // Status first: a lost compare-and-set or a failed guard must leave
        // the field edits unwritten.
        let now = self.now();
        let mut result = current.clone();
        if let Some(next) = patch.status {
            result = match next {
                CompetitionStatus::Active => self.start_at(id, now).await?,
                CompetitionStatus::Completed => self.complete_at(id, now).await?,
                _ => self.transition(current, next, now).await?,
            };
        }
        if changed {
            edited.updated_at = now;
            result = self.store.update_competition(&edited).await?;
            self.cache.put(&result);
        }
        Ok(result)
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let competition = self.require(id).await?;
        let participations = self.store.list_participations(id).await?;

        if participations
            .iter()
            .any(|p| p.status == ParticipationStatus::Active)
        {
            return Err(CompetitionError::validation(
                "Cannot delete competition with active participants",
            ));
        }
        let completed = participations
            .iter()
            .filter(|p| p.status == ParticipationStatus::Completed)
            .count();
        if completed > 0 {
            warn!(
                "Deleting competition {} with {} completed participations (kept for audit)",
                competition.id, completed
            );
        }

        self.store.delete_competition(id).await?;
        self.cache.remove(&id);
        info!("Deleted competition {} ({})", competition.name, id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    pub async fn start(&self, id: Uuid) -> Result<Competition> {
        self.start_at(id, self.now()).await
    }

    pub(crate) async fn start_at(&self, id: Uuid, now: DateTime<Utc>) -> Result<Competition> {
        let competition = self.require(id).await?;
        if competition.status != CompetitionStatus::Upcoming {
            return Err(invalid_transition(
                competition.status,
                CompetitionStatus::Active,
            ));
        }
        if now < competition.start_date {
            return Err(CompetitionError::validation(format!(
                "Competition cannot start before {}",
                competition.start_date
            )));
        }
        self.transition(competition, CompetitionStatus::Active, now)
            .await
    }

    pub async fn complete(&self, id: Uuid) -> Result<Competition> {
        self.complete_at(id, self.now()).await
    }

    pub(crate) async fn complete_at(&self, id: Uuid, now: DateTime<Utc>) -> Result<Competition> {
        let competition = self.require(id).await?;
        if competition.status != CompetitionStatus::Active {
            return Err(invalid_transition(
                competition.status,
                CompetitionStatus::Completed,
            ));
        }
        self.transition(competition, CompetitionStatus::Completed, now)
            .await
    }

    /// Table check, compare-and-set, then participation side effects
    async fn transition(
        &self,
        competition: Competition,
        next: CompetitionStatus,
        now: DateTime<Utc>,
    ) -> Result<Competition> {
        if !competition.status.can_transition_to(next) {
            return Err(invalid_transition(competition.status, next));
        }

        let updated = match self
            .store
            .transition_status(competition.id, competition.status, next, now)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                // someone else won; drop the stale entry
                self.cache.remove(&competition.id);
                return Err(e);
            }
        };
        self.cache.put(&updated);

        let flip = match next {
            CompetitionStatus::Active => {
                Some((ParticipationStatus::Registered, ParticipationStatus::Active))
            }
            CompetitionStatus::Completed => {
                Some((ParticipationStatus::Active, ParticipationStatus::Completed))
            }
            _ => None,
        };
        let mut flipped = 0;
        if let Some((from, to)) = flip {
            for p in self.store.list_participations(updated.id).await? {
                if self.flip_participation(p, from, to).await? {
                    flipped += 1;
                }
            }
        }

        info!(
            "Competition {} ({}) {} -> {}, {} participations updated",
            updated.name, updated.id, competition.status, next, flipped
        );

        let event = match next {
            CompetitionStatus::Active => Some(EventKind::CompetitionStarted),
            CompetitionStatus::Completed | CompetitionStatus::Cancelled => {
                Some(EventKind::CompetitionEnded)
            }
            CompetitionStatus::Upcoming => None,
        };
        if let Some(kind) = event {
            self.events.emit(
                DomainEvent::new(kind, updated.id, now)
                    .var("competition_name", updated.name.clone())
                    .var("status", next.as_str())
                    .var("participants", updated.participant_count),
            );
        }

        Ok(updated)
    }

    /// Move one participation `from` -> `to`, re-reading when a concurrent
    /// write got there first. Returns false once it is no longer in `from`.
    async fn flip_participation(
        &self,
        mut current: Participation,
        from: ParticipationStatus,
        to: ParticipationStatus,
    ) -> Result<bool> {
        let mut attempt = 0;
        loop {
            if current.status != from {
                return Ok(false);
            }
            let mut next = current.clone();
            next.status = to;
            match self.store.replace_participation(&current, &next, 0).await {
                Ok(_) => return Ok(true),
                Err(e) if attempt + 1 >= FLIP_ATTEMPTS => return Err(e),
                Err(e) => {
                    warn!("Retrying status update of {}: {}", current.user_id, e);
                    attempt += 1;
                    match self
                        .store
                        .find_participation(current.competition_id, &current.user_id)
                        .await?
                    {
                        Some(p) => current = p,
                        None => return Ok(false),
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Participations
    // ------------------------------------------------------------------

    pub async fn register_participant(
        &self,
        competition_id: Uuid,
        user_id: &str,
        platform_handles: HashMap<String, String>,
    ) -> Result<Participation> {
        let now = self.now();
        let competition = self.require(competition_id).await?;

        if competition.status.is_terminal() {
            return Err(CompetitionError::validation(
                "Cannot register for a completed or cancelled competition",
            ));
        }
        if let Some(deadline) = competition.registration_deadline {
            if now > deadline {
                return Err(CompetitionError::validation(
                    "Registration deadline has passed",
                ));
            }
        }
        if competition.is_full() {
            return Err(CompetitionError::validation(
                "Competition has reached maximum participants",
            ));
        }

        let initial = if competition.status == CompetitionStatus::Active {
            ParticipationStatus::Active
        } else {
            ParticipationStatus::Registered
        };

        let (participation, updated) = match self
            .store
            .find_participation(competition_id, user_id)
            .await?
        {
            Some(existing) if existing.status != ParticipationStatus::Dropped => {
                return Err(CompetitionError::validation(
                    "User is already registered for this competition",
                ));
            }
            Some(dropped) => {
                let mut rejoined = dropped.clone();
                rejoined.status = initial;
                rejoined.registered_at = now;
                rejoined.platform_handles.extend(platform_handles);
                let updated = self
                    .store
                    .replace_participation(&dropped, &rejoined, 1)
                    .await?;
                (rejoined, updated)
            }
            None => {
                let participation = Participation {
                    id: Uuid::new_v4(),
                    competition_id,
                    user_id: user_id.to_string(),
                    status: initial,
                    registered_at: now,
                    platform_handles,
                    progress: Progress::new(competition.requirements.len() as u32),
                    total_score: 0.0,
                    contributions: Vec::new(),
                    completed_requirement_indices: Vec::new(),
                };
                let updated = self.store.insert_participation(&participation).await?;
                (participation, updated)
            }
        };
        self.cache.put(&updated);

        info!(
            "User {} registered for competition {} ({} participants)",
            user_id, competition_id, updated.participant_count
        );
        self.events.emit(
            DomainEvent::new(EventKind::RegistrationConfirmed, competition_id, now)
                .participation(participation.id)
                .var("user_id", user_id)
                .var("competition_name", updated.name.clone())
                .var("start_date", updated.start_date.to_rfc3339()),
        );
        Ok(participation)
    }

    pub async fn unregister_participant(&self, competition_id: Uuid, user_id: &str) -> Result<()> {
        let participation = self
            .store
            .find_participation(competition_id, user_id)
            .await?
            .filter(|p| p.status != ParticipationStatus::Dropped)
            .ok_or_else(|| {
                CompetitionError::not_found("User is not registered for this competition")
            })?;

        match participation.status {
            ParticipationStatus::Completed => {
                return Err(CompetitionError::validation(
                    "Cannot unregister from a completed competition",
                ));
            }
            ParticipationStatus::Active if participation.progress.completion_percentage > 0.0 => {
                return Err(CompetitionError::validation(
                    "Cannot unregister after making progress",
                ));
            }
            _ => {}
        }

        let mut dropped = participation.clone();
        dropped.status = ParticipationStatus::Dropped;
        let updated = self
            .store
            .replace_participation(&participation, &dropped, -1)
            .await?;
        self.cache.put(&updated);
        info!(
            "User {} left competition {} ({} participants)",
            user_id, competition_id, updated.participant_count
        );
        Ok(())
    }

    pub async fn get_participation(
        &self,
        competition_id: Uuid,
        user_id: &str,
    ) -> Result<Option<Participation>> {
        self.store.find_participation(competition_id, user_id).await
    }

    pub async fn participations(&self, competition_id: Uuid) -> Result<Vec<Participation>> {
        self.store.list_participations(competition_id).await
    }

    /// Credit a validated contribution to a participation
    pub async fn record_contribution(
        &self,
        competition_id: Uuid,
        user_id: &str,
        contribution: ValidatedContribution,
    ) -> Result<Participation> {
        let competition = self.require(competition_id).await?;
        if competition.status != CompetitionStatus::Active {
            return Err(CompetitionError::validation(format!(
                "Competition is {}, contributions are only recorded while ACTIVE",
                competition.status
            )));
        }

        let read = self
            .store
            .find_participation(competition_id, user_id)
            .await?
            .ok_or_else(|| {
                CompetitionError::not_found("User is not registered for this competition")
            })?;
        let mut participation = read.clone();
        if !matches!(
            participation.status,
            ParticipationStatus::Registered | ParticipationStatus::Active
        ) {
            return Err(CompetitionError::validation(format!(
                "Participation is {}",
                participation.status.as_str()
            )));
        }
        if participation
            .contributions
            .iter()
            .any(|c| c.key == contribution.key)
        {
            return Err(CompetitionError::domain(
                "DUPLICATE_CONTRIBUTION",
                format!("Contribution {} was already recorded", contribution.key),
            ));
        }

        let before = participation.progress.completion_percentage;
        for idx in &contribution.requirement_indices {
            if *idx < competition.requirements.len()
                && !participation.completed_requirement_indices.contains(idx)
            {
                participation.completed_requirement_indices.push(*idx);
            }
        }
        participation.progress.total_requirements = competition.requirements.len() as u32;
        participation.progress.completed_requirements =
            participation.completed_requirement_indices.len() as u32;
        participation.progress.recompute();
        participation.progress.touch(contribution.validated_at);
        participation.total_score += contribution.score;
        participation.status = ParticipationStatus::Active;
        let after = participation.progress.completion_percentage;

        participation.contributions.push(contribution);
        let updated = self
            .store
            .replace_participation(&read, &participation, 0)
            .await?;
        self.cache.put(&updated);

        for milestone in MILESTONES.iter().filter(|m| before < **m && after >= **m) {
            info!(
                "User {} reached {}% in competition {}",
                user_id, milestone, competition_id
            );
            self.events.emit(
                DomainEvent::new(EventKind::MilestoneReached, competition_id, self.now())
                    .participation(participation.id)
                    .var("user_id", user_id)
                    .var("milestone", *milestone)
                    .var("total_score", participation.total_score),
            );
        }

        Ok(participation)
    }

    /// Verify a claimed contribution against the platform, score it with the
    /// competition rules and credit it when valid.
    ///
    /// The claim only names the contribution. The record that gets scored is
    /// re-fetched from the platform under the participant's linked handle and
    /// restricted to the competition window, so nothing the caller sends is
    /// trusted beyond the identifier.
    pub async fn validate_and_record(
        &self,
        gateway: &ExternalContributionGateway,
        competition_id: Uuid,
        user_id: &str,
        claim: &ContributionClaim,
    ) -> Result<(ValidationResult, Option<Participation>)> {
        let competition = self.require(competition_id).await?;
        if competition.status != CompetitionStatus::Active {
            return Err(CompetitionError::validation(format!(
                "Competition is {}, contributions are only recorded while ACTIVE",
                competition.status
            )));
        }
        let participation = self
            .store
            .find_participation(competition_id, user_id)
            .await?
            .ok_or_else(|| {
                CompetitionError::not_found("User is not registered for this competition")
            })?;
        let handle = linked_handle(&participation, &claim.platform).ok_or_else(|| {
            CompetitionError::validation(format!(
                "No {} account linked to this participation",
                claim.platform
            ))
        })?;

        let start = competition.start_date;
        let end = competition.end_date.min(self.now());
        let key = claim.idempotency_key();
        let contribution = gateway
            .fetch_user_contributions(&claim.platform, handle, start, end)
            .await?
            .into_iter()
            .find(|c| c.idempotency_key() == key && c.created_at >= start && c.created_at <= end)
            .ok_or_else(|| {
                CompetitionError::validation(format!(
                    "Contribution {} not found for {} on {} between {} and {}",
                    key, handle, claim.platform, start, end
                ))
            })?;

        let result = gateway.validate_contribution(
            &contribution,
            &competition.requirements,
            &competition.validation_rules,
        )?;
        if !result.valid {
            return Ok((result, None));
        }

        let credited = ValidatedContribution {
            key,
            platform: contribution.platform.clone(),
            contribution_type: contribution.kind.as_str().to_string(),
            url: contribution.url.clone(),
            title: contribution.title.clone(),
            score: result
                .metadata
                .get("weighted_score")
                .and_then(|v| v.as_f64())
                .unwrap_or(result.score),
            validated_at: self.now(),
            requirement_indices: gateway
                .engine()
                .matching_requirements(&contribution, &competition.requirements),
        };
        let participation = self
            .record_contribution(competition_id, user_id, credited)
            .await?;
        Ok((result, Some(participation)))
    }

    pub async fn stats(&self, id: Uuid) -> Result<CompetitionStats> {
        self.require(id).await?;
        let participations = self.store.list_participations(id).await?;
        let counted: Vec<&Participation> = participations
            .iter()
            .filter(|p| p.status.is_counted())
            .collect();

        let count = |status: ParticipationStatus| {
            counted.iter().filter(|p| p.status == status).count() as u32
        };
        let average_progress = if counted.is_empty() {
            0.0
        } else {
            counted
                .iter()
                .map(|p| p.progress.completion_percentage)
                .sum::<f64>()
                / counted.len() as f64
        };

        let mut ranked = counted.clone();
        ranked.sort_by(|a, b| {
            b.total_score
                .partial_cmp(&a.total_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(CompetitionStats {
            total_participants: counted.len() as u32,
            active_participants: count(ParticipationStatus::Active),
            completed_participants: count(ParticipationStatus::Completed),
            average_progress,
            top_performers: ranked
                .into_iter()
                .take(TOP_PERFORMERS)
                .map(|p| PerformerSummary {
                    user_id: p.user_id.clone(),
                    total_score: p.total_score,
                    completion_percentage: p.progress.completion_percentage,
                })
                .collect(),
        })
    }
}

/// Hacktoberfest runs on GitHub accounts
fn linked_handle<'a>(participation: &'a Participation, platform: &str) -> Option<&'a str> {
    participation
        .platform_handles
        .get(platform)
        .or_else(|| {
            if platform == HACKTOBERFEST {
                participation.platform_handles.get(GITHUB)
            } else {
                None
            }
        })
        .map(String::as_str)
}

fn invalid_transition(from: CompetitionStatus, to: CompetitionStatus) -> CompetitionError {
    CompetitionError::validation(format!("Invalid status transition from {} to {}", from, to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BroadcastSink;
    use crate::models::Requirement;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;

    struct Harness {
        manager: CompetitionLifecycleManager,
        clock: Arc<FixedClock>,
        events: Arc<BroadcastSink>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap(),
        ));
        let events = Arc::new(BroadcastSink::new());
        let manager = CompetitionLifecycleManager::with_clock(
            Arc::new(MemoryStore::new()),
            events.clone(),
            clock.clone(),
        );
        Harness {
            manager,
            clock,
            events,
        }
    }

    fn requirement(kind: &str) -> Requirement {
        Requirement {
            kind: kind.into(),
            description: format!("One {}", kind),
            criteria: Default::default(),
            points: 10,
            required: true,
        }
    }

    fn request(h: &Harness) -> CreateCompetition {
        let now = h.clock.now();
        CreateCompetition {
            name: "October sprint".into(),
            description: "Ship open source".into(),
            kind: "sprint".into(),
            start_date: now + Duration::days(1),
            end_date: now + Duration::days(30),
            requirements: vec![requirement("pull_request"), requirement("issue")],
            rewards: vec![],
            validation_rules: vec![],
            tags: vec![],
            max_participants: None,
            registration_deadline: None,
        }
    }

    fn contribution(key: &str, indices: Vec<usize>, score: f64) -> ValidatedContribution {
        ValidatedContribution {
            key: key.into(),
            platform: "github".into(),
            contribution_type: "pull_request".into(),
            url: format!("https://github.com/acme/widgets/pull/{}", key),
            title: "Improve parser".into(),
            score,
            validated_at: Utc.with_ymd_and_hms(2024, 9, 3, 0, 0, 0).unwrap(),
            requirement_indices: indices,
        }
    }

    #[tokio::test]
    async fn test_create_validation() {
        let h = harness();
        let mut bad = request(&h);
        bad.name = "  ".into();
        assert!(h.manager.create(bad, "org").await.is_err());

        let mut bad = request(&h);
        bad.end_date = bad.start_date;
        let err = h.manager.create(bad, "org").await.unwrap_err();
        assert_eq!(err.to_string(), "Validation error: End date must be after start date");

        let mut bad = request(&h);
        bad.start_date = h.clock.now() - Duration::hours(1);
        assert!(h.manager.create(bad, "org").await.is_err());

        let mut bad = request(&h);
        bad.requirements.clear();
        assert!(h.manager.create(bad, "org").await.is_err());

        let ok = h.manager.create(request(&h), "org").await.unwrap();
        assert_eq!(ok.status, CompetitionStatus::Upcoming);
    }

    #[tokio::test]
    async fn test_start_guards() {
        let h = harness();
        let c = h.manager.create(request(&h), "org").await.unwrap();
        assert!(h.manager.start(c.id).await.is_err());

        h.clock.advance(Duration::days(2));
        let started = h.manager.start(c.id).await.unwrap();
        assert_eq!(started.status, CompetitionStatus::Active);

        let err = h.manager.start(c.id).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: Invalid status transition from ACTIVE to ACTIVE"
        );
    }

    #[tokio::test]
    async fn test_update_status_uses_table() {
        let h = harness();
        let c = h.manager.create(request(&h), "org").await.unwrap();
        let patch = CompetitionPatch {
            status: Some(CompetitionStatus::Completed),
            ..Default::default()
        };
        let err = h.manager.update(c.id, patch).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: Invalid status transition from UPCOMING to COMPLETED"
        );
        assert_eq!(
            h.manager.get(c.id).await.unwrap().unwrap().status,
            CompetitionStatus::Upcoming
        );

        let patch = CompetitionPatch {
            name: Some("Renamed".into()),
            status: Some(CompetitionStatus::Cancelled),
            ..Default::default()
        };
        let updated = h.manager.update(c.id, patch).await.unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.status, CompetitionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_status_patch_keeps_start_guard() {
        let h = harness();
        let c = h.manager.create(request(&h), "org").await.unwrap();
        let patch = CompetitionPatch {
            name: Some("Early".into()),
            status: Some(CompetitionStatus::Active),
            ..Default::default()
        };
        let err = h.manager.update(c.id, patch).await.unwrap_err();
        assert!(err.to_string().contains("cannot start before"));

        // the rejected patch left no partial edit behind
        let stored = h.manager.get(c.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "October sprint");
        assert_eq!(stored.status, CompetitionStatus::Upcoming);

        h.clock.advance(Duration::days(2));
        let patch = CompetitionPatch {
            name: Some("Started".into()),
            status: Some(CompetitionStatus::Active),
            ..Default::default()
        };
        let started = h.manager.update(c.id, patch).await.unwrap();
        assert_eq!(started.name, "Started");
        assert_eq!(started.status, CompetitionStatus::Active);
    }

    #[tokio::test]
    async fn test_requirements_cannot_change_with_start() {
        let h = harness();
        let c = h.manager.create(request(&h), "org").await.unwrap();
        h.clock.advance(Duration::days(2));
        let patch = CompetitionPatch {
            requirements: Some(vec![requirement("commit")]),
            status: Some(CompetitionStatus::Active),
            ..Default::default()
        };
        assert!(h.manager.update(c.id, patch).await.is_err());
        let stored = h.manager.get(c.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CompetitionStatus::Upcoming);
        assert_eq!(stored.requirements.len(), 2);
    }

    #[tokio::test]
    async fn test_requirements_frozen_after_start() {
        let h = harness();
        let c = h.manager.create(request(&h), "org").await.unwrap();
        h.clock.advance(Duration::days(2));
        h.manager.start(c.id).await.unwrap();
        let patch = CompetitionPatch {
            requirements: Some(vec![requirement("commit")]),
            ..Default::default()
        };
        assert!(h.manager.update(c.id, patch).await.is_err());
    }

    #[tokio::test]
    async fn test_registration_rules() {
        let h = harness();
        let mut req = request(&h);
        req.max_participants = Some(1);
        req.registration_deadline = Some(h.clock.now() + Duration::hours(12));
        let c = h.manager.create(req, "org").await.unwrap();

        let p = h
            .manager
            .register_participant(c.id, "alice", HashMap::new())
            .await
            .unwrap();
        assert_eq!(p.status, ParticipationStatus::Registered);

        let err = h
            .manager
            .register_participant(c.id, "bob", HashMap::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("maximum participants"));

        h.clock.advance(Duration::days(1));
        let err = h
            .manager
            .register_participant(c.id, "bob", HashMap::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("deadline"));
    }

    #[tokio::test]
    async fn test_unregister_and_rejoin() {
        let h = harness();
        let c = h.manager.create(request(&h), "org").await.unwrap();
        h.manager
            .register_participant(c.id, "alice", HashMap::new())
            .await
            .unwrap();
        h.manager.unregister_participant(c.id, "alice").await.unwrap();
        assert_eq!(h.manager.get(c.id).await.unwrap().unwrap().participant_count, 0);
        assert!(h.manager.unregister_participant(c.id, "alice").await.is_err());

        let back = h
            .manager
            .register_participant(c.id, "alice", HashMap::new())
            .await
            .unwrap();
        assert_eq!(back.status, ParticipationStatus::Registered);
        assert_eq!(h.manager.get(c.id).await.unwrap().unwrap().participant_count, 1);
    }

    #[tokio::test]
    async fn test_progress_blocks_unregister() {
        let h = harness();
        let c = h.manager.create(request(&h), "org").await.unwrap();
        h.manager
            .register_participant(c.id, "alice", HashMap::new())
            .await
            .unwrap();
        h.clock.advance(Duration::days(2));
        h.manager.start(c.id).await.unwrap();
        h.manager
            .record_contribution(c.id, "alice", contribution("github:1", vec![0], 80.0))
            .await
            .unwrap();
        let err = h
            .manager
            .unregister_participant(c.id, "alice")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("progress"));
    }

    #[tokio::test]
    async fn test_record_contribution_milestones() {
        let h = harness();
        let mut rx = h.events.subscribe();
        let c = h.manager.create(request(&h), "org").await.unwrap();
        h.manager
            .register_participant(c.id, "alice", HashMap::new())
            .await
            .unwrap();
        h.clock.advance(Duration::days(2));
        h.manager.start(c.id).await.unwrap();

        let p = h
            .manager
            .record_contribution(c.id, "alice", contribution("github:1", vec![0], 80.0))
            .await
            .unwrap();
        assert_eq!(p.progress.completion_percentage, 50.0);
        assert_eq!(p.progress.current_streak, 1);

        let dup = h
            .manager
            .record_contribution(c.id, "alice", contribution("github:1", vec![0], 80.0))
            .await
            .unwrap_err();
        assert_eq!(dup.error_code(), "DUPLICATE_CONTRIBUTION");

        let p = h
            .manager
            .record_contribution(c.id, "alice", contribution("github:2", vec![1, 9], 60.0))
            .await
            .unwrap();
        assert_eq!(p.progress.completion_percentage, 100.0);
        assert_eq!(p.total_score, 140.0);

        let mut milestones = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if event.kind == EventKind::MilestoneReached {
                milestones.push(event.variables["milestone"].as_f64().unwrap());
            }
        }
        assert_eq!(milestones, vec![25.0, 50.0, 75.0, 100.0]);
    }

    #[tokio::test]
    async fn test_delete_rules() {
        let h = harness();
        let c = h.manager.create(request(&h), "org").await.unwrap();
        h.manager
            .register_participant(c.id, "alice", HashMap::new())
            .await
            .unwrap();
        h.clock.advance(Duration::days(2));
        h.manager.start(c.id).await.unwrap();
        assert!(h.manager.delete(c.id).await.is_err());

        h.manager.complete(c.id).await.unwrap();
        h.manager.delete(c.id).await.unwrap();
        assert!(h.manager.get(c.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats() {
        let h = harness();
        let c = h.manager.create(request(&h), "org").await.unwrap();
        for user in ["alice", "bob", "carol"] {
            h.manager
                .register_participant(c.id, user, HashMap::new())
                .await
                .unwrap();
        }
        h.manager.unregister_participant(c.id, "carol").await.unwrap();
        h.clock.advance(Duration::days(2));
        h.manager.start(c.id).await.unwrap();
        h.manager
            .record_contribution(c.id, "bob", contribution("github:7", vec![0, 1], 90.0))
            .await
            .unwrap();

        let stats = h.manager.stats(c.id).await.unwrap();
        assert_eq!(stats.total_participants, 2);
        assert_eq!(stats.active_participants, 2);
        assert_eq!(stats.average_progress, 50.0);
        assert_eq!(stats.top_performers[0].user_id, "bob");
    }
}
