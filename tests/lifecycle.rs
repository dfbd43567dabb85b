//! End-to-end lifecycle scenarios against the in-memory store

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use contest_core::models::{CompetitionFilter, Participation};
use contest_core::platforms::scoring::score_contribution;
use contest_core::platforms::{AdapterHealth, AuthOutcome, ProfileCheck, RepositoryRef, UserProfile};
use contest_core::rate_limit::HealthStatus;
use contest_core::{
    BroadcastSink, Competition, CompetitionError, CompetitionLifecycleManager, CompetitionPatch,
    CompetitionStatus, CompetitionStore, ContributionClaim, ContributionData, ContributionType,
    CreateCompetition, EventKind, ExternalContributionGateway, FixedClock, MemoryStore,
    ParticipationStatus, PlatformAdapter, RateLimitInfo, Requirement, ValidationResult,
};
use uuid::Uuid;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap()
}

struct Harness {
    manager: CompetitionLifecycleManager,
    store: Arc<MemoryStore>,
    clock: Arc<FixedClock>,
    events: Arc<BroadcastSink>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(FixedClock::new(t0()));
    let events = Arc::new(BroadcastSink::new());
    let manager = CompetitionLifecycleManager::with_clock(store.clone(), events.clone(), clock.clone());
    Harness {
        manager,
        store,
        clock,
        events,
    }
}

fn requirement(kind: &str) -> Requirement {
    Requirement {
        kind: kind.to_string(),
        description: format!("Submit a {}", kind),
        criteria: serde_json::Map::new(),
        points: 10,
        required: true,
    }
}

fn request(name: &str, start_in_days: i64, length_days: i64) -> CreateCompetition {
    let start = t0() + Duration::days(start_in_days);
    CreateCompetition {
        name: name.to_string(),
        description: "Ship something useful".to_string(),
        kind: "sprint".to_string(),
        start_date: start,
        end_date: start + Duration::days(length_days),
        requirements: vec![requirement("pull_request"), requirement("issue")],
        rewards: vec![],
        validation_rules: vec![],
        tags: vec!["rust".to_string()],
        max_participants: None,
        registration_deadline: None,
    }
}

async fn count(h: &Harness, id: Uuid) -> u32 {
    h.store
        .find_competition(id)
        .await
        .unwrap()
        .unwrap()
        .participant_count
}

#[tokio::test]
async fn test_reconciliation_starts_due_competition() {
    let h = harness();
    let c = h.manager.create(request("October sprint", 1, 29), "org").await.unwrap();
    assert_eq!(c.status, CompetitionStatus::Upcoming);

    let report = h.manager.reconcile_at(t0() + Duration::hours(12)).await.unwrap();
    assert!(report.is_empty());

    let mut rx = h.events.subscribe();
    let report = h
        .manager
        .reconcile_at(t0() + Duration::days(1) + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(report.started, vec![c.id]);

    let stored = h.store.find_competition(c.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CompetitionStatus::Active);
    let event = rx.try_recv().unwrap();
    assert_eq!(event.kind, EventKind::CompetitionStarted);
    assert_eq!(event.competition_id, c.id);
}

#[tokio::test]
async fn test_duplicate_registration_keeps_count() {
    let h = harness();
    let c = h.manager.create(request("Bug bash", 2, 10), "org").await.unwrap();

    h.manager
        .register_participant(c.id, "alice", HashMap::new())
        .await
        .unwrap();
    assert_eq!(count(&h, c.id).await, 1);

    let err = h
        .manager
        .register_participant(c.id, "alice", HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CompetitionError::Validation(_)));
    assert_eq!(count(&h, c.id).await, 1);
}

#[tokio::test]
async fn test_completion_completes_active_participations() {
    let h = harness();
    let c = h.manager.create(request("Docs week", 1, 7), "org").await.unwrap();
    for user in ["alice", "bob", "carol"] {
        h.manager
            .register_participant(c.id, user, HashMap::new())
            .await
            .unwrap();
    }

    h.clock.advance(Duration::days(1));
    h.manager.start(c.id).await.unwrap();
    for p in h.manager.participations(c.id).await.unwrap() {
        assert_eq!(p.status, ParticipationStatus::Active);
    }

    h.clock.advance(Duration::days(7));
    let report = h.manager.reconcile().await.unwrap();
    assert_eq!(report.completed, vec![c.id]);

    let participations = h.manager.participations(c.id).await.unwrap();
    assert_eq!(participations.len(), 3);
    assert!(participations
        .iter()
        .all(|p| p.status == ParticipationStatus::Completed));
}

#[tokio::test]
async fn test_participant_count_tracks_registrations() {
    let h = harness();
    let mut req = request("Capped", 3, 5);
    req.max_participants = Some(2);
    let c = h.manager.create(req, "org").await.unwrap();

    h.manager.register_participant(c.id, "alice", HashMap::new()).await.unwrap();
    h.manager.register_participant(c.id, "bob", HashMap::new()).await.unwrap();
    assert_eq!(count(&h, c.id).await, 2);

    let full = h
        .manager
        .register_participant(c.id, "carol", HashMap::new())
        .await;
    assert!(full.is_err());
    assert_eq!(count(&h, c.id).await, 2);

    h.manager.unregister_participant(c.id, "bob").await.unwrap();
    assert_eq!(count(&h, c.id).await, 1);
    assert!(h.manager.unregister_participant(c.id, "bob").await.is_err());
    assert_eq!(count(&h, c.id).await, 1);

    h.manager.register_participant(c.id, "bob", HashMap::new()).await.unwrap();
    assert_eq!(count(&h, c.id).await, 2);

    let counted = h
        .manager
        .participations(c.id)
        .await
        .unwrap()
        .iter()
        .filter(|p| p.status.is_counted())
        .count() as u32;
    assert_eq!(counted, count(&h, c.id).await);
}

const ALL: [CompetitionStatus; 4] = [
    CompetitionStatus::Upcoming,
    CompetitionStatus::Active,
    CompetitionStatus::Completed,
    CompetitionStatus::Cancelled,
];

#[tokio::test]
async fn test_status_updates_follow_transition_table() {
    for from in ALL {
        for to in ALL {
            let h = harness();
            let c = h.manager.create(request("Table", 0, 5), "org").await.unwrap();

            // drive the record into `from` through legal steps
            match from {
                CompetitionStatus::Upcoming => {}
                CompetitionStatus::Active => {
                    h.manager.start(c.id).await.unwrap();
                }
                CompetitionStatus::Completed => {
                    h.manager.start(c.id).await.unwrap();
                    h.manager.complete(c.id).await.unwrap();
                }
                CompetitionStatus::Cancelled => {
                    let patch = CompetitionPatch {
                        status: Some(CompetitionStatus::Cancelled),
                        ..Default::default()
                    };
                    h.manager.update(c.id, patch).await.unwrap();
                }
            }

            let patch = CompetitionPatch {
                status: Some(to),
                ..Default::default()
            };
            let outcome = h.manager.update(c.id, patch).await;
            let stored = h.store.find_competition(c.id).await.unwrap().unwrap();

            if from.can_transition_to(to) {
                assert!(outcome.is_ok(), "{:?} -> {:?} should succeed", from, to);
                assert_eq!(stored.status, to);
            } else {
                let err = outcome.unwrap_err();
                assert!(
                    err.to_string().contains("Invalid status transition"),
                    "{:?} -> {:?}: {}",
                    from,
                    to,
                    err
                );
                assert_eq!(stored.status, from);
            }
        }
    }
}

#[tokio::test]
async fn test_second_start_fails_cleanly() {
    let h = harness();
    let c = h.manager.create(request("Race", 1, 5), "org").await.unwrap();
    let mut rx = h.events.subscribe();

    let due = t0() + Duration::days(1);
    h.clock.set(due);
    let (a, b) = tokio::join!(h.manager.start(c.id), h.manager.reconcile_at(due));

    let started_by_reconcile = b.as_ref().map(|r| r.started.len()).unwrap_or(0);
    let started = usize::from(a.is_ok()) + started_by_reconcile;
    assert_eq!(started, 1);

    let stored = h.store.find_competition(c.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CompetitionStatus::Active);

    let mut started_events = 0;
    while let Ok(event) = rx.try_recv() {
        if event.kind == EventKind::CompetitionStarted {
            started_events += 1;
        }
    }
    assert_eq!(started_events, 1);

    // a late manual start is rejected
    assert!(h.manager.start(c.id).await.is_err());
}

/// Serves a fixed set of contributions the way a code host search would:
/// only those authored by the requested user
struct HostedPlatform {
    contributions: Vec<ContributionData>,
}

#[async_trait]
impl PlatformAdapter for HostedPlatform {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn authenticate(
        &self,
        user_id: &str,
        _auth_code: Option<&str>,
    ) -> contest_core::Result<AuthOutcome> {
        Ok(AuthOutcome::Redirect {
            url: "https://github.com/login/oauth/authorize".to_string(),
            state: user_id.to_string(),
        })
    }

    async fn validate_profile(&self, _username: &str) -> contest_core::Result<ProfileCheck> {
        Ok(ProfileCheck::not_found())
    }

    async fn fetch_contributions(
        &self,
        username: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> contest_core::Result<Vec<ContributionData>> {
        Ok(self
            .contributions
            .iter()
            .filter(|c| c.author == username)
            .cloned()
            .collect())
    }

    fn validate_contribution(
        &self,
        contribution: &ContributionData,
        requirements: &[Requirement],
    ) -> ValidationResult {
        score_contribution(contribution, requirements)
    }

    async fn get_user_profile(&self, username: &str) -> contest_core::Result<UserProfile> {
        Err(CompetitionError::not_found(format!("user {}", username)))
    }

    fn get_rate_limit(&self) -> RateLimitInfo {
        RateLimitInfo::unknown(5000)
    }

    async fn health_check(&self) -> AdapterHealth {
        AdapterHealth {
            platform: "github".to_string(),
            status: HealthStatus::Healthy,
            rate_limit: self.get_rate_limit(),
            message: None,
        }
    }
}

fn merged_pr(id: &str, author: &str, at: DateTime<Utc>) -> ContributionData {
    let mut metadata = serde_json::Map::new();
    metadata.insert("additions".into(), serde_json::json!(120));
    metadata.insert("deletions".into(), serde_json::json!(30));
    ContributionData {
        id: id.to_string(),
        platform: "github".to_string(),
        kind: ContributionType::PullRequest,
        title: "Add retry to uploader".to_string(),
        description: Some("Retries failed chunk uploads".to_string()),
        url: format!("https://github.com/acme/widgets/pull/{}", id),
        repository: RepositoryRef::from_full_name("acme/widgets", "https://github.com"),
        author: author.to_string(),
        created_at: at,
        updated_at: at,
        merged_at: Some(at),
        closed_at: Some(at),
        status: "merged".to_string(),
        labels: vec![],
        metadata,
    }
}

fn hosted_gateway(contributions: Vec<ContributionData>) -> ExternalContributionGateway {
    let mut gateway = ExternalContributionGateway::new();
    gateway.register(Arc::new(HostedPlatform { contributions }));
    gateway
}

fn claim(id: &str) -> ContributionClaim {
    ContributionClaim {
        platform: "github".to_string(),
        contribution_id: id.to_string(),
    }
}

fn github_handle(handle: &str) -> HashMap<String, String> {
    [("github".to_string(), handle.to_string())].into_iter().collect()
}

/// Competition running from day 1 to day 11, clock at day 2
async fn running(h: &Harness, handles: HashMap<String, String>) -> Uuid {
    let c = h.manager.create(request("Credit", 1, 10), "org").await.unwrap();
    h.manager.register_participant(c.id, "alice", handles).await.unwrap();
    h.clock.advance(Duration::days(2));
    h.manager.reconcile().await.unwrap();
    c.id
}

#[tokio::test]
async fn test_validated_contribution_moves_progress_once() {
    let h = harness();
    let id = running(&h, github_handle("alice-gh")).await;
    let gateway = hosted_gateway(vec![merged_pr("42", "alice-gh", t0() + Duration::hours(36))]);

    let (result, participation) = h
        .manager
        .validate_and_record(&gateway, id, "alice", &claim("42"))
        .await
        .unwrap();
    assert!(result.valid);
    let participation = participation.unwrap();
    assert_eq!(participation.progress.completed_requirements, 1);
    assert_eq!(participation.progress.completion_percentage, 50.0);
    assert_eq!(participation.total_score, result.score);
    assert_eq!(participation.contributions[0].key, "github:42");

    let again = h
        .manager
        .validate_and_record(&gateway, id, "alice", &claim("42"))
        .await
        .unwrap_err();
    assert_eq!(again.error_code(), "DUPLICATE_CONTRIBUTION");

    let stored = h.manager.get_participation(id, "alice").await.unwrap().unwrap();
    assert_eq!(stored.contributions.len(), 1);
    assert_eq!(stored.total_score, result.score);
}

#[tokio::test]
async fn test_claim_must_match_the_linked_account() {
    let h = harness();
    let id = running(&h, github_handle("alice-gh")).await;
    let gateway = hosted_gateway(vec![
        merged_pr("7", "mallory", t0() + Duration::hours(36)),
        merged_pr("8", "alice-gh", Utc.with_ymd_and_hms(2019, 3, 1, 0, 0, 0).unwrap()),
        merged_pr("9", "alice-gh", t0() + Duration::days(3)),
    ]);

    // someone else's PR, one from years ago, one the clock has not reached
    for id_str in ["7", "8", "9", "404"] {
        let err = h
            .manager
            .validate_and_record(&gateway, id, "alice", &claim(id_str))
            .await
            .unwrap_err();
        assert!(
            matches!(err, CompetitionError::Validation(_)),
            "{}: {}",
            id_str,
            err
        );
    }

    let stored = h.manager.get_participation(id, "alice").await.unwrap().unwrap();
    assert!(stored.contributions.is_empty());
    assert_eq!(stored.total_score, 0.0);
}

#[tokio::test]
async fn test_claim_without_linked_account_rejected() {
    let h = harness();
    let id = running(&h, HashMap::new()).await;
    let gateway = hosted_gateway(vec![merged_pr("42", "alice", t0() + Duration::hours(36))]);

    let err = h
        .manager
        .validate_and_record(&gateway, id, "alice", &claim("42"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No github account linked"));
}

/// Yields after every participation read so concurrent callers interleave
/// between their read and their write
struct YieldingStore {
    inner: MemoryStore,
}

#[async_trait]
impl CompetitionStore for YieldingStore {
    async fn insert_competition(&self, competition: &Competition) -> contest_core::Result<()> {
        self.inner.insert_competition(competition).await
    }

    async fn find_competition(&self, id: Uuid) -> contest_core::Result<Option<Competition>> {
        self.inner.find_competition(id).await
    }

    async fn list_competitions(
        &self,
        filter: &CompetitionFilter,
    ) -> contest_core::Result<Vec<Competition>> {
        self.inner.list_competitions(filter).await
    }

    async fn update_competition(&self, competition: &Competition) -> contest_core::Result<Competition> {
        self.inner.update_competition(competition).await
    }

    async fn delete_competition(&self, id: Uuid) -> contest_core::Result<()> {
        self.inner.delete_competition(id).await
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: CompetitionStatus,
        to: CompetitionStatus,
        at: DateTime<Utc>,
    ) -> contest_core::Result<Competition> {
        self.inner.transition_status(id, from, to, at).await
    }

    async fn insert_participation(
        &self,
        participation: &Participation,
    ) -> contest_core::Result<Competition> {
        self.inner.insert_participation(participation).await
    }

    async fn find_participation(
        &self,
        competition_id: Uuid,
        user_id: &str,
    ) -> contest_core::Result<Option<Participation>> {
        let found = self.inner.find_participation(competition_id, user_id).await;
        tokio::task::yield_now().await;
        found
    }

    async fn list_participations(
        &self,
        competition_id: Uuid,
    ) -> contest_core::Result<Vec<Participation>> {
        self.inner.list_participations(competition_id).await
    }

    async fn replace_participation(
        &self,
        expected: &Participation,
        participation: &Participation,
        count_delta: i32,
    ) -> contest_core::Result<Competition> {
        self.inner
            .replace_participation(expected, participation, count_delta)
            .await
    }
}

fn yielding_manager() -> (CompetitionLifecycleManager, Arc<YieldingStore>) {
    let store = Arc::new(YieldingStore {
        inner: MemoryStore::new(),
    });
    let manager = CompetitionLifecycleManager::with_clock(
        store.clone(),
        Arc::new(BroadcastSink::new()),
        Arc::new(FixedClock::new(t0())),
    );
    (manager, store)
}

async fn counted(manager: &CompetitionLifecycleManager, id: Uuid) -> u32 {
    manager
        .participations(id)
        .await
        .unwrap()
        .iter()
        .filter(|p| p.status.is_counted())
        .count() as u32
}

#[tokio::test]
async fn test_concurrent_unregister_decrements_once() {
    let (manager, store) = yielding_manager();
    let c = manager.create(request("Race", 2, 5), "org").await.unwrap();
    for user in ["alice", "bob"] {
        manager.register_participant(c.id, user, HashMap::new()).await.unwrap();
    }

    let (a, b) = tokio::join!(
        manager.unregister_participant(c.id, "alice"),
        manager.unregister_participant(c.id, "alice")
    );
    assert_eq!(usize::from(a.is_ok()) + usize::from(b.is_ok()), 1);

    let stored = store.find_competition(c.id).await.unwrap().unwrap();
    assert_eq!(stored.participant_count, 1);
    assert_eq!(stored.participant_count, counted(&manager, c.id).await);
}

#[tokio::test]
async fn test_concurrent_rejoin_increments_once() {
    let (manager, store) = yielding_manager();
    let c = manager.create(request("Race", 2, 5), "org").await.unwrap();
    manager.register_participant(c.id, "alice", HashMap::new()).await.unwrap();
    manager.unregister_participant(c.id, "alice").await.unwrap();
    assert_eq!(store.find_competition(c.id).await.unwrap().unwrap().participant_count, 0);

    let (a, b) = tokio::join!(
        manager.register_participant(c.id, "alice", HashMap::new()),
        manager.register_participant(c.id, "alice", HashMap::new())
    );
    assert_eq!(usize::from(a.is_ok()) + usize::from(b.is_ok()), 1);

    let stored = store.find_competition(c.id).await.unwrap().unwrap();
    assert_eq!(stored.participant_count, 1);
    assert_eq!(stored.participant_count, counted(&manager, c.id).await);
}

#[tokio::test]
async fn test_rejoin_refused_when_full() {
    let h = harness();
    let mut req = request("Capped", 3, 5);
    req.max_participants = Some(1);
    let c = h.manager.create(req, "org").await.unwrap();

    h.manager.register_participant(c.id, "alice", HashMap::new()).await.unwrap();
    h.manager.unregister_participant(c.id, "alice").await.unwrap();
    h.manager.register_participant(c.id, "bob", HashMap::new()).await.unwrap();

    let err = h
        .manager
        .register_participant(c.id, "alice", HashMap::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("maximum participants"));
    assert_eq!(count(&h, c.id).await, 1);
    let alice = h.manager.get_participation(c.id, "alice").await.unwrap().unwrap();
    assert_eq!(alice.status, ParticipationStatus::Dropped);
}
