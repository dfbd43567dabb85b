//! Contest Core - competition management with external contribution checks
//!
//! Runs time-boxed competitions (open-source sprints, Hacktoberfest-style
//! campaigns) and verifies what participants claim against the platforms
//! their work lives on.
//!
//! # How it works
//!
//! 1. Organizers create competitions with requirements and validation rules
//! 2. Users register, linking their GitHub / GitLab handles
//! 3. A reconciliation loop starts and completes competitions on schedule
//! 4. Contributions are fetched from the platforms, normalised and scored
//! 5. Valid contributions are credited to the participation and move its
//!    progress forward
//!
//! # Scoring
//!
//! - Generic platforms: base score by type plus merge/approval, size, label
//!   and keyword adjustments, valid at 50
//! - Hacktoberfest: pull requests in October only, spam/invalid labels
//!   disqualify, valid at 60, unmerged unapproved PRs capped at 40

pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod lifecycle;
pub mod models;
pub mod platforms;
pub mod rate_limit;
pub mod server;
pub mod storage;
pub mod validation;

pub use config::Config;
pub use error::{CompetitionError, ExternalApiError, ExternalErrorKind, Result};
pub use events::{BroadcastSink, DomainEvent, EventKind, EventSink, LogSink};
pub use gateway::{ActivitySummary, ExternalContributionGateway, LinkedProfile};
pub use lifecycle::{
    reconcile::run_reconciliation_loop, Clock, CompetitionLifecycleManager, FixedClock,
    SystemClock,
};
pub use models::{
    Competition, CompetitionFilter, CompetitionPatch, CompetitionStatus, ContributionClaim,
    CreateCompetition, Participation, ParticipationStatus, Requirement, ValidatedContribution, ValidationRule,
};
pub use platforms::{
    ContributionData, ContributionType, GitHubAdapter, GitLabAdapter, HacktoberfestAdapter,
    PlatformAdapter, ValidationResult,
};
pub use rate_limit::{RateLimitInfo, RateLimitTracker};
pub use storage::{CompetitionStore, MemoryStore, SqliteStore};
pub use validation::ContributionValidationEngine;
