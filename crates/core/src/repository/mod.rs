//! Persistence contracts.
//!
//! The engine only depends on these traits. [`memory`] provides a process-local
//! implementation; the API service provides a PostgreSQL one.
//!
//! Every change a session goes through while it runs is written with
//! [`TransitionRepository::apply`], so a session never points at a step that
//! was not stored.

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::scenario::Scenario;
use crate::session::Session;
use crate::step::Step;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &Session) -> StoreResult<()>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Session>>;

    /// Stores `session` if the persisted version still equals
    /// `session.version`, and returns the new version.
    ///
    /// Fails with [`StoreError::VersionConflict`] when another writer got
    /// there first.
    async fn update(&self, session: &Session) -> StoreResult<i64>;
}

#[async_trait]
pub trait StepRepository: Send + Sync {
    /// Fails with [`StoreError::DuplicateStep`] if the session already has a
    /// step with the same number.
    async fn create(&self, step: &Step) -> StoreResult<()>;

    async fn update(&self, step: &Step) -> StoreResult<()>;

    /// All steps of a session ordered by step number.
    async fn find_by_session(&self, session_id: Uuid) -> StoreResult<Vec<Step>>;
}

#[async_trait]
pub trait ScenarioRepository: Send + Sync {
    async fn create(&self, scenario: &Scenario) -> StoreResult<()>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Scenario>>;
}

/// The writes of one session state change.
#[derive(Debug, Clone, Copy)]
pub struct SessionTransition<'a> {
    pub session: &'a Session,
    /// Insert `session` instead of a version-checked update.
    pub insert_session: bool,
    /// An existing step to overwrite.
    pub answered_step: Option<&'a Step>,
    /// A step to insert.
    pub new_step: Option<&'a Step>,
}

impl<'a> SessionTransition<'a> {
    /// A new session together with its first step.
    pub fn start(session: &'a Session, initial_step: &'a Step) -> Self {
        Self {
            session,
            insert_session: true,
            answered_step: None,
            new_step: Some(initial_step),
        }
    }

    /// An answered step and the step that follows it.
    pub fn advance(session: &'a Session, answered: &'a Step, next: &'a Step) -> Self {
        Self {
            session,
            insert_session: false,
            answered_step: Some(answered),
            new_step: Some(next),
        }
    }

    /// The last answered step of a session that is now finished.
    pub fn finish(session: &'a Session, answered: &'a Step) -> Self {
        Self {
            session,
            insert_session: false,
            answered_step: Some(answered),
            new_step: None,
        }
    }
}

#[async_trait]
pub trait TransitionRepository: Send + Sync {
    /// Applies every write of `transition` or none of them, and returns the
    /// stored session version.
    ///
    /// Fails with [`StoreError::VersionConflict`] or
    /// [`StoreError::DuplicateStep`] under the same rules as the individual
    /// repositories.
    async fn apply(&self, transition: SessionTransition<'_>) -> StoreResult<i64>;
}
