use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ScenarioRepository, SessionRepository, SessionTransition, StepRepository,
    StoreResult, TransitionRepository,
};
use crate::error::StoreError;
use crate::manager::Repositories;
use crate::scenario::Scenario;
use crate::session::Session;
use crate::step::Step;

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create(&self, session: &Session) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(StoreError::Backend(anyhow!(
                "session {} already exists",
                session.id
            )));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Session>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn update(&self, session: &Session) -> StoreResult<i64> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .get_mut(&session.id)
            .ok_or_else(|| StoreError::Backend(anyhow!("session {} does not exist", session.id)))?;
        if stored.version != session.version {
            return Err(StoreError::VersionConflict {
                session_id: session.id,
                expected: session.version,
            });
        }
        let version = session.version + 1;
        *stored = Session {
            version,
            ..session.clone()
        };
        Ok(version)
    }
}

#[derive(Default)]
pub struct InMemoryStepRepository {
    steps: RwLock<HashMap<Uuid, Vec<Step>>>,
}

impl InMemoryStepRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StepRepository for InMemoryStepRepository {
    async fn create(&self, step: &Step) -> StoreResult<()> {
        let mut steps = self.steps.write().await;
        check_new_step(&steps, step)?;
        insert_step(&mut steps, step);
        Ok(())
    }

    async fn update(&self, step: &Step) -> StoreResult<()> {
        let mut steps = self.steps.write().await;
        *stored_step(&mut steps, step)? = step.clone();
        Ok(())
    }

    async fn find_by_session(&self, session_id: Uuid) -> StoreResult<Vec<Step>> {
        Ok(self
            .steps
            .read()
            .await
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }
}

type StepMap = HashMap<Uuid, Vec<Step>>;

fn check_new_step(steps: &StepMap, step: &Step) -> StoreResult<()> {
    let taken = steps
        .get(&step.session_id)
        .is_some_and(|existing| existing.iter().any(|s| s.step_number == step.step_number));
    if taken {
        return Err(StoreError::DuplicateStep {
            session_id: step.session_id,
            step_number: step.step_number,
        });
    }
    Ok(())
}

fn insert_step(steps: &mut StepMap, step: &Step) {
    let session_steps = steps.entry(step.session_id).or_default();
    session_steps.push(step.clone());
    session_steps.sort_by_key(|s| s.step_number);
}

fn stored_step<'a>(steps: &'a mut StepMap, step: &Step) -> StoreResult<&'a mut Step> {
    steps
        .get_mut(&step.session_id)
        .and_then(|session_steps| session_steps.iter_mut().find(|s| s.id == step.id))
        .ok_or_else(|| StoreError::Backend(anyhow!("step {} does not exist", step.id)))
}

/// Applies transitions across an in-memory session and step store while
/// holding both write locks.
pub struct InMemoryTransitionRepository {
    sessions: Arc<InMemorySessionRepository>,
    steps: Arc<InMemoryStepRepository>,
}

impl InMemoryTransitionRepository {
    pub fn new(sessions: Arc<InMemorySessionRepository>, steps: Arc<InMemoryStepRepository>) -> Self {
        Self { sessions, steps }
    }
}

#[async_trait]
impl TransitionRepository for InMemoryTransitionRepository {
    async fn apply(&self, transition: SessionTransition<'_>) -> StoreResult<i64> {
        let mut sessions = self.sessions.sessions.write().await;
        let mut steps = self.steps.steps.write().await;
        let session = transition.session;

        let version = if transition.insert_session {
            if sessions.contains_key(&session.id) {
                return Err(StoreError::Backend(anyhow!(
                    "session {} already exists",
                    session.id
                )));
            }
            session.version
        } else {
            let stored = sessions.get(&session.id).ok_or_else(|| {
                StoreError::Backend(anyhow!("session {} does not exist", session.id))
            })?;
            if stored.version != session.version {
                return Err(StoreError::VersionConflict {
                    session_id: session.id,
                    expected: session.version,
                });
            }
            session.version + 1
        };
        if let Some(step) = transition.new_step {
            check_new_step(&steps, step)?;
        }
        if let Some(step) = transition.answered_step {
            stored_step(&mut steps, step)?;
        }

        // Nothing below can fail.
        sessions.insert(
            session.id,
            Session {
                version,
                ..session.clone()
            },
        );
        if let Some(step) = transition.answered_step {
            if let Ok(stored) = stored_step(&mut steps, step) {
                *stored = step.clone();
            }
        }
        if let Some(step) = transition.new_step {
            insert_step(&mut steps, step);
        }
        Ok(version)
    }
}

/// A full set of process-local repositories over one shared store.
pub fn repositories() -> Repositories {
    let sessions = Arc::new(InMemorySessionRepository::new());
    let steps = Arc::new(InMemoryStepRepository::new());
    Repositories {
        transitions: Arc::new(InMemoryTransitionRepository::new(
            sessions.clone(),
            steps.clone(),
        )),
        sessions,
        steps,
        scenarios: Arc::new(InMemoryScenarioRepository::new()),
    }
}

#[derive(Default)]
pub struct InMemoryScenarioRepository {
    scenarios: RwLock<HashMap<Uuid, Scenario>>,
}

impl InMemoryScenarioRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScenarioRepository for InMemoryScenarioRepository {
    async fn create(&self, scenario: &Scenario) -> StoreResult<()> {
        self.scenarios
            .write()
            .await
            .insert(scenario.id, scenario.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Scenario>> {
        Ok(self.scenarios.read().await.get(&id).cloned())
    }
}
