//! Data Access Layer
//!
//! PostgreSQL implementations of the engine's repository traits. Queries go
//! through `sqlx::query_as` with `FromRow` row types so the crate builds
//! without a live database.
//!
//! Session and step writes are plain functions over any `PgExecutor`, so the
//! same statements run against the pool or inside the transaction that
//! applies a [`SessionTransition`].

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use rehearsal_core::repository::{
    ScenarioRepository, SessionRepository, SessionTransition, StepRepository, StoreResult,
    TransitionRepository,
};
use rehearsal_core::{Scenario, Session, Step, StoreError};
use sqlx::{PgExecutor, PgPool};
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::{ScenarioRow, SessionRow, StepRow};

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.into())
}

fn to_i32(value: u32, what: &str) -> StoreResult<i32> {
    Ok(i32::try_from(value).with_context(|| format!("{what} {value} does not fit the column"))?)
}

#[async_trait]
impl ScenarioRepository for Db {
    async fn create(&self, scenario: &Scenario) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO scenarios (id, skill, title, description, difficulty_level,
                estimated_duration_minutes, initial_situation, step_count, tags,
                ai_generated, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(scenario.id)
        .bind(&scenario.skill)
        .bind(&scenario.title)
        .bind(&scenario.description)
        .bind(i16::from(scenario.difficulty_level))
        .bind(to_i32(scenario.estimated_duration_minutes, "duration")?)
        .bind(
            scenario
                .step_count
                .map(|count| to_i32(count, "step count"))
                .transpose()?,
        )
        .bind(Json(&scenario.tags))
        .bind(scenario.ai_generated)
        .bind(scenario.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Scenario>> {
        let row = sqlx::query_as::<_, ScenarioRow>(
            r#"
            SELECT id, skill, title, description, difficulty_level, estimated_duration_minutes,
                initial_situation, step_count, tags, ai_generated, created_at
            FROM scenarios
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(Scenario::try_from).transpose()?)
    }
}

async fn insert_session<'e>(db: impl PgExecutor<'e>, session: &Session) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sessions (id, user_id, skill, scenario_id, scenario_title, status,
            current_step, total_steps, difficulty_level, step_scores, final_score,
            version, created_at, started_at, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
    )
    .bind(session.id)
    .bind(&session.user_id)
    .bind(&session.skill)
    .bind(session.scenario_id)
    .bind(&session.scenario_title)
    .bind(session.status.as_str())
    .bind(to_i32(session.current_step, "current step")?)
    .bind(to_i32(session.total_steps, "total steps")?)
    .bind(i16::from(session.difficulty_level))
    .bind(Json(&session.step_scores))
    .bind(
        session
            .final_score
            .map(|score| to_i32(score, "final score"))
            .transpose()?,
    )
    .bind(session.version)
    .bind(session.created_at)
    .bind(session.started_at)
    .bind(session.completed_at)
    .execute(db)
    .await
    .map_err(backend)?;
    Ok(())
}

/// Writes `session` if its stored version still matches, returning the new
/// version.
async fn update_session<'e>(db: impl PgExecutor<'e>, session: &Session) -> StoreResult<i64> {
    let version: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE sessions
        SET status = $3, current_step = $4, total_steps = $5, difficulty_level = $6,
            step_scores = $7, final_score = $8, completed_at = $9,
            version = version + 1
        WHERE id = $1 AND version = $2
        RETURNING version
        "#,
    )
    .bind(session.id)
    .bind(session.version)
    .bind(session.status.as_str())
    .bind(to_i32(session.current_step, "current step")?)
    .bind(to_i32(session.total_steps, "total steps")?)
    .bind(i16::from(session.difficulty_level))
    .bind(Json(&session.step_scores))
    .bind(
        session
            .final_score
            .map(|score| to_i32(score, "final score"))
            .transpose()?,
    )
    .bind(session.completed_at)
    .fetch_optional(db)
    .await
    .map_err(backend)?;

    version.ok_or(StoreError::VersionConflict {
        session_id: session.id,
        expected: session.version,
    })
}

async fn insert_step<'e>(db: impl PgExecutor<'e>, step: &Step) -> StoreResult<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO steps (id, session_id, step_number, step_type, content, evaluation,
            metrics, analysis, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(step.id)
    .bind(step.session_id)
    .bind(to_i32(step.step_number, "step number")?)
    .bind(step.step_type.as_str())
    .bind(Json(&step.content))
    .bind(step.evaluation.as_ref().map(Json))
    .bind(Json(&step.metrics))
    .bind(step.analysis.as_ref().map(Json))
    .bind(step.created_at)
    .execute(db)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            Err(StoreError::DuplicateStep {
                session_id: step.session_id,
                step_number: step.step_number,
            })
        }
        Err(err) => Err(backend(err)),
    }
}

async fn update_step<'e>(db: impl PgExecutor<'e>, step: &Step) -> StoreResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE steps
        SET content = $2, evaluation = $3, metrics = $4, analysis = $5
        WHERE id = $1
        "#,
    )
    .bind(step.id)
    .bind(Json(&step.content))
    .bind(step.evaluation.as_ref().map(Json))
    .bind(Json(&step.metrics))
    .bind(step.analysis.as_ref().map(Json))
    .execute(db)
    .await
    .map_err(backend)?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Backend(anyhow!("step {} does not exist", step.id)));
    }
    Ok(())
}

#[async_trait]
impl SessionRepository for Db {
    async fn create(&self, session: &Session) -> StoreResult<()> {
        insert_session(&self.pool, session).await
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, user_id, skill, scenario_id, scenario_title, status, current_step,
                total_steps, difficulty_level, step_scores, final_score, version,
                created_at, started_at, completed_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(Session::try_from).transpose()?)
    }

    async fn update(&self, session: &Session) -> StoreResult<i64> {
        update_session(&self.pool, session).await
    }
}

#[async_trait]
impl StepRepository for Db {
    async fn create(&self, step: &Step) -> StoreResult<()> {
        insert_step(&self.pool, step).await
    }

    async fn update(&self, step: &Step) -> StoreResult<()> {
        update_step(&self.pool, step).await
    }

    async fn find_by_session(&self, session_id: Uuid) -> StoreResult<Vec<Step>> {
        let rows = sqlx::query_as::<_, StepRow>(
            r#"
            SELECT id, session_id, step_number, step_type, content, evaluation, metrics,
                analysis, created_at
            FROM steps
            WHERE session_id = $1
            ORDER BY step_number
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows
            .into_iter()
            .map(Step::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?)
    }
}

#[async_trait]
impl TransitionRepository for Db {
    /// Runs every write of `transition` in one transaction. Any error drops
    /// the transaction, which rolls it back.
    async fn apply(&self, transition: SessionTransition<'_>) -> StoreResult<i64> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let version = if transition.insert_session {
            insert_session(&mut *tx, transition.session).await?;
            transition.session.version
        } else {
            update_session(&mut *tx, transition.session).await?
        };
        if let Some(answered) = transition.answered_step {
            update_step(&mut *tx, answered).await?;
        }
        if let Some(step) = transition.new_step {
            insert_step(&mut *tx, step).await?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(version)
    }
}
