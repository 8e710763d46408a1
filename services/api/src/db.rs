//! Data Access Layer
//!
//! PostgreSQL implementation of the session store. Each record is one row;
//! the answer log is JSONB and rosters and asked questions are `TEXT[]`.
//! Updates are conditional on the stored `version`.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, types::Json};
use turntalks_core::{
    error::{SessionError, SessionResult},
    session::{Answer, NewSession, Session, SessionStatus},
    store::SessionStore,
};
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, owner_id, user_id, prompt, end_goal, participants, num_questions, \
    time_limit, current_question, current_turn, answers, asked_questions, status, summary, \
    rating, reference_document_id, version, created_at, updated_at";

#[derive(Debug, FromRow)]
struct SessionRow {
    id: Uuid,
    owner_id: String,
    user_id: String,
    prompt: String,
    end_goal: Option<String>,
    participants: Vec<String>,
    num_questions: i64,
    time_limit: i64,
    current_question: Option<String>,
    current_turn: i64,
    answers: Json<Vec<Answer>>,
    asked_questions: Vec<String>,
    status: String,
    summary: Option<String>,
    rating: Option<i16>,
    reference_document_id: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for Session {
    type Error = anyhow::Error;

    fn try_from(row: SessionRow) -> Result<Self> {
        Ok(Session {
            id: row.id,
            owner_id: row.owner_id,
            user_id: row.user_id,
            prompt: row.prompt,
            end_goal: row.end_goal,
            participants: row.participants,
            num_questions: u32::try_from(row.num_questions)
                .context("num_questions out of range")?,
            time_limit: u32::try_from(row.time_limit).context("time_limit out of range")?,
            current_question: row.current_question,
            current_turn: usize::try_from(row.current_turn)
                .context("current_turn out of range")?,
            answers: row.answers.0,
            asked_questions: row.asked_questions,
            status: row.status.parse::<SessionStatus>().map_err(|e| anyhow!(e))?,
            summary: row.summary,
            rating: row
                .rating
                .map(u8::try_from)
                .transpose()
                .context("rating out of range")?,
            reference_document_id: row.reference_document_id,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn store_error(err: anyhow::Error) -> SessionError {
    SessionError::Store(err)
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, new: NewSession) -> SessionResult<Session> {
        let sql = format!(
            "INSERT INTO sessions \
                (owner_id, user_id, prompt, end_goal, participants, num_questions, time_limit, \
                 reference_document_id) \
             VALUES ($1, $1, $2, $3, $4, $5, $6, $7) \
             RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(&new.user_id)
            .bind(&new.prompt)
            .bind(&new.end_goal)
            .bind(&new.participants)
            .bind(i64::from(new.num_questions))
            .bind(i64::from(new.time_limit))
            .bind(&new.reference_document_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to insert session")
            .map_err(store_error)?;
        Session::try_from(row).map_err(store_error)
    }

    async fn get(&self, id: Uuid) -> SessionResult<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1");
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load session")
            .map_err(store_error)?;
        row.map(Session::try_from)
            .transpose()
            .map_err(store_error)
    }

    async fn update(&self, session: &Session) -> SessionResult<Session> {
        let current_turn = i64::try_from(session.current_turn)
            .context("current_turn out of range")
            .map_err(store_error)?;
        let sql = format!(
            "UPDATE sessions SET \
                user_id = $3, prompt = $4, end_goal = $5, participants = $6, num_questions = $7, \
                time_limit = $8, current_question = $9, current_turn = $10, answers = $11, \
                asked_questions = $12, status = $13, summary = $14, rating = $15, \
                reference_document_id = $16, version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND version = $2 \
             RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(session.id)
            .bind(session.version)
            .bind(&session.user_id)
            .bind(&session.prompt)
            .bind(&session.end_goal)
            .bind(&session.participants)
            .bind(i64::from(session.num_questions))
            .bind(i64::from(session.time_limit))
            .bind(&session.current_question)
            .bind(current_turn)
            .bind(Json(&session.answers))
            .bind(&session.asked_questions)
            .bind(session.status.as_str())
            .bind(&session.summary)
            .bind(session.rating.map(i16::from))
            .bind(&session.reference_document_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to update session")
            .map_err(store_error)?;

        match row {
            Some(row) => Session::try_from(row).map_err(store_error),
            // Distinguish a stale version from a missing record.
            None => match self.get(session.id).await? {
                Some(_) => Err(SessionError::Conflict(session.id)),
                None => Err(SessionError::NotFound(session.id)),
            },
        }
    }

    async fn delete_many(&self, owner_id: &str, ids: &[Uuid]) -> SessionResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE owner_id = $1 AND id = ANY($2)")
            .bind(owner_id)
            .bind(ids.to_vec())
            .execute(&self.pool)
            .await
            .context("Failed to delete sessions")
            .map_err(store_error)?;
        Ok(result.rows_affected())
    }

    async fn list(&self, owner_id: &str) -> SessionResult<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE owner_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list sessions")
            .map_err(store_error)?;
        rows.into_iter()
            .map(Session::try_from)
            .collect::<Result<Vec<_>>>()
            .map_err(store_error)
    }
}
