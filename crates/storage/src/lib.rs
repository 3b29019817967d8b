use std::{fs, path::Path, str::FromStr};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ontology::OntologySource;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use uuid::Uuid;

use shared::{
    command::Command,
    domain::{
        ExecutionId, Session, SessionId, StructureId, StructureRecord, SynonymEntry, SystemTag,
        UserId, ViewerState,
    },
};

const SESSION_CODE_LEN: usize = 6;
const SESSION_CODE_ATTEMPTS: usize = 16;
// No ambiguous 0/O or 1/I in shareable codes.
const SESSION_CODE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// Audit record of a command execution inside a session.
#[derive(Debug, Clone)]
pub struct CommandExecution {
    pub id: ExecutionId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub command: Command,
    pub success: bool,
    pub executed_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    // --- ontology -----------------------------------------------------

    /// Structures must be inserted parent-before-child; the ontology load
    /// replays them in insertion (rowid) order.
    pub async fn create_structure(&self, record: &StructureRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO structures (canonical_id, name, alternate_name, system, parent_id)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.canonical_id.as_str())
        .bind(&record.name)
        .bind(record.alternate_name.as_deref())
        .bind(record.system.as_str())
        .bind(record.parent_id.as_ref().map(StructureId::as_str))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert structure {}", record.canonical_id))?;
        Ok(())
    }

    pub async fn create_synonyms(&self, entries: &[SynonymEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                "INSERT INTO synonyms (term, language, priority, canonical_id)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&entry.term)
            .bind(&entry.language)
            .bind(entry.priority)
            .bind(entry.canonical_id.as_str())
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to insert synonym '{}'", entry.term))?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn find_structure_by_id(&self, id: &StructureId) -> Result<Option<StructureRecord>> {
        let row = sqlx::query(
            "SELECT canonical_id, name, alternate_name, system, parent_id
             FROM structures WHERE canonical_id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(structure_from_row).transpose()
    }

    pub async fn all_structures(&self) -> Result<Vec<StructureRecord>> {
        let rows = sqlx::query(
            "SELECT canonical_id, name, alternate_name, system, parent_id
             FROM structures ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(structure_from_row).collect()
    }

    pub async fn all_synonyms(&self) -> Result<Vec<SynonymEntry>> {
        let rows = sqlx::query(
            "SELECT term, language, priority, canonical_id FROM synonyms ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(SynonymEntry {
                    term: row.try_get("term")?,
                    language: row.try_get("language")?,
                    priority: row.try_get("priority")?,
                    canonical_id: StructureId(row.try_get("canonical_id")?),
                })
            })
            .collect()
    }

    // --- sessions -----------------------------------------------------

    /// Creates a live session with a fresh join code. Codes only need to be
    /// unique among active sessions; the partial unique index enforces that
    /// and collisions simply retry with a new code.
    pub async fn create_session(&self, title: &str, owner_id: UserId) -> Result<Session> {
        let viewer_state = ViewerState::default();
        let state_json = serde_json::to_string(&viewer_state)?;

        for _ in 0..SESSION_CODE_ATTEMPTS {
            let code = generate_session_code();
            let inserted = sqlx::query(
                "INSERT INTO sessions (code, title, owner_id, is_active, viewer_state)
                 VALUES (?, ?, ?, 1, ?)",
            )
            .bind(&code)
            .bind(title)
            .bind(owner_id.0)
            .bind(&state_json)
            .execute(&self.pool)
            .await;

            match inserted {
                Ok(done) => {
                    return Ok(Session {
                        id: SessionId(done.last_insert_rowid()),
                        code,
                        title: title.to_string(),
                        owner_id,
                        is_active: true,
                        viewer_state,
                    });
                }
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => continue,
                Err(err) => return Err(err.into()),
            }
        }
        bail!("could not allocate a unique session code after {SESSION_CODE_ATTEMPTS} attempts")
    }

    pub async fn get_session(&self, id: SessionId) -> Result<Option<Session>> {
        let row = sqlx::query(
            "SELECT id, code, title, owner_id, is_active, viewer_state FROM sessions WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(session_from_row).transpose()
    }

    /// Point-in-time read used by late joiners to catch up: looks up the
    /// session by its shareable code, active sessions only.
    pub async fn get_session_by_code(&self, code: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            "SELECT id, code, title, owner_id, is_active, viewer_state
             FROM sessions WHERE code = ? AND is_active = 1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        row.map(session_from_row).transpose()
    }

    pub async fn update_viewer_state(
        &self,
        session_id: SessionId,
        state: &ViewerState,
    ) -> Result<()> {
        let state_json = serde_json::to_string(state)?;
        let done = sqlx::query("UPDATE sessions SET viewer_state = ? WHERE id = ? AND is_active = 1")
            .bind(&state_json)
            .bind(session_id.0)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            bail!("session {session_id} is not active");
        }
        Ok(())
    }

    /// Ends the session, freezing its viewer state. Ending an already-ended
    /// or unknown session is an error.
    pub async fn end_session(&self, session_id: SessionId) -> Result<Session> {
        let done = sqlx::query("UPDATE sessions SET is_active = 0 WHERE id = ? AND is_active = 1")
            .bind(session_id.0)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            bail!("session {session_id} is not active");
        }
        self.get_session(session_id)
            .await?
            .with_context(|| format!("session {session_id} vanished while ending"))
    }

    // --- command audit ------------------------------------------------

    pub async fn record_command_execution(
        &self,
        session_id: SessionId,
        user_id: UserId,
        command: &Command,
        success: bool,
    ) -> Result<ExecutionId> {
        let command_json = serde_json::to_string(command)?;
        let done = sqlx::query(
            "INSERT INTO command_executions (session_id, user_id, command, success)
             VALUES (?, ?, ?, ?)",
        )
        .bind(session_id.0)
        .bind(user_id.0)
        .bind(&command_json)
        .bind(success)
        .execute(&self.pool)
        .await
        .context("failed to record command execution")?;
        Ok(ExecutionId(done.last_insert_rowid()))
    }

    pub async fn list_command_executions(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<CommandExecution>> {
        let rows = sqlx::query(
            "SELECT id, session_id, user_id, command, success, executed_at
             FROM command_executions WHERE session_id = ? ORDER BY id",
        )
        .bind(session_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let command_json: String = row.try_get("command")?;
                Ok(CommandExecution {
                    id: ExecutionId(row.try_get("id")?),
                    session_id: SessionId(row.try_get("session_id")?),
                    user_id: UserId(row.try_get("user_id")?),
                    command: serde_json::from_str(&command_json)?,
                    success: row.try_get("success")?,
                    executed_at: row.try_get("executed_at")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl OntologySource for Storage {
    async fn list_structures(&self) -> Result<Vec<StructureRecord>> {
        self.all_structures().await
    }

    async fn list_synonyms(&self) -> Result<Vec<SynonymEntry>> {
        self.all_synonyms().await
    }
}

fn structure_from_row(row: sqlx::sqlite::SqliteRow) -> Result<StructureRecord> {
    let system: String = row.try_get("system")?;
    let system = SystemTag::from_str(&system).map_err(anyhow::Error::msg)?;
    let canonical_id = StructureId(row.try_get("canonical_id")?);
    Ok(StructureRecord {
        id: canonical_id.clone(),
        canonical_id,
        name: row.try_get("name")?,
        alternate_name: row.try_get("alternate_name")?,
        system,
        parent_id: row
            .try_get::<Option<String>, _>("parent_id")?
            .map(StructureId),
    })
}

fn session_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Session> {
    let state_json: String = row.try_get("viewer_state")?;
    Ok(Session {
        id: SessionId(row.try_get("id")?),
        code: row.try_get("code")?,
        title: row.try_get("title")?,
        owner_id: UserId(row.try_get("owner_id")?),
        is_active: row.try_get("is_active")?,
        viewer_state: serde_json::from_str(&state_json)
            .context("failed to decode persisted viewer state")?,
    })
}

fn generate_session_code() -> String {
    Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(SESSION_CODE_LEN)
        .map(|byte| SESSION_CODE_CHARSET[*byte as usize % SESSION_CODE_CHARSET.len()] as char)
        .collect()
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return Ok(());
    }
    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if path.is_empty() {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create parent directory '{}' for database url '{database_url}'",
                parent.display()
            )
        })?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
