use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use chrono::Utc;
use sqlx::Executor;

use crate::{
    auth::{ProjectMembership, SessionUser},
    rbac::Role,
};

mod keys;
mod scores;
mod traces;
mod usage;

pub use keys::StoredKey;
pub use scores::ScoreInProject;
pub use usage::UsageRow;

const MIGRATIONS: [&str; 1] = [include_str!("../migrations/0_data.sql")];

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    name: Option<String>,
    email: Option<String>,
}

#[derive(sqlx::FromRow)]
struct MembershipRow {
    id: String,
    name: String,
    role: String,
}

#[derive(Clone)]
pub struct Storage {
    pool: sqlx::Pool<sqlx::Sqlite>,
}

impl Storage {
    pub async fn connect(
        file_path: &Path,
        busy_timeout: Duration,
    ) -> anyhow::Result<Self> {
        if let Some(parent) = file_path.parent() {
            let ctx = format!(
                "Failed to create parent directory \
                for database file: {file_path:?}"
            );
            fs::create_dir_all(parent).context(ctx)?;
        }
        let options = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(file_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout);
        let pool = sqlx::SqlitePool::connect_with(options)
            .await
            .context(format!("Failed to open database: {file_path:?}"))?;
        let selph = Self { pool };
        for migration in MIGRATIONS {
            selph.pool.execute(migration).await?;
        }
        Ok(selph)
    }

    /// Loads the user behind a session, with memberships. `None` when the
    /// user has been deleted since the token was issued.
    pub async fn session_user(
        &self,
        uid: &str,
    ) -> anyhow::Result<Option<SessionUser>> {
        let user: Option<UserRow> =
            sqlx::query_as("SELECT id, name, email FROM users WHERE id = ?")
                .bind(uid)
                .fetch_optional(&self.pool)
                .await?;
        let Some(UserRow { id, name, email }) = user else {
            return Ok(None);
        };
        let memberships: Vec<MembershipRow> = sqlx::query_as(
            "SELECT p.id, p.name, m.role
                FROM memberships m
                JOIN projects p ON p.id = m.project_id
                WHERE m.user_id = ?
                ORDER BY p.created_at",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?;
        let projects = memberships
            .into_iter()
            .filter_map(|MembershipRow { id, name, role }| {
                let role = Role::parse(&role).or_else(|| {
                    tracing::warn!(project_id = %id, %role, "Unknown role.");
                    None
                })?;
                Some(ProjectMembership { id, name, role })
            })
            .collect();
        Ok(Some(SessionUser {
            id,
            name,
            email,
            projects,
        }))
    }

    pub async fn insert_user(
        &self,
        id: &str,
        name: Option<&str>,
        email: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO users (id, name, email, created_at)
                VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_project(
        &self,
        id: &str,
        name: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO projects (id, name, created_at) VALUES (?, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_membership(
        &self,
        project_id: &str,
        user_id: &str,
        role: Role,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO memberships (project_id, user_id, role)
                VALUES (?, ?, ?)
                ON CONFLICT(project_id, user_id) DO UPDATE SET
                role = excluded.role",
        )
        .bind(project_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{DateTime, TimeZone};

    use super::*;

    /// A trace as written by the ingestion side.
    #[derive(Debug, Clone)]
    pub(crate) struct NewTrace<'a> {
        pub(crate) id: &'a str,
        pub(crate) project_id: &'a str,
        pub(crate) external_id: Option<&'a str>,
        pub(crate) user_id: Option<&'a str>,
        pub(crate) name: Option<&'a str>,
        pub(crate) timestamp: DateTime<Utc>,
        pub(crate) metadata: Option<&'a serde_json::Value>,
    }

    /// An observation as written by the ingestion side.
    #[derive(Debug, Clone)]
    pub(crate) struct NewObservation<'a> {
        pub(crate) id: &'a str,
        pub(crate) trace_id: &'a str,
        pub(crate) kind: &'a str,
        pub(crate) name: Option<&'a str>,
        pub(crate) start_time: Option<DateTime<Utc>>,
        pub(crate) end_time: Option<DateTime<Utc>>,
        pub(crate) model: Option<&'a str>,
        pub(crate) prompt_tokens: i64,
        pub(crate) completion_tokens: i64,
        pub(crate) total_tokens: i64,
    }

    impl Storage {
        pub(crate) async fn insert_trace(
            &self,
            trace: &NewTrace<'_>,
        ) -> anyhow::Result<()> {
            let metadata = trace.metadata.map(serde_json::Value::to_string);
            sqlx::query(
                "INSERT INTO traces
                    (id, project_id, external_id, user_id, name, timestamp,
                     metadata)
                    VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(trace.id)
            .bind(trace.project_id)
            .bind(trace.external_id)
            .bind(trace.user_id)
            .bind(trace.name)
            .bind(trace.timestamp)
            .bind(metadata)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        pub(crate) async fn insert_observation(
            &self,
            obs: &NewObservation<'_>,
        ) -> anyhow::Result<()> {
            sqlx::query(
                "INSERT INTO observations
                    (id, trace_id, type, name, start_time, end_time, model,
                     prompt_tokens, completion_tokens, total_tokens)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(obs.id)
            .bind(obs.trace_id)
            .bind(obs.kind)
            .bind(obs.name)
            .bind(obs.start_time)
            .bind(obs.end_time)
            .bind(obs.model)
            .bind(obs.prompt_tokens)
            .bind(obs.completion_tokens)
            .bind(obs.total_tokens)
            .execute(&self.pool)
            .await?;
            Ok(())
        }
    }

    /// Keep the tempdir alive for as long as the storage is used.
    pub(crate) async fn storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::connect(
            &dir.path().join("data.db"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        (dir, storage)
    }

    pub(crate) fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    pub(crate) async fn trace(
        storage: &Storage,
        id: &str,
        project_id: &str,
        user_id: Option<&str>,
    ) {
        storage
            .insert_trace(&NewTrace {
                id,
                project_id,
                external_id: None,
                user_id,
                name: Some("chat"),
                timestamp: at(1, 0),
                metadata: None,
            })
            .await
            .unwrap();
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn generation(
        storage: &Storage,
        id: &str,
        trace_id: &str,
        start_time: Option<DateTime<Utc>>,
        model: &str,
        prompt_tokens: i64,
        completion_tokens: i64,
    ) {
        storage
            .insert_observation(&NewObservation {
                id,
                trace_id,
                kind: "GENERATION",
                name: Some("llm-call"),
                start_time,
                end_time: None,
                model: Some(model),
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.db");
        let timeout = Duration::from_secs(5);
        Storage::connect(&path, timeout).await.unwrap();
        Storage::connect(&path, timeout).await.unwrap();
    }

    #[tokio::test]
    async fn session_user_has_memberships() {
        let (_dir, storage) = storage().await;
        storage.insert_user("u1", Some("Ada"), None).await.unwrap();
        storage.insert_project("p1", "First").await.unwrap();
        storage.insert_project("p2", "Second").await.unwrap();
        storage.upsert_membership("p1", "u1", Role::Owner).await.unwrap();
        storage.upsert_membership("p2", "u1", Role::Viewer).await.unwrap();
        storage.upsert_membership("p2", "u1", Role::Member).await.unwrap();

        let user = storage.session_user("u1").await.unwrap().unwrap();
        assert_eq!(user.name.as_deref(), Some("Ada"));
        assert_eq!(user.role_in("p1"), Some(Role::Owner));
        assert_eq!(user.role_in("p2"), Some(Role::Member));
        assert_eq!(user.role_in("p3"), None);
    }

    #[tokio::test]
    async fn negative_token_counts_are_refused() {
        let (_dir, storage) = storage().await;
        storage.insert_project("p1", "First").await.unwrap();
        trace(&storage, "t1", "p1", Some("a")).await;
        let obs = NewObservation {
            id: "o1",
            trace_id: "t1",
            kind: "GENERATION",
            name: None,
            start_time: Some(at(1, 9)),
            end_time: None,
            model: Some("gpt-4"),
            prompt_tokens: -50,
            completion_tokens: 10,
            total_tokens: -40,
        };
        assert!(storage.insert_observation(&obs).await.is_err());
    }

    #[tokio::test]
    async fn missing_session_user_is_none() {
        let (_dir, storage) = storage().await;
        assert!(storage.session_user("ghost").await.unwrap().is_none());
    }
}
