use chrono::{DateTime, Utc};

use crate::{
    api_key::{self, KeySet},
    types::{ApiKey, CreatedApiKey},
};

use super::Storage;

/// What the public API needs to judge a presented key.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredKey {
    pub id: String,
    pub project_id: String,
    pub hashed_secret_key: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Storage {
    pub async fn list_api_keys(
        &self,
        project_id: &str,
    ) -> anyhow::Result<Vec<ApiKey>> {
        let keys = sqlx::query_as(
            "SELECT id, created_at, expires_at, last_used_at, note,
                    publishable_key, display_secret_key
                FROM api_keys
                WHERE project_id = ?
                ORDER BY created_at ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    pub async fn create_api_key(
        &self,
        project_id: &str,
        note: Option<&str>,
    ) -> anyhow::Result<CreatedApiKey> {
        let KeySet {
            publishable_key,
            secret_key,
            hashed_secret_key,
            display_secret_key,
        } = api_key::generate_key_set();
        let id = cuid2::create_id();
        let created_at = Utc::now();
        sqlx::query(
            "INSERT INTO api_keys
                (id, project_id, created_at, note, publishable_key,
                 hashed_secret_key, display_secret_key)
                VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(project_id)
        .bind(created_at)
        .bind(note)
        .bind(&publishable_key)
        .bind(&hashed_secret_key)
        .bind(&display_secret_key)
        .execute(&self.pool)
        .await?;
        Ok(CreatedApiKey {
            id,
            created_at,
            note: note.map(str::to_string),
            publishable_key,
            secret_key,
            display_secret_key,
        })
    }

    /// Returns `false` when no such key exists in the project.
    pub async fn delete_api_key(
        &self,
        project_id: &str,
        id: &str,
    ) -> anyhow::Result<bool> {
        let result =
            sqlx::query("DELETE FROM api_keys WHERE id = ? AND project_id = ?")
                .bind(id)
                .bind(project_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn api_key_by_publishable(
        &self,
        publishable_key: &str,
    ) -> anyhow::Result<Option<StoredKey>> {
        let key = sqlx::query_as(
            "SELECT id, project_id, hashed_secret_key, expires_at
                FROM api_keys
                WHERE publishable_key = ?",
        )
        .bind(publishable_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(key)
    }

    pub async fn touch_api_key(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn expire_api_key(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE api_keys SET expires_at = ? WHERE id = ?")
            .bind(expires_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{api_key, data::tests::storage};

    #[tokio::test]
    async fn created_key_is_listed_without_secret() {
        let (_dir, storage) = storage().await;
        storage.insert_project("p1", "P").await.unwrap();
        let created =
            storage.create_api_key("p1", Some("ci")).await.unwrap();

        let keys = storage.list_api_keys("p1").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].id, created.id);
        assert_eq!(keys[0].note.as_deref(), Some("ci"));
        assert_eq!(keys[0].display_secret_key, created.display_secret_key);

        let listed = serde_json::to_string(&keys).unwrap();
        assert!(!listed.contains(&created.secret_key));

        let stored = storage
            .api_key_by_publishable(&created.publishable_key)
            .await
            .unwrap()
            .unwrap();
        assert!(api_key::verify_secret_key(
            &created.secret_key,
            &stored.hashed_secret_key
        ));
    }

    #[tokio::test]
    async fn delete_is_scoped_to_project() {
        let (_dir, storage) = storage().await;
        storage.insert_project("p1", "P1").await.unwrap();
        storage.insert_project("p2", "P2").await.unwrap();
        let created = storage.create_api_key("p1", None).await.unwrap();

        assert!(!storage.delete_api_key("p2", &created.id).await.unwrap());
        assert!(storage.delete_api_key("p1", &created.id).await.unwrap());
        assert!(storage.list_api_keys("p1").await.unwrap().is_empty());
    }
}
