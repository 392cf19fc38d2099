use super::Storage;

/// One (user, day, model) token sum, or a bare user with every other
/// column NULL when the user has no timed observations.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UsageRow {
    pub user_id: String,
    pub day: Option<String>,
    pub model: Option<String>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
}

impl Storage {
    /// Rows for the `limit` users (by id, ascending) starting at `offset`,
    /// ordered by user, day descending, model. Traces without a user id
    /// are not listed.
    pub async fn usage_rows(
        &self,
        project_id: &str,
        limit: u32,
        offset: u64,
    ) -> anyhow::Result<Vec<UsageRow>> {
        let offset = i64::try_from(offset)?;
        let rows = sqlx::query_as(
            "WITH all_users AS (
                SELECT DISTINCT user_id
                    FROM traces
                    WHERE project_id = ? AND user_id IS NOT NULL
                    ORDER BY user_id ASC
                    LIMIT ? OFFSET ?
            ),
            model_usage AS (
                SELECT t.user_id AS user_id,
                       date(o.start_time) AS day,
                       o.model AS model,
                       SUM(o.prompt_tokens) AS prompt_tokens,
                       SUM(o.completion_tokens) AS completion_tokens,
                       SUM(o.total_tokens) AS total_tokens
                    FROM traces t
                    JOIN observations o ON o.trace_id = t.id
                    WHERE o.start_time IS NOT NULL
                      AND t.project_id = ?
                      AND t.user_id IN (SELECT user_id FROM all_users)
                    GROUP BY 1, 2, 3
            )
            SELECT a.user_id AS user_id,
                   u.day AS day,
                   u.model AS model,
                   u.prompt_tokens AS prompt_tokens,
                   u.completion_tokens AS completion_tokens,
                   u.total_tokens AS total_tokens
                FROM all_users a
                LEFT JOIN model_usage u ON u.user_id = a.user_id
                ORDER BY a.user_id ASC, u.day DESC, u.model ASC",
        )
        .bind(project_id)
        .bind(i64::from(limit))
        .bind(offset)
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Distinct user ids on the project's traces, where all traces without
    /// a user id count as one more user.
    pub async fn count_distinct_users(
        &self,
        project_id: &str,
    ) -> anyhow::Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT
                    CASE WHEN user_id IS NULL THEN 'COUNT_NULL'
                    ELSE user_id END)
                FROM traces
                WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(count)?)
    }
}
