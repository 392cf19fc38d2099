use chrono::{DateTime, Utc};

use crate::types::{Observation, Score, Trace, TraceDetail, UsageTotals};

use super::Storage;

#[derive(sqlx::FromRow)]
struct TraceRow {
    id: String,
    project_id: String,
    external_id: Option<String>,
    user_id: Option<String>,
    name: Option<String>,
    timestamp: DateTime<Utc>,
    metadata: Option<String>,
}

impl From<TraceRow> for Trace {
    fn from(row: TraceRow) -> Self {
        // Metadata that isn't JSON is still worth showing.
        let metadata = row.metadata.map(|raw| {
            serde_json::from_str(&raw)
                .unwrap_or(serde_json::Value::String(raw))
        });
        Self {
            id: row.id,
            project_id: row.project_id,
            external_id: row.external_id,
            user_id: row.user_id,
            name: row.name,
            timestamp: row.timestamp,
            metadata,
        }
    }
}

impl Storage {
    pub async fn trace_detail(
        &self,
        project_id: &str,
        trace_id: &str,
    ) -> anyhow::Result<Option<TraceDetail>> {
        let row: Option<TraceRow> = sqlx::query_as(
            "SELECT id, project_id, external_id, user_id, name, timestamp,
                    metadata
                FROM traces
                WHERE id = ? AND project_id = ?",
        )
        .bind(trace_id)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let observations_query = sqlx::query_as::<_, Observation>(
            "SELECT id, trace_id, type, name, start_time, end_time, model,
                    prompt_tokens, completion_tokens, total_tokens
                FROM observations
                WHERE trace_id = ?
                ORDER BY start_time ASC, id ASC",
        )
        .bind(trace_id)
        .fetch_all(&self.pool);
        let scores_query = sqlx::query_as::<_, Score>(
            "SELECT id, timestamp, name, value, comment, trace_id,
                    observation_id
                FROM scores
                WHERE trace_id = ?
                ORDER BY timestamp DESC",
        )
        .bind(trace_id)
        .fetch_all(&self.pool);
        let (observations, scores) =
            tokio::try_join!(observations_query, scores_query)?;
        let usage = UsageTotals::of(&observations);
        Ok(Some(TraceDetail {
            trace: row.into(),
            observations,
            scores,
            usage,
        }))
    }
}
