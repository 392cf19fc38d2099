use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};

use crate::types::{
    CreateScore, FilterOption, Occurrence, Score, ScoreFilter, UpdateScore,
};

use super::Storage;

const SCORES_PAGE_CAP: i64 = 100;

const SCORE_COLUMNS: &str = "s.id, s.timestamp, s.name, s.value, s.comment, \
                             s.trace_id, s.observation_id";

/// A score together with the project its trace belongs to.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScoreInProject {
    #[sqlx(flatten)]
    pub score: Score,
    pub project_id: String,
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ScoreFilter) {
    if let Some(user_id) = &filter.user_id {
        qb.push(" AND t.user_id = ").push_bind(user_id.clone());
    }
    for (column, values) in [
        ("s.trace_id", &filter.trace_ids),
        ("s.id", &filter.ids),
    ] {
        if let Some(values) = values {
            qb.push(format!(" AND {column} IN ("));
            let mut separated = qb.separated(", ");
            for value in values {
                separated.push_bind(value.clone());
            }
            separated.push_unseparated(")");
        }
    }
}

impl Storage {
    /// Newest first, at most 100.
    pub async fn list_scores(
        &self,
        project_id: &str,
        filter: &ScoreFilter,
    ) -> anyhow::Result<Vec<Score>> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT {SCORE_COLUMNS}
                FROM scores s
                JOIN traces t ON t.id = s.trace_id
                WHERE t.project_id = "
        ));
        qb.push_bind(project_id.to_string());
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY s.timestamp DESC LIMIT ")
            .push_bind(SCORES_PAGE_CAP);
        let scores = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(scores)
    }

    pub async fn score_filter_options(
        &self,
        project_id: &str,
        filter: &ScoreFilter,
    ) -> anyhow::Result<Vec<FilterOption>> {
        let (ids, trace_ids) = tokio::try_join!(
            self.score_occurrences("s.id", project_id, filter),
            self.score_occurrences("s.trace_id", project_id, filter),
        )?;
        Ok(vec![
            FilterOption {
                key: "id".to_string(),
                occurrences: ids,
            },
            FilterOption {
                key: "traceId".to_string(),
                occurrences: trace_ids,
            },
        ])
    }

    async fn score_occurrences(
        &self,
        column: &str,
        project_id: &str,
        filter: &ScoreFilter,
    ) -> anyhow::Result<Vec<Occurrence>> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT {column} AS \"key\", COUNT(*) AS \"count\"
                FROM scores s
                JOIN traces t ON t.id = s.trace_id
                WHERE t.project_id = "
        ));
        qb.push_bind(project_id.to_string());
        push_filter(&mut qb, filter);
        qb.push(format!(" GROUP BY {column} ORDER BY {column}"));
        let occurrences = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(occurrences)
    }

    /// Looks the score up among the projects `uid` is a member of.
    pub async fn score_for_member(
        &self,
        id: &str,
        uid: &str,
    ) -> anyhow::Result<Option<ScoreInProject>> {
        let score = sqlx::query_as(&format!(
            "SELECT {SCORE_COLUMNS}, t.project_id
                FROM scores s
                JOIN traces t ON t.id = s.trace_id
                JOIN memberships m ON m.project_id = t.project_id
                WHERE s.id = ? AND m.user_id = ?"
        ))
        .bind(id)
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(score)
    }

    /// Project of the trace, if `uid` is a member of it.
    pub async fn trace_project_for_member(
        &self,
        trace_id: &str,
        uid: &str,
    ) -> anyhow::Result<Option<String>> {
        let project_id = sqlx::query_scalar(
            "SELECT t.project_id
                FROM traces t
                JOIN memberships m ON m.project_id = t.project_id
                WHERE t.id = ? AND m.user_id = ?",
        )
        .bind(trace_id)
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(project_id)
    }

    pub async fn create_score(&self, new: &CreateScore) -> anyhow::Result<Score> {
        let score = Score {
            id: cuid2::create_id(),
            timestamp: Utc::now(),
            name: new.name.clone(),
            value: new.value,
            comment: new.comment.clone(),
            trace_id: new.trace_id.clone(),
            observation_id: new.observation_id.clone(),
        };
        sqlx::query(
            "INSERT INTO scores
                (id, timestamp, name, value, comment, trace_id, observation_id)
                VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&score.id)
        .bind(score.timestamp)
        .bind(&score.name)
        .bind(score.value)
        .bind(&score.comment)
        .bind(&score.trace_id)
        .bind(&score.observation_id)
        .execute(&self.pool)
        .await?;
        Ok(score)
    }

    /// An absent comment leaves the stored one untouched.
    pub async fn update_score(
        &self,
        id: &str,
        update: &UpdateScore,
    ) -> anyhow::Result<Score> {
        let score = sqlx::query_as(
            "UPDATE scores SET
                value = ?,
                comment = COALESCE(?, comment)
                WHERE id = ?
                RETURNING id, timestamp, name, value, comment,
                          trace_id, observation_id",
        )
        .bind(update.value)
        .bind(&update.comment)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(score)
    }

    pub async fn delete_score(&self, id: &str) -> anyhow::Result<Score> {
        let score = sqlx::query_as(
            "DELETE FROM scores WHERE id = ?
                RETURNING id, timestamp, name, value, comment,
                          trace_id, observation_id",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(score)
    }
}
