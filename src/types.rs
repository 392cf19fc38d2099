use chrono::{DateTime, Utc};
use utoipa::ToSchema;

/// An API key as listed to project admins. Carries neither the secret nor
/// its hash.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
    pub publishable_key: String,
    pub display_secret_key: String,
}

/// Returned once, on creation. The only time the secret leaves the server.
#[derive(Debug, Clone, serde::Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatedApiKey {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub note: Option<String>,
    pub publishable_key: String,
    pub secret_key: String,
    pub display_secret_key: String,
}

#[derive(Debug, Clone, serde::Deserialize, ToSchema)]
pub struct CreateApiKey {
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub value: f64,
    pub comment: Option<String>,
    pub trace_id: String,
    pub observation_id: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateScore {
    pub trace_id: String,
    pub value: f64,
    pub name: String,
    pub comment: Option<String>,
    pub observation_id: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize, ToSchema)]
pub struct UpdateScore {
    pub value: f64,
    pub comment: Option<String>,
}

/// Score listing filters. Absent means "don't filter on this".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreFilter {
    pub trace_ids: Option<Vec<String>>,
    pub ids: Option<Vec<String>>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, ToSchema)]
pub struct FilterOption {
    pub key: String,
    pub occurrences: Vec<Occurrence>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, sqlx::FromRow, ToSchema)]
pub struct Occurrence {
    pub key: String,
    pub count: i64,
}

#[derive(Debug, Clone, serde::Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub id: String,
    pub project_id: String,
    pub external_id: Option<String>,
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub id: String,
    pub trace_id: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: String,
    pub name: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub model: Option<String>,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

impl UsageTotals {
    pub fn of(observations: &[Observation]) -> Self {
        observations.iter().fold(Self::default(), |acc, o| Self {
            prompt_tokens: acc.prompt_tokens.saturating_add(o.prompt_tokens),
            completion_tokens: acc
                .completion_tokens
                .saturating_add(o.completion_tokens),
            total_tokens: acc.total_tokens.saturating_add(o.total_tokens),
        })
    }
}

#[derive(Debug, Clone, serde::Serialize, ToSchema)]
pub struct TraceDetail {
    #[serde(flatten)]
    pub trace: Trace,
    pub observations: Vec<Observation>,
    pub scores: Vec<Score>,
    pub usage: UsageTotals,
}
