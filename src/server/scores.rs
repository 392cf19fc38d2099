use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::{
    data::ScoreInProject,
    rbac::{throw_if_no_access, Scope},
    types::{CreateScore, FilterOption, Score, ScoreFilter, UpdateScore},
};

use super::{require_member, ApiError, AppState, REQ_ID, USER};

/// List filters take comma separated ids: `?traceId=a,b`.
#[derive(Debug, Default, serde::Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ScoresQuery {
    trace_id: Option<String>,
    id: Option<String>,
    user_id: Option<String>,
}

fn split_ids(raw: Option<String>) -> Option<Vec<String>> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    })
}

impl From<ScoresQuery> for ScoreFilter {
    fn from(query: ScoresQuery) -> Self {
        Self {
            trace_ids: split_ids(query.trace_id),
            ids: split_ids(query.id),
            user_id: query.user_id.filter(|uid| !uid.is_empty()),
        }
    }
}

#[tracing::instrument(
    skip_all,
    fields(req_id = REQ_ID.get().req_id, uid = USER.get().id)
)]
#[utoipa::path(
    get,
    path = "/api/projects/{project_id}/scores",
    params(("project_id" = String, Path, description = "Project id"), ScoresQuery),
    responses(
        (status = 200, description = "Up to 100 scores, newest first", body = Vec<Score>),
        (status = 401, description = "No session, or not a project member"),
    ),
    security(("jwt" = []))
)]
pub async fn all(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<ScoresQuery>,
) -> Result<Json<Vec<Score>>, ApiError> {
    require_member(&USER.get(), &project_id)?;
    let scores = state
        .storage
        .list_scores(&project_id, &query.into())
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(scores))
}

#[tracing::instrument(
    skip_all,
    fields(req_id = REQ_ID.get().req_id, uid = USER.get().id)
)]
#[utoipa::path(
    get,
    path = "/api/projects/{project_id}/scores/filter-options",
    params(("project_id" = String, Path, description = "Project id"), ScoresQuery),
    responses(
        (status = 200, description = "Occurrence counts per score id and trace id", body = Vec<FilterOption>),
        (status = 401, description = "No session, or not a project member"),
    ),
    security(("jwt" = []))
)]
pub async fn filter_options(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<ScoresQuery>,
) -> Result<Json<Vec<FilterOption>>, ApiError> {
    require_member(&USER.get(), &project_id)?;
    let options = state
        .storage
        .score_filter_options(&project_id, &query.into())
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(options))
}

async fn member_score(
    state: &AppState,
    id: &str,
) -> Result<ScoreInProject, ApiError> {
    let uid = USER.get().id;
    state
        .storage
        .score_for_member(id, &uid)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("Score"))
}

#[tracing::instrument(
    skip_all,
    fields(req_id = REQ_ID.get().req_id, uid = USER.get().id)
)]
#[utoipa::path(
    get,
    path = "/api/scores/{id}",
    params(("id" = String, Path, description = "Score id")),
    responses(
        (status = 200, description = "The score", body = Score),
        (status = 404, description = "No such score in the user's projects"),
    ),
    security(("jwt" = []))
)]
pub async fn by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Score>, ApiError> {
    let ScoreInProject { score, .. } = member_score(&state, &id).await?;
    Ok(Json(score))
}

#[tracing::instrument(
    skip_all,
    fields(req_id = REQ_ID.get().req_id, uid = USER.get().id)
)]
#[utoipa::path(
    post,
    path = "/api/scores",
    request_body = CreateScore,
    responses(
        (status = 200, description = "The new score", body = Score),
        (status = 401, description = "Missing scores:CUD"),
        (status = 404, description = "No such trace in the user's projects"),
    ),
    security(("jwt" = []))
)]
pub async fn create(
    State(state): State<AppState>,
    Json(new): Json<CreateScore>,
) -> Result<Json<Score>, ApiError> {
    let user = USER.get();
    let project_id = state
        .storage
        .trace_project_for_member(&new.trace_id, &user.id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("Trace"))?;
    throw_if_no_access(&user, &project_id, Scope::ScoresCud)?;
    let score = state
        .storage
        .create_score(&new)
        .await
        .map_err(ApiError::internal)?;
    tracing::info!(project_id, score_id = score.id, "Created score.");
    Ok(Json(score))
}

#[tracing::instrument(
    skip_all,
    fields(req_id = REQ_ID.get().req_id, uid = USER.get().id)
)]
#[utoipa::path(
    patch,
    path = "/api/scores/{id}",
    params(("id" = String, Path, description = "Score id")),
    request_body = UpdateScore,
    responses(
        (status = 200, description = "The updated score", body = Score),
        (status = 401, description = "Missing scores:CUD"),
        (status = 404, description = "No such score in the user's projects"),
    ),
    security(("jwt" = []))
)]
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<UpdateScore>,
) -> Result<Json<Score>, ApiError> {
    let ScoreInProject { score, project_id } =
        member_score(&state, &id).await?;
    throw_if_no_access(&USER.get(), &project_id, Scope::ScoresCud)?;
    let score = state
        .storage
        .update_score(&score.id, &update)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(score))
}

#[tracing::instrument(
    skip_all,
    fields(req_id = REQ_ID.get().req_id, uid = USER.get().id)
)]
#[utoipa::path(
    delete,
    path = "/api/scores/{id}",
    params(("id" = String, Path, description = "Score id")),
    responses(
        (status = 200, description = "The deleted score", body = Score),
        (status = 401, description = "Missing scores:CUD"),
        (status = 404, description = "No such score in the user's projects"),
    ),
    security(("jwt" = []))
)]
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Score>, ApiError> {
    let ScoreInProject { score, project_id } =
        member_score(&state, &id).await?;
    throw_if_no_access(&USER.get(), &project_id, Scope::ScoresCud)?;
    let score = state
        .storage
        .delete_score(&score.id)
        .await
        .map_err(ApiError::internal)?;
    tracing::info!(project_id, score_id = score.id, "Deleted score.");
    Ok(Json(score))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_splits_comma_separated_ids() {
        let filter: ScoreFilter = ScoresQuery {
            trace_id: Some("t1, t2,,".to_string()),
            id: None,
            user_id: Some(String::new()),
        }
        .into();
        assert_eq!(
            filter,
            ScoreFilter {
                trace_ids: Some(vec!["t1".to_string(), "t2".to_string()]),
                ids: None,
                user_id: None,
            }
        );
    }
}
