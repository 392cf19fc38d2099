use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    rbac::{throw_if_no_access, Scope},
    types::{ApiKey, CreateApiKey, CreatedApiKey},
};

use super::{ApiError, AppState, REQ_ID, USER};

#[tracing::instrument(
    skip_all,
    fields(req_id = REQ_ID.get().req_id, uid = USER.get().id)
)]
#[utoipa::path(
    get,
    path = "/api/projects/{project_id}/api-keys",
    params(("project_id" = String, Path, description = "Project id")),
    responses(
        (status = 200, description = "API keys of the project, oldest first", body = Vec<ApiKey>),
        (status = 401, description = "No session, or missing apiKeys:read"),
    ),
    security(("jwt" = []))
)]
pub async fn list(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<ApiKey>>, ApiError> {
    throw_if_no_access(&USER.get(), &project_id, Scope::ApiKeysRead)?;
    let keys = state
        .storage
        .list_api_keys(&project_id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(keys))
}

#[tracing::instrument(
    skip_all,
    fields(req_id = REQ_ID.get().req_id, uid = USER.get().id)
)]
#[utoipa::path(
    post,
    path = "/api/projects/{project_id}/api-keys",
    params(("project_id" = String, Path, description = "Project id")),
    request_body = CreateApiKey,
    responses(
        (status = 200, description = "The new key. The secret is never shown again.", body = CreatedApiKey),
        (status = 401, description = "No session, or missing apiKeys:create"),
    ),
    security(("jwt" = []))
)]
pub async fn create(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(CreateApiKey { note }): Json<CreateApiKey>,
) -> Result<Json<CreatedApiKey>, ApiError> {
    throw_if_no_access(&USER.get(), &project_id, Scope::ApiKeysCreate)?;
    let created = state
        .storage
        .create_api_key(&project_id, note.as_deref())
        .await
        .map_err(ApiError::internal)?;
    tracing::info!(project_id, key_id = created.id, "Created API key.");
    Ok(Json(created))
}

#[tracing::instrument(
    skip_all,
    fields(req_id = REQ_ID.get().req_id, uid = USER.get().id)
)]
#[utoipa::path(
    delete,
    path = "/api/projects/{project_id}/api-keys/{id}",
    params(
        ("project_id" = String, Path, description = "Project id"),
        ("id" = String, Path, description = "API key id"),
    ),
    responses(
        (status = 200, description = "Deleted", body = bool),
        (status = 401, description = "No session, or missing apiKeys:delete"),
        (status = 404, description = "No such key in this project"),
    ),
    security(("jwt" = []))
)]
pub async fn delete(
    State(state): State<AppState>,
    Path((project_id, id)): Path<(String, String)>,
) -> Result<Json<bool>, ApiError> {
    throw_if_no_access(&USER.get(), &project_id, Scope::ApiKeysDelete)?;
    let deleted = state
        .storage
        .delete_api_key(&project_id, &id)
        .await
        .map_err(ApiError::internal)?;
    if !deleted {
        return Err(ApiError::not_found("API key"));
    }
    tracing::info!(project_id, key_id = id, "Deleted API key.");
    Ok(Json(true))
}
