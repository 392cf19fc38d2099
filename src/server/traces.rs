use axum::{
    extract::{Path, State},
    Json,
};

use crate::types::TraceDetail;

use super::{require_member, ApiError, AppState, REQ_ID, USER};

#[tracing::instrument(
    skip_all,
    fields(req_id = REQ_ID.get().req_id, uid = USER.get().id)
)]
#[utoipa::path(
    get,
    path = "/api/projects/{project_id}/traces/{trace_id}",
    params(
        ("project_id" = String, Path, description = "Project id"),
        ("trace_id" = String, Path, description = "Trace id"),
    ),
    responses(
        (status = 200, description = "Trace with observations, scores and summed usage", body = TraceDetail),
        (status = 401, description = "No session, or not a project member"),
        (status = 404, description = "No such trace in this project"),
    ),
    security(("jwt" = []))
)]
pub async fn by_id(
    State(state): State<AppState>,
    Path((project_id, trace_id)): Path<(String, String)>,
) -> Result<Json<TraceDetail>, ApiError> {
    require_member(&USER.get(), &project_id)?;
    state
        .storage
        .trace_detail(&project_id, &trace_id)
        .await
        .map_err(ApiError::internal)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Trace"))
}
