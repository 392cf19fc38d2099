//! The public, API-key authenticated surface.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::{
    scope::{self, AccessLevel, CredentialError},
    usage::{self, Page, PageParams},
};

use super::{AppState, REQ_ID};

#[derive(Debug, thiserror::Error)]
pub enum PublicApiError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("{0}")]
    AccessDenied(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("Method not allowed")]
    MethodNotAllowed,
}

impl From<usage::InvalidParam> for PublicApiError {
    fn from(error: usage::InvalidParam) -> Self {
        Self::Validation(error.to_string())
    }
}

/// Anything unexpected still reaches the caller as a bad request.
impl From<anyhow::Error> for PublicApiError {
    fn from(error: anyhow::Error) -> Self {
        Self::Validation(format!("{error:#}"))
    }
}

impl IntoResponse for PublicApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Credential(_) | Self::AccessDenied(_) => (
                StatusCode::UNAUTHORIZED,
                json!({"success": false, "message": self.to_string()}),
            ),
            Self::Validation(error) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "success": false,
                    "message": "Invalid request data",
                    "error": error,
                }),
            ),
            Self::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                json!({"message": self.to_string()}),
            ),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, serde::Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UsersQuery {
    /// Page number, from 1. Defaults to 1.
    #[param(value_type = Option<u32>)]
    page: Option<String>,
    /// Users per page, 1 to 100. Defaults to 50.
    #[param(value_type = Option<u32>)]
    limit: Option<String>,
}

#[tracing::instrument(
    skip_all,
    fields(req_id = REQ_ID.get().req_id, %method)
)]
#[utoipa::path(
    get,
    path = "/api/public/users",
    params(UsersQuery),
    responses(
        (status = 200, description = "Token usage per user, by day and model", body = crate::usage::UsersPage),
        (status = 400, description = "Invalid request data"),
        (status = 401, description = "Missing, invalid or publishable-only credentials"),
        (status = 405, description = "Method not allowed"),
    ),
    security(
        ("basic" = [])
    )
)]
pub async fn users(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    query: Result<Query<UsersQuery>, QueryRejection>,
) -> Result<Json<Page<usage::UserUsage>>, PublicApiError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .map(|value| value.to_str().map_err(|_| CredentialError::Malformed))
        .transpose()?;
    let scope = scope::resolve(&state.storage, authorization)
        .await
        .inspect_err(|error| {
            tracing::warn!(%error, "Rejected credentials.");
        })?;

    if method != Method::GET {
        tracing::warn!("Method not allowed.");
        return Err(PublicApiError::MethodNotAllowed);
    }
    if scope.access_level != AccessLevel::All {
        return Err(PublicApiError::AccessDenied(
            "Access denied - need to use basic auth with secret key to GET users",
        ));
    }

    let Query(UsersQuery { page, limit }) =
        query.map_err(|rejection| {
            PublicApiError::Validation(rejection.body_text())
        })?;
    let params = PageParams::parse(page.as_deref(), limit.as_deref())?;

    let (users, total_items) =
        usage::compute(&state.storage, &scope.project_id, params).await?;
    tracing::info!(
        project_id = scope.project_id,
        page = params.page,
        limit = params.limit,
        total_items,
        "Served user usage."
    );
    Ok(Json(Page::new(users, params, total_items)))
}
