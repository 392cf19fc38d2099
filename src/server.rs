use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{anyhow, Context};
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{any, delete, get, post},
    Json,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{self, SessionUser},
    blocklist::{self, Blocklist},
    conf::{self, Conf},
    data::Storage,
    docs::ApiDoc,
    rbac::AccessDenied,
};

pub(crate) mod keys;
pub(crate) mod public;
pub(crate) mod scores;
pub(crate) mod traces;


#[derive(Debug)]
pub struct ApiError(StatusCode, Json<ErrorResponse>);

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        ApiError(
            status,
            Json(ErrorResponse {
                error: error.into(),
                details: None,
            }),
        )
    }

    pub fn unauthorized(error: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, error)
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{what} not found"))
    }

    /// Logs the cause; the caller only learns that something broke.
    pub fn internal(error: anyhow::Error) -> Self {
        tracing::error!(?error, "Request failed.");
        StatusCode::INTERNAL_SERVER_ERROR.into()
    }
}

impl From<StatusCode> for ApiError {
    fn from(status: StatusCode) -> Self {
        ApiError::new(
            status,
            status.canonical_reason().unwrap_or("Unknown error"),
        )
    }
}

impl From<AccessDenied> for ApiError {
    fn from(denied: AccessDenied) -> Self {
        ApiError::unauthorized(denied.to_string())
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ApiError(status, body) = self;
        (status, body).into_response()
    }
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    error: String,
    details: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub conf: Arc<Conf>,
}

#[tracing::instrument(name = "server", skip_all)]
pub async fn run() -> anyhow::Result<()> {
    let conf = conf::global();
    let dir = env::current_dir()?;
    tracing::info!(?dir, ?conf, "Starting.");
    let addr = SocketAddr::from((conf.addr, conf.port));

    let busy_timeout = Duration::from_secs_f32(conf.sqlite_busy_timeout);
    let storage = Storage::connect(&conf.db_file, busy_timeout).await?;
    let blocklist = conf
        .ip_blocklist
        .as_ref()
        .map(Blocklist::from_conf)
        .transpose()?;
    if blocklist.is_some() {
        tracing::info!("IP blocklist enabled.");
    }
    let state = AppState {
        storage,
        conf: conf.clone(),
    };
    let service = router(state, blocklist).into_make_service();

    match &conf.tls {
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::warn!(?addr, "Listening unencrypted.");
            axum::serve(listener, service).await?;
        }
        Some(conf::Tls {
            cert_file,
            key_file,
        }) => {
            // XXX One MUST do this manual init of rustls provider when using
            //     more than a single dep which itself depends on rustls.
            //     Here we using 2:
            //     - axum_server
            //     - reqwest
            rustls::crypto::aws_lc_rs::default_provider()
                .install_default()
                .map_err(|crypto_provider| {
                    anyhow!(
                        "Failed to install default crypto provider: \
                        {crypto_provider:?}"
                    )
                })?;

            let config =
                axum_server::tls_rustls::RustlsConfig::from_pem_file(
                    cert_file, key_file,
                )
                .await
                .context(format!(
                    "Failed to construct RustlsConfig. \
                    cert_file={cert_file:?}, key_file={key_file:?}"
                ))?;

            tracing::info!(
                ?addr,
                ?cert_file,
                ?key_file,
                "Listening with TLS."
            );
            axum_server::bind_rustls(addr, config)
                .serve(service)
                .await?;
        }
    }

    Ok(())
}

pub fn router(state: AppState, blocklist: Option<Blocklist>) -> axum::Router {
    let management = axum::Router::new()
        .route(
            "/api/projects/:project_id/api-keys",
            get(keys::list).post(keys::create),
        )
        .route(
            "/api/projects/:project_id/api-keys/:id",
            delete(keys::delete),
        )
        .route("/api/projects/:project_id/scores", get(scores::all))
        .route(
            "/api/projects/:project_id/scores/filter-options",
            get(scores::filter_options),
        )
        .route(
            "/api/projects/:project_id/traces/:trace_id",
            get(traces::by_id),
        )
        .route("/api/scores", post(scores::create))
        .route(
            "/api/scores/:id",
            get(scores::by_id)
                .patch(scores::update)
                .delete(scores::delete),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            session_layer,
        ));
    let routes = axum::Router::new()
        .route("/health", get(health_check))
        .route("/api/public/users", any(public::users))
        .merge(management)
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
        .layer(cors(&state.conf))
        .layer(middleware::from_fn(request_id_layer));
    let routes = match blocklist {
        None => routes,
        Some(blocklist) => routes.layer(middleware::from_fn_with_state(
            blocklist,
            blocklist::layer,
        )),
    };
    routes.with_state(state)
}

/// Empty `cors_origins` means any origin, without credentials.
fn cors(conf: &Conf) -> CorsLayer {
    let origins: Vec<HeaderValue> = conf
        .cors_origins
        .iter()
        .filter_map(|origin| {
            origin
                .parse()
                .inspect_err(|error| {
                    tracing::warn!(?error, origin, "Ignoring CORS origin.");
                })
                .ok()
        })
        .collect();
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::ORIGIN,
        ])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_LENGTH]);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
    }
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Debug, Clone)]
pub(crate) struct ReqId {
    pub req_id: String,
}

impl ReqId {
    fn new() -> Self {
        let req_id = cuid2::create_id();
        Self { req_id }
    }
}

tokio::task_local! {
    pub(crate) static USER: SessionUser;
    pub(crate) static REQ_ID: ReqId;
}

async fn request_id_layer(req: Request, next: Next) -> Response {
    REQ_ID.scope(ReqId::new(), next.run(req)).await
}

async fn session_layer(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| {
            tracing::warn!("Missing Authorization header");
            ApiError::unauthorized("Missing session token")
        })?
        .to_str()
        .map_err(|e| {
            tracing::warn!(error = ?e, "Invalid Authorization header encoding");
            ApiError::unauthorized("Invalid session token")
        })?
        .strip_prefix("Bearer ")
        .ok_or_else(|| {
            tracing::warn!("Authorization header missing 'Bearer ' prefix");
            ApiError::unauthorized("Invalid session token")
        })?;

    let claims = auth::Claims::from_str(token, &state.conf.jwt).map_err(
        |error| {
            tracing::warn!(
                ?error,
                token_prefix = ?token.get(..10).unwrap_or(""),
                "JWT validation failed"
            );
            ApiError::unauthorized("Invalid session token")
        },
    )?;
    let user = state
        .storage
        .session_user(&claims.sub)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| {
            tracing::warn!(uid = claims.sub, "Session user no longer exists.");
            ApiError::unauthorized("User does not exist")
        })?;
    tracing::debug!(uid = user.id, "Session authenticated.");
    Ok(USER.scope(user, next.run(req)).await)
}

/// Membership check for routes scoped to one project.
pub(crate) fn require_member(
    user: &SessionUser,
    project_id: &str,
) -> Result<(), ApiError> {
    if user.is_member_of(project_id) {
        Ok(())
    } else {
        tracing::warn!(uid = user.id, project_id, "Not a project member.");
        Err(ApiError::unauthorized(
            "User is not a member of this project",
        ))
    }
}
