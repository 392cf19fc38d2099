use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::OpenApi;

use crate::server::ErrorResponse;
use crate::types::{
    ApiKey, CreateApiKey, CreateScore, CreatedApiKey, FilterOption,
    Observation, Occurrence, Score, Trace, TraceDetail, UpdateScore,
    UsageTotals,
};
use crate::usage::{DailyUsage, ModelUsage, PageMeta, UserUsage, UsersPage};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::server::public::users,
        crate::server::keys::list,
        crate::server::keys::create,
        crate::server::keys::delete,
        crate::server::scores::all,
        crate::server::scores::filter_options,
        crate::server::scores::by_id,
        crate::server::scores::create,
        crate::server::scores::update,
        crate::server::scores::delete,
        crate::server::traces::by_id,
    ),
    components(
        schemas(
            UsersPage,
            UserUsage,
            DailyUsage,
            ModelUsage,
            PageMeta,
            ApiKey,
            CreatedApiKey,
            CreateApiKey,
            Score,
            CreateScore,
            UpdateScore,
            FilterOption,
            Occurrence,
            Trace,
            Observation,
            UsageTotals,
            TraceDetail,
            ErrorResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "tracelens", description = "LLM trace analytics endpoints")
    ),
    info(
        title = "Tracelens API",
        version = "1.0",
        description = "Per-user token usage, API keys, scores and traces",
        license(
            name = "BSD-3-Clause"
        )
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "jwt",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
            components.add_security_scheme(
                "basic",
                SecurityScheme::Http(
                    HttpBuilder::new().scheme(HttpAuthScheme::Basic).build(),
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_is_documented() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> =
            doc.paths.paths.keys().map(String::as_str).collect();
        assert_eq!(
            paths,
            [
                "/api/projects/{project_id}/api-keys",
                "/api/projects/{project_id}/api-keys/{id}",
                "/api/projects/{project_id}/scores",
                "/api/projects/{project_id}/scores/filter-options",
                "/api/projects/{project_id}/traces/{trace_id}",
                "/api/public/users",
                "/api/scores",
                "/api/scores/{id}",
            ]
        );
        let schemes = doc.components.unwrap().security_schemes;
        assert!(schemes.contains_key("jwt"));
        assert!(schemes.contains_key("basic"));
    }
}
