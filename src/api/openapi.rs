use super::handlers::{health, login, messages, ErrorBody};
use crate::attempts::{outbox::PendingMessage, resolver::ResolutionFailure};
use utoipa::OpenApi;

/// `OpenAPI` document for every routed endpoint.
///
/// Add new endpoints to `paths(...)` so they show up in `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(health::health, login::login, messages::consume),
    components(schemas(
        health::Health,
        login::UserLogin,
        login::LoginSuccess,
        login::LoginFailure,
        login::ResolutionStatus,
        PendingMessage,
        ResolutionFailure,
        ErrorBody
    )),
    tags(
        (name = "health", description = "Service and database health"),
        (name = "login", description = "Password login with failed attempt tracking"),
        (name = "messages", description = "One-time account warnings")
    )
)]
pub struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_routes() {
        let doc = openapi();
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        for path in ["/health", "/login", "/messages/{recipient_id}"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
