//! Session guard: attaches a session context from bearer/cookie tokens and
//! rejects unauthenticated requests under configured prefixes. Contributes
//! two middlewares (attach at priority 100, verify at priority 200) and the
//! auth status routes.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::middleware::{from_fn, Next};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use wirekit::routing::{GroupContribution, MiddlewareContribution, RouteContribution, GROUPS, MIDDLEWARES};
use wirekit::{ComposeError, Container, Dep};
use wirekit_bootstrap::Settings;

const SESSION_COOKIE: &str = "sAccessToken";

/// `supertokens.*`, read through the dynamic accessor so absent keys fall
/// back to defaults individually.
#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    pub connection_uri: String,
    pub connection_api_key: String,
    pub api_base_path: String,
    pub app_name: String,
    pub api_domain: String,
    pub website_domain: String,
    pub protected_prefixes: Vec<String>,
}

impl GuardConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            connection_uri: settings.str_or("supertokens.connection_uri", "http://localhost:3567"),
            connection_api_key: settings.str_or("supertokens.connection_api_key", ""),
            api_base_path: settings.str_or("supertokens.api_base_path", "/api/auth"),
            app_name: settings.str_or("supertokens.app_name", "wirekit-api"),
            api_domain: settings.str_or("supertokens.api_domain", "http://localhost:8080"),
            website_domain: settings.str_or("supertokens.website_domain", "http://localhost:3000"),
            protected_prefixes: settings
                .section("supertokens.protected_prefixes")
                .unwrap_or_default(),
        }
    }
}

/// Attached as a request extension when a session token is present.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub access_token: String,
}

fn extract_token(req: &Request) -> Option<String> {
    let headers = req.headers();
    if let Some(auth) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    let cookies = headers.get(header::COOKIE).and_then(|v| v.to_str().ok())?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE && !value.is_empty()).then(|| value.to_string())
    })
}

/// Priority-100 middleware: attach the session context when a token is
/// carried; requests without one pass through untouched.
async fn attach_session(mut req: Request, next: Next) -> Response {
    if let Some(token) = extract_token(&req) {
        req.extensions_mut().insert(SessionContext {
            access_token: token,
        });
    }
    next.run(req).await
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "unauthorized" })),
    )
        .into_response()
}

async fn status(session: Option<Extension<SessionContext>>) -> Json<serde_json::Value> {
    Json(json!({ "authenticated": session.is_some() }))
}

async fn verify(session: Option<Extension<SessionContext>>) -> Response {
    match session {
        Some(Extension(ctx)) => Json(json!({
            "valid": true,
            "token_length": ctx.access_token.len(),
        }))
        .into_response(),
        None => unauthorized(),
    }
}

fn attach_middleware() -> MiddlewareContribution {
    MiddlewareContribution::new("session-attach", 100, from_fn(attach_session))
}

fn verify_middleware(protected: Vec<String>) -> MiddlewareContribution {
    let protected = Arc::new(protected);
    let layer = from_fn(move |req: Request, next: Next| {
        let protected = protected.clone();
        async move {
            let path = req.uri().path();
            let guarded = protected.iter().any(|prefix| path.starts_with(prefix));
            if guarded && req.extensions().get::<SessionContext>().is_none() {
                tracing::debug!(path = %path, "rejecting unauthenticated request");
                return unauthorized();
            }
            next.run(req).await
        }
    });
    MiddlewareContribution::new("session-verify", 200, layer)
}

fn auth_group(base_path: &str) -> GroupContribution {
    GroupContribution::builder(base_path)
        .route(RouteContribution::get("/status", status))
        .route(RouteContribution::get("/verify", verify))
        .build()
}

/// Contribute the session middlewares and auth routes, configured from the
/// `supertokens.*` section of [`Settings`].
pub fn register(container: &mut Container) -> Result<(), ComposeError> {
    container.contribute::<MiddlewareContribution, _>(
        MIDDLEWARES,
        &[],
        |_| Ok(attach_middleware()),
    )?;
    container.contribute::<MiddlewareContribution, _>(
        MIDDLEWARES,
        &[Dep::on::<Settings>()],
        |cx| {
            let settings = cx.get::<Settings>()?;
            let config = GuardConfig::from_settings(&settings);
            tracing::debug!(
                prefixes = config.protected_prefixes.len(),
                "session verification active"
            );
            Ok(verify_middleware(config.protected_prefixes))
        },
    )?;
    container.contribute::<GroupContribution, _>(GROUPS, &[Dep::on::<Settings>()], |cx| {
        let settings = cx.get::<Settings>()?;
        let config = GuardConfig::from_settings(&settings);
        Ok(auth_group(&config.api_base_path))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;
    use wirekit::routing::install_middlewares;

    fn guarded_router(protected: Vec<String>) -> Router {
        let router = Router::new()
            .route("/secure/data", get(|| async { "secret" }))
            .route("/open", get(|| async { "open" }));
        let router = auth_group("/api/auth").apply(router);
        install_middlewares(
            router,
            &[
                Arc::new(attach_middleware()),
                Arc::new(verify_middleware(protected)),
            ],
        )
    }

    async fn json_body(res: Response) -> serde_json::Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn register_contributes_middlewares_and_auth_group() {
        let mut c = Container::new();
        c.declare_collection::<GroupContribution>(GROUPS).unwrap();
        c.declare_collection::<MiddlewareContribution>(MIDDLEWARES)
            .unwrap();
        c.supply(Settings::load(None).unwrap()).unwrap();
        register(&mut c).unwrap();

        c.build().unwrap();
        c.start(std::time::Duration::from_secs(5)).await.unwrap();

        let middlewares = c.resolve::<MiddlewareContribution>(MIDDLEWARES).unwrap();
        assert_eq!(
            middlewares.iter().map(|m| m.name()).collect::<Vec<_>>(),
            vec!["session-attach", "session-verify"]
        );
        let groups = c.resolve::<GroupContribution>(GROUPS).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].prefix(), "/api/auth");
    }

    #[tokio::test]
    async fn protected_prefix_rejects_anonymous_requests() {
        let router = guarded_router(vec!["/secure".to_string()]);
        let res = router
            .oneshot(HttpRequest::get("/secure/data").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(res).await["error"], "unauthorized");
    }

    #[tokio::test]
    async fn bearer_token_grants_access() {
        let router = guarded_router(vec!["/secure".to_string()]);
        let res = router
            .oneshot(
                HttpRequest::get("/secure/data")
                    .header(header::AUTHORIZATION, "Bearer tok-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn session_cookie_grants_access() {
        let router = guarded_router(vec!["/secure".to_string()]);
        let res = router
            .oneshot(
                HttpRequest::get("/secure/data")
                    .header(header::COOKIE, "theme=dark; sAccessToken=tok-456")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unprotected_paths_pass_through() {
        let router = guarded_router(vec!["/secure".to_string()]);
        let res = router
            .oneshot(HttpRequest::get("/open").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_reports_session_presence() {
        let router = guarded_router(vec![]);

        let res = router
            .clone()
            .oneshot(
                HttpRequest::get("/api/auth/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(json_body(res).await["authenticated"], false);

        let res = router
            .oneshot(
                HttpRequest::get("/api/auth/status")
                    .header(header::AUTHORIZATION, "Bearer tok")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(json_body(res).await["authenticated"], true);
    }

    #[tokio::test]
    async fn verify_requires_a_session() {
        let router = guarded_router(vec![]);

        let res = router
            .clone()
            .oneshot(
                HttpRequest::get("/api/auth/verify")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = router
            .oneshot(
                HttpRequest::get("/api/auth/verify")
                    .header(header::AUTHORIZATION, "Bearer tok")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["valid"], true);
    }
}
