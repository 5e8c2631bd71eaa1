//! HTTP server assembly: consumes the `routes`, `groups` and `middlewares`
//! collections and runs one listener for all of them.
//!
//! With zero contributed middlewares a fixed default stack is installed
//! (access logging, panic recovery, permissive CORS). A single contributed
//! middleware replaces the whole default stack; the two are never combined.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use wirekit::routing::{
    install_middlewares, GroupContribution, MiddlewareContribution, RouteContribution, GROUPS,
    MIDDLEWARES, ROUTES,
};
use wirekit::{BuildCtx, ComposeError, Container, Dep, Hook};
use wirekit_bootstrap::{ServerConfig, Settings};

/// The assembled server. The serve loop runs on a spawned task owned by
/// the lifecycle hooks; this handle exposes the router and bind outcome.
pub struct HttpGateway {
    config: ServerConfig,
    router: Router,
    local_addr: Arc<OnceLock<SocketAddr>>,
    bind_error: Arc<OnceLock<String>>,
}

impl HttpGateway {
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// The bound address, once the listener is up.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// The bind failure, when `fail_on_bind_error` is off and binding lost.
    pub fn bind_error(&self) -> Option<&str> {
        self.bind_error.get().map(String::as_str)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Mount groups, then top-level routes, then the middleware stack.
fn assemble(
    config: &ServerConfig,
    routes: &[Arc<RouteContribution>],
    groups: &[Arc<GroupContribution>],
    middlewares: &[Arc<MiddlewareContribution>],
) -> Router {
    let mut router = Router::new().route("/health", get(health));
    for group in groups {
        router = group.apply(router);
    }
    for route in routes {
        tracing::debug!(path = route.path(), "mounting route");
        router = route.apply(router);
    }

    router = if middlewares.is_empty() {
        tracing::info!("no contributed middlewares, using the default stack");
        router
            .layer(CorsLayer::permissive())
            .layer(CatchPanicLayer::new())
            .layer(TraceLayer::new_for_http())
    } else {
        install_middlewares(router, middlewares)
    };

    // `new` is deprecated in tower-http 0.6, but its 408 response is the
    // behavior we want.
    #[allow(deprecated)]
    let timeout = TimeoutLayer::new(config.read_timeout);
    router.layer(timeout)
}

fn build_gateway(cx: &mut BuildCtx<'_>, config: ServerConfig) -> anyhow::Result<HttpGateway> {
    let routes = cx.collect::<RouteContribution>(ROUTES)?;
    let groups = cx.collect::<GroupContribution>(GROUPS)?;
    let middlewares = cx.collect::<MiddlewareContribution>(MIDDLEWARES)?;

    let router = assemble(&config, &routes, &groups, &middlewares);
    let gateway = HttpGateway {
        config: config.clone(),
        router: router.clone(),
        local_addr: Arc::new(OnceLock::new()),
        bind_error: Arc::new(OnceLock::new()),
    };

    let serve_task: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::new(Mutex::new(None));
    let local_addr = gateway.local_addr.clone();
    let bind_error = gateway.bind_error.clone();
    let task_slot = serve_task.clone();

    cx.append_hook(
        Hook::new()
            .on_start(move |cancel| async move {
                let bind_to = format!("{}:{}", config.host, config.port);
                let listener = match tokio::net::TcpListener::bind(&bind_to).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        if config.fail_on_bind_error {
                            return Err(anyhow::anyhow!(e)
                                .context(format!("failed to bind {bind_to}")));
                        }
                        tracing::error!(addr = %bind_to, error = %e, "bind failed, server not listening");
                        let _ = bind_error.set(e.to_string());
                        return Ok(());
                    }
                };
                let addr = listener.local_addr()?;
                let _ = local_addr.set(addr);
                tracing::info!(%addr, "http server listening");

                let server = axum::serve(listener, router.into_make_service())
                    .with_graceful_shutdown(cancel.cancelled_owned());
                let handle = tokio::spawn(async move {
                    if let Err(e) = server.await {
                        tracing::error!(error = %e, "http server terminated with error");
                    }
                });
                *task_slot.lock() = Some(handle);
                Ok(())
            })
            .on_stop(move |_| async move {
                // The shutdown token is already cancelled; wait for the
                // graceful drain to finish.
                let handle = serve_task.lock().take();
                if let Some(handle) = handle {
                    handle.await?;
                    tracing::info!("http server drained");
                }
                Ok(())
            }),
    );

    Ok(gateway)
}

fn register_inner(
    container: &mut Container,
    fixed: Option<ServerConfig>,
) -> Result<(), ComposeError> {
    container.declare_collection::<RouteContribution>(ROUTES)?;
    container.declare_collection::<GroupContribution>(GROUPS)?;
    container.declare_collection::<MiddlewareContribution>(MIDDLEWARES)?;

    let mut deps = vec![Dep::group(ROUTES), Dep::group(GROUPS), Dep::group(MIDDLEWARES)];
    if fixed.is_none() {
        deps.push(Dep::on::<Settings>());
    }
    container.provide::<HttpGateway, _>(&deps, move |cx| {
        let config = match fixed {
            Some(config) => config,
            None => cx.get::<Settings>()?.config().server.clone(),
        };
        build_gateway(cx, config)
    })
}

/// Declare the routing collections and provide the gateway, configured from
/// the `server.*` section of [`Settings`].
pub fn register(container: &mut Container) -> Result<(), ComposeError> {
    register_inner(container, None)
}

/// Like [`register`], but with an explicit config instead of [`Settings`].
pub fn register_with_config(
    container: &mut Container,
    config: ServerConfig,
) -> Result<(), ComposeError> {
    register_inner(container, Some(config))
}
