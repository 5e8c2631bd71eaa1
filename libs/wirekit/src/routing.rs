//! Route, group and middleware contributions: the values modules place in
//! the well-known collections consumed by the HTTP gateway.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::Request;
use axum::handler::Handler;
use axum::response::IntoResponse;
use axum::routing::{self, MethodRouter, Route as RouteService};
use axum::Router;
use tower::{Layer, Service};

/// Collection of top-level [`RouteContribution`] values.
pub const ROUTES: &str = "routes";
/// Collection of [`GroupContribution`] values.
pub const GROUPS: &str = "groups";
/// Collection of [`MiddlewareContribution`] values.
pub const MIDDLEWARES: &str = "middlewares";

type ApplyFn = Box<dyn Fn(Router) -> Router + Send + Sync>;

fn boxed_layer<L>(layer: L) -> ApplyFn
where
    L: Layer<RouteService> + Clone + Send + Sync + 'static,
    L::Service: Service<Request> + Clone + Send + Sync + 'static,
    <L::Service as Service<Request>>::Response: IntoResponse + 'static,
    <L::Service as Service<Request>>::Error: Into<Infallible> + 'static,
    <L::Service as Service<Request>>::Future: Send + 'static,
{
    Box::new(move |router| router.layer(layer.clone()))
}

/// One HTTP endpoint: a path and the method router handling it.
pub struct RouteContribution {
    path: String,
    handler: MethodRouter,
}

impl RouteContribution {
    pub fn new(path: impl Into<String>, handler: MethodRouter) -> Self {
        Self {
            path: path.into(),
            handler,
        }
    }

    pub fn get<H, T>(path: impl Into<String>, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        Self::new(path, routing::get(handler))
    }

    pub fn post<H, T>(path: impl Into<String>, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        Self::new(path, routing::post(handler))
    }

    pub fn put<H, T>(path: impl Into<String>, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        Self::new(path, routing::put(handler))
    }

    pub fn delete<H, T>(path: impl Into<String>, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        Self::new(path, routing::delete(handler))
    }

    pub fn patch<H, T>(path: impl Into<String>, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        Self::new(path, routing::patch(handler))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Mount this route on `router`.
    pub fn apply(&self, router: Router) -> Router {
        router.route(&self.path, self.handler.clone())
    }
}

/// A routing scope: a path prefix with its own routes, scoped middlewares
/// and nested child groups. Groups form a tree by construction, so no
/// cycle handling is needed.
pub struct GroupContribution {
    prefix: String,
    routes: Vec<RouteContribution>,
    middlewares: Vec<ApplyFn>,
    children: Vec<GroupContribution>,
}

impl GroupContribution {
    pub fn builder(prefix: impl Into<String>) -> GroupBuilder {
        GroupBuilder {
            inner: GroupContribution {
                prefix: prefix.into(),
                routes: Vec::new(),
                middlewares: Vec::new(),
                children: Vec::new(),
            },
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the router for this group's own scope (not including the
    /// prefix itself, which the parent nests under).
    fn scope_router(&self) -> Router {
        let mut router = Router::new();
        for route in &self.routes {
            router = route.apply(router);
        }
        for child in &self.children {
            router = router.nest(&child.prefix, child.scope_router());
        }
        // Reversed so the first declared middleware is the outermost layer
        // and runs first.
        for layer in self.middlewares.iter().rev() {
            router = layer(router);
        }
        router
    }

    /// Nest this group (and recursively its children) under `router`.
    pub fn apply(&self, router: Router) -> Router {
        tracing::debug!(prefix = %self.prefix, routes = self.routes.len(), "mounting route group");
        router.nest(&self.prefix, self.scope_router())
    }
}

/// Fluent builder for [`GroupContribution`].
pub struct GroupBuilder {
    inner: GroupContribution,
}

impl GroupBuilder {
    pub fn route(mut self, route: RouteContribution) -> Self {
        self.inner.routes.push(route);
        self
    }

    pub fn group(mut self, child: GroupContribution) -> Self {
        self.inner.children.push(child);
        self
    }

    /// Add a middleware scoped to this group. Declared order is execution
    /// order on the request path.
    pub fn layer<L>(mut self, layer: L) -> Self
    where
        L: Layer<RouteService> + Clone + Send + Sync + 'static,
        L::Service: Service<Request> + Clone + Send + Sync + 'static,
        <L::Service as Service<Request>>::Response: IntoResponse + 'static,
        <L::Service as Service<Request>>::Error: Into<Infallible> + 'static,
        <L::Service as Service<Request>>::Future: Send + 'static,
    {
        self.inner.middlewares.push(boxed_layer(layer));
        self
    }

    pub fn build(self) -> GroupContribution {
        self.inner
    }
}

/// A server-wide middleware with an installation priority. Lower priority
/// runs earlier on the request path; ties keep registration order.
pub struct MiddlewareContribution {
    name: String,
    priority: i32,
    apply: ApplyFn,
}

impl MiddlewareContribution {
    pub fn new<L>(name: impl Into<String>, priority: i32, layer: L) -> Self
    where
        L: Layer<RouteService> + Clone + Send + Sync + 'static,
        L::Service: Service<Request> + Clone + Send + Sync + 'static,
        <L::Service as Service<Request>>::Response: IntoResponse + 'static,
        <L::Service as Service<Request>>::Error: Into<Infallible> + 'static,
        <L::Service as Service<Request>>::Future: Send + 'static,
    {
        Self {
            name: name.into(),
            priority,
            apply: boxed_layer(layer),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }
}

/// Install contributed middlewares on `router` in ascending priority order,
/// keeping registration order on ties. The lowest-priority middleware ends
/// up outermost so it observes the request first.
pub fn install_middlewares(mut router: Router, middlewares: &[Arc<MiddlewareContribution>]) -> Router {
    let mut ordered: Vec<&Arc<MiddlewareContribution>> = middlewares.iter().collect();
    ordered.sort_by_key(|m| m.priority);
    for mw in ordered.iter().rev() {
        tracing::debug!(middleware = %mw.name, priority = mw.priority, "installing middleware");
        router = (mw.apply)(router);
    }
    router
}
