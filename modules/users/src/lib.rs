//! User CRUD module: owns the `users` table and contributes the `/api`
//! route group to the gateway.

pub mod handlers;
pub mod model;
pub mod repository;
pub mod service;

use std::sync::Arc;

use axum::Extension;
use wirekit::routing::{GroupContribution, RouteContribution, GROUPS};
use wirekit::{ComposeError, Container, Dep, Hook};
use wirekit_db::DbManager;

use crate::repository::UserRepository;
use crate::service::UserService;

fn api_group(service: Arc<UserService>) -> GroupContribution {
    let users = GroupContribution::builder("/users")
        .route(RouteContribution::get("/", handlers::list_users))
        .route(RouteContribution::post("/", handlers::create_user))
        .route(RouteContribution::get("/{id}", handlers::get_user))
        .route(RouteContribution::put("/{id}", handlers::update_user))
        .route(RouteContribution::delete("/{id}", handlers::delete_user))
        .build();

    GroupContribution::builder("/api")
        .group(users)
        .layer(Extension(service))
        .build()
}

/// Provide [`UserService`] over the shared pool and contribute the `/api`
/// group. The table is created by an `on_start` hook, inside the startup
/// deadline and after the database ping.
pub fn register(container: &mut Container) -> Result<(), ComposeError> {
    container.provide::<UserService, _>(&[Dep::on::<DbManager>()], |cx| {
        let db = cx.get::<DbManager>()?;
        let schema_pool = db.pool().clone();
        cx.append_hook(Hook::new().on_start(move |_| async move {
            UserRepository::new(schema_pool).ensure_schema().await?;
            tracing::info!("users schema ready");
            Ok(())
        }));
        Ok(UserService::new(UserRepository::new(db.pool().clone())))
    })?;

    container.contribute::<GroupContribution, _>(GROUPS, &[Dep::on::<UserService>()], |cx| {
        Ok(api_group(cx.get::<UserService>()?))
    })
}
