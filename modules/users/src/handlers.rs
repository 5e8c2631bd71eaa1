//! axum handlers. The service is shared through a request extension, so
//! handlers stay plain functions.

use std::sync::Arc;

use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::json;

use crate::model::{CreateUserRequest, ListParams, UpdateUserRequest, User};
use crate::service::{UserError, UserService};

impl IntoResponse for UserError {
    fn into_response(self) -> Response {
        let status = match &self {
            UserError::NotFound => StatusCode::NOT_FOUND,
            UserError::DuplicateEmail(_) | UserError::DuplicateUsername(_) => StatusCode::CONFLICT,
            UserError::Invalid(_) => StatusCode::BAD_REQUEST,
            UserError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            UserError::Db(e) => {
                tracing::error!(error = %e, "user store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = match &self {
            UserError::Db(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub async fn create_user(
    Extension(service): Extension<Arc<UserService>>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), UserError> {
    let user = service.create(req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_user(
    Extension(service): Extension<Arc<UserService>>,
    Path(id): Path<String>,
) -> Result<Json<User>, UserError> {
    Ok(Json(service.get(&id).await?))
}

pub async fn update_user(
    Extension(service): Extension<Arc<UserService>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<User>, UserError> {
    Ok(Json(service.update(&id, req).await?))
}

pub async fn delete_user(
    Extension(service): Extension<Arc<UserService>>,
    Path(id): Path<String>,
) -> Result<StatusCode, UserError> {
    service.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_users(
    Extension(service): Extension<Arc<UserService>>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, UserError> {
    let limit = params.limit.unwrap_or(20);
    let users = match params.q.as_deref() {
        Some(q) if !q.is_empty() => service.search(q, params.offset, limit).await?,
        _ => service.list(params.offset, limit).await?,
    };
    let total = service.count().await?;
    Ok(Json(json!({ "users": users, "total": total })))
}
