//! Business rules over the repository: uniqueness, field validation and
//! credential checks.

use thiserror::Error;

use crate::model::{CreateUserRequest, UpdateUserRequest, User};
use crate::repository::UserRepository;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("user not found")]
    NotFound,

    #[error("a user with email '{0}' already exists")]
    DuplicateEmail(String),

    #[error("a user with username '{0}' already exists")]
    DuplicateUsername(String),

    #[error("{0}")]
    Invalid(&'static str),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("database error")]
    Db(#[from] sqlx::Error),
}

pub struct UserService {
    repo: UserRepository,
}

impl UserService {
    pub fn new(repo: UserRepository) -> Self {
        Self { repo }
    }

    fn validate(req: &CreateUserRequest) -> Result<(), UserError> {
        if !req.email.contains('@') {
            return Err(UserError::Invalid("email must contain '@'"));
        }
        if req.username.len() < 3 {
            return Err(UserError::Invalid("username must be at least 3 characters"));
        }
        if req.password.len() < 8 {
            return Err(UserError::Invalid("password must be at least 8 characters"));
        }
        Ok(())
    }

    pub async fn create(&self, req: CreateUserRequest) -> Result<User, UserError> {
        Self::validate(&req)?;

        if self.repo.get_by_email(&req.email).await?.is_some() {
            return Err(UserError::DuplicateEmail(req.email));
        }
        if self.repo.get_by_username(&req.username).await?.is_some() {
            return Err(UserError::DuplicateUsername(req.username));
        }

        let now = chrono::Utc::now().to_rfc3339();
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email: req.email,
            username: req.username,
            password: req.password,
            first_name: req.first_name,
            last_name: req.last_name,
            role: "user".to_string(),
            is_active: true,
            created_at: now.clone(),
            updated_at: now,
        };
        self.repo.insert(&user).await?;
        tracing::info!(id = %user.id, username = %user.username, "user created");
        Ok(user)
    }

    pub async fn get(&self, id: &str) -> Result<User, UserError> {
        self.repo.get_by_id(id).await?.ok_or(UserError::NotFound)
    }

    pub async fn get_by_email(&self, email: &str) -> Result<User, UserError> {
        self.repo
            .get_by_email(email)
            .await?
            .ok_or(UserError::NotFound)
    }

    pub async fn update(&self, id: &str, req: UpdateUserRequest) -> Result<User, UserError> {
        let mut user = self.get(id).await?;
        if let Some(first_name) = req.first_name {
            user.first_name = first_name;
        }
        if let Some(last_name) = req.last_name {
            user.last_name = last_name;
        }
        user.updated_at = chrono::Utc::now().to_rfc3339();
        self.repo.update(&user).await?;
        tracing::info!(id = %user.id, "user updated");
        Ok(user)
    }

    pub async fn delete(&self, id: &str) -> Result<(), UserError> {
        if !self.repo.delete(id).await? {
            return Err(UserError::NotFound);
        }
        tracing::info!(id = %id, "user deleted");
        Ok(())
    }

    pub async fn list(&self, offset: i64, limit: i64) -> Result<Vec<User>, UserError> {
        Ok(self.repo.list(offset.max(0), limit.clamp(1, 100)).await?)
    }

    pub async fn search(
        &self,
        query: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<User>, UserError> {
        Ok(self
            .repo
            .search(query, offset.max(0), limit.clamp(1, 100))
            .await?)
    }

    pub async fn count(&self) -> Result<i64, UserError> {
        Ok(self.repo.count().await?)
    }

    pub async fn validate_credentials(&self, email: &str, password: &str) -> Result<User, UserError> {
        let user = self
            .repo
            .get_by_email(email)
            .await?
            .ok_or(UserError::InvalidCredentials)?;
        if user.password != password || !user.is_active {
            return Err(UserError::InvalidCredentials);
        }
        Ok(user)
    }
}
