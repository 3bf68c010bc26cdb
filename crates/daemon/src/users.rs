//! User accounts

use crate::auth::{hash_password, verify_password, TokenIssuer};
use crate::config::BootstrapAdmin;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use webhost_common::{owner_key_from_email, Database, Error, HostingStore, Result, Role, User};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

/// Fields a caller may change. `role` is honoured for admins only.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
}

pub struct UserService {
    db: Arc<Database>,
    tokens: TokenIssuer,
}

impl UserService {
    pub fn new(db: Arc<Database>, tokens: TokenIssuer) -> Self {
        Self { db, tokens }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn register(&self, req: RegisterRequest) -> Result<User> {
        let email = normalize_email(&req.email)?;
        validate_password(&req.password)?;
        let name = req.name.trim();
        if name.is_empty() {
            return Err(Error::Validation("name is required".to_string()));
        }

        let hash = hash_password(&req.password)?;
        let user = self.db.create_user(&email, &hash, name, Role::User)?;
        info!("Registered user {}", email);
        Ok(user)
    }

    pub fn login(&self, req: LoginRequest) -> Result<LoginResponse> {
        let email = req.email.trim().to_ascii_lowercase();
        let invalid = || Error::Unauthorized("invalid email or password".to_string());

        let user = self.db.get_user_by_email(&email)?.ok_or_else(invalid)?;
        if !verify_password(&req.password, &user.password_hash)? {
            return Err(invalid());
        }

        let token = self.tokens.issue(&user)?;
        info!("User {} logged in", user.email);
        Ok(LoginResponse { token, user })
    }

    /// Resolve a bearer token to the account it was issued for, as stored now.
    pub fn authenticate(&self, token: &str) -> Result<User> {
        let claims = self.tokens.validate(token)?;
        match self.db.get_user_by_email(&claims.sub)? {
            Some(user) if user.id == claims.uid => Ok(user),
            _ => Err(Error::Unauthorized(format!(
                "account {} no longer exists",
                claims.sub
            ))),
        }
    }

    pub fn get(&self, email: &str) -> Result<User> {
        self.db
            .get_user_by_email(email)?
            .ok_or_else(|| Error::not_found("user", email))
    }

    pub fn list(&self) -> Result<Vec<User>> {
        self.db.list_users()
    }

    pub fn update(&self, email: &str, req: UpdateUserRequest, actor_role: Role) -> Result<User> {
        let mut user = self.get(email)?;

        if let Some(name) = req.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::Validation("name may not be empty".to_string()));
            }
            user.name = name.to_string();
        }
        if let Some(password) = req.password {
            validate_password(&password)?;
            user.password_hash = hash_password(&password)?;
        }
        if let Some(role) = req.role {
            if actor_role != Role::Admin {
                return Err(Error::Forbidden("only admins may change roles".to_string()));
            }
            user.role = role;
        }

        self.db.update_user(&user)?;
        info!("Updated user {}", user.email);
        Ok(user)
    }

    /// Remove an account. Fails while the user still has an active hosting.
    pub fn delete(&self, email: &str) -> Result<()> {
        let user = self.get(email)?;
        if let Some(hosting) = self.db.find_active_by_owner(user.id)? {
            return Err(Error::Conflict(format!(
                "user {} still owns hosting {}",
                email, hosting.vm_name
            )));
        }
        self.db.delete_user(user.id)?;
        info!("Deleted user {}", email);
        Ok(())
    }

    /// Create the configured admin when the database has no users yet.
    pub fn ensure_bootstrap_admin(&self, admin: &BootstrapAdmin) -> Result<()> {
        if self.db.count_users()? > 0 {
            return Ok(());
        }
        let email = normalize_email(&admin.email)?;
        validate_password(&admin.password)?;
        let hash = hash_password(&admin.password)?;
        self.db.create_user(&email, &hash, &admin.name, Role::Admin)?;
        info!("Created bootstrap admin {}", email);
        Ok(())
    }
}

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_ascii_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
        _ => return Err(Error::Validation(format!("invalid email: {:?}", email))),
    }
    owner_key_from_email(&email)?;
    Ok(email)
}

fn validate_password(password: &str) -> Result<()> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(Error::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}
