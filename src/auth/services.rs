use tracing::{info, warn};

use super::{
    jwt::JwtKeys,
    password::{burn_verification, hash_password, verify_password},
};
use crate::{
    error::AppError,
    users::{Role, UserStore},
};

pub const MIN_USERNAME_LEN: usize = 3;
pub const MIN_PASSWORD_LEN: usize = 6;

pub(crate) fn validate_username(username: &str) -> Result<(), AppError> {
    if username.chars().count() < MIN_USERNAME_LEN {
        return Err(AppError::InvalidInput(format!(
            "Username must be at least {MIN_USERNAME_LEN} characters long"
        )));
    }
    Ok(())
}

pub(crate) fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::InvalidInput(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters long"
        )));
    }
    Ok(())
}

fn require_credentials(username: &str, password: &str) -> Result<(), AppError> {
    if username.is_empty() || password.is_empty() {
        return Err(AppError::InvalidInput(
            "Username and password are required".into(),
        ));
    }
    Ok(())
}

/// Validates, hashes and stores a new account with the given role.
pub async fn create_account(
    store: &UserStore,
    username: &str,
    password: &str,
    role: Role,
) -> Result<i64, AppError> {
    require_credentials(username, password)?;
    validate_username(username)?;
    validate_password(password)?;

    let hash = hash_password(password)?;
    store.create(username, &hash, role).await
}

/// Self-service sign-up. Always creates a `user`.
pub async fn register(store: &UserStore, username: &str, password: &str) -> Result<i64, AppError> {
    let id = create_account(store, username, password, Role::User).await?;
    info!(user_id = id, %username, "user registered");
    Ok(id)
}

#[derive(Debug)]
pub struct LoginOutcome {
    pub token: String,
    pub role: Role,
}

/// Unknown usernames and wrong passwords both end in `AppError::Unauthorized`.
pub async fn login(
    store: &UserStore,
    keys: &JwtKeys,
    username: &str,
    password: &str,
) -> Result<LoginOutcome, AppError> {
    require_credentials(username, password)?;

    let user = match store.find_by_username(username).await {
        Ok(u) => u,
        Err(AppError::NotFound(_)) => {
            burn_verification(password);
            warn!(%username, "login unknown username");
            return Err(AppError::Unauthorized);
        }
        Err(e) => return Err(e),
    };

    if !verify_password(password, &user.password_hash)? {
        warn!(%username, user_id = user.id, "login invalid password");
        return Err(AppError::Unauthorized);
    }

    let token = keys.sign(user.id, &user.username, user.role)?;
    info!(user_id = user.id, %username, role = %user.role, "user logged in");
    Ok(LoginOutcome {
        token,
        role: user.role,
    })
}
