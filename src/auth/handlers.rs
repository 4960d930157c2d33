use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{CreatedResponse, LoginRequest, LoginResponse, MeResponse, RegisterRequest},
        extractors::AuthUser,
        services,
    },
    error::AppError,
    extract::AppJson,
    state::AppState,
    users::PublicUser,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me))
        .route("/public-users", get(public_users))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), AppError> {
    let user_id = services::register(&state.store, &payload.username, &payload.password)
        .await
        .map_err(AppError::into_bad_request)?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            message: "User registered successfully".into(),
            user_id,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let outcome =
        services::login(&state.store, &state.keys, &payload.username, &payload.password).await?;

    Ok(Json(LoginResponse {
        message: "Logged in successfully".into(),
        token: outcome.token,
        role: outcome.role,
    }))
}

#[instrument(skip_all, fields(user_id = user.id))]
pub async fn get_me(user: AuthUser) -> Json<MeResponse> {
    Json(MeResponse {
        id: user.id,
        username: user.username,
        role: user.role,
    })
}

#[instrument(skip(state))]
pub async fn public_users(State(state): State<AppState>) -> Result<Json<Vec<PublicUser>>, AppError> {
    Ok(Json(state.store.list_public().await?))
}
