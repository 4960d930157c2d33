use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{Map, Value};
use tracing::instrument;

use super::{
    dto::{
        AddAdminRequest, BulkDeleteRequest, ColumnRequest, CreateUserRequest, DeleteOutcome,
        MessageResponse,
    },
    services,
};
use crate::{
    auth::{extractors::AdminUser, CreatedResponse},
    error::AppError,
    extract::{AppJson, AppPath},
    state::AppState,
    users::UserRecord,
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/bulk-delete", post(bulk_delete))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/create-user", post(create_user))
        .route("/add-admin", post(add_admin))
}

pub fn schema_routes() -> Router<AppState> {
    Router::new()
        .route("/columns", get(list_columns))
        .route("/create-column", post(create_column))
        .route("/delete-column", post(delete_column))
}

#[instrument(skip(state, admin))]
pub async fn list_users(
    State(state): State<AppState>,
    admin: AdminUser,
) -> Result<Json<Vec<UserRecord>>, AppError> {
    Ok(Json(services::list_users(&state.store, &admin).await?))
}

#[instrument(skip(state, admin))]
pub async fn get_user(
    State(state): State<AppState>,
    admin: AdminUser,
    AppPath(id): AppPath<i64>,
) -> Result<Json<UserRecord>, AppError> {
    Ok(Json(services::get_user(&state.store, &admin, id).await?))
}

#[instrument(skip(state, admin, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    admin: AdminUser,
    AppPath(id): AppPath<i64>,
    AppJson(payload): AppJson<Map<String, Value>>,
) -> Result<Json<MessageResponse>, AppError> {
    services::update_user(&state.store, &admin, id, payload).await?;
    Ok(Json(MessageResponse::new("User updated successfully")))
}

#[instrument(skip(state, admin))]
pub async fn delete_user(
    State(state): State<AppState>,
    admin: AdminUser,
    AppPath(id): AppPath<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    services::delete_user(&state.store, &admin, id).await?;
    Ok(Json(MessageResponse::new(format!(
        "User with ID {id} deleted successfully"
    ))))
}

#[instrument(skip(state, admin, payload))]
pub async fn bulk_delete(
    State(state): State<AppState>,
    admin: AdminUser,
    AppJson(payload): AppJson<BulkDeleteRequest>,
) -> Result<Json<Vec<DeleteOutcome>>, AppError> {
    if payload.ids.is_empty() {
        return Err(AppError::InvalidInput(
            "Select at least one user to delete".into(),
        ));
    }
    Ok(Json(
        services::delete_users(&state.store, &admin, &payload.ids).await,
    ))
}

#[instrument(skip(state, admin, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    admin: AdminUser,
    AppJson(payload): AppJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), AppError> {
    let user_id = services::create_user(
        &state.store,
        &admin,
        &payload.username,
        &payload.password,
        payload.role.as_deref(),
    )
    .await
    .map_err(AppError::into_bad_request)?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            message: format!("User created successfully with ID: {user_id}"),
            user_id,
        }),
    ))
}

#[instrument(skip(state, admin, payload))]
pub async fn add_admin(
    State(state): State<AppState>,
    admin: AdminUser,
    AppJson(payload): AppJson<AddAdminRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), AppError> {
    let user_id = services::create_user(
        &state.store,
        &admin,
        &payload.username,
        &payload.password,
        Some("admin"),
    )
    .await
    .map_err(AppError::into_bad_request)?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            message: format!("Administrator added successfully with ID: {user_id}"),
            user_id,
        }),
    ))
}

#[instrument(skip(state, admin))]
pub async fn list_columns(
    State(state): State<AppState>,
    admin: AdminUser,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(services::list_columns(&state.store, &admin).await?))
}

#[instrument(skip(state, admin))]
pub async fn create_column(
    State(state): State<AppState>,
    admin: AdminUser,
    AppJson(payload): AppJson<ColumnRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    services::add_column(&state.store, &admin, &payload.column_name)
        .await
        .map_err(AppError::into_bad_request)?;
    Ok(Json(MessageResponse::new(format!(
        "Column \"{}\" added successfully",
        payload.column_name
    ))))
}

#[instrument(skip(state, admin))]
pub async fn delete_column(
    State(state): State<AppState>,
    admin: AdminUser,
    AppJson(payload): AppJson<ColumnRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    services::drop_column(&state.store, &admin, &payload.column_name)
        .await
        .map_err(AppError::into_bad_request)?;
    Ok(Json(MessageResponse::new(format!(
        "Column \"{}\" deleted successfully",
        payload.column_name
    ))))
}
