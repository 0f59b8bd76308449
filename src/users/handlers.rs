use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, patch, post, put},
    Router,
};
use tracing::instrument;

use crate::{
    error::AppError,
    state::AppState,
    users::{
        dto::{CreateUserRequest, LoginRequest, UpdatePasswordRequest, UpdateUserRequest, UserResponse},
        extractors::{AdminCaller, Caller, Json, Path},
    },
};

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login_user_by_email))
        .route("/users", post(create_user))
        .route("/users/:id", get(get_user_by_identifier))
}

pub fn self_service_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_user_profile))
        .route("/users/:id", patch(update_user).delete(delete_user))
        .route("/users/:id/password", put(update_user_password))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/users/:id/confirm", post(confirm_user))
        .route(
            "/admin/users/:id",
            patch(update_user_admin).delete(delete_user_admin),
        )
        .route("/admin/users/:id/password", put(update_user_password_admin))
}

#[instrument(skip(state))]
pub async fn get_user_by_identifier(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.accounts.get_by_identifier(&identifier).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
pub async fn get_user_profile(
    State(state): State<AppState>,
    Caller(user_id): Caller,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.accounts.get_by_identifier(&user_id.to_string()).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
pub async fn login_user_by_email(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state
        .accounts
        .authenticate(&payload.email, &payload.password)
        .await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let user = state
        .accounts
        .create(&payload.email, &payload.full_name, &payload.password)
        .await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(state, _admin))]
pub async fn confirm_user(
    State(state): State<AppState>,
    _admin: AdminCaller,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.accounts.confirm(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<StatusCode, AppError> {
    state
        .accounts
        .update_profile(user_id, id, payload.into())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, _admin, payload))]
pub async fn update_user_admin(
    State(state): State<AppState>,
    _admin: AdminCaller,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<StatusCode, AppError> {
    state.accounts.update_profile_admin(id, payload.into()).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, payload))]
pub async fn update_user_password(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(id): Path<i64>,
    Json(payload): Json<UpdatePasswordRequest>,
) -> Result<StatusCode, AppError> {
    state
        .accounts
        .change_password(user_id, id, &payload.password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, _admin, payload))]
pub async fn update_user_password_admin(
    State(state): State<AppState>,
    _admin: AdminCaller,
    Path(id): Path<i64>,
    Json(payload): Json<UpdatePasswordRequest>,
) -> Result<StatusCode, AppError> {
    state
        .accounts
        .change_password_admin(id, &payload.password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.accounts.delete(user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, _admin))]
pub async fn delete_user_admin(
    State(state): State<AppState>,
    _admin: AdminCaller,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.accounts.delete_admin(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
