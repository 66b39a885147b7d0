use axum::{extract::State, http::StatusCode, Extension, Json};

use crate::error::Result;
use crate::models::{CreateUserRequest, CurrentUser, LoginRequest, LoginResponse, UserResponse};
use crate::services::AuthService;
use crate::AppState;

/// Register a new user
/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>)> {
    let user = AuthService::register(&state.db, req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Login user
/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let response = AuthService::login(&state.db, &state.config, req).await?;
    Ok(Json(response))
}

/// Current user profile
/// GET /api/auth/profile
pub async fn profile(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<UserResponse>> {
    let user = AuthService::get_profile(&state.db, &current_user.id).await?;
    Ok(Json(user))
}
