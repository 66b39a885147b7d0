use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::models::CurrentUser;
use crate::services::AuthService;
use crate::AppState;

/// Authentication middleware
/// Extracts and validates the bearer token from the Authorization header
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    let token = match auth_header {
        Some(header) if header.starts_with("Bearer ") => &header[7..],
        _ => {
            return Err(AppError::Unauthorized(
                "Missing or invalid Authorization header".to_string(),
            ));
        }
    };

    let claims = AuthService::validate_token(token, &state.config)?;

    // The token may outlive its account; re-check the user row
    let email: String = sqlx::query_scalar("SELECT email FROM users WHERE id = ?")
        .bind(&claims.sub)
        .fetch_optional(state.db.pool())
        .await
        .map_err(|_| AppError::Unauthorized("Invalid token".to_string()))?
        .ok_or_else(|| AppError::Unauthorized("Invalid token".to_string()))?;

    request.extensions_mut().insert(CurrentUser {
        id: claims.sub,
        email,
    });

    Ok(next.run(request).await)
}
