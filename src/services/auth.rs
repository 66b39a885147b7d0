use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use uuid::Uuid;

use crate::config::Config;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{Claims, CreateUserRequest, LoginRequest, LoginResponse, User, UserResponse};

/// Authentication service
pub struct AuthService;

impl AuthService {
    /// Register a new user
    pub async fn register(db: &Database, req: CreateUserRequest) -> Result<UserResponse> {
        // Validate email
        if !req.email.contains('@') {
            return Err(AppError::Validation("Invalid email format".to_string()));
        }

        // Validate password
        if req.password.len() < 6 {
            return Err(AppError::Validation(
                "Password must be at least 6 characters".to_string(),
            ));
        }

        // Check if email already exists
        let existing: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(&req.email)
            .fetch_optional(db.pool())
            .await?;

        if existing.is_some() {
            return Err(AppError::Conflict("Email already registered".to_string()));
        }

        // Hash password
        let password_hash = Self::hash_password(&req.password)?;

        // Create user
        let user_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO users (id, email, name, password_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user_id)
        .bind(&req.email)
        .bind(&req.name)
        .bind(&password_hash)
        .bind(&now)
        .bind(&now)
        .execute(db.pool())
        .await?;

        let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(&user_id)
            .fetch_one(db.pool())
            .await?;

        Ok(UserResponse::from(user))
    }

    /// Login user, yielding a bearer token
    pub async fn login(db: &Database, config: &Config, req: LoginRequest) -> Result<LoginResponse> {
        let user: User = sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(&req.email)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid email or password".to_string()))?;

        if !Self::verify_password(&req.password, &user.password_hash)? {
            return Err(AppError::Unauthorized(
                "Invalid email or password".to_string(),
            ));
        }

        let token = Self::generate_token(&user, config)?;

        Ok(LoginResponse {
            token,
            token_type: "Bearer".to_string(),
            expires_in: config.jwt.access_token_expire_minutes * 60,
            user: UserResponse::from(user),
        })
    }

    /// Fetch the profile of an authenticated user
    pub async fn get_profile(db: &Database, user_id: &str) -> Result<UserResponse> {
        let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        Ok(UserResponse::from(user))
    }

    /// Generate access token (JWT)
    fn generate_token(user: &User, config: &Config) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::minutes(config.jwt.access_token_expire_minutes as i64);

        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            jti: Uuid::new_v4().to_string(),
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt.secret.as_bytes()),
        )?;

        Ok(token)
    }

    /// Validate access token and extract claims
    pub fn validate_token(token: &str, config: &Config) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(config.jwt.secret.as_bytes()),
            &validation,
        )
        .map_err(|_| AppError::Unauthorized("Invalid token".to_string()))?;

        Ok(token_data.claims)
    }

    /// Hash password using Argon2
    fn hash_password(password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?
            .to_string();

        Ok(password_hash)
    }

    /// Verify password against hash
    fn verify_password(password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        db.run_migrations().await.unwrap();
        (db, dir)
    }

    fn request(email: &str, password: &str) -> CreateUserRequest {
        CreateUserRequest {
            email: email.to_string(),
            name: "Tester".to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn register_then_login() {
        let (db, _dir) = test_db().await;
        let config = Config::default();

        let user = AuthService::register(&db, request("a@example.com", "secret1"))
            .await
            .unwrap();
        assert_eq!(user.email, "a@example.com");

        let response = AuthService::login(
            &db,
            &config,
            LoginRequest {
                email: "a@example.com".to_string(),
                password: "secret1".to_string(),
            },
        )
        .await
        .unwrap();

        assert_eq!(response.token_type, "Bearer");
        let claims = AuthService::validate_token(&response.token, &config).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.email, "a@example.com");
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let (db, _dir) = test_db().await;

        AuthService::register(&db, request("a@example.com", "secret1"))
            .await
            .unwrap();
        let err = AuthService::register(&db, request("a@example.com", "secret2"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn rejects_bad_registrations() {
        let (db, _dir) = test_db().await;

        let err = AuthService::register(&db, request("not-an-email", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = AuthService::register(&db, request("a@example.com", "short"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let (db, _dir) = test_db().await;
        let config = Config::default();

        AuthService::register(&db, request("a@example.com", "secret1"))
            .await
            .unwrap();

        let err = AuthService::login(
            &db,
            &config,
            LoginRequest {
                email: "a@example.com".to_string(),
                password: "wrong-password".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let err = AuthService::login(
            &db,
            &config,
            LoginRequest {
                email: "nobody@example.com".to_string(),
                password: "secret1".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn tampered_token_is_rejected() {
        let (db, _dir) = test_db().await;
        let config = Config::default();

        AuthService::register(&db, request("a@example.com", "secret1"))
            .await
            .unwrap();
        let response = AuthService::login(
            &db,
            &config,
            LoginRequest {
                email: "a@example.com".to_string(),
                password: "secret1".to_string(),
            },
        )
        .await
        .unwrap();

        let mut other = Config::default();
        other.jwt.secret = "a-different-secret".to_string();

        let err = AuthService::validate_token(&response.token, &other).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let err = AuthService::validate_token("garbage.token.here", &config).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
