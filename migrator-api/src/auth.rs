//! JWT Authentication Middleware
//!
//! Bearer tokens are HS256 JWTs carrying a `roles` claim. `require_auth`
//! rejects requests without a valid token (401) and stores the claims in the
//! request extensions; handlers check the operator role themselves (403).

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::error::ErrorResponse;

/// Roles allowed to use the administrative trigger surface
pub const OPERATOR_ROLES: [&str; 2] = ["operator", "admin"];

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    secret: String,
    pub algorithm: Algorithm,
    /// Issuer to validate
    pub issuer: Option<String>,
    pub validate_exp: bool,
}

#[derive(Debug, Clone, Error)]
#[error("JWT config error: {message}")]
pub struct JwtConfigError {
    pub message: String,
}

impl JwtConfig {
    /// Minimum secret length in bytes
    pub const MIN_SECRET_LENGTH: usize = 32;

    pub fn try_new(secret: impl Into<String>) -> Result<Self, JwtConfigError> {
        let secret = secret.into();
        if secret.len() < Self::MIN_SECRET_LENGTH {
            return Err(JwtConfigError {
                message: format!(
                    "JWT secret must be at least {} bytes, got {}",
                    Self::MIN_SECRET_LENGTH,
                    secret.len()
                ),
            });
        }
        Ok(Self {
            secret,
            algorithm: Algorithm::HS256,
            issuer: None,
            validate_exp: true,
        })
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
    /// Subject (operator or service id)
    pub sub: String,
    pub exp: u64,
    pub iat: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl AuthClaims {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// May trigger operator actions
    pub fn is_operator(&self) -> bool {
        OPERATOR_ROLES.iter().any(|role| self.has_role(role))
    }
}

/// Authentication error
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authorization header is required")]
    MissingToken,
    #[error("Invalid authorization header format. Expected: Bearer <token>")]
    InvalidTokenFormat,
    #[error("Token validation failed: {0}")]
    ValidationFailed(String),
    #[error("Token has expired")]
    TokenExpired,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let code = match self {
            AuthError::MissingToken => "MISSING_TOKEN",
            AuthError::InvalidTokenFormat => "INVALID_TOKEN_FORMAT",
            AuthError::ValidationFailed(_) => "TOKEN_VALIDATION_FAILED",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
        };
        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

pub fn extract_token(auth_header: &str) -> Result<&str, AuthError> {
    auth_header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidTokenFormat)
}

/// Validate a JWT and return its claims
pub fn validate_token(token: &str, config: &JwtConfig) -> Result<AuthClaims, AuthError> {
    let mut validation = Validation::new(config.algorithm);
    validation.validate_exp = config.validate_exp;
    if let Some(ref iss) = config.issuer {
        validation.set_issuer(&[iss]);
    }

    let key = DecodingKey::from_secret(config.secret.as_bytes());
    let token_data = decode::<AuthClaims>(token, &key, &validation).map_err(|e| {
        if e.kind() == &jsonwebtoken::errors::ErrorKind::ExpiredSignature {
            AuthError::TokenExpired
        } else {
            AuthError::ValidationFailed(e.to_string())
        }
    })?;

    Ok(token_data.claims)
}

/// Authentication state for sharing config
#[derive(Debug, Clone)]
pub struct AuthState {
    pub config: Arc<JwtConfig>,
}

impl AuthState {
    pub fn new(config: JwtConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

/// Require a valid bearer token; claims go into the request extensions
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let token = extract_token(auth_header)?;
    let claims = validate_token(token, &auth_state.config)?;
    tracing::debug!(sub = %claims.sub, "request authenticated");

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}
