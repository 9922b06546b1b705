//! Application state for the API server

use migrator_core::{NotificationFanout, OperatorActions, TokenStore};
use std::sync::Arc;

use crate::auth::{AuthState, JwtConfig, JwtConfigError};

/// API server state
#[derive(Clone)]
pub struct AppState {
    /// Lock-taking operator actions
    pub operator: OperatorActions,
    /// Per-mint event subscriptions for websocket clients
    pub fanout: NotificationFanout,
    pub auth: AuthState,
    /// API version
    pub version: String,
}

impl AppState {
    pub fn new(operator: OperatorActions, fanout: NotificationFanout, jwt: JwtConfig) -> Self {
        Self {
            operator,
            fanout,
            auth: AuthState::new(jwt),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        self.operator.store()
    }
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            enable_cors: true,
            jwt_secret: String::new(),
            jwt_issuer: None,
        }
    }
}

impl ApiConfig {
    /// Overlay `MIGRATOR_API_*` and `MIGRATOR_JWT_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("MIGRATOR_API_HOST") {
            config.host = host;
        }
        if let Some(port) = std::env::var("MIGRATOR_API_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.port = port;
        }
        if let Ok(cors) = std::env::var("MIGRATOR_API_CORS") {
            config.enable_cors = cors == "1" || cors.eq_ignore_ascii_case("true");
        }
        if let Ok(secret) = std::env::var("MIGRATOR_JWT_SECRET") {
            config.jwt_secret = secret;
        }
        config.jwt_issuer = std::env::var("MIGRATOR_JWT_ISSUER").ok();
        config
    }

    /// Build the JWT validator; the secret must be at least 32 bytes
    pub fn jwt(&self) -> Result<JwtConfig, JwtConfigError> {
        let jwt = JwtConfig::try_new(self.jwt_secret.clone())?;
        Ok(match &self.jwt_issuer {
            Some(issuer) => jwt.with_issuer(issuer.clone()),
            None => jwt,
        })
    }
}
