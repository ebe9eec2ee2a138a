//! Authentication and session-token core: configuration, credential
//! handling, token minting and verification, reset-token lifecycle,
//! Rocket request guards, and HTTP route handlers.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod guards;
pub mod jwt;
pub mod mailer;
pub mod passwords;
pub mod reset;
pub mod responses;
pub mod routes;
pub mod users;

pub use config::AuthConfig;
pub use error::{AuthError, AuthResult};
pub use guards::{AuthUser, RequireAdmin};
pub use jwt::JwtService;
pub use mailer::Mailer;
pub use passwords::PasswordService;
pub use users::UserStore;

/// Everything the session operations need, shared through Rocket state.
#[derive(Clone)]
pub struct AuthState {
    pub config: AuthConfig,
    pub password_service: Arc<PasswordService>,
    pub jwt_service: Arc<JwtService>,
    pub mailer: Arc<dyn Mailer>,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        password_service: PasswordService,
        jwt_service: JwtService,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            config,
            password_service: Arc::new(password_service),
            jwt_service: Arc::new(jwt_service),
            mailer,
        }
    }

    /// Build the full state from environment configuration.
    pub fn from_env() -> AuthResult<Self> {
        let config = AuthConfig::from_env()?;
        let password_service = PasswordService::new()?;
        let jwt_service = JwtService::from_config(&config)?;
        let mailer: Arc<dyn Mailer> = Arc::from(mailer::from_config(&config));
        Ok(Self::new(config, password_service, jwt_service, mailer))
    }
}
