use crate::auth::{AuthError, AuthResult};

/// Session-core configuration loaded from environment variables.
///
/// Everything the manager needs is carried explicitly here and injected at
/// ignition; nothing reads the environment after startup.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub issuer: String,
    pub audience: String,
    /// Signing secret shared by token issue and verify. Required.
    pub jwt_secret: String,
    pub token_ttl_secs: i64,
    pub session_cookie_name: String,
    pub cookie_domain: Option<String>,
    pub cookie_secure: bool,
    /// Base URL embedded in welcome and password-reset emails.
    pub public_base_url: String,
    /// Mail relay endpoint; when unset, outbound mail is logged instead.
    pub mail_webhook_url: Option<String>,
    pub mail_from: String,
}

impl AuthConfig {
    pub fn from_env() -> AuthResult<Self> {
        let issuer =
            std::env::var("TOURBOOK_JWT_ISSUER").unwrap_or_else(|_| "http://localhost".into());
        let audience =
            std::env::var("TOURBOOK_JWT_AUDIENCE").unwrap_or_else(|_| "tourbook-api".into());
        let jwt_secret = std::env::var("TOURBOOK_JWT_SECRET")
            .map_err(|_| AuthError::Config("TOURBOOK_JWT_SECRET is required".into()))?;
        let token_ttl_secs = std::env::var("TOURBOOK_TOKEN_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(90 * 24 * 60 * 60);
        let session_cookie_name = std::env::var("TOURBOOK_SESSION_COOKIE_NAME")
            .unwrap_or_else(|_| "tourbook_session".into());
        let cookie_domain = std::env::var("TOURBOOK_COOKIE_DOMAIN").ok();
        let cookie_secure = std::env::var("TOURBOOK_COOKIE_SECURE")
            .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "on"))
            .unwrap_or(true);
        let public_base_url = std::env::var("TOURBOOK_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8000".into());
        let mail_webhook_url = std::env::var("TOURBOOK_MAIL_WEBHOOK_URL").ok();
        let mail_from = std::env::var("TOURBOOK_MAIL_FROM")
            .unwrap_or_else(|_| "Tourbook <no-reply@tourbook.local>".into());

        Ok(Self {
            issuer,
            audience,
            jwt_secret,
            token_ttl_secs,
            session_cookie_name,
            cookie_domain,
            cookie_secure,
            public_base_url,
            mail_webhook_url,
            mail_from,
        })
    }
}
