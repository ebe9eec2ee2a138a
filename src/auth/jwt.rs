use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use crate::auth::{AuthConfig, AuthError, AuthResult};

/// Claims carried by a session token: the subject id and issue time, plus
/// issuer/audience/expiry enforced on decode.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
}

impl SessionClaims {
    pub fn subject_id(&self) -> AuthResult<Uuid> {
        self.sub.parse().map_err(|_| AuthError::TokenInvalid)
    }
}

#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct JwtMetadata {
    pub algorithm: String,
    pub issuer: String,
    pub audience: String,
    pub token_ttl_secs: i64,
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    token_ttl: Duration,
}

impl JwtService {
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        let secret_bytes = config.jwt_secret.as_bytes();
        let encoding_key = EncodingKey::from_secret(secret_bytes);
        let decoding_key = DecodingKey::from_secret(secret_bytes);

        // Pinning the algorithm here is what rejects tokens signed with any
        // other scheme, regardless of what their header claims.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[config.audience.clone()]);
        validation.set_issuer(&[config.issuer.clone()]);
        validation.leeway = 30;

        Ok(Self {
            encoding_key,
            decoding_key,
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            token_ttl: Duration::seconds(config.token_ttl_secs),
        })
    }

    pub fn issue(&self, subject_id: Uuid) -> AuthResult<SignedToken> {
        let now = Utc::now();
        let expires_at = now + self.token_ttl;

        let claims = SessionClaims {
            sub: subject_id.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| AuthError::Other(format!("token signing failed: {err}")))?;

        Ok(SignedToken {
            token,
            issued_at: now,
            expires_at,
        })
    }

    /// Verify signature, issuer, audience, and expiry. An expired-but-genuine
    /// token is distinguished from everything else so callers can tell the
    /// user to log in again rather than treating them as an attacker.
    pub fn verify(&self, token: &str) -> AuthResult<SessionClaims> {
        match decode::<SessionClaims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Ok(data.claims),
            Err(err) => match err.kind() {
                ErrorKind::ExpiredSignature => Err(AuthError::TokenExpired),
                _ => Err(AuthError::TokenInvalid),
            },
        }
    }

    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    pub fn metadata(&self) -> JwtMetadata {
        JwtMetadata {
            algorithm: "HS256".to_string(),
            issuer: self.issuer.clone(),
            audience: self.audience.clone(),
            token_ttl_secs: self.token_ttl.num_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthConfig;

    fn make_test_config() -> AuthConfig {
        AuthConfig {
            issuer: "https://tourbook.test".into(),
            audience: "tourbook-api".into(),
            jwt_secret: "super-secret-test-key".into(),
            token_ttl_secs: 900,
            session_cookie_name: "tourbook_session".into(),
            cookie_domain: None,
            cookie_secure: false,
            public_base_url: "https://tourbook.test".into(),
            mail_webhook_url: None,
            mail_from: "Tourbook <no-reply@tourbook.test>".into(),
        }
    }

    #[test]
    fn issues_and_verifies_session_tokens() {
        let config = make_test_config();
        let service = JwtService::from_config(&config).expect("jwt service");
        let subject = Uuid::new_v4();

        let signed = service.issue(subject).expect("issue token");
        let claims = service.verify(&signed.token).expect("verify token");

        assert_eq!(claims.subject_id().expect("valid subject"), subject);
        assert_eq!(claims.iat, signed.issued_at.timestamp());
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn rejects_tokens_signed_with_another_secret() {
        let config = make_test_config();
        let service = JwtService::from_config(&config).expect("jwt service");

        let mut other_config = make_test_config();
        other_config.jwt_secret = "a-completely-different-key".into();
        let other = JwtService::from_config(&other_config).expect("other service");

        let signed = other.issue(Uuid::new_v4()).expect("issue token");
        let err = service.verify(&signed.token).expect_err("must be rejected");
        assert!(matches!(err, AuthError::TokenInvalid));
    }

    #[test]
    fn expired_tokens_report_expiry_not_invalidity() {
        let mut config = make_test_config();
        // Older than the 30s decode leeway.
        config.token_ttl_secs = -120;
        let service = JwtService::from_config(&config).expect("jwt service");

        let signed = service.issue(Uuid::new_v4()).expect("issue token");
        let err = service.verify(&signed.token).expect_err("must be expired");
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[test]
    fn garbage_tokens_are_invalid() {
        let config = make_test_config();
        let service = JwtService::from_config(&config).expect("jwt service");
        let err = service
            .verify("not-even-close-to-a-jwt")
            .expect_err("must be rejected");
        assert!(matches!(err, AuthError::TokenInvalid));
    }
}
