use rocket::http::Status;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

/// Session-core error taxonomy. Every variant that can reach a client is
/// operational and carries a message that is safe to show; the internal
/// variants at the bottom are logged server-side and replaced with a
/// generic message at the response boundary.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("an account with that email already exists")]
    DuplicateEmail,
    #[error("please provide email and password")]
    MissingCredentials,
    #[error("incorrect email or password")]
    InvalidCredentials,
    #[error("you are not logged in; please log in to get access")]
    Unauthenticated,
    #[error("token is invalid")]
    TokenInvalid,
    #[error("token has expired; please log in again")]
    TokenExpired,
    #[error("{0}")]
    StaleCredential(&'static str),
    #[error("you do not have permission to perform this action")]
    Forbidden,
    #[error("{0}")]
    NotFound(String),
    #[error("token is invalid or has expired")]
    ResetTokenInvalid,
    #[error("there was an error sending the email; try again later")]
    Delivery(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("database error: {0}")]
    Sqlx(#[from] rocket_db_pools::sqlx::Error),
    #[error("argon2 parameter error: {0}")]
    Argon2(String),
    #[error("password hashing error: {0}")]
    PasswordHash(String),
    #[error("unexpected error: {0}")]
    Other(String),
}

impl AuthError {
    pub fn status(&self) -> Status {
        match self {
            AuthError::Validation(_) | AuthError::MissingCredentials => Status::BadRequest,
            AuthError::DuplicateEmail => Status::Conflict,
            AuthError::InvalidCredentials
            | AuthError::Unauthenticated
            | AuthError::TokenInvalid
            | AuthError::TokenExpired
            | AuthError::StaleCredential(_) => Status::Unauthorized,
            AuthError::Forbidden => Status::Forbidden,
            AuthError::NotFound(_) => Status::NotFound,
            AuthError::ResetTokenInvalid => Status::BadRequest,
            AuthError::Delivery(_)
            | AuthError::Config(_)
            | AuthError::Sqlx(_)
            | AuthError::Argon2(_)
            | AuthError::PasswordHash(_)
            | AuthError::Other(_) => Status::InternalServerError,
        }
    }

    /// Whether the error message is safe to return to the client verbatim.
    /// Internal faults get logged with full detail and surfaced opaquely.
    pub fn is_operational(&self) -> bool {
        !matches!(
            self,
            AuthError::Config(_)
                | AuthError::Sqlx(_)
                | AuthError::Argon2(_)
                | AuthError::PasswordHash(_)
                | AuthError::Other(_)
        )
    }
}

impl From<argon2::Error> for AuthError {
    fn from(err: argon2::Error) -> Self {
        AuthError::Argon2(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        AuthError::PasswordHash(err.to_string())
    }
}
