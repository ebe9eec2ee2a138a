use rocket::Request;
use rocket::State;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket_okapi::request::OpenApiFromRequest;
use uuid::Uuid;

use crate::auth::responses::Role;
use crate::auth::users::UserStore;
use crate::auth::{AuthError, AuthResult, AuthState};

/// The resolved subject of a protected request. Constructing one re-checks
/// the credential record, so a token that outlived its subject (deleted
/// account, password change) is rejected here even if it has not expired.
#[derive(Debug, Clone, OpenApiFromRequest)]
pub struct AuthUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }

    /// Role gate: passes the subject through unchanged when its role is in
    /// the allowed set, otherwise `Forbidden`.
    pub fn restrict_to(&self, allowed: &[Role]) -> AuthResult<&Self> {
        if allowed.contains(&self.role) {
            Ok(self)
        } else {
            Err(AuthError::Forbidden)
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthUser {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match extract_user(request).await {
            Ok(user) => Outcome::Success(user),
            Err(err) => Outcome::Error((err.status(), err)),
        }
    }
}

/// Guard form of `restrict_to(&[Role::Admin])` for routes that are
/// admin-only in their entirety.
#[derive(Debug, Clone, OpenApiFromRequest)]
pub struct RequireAdmin(pub AuthUser);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequireAdmin {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match AuthUser::from_request(request).await {
            Outcome::Success(user) => match user.restrict_to(&[Role::Admin]) {
                Ok(_) => Outcome::Success(RequireAdmin(user)),
                Err(err) => Outcome::Error((Status::Forbidden, err)),
            },
            Outcome::Error(err) => Outcome::Error(err),
            Outcome::Forward(_) => {
                Outcome::Error((Status::Unauthorized, AuthError::Unauthenticated))
            }
        }
    }
}

async fn extract_user(request: &Request<'_>) -> AuthResult<AuthUser> {
    let auth_state = request
        .guard::<&State<AuthState>>()
        .await
        .succeeded()
        .ok_or_else(|| AuthError::Config("AuthState missing from state".into()))?;

    let store = request
        .guard::<&State<UserStore>>()
        .await
        .succeeded()
        .ok_or_else(|| AuthError::Config("UserStore missing from state".into()))?;

    let token = session_token_from_request(request, &auth_state.config.session_cookie_name)?;
    let claims = auth_state.jwt_service.verify(token)?;
    let user_id = claims.subject_id()?;

    let record = store
        .find_by_id(user_id)
        .await?
        .ok_or(AuthError::StaleCredential(
            "the user belonging to this token no longer exists",
        ))?;

    if record.changed_password_after(claims.iat) {
        return Err(AuthError::StaleCredential(
            "password was changed after this token was issued; please log in again",
        ));
    }

    Ok(AuthUser {
        id: record.id,
        name: record.name,
        email: record.email,
        role: record.role,
    })
}

/// Bearer header takes precedence; the session cookie is the fallback for
/// browser clients.
fn session_token_from_request<'r>(
    request: &'r Request<'_>,
    cookie_name: &str,
) -> AuthResult<&'r str> {
    if let Some(header) = request.headers().get_one("Authorization") {
        let mut parts = header.splitn(2, ' ');
        let scheme = parts.next().unwrap_or_default();
        let token = parts.next().unwrap_or_default();
        if scheme.eq_ignore_ascii_case("Bearer") && !token.is_empty() {
            return Ok(token);
        }
        return Err(AuthError::Unauthenticated);
    }

    match request.cookies().get(cookie_name) {
        Some(cookie) if !cookie.value().is_empty() => Ok(cookie.value()),
        _ => Err(AuthError::Unauthenticated),
    }
}
