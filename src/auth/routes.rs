use chrono::Utc;
use rocket::http::{Cookie, CookieJar, SameSite};
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::{State, get, patch, post};
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use time::Duration as TimeDuration;

use crate::auth::guards::{AuthUser, RequireAdmin};
use crate::auth::passwords::{hash_on_worker, verify_on_worker};
use crate::auth::responses::{
    ForgotPasswordRequest, LoginRequest, MessageResponse, ResetPasswordRequest, SignupRequest,
    SigningKeyMetadata, TokenResponse, UpdatePasswordRequest, UserSummary,
};
use crate::auth::users::{NewUser, UserRecord, UserStore};
use crate::auth::{AuthError, AuthResult, AuthState, reset};

const MIN_PASSWORD_LEN: usize = 8;

type AuthRouteResult<T> = Result<Json<T>, status::Custom<Json<AuthErrorResponse>>>;

#[derive(Debug, serde::Serialize, JsonSchema)]
pub struct AuthErrorResponse {
    pub status: u16,
    pub message: String,
}

/// Create a credential record and log the new user in. The welcome mail is
/// best-effort: a delivery failure is logged but never unwinds the signup.
#[openapi(tag = "Users")]
#[post("/users/signup", data = "<payload>")]
pub async fn signup(
    state: &State<AuthState>,
    store: &State<UserStore>,
    cookies: &CookieJar<'_>,
    payload: Json<SignupRequest>,
) -> AuthRouteResult<TokenResponse> {
    let payload = payload.into_inner();
    let (name, email) = validate_signup(&payload).map_err(respond_error)?;

    let password_hash = hash_on_worker(state.password_service.clone(), payload.password)
        .await
        .map_err(respond_error)?;

    let record = store
        .create(NewUser {
            name,
            email,
            password_hash,
        })
        .await
        .map_err(respond_error)?;

    let account_url = format!("{}/me", state.config.public_base_url);
    if let Err(err) = state.mailer.send_welcome(&record, &account_url).await {
        log::warn!("welcome mail for {} failed: {}", record.email, err);
    }

    issue_session(state, cookies, &record)
        .map(Json)
        .map_err(respond_error)
}

/// Exchange credentials for a session token. Unknown email and wrong
/// password produce the same response, so a caller cannot probe which
/// addresses have accounts.
#[openapi(tag = "Users")]
#[post("/users/login", data = "<payload>")]
pub async fn login(
    state: &State<AuthState>,
    store: &State<UserStore>,
    cookies: &CookieJar<'_>,
    payload: Json<LoginRequest>,
) -> AuthRouteResult<TokenResponse> {
    let email = payload.email.trim().to_lowercase();
    let password = payload.password.clone();

    if email.is_empty() || password.is_empty() {
        return Err(respond_error(AuthError::MissingCredentials));
    }

    let record = match store.find_by_email(&email).await.map_err(respond_error)? {
        Some(record) => record,
        None => return Err(respond_error(AuthError::InvalidCredentials)),
    };

    let verified = verify_on_worker(
        state.password_service.clone(),
        password,
        record.password_hash.clone(),
    )
    .await
    .map_err(respond_error)?;

    if !verified {
        return Err(respond_error(AuthError::InvalidCredentials));
    }

    issue_session(state, cookies, &record)
        .map(Json)
        .map_err(respond_error)
}

/// Replace the session cookie with a short-lived sentinel so browser
/// clients drop their token. Bearer-header clients simply discard it.
#[openapi(tag = "Users")]
#[post("/users/logout")]
pub async fn logout(state: &State<AuthState>, cookies: &CookieJar<'_>) -> Json<MessageResponse> {
    let mut cookie = Cookie::build((
        state.config.session_cookie_name.clone(),
        "loggedout".to_string(),
    ))
    .path("/")
    .http_only(true)
    .same_site(SameSite::Lax)
    .secure(state.config.cookie_secure)
    .max_age(TimeDuration::seconds(10))
    .build();

    if let Some(domain) = &state.config.cookie_domain {
        cookie.set_domain(domain.clone());
    }

    cookies.add(cookie);

    Json(MessageResponse::success("logged out"))
}

/// The current subject, as resolved by the `AuthUser` guard.
#[openapi(tag = "Users")]
#[get("/users/me")]
pub async fn current_user(user: AuthUser) -> Json<UserSummary> {
    Json(UserSummary {
        id: user.id,
        name: user.name,
        email: user.email,
        role: user.role,
    })
}

/// Start a password reset: persist the hashed secret with its expiry, then
/// mail the raw secret. If the mail cannot be delivered the pending reset
/// is cleared before reporting failure, so no live secret exists that the
/// user has no way to retrieve.
#[openapi(tag = "Users")]
#[post("/users/forgot-password", data = "<payload>")]
pub async fn forgot_password(
    state: &State<AuthState>,
    store: &State<UserStore>,
    payload: Json<ForgotPasswordRequest>,
) -> AuthRouteResult<MessageResponse> {
    let email = payload.email.trim().to_lowercase();

    let record = store
        .find_by_email(&email)
        .await
        .map_err(respond_error)?
        .ok_or_else(|| {
            respond_error(AuthError::NotFound(
                "there is no user with that email address".into(),
            ))
        })?;

    let token = reset::generate();
    store
        .set_reset_token(record.id, &token.hash, token.expires_at)
        .await
        .map_err(respond_error)?;

    let reset_url = format!(
        "{}/api/v1/users/reset-password/{}",
        state.config.public_base_url, token.raw
    );

    if let Err(err) = state.mailer.send_password_reset(&record, &reset_url).await {
        if let Err(rollback_err) = store.clear_reset_token(record.id).await {
            log::error!(
                "failed to clear reset token for {} after delivery failure: {}",
                record.email,
                rollback_err
            );
        }
        return Err(respond_error(err));
    }

    Ok(Json(MessageResponse::success("token sent to email")))
}

/// Complete a password reset. The lookup and the password swap are a single
/// conditional update, so a reset secret can only ever be consumed once.
#[openapi(tag = "Users")]
#[patch("/users/reset-password/<token>", data = "<payload>")]
pub async fn reset_password(
    state: &State<AuthState>,
    store: &State<UserStore>,
    cookies: &CookieJar<'_>,
    token: &str,
    payload: Json<ResetPasswordRequest>,
) -> AuthRouteResult<TokenResponse> {
    validate_new_password(&payload.password, &payload.password_confirm).map_err(respond_error)?;

    let new_hash = hash_on_worker(state.password_service.clone(), payload.password.clone())
        .await
        .map_err(respond_error)?;

    let candidate_hash = reset::hash_candidate(token);
    let record = store
        .consume_reset_token(&candidate_hash, &new_hash, Utc::now())
        .await
        .map_err(respond_error)?
        .ok_or_else(|| respond_error(AuthError::ResetTokenInvalid))?;

    issue_session(state, cookies, &record)
        .map(Json)
        .map_err(respond_error)
}

/// Change the password of an authenticated subject after re-verifying the
/// current one. Outstanding tokens become stale; the response carries a
/// fresh one.
#[openapi(tag = "Users")]
#[patch("/users/update-password", data = "<payload>")]
pub async fn update_password(
    state: &State<AuthState>,
    store: &State<UserStore>,
    cookies: &CookieJar<'_>,
    user: AuthUser,
    payload: Json<UpdatePasswordRequest>,
) -> AuthRouteResult<TokenResponse> {
    let record = store
        .find_by_id(user.id)
        .await
        .map_err(respond_error)?
        .ok_or_else(|| {
            respond_error(AuthError::StaleCredential(
                "the user belonging to this token no longer exists",
            ))
        })?;

    let verified = verify_on_worker(
        state.password_service.clone(),
        payload.password_current.clone(),
        record.password_hash.clone(),
    )
    .await
    .map_err(respond_error)?;

    if !verified {
        return Err(respond_error(AuthError::InvalidCredentials));
    }

    validate_new_password(&payload.password, &payload.password_confirm).map_err(respond_error)?;

    let new_hash = hash_on_worker(state.password_service.clone(), payload.password.clone())
        .await
        .map_err(respond_error)?;

    store
        .update_password(record.id, &new_hash, Utc::now())
        .await
        .map_err(respond_error)?;

    issue_session(state, cookies, &record)
        .map(Json)
        .map_err(respond_error)
}

/// Signing configuration for operators; gated on the admin role.
#[openapi(tag = "Auth")]
#[get("/auth/keys")]
pub async fn signing_keys(
    state: &State<AuthState>,
    _admin: RequireAdmin,
) -> AuthRouteResult<SigningKeyMetadata> {
    let meta = state.jwt_service.metadata();
    Ok(Json(SigningKeyMetadata {
        algorithm: meta.algorithm,
        issuer: meta.issuer,
        audience: meta.audience,
        token_ttl_secs: meta.token_ttl_secs,
    }))
}

/// Mint a token for the record and install the matching session cookie.
fn issue_session(
    state: &State<AuthState>,
    cookies: &CookieJar<'_>,
    record: &UserRecord,
) -> AuthResult<TokenResponse> {
    let signed = state.jwt_service.issue(record.id)?;

    let mut cookie = Cookie::build((
        state.config.session_cookie_name.clone(),
        signed.token.clone(),
    ))
    .path("/")
    .http_only(true)
    .same_site(SameSite::Lax)
    .secure(state.config.cookie_secure)
    .max_age(TimeDuration::seconds(state.config.token_ttl_secs))
    .build();

    if let Some(domain) = &state.config.cookie_domain {
        cookie.set_domain(domain.clone());
    }

    cookies.add(cookie);

    Ok(TokenResponse {
        token: signed.token,
        expires_at: signed.expires_at,
        user: record.summary(),
    })
}

/// Ordered construction pipeline for signup input: identity fields first,
/// then the password policy. Returns the normalized (name, email) pair.
fn validate_signup(payload: &SignupRequest) -> AuthResult<(String, String)> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AuthError::Validation("please provide your name".into()));
    }

    let email = payload.email.trim().to_lowercase();
    if !is_plausible_email(&email) {
        return Err(AuthError::Validation(
            "please provide a valid email address".into(),
        ));
    }

    validate_new_password(&payload.password, &payload.password_confirm)?;

    Ok((name.to_string(), email))
}

fn validate_new_password(password: &str, confirm: &str) -> AuthResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if password != confirm {
        return Err(AuthError::Validation("passwords are not the same".into()));
    }
    Ok(())
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    }
}

/// Single boundary translator from `AuthError` to an HTTP response.
/// Operational errors pass their message through; internal faults are
/// logged in full and surfaced opaquely.
fn respond_error(err: AuthError) -> status::Custom<Json<AuthErrorResponse>> {
    let status = err.status();

    let message = if err.is_operational() {
        if let AuthError::Delivery(detail) = &err {
            log::error!("outbound mail delivery failed: {detail}");
        }
        err.to_string()
    } else {
        log::error!("internal error in session operation: {err}");
        "something went wrong; please try again later".to_string()
    };

    status::Custom(
        status,
        Json(AuthErrorResponse {
            status: status.code,
            message,
        }),
    )
}
