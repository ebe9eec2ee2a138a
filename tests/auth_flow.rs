//! End-to-end session lifecycle against an ephemeral Postgres instance:
//! signup, login, protected access, password reset, password change, and
//! role gating.

use std::sync::Arc;
use std::time::Duration;

use rocket::http::{ContentType, Header, Status};
use rocket::local::asynchronous::{Client, LocalResponse};
use rocket::routes;
use serde_json::{Value, json};
use sqlx::PgPool;

use tourbook_api::auth::routes as auth_routes;
use tourbook_api::auth::{AuthConfig, AuthState, JwtService, PasswordService};
use tourbook_api::test_support::{RecordingMailer, TestDatabase, TestFixtures, TestRocketBuilder};

fn test_config() -> AuthConfig {
    AuthConfig {
        issuer: "https://tourbook.test".into(),
        audience: "tourbook-api".into(),
        jwt_secret: "integration-test-secret".into(),
        token_ttl_secs: 900,
        session_cookie_name: "tourbook_session".into(),
        cookie_domain: None,
        cookie_secure: false,
        public_base_url: "https://tourbook.test".into(),
        mail_webhook_url: None,
        mail_from: "Tourbook <no-reply@tourbook.test>".into(),
    }
}

async fn spawn_client(pool: PgPool, mailer: Arc<RecordingMailer>) -> Client {
    let config = test_config();
    let state = AuthState::new(
        config.clone(),
        PasswordService::new().expect("password service"),
        JwtService::from_config(&config).expect("jwt service"),
        mailer,
    );

    TestRocketBuilder::new()
        .mount_api_routes(routes![
            auth_routes::signup,
            auth_routes::login,
            auth_routes::logout,
            auth_routes::current_user,
            auth_routes::forgot_password,
            auth_routes::reset_password,
            auth_routes::update_password,
            auth_routes::signing_keys,
        ])
        .manage_pg_pool(pool)
        .manage_auth_state(state)
        .async_client()
        .await
}

async fn signup(client: &Client, name: &str, email: &str, password: &str) -> Value {
    let response = client
        .post("/api/v1/users/signup")
        .header(ContentType::JSON)
        .body(
            json!({
                "name": name,
                "email": email,
                "password": password,
                "password_confirm": password,
            })
            .to_string(),
        )
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok);
    response.into_json().await.expect("signup payload")
}

async fn login<'c>(client: &'c Client, email: &str, password: &str) -> LocalResponse<'c> {
    client
        .post("/api/v1/users/login")
        .header(ContentType::JSON)
        .body(json!({ "email": email, "password": password }).to_string())
        .dispatch()
        .await
}

fn bearer(token: &str) -> Header<'static> {
    Header::new("Authorization", format!("Bearer {token}"))
}

#[tokio::test]
async fn signup_issues_token_and_sanitized_user() {
    let db = TestDatabase::new().await.expect("test database");
    let mailer = RecordingMailer::shared();
    let client = spawn_client(db.pool_clone(), mailer.clone()).await;

    let payload = signup(&client, "Ann", "ann@x.com", "secret12").await;

    let token = payload["token"].as_str().expect("token present");
    assert!(!token.is_empty());
    assert_eq!(payload["user"]["email"], "ann@x.com");
    assert_eq!(payload["user"]["role"], "user");
    assert!(payload["user"].get("password_hash").is_none());
    assert!(payload["user"].get("password").is_none());

    // Stored hash is not the plaintext.
    let stored_hash: String =
        sqlx::query_scalar("SELECT password_hash FROM users WHERE email = 'ann@x.com'")
            .fetch_one(db.pool())
            .await
            .expect("stored user");
    assert_ne!(stored_hash, "secret12");

    // Welcome mail went out.
    assert_eq!(mailer.sent().len(), 1);
    assert_eq!(mailer.sent()[0].to, "ann@x.com");

    // The token gates access to the protected profile route.
    let me = client
        .get("/api/v1/users/me")
        .header(bearer(token))
        .dispatch()
        .await;
    assert_eq!(me.status(), Status::Ok);
    let me_body: Value = me.into_json().await.expect("me payload");
    assert_eq!(me_body["email"], "ann@x.com");

    // Email uniqueness is case-insensitive.
    let dup = client
        .post("/api/v1/users/signup")
        .header(ContentType::JSON)
        .body(
            json!({
                "name": "Ann Again",
                "email": "ANN@x.com",
                "password": "secret34",
                "password_confirm": "secret34",
            })
            .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(dup.status(), Status::Conflict);

    db.close().await.expect("tear down");
}

#[tokio::test]
async fn login_failures_are_indistinguishable() {
    let db = TestDatabase::new().await.expect("test database");
    let client = spawn_client(db.pool_clone(), RecordingMailer::shared()).await;

    signup(&client, "Ann", "ann@x.com", "secret12").await;

    let wrong_password = login(&client, "ann@x.com", "wrong-password").await;
    let wrong_status = wrong_password.status();
    let wrong_body = wrong_password.into_string().await.expect("body");

    let unknown_email = login(&client, "nobody@x.com", "secret12").await;
    let unknown_status = unknown_email.status();
    let unknown_body = unknown_email.into_string().await.expect("body");

    assert_eq!(wrong_status, Status::Unauthorized);
    assert_eq!(unknown_status, wrong_status);
    assert_eq!(unknown_body, wrong_body, "responses must not reveal which part failed");

    // Absent credentials are a malformed request, not a failed login.
    let missing = login(&client, "ann@x.com", "").await;
    assert_eq!(missing.status(), Status::BadRequest);

    // The genuine credentials still work.
    let ok = login(&client, "ann@x.com", "secret12").await;
    assert_eq!(ok.status(), Status::Ok);

    db.close().await.expect("tear down");
}

#[tokio::test]
async fn password_change_invalidates_outstanding_tokens() {
    let db = TestDatabase::new().await.expect("test database");
    let client = spawn_client(db.pool_clone(), RecordingMailer::shared()).await;

    let original = signup(&client, "Ann", "ann@x.com", "secret12").await;
    let old_token = original["token"].as_str().expect("token").to_string();

    // password_changed_at is backdated by one second to protect the token
    // minted in the same request; put the old token clearly before that.
    tokio::time::sleep(Duration::from_secs(2)).await;

    let wrong_current = client
        .patch("/api/v1/users/update-password")
        .header(ContentType::JSON)
        .header(bearer(&old_token))
        .body(
            json!({
                "password_current": "not-my-password",
                "password": "newpass123",
                "password_confirm": "newpass123",
            })
            .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(wrong_current.status(), Status::Unauthorized);

    let changed = client
        .patch("/api/v1/users/update-password")
        .header(ContentType::JSON)
        .header(bearer(&old_token))
        .body(
            json!({
                "password_current": "secret12",
                "password": "newpass123",
                "password_confirm": "newpass123",
            })
            .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(changed.status(), Status::Ok);
    let changed_body: Value = changed.into_json().await.expect("payload");
    let new_token = changed_body["token"].as_str().expect("fresh token");

    // The unexpired old token is now stale; the fresh one passes.
    let stale = client
        .get("/api/v1/users/me")
        .header(bearer(&old_token))
        .dispatch()
        .await;
    assert_eq!(stale.status(), Status::Unauthorized);

    let fresh = client
        .get("/api/v1/users/me")
        .header(bearer(new_token))
        .dispatch()
        .await;
    assert_eq!(fresh.status(), Status::Ok);

    // Old password no longer logs in; new one does.
    assert_eq!(
        login(&client, "ann@x.com", "secret12").await.status(),
        Status::Unauthorized
    );
    assert_eq!(
        login(&client, "ann@x.com", "newpass123").await.status(),
        Status::Ok
    );

    db.close().await.expect("tear down");
}

#[tokio::test]
async fn reset_tokens_are_single_use_and_expire() {
    let db = TestDatabase::new().await.expect("test database");
    let mailer = RecordingMailer::shared();
    let client = spawn_client(db.pool_clone(), mailer.clone()).await;

    signup(&client, "Ann", "ann@x.com", "secret12").await;

    // Unknown email gets a 404, per the original contract.
    let unknown = client
        .post("/api/v1/users/forgot-password")
        .header(ContentType::JSON)
        .body(json!({ "email": "nobody@x.com" }).to_string())
        .dispatch()
        .await;
    assert_eq!(unknown.status(), Status::NotFound);

    let forgot = client
        .post("/api/v1/users/forgot-password")
        .header(ContentType::JSON)
        .body(json!({ "email": "ann@x.com" }).to_string())
        .dispatch()
        .await;
    assert_eq!(forgot.status(), Status::Ok);

    let reset_url = mailer.last_url().expect("reset mail recorded");
    let raw_token = reset_url
        .rsplit_once("/reset-password/")
        .expect("reset url shape")
        .1
        .to_string();

    // The raw secret is mailed, never stored; only its hash is.
    let stored_hash: Option<String> = sqlx::query_scalar(
        "SELECT password_reset_token_hash FROM users WHERE email = 'ann@x.com'",
    )
    .fetch_one(db.pool())
    .await
    .expect("stored row");
    let stored_hash = stored_hash.expect("pending reset recorded");
    assert_ne!(stored_hash, raw_token);

    let reset = client
        .patch(format!("/api/v1/users/reset-password/{raw_token}"))
        .header(ContentType::JSON)
        .body(
            json!({ "password": "newpass123", "password_confirm": "newpass123" }).to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(reset.status(), Status::Ok);
    let reset_body: Value = reset.into_json().await.expect("payload");
    assert!(reset_body["token"].as_str().is_some());

    // Reset pair is cleared on consumption.
    let cleared: (Option<String>, Option<chrono::DateTime<chrono::Utc>>) = sqlx::query_as(
        "SELECT password_reset_token_hash, password_reset_expires_at FROM users WHERE email = 'ann@x.com'",
    )
    .fetch_one(db.pool())
    .await
    .expect("stored row");
    assert_eq!(cleared, (None, None));

    // Single use: the same raw token cannot be consumed again.
    let replay = client
        .patch(format!("/api/v1/users/reset-password/{raw_token}"))
        .header(ContentType::JSON)
        .body(
            json!({ "password": "another123", "password_confirm": "another123" }).to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(replay.status(), Status::BadRequest);

    // The new password took effect.
    assert_eq!(
        login(&client, "ann@x.com", "newpass123").await.status(),
        Status::Ok
    );

    // An expired window is rejected the same way as a bad token.
    let forgot_again = client
        .post("/api/v1/users/forgot-password")
        .header(ContentType::JSON)
        .body(json!({ "email": "ann@x.com" }).to_string())
        .dispatch()
        .await;
    assert_eq!(forgot_again.status(), Status::Ok);

    let second_url = mailer.last_url().expect("second reset mail");
    let second_token = second_url
        .rsplit_once("/reset-password/")
        .expect("reset url shape")
        .1
        .to_string();

    TestFixtures::new(db.pool())
        .expire_reset_token("ann@x.com")
        .await
        .expect("expire reset token");

    let expired = client
        .patch(format!("/api/v1/users/reset-password/{second_token}"))
        .header(ContentType::JSON)
        .body(
            json!({ "password": "another123", "password_confirm": "another123" }).to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(expired.status(), Status::BadRequest);

    db.close().await.expect("tear down");
}

#[tokio::test]
async fn delivery_failure_rolls_back_pending_reset() {
    let db = TestDatabase::new().await.expect("test database");
    let mailer = RecordingMailer::shared();
    let client = spawn_client(db.pool_clone(), mailer.clone()).await;

    signup(&client, "Ann", "ann@x.com", "secret12").await;

    mailer.fail_next();
    let forgot = client
        .post("/api/v1/users/forgot-password")
        .header(ContentType::JSON)
        .body(json!({ "email": "ann@x.com" }).to_string())
        .dispatch()
        .await;
    assert_eq!(forgot.status(), Status::InternalServerError);

    // No live secret may remain that the user has no way to retrieve.
    let pending: (Option<String>, Option<chrono::DateTime<chrono::Utc>>) = sqlx::query_as(
        "SELECT password_reset_token_hash, password_reset_expires_at FROM users WHERE email = 'ann@x.com'",
    )
    .fetch_one(db.pool())
    .await
    .expect("stored row");
    assert_eq!(pending, (None, None));

    db.close().await.expect("tear down");
}

#[tokio::test]
async fn admin_routes_are_role_gated() {
    let db = TestDatabase::new().await.expect("test database");
    let client = spawn_client(db.pool_clone(), RecordingMailer::shared()).await;

    let admin_hash = PasswordService::new()
        .expect("password service")
        .hash_password("adminpass123")
        .expect("hash");
    TestFixtures::new(db.pool())
        .insert_user("Root", "root@x.com", "admin", &admin_hash)
        .await
        .expect("seed admin");

    let user_token = signup(&client, "Ann", "ann@x.com", "secret12").await["token"]
        .as_str()
        .expect("token")
        .to_string();

    let admin_login = login(&client, "root@x.com", "adminpass123").await;
    assert_eq!(admin_login.status(), Status::Ok);
    let admin_body: Value = admin_login.into_json().await.expect("payload");
    assert_eq!(admin_body["user"]["role"], "admin");
    let admin_token = admin_body["token"].as_str().expect("token").to_string();

    // No token at all.
    let anonymous = client.get("/api/v1/auth/keys").dispatch().await;
    assert_eq!(anonymous.status(), Status::Unauthorized);

    // Authenticated but not authorized.
    let forbidden = client
        .get("/api/v1/auth/keys")
        .header(bearer(&user_token))
        .dispatch()
        .await;
    assert_eq!(forbidden.status(), Status::Forbidden);

    // Admin passes through.
    let allowed = client
        .get("/api/v1/auth/keys")
        .header(bearer(&admin_token))
        .dispatch()
        .await;
    assert_eq!(allowed.status(), Status::Ok);
    let keys: Value = allowed.into_json().await.expect("payload");
    assert_eq!(keys["algorithm"], "HS256");

    db.close().await.expect("tear down");
}

#[tokio::test]
async fn logout_replaces_session_cookie_with_sentinel() {
    let db = TestDatabase::new().await.expect("test database");
    let client = spawn_client(db.pool_clone(), RecordingMailer::shared()).await;

    signup(&client, "Ann", "ann@x.com", "secret12").await;

    let logout = client.post("/api/v1/users/logout").dispatch().await;
    assert_eq!(logout.status(), Status::Ok);

    let cookie = logout
        .cookies()
        .get("tourbook_session")
        .expect("sentinel cookie set");
    assert_eq!(cookie.value(), "loggedout");

    db.close().await.expect("tear down");
}

#[tokio::test]
async fn deactivated_subjects_are_invisible_to_session_operations() {
    let db = TestDatabase::new().await.expect("test database");
    let client = spawn_client(db.pool_clone(), RecordingMailer::shared()).await;

    let payload = signup(&client, "Ann", "ann@x.com", "secret12").await;
    let token = payload["token"].as_str().expect("token").to_string();
    let id: uuid::Uuid = serde_json::from_value(payload["user"]["id"].clone()).expect("user id");

    TestFixtures::new(db.pool())
        .deactivate_user(id)
        .await
        .expect("deactivate");

    // The record is gone as far as the session core is concerned: the
    // still-unexpired token is stale, logins and resets find nothing.
    let me = client
        .get("/api/v1/users/me")
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(me.status(), Status::Unauthorized);

    assert_eq!(
        login(&client, "ann@x.com", "secret12").await.status(),
        Status::Unauthorized
    );

    let forgot = client
        .post("/api/v1/users/forgot-password")
        .header(ContentType::JSON)
        .body(json!({ "email": "ann@x.com" }).to_string())
        .dispatch()
        .await;
    assert_eq!(forgot.status(), Status::NotFound);

    db.close().await.expect("tear down");
}
