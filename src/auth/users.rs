//! Credential store adapter: the only code that reads or writes the `users`
//! table on behalf of session operations. Inactive records are invisible to
//! every lookup here, and all password mutations go through this adapter so
//! `password_changed_at` and the reset-token pair stay consistent.

use chrono::{DateTime, Duration, Utc};
use rocket_db_pools::sqlx::{self, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::auth::responses::{Role, UserSummary};
use crate::auth::{AuthError, AuthResult};

const USER_COLUMNS: &str = "id, name, email, role, password_hash, password_changed_at, \
     password_reset_token_hash, password_reset_expires_at, active";

/// A full credential record as stored. Never serialized; API responses go
/// through [`UserRecord::summary`].
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub password_hash: String,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub password_reset_token_hash: Option<String>,
    pub password_reset_expires_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl UserRecord {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let role_str: String = row.try_get("role")?;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            role: Role::from_str(&role_str),
            password_hash: row.try_get("password_hash")?,
            password_changed_at: row.try_get("password_changed_at")?,
            password_reset_token_hash: row.try_get("password_reset_token_hash")?,
            password_reset_expires_at: row.try_get("password_reset_expires_at")?,
            active: row.try_get("active")?,
        })
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
        }
    }

    /// True when the password was changed after a token with the given
    /// issue time (unix seconds) was minted. Records that never changed
    /// their password cannot invalidate anything.
    pub fn changed_password_after(&self, token_issued_at: i64) -> bool {
        match self.password_changed_at {
            Some(changed_at) => token_issued_at < changed_at.timestamp(),
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Clone)]
pub struct UserStore {
    pool: PgPool,
}

impl UserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a fresh record with role `user`. The unique index on
    /// `lower(email)` turns a duplicate into [`AuthError::DuplicateEmail`].
    pub async fn create(&self, new_user: NewUser) -> AuthResult<UserRecord> {
        let sql = format!(
            "INSERT INTO users (name, email, password_hash) VALUES ($1, lower($2), $3) \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&new_user.name)
            .bind(&new_user.email)
            .bind(&new_user.password_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(map_unique_violation)?;

        Ok(UserRecord::from_row(&row)?)
    }

    pub async fn find_by_email(&self, email: &str) -> AuthResult<Option<UserRecord>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1) AND active"
        );
        let row = sqlx::query(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(UserRecord::from_row).transpose().map_err(AuthError::from)
    }

    pub async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<UserRecord>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND active");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;

        row.as_ref().map(UserRecord::from_row).transpose().map_err(AuthError::from)
    }

    /// Install a pending reset: both fields set together, replacing any
    /// previous outstanding secret for the record.
    pub async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<()> {
        sqlx::query(
            "UPDATE users SET password_reset_token_hash = $1, password_reset_expires_at = $2 \
             WHERE id = $3 AND active",
        )
        .bind(token_hash)
        .bind(expires_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Roll back a pending reset, e.g. when the email carrying the raw
    /// secret could not be delivered.
    pub async fn clear_reset_token(&self, id: Uuid) -> AuthResult<()> {
        sqlx::query(
            "UPDATE users SET password_reset_token_hash = NULL, password_reset_expires_at = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Complete a password reset in one conditional update: the row must
    /// still hold this token hash with an unexpired window, and the same
    /// statement installs the new password and clears the pair. Of two
    /// racing attempts against the same secret, exactly one matches; the
    /// loser observes `None`.
    pub async fn consume_reset_token(
        &self,
        token_hash: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<Option<UserRecord>> {
        let sql = format!(
            "UPDATE users SET password_hash = $2, password_changed_at = $3, \
             password_reset_token_hash = NULL, password_reset_expires_at = NULL \
             WHERE password_reset_token_hash = $1 AND password_reset_expires_at > $4 AND active \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(token_hash)
            .bind(new_password_hash)
            .bind(backdated(now))
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(UserRecord::from_row).transpose().map_err(AuthError::from)
    }

    /// Replace the password of an authenticated subject. Any pending reset
    /// secret is cleared along with it; it could only move the password to
    /// a state the subject no longer expects.
    pub async fn update_password(
        &self,
        id: Uuid,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<()> {
        sqlx::query(
            "UPDATE users SET password_hash = $1, password_changed_at = $2, \
             password_reset_token_hash = NULL, password_reset_expires_at = NULL \
             WHERE id = $3 AND active",
        )
        .bind(new_password_hash)
        .bind(backdated(now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Password mutations record `password_changed_at` one second in the past
/// so the session token minted in the same request (same-second `iat`) is
/// not immediately stale.
fn backdated(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::seconds(1)
}

fn map_unique_violation(err: sqlx::Error) -> AuthError {
    match &err {
        sqlx::Error::Database(db_err)
            if db_err.code().as_deref() == Some("23505") =>
        {
            AuthError::DuplicateEmail
        }
        _ => AuthError::from(err),
    }
}
