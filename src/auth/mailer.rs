//! Outbound notification channel. Delivery is fire-and-report: errors
//! bubble to the caller (which owns any rollback), there is no retry here.

use serde::Serialize;

use crate::auth::users::UserRecord;
use crate::auth::{AuthConfig, AuthError, AuthResult};

#[rocket::async_trait]
pub trait Mailer: Send + Sync {
    async fn send_welcome(&self, user: &UserRecord, account_url: &str) -> AuthResult<()>;

    async fn send_password_reset(&self, user: &UserRecord, reset_url: &str) -> AuthResult<()>;
}

/// Build the mailer configured for this deployment: an HTTP relay when a
/// webhook endpoint is configured, otherwise log-only delivery for local
/// development.
pub fn from_config(config: &AuthConfig) -> Box<dyn Mailer> {
    match &config.mail_webhook_url {
        Some(endpoint) => Box::new(HttpMailer::new(endpoint.clone(), config.mail_from.clone())),
        None => {
            log::warn!("TOURBOOK_MAIL_WEBHOOK_URL not set; outbound mail will only be logged");
            Box::new(LogMailer)
        }
    }
}

#[derive(Debug, Serialize)]
struct OutboundMail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: String,
}

/// Posts each message as JSON to a relay endpoint that owns templating and
/// actual SMTP delivery.
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    from: String,
}

impl HttpMailer {
    pub fn new(endpoint: String, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            from,
        }
    }

    async fn post(&self, to: &str, subject: &str, text: String) -> AuthResult<()> {
        let payload = OutboundMail {
            from: &self.from,
            to,
            subject,
            text,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|err| AuthError::Delivery(format!("mail relay unreachable: {err}")))?;

        if !response.status().is_success() {
            return Err(AuthError::Delivery(format!(
                "mail relay returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[rocket::async_trait]
impl Mailer for HttpMailer {
    async fn send_welcome(&self, user: &UserRecord, account_url: &str) -> AuthResult<()> {
        let text = format!(
            "Welcome to Tourbook, {}!\n\nManage your account at {account_url}.\n",
            first_name(&user.name)
        );
        self.post(&user.email, "Welcome to Tourbook", text).await
    }

    async fn send_password_reset(&self, user: &UserRecord, reset_url: &str) -> AuthResult<()> {
        let text = format!(
            "Hi {},\n\nSubmit a PATCH request with your new password to:\n{reset_url}\n\n\
             The link is valid for 10 minutes. If you did not request a password \
             reset, ignore this email.\n",
            first_name(&user.name)
        );
        self.post(
            &user.email,
            "Your password reset token (valid for 10 minutes)",
            text,
        )
        .await
    }
}

/// Development mailer: messages are logged, never sent.
pub struct LogMailer;

#[rocket::async_trait]
impl Mailer for LogMailer {
    async fn send_welcome(&self, user: &UserRecord, account_url: &str) -> AuthResult<()> {
        log::info!("welcome mail for {} (account url {account_url})", user.email);
        Ok(())
    }

    async fn send_password_reset(&self, user: &UserRecord, reset_url: &str) -> AuthResult<()> {
        log::info!("password reset mail for {} ({reset_url})", user.email);
        Ok(())
    }
}

fn first_name(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or(name)
}
