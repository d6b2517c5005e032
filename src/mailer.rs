//! Outbound email. The `Mailer` trait keeps transport behind a seam so
//! handlers stay testable; production uses an SMTP transport, local
//! development points at a sandbox relay, and tests capture messages
//! in memory.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::Mailbox,
    transport::smtp::authentication::Credentials,
};

use crate::{
    config::{AppConfig, Env},
    error::AppError,
};

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError>;
}

pub type MailerState = Arc<dyn Mailer>;

/// SmtpMailer
///
/// lettre-backed transport. Production requires TLS to the configured relay;
/// local uses a plain connection so sandbox transports like Mailtrap work.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let from: Mailbox = config
            .email_from
            .parse()
            .map_err(|e| AppError::Internal(format!("invalid EMAIL_FROM mailbox: {e}")))?;

        let credentials =
            Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());

        let transport = match config.env {
            Env::Production => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
                .map_err(|e| AppError::Internal(format!("smtp relay setup failed: {e}")))?
                .credentials(credentials)
                .build(),
            Env::Local => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
                    .port(config.smtp_port)
                    .credentials(credentials)
                    .build()
            }
        };

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| AppError::Validation(format!("invalid recipient address: {e}")))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| AppError::Internal(format!("failed to build email: {e}")))?;

        self.transport.send(message).await.map_err(|e| {
            tracing::error!(error = %e, "smtp send failed");
            AppError::ExternalService(
                "There was an error sending the email. Try again later!".to_string(),
            )
        })?;
        Ok(())
    }
}

/// A captured outbound message.
#[derive(Debug, Clone)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// MockMailer
///
/// Captures messages in memory. Flip `fail` to simulate a transport outage
/// (exercises the token rollback paths).
#[derive(Default)]
pub struct MockMailer {
    pub sent: std::sync::Mutex<Vec<SentMail>>,
    pub fail: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(AppError::ExternalService(
                "There was an error sending the email. Try again later!".to_string(),
            ));
        }
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

// --- Message Bodies ---

pub fn verification_email(name: &str, verify_url: &str) -> String {
    format!(
        "Hi {name},\n\n\
         Welcome! Please confirm your email address by visiting the link below \
         within the next 24 hours:\n\n{verify_url}\n\n\
         If you didn't create an account, please ignore this email."
    )
}

pub fn password_reset_email(name: &str, reset_url: &str) -> String {
    format!(
        "Hi {name},\n\n\
         Forgot your password? Submit a request with your new password to:\n\n\
         {reset_url}\n\n\
         This link is valid for 10 minutes. If you didn't forget your password, \
         please ignore this email."
    )
}
