use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::SmtpConfig;

/// Outbound email collaborator. Callers treat every send as fire-and-forget.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_verification_email(
        &self,
        to_email: &str,
        verification_token: &str,
    ) -> Result<(), anyhow::Error>;

    async fn send_password_reset_email(
        &self,
        to_email: &str,
        reset_token: &str,
    ) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct EmailService {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    base_url: String,
}

impl EmailService {
    pub fn new(config: &SmtpConfig) -> Result<Self, anyhow::Error> {
        let mailer = if config.username.is_empty() {
            // local relay without auth or TLS (mailpit, mailhog)
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
                .timeout(Some(Duration::from_secs(10)))
                .build()
        } else {
            let creds = Credentials::new(config.username.clone(), config.password.clone());
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
                .credentials(creds)
                .port(config.port)
                .timeout(Some(Duration::from_secs(10)))
                .build()
        };

        tracing::info!(host = %config.host, port = config.port, "Email service initialized");

        Ok(Self {
            mailer,
            from_email: config.from_address.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        plain_body: String,
        html_body: String,
    ) -> Result<(), anyhow::Error> {
        let email = Message::builder()
            .from(self.from_email.parse()?)
            .to(to_email.parse()?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )?;

        self.mailer.send(email).await.map_err(|e| {
            tracing::error!(error = %e, subject = %subject, "Failed to send email");
            anyhow::anyhow!("SMTP send failed: {}", e)
        })?;

        tracing::info!(subject = %subject, "Email sent");
        Ok(())
    }
}

#[async_trait]
impl EmailProvider for EmailService {
    async fn send_verification_email(
        &self,
        to_email: &str,
        verification_token: &str,
    ) -> Result<(), anyhow::Error> {
        let link = format!("{}/verify-email?token={}", self.base_url, verification_token);

        let html_body = format!(
            r#"<html>
  <body style="font-family: Arial, sans-serif;">
    <h2>Verify your email</h2>
    <p><a href="{link}">Verify Email</a></p>
    <p style="color: #666; font-size: 12px;">This link expires in 24 hours.</p>
  </body>
</html>"#
        );
        let plain_body = format!("Verify your email:\n\n{link}\n\nThis link expires in 24 hours.");

        self.send_email(to_email, "Verify Your Email Address", plain_body, html_body)
            .await
    }

    async fn send_password_reset_email(
        &self,
        to_email: &str,
        reset_token: &str,
    ) -> Result<(), anyhow::Error> {
        let link = format!("{}/reset-password?token={}", self.base_url, reset_token);

        let html_body = format!(
            r#"<html>
  <body style="font-family: Arial, sans-serif;">
    <h2>Password reset</h2>
    <p>We received a request to reset your password.</p>
    <p><a href="{link}">Reset Password</a></p>
    <p style="color: #666; font-size: 12px;">
      This link expires in 1 hour. If you didn't request this, ignore this email.
    </p>
  </body>
</html>"#
        );
        let plain_body = format!(
            "We received a request to reset your password:\n\n{link}\n\nThis link expires in 1 hour."
        );

        self.send_email(to_email, "Reset Your Password", plain_body, html_body)
            .await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentEmail {
    Verification { to: String, token: String },
    PasswordReset { to: String, token: String },
}

/// Records messages instead of sending them. Can be told to fail.
#[derive(Default)]
pub struct MockEmailService {
    sent: Mutex<Vec<SentEmail>>,
    fail: bool,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn record(&self, email: SentEmail) -> Result<(), anyhow::Error> {
        if self.fail {
            return Err(anyhow::anyhow!("mock email failure"));
        }
        self.sent
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock email mutex poisoned: {}", e))?
            .push(email);
        Ok(())
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_verification_email(
        &self,
        to_email: &str,
        verification_token: &str,
    ) -> Result<(), anyhow::Error> {
        self.record(SentEmail::Verification {
            to: to_email.to_string(),
            token: verification_token.to_string(),
        })
    }

    async fn send_password_reset_email(
        &self,
        to_email: &str,
        reset_token: &str,
    ) -> Result<(), anyhow::Error> {
        self.record(SentEmail::PasswordReset {
            to: to_email.to_string(),
            token: reset_token.to_string(),
        })
    }
}
