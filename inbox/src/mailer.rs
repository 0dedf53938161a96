const BASE_DELAY: u64 = 500;
const MAX_RETRIES: u32 = 3;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use url::Url;

use crate::config::MailerConfig;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum MailError {
    #[error("mail request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("mail API rejected the message with status {0}")]
    Rejected(StatusCode),
    #[error("mail API unavailable")]
    RetriesExceeded,
}

/// The one email this service sends: the sign-up verification code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationEmail {
    pub to: String,
    pub username: String,
    pub code: String,
}

impl VerificationEmail {
    pub fn subject(&self) -> &'static str {
        "Umessage | Verification Code"
    }

    pub fn text(&self) -> String {
        format!(
            "Hello {},\n\n\
             Thank you for registering. Please use the following verification code \
             to complete your registration:\n\n{}\n\n\
             If you did not request this code, please ignore this email.\n",
            self.username, self.code
        )
    }

    pub fn html(&self) -> String {
        format!(
            "<p>Hello {},</p>\
             <p>Thank you for registering. Please use the following verification code \
             to complete your registration:</p>\
             <p><strong>{}</strong></p>\
             <p>If you did not request this code, please ignore this email.</p>",
            self.username, self.code
        )
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, email: &VerificationEmail) -> Result<(), MailError>;
}

pub fn build_mailer(config: &MailerConfig) -> Result<Arc<dyn Mailer>, MailError> {
    match config {
        MailerConfig::Log => Ok(Arc::new(LogMailer {})),
        MailerConfig::Http {
            url,
            api_key,
            from,
            timeout_secs,
        } => Ok(Arc::new(HttpMailer::new(
            url.clone(),
            api_key.clone(),
            from.clone(),
            Duration::from_secs(*timeout_secs),
        )?)),
    }
}

/// Development mailer: the code ends up in the service log.
pub struct LogMailer {}

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification(&self, email: &VerificationEmail) -> Result<(), MailError> {
        warn!("Log mailer in use, verification emails are not delivered");
        info!(
            to = %email.to,
            username = %email.username,
            code = %email.code,
            "verification email"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: String,
    html: String,
}

/// Sends through a transactional email API that accepts
/// `POST {from, to, subject, text, html}` with a bearer key.
pub struct HttpMailer {
    client: reqwest::Client,
    url: Url,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(url: Url, api_key: String, from: String, timeout: Duration) -> Result<Self, MailError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpMailer {
            client,
            url,
            api_key,
            from,
        })
    }
}

fn backoff(retries: u32) -> Duration {
    Duration::from_millis(BASE_DELAY * 2_u64.pow(retries))
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_verification(&self, email: &VerificationEmail) -> Result<(), MailError> {
        const RETRIABLE_STATUS_CODES: &[StatusCode] = &[
            StatusCode::TOO_MANY_REQUESTS,     // 429
            StatusCode::INTERNAL_SERVER_ERROR, // 500
            StatusCode::BAD_GATEWAY,           // 502
            StatusCode::SERVICE_UNAVAILABLE,   // 503
            StatusCode::GATEWAY_TIMEOUT,       // 504
        ];

        let body = SendEmailRequest {
            from: &self.from,
            to: [&email.to],
            subject: email.subject(),
            text: email.text(),
            html: email.html(),
        };

        let mut retries = 0;
        loop {
            let sent = self
                .client
                .post(self.url.clone())
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(err) if (err.is_timeout() || err.is_connect()) && retries < MAX_RETRIES => {
                    let delay = backoff(retries);
                    warn!("Mail request failed: {err}, retrying in {}ms", delay.as_millis());
                    sleep(delay).await;
                    retries += 1;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            if !RETRIABLE_STATUS_CODES.contains(&status) {
                return Err(MailError::Rejected(status));
            }
            if retries >= MAX_RETRIES {
                return Err(MailError::RetriesExceeded);
            }

            // Backoff between retries
            let delay = backoff(retries);
            warn!("Mail API returned {status}, retrying in {}ms", delay.as_millis());
            sleep(delay).await;
            retries += 1;
        }
    }
}
