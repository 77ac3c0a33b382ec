use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

const SEND_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    UserWelcome { user_id: i64, activation_token: String },
}

impl Message {
    pub fn template(&self) -> &'static str {
        match self {
            Message::UserWelcome { .. } => "user_welcome",
        }
    }
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

/// Outbound mail. Delivery itself is pluggable; the server only hands messages over.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, recipient: &str, message: &Message) -> Result<(), MailError>;
}

/// Writes each dispatch to the log instead of an SMTP relay.
pub struct LogMailer {
    sender: String,
}

impl LogMailer {
    pub fn new(sender: impl Into<String>) -> Self {
        Self { sender: sender.into() }
    }
}

impl Default for LogMailer {
    fn default() -> Self {
        Self::new("Greenlight <no-reply@greenlight.local>")
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, recipient: &str, message: &Message) -> Result<(), MailError> {
        let Message::UserWelcome { user_id, .. } = message;
        tracing::info!(
            from = %self.sender,
            to = %recipient,
            user_id,
            template = message.template(),
            "mail dispatched"
        );
        Ok(())
    }
}

/// Send with a fixed number of attempts, pausing between failures.
pub async fn deliver(mailer: &dyn Mailer, recipient: &str, message: &Message) -> Result<(), MailError> {
    let mut attempt = 1;
    loop {
        match mailer.send(recipient, message).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < SEND_ATTEMPTS => {
                tracing::warn!(attempt, error = %err, "mail delivery failed, retrying");
                attempt += 1;
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(err) => return Err(err),
        }
    }
}
