//! In-memory [`EmailSender`]: records every message instead of calling a
//! real provider, so tests can assert on what was sent.

use async_trait::async_trait;
use tasker_shared::error::TaskerResult;
use tasker_shared::ports::{EmailMessage, EmailSender};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct InMemoryEmailSender {
    sent: Mutex<Vec<EmailMessage>>,
}

impl InMemoryEmailSender {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl EmailSender for InMemoryEmailSender {
    async fn send(&self, message: EmailMessage) -> TaskerResult<String> {
        let id = format!("in-memory-{}", uuid::Uuid::new_v4());
        self.sent.lock().await.push(message);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_every_send() {
        let sender = InMemoryEmailSender::new();
        sender
            .send(EmailMessage {
                to: "a@example.com".to_string(),
                subject: "hi".to_string(),
                template: "generic".to_string(),
                data: serde_json::json!({}),
            })
            .await
            .unwrap();

        assert_eq!(sender.sent().await.len(), 1);
    }
}
