use async_trait::async_trait;
use reqwest::Client;

use crate::{DeliveryChannel, DeliveryError, DeliveryMessage};

pub struct ResendEmailAdapter {
    client: Client,
    api_key: String,
    from: String,
}

impl ResendEmailAdapter {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self { client: Client::new(), api_key: api_key.into(), from: from.into() }
    }
}

#[async_trait]
impl DeliveryChannel for ResendEmailAdapter {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, message: DeliveryMessage<'_>) -> Result<(), DeliveryError> {
        if message.recipient.is_empty() {
            return Err(DeliveryError::NoRecipient);
        }

        let payload = serde_json::json!({
            "from": self.from,
            "to": message.recipient,
            "subject": message.title,
            "text": message.body,
        });

        self.client
            .post("https://api.resend.com/emails")
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| DeliveryError::Transport(err.to_string()))?
            .error_for_status()
            .map_err(|err| DeliveryError::Transport(err.to_string()))?;

        Ok(())
    }
}
