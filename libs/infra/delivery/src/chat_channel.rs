use async_trait::async_trait;
use reqwest::Client;

use crate::{DeliveryChannel, DeliveryError, DeliveryMessage};

/// Posts into a configured Discord channel (the recipient is the channel id).
pub struct DiscordChannelAdapter {
    client: Client,
    bot_token: String,
}

impl DiscordChannelAdapter {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self { client: Client::new(), bot_token: bot_token.into() }
    }
}

#[async_trait]
impl DeliveryChannel for DiscordChannelAdapter {
    fn name(&self) -> &'static str {
        "chat_channel"
    }

    async fn send(&self, message: DeliveryMessage<'_>) -> Result<(), DeliveryError> {
        if message.recipient.is_empty() {
            return Err(DeliveryError::NoRecipient);
        }

        self.client
            .post(format!("https://discord.com/api/v10/channels/{}/messages", message.recipient))
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(&serde_json::json!({ "content": format!("**{}**\n{}", message.title, message.body) }))
            .send()
            .await
            .map_err(|err| DeliveryError::Transport(err.to_string()))?
            .error_for_status()
            .map_err(|err| DeliveryError::Transport(err.to_string()))?;

        Ok(())
    }
}
