use async_trait::async_trait;
use reqwest::Client;

use crate::{DeliveryChannel, DeliveryError, DeliveryMessage};

/// Sends a Discord direct message: opens a DM channel with the recipient's
/// Discord user id, then posts into it.
pub struct DiscordDmAdapter {
    client: Client,
    bot_token: String,
}

impl DiscordDmAdapter {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self { client: Client::new(), bot_token: bot_token.into() }
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token)
    }
}

#[async_trait]
impl DeliveryChannel for DiscordDmAdapter {
    fn name(&self) -> &'static str {
        "chat_dm"
    }

    async fn send(&self, message: DeliveryMessage<'_>) -> Result<(), DeliveryError> {
        if message.recipient.is_empty() {
            return Err(DeliveryError::NoRecipient);
        }

        let dm_channel: serde_json::Value = self
            .client
            .post("https://discord.com/api/v10/users/@me/channels")
            .header("Authorization", self.auth_header())
            .json(&serde_json::json!({ "recipient_id": message.recipient }))
            .send()
            .await
            .map_err(|err| DeliveryError::Transport(err.to_string()))?
            .json()
            .await
            .map_err(|err| DeliveryError::Transport(err.to_string()))?;

        let channel_id = dm_channel["id"]
            .as_str()
            .ok_or_else(|| DeliveryError::Transport("missing dm channel id".into()))?;

        self.client
            .post(format!("https://discord.com/api/v10/channels/{}/messages", channel_id))
            .header("Authorization", self.auth_header())
            .json(&serde_json::json!({ "content": format!("**{}**\n{}", message.title, message.body) }))
            .send()
            .await
            .map_err(|err| DeliveryError::Transport(err.to_string()))?
            .error_for_status()
            .map_err(|err| DeliveryError::Transport(err.to_string()))?;

        Ok(())
    }
}
