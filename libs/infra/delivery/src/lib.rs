//! Delivery channel adapters. Each adapter is a thin client over a third
//! party transport (Resend for email, Discord for chat); a `LoggingChannel`
//! records without making a network call, used in development and tests.

mod chat_channel;
mod chat_dm;
mod email;
mod logging;

pub use chat_channel::DiscordChannelAdapter;
pub use chat_dm::DiscordDmAdapter;
pub use email::ResendEmailAdapter;
pub use logging::LoggingChannel;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery transport error: {0}")]
    Transport(String),
    #[error("recipient not configured for this channel")]
    NoRecipient,
}

pub struct DeliveryMessage<'a> {
    pub recipient: &'a str,
    pub title: &'a str,
    pub body: &'a str,
}

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, message: DeliveryMessage<'_>) -> Result<(), DeliveryError>;
}
