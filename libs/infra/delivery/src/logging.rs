use async_trait::async_trait;
use tracing::info;

use crate::{DeliveryChannel, DeliveryError, DeliveryMessage};

/// Records a delivery without making an outbound call. Used in development
/// and by test harnesses standing in for unconfigured channels.
pub struct LoggingChannel {
    channel_name: &'static str,
}

impl LoggingChannel {
    pub fn new(channel_name: &'static str) -> Self {
        Self { channel_name }
    }
}

#[async_trait]
impl DeliveryChannel for LoggingChannel {
    fn name(&self) -> &'static str {
        self.channel_name
    }

    async fn send(&self, message: DeliveryMessage<'_>) -> Result<(), DeliveryError> {
        info!(
            channel = self.channel_name,
            recipient = message.recipient,
            title = message.title,
            "logged notification delivery"
        );
        Ok(())
    }
}
