use application::{PushError, PushPublisher};
use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Default, Clone)]
pub struct LoggingPushPublisher;

#[async_trait]
impl PushPublisher for LoggingPushPublisher {
    async fn publish(&self, channel: &str, event: &str, payload: &Value) -> Result<(), PushError> {
        tracing::info!(channel, event, %payload, "推送事件");
        Ok(())
    }
}
