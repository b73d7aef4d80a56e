use std::time::Duration;

use application::{PushError, PushPublisher};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde_json::Value;

use super::PushEnvelope;

/// 通过 Redis PUBLISH 推送，频道名与推送频道一致
#[derive(Clone)]
pub struct RedisPushPublisher {
    connection: ConnectionManager,
    timeout: Duration,
}

impl RedisPushPublisher {
    pub fn new(connection: ConnectionManager, timeout: Duration) -> Self {
        Self {
            connection,
            timeout,
        }
    }
}

#[async_trait]
impl PushPublisher for RedisPushPublisher {
    async fn publish(&self, channel: &str, event: &str, payload: &Value) -> Result<(), PushError> {
        let message = serde_json::to_string(&PushEnvelope {
            channel,
            event,
            data: payload,
        })
        .map_err(|err| PushError::failed(format!("序列化推送消息失败: {err}")))?;

        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("PUBLISH");
        cmd.arg(channel).arg(message);
        let receivers = tokio::time::timeout(self.timeout, cmd.query_async::<u64>(&mut conn))
            .await
            .map_err(|_| PushError::Timeout)?
            .map_err(|err| PushError::failed(err.to_string()))?;

        tracing::debug!(channel, event, receivers, "推送已发布");
        Ok(())
    }
}
