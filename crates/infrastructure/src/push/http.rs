use std::time::Duration;

use application::{PushError, PushPublisher};
use async_trait::async_trait;
use data_encoding::HEXLOWER;
use reqwest::Client;
use ring::hmac;
use serde_json::Value;

use super::PushEnvelope;

/// 请求体的 HMAC-SHA256 签名头
pub const SIGNATURE_HEADER: &str = "x-push-signature";

/// 调用托管推送服务的 REST 接口
#[derive(Clone)]
pub struct HttpPushPublisher {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    signing_key: Option<hmac::Key>,
}

impl HttpPushPublisher {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        api_secret: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, PushError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| PushError::failed(format!("创建 HTTP 客户端失败: {err}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            signing_key: api_secret
                .map(|secret| hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes())),
        })
    }

    fn sign(&self, body: &[u8]) -> Option<String> {
        self.signing_key
            .as_ref()
            .map(|key| HEXLOWER.encode(hmac::sign(key, body).as_ref()))
    }
}

#[async_trait]
impl PushPublisher for HttpPushPublisher {
    async fn publish(&self, channel: &str, event: &str, payload: &Value) -> Result<(), PushError> {
        let body = serde_json::to_vec(&PushEnvelope {
            channel,
            event,
            data: payload,
        })
        .map_err(|err| PushError::failed(format!("序列化推送消息失败: {err}")))?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        if let Some(signature) = self.sign(&body) {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request.body(body).send().await.map_err(|err| {
            if err.is_timeout() {
                PushError::Timeout
            } else {
                PushError::failed(err.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PushError::failed(format!("推送服务返回 {status}")));
        }

        tracing::debug!(channel, event, "推送已发送");
        Ok(())
    }
}
