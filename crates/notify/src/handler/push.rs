//! Push delivery via an HTTP provider.

use std::time::Duration;

use async_trait::async_trait;

use crate::handler::{ChannelHandler, DeliveryError, DispatchRequest};

/// HTTP request timeout for a single provider call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends billing push notifications through an HTTP provider.
pub struct PushHandler {
    client: reqwest::Client,
    provider_url: String,
}

impl PushHandler {
    /// Create a handler posting to the given provider URL.
    pub fn new(provider_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self {
            client,
            provider_url: provider_url.into(),
        }
    }

    /// Load the provider URL from `PUSH_PROVIDER_URL`, if set.
    pub fn from_env() -> Option<Self> {
        std::env::var("PUSH_PROVIDER_URL").ok().map(Self::new)
    }
}

#[async_trait]
impl ChannelHandler for PushHandler {
    async fn deliver(
        &self,
        request: &DispatchRequest,
        trace_id: &str,
    ) -> Result<(), DeliveryError> {
        // The push recipient is the synthetic `user:{id}` tag; the
        // provider resolves it to device tokens.
        let payload = serde_json::json!({
            "target": request.recipient,
            "user_id": request.user_id,
            "body": request.content,
            "reference": request.bill_id,
        });

        let response = self
            .client
            .post(&self.provider_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DeliveryError::Rejected(format!(
                "Push provider returned HTTP {}",
                response.status().as_u16()
            )));
        }

        tracing::info!(
            trace_id,
            bill_id = request.bill_id,
            user_id = request.user_id,
            "Billing push sent"
        );
        Ok(())
    }
}
