//! SMS delivery via an HTTP gateway.
//!
//! [`SmsHandler`] POSTs a JSON payload to the configured gateway URL.
//! A non-2xx response is a provider rejection; connection-level failures
//! and timeouts are transport errors.

use std::time::Duration;

use async_trait::async_trait;

use crate::handler::{ChannelHandler, DeliveryError, DispatchRequest};

/// HTTP request timeout for a single gateway call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends billing SMS messages through an HTTP gateway.
pub struct SmsHandler {
    client: reqwest::Client,
    gateway_url: String,
}

impl SmsHandler {
    /// Create a handler posting to the given gateway URL.
    pub fn new(gateway_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self {
            client,
            gateway_url: gateway_url.into(),
        }
    }

    /// Load the gateway URL from `SMS_GATEWAY_URL`, if set.
    pub fn from_env() -> Option<Self> {
        std::env::var("SMS_GATEWAY_URL").ok().map(Self::new)
    }
}

#[async_trait]
impl ChannelHandler for SmsHandler {
    async fn deliver(
        &self,
        request: &DispatchRequest,
        trace_id: &str,
    ) -> Result<(), DeliveryError> {
        let payload = serde_json::json!({
            "to": request.recipient,
            "text": request.content,
            "reference": request.bill_id,
        });

        let response = self
            .client
            .post(&self.gateway_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DeliveryError::Rejected(format!(
                "SMS gateway returned HTTP {}",
                response.status().as_u16()
            )));
        }

        tracing::info!(
            trace_id,
            bill_id = request.bill_id,
            to = %request.recipient,
            "Billing SMS sent"
        );
        Ok(())
    }
}
