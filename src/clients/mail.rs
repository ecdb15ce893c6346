use crate::errors::ServiceError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::instrument;

/// A single outbound transactional email.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailSender: Send + Sync {
    /// Sends one email; returns the provider's delivery id. Callers in the
    /// fulfillment pipeline log failures and continue — a lost credentials
    /// email is recoverable through support, a lost entitlement is not.
    async fn send(&self, email: OutboundEmail) -> Result<String, ServiceError>;
}

/// Resend-style transactional mail REST client.
#[derive(Debug, Clone)]
pub struct ResendMailer {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    from: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

impl ResendMailer {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        from: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            from: from.into(),
        })
    }
}

#[async_trait]
impl MailSender for ResendMailer {
    #[instrument(skip(self, email), fields(to = %email.to))]
    async fn send(&self, email: OutboundEmail) -> Result<String, ServiceError> {
        let body = json!({
            "from": self.from,
            "to": [email.to],
            "subject": email.subject,
            "html": email.html,
        });

        let response = self
            .http
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::MailDelivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ServiceError::MailDelivery(format!(
                "mail API returned status {}",
                response.status()
            )));
        }

        let sent: SendResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::MailDelivery(format!("mail API response: {}", e)))?;

        Ok(sent.id)
    }
}
