use crate::errors::ServiceError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

/// Fixed purchase-type tag carried in session metadata so the webhook can
/// recognize storefront checkouts.
pub const PURCHASE_TYPE_TAG: &str = "multi_course_purchase";

/// One line item of a hosted checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLineItem {
    pub course_id: String,
    pub name: String,
    pub description: String,
    pub image: Option<String>,
    /// Unit amount in minor currency units (cents)
    pub unit_amount_minor: i64,
    /// "Standard" or "Loyalty"
    pub pricing_tier: String,
}

/// Request for a remote, time-bounded checkout session. The only local side
/// effect of submitting one is nothing at all; the session lives at the
/// processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    pub line_items: Vec<CheckoutLineItem>,
    pub currency: String,
    /// Comma-joined course-id set, echoed back in the completion webhook
    pub metadata_course_ids: String,
    pub client_reference_id: Option<String>,
    /// Pre-fill for the payer; the processor collects it itself when absent
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

/// Hosted checkout handle returned by the processor.
#[derive(Debug, Clone)]
pub struct HostedCheckout {
    pub session_id: String,
    pub redirect_url: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Creates a hosted checkout session; returns the redirect URL the
    /// browser should be sent to. Single attempt, bounded timeout.
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<HostedCheckout, ServiceError>;
}

/// Stripe-style hosted checkout client (form-encoded REST API).
#[derive(Debug, Clone)]
pub struct StripeCheckoutClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl StripeCheckoutClient {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            secret_key: secret_key.into(),
        })
    }

    /// Flattens the session request into the processor's form encoding.
    fn form_params(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("payment_method_types[0]".into(), "card".into()),
            ("success_url".into(), request.success_url.clone()),
            ("cancel_url".into(), request.cancel_url.clone()),
            (
                "metadata[course_ids]".into(),
                request.metadata_course_ids.clone(),
            ),
            ("metadata[type]".into(), PURCHASE_TYPE_TAG.into()),
        ];

        for (i, item) in request.line_items.iter().enumerate() {
            let prefix = format!("line_items[{}]", i);
            params.push((format!("{}[quantity]", prefix), "1".into()));
            params.push((
                format!("{}[price_data][currency]", prefix),
                request.currency.clone(),
            ));
            params.push((
                format!("{}[price_data][unit_amount]", prefix),
                item.unit_amount_minor.to_string(),
            ));
            params.push((
                format!("{}[price_data][product_data][name]", prefix),
                item.name.clone(),
            ));
            params.push((
                format!("{}[price_data][product_data][description]", prefix),
                item.description.clone(),
            ));
            if let Some(image) = &item.image {
                params.push((
                    format!("{}[price_data][product_data][images][0]", prefix),
                    image.clone(),
                ));
            }
            params.push((
                format!("{}[price_data][product_data][metadata][course_id]", prefix),
                item.course_id.clone(),
            ));
            params.push((
                format!(
                    "{}[price_data][product_data][metadata][pricing_tier]",
                    prefix
                ),
                item.pricing_tier.clone(),
            ));
        }

        if let Some(reference) = &request.client_reference_id {
            params.push(("client_reference_id".into(), reference.clone()));
        }
        match &request.customer_email {
            Some(email) => params.push(("customer_email".into(), email.clone())),
            None => params.push(("customer_creation".into(), "if_required".into())),
        }

        params
    }
}

#[async_trait]
impl PaymentProvider for StripeCheckoutClient {
    #[instrument(skip(self, request), fields(items = request.line_items.len()))]
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<HostedCheckout, ServiceError> {
        let params = Self::form_params(&request);
        debug!("Submitting checkout session to payment processor");

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| ServiceError::PaymentProviderError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let message = match response.json::<ApiErrorResponse>().await {
                Ok(body) => body.error.message,
                Err(_) => format!("processor returned status {}", status),
            };
            return Err(ServiceError::PaymentProviderError(message));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::PaymentProviderError(format!("invalid response: {}", e)))?;

        let redirect_url = session.url.ok_or_else(|| {
            ServiceError::PaymentProviderError("session response carried no redirect URL".into())
        })?;

        Ok(HostedCheckout {
            session_id: session.id,
            redirect_url,
        })
    }
}
