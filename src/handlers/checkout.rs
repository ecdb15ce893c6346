use crate::handlers::common::{success_response, validate_input};
use crate::services::checkout::CreateSessionInput;
use crate::{errors::ServiceError, AppState};
use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Checkout request from the storefront cart. Older clients send a single
/// `course_id`; current ones send the whole cart as `course_ids`.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateCheckoutSessionRequest {
    #[serde(default)]
    pub course_ids: Vec<String>,
    #[serde(default)]
    pub course_id: Option<String>,
    /// Identity id of the logged-in purchaser, if any
    #[serde(default)]
    pub user_id: Option<String>,
    /// Pre-fill for the hosted payment page
    #[serde(default)]
    #[validate(email)]
    pub email: Option<String>,
}

impl CreateCheckoutSessionRequest {
    fn into_input(self) -> CreateSessionInput {
        let mut course_ids = self.course_ids;
        if let Some(single) = self.course_id {
            course_ids.push(single);
        }
        CreateSessionInput {
            course_ids,
            user_id: self.user_id,
            email: self.email,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutSessionResponse {
    /// Hosted payment page the browser should navigate to
    pub redirect_url: String,
    pub session_id: String,
}

/// POST /api/v1/checkout/sessions
#[utoipa::path(
    post,
    path = "/api/v1/checkout/sessions",
    request_body = CreateCheckoutSessionRequest,
    responses(
        (status = 200, description = "Hosted checkout session created", body = CheckoutSessionResponse),
        (status = 400, description = "Empty or malformed cart", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown course id in the cart", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment processor rejected the session", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Json(request): Json<CreateCheckoutSessionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&request)?;

    let checkout = state
        .services
        .checkout
        .create_session(request.into_input())
        .await?;

    Ok(success_response(CheckoutSessionResponse {
        redirect_url: checkout.redirect_url,
        session_id: checkout.session_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_single_course_id_is_merged_into_the_cart() {
        let request = CreateCheckoutSessionRequest {
            course_ids: vec!["c1".into()],
            course_id: Some("c2".into()),
            user_id: None,
            email: None,
        };
        assert_eq!(request.into_input().course_ids, vec!["c1", "c2"]);
    }

    #[test]
    fn malformed_email_fails_validation() {
        let request = CreateCheckoutSessionRequest {
            course_ids: vec!["c1".into()],
            course_id: None,
            user_id: None,
            email: Some("not-an-email".into()),
        };
        assert!(validate_input(&request).is_err());
    }
}
