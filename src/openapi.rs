use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Academy API",
        description = "Course storefront backend: hosted checkout sessions and payment-webhook fulfillment"
    ),
    paths(
        crate::handlers::checkout::create_checkout_session,
        crate::handlers::payment_webhooks::payment_webhook,
        crate::handlers::health::health,
    ),
    components(schemas(
        crate::handlers::checkout::CreateCheckoutSessionRequest,
        crate::handlers::checkout::CheckoutSessionResponse,
        crate::handlers::health::HealthResponse,
        crate::errors::ErrorResponse,
    )),
    tags(
        (name = "Checkout", description = "Hosted checkout session creation"),
        (name = "Payments", description = "Payment processor notifications"),
        (name = "Health", description = "Service health")
    )
)]
pub struct ApiDoc;

/// Swagger UI mounted at /docs, serving the generated document.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
