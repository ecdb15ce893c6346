//! Checkout session service: turns a cart of course ids into a hosted
//! checkout session at the payment processor and returns the redirect URL.

use crate::clients::payment::{
    CheckoutLineItem, CheckoutSessionRequest, HostedCheckout, PaymentProvider,
};
use crate::config::AppConfig;
use crate::entities::{course, purchase};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::pricing::{self, Quote};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Product descriptions are truncated before being sent to the processor,
/// which caps them.
const MAX_DESCRIPTION_CHARS: usize = 100;

/// A checkout request after handler-level deserialization.
#[derive(Debug, Clone, Default)]
pub struct CreateSessionInput {
    pub course_ids: Vec<String>,
    /// Authenticated purchaser's identity id, when logged in
    pub user_id: Option<String>,
    /// Pre-fill email for the hosted payment page
    pub email: Option<String>,
}

pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    payment: Arc<dyn PaymentProvider>,
    event_sender: EventSender,
    config: AppConfig,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        payment: Arc<dyn PaymentProvider>,
        event_sender: EventSender,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            payment,
            event_sender,
            config,
        }
    }

    /// Creates a hosted checkout session for the given cart.
    ///
    /// All-or-nothing: any unknown course id fails the whole request before
    /// the processor is contacted. Loyalty lookup degrades to standard
    /// pricing when storage is unavailable.
    #[instrument(skip(self, input), fields(courses = input.course_ids.len()))]
    pub async fn create_session(
        &self,
        input: CreateSessionInput,
    ) -> Result<HostedCheckout, ServiceError> {
        let course_ids = normalize_course_ids(&input.course_ids);
        if course_ids.is_empty() {
            return Err(ServiceError::InvalidInput(
                "At least one course id is required".to_string(),
            ));
        }

        let courses = self.fetch_courses(&course_ids).await?;
        let is_loyal = self.purchaser_is_loyal(input.user_id.as_deref()).await;
        let quote = pricing::resolve_quote(&courses, is_loyal);

        let request = self.build_session_request(&quote, &courses, &input)?;
        let checkout = self.payment.create_checkout_session(request).await?;

        info!(
            session_id = %checkout.session_id,
            total = %quote.total,
            loyalty_applied = is_loyal,
            "Created hosted checkout session"
        );
        self.event_sender
            .send(Event::CheckoutSessionCreated {
                course_ids,
                total: quote.total,
                loyalty_applied: is_loyal,
            })
            .await;

        Ok(checkout)
    }

    /// Loads every requested course, preserving request order. Any id with no
    /// catalog row fails the lookup.
    async fn fetch_courses(&self, course_ids: &[String]) -> Result<Vec<course::Model>, ServiceError> {
        let found = course::Entity::find()
            .filter(course::Column::Id.is_in(course_ids.iter().cloned()))
            .all(&*self.db)
            .await?;

        let mut by_id: HashMap<String, course::Model> =
            found.into_iter().map(|c| (c.id.clone(), c)).collect();

        let mut ordered = Vec::with_capacity(course_ids.len());
        let mut missing = Vec::new();
        for id in course_ids {
            match by_id.remove(id) {
                Some(course) => ordered.push(course),
                None => missing.push(id.clone()),
            }
        }

        if !missing.is_empty() {
            return Err(ServiceError::NotFound(format!(
                "Courses not found: {}",
                missing.join(", ")
            )));
        }

        Ok(ordered)
    }

    /// A purchaser is loyal when they have at least one prior entitlement.
    /// Storage failure here must not block checkout; the purchaser just pays
    /// the standard price.
    async fn purchaser_is_loyal(&self, user_id: Option<&str>) -> bool {
        let Some(raw) = user_id else {
            return false;
        };
        let Ok(user_id) = Uuid::parse_str(raw.trim()) else {
            warn!(user_id = raw, "Unparseable purchaser id; pricing as new customer");
            return false;
        };

        match purchase::Entity::find()
            .filter(purchase::Column::UserId.eq(user_id))
            .count(&*self.db)
            .await
        {
            Ok(count) => count > 0,
            Err(e) => {
                warn!(%user_id, "Loyalty lookup failed, pricing as new customer: {}", e);
                false
            }
        }
    }

    fn build_session_request(
        &self,
        quote: &Quote,
        courses: &[course::Model],
        input: &CreateSessionInput,
    ) -> Result<CheckoutSessionRequest, ServiceError> {
        let mut line_items = Vec::with_capacity(quote.items.len());
        for (item, course) in quote.items.iter().zip(courses) {
            let unit_amount_minor = pricing::to_minor_units(&item.unit_price).ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Price for course {} is out of range",
                    item.course_id
                ))
            })?;
            line_items.push(CheckoutLineItem {
                course_id: item.course_id.clone(),
                name: item.title.clone(),
                description: truncate_chars(&course.description, MAX_DESCRIPTION_CHARS),
                image: course.image.clone(),
                unit_amount_minor,
                pricing_tier: item.tier.as_str().to_string(),
            });
        }

        let metadata_course_ids = quote
            .items
            .iter()
            .map(|i| i.course_id.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let client_reference_id = input
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let customer_email = input
            .email
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(CheckoutSessionRequest {
            line_items,
            currency: self.config.default_currency.clone(),
            metadata_course_ids,
            client_reference_id,
            customer_email,
            success_url: self.config.checkout_success_url(&quote.total),
            cancel_url: self.config.checkout_cancel_url(),
        })
    }
}

/// Trims, drops empties, and deduplicates while preserving first-seen order.
fn normalize_course_ids(raw: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(id.to_string()))
        .map(str::to_string)
        .collect()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::payment::MockPaymentProvider;
    use sea_orm_migration::MigratorTrait;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn processor_is_never_contacted_when_the_cart_has_an_unknown_course() {
        let db = sea_orm::Database::connect("sqlite::memory:").await.unwrap();
        crate::migrator::Migrator::up(&db, None).await.unwrap();

        let mut payment = MockPaymentProvider::new();
        payment.expect_create_checkout_session().never();

        let (tx, _rx) = mpsc::channel(4);
        let service = CheckoutService::new(
            Arc::new(db),
            Arc::new(payment),
            EventSender::new(tx),
            crate::config::test_app_config(),
        );

        let err = service
            .create_session(CreateSessionInput {
                course_ids: vec!["ghost".into()],
                user_id: None,
                email: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn normalization_trims_dedups_and_preserves_order() {
        let raw = vec![
            " c2 ".to_string(),
            "c1".to_string(),
            "".to_string(),
            "c2".to_string(),
        ];
        assert_eq!(normalize_course_ids(&raw), vec!["c2", "c1"]);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("ab", 10), "ab");
    }
}
