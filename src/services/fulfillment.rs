//! Fulfillment of completed checkouts.
//!
//! The webhook handler verifies the notification and extracts a work order
//! (`CompletedCheckout`); this service runs the side effects in a fixed
//! order, isolating each failure so a broken email never blocks an
//! entitlement. Redelivery of the same notification is safe end to end: the
//! schema's UNIQUE (user_id, course_id, payment_reference) constraint
//! absorbs duplicate inserts.

use crate::clients::identity::{IdentityProvider, NewIdentity};
use crate::clients::mail::{MailSender, OutboundEmail};
use crate::entities::{profile, purchase};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use chrono::Utc;
use rand::Rng;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue::Set, DatabaseConnection, EntityTrait};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Event type this pipeline acts on; everything else is acknowledged and
/// ignored.
pub const CHECKOUT_COMPLETED_EVENT: &str = "checkout.session.completed";

const PASSWORD_PREFIX: &str = "Corso";
const FALLBACK_FULL_NAME: &str = "Student";

/// Processor notification envelope, deserialized from the raw webhook body.
/// `data` stays raw until the type filter passes: irrelevant event types
/// carry object shapes this pipeline cannot parse and must still be
/// acknowledged.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
}

impl WebhookEvent {
    /// Parses the session object out of a `checkout.session.completed`
    /// envelope. Only call after the type filter.
    pub fn into_session(self) -> Result<SessionObject, ServiceError> {
        let data: WebhookEventData = serde_json::from_value(self.data).map_err(|e| {
            ServiceError::BadRequest(format!("Invalid checkout session payload: {}", e))
        })?;
        Ok(data.object)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: SessionObject,
}

/// The completed checkout session as the processor reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionObject {
    pub id: String,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub metadata: Option<SessionMetadata>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub payment_status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionMetadata {
    /// Single-course sessions from older storefront clients
    #[serde(default)]
    pub course_id: Option<String>,
    /// Comma-joined course-id set written at session creation
    #[serde(default)]
    pub course_ids: Option<String>,
    #[serde(rename = "type", default)]
    pub purchase_type: Option<String>,
}

/// The validated work order extracted from a completed session: everything
/// fulfillment needs, nothing it has to re-derive. Extraction is pure so it
/// can be tested without any I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedCheckout {
    /// Session id; doubles as the entitlement idempotency key
    pub payment_reference: String,
    pub email: String,
    pub full_name: String,
    pub course_ids: Vec<String>,
    /// Identity id the storefront attached at session creation, when the
    /// purchaser was logged in
    pub client_reference: Option<Uuid>,
}

impl CompletedCheckout {
    /// Builds a work order from a completed-session payload. Fails when the
    /// session carries no customer email or no resolvable course ids; those
    /// sessions cannot be fulfilled at all.
    pub fn from_session(session: SessionObject) -> Result<Self, ServiceError> {
        let details = session.customer_details.unwrap_or(CustomerDetails {
            email: None,
            name: None,
        });

        let email = details
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                ServiceError::BadRequest("Completed session carries no customer email".to_string())
            })?;

        let full_name = details
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| FALLBACK_FULL_NAME.to_string());

        let metadata = session.metadata.unwrap_or(SessionMetadata {
            course_id: None,
            course_ids: None,
            purchase_type: None,
        });
        let course_ids = resolve_course_ids(&metadata);
        if course_ids.is_empty() {
            return Err(ServiceError::BadRequest(
                "Completed session metadata carries no course ids".to_string(),
            ));
        }

        let client_reference = session
            .client_reference_id
            .as_deref()
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok());

        Ok(Self {
            payment_reference: session.id,
            email,
            full_name,
            course_ids,
            client_reference,
        })
    }
}

/// Prefers the multi-course set; falls back to the legacy single-course key.
fn resolve_course_ids(metadata: &SessionMetadata) -> Vec<String> {
    if let Some(joined) = metadata.course_ids.as_deref() {
        let ids: Vec<String> = joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if !ids.is_empty() {
            return ids;
        }
    }
    metadata
        .course_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| vec![s.to_string()])
        .unwrap_or_default()
}

/// Bootstrap password for fulfillment-provisioned accounts: readable prefix,
/// four digits, and a symbol to satisfy common complexity rules.
pub fn generate_bootstrap_password() -> String {
    let digits: u32 = rand::thread_rng().gen_range(1000..10000);
    format!("{}{}!", PASSWORD_PREFIX, digits)
}

/// What fulfillment accomplished for one notification. Partial failure is a
/// normal outcome, not an error; the handler acks regardless.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FulfillmentOutcome {
    pub user_id: Option<Uuid>,
    pub account_created: bool,
    pub mail_sent: bool,
    pub purchases_inserted: usize,
    pub purchases_replayed: usize,
    /// True when at least one entitlement row could not be persisted; the
    /// one failure mode that needs an operator
    pub entitlement_failure: bool,
}

pub struct FulfillmentService {
    db: Arc<DatabaseConnection>,
    identity: Arc<dyn IdentityProvider>,
    mailer: Option<Arc<dyn MailSender>>,
    event_sender: EventSender,
    login_url: String,
}

impl FulfillmentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        identity: Arc<dyn IdentityProvider>,
        mailer: Option<Arc<dyn MailSender>>,
        event_sender: EventSender,
        login_url: String,
    ) -> Self {
        Self {
            db,
            identity,
            mailer,
            event_sender,
            login_url,
        }
    }

    /// Runs the fulfillment pipeline for one completed checkout:
    /// identity resolution, credentials mail, profile upsert, entitlement
    /// inserts. Never returns an error; each step logs its own failures and
    /// the rest of the pipeline proceeds with what it has.
    #[instrument(skip(self, checkout), fields(payment_reference = %checkout.payment_reference))]
    pub async fn fulfill(&self, checkout: CompletedCheckout) -> FulfillmentOutcome {
        let mut outcome = FulfillmentOutcome::default();

        let (user_id, bootstrap_password) = self.resolve_identity(&checkout).await;
        outcome.user_id = user_id;
        outcome.account_created = bootstrap_password.is_some();

        if let Some(password) = bootstrap_password {
            outcome.mail_sent = self.send_credentials_mail(&checkout, &password).await;
        }

        match user_id {
            Some(user_id) => {
                self.upsert_profile(user_id, &checkout).await;
                self.persist_entitlements(user_id, &checkout, &mut outcome)
                    .await;
            }
            None => {
                // Payment is captured but nobody to grant access to; this
                // needs a human.
                metrics::counter!("academy_fulfillment.unresolved_identities", 1);
                error!(
                    payment_reference = %checkout.payment_reference,
                    email = %checkout.email,
                    "Could not resolve an identity for a paid checkout; entitlements not granted"
                );
                outcome.entitlement_failure = true;
            }
        }

        self.event_sender
            .send(Event::CheckoutFulfilled {
                payment_reference: checkout.payment_reference.clone(),
                courses_granted: outcome.purchases_inserted,
                replayed: outcome.purchases_replayed,
            })
            .await;

        outcome
    }

    /// Finds or provisions the purchaser's identity. Returns the bootstrap
    /// password only when a brand-new identity was created; existing
    /// accounts never get their credentials re-sent.
    ///
    /// When the identity service is unreachable the session's client
    /// reference (set for logged-in purchasers) still lets entitlements land.
    async fn resolve_identity(
        &self,
        checkout: &CompletedCheckout,
    ) -> (Option<Uuid>, Option<String>) {
        match self.identity.find_user_by_email(&checkout.email).await {
            Ok(Some(user)) => {
                info!(user_id = %user.id, "Purchaser already has an account");
                (Some(user.id), None)
            }
            Ok(None) => {
                let password = generate_bootstrap_password();
                let new_identity = NewIdentity {
                    email: checkout.email.clone(),
                    password: password.clone(),
                    full_name: checkout.full_name.clone(),
                    pre_verified: true,
                };
                match self.identity.create_user(new_identity).await {
                    Ok(user) => {
                        self.event_sender
                            .send(Event::AccountProvisioned {
                                user_id: user.id,
                                email: checkout.email.clone(),
                            })
                            .await;
                        (Some(user.id), Some(password))
                    }
                    Err(e) => {
                        metrics::counter!("academy_fulfillment.identity_failures", 1);
                        warn!(
                            email = %checkout.email,
                            "Identity provisioning failed, falling back to client reference: {}",
                            e
                        );
                        (checkout.client_reference, None)
                    }
                }
            }
            Err(e) => {
                // A failed lookup is not proof the account is absent; creating
                // one here could duplicate an existing identity.
                metrics::counter!("academy_fulfillment.identity_failures", 1);
                warn!(
                    email = %checkout.email,
                    "Identity lookup failed, falling back to client reference: {}",
                    e
                );
                (checkout.client_reference, None)
            }
        }
    }

    /// Sends the credentials email. Failure is logged and swallowed: the
    /// account exists and support can reset the password.
    async fn send_credentials_mail(&self, checkout: &CompletedCheckout, password: &str) -> bool {
        let Some(mailer) = &self.mailer else {
            info!("Mail API key not configured; skipping credentials email");
            return false;
        };

        let email = OutboundEmail {
            to: checkout.email.clone(),
            subject: "Your account is ready".to_string(),
            html: credentials_email_html(
                &checkout.full_name,
                &checkout.email,
                password,
                &self.login_url,
            ),
        };

        match mailer.send(email).await {
            Ok(delivery_id) => {
                info!(%delivery_id, "Credentials email sent");
                true
            }
            Err(e) => {
                metrics::counter!("academy_fulfillment.mail_failures", 1);
                warn!(email = %checkout.email, "Credentials email failed: {}", e);
                false
            }
        }
    }

    /// Upserts the purchaser profile keyed by identity id. Failure is logged
    /// and does not stop entitlement persistence.
    async fn upsert_profile(&self, user_id: Uuid, checkout: &CompletedCheckout) {
        let now = Utc::now();
        let active = profile::ActiveModel {
            id: Set(user_id),
            email: Set(checkout.email.clone()),
            full_name: Set(Some(checkout.full_name.clone())),
            is_admin: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let result = profile::Entity::insert(active)
            .on_conflict(
                OnConflict::column(profile::Column::Id)
                    .update_columns([
                        profile::Column::Email,
                        profile::Column::FullName,
                        profile::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await;

        if let Err(e) = result {
            warn!(%user_id, "Profile upsert failed: {}", e);
        }
    }

    /// Inserts one entitlement row per course. Rows already present from an
    /// earlier delivery are skipped by the unique constraint; rows that fail
    /// for any other reason raise the operator alert but never abort the
    /// remaining inserts.
    async fn persist_entitlements(
        &self,
        user_id: Uuid,
        checkout: &CompletedCheckout,
        outcome: &mut FulfillmentOutcome,
    ) {
        for course_id in &checkout.course_ids {
            let row = purchase::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(user_id),
                course_id: Set(course_id.clone()),
                payment_reference: Set(checkout.payment_reference.clone()),
                created_at: Set(Utc::now()),
            };

            let result = purchase::Entity::insert(row)
                .on_conflict(
                    OnConflict::columns([
                        purchase::Column::UserId,
                        purchase::Column::CourseId,
                        purchase::Column::PaymentReference,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec_without_returning(&*self.db)
                .await;

            match result {
                Ok(0) => {
                    info!(%user_id, course_id, "Entitlement already recorded; replay skipped");
                    outcome.purchases_replayed += 1;
                }
                Ok(_) => {
                    self.event_sender
                        .send(Event::PurchaseRecorded {
                            user_id,
                            course_id: course_id.clone(),
                            payment_reference: checkout.payment_reference.clone(),
                        })
                        .await;
                    outcome.purchases_inserted += 1;
                }
                Err(e) => {
                    metrics::counter!("academy_fulfillment.entitlement_persist_failures", 1);
                    error!(
                        %user_id,
                        course_id,
                        payment_reference = %checkout.payment_reference,
                        "Entitlement persistence failed for a captured payment: {}",
                        e
                    );
                    outcome.entitlement_failure = true;
                }
            }
        }
    }
}

fn credentials_email_html(full_name: &str, email: &str, password: &str, login_url: &str) -> String {
    format!(
        r#"<div style="font-family: sans-serif; max-width: 600px; margin: 0 auto;">
  <h2>Welcome, {full_name}!</h2>
  <p>Your purchase is complete and an account has been created for you.</p>
  <p>
    <strong>Email:</strong> {email}<br/>
    <strong>Temporary password:</strong> {password}
  </p>
  <p><a href="{login_url}">Log in</a> and change your password right away.</p>
  <p>Your courses are already waiting in your library.</p>
</div>"#
    )
}
