use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the fulfillment pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// A hosted checkout session was created at the payment processor
    CheckoutSessionCreated {
        course_ids: Vec<String>,
        total: Decimal,
        loyalty_applied: bool,
    },
    /// A new identity was provisioned for a guest purchaser
    AccountProvisioned { user_id: Uuid, email: String },
    /// One entitlement row was persisted
    PurchaseRecorded {
        user_id: Uuid,
        course_id: String,
        payment_reference: String,
    },
    /// A completed-checkout notification finished processing
    CheckoutFulfilled {
        payment_reference: String,
        courses_granted: usize,
        replayed: usize,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event; a full or closed channel is logged, never propagated —
    /// event delivery must not fail the request that produced it.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!("Failed to send event: {}", e);
        }
    }
}

/// Consumes events off the channel, logging them and updating counters.
/// Spawned once at startup.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::CheckoutSessionCreated {
                course_ids,
                total,
                loyalty_applied,
            } => {
                metrics::counter!("academy_checkout.sessions_created", 1);
                info!(
                    courses = course_ids.len(),
                    %total,
                    loyalty_applied,
                    "checkout session created"
                );
            }
            Event::AccountProvisioned { user_id, email } => {
                metrics::counter!("academy_fulfillment.accounts_provisioned", 1);
                info!(%user_id, %email, "account provisioned");
            }
            Event::PurchaseRecorded {
                user_id,
                course_id,
                payment_reference,
            } => {
                metrics::counter!("academy_fulfillment.purchases_recorded", 1);
                info!(%user_id, %course_id, %payment_reference, "purchase recorded");
            }
            Event::CheckoutFulfilled {
                payment_reference,
                courses_granted,
                replayed,
            } => {
                info!(
                    %payment_reference,
                    courses_granted,
                    replayed,
                    "checkout fulfilled"
                );
            }
        }
    }
    info!("Event channel closed; event processor exiting");
}
