use crate::storefront::analytics::{AnalyticsEvent, AnalyticsSink};
use crate::storefront::cart::CartStore;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Browser-session-scoped key/value storage. Dropped when the session ends,
/// which bounds the conversion dedup to exactly the scope that can replay a
/// success-page visit (reload, back-navigation).
pub trait SessionScope: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

#[derive(Debug, Default)]
pub struct InMemorySessionScope {
    values: Mutex<HashMap<String, String>>,
}

impl InMemorySessionScope {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionScope for InMemorySessionScope {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok().and_then(|v| v.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_string());
        }
    }
}

/// What a success-page visit resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No session id in the URL; nothing to reconcile
    RedirectHome,
    /// First visit for this session; conversion reported
    Tracked { total: Decimal },
    /// Replayed visit; conversion suppressed
    AlreadyTracked,
}

/// Runs when the processor redirects the buyer back to the storefront.
/// Clears the cart and reports the conversion at most once per checkout
/// session within the browser session.
pub struct SuccessReconciler {
    scope: Arc<dyn SessionScope>,
    analytics: Arc<dyn AnalyticsSink>,
    cart: Arc<dyn CartStore>,
    currency: String,
    /// Grace period for the pixel to finish initializing before the
    /// conversion is reported
    settle_delay: Duration,
}

impl SuccessReconciler {
    pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(750);

    pub fn new(
        scope: Arc<dyn SessionScope>,
        analytics: Arc<dyn AnalyticsSink>,
        cart: Arc<dyn CartStore>,
        currency: String,
        settle_delay: Duration,
    ) -> Self {
        Self {
            scope,
            analytics,
            cart,
            currency,
            settle_delay,
        }
    }

    fn marker_key(session_id: &str) -> String {
        format!("pixel_tracked_{}", session_id)
    }

    /// `session_id` and `total` come from the redirect URL's query string.
    pub async fn reconcile(
        &self,
        session_id: Option<&str>,
        total: Option<Decimal>,
    ) -> ReconcileOutcome {
        let Some(session_id) = session_id.map(str::trim).filter(|s| !s.is_empty()) else {
            debug!("Success page visited without a session id");
            return ReconcileOutcome::RedirectHome;
        };

        // The purchase is already captured server-side; the cart is stale
        // regardless of whether the conversion gets reported.
        self.cart.clear();

        // Replayed visits return immediately; only the first visit waits out
        // the pixel warmup.
        let marker = Self::marker_key(session_id);
        if self.scope.get(&marker).is_some() {
            info!(session_id, "Conversion already reported for this session");
            return ReconcileOutcome::AlreadyTracked;
        }
        // Mark before emitting so a concurrent or interrupted visit errs on
        // the side of under-reporting.
        self.scope.set(&marker, "true");

        tokio::time::sleep(self.settle_delay).await;

        let total = total.unwrap_or(Decimal::ZERO);
        self.analytics.emit(AnalyticsEvent::Purchase {
            value: total,
            currency: self.currency.clone(),
        });
        self.analytics.emit(AnalyticsEvent::Lead);
        info!(session_id, %total, "Conversion reported");

        ReconcileOutcome::Tracked { total }
    }
}
