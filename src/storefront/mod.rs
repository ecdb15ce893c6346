//! Storefront-side logic: the cart, the analytics pixel, and the
//! payment-success reconciliation that runs when the processor redirects the
//! buyer back. Kept transport-free so the same rules drive any client shell.

pub mod analytics;
pub mod cart;
pub mod success;

pub use analytics::{AnalyticsEvent, AnalyticsSink, BufferingAnalytics};
pub use cart::{CartStore, InMemoryCartStore};
pub use success::{ReconcileOutcome, SessionScope, SuccessReconciler};
