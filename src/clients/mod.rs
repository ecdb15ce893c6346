//! HTTP clients for the pipeline's external collaborators. Each collaborator
//! sits behind a trait so services can be exercised against test doubles.

pub mod identity;
pub mod mail;
pub mod payment;

pub use identity::{IdentityProvider, IdentityUser, NewIdentity};
pub use mail::{MailSender, OutboundEmail};
pub use payment::{CheckoutLineItem, CheckoutSessionRequest, HostedCheckout, PaymentProvider};
