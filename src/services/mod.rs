pub mod checkout;
pub mod fulfillment;
pub mod pricing;
