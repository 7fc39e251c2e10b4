pub mod donation;
pub mod payment;
