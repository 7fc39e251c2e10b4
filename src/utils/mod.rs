pub mod helpers;
pub mod phone;
pub mod receipt;
