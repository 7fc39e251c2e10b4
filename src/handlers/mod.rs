pub mod donations;
pub mod payments;
pub mod projects;
