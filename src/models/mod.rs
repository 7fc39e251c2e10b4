pub mod donation;
pub mod project;
