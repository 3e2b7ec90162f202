pub mod cache;
pub mod tables;
