pub mod billing;
pub mod config;
