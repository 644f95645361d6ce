pub mod config;
pub mod health;
pub mod status;
pub mod streaming;
