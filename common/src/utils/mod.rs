pub mod auth;
pub mod config;
pub mod embedding;
pub mod token_count;
