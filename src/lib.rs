pub mod config;
pub mod error;
pub mod models;
pub mod openapi;
pub mod password;
pub mod repo;
pub mod routes;
pub mod security;

// Re-export commonly used items for tests / external users
pub use routes::{config as configure, AppState};
pub use security::SecurityHeaders;
