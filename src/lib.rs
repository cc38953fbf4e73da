// Retention Insights - Library root

pub mod auth;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod error;
pub mod http_client;
pub mod middleware;
pub mod platform;
pub mod retention;
pub mod routes;
pub mod store;
