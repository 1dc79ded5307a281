pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod relay;
pub mod sse;
pub mod transforms;
pub mod upstream;
