pub mod app;
pub mod campaign;
pub mod config;
pub mod http;
pub mod notify;
pub mod output;
pub mod payments;
pub mod progress;
pub mod server;
pub mod store;
pub mod tracking;
pub mod types;
pub mod workflow;
