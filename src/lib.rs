pub mod agent;
pub mod cli;
pub mod config;
pub mod doctor;
pub mod error;
pub mod event;
pub mod profiles;
pub mod provider;
pub mod search;
pub mod server;
pub mod streaming;
pub mod telemetry;
