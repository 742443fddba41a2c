// src/lib.rs
pub mod clients;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod metrics;
pub mod server;
pub mod telemetry;
