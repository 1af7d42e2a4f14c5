// src/lib.rs
pub mod cache;
pub mod config;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod proxy;
pub mod response;
pub mod server;
