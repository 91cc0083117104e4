//! # Monzo Exporter Library
//!
//! Periodically collects balances, pots and today's transactions for every
//! authorised Monzo user and publishes them as Prometheus gauges.
//!
//! Modules:
//! - `config` — YAML service configuration and validation
//! - `cache` — token records and the rotating token store
//! - `upstream` — typed Monzo API client
//! - `refresh` — one-token-per-tick refresh scheduler
//! - `collector` — collection cycle and its panic-restarting supervisor
//! - `issuer` — OAuth handshake that deposits new tokens
//! - `observability` — metric registry, `/metrics` route, process metrics

pub mod config;
pub mod cache;
pub mod upstream;
pub mod refresh;
pub mod collector;
pub mod issuer;
pub mod observability;
pub mod server;
pub mod helpers;
pub mod utils;

#[cfg(test)]
mod tests;
