//! tierroute - tiered request router for self-hosted and cloud AI providers
//!
//! Each request is matched against a catalog of (provider, model) backends,
//! ranked cheapest-tier first, and dispatched with per-attempt timeouts,
//! bounded retries and cross-provider fallback. A response cache, per-client
//! rate limiter and per-account cost ledger sit in front of dispatch.

pub mod backends;
pub mod cache;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod ledger;
pub mod limiter;
pub mod metrics;
pub mod middleware;
pub mod router;
pub mod telemetry;
