//! Folio Server - HTTP observability and admin API for a Folio deployment
//!
//! The server owns one [`folio::AppContext`] and exposes its state:
//!
//! - **Health**: liveness, and readiness that reports 503 while the upstream
//!   circuit is open
//! - **Metrics**: Prometheus text exposition of the `metrics` recorded by the
//!   client and by this server
//! - **Telemetry**: summary and filtered event listing from the collector
//! - **Administration**: cache invalidation and cleanup, circuit breaker and
//!   rate limiter resets
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use server::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::load()?;
//!     server::start_server(config).await?;
//!     Ok(())
//! }
//! ```
//!
//! # API Endpoints
//!
//! ## Public Endpoints (No Authentication)
//!
//! - `GET /` - API information
//! - `GET /health` - Liveness check
//! - `GET /ready` - Readiness check
//! - `GET /metrics` - Prometheus metrics
//! - `GET /telemetry?recent=N` - Telemetry summary
//!
//! ## Protected Endpoints (API Key Required)
//!
//! - `GET /api/v1/cache/stats` - Hit/miss counters and cache configuration
//! - `POST /api/v1/cache/cleanup` - Run one cleanup pass
//! - `DELETE /api/v1/cache` - Clear the cache
//! - `DELETE /api/v1/cache/keys/{pattern}` - Clear keys matching a glob
//! - `DELETE /api/v1/cache/key/{key}` - Delete a key and its dependents
//! - `GET /api/v1/circuit` - Circuit breaker snapshot
//! - `POST /api/v1/circuit/reset` - Force the breaker closed
//! - `GET /api/v1/rate-limit` - Upstream rate limiter window and counters
//! - `POST /api/v1/rate-limit/reset` - Fresh rate limit windows
//! - `GET /api/v1/telemetry/events?category=&type=&limit=` - Raw events
//! - `DELETE /api/v1/telemetry` - Drop retained events
//! - `GET /api/v1/metadata` - Server version and component configuration

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{build_router, start_server};
pub use state::ServerState;
