//! HTTP load balancer.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server ──▶ dispatch ──▶ security::rate_limit
//!                                         │
//!                                         ▼
//!                                   load_balancer (strategy over pool snapshot)
//!                                         │
//!                                         ▼
//!     Client Response               http::forward ──────────────────▶ Backend
//!     ◀────────────── http::server ◀──────┘  (breaker, latency, metrics fed on completion)
//!
//!     Background: health::active (periodic probes) · rate limiter sweeper
//!     Cross-cutting: config · observability · resilience · lifecycle
//! ```

// Core subsystems
pub mod config;
pub mod dispatch;
pub mod http;

// Traffic management
pub mod health;
pub mod load_balancer;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::LbConfig;
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
