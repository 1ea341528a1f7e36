//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware, HTTPS redirect)
//!     → request.rs (request ID, client identity, X-Forwarded-For)
//!     → dispatch pipeline (rate limit, strategy, breaker)
//!     → forward.rs (rewrite and send to the chosen backend)
//!     → backend response streamed back to the client
//! ```

pub mod forward;
pub mod request;
pub mod server;

pub use forward::HyperForwarder;
pub use request::{MakeRequestUuidV4, X_FORWARDED_FOR, X_REQUEST_ID};
pub use server::{HttpServer, ServerError};
