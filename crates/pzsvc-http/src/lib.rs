//! pzsvc-http: HTTP server for pzsvc-exec
//!
//! ```text
//! pzsvc-exec binary
//!     └── pzsvc-http (this crate)
//!         ├── Middleware stack (CORS, tracing, timeout, request logging)
//!         └── Router supplied by the binary
//!             ├── /execute  → orchestrated command run
//!             └── /, /help, /description, /attributes, /version
//! ```

pub mod middleware;
pub mod server;

pub use middleware::{MiddlewareConfig, MiddlewareStack};
pub use server::{HttpServer, HttpServerBuilder, ServerConfig};

/// Error types for the HTTP server
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Server binding error: {0}")]
    BindError(#[from] std::io::Error),

    #[error("Invalid bind address {0}")]
    InvalidAddress(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
