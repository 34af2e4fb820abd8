//! HTTP server
//!
//! Plain HTTP on a single listener. Failing to bind is the only fatal
//! condition once the router is built.

use crate::middleware::{apply_middleware, MiddlewareConfig};
use crate::{Result, ServerError};
use axum::Router;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpListener;
use tracing::info;

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Bind host
    pub bind_host: String,
    /// HTTP port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> Result<SocketAddr> {
        let host = self.bind_host.trim_start_matches('[').trim_end_matches(']');
        host.parse::<IpAddr>()
            .map(|ip| SocketAddr::new(ip, self.port))
            .map_err(|_| ServerError::InvalidAddress(format!("{}:{}", self.bind_host, self.port)))
    }
}

pub struct HttpServer {
    config: ServerConfig,
    router: Router,
}

impl HttpServer {
    pub fn builder() -> HttpServerBuilder {
        HttpServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and serve until the process ends.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Bind the configured address and serve until `signal` resolves.
    /// In-flight requests are allowed to finish.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.addr()?;
        let listener = TcpListener::bind(addr).await?;
        info!("HTTP server listening on http://{}", listener.local_addr()?);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(ServerError::BindError)?;

        info!("HTTP server stopped");
        Ok(())
    }
}

pub struct HttpServerBuilder {
    bind_host: String,
    port: u16,
    router: Option<Router>,
    middleware_config: MiddlewareConfig,
}

impl HttpServerBuilder {
    pub fn new() -> Self {
        let defaults = ServerConfig::default();
        Self {
            bind_host: defaults.bind_host,
            port: defaults.port,
            router: None,
            middleware_config: MiddlewareConfig::default(),
        }
    }

    /// Set bind address: `host:port` (`[v6]:port` for IPv6), a bare port
    /// or a bare host.
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        let addr = addr.into();
        if let Ok(socket) = addr.parse::<SocketAddr>() {
            self.bind_host = socket.ip().to_string();
            self.port = socket.port();
        } else if let Ok(p) = addr.parse::<u16>() {
            self.port = p;
        } else if addr.parse::<IpAddr>().is_ok() {
            self.bind_host = addr;
        } else if let Some((host, port)) = addr.rsplit_once(':') {
            self.bind_host = host.to_string();
            if let Ok(p) = port.parse() {
                self.port = p;
            }
        } else {
            self.bind_host = addr;
        }
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    pub fn middleware(mut self, config: MiddlewareConfig) -> Self {
        self.middleware_config = config;
        self
    }

    pub fn build(self) -> HttpServer {
        let router = apply_middleware(self.router.unwrap_or_default(), self.middleware_config);
        HttpServer {
            config: ServerConfig {
                bind_host: self.bind_host,
                port: self.port,
            },
            router,
        }
    }
}

impl Default for HttpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
