//! In-process echo server for tests.
//!
//! Binds to a random local port and serves the echo routes in the
//! background until dropped.

use crate::config::Config;
use crate::routes::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Running echo server bound to `127.0.0.1:<random port>`.
///
/// # Example
/// ```rust,ignore
/// let server = EchoServer::spawn("authtest-http").await?;
/// let body = reqwest::get(format!("{}/target/", server.url())).await?.text().await?;
/// ```
pub struct EchoServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl EchoServer {
    /// Spawn an echo server reporting `backend_name`.
    pub async fn spawn(backend_name: &str) -> std::io::Result<Self> {
        let config = Config {
            backend_name: backend_name.to_string(),
            bind_address: "127.0.0.1:0".to_string(),
        };
        let app = routes::build_routes(Arc::new(AppState { config }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Echo test server error");
            }
        });

        Ok(Self { addr, handle })
    }

    /// Socket address the server is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `host:port` authority of the server.
    pub fn authority(&self) -> String {
        self.addr.to_string()
    }

    /// Base HTTP URL (no trailing slash).
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
