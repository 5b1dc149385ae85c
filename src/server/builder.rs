// ────────────────────────────────
// src/server/builder.rs
// ────────────────────────────────
use crate::proxy::ClientAddr;
use anyhow::{anyhow, Result};
use hyper::{server::conn::Http, Body, Request, Response};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tower::{Service, ServiceExt};

/// Builder pattern so `main.rs` can inject its request handler.
pub struct ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    listener: TcpListener,
    handler: Option<H>,
}

impl<H> ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener))
    }

    /// Serve on an already bound socket (port 0 in tests).
    pub fn from_listener(listener: TcpListener) -> Self {
        Self {
            listener,
            handler: None,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn with_handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Accepts connections until `signal` resolves, then lets every open
    /// connection finish its in-flight request before returning.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let handler = self
            .handler
            .ok_or_else(|| anyhow!("handler must be set via with_handler()"))?;
        let listener = self.listener;
        tracing::info!("HTTP server listening on {}", listener.local_addr()?);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::warn!(%err, "accept error");
                            if let Some(delay) = accept_backoff(&err) {
                                tokio::time::sleep(delay).await;
                            }
                            continue;
                        }
                    };
                    let svc = handler.clone().map_request(move |mut req: Request<Body>| {
                        req.extensions_mut().insert(ClientAddr(peer));
                        req
                    });
                    let mut shutdown = shutdown_rx.clone();

                    // One Tokio task per connection.
                    connections.spawn(async move {
                        let conn = Http::new().serve_connection(stream, svc);
                        tokio::pin!(conn);

                        let result = tokio::select! {
                            result = conn.as_mut() => result,
                            _ = shutdown.changed() => {
                                conn.as_mut().graceful_shutdown();
                                conn.await
                            }
                        };
                        if let Err(err) = result {
                            tracing::warn!(%peer, %err, "connection error");
                        }
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = &mut signal => break,
            }
        }

        drop(listener);
        tracing::info!(
            open = connections.len(),
            "no longer accepting connections, draining"
        );
        let _ = shutdown_tx.send(true);
        while connections.join_next().await.is_some() {}

        Ok(())
    }
}

/// How long to pause after a failed accept. Errors tied to one connection
/// are retried at once; anything else (e.g. out of file descriptors) backs
/// off so the loop does not spin.
fn accept_backoff(err: &io::Error) -> Option<Duration> {
    match err.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset => None,
        _ => Some(Duration::from_secs(1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_connection_accept_errors_retry_immediately() {
        let aborted = io::Error::from(io::ErrorKind::ConnectionAborted);
        assert_eq!(accept_backoff(&aborted), None);
    }

    #[test]
    fn resource_exhaustion_backs_off() {
        // EMFILE surfaces as an uncategorized OS error.
        let exhausted = io::Error::from_raw_os_error(24);
        assert_eq!(accept_backoff(&exhausted), Some(Duration::from_secs(1)));

        let other = io::Error::new(io::ErrorKind::Other, "too many open files");
        assert_eq!(accept_backoff(&other), Some(Duration::from_secs(1)));
    }
}
