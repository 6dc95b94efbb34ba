// ────────────────────────────────
// src/server/builder.rs
// ────────────────────────────────
use crate::server::handler::ConnectionHandler;
use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

/// Builder pattern so `Proxy` can inject its handler and shutdown token.
pub struct ServerBuilder {
    listener: TcpListener,
    handler: Option<ConnectionHandler>,
    shutdown: CancellationToken,
}

impl ServerBuilder {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            handler: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_handler(mut self, handler: ConnectionHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Accept until cancelled, spawning one task per connection.
    ///
    /// Cancellation stops accepting and waits for in-flight connections to
    /// finish on their own. An accept error is returned immediately: the
    /// listener is unusable and the caller is expected to exit.
    pub async fn serve(self) -> Result<()> {
        let Self {
            listener,
            handler,
            shutdown,
        } = self;
        let handler = handler.context("handler must be set via with_handler()")?;
        let tracker = TaskTracker::new();

        info!("Starting, listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("Accept failed: {}", e);
                            return Err(e).context("accept failed");
                        }
                    };

                    let handler = handler.clone();
                    tracker.spawn(async move {
                        handler.handle(stream, peer).await;
                    });
                }
            }
        }

        drop(listener);
        tracker.close();
        if !tracker.is_empty() {
            info!("Waiting for {} connection(s) to drain", tracker.len());
        }
        tracker.wait().await;

        Ok(())
    }
}
