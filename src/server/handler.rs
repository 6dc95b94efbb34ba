// src/server/handler.rs
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::proxy::{BackendPool, Forwarder};

/// Per-connection work: pick a backend, then forward until both sides close.
#[derive(Clone)]
pub struct ConnectionHandler {
    pool: Arc<BackendPool>,
    forwarder: Forwarder,
}

impl ConnectionHandler {
    pub fn new(pool: Arc<BackendPool>, forwarder: Forwarder) -> Self {
        Self { pool, forwarder }
    }

    pub async fn handle(&self, client: TcpStream, peer: SocketAddr) {
        let span = info_span!("connection", id = %Uuid::new_v4(), %peer);

        async move {
            match self.pool.select_and_connect().await {
                Ok((upstream, backend)) => {
                    debug!("Forwarding {} to {}", peer, backend.address);
                    self.forwarder.forward(client, upstream, backend).await;
                }
                Err(e) => {
                    warn!("Failed to connect to any backend: {}", e);
                    drop(client);
                }
            }
        }
        .instrument(span)
        .await
    }
}
