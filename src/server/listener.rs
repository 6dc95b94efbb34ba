// ────────────────────────────────
// src/server/listener.rs
// Encapsulates low‑level TCP bind so the accept loop can be handed any listener.
// ────────────────────────────────
use anyhow::{Context, Result};
use tokio::net::TcpListener;

pub async fn bind_tcp(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to open listening socket on {}", addr))?;
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let listener = bind_tcp("127.0.0.1:0").await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let first = bind_tcp("127.0.0.1:0").await.unwrap();
        let addr = first.local_addr().unwrap().to_string();
        let err = bind_tcp(&addr).await.unwrap_err();
        assert!(err.to_string().contains("Failed to open listening socket"));
    }
}
