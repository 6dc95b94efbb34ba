// src/metrics/server.rs
use super::MetricsRegistry;
use crate::proxy::BackendPool;
use anyhow::{Context, Result};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Serve `GET <path>` (Prometheus text) and `GET /stats` (JSON pool snapshot).
///
/// Returns the bound address and the server task, which exits when
/// `shutdown` is cancelled.
pub async fn start_metrics_server(
    addr: SocketAddr,
    registry: Arc<MetricsRegistry>,
    pool: Arc<BackendPool>,
    path: String,
    shutdown: CancellationToken,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let metrics_path = Arc::new(path);
    let service_path = metrics_path.clone();

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();
        let pool = pool.clone();
        let path = service_path.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let pool = pool.clone();
                let path = path.clone();

                async move { Ok::<_, Infallible>(route(req, &registry, &pool, &path).await) }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("Failed to bind metrics server on {}", addr))?
        .serve(make_service);
    let local_addr = server.local_addr();

    info!(
        "Metrics server listening on http://{}{}",
        local_addr,
        metrics_path.as_str()
    );

    let handle = tokio::spawn(async move {
        let graceful = server.with_graceful_shutdown(async move { shutdown.cancelled().await });
        if let Err(e) = graceful.await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok((local_addr, handle))
}

async fn route(
    req: Request<Body>,
    registry: &MetricsRegistry,
    pool: &BackendPool,
    metrics_path: &str,
) -> Response<Body> {
    let path = req.uri().path().to_owned();

    if path == metrics_path {
        match registry.gather() {
            Ok(body) => respond(StatusCode::OK, "text/plain; version=0.0.4", body),
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "encode error")
            }
        }
    } else if path == "/stats" {
        match serde_json::to_vec(&pool.snapshot().await) {
            Ok(body) => respond(StatusCode::OK, "application/json", body),
            Err(e) => {
                error!("Failed to encode stats: {}", e);
                respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "encode error")
            }
        }
    } else {
        respond(StatusCode::NOT_FOUND, "text/plain", "Not Found")
    }
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_serves_metrics_stats_and_404() {
        let registry = Arc::new(MetricsRegistry::new().unwrap());
        let pool = Arc::new(
            BackendPool::new(&["127.0.0.1:1"], Duration::from_millis(100))
                .with_metrics(registry.collector()),
        );
        let shutdown = CancellationToken::new();

        let (addr, handle) = start_metrics_server(
            "127.0.0.1:0".parse().unwrap(),
            registry,
            pool,
            "/metrics".to_string(),
            shutdown.clone(),
        )
        .await
        .unwrap();

        let metrics = get(addr, "/metrics").await;
        assert!(metrics.starts_with("HTTP/1.1 200"));
        assert!(metrics.contains("tcp_fallback_backend_failed{backend=\"127.0.0.1:1\"} 0"));

        let stats = get(addr, "/stats").await;
        assert!(stats.starts_with("HTTP/1.1 200"));
        assert!(stats.contains("\"address\":\"127.0.0.1:1\""));
        assert!(stats.contains("\"failed\":false"));

        let missing = get(addr, "/nope").await;
        assert!(missing.starts_with("HTTP/1.1 404"));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("metrics server should stop")
            .unwrap();
    }
}
