// tests/common/mod.rs
//
// Backends are echo servers that first announce their own address, so a
// client can tell which backend its connection landed on.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tcp_fallback::config::Config;
use tcp_fallback::proxy::{BackendPool, Proxy};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const PROBE_DELAY_MS: u64 = 100;
pub const CONNECT_TIMEOUT_MS: u64 = 500;

/// A loopback address with nothing listening on it.
pub async fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub struct EchoServer {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl EchoServer {
    pub async fn start(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();

        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(respond(stream, addr));
            }
        });

        Self { addr, task }
    }

    /// Stop accepting; later connects to `addr` are refused.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

async fn respond(mut stream: TcpStream, addr: SocketAddr) {
    if stream.write_all(format!("{}\n", addr).as_bytes()).await.is_err() {
        return;
    }
    let (mut reader, mut writer) = stream.split();
    let _ = tokio::io::copy(&mut reader, &mut writer).await;
}

pub struct ProxyHandle {
    pub addr: SocketAddr,
    pub pool: Arc<BackendPool>,
    shutdown: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
}

impl ProxyHandle {
    pub async fn spawn(backends: &[SocketAddr]) -> Self {
        Self::spawn_with(backends, |_| {}).await
    }

    pub async fn spawn_with(backends: &[SocketAddr], tweak: impl FnOnce(&mut Config)) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut config = Config::new(
            addr.to_string(),
            backends.iter().map(|b| b.to_string()).collect(),
        );
        config.connect_timeout_ms = CONNECT_TIMEOUT_MS;
        config.probe_delay_ms = PROBE_DELAY_MS;
        tweak(&mut config);
        config.validate().unwrap();

        let proxy = Proxy::new(config, None);
        let pool = proxy.pool();
        let shutdown = CancellationToken::new();
        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { proxy.run(listener, shutdown).await })
        };

        Self {
            addr,
            pool,
            shutdown,
            task,
        }
    }

    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    pub async fn stop(self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("proxy did not stop")
            .unwrap()
    }
}

/// Connect through `proxy`, check the greeting names `expected`, then echo
/// random blocks. Returns the bytes that crossed the proxy in both directions.
pub async fn exchange(proxy: SocketAddr, expected: SocketAddr) -> u64 {
    let mut stream = TcpStream::connect(proxy).await.unwrap();

    let greeting = format!("{}\n", expected);
    let mut buf = vec![0u8; greeting.len()];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(String::from_utf8_lossy(&buf), greeting, "landed on the wrong backend");
    let mut transferred = greeting.len() as u64;

    let blocks: Vec<Vec<u8>> = {
        let mut rng = rand::thread_rng();
        (0..rng.gen_range(20..40))
            .map(|_| {
                let size = rng.gen_range(500..1000);
                (0..size).map(|_| rng.gen::<u8>()).collect()
            })
            .collect()
    };

    for block in blocks {
        stream.write_all(&block).await.unwrap();
        let mut echoed = vec![0u8; block.len()];
        stream.read_exact(&mut echoed).await.unwrap();
        assert_eq!(echoed, block, "blocks didn't match");
        transferred += 2 * block.len() as u64;
    }

    stream.shutdown().await.unwrap();
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    transferred
}

/// Poll `check` until it holds or `limit` elapses.
pub async fn wait_until<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
