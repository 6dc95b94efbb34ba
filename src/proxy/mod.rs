mod backend;
mod forwarder;
mod pool;
mod proxy;

pub use backend::{Backend, BackendSnapshot, HealthStatus};
pub use forwarder::{Direction, ForwardSummary, Forwarder, BUFFER_SIZE};
pub use pool::BackendPool;
pub use proxy::{Proxy, ProxyError};
