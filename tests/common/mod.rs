//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use fanout_guard::config::{CacheConfig, RegistryConfig};
use fanout_guard::registry::{HealthState, ServiceInstance, ServiceRegistry};
use fanout_guard::resilience::{BreakerManager, CircuitBreakerConfig};
use fanout_guard::{FanoutCache, Orchestrator};

/// Read one HTTP/1.1 request and return its path.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return String::new(),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    head.split_whitespace().nth(1).unwrap_or("/").to_string()
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        404 => "404 Not Found",
        429 => "429 Too Many Requests",
        500 => "500 Internal Server Error",
        502 => "502 Bad Gateway",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

/// Start a mock backend answering every path with 200 and a fixed body.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move |_path| async move { (200, response.to_string()) }).await
}

/// Start a programmable mock backend. `f` receives the request path.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let path = read_request(&mut socket).await;
                        let (status, body) = f(path).await;

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text(status),
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// Registry, breakers and orchestrator wired together without background loops.
pub struct Harness {
    pub registry: Arc<ServiceRegistry>,
    pub breakers: Arc<BreakerManager>,
    pub orchestrator: Orchestrator,
}

pub fn harness(breaker: CircuitBreakerConfig, registry: RegistryConfig, remote_timeout: Duration) -> Harness {
    let registry = Arc::new(ServiceRegistry::new(registry));
    let breakers = Arc::new(BreakerManager::new(breaker));
    let orchestrator = Orchestrator::new(
        FanoutCache::new(CacheConfig::default()),
        registry.clone(),
        breakers.clone(),
    )
    .with_remote_timeout(remote_timeout);
    Harness {
        registry,
        breakers,
        orchestrator,
    }
}

/// A healthy instance pointing at `addr`.
pub fn instance(id: &str, service: &str, addr: SocketAddr) -> ServiceInstance {
    ServiceInstance::new(id, service, addr.ip().to_string(), addr.port()).with_health(HealthState::Healthy)
}
