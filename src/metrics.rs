use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::session::SessionOutcome;

#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    pub uptime_seconds: u64,
    pub connections_accepted: u64,
    pub active_connections: u64,
    pub captions_served: u64,
    pub errors_replied: u64,
    pub connections_rejected: u64,
    pub clean_disconnects: u64,
    pub payload_bytes_received: u64,
}

pub struct MetricsCollector {
    start_time: std::time::SystemTime,
    accepted: AtomicU64,
    active_connections: AtomicU64,
    captioned: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    disconnected: AtomicU64,
    payload_bytes: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            start_time: std::time::SystemTime::now(),
            accepted: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            captioned: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            disconnected: AtomicU64::new(0),
            payload_bytes: AtomicU64::new(0),
        }
    }

    pub fn connection_opened(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self, outcome: SessionOutcome) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
        let counter = match outcome {
            SessionOutcome::Captioned => &self.captioned,
            SessionOutcome::Failed => &self.failed,
            SessionOutcome::Rejected => &self.rejected,
            SessionOutcome::Disconnected => &self.disconnected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_payload(&self, bytes: u64) {
        self.payload_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn get_metrics(&self) -> Metrics {
        let uptime = self.start_time.elapsed().unwrap_or_default().as_secs();

        Metrics {
            uptime_seconds: uptime,
            connections_accepted: self.accepted.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            captions_served: self.captioned.load(Ordering::Relaxed),
            errors_replied: self.failed.load(Ordering::Relaxed),
            connections_rejected: self.rejected.load(Ordering::Relaxed),
            clean_disconnects: self.disconnected.load(Ordering::Relaxed),
            payload_bytes_received: self.payload_bytes.load(Ordering::Relaxed),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn start_metrics_server(addr: &str, metrics: Arc<MetricsCollector>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on {}", addr);
    serve_metrics(listener, metrics).await
}

async fn serve_metrics(listener: TcpListener, metrics: Arc<MetricsCollector>) -> anyhow::Result<()> {
    loop {
        let (mut socket, _) = listener.accept().await?;
        let metrics = Arc::clone(&metrics);

        tokio::spawn(async move {
            let mut buffer = [0; 1024];
            if let Ok(n) = socket.read(&mut buffer).await {
                let request = String::from_utf8_lossy(&buffer[..n]);

                let response = if request.starts_with("GET /metrics") {
                    let json = serde_json::to_string_pretty(&metrics.get_metrics()).unwrap_or_default();
                    format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                        json.len(),
                        json
                    )
                } else if request.starts_with("GET /health") {
                    "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK".to_string()
                } else {
                    "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_string()
                };

                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
    }
}
