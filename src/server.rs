use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};
use crate::config::ServerConfig;
use crate::inference::Captioner;
use crate::metrics::{MetricsCollector, start_metrics_server};
use crate::session::Session;
use std::sync::Arc;

pub async fn run(config: ServerConfig, captioner: Arc<dyn Captioner>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.listen_address).await?;
    info!("Server listening on {}", config.listen_address);

    let metrics = Arc::new(MetricsCollector::new());

    if let Some(metrics_addr) = config.metrics_address.clone() {
        let metrics_clone = Arc::clone(&metrics);
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(&metrics_addr, metrics_clone).await {
                error!("Metrics server failed: {}", e);
            }
        });
    }

    serve(listener, Arc::new(config), captioner, metrics).await
}

// With `max_connections` set, accepting waits for a free slot.
pub async fn serve(
    listener: TcpListener,
    config: Arc<ServerConfig>,
    captioner: Arc<dyn Captioner>,
    metrics: Arc<MetricsCollector>,
) -> anyhow::Result<()> {
    let connection_limit = config.max_connections.map(|limit| Arc::new(Semaphore::new(limit)));

    loop {
        let permit = match &connection_limit {
            Some(limit) => Some(Arc::clone(limit).acquire_owned().await?),
            None => None,
        };

        match listener.accept().await {
            Ok((socket, peer)) => {
                info!("Connected by {}", peer);
                metrics.connection_opened();

                let session = Session::new(
                    socket,
                    peer.to_string(),
                    Arc::clone(&config),
                    Arc::clone(&captioner),
                    Some(Arc::clone(&metrics)),
                );
                let metrics_for_cleanup = Arc::clone(&metrics);

                tokio::spawn(async move {
                    let outcome = session.run().await;
                    debug!("Session for {} finished: {:?}", peer, outcome);
                    metrics_for_cleanup.connection_closed(outcome);
                    drop(permit);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::send_payload;
    use crate::protocol::reply::Reply;
    use crate::inference::testing::ContentCaptioner;
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    struct TestServer {
        addr: SocketAddr,
        staging: tempfile::TempDir,
        metrics: Arc<MetricsCollector>,
    }

    async fn start(max_connections: Option<usize>) -> TestServer {
        let staging = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            listen_address: "127.0.0.1:0".to_string(),
            staging_directory: staging.path().to_path_buf(),
            max_connections,
            header_grace_ms: 50,
            ..ServerConfig::default()
        };
        let listener = TcpListener::bind(&config.listen_address).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let metrics = Arc::new(MetricsCollector::new());

        tokio::spawn(serve(
            listener,
            Arc::new(config),
            Arc::new(ContentCaptioner),
            Arc::clone(&metrics),
        ));

        TestServer { addr, staging, metrics }
    }

    #[tokio::test]
    async fn test_round_trip_over_tcp() {
        let server = start(None).await;

        let reply = send_payload(b"a cat photo", &server.addr.to_string()).await.unwrap();
        assert_eq!(reply, Reply::Caption("caption of a cat photo".to_string()));
        assert_eq!(crate::staging::staged_count(server.staging.path()), 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_do_not_mix() {
        let server = start(None).await;
        let addr = server.addr.to_string();

        let slow = {
            let addr = addr.clone();
            tokio::spawn(async move { send_payload(b"slow:B", &addr).await })
        };
        // Give the slow request time to reach the captioner first.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let fast = send_payload(b"A", &addr).await.unwrap();

        assert_eq!(fast, Reply::Caption("caption of A".to_string()));
        assert_eq!(
            slow.await.unwrap().unwrap(),
            Reply::Caption("caption of B".to_string())
        );
        assert_eq!(crate::staging::staged_count(server.staging.path()), 0);
    }

    #[tokio::test]
    async fn test_bad_connection_does_not_stop_listener() {
        let server = start(None).await;

        let mut garbage = TcpStream::connect(server.addr).await.unwrap();
        garbage.write_all(b"xxxxxxxxxxxxxxxx").await.unwrap();
        drop(garbage);
        drop(TcpStream::connect(server.addr).await.unwrap());

        let reply = send_payload(b"fail", &server.addr.to_string()).await.unwrap();
        assert_eq!(reply, Reply::Error);

        let reply = send_payload(b"still up", &server.addr.to_string()).await.unwrap();
        assert_eq!(reply, Reply::Caption("caption of still up".to_string()));
        assert!(server.metrics.get_metrics().connections_accepted >= 4);
    }

    #[tokio::test]
    async fn test_admission_limit_serializes_connections() {
        let server = start(Some(1)).await;
        let addr = server.addr.to_string();

        let started = Instant::now();
        let first = {
            let addr = addr.clone();
            tokio::spawn(async move { send_payload(b"slow:1", &addr).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = send_payload(b"slow:2", &addr).await.unwrap();

        assert_eq!(second, Reply::Caption("caption of 2".to_string()));
        assert_eq!(
            first.await.unwrap().unwrap(),
            Reply::Caption("caption of 1".to_string())
        );
        // Two 300ms captions back to back rather than overlapping.
        assert!(started.elapsed() >= Duration::from_millis(600));
    }
}
