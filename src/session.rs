use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, trace, warn};

use crate::config::ServerConfig;
use crate::inference::Captioner;
use crate::metrics::MetricsCollector;
use crate::protocol::{
    handshake::write_ack,
    header::{read_payload, read_size_header},
    reply::{write_reply, Reply},
    ProtocolError,
};
use crate::staging::StagingFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Captioned,
    Failed,
    /// Malformed or oversized size header, dropped without acknowledgment
    Rejected,
    /// The peer went away before the acknowledgment was delivered
    Disconnected,
}

pub struct Session<S> {
    stream: S,
    peer: String,
    config: Arc<ServerConfig>,
    captioner: Arc<dyn Captioner>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        config: Arc<ServerConfig>,
        captioner: Arc<dyn Captioner>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            stream,
            peer: peer.into(),
            config,
            captioner,
            metrics,
        }
    }

    pub async fn run(mut self) -> SessionOutcome {
        let outcome = self.serve().await;

        if let Err(e) = self.stream.shutdown().await {
            trace!("Shutdown of {} failed: {}", self.peer, e);
        }
        debug!("Connection {} closed: {:?}", self.peer, outcome);

        outcome
    }

    async fn serve(&mut self) -> SessionOutcome {
        let io_timeout = self.config.io_timeout();
        let grace = self.config.header_grace();

        let size = match bounded(io_timeout, read_size_header(&mut self.stream, grace)).await {
            Ok(Some(size)) => size,
            Ok(None) => {
                info!("{} disconnected without sending a size header", self.peer);
                return SessionOutcome::Disconnected;
            }
            Err(e) => {
                warn!("Rejecting {}: {}", self.peer, e);
                return SessionOutcome::Rejected;
            }
        };

        if size > self.config.max_payload_size {
            let e = ProtocolError::PayloadTooLarge {
                size,
                max: self.config.max_payload_size,
            };
            warn!("Rejecting {}: {}", self.peer, e);
            return SessionOutcome::Rejected;
        }

        if let Err(e) = bounded(io_timeout, write_ack(&mut self.stream)).await {
            warn!("Failed to acknowledge {}: {}", self.peer, e);
            return SessionOutcome::Disconnected;
        }

        let reply = match self.receive_and_caption(size, io_timeout).await {
            Ok(caption) => Reply::Caption(caption),
            Err(e) => {
                error!("Request from {} failed: {:#}", self.peer, e);
                Reply::Error
            }
        };

        if let Err(e) = bounded(io_timeout, write_reply(&mut self.stream, &reply)).await {
            warn!("Failed to send reply to {}: {}", self.peer, e);
        }

        match reply {
            Reply::Caption(_) => SessionOutcome::Captioned,
            Reply::Error => SessionOutcome::Failed,
        }
    }

    async fn receive_and_caption(
        &mut self,
        size: u64,
        io_timeout: Option<Duration>,
    ) -> anyhow::Result<String> {
        let payload = bounded(io_timeout, read_payload(&mut self.stream, size)).await?;
        if let Some(metrics) = &self.metrics {
            metrics.record_payload(payload.len() as u64);
        }

        let staged = StagingFile::create(&self.config.staging_directory, &payload).await?;
        drop(payload);

        info!("Image received from {} ({} bytes), generating caption", self.peer, size);
        let caption = self.captioner.caption(staged.path()).await?;
        info!("Caption for {}: {}", self.peer, caption);

        Ok(caption)
    }
}

async fn bounded<T, F>(limit: Option<Duration>, step: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, step)
            .await
            .map_err(|_| anyhow::anyhow!("timed out after {:?}", limit))?,
        None => step.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::testing::ContentCaptioner;
    use crate::protocol::header::write_size_header;
    use crate::utils::io::read_up_to;
    use tokio::io::DuplexStream;

    struct Harness {
        _staging: tempfile::TempDir,
        config: Arc<ServerConfig>,
        metrics: Arc<MetricsCollector>,
    }

    impl Harness {
        fn new() -> Self {
            let staging = tempfile::tempdir().unwrap();
            let config = ServerConfig {
                staging_directory: staging.path().to_path_buf(),
                max_payload_size: 1024,
                header_grace_ms: 50,
                ..ServerConfig::default()
            };
            Self {
                _staging: staging,
                config: Arc::new(config),
                metrics: Arc::new(MetricsCollector::new()),
            }
        }

        fn spawn(&self, server: DuplexStream) -> tokio::task::JoinHandle<SessionOutcome> {
            let session = Session::new(
                server,
                "test-peer",
                Arc::clone(&self.config),
                Arc::new(ContentCaptioner),
                Some(Arc::clone(&self.metrics)),
            );
            tokio::spawn(session.run())
        }

        fn staged_files(&self) -> usize {
            crate::staging::staged_count(&self.config.staging_directory)
        }
    }

    #[tokio::test]
    async fn test_caption_round_trip() {
        let harness = Harness::new();
        let (mut client, server) = tokio::io::duplex(4096);
        let handle = harness.spawn(server);

        write_size_header(&mut client, 10).await.unwrap();
        let mut ack = [0u8; 7];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut ack).await.unwrap();
        assert_eq!(&ack, b"SIZE_OK");

        client.write_all(b"0123456789").await.unwrap();
        let reply = read_up_to(&mut client, 4096).await.unwrap();
        assert_eq!(reply, b"caption of 0123456789");

        assert_eq!(handle.await.unwrap(), SessionOutcome::Captioned);
        assert_eq!(harness.staged_files(), 0);
        assert_eq!(harness.metrics.get_metrics().payload_bytes_received, 10);
    }

    #[tokio::test]
    async fn test_collaborator_failure_sends_error_token() {
        let harness = Harness::new();
        let (mut client, server) = tokio::io::duplex(4096);
        let handle = harness.spawn(server);

        write_size_header(&mut client, 8).await.unwrap();
        client.write_all(b"fail-img").await.unwrap();
        let reply = read_up_to(&mut client, 4096).await.unwrap();
        assert_eq!(reply, b"SIZE_OKERROR");

        assert_eq!(handle.await.unwrap(), SessionOutcome::Failed);
        assert_eq!(harness.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_immediate_close_gets_no_reply() {
        let harness = Harness::new();
        let (client, server) = tokio::io::duplex(4096);
        let handle = harness.spawn(server);
        drop(client);

        assert_eq!(handle.await.unwrap(), SessionOutcome::Disconnected);
    }

    #[tokio::test]
    async fn test_malformed_header_gets_no_ack() {
        let harness = Harness::new();
        let (mut client, server) = tokio::io::duplex(4096);
        let handle = harness.spawn(server);

        client.write_all(b"not-a-number!!!!").await.unwrap();
        let reply = read_up_to(&mut client, 4096).await.unwrap();
        assert!(reply.is_empty());

        assert_eq!(handle.await.unwrap(), SessionOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected_before_ack() {
        let harness = Harness::new();
        let (mut client, server) = tokio::io::duplex(4096);
        let handle = harness.spawn(server);

        write_size_header(&mut client, 1025).await.unwrap();
        let reply = read_up_to(&mut client, 4096).await.unwrap();
        assert!(reply.is_empty());

        assert_eq!(handle.await.unwrap(), SessionOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_truncated_payload_does_not_hang() {
        let harness = Harness::new();
        let (mut client, server) = tokio::io::duplex(4096);
        let handle = harness.spawn(server);

        write_size_header(&mut client, 100).await.unwrap();
        client.write_all(b"only twenty bytes...").await.unwrap();
        client.shutdown().await.unwrap();

        let reply = read_up_to(&mut client, 4096).await.unwrap();
        assert_eq!(reply, b"SIZE_OKERROR");
        assert_eq!(handle.await.unwrap(), SessionOutcome::Failed);
        assert_eq!(harness.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_unpadded_header_accepted() {
        let harness = Harness::new();
        let (mut client, server) = tokio::io::duplex(4096);
        let handle = harness.spawn(server);

        client.write_all(b"5").await.unwrap();
        let mut ack = [0u8; 7];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut ack).await.unwrap();
        assert_eq!(&ack, b"SIZE_OK");

        client.write_all(b"hello").await.unwrap();
        let reply = read_up_to(&mut client, 4096).await.unwrap();
        assert_eq!(reply, b"caption of hello");
        assert_eq!(handle.await.unwrap(), SessionOutcome::Captioned);
    }

    #[tokio::test]
    async fn test_stalled_peer_times_out() {
        let staging = tempfile::tempdir().unwrap();
        let config = Arc::new(ServerConfig {
            staging_directory: staging.path().to_path_buf(),
            io_timeout_secs: Some(1),
            ..ServerConfig::default()
        });
        let (mut client, server) = tokio::io::duplex(4096);
        let session = Session::new(server, "stalled", config, Arc::new(ContentCaptioner), None);
        let handle = tokio::spawn(session.run());

        // Declares 50 bytes and never sends them.
        write_size_header(&mut client, 50).await.unwrap();
        let reply = read_up_to(&mut client, 4096).await.unwrap();
        assert_eq!(reply, b"SIZE_OKERROR");
        assert_eq!(handle.await.unwrap(), SessionOutcome::Failed);
    }
}
