use std::path::Path;
use anyhow::{bail, Context};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::protocol::{
    handshake::expect_ack,
    header::{encode_size_header, write_size_header},
    reply::Reply,
    MAX_REPLY_SIZE,
};
use crate::utils::io::read_up_to;

pub async fn send_image(image: &Path, server: &str) -> anyhow::Result<Reply> {
    let payload = tokio::fs::read(image)
        .await
        .with_context(|| format!("failed to read {}", image.display()))?;
    info!("Sending {} ({} bytes) to {}", image.display(), payload.len(), server);

    send_payload(&payload, server).await
}

pub async fn send_payload(payload: &[u8], server: &str) -> anyhow::Result<Reply> {
    let size = payload.len() as u64;
    encode_size_header(size)?;

    let mut stream = TcpStream::connect(server)
        .await
        .with_context(|| format!("failed to connect to {}", server))?;
    debug!("Connected to {}", server);

    write_size_header(&mut stream, size).await?;
    expect_ack(&mut stream).await?;

    stream.write_all(payload).await?;
    stream.flush().await?;
    debug!("Payload sent: {} bytes", size);

    let reply = read_up_to(&mut stream, MAX_REPLY_SIZE).await?;
    if reply.is_empty() {
        bail!("server closed the connection without replying");
    }

    Ok(Reply::decode(&reply))
}
