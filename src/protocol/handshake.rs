use crate::protocol::{ProtocolError, ACK_TOKEN};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, trace};

pub async fn write_ack<W: AsyncWrite + Unpin>(writer: &mut W) -> anyhow::Result<()> {
    writer.write_all(ACK_TOKEN).await?;
    writer.flush().await?;

    debug!("Acknowledgment written");
    Ok(())
}

pub async fn expect_ack<R: AsyncRead + Unpin>(reader: &mut R) -> anyhow::Result<()> {
    debug!("Waiting for acknowledgment ({} bytes)", ACK_TOKEN.len());

    let mut buf = [0u8; ACK_TOKEN.len()];
    let mut filled = 0;
    while filled < buf.len() {
        let read = reader.read(&mut buf[filled..]).await?;
        if read == 0 {
            error!("Peer closed before acknowledging, {} bytes received", filled);
            return Err(ProtocolError::Truncated {
                expected: ACK_TOKEN.len() as u64,
                received: filled as u64,
            }
            .into());
        }
        filled += read;
    }

    trace!("Raw acknowledgment bytes: {:?}", buf);

    if &buf[..] != ACK_TOKEN {
        error!("Unexpected acknowledgment: {:?}", String::from_utf8_lossy(&buf));
        return Err(ProtocolError::UnexpectedAck(buf.to_vec()).into());
    }

    debug!("Acknowledgment received");
    Ok(())
}
