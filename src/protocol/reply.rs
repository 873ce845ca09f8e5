use crate::protocol::{ERROR_TOKEN, MAX_REPLY_SIZE};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Final message of a connection, sent server to client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Caption(String),
    Error,
}

impl Reply {
    /// Wire form. Captions longer than `MAX_REPLY_SIZE` are cut at the last
    /// character boundary that fits.
    pub fn encode(&self) -> &[u8] {
        match self {
            Reply::Caption(text) => {
                if text.len() <= MAX_REPLY_SIZE {
                    return text.as_bytes();
                }
                let mut end = MAX_REPLY_SIZE;
                while !text.is_char_boundary(end) {
                    end -= 1;
                }
                warn!("Caption truncated from {} to {} bytes", text.len(), end);
                &text.as_bytes()[..end]
            }
            Reply::Error => ERROR_TOKEN,
        }
    }

    pub fn decode(bytes: &[u8]) -> Self {
        if bytes == ERROR_TOKEN {
            Reply::Error
        } else {
            Reply::Caption(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

pub async fn write_reply<W: AsyncWrite + Unpin>(
    writer: &mut W,
    reply: &Reply,
) -> anyhow::Result<()> {
    let bytes = reply.encode();
    writer.write_all(bytes).await?;
    writer.flush().await?;

    debug!("Reply written: {} bytes", bytes.len());
    Ok(())
}
