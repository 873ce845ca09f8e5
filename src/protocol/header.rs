use crate::protocol::{ProtocolError, MAX_ENCODABLE_SIZE, RECV_CHUNK, SIZE_HEADER_LEN};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, trace};

/// Initial payload buffer reservation; the buffer grows as bytes arrive so a
/// large declared size alone does not allocate.
const INITIAL_PAYLOAD_CAPACITY: usize = 1024 * 1024;

/// Encode `size` right-aligned and space padded in the fixed-width header
pub fn encode_size_header(size: u64) -> Result<[u8; SIZE_HEADER_LEN], ProtocolError> {
    if size == 0 {
        return Err(ProtocolError::ZeroSize);
    }
    if size > MAX_ENCODABLE_SIZE {
        return Err(ProtocolError::HeaderOverflow(size));
    }

    let text = format!("{:>width$}", size, width = SIZE_HEADER_LEN);
    let mut buf = [0u8; SIZE_HEADER_LEN];
    buf.copy_from_slice(text.as_bytes());
    Ok(buf)
}

/// Decode a (possibly short) size header.
///
/// Surrounding whitespace and NUL padding are ignored. The remainder must be
/// a non-empty run of ASCII digits describing a positive size.
pub fn decode_size_header(buf: &[u8]) -> Result<u64, ProtocolError> {
    let raw = String::from_utf8_lossy(buf);
    let digits = raw.trim_matches(|c: char| c.is_ascii_whitespace() || c == '\0');

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        error!("Malformed size header: {:?}", raw);
        return Err(ProtocolError::InvalidHeader(raw.into_owned()));
    }

    let size: u64 = digits
        .parse()
        .map_err(|_| ProtocolError::InvalidHeader(raw.to_string()))?;
    if size == 0 {
        return Err(ProtocolError::ZeroSize);
    }

    Ok(size)
}

pub async fn write_size_header<W: AsyncWrite + Unpin>(
    writer: &mut W,
    size: u64,
) -> anyhow::Result<()> {
    let header = encode_size_header(size)?;
    trace!("Size header bytes: {:?}", header);

    writer.write_all(&header).await?;
    writer.flush().await?;

    debug!("Size header written: {} bytes declared", size);
    Ok(())
}

/// Read the size header.
///
/// Collects up to `SIZE_HEADER_LEN` bytes. Reading stops early when the peer
/// closes, or when some bytes have arrived and the peer then stays silent for
/// `grace`: an unpadded header is followed by the peer waiting for the
/// acknowledgment, so nothing else can arrive.
///
/// Returns `Ok(None)` when the peer closed before sending anything.
pub async fn read_size_header<R: AsyncRead + Unpin>(
    reader: &mut R,
    grace: Duration,
) -> anyhow::Result<Option<u64>> {
    let mut buf = [0u8; SIZE_HEADER_LEN];
    let mut filled = 0;

    while filled < SIZE_HEADER_LEN {
        let read = if filled == 0 {
            reader.read(&mut buf[filled..]).await?
        } else {
            match tokio::time::timeout(grace, reader.read(&mut buf[filled..])).await {
                Ok(read) => read?,
                Err(_) => {
                    trace!("Size header settled after {} bytes", filled);
                    break;
                }
            }
        };

        if read == 0 {
            break;
        }
        filled += read;
    }

    if filled == 0 {
        return Ok(None);
    }

    let size = decode_size_header(&buf[..filled])?;
    debug!("Size header read: {} bytes declared", size);
    Ok(Some(size))
}

/// Read exactly `size` payload bytes, however the peer fragments them.
///
/// End-of-stream before `size` bytes is reported as
/// [`ProtocolError::Truncated`]; it never waits past it.
pub async fn read_payload<R: AsyncRead + Unpin>(
    reader: &mut R,
    size: u64,
) -> anyhow::Result<Vec<u8>> {
    let expected = usize::try_from(size).map_err(|_| ProtocolError::PayloadTooLarge {
        size,
        max: usize::MAX as u64,
    })?;

    let mut payload = Vec::with_capacity(expected.min(INITIAL_PAYLOAD_CAPACITY));
    let mut chunk = [0u8; RECV_CHUNK];

    while payload.len() < expected {
        let want = (expected - payload.len()).min(RECV_CHUNK);
        let read = reader.read(&mut chunk[..want]).await?;
        if read == 0 {
            return Err(ProtocolError::Truncated {
                expected: size,
                received: payload.len() as u64,
            }
            .into());
        }
        payload.extend_from_slice(&chunk[..read]);
    }

    Ok(payload)
}
