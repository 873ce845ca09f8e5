use std::fmt;

#[derive(Debug)]
pub enum ProtocolError {
    InvalidHeader(String),
    ZeroSize,
    HeaderOverflow(u64),
    PayloadTooLarge { size: u64, max: u64 },
    Truncated { expected: u64, received: u64 },
    UnexpectedAck(Vec<u8>),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidHeader(raw) =>
                write!(f, "invalid size header {:?}", raw),
            ProtocolError::ZeroSize =>
                write!(f, "declared payload size is zero"),
            ProtocolError::HeaderOverflow(size) =>
                write!(f, "size {} does not fit in the size header", size),
            ProtocolError::PayloadTooLarge { size, max } =>
                write!(f, "payload too large: {} bytes (max {})", size, max),
            ProtocolError::Truncated { expected, received } =>
                write!(f, "truncated payload: received {} of {} bytes", received, expected),
            ProtocolError::UnexpectedAck(bytes) =>
                write!(f, "unexpected acknowledgment {:?}", String::from_utf8_lossy(bytes)),
        }
    }
}

impl std::error::Error for ProtocolError {}
