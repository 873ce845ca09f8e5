//! Protocol constants for the caption transfer protocol

/// Width of the textual size header on the wire
pub const SIZE_HEADER_LEN: usize = 16;

/// Largest payload size that fits in the size header (16 decimal digits)
pub const MAX_ENCODABLE_SIZE: u64 = 9_999_999_999_999_999;

/// Sent by the server once the size header has been parsed
pub const ACK_TOKEN: &[u8] = b"SIZE_OK";

/// Sent in place of a caption when anything fails after the acknowledgment
pub const ERROR_TOKEN: &[u8] = b"ERROR";

pub const MAX_REPLY_SIZE: usize = 4096;

pub const RECV_CHUNK: usize = 4096;

pub const DEFAULT_PORT: u16 = 5000;
