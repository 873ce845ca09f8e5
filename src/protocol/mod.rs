pub mod constants;
pub mod error;
pub mod handshake;
pub mod header;
pub mod reply;

pub use constants::*;
pub use error::ProtocolError;
