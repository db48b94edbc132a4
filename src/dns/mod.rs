pub mod enums;
pub mod header;
pub mod packet;
pub mod question;
pub mod resource;
pub mod wire;

pub use enums::{DNSResourceClass, DNSResourceType, ResponseCode};
pub use header::DNSHeader;
pub use packet::DNSPacket;
pub use question::DNSQuestion;
pub use resource::DNSResource;

use thiserror::Error;

/// DNS opcodes used by the KDC plane.
pub const OPCODE_QUERY: u8 = 0;
pub const OPCODE_NOTIFY: u8 = 4;

#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("Invalid DNS label")]
    InvalidLabel,
    #[error("Name exceeds 255 octets")]
    NameTooLong,
    #[error("Message truncated")]
    Truncated,
}
