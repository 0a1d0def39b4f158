//! Stream framing and descriptor ID management.
//!
//! Two frame shapes share one byte channel:
//!
//! ```text
//! [NN]LLLLLL<xml...>     descriptor frame, NN = 00..99 or xx, L = 6-digit length
//! :NN:<payload...>       data frame, payload = PacketDescriptor::size_bytes()
//! ```
//!
//! [`QStreamCodec`] splits a byte buffer into [`Frame`]s and writes them back;
//! it drives both the blocking parser and the async provider.
//! [`DescriptorRegistry`] allocates the two-digit IDs on the writer side.

mod frame;
mod registry;

use std::fmt;

pub use frame::{
    DATA_HEADER_LEN, DESCRIPTOR_HEADER_LEN, Frame, MAX_DESCRIPTOR_LEN, QStreamCodec,
    write_data_frame, write_descriptor_frame,
};
pub use registry::{DescriptorHandle, DescriptorRegistry};

/// Two-digit packet type ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketId(u8);

impl PacketId {
    /// ID of the stream descriptor.
    pub const STREAM: PacketId = PacketId(0);
    /// Highest ID a packet descriptor can hold.
    pub const MAX: u8 = 99;

    pub const fn new(id: u8) -> Self {
        PacketId(id)
    }

    /// ID within 0..=99.
    pub fn checked(id: u8) -> Option<Self> {
        (id <= Self::MAX).then_some(PacketId(id))
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Parse the two ASCII digits of a frame tag.
    pub fn from_tag(tag: [u8; 2]) -> Option<Self> {
        if tag.iter().all(u8::is_ascii_digit) {
            Some(PacketId((tag[0] - b'0') * 10 + (tag[1] - b'0')))
        } else {
            None
        }
    }

    /// Two ASCII digits for a frame tag.
    pub fn tag(self) -> [u8; 2] {
        [b'0' + self.0 / 10, b'0' + self.0 % 10]
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_two_digits() {
        assert_eq!(PacketId::new(7).tag(), *b"07");
        assert_eq!(PacketId::from_tag(*b"42"), Some(PacketId::new(42)));
        assert_eq!(PacketId::from_tag(*b"xx"), None);
        assert_eq!(PacketId::new(3).to_string(), "03");
        assert_eq!(PacketId::checked(100), None);
    }
}
