//! Frame codec shared by the blocking and async readers
//!
//! The codec knows the payload size of every live packet ID. Descriptor frames
//! are self-delimiting; data frames are sized from the table, which the caller
//! updates with [`QStreamCodec::set_packet_size`] after each packet descriptor
//! has been parsed.

use bytes::{BufMut, Bytes, BytesMut};
use std::io::Write;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use super::PacketId;
use crate::{QStreamError, Result};

/// `[NN]` plus the six length digits.
pub const DESCRIPTOR_HEADER_LEN: usize = 10;
/// `:NN:`
pub const DATA_HEADER_LEN: usize = 4;
/// Largest descriptor the six length digits can express.
pub const MAX_DESCRIPTOR_LEN: usize = 999_999;

/// Most buffer growth requested at once while a frame is incomplete.
const RESERVE_STEP: usize = 64 * 1024;

const UNTRACKED_TAG: [u8; 2] = *b"xx";

/// One frame off the byte channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// XML descriptor; `id` is `None` for untracked `[xx]` frames
    Descriptor { id: Option<PacketId>, xml: Bytes },
    /// Record payload of a declared packet
    Data { id: PacketId, payload: Bytes },
}

impl Frame {
    pub fn id(&self) -> Option<PacketId> {
        match self {
            Frame::Descriptor { id, .. } => *id,
            Frame::Data { id, .. } => Some(*id),
        }
    }

    /// Bytes this frame occupies on the wire.
    pub fn wire_len(&self) -> usize {
        match self {
            Frame::Descriptor { xml, .. } => DESCRIPTOR_HEADER_LEN + xml.len(),
            Frame::Data { payload, .. } => DATA_HEADER_LEN + payload.len(),
        }
    }
}

/// Splits a byte stream into [`Frame`]s.
#[derive(Debug, Clone)]
pub struct QStreamCodec {
    sizes: [Option<usize>; PacketId::MAX as usize + 1],
}

impl QStreamCodec {
    pub fn new() -> Self {
        Self { sizes: [None; PacketId::MAX as usize + 1] }
    }

    /// Declare the data frame payload size of `id`.
    pub fn set_packet_size(&mut self, id: PacketId, size: usize) {
        if let Some(slot) = self.sizes.get_mut(id.index()) {
            *slot = Some(size);
        }
    }

    /// Forget `id`; later data frames with it are protocol errors.
    pub fn clear_packet_size(&mut self, id: PacketId) {
        if let Some(slot) = self.sizes.get_mut(id.index()) {
            *slot = None;
        }
    }

    pub fn packet_size(&self, id: PacketId) -> Option<usize> {
        self.sizes.get(id.index()).copied().flatten()
    }

    fn decode_descriptor(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < DESCRIPTOR_HEADER_LEN {
            src.reserve(DESCRIPTOR_HEADER_LEN - src.len());
            return Ok(None);
        }
        let tag = [src[1], src[2]];
        let id = if tag == UNTRACKED_TAG {
            None
        } else {
            Some(PacketId::from_tag(tag).ok_or_else(|| {
                let tag = String::from_utf8_lossy(&tag);
                QStreamError::protocol(None, format!("bad descriptor tag '{}'", tag))
            })?)
        };
        let raw_id = id.map(PacketId::value);
        if src[3] != b']' {
            return Err(QStreamError::protocol(raw_id, "descriptor tag is not closed by ']'"));
        }
        let length = parse_length(&src[4..DESCRIPTOR_HEADER_LEN])
            .ok_or_else(|| QStreamError::protocol(raw_id, "descriptor length is not six digits"))?;

        let total = DESCRIPTOR_HEADER_LEN + length;
        if src.len() < total {
            src.reserve((total - src.len()).min(RESERVE_STEP));
            return Ok(None);
        }
        let _ = src.split_to(DESCRIPTOR_HEADER_LEN);
        let xml = src.split_to(length).freeze();
        trace!(id = ?id, length, "descriptor frame");
        Ok(Some(Frame::Descriptor { id, xml }))
    }

    fn decode_data(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < DATA_HEADER_LEN {
            src.reserve(DATA_HEADER_LEN - src.len());
            return Ok(None);
        }
        let id = PacketId::from_tag([src[1], src[2]])
            .ok_or_else(|| QStreamError::protocol(None, "data frame tag is not two digits"))?;
        if src[3] != b':' {
            return Err(QStreamError::protocol(
                Some(id.value()),
                "data frame tag is not closed by ':'",
            ));
        }
        let size = self.packet_size(id).ok_or_else(|| {
            QStreamError::protocol(
                Some(id.value()),
                "data frame references a packet ID with no live descriptor",
            )
        })?;

        let total = DATA_HEADER_LEN.saturating_add(size);
        if src.len() < total {
            src.reserve((total - src.len()).min(RESERVE_STEP));
            return Ok(None);
        }
        let _ = src.split_to(DATA_HEADER_LEN);
        let payload = src.split_to(size).freeze();
        trace!(%id, size, "data frame");
        Ok(Some(Frame::Data { id, payload }))
    }
}

impl Default for QStreamCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_length(digits: &[u8]) -> Option<usize> {
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(digits.iter().fold(0usize, |acc, d| acc * 10 + (d - b'0') as usize))
}

impl Decoder for QStreamCodec {
    type Item = Frame;
    type Error = QStreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match src.first() {
            None => Ok(None),
            Some(b'[') => self.decode_descriptor(src),
            Some(b':') => self.decode_data(src),
            Some(other) => Err(QStreamError::protocol(
                None,
                format!("unexpected byte 0x{:02x} at frame boundary", other),
            )),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(QStreamError::protocol(
                None,
                format!("stream ends inside a frame ({} trailing bytes)", src.len()),
            )),
        }
    }
}

impl Encoder<Frame> for QStreamCodec {
    type Error = QStreamError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        match frame {
            Frame::Descriptor { id, xml } => {
                dst.reserve(DESCRIPTOR_HEADER_LEN + xml.len());
                dst.put_slice(&descriptor_header(id, xml.len())?);
                dst.put_slice(&xml);
            }
            Frame::Data { id, payload } => {
                dst.reserve(DATA_HEADER_LEN + payload.len());
                dst.put_slice(&data_header(id));
                dst.put_slice(&payload);
            }
        }
        Ok(())
    }
}

fn descriptor_header(id: Option<PacketId>, length: usize) -> Result<[u8; DESCRIPTOR_HEADER_LEN]> {
    if length > MAX_DESCRIPTOR_LEN {
        return Err(QStreamError::protocol(
            id.map(PacketId::value),
            format!("descriptor of {} bytes exceeds the six-digit length field", length),
        ));
    }
    let tag = id.map_or(UNTRACKED_TAG, PacketId::tag);
    let mut header = [0u8; DESCRIPTOR_HEADER_LEN];
    header[0] = b'[';
    header[1..3].copy_from_slice(&tag);
    header[3] = b']';
    header[4..].copy_from_slice(format!("{:06}", length).as_bytes());
    Ok(header)
}

fn data_header(id: PacketId) -> [u8; DATA_HEADER_LEN] {
    let tag = id.tag();
    [b':', tag[0], tag[1], b':']
}

/// Write one descriptor frame to a blocking sink.
pub fn write_descriptor_frame<W: Write + ?Sized>(
    out: &mut W,
    id: Option<PacketId>,
    xml: &[u8],
) -> Result<()> {
    let header = descriptor_header(id, xml.len())?;
    out.write_all(&header).map_err(|e| QStreamError::io("writing descriptor frame", e))?;
    out.write_all(xml).map_err(|e| QStreamError::io("writing descriptor frame", e))?;
    Ok(())
}

/// Write one data frame to a blocking sink.
pub fn write_data_frame<W: Write + ?Sized>(
    out: &mut W,
    id: PacketId,
    payload: &[u8],
) -> Result<()> {
    out.write_all(&data_header(id)).map_err(|e| QStreamError::io("writing data frame", e))?;
    out.write_all(payload).map_err(|e| QStreamError::io("writing data frame", e))?;
    Ok(())
}
