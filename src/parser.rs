//! Frame dispatch and the blocking stream parser
//!
//! [`PacketDispatcher`] turns decoded [`Frame`]s into [`StreamHandler`]
//! callbacks, keeping the table of live packet descriptors. The async
//! provider and [`StreamParser`] share it, so a stream reads the same way
//! from a file, a socket or a byte slice.

use bytes::BytesMut;
use std::io::{ErrorKind, Read};
use std::sync::Arc;
use tokio_util::codec::Decoder;
use tracing::{debug, info, trace, warn};

use crate::descriptor::{
    CommentDescriptor, Descriptor, EnumerationDescriptor, ExceptionDescriptor, PacketDescriptor,
    StreamDescriptor,
};
use crate::protocol::{Frame, PacketId, QStreamCodec};
use crate::serializer::SerializerRegistry;
use crate::types::ByteOrder;
use crate::{QStreamError, Result};

/// Receiver of parsed stream events.
pub trait StreamHandler {
    fn stream_descriptor(&mut self, descriptor: &StreamDescriptor) -> Result<()>;

    /// A packet ID was (re)declared.
    fn packet_descriptor(&mut self, id: PacketId, descriptor: &Arc<PacketDescriptor>) -> Result<()>;

    /// One data frame of `descriptor`.
    fn packet(&mut self, id: PacketId, descriptor: &PacketDescriptor, payload: &[u8]) -> Result<()>;

    fn exception(&mut self, exception: &ExceptionDescriptor) -> Result<()> {
        warn!(kind = %exception.kind, message = %exception.message, "stream exception");
        Ok(())
    }

    fn comment(&mut self, _comment: &CommentDescriptor) -> Result<()> {
        Ok(())
    }

    fn enumeration(&mut self, _enumeration: &EnumerationDescriptor) -> Result<()> {
        Ok(())
    }

    /// The byte channel reached a clean end.
    fn stream_closed(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Counters of a stream being read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamProgress {
    pub descriptors: u64,
    pub records: u64,
    pub bytes: u64,
}

/// Maps live packet IDs to their descriptors and feeds a handler.
#[derive(Debug)]
pub struct PacketDispatcher {
    serializers: Arc<SerializerRegistry>,
    byte_order: ByteOrder,
    stream_seen: bool,
    packets: Vec<Option<Arc<PacketDescriptor>>>,
    progress: StreamProgress,
}

impl PacketDispatcher {
    pub fn new(serializers: Arc<SerializerRegistry>) -> Self {
        Self {
            serializers,
            // streams that never declare a byte order are big endian
            byte_order: ByteOrder::BigEndian,
            stream_seen: false,
            packets: vec![None; PacketId::MAX as usize + 1],
            progress: StreamProgress::default(),
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn progress(&self) -> StreamProgress {
        self.progress
    }

    /// Descriptor currently live under `id`.
    pub fn packet(&self, id: PacketId) -> Option<&Arc<PacketDescriptor>> {
        self.packets.get(id.index())?.as_ref()
    }

    /// Dispatch one frame. Returns the new payload size when a packet ID
    /// was declared, for the codec's size table.
    pub fn dispatch<H: StreamHandler + ?Sized>(
        &mut self,
        frame: Frame,
        handler: &mut H,
    ) -> Result<Option<(PacketId, usize)>> {
        self.progress.bytes += frame.wire_len() as u64;
        match frame {
            Frame::Descriptor { id, xml } => {
                self.progress.descriptors += 1;
                let text = std::str::from_utf8(&xml).map_err(|e| {
                    QStreamError::descriptor_with_source(id, "descriptor is not UTF-8", Box::new(e))
                })?;
                let descriptor = Descriptor::parse(text, self.byte_order, &self.serializers)
                    .map_err(|e| match id {
                        Some(id) => e.in_packet(id),
                        None => e,
                    })?;
                self.descriptor(id, descriptor, handler)
            }
            Frame::Data { id, payload } => {
                let packet = self.packet(id).cloned().ok_or_else(|| {
                    QStreamError::protocol(
                        Some(id.value()),
                        "data frame references a packet ID with no live descriptor",
                    )
                })?;
                self.progress.records += 1;
                trace!(%id, bytes = payload.len(), "record");
                handler.packet(id, &packet, &payload).map_err(|e| e.in_packet(id))?;
                Ok(None)
            }
        }
    }

    fn descriptor<H: StreamHandler + ?Sized>(
        &mut self,
        id: Option<PacketId>,
        descriptor: Descriptor,
        handler: &mut H,
    ) -> Result<Option<(PacketId, usize)>> {
        match (id, descriptor) {
            (None, Descriptor::Enumeration(enumeration)) => {
                handler.enumeration(&enumeration).map(|_| None)
            }
            (None, Descriptor::Exception(exception)) => handler.exception(&exception).map(|_| None),
            (None, Descriptor::Comment(comment)) => handler.comment(&comment).map(|_| None),
            (Some(PacketId::STREAM), Descriptor::Stream(stream)) => {
                if self.stream_seen {
                    debug!(
                        dataset = %stream.dataset_id,
                        "stream descriptor repeated, continuing concatenated stream"
                    );
                } else {
                    info!(
                        dataset = %stream.dataset_id,
                        byte_order = stream.byte_order.wire_name(),
                        "stream opened"
                    );
                }
                self.stream_seen = true;
                self.byte_order = stream.byte_order;
                handler.stream_descriptor(&stream).map(|_| None)
            }
            (Some(id), Descriptor::Packet(packet)) if id != PacketId::STREAM => {
                if !self.stream_seen {
                    return Err(QStreamError::protocol(
                        Some(id.value()),
                        "packet descriptor arrives before the stream descriptor",
                    ));
                }
                let size = packet.size_bytes();
                debug!(%id, planes = packet.planes.len(), size, "packet declared");
                handler.packet_descriptor(id, &packet).map_err(|e| e.in_packet(id))?;
                self.packets[id.index()] = Some(packet);
                Ok(Some((id, size)))
            }
            (id, descriptor) => Err(QStreamError::protocol(
                id.map(PacketId::value),
                format!(
                    "descriptor {:?} is not allowed under this tag",
                    descriptor_kind(&descriptor)
                ),
            )),
        }
    }
}

fn descriptor_kind(descriptor: &Descriptor) -> &'static str {
    match descriptor {
        Descriptor::Stream(_) => "stream",
        Descriptor::Packet(_) => "packet",
        Descriptor::Enumeration(_) => "enumerationUnit",
        Descriptor::Exception(_) => "exception",
        Descriptor::Comment(_) => "comment",
    }
}

/// Default bytes requested per read.
pub const DEFAULT_READ_SIZE: usize = 64 * 1024;

/// Pulls frames off a blocking reader and dispatches them.
#[derive(Debug)]
pub struct StreamParser<R> {
    reader: R,
    codec: QStreamCodec,
    dispatcher: PacketDispatcher,
    buffer: BytesMut,
    /// Scratch space for one read from `reader`
    chunk: Vec<u8>,
    eof: bool,
}

impl<R: Read> StreamParser<R> {
    pub fn new(reader: R, serializers: Arc<SerializerRegistry>) -> Self {
        Self {
            reader,
            codec: QStreamCodec::new(),
            dispatcher: PacketDispatcher::new(serializers),
            buffer: BytesMut::with_capacity(DEFAULT_READ_SIZE),
            chunk: vec![0u8; DEFAULT_READ_SIZE],
            eof: false,
        }
    }

    pub fn with_read_size(mut self, read_size: usize) -> Self {
        self.chunk.resize(read_size.max(1), 0);
        self
    }

    pub fn progress(&self) -> StreamProgress {
        self.dispatcher.progress()
    }

    /// Next complete frame, `None` at a clean end of stream.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buffer)? {
                return Ok(Some(frame));
            }
            if self.eof {
                return self.codec.decode_eof(&mut self.buffer);
            }
            match self.reader.read(&mut self.chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => self.buffer.extend_from_slice(&self.chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(QStreamError::io("reading stream", e)),
            }
        }
    }

    /// Dispatch frames to `handler` until the stream ends.
    pub fn parse<H: StreamHandler + ?Sized>(&mut self, handler: &mut H) -> Result<StreamProgress> {
        while let Some(frame) = self.next_frame()? {
            if let Some((id, size)) = self.dispatcher.dispatch(frame, handler)? {
                self.codec.set_packet_size(id, size);
            }
        }
        handler.stream_closed()?;
        let progress = self.progress();
        info!(records = progress.records, bytes = progress.bytes, "stream closed");
        Ok(progress)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}
