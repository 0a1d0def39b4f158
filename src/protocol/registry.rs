//! Writer-side packet ID allocation
//!
//! IDs 1..=99 are a scarce resource: each live packet descriptor holds one,
//! retired IDs are reused lowest first, and a 100th live descriptor is a
//! capacity error. ID 0 always belongs to the stream descriptor.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

use super::{PacketId, write_descriptor_frame};
use crate::descriptor::PacketDescriptor;
use crate::{QStreamError, Result};

const SLOTS: usize = PacketId::MAX as usize + 1;

/// Opaque token for one registration. Handles are never reused, so a stale
/// handle cannot reach a descriptor that later took over its ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorHandle(u64);

#[derive(Debug)]
struct Slot {
    handle: DescriptorHandle,
    packet: Arc<PacketDescriptor>,
    xml: String,
}

#[derive(Debug)]
struct RegistryState {
    stream_xml: Option<String>,
    slots: Vec<Option<Slot>>,
    next_handle: u64,
}

/// Allocation table of live packet descriptors for one stream.
#[derive(Debug)]
pub struct DescriptorRegistry {
    state: Mutex<RegistryState>,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                stream_xml: None,
                slots: (0..SLOTS).map(|_| None).collect(),
                next_handle: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the stream descriptor document under ID 0.
    pub fn register_stream(&self, xml: String) -> PacketId {
        self.lock().stream_xml = Some(xml);
        PacketId::STREAM
    }

    pub fn has_stream(&self) -> bool {
        self.lock().stream_xml.is_some()
    }

    /// Allocate the lowest free ID for `packet`, whose document is `xml`.
    pub fn add(&self, packet: Arc<PacketDescriptor>, xml: String) -> Result<DescriptorHandle> {
        let mut state = self.lock();
        let index = (1..SLOTS)
            .find(|&i| state.slots[i].is_none())
            .ok_or(QStreamError::IdsExhausted { live: SLOTS - 1 })?;
        let handle = DescriptorHandle(state.next_handle);
        state.next_handle += 1;
        state.slots[index] = Some(Slot { handle, packet, xml });
        debug!(id = %PacketId::new(index as u8), "allocated packet ID");
        Ok(handle)
    }

    /// Free the ID held by `handle`.
    pub fn retire(&self, handle: DescriptorHandle) -> Result<PacketId> {
        let mut state = self.lock();
        let index = find(&state, handle)?;
        state.slots[index] = None;
        let id = PacketId::new(index as u8);
        debug!(%id, "retired packet ID");
        Ok(id)
    }

    /// Live ID of `handle`; an error once retired or if never registered.
    pub fn id_of(&self, handle: DescriptorHandle) -> Result<PacketId> {
        let state = self.lock();
        find(&state, handle).map(|index| PacketId::new(index as u8))
    }

    pub fn packet(&self, handle: DescriptorHandle) -> Result<Arc<PacketDescriptor>> {
        let state = self.lock();
        let index = find(&state, handle)?;
        state.slots[index]
            .as_ref()
            .map(|slot| Arc::clone(&slot.packet))
            .ok_or_else(|| QStreamError::protocol(Some(index as u8), "slot emptied while locked"))
    }

    /// Handle of a live descriptor structurally identical to `packet`.
    pub fn has_descriptor(&self, packet: &PacketDescriptor) -> Option<DescriptorHandle> {
        let state = self.lock();
        state.slots.iter().flatten().find(|slot| *slot.packet == *packet).map(|slot| slot.handle)
    }

    /// Write the descriptor frame of `handle` under its current ID.
    pub fn send<W: Write + ?Sized>(
        &self,
        handle: DescriptorHandle,
        out: &mut W,
    ) -> Result<PacketId> {
        let state = self.lock();
        let index = find(&state, handle)?;
        let id = PacketId::new(index as u8);
        let xml = state.slots[index].as_ref().map(|slot| slot.xml.as_bytes()).unwrap_or_default();
        write_descriptor_frame(out, Some(id), xml)?;
        trace!(%id, bytes = xml.len(), "sent packet descriptor");
        Ok(id)
    }

    /// Write the stream descriptor frame under ID 0.
    pub fn send_stream<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        let state = self.lock();
        let xml = state
            .stream_xml
            .as_deref()
            .ok_or_else(|| QStreamError::protocol(Some(0), "no stream descriptor registered"))?;
        write_descriptor_frame(out, Some(PacketId::STREAM), xml.as_bytes())
    }

    /// Number of live packet descriptors.
    pub fn live_count(&self) -> usize {
        self.lock().slots.iter().flatten().count()
    }
}

impl Default for DescriptorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn find(state: &RegistryState, handle: DescriptorHandle) -> Result<usize> {
    state
        .slots
        .iter()
        .position(|slot| slot.as_ref().is_some_and(|s| s.handle == handle))
        .ok_or_else(|| QStreamError::protocol(None, "descriptor is not registered or was retired"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::PlaneDescriptor;
    use crate::types::{ByteOrder, TransferType};

    fn packet(name: &str) -> Arc<PacketDescriptor> {
        Arc::new(PacketDescriptor::new(vec![PlaneDescriptor::encoded(
            name,
            1,
            vec![],
            TransferType::Double(ByteOrder::LittleEndian),
        )]))
    }

    #[test]
    fn ids_start_at_one_and_are_reused_lowest_first() {
        let registry = DescriptorRegistry::new();
        let a = registry.add(packet("a"), String::new()).unwrap();
        let b = registry.add(packet("b"), String::new()).unwrap();
        let c = registry.add(packet("c"), String::new()).unwrap();
        assert_eq!(registry.id_of(a).unwrap(), PacketId::new(1));
        assert_eq!(registry.id_of(c).unwrap(), PacketId::new(3));

        assert_eq!(registry.retire(b).unwrap(), PacketId::new(2));
        let d = registry.add(packet("d"), String::new()).unwrap();
        assert_eq!(registry.id_of(d).unwrap(), PacketId::new(2));
    }

    #[test]
    fn retired_handles_are_errors() {
        let registry = DescriptorRegistry::new();
        let a = registry.add(packet("a"), String::new()).unwrap();
        registry.retire(a).unwrap();
        assert!(registry.id_of(a).unwrap_err().is_protocol_violation());
        assert!(registry.retire(a).is_err());

        // the reused ID does not resurrect the old handle
        let _b = registry.add(packet("b"), String::new()).unwrap();
        assert!(registry.id_of(a).is_err());
        assert!(registry.send(a, &mut Vec::new()).is_err());
    }

    #[test]
    fn hundredth_live_descriptor_fails() {
        let registry = DescriptorRegistry::new();
        let handles: Vec<_> = (0..99)
            .map(|i| registry.add(packet(&format!("p{i}")), String::new()).unwrap())
            .collect();
        assert_eq!(registry.live_count(), 99);
        let err = registry.add(packet("overflow"), String::new()).unwrap_err();
        assert!(matches!(err, QStreamError::IdsExhausted { live: 99 }));

        registry.retire(handles[41]).unwrap();
        let reused = registry.add(packet("again"), String::new()).unwrap();
        assert_eq!(registry.id_of(reused).unwrap(), PacketId::new(42));
    }

    #[test]
    fn structural_lookup_finds_live_descriptors_only() {
        let registry = DescriptorRegistry::new();
        let a = registry.add(packet("a"), String::new()).unwrap();
        assert_eq!(registry.has_descriptor(&packet("a")), Some(a));
        assert_eq!(registry.has_descriptor(&packet("b")), None);
        registry.retire(a).unwrap();
        assert_eq!(registry.has_descriptor(&packet("a")), None);
    }

    #[test]
    fn send_frames_stored_document() {
        let registry = DescriptorRegistry::new();
        registry.register_stream("<stream dataset_id=\"x\"/>".to_string());
        let a = registry.add(packet("a"), "<packet/>".to_string()).unwrap();
        let mut out = Vec::new();
        registry.send_stream(&mut out).unwrap();
        registry.send(a, &mut out).unwrap();
        assert_eq!(out, b"[00]000024<stream dataset_id=\"x\"/>[01]000009<packet/>".to_vec());
    }
}
