//! Fixed peer slots addressed by AV handle

use super::peer::PeerConnection;
use super::{AvHandle, handle_to_index, index_to_handle};
use crate::NegotiationError;
use crate::constants::MAX_PEERS;

/// Fixed table of peer connection slots
///
/// The slot of a handle is a pure function of the handle, so a handle keeps
/// addressing the same slot for as long as the transport keeps it alive.
#[derive(Debug)]
pub struct PeerRegistry {
    slots: [PeerConnection; MAX_PEERS],
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    /// Create a registry with every slot empty
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [const { PeerConnection::new() }; MAX_PEERS],
        }
    }

    fn index(handle: AvHandle) -> Result<usize, NegotiationError> {
        match handle_to_index(handle) {
            Some(index) if index < MAX_PEERS => Ok(index),
            _ => {
                error!("[PEERS] no slot for handle {=u8:#x}", handle);
                Err(NegotiationError::SlotNotFound)
            }
        }
    }

    /// Slot for `handle`
    ///
    /// # Errors
    /// Returns `SlotNotFound` if the handle does not address a slot
    pub fn resolve(&self, handle: AvHandle) -> Result<&PeerConnection, NegotiationError> {
        Self::index(handle).map(|index| &self.slots[index])
    }

    /// Mutable slot for `handle`
    ///
    /// # Errors
    /// Returns `SlotNotFound` if the handle does not address a slot
    pub fn resolve_mut(
        &mut self,
        handle: AvHandle,
    ) -> Result<&mut PeerConnection, NegotiationError> {
        Self::index(handle).map(|index| &mut self.slots[index])
    }

    /// Mark the stream of `handle` open with its negotiated MTU
    ///
    /// # Errors
    /// Returns `SlotNotFound` if the handle does not address a slot
    pub fn open(&mut self, handle: AvHandle, mtu: u16) -> Result<(), NegotiationError> {
        let peer = self.resolve_mut(handle)?;
        peer.opened = true;
        peer.mtu = mtu;
        debug!("[PEERS] handle {=u8:#x} opened, mtu {}", handle, mtu);
        Ok(())
    }

    /// Empty the slot of `handle`. Closing an empty slot is a no-op.
    ///
    /// # Errors
    /// Returns `SlotNotFound` if the handle does not address a slot
    pub fn close(&mut self, handle: AvHandle) -> Result<(), NegotiationError> {
        self.resolve_mut(handle)?.reset();
        debug!("[PEERS] handle {=u8:#x} closed", handle);
        Ok(())
    }

    /// Opened peers with their handles
    pub fn opened(&self) -> impl Iterator<Item = (AvHandle, &PeerConnection)> {
        self.iter().filter(|(_, peer)| peer.opened)
    }

    /// All slots with their handles
    pub fn iter(&self) -> impl Iterator<Item = (AvHandle, &PeerConnection)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, peer)| (index_to_handle(index), peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_bounds() {
        let registry = PeerRegistry::new();
        assert!(registry.resolve(0x41).is_ok());
        assert!(registry.resolve(0x40 | MAX_PEERS as u8).is_ok());
        assert_eq!(
            registry.resolve(0x41 + MAX_PEERS as u8).err(),
            Some(NegotiationError::SlotNotFound)
        );
        assert_eq!(
            registry.resolve(0x40).err(),
            Some(NegotiationError::SlotNotFound)
        );
    }

    #[test]
    fn test_open_and_close() {
        let mut registry = PeerRegistry::new();
        registry.open(0x42, 895).unwrap();
        let opened: heapless::Vec<AvHandle, MAX_PEERS> =
            registry.opened().map(|(handle, _)| handle).collect();
        assert_eq!(opened.as_slice(), &[0x42]);
        assert_eq!(registry.resolve(0x42).unwrap().mtu(), 895);

        registry.close(0x42).unwrap();
        registry.close(0x42).unwrap();
        assert_eq!(registry.opened().count(), 0);
    }

    #[test]
    fn test_open_unknown_handle() {
        let mut registry = PeerRegistry::new();
        assert_eq!(registry.open(0x7F, 100), Err(NegotiationError::SlotNotFound));
    }
}
