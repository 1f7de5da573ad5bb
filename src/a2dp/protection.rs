//! Content Protection (SCMS-T)
//!
//! Protection descriptors arrive as a count plus a packed blob in which each
//! descriptor is `[LOSC, id_lo, id_hi, ...]`. The LOSC byte is untrusted;
//! traversal never leaves the blob and never visits more than `count` entries.

use heapless::Vec;

use crate::NegotiationError;
use crate::constants::{CP_LOSC, CP_SCMS_T_ID, MAX_PROTECT_INFO_LEN};

/// SCMS-T copy-control flag applied to outgoing media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CopyControl {
    /// Copying unrestricted; no protection is needed
    #[default]
    Free = 0x00,
    /// One generation of copies permitted
    Once = 0x01,
    /// Copying prohibited
    Never = 0x02,
}

impl CopyControl {
    /// Decode a flag stored as its raw value; unknown values read as the
    /// most restrictive setting
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0x00 => Self::Free,
            0x01 => Self::Once,
            _ => Self::Never,
        }
    }
}

/// Content-protection descriptors attached to an endpoint or a proposal
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProtectionInfo {
    count: u8,
    bytes: Vec<u8, MAX_PROTECT_INFO_LEN>,
}

impl ProtectionInfo {
    /// No descriptors
    #[must_use]
    pub const fn none() -> Self {
        Self {
            count: 0,
            bytes: Vec::new(),
        }
    }

    /// A single SCMS-T descriptor, as advertised and sent in reconfigurations
    #[must_use]
    pub fn scms_t() -> Self {
        let [lo, hi] = CP_SCMS_T_ID.to_le_bytes();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[CP_LOSC, lo, hi]).ok();
        Self { count: 1, bytes }
    }

    /// Wrap a descriptor blob received from the transport
    ///
    /// # Errors
    /// Returns `CapacityExceeded` if the blob is larger than
    /// [`MAX_PROTECT_INFO_LEN`]
    pub fn new(count: u8, blob: &[u8]) -> Result<Self, NegotiationError> {
        let bytes = Vec::from_slice(blob).map_err(|()| {
            warn!("[CP] descriptor blob of {} bytes dropped", blob.len());
            NegotiationError::CapacityExceeded
        })?;
        Ok(Self { count, bytes })
    }

    /// Declared number of descriptors
    #[must_use]
    pub const fn count(&self) -> u8 {
        self.count
    }

    /// Whether no descriptor is declared
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Packed descriptor bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Iterate over the declared descriptors, each including its LOSC byte.
    /// A descriptor whose LOSC overruns the blob is cut at the blob's end.
    #[must_use]
    pub fn descriptors(&self) -> Descriptors<'_> {
        Descriptors {
            blob: &self.bytes,
            remaining: self.count,
            offset: 0,
        }
    }

    /// Whether any declared descriptor is SCMS-T
    #[must_use]
    pub fn supports_copy_control(&self) -> bool {
        let found = self.descriptors().any(is_scms_t);
        if !found {
            debug!("[CP] SCMS-T not found among {} descriptors", self.count);
        }
        found
    }
}

/// Iterator returned by [`ProtectionInfo::descriptors`]
#[derive(Debug, Clone)]
pub struct Descriptors<'a> {
    blob: &'a [u8],
    remaining: u8,
    offset: usize,
}

impl<'a> Iterator for Descriptors<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.offset >= self.blob.len() {
            return None;
        }
        self.remaining -= 1;
        let start = self.offset;
        let losc = usize::from(self.blob[start]);
        let end = (start + 1 + losc).min(self.blob.len());
        self.offset = start + 1 + losc;
        Some(&self.blob[start..end])
    }
}

fn is_scms_t(descriptor: &[u8]) -> bool {
    match descriptor {
        [losc, lo, hi, ..] if *losc >= CP_LOSC => u16::from_le_bytes([*lo, *hi]) == CP_SCMS_T_ID,
        _ => false,
    }
}

/// Whether any protection is required under `flag`
#[must_use]
pub fn peer_requires_protection(flag: CopyControl) -> bool {
    flag != CopyControl::Free
}

/// Whether an endpoint with `descriptors` is usable under `flag`
#[must_use]
pub fn decide(descriptors: &ProtectionInfo, flag: CopyControl) -> bool {
    if !peer_requires_protection(flag) {
        debug!("[CP] protection not required");
        return true;
    }
    descriptors.supports_copy_control()
}

/// Check the descriptors of an inbound configuration proposal
///
/// Zero descriptors are always fine. Otherwise exactly one SCMS-T descriptor
/// is accepted, and only if the scheme is `supported` locally.
///
/// # Errors
/// Returns `ProtectionMismatch` when the proposal must be rejected
pub fn validate_inbound(
    proposal: &ProtectionInfo,
    supported: bool,
) -> Result<(), NegotiationError> {
    if proposal.is_empty() {
        return Ok(());
    }
    if !supported || proposal.count() != 1 || !proposal.supports_copy_control() {
        warn!(
            "[CP] rejecting {} descriptors (supported: {})",
            proposal.count(),
            supported
        );
        return Err(NegotiationError::ProtectionMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scms_t_descriptor_layout() {
        let info = ProtectionInfo::scms_t();
        assert_eq!(info.count(), 1);
        assert_eq!(info.as_bytes(), &[0x02, 0x02, 0x00]);
        assert!(info.supports_copy_control());
    }

    #[test]
    fn test_second_descriptor_is_found() {
        let info = ProtectionInfo::new(2, &[0x02, 0x05, 0x00, 0x02, 0x02, 0x00]).unwrap();
        let descriptors: heapless::Vec<&[u8], 4> = info.descriptors().collect();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[1], &[0x02, 0x02, 0x00]);
        assert!(info.supports_copy_control());
    }

    #[test]
    fn test_short_losc_does_not_qualify() {
        let info = ProtectionInfo::new(1, &[0x01, 0x02, 0x00]).unwrap();
        assert!(!info.supports_copy_control());
    }

    #[test]
    fn test_traversal_is_clamped_to_blob() {
        // LOSC claims far more than the blob holds
        let info = ProtectionInfo::new(5, &[0xF0, 0x02, 0x00, 0x02]).unwrap();
        assert_eq!(info.descriptors().count(), 1);

        // count larger than the number of descriptors present
        let info = ProtectionInfo::new(200, &[0x00, 0x00]).unwrap();
        assert_eq!(info.descriptors().count(), 2);
        assert!(!info.supports_copy_control());
    }

    #[test]
    fn test_traversal_is_clamped_to_count() {
        let info = ProtectionInfo::new(1, &[0x02, 0x05, 0x00, 0x02, 0x02, 0x00]).unwrap();
        assert!(!info.supports_copy_control());
    }

    #[test]
    fn test_oversized_blob_is_rejected() {
        assert_eq!(
            ProtectionInfo::new(1, &[0; MAX_PROTECT_INFO_LEN + 1]),
            Err(NegotiationError::CapacityExceeded)
        );
    }

    #[test]
    fn test_copy_free_always_decides_true() {
        assert!(decide(&ProtectionInfo::none(), CopyControl::Free));
        let junk = ProtectionInfo::new(3, &[0xFF, 0x01]).unwrap();
        assert!(decide(&junk, CopyControl::Free));
    }

    #[test]
    fn test_copy_never_needs_scms_t() {
        assert!(!decide(&ProtectionInfo::none(), CopyControl::Never));
        assert!(decide(&ProtectionInfo::scms_t(), CopyControl::Never));
        assert!(peer_requires_protection(CopyControl::Once));
    }

    #[test]
    fn test_validate_inbound() {
        assert!(validate_inbound(&ProtectionInfo::none(), false).is_ok());
        assert!(validate_inbound(&ProtectionInfo::scms_t(), true).is_ok());
        assert_eq!(
            validate_inbound(&ProtectionInfo::scms_t(), false),
            Err(NegotiationError::ProtectionMismatch)
        );

        let two = ProtectionInfo::new(2, &[0x02, 0x02, 0x00, 0x02, 0x02, 0x00]).unwrap();
        assert_eq!(
            validate_inbound(&two, true),
            Err(NegotiationError::ProtectionMismatch)
        );

        let other = ProtectionInfo::new(1, &[0x02, 0x01, 0x00]).unwrap();
        assert_eq!(
            validate_inbound(&other, true),
            Err(NegotiationError::ProtectionMismatch)
        );
    }

    #[test]
    fn test_copy_control_raw() {
        assert_eq!(CopyControl::from_raw(CopyControl::Once as u8), CopyControl::Once);
        assert_eq!(CopyControl::from_raw(0x7F), CopyControl::Never);
    }
}
