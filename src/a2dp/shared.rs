//! Process-wide negotiation state
//!
//! The global codec configuration and the remote setconfig preference live
//! behind a single blocking mutex. The content-protection flags are atomics
//! written only while that mutex is held, so the audio data path can read
//! them without locking at the cost of a possibly one-call-stale value.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, RawMutex};

use super::codec::CodecConfig;
use super::protection::CopyControl;

/// Fields guarded by the shared lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationState {
    /// Configuration every open connection should converge to
    pub global: CodecConfig,
    /// Last configuration a remote initiator proposed
    pub remote_setconfig: CodecConfig,
}

impl NegotiationState {
    const fn new() -> Self {
        Self {
            global: CodecConfig::DEFAULT,
            remote_setconfig: CodecConfig::NONE,
        }
    }
}

/// Content-protection state, readable without the lock
#[derive(Debug)]
pub struct ProtectionState {
    active: AtomicBool,
    copy_control: AtomicU8,
}

impl ProtectionState {
    const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            copy_control: AtomicU8::new(CopyControl::Free as u8),
        }
    }

    /// Whether SCMS-T is active on the stream
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Current copy-control flag
    #[must_use]
    pub fn copy_control(&self) -> CopyControl {
        CopyControl::from_raw(self.copy_control.load(Ordering::Relaxed))
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub(crate) fn set_copy_control(&self, flag: CopyControl) {
        self.copy_control.store(flag as u8, Ordering::Relaxed);
    }
}

/// Shared negotiation state, usually placed in a `static`
///
/// # Example
///
/// ```rust
/// use warbler::a2dp::{CodecId, SharedNegotiation};
///
/// static SHARED: SharedNegotiation = SharedNegotiation::new();
///
/// assert_eq!(SHARED.codec_config().id, CodecId::Sbc);
/// assert!(!SHARED.is_protection_active());
/// ```
pub struct SharedNegotiation<M: RawMutex = CriticalSectionRawMutex> {
    state: Mutex<M, RefCell<NegotiationState>>,
    protection: ProtectionState,
}

impl<M: RawMutex> Default for SharedNegotiation<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> SharedNegotiation<M> {
    /// Create with the default configuration installed
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(NegotiationState::new())),
            protection: ProtectionState::new(),
        }
    }

    /// Run `f` with the lock held
    ///
    /// `f` must not call back into the transport.
    pub(crate) fn with_lock<R>(
        &self,
        f: impl FnOnce(&mut NegotiationState, &ProtectionState) -> R,
    ) -> R {
        self.state
            .lock(|cell| f(&mut cell.borrow_mut(), &self.protection))
    }

    /// Snapshot of the global codec configuration
    #[must_use]
    pub fn codec_config(&self) -> CodecConfig {
        self.state.lock(|cell| cell.borrow().global)
    }

    /// Snapshot of everything guarded by the lock
    #[must_use]
    pub fn snapshot(&self) -> NegotiationState {
        self.state.lock(|cell| *cell.borrow())
    }

    /// Lock-free read of the content-protection active flag
    #[must_use]
    pub fn is_protection_active(&self) -> bool {
        self.protection.is_active()
    }

    /// Lock-free read of the copy-control flag
    #[must_use]
    pub fn copy_control(&self) -> CopyControl {
        self.protection.copy_control()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2dp::codec::CodecId;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    #[test]
    fn test_initial_state() {
        let shared: SharedNegotiation<NoopRawMutex> = SharedNegotiation::new();
        let state = shared.snapshot();
        assert_eq!(state.global, CodecConfig::DEFAULT);
        assert_eq!(state.remote_setconfig.id, CodecId::None);
        assert_eq!(shared.copy_control(), CopyControl::Free);
        assert!(!shared.is_protection_active());
    }

    #[test]
    fn test_writes_under_lock_are_visible() {
        let shared: SharedNegotiation = SharedNegotiation::new();
        shared.with_lock(|state, protection| {
            state.global = CodecConfig::NONE;
            protection.set_active(true);
            protection.set_copy_control(CopyControl::Never);
        });
        assert_eq!(shared.codec_config().id, CodecId::None);
        assert!(shared.is_protection_active());
        assert_eq!(shared.copy_control(), CopyControl::Never);
    }
}
