//! Negotiation context and the transport seam
//!
//! [`NegotiationContext`] owns the peer slots and borrows the
//! [`SharedNegotiation`] state. Every operation of the negotiation core is a
//! method on it; the discovery, setconfig and global reconfiguration flows live
//! in their own modules.

use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, RawMutex};

use super::codec::{CodecConfig, CodecInfo, CodecType, SbcCapabilities};
use super::peer::PeerConnection;
use super::protection::{CopyControl, ProtectionInfo};
use super::registry::PeerRegistry;
use super::setconfig::SetConfigResponse;
use super::shared::SharedNegotiation;
use super::{AvHandle, Role, StreamEndpointId};
use crate::{NegotiationError, NegotiationOptions};

/// Stream configuration chosen for a peer endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamSelection {
    /// Index of the chosen endpoint in the transport's discovery table
    pub local_sep_index: u8,
    /// SEID of the chosen endpoint on the peer
    pub peer_seid: StreamEndpointId,
    /// Configuration to apply
    pub config: CodecInfo,
    /// Protection descriptors to apply
    pub protection: ProtectionInfo,
}

/// Outbound calls the core makes into the AVDTP signaling layer
///
/// Calls are never made while the shared lock is held, so implementations may
/// call back into the core synchronously.
pub trait TransportSink {
    /// Renegotiate the stream of `handle` with `selection`
    fn reconfigure(&mut self, handle: AvHandle, selection: &StreamSelection);

    /// Answer a configuration proposal received on `handle`
    fn setconfig_response(&mut self, handle: AvHandle, response: SetConfigResponse);
}

/// Codec negotiation core for every A2DP connection of one host
pub struct NegotiationContext<'a, M: RawMutex = CriticalSectionRawMutex> {
    pub(crate) shared: &'a SharedNegotiation<M>,
    pub(crate) peers: PeerRegistry,
    pub(crate) options: NegotiationOptions,
}

impl<'a, M: RawMutex> NegotiationContext<'a, M> {
    /// Create a context, installing the default configuration and the
    /// configured copy-control flag into `shared`
    #[must_use]
    pub fn new(shared: &'a SharedNegotiation<M>, options: NegotiationOptions) -> Self {
        let flag = if options.content_protection {
            options.copy_control
        } else {
            CopyControl::Free
        };
        shared.with_lock(|state, protection| {
            state.remote_setconfig = CodecConfig::NONE;
            protection.set_active(false);
            protection.set_copy_control(flag);
        });

        let ctx = Self {
            shared,
            peers: PeerRegistry::new(),
            options,
        };
        ctx.reset();
        info!("[CTX] negotiation core ready, copy control {}", flag);
        ctx
    }

    /// Options the context was created with
    #[must_use]
    pub const fn options(&self) -> &NegotiationOptions {
        &self.options
    }

    /// Shared state borrowed by this context
    #[must_use]
    pub const fn shared(&self) -> &'a SharedNegotiation<M> {
        self.shared
    }

    /// Peer slots
    #[must_use]
    pub const fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    /// Slot of `handle`
    ///
    /// # Errors
    /// Returns `SlotNotFound` if the handle does not address a slot
    pub fn peer(&self, handle: AvHandle) -> Result<&PeerConnection, NegotiationError> {
        self.peers.resolve(handle)
    }

    /// Current global codec configuration
    #[must_use]
    pub fn codec_config(&self) -> CodecConfig {
        self.shared.codec_config()
    }

    /// Whether SCMS-T is active on the stream
    #[must_use]
    pub fn is_protection_active(&self) -> bool {
        self.shared.is_protection_active()
    }

    /// Current copy-control flag
    #[must_use]
    pub fn copy_control(&self) -> CopyControl {
        self.shared.copy_control()
    }

    /// Element set to register a local endpoint of `role` with the transport
    ///
    /// # Errors
    /// Returns `UnsupportedCodec` for a sink when sink support is disabled
    pub fn local_endpoint(
        &self,
        role: Role,
    ) -> Result<(CodecType, CodecInfo, ProtectionInfo), NegotiationError> {
        match role {
            Role::Source => {
                let caps = SbcCapabilities::SOURCE.build()?;
                let protection = if self.options.content_protection {
                    ProtectionInfo::scms_t()
                } else {
                    ProtectionInfo::none()
                };
                Ok((CodecType::Sbc, caps, protection))
            }
            Role::Sink if self.options.sink_supported => Ok((
                CodecType::Sbc,
                SbcCapabilities::SINK.build()?,
                ProtectionInfo::none(),
            )),
            Role::Sink => Err(NegotiationError::UnsupportedCodec),
        }
    }

    /// Change the copy-control flag
    ///
    /// # Errors
    /// Returns `ProtectionMismatch` for any flag but `Free` when content
    /// protection is disabled
    pub fn set_copy_control(&self, flag: CopyControl) -> Result<(), NegotiationError> {
        if !self.options.content_protection && flag != CopyControl::Free {
            warn!("[CP] copy control {} needs content protection", flag);
            return Err(NegotiationError::ProtectionMismatch);
        }
        self.shared
            .with_lock(|_, protection| protection.set_copy_control(flag));
        Ok(())
    }

    /// The stream of `handle` is open with `mtu`
    ///
    /// # Errors
    /// Returns `SlotNotFound` if the handle does not address a slot
    pub fn open(&mut self, handle: AvHandle, mtu: u16) -> Result<(), NegotiationError> {
        self.peers.open(handle, mtu)
    }

    /// The stream of `handle` is closed; its slot is emptied and the remote
    /// setconfig preference forgotten. The global configuration is kept.
    ///
    /// # Errors
    /// Returns `SlotNotFound` if the handle does not address a slot. The
    /// preference is cleared either way.
    pub fn close(&mut self, handle: AvHandle) -> Result<(), NegotiationError> {
        self.shared
            .with_lock(|state, _| state.remote_setconfig = CodecConfig::NONE);
        self.peers.close(handle)
    }

    /// Drop the selected endpoint of `handle`, keeping everything else
    ///
    /// # Errors
    /// Returns `SlotNotFound` if the handle does not address a slot
    pub fn discard_peer_selection(&mut self, handle: AvHandle) -> Result<(), NegotiationError> {
        let peer = self.peers.resolve_mut(handle)?;
        peer.selected_sink = None;
        peer.selected_source = None;
        debug!("[CTX] selection of {=u8:#x} discarded", handle);
        Ok(())
    }

    /// Whether the first SBC sink of `handle` advertises SCMS-T.
    /// Unknown handles report `false`.
    #[must_use]
    pub fn peer_supports_protection(&self, handle: AvHandle) -> bool {
        self.peers
            .resolve(handle)
            .ok()
            .and_then(|peer| {
                peer.sinks()
                    .endpoints()
                    .iter()
                    .find(|endpoint| endpoint.codec_type == CodecType::Sbc)
            })
            .is_some_and(|endpoint| endpoint.protection.supports_copy_control())
    }
}
