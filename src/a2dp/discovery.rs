//! Capability discovery (initiator path)
//!
//! The transport reports the outcome of an AVDTP discover, then offers each
//! endpoint's capabilities one by one. Once every advertised endpoint of a
//! role was offered, or the per-peer table is full, the collected endpoints
//! are matched against the active configuration exactly once.

use embassy_sync::blocking_mutex::raw::RawMutex;

use super::codec::{self, CodecConfig, SbcCapabilities};
use super::context::{NegotiationContext, StreamSelection, TransportSink};
use super::peer::{EndpointCapability, PeerConnection};
use super::protection::ProtectionInfo;
use super::shared::SharedNegotiation;
use super::{AvHandle, Role};
use crate::address::PeerAddress;
use crate::{NegotiationError, NegotiationOptions};

/// Outcome of an AVDTP discover on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoveryResult {
    /// Endpoints advertised in total
    pub num_seps: u8,
    /// Sink endpoints advertised
    pub num_sinks: u8,
    /// Source endpoints advertised
    pub num_sources: u8,
    /// Address of the peer
    pub addr: PeerAddress,
    /// Role of the local endpoint that ran the discovery
    pub local_role: Role,
}

/// What the transport should do after offering a capability
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CapabilityOutcome {
    /// Keep offering capabilities
    Pending,
    /// Configure the stream with this selection
    Configure(StreamSelection),
    /// The peer configured us; stop fetching capabilities
    Settled,
}

impl<M: RawMutex> NegotiationContext<'_, M> {
    /// Start a discovery round on `handle`
    ///
    /// Capabilities and selections of a previous round are forgotten, as is
    /// the remote setconfig preference.
    ///
    /// # Errors
    /// Returns `SlotNotFound` if the handle does not address a slot
    pub fn record_discovery(
        &mut self,
        handle: AvHandle,
        result: DiscoveryResult,
    ) -> Result<(), NegotiationError> {
        let peer = self.peers.resolve_mut(handle)?;
        if peer.opened {
            error!("[DISC] discovery on opened stream {=u8:#x}", handle);
        }
        debug!(
            "[DISC] {=u8:#x} advertises {} endpoints ({} sinks, {} sources)",
            handle,
            result.num_seps,
            result.num_sinks,
            result.num_sources
        );
        peer.begin_discovery(
            result.addr,
            result.num_seps,
            result.num_sinks,
            result.num_sources,
            result.local_role,
        );
        self.shared
            .with_lock(|state, _| state.remote_setconfig = CodecConfig::NONE);
        Ok(())
    }

    /// Offer a capability, routed by the role the peer connects as
    ///
    /// # Errors
    /// See [`Self::record_sink_capability`]
    pub fn offer_capability(
        &mut self,
        handle: AvHandle,
        capability: EndpointCapability,
        sink: &mut impl TransportSink,
    ) -> Result<CapabilityOutcome, NegotiationError> {
        match self.peers.resolve(handle)?.connect_as {
            Some(Role::Source) => self.record_source_capability(handle, capability),
            _ => self.record_sink_capability(handle, capability, sink),
        }
    }

    /// Offer the capability of a remote sink endpoint
    ///
    /// # Errors
    /// Returns `SlotNotFound` for an unknown handle and `NoMatchingCodec` when
    /// finalization found no usable endpoint
    pub fn record_sink_capability(
        &mut self,
        handle: AvHandle,
        capability: EndpointCapability,
        sink: &mut impl TransportSink,
    ) -> Result<CapabilityOutcome, NegotiationError> {
        let peer = self.peers.resolve_mut(handle)?;
        log_offer(handle, peer.sinks.offer(capability));
        if !peer.sinks.ready_to_finalize() {
            return Ok(CapabilityOutcome::Pending);
        }
        peer.sinks.mark_finalized();

        let selection = select_sink(self.shared, &self.options, peer).ok_or_else(|| {
            warn!("[DISC] no sink of {=u8:#x} matches", handle);
            NegotiationError::NoMatchingCodec
        })?;

        if !peer.is_acceptor() {
            info!(
                "[DISC] configure {=u8:#x} on seid {}",
                handle, selection.peer_seid
            );
            return Ok(CapabilityOutcome::Configure(selection));
        }
        if peer.recfg_needed {
            info!("[DISC] reconfigure acceptor {=u8:#x}", handle);
            sink.reconfigure(handle, &selection);
        }
        Ok(CapabilityOutcome::Settled)
    }

    /// Offer the capability of a remote source endpoint (local sink role)
    ///
    /// # Errors
    /// Returns `SlotNotFound` for an unknown handle and `NoMatchingCodec` when
    /// finalization found no usable endpoint
    pub fn record_source_capability(
        &mut self,
        handle: AvHandle,
        capability: EndpointCapability,
    ) -> Result<CapabilityOutcome, NegotiationError> {
        let sink_supported = self.options.sink_supported;
        let peer = self.peers.resolve_mut(handle)?;
        if sink_supported {
            log_offer(handle, peer.sources.offer(capability));
        } else {
            peer.sources.skip();
        }
        if !peer.sources.ready_to_finalize() {
            return Ok(CapabilityOutcome::Pending);
        }
        peer.sources.mark_finalized();

        let selection = select_source(self.shared, peer).ok_or_else(|| {
            warn!("[DISC] no source of {=u8:#x} matches", handle);
            NegotiationError::NoMatchingCodec
        })?;
        info!(
            "[DISC] configure {=u8:#x} on source seid {}",
            handle, selection.peer_seid
        );
        Ok(CapabilityOutcome::Configure(selection))
    }
}

fn log_offer(handle: AvHandle, outcome: Result<(), NegotiationError>) {
    match outcome {
        Ok(()) => trace!("[DISC] capability stored for {=u8:#x}", handle),
        Err(NegotiationError::CapacityExceeded) => {
            warn!("[DISC] endpoint table of {=u8:#x} full", handle);
        }
        Err(e) => debug!("[DISC] capability dropped for {=u8:#x}: {}", handle, e),
    }
}

fn select_sink<M: RawMutex>(
    shared: &SharedNegotiation<M>,
    options: &NegotiationOptions,
    peer: &mut PeerConnection,
) -> Option<StreamSelection> {
    let protection_supported = options.content_protection;
    shared.with_lock(|state, protection| {
        let endpoints = peer.sinks.endpoints();
        let index = codec::select_best_match(endpoints, state.global.id, &state.global.info)?;
        let endpoint = &endpoints[index];
        let config = codec::build_concrete_config(&state.global, &endpoint.caps)?;
        let cp_active = protection_supported && endpoint.protection.supports_copy_control();

        let selection = StreamSelection {
            local_sep_index: endpoint.local_sep_index,
            peer_seid: endpoint.peer_seid,
            config,
            protection: if cp_active {
                ProtectionInfo::scms_t()
            } else {
                ProtectionInfo::none()
            },
        };
        peer.selected_sink = Some(index);
        peer.codec_cfg = config;
        peer.cp_active = cp_active;
        protection.set_active(cp_active);
        debug!("[DISC] sink {} selected, protection {}", index, cp_active);
        Some(selection)
    })
}

fn select_source<M: RawMutex>(
    shared: &SharedNegotiation<M>,
    peer: &mut PeerConnection,
) -> Option<StreamSelection> {
    let template = SbcCapabilities::SINK.to_info();
    shared.with_lock(|state, protection| {
        let endpoints = peer.sources.endpoints();
        let index = codec::select_best_match(endpoints, state.global.id, &template)?;
        let endpoint = &endpoints[index];
        let config = codec::build_preferred_config(&endpoint.caps);

        let selection = StreamSelection {
            local_sep_index: endpoint.local_sep_index,
            peer_seid: endpoint.peer_seid,
            config,
            protection: ProtectionInfo::none(),
        };
        peer.selected_source = Some(index);
        peer.codec_cfg = config;
        peer.cp_active = false;
        protection.set_active(false);
        debug!("[DISC] source {} selected", index);
        Some(selection)
    })
}
