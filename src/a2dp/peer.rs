//! Per-connection negotiation state

use heapless::Vec;

use super::codec::{CodecInfo, CodecType};
use super::protection::ProtectionInfo;
use super::{Role, StreamEndpointId};
use crate::address::PeerAddress;
use crate::constants::MAX_PEER_ENDPOINTS;
use crate::NegotiationError;

/// One remote stream endpoint as reported during capability retrieval
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointCapability {
    /// Index of the endpoint in the transport's discovery table
    pub local_sep_index: u8,
    /// SEID of the endpoint on the peer
    pub peer_seid: StreamEndpointId,
    /// Codec type advertised
    pub codec_type: CodecType,
    /// Raw capability element
    pub caps: CodecInfo,
    /// Protection descriptors advertised
    pub protection: ProtectionInfo,
}

/// Which side started the configuration of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NegotiationRole {
    /// We discover the peer and propose a configuration
    #[default]
    Initiator,
    /// The peer proposed a configuration to us first
    Acceptor,
}

/// Capabilities of one role collected during a discovery round
#[derive(Debug, Clone, Default)]
pub struct EndpointSet {
    advertised: u8,
    received: u8,
    endpoints: Vec<EndpointCapability, MAX_PEER_ENDPOINTS>,
    finalized: bool,
}

impl EndpointSet {
    const fn new() -> Self {
        Self {
            advertised: 0,
            received: 0,
            endpoints: Vec::new(),
            finalized: false,
        }
    }

    fn begin_round(&mut self, advertised: u8) {
        *self = Self {
            advertised,
            ..Self::new()
        };
    }

    /// Count an offered capability and keep it if it is usable
    ///
    /// # Errors
    /// Returns `UnsupportedCodec` or `CapacityExceeded` when the capability
    /// was counted but not stored
    pub(crate) fn offer(&mut self, capability: EndpointCapability) -> Result<(), NegotiationError> {
        self.received = self.received.saturating_add(1);
        if !capability.codec_type.is_supported() {
            return Err(NegotiationError::UnsupportedCodec);
        }
        self.endpoints
            .push(capability)
            .map_err(|_| NegotiationError::CapacityExceeded)
    }

    /// Count an offered capability without keeping it
    pub(crate) fn skip(&mut self) {
        self.received = self.received.saturating_add(1);
    }

    /// Whether the round is complete and has not been finalized yet
    #[must_use]
    pub fn ready_to_finalize(&self) -> bool {
        !self.finalized && (self.received == self.advertised || self.endpoints.is_full())
    }

    pub(crate) fn mark_finalized(&mut self) {
        self.finalized = true;
    }

    /// Endpoints advertised for this role
    #[must_use]
    pub const fn advertised(&self) -> u8 {
        self.advertised
    }

    /// Capabilities offered so far, stored or not
    #[must_use]
    pub const fn received(&self) -> u8 {
        self.received
    }

    /// Whether finalization already ran this round
    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Stored capabilities in offer order
    #[must_use]
    pub fn endpoints(&self) -> &[EndpointCapability] {
        &self.endpoints
    }
}

/// Negotiation state of one A2DP stream connection
#[derive(Debug, Clone, Default)]
pub struct PeerConnection {
    pub(crate) addr: PeerAddress,
    pub(crate) negotiation_role: NegotiationRole,
    pub(crate) connect_as: Option<Role>,
    pub(crate) num_seps: u8,
    pub(crate) sinks: EndpointSet,
    pub(crate) sources: EndpointSet,
    pub(crate) selected_sink: Option<usize>,
    pub(crate) selected_source: Option<usize>,
    pub(crate) codec_cfg: CodecInfo,
    pub(crate) cp_active: bool,
    pub(crate) recfg_needed: bool,
    pub(crate) opened: bool,
    pub(crate) mtu: u16,
}

impl PeerConnection {
    /// Empty slot
    #[must_use]
    pub const fn new() -> Self {
        Self {
            addr: PeerAddress::UNSET,
            negotiation_role: NegotiationRole::Initiator,
            connect_as: None,
            num_seps: 0,
            sinks: EndpointSet::new(),
            sources: EndpointSet::new(),
            selected_sink: None,
            selected_source: None,
            codec_cfg: CodecInfo::EMPTY,
            cp_active: false,
            recfg_needed: false,
            opened: false,
            mtu: 0,
        }
    }

    /// Return the slot to its empty state
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Start a new discovery round, forgetting the previous one
    pub(crate) fn begin_discovery(
        &mut self,
        addr: PeerAddress,
        num_seps: u8,
        num_sinks: u8,
        num_sources: u8,
        local_role: Role,
    ) {
        self.addr = addr;
        self.num_seps = num_seps;
        self.sinks.begin_round(num_sinks);
        self.sources.begin_round(num_sources);
        self.selected_sink = None;
        self.selected_source = None;
        self.connect_as = Some(local_role.opposite());
    }

    /// Address recorded at discovery
    #[must_use]
    pub const fn addr(&self) -> PeerAddress {
        self.addr
    }

    /// Who started configuring this connection
    #[must_use]
    pub const fn negotiation_role(&self) -> NegotiationRole {
        self.negotiation_role
    }

    /// Whether the peer configured us first
    #[must_use]
    pub fn is_acceptor(&self) -> bool {
        self.negotiation_role == NegotiationRole::Acceptor
    }

    /// Role the peer must take, derived at discovery
    #[must_use]
    pub const fn connect_as(&self) -> Option<Role> {
        self.connect_as
    }

    /// Total endpoints the peer advertised
    #[must_use]
    pub const fn num_seps(&self) -> u8 {
        self.num_seps
    }

    /// Sink endpoints collected this round
    #[must_use]
    pub const fn sinks(&self) -> &EndpointSet {
        &self.sinks
    }

    /// Source endpoints collected this round
    #[must_use]
    pub const fn sources(&self) -> &EndpointSet {
        &self.sources
    }

    /// Currently selected sink capability
    #[must_use]
    pub fn selected_sink(&self) -> Option<&EndpointCapability> {
        self.selected_sink
            .and_then(|index| self.sinks.endpoints.get(index))
    }

    /// Currently selected source capability
    #[must_use]
    pub fn selected_source(&self) -> Option<&EndpointCapability> {
        self.selected_source
            .and_then(|index| self.sources.endpoints.get(index))
    }

    /// Configuration negotiated for this connection
    #[must_use]
    pub const fn codec_config(&self) -> &CodecInfo {
        &self.codec_cfg
    }

    /// Whether SCMS-T is active on this connection
    #[must_use]
    pub const fn is_protection_active(&self) -> bool {
        self.cp_active
    }

    /// Whether the accepted configuration must be renegotiated
    #[must_use]
    pub const fn reconfiguration_needed(&self) -> bool {
        self.recfg_needed
    }

    /// Whether the media stream is open
    #[must_use]
    pub const fn is_opened(&self) -> bool {
        self.opened
    }

    /// MTU negotiated at stream open
    #[must_use]
    pub const fn mtu(&self) -> u16 {
        self.mtu
    }
}
