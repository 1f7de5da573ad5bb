//! Configuration proposals from a remote initiator (acceptor path)

use embassy_sync::blocking_mutex::raw::RawMutex;

use super::codec::{self, CodecConfig, CodecId, CodecInfo, CodecType, SbcCapabilities};
use super::context::{NegotiationContext, TransportSink};
use super::peer::NegotiationRole;
use super::protection::{self, ProtectionInfo};
use super::{A2dpStatus, AvHandle, RejectCategory, Role};
use crate::NegotiationError;

/// A configuration proposed by the peer
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigProposal {
    /// Codec type of the proposal
    pub codec_type: CodecType,
    /// Proposed configuration element
    pub config: CodecInfo,
    /// Proposed protection descriptors
    pub protection: ProtectionInfo,
    /// Role of the local endpoint being configured
    pub local_role: Role,
}

/// Answer to a configuration proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SetConfigResponse {
    /// Proposal accepted
    Accepted {
        /// The accepted configuration differs from the active one and the
        /// transport may renegotiate once capabilities are known
        reconfig_needed: bool,
    },
    /// Proposal rejected
    Rejected {
        /// Status code
        status: A2dpStatus,
        /// Category the rejection is attributed to
        category: RejectCategory,
    },
}

impl SetConfigResponse {
    const fn rejected(status: A2dpStatus, category: RejectCategory) -> Self {
        Self::Rejected { status, category }
    }

    /// A2DP status code
    #[must_use]
    pub const fn status(&self) -> A2dpStatus {
        match self {
            Self::Accepted { .. } => A2dpStatus::Success,
            Self::Rejected { status, .. } => *status,
        }
    }

    /// AVDTP service category; zero on acceptance
    #[must_use]
    pub const fn service_category(&self) -> u8 {
        match self {
            Self::Accepted { .. } => 0,
            Self::Rejected { category, .. } => category.service_category(),
        }
    }

    /// Whether the proposal was accepted
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

impl<M: RawMutex> NegotiationContext<'_, M> {
    /// Validate a configuration proposal received on `handle`, answer it
    /// through `sink` and return the answer
    ///
    /// Rejections leave both the peer and the shared state untouched.
    pub fn handle_setconfig(
        &mut self,
        handle: AvHandle,
        proposal: &ConfigProposal,
        sink: &mut impl TransportSink,
    ) -> SetConfigResponse {
        let response = match self.accept_proposal(handle, proposal) {
            Ok(reconfig_needed) => SetConfigResponse::Accepted { reconfig_needed },
            Err(e) => {
                warn!("[SETCONFIG] {=u8:#x} rejected: {}", handle, e);
                SetConfigResponse::from(e)
            }
        };
        sink.setconfig_response(handle, response);
        response
    }

    fn accept_proposal(
        &mut self,
        handle: AvHandle,
        proposal: &ConfigProposal,
    ) -> Result<bool, NegotiationError> {
        let peer = self.peers.resolve_mut(handle)?;
        if peer.opened {
            error!("[SETCONFIG] proposal on opened stream {=u8:#x}", handle);
        }

        protection::validate_inbound(&proposal.protection, self.options.content_protection)?;

        let local_caps = match proposal.local_role {
            Role::Source => SbcCapabilities::SOURCE,
            Role::Sink if self.options.sink_supported => SbcCapabilities::SINK,
            Role::Sink => return Err(NegotiationError::ConfigurationMismatch),
        };
        let codec_id = CodecId::from(proposal.codec_type);
        if codec_id == CodecId::None {
            return Err(NegotiationError::UnsupportedCodec);
        }
        if !codec::matches(codec_id, &local_caps.to_info(), &proposal.config) {
            return Err(NegotiationError::ConfigurationMismatch);
        }
        let config = SbcCapabilities::parse(&proposal.config, false).map_err(|e| {
            debug!("[SETCONFIG] proposal is not a configuration: {}", e);
            NegotiationError::ConfigurationMismatch
        })?;
        if !config.fits_within(&local_caps) {
            debug!("[SETCONFIG] proposal outside local capabilities");
            return Err(NegotiationError::ConfigurationMismatch);
        }

        let reconfig_needed = self.shared.with_lock(|state, protection| {
            let CodecId::Sbc = state.global.id else {
                error!("[SETCONFIG] no active codec to compare against");
                return true;
            };

            let differs = codec_id != state.global.id
                || proposal.config.shared_params() != state.global.info.shared_params()
                || (proposal.protection.count() == 1 && !protection.is_active());
            debug!(
                "[SETCONFIG] remote prefers bitpool {}..={}",
                proposal.config.min_bitpool(),
                proposal.config.max_bitpool()
            );
            state.remote_setconfig = CodecConfig {
                id: CodecId::Sbc,
                info: proposal.config,
            };

            if proposal.local_role == Role::Sink {
                // The remote source decides the configuration we receive
                state.global.info = proposal.config;
                return false;
            }
            differs
        });

        peer.negotiation_role = NegotiationRole::Acceptor;
        peer.recfg_needed = reconfig_needed;
        debug!(
            "[SETCONFIG] {=u8:#x} accepted, reconfiguration {}",
            handle, reconfig_needed
        );
        Ok(reconfig_needed)
    }
}

impl From<NegotiationError> for SetConfigResponse {
    fn from(error: NegotiationError) -> Self {
        match error {
            NegotiationError::SlotNotFound => {
                Self::rejected(A2dpStatus::Busy, RejectCategory::Busy)
            }
            NegotiationError::ProtectionMismatch => {
                Self::rejected(A2dpStatus::BadCpType, RejectCategory::Protection)
            }
            _ => Self::rejected(A2dpStatus::WrongCodec, RejectCategory::Codec),
        }
    }
}
