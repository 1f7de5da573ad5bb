//! A2DP (Advanced Audio Distribution Profile) Codec Negotiation
//!
//! This module decides which codec configuration and content protection each
//! A2DP stream connection runs with. It sits between the AVDTP signaling layer
//! (the transport) and the audio encoder: the transport reports discovered
//! stream endpoints and inbound configuration proposals, and the core answers
//! with selections, accept/reject decisions and reconfiguration instructions.
//!
//! ## Architecture
//!
//! - **Codec**: SBC information element parsing and capability matching
//! - **Protection**: SCMS-T descriptor traversal and copy-control policy
//! - **Peers**: per-connection discovery bookkeeping in fixed slots
//! - **Shared state**: the process-wide codec configuration behind one lock
//! - **Context**: discovery, setconfig and global reconfiguration flows
//!
//! ## Usage
//!
//! ```rust
//! use warbler::a2dp::{NegotiationContext, SharedNegotiation, Role};
//! use warbler::NegotiationOptions;
//!
//! static SHARED: SharedNegotiation = SharedNegotiation::new();
//!
//! let ctx = NegotiationContext::new(&SHARED, NegotiationOptions::default());
//! let (codec_type, caps, _protection) = ctx.local_endpoint(Role::Source).unwrap();
//! assert!(codec_type.is_supported());
//! assert_eq!(caps.as_bytes()[0], 6);
//! ```

pub mod codec;
pub mod context;
mod discovery;
mod global;
pub mod peer;
pub mod protection;
pub mod registry;
mod setconfig;
pub mod shared;

pub use codec::*;
pub use context::*;
pub use discovery::*;
pub use global::*;
pub use peer::*;
pub use protection::*;
pub use registry::*;
pub use setconfig::*;
pub use shared::*;

use crate::constants::{
    AV_HANDLE_CHANNEL_AUDIO, AV_HANDLE_CHANNEL_MASK, UUID_AUDIO_SINK, UUID_AUDIO_SOURCE,
};

/// Opaque connection handle assigned by the transport
pub type AvHandle = u8;

/// Stream Endpoint Identifier (SEID) type
pub type StreamEndpointId = u8;

/// Slot index addressed by an AV handle, if it is well formed
#[must_use]
pub fn handle_to_index(handle: AvHandle) -> Option<usize> {
    (handle & !AV_HANDLE_CHANNEL_MASK)
        .checked_sub(1)
        .map(usize::from)
}

/// Audio AV handle addressing a slot index
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn index_to_handle(index: usize) -> AvHandle {
    ((index as u8) + 1) | AV_HANDLE_CHANNEL_AUDIO
}

/// A2DP Profile Roles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// Audio source (sends audio)
    Source,
    /// Audio sink (receives audio)
    Sink,
}

impl Role {
    /// Service class UUID of this role
    #[must_use]
    pub const fn uuid(self) -> u16 {
        match self {
            Self::Source => UUID_AUDIO_SOURCE,
            Self::Sink => UUID_AUDIO_SINK,
        }
    }

    /// Role for a service class UUID
    #[must_use]
    pub const fn from_uuid(uuid: u16) -> Option<Self> {
        match uuid {
            UUID_AUDIO_SOURCE => Some(Self::Source),
            UUID_AUDIO_SINK => Some(Self::Sink),
            _ => None,
        }
    }

    /// The role a peer must take to stream with this local role
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Source => Self::Sink,
            Self::Sink => Self::Source,
        }
    }
}

/// A2DP status codes reported to a configuration proposer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum A2dpStatus {
    /// Accepted
    Success = 0x00,
    /// Peer slot unavailable
    Busy = 0x0B,
    /// Configuration outside the local capabilities
    WrongCodec = 0x0D,
    /// Unsupported content-protection type
    BadCpType = 0xE0,
}

/// Service category a rejection is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RejectCategory {
    /// Codec parameters
    Codec,
    /// Content protection
    Protection,
    /// The peer slot could not be resolved
    Busy,
}

impl RejectCategory {
    /// AVDTP service category carried on the wire
    #[must_use]
    pub const fn service_category(self) -> u8 {
        match self {
            Self::Protection => 0x04,
            // Busy rejections are reported against the codec category
            Self::Codec | Self::Busy => 0x07,
        }
    }
}
