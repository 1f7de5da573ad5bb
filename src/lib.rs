#![no_std]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![allow(clippy::too_many_lines)]

#[macro_use]
mod fmt;

mod address;
pub mod a2dp;
pub mod api;
pub mod constants;
pub mod processor;

use a2dp::{AvHandle, CopyControl, SbcParseError, SbcSamplingFrequency};

pub use address::PeerAddress;

/// Options for configuring a [`a2dp::NegotiationContext`]
///
/// # Examples
///
/// ```rust
/// use warbler::NegotiationOptions;
/// use warbler::a2dp::CopyControl;
///
/// // Source-only device with SCMS-T enforced
/// let options = NegotiationOptions {
///     content_protection: true,
///     copy_control: CopyControl::Never,
///     sink_supported: false,
///     ..NegotiationOptions::default()
/// };
/// assert!(options.content_protection);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NegotiationOptions {
    /// Whether the SCMS-T copy-control scheme is supported
    ///
    /// When disabled, proposals carrying any protection descriptor are
    /// rejected and the copy-control flag stays `Free`.
    pub content_protection: bool,
    /// Initial copy-control flag
    pub copy_control: CopyControl,
    /// Whether a local sink endpoint is exposed
    pub sink_supported: bool,
    /// Sampling frequency of the default configuration
    pub default_sample_rate: SbcSamplingFrequency,
}

impl NegotiationOptions {
    /// Source and sink, no content protection, 44.1 kHz default
    #[must_use]
    pub const fn new() -> Self {
        Self {
            content_protection: false,
            copy_control: CopyControl::Free,
            sink_supported: true,
            default_sample_rate: SbcSamplingFrequency(SbcSamplingFrequency::HZ_44100),
        }
    }
}

impl Default for NegotiationOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Why an open connection cannot follow the global configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IncompatibleReason {
    /// No stored sink capability matches the configuration
    Codec,
    /// The copy-control flag requires SCMS-T and the peer lacks it
    Protection,
}

/// Codec negotiation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NegotiationError {
    /// The handle does not address a peer slot
    SlotNotFound,
    /// A bounded table is full
    CapacityExceeded,
    /// Codec type not negotiable
    UnsupportedCodec,
    /// Protection descriptors cannot be honoured
    ProtectionMismatch,
    /// Proposed configuration does not fit the local capabilities
    ConfigurationMismatch,
    /// No SBC configuration carries the PCM feeding
    FeedingUnsupported,
    /// An open connection cannot follow the global configuration
    Incompatible {
        /// Handle of the first connection that cannot follow
        handle: AvHandle,
        /// What failed
        reason: IncompatibleReason,
    },
    /// No collected endpoint matches the active configuration
    NoMatchingCodec,
    /// A codec information element failed layout validation
    InvalidCodecInfo,
    /// The processor answered a session request with an unrelated response
    UnexpectedResponse,
}

impl From<SbcParseError> for NegotiationError {
    fn from(_: SbcParseError) -> Self {
        Self::InvalidCodecInfo
    }
}
