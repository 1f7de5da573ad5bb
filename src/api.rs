//! Session Control API
//!
//! Async helpers the session control plane uses to talk to the processor task.
//! Each helper sends one [`SessionRequest`] and waits for its
//! [`SessionResponse`], so callers must not issue requests concurrently on
//! the same channels.
//!
//! # Usage
//!
//! ```rust,no_run
//! use warbler::api;
//! use warbler::a2dp::PcmFeeding;
//! use warbler::processor::NegotiationChannels;
//!
//! static CHANNELS: NegotiationChannels = NegotiationChannels::new();
//!
//! # async fn example() -> Result<(), warbler::NegotiationError> {
//! // Stream 48 kHz stereo PCM
//! let feeding = PcmFeeding { sample_rate: 48_000, channels: 2, bits_per_sample: 16 };
//! api::set_feeding(&CHANNELS, feeding).await?;
//!
//! // Configure the encoder for every open sink
//! let encoder = api::encoder_config(&CHANNELS).await?;
//! # Ok(())
//! # }
//! ```

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::NegotiationError;
use crate::a2dp::{AvHandle, CopyControl, EncoderConfig, PcmFeeding};
use crate::processor::{NegotiationChannels, SessionRequest, SessionResponse};

async fn request<M: RawMutex>(
    channels: &NegotiationChannels<M>,
    request: SessionRequest,
) -> Result<SessionResponse, NegotiationError> {
    channels.requests.send(request).await;
    match channels.responses.receive().await {
        SessionResponse::Error(e) => Err(e),
        response => Ok(response),
    }
}

async fn request_done<M: RawMutex>(
    channels: &NegotiationChannels<M>,
    req: SessionRequest,
) -> Result<(), NegotiationError> {
    match request(channels, req).await? {
        SessionResponse::Done => Ok(()),
        _ => Err(NegotiationError::UnexpectedResponse),
    }
}

/// Reinstall the default configuration.
///
/// # Errors
///
/// Returns an error if the response is unexpected.
pub async fn reset<M: RawMutex>(channels: &NegotiationChannels<M>) -> Result<(), NegotiationError> {
    request_done(channels, SessionRequest::Reset).await
}

/// Switch the global configuration to carry `feeding` and reconfigure open streams.
///
/// # Errors
///
/// Returns `FeedingUnsupported` if SBC cannot carry the feeding, `Incompatible` if an open
/// stream cannot follow, or an error if the response is unexpected.
pub async fn set_feeding<M: RawMutex>(
    channels: &NegotiationChannels<M>,
    feeding: PcmFeeding,
) -> Result<(), NegotiationError> {
    request_done(channels, SessionRequest::SetFeeding(feeding)).await
}

/// Reconcile every open stream with the current global configuration.
///
/// # Errors
///
/// Returns `Incompatible` if an open stream cannot follow, or an error if the response is
/// unexpected.
pub async fn reconcile<M: RawMutex>(
    channels: &NegotiationChannels<M>,
) -> Result<(), NegotiationError> {
    request_done(channels, SessionRequest::Reconcile).await
}

/// Drop the endpoint selected for `handle`.
///
/// # Errors
///
/// Returns `SlotNotFound` for an unknown handle, or an error if the response is unexpected.
pub async fn discard_selection<M: RawMutex>(
    channels: &NegotiationChannels<M>,
    handle: AvHandle,
) -> Result<(), NegotiationError> {
    request_done(channels, SessionRequest::DiscardSelection(handle)).await
}

/// Change the copy-control flag.
///
/// # Errors
///
/// Returns `ProtectionMismatch` if content protection is disabled and `flag` is not `Free`,
/// or an error if the response is unexpected.
pub async fn set_copy_control<M: RawMutex>(
    channels: &NegotiationChannels<M>,
    flag: CopyControl,
) -> Result<(), NegotiationError> {
    request_done(channels, SessionRequest::SetCopyControl(flag)).await
}

/// Whether the sink of `handle` advertises SCMS-T.
///
/// # Errors
///
/// Returns an error if the response is unexpected.
pub async fn peer_supports_protection<M: RawMutex>(
    channels: &NegotiationChannels<M>,
    handle: AvHandle,
) -> Result<bool, NegotiationError> {
    match request(channels, SessionRequest::PeerSupportsProtection(handle)).await? {
        SessionResponse::ProtectionSupported(supported) => Ok(supported),
        _ => Err(NegotiationError::UnexpectedResponse),
    }
}

/// Encoder parameters valid for every open stream.
///
/// # Errors
///
/// Returns an error if the response is unexpected.
pub async fn encoder_config<M: RawMutex>(
    channels: &NegotiationChannels<M>,
) -> Result<EncoderConfig, NegotiationError> {
    match request(channels, SessionRequest::EncoderConfig).await? {
        SessionResponse::EncoderConfig(config) => Ok(config),
        _ => Err(NegotiationError::UnexpectedResponse),
    }
}

/// Bitpool range of the last configuration a remote initiator proposed.
///
/// # Errors
///
/// Returns an error if the response is unexpected.
pub async fn remote_preference<M: RawMutex>(
    channels: &NegotiationChannels<M>,
) -> Result<Option<(u8, u8)>, NegotiationError> {
    match request(channels, SessionRequest::RemotePreference).await? {
        SessionResponse::RemotePreference(range) => Ok(range),
        _ => Err(NegotiationError::UnexpectedResponse),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NegotiationOptions;
    use crate::a2dp::{NegotiationContext, SbcCapabilities, SharedNegotiation};
    use crate::constants::UNBOUNDED_MTU;
    use crate::processor::process_next;
    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    #[test]
    fn test_set_feeding_round_trip() {
        let shared: SharedNegotiation = SharedNegotiation::new();
        let mut ctx = NegotiationContext::new(&shared, NegotiationOptions::default());
        let channels: NegotiationChannels<NoopRawMutex> = NegotiationChannels::new();

        let feeding = PcmFeeding {
            sample_rate: 96_000,
            channels: 2,
            bits_per_sample: 16,
        };
        let (result, ()) = block_on(join(
            set_feeding(&channels, feeding),
            process_next(&mut ctx, &channels),
        ));
        assert_eq!(result, Err(NegotiationError::FeedingUnsupported));
    }

    #[test]
    fn test_encoder_config_round_trip() {
        let shared: SharedNegotiation = SharedNegotiation::new();
        let mut ctx = NegotiationContext::new(&shared, NegotiationOptions::default());
        let channels: NegotiationChannels<NoopRawMutex> = NegotiationChannels::new();

        let (result, ()) = block_on(join(
            encoder_config(&channels),
            process_next(&mut ctx, &channels),
        ));
        let encoder = result.unwrap();
        assert!(encoder.valid);
        assert_eq!(encoder.sbc, SbcCapabilities::DEFAULT_CONFIG);
        assert_eq!(encoder.min_mtu, UNBOUNDED_MTU);
    }

    #[test]
    fn test_unexpected_response() {
        let channels: NegotiationChannels<NoopRawMutex> = NegotiationChannels::new();
        channels
            .responses
            .try_send(SessionResponse::RemotePreference(None))
            .unwrap();
        assert_eq!(
            block_on(reset(&channels)),
            Err(NegotiationError::UnexpectedResponse)
        );
        // The request is left for the processor
        assert!(matches!(
            channels.requests.try_receive(),
            Ok(SessionRequest::Reset)
        ));
    }
}
