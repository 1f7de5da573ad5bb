//! `Warbler` Constants
//!
//! Capacities, byte offsets and assigned numbers used throughout the
//! negotiation core. Capacities are compile-time so every table can live in
//! fixed `heapless` storage.

/// Number of peer slots (simultaneous A2DP stream connections)
pub const MAX_PEERS: usize = 4;

/// Capabilities stored per peer and per role during one discovery round
pub const MAX_PEER_ENDPOINTS: usize = 2;

/// Size of an AVDTP codec information element, including the LOSC byte
pub const CODEC_INFO_LEN: usize = 10;

/// Maximum size of a content-protection descriptor blob
pub const MAX_PROTECT_INFO_LEN: usize = 8;

/// Outbound transport commands buffered by a single processor step
pub const MAX_PENDING_COMMANDS: usize = 8;

/// Depth of the processor's inbound and outbound channels
pub const CHANNEL_DEPTH: usize = 4;

/// Reported when no opened peer constrains the MTU
pub const UNBOUNDED_MTU: u16 = 0xFFFF;

/// Channel bits of an AV handle
pub const AV_HANDLE_CHANNEL_MASK: u8 = 0xC0;

/// Channel bits marking an audio AV handle
pub const AV_HANDLE_CHANNEL_AUDIO: u8 = 0x40;

/// Offset of the sampling frequency / channel mode byte
pub const SBC_FREQ_CHAN_OFFSET: usize = 3;

/// Offset of the block length / subbands / allocation byte
pub const SBC_BLOCK_BAND_OFFSET: usize = 4;

/// Offset of the minimum bitpool byte
pub const SBC_MIN_BITPOOL_OFFSET: usize = 5;

/// Offset of the maximum bitpool byte
pub const SBC_MAX_BITPOOL_OFFSET: usize = 6;

/// Bytes compared when checking a proposal against the active configuration
/// (everything up to, but excluding, the bitpool bounds)
pub const SBC_SHARED_PARAMS_LEN: usize = SBC_MIN_BITPOOL_OFFSET;

/// LOSC value of an SBC information element
pub const SBC_INFO_LOSC: u8 = 6;

/// Lowest legal SBC bitpool
pub const SBC_MIN_BITPOOL: u8 = 2;

/// Highest legal SBC bitpool
pub const SBC_MAX_BITPOOL: u8 = 250;

/// Highest bitpool the local source advertises and configures by default
pub const SBC_SOURCE_MAX_BITPOOL: u8 = 53;

/// Minimum LOSC of a content-protection descriptor carrying a scheme id
pub const CP_LOSC: u8 = 2;

/// Content-protection scheme id of SCMS-T
pub const CP_SCMS_T_ID: u16 = 0x0002;

/// Service class UUID of an A2DP audio source
pub const UUID_AUDIO_SOURCE: u16 = 0x110A;

/// Service class UUID of an A2DP audio sink
pub const UUID_AUDIO_SINK: u16 = 0x110B;
