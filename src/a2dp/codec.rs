//! Audio Codec Support for A2DP
//!
//! Codec information elements travel as fixed-size blobs whose layout is set by
//! the A2DP specification. This module interprets them bit-exactly and holds
//! the capability-matching rules used during negotiation. SBC is the only
//! codec implemented; [`MediaCodec`] is the seam for adding more.

use super::peer::EndpointCapability;
use crate::constants::{
    CODEC_INFO_LEN, SBC_BLOCK_BAND_OFFSET, SBC_FREQ_CHAN_OFFSET, SBC_INFO_LOSC, SBC_MAX_BITPOOL,
    SBC_MAX_BITPOOL_OFFSET, SBC_MIN_BITPOOL, SBC_MIN_BITPOOL_OFFSET, SBC_SHARED_PARAMS_LEN,
    SBC_SOURCE_MAX_BITPOOL,
};

/// Media codec types as carried in byte 2 of a codec information element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CodecType {
    /// SBC (Sub-Band Coding) - Mandatory codec for A2DP
    Sbc = 0x00,
    /// MPEG-1,2 Audio (MP3)
    Mpeg12Audio = 0x01,
    /// MPEG-2,4 AAC
    Mpeg24Aac = 0x02,
    /// ATRAC family
    Atrac = 0x04,
    /// Vendor-specific codec
    VendorSpecific = 0xFF,
}

impl CodecType {
    /// Whether endpoints of this type can be negotiated at all
    #[must_use]
    pub const fn is_supported(self) -> bool {
        matches!(self, Self::Sbc)
    }
}

impl TryFrom<u8> for CodecType {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0x00 => Ok(Self::Sbc),
            0x01 => Ok(Self::Mpeg12Audio),
            0x02 => Ok(Self::Mpeg24Aac),
            0x04 => Ok(Self::Atrac),
            0xFF => Ok(Self::VendorSpecific),
            other => Err(other),
        }
    }
}

/// Identifier of a negotiated codec, with a sentinel for "nothing selected"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecId {
    /// No codec selected
    None,
    /// SBC
    Sbc,
}

impl CodecId {
    /// Codec type endpoints must advertise to be considered for this codec
    #[must_use]
    pub const fn codec_type(self) -> Option<CodecType> {
        match self {
            Self::None => None,
            Self::Sbc => Some(CodecType::Sbc),
        }
    }

    /// Whether an endpoint of `codec_type` can carry this codec
    #[must_use]
    pub fn accepts(self, codec_type: CodecType) -> bool {
        self.codec_type() == Some(codec_type)
    }
}

impl From<CodecType> for CodecId {
    fn from(codec_type: CodecType) -> Self {
        match codec_type {
            CodecType::Sbc => Self::Sbc,
            _ => Self::None,
        }
    }
}

/// Raw codec information element (capabilities or configuration)
///
/// Byte 0 is the LOSC, byte 1 the media type, byte 2 the codec type; the
/// rest is codec specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CodecInfo(pub [u8; CODEC_INFO_LEN]);

impl CodecInfo {
    /// All-zero element
    pub const EMPTY: Self = Self([0; CODEC_INFO_LEN]);

    /// Copy an element out of a transport buffer, zero-padding short input
    /// and ignoring anything past [`CODEC_INFO_LEN`]
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut info = [0u8; CODEC_INFO_LEN];
        let len = bytes.len().min(CODEC_INFO_LEN);
        info[..len].copy_from_slice(&bytes[..len]);
        Self(info)
    }

    /// Raw bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; CODEC_INFO_LEN] {
        &self.0
    }

    /// Minimum bitpool byte (SBC layout)
    #[must_use]
    pub const fn min_bitpool(&self) -> u8 {
        self.0[SBC_MIN_BITPOOL_OFFSET]
    }

    /// Maximum bitpool byte (SBC layout)
    #[must_use]
    pub const fn max_bitpool(&self) -> u8 {
        self.0[SBC_MAX_BITPOOL_OFFSET]
    }

    /// Header and parameter bytes shared by every peer, bitpool excluded
    #[must_use]
    pub fn shared_params(&self) -> &[u8] {
        &self.0[..SBC_SHARED_PARAMS_LEN]
    }
}

/// A codec selection: which codec, and its information element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CodecConfig {
    /// Codec identifier
    pub id: CodecId,
    /// Configuration element
    pub info: CodecInfo,
}

impl CodecConfig {
    /// "No configuration" sentinel
    pub const NONE: Self = Self {
        id: CodecId::None,
        info: CodecInfo::EMPTY,
    };

    /// Built-in default: SBC with [`SbcCapabilities::DEFAULT_CONFIG`]
    pub const DEFAULT: Self = Self {
        id: CodecId::Sbc,
        info: SbcCapabilities::DEFAULT_CONFIG.to_info(),
    };

    /// Build an SBC configuration
    ///
    /// # Errors
    /// Returns error if the SBC parameters are not encodable
    pub fn sbc(sbc: &SbcCapabilities) -> Result<Self, SbcParseError> {
        Ok(Self {
            id: CodecId::Sbc,
            info: sbc.build()?,
        })
    }
}

/// SBC Sampling Frequency (bitfield, upper nibble of byte 3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbcSamplingFrequency(pub u8);

impl SbcSamplingFrequency {
    /// 16000 Hz
    pub const HZ_16000: u8 = 0x80;
    /// 32000 Hz
    pub const HZ_32000: u8 = 0x40;
    /// 44100 Hz
    pub const HZ_44100: u8 = 0x20;
    /// 48000 Hz
    pub const HZ_48000: u8 = 0x10;
    /// Mask of the field within byte 3
    pub const MASK: u8 = 0xF0;

    /// Preference order when picking a single frequency
    const PREFERENCE: [u8; 2] = [Self::HZ_48000, Self::HZ_44100];

    /// Create with standard frequencies (44.1kHz and 48kHz)
    #[must_use]
    pub const fn standard() -> Self {
        Self(Self::HZ_44100 | Self::HZ_48000)
    }

    /// Check if frequency is supported
    #[must_use]
    pub const fn supports(&self, freq: u8) -> bool {
        (self.0 & freq) != 0
    }

    /// Highest preferred frequency present in the bitfield
    #[must_use]
    pub fn best(&self) -> Option<Self> {
        pick(self.0, &Self::PREFERENCE).map(Self)
    }
}

/// SBC Channel Mode (bitfield, lower nibble of byte 3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbcChannelMode(pub u8);

impl SbcChannelMode {
    /// Mono
    pub const MONO: u8 = 0x08;
    /// Dual Channel
    pub const DUAL_CHANNEL: u8 = 0x04;
    /// Stereo
    pub const STEREO: u8 = 0x02;
    /// Joint Stereo
    pub const JOINT_STEREO: u8 = 0x01;
    /// Mask of the field within byte 3
    pub const MASK: u8 = 0x0F;

    const PREFERENCE: [u8; 4] = [
        Self::JOINT_STEREO,
        Self::STEREO,
        Self::DUAL_CHANNEL,
        Self::MONO,
    ];

    /// Create with all modes supported
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::MONO | Self::DUAL_CHANNEL | Self::STEREO | Self::JOINT_STEREO)
    }

    /// Check if mode is supported
    #[must_use]
    pub const fn supports(&self, mode: u8) -> bool {
        (self.0 & mode) != 0
    }

    /// Highest preferred mode present in the bitfield
    #[must_use]
    pub fn best(&self) -> Option<Self> {
        pick(self.0, &Self::PREFERENCE).map(Self)
    }
}

/// SBC Block Length (bitfield, upper nibble of byte 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbcBlockLength(pub u8);

impl SbcBlockLength {
    /// 4 blocks
    pub const BLOCKS_4: u8 = 0x80;
    /// 8 blocks
    pub const BLOCKS_8: u8 = 0x40;
    /// 12 blocks
    pub const BLOCKS_12: u8 = 0x20;
    /// 16 blocks
    pub const BLOCKS_16: u8 = 0x10;
    /// Mask of the field within byte 4
    pub const MASK: u8 = 0xF0;

    const PREFERENCE: [u8; 4] = [
        Self::BLOCKS_16,
        Self::BLOCKS_12,
        Self::BLOCKS_8,
        Self::BLOCKS_4,
    ];

    /// Create with all block lengths supported
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::BLOCKS_4 | Self::BLOCKS_8 | Self::BLOCKS_12 | Self::BLOCKS_16)
    }

    /// Check if block length is supported
    #[must_use]
    pub const fn supports(&self, blocks: u8) -> bool {
        (self.0 & blocks) != 0
    }

    /// Longest block length present in the bitfield
    #[must_use]
    pub fn best(&self) -> Option<Self> {
        pick(self.0, &Self::PREFERENCE).map(Self)
    }
}

/// SBC Subbands (bitfield, bits 2-3 of byte 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbcSubbands(pub u8);

impl SbcSubbands {
    /// 4 subbands
    pub const SUBBANDS_4: u8 = 0x08;
    /// 8 subbands
    pub const SUBBANDS_8: u8 = 0x04;
    /// Mask of the field within byte 4
    pub const MASK: u8 = 0x0C;

    const PREFERENCE: [u8; 2] = [Self::SUBBANDS_8, Self::SUBBANDS_4];

    /// Create with all subbands supported
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::SUBBANDS_4 | Self::SUBBANDS_8)
    }

    /// Check if subband count is supported
    #[must_use]
    pub const fn supports(&self, subbands: u8) -> bool {
        (self.0 & subbands) != 0
    }

    /// Highest subband count present in the bitfield
    #[must_use]
    pub fn best(&self) -> Option<Self> {
        pick(self.0, &Self::PREFERENCE).map(Self)
    }
}

/// SBC Allocation Method (bitfield, bits 0-1 of byte 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbcAllocationMethod(pub u8);

impl SbcAllocationMethod {
    /// SNR allocation method
    pub const SNR: u8 = 0x02;
    /// Loudness allocation method
    pub const LOUDNESS: u8 = 0x01;
    /// Mask of the field within byte 4
    pub const MASK: u8 = 0x03;

    const PREFERENCE: [u8; 2] = [Self::LOUDNESS, Self::SNR];

    /// Create with all allocation methods supported
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::SNR | Self::LOUDNESS)
    }

    /// Check if allocation method is supported
    #[must_use]
    pub const fn supports(&self, method: u8) -> bool {
        (self.0 & method) != 0
    }

    /// Preferred allocation method present in the bitfield
    #[must_use]
    pub fn best(&self) -> Option<Self> {
        pick(self.0, &Self::PREFERENCE).map(Self)
    }
}

fn pick(bits: u8, preference: &[u8]) -> Option<u8> {
    preference.iter().copied().find(|&bit| bits & bit != 0)
}

/// Why an SBC information element was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SbcParseError {
    /// LOSC is not the SBC element length
    BadLength,
    /// Codec type byte is not SBC
    WrongCodec,
    /// Sampling frequency field invalid
    BadSamplingFrequency,
    /// Channel mode field invalid
    BadChannelMode,
    /// Block length field invalid
    BadBlockLength,
    /// Subbands field invalid
    BadSubbands,
    /// Allocation method field invalid
    BadAllocationMethod,
    /// Minimum bitpool out of range
    BadMinBitpool,
    /// Maximum bitpool out of range or below the minimum
    BadMaxBitpool,
}

/// SBC (Sub-Band Coding) codec parameters
///
/// Used both for capabilities (any number of bits per field) and for
/// configurations (exactly one bit per field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbcCapabilities {
    /// Sampling frequency support (bitfield)
    pub sampling_frequencies: SbcSamplingFrequency,
    /// Channel mode support (bitfield)
    pub channel_modes: SbcChannelMode,
    /// Block length support (bitfield)
    pub block_lengths: SbcBlockLength,
    /// Subbands support (bitfield)
    pub subbands: SbcSubbands,
    /// Allocation method support (bitfield)
    pub allocation_methods: SbcAllocationMethod,
    /// Minimum bitpool value (2-250)
    pub min_bitpool: u8,
    /// Maximum bitpool value (2-250)
    pub max_bitpool: u8,
}

impl SbcCapabilities {
    /// Capabilities advertised by the local source endpoint
    pub const SOURCE: Self = Self {
        sampling_frequencies: SbcSamplingFrequency(SbcSamplingFrequency::HZ_44100),
        channel_modes: SbcChannelMode(SbcChannelMode::JOINT_STEREO),
        block_lengths: SbcBlockLength(SbcBlockLength::BLOCKS_16),
        subbands: SbcSubbands(SbcSubbands::SUBBANDS_8),
        allocation_methods: SbcAllocationMethod(SbcAllocationMethod::LOUDNESS),
        min_bitpool: SBC_MIN_BITPOOL,
        max_bitpool: SBC_SOURCE_MAX_BITPOOL,
    };

    /// Capabilities advertised by the local sink endpoint
    pub const SINK: Self = Self {
        sampling_frequencies: SbcSamplingFrequency::standard(),
        channel_modes: SbcChannelMode::all(),
        block_lengths: SbcBlockLength::all(),
        subbands: SbcSubbands::all(),
        allocation_methods: SbcAllocationMethod::all(),
        min_bitpool: SBC_MIN_BITPOOL,
        max_bitpool: SBC_MAX_BITPOOL,
    };

    /// Default configuration installed on reset
    pub const DEFAULT_CONFIG: Self = Self::default_config(SbcSamplingFrequency(
        SbcSamplingFrequency::HZ_44100,
    ));

    /// Default configuration at the given sampling frequency
    #[must_use]
    pub const fn default_config(sampling_frequency: SbcSamplingFrequency) -> Self {
        Self {
            sampling_frequencies: sampling_frequency,
            ..Self::SOURCE
        }
    }

    /// Encode without validation; callers guarantee the fields are in range
    pub(crate) const fn to_info(&self) -> CodecInfo {
        let mut info = [0u8; CODEC_INFO_LEN];
        info[0] = SBC_INFO_LOSC;
        info[1] = 0; // audio media type, upper nibble
        info[2] = CodecType::Sbc as u8;
        info[SBC_FREQ_CHAN_OFFSET] = (self.sampling_frequencies.0 & SbcSamplingFrequency::MASK)
            | (self.channel_modes.0 & SbcChannelMode::MASK);
        info[SBC_BLOCK_BAND_OFFSET] = (self.block_lengths.0 & SbcBlockLength::MASK)
            | (self.subbands.0 & SbcSubbands::MASK)
            | (self.allocation_methods.0 & SbcAllocationMethod::MASK);
        info[SBC_MIN_BITPOOL_OFFSET] = self.min_bitpool;
        info[SBC_MAX_BITPOOL_OFFSET] = self.max_bitpool;
        CodecInfo(info)
    }

    /// Validate field masks and bitpool bounds
    ///
    /// # Errors
    /// Returns the first offending field
    pub const fn validate(&self) -> Result<(), SbcParseError> {
        if self.sampling_frequencies.0 & !SbcSamplingFrequency::MASK != 0 {
            return Err(SbcParseError::BadSamplingFrequency);
        }
        if self.channel_modes.0 & !SbcChannelMode::MASK != 0 {
            return Err(SbcParseError::BadChannelMode);
        }
        if self.block_lengths.0 & !SbcBlockLength::MASK != 0 {
            return Err(SbcParseError::BadBlockLength);
        }
        if self.subbands.0 & !SbcSubbands::MASK != 0 {
            return Err(SbcParseError::BadSubbands);
        }
        if self.allocation_methods.0 & !SbcAllocationMethod::MASK != 0 {
            return Err(SbcParseError::BadAllocationMethod);
        }
        if self.min_bitpool < SBC_MIN_BITPOOL || self.min_bitpool > SBC_MAX_BITPOOL {
            return Err(SbcParseError::BadMinBitpool);
        }
        if self.max_bitpool < SBC_MIN_BITPOOL
            || self.max_bitpool > SBC_MAX_BITPOOL
            || self.max_bitpool < self.min_bitpool
        {
            return Err(SbcParseError::BadMaxBitpool);
        }
        Ok(())
    }

    /// Encode into a codec information element
    ///
    /// # Errors
    /// Returns error if a field is out of range
    pub const fn build(&self) -> Result<CodecInfo, SbcParseError> {
        match self.validate() {
            Ok(()) => Ok(self.to_info()),
            Err(e) => Err(e),
        }
    }

    /// Decode an SBC information element
    ///
    /// With `for_caps` unset the element is a configuration and every field
    /// must select exactly one option.
    ///
    /// # Errors
    /// Returns the first field that fails validation
    pub fn parse(info: &CodecInfo, for_caps: bool) -> Result<Self, SbcParseError> {
        let bytes = info.as_bytes();
        if bytes[0] != SBC_INFO_LOSC {
            return Err(SbcParseError::BadLength);
        }
        if bytes[2] != CodecType::Sbc as u8 {
            return Err(SbcParseError::WrongCodec);
        }

        let freq_chan = bytes[SBC_FREQ_CHAN_OFFSET];
        let block_band = bytes[SBC_BLOCK_BAND_OFFSET];
        let sbc = Self {
            sampling_frequencies: SbcSamplingFrequency(freq_chan & SbcSamplingFrequency::MASK),
            channel_modes: SbcChannelMode(freq_chan & SbcChannelMode::MASK),
            block_lengths: SbcBlockLength(block_band & SbcBlockLength::MASK),
            subbands: SbcSubbands(block_band & SbcSubbands::MASK),
            allocation_methods: SbcAllocationMethod(block_band & SbcAllocationMethod::MASK),
            min_bitpool: bytes[SBC_MIN_BITPOOL_OFFSET],
            max_bitpool: bytes[SBC_MAX_BITPOOL_OFFSET],
        };
        sbc.validate()?;

        if !for_caps {
            if sbc.sampling_frequencies.0.count_ones() != 1 {
                return Err(SbcParseError::BadSamplingFrequency);
            }
            if sbc.channel_modes.0.count_ones() != 1 {
                return Err(SbcParseError::BadChannelMode);
            }
            if sbc.block_lengths.0.count_ones() != 1 {
                return Err(SbcParseError::BadBlockLength);
            }
            if sbc.subbands.0.count_ones() != 1 {
                return Err(SbcParseError::BadSubbands);
            }
            if sbc.allocation_methods.0.count_ones() != 1 {
                return Err(SbcParseError::BadAllocationMethod);
            }
        }
        Ok(sbc)
    }

    /// Whether this configuration only selects options `caps` advertises and
    /// keeps its bitpool within the advertised bounds
    ///
    /// `self` must come from [`Self::parse`] with `for_caps` unset, so every
    /// field carries exactly one bit.
    #[must_use]
    pub const fn fits_within(&self, caps: &Self) -> bool {
        caps.sampling_frequencies
            .supports(self.sampling_frequencies.0)
            && caps.channel_modes.supports(self.channel_modes.0)
            && caps.block_lengths.supports(self.block_lengths.0)
            && caps.subbands.supports(self.subbands.0)
            && caps.allocation_methods.supports(self.allocation_methods.0)
            && caps.min_bitpool <= self.min_bitpool
            && self.max_bitpool <= caps.max_bitpool
    }

    /// Pick the best option of every field, independently, from these
    /// capabilities. Fields with no bit set keep the value from `fallback`.
    #[must_use]
    pub fn preferred(&self, fallback: &Self) -> Self {
        Self {
            sampling_frequencies: self
                .sampling_frequencies
                .best()
                .unwrap_or(fallback.sampling_frequencies),
            channel_modes: self.channel_modes.best().unwrap_or(fallback.channel_modes),
            block_lengths: self.block_lengths.best().unwrap_or(fallback.block_lengths),
            subbands: self.subbands.best().unwrap_or(fallback.subbands),
            allocation_methods: self
                .allocation_methods
                .best()
                .unwrap_or(fallback.allocation_methods),
            min_bitpool: self.min_bitpool,
            max_bitpool: self.max_bitpool,
        }
    }
}

impl Default for SbcCapabilities {
    fn default() -> Self {
        Self::DEFAULT_CONFIG
    }
}

/// Negotiation rules of one codec
///
/// Implementations interpret their own information element layout. Adding a
/// codec means implementing this trait and wiring it into the dispatch
/// functions below.
pub trait MediaCodec {
    /// Codec type this implementation negotiates
    const CODEC_TYPE: CodecType;

    /// Whether `config` fits within `caps`. Bitpool-like ranges are not
    /// compared; they are reconciled separately.
    fn matches(caps: &CodecInfo, config: &CodecInfo) -> bool;

    /// Concrete configuration for `caps` derived from the active `template`
    fn build_concrete_config(template: &CodecInfo, caps: &CodecInfo) -> CodecInfo;

    /// Highest-quality configuration `caps` allows
    fn build_preferred_config(caps: &CodecInfo) -> CodecInfo;
}

/// SBC negotiation rules
#[derive(Debug, Clone, Copy)]
pub struct Sbc;

impl MediaCodec for Sbc {
    const CODEC_TYPE: CodecType = CodecType::Sbc;

    fn matches(caps: &CodecInfo, config: &CodecInfo) -> bool {
        let caps = caps.as_bytes();
        let config = config.as_bytes();
        let freq_chan = caps[SBC_FREQ_CHAN_OFFSET] & config[SBC_FREQ_CHAN_OFFSET];
        let block_band = caps[SBC_BLOCK_BAND_OFFSET] & config[SBC_BLOCK_BAND_OFFSET];
        trace!(
            "[CODEC] SBC match freq/chan {=u8:#x} block/band {=u8:#x}, bitpool caps {}..={} config {}..={}",
            freq_chan,
            block_band,
            caps[SBC_MIN_BITPOOL_OFFSET],
            caps[SBC_MAX_BITPOOL_OFFSET],
            config[SBC_MIN_BITPOOL_OFFSET],
            config[SBC_MAX_BITPOOL_OFFSET]
        );
        freq_chan != 0 && block_band != 0
    }

    fn build_concrete_config(template: &CodecInfo, caps: &CodecInfo) -> CodecInfo {
        // Only the SBC portion is copied so comparisons with larger elements stay stable
        let mut config = CodecInfo::EMPTY;
        config.0[..=SBC_MAX_BITPOOL_OFFSET]
            .copy_from_slice(&template.0[..=SBC_MAX_BITPOOL_OFFSET]);
        config.0[SBC_MIN_BITPOOL_OFFSET] = caps.min_bitpool();
        config.0[SBC_MAX_BITPOOL_OFFSET] = caps.max_bitpool();
        debug!(
            "[CODEC] built SBC config, bitpool {}..={}",
            config.min_bitpool(),
            config.max_bitpool()
        );
        config
    }

    fn build_preferred_config(caps: &CodecInfo) -> CodecInfo {
        let default = SbcCapabilities::DEFAULT_CONFIG;
        let parsed = match SbcCapabilities::parse(caps, true) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("[CODEC] cannot parse source caps: {}", e);
                return default.to_info();
            }
        };
        let preferred = parsed.preferred(&default);
        // Bitpool bounds come from parsed caps and were validated there
        preferred.to_info()
    }
}

/// Whether `config` fits `caps` for the given codec. Unknown codecs never match.
#[must_use]
pub fn matches(codec_id: CodecId, caps: &CodecInfo, config: &CodecInfo) -> bool {
    match codec_id {
        CodecId::Sbc => Sbc::matches(caps, config),
        CodecId::None => {
            error!("[CODEC] match requested for unsupported codec");
            false
        }
    }
}

/// Concrete configuration for a peer capability, derived from the active
/// configuration. The peer's own bitpool bounds replace the template's.
///
/// Returns `None` when the active codec is unsupported.
#[must_use]
pub fn build_concrete_config(active: &CodecConfig, caps: &CodecInfo) -> Option<CodecInfo> {
    match active.id {
        CodecId::Sbc => Some(Sbc::build_concrete_config(&active.info, caps)),
        CodecId::None => {
            error!("[CODEC] cannot build config for unsupported codec");
            None
        }
    }
}

/// Preferred SBC configuration from a remote capability: the best option of
/// each field chosen independently, bitpool copied from the capability.
/// Unparsable capabilities yield the default configuration.
#[must_use]
pub fn build_preferred_config(caps: &CodecInfo) -> CodecInfo {
    Sbc::build_preferred_config(caps)
}

/// Index of the first candidate that carries `codec_id` and matches `template`
///
/// Candidates are scanned in advertisement order.
#[must_use]
pub fn select_best_match(
    candidates: &[EndpointCapability],
    codec_id: CodecId,
    template: &CodecInfo,
) -> Option<usize> {
    candidates.iter().position(|candidate| {
        codec_id.accepts(candidate.codec_type) && matches(codec_id, &candidate.caps, template)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2dp::protection::ProtectionInfo;

    fn caps(freq_chan: u8, block_band: u8, min: u8, max: u8) -> CodecInfo {
        CodecInfo::from_slice(&[SBC_INFO_LOSC, 0, 0, freq_chan, block_band, min, max])
    }

    fn endpoint(codec_type: CodecType, info: CodecInfo) -> EndpointCapability {
        EndpointCapability {
            local_sep_index: 0,
            peer_seid: 1,
            codec_type,
            caps: info,
            protection: ProtectionInfo::none(),
        }
    }

    #[test]
    fn test_sbc_sampling_frequency() {
        let freq = SbcSamplingFrequency::standard();
        assert!(freq.supports(SbcSamplingFrequency::HZ_44100));
        assert!(freq.supports(SbcSamplingFrequency::HZ_48000));
        assert!(!freq.supports(SbcSamplingFrequency::HZ_16000));
        assert_eq!(
            freq.best(),
            Some(SbcSamplingFrequency(SbcSamplingFrequency::HZ_48000))
        );
    }

    #[test]
    fn test_default_config_layout() {
        let info = CodecConfig::DEFAULT.info;
        assert_eq!(
            info.as_bytes(),
            &[0x06, 0x00, 0x00, 0x21, 0x15, 2, 53, 0, 0, 0]
        );
        assert!(SbcCapabilities::parse(&info, false).is_ok());
    }

    #[test]
    fn test_parse_rejects_multi_bit_config() {
        let info = caps(0x31, 0x15, 2, 53);
        assert!(SbcCapabilities::parse(&info, true).is_ok());
        assert_eq!(
            SbcCapabilities::parse(&info, false),
            Err(SbcParseError::BadSamplingFrequency)
        );
    }

    #[test]
    fn test_parse_rejects_bad_bitpool() {
        assert_eq!(
            SbcCapabilities::parse(&caps(0x21, 0x15, 1, 53), true),
            Err(SbcParseError::BadMinBitpool)
        );
        assert_eq!(
            SbcCapabilities::parse(&caps(0x21, 0x15, 40, 30), true),
            Err(SbcParseError::BadMaxBitpool)
        );
        let mut wrong = caps(0x21, 0x15, 2, 53);
        wrong.0[2] = CodecType::Mpeg24Aac as u8;
        assert_eq!(
            SbcCapabilities::parse(&wrong, true),
            Err(SbcParseError::WrongCodec)
        );
    }

    #[test]
    fn test_build_validates() {
        let mut sbc = SbcCapabilities::SOURCE;
        assert!(sbc.build().is_ok());

        sbc.min_bitpool = 60;
        assert_eq!(sbc.build(), Err(SbcParseError::BadMaxBitpool));

        sbc = SbcCapabilities::SOURCE;
        sbc.subbands = SbcSubbands(0x40);
        assert_eq!(sbc.build(), Err(SbcParseError::BadSubbands));
    }

    #[test]
    fn test_config_fits_within_caps() {
        let config = SbcCapabilities::parse(&CodecConfig::DEFAULT.info, false).unwrap();
        assert!(config.fits_within(&SbcCapabilities::SOURCE));
        assert!(config.fits_within(&SbcCapabilities::SINK));

        let at_48k = SbcCapabilities::parse(&caps(0x11, 0x15, 2, 53), false).unwrap();
        assert!(!at_48k.fits_within(&SbcCapabilities::SOURCE));
        assert!(at_48k.fits_within(&SbcCapabilities::SINK));

        let high_bitpool = SbcCapabilities::parse(&caps(0x21, 0x15, 2, 60), false).unwrap();
        assert!(!high_bitpool.fits_within(&SbcCapabilities::SOURCE));

        let at_16k = SbcCapabilities::parse(&caps(0x81, 0x15, 2, 53), false).unwrap();
        assert!(!at_16k.fits_within(&SbcCapabilities::SINK));
    }

    #[test]
    fn test_matches_intersects_both_bytes() {
        let remote = caps(0x31, 0x1F, 2, 53);
        assert!(matches(CodecId::Sbc, &remote, &CodecConfig::DEFAULT.info));

        let no_block_band = caps(0x31, 0x8A, 2, 53);
        assert!(!matches(
            CodecId::Sbc,
            &no_block_band,
            &CodecConfig::DEFAULT.info
        ));

        let no_freq_chan = caps(0x00, 0x1F, 2, 53);
        assert!(!matches(
            CodecId::Sbc,
            &no_freq_chan,
            &CodecConfig::DEFAULT.info
        ));
    }

    #[test]
    fn test_matches_ignores_bitpool() {
        let remote = caps(0x21, 0x15, 60, 70);
        assert!(matches(CodecId::Sbc, &remote, &CodecConfig::DEFAULT.info));
    }

    #[test]
    fn test_unknown_codec_never_matches() {
        let remote = caps(0xFF, 0xFF, 2, 53);
        assert!(!matches(CodecId::None, &remote, &remote));
        assert_eq!(build_concrete_config(&CodecConfig::NONE, &remote), None);
    }

    #[test]
    fn test_concrete_config_uses_peer_bitpool() {
        let remote = caps(0x31, 0x1F, 10, 35);
        let config = build_concrete_config(&CodecConfig::DEFAULT, &remote).unwrap();
        assert_eq!(config.shared_params(), CodecConfig::DEFAULT.info.shared_params());
        assert_eq!(config.min_bitpool(), 10);
        assert_eq!(config.max_bitpool(), 35);
        assert_eq!(&config.0[7..], &[0, 0, 0]);
    }

    #[test]
    fn test_concrete_config_always_matches_its_caps() {
        let samples = [
            caps(0x21, 0x15, 2, 53),
            caps(0x3F, 0xFF, 2, 250),
            caps(0x23, 0x1D, 5, 32),
            caps(0x31, 0x16, 2, 2),
        ];
        for remote in &samples {
            let config = build_concrete_config(&CodecConfig::DEFAULT, remote).unwrap();
            assert!(matches(CodecId::Sbc, remote, &config));
        }
    }

    #[test]
    fn test_preferred_config_picks_best_per_field() {
        let remote = caps(
            SbcSamplingFrequency::HZ_44100 | SbcSamplingFrequency::HZ_48000 | SbcChannelMode::MONO
                | SbcChannelMode::STEREO,
            SbcBlockLength::BLOCKS_8 | SbcBlockLength::BLOCKS_12 | SbcSubbands::SUBBANDS_4
                | SbcAllocationMethod::SNR,
            8,
            40,
        );
        let preferred = build_preferred_config(&remote);
        let parsed = SbcCapabilities::parse(&preferred, false).unwrap();
        assert_eq!(
            parsed.sampling_frequencies.0,
            SbcSamplingFrequency::HZ_48000
        );
        assert_eq!(parsed.channel_modes.0, SbcChannelMode::STEREO);
        assert_eq!(parsed.block_lengths.0, SbcBlockLength::BLOCKS_12);
        assert_eq!(parsed.subbands.0, SbcSubbands::SUBBANDS_4);
        assert_eq!(parsed.allocation_methods.0, SbcAllocationMethod::SNR);
        assert_eq!((parsed.min_bitpool, parsed.max_bitpool), (8, 40));
    }

    #[test]
    fn test_preferred_config_is_idempotent() {
        let remote = caps(0x3F, 0xFF, 2, 250);
        let once = build_preferred_config(&remote);
        let twice = build_preferred_config(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_preferred_config_falls_back_to_default() {
        let garbage = CodecInfo::from_slice(&[0x02, 0, 0]);
        assert_eq!(build_preferred_config(&garbage), CodecConfig::DEFAULT.info);
    }

    #[test]
    fn test_select_best_match_scans_in_order() {
        let candidates = [
            endpoint(CodecType::Mpeg24Aac, caps(0x3F, 0xFF, 2, 53)),
            endpoint(CodecType::Sbc, caps(0x11, 0x15, 2, 53)),
            endpoint(CodecType::Sbc, caps(0x21, 0x15, 2, 53)),
            endpoint(CodecType::Sbc, caps(0x3F, 0xFF, 2, 53)),
        ];
        let template = caps(0x20, 0x10, 2, 53);
        assert_eq!(
            select_best_match(&candidates, CodecId::Sbc, &template),
            Some(2)
        );
        assert_eq!(
            select_best_match(&candidates[..2], CodecId::Sbc, &template),
            None
        );
        assert_eq!(
            select_best_match(&candidates, CodecId::None, &template),
            None
        );
    }

    #[test]
    fn test_codec_type_from_raw() {
        assert_eq!(CodecType::try_from(0x00), Ok(CodecType::Sbc));
        assert_eq!(CodecType::try_from(0x03), Err(0x03));
        assert!(CodecType::Sbc.is_supported());
        assert!(!CodecType::Mpeg24Aac.is_supported());
        assert_eq!(CodecId::from(CodecType::Atrac), CodecId::None);
    }
}
