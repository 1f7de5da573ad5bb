//! Global codec configuration management
//!
//! Session control changes the process-wide configuration from the PCM feeding
//! format; every open connection is then reconciled with it. The encoder reads
//! back the bitpool range that all open sinks can decode.

use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::Vec;

use super::codec::{self, CodecConfig, CodecId, CodecInfo, SbcCapabilities, SbcSamplingFrequency};
use super::context::{NegotiationContext, StreamSelection, TransportSink};
use super::protection::{self, CopyControl, ProtectionInfo};
use super::registry::PeerRegistry;
use super::AvHandle;
use crate::constants::{MAX_PEERS, UNBOUNDED_MTU};
use crate::{IncompatibleReason, NegotiationError};

/// PCM input format fed to the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PcmFeeding {
    /// Sampling rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u8,
    /// Bits per sample
    pub bits_per_sample: u8,
}

impl PcmFeeding {
    /// SBC sampling frequency carrying this feeding, if any
    #[must_use]
    pub fn sampling_frequency(&self) -> Option<SbcSamplingFrequency> {
        if !matches!(self.channels, 1 | 2) || !matches!(self.bits_per_sample, 8 | 16) {
            return None;
        }
        let bit = match self.sample_rate {
            8_000 | 12_000 | 16_000 | 24_000 | 32_000 | 48_000 => SbcSamplingFrequency::HZ_48000,
            11_025 | 22_050 | 44_100 => SbcSamplingFrequency::HZ_44100,
            _ => return None,
        };
        Some(SbcSamplingFrequency(bit))
    }
}

/// Encoder parameters every open connection can handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EncoderConfig {
    /// Active SBC configuration with the narrowest common bitpool range
    pub sbc: SbcCapabilities,
    /// Smallest MTU among open connections
    pub min_mtu: u16,
    /// Whether `sbc` reflects the active configuration rather than defaults
    pub valid: bool,
}

struct ReconcileStep {
    handle: AvHandle,
    index: usize,
    config: CodecInfo,
    cp_active: bool,
}

type ReconcilePlan = Vec<ReconcileStep, MAX_PEERS>;

impl<M: RawMutex> NegotiationContext<'_, M> {
    /// Install the default configuration
    pub fn reset(&self) {
        let sbc = SbcCapabilities::default_config(self.options.default_sample_rate);
        let config = CodecConfig::sbc(&sbc).unwrap_or_else(|e| {
            error!("[GLOBAL] default config invalid: {}", e);
            CodecConfig::DEFAULT
        });
        self.shared.with_lock(|state, _| state.global = config);
        debug!("[GLOBAL] reset to default configuration");
    }

    /// Switch the global configuration to carry `feeding` and reconcile every
    /// open connection with it
    ///
    /// Nothing changes unless every open connection can follow.
    ///
    /// # Errors
    /// Returns `FeedingUnsupported` if no SBC configuration carries the
    /// feeding, or `Incompatible` naming the first connection that cannot
    /// follow
    pub fn set_from_feeding(
        &mut self,
        feeding: PcmFeeding,
        sink: &mut impl TransportSink,
    ) -> Result<(), NegotiationError> {
        let frequency = feeding.sampling_frequency().ok_or_else(|| {
            warn!(
                "[GLOBAL] unsupported feeding {} Hz, {} ch, {} bit",
                feeding.sample_rate,
                feeding.channels,
                feeding.bits_per_sample
            );
            NegotiationError::FeedingUnsupported
        })?;
        let sbc = SbcCapabilities::default_config(frequency);
        let config =
            CodecConfig::sbc(&sbc).map_err(|_| NegotiationError::FeedingUnsupported)?;

        let cp_supported = self.options.content_protection;
        let peers = &mut self.peers;
        let reconfigures = self.shared.with_lock(|state, protection| {
            let plan =
                plan_reconcile(peers, &config, protection.copy_control(), cp_supported)?;
            state.global = config;
            let was_active = protection.is_active();
            Ok::<_, NegotiationError>(apply_reconcile(peers, plan, was_active, |active| {
                protection.set_active(active);
            }))
        })?;

        info!("[GLOBAL] feeding {} Hz installed", feeding.sample_rate);
        issue(reconfigures, sink);
        Ok(())
    }

    /// Bring every open connection in line with the current global
    /// configuration, reconfiguring those whose selection changes
    ///
    /// The global configuration itself is never modified.
    ///
    /// # Errors
    /// Returns `Incompatible` naming the first connection that cannot follow;
    /// no connection is touched in that case
    pub fn reconcile_all_open_peers(
        &mut self,
        sink: &mut impl TransportSink,
    ) -> Result<(), NegotiationError> {
        let cp_supported = self.options.content_protection;
        let peers = &mut self.peers;
        let reconfigures = self.shared.with_lock(|state, protection| {
            let copy_control = protection.copy_control();
            let plan = plan_reconcile(peers, &state.global, copy_control, cp_supported)?;
            let was_active = protection.is_active();
            Ok::<_, NegotiationError>(apply_reconcile(peers, plan, was_active, |active| {
                protection.set_active(active);
            }))
        })?;
        issue(reconfigures, sink);
        Ok(())
    }

    /// Active SBC configuration narrowed to the bitpool range every open
    /// connection's first SBC sink supports, with the smallest open MTU
    ///
    /// When the active codec is not SBC the default configuration is
    /// returned with an unbounded MTU and `valid` unset.
    #[must_use]
    pub fn get_bitpool_range_and_min_mtu(&self) -> EncoderConfig {
        let peers = &self.peers;
        let narrowed = self.shared.with_lock(|state, _| {
            if state.global.id != CodecId::Sbc {
                return None;
            }
            let mut sbc = SbcCapabilities::parse(&state.global.info, false).ok()?;
            let mut min_mtu = UNBOUNDED_MTU;
            for (_, peer) in peers.opened() {
                min_mtu = min_mtu.min(peer.mtu);
                if let Some(endpoint) = peer
                    .sinks()
                    .endpoints()
                    .iter()
                    .find(|endpoint| CodecId::Sbc.accepts(endpoint.codec_type))
                {
                    sbc.min_bitpool = sbc.min_bitpool.max(endpoint.caps.min_bitpool());
                    sbc.max_bitpool = sbc.max_bitpool.min(endpoint.caps.max_bitpool());
                }
            }
            Some((sbc, min_mtu))
        });

        match narrowed {
            Some((sbc, min_mtu)) => {
                if sbc.min_bitpool > sbc.max_bitpool {
                    warn!(
                        "[GLOBAL] open sinks share no bitpool range: {}..={}",
                        sbc.min_bitpool,
                        sbc.max_bitpool
                    );
                }
                debug!(
                    "[GLOBAL] encoder bitpool {}..={}, mtu {}",
                    sbc.min_bitpool,
                    sbc.max_bitpool,
                    min_mtu
                );
                EncoderConfig {
                    sbc,
                    min_mtu,
                    valid: true,
                }
            }
            None => EncoderConfig {
                sbc: SbcCapabilities::DEFAULT_CONFIG,
                min_mtu: UNBOUNDED_MTU,
                valid: false,
            },
        }
    }

    /// Bitpool range of the last configuration a remote initiator proposed
    #[must_use]
    pub fn get_remote_setconfig_preference(&self) -> Option<(u8, u8)> {
        let preference = self.shared.snapshot().remote_setconfig;
        match preference.id {
            CodecId::None => None,
            CodecId::Sbc => Some((preference.info.min_bitpool(), preference.info.max_bitpool())),
        }
    }
}

fn plan_reconcile(
    peers: &PeerRegistry,
    config: &CodecConfig,
    flag: CopyControl,
    cp_supported: bool,
) -> Result<ReconcilePlan, NegotiationError> {
    let mut plan = ReconcilePlan::new();
    for (handle, peer) in peers.opened() {
        let incompatible = |reason| {
            warn!("[GLOBAL] {=u8:#x} cannot follow: {}", handle, reason);
            NegotiationError::Incompatible { handle, reason }
        };
        let endpoints = peer.sinks().endpoints();
        let index = codec::select_best_match(endpoints, config.id, &config.info)
            .ok_or_else(|| incompatible(IncompatibleReason::Codec))?;
        let endpoint = &endpoints[index];
        if !protection::decide(&endpoint.protection, flag) {
            return Err(incompatible(IncompatibleReason::Protection));
        }
        let concrete = codec::build_concrete_config(config, &endpoint.caps)
            .ok_or_else(|| incompatible(IncompatibleReason::Codec))?;
        let cp_active = cp_supported && endpoint.protection.supports_copy_control();

        if peer.selected_sink == Some(index)
            && peer.codec_cfg == concrete
            && peer.cp_active == cp_active
        {
            continue;
        }
        plan.push(ReconcileStep {
            handle,
            index,
            config: concrete,
            cp_active,
        })
        .map_err(|_| NegotiationError::CapacityExceeded)?;
    }
    Ok(plan)
}

fn apply_reconcile(
    peers: &mut PeerRegistry,
    plan: ReconcilePlan,
    mut active: bool,
    publish: impl Fn(bool),
) -> Vec<(AvHandle, StreamSelection), MAX_PEERS> {
    let mut reconfigures = Vec::new();
    for step in plan {
        let Ok(peer) = peers.resolve_mut(step.handle) else {
            continue;
        };
        let Some(endpoint) = peer.sinks().endpoints().get(step.index) else {
            continue;
        };
        let selection = StreamSelection {
            local_sep_index: endpoint.local_sep_index,
            peer_seid: endpoint.peer_seid,
            config: step.config,
            protection: if step.cp_active {
                ProtectionInfo::scms_t()
            } else {
                ProtectionInfo::none()
            },
        };
        peer.selected_sink = Some(step.index);
        peer.codec_cfg = step.config;
        peer.cp_active = step.cp_active;
        active = step.cp_active;
        reconfigures.push((step.handle, selection)).ok();
    }
    publish(active);
    reconfigures
}

fn issue(reconfigures: Vec<(AvHandle, StreamSelection), MAX_PEERS>, sink: &mut impl TransportSink) {
    for (handle, selection) in &reconfigures {
        info!("[GLOBAL] reconfigure {=u8:#x}", *handle);
        sink.reconfigure(*handle, selection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NegotiationOptions;
    use crate::a2dp::context::tests::RecordingSink;
    use crate::a2dp::codec::CodecType;
    use crate::a2dp::peer::EndpointCapability;
    use crate::a2dp::shared::SharedNegotiation;
    use crate::a2dp::{DiscoveryResult, Role};
    use crate::address::PeerAddress;

    fn sbc_caps(freq_chan: u8, block_band: u8, min: u8, max: u8) -> CodecInfo {
        CodecInfo::from_slice(&[6, 0, 0, freq_chan, block_band, min, max])
    }

    /// Discover, select and open a single-sink peer on `handle`
    fn open_peer(
        ctx: &mut NegotiationContext<'_>,
        handle: AvHandle,
        caps: CodecInfo,
        protection: ProtectionInfo,
        mtu: u16,
    ) {
        let mut sink = RecordingSink::default();
        ctx.record_discovery(
            handle,
            DiscoveryResult {
                num_seps: 1,
                num_sinks: 1,
                num_sources: 0,
                addr: PeerAddress::new([handle; 6]),
                local_role: Role::Source,
            },
        )
        .unwrap();
        let capability = EndpointCapability {
            local_sep_index: 0,
            peer_seid: 1,
            codec_type: CodecType::Sbc,
            caps,
            protection,
        };
        let _ = ctx.offer_capability(handle, capability, &mut sink);
        ctx.open(handle, mtu).unwrap();
    }

    fn feeding(sample_rate: u32) -> PcmFeeding {
        PcmFeeding {
            sample_rate,
            channels: 2,
            bits_per_sample: 16,
        }
    }

    #[test]
    fn test_feeding_translation() {
        let freq = |rate| feeding(rate).sampling_frequency().map(|f| f.0);
        assert_eq!(freq(44_100), Some(SbcSamplingFrequency::HZ_44100));
        assert_eq!(freq(22_050), Some(SbcSamplingFrequency::HZ_44100));
        assert_eq!(freq(8_000), Some(SbcSamplingFrequency::HZ_48000));
        assert_eq!(freq(48_000), Some(SbcSamplingFrequency::HZ_48000));
        assert_eq!(freq(96_000), None);

        let surround = PcmFeeding {
            channels: 6,
            ..feeding(48_000)
        };
        assert_eq!(surround.sampling_frequency(), None);
        let wide = PcmFeeding {
            bits_per_sample: 24,
            ..feeding(48_000)
        };
        assert_eq!(wide.sampling_frequency(), None);
    }

    #[test]
    fn test_set_from_feeding_44100() {
        let shared: SharedNegotiation = SharedNegotiation::new();
        let mut ctx = NegotiationContext::new(&shared, NegotiationOptions::default());
        let mut sink = RecordingSink::default();

        ctx.set_from_feeding(feeding(48_000), &mut sink).unwrap();
        ctx.set_from_feeding(feeding(44_100), &mut sink).unwrap();
        let info = ctx.codec_config().info;
        assert_eq!(
            info.as_bytes()[3] & SbcSamplingFrequency::MASK,
            SbcSamplingFrequency::HZ_44100
        );
        assert!(sink.reconfigures.is_empty());
    }

    #[test]
    fn test_set_from_unsupported_feeding_keeps_config() {
        let shared: SharedNegotiation = SharedNegotiation::new();
        let mut ctx = NegotiationContext::new(&shared, NegotiationOptions::default());
        let mut sink = RecordingSink::default();

        let before = ctx.codec_config();
        assert_eq!(
            ctx.set_from_feeding(feeding(96_000), &mut sink),
            Err(NegotiationError::FeedingUnsupported)
        );
        assert_eq!(ctx.codec_config(), before);
    }

    #[test]
    fn test_feeding_reconfigures_open_peers() {
        let shared: SharedNegotiation = SharedNegotiation::new();
        let mut ctx = NegotiationContext::new(&shared, NegotiationOptions::default());
        let mut sink = RecordingSink::default();
        open_peer(&mut ctx, 0x41, sbc_caps(0x31, 0x15, 2, 53), ProtectionInfo::none(), 672);

        ctx.set_from_feeding(feeding(48_000), &mut sink).unwrap();
        assert_eq!(sink.reconfigures.len(), 1);
        let (handle, selection) = &sink.reconfigures[0];
        assert_eq!(*handle, 0x41);
        assert_eq!(selection.config.as_bytes()[3], 0x11);
        assert_eq!(ctx.peer(0x41).unwrap().codec_config(), &selection.config);

        // Same feeding again: nothing changes, nothing is reissued
        ctx.set_from_feeding(feeding(48_000), &mut sink).unwrap();
        assert_eq!(sink.reconfigures.len(), 1);
    }

    #[test]
    fn test_incompatible_feeding_changes_nothing() {
        let shared: SharedNegotiation = SharedNegotiation::new();
        let mut ctx = NegotiationContext::new(&shared, NegotiationOptions::default());
        let mut sink = RecordingSink::default();
        open_peer(&mut ctx, 0x41, sbc_caps(0x31, 0x15, 2, 53), ProtectionInfo::none(), 672);
        // 44.1 kHz stereo only
        open_peer(&mut ctx, 0x42, sbc_caps(0x22, 0x15, 2, 53), ProtectionInfo::none(), 672);

        let before = ctx.codec_config();
        let first_cfg = *ctx.peer(0x41).unwrap().codec_config();
        assert_eq!(
            ctx.set_from_feeding(feeding(48_000), &mut sink),
            Err(NegotiationError::Incompatible {
                handle: 0x42,
                reason: IncompatibleReason::Codec
            })
        );
        assert_eq!(ctx.codec_config(), before);
        assert_eq!(ctx.peer(0x41).unwrap().codec_config(), &first_cfg);
        assert!(sink.reconfigures.is_empty());
    }

    #[test]
    fn test_reconcile_never_touches_global() {
        let shared: SharedNegotiation = SharedNegotiation::new();
        let mut ctx = NegotiationContext::new(&shared, NegotiationOptions::default());
        let mut sink = RecordingSink::default();
        open_peer(&mut ctx, 0x41, sbc_caps(0x21, 0x15, 2, 53), ProtectionInfo::none(), 672);
        ctx.discard_peer_selection(0x41).unwrap();

        let before = ctx.codec_config();
        ctx.reconcile_all_open_peers(&mut sink).unwrap();
        assert_eq!(ctx.codec_config(), before);
        assert_eq!(sink.reconfigures.len(), 1);
        assert!(ctx.peer(0x41).unwrap().selected_sink().is_some());

        shared.with_lock(|state, _| state.global.info.0[3] = 0x18);
        let before = ctx.codec_config();
        assert!(ctx.reconcile_all_open_peers(&mut sink).is_err());
        assert_eq!(ctx.codec_config(), before);
    }

    #[test]
    fn test_reconcile_requires_protection_when_copy_restricted() {
        let shared: SharedNegotiation = SharedNegotiation::new();
        let options = NegotiationOptions {
            content_protection: true,
            copy_control: CopyControl::Never,
            ..NegotiationOptions::default()
        };
        let mut ctx = NegotiationContext::new(&shared, options);
        let mut sink = RecordingSink::default();
        open_peer(&mut ctx, 0x41, sbc_caps(0x21, 0x15, 2, 53), ProtectionInfo::none(), 672);

        assert_eq!(
            ctx.reconcile_all_open_peers(&mut sink),
            Err(NegotiationError::Incompatible {
                handle: 0x41,
                reason: IncompatibleReason::Protection
            })
        );

        ctx.set_copy_control(CopyControl::Free).unwrap();
        assert!(ctx.reconcile_all_open_peers(&mut sink).is_ok());
    }

    #[test]
    fn test_open_peer_without_capabilities_is_incompatible() {
        let shared: SharedNegotiation = SharedNegotiation::new();
        let mut ctx = NegotiationContext::new(&shared, NegotiationOptions::default());
        let mut sink = RecordingSink::default();
        ctx.open(0x43, 672).unwrap();
        assert_eq!(
            ctx.reconcile_all_open_peers(&mut sink),
            Err(NegotiationError::Incompatible {
                handle: 0x43,
                reason: IncompatibleReason::Codec
            })
        );
    }

    #[test]
    fn test_bitpool_range_is_intersection() {
        let shared: SharedNegotiation = SharedNegotiation::new();
        let mut ctx = NegotiationContext::new(&shared, NegotiationOptions::default());
        open_peer(&mut ctx, 0x41, sbc_caps(0x21, 0x15, 10, 50), ProtectionInfo::none(), 895);
        open_peer(&mut ctx, 0x42, sbc_caps(0x21, 0x15, 5, 40), ProtectionInfo::none(), 672);

        let encoder = ctx.get_bitpool_range_and_min_mtu();
        assert!(encoder.valid);
        assert_eq!((encoder.sbc.min_bitpool, encoder.sbc.max_bitpool), (10, 40));
        assert_eq!(encoder.min_mtu, 672);
    }

    #[test]
    fn test_disjoint_bitpool_ranges_reported_as_is() {
        let shared: SharedNegotiation = SharedNegotiation::new();
        let mut ctx = NegotiationContext::new(&shared, NegotiationOptions::default());
        open_peer(&mut ctx, 0x41, sbc_caps(0x21, 0x15, 10, 20), ProtectionInfo::none(), 895);
        open_peer(&mut ctx, 0x42, sbc_caps(0x21, 0x15, 30, 40), ProtectionInfo::none(), 895);

        // The encoder sees the empty range and picks its own fallback
        let encoder = ctx.get_bitpool_range_and_min_mtu();
        assert!(encoder.valid);
        assert_eq!((encoder.sbc.min_bitpool, encoder.sbc.max_bitpool), (30, 20));
    }

    #[test]
    fn test_bitpool_range_without_peers() {
        let shared: SharedNegotiation = SharedNegotiation::new();
        let ctx = NegotiationContext::new(&shared, NegotiationOptions::default());
        let encoder = ctx.get_bitpool_range_and_min_mtu();
        assert!(encoder.valid);
        assert_eq!(encoder.sbc, SbcCapabilities::DEFAULT_CONFIG);
        assert_eq!(encoder.min_mtu, UNBOUNDED_MTU);
    }

    #[test]
    fn test_bitpool_range_falls_back_without_sbc() {
        let shared: SharedNegotiation = SharedNegotiation::new();
        let ctx = NegotiationContext::new(&shared, NegotiationOptions::default());
        shared.with_lock(|state, _| state.global = CodecConfig::NONE);

        let encoder = ctx.get_bitpool_range_and_min_mtu();
        assert!(!encoder.valid);
        assert_eq!(encoder.sbc, SbcCapabilities::DEFAULT_CONFIG);
        assert_eq!(encoder.min_mtu, UNBOUNDED_MTU);
    }

    #[test]
    fn test_reset_honours_default_sample_rate() {
        let shared: SharedNegotiation = SharedNegotiation::new();
        let options = NegotiationOptions {
            default_sample_rate: SbcSamplingFrequency(SbcSamplingFrequency::HZ_48000),
            ..NegotiationOptions::default()
        };
        let ctx = NegotiationContext::new(&shared, options);
        assert_eq!(ctx.codec_config().info.as_bytes()[3], 0x11);

        shared.with_lock(|state, _| state.global = CodecConfig::NONE);
        ctx.reset();
        assert_eq!(ctx.codec_config().id, CodecId::Sbc);
    }
}
