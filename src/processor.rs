//! Processor - transport event and session request processing
//!
//! The AVDTP signaling layer and the session control plane talk to the
//! negotiation core over [`NegotiationChannels`]. A single processor task owns
//! the [`NegotiationContext`], applies every inbound message to it and
//! forwards the resulting [`TransportCommand`]s on the outbound channel.
//!
//! # Usage
//!
//! Spawn [`run`] as an Embassy task next to the AVDTP layer:
//!
//! ```rust,no_run
//! use warbler::a2dp::{NegotiationContext, SharedNegotiation};
//! use warbler::processor::{self, NegotiationChannels};
//! use warbler::NegotiationOptions;
//!
//! static SHARED: SharedNegotiation = SharedNegotiation::new();
//! static CHANNELS: NegotiationChannels = NegotiationChannels::new();
//!
//! async fn negotiation_task() -> ! {
//!     let mut ctx = NegotiationContext::new(&SHARED, NegotiationOptions::default());
//!     processor::run(&mut ctx, &CHANNELS).await
//! }
//! ```
//!
//! # Architecture
//!
//! * **Transport events**: discovery results, capabilities, proposals and
//!   stream open/close, answered only through outbound commands
//! * **Session requests**: feeding changes and encoder queries from the
//!   session control plane, each answered with one [`SessionResponse`]
//! * **Transport commands**: configure, reconfigure and setconfig answers the
//!   AVDTP layer must carry out

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, RawMutex};
use embassy_sync::channel::Channel;
use heapless::Vec;

use crate::NegotiationError;
use crate::a2dp::{
    AvHandle, CapabilityOutcome, ConfigProposal, CopyControl, DiscoveryResult, EncoderConfig,
    EndpointCapability, NegotiationContext, PcmFeeding, SetConfigResponse, StreamSelection,
    TransportSink,
};
use crate::constants::{CHANNEL_DEPTH, MAX_PENDING_COMMANDS};

/// Inbound notifications from the AVDTP signaling layer
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportEvent {
    /// An AVDTP discover completed
    Discovered {
        /// Connection handle
        handle: AvHandle,
        /// Outcome of the discover
        result: DiscoveryResult,
    },
    /// Capabilities of one remote endpoint were retrieved
    Capability {
        /// Connection handle
        handle: AvHandle,
        /// Retrieved capability
        capability: EndpointCapability,
    },
    /// The peer proposed a configuration
    ConfigProposed {
        /// Connection handle
        handle: AvHandle,
        /// The proposal
        proposal: ConfigProposal,
    },
    /// The media stream opened
    Opened {
        /// Connection handle
        handle: AvHandle,
        /// Negotiated MTU
        mtu: u16,
    },
    /// The media stream closed
    Closed {
        /// Connection handle
        handle: AvHandle,
    },
}

/// Outbound instructions for the AVDTP signaling layer
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportCommand {
    /// Configure a stream we initiated
    Configure {
        /// Connection handle
        handle: AvHandle,
        /// Chosen endpoint and configuration
        selection: StreamSelection,
    },
    /// Renegotiate an open stream
    Reconfigure {
        /// Connection handle
        handle: AvHandle,
        /// New endpoint and configuration
        selection: StreamSelection,
    },
    /// Answer a configuration proposal
    SetConfigResponse {
        /// Connection handle
        handle: AvHandle,
        /// The answer
        response: SetConfigResponse,
    },
}

/// Requests from the session control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionRequest {
    /// Reinstall the default configuration
    Reset,
    /// Switch the global configuration to a PCM feeding
    SetFeeding(PcmFeeding),
    /// Reconcile every open connection with the global configuration
    Reconcile,
    /// Drop the selected endpoint of a connection
    DiscardSelection(AvHandle),
    /// Whether a connection's sink advertises SCMS-T
    PeerSupportsProtection(AvHandle),
    /// Change the copy-control flag
    SetCopyControl(CopyControl),
    /// Encoder parameters valid for every open connection
    EncoderConfig,
    /// Bitpool range of the last remote proposal
    RemotePreference,
}

/// Answers to [`SessionRequest`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionResponse {
    /// The request was carried out
    Done,
    /// Protection support of the queried connection
    ProtectionSupported(bool),
    /// Current encoder parameters
    EncoderConfig(EncoderConfig),
    /// Remote bitpool preference, if any
    RemotePreference(Option<(u8, u8)>),
    /// The request failed
    Error(NegotiationError),
}

/// Commands produced while handling one message
pub type CommandBatch = Vec<TransportCommand, MAX_PENDING_COMMANDS>;

/// Channels connecting the processor to the transport and the session control
/// plane, usually placed in a `static`
pub struct NegotiationChannels<M: RawMutex = CriticalSectionRawMutex> {
    /// Transport to core
    pub events: Channel<M, TransportEvent, CHANNEL_DEPTH>,
    /// Session control to core
    pub requests: Channel<M, SessionRequest, CHANNEL_DEPTH>,
    /// Core to session control
    pub responses: Channel<M, SessionResponse, CHANNEL_DEPTH>,
    /// Core to transport
    pub commands: Channel<M, TransportCommand, CHANNEL_DEPTH>,
}

impl<M: RawMutex> NegotiationChannels<M> {
    /// Create empty channels
    #[must_use]
    pub const fn new() -> Self {
        Self {
            events: Channel::new(),
            requests: Channel::new(),
            responses: Channel::new(),
            commands: Channel::new(),
        }
    }
}

impl<M: RawMutex> Default for NegotiationChannels<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Collects outbound calls made by the core into a command batch
struct Outbox {
    commands: CommandBatch,
}

impl Outbox {
    const fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    fn push(&mut self, command: TransportCommand) {
        if self.commands.push(command).is_err() {
            error!("[PROCESSOR] command batch full, command dropped");
        }
    }
}

impl TransportSink for Outbox {
    fn reconfigure(&mut self, handle: AvHandle, selection: &StreamSelection) {
        self.push(TransportCommand::Reconfigure {
            handle,
            selection: selection.clone(),
        });
    }

    fn setconfig_response(&mut self, handle: AvHandle, response: SetConfigResponse) {
        self.push(TransportCommand::SetConfigResponse { handle, response });
    }
}

/// Apply a transport event and return the commands it produced
pub fn process_transport_event<M: RawMutex>(
    ctx: &mut NegotiationContext<'_, M>,
    event: TransportEvent,
) -> CommandBatch {
    let mut outbox = Outbox::new();
    let result = match event {
        TransportEvent::Discovered { handle, result } => ctx.record_discovery(handle, result),
        TransportEvent::Capability { handle, capability } => {
            match ctx.offer_capability(handle, capability, &mut outbox) {
                Ok(CapabilityOutcome::Configure(selection)) => {
                    outbox.push(TransportCommand::Configure { handle, selection });
                    Ok(())
                }
                Ok(CapabilityOutcome::Pending | CapabilityOutcome::Settled) => Ok(()),
                Err(e) => Err(e),
            }
        }
        TransportEvent::ConfigProposed { handle, proposal } => {
            let _ = ctx.handle_setconfig(handle, &proposal, &mut outbox);
            Ok(())
        }
        TransportEvent::Opened { handle, mtu } => ctx.open(handle, mtu),
        TransportEvent::Closed { handle } => ctx.close(handle),
    };
    if let Err(e) = result {
        warn!("[PROCESSOR] transport event failed: {}", e);
    }
    outbox.commands
}

/// Apply a session request and return its answer with the commands it produced
pub fn process_session_request<M: RawMutex>(
    ctx: &mut NegotiationContext<'_, M>,
    request: SessionRequest,
) -> (SessionResponse, CommandBatch) {
    let mut outbox = Outbox::new();
    let done = |result: Result<(), NegotiationError>| match result {
        Ok(()) => SessionResponse::Done,
        Err(e) => SessionResponse::Error(e),
    };
    let response = match request {
        SessionRequest::Reset => {
            ctx.reset();
            SessionResponse::Done
        }
        SessionRequest::SetFeeding(feeding) => done(ctx.set_from_feeding(feeding, &mut outbox)),
        SessionRequest::Reconcile => done(ctx.reconcile_all_open_peers(&mut outbox)),
        SessionRequest::DiscardSelection(handle) => done(ctx.discard_peer_selection(handle)),
        SessionRequest::PeerSupportsProtection(handle) => {
            SessionResponse::ProtectionSupported(ctx.peer_supports_protection(handle))
        }
        SessionRequest::SetCopyControl(flag) => done(ctx.set_copy_control(flag)),
        SessionRequest::EncoderConfig => {
            SessionResponse::EncoderConfig(ctx.get_bitpool_range_and_min_mtu())
        }
        SessionRequest::RemotePreference => {
            SessionResponse::RemotePreference(ctx.get_remote_setconfig_preference())
        }
    };
    (response, outbox.commands)
}

/// Wait for the next inbound message, apply it and deliver its outputs
pub async fn process_next<M: RawMutex, C: RawMutex>(
    ctx: &mut NegotiationContext<'_, M>,
    channels: &NegotiationChannels<C>,
) {
    match select(channels.events.receive(), channels.requests.receive()).await {
        Either::First(event) => {
            debug!("[PROCESSOR] transport event: {}", event);
            let commands = process_transport_event(ctx, event);
            for command in commands {
                channels.commands.send(command).await;
            }
        }
        Either::Second(request) => {
            debug!("[PROCESSOR] session request: {}", request);
            let (response, commands) = process_session_request(ctx, request);
            for command in commands {
                channels.commands.send(command).await;
            }
            debug!("[PROCESSOR] session response: {}", response);
            channels.responses.send(response).await;
        }
    }
}

/// Run the negotiation processor forever
pub async fn run<M: RawMutex, C: RawMutex>(
    ctx: &mut NegotiationContext<'_, M>,
    channels: &NegotiationChannels<C>,
) -> ! {
    info!("[PROCESSOR] negotiation processor started");
    loop {
        process_next(ctx, channels).await;
    }
}
