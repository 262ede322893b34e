//! Offer/answer negotiation
//!
//! [`NegotiationEngine`] is the seam between the session state machine and
//! the negotiation substrate. [`WebRtcEngine`] implements it on the `webrtc`
//! crate; tests substitute fakes.
//!
//! Substrate callbacks (signaling, ICE and connection state changes, local
//! candidates) are not handled where they fire. They are converted to
//! [`NegotiationEvent`]s and sent to the session worker, which owns the one
//! place where state changes are logged and published.

mod rtc;
pub mod sdp;

pub use rtc::{TrackSink, WebRtcEngine};

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::capture::{FrameSink, LocalTrack};
use crate::config::ConnectionConfig;
use crate::error::NegotiationError;
use crate::types::{PeerHandle, SdpAnswer, SdpOffer};

/// Channel on which engines publish substrate events, tagged by peer
pub type EventSender = mpsc::UnboundedSender<(PeerHandle, NegotiationEvent)>;

/// Overall peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Something the negotiation substrate reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum NegotiationEvent {
    /// Signaling state changed
    SignalingChanged(String),
    /// ICE connection state changed
    IceConnectionChanged(String),
    /// ICE gathering state changed
    IceGatheringChanged(String),
    /// Peer connection state changed
    PeerConnectionChanged(PeerConnectionState),
    /// A local ICE candidate was gathered
    LocalCandidate(String),
    /// The substrate asks for a new offer
    RenegotiationNeeded,
}

/// Descriptions exchanged for one session
///
/// Each side is set at most once; the whole value is discarded on teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NegotiationResult {
    local: Option<SdpOffer>,
    remote: Option<SdpAnswer>,
}

impl NegotiationResult {
    /// Local offer, once created
    pub fn local(&self) -> Option<&SdpOffer> {
        self.local.as_ref()
    }

    /// Remote answer, once applied
    pub fn remote(&self) -> Option<&SdpAnswer> {
        self.remote.as_ref()
    }

    pub(crate) fn set_local(&mut self, offer: SdpOffer) {
        if self.local.is_none() {
            self.local = Some(offer);
        }
    }

    pub(crate) fn set_remote(&mut self, answer: SdpAnswer) {
        if self.remote.is_none() {
            self.remote = Some(answer);
        }
    }
}

/// Drives peer connections through the offer/answer exchange
///
/// One peer handle per session. All methods are called from the session
/// worker, one at a time.
#[async_trait]
pub trait NegotiationEngine: Send {
    /// Create a peer connection under the given policy
    async fn create_peer_connection(
        &mut self,
        config: &ConnectionConfig,
        events: EventSender,
    ) -> Result<PeerHandle, NegotiationError>;

    /// Attach the capture track to the peer's outbound stream
    ///
    /// Returns the sink that feeds captured frames into the outbound track.
    /// Must be called before [`create_offer`](Self::create_offer).
    async fn bind_local_track(
        &mut self,
        peer: PeerHandle,
        track: &LocalTrack,
    ) -> Result<Arc<dyn FrameSink>, NegotiationError>;

    /// Create the local offer and apply it as the local description
    ///
    /// Resolves once, after both steps succeeded or either failed. A failed
    /// offer is not rolled back; the session is discarded instead.
    async fn create_offer(&mut self, peer: PeerHandle) -> Result<SdpOffer, NegotiationError>;

    /// Validate and apply the remote answer
    async fn apply_remote_description(
        &mut self,
        peer: PeerHandle,
        answer: SdpAnswer,
    ) -> Result<(), NegotiationError>;

    /// Release the peer connection. Unknown or released handles are ignored.
    async fn dispose(&mut self, peer: PeerHandle);
}
