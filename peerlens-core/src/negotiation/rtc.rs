//! Negotiation engine backed by the `webrtc` crate

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use webrtc::api::media_engine::MIME_TYPE_H264;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::{sdp, EventSender, NegotiationEngine, NegotiationEvent, PeerConnectionState};
use crate::capture::{FrameSink, LocalTrack};
use crate::config::{BundlePolicy, ConnectionConfig, RtcpMuxPolicy};
use crate::encode::{self, EncodedFrame, EncoderFactory, EncoderThread};
use crate::error::NegotiationError;
use crate::runtime::{MediaRuntime, RuntimeGuard};
use crate::types::{Frame, Handle, PeerHandle, PixelFormat, SdpAnswer, SdpOffer};

/// One live peer connection
struct PeerEntry {
    pc: Arc<RTCPeerConnection>,
    track: Option<Arc<TrackLocalStaticSample>>,
    rtcp_reader: Option<JoinHandle<()>>,
}

/// [`NegotiationEngine`] on top of the shared media runtime
pub struct WebRtcEngine {
    runtime: RuntimeGuard,
    peers: HashMap<PeerHandle, PeerEntry>,
}

impl WebRtcEngine {
    /// Create an engine, initializing the media runtime if needed
    pub fn new(config: &ConnectionConfig) -> Result<Self, NegotiationError> {
        Ok(Self {
            runtime: MediaRuntime::acquire(config)?,
            peers: HashMap::new(),
        })
    }

    fn peer(&self, peer: PeerHandle) -> Option<&PeerEntry> {
        self.peers.get(&peer)
    }
}

/// Translate the fixed policy into the substrate's configuration
fn rtc_configuration(config: &ConnectionConfig) -> RTCConfiguration {
    let ice_servers = config
        .ice_servers()
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        bundle_policy: match config.bundle() {
            BundlePolicy::MaxBundle => RTCBundlePolicy::MaxBundle,
            BundlePolicy::Balanced => RTCBundlePolicy::Balanced,
            BundlePolicy::MaxCompat => RTCBundlePolicy::MaxCompat,
        },
        rtcp_mux_policy: match config.rtcp_mux() {
            RtcpMuxPolicy::Require => RTCRtcpMuxPolicy::Require,
            RtcpMuxPolicy::Negotiate => RTCRtcpMuxPolicy::Negotiate,
        },
        // Certificates left empty: the substrate generates an ECDSA P-256 key
        ..Default::default()
    }
}

fn peer_state(state: RTCPeerConnectionState) -> Option<PeerConnectionState> {
    Some(match state {
        RTCPeerConnectionState::New => PeerConnectionState::New,
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        _ => return None,
    })
}

/// Forward every substrate callback to the session worker
fn wire_events(pc: &RTCPeerConnection, handle: PeerHandle, events: EventSender) {
    let tx = events.clone();
    pc.on_signaling_state_change(Box::new(move |s: RTCSignalingState| {
        let _ = tx.send((handle, NegotiationEvent::SignalingChanged(s.to_string())));
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
        let _ = tx.send((handle, NegotiationEvent::IceConnectionChanged(s.to_string())));
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_ice_gathering_state_change(Box::new(move |s: RTCIceGathererState| {
        let _ = tx.send((handle, NegotiationEvent::IceGatheringChanged(s.to_string())));
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        if let Some(state) = peer_state(s) {
            let _ = tx.send((handle, NegotiationEvent::PeerConnectionChanged(state)));
        }
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        if let Some(candidate) = candidate.and_then(|c| c.to_json().ok()) {
            let _ = tx.send((handle, NegotiationEvent::LocalCandidate(candidate.candidate)));
        }
        Box::pin(async {})
    }));

    let tx = events;
    pc.on_negotiation_needed(Box::new(move || {
        let _ = tx.send((handle, NegotiationEvent::RenegotiationNeeded));
        Box::pin(async {})
    }));
}

#[async_trait]
impl NegotiationEngine for WebRtcEngine {
    async fn create_peer_connection(
        &mut self,
        config: &ConnectionConfig,
        events: EventSender,
    ) -> Result<PeerHandle, NegotiationError> {
        let pc = self
            .runtime
            .api()
            .new_peer_connection(rtc_configuration(config))
            .await
            .map_err(|e| {
                NegotiationError::FactoryUnavailable(format!(
                    "Failed to create peer connection: {}",
                    e
                ))
            })?;

        let handle = Handle::new();
        wire_events(&pc, handle, events);

        self.peers.insert(
            handle,
            PeerEntry {
                pc: Arc::new(pc),
                track: None,
                rtcp_reader: None,
            },
        );

        info!("Peer connection {} created", handle);
        Ok(handle)
    }

    async fn bind_local_track(
        &mut self,
        peer: PeerHandle,
        track: &LocalTrack,
    ) -> Result<Arc<dyn FrameSink>, NegotiationError> {
        let entry = self.peers.get_mut(&peer).ok_or_else(|| {
            NegotiationError::FactoryUnavailable(format!("Unknown peer {}", peer))
        })?;

        let video_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
            track.track_id.clone(),
            track.stream_id.clone(),
        ));

        let rtp_sender = entry
            .pc
            .add_track(video_track.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| NegotiationError::OfferFailed(format!("Failed to add video track: {}", e)))?;

        // RTCP must be drained for the interceptors to run
        let rtcp_reader = tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = rtp_sender.read(&mut rtcp_buf).await {}
        });

        entry.track = Some(video_track.clone());
        entry.rtcp_reader = Some(rtcp_reader);

        debug!("Bound track {} to peer {}", track.track_id, peer);
        Ok(Arc::new(TrackSink::new(
            video_track,
            track.profile.frame_interval(),
            Some(encode::h264_factory(track.profile)),
        )))
    }

    async fn create_offer(&mut self, peer: PeerHandle) -> Result<SdpOffer, NegotiationError> {
        let entry = self
            .peer(peer)
            .ok_or_else(|| NegotiationError::OfferFailed(format!("Unknown peer {}", peer)))?;

        if entry.track.is_none() {
            return Err(NegotiationError::OfferFailed(
                "no local track bound".to_string(),
            ));
        }

        let pc = entry.pc.clone();

        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| NegotiationError::OfferFailed(format!("create offer: {}", e)))?;

        pc.set_local_description(offer.clone())
            .await
            .map_err(|e| NegotiationError::OfferFailed(format!("set local description: {}", e)))?;

        let sdp = pc
            .local_description()
            .await
            .map(|d| d.sdp)
            .unwrap_or(offer.sdp);

        debug!("Offer for peer {} ready ({} bytes)", peer, sdp.len());
        Ok(SdpOffer(sdp))
    }

    async fn apply_remote_description(
        &mut self,
        peer: PeerHandle,
        answer: SdpAnswer,
    ) -> Result<(), NegotiationError> {
        let entry = self
            .peer(peer)
            .ok_or_else(|| NegotiationError::AnswerRejected(format!("Unknown peer {}", peer)))?;

        sdp::check_well_formed(answer.as_str()).map_err(NegotiationError::AnswerRejected)?;

        let description = RTCSessionDescription::answer(answer.0)
            .map_err(|e| NegotiationError::AnswerRejected(format!("Invalid SDP answer: {}", e)))?;

        entry
            .pc
            .set_remote_description(description)
            .await
            .map_err(|e| {
                NegotiationError::AnswerRejected(format!("Failed to set remote description: {}", e))
            })?;

        info!("Remote answer applied to peer {}", peer);
        Ok(())
    }

    async fn dispose(&mut self, peer: PeerHandle) {
        let Some(entry) = self.peers.remove(&peer) else {
            debug!("Peer {} already disposed", peer);
            return;
        };

        if let Some(reader) = entry.rtcp_reader {
            reader.abort();
        }

        if let Err(e) = entry.pc.close().await {
            warn!("Failed to close peer connection {}: {}", peer, e);
        }

        info!("Peer connection {} disposed", peer);
    }
}

impl Drop for WebRtcEngine {
    fn drop(&mut self) {
        if !self.peers.is_empty() {
            warn!(
                "Negotiation engine dropped with {} live peer connection(s)",
                self.peers.len()
            );
        }
    }
}

/// Frame sink feeding the outbound video track
///
/// Frames the device delivers already compressed are written as-is. Raw
/// frames go through an encoder thread and a writer task.
pub struct TrackSink {
    track: Arc<TrackLocalStaticSample>,
    frame_duration: Duration,
    encoder: Option<EncoderThread>,
    writer: JoinHandle<()>,
    samples: Arc<AtomicU64>,
}

impl TrackSink {
    /// Must be called inside a tokio runtime
    fn new(
        track: Arc<TrackLocalStaticSample>,
        frame_duration: Duration,
        encoder: Option<EncoderFactory>,
    ) -> Self {
        let samples = Arc::new(AtomicU64::new(0));
        let (encoded_tx, mut encoded_rx) = mpsc::unbounded_channel::<EncodedFrame>();

        let encoder = encoder.and_then(|factory| match EncoderThread::spawn(factory, encoded_tx) {
            Ok(encoder) => Some(encoder),
            Err(e) => {
                warn!("No video encoder, raw frames will not be sent: {}", e);
                None
            }
        });

        let writer = {
            let track = track.clone();
            let samples = samples.clone();
            tokio::spawn(async move {
                while let Some(encoded) = encoded_rx.recv().await {
                    write_sample(&track, encoded.data, frame_duration, &samples, encoded.sequence)
                        .await;
                }
            })
        };

        Self {
            track,
            frame_duration,
            encoder,
            writer,
            samples,
        }
    }

    /// Samples handed to the track so far
    pub fn samples_written(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}

impl Drop for TrackSink {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

async fn write_sample(
    track: &TrackLocalStaticSample,
    data: Bytes,
    duration: Duration,
    samples: &AtomicU64,
    sequence: u64,
) {
    let sample = Sample {
        data,
        duration,
        ..Default::default()
    };

    match track.write_sample(&sample).await {
        Ok(()) => {
            samples.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => trace!("Failed to write frame {}: {}", sequence, e),
    }
}

#[async_trait]
impl FrameSink for TrackSink {
    fn name(&self) -> &str {
        "outbound-track"
    }

    async fn on_frame(&self, frame: Arc<Frame>) {
        if frame.format.pixel_format == PixelFormat::Encoded {
            write_sample(
                &self.track,
                frame.data.clone(),
                self.frame_duration,
                &self.samples,
                frame.sequence,
            )
            .await;
            return;
        }

        match &self.encoder {
            Some(encoder) => {
                encoder.submit(frame);
            }
            None => trace!("Skipping raw frame {}, no encoder", frame.sequence),
        }
    }
}
