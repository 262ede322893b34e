//! Mock infrastructure for testing
//!
//! Fake capture backends and a fake negotiation engine. Both record every
//! collaborator call into a shared [`CallLog`] so tests can assert on the
//! order in which the session manager drives them.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use peerlens_core::capture::{
    CaptureBackend, CaptureDevice, FrameCounter, FrameSender, FrameSink, LocalTrack,
};
use peerlens_core::config::{CaptureProfile, ConnectionConfig};
use peerlens_core::error::{CaptureError, NegotiationError};
use peerlens_core::negotiation::{EventSender, NegotiationEngine, NegotiationEvent};
use peerlens_core::types::{
    DeviceInfo, Facing, Frame, FrameFormat, Handle, PeerHandle, PixelFormat, SdpAnswer, SdpOffer,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Offer returned by [`FakeNegotiationEngine`]
pub const FAKE_OFFER: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n";

/// Answer tests feed back into the session
pub const FAKE_ANSWER: &str = "v=0\r\no=- 2 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n";

/// One collaborator call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    OpenDevice(String),
    StartDevice(String),
    StopDevice(String),
    CreatePeer,
    BindTrack(String),
    CreateOffer,
    ApplyRemote,
    DisposePeer,
}

/// Shared, ordered record of collaborator calls
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, call: Call) {
        self.0.lock().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().clone()
    }

    /// Index of the first matching call
    pub fn position(&self, matches: impl Fn(&Call) -> bool) -> Option<usize> {
        self.0.lock().iter().position(matches)
    }

    pub fn count(&self, call: &Call) -> usize {
        self.0.lock().iter().filter(|c| *c == call).count()
    }
}

/// Capture backend with a scripted device list
pub struct FakeCaptureBackend {
    devices: Vec<DeviceInfo>,
    log: CallLog,
    fail_start: bool,
    senders: Arc<Mutex<Vec<FrameSender>>>,
}

impl FakeCaptureBackend {
    pub fn new(devices: Vec<DeviceInfo>, log: CallLog) -> Self {
        Self {
            devices,
            log,
            fail_start: false,
            senders: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A back camera and a front camera
    pub fn front_and_back(log: CallLog) -> Self {
        Self::new(
            vec![
                DeviceInfo::new("back-0", "Rear Camera", Facing::Back),
                DeviceInfo::new("front-1", "Selfie Camera", Facing::Front),
            ],
            log,
        )
    }

    /// Only a back-facing camera
    pub fn back_only(log: CallLog) -> Self {
        Self::new(
            vec![DeviceInfo::new("back-0", "Rear Camera", Facing::Back)],
            log,
        )
    }

    /// Devices fail to start
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Frame channels of every started device, for injecting frames
    pub fn frame_senders(&self) -> Arc<Mutex<Vec<FrameSender>>> {
        self.senders.clone()
    }
}

impl CaptureBackend for FakeCaptureBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        self.devices.clone()
    }

    fn open(
        &mut self,
        device: &DeviceInfo,
        _profile: CaptureProfile,
    ) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        self.log.push(Call::OpenDevice(device.id.clone()));
        Ok(Box::new(FakeDevice {
            id: device.id.clone(),
            log: self.log.clone(),
            fail_start: self.fail_start,
            senders: self.senders.clone(),
            started: false,
        }))
    }
}

struct FakeDevice {
    id: String,
    log: CallLog,
    fail_start: bool,
    senders: Arc<Mutex<Vec<FrameSender>>>,
    started: bool,
}

impl CaptureDevice for FakeDevice {
    fn start(&mut self, frames: FrameSender) -> Result<(), CaptureError> {
        self.log.push(Call::StartDevice(self.id.clone()));
        if self.fail_start {
            return Err(CaptureError::DeviceInitFailed("sensor busy".to_string()));
        }
        self.senders.lock().push(frames);
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        if self.started {
            self.started = false;
            self.log.push(Call::StopDevice(self.id.clone()));
        }
    }
}

/// Negotiation engine with scripted results
pub struct FakeNegotiationEngine {
    log: CallLog,
    factory_error: Option<NegotiationError>,
    offer: Result<SdpOffer, NegotiationError>,
    answer: Result<(), NegotiationError>,
    live: HashSet<PeerHandle>,
    dispose_delay: Option<Duration>,
    events: Arc<Mutex<Option<(PeerHandle, EventSender)>>>,
    track_sink: Arc<FrameCounter>,
}

impl FakeNegotiationEngine {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            factory_error: None,
            offer: Ok(SdpOffer(FAKE_OFFER.to_string())),
            answer: Ok(()),
            live: HashSet::new(),
            dispose_delay: None,
            events: Arc::new(Mutex::new(None)),
            track_sink: Arc::new(FrameCounter::new()),
        }
    }

    /// Peer creation fails
    pub fn unavailable(mut self, reason: &str) -> Self {
        self.factory_error = Some(NegotiationError::FactoryUnavailable(reason.to_string()));
        self
    }

    /// Offer creation fails with `reason`
    pub fn failing_offer(mut self, reason: &str) -> Self {
        self.offer = Err(NegotiationError::OfferFailed(reason.to_string()));
        self
    }

    /// Remote descriptions are rejected with `reason`
    pub fn rejecting_answer(mut self, reason: &str) -> Self {
        self.answer = Err(NegotiationError::AnswerRejected(reason.to_string()));
        self
    }

    /// Peer disposal takes `delay`
    pub fn slow_dispose(mut self, delay: Duration) -> Self {
        self.dispose_delay = Some(delay);
        self
    }

    /// Event channel of the most recent peer, for injecting substrate events
    pub fn event_channel(&self) -> Arc<Mutex<Option<(PeerHandle, EventSender)>>> {
        self.events.clone()
    }

    /// Sink handed out as the outbound track
    pub fn track_sink(&self) -> Arc<FrameCounter> {
        self.track_sink.clone()
    }
}

#[async_trait]
impl NegotiationEngine for FakeNegotiationEngine {
    async fn create_peer_connection(
        &mut self,
        _config: &ConnectionConfig,
        events: EventSender,
    ) -> Result<PeerHandle, NegotiationError> {
        self.log.push(Call::CreatePeer);
        if let Some(err) = &self.factory_error {
            return Err(err.clone());
        }

        let peer = Handle::new();
        self.live.insert(peer);
        *self.events.lock() = Some((peer, events));
        Ok(peer)
    }

    async fn bind_local_track(
        &mut self,
        _peer: PeerHandle,
        track: &LocalTrack,
    ) -> Result<Arc<dyn FrameSink>, NegotiationError> {
        self.log.push(Call::BindTrack(track.track_id.clone()));
        Ok(self.track_sink.clone())
    }

    async fn create_offer(&mut self, _peer: PeerHandle) -> Result<SdpOffer, NegotiationError> {
        self.log.push(Call::CreateOffer);
        self.offer.clone()
    }

    async fn apply_remote_description(
        &mut self,
        _peer: PeerHandle,
        _answer: SdpAnswer,
    ) -> Result<(), NegotiationError> {
        self.log.push(Call::ApplyRemote);
        self.answer.clone()
    }

    async fn dispose(&mut self, peer: PeerHandle) {
        if let Some(delay) = self.dispose_delay {
            tokio::time::sleep(delay).await;
        }
        if self.live.remove(&peer) {
            self.log.push(Call::DisposePeer);
        }
    }
}

/// Send a substrate event as if the engine's peer had raised it
pub fn inject_event(channel: &Arc<Mutex<Option<(PeerHandle, EventSender)>>>, event: NegotiationEvent) {
    let guard = channel.lock();
    let (peer, tx) = guard.as_ref().expect("No peer connection created yet");
    tx.send((*peer, event)).expect("Session worker gone");
}

/// Small I420 test frame
pub fn create_test_frame(sequence: u64) -> Frame {
    let (width, height) = (4, 2);
    Frame {
        format: FrameFormat {
            width,
            height,
            pixel_format: PixelFormat::I420,
        },
        data: Bytes::from(vec![0x80; (width * height * 3 / 2) as usize]),
        pts: sequence * 33_333_333,
        sequence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_log_order() {
        let log = CallLog::new();
        log.push(Call::CreatePeer);
        log.push(Call::DisposePeer);
        assert_eq!(log.position(|c| *c == Call::DisposePeer), Some(1));
        assert_eq!(log.count(&Call::CreatePeer), 1);
    }

    #[test]
    fn test_create_test_frame_size() {
        let frame = create_test_frame(3);
        assert_eq!(frame.data.len(), 12);
        assert_eq!(frame.sequence, 3);
    }
}
