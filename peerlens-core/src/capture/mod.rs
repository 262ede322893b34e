//! Camera capture
//!
//! This module handles:
//! - Device enumeration and selection through a [`CaptureBackend`]
//! - Ownership of the single active device ([`CapturePipeline`])
//! - Fan-out of frames to any number of [`FrameSink`]s

pub mod pattern;

pub use pattern::TestPatternBackend;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::CaptureProfile;
use crate::error::CaptureError;
use crate::types::{DeviceInfo, Facing, Frame, Handle};

/// Frame fan-out channel fed by a running device
pub type FrameSender = broadcast::Sender<Arc<Frame>>;

/// Identifies one attached sink
pub type SinkId = Handle;

/// Frames buffered per subscriber; small for low latency
const FRAME_CHANNEL_CAPACITY: usize = 4;

/// Source of capture devices
pub trait CaptureBackend: Send {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Enumerate devices, in preference order
    fn devices(&self) -> Vec<DeviceInfo>;

    /// Open a device for the given profile without starting it
    fn open(
        &mut self,
        device: &DeviceInfo,
        profile: CaptureProfile,
    ) -> Result<Box<dyn CaptureDevice>, CaptureError>;
}

/// An opened capture device
pub trait CaptureDevice: Send {
    /// Begin streaming frames into `frames`
    fn start(&mut self, frames: FrameSender) -> Result<(), CaptureError>;

    /// Halt streaming and release the device. Must be idempotent.
    fn stop(&mut self);
}

/// Consumer of captured frames
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Sink name for logging
    fn name(&self) -> &str;

    /// Handle one frame
    async fn on_frame(&self, frame: Arc<Frame>);
}

/// Outbound video track description, shared read-only with negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    /// Track id
    pub track_id: String,
    /// Media stream id
    pub stream_id: String,
    /// Resolution and rate the track carries
    pub profile: CaptureProfile,
}

impl LocalTrack {
    fn new(profile: CaptureProfile) -> Self {
        Self {
            track_id: "local_video".to_string(),
            stream_id: "local_stream".to_string(),
            profile,
        }
    }
}

/// Ownership token for the active capture device and the track it feeds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureHandle {
    id: Handle,
    device: DeviceInfo,
    track: LocalTrack,
}

impl CaptureHandle {
    pub fn id(&self) -> Handle {
        self.id
    }

    /// Device backing this capture
    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    /// Track fed by this capture
    pub fn track(&self) -> &LocalTrack {
        &self.track
    }
}

/// Device currently streaming
struct ActiveCapture {
    handle: CaptureHandle,
    device: Box<dyn CaptureDevice>,
    frame_tx: FrameSender,
    sinks: HashMap<SinkId, JoinHandle<()>>,
}

/// Owns at most one running capture device
///
/// `start` and `stop` are idempotent. Sinks are forwarded frames on tasks
/// of the current tokio runtime.
pub struct CapturePipeline {
    backend: Box<dyn CaptureBackend>,
    profile: CaptureProfile,
    active: Option<ActiveCapture>,
    last_released: Option<Handle>,
}

impl CapturePipeline {
    /// Create a pipeline over a device backend
    pub fn new(backend: Box<dyn CaptureBackend>, profile: CaptureProfile) -> Self {
        Self {
            backend,
            profile,
            active: None,
            last_released: None,
        }
    }

    /// Enumerate the backend's devices
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.backend.devices()
    }

    /// Capture profile
    pub fn profile(&self) -> CaptureProfile {
        self.profile
    }

    /// Whether a device is streaming
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Handle of the streaming device, if any
    pub fn active_handle(&self) -> Option<&CaptureHandle> {
        self.active.as_ref().map(|a| &a.handle)
    }

    /// Whether `handle`, issued by this pipeline, has been released
    ///
    /// Handles are issued in increasing order and at most one is live, so
    /// every handle up to the last one stopped is released.
    pub fn is_released(&self, handle: &CaptureHandle) -> bool {
        self.last_released
            .is_some_and(|last| handle.id.as_u64() <= last.as_u64())
    }

    /// Select a device and start streaming
    ///
    /// Prefers a device with the requested facing, else the first one the
    /// backend lists. Returns the existing handle if already started.
    pub fn start(&mut self, preferred: Option<Facing>) -> Result<CaptureHandle, CaptureError> {
        if let Some(active) = &self.active {
            debug!(
                "Capture already running on {}, reusing {}",
                active.handle.device.id, active.handle.id
            );
            return Ok(active.handle.clone());
        }

        let device = select_device(&self.backend.devices(), preferred)?;

        info!(
            "Starting capture on {} via {} backend at {}",
            device,
            self.backend.name(),
            self.profile
        );

        let mut opened = self.backend.open(&device, self.profile)?;

        let (frame_tx, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        if let Err(e) = opened.start(frame_tx.clone()) {
            opened.stop();
            return Err(match e {
                CaptureError::DeviceInitFailed(_) => e,
                other => CaptureError::DeviceInitFailed(other.to_string()),
            });
        }

        let handle = CaptureHandle {
            id: Handle::new(),
            device,
            track: LocalTrack::new(self.profile),
        };

        self.active = Some(ActiveCapture {
            handle: handle.clone(),
            device: opened,
            frame_tx,
            sinks: HashMap::new(),
        });

        info!("Capture started: {}", handle.id);
        Ok(handle)
    }

    /// Register a frame consumer on the running capture
    pub fn attach_sink(
        &mut self,
        handle: &CaptureHandle,
        sink: Arc<dyn FrameSink>,
    ) -> Result<SinkId, CaptureError> {
        let active = match &mut self.active {
            Some(active) if active.handle.id == handle.id => active,
            _ => return Err(CaptureError::AlreadyDisposed),
        };

        let sink_id = Handle::new();
        let rx = active.frame_tx.subscribe();
        debug!("Attaching sink '{}' as {} to {}", sink.name(), sink_id, handle.id);

        let task = tokio::spawn(forward_frames(rx, sink));
        active.sinks.insert(sink_id, task);

        Ok(sink_id)
    }

    /// Detach one sink; other sinks keep receiving frames
    ///
    /// Returns false if the sink was not attached.
    pub fn detach_sink(&mut self, handle: &CaptureHandle, sink_id: SinkId) -> bool {
        let Some(active) = self.active.as_mut().filter(|a| a.handle.id == handle.id) else {
            return false;
        };

        match active.sinks.remove(&sink_id) {
            Some(task) => {
                task.abort();
                debug!("Detached sink {} from {}", sink_id, handle.id);
                true
            }
            None => false,
        }
    }

    /// Halt streaming and release the device
    ///
    /// Stopping an already-stopped or unknown handle does nothing.
    pub fn stop(&mut self, handle: &CaptureHandle) {
        let matches = self
            .active
            .as_ref()
            .is_some_and(|a| a.handle.id == handle.id);

        if !matches {
            debug!("Capture {} not running, nothing to stop", handle.id);
            return;
        }

        let Some(mut active) = self.active.take() else {
            return;
        };

        info!("Stopping capture {} on {}", handle.id, active.handle.device.id);

        for (_, task) in active.sinks.drain() {
            task.abort();
        }
        active.device.stop();
        self.last_released = Some(active.handle.id);

        info!("Capture {} stopped", handle.id);
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if let Some(handle) = self.active.as_ref().map(|a| a.handle.clone()) {
            warn!("Capture pipeline dropped while {} was running", handle.id);
            self.stop(&handle);
        }
    }
}

/// Pick the preferred-facing device, else the first listed
pub fn select_device(
    devices: &[DeviceInfo],
    preferred: Option<Facing>,
) -> Result<DeviceInfo, CaptureError> {
    preferred
        .and_then(|facing| devices.iter().find(|d| d.facing == facing))
        .or_else(|| devices.first())
        .cloned()
        .ok_or(CaptureError::NoDeviceAvailable)
}

async fn forward_frames(mut rx: broadcast::Receiver<Arc<Frame>>, sink: Arc<dyn FrameSink>) {
    loop {
        match rx.recv().await {
            Ok(frame) => {
                trace!("Frame {} -> sink '{}'", frame.sequence, sink.name());
                sink.on_frame(frame).await;
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!("Sink '{}' lagged by {} frames", sink.name(), n);
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Frame channel closed, sink '{}' done", sink.name());
                break;
            }
        }
    }
}

/// Preview sink that counts frames
#[derive(Debug, Default)]
pub struct FrameCounter {
    frames: AtomicU64,
    last_sequence: AtomicU64,
}

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames received so far
    pub fn count(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Sequence number of the most recent frame
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl FrameSink for FrameCounter {
    fn name(&self) -> &str {
        "frame-counter"
    }

    async fn on_frame(&self, frame: Arc<Frame>) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.last_sequence.store(frame.sequence, Ordering::Relaxed);
    }
}
