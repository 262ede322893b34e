//! Virtual test-pattern cameras
//!
//! Each device renders a moving I420 gradient on its own thread at the
//! profile frame rate. Used when no hardware backend is plugged in and by
//! the CLI for local testing.

use bytes::Bytes;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Instant;
use tracing::{debug, error, info};

use super::{CaptureBackend, CaptureDevice, FrameSender};
use crate::config::CaptureProfile;
use crate::error::CaptureError;
use crate::types::{DeviceInfo, Facing, Frame, FrameFormat, PixelFormat};

/// Backend exposing a fixed set of virtual cameras
#[derive(Debug, Clone)]
pub struct TestPatternBackend {
    devices: Vec<DeviceInfo>,
}

impl TestPatternBackend {
    /// One virtual camera per facing, in the given order
    pub fn new(facings: &[Facing]) -> Self {
        let devices = facings
            .iter()
            .enumerate()
            .map(|(i, facing)| {
                DeviceInfo::new(
                    format!("pattern-{}", i),
                    format!("Test Pattern ({})", facing),
                    *facing,
                )
            })
            .collect();

        Self { devices }
    }
}

impl Default for TestPatternBackend {
    fn default() -> Self {
        Self::new(&[Facing::Back, Facing::Front])
    }
}

impl CaptureBackend for TestPatternBackend {
    fn name(&self) -> &str {
        "test-pattern"
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        self.devices.clone()
    }

    fn open(
        &mut self,
        device: &DeviceInfo,
        profile: CaptureProfile,
    ) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        if !self.devices.iter().any(|d| d.id == device.id) {
            return Err(CaptureError::DeviceInitFailed(format!(
                "unknown device {}",
                device.id
            )));
        }

        if profile.width == 0 || profile.height == 0 || profile.fps == 0 {
            return Err(CaptureError::DeviceInitFailed(format!(
                "unsupported profile {}",
                profile
            )));
        }

        Ok(Box::new(PatternDevice {
            info: device.clone(),
            profile,
            thread: None,
            shutdown_tx: None,
        }))
    }
}

/// A running (or stopped) virtual camera
struct PatternDevice {
    info: DeviceInfo,
    profile: CaptureProfile,
    thread: Option<std::thread::JoinHandle<()>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl CaptureDevice for PatternDevice {
    fn start(&mut self, frames: FrameSender) -> Result<(), CaptureError> {
        if self.thread.is_some() {
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let profile = self.profile;
        let seed = self.info.id.bytes().fold(0u8, |acc, b| acc.wrapping_add(b));

        let thread = std::thread::Builder::new()
            .name("peerlens-capture".to_string())
            .spawn(move || run_pattern_loop(profile, seed, frames, shutdown_rx))
            .map_err(|e| {
                CaptureError::DeviceInitFailed(format!("Failed to spawn capture thread: {}", e))
            })?;

        self.thread = Some(thread);
        self.shutdown_tx = Some(shutdown_tx);
        info!("Test pattern {} streaming at {}", self.info.id, self.profile);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Capture thread for {} panicked", self.info.id);
            }
            debug!("Test pattern {} stopped", self.info.id);
        }
    }
}

impl Drop for PatternDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Frame clock: waits one interval for a shutdown signal, renders on timeout
fn run_pattern_loop(
    profile: CaptureProfile,
    seed: u8,
    frames: FrameSender,
    shutdown_rx: mpsc::Receiver<()>,
) {
    let interval = profile.frame_interval();
    let started = Instant::now();
    let mut sequence = 0u64;

    loop {
        match shutdown_rx.recv_timeout(interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        let frame = Frame {
            format: FrameFormat {
                width: profile.width,
                height: profile.height,
                pixel_format: PixelFormat::I420,
            },
            data: render_gradient(profile.width, profile.height, sequence, seed),
            pts: started.elapsed().as_nanos() as u64,
            sequence,
        };

        // No receivers is fine; frames are simply dropped
        let _ = frames.send(Arc::new(frame));
        sequence += 1;
    }
}

/// Diagonal luma gradient scrolling one pixel per frame, flat chroma
fn render_gradient(width: u32, height: u32, sequence: u64, seed: u8) -> Bytes {
    let (w, h) = (width as usize, height as usize);
    let luma = w * h;
    let chroma = (w / 2) * (h / 2);
    let mut data = Vec::with_capacity(luma + 2 * chroma);

    let offset = sequence as usize;
    for y in 0..h {
        for x in 0..w {
            data.push(((x + y + offset) % 256) as u8);
        }
    }
    data.resize(luma + chroma, seed);
    data.resize(luma + 2 * chroma, 128);

    Bytes::from(data)
}
