//! Outbound video encoding
//!
//! Raw capture frames are compressed before they reach the outbound track.
//! Encoding runs on a dedicated thread per track: the [`EncoderFactory`]
//! builds the encoder on that thread, frames are queued to it through a
//! short bounded channel, and compressed frames come back on a tokio
//! channel for the track writer.

mod h264;

pub use h264::H264Encoder;

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use tokio::sync::mpsc as async_mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::CaptureProfile;
use crate::error::EncodeError;
use crate::types::Frame;

/// Raw frames waiting for the encoder; older frames are dropped past this
const ENCODER_QUEUE_DEPTH: usize = 2;

/// One compressed frame
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Codec bitstream (Annex B for H.264)
    pub data: Bytes,
    /// Sequence number of the source frame
    pub sequence: u64,
}

/// Compresses raw frames for one track
pub trait VideoEncoder {
    /// Encoder name for logging
    fn name(&self) -> &str;

    /// Compress one frame. `Ok(None)` when the encoder skipped it.
    fn encode(&mut self, frame: &Frame) -> Result<Option<EncodedFrame>, EncodeError>;
}

/// Builds an encoder on the encoder thread
pub type EncoderFactory =
    Arc<dyn Fn() -> Result<Box<dyn VideoEncoder>, EncodeError> + Send + Sync>;

/// Factory for the bundled OpenH264 encoder
pub fn h264_factory(profile: CaptureProfile) -> EncoderFactory {
    Arc::new(move || Ok(Box::new(H264Encoder::new(profile)?) as Box<dyn VideoEncoder>))
}

/// Encoder running on its own thread
pub struct EncoderThread {
    frames: Option<SyncSender<Arc<Frame>>>,
    dropped: AtomicU64,
}

impl EncoderThread {
    /// Build an encoder with `factory` on a new thread
    ///
    /// Returns once the encoder is constructed, or with the factory's error.
    pub fn spawn(
        factory: EncoderFactory,
        output: async_mpsc::UnboundedSender<EncodedFrame>,
    ) -> Result<Self, EncodeError> {
        let (frame_tx, frame_rx) = mpsc::sync_channel::<Arc<Frame>>(ENCODER_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("peerlens-encode".to_string())
            .spawn(move || {
                let mut encoder = match factory() {
                    Ok(encoder) => {
                        let _ = ready_tx.send(Ok(()));
                        encoder
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                info!("Encoder '{}' running", encoder.name());

                while let Ok(frame) = frame_rx.recv() {
                    match encoder.encode(&frame) {
                        Ok(Some(encoded)) => {
                            if output.send(encoded).is_err() {
                                debug!("Track writer gone, encoder stopping");
                                break;
                            }
                        }
                        Ok(None) => trace!("Encoder skipped frame {}", frame.sequence),
                        Err(e) => warn!("Failed to encode frame {}: {}", frame.sequence, e),
                    }
                }

                debug!("Encoder '{}' stopped", encoder.name());
            })
            .map_err(|e| EncodeError::Unavailable(format!("Failed to spawn encoder thread: {}", e)))?;

        match ready_rx.recv() {
            // The thread is detached; it ends once the queue is closed
            Ok(Ok(())) => Ok(Self {
                frames: Some(frame_tx),
                dropped: AtomicU64::new(0),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(EncodeError::Unavailable(
                    "encoder thread exited during setup".to_string(),
                ))
            }
        }
    }

    /// Queue a frame. Returns false if it was dropped.
    pub fn submit(&self, frame: Arc<Frame>) -> bool {
        let Some(frames) = &self.frames else {
            return false;
        };

        match frames.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Encoder busy, dropping frame {}", frame.sequence);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Frames dropped because the encoder was behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Close the queue; the thread exits after its current frame
    pub fn stop(&mut self) {
        if self.frames.take().is_some() {
            debug!("Encoder queue closed");
        }
    }
}

impl Drop for EncoderThread {
    fn drop(&mut self) {
        self.stop();
    }
}
