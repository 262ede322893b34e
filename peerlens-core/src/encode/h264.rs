//! H.264 encoding with the bundled OpenH264 library

use bytes::Bytes;
use openh264::encoder::Encoder;
use openh264::formats::YUVBuffer;
use tracing::{debug, info};

use super::{EncodedFrame, VideoEncoder};
use crate::config::CaptureProfile;
use crate::error::EncodeError;
use crate::types::{Frame, PixelFormat};

/// Software H.264 encoder for I420 frames
pub struct H264Encoder {
    encoder: Encoder,
    profile: CaptureProfile,
    frames: u64,
}

impl H264Encoder {
    /// Create an encoder for frames of `profile`
    pub fn new(profile: CaptureProfile) -> Result<Self, EncodeError> {
        let encoder = Encoder::new()
            .map_err(|e| EncodeError::Unavailable(format!("OpenH264 init failed: {}", e)))?;

        info!("H.264 encoder opened for {}", profile);

        Ok(Self {
            encoder,
            profile,
            frames: 0,
        })
    }

    /// Frames encoded so far
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl VideoEncoder for H264Encoder {
    fn name(&self) -> &str {
        "openh264"
    }

    fn encode(&mut self, frame: &Frame) -> Result<Option<EncodedFrame>, EncodeError> {
        let format = frame.format;
        if format.pixel_format != PixelFormat::I420 {
            return Err(EncodeError::UnsupportedFrame(format!(
                "{:?} input, expected I420",
                format.pixel_format
            )));
        }
        if format.width % 2 != 0 || format.height % 2 != 0 {
            return Err(EncodeError::UnsupportedFrame(format!(
                "odd dimensions {}x{}",
                format.width, format.height
            )));
        }
        if format.buffer_size() != Some(frame.data.len()) {
            return Err(EncodeError::UnsupportedFrame(format!(
                "{} bytes for a {}x{} I420 frame",
                frame.data.len(),
                format.width,
                format.height
            )));
        }

        if (format.width, format.height) != (self.profile.width, self.profile.height) {
            debug!(
                "Frame {} is {}x{}, profile is {}",
                frame.sequence, format.width, format.height, self.profile
            );
        }

        let yuv = YUVBuffer::from_vec(
            frame.data.to_vec(),
            format.width as usize,
            format.height as usize,
        );

        let bitstream = self
            .encoder
            .encode(&yuv)
            .map_err(|e| EncodeError::Failed(format!("frame {}: {}", frame.sequence, e)))?;

        let data = bitstream.to_vec();
        self.frames += 1;

        if data.is_empty() {
            return Ok(None);
        }

        Ok(Some(EncodedFrame {
            data: Bytes::from(data),
            sequence: frame.sequence,
        }))
    }
}
