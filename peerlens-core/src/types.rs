//! Core types for Peerlens
//!
//! Identifiers, device descriptions, frames and SDP wrappers shared by the
//! capture, negotiation and session components.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global handle counter for capture and peer handles
static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque handle for a native resource (capture device or peer connection)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    /// Create a new unique handle
    pub fn new() -> Self {
        Self(HANDLE_COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw handle value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

/// Handle to a negotiated peer connection, owned by one session
pub type PeerHandle = Handle;

/// Prefix for generated session ids
const SESSION_ID_PREFIX: &str = "sess_";

/// Opaque unique session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random id (`sess_` + 12 hex characters)
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}{}", SESSION_ID_PREFIX, &uuid[..12]))
    }

    /// Wrap an existing id, e.g. one decoded from a remote payload
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which way a camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    /// Towards the user
    Front,
    /// Away from the user
    Back,
    /// External or virtual device with no facing
    External,
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Facing::Front => "front",
            Facing::Back => "back",
            Facing::External => "external",
        };
        f.pad(s)
    }
}

impl std::str::FromStr for Facing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "front" | "user" => Ok(Self::Front),
            "back" | "rear" | "environment" => Ok(Self::Back),
            "external" => Ok(Self::External),
            _ => Err(format!("Unknown facing: {}", s)),
        }
    }
}

/// Information about an available capture device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Backend-specific device identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Which way the device faces
    pub facing: Facing,
}

impl DeviceInfo {
    /// Create a new device info
    pub fn new(id: impl Into<String>, name: impl Into<String>, facing: Facing) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            facing,
        }
    }
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {} ({})", self.id, self.name, self.facing)
    }
}

/// Pixel layout of a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Planar YUV 4:2:0
    I420,
    /// Packed 32-bit BGRA
    Bgra,
    /// Already compressed by the device (e.g. hardware VP8/H.264)
    Encoded,
}

/// Frame format information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel layout
    pub pixel_format: PixelFormat,
}

impl FrameFormat {
    /// Expected buffer size in bytes for uncompressed formats
    pub fn buffer_size(&self) -> Option<usize> {
        let pixels = self.width as usize * self.height as usize;
        match self.pixel_format {
            PixelFormat::I420 => Some(pixels + pixels / 2),
            PixelFormat::Bgra => Some(pixels * 4),
            PixelFormat::Encoded => None,
        }
    }
}

/// A single video frame produced by a capture device
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame format
    pub format: FrameFormat,
    /// Frame payload
    pub data: Bytes,
    /// Presentation timestamp in nanoseconds since capture start
    pub pts: u64,
    /// Monotonic sequence number within the capture
    pub sequence: u64,
}

/// Local session description produced by `create_offer`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SdpOffer(pub String);

/// Remote session description answering our offer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SdpAnswer(pub String);

impl SdpOffer {
    /// Borrow the raw SDP text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl SdpAnswer {
    /// Borrow the raw SDP text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
