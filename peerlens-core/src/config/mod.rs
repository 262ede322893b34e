//! Configuration types for Peerlens
//!
//! Provides the negotiation policy, the fixed capture profile and the
//! per-process session settings.

mod file;

pub use file::{sample_config, ConfigFile};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::Facing;

/// Default STUN server used when none is configured
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Default base URL from which endpoint hints are derived
pub const DEFAULT_ENDPOINT_BASE: &str = "https://peerlens.local/connect";

/// Whether TCP ICE candidates are gathered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TcpCandidatePolicy {
    /// UDP only
    Disabled,
    /// UDP and TCP
    Enabled,
}

/// How media streams share transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundlePolicy {
    /// Every stream on one transport
    MaxBundle,
    /// One transport per media type
    Balanced,
    /// One transport per stream
    MaxCompat,
}

/// Whether RTP and RTCP share a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtcpMuxPolicy {
    /// Multiplexing is mandatory
    Require,
    /// Negotiate multiplexing
    Negotiate,
}

/// ICE candidate gathering behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatheringPolicy {
    /// Gather once
    Once,
    /// Keep publishing candidates as they are discovered
    Continual,
}

/// DTLS certificate key type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// Elliptic-curve (P-256) session keys
    Ecdsa,
}

/// Static negotiation policy
///
/// Constructed once per process and shared read-only between sessions.
/// Only the ICE server list varies; the policy fields are fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    ice_servers: Vec<String>,
    tcp_candidates: TcpCandidatePolicy,
    bundle: BundlePolicy,
    rtcp_mux: RtcpMuxPolicy,
    gathering: GatheringPolicy,
    key_type: KeyType,
}

impl ConnectionConfig {
    /// Build the policy with the given ICE servers
    pub fn new(ice_servers: Vec<String>) -> Self {
        let ice_servers = if ice_servers.is_empty() {
            vec![DEFAULT_STUN_SERVER.to_string()]
        } else {
            ice_servers
        };

        Self {
            ice_servers,
            tcp_candidates: TcpCandidatePolicy::Disabled,
            bundle: BundlePolicy::MaxBundle,
            rtcp_mux: RtcpMuxPolicy::Require,
            gathering: GatheringPolicy::Continual,
            key_type: KeyType::Ecdsa,
        }
    }

    /// Freeze into a shareable handle
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn ice_servers(&self) -> &[String] {
        &self.ice_servers
    }

    pub fn tcp_candidates(&self) -> TcpCandidatePolicy {
        self.tcp_candidates
    }

    pub fn bundle(&self) -> BundlePolicy {
        self.bundle
    }

    pub fn rtcp_mux(&self) -> RtcpMuxPolicy {
        self.rtcp_mux
    }

    pub fn gathering(&self) -> GatheringPolicy {
        self.gathering
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Capture resolution and rate
///
/// Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureProfile {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frames per second
    pub fps: u32,
}

impl CaptureProfile {
    /// 640x480 @ 30fps
    pub const STANDARD: CaptureProfile = CaptureProfile {
        width: 640,
        height: 480,
        fps: 30,
    };

    /// Time between frames
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_micros(1_000_000 / self.fps.max(1) as u64)
    }
}

impl Default for CaptureProfile {
    fn default() -> Self {
        Self::STANDARD
    }
}

impl std::fmt::Display for CaptureProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} @ {}fps", self.width, self.height, self.fps)
    }
}

/// Per-process session settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Base URL advertised to the remote peer
    pub endpoint_base: String,
    /// Facing used when the caller does not ask for one
    pub default_facing: Option<Facing>,
    /// Capture profile
    pub profile: CaptureProfile,
}

impl SessionSettings {
    /// Endpoint hint for a session: `<base>?id=<session id>`
    pub fn endpoint_hint(&self, session_id: &str) -> String {
        let separator = if self.endpoint_base.contains('?') { '&' } else { '?' };
        format!("{}{}id={}", self.endpoint_base, separator, session_id)
    }

    /// Set the endpoint base
    pub fn with_endpoint_base(mut self, base: impl Into<String>) -> Self {
        self.endpoint_base = base.into();
        self
    }

    /// Set the default facing
    pub fn with_default_facing(mut self, facing: Facing) -> Self {
        self.default_facing = Some(facing);
        self
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            endpoint_base: DEFAULT_ENDPOINT_BASE.to_string(),
            default_facing: Some(Facing::Front),
            profile: CaptureProfile::STANDARD,
        }
    }
}
