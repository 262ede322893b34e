//! Peerlens Core Library
//!
//! Serverless peer-to-peer camera sessions: one device captures video and
//! advertises a connection descriptor out of band, the other completes the
//! offer/answer exchange with it.
//!
//! This library provides:
//! - A compact, versioned descriptor codec for optical transfer
//! - A capture pipeline with idempotent start/stop and frame fan-out
//! - H.264 encoding of raw frames for the outbound track
//! - WebRTC offer/answer negotiation under a fixed connection policy
//! - A session manager enforcing a strict state machine with ordered teardown
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌──────────────────┐
//! │ Capture Pipeline│───▶│ Negotiation      │───▶│ Descriptor Codec │
//! │ (device, sinks) │    │ (offer / answer) │    │ (v1 payload)     │
//! └─────────────────┘    └──────────────────┘    └──────────────────┘
//!          ▲                       ▲
//!          └──── Session Manager (dedicated worker) ────┘
//! ```

pub mod capture;
pub mod config;
pub mod descriptor;
pub mod encode;
pub mod error;
pub mod negotiation;
pub mod runtime;
pub mod session;
pub mod types;

pub use capture::{CaptureHandle, CapturePipeline, FrameCounter, FrameSink, TestPatternBackend};
pub use config::{CaptureProfile, ConnectionConfig, SessionSettings};
pub use descriptor::ConnectionDescriptor;
pub use error::{PeerlensError, Result};
pub use negotiation::{NegotiationEngine, NegotiationEvent, WebRtcEngine};
pub use runtime::MediaRuntime;
pub use session::{SessionEvent, SessionManager, SessionSnapshot, SessionState};
pub use types::{DeviceInfo, Facing, Handle, SdpAnswer, SdpOffer, SessionId};
