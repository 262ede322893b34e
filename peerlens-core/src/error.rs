//! Error types for Peerlens
//!
//! Each component reports its own error enum. [`PeerlensError`] wraps them
//! for callers that drive the whole session.

use thiserror::Error;

/// Result type alias using PeerlensError
pub type Result<T> = std::result::Result<T, PeerlensError>;

/// Capture pipeline failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// No capture device could be enumerated
    #[error("No capture device available")]
    NoDeviceAvailable,

    /// The device was found but could not be opened or started
    #[error("Capture device initialization failed: {0}")]
    DeviceInitFailed(String),

    /// The capture handle was already released
    #[error("Capture handle already disposed")]
    AlreadyDisposed,
}

/// Negotiation engine failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    /// The negotiation substrate (media factory) could not be constructed
    #[error("Negotiation factory unavailable: {0}")]
    FactoryUnavailable(String),

    /// Creating or applying the local offer failed
    #[error("Offer failed: {0}")]
    OfferFailed(String),

    /// The remote answer was malformed or refused by the peer connection
    #[error("Answer rejected: {0}")]
    AnswerRejected(String),
}

/// Connection descriptor decoding failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Structurally invalid payload
    #[error("Malformed descriptor: {0}")]
    Malformed(String),

    /// Version tag present but not recognized
    #[error("Unsupported descriptor version: {0}")]
    UnsupportedVersion(String),
}

/// Outbound video encoding failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// No encoder could be constructed
    #[error("Video encoder unavailable: {0}")]
    Unavailable(String),

    /// The frame layout cannot be fed to the encoder
    #[error("Unsupported frame: {0}")]
    UnsupportedFrame(String),

    /// The encoder refused a frame
    #[error("Encoding failed: {0}")]
    Failed(String),
}

/// Session state machine violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A session is already in progress
    #[error("A session is already active")]
    AlreadyActive,

    /// The requested operation is not valid in the current state
    #[error("Invalid transition: cannot {operation} while {state}")]
    InvalidTransition {
        /// Operation that was attempted
        operation: &'static str,
        /// State the session was in
        state: String,
    },
}

impl SessionError {
    /// Create an invalid transition error
    pub fn invalid(operation: &'static str, state: impl std::fmt::Display) -> Self {
        Self::InvalidTransition {
            operation,
            state: state.to_string(),
        }
    }
}

/// Main error type for Peerlens operations
#[derive(Debug, Error)]
pub enum PeerlensError {
    /// Capture pipeline error
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Negotiation engine error
    #[error("Negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    /// Descriptor decode error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Video encoding error
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Session state error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The session worker thread is no longer running
    #[error("Session worker has shut down")]
    WorkerGone,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PeerlensError>,
    },
}

impl PeerlensError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip any context layers and return the underlying error
    pub fn root(&self) -> &PeerlensError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// A short suggestion for the user, if one applies
    pub fn user_hint(&self) -> Option<&'static str> {
        match self.root() {
            Self::Capture(CaptureError::NoDeviceAvailable) => {
                Some("Connect a camera or check that no other application holds it")
            }
            Self::Capture(_) => Some("The camera could not be started; stop the session and retry"),
            Self::Negotiation(NegotiationError::FactoryUnavailable(_)) => {
                Some("The WebRTC stack failed to initialize; check network interfaces")
            }
            Self::Negotiation(_) => {
                Some("Negotiation failed; stop the session and start a new one")
            }
            Self::Decode(_) => Some("Rescan the code; the payload was not a Peerlens descriptor"),
            Self::Session(SessionError::AlreadyActive) => {
                Some("Stop the current session before starting another")
            }
            Self::Config(_) => Some("Check ~/.config/peerlens/config.toml for syntax errors"),
            _ => None,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl From<toml::de::Error> for PeerlensError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("Failed to parse config file: {}", err))
    }
}
