//! Session management
//!
//! [`SessionManager`] owns at most one session at a time and drives it
//! through the state machine below. Every operation that touches the
//! capture device or the peer connection runs on a dedicated worker thread,
//! one command at a time; the manager itself only sends commands and awaits
//! their single reply.
//!
//! ```text
//! Idle ─▶ Initializing ─▶ Capturing ─▶ OfferCreated ─▶ AwaitingRemote ─▶ Connected
//!   │           │              │             │                │              │
//!   └───────────┴──────────────┴─────┬───────┴────────────────┴──────────────┘
//!                                    ▼
//!                        Failed(reason) ─▶ Closed
//! ```

mod worker;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureBackend, CapturePipeline, FrameSink, TestPatternBackend};
use crate::config::{ConnectionConfig, SessionSettings};
use crate::descriptor::{self, ConnectionDescriptor};
use crate::error::{NegotiationError, PeerlensError, Result};
use crate::negotiation::{NegotiationEngine, NegotiationEvent, WebRtcEngine};
use crate::types::{Facing, SdpAnswer, SessionId};

use worker::{Command, SessionWorker};

/// Session events buffered per subscriber
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle state of the current session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SessionState {
    /// No session
    #[default]
    Idle,
    /// Peer connection being created
    Initializing,
    /// Capture running and bound to the outbound track
    Capturing,
    /// Local offer applied, descriptor published
    OfferCreated,
    /// Remote answer received, being applied
    AwaitingRemote,
    /// Remote answer applied
    Connected,
    /// Torn down
    Closed,
    /// Unrecoverable error; only stop/dispose are valid from here
    Failed(String),
}

impl SessionState {
    /// Whether no further progress is possible without a stop
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed(_))
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Failed(_), _) => false,
            (_, Failed(_)) => true,
            (Idle, Initializing)
            | (Initializing, Capturing)
            | (Capturing, OfferCreated)
            | (OfferCreated, AwaitingRemote)
            | (AwaitingRemote, Connected) => true,
            _ => false,
        }
    }

    /// Whether the descriptor may be read in this state
    fn has_descriptor(&self) -> bool {
        matches!(
            self,
            Self::OfferCreated | Self::AwaitingRemote | Self::Connected
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Capturing => write!(f, "Capturing"),
            Self::OfferCreated => write!(f, "OfferCreated"),
            Self::AwaitingRemote => write!(f, "AwaitingRemote"),
            Self::Connected => write!(f, "Connected"),
            Self::Closed => write!(f, "Closed"),
            Self::Failed(reason) => write!(f, "Failed({})", reason),
        }
    }
}

/// Something observable happened to the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session changed state
    StateChanged { from: SessionState, to: SessionState },
    /// A descriptor is ready for external publication
    DescriptorReady { descriptor: ConnectionDescriptor },
    /// The negotiation substrate reported something
    Negotiation { event: NegotiationEvent },
}

/// Point-in-time view of the manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Current state
    pub state: SessionState,
    /// Id of the current session, if one was started
    pub session_id: Option<SessionId>,
    /// When the current session was created
    pub created_at: Option<SystemTime>,
    /// Whether [`SessionManager::connection_descriptor`] would return one
    pub descriptor_available: bool,
}

/// State the worker publishes for readers on other threads
#[derive(Debug, Default)]
struct SharedState {
    state: SessionState,
    session_id: Option<SessionId>,
    created_at: Option<SystemTime>,
    descriptor: Option<ConnectionDescriptor>,
}

/// Builder for [`SessionManager`]
pub struct SessionManagerBuilder {
    config: Arc<ConnectionConfig>,
    settings: SessionSettings,
    backend: Option<Box<dyn CaptureBackend>>,
    engine: Option<Box<dyn NegotiationEngine>>,
    preview_sinks: Vec<Arc<dyn FrameSink>>,
}

impl SessionManagerBuilder {
    fn new() -> Self {
        Self {
            config: ConnectionConfig::default().shared(),
            settings: SessionSettings::default(),
            backend: None,
            engine: None,
            preview_sinks: Vec::new(),
        }
    }

    /// Negotiation policy shared by every session of this manager
    pub fn config(mut self, config: Arc<ConnectionConfig>) -> Self {
        self.config = config;
        self
    }

    /// Endpoint, default facing and capture profile
    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Capture device backend (default: test pattern)
    pub fn capture_backend(mut self, backend: impl CaptureBackend + 'static) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    /// Negotiation engine (default: [`WebRtcEngine`])
    pub fn negotiation_engine(mut self, engine: impl NegotiationEngine + 'static) -> Self {
        self.engine = Some(Box::new(engine));
        self
    }

    /// Local preview sink attached to every capture
    pub fn preview_sink(mut self, sink: Arc<dyn FrameSink>) -> Self {
        self.preview_sinks.push(sink);
        self
    }

    /// Spawn the session worker
    pub fn build(self) -> Result<SessionManager> {
        let engine: Box<dyn NegotiationEngine> = match self.engine {
            Some(engine) => engine,
            None => Box::new(WebRtcEngine::new(&self.config)?),
        };
        let backend = self
            .backend
            .unwrap_or_else(|| Box::new(TestPatternBackend::default()));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .thread_name("peerlens-session")
            .build()
            .map_err(|e| PeerlensError::Io(e).with_context("Failed to build session runtime"))?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (negotiation_tx, negotiation_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(RwLock::new(SharedState::default()));

        let worker = SessionWorker::new(
            self.config,
            self.settings.clone(),
            CapturePipeline::new(backend, self.settings.profile),
            engine,
            self.preview_sinks,
            events.clone(),
            shared.clone(),
            negotiation_tx,
        );

        let thread = std::thread::Builder::new()
            .name("peerlens-session".to_string())
            .spawn(move || {
                runtime.block_on(worker.run(command_rx, negotiation_rx));
                debug!("Session worker exited");
            })
            .map_err(|e| PeerlensError::Io(e).with_context("Failed to spawn session worker"))?;

        info!("Session manager ready");

        Ok(SessionManager {
            commands: command_tx,
            events,
            shared,
            worker: Mutex::new(Some(thread)),
        })
    }
}

/// Owns one session at a time and serializes all work on its worker
pub struct SessionManager {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<SessionEvent>,
    shared: Arc<RwLock<SharedState>>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl SessionManager {
    /// Start configuring a manager
    pub fn builder() -> SessionManagerBuilder {
        SessionManagerBuilder::new()
    }

    /// Manager with the default backend and engine
    pub fn new(config: Arc<ConnectionConfig>, settings: SessionSettings) -> Result<Self> {
        Self::builder().config(config).settings(settings).build()
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Start a session and resolve once the offer is ready or start failed
    ///
    /// `preferred` overrides the configured default facing. Rejected with
    /// `AlreadyActive` while a session is running, and with
    /// `InvalidTransition` from `Failed` until the session is stopped.
    pub async fn start_session(&self, preferred: Option<Facing>) -> Result<ConnectionDescriptor> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { preferred, reply })?;
        rx.await.map_err(|_| PeerlensError::WorkerGone)?
    }

    /// Tear the current session down. Never fails; repeated calls are no-ops.
    pub async fn stop_session(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Stop { reply }).is_err() {
            debug!("Stop requested after worker exit");
            return;
        }
        let _ = rx.await;
    }

    /// Descriptor of the current session, once its offer exists
    pub fn connection_descriptor(&self) -> Option<ConnectionDescriptor> {
        let shared = self.shared.read();
        shared
            .state
            .has_descriptor()
            .then(|| shared.descriptor.clone())
            .flatten()
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.shared.read().state.clone()
    }

    /// Point-in-time view of the manager
    pub fn snapshot(&self) -> SessionSnapshot {
        let shared = self.shared.read();
        SessionSnapshot {
            state: shared.state.clone(),
            session_id: shared.session_id.clone(),
            created_at: shared.created_at,
            descriptor_available: shared.state.has_descriptor() && shared.descriptor.is_some(),
        }
    }

    /// Feed a payload read back from the remote peer
    ///
    /// The payload's SDP slot must carry the remote answer and its session id
    /// must match the current session. Decode failures leave the session
    /// untouched.
    pub async fn accept_remote_payload(&self, payload: &str) -> Result<()> {
        let remote = descriptor::decode(payload)?;

        let answer = remote.offer_sdp().map(str::to_string).ok_or_else(|| {
            NegotiationError::AnswerRejected("payload carries no session description".to_string())
        })?;

        debug!(
            "Remote payload for {} via {}",
            remote.session_id(),
            remote.endpoint_hint()
        );

        self.apply(Some(remote.session_id().clone()), SdpAnswer(answer))
            .await
    }

    /// Apply an answer obtained by other means
    pub async fn apply_remote_answer(&self, answer: SdpAnswer) -> Result<()> {
        self.apply(None, answer).await
    }

    /// Stop any session and shut the worker down
    ///
    /// Every later call fails with `WorkerGone` (or does nothing, for stop).
    pub async fn dispose(&self) {
        let Some(thread) = self.worker.lock().take() else {
            return;
        };

        let (reply, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }

        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => {}
            _ => error!("Session worker panicked"),
        }
        info!("Session manager disposed");
    }

    async fn apply(&self, session_id: Option<SessionId>, answer: SdpAnswer) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ApplyAnswer {
            session_id,
            answer,
            reply,
        })?;
        rx.await.map_err(|_| PeerlensError::WorkerGone)?
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| PeerlensError::WorkerGone)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let Some(thread) = self.worker.get_mut().take() else {
            return;
        };

        warn!("Session manager dropped without dispose, shutting worker down");
        let (reply, _rx) = oneshot::channel();
        let _ = self.commands.send(Command::Shutdown { reply });

        // Inside a runtime the join must not park the executor thread
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || join_worker(thread));
            }
            Err(_) => join_worker(thread),
        }
    }
}

fn join_worker(thread: std::thread::JoinHandle<()>) {
    if thread.join().is_err() {
        error!("Session worker panicked");
    }
}
