//! Session worker: owns the capture pipeline and the negotiation engine
//!
//! Commands are handled strictly in arrival order. A command runs to
//! completion (including every await on the negotiation substrate) before
//! the next one is looked at, so no start step can interleave with a stop.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use super::{SessionEvent, SessionState, SharedState};
use crate::capture::{CaptureHandle, CapturePipeline, FrameSink};
use crate::config::{ConnectionConfig, SessionSettings};
use crate::descriptor::ConnectionDescriptor;
use crate::error::{NegotiationError, PeerlensError, Result, SessionError};
use crate::negotiation::{
    sdp, EventSender, NegotiationEngine, NegotiationEvent, NegotiationResult, PeerConnectionState,
};
use crate::types::{Facing, PeerHandle, SdpAnswer, SessionId};

/// Work items sent by the manager
pub(super) enum Command {
    Start {
        preferred: Option<Facing>,
        reply: oneshot::Sender<Result<ConnectionDescriptor>>,
    },
    ApplyAnswer {
        session_id: Option<SessionId>,
        answer: SdpAnswer,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// One negotiation attempt and the resources it owns
struct Session {
    id: SessionId,
    peer: Option<PeerHandle>,
    capture: Option<CaptureHandle>,
    negotiation: NegotiationResult,
}

pub(super) struct SessionWorker {
    config: Arc<ConnectionConfig>,
    settings: SessionSettings,
    capture: CapturePipeline,
    engine: Box<dyn NegotiationEngine>,
    preview_sinks: Vec<Arc<dyn FrameSink>>,
    events: broadcast::Sender<SessionEvent>,
    shared: Arc<RwLock<SharedState>>,
    negotiation_tx: EventSender,
    state: SessionState,
    session: Option<Session>,
}

impl SessionWorker {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        config: Arc<ConnectionConfig>,
        settings: SessionSettings,
        capture: CapturePipeline,
        engine: Box<dyn NegotiationEngine>,
        preview_sinks: Vec<Arc<dyn FrameSink>>,
        events: broadcast::Sender<SessionEvent>,
        shared: Arc<RwLock<SharedState>>,
        negotiation_tx: EventSender,
    ) -> Self {
        Self {
            config,
            settings,
            capture,
            engine,
            preview_sinks,
            events,
            shared,
            negotiation_tx,
            state: SessionState::Idle,
            session: None,
        }
    }

    /// Process commands until shutdown or until the manager is gone
    pub(super) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut negotiation_rx: mpsc::UnboundedReceiver<(PeerHandle, NegotiationEvent)>,
    ) {
        debug!("Session worker started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Start { preferred, reply }) => {
                        let _ = reply.send(self.start(preferred).await);
                    }
                    Some(Command::ApplyAnswer { session_id, answer, reply }) => {
                        let _ = reply.send(self.apply_answer(session_id, answer).await);
                    }
                    Some(Command::Stop { reply }) => {
                        self.stop().await;
                        let _ = reply.send(());
                    }
                    Some(Command::Shutdown { reply }) => {
                        self.stop().await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.stop().await;
                        break;
                    }
                },
                Some((peer, event)) = negotiation_rx.recv() => {
                    self.on_negotiation_event(peer, event).await;
                }
            }
        }
    }

    async fn start(&mut self, preferred: Option<Facing>) -> Result<ConnectionDescriptor> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Closed => self.reset(),
            SessionState::Failed(_) => {
                return Err(SessionError::invalid("start", &self.state).into());
            }
            _ => return Err(SessionError::AlreadyActive.into()),
        }

        let id = SessionId::generate();
        let created_at = SystemTime::now();
        {
            let mut shared = self.shared.write();
            shared.session_id = Some(id.clone());
            shared.created_at = Some(created_at);
            shared.descriptor = None;
        }
        self.session = Some(Session {
            id: id.clone(),
            peer: None,
            capture: None,
            negotiation: NegotiationResult::default(),
        });

        self.transition(SessionState::Initializing);

        match self.bring_up(preferred.or(self.settings.default_facing)).await {
            Ok(descriptor) => Ok(descriptor),
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Initializing → Capturing → OfferCreated
    async fn bring_up(&mut self, preferred: Option<Facing>) -> Result<ConnectionDescriptor> {
        let peer = self
            .engine
            .create_peer_connection(&self.config, self.negotiation_tx.clone())
            .await?;
        self.session_mut()?.peer = Some(peer);

        let capture = self.capture.start(preferred)?;
        self.session_mut()?.capture = Some(capture.clone());

        let track_sink = self.engine.bind_local_track(peer, capture.track()).await?;
        self.capture.attach_sink(&capture, track_sink)?;
        for sink in &self.preview_sinks {
            self.capture.attach_sink(&capture, sink.clone())?;
        }

        self.transition(SessionState::Capturing);

        let offer = self.engine.create_offer(peer).await?;

        let id = self.session_mut()?.id.clone();
        let descriptor = ConnectionDescriptor::new(
            id.clone(),
            self.settings.endpoint_hint(id.as_str()),
            Some(offer.0.clone()),
        )?;
        self.session_mut()?.negotiation.set_local(offer);

        self.shared.write().descriptor = Some(descriptor.clone());
        self.transition(SessionState::OfferCreated);
        self.publish(SessionEvent::DescriptorReady {
            descriptor: descriptor.clone(),
        });

        Ok(descriptor)
    }

    async fn apply_answer(&mut self, session_id: Option<SessionId>, answer: SdpAnswer) -> Result<()> {
        if self.state != SessionState::OfferCreated {
            return Err(SessionError::invalid("apply_remote_answer", &self.state).into());
        }

        let session = self.session_mut()?;
        if let Some(remote_id) = session_id.filter(|remote| remote != &session.id) {
            warn!(
                "Ignoring answer for session {} while {} is active",
                remote_id, session.id
            );
            return Err(NegotiationError::AnswerRejected(format!(
                "answer is for session {}, not {}",
                remote_id, session.id
            ))
            .into());
        }

        let Some(peer) = session.peer else {
            return Err(SessionError::invalid("apply_remote_answer", &self.state).into());
        };

        // A garbled answer is refused before anything is committed
        if let Err(reason) = sdp::check_well_formed(answer.as_str()) {
            warn!("Refusing malformed answer for session {}: {}", session.id, reason);
            return Err(NegotiationError::AnswerRejected(reason).into());
        }

        self.transition(SessionState::AwaitingRemote);

        match self
            .engine
            .apply_remote_description(peer, answer.clone())
            .await
        {
            Ok(()) => {
                self.session_mut()?.negotiation.set_remote(answer);
                self.transition(SessionState::Connected);
                Ok(())
            }
            Err(e) => Err(self.fail(e.into()).await),
        }
    }

    async fn stop(&mut self) {
        if self.state == SessionState::Closed {
            debug!("Session already closed");
            return;
        }

        self.release().await;
        self.shared.write().descriptor = None;
        self.transition(SessionState::Closed);
    }

    /// Abort with the reason carried by `err`; returns `err` for the caller
    async fn fail(&mut self, err: PeerlensError) -> PeerlensError {
        error!("Session failed: {}", err);
        self.abort(failure_reason(&err)).await;
        err
    }

    /// Release resources and enter `Failed`
    async fn abort(&mut self, reason: String) {
        self.release().await;
        self.shared.write().descriptor = None;
        self.transition(SessionState::Failed(reason));
    }

    /// Tear down in fixed order: peer connection first, then capture
    async fn release(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if let Some(peer) = session.peer.take() {
            debug!("Releasing peer {} of session {}", peer, session.id);
            self.engine.dispose(peer).await;
        }

        if let Some(capture) = session.capture.take() {
            debug!("Releasing capture {} of session {}", capture.id(), session.id);
            self.capture.stop(&capture);
        }
    }

    /// Drop the closed session so a fresh one can start
    fn reset(&mut self) {
        debug!("Discarding closed session");
        self.session = None;
        self.state = SessionState::Idle;

        let mut shared = self.shared.write();
        shared.state = SessionState::Idle;
        shared.session_id = None;
        shared.created_at = None;
        shared.descriptor = None;
    }

    async fn on_negotiation_event(&mut self, peer: PeerHandle, event: NegotiationEvent) {
        let current = self.session.as_ref().and_then(|s| s.peer);
        if current != Some(peer) {
            trace!("Dropping event from stale peer {}: {:?}", peer, event);
            return;
        }

        debug!("Peer {}: {:?}", peer, event);
        self.publish(SessionEvent::Negotiation {
            event: event.clone(),
        });

        if event == NegotiationEvent::PeerConnectionChanged(PeerConnectionState::Failed)
            && !self.state.is_terminal()
        {
            error!("Peer {} failed", peer);
            self.abort("peer connection failed".to_string()).await;
        }
    }

    /// Apply a state change, log it and publish it
    fn transition(&mut self, to: SessionState) {
        let from = self.state.clone();
        if !from.can_transition_to(&to) {
            error!("Refusing illegal transition {} -> {}", from, to);
            return;
        }

        match self.session.as_ref() {
            Some(session) => info!("Session {}: {} -> {}", session.id, from, to),
            None => info!("Session: {} -> {}", from, to),
        }

        self.state = to.clone();
        self.shared.write().state = to.clone();
        self.publish(SessionEvent::StateChanged { from, to });
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        let state = self.state.clone();
        self.session
            .as_mut()
            .ok_or_else(|| SessionError::invalid("continue", state).into())
    }
}

/// Reason recorded in `Failed`: the payload of the underlying error
fn failure_reason(err: &PeerlensError) -> String {
    match err.root() {
        PeerlensError::Negotiation(
            NegotiationError::FactoryUnavailable(reason)
            | NegotiationError::OfferFailed(reason)
            | NegotiationError::AnswerRejected(reason),
        ) => reason.clone(),
        PeerlensError::Capture(e) => e.to_string(),
        other => other.to_string(),
    }
}
