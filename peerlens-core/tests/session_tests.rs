//! Integration tests for the session manager
//!
//! Every test drives a real [`SessionManager`] (dedicated worker thread and
//! all) against fake capture and negotiation collaborators.

mod mocks;

use mocks::{
    create_test_frame, inject_event, Call, CallLog, FakeCaptureBackend, FakeNegotiationEngine,
    FAKE_ANSWER, FAKE_OFFER,
};
use peerlens_core::capture::FrameCounter;
use peerlens_core::descriptor::ConnectionDescriptor;
use peerlens_core::error::{CaptureError, DecodeError, NegotiationError, PeerlensError, SessionError};
use peerlens_core::negotiation::{NegotiationEvent, PeerConnectionState};
use peerlens_core::session::{SessionEvent, SessionManager, SessionState};
use peerlens_core::types::{Facing, SdpAnswer, SessionId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn manager(backend: FakeCaptureBackend, engine: FakeNegotiationEngine) -> SessionManager {
    SessionManager::builder()
        .capture_backend(backend)
        .negotiation_engine(engine)
        .build()
        .expect("Failed to build session manager")
}

fn default_manager(log: &CallLog) -> SessionManager {
    manager(
        FakeCaptureBackend::front_and_back(log.clone()),
        FakeNegotiationEngine::new(log.clone()),
    )
}

/// States entered so far, in order
fn drain_states(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionState> {
    let mut states = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SessionEvent::StateChanged { to, .. } = event {
            states.push(to);
        }
    }
    states
}

/// Wait for the session to enter `target`
async fn wait_for_state(rx: &mut broadcast::Receiver<SessionEvent>, target: &SessionState) {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(SessionEvent::StateChanged { to, .. }) if &to == target => return,
                Ok(_) => {}
                Err(e) => panic!("Event stream ended: {}", e),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("Timed out waiting for state");
}

fn answer_payload(session_id: &SessionId) -> String {
    ConnectionDescriptor::new(
        session_id.clone(),
        format!("https://remote.local/connect?id={}", session_id),
        Some(FAKE_ANSWER.to_string()),
    )
    .expect("Should build descriptor")
    .encode()
}

#[tokio::test]
async fn test_start_produces_descriptor() {
    let log = CallLog::new();
    let manager = default_manager(&log);
    let mut events = manager.subscribe();

    let descriptor = manager
        .start_session(Some(Facing::Front))
        .await
        .expect("Session should start");

    assert_eq!(manager.state(), SessionState::OfferCreated);
    assert_eq!(descriptor.offer_sdp(), Some(FAKE_OFFER));
    assert!(descriptor.session_id().as_str().starts_with("sess_"));
    assert_eq!(
        descriptor.endpoint_hint(),
        format!("https://peerlens.local/connect?id={}", descriptor.session_id())
    );
    assert_eq!(manager.connection_descriptor(), Some(descriptor.clone()));

    assert_eq!(
        drain_states(&mut events),
        vec![
            SessionState::Initializing,
            SessionState::Capturing,
            SessionState::OfferCreated,
        ]
    );

    // Front camera was requested and is available
    assert!(log.calls().contains(&Call::OpenDevice("front-1".to_string())));
    assert!(log.calls().contains(&Call::BindTrack("local_video".to_string())));

    manager.dispose().await;
}

#[tokio::test]
async fn test_descriptor_unavailable_before_offer() {
    let log = CallLog::new();
    let manager = default_manager(&log);

    assert_eq!(manager.state(), SessionState::Idle);
    assert!(manager.connection_descriptor().is_none());

    let snapshot = manager.snapshot();
    assert!(snapshot.session_id.is_none());
    assert!(!snapshot.descriptor_available);

    manager.dispose().await;
}

#[tokio::test]
async fn test_front_requested_only_back_available() {
    let log = CallLog::new();
    let manager = manager(
        FakeCaptureBackend::back_only(log.clone()),
        FakeNegotiationEngine::new(log.clone()),
    );
    let mut events = manager.subscribe();

    manager
        .start_session(Some(Facing::Front))
        .await
        .expect("Should fall back to the back camera");

    let states = drain_states(&mut events);
    assert!(states.contains(&SessionState::Capturing));
    assert!(!states.iter().any(|s| matches!(s, SessionState::Failed(_))));
    assert_eq!(log.count(&Call::OpenDevice("back-0".to_string())), 1);

    manager.dispose().await;
}

#[tokio::test]
async fn test_offer_failure_fails_session() {
    let log = CallLog::new();
    let manager = manager(
        FakeCaptureBackend::front_and_back(log.clone()),
        FakeNegotiationEngine::new(log.clone()).failing_offer("ice-failure"),
    );

    let err = manager
        .start_session(None)
        .await
        .expect_err("Offer failure should abort start");
    assert!(matches!(
        err,
        PeerlensError::Negotiation(NegotiationError::OfferFailed(ref reason)) if reason == "ice-failure"
    ));
    assert_eq!(manager.state(), SessionState::Failed("ice-failure".to_string()));
    assert!(manager.connection_descriptor().is_none());

    // Resources were released on failure, peer before device
    let dispose = log.position(|c| *c == Call::DisposePeer).expect("Peer not disposed");
    let stop = log
        .position(|c| matches!(c, Call::StopDevice(_)))
        .expect("Device not stopped");
    assert!(dispose < stop);

    manager.stop_session().await;
    assert_eq!(manager.state(), SessionState::Closed);

    manager.dispose().await;
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let log = CallLog::new();
    let manager = default_manager(&log);
    manager.start_session(None).await.expect("Session should start");
    let mut events = manager.subscribe();

    manager.stop_session().await;
    assert_eq!(manager.state(), SessionState::Closed);

    manager.stop_session().await;
    assert_eq!(manager.state(), SessionState::Closed);

    assert_eq!(drain_states(&mut events), vec![SessionState::Closed]);
    assert_eq!(log.count(&Call::DisposePeer), 1);
    assert_eq!(log.count(&Call::StopDevice("front-1".to_string())), 1);

    manager.dispose().await;
}

#[tokio::test]
async fn test_stop_from_idle_closes() {
    let log = CallLog::new();
    let manager = default_manager(&log);

    manager.stop_session().await;
    assert_eq!(manager.state(), SessionState::Closed);
    assert!(log.calls().is_empty());

    manager.dispose().await;
}

#[tokio::test]
async fn test_second_start_rejected_while_active() {
    let log = CallLog::new();
    let manager = default_manager(&log);
    let first = manager.start_session(None).await.expect("Session should start");
    let before = manager.snapshot();

    let err = manager
        .start_session(Some(Facing::Back))
        .await
        .expect_err("Second start must be rejected");
    assert!(matches!(err, PeerlensError::Session(SessionError::AlreadyActive)));

    let after = manager.snapshot();
    assert_eq!(after, before);
    assert_eq!(after.session_id.as_ref(), Some(first.session_id()));
    assert_eq!(log.count(&Call::CreatePeer), 1);

    manager.dispose().await;
}

#[tokio::test]
async fn test_start_from_failed_requires_stop() {
    let log = CallLog::new();
    let manager = manager(
        FakeCaptureBackend::new(Vec::new(), log.clone()),
        FakeNegotiationEngine::new(log.clone()),
    );

    let err = manager.start_session(None).await.expect_err("No devices");
    assert!(matches!(err, PeerlensError::Capture(CaptureError::NoDeviceAvailable)));
    assert!(matches!(manager.state(), SessionState::Failed(_)));

    let err = manager.start_session(None).await.expect_err("Failed is sticky");
    assert!(matches!(
        err,
        PeerlensError::Session(SessionError::InvalidTransition { operation: "start", .. })
    ));

    manager.stop_session().await;
    assert_eq!(manager.state(), SessionState::Closed);

    manager.dispose().await;
}

#[tokio::test]
async fn test_restart_after_close_uses_new_session() {
    let log = CallLog::new();
    let manager = default_manager(&log);

    let first = manager.start_session(None).await.expect("First start");
    manager.stop_session().await;
    let second = manager.start_session(None).await.expect("Second start");

    assert_ne!(first.session_id(), second.session_id());
    assert_eq!(manager.state(), SessionState::OfferCreated);
    assert_eq!(log.count(&Call::CreatePeer), 2);

    manager.dispose().await;
}

#[tokio::test]
async fn test_teardown_releases_peer_before_capture() {
    let log = CallLog::new();
    let manager = default_manager(&log);
    manager.start_session(None).await.expect("Session should start");

    manager.dispose().await;

    let calls = log.calls();
    let dispose = calls
        .iter()
        .position(|c| *c == Call::DisposePeer)
        .expect("Peer not disposed");
    let stop = calls
        .iter()
        .position(|c| matches!(c, Call::StopDevice(_)))
        .expect("Device not stopped");
    assert!(dispose < stop, "Teardown order was {:?}", calls);
}

#[tokio::test]
async fn test_start_order_peer_capture_offer() {
    let log = CallLog::new();
    let manager = default_manager(&log);
    manager.start_session(Some(Facing::Back)).await.expect("Session should start");

    assert_eq!(
        log.calls(),
        vec![
            Call::CreatePeer,
            Call::OpenDevice("back-0".to_string()),
            Call::StartDevice("back-0".to_string()),
            Call::BindTrack("local_video".to_string()),
            Call::CreateOffer,
        ]
    );

    manager.dispose().await;
}

#[tokio::test]
async fn test_remote_payload_connects() {
    let log = CallLog::new();
    let manager = default_manager(&log);
    let mut events = manager.subscribe();
    let descriptor = manager.start_session(None).await.expect("Session should start");

    manager
        .accept_remote_payload(&answer_payload(descriptor.session_id()))
        .await
        .expect("Answer should apply");

    assert_eq!(manager.state(), SessionState::Connected);
    assert_eq!(log.count(&Call::ApplyRemote), 1);

    let states = drain_states(&mut events);
    let offer = states
        .iter()
        .position(|s| *s == SessionState::OfferCreated)
        .expect("OfferCreated never emitted");
    let connected = states
        .iter()
        .position(|s| *s == SessionState::Connected)
        .expect("Connected never emitted");
    assert!(offer < connected);
    assert_eq!(states[connected - 1], SessionState::AwaitingRemote);

    // Descriptor stays readable while connected
    assert_eq!(manager.connection_descriptor(), Some(descriptor));

    manager.dispose().await;
}

#[tokio::test]
async fn test_payload_for_other_session_rejected() {
    let log = CallLog::new();
    let manager = default_manager(&log);
    manager.start_session(None).await.expect("Session should start");

    let err = manager
        .accept_remote_payload(&answer_payload(&SessionId::new("sess_someoneelse")))
        .await
        .expect_err("Mismatched session must be rejected");
    assert!(matches!(
        err,
        PeerlensError::Negotiation(NegotiationError::AnswerRejected(_))
    ));
    assert_eq!(manager.state(), SessionState::OfferCreated);
    assert_eq!(log.count(&Call::ApplyRemote), 0);

    manager.dispose().await;
}

#[tokio::test]
async fn test_undecodable_payload_leaves_session_alone() {
    let log = CallLog::new();
    let manager = default_manager(&log);
    manager.start_session(None).await.expect("Session should start");

    let err = manager
        .accept_remote_payload("not a descriptor")
        .await
        .expect_err("Garbage must not decode");
    assert!(matches!(err, PeerlensError::Decode(DecodeError::Malformed(_))));

    let err = manager
        .accept_remote_payload("v9|sess_x|https://host")
        .await
        .expect_err("Unknown version");
    assert!(matches!(
        err,
        PeerlensError::Decode(DecodeError::UnsupportedVersion(_))
    ));

    assert_eq!(manager.state(), SessionState::OfferCreated);

    manager.dispose().await;
}

#[tokio::test]
async fn test_substrate_rejection_fails_session() {
    let log = CallLog::new();
    let manager = manager(
        FakeCaptureBackend::front_and_back(log.clone()),
        FakeNegotiationEngine::new(log.clone()).rejecting_answer("fingerprint mismatch"),
    );
    manager.start_session(None).await.expect("Session should start");

    let err = manager
        .apply_remote_answer(SdpAnswer(FAKE_ANSWER.to_string()))
        .await
        .expect_err("Answer should be rejected");
    assert!(matches!(
        err,
        PeerlensError::Negotiation(NegotiationError::AnswerRejected(_))
    ));
    assert_eq!(
        manager.state(),
        SessionState::Failed("fingerprint mismatch".to_string())
    );

    manager.stop_session().await;
    assert_eq!(manager.state(), SessionState::Closed);

    manager.dispose().await;
}

#[tokio::test]
async fn test_malformed_answer_keeps_offer() {
    let log = CallLog::new();
    let manager = default_manager(&log);
    let descriptor = manager.start_session(None).await.expect("Session should start");
    let mut events = manager.subscribe();

    let garbled = ConnectionDescriptor::new(
        descriptor.session_id().clone(),
        "https://remote.local/connect",
        Some("hello".to_string()),
    )
    .expect("Should build descriptor")
    .encode();

    let err = manager
        .accept_remote_payload(&garbled)
        .await
        .expect_err("Garbage SDP should be refused");
    assert!(matches!(
        err,
        PeerlensError::Negotiation(NegotiationError::AnswerRejected(_))
    ));
    assert_eq!(manager.state(), SessionState::OfferCreated);
    assert_eq!(manager.connection_descriptor(), Some(descriptor.clone()));
    assert_eq!(log.count(&Call::ApplyRemote), 0);
    assert!(events.try_recv().is_err(), "No transition should be published");

    // The session still accepts the real answer afterwards
    manager
        .accept_remote_payload(&answer_payload(descriptor.session_id()))
        .await
        .expect("Valid answer should apply");
    assert_eq!(manager.state(), SessionState::Connected);

    manager.dispose().await;
}

#[tokio::test]
async fn test_answer_before_offer_is_invalid() {
    let log = CallLog::new();
    let manager = default_manager(&log);

    let err = manager
        .apply_remote_answer(SdpAnswer(FAKE_ANSWER.to_string()))
        .await
        .expect_err("No offer yet");
    assert!(matches!(
        err,
        PeerlensError::Session(SessionError::InvalidTransition { .. })
    ));
    assert_eq!(manager.state(), SessionState::Idle);

    manager.dispose().await;
}

#[tokio::test]
async fn test_factory_failure_fails_session() {
    let log = CallLog::new();
    let manager = manager(
        FakeCaptureBackend::front_and_back(log.clone()),
        FakeNegotiationEngine::new(log.clone()).unavailable("no codecs"),
    );

    let err = manager.start_session(None).await.expect_err("Factory is down");
    assert!(matches!(
        err,
        PeerlensError::Negotiation(NegotiationError::FactoryUnavailable(_))
    ));
    assert_eq!(manager.state(), SessionState::Failed("no codecs".to_string()));

    // Capture is never touched when no peer exists
    assert!(log.position(|c| matches!(c, Call::OpenDevice(_))).is_none());

    manager.dispose().await;
}

#[tokio::test]
async fn test_device_start_failure_releases_peer() {
    let log = CallLog::new();
    let manager = manager(
        FakeCaptureBackend::front_and_back(log.clone()).failing_start(),
        FakeNegotiationEngine::new(log.clone()),
    );

    let err = manager.start_session(None).await.expect_err("Device is busy");
    assert!(matches!(
        err,
        PeerlensError::Capture(CaptureError::DeviceInitFailed(_))
    ));
    assert!(matches!(manager.state(), SessionState::Failed(_)));
    assert_eq!(log.count(&Call::DisposePeer), 1);

    manager.dispose().await;
}

#[tokio::test]
async fn test_negotiation_events_are_forwarded() {
    let log = CallLog::new();
    let engine = FakeNegotiationEngine::new(log.clone());
    let channel = engine.event_channel();
    let manager = manager(FakeCaptureBackend::front_and_back(log.clone()), engine);
    manager.start_session(None).await.expect("Session should start");

    let mut events = manager.subscribe();
    inject_event(&channel, NegotiationEvent::LocalCandidate("candidate:1 1 udp 1 10.0.0.2 5000 typ host".into()));

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("Timed out")
        .expect("Event stream closed");
    assert!(matches!(
        event,
        SessionEvent::Negotiation { event: NegotiationEvent::LocalCandidate(_) }
    ));

    manager.dispose().await;
}

#[tokio::test]
async fn test_peer_failure_fails_session() {
    let log = CallLog::new();
    let engine = FakeNegotiationEngine::new(log.clone());
    let channel = engine.event_channel();
    let manager = manager(FakeCaptureBackend::front_and_back(log.clone()), engine);
    manager.start_session(None).await.expect("Session should start");

    let mut events = manager.subscribe();
    inject_event(
        &channel,
        NegotiationEvent::PeerConnectionChanged(PeerConnectionState::Failed),
    );

    let failed = SessionState::Failed("peer connection failed".to_string());
    wait_for_state(&mut events, &failed).await;
    assert_eq!(manager.state(), failed);
    assert_eq!(log.count(&Call::DisposePeer), 1);

    manager.dispose().await;
}

#[tokio::test]
async fn test_preview_sink_receives_frames() {
    let log = CallLog::new();
    let backend = FakeCaptureBackend::front_and_back(log.clone());
    let senders = backend.frame_senders();
    let engine = FakeNegotiationEngine::new(log.clone());
    let track_sink = engine.track_sink();
    let preview = Arc::new(FrameCounter::new());

    let manager = SessionManager::builder()
        .capture_backend(backend)
        .negotiation_engine(engine)
        .preview_sink(preview.clone())
        .build()
        .expect("Failed to build session manager");
    manager.start_session(None).await.expect("Session should start");

    let sender = senders.lock().first().cloned().expect("Device never started");
    for sequence in 0..3 {
        sender.send(Arc::new(create_test_frame(sequence))).expect("No sinks attached");
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while preview.count() < 3 || track_sink.count() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Sinks did not receive frames");
    assert_eq!(preview.last_sequence(), 2);

    manager.dispose().await;
}

#[tokio::test]
async fn test_calls_after_dispose_fail() {
    let log = CallLog::new();
    let manager = default_manager(&log);
    manager.start_session(None).await.expect("Session should start");

    manager.dispose().await;
    assert_eq!(manager.state(), SessionState::Closed);

    let err = manager.start_session(None).await.expect_err("Worker is gone");
    assert!(matches!(err, PeerlensError::WorkerGone));

    // Still must not fail
    manager.stop_session().await;
    manager.dispose().await;
}

#[tokio::test]
async fn test_drop_does_not_stall_runtime() {
    let log = CallLog::new();
    let manager = manager(
        FakeCaptureBackend::front_and_back(log.clone()),
        FakeNegotiationEngine::new(log.clone()).slow_dispose(Duration::from_millis(500)),
    );
    manager.start_session(None).await.expect("Session should start");

    let started = std::time::Instant::now();
    drop(manager);
    assert!(
        started.elapsed() < Duration::from_millis(250),
        "Drop blocked for {:?}",
        started.elapsed()
    );

    // The worker still tears the session down in the background
    tokio::time::timeout(Duration::from_secs(5), async {
        while log.count(&Call::DisposePeer) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Peer was never disposed");
}

#[tokio::test]
async fn test_dispose_lets_other_tasks_run() {
    let log = CallLog::new();
    let manager = manager(
        FakeCaptureBackend::front_and_back(log.clone()),
        FakeNegotiationEngine::new(log.clone()).slow_dispose(Duration::from_millis(200)),
    );
    manager.start_session(None).await.expect("Session should start");

    let ticks = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let ticker = {
        let ticks = ticks.clone();
        tokio::spawn(async move {
            loop {
                ticks.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
    };

    manager.dispose().await;
    ticker.abort();

    assert!(ticks.load(std::sync::atomic::Ordering::Relaxed) >= 5);
    assert_eq!(log.count(&Call::DisposePeer), 1);
}
