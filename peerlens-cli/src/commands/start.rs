//! Start command - run a session and print its descriptor

use anyhow::{Context, Result};
use clap::Args;
use peerlens_core::{
    capture::{FrameCounter, TestPatternBackend},
    config::ConfigFile,
    session::{SessionEvent, SessionManager, SessionState},
    types::Facing,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Arguments for the start command
#[derive(Args)]
pub struct StartArgs {
    /// Preferred camera (front, back); falls back to the first available
    #[arg(short, long)]
    facing: Option<Facing>,

    /// Base URL for the endpoint hint (overrides the config file)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Print session events as JSON lines
    #[arg(long)]
    events: bool,
}

/// Start a session and keep it alive until Ctrl+C
pub async fn start(args: StartArgs) -> Result<()> {
    println!("Peerlens - Starting Session\n");

    let config = ConfigFile::load_or_default();
    let mut settings = config.session_settings();
    if let Some(endpoint) = args.endpoint {
        settings = settings.with_endpoint_base(endpoint);
    }

    println!("Configuration:");
    println!("  ICE servers: {}", config.ice.servers.join(", "));
    println!("  Endpoint:    {}", settings.endpoint_base);
    println!("  Profile:     {}", settings.profile);
    println!();

    let preview = Arc::new(FrameCounter::new());
    let manager = SessionManager::builder()
        .config(config.connection_config().shared())
        .settings(settings)
        .capture_backend(TestPatternBackend::new(&config.capture.pattern_devices))
        .preview_sink(preview.clone())
        .build()
        .context("Failed to create session manager")?;

    let mut events = manager.subscribe();

    let descriptor = match manager.start_session(args.facing).await {
        Ok(descriptor) => descriptor,
        Err(e) => {
            if let Some(hint) = e.user_hint() {
                eprintln!("Hint: {}", hint);
            }
            manager.dispose().await;
            return Err(e).context("Failed to start session");
        }
    };

    println!("Session {} ready.", descriptor.session_id());
    println!("  Endpoint: {}", descriptor.endpoint_hint());
    println!();
    println!("Descriptor payload (render as a code for the remote device):");
    println!("{}", descriptor.encode());
    println!();
    println!("Paste the remote device's payload and press Enter.");
    println!("Press Ctrl+C to stop...\n");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut status = tokio::time::interval(Duration::from_secs(5));
    status.tick().await;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                println!("\nReceived interrupt signal...");
                break;
            }
            line = stdin.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match manager.accept_remote_payload(&line).await {
                    Ok(()) => println!("Remote answer applied."),
                    Err(e) => {
                        eprintln!("Rejected payload: {}", e);
                        if let Some(hint) = e.user_hint() {
                            eprintln!("Hint: {}", hint);
                        }
                    }
                },
                Ok(None) => {
                    debug!("stdin closed");
                    // Keep running until Ctrl+C
                    signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
                    println!("\nReceived interrupt signal...");
                    break;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(event) => {
                    if args.events {
                        println!("{}", serde_json::to_string(&event)?);
                    }
                    if let SessionEvent::StateChanged { to: SessionState::Failed(reason), .. } = &event {
                        eprintln!("Session failed: {}", reason);
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => debug!("Missed {} session events", n),
                Err(RecvError::Closed) => break,
            },
            _ = status.tick() => {
                println!(
                    "  state: {:<14} frames: {}",
                    manager.state().to_string(),
                    preview.count()
                );
            }
        }
    }

    println!("Stopping session...");
    manager.stop_session().await;
    manager.dispose().await;

    println!("Session stopped.");

    Ok(())
}
