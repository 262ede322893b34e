//! Process-wide media runtime
//!
//! The `webrtc` API object (codec registry, interceptors, network settings)
//! is built once and shared by every peer connection in the process. It is
//! reference counted through [`RuntimeGuard`]s: the first
//! [`MediaRuntime::acquire`] initializes it, dropping the last guard shuts
//! it down.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::network_type::NetworkType;
use webrtc::interceptor::registry::Registry;

use crate::config::{ConnectionConfig, TcpCandidatePolicy};
use crate::error::NegotiationError;

struct SharedRuntime {
    api: Arc<API>,
    tcp_candidates: TcpCandidatePolicy,
    guards: usize,
}

static RUNTIME: Mutex<Option<SharedRuntime>> = Mutex::new(None);

/// Entry point to the shared media runtime
pub struct MediaRuntime;

impl MediaRuntime {
    /// Take a reference on the runtime, initializing it if needed
    pub fn acquire(config: &ConnectionConfig) -> Result<RuntimeGuard, NegotiationError> {
        let mut runtime = RUNTIME.lock();

        if let Some(shared) = runtime.as_mut() {
            if shared.tcp_candidates != config.tcp_candidates() {
                warn!(
                    "Media runtime already built with {:?}, ignoring {:?}",
                    shared.tcp_candidates,
                    config.tcp_candidates()
                );
            }
            shared.guards += 1;
            debug!("Media runtime acquired ({} guards)", shared.guards);
            return Ok(RuntimeGuard {
                api: shared.api.clone(),
            });
        }

        let api = Arc::new(build_api(config)?);
        *runtime = Some(SharedRuntime {
            api: api.clone(),
            tcp_candidates: config.tcp_candidates(),
            guards: 1,
        });

        info!("Media runtime initialized");
        Ok(RuntimeGuard { api })
    }

    /// Whether the runtime is currently up
    pub fn is_initialized() -> bool {
        RUNTIME.lock().is_some()
    }

    /// Number of live guards
    pub fn active_guards() -> usize {
        RUNTIME.lock().as_ref().map_or(0, |r| r.guards)
    }
}

/// Keeps the media runtime alive
pub struct RuntimeGuard {
    api: Arc<API>,
}

impl RuntimeGuard {
    /// Shared `webrtc` API used to create peer connections
    pub fn api(&self) -> &API {
        &self.api
    }
}

impl std::fmt::Debug for RuntimeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeGuard").finish_non_exhaustive()
    }
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        let mut runtime = RUNTIME.lock();
        let Some(shared) = runtime.as_mut() else {
            return;
        };

        shared.guards = shared.guards.saturating_sub(1);
        if shared.guards == 0 {
            *runtime = None;
            info!("Media runtime shut down");
        } else {
            debug!("Media runtime released ({} guards left)", shared.guards);
        }
    }
}

fn build_api(config: &ConnectionConfig) -> Result<API, NegotiationError> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().map_err(|e| {
        NegotiationError::FactoryUnavailable(format!("Failed to register codecs: {}", e))
    })?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
        NegotiationError::FactoryUnavailable(format!("Failed to register interceptors: {}", e))
    })?;

    let mut setting_engine = SettingEngine::default();
    if config.tcp_candidates() == TcpCandidatePolicy::Disabled {
        setting_engine.set_network_types(vec![NetworkType::Udp4, NetworkType::Udp6]);
    }

    Ok(APIBuilder::new()
        .with_setting_engine(setting_engine)
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}
