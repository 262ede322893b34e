//! Structural SDP checks applied before a remote description is committed

use std::io::Cursor;
use webrtc::sdp::description::session::SessionDescription;

/// Check that `sdp` parses as a session description with at least one
/// media section. Returns the reason on failure.
pub fn check_well_formed(sdp: &str) -> Result<(), String> {
    let trimmed = sdp.trim_start();
    if trimmed.is_empty() {
        return Err("empty session description".to_string());
    }
    if !trimmed.starts_with("v=0") {
        return Err("session description must start with v=0".to_string());
    }

    let parsed = SessionDescription::unmarshal(&mut Cursor::new(trimmed.as_bytes()))
        .map_err(|e| format!("unparsable session description: {}", e))?;

    if parsed.media_descriptions.is_empty() {
        return Err("session description has no media sections".to_string());
    }

    Ok(())
}
