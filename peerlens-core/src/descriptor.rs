//! Connection descriptor codec
//!
//! The descriptor is the out-of-band pairing payload carried by a scannable
//! code. Wire format, one line:
//!
//! ```text
//! v1|<session id>|<endpoint hint>[|<offer sdp, base64url without padding>]
//! ```
//!
//! In the session id and endpoint hint, `%`, `|`, whitespace and control
//! characters are percent-encoded byte by byte (`%25`, `%7C`, `%20`, `%0A`,
//! ...). Everything else is carried verbatim so the common case stays
//! readable in a QR code, and the payload never contains a line break or
//! edge whitespace a scanner could eat.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Serialize;

use crate::error::DecodeError;
use crate::types::SessionId;

/// Current wire version tag
pub const VERSION_TAG: &str = "v1";

const FIELD_SEPARATOR: char = '|';

/// Out-of-band pairing payload
///
/// Immutable; a new descriptor is built for every session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionDescriptor {
    session_id: SessionId,
    endpoint_hint: String,
    offer_sdp: Option<String>,
}

impl ConnectionDescriptor {
    /// Build a descriptor
    ///
    /// The session id and endpoint hint must be non-empty.
    pub fn new(
        session_id: SessionId,
        endpoint_hint: impl Into<String>,
        offer_sdp: Option<String>,
    ) -> Result<Self, DecodeError> {
        let endpoint_hint = endpoint_hint.into();
        if session_id.as_str().is_empty() {
            return Err(DecodeError::Malformed("empty session id".to_string()));
        }
        if endpoint_hint.is_empty() {
            return Err(DecodeError::Malformed("empty endpoint hint".to_string()));
        }

        Ok(Self {
            session_id,
            endpoint_hint,
            offer_sdp,
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn endpoint_hint(&self) -> &str {
        &self.endpoint_hint
    }

    /// SDP carried by the descriptor, if negotiation has produced one
    pub fn offer_sdp(&self) -> Option<&str> {
        self.offer_sdp.as_deref()
    }

    /// Encode to the single-line wire form
    pub fn encode(&self) -> String {
        encode(self)
    }
}

/// Encode a descriptor. Deterministic and lossless.
pub fn encode(descriptor: &ConnectionDescriptor) -> String {
    let mut payload = String::with_capacity(
        VERSION_TAG.len()
            + descriptor.session_id.as_str().len()
            + descriptor.endpoint_hint.len()
            + descriptor.offer_sdp.as_ref().map_or(0, |s| s.len() * 4 / 3 + 4)
            + 3,
    );

    payload.push_str(VERSION_TAG);
    payload.push(FIELD_SEPARATOR);
    payload.push_str(&escape(descriptor.session_id.as_str()));
    payload.push(FIELD_SEPARATOR);
    payload.push_str(&escape(&descriptor.endpoint_hint));

    if let Some(sdp) = &descriptor.offer_sdp {
        payload.push(FIELD_SEPARATOR);
        payload.push_str(&URL_SAFE_NO_PAD.encode(sdp.as_bytes()));
    }

    payload
}

/// Decode a payload produced by [`encode`]
pub fn decode(payload: &str) -> Result<ConnectionDescriptor, DecodeError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(DecodeError::Malformed("empty payload".to_string()));
    }

    let fields: Vec<&str> = payload.split(FIELD_SEPARATOR).collect();

    let version = fields[0];
    if version != VERSION_TAG {
        return if is_version_tag(version) {
            Err(DecodeError::UnsupportedVersion(version.to_string()))
        } else {
            Err(DecodeError::Malformed(format!(
                "missing version tag, found {:?}",
                truncate(version)
            )))
        };
    }

    if !(3..=4).contains(&fields.len()) {
        return Err(DecodeError::Malformed(format!(
            "expected 3 or 4 fields, found {}",
            fields.len()
        )));
    }

    let session_id = unescape(fields[1])?;
    let endpoint_hint = unescape(fields[2])?;

    let offer_sdp = match fields.get(3) {
        Some(encoded) => Some(decode_sdp(encoded)?),
        None => None,
    };

    ConnectionDescriptor::new(SessionId::new(session_id), endpoint_hint, offer_sdp)
}

/// `v` followed by at least one digit
fn is_version_tag(field: &str) -> bool {
    field
        .strip_prefix('v')
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
}

fn decode_sdp(encoded: &str) -> Result<String, DecodeError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| DecodeError::Malformed(format!("offer is not base64url: {}", e)))?;

    String::from_utf8(bytes)
        .map_err(|_| DecodeError::Malformed("offer is not valid UTF-8".to_string()))
}

fn escape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut buf = [0u8; 4];
    for c in field.chars() {
        if needs_escape(c) {
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{:02X}", byte));
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn needs_escape(c: char) -> bool {
    c == '%' || c == FIELD_SEPARATOR || c.is_whitespace() || c.is_control()
}

fn unescape(field: &str) -> Result<String, DecodeError> {
    let invalid = || DecodeError::Malformed(format!("invalid escape sequence in {:?}", truncate(field)));

    let mut out = Vec::with_capacity(field.len());
    let mut bytes = field.bytes();
    while let Some(byte) = bytes.next() {
        if byte != b'%' {
            out.push(byte);
            continue;
        }
        let hi = bytes.next().and_then(hex_value).ok_or_else(invalid)?;
        let lo = bytes.next().and_then(hex_value).ok_or_else(invalid)?;
        out.push((hi << 4) | lo);
    }

    String::from_utf8(out)
        .map_err(|_| DecodeError::Malformed("escaped field is not valid UTF-8".to_string()))
}

fn hex_value(byte: u8) -> Option<u8> {
    char::from(byte).to_digit(16).map(|d| d as u8)
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(16) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
