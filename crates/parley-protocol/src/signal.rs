//! Call signaling messages.
//!
//! Signals travel as JSON inside room broadcasts:
//!
//! ```text
//! { "event": "offer" | "answer" | "ice-candidate" | "leave",
//!   "sdp"?: { "type": "offer", "sdp": "..." },
//!   "candidate"?: { "candidate": "...", "sdpMid": "0", "sdpMLineIndex": 0 } }
//! ```
//!
//! [`SignalPayload`] is the raw wire shape. [`Signal`] is the validated form
//! that the call layer works with.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Signal kinds, named as they appear in the `event` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    Leave,
}

impl SignalKind {
    /// All kinds, in protocol order.
    pub const ALL: [SignalKind; 4] = [
        SignalKind::Offer,
        SignalKind::Answer,
        SignalKind::IceCandidate,
        SignalKind::Leave,
    ];

    /// The wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
            SignalKind::Leave => "leave",
        }
    }

    /// Look up a kind by its wire name.
    #[must_use]
    pub fn from_event(event: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == event)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session description type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// A session description (offer or answer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description type.
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// SDP body.
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description.
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer description.
    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A connectivity (ICE) candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate line.
    pub candidate: String,
    /// Media stream identification tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    /// ICE username fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Create a candidate with only the candidate line set.
    #[must_use]
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }

    /// Set the media line this candidate belongs to.
    #[must_use]
    pub fn with_media(mut self, sdp_mid: impl Into<String>, sdp_m_line_index: u16) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self.sdp_m_line_index = Some(sdp_m_line_index);
        self
    }
}

/// Errors produced while decoding a signal.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Payload is not valid signal JSON.
    #[error("Malformed signal: {0}")]
    Json(#[from] serde_json::Error),

    /// A field required by the signal kind is absent.
    #[error("Signal '{kind}' is missing field '{field}'")]
    MissingField {
        kind: SignalKind,
        field: &'static str,
    },

    /// The session description type does not match the signal kind.
    #[error("Signal '{kind}' carries a {found:?} description")]
    SdpTypeMismatch { kind: SignalKind, found: SdpType },
}

/// Raw signal as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    /// Signal kind.
    pub event: SignalKind,
    /// Session description, for offers and answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<SessionDescription>,
    /// ICE candidate, for candidate signals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidate>,
}

/// A validated signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    Leave,
}

impl Signal {
    /// Get the signal kind.
    #[must_use]
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Offer(_) => SignalKind::Offer,
            Signal::Answer(_) => SignalKind::Answer,
            Signal::IceCandidate(_) => SignalKind::IceCandidate,
            Signal::Leave => SignalKind::Leave,
        }
    }

    /// Encode the signal as wire JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, SignalError> {
        Ok(serde_json::to_vec(&SignalPayload::from(self.clone()))?)
    }

    /// Decode and validate wire JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or a required field is missing.
    pub fn from_json(data: &[u8]) -> Result<Self, SignalError> {
        let payload: SignalPayload = serde_json::from_slice(data)?;
        Signal::try_from(payload)
    }
}

impl From<Signal> for SignalPayload {
    fn from(signal: Signal) -> Self {
        let event = signal.kind();
        let (sdp, candidate) = match signal {
            Signal::Offer(desc) | Signal::Answer(desc) => (Some(desc), None),
            Signal::IceCandidate(c) => (None, Some(c)),
            Signal::Leave => (None, None),
        };
        SignalPayload {
            event,
            sdp,
            candidate,
        }
    }
}

impl TryFrom<SignalPayload> for Signal {
    type Error = SignalError;

    fn try_from(payload: SignalPayload) -> Result<Self, Self::Error> {
        let kind = payload.event;
        let description = |expected: SdpType| match payload.sdp.clone() {
            None => Err(SignalError::MissingField { kind, field: "sdp" }),
            Some(desc) if desc.sdp_type != expected => Err(SignalError::SdpTypeMismatch {
                kind,
                found: desc.sdp_type,
            }),
            Some(desc) => Ok(desc),
        };

        match kind {
            SignalKind::Offer => Ok(Signal::Offer(description(SdpType::Offer)?)),
            SignalKind::Answer => Ok(Signal::Answer(description(SdpType::Answer)?)),
            SignalKind::IceCandidate => payload
                .candidate
                .map(Signal::IceCandidate)
                .ok_or(SignalError::MissingField {
                    kind,
                    field: "candidate",
                }),
            SignalKind::Leave => Ok(Signal::Leave),
        }
    }
}
