//! Wire protocol shared by the hub and its hospital clients.
//!
//! Every WebSocket text frame carries one JSON object:
//! - client → hub: `{"event": "<name>", "payload": <json>}`
//! - hub → client: `{"type": "event", "event": "<name>", "payload": <json>, "seq": n}`
//!
//! Payload field names are camelCase.

pub mod model;

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

pub use model::{
    ChatMessage, DirectoryEntry, HospitalProfile, Request, RequestDraft, RequestId,
    RequestKind, RequestState, RequestStatus, Urgency,
};

pub const PROTOCOL_VERSION: u32 = 1;

/// Group every connected hospital joins.
pub const BROADCAST_GROUP: &str = "all_hospitals";

/// Per-hospital group name.
pub fn hospital_group(hospital_id: &str) -> String {
    format!("hospital:{hospital_id}")
}

pub mod events {
    // Client → hub
    pub const HOSPITAL_CONNECTED: &str = "hospital_connected";
    pub const SEND_REQUEST: &str = "send_request";
    pub const ACCEPT_REQUEST: &str = "accept_request";
    pub const SEND_MESSAGE: &str = "send_message";
    pub const CALL_INITIATE: &str = "call_initiate";
    pub const CALL_ACCEPT: &str = "call_accept";
    pub const CALL_REJECT: &str = "call_reject";

    // Hub → client
    pub const EXISTING_REQUESTS: &str = "existing_requests";
    pub const HOSPITALS_UPDATED: &str = "hospitals_updated";
    pub const REQUEST_RECEIVED: &str = "request_received";
    pub const REQUEST_SENT_CONFIRMATION: &str = "request_sent_confirmation";
    pub const REQUEST_STATUS_UPDATED: &str = "request_status_updated";
    pub const REQUEST_ACCEPTED: &str = "request_accepted";
    pub const REQUEST_EXPIRED: &str = "request_expired";
    pub const MESSAGE_RECEIVED: &str = "message_received";
    pub const MESSAGE_SENT_CONFIRMATION: &str = "message_sent_confirmation";
    pub const CALL_INCOMING: &str = "call_incoming";
    pub const CALL_ACCEPTED: &str = "call_accepted";
    pub const CALL_REJECTED: &str = "call_rejected";
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("invalid profile: {0}")]
    InvalidProfile(&'static str),
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// Raw client → hub frame, before the payload is typed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default, alias = "data")]
    pub payload: Value,
}

impl ClientFrame {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

/// Hub → client event frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub event: String,
    pub payload: Value,
    pub seq: u64,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, payload: Value, seq: u64) -> Self {
        Self {
            frame_type: "event".into(),
            event: event.into(),
            payload,
            seq,
        }
    }
}

// ── Client events ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SendRequestParams {
    /// Always `"broadcast"` in practice; the hub broadcasts regardless.
    #[serde(default)]
    pub to: Option<String>,
    pub request: RequestDraft,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptRequestParams {
    pub request_id: RequestId,
    /// Client-asserted requester id. The stored requester is used instead.
    #[serde(default)]
    pub to: Option<String>,
    /// Client-asserted acceptor. The bound profile is used instead.
    #[serde(default)]
    pub hospital: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageParams {
    pub to: String,
    pub message: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallInitiateParams {
    pub to: String,
    #[serde(default)]
    pub from: Value,
    #[serde(default)]
    pub signal: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallAcceptParams {
    pub to: String,
    #[serde(default)]
    pub signal: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallRejectParams {
    pub to: String,
    #[serde(default)]
    pub from: Value,
}

/// A typed inbound event.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    HospitalConnected(HospitalProfile),
    SendRequest(SendRequestParams),
    AcceptRequest(AcceptRequestParams),
    SendMessage(SendMessageParams),
    CallInitiate(CallInitiateParams),
    CallAccept(CallAcceptParams),
    CallReject(CallRejectParams),
}

impl ClientEvent {
    /// Parse a raw text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let frame: ClientFrame = serde_json::from_str(text)?;
        Self::from_frame(frame)
    }

    pub fn from_frame(frame: ClientFrame) -> Result<Self, ProtocolError> {
        let ClientFrame { event, payload } = frame;
        let parsed = match event.as_str() {
            events::HOSPITAL_CONNECTED => {
                Self::HospitalConnected(HospitalProfile::from_value(payload)?)
            },
            events::SEND_REQUEST => Self::SendRequest(serde_json::from_value(payload)?),
            events::ACCEPT_REQUEST => Self::AcceptRequest(serde_json::from_value(payload)?),
            events::SEND_MESSAGE => Self::SendMessage(serde_json::from_value(payload)?),
            events::CALL_INITIATE => Self::CallInitiate(serde_json::from_value(payload)?),
            events::CALL_ACCEPT => Self::CallAccept(serde_json::from_value(payload)?),
            events::CALL_REJECT => Self::CallReject(serde_json::from_value(payload)?),
            _ => return Err(ProtocolError::UnknownEvent(event)),
        };
        Ok(parsed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::HospitalConnected(_) => events::HOSPITAL_CONNECTED,
            Self::SendRequest(_) => events::SEND_REQUEST,
            Self::AcceptRequest(_) => events::ACCEPT_REQUEST,
            Self::SendMessage(_) => events::SEND_MESSAGE,
            Self::CallInitiate(_) => events::CALL_INITIATE,
            Self::CallAccept(_) => events::CALL_ACCEPT,
            Self::CallReject(_) => events::CALL_REJECT,
        }
    }
}

// ── Hub payloads ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RequestReceived<'a> {
    pub request: &'a Request,
    pub from: &'a HospitalProfile,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestSentConfirmation<'a> {
    pub request: &'a Request,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStatusUpdated<'a> {
    pub request_id: &'a RequestId,
    pub status: RequestStatus,
    pub accepted_by: &'a HospitalProfile,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestAccepted<'a> {
    pub request_id: &'a RequestId,
    pub hospital: &'a HospitalProfile,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestExpired<'a> {
    pub request_id: &'a RequestId,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallIncoming<'a> {
    pub from: &'a Value,
    pub signal: &'a Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallAccepted<'a> {
    pub signal: &'a Value,
    pub hospital: &'a HospitalProfile,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallRejected<'a> {
    pub from: &'a Value,
}
