use std::fmt;

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use crate::ProtocolError;

/// Profile keys the hub owns on the wire; client copies are dropped.
const RESERVED_PROFILE_KEYS: &[&str] = &["isOnline", "socketId", "status"];

/// Request keys the hub owns on the wire; client copies are dropped.
const RESERVED_REQUEST_KEYS: &[&str] = &[
    "id",
    "type",
    "urgency",
    "status",
    "from",
    "acceptedBy",
    "acceptedAt",
    "timestamp",
];

/// Message keys the hub owns on the wire; client copies are dropped.
const RESERVED_MESSAGE_KEYS: &[&str] = &["from", "timestamp"];

fn strip_reserved(map: &mut Map<String, Value>, reserved: &[&str]) {
    map.retain(|k, _| !reserved.contains(&k.as_str()));
}

// ── Hospitals ────────────────────────────────────────────────────────────────

/// A hospital as presented at registration or `hospital_connected` time.
///
/// Fields the hub does not know about are kept in `extra` and echoed back
/// verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HospitalProfile {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    /// Usually `{lat, lng}`. Stored and echoed exactly as the client sent it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HospitalProfile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            city: None,
            contact: None,
            location: None,
            extra: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    /// Check the identity and drop hub-owned keys a client may have sent.
    pub fn validated(mut self) -> Result<Self, ProtocolError> {
        if self.id.is_empty() {
            return Err(ProtocolError::InvalidProfile("missing hospital id"));
        }
        strip_reserved(&mut self.extra, RESERVED_PROFILE_KEYS);
        Ok(self)
    }

    /// Parse and validate a profile from an arbitrary JSON value.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        if !value.is_object() {
            return Err(ProtocolError::InvalidProfile("hospital data must be an object"));
        }
        let profile: Self = serde_json::from_value(value)
            .map_err(|_| ProtocolError::InvalidProfile("invalid hospital data"))?;
        profile.validated()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// One row of the `hospitals_updated` directory snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectoryEntry {
    #[serde(flatten)]
    pub profile: HospitalProfile,
    #[serde(rename = "isOnline")]
    pub is_online: bool,
}

// ── Requests ─────────────────────────────────────────────────────────────────

/// Caller-supplied request token. Browser clients send `Date.now()` numbers,
/// others send strings; the JSON type is echoed back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    Text(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Emergency,
    Blood,
    Organ,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
}

/// Lifecycle of a request. `Pending -> Accepted` is the only transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RequestState {
    Pending,
    Accepted {
        #[serde(rename = "acceptedBy")]
        accepted_by: HospitalProfile,
        #[serde(rename = "acceptedAt")]
        accepted_at: DateTime<Utc>,
    },
}

impl RequestState {
    pub fn status(&self) -> RequestStatus {
        match self {
            Self::Pending => RequestStatus::Pending,
            Self::Accepted { .. } => RequestStatus::Accepted,
        }
    }
}

/// A request as sent by a client in `send_request`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RequestDraft {
    pub id: RequestId,
    #[serde(rename = "type")]
    pub kind: RequestKind,
    #[serde(default)]
    pub urgency: Urgency,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl RequestDraft {
    pub fn new(id: impl Into<RequestId>, kind: RequestKind, urgency: Urgency) -> Self {
        Self {
            id: id.into(),
            kind,
            urgency,
            details: Map::new(),
        }
    }
}

/// A request held in the ledger, enriched with the server-side sender
/// snapshot and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub id: RequestId,
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub urgency: Urgency,
    #[serde(flatten)]
    pub state: RequestState,
    pub from: HospitalProfile,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl Request {
    pub fn from_draft(draft: RequestDraft, from: HospitalProfile, now: DateTime<Utc>) -> Self {
        let RequestDraft {
            id,
            kind,
            urgency,
            mut details,
        } = draft;
        strip_reserved(&mut details, RESERVED_REQUEST_KEYS);
        Self {
            id,
            kind,
            urgency,
            state: RequestState::Pending,
            from,
            created_at: now,
            details,
        }
    }

    pub fn status(&self) -> RequestStatus {
        self.state.status()
    }

    pub fn accepted_by(&self) -> Option<&HospitalProfile> {
        match &self.state {
            RequestState::Accepted { accepted_by, .. } => Some(accepted_by),
            RequestState::Pending => None,
        }
    }
}

// ── Messages ─────────────────────────────────────────────────────────────────

/// A chat message relayed between two hospitals. Never stored by the hub.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub from: HospitalProfile,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl ChatMessage {
    pub fn new(mut body: Map<String, Value>, from: HospitalProfile, now: DateTime<Utc>) -> Self {
        strip_reserved(&mut body, RESERVED_MESSAGE_KEYS);
        Self {
            from,
            timestamp: now,
            body,
        }
    }
}
