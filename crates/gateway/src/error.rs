use medlink_protocol::{ProtocolError, RequestId};

/// Failures of a single hub operation.
///
/// None of these end a session: the session loop logs them and moves on to
/// the next frame.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("invalid profile: {0}")]
    InvalidProfile(String),
    #[error("no hospital bound to connection {0}")]
    UnknownConnection(String),
    #[error("unknown request {0}")]
    UnknownRequest(RequestId),
    #[error("malformed event: {0}")]
    Malformed(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ProtocolError> for HubError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidProfile(reason) => Self::InvalidProfile(reason.to_string()),
            other => Self::Malformed(other.to_string()),
        }
    }
}

impl HubError {
    /// Expected outcomes of best-effort delivery rather than faults.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::UnknownConnection(_) | Self::UnknownRequest(_))
    }
}
