//! HTTP registration endpoints, called by hospitals before opening a channel.

use {
    axum::{
        extract::{State, rejection::JsonRejection},
        http::StatusCode,
        response::{IntoResponse, Json, Response},
    },
    medlink_protocol::HospitalProfile,
    serde_json::Value,
    tracing::{error, warn},
};

use crate::{error::HubError, server::AppState};

/// `{success:false, error}` with a status derived from the hub error.
pub struct ApiError(HubError);

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            HubError::InvalidProfile(_) => (StatusCode::BAD_REQUEST, "Invalid hospital data"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };
        if status.is_server_error() {
            error!(error = %self.0, "registration failed");
        } else {
            warn!(error = %self.0, "registration rejected");
        }
        (
            status,
            Json(serde_json::json!({ "success": false, "error": message })),
        )
            .into_response()
    }
}

/// `POST /register-hospital`
pub(crate) async fn register_hospital(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.map_err(|e| HubError::InvalidProfile(e.body_text()))?;
    let profile = HospitalProfile::from_value(body).map_err(HubError::from)?;
    let stored = state.gateway.register(profile).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Hospital registered successfully",
        "data": stored,
    })))
}

/// `GET /registered-hospitals`
pub(crate) async fn registered_hospitals(State(state): State<AppState>) -> Json<Vec<HospitalProfile>> {
    Json(state.gateway.registered().await)
}
