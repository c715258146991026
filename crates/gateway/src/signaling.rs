//! Call signaling relay: forwards call setup payloads to the target
//! hospital's group. Nothing is buffered; if the target has no live
//! connection the frame is dropped and the caller's own timeout applies.

use {
    medlink_protocol::{
        CallAcceptParams, CallAccepted, CallIncoming, CallInitiateParams, CallRejectParams,
        CallRejected, HospitalProfile, events, hospital_group,
    },
    tracing::debug,
};

use crate::presence::PresenceChannel;

pub fn relay_call_initiate(presence: &mut PresenceChannel, params: &CallInitiateParams) -> usize {
    let reached = presence.emit_to_group(
        &hospital_group(&params.to),
        events::CALL_INCOMING,
        &CallIncoming {
            from: &params.from,
            signal: &params.signal,
        },
        None,
    );
    debug!(to = %params.to, reached, "call: initiate relayed");
    reached
}

/// The answering hospital is identified by its bound profile, not by
/// anything in the payload.
pub fn relay_call_accept(
    presence: &mut PresenceChannel,
    answerer: &HospitalProfile,
    params: &CallAcceptParams,
) -> usize {
    let reached = presence.emit_to_group(
        &hospital_group(&params.to),
        events::CALL_ACCEPTED,
        &CallAccepted {
            signal: &params.signal,
            hospital: answerer,
        },
        None,
    );
    debug!(to = %params.to, from = %answerer.id, reached, "call: accept relayed");
    reached
}

pub fn relay_call_reject(presence: &mut PresenceChannel, params: &CallRejectParams) -> usize {
    let reached = presence.emit_to_group(
        &hospital_group(&params.to),
        events::CALL_REJECTED,
        &CallRejected { from: &params.from },
        None,
    );
    debug!(to = %params.to, reached, "call: reject relayed");
    reached
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        medlink_protocol::EventFrame,
        serde_json::json,
        tokio::sync::mpsc,
    };

    fn joined(presence: &mut PresenceChannel, conn_id: &str, hospital_id: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        presence.attach(conn_id, tx);
        presence.join(conn_id, &hospital_group(hospital_id));
        rx
    }

    fn next_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> EventFrame {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[test]
    fn initiate_reaches_target_group_only() {
        let mut p = PresenceChannel::new();
        let mut caller = joined(&mut p, "c1", "H1");
        let mut callee = joined(&mut p, "c2", "H2");

        let params = CallInitiateParams {
            to: "H2".into(),
            from: json!({ "id": "H1" }),
            signal: json!({ "sdp": "offer" }),
        };
        assert_eq!(relay_call_initiate(&mut p, &params), 1);

        let frame = next_frame(&mut callee);
        assert_eq!(frame.event, events::CALL_INCOMING);
        assert_eq!(frame.payload, json!({ "from": { "id": "H1" }, "signal": { "sdp": "offer" } }));
        assert!(caller.try_recv().is_err());
    }

    #[test]
    fn accept_attaches_answerer_profile() {
        let mut p = PresenceChannel::new();
        let mut caller = joined(&mut p, "c1", "H1");
        let params = CallAcceptParams {
            to: "H1".into(),
            signal: json!({ "sdp": "answer" }),
        };
        relay_call_accept(&mut p, &HospitalProfile::new("H2").with_name("Beta"), &params);

        let frame = next_frame(&mut caller);
        assert_eq!(frame.event, events::CALL_ACCEPTED);
        assert_eq!(frame.payload["hospital"]["id"], json!("H2"));
        assert_eq!(frame.payload["signal"], json!({ "sdp": "answer" }));
    }

    #[test]
    fn offline_target_is_silently_dropped() {
        let mut p = PresenceChannel::new();
        let params = CallRejectParams {
            to: "H9".into(),
            from: json!({ "id": "H1" }),
        };
        assert_eq!(relay_call_reject(&mut p, &params), 0);
    }
}
