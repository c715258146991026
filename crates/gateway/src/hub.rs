//! Coordination protocol handler.
//!
//! [`Hub`] owns the directory, the request ledger and the presence channel.
//! Callers serialise access (one lock around the whole hub), so every event
//! is handled to completion before the next one starts. Handlers never
//! await: emission only enqueues frames on per-connection queues.

use std::time::Duration;

use {
    chrono::{DateTime, Utc},
    medlink_protocol::{
        AcceptRequestParams, BROADCAST_GROUP, ChatMessage, ClientEvent, HospitalProfile, Request,
        RequestAccepted, RequestExpired, RequestReceived, RequestSentConfirmation, RequestStatus,
        RequestStatusUpdated, SendMessageParams, SendRequestParams, events, hospital_group,
    },
    tokio::sync::mpsc,
    tracing::{debug, info},
};

use crate::{
    directory::DirectoryStore,
    error::HubError,
    ledger::{Acceptance, RequestLedger},
    presence::PresenceChannel,
    signaling,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct HubOptions {
    /// Emit `request_expired` for each request removed by a sweep.
    pub notify_expired: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    pub connections: usize,
    pub hospitals_registered: usize,
    pub hospitals_online: usize,
    pub active_requests: usize,
}

#[derive(Default)]
pub struct Hub {
    directory: DirectoryStore,
    ledger: RequestLedger,
    presence: PresenceChannel,
    options: HubOptions,
}

impl Hub {
    pub fn new(options: HubOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn directory(&self) -> &DirectoryStore {
        &self.directory
    }

    pub fn ledger(&self) -> &RequestLedger {
        &self.ledger
    }

    pub fn presence(&self) -> &PresenceChannel {
        &self.presence
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.presence.connection_count(),
            hospitals_registered: self.directory.registered_count(),
            hospitals_online: self.directory.online_count(),
            active_requests: self.ledger.len(),
        }
    }

    // ── Registration (HTTP) ──────────────────────────────────────────────

    pub fn register(&mut self, profile: HospitalProfile) -> Result<HospitalProfile, HubError> {
        let stored = self.directory.register(profile)?.clone();
        info!(hospital_id = %stored.id, name = stored.display_name(), "hospital registered");
        Ok(stored)
    }

    pub fn registered(&self) -> Vec<HospitalProfile> {
        self.directory.list_registered()
    }

    // ── Connection lifecycle ─────────────────────────────────────────────

    /// Make a freshly opened transport connection addressable.
    pub fn attach(&mut self, conn_id: &str, sender: mpsc::UnboundedSender<String>) {
        self.presence.attach(conn_id, sender);
    }

    /// Tear down a connection. Returns whether a hospital was bound to it;
    /// only then is the directory re-broadcast.
    pub fn disconnect(&mut self, conn_id: &str) -> bool {
        let binding = self.directory.unbind(conn_id);
        if let Some(binding) = &binding {
            self.presence
                .leave(conn_id, &hospital_group(&binding.profile.id));
            self.presence.leave(conn_id, BROADCAST_GROUP);
        }
        self.presence.detach(conn_id);

        let Some(binding) = binding else {
            return false;
        };
        info!(
            conn_id = %binding.conn_id,
            hospital_id = %binding.profile.id,
            online_secs = (Utc::now() - binding.connected_at).num_seconds(),
            "hospital disconnected"
        );
        self.broadcast_directory();
        true
    }

    // ── Event dispatch ───────────────────────────────────────────────────

    pub fn handle(&mut self, conn_id: &str, event: ClientEvent) -> Result<(), HubError> {
        match event {
            ClientEvent::HospitalConnected(profile) => {
                self.on_hospital_connected(conn_id, profile);
                Ok(())
            },
            ClientEvent::SendRequest(params) => self.on_send_request(conn_id, params),
            ClientEvent::AcceptRequest(params) => self.on_accept_request(conn_id, params),
            ClientEvent::SendMessage(params) => self.on_send_message(conn_id, params),
            ClientEvent::CallInitiate(params) => {
                signaling::relay_call_initiate(&mut self.presence, &params);
                Ok(())
            },
            ClientEvent::CallAccept(params) => {
                let answerer = self.sender_profile(conn_id)?;
                signaling::relay_call_accept(&mut self.presence, &answerer, &params);
                Ok(())
            },
            ClientEvent::CallReject(params) => {
                signaling::relay_call_reject(&mut self.presence, &params);
                Ok(())
            },
        }
    }

    fn on_hospital_connected(&mut self, conn_id: &str, profile: HospitalProfile) {
        info!(conn_id, hospital_id = %profile.id, name = profile.display_name(), "hospital connected");
        let group = hospital_group(&profile.id);
        if let Some(previous) = self.directory.bind(conn_id, profile) {
            let previous_group = hospital_group(&previous.profile.id);
            if previous_group != group {
                self.presence.leave(conn_id, &previous_group);
            }
        }
        self.presence.join(conn_id, &group);
        self.presence.join(conn_id, BROADCAST_GROUP);

        if !self.ledger.is_empty() {
            let snapshot = self.ledger.snapshot();
            self.presence
                .emit_to(conn_id, events::EXISTING_REQUESTS, &snapshot);
        }
        self.broadcast_directory();
    }

    fn on_send_request(&mut self, conn_id: &str, params: SendRequestParams) -> Result<(), HubError> {
        let from = self.sender_profile(conn_id)?;
        let request = Request::from_draft(params.request, from.clone(), Utc::now());
        info!(
            conn_id,
            hospital_id = %from.id,
            request_id = %request.id,
            kind = ?request.kind,
            urgency = ?request.urgency,
            "request received"
        );

        let reached = self.presence.emit_to_group(
            BROADCAST_GROUP,
            events::REQUEST_RECEIVED,
            &RequestReceived {
                request: &request,
                from: &from,
            },
            Some(conn_id),
        );
        self.presence.emit_to(
            conn_id,
            events::REQUEST_SENT_CONFIRMATION,
            &RequestSentConfirmation { request: &request },
        );
        if self.ledger.insert(request).is_some() {
            debug!(conn_id, "request id reused, previous request replaced");
        }
        debug!(reached, active = self.ledger.len(), "request broadcast complete");
        Ok(())
    }

    fn on_accept_request(
        &mut self,
        conn_id: &str,
        params: AcceptRequestParams,
    ) -> Result<(), HubError> {
        let acceptor = self.sender_profile(conn_id)?;
        let request = match self
            .ledger
            .accept(&params.request_id, acceptor.clone(), Utc::now())?
        {
            Acceptance::Accepted(request) => request,
            Acceptance::AlreadyAccepted(request) => {
                debug!(
                    conn_id,
                    request_id = %request.id,
                    "request already accepted, ignoring"
                );
                return Ok(());
            },
        };
        let requester_group = hospital_group(&request.from.id);
        info!(
            conn_id,
            request_id = %request.id,
            requester = %request.from.id,
            acceptor = %acceptor.id,
            "request accepted"
        );

        self.presence.emit_to_group(
            BROADCAST_GROUP,
            events::REQUEST_STATUS_UPDATED,
            &RequestStatusUpdated {
                request_id: &params.request_id,
                status: RequestStatus::Accepted,
                accepted_by: &acceptor,
            },
            None,
        );
        self.presence.emit_to_group(
            &requester_group,
            events::REQUEST_ACCEPTED,
            &RequestAccepted {
                request_id: &params.request_id,
                hospital: &acceptor,
            },
            None,
        );
        Ok(())
    }

    fn on_send_message(&mut self, conn_id: &str, params: SendMessageParams) -> Result<(), HubError> {
        let from = self.sender_profile(conn_id)?;
        let message = ChatMessage::new(params.message, from, Utc::now());
        let reached = self.presence.emit_to_group(
            &hospital_group(&params.to),
            events::MESSAGE_RECEIVED,
            &message,
            None,
        );
        self.presence
            .emit_to(conn_id, events::MESSAGE_SENT_CONFIRMATION, &message);
        debug!(conn_id, to = %params.to, reached, "message relayed");
        Ok(())
    }

    // ── Maintenance ──────────────────────────────────────────────────────

    /// Delete requests older than `retention`. Returns how many were removed.
    pub fn sweep(&mut self, now: DateTime<Utc>, retention: Duration) -> usize {
        let expired = self.ledger.sweep(now, retention);
        if self.options.notify_expired {
            for request_id in &expired {
                self.presence.emit_to_group(
                    BROADCAST_GROUP,
                    events::REQUEST_EXPIRED,
                    &RequestExpired { request_id },
                    None,
                );
            }
        }
        if !expired.is_empty() {
            info!(removed = expired.len(), active = self.ledger.len(), "expired requests swept");
        }
        expired.len()
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn sender_profile(&self, conn_id: &str) -> Result<HospitalProfile, HubError> {
        self.directory
            .binding_for(conn_id)
            .map(|b| b.profile.clone())
            .ok_or_else(|| HubError::UnknownConnection(conn_id.to_string()))
    }

    fn broadcast_directory(&mut self) {
        let entries = self.directory.compute_directory();
        let reached = self
            .presence
            .emit_to_all(events::HOSPITALS_UPDATED, &entries);
        debug!(hospitals = entries.len(), reached, "directory broadcast");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        medlink_protocol::{ClientFrame, EventFrame},
        serde_json::{Value, json},
    };

    struct Client {
        conn_id: String,
        rx: mpsc::UnboundedReceiver<String>,
    }

    impl Client {
        fn frames(&mut self) -> Vec<EventFrame> {
            let mut out = Vec::new();
            while let Ok(raw) = self.rx.try_recv() {
                out.push(serde_json::from_str(&raw).unwrap());
            }
            out
        }

        fn events(&mut self) -> Vec<String> {
            self.frames().into_iter().map(|f| f.event).collect()
        }
    }

    fn open(hub: &mut Hub, conn_id: &str) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        hub.attach(conn_id, tx);
        Client {
            conn_id: conn_id.to_string(),
            rx,
        }
    }

    fn send(hub: &mut Hub, client: &Client, event: &str, payload: Value) -> Result<(), HubError> {
        let event = ClientEvent::from_frame(ClientFrame::new(event, payload)).unwrap();
        hub.handle(&client.conn_id, event)
    }

    fn connect(hub: &mut Hub, conn_id: &str, profile: Value) -> Client {
        hub.register(HospitalProfile::from_value(profile.clone()).unwrap())
            .unwrap();
        let client = open(hub, conn_id);
        send(hub, &client, events::HOSPITAL_CONNECTED, profile).unwrap();
        client
    }

    fn find<'a>(frames: &'a [EventFrame], event: &str) -> &'a EventFrame {
        frames
            .iter()
            .find(|f| f.event == event)
            .unwrap_or_else(|| panic!("no {event} frame in {frames:?}"))
    }

    #[test]
    fn request_broadcast_and_acceptance_scenario() {
        let mut hub = Hub::default();
        let mut a = connect(&mut hub, "conn-a", json!({ "id": "H1", "name": "Alpha" }));
        let mut b = connect(&mut hub, "conn-b", json!({ "id": "H2" }));
        a.frames();
        b.frames();

        send(&mut hub, &a, events::SEND_REQUEST, json!({
            "to": "broadcast",
            "request": { "id": "req1", "type": "blood", "urgency": "high" },
        }))
        .unwrap();

        let b_frames = b.frames();
        assert_eq!(b_frames.len(), 1);
        let received = find(&b_frames, events::REQUEST_RECEIVED);
        assert_eq!(received.payload["from"]["id"], json!("H1"));
        assert_eq!(received.payload["request"]["from"]["id"], json!("H1"));
        assert_eq!(received.payload["request"]["status"], json!("pending"));
        assert_eq!(a.events(), vec![events::REQUEST_SENT_CONFIRMATION]);

        send(&mut hub, &b, events::ACCEPT_REQUEST, json!({
            "requestId": "req1",
            "to": "H1",
            "hospital": { "id": "H2" },
        }))
        .unwrap();

        let a_frames = a.frames();
        let b_frames = b.frames();
        for frames in [&a_frames, &b_frames] {
            let updated = find(frames, events::REQUEST_STATUS_UPDATED);
            assert_eq!(updated.payload["status"], json!("accepted"));
            assert_eq!(updated.payload["acceptedBy"]["id"], json!("H2"));
        }
        let accepted = find(&a_frames, events::REQUEST_ACCEPTED);
        assert_eq!(accepted.payload["hospital"]["id"], json!("H2"));
        assert_eq!(accepted.payload["requestId"], json!("req1"));
        assert!(!b_frames.iter().any(|f| f.event == events::REQUEST_ACCEPTED));

        let stored = hub.ledger().get(&"req1".into()).unwrap();
        assert_eq!(stored.status(), RequestStatus::Accepted);
    }

    #[test]
    fn second_accept_is_a_silent_no_op() {
        let mut hub = Hub::default();
        let a = connect(&mut hub, "conn-a", json!({ "id": "H1" }));
        let b = connect(&mut hub, "conn-b", json!({ "id": "H2" }));
        let mut c = connect(&mut hub, "conn-c", json!({ "id": "H3" }));

        send(&mut hub, &a, events::SEND_REQUEST, json!({
            "request": { "id": 1717000000000_i64, "type": "organ" },
        }))
        .unwrap();
        send(&mut hub, &b, events::ACCEPT_REQUEST, json!({ "requestId": 1717000000000_i64 }))
            .unwrap();
        c.frames();

        send(&mut hub, &c, events::ACCEPT_REQUEST, json!({ "requestId": 1717000000000_i64 }))
            .unwrap();
        assert!(c.frames().is_empty());
        let stored = hub.ledger().get(&1717000000000_i64.into()).unwrap();
        assert_eq!(stored.accepted_by().map(|h| h.id.as_str()), Some("H2"));
    }

    #[test]
    fn accept_is_addressed_to_stored_requester_not_asserted_target() {
        let mut hub = Hub::default();
        let mut a = connect(&mut hub, "conn-a", json!({ "id": "H1" }));
        let b = connect(&mut hub, "conn-b", json!({ "id": "H2" }));
        let mut c = connect(&mut hub, "conn-c", json!({ "id": "H3" }));

        send(&mut hub, &a, events::SEND_REQUEST, json!({
            "request": { "id": "req1", "type": "emergency" },
        }))
        .unwrap();
        a.frames();
        c.frames();

        send(&mut hub, &b, events::ACCEPT_REQUEST, json!({
            "requestId": "req1",
            "to": "H3",
            "hospital": { "id": "spoofed" },
        }))
        .unwrap();

        let a_frames = a.frames();
        assert_eq!(
            find(&a_frames, events::REQUEST_ACCEPTED).payload["hospital"]["id"],
            json!("H2")
        );
        assert_eq!(c.events(), vec![events::REQUEST_STATUS_UPDATED]);
    }

    #[test]
    fn unknown_request_and_unbound_sender_are_reported() {
        let mut hub = Hub::default();
        let a = connect(&mut hub, "conn-a", json!({ "id": "H1" }));
        let stranger = open(&mut hub, "conn-x");

        let err = send(&mut hub, &a, events::ACCEPT_REQUEST, json!({ "requestId": "gone" }))
            .unwrap_err();
        assert!(matches!(err, HubError::UnknownRequest(_)));

        let err = send(&mut hub, &stranger, events::SEND_REQUEST, json!({
            "request": { "id": "r", "type": "blood" },
        }))
        .unwrap_err();
        assert!(matches!(err, HubError::UnknownConnection(_)));
        assert!(err.is_benign());
        assert!(hub.ledger().is_empty());
    }

    #[test]
    fn same_request_id_from_two_senders_is_last_write_wins() {
        let mut hub = Hub::default();
        let a = connect(&mut hub, "conn-a", json!({ "id": "H1" }));
        let b = connect(&mut hub, "conn-b", json!({ "id": "H2" }));

        for client in [&a, &b] {
            send(&mut hub, client, events::SEND_REQUEST, json!({
                "request": { "id": "dup", "type": "blood" },
            }))
            .unwrap();
        }
        assert_eq!(hub.ledger().len(), 1);
        assert_eq!(hub.ledger().get(&"dup".into()).unwrap().from.id, "H2");
    }

    #[test]
    fn late_joiner_gets_existing_requests_then_directory() {
        let mut hub = Hub::default();
        let a = connect(&mut hub, "conn-a", json!({ "id": "H1" }));
        send(&mut hub, &a, events::SEND_REQUEST, json!({
            "request": { "id": "req1", "type": "blood", "bloodGroup": "AB+" },
        }))
        .unwrap();

        let mut b = connect(&mut hub, "conn-b", json!({ "id": "H2" }));
        let frames = b.frames();
        assert_eq!(frames[0].event, events::EXISTING_REQUESTS);
        assert_eq!(frames[0].payload[0]["bloodGroup"], json!("AB+"));
        assert_eq!(frames[1].event, events::HOSPITALS_UPDATED);
    }

    #[test]
    fn first_joiner_gets_no_existing_requests() {
        let mut hub = Hub::default();
        let mut a = connect(&mut hub, "conn-a", json!({ "id": "H1" }));
        assert_eq!(a.events(), vec![events::HOSPITALS_UPDATED]);
    }

    #[test]
    fn directory_broadcast_tracks_online_state() {
        let mut hub = Hub::default();
        hub.register(HospitalProfile::new("H3")).unwrap();
        let a = connect(&mut hub, "conn-a", json!({ "id": "H1" }));
        let mut b = connect(&mut hub, "conn-b", json!({ "id": "H2" }));
        b.frames();

        assert!(hub.disconnect(&a.conn_id));
        let frames = b.frames();
        let directory = &find(&frames, events::HOSPITALS_UPDATED).payload;
        let online: Vec<(&str, bool)> = directory
            .as_array()
            .unwrap()
            .iter()
            .map(|e| (e["id"].as_str().unwrap(), e["isOnline"].as_bool().unwrap()))
            .collect();
        assert_eq!(online, vec![("H1", false), ("H2", true), ("H3", false)]);
        assert_eq!(hub.registered().len(), 3);
    }

    #[test]
    fn disconnect_without_hospital_connected_is_quiet() {
        let mut hub = Hub::default();
        let mut a = connect(&mut hub, "conn-a", json!({ "id": "H1" }));
        a.frames();
        let stranger = open(&mut hub, "conn-x");

        assert!(!hub.disconnect(&stranger.conn_id));
        assert!(a.frames().is_empty());
        assert_eq!(hub.stats().connections, 1);
    }

    #[test]
    fn anonymous_connection_gets_no_directory_updates() {
        let mut hub = Hub::default();
        let mut anonymous = open(&mut hub, "conn-x");
        let mut a = connect(&mut hub, "conn-a", json!({ "id": "H1" }));

        assert_eq!(a.events(), vec![events::HOSPITALS_UPDATED]);
        assert!(anonymous.frames().is_empty());

        hub.disconnect(&a.conn_id);
        assert!(anonymous.frames().is_empty());
    }

    #[test]
    fn disconnected_connection_leaves_groups() {
        let mut hub = Hub::default();
        let a = connect(&mut hub, "conn-a", json!({ "id": "H1" }));
        let b = connect(&mut hub, "conn-b", json!({ "id": "H2" }));
        hub.disconnect(&b.conn_id);

        assert!(hub.presence().members(&hospital_group("H2")).is_empty());
        assert_eq!(hub.presence().members(BROADCAST_GROUP), vec![a.conn_id.clone()]);
    }

    #[test]
    fn superseded_session_keeps_receiving() {
        let mut hub = Hub::default();
        let mut first = connect(&mut hub, "conn-1", json!({ "id": "H1" }));
        let mut second = connect(&mut hub, "conn-2", json!({ "id": "H1" }));
        let peer = connect(&mut hub, "conn-p", json!({ "id": "H2" }));
        first.frames();
        second.frames();

        send(&mut hub, &peer, events::SEND_MESSAGE, json!({
            "to": "H1",
            "message": { "id": 5, "text": "O- units ready" },
        }))
        .unwrap();
        assert_eq!(first.events(), vec![events::MESSAGE_RECEIVED]);
        assert_eq!(second.events(), vec![events::MESSAGE_RECEIVED]);
        assert_eq!(hub.stats().hospitals_online, 2);
    }

    #[test]
    fn message_is_enriched_and_confirmed() {
        let mut hub = Hub::default();
        let mut a = connect(&mut hub, "conn-a", json!({ "id": "H1", "name": "Alpha" }));
        let mut b = connect(&mut hub, "conn-b", json!({ "id": "H2" }));
        a.frames();
        b.frames();

        send(&mut hub, &a, events::SEND_MESSAGE, json!({
            "to": "H2",
            "message": { "id": 9, "text": "need platelets", "from": { "id": "fake" } },
        }))
        .unwrap();

        let b_frames = b.frames();
        let received = find(&b_frames, events::MESSAGE_RECEIVED);
        assert_eq!(received.payload["text"], json!("need platelets"));
        assert_eq!(received.payload["from"]["id"], json!("H1"));
        assert!(received.payload["timestamp"].is_string());

        let a_frames = a.frames();
        let confirmed = find(&a_frames, events::MESSAGE_SENT_CONFIRMATION);
        assert_eq!(confirmed.payload, received.payload);
    }

    #[test]
    fn call_accept_requires_binding() {
        let mut hub = Hub::default();
        let stranger = open(&mut hub, "conn-x");
        let err = send(&mut hub, &stranger, events::CALL_ACCEPT, json!({ "to": "H1", "signal": {} }))
            .unwrap_err();
        assert!(matches!(err, HubError::UnknownConnection(_)));

        // Initiate and reject are pure relays.
        send(&mut hub, &stranger, events::CALL_INITIATE, json!({ "to": "H1", "signal": {} }))
            .unwrap();
        send(&mut hub, &stranger, events::CALL_REJECT, json!({ "to": "H1" })).unwrap();
    }

    #[test]
    fn sweep_deletes_silently_by_default() {
        let mut hub = Hub::default();
        let mut a = connect(&mut hub, "conn-a", json!({ "id": "H1" }));
        send(&mut hub, &a, events::SEND_REQUEST, json!({
            "request": { "id": "req1", "type": "blood" },
        }))
        .unwrap();
        a.frames();

        let later = Utc::now() + chrono::Duration::hours(25);
        assert_eq!(hub.sweep(later, Duration::from_secs(24 * 60 * 60)), 1);
        assert!(hub.ledger().is_empty());
        assert!(a.frames().is_empty());
    }

    #[test]
    fn sweep_can_notify_expiry() {
        let mut hub = Hub::new(HubOptions {
            notify_expired: true,
        });
        let mut a = connect(&mut hub, "conn-a", json!({ "id": "H1" }));
        send(&mut hub, &a, events::SEND_REQUEST, json!({
            "request": { "id": "req1", "type": "blood" },
        }))
        .unwrap();
        a.frames();

        let later = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(hub.sweep(later, Duration::ZERO), 1);
        let frames = a.frames();
        let expired = find(&frames, events::REQUEST_EXPIRED);
        assert_eq!(expired.payload, json!({ "requestId": "req1" }));
    }
}
