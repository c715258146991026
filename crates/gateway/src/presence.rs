use std::collections::{HashMap, HashSet};

use {
    medlink_protocol::{BROADCAST_GROUP, EventFrame},
    serde::Serialize,
    tokio::sync::mpsc,
    tracing::{error, trace},
};

/// Group-addressed delivery over the live connections.
///
/// Each connection is represented by the sender half of its outbound frame
/// queue. Emission only enqueues, so it never waits on a slow socket. A
/// closed queue means the peer is gone and the frame is dropped.
#[derive(Default)]
pub struct PresenceChannel {
    /// conn_id → outbound queue
    connections: HashMap<String, mpsc::UnboundedSender<String>>,
    /// group_id → member conn_ids
    groups: HashMap<String, HashSet<String>>,
    /// Monotonically increasing sequence number stamped on every emission.
    seq: u64,
}

impl PresenceChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, conn_id: &str, sender: mpsc::UnboundedSender<String>) {
        self.connections.insert(conn_id.to_string(), sender);
    }

    /// Drop a connection and every group membership it still holds.
    pub fn detach(&mut self, conn_id: &str) -> bool {
        let groups: Vec<String> = self
            .groups
            .iter()
            .filter(|(_, members)| members.contains(conn_id))
            .map(|(group, _)| group.clone())
            .collect();
        for group in groups {
            self.leave(conn_id, &group);
        }
        self.connections.remove(conn_id).is_some()
    }

    pub fn is_attached(&self, conn_id: &str) -> bool {
        self.connections.contains_key(conn_id)
    }

    /// Add a connection to a group. No-op for unknown connections.
    pub fn join(&mut self, conn_id: &str, group: &str) -> bool {
        if !self.is_attached(conn_id) {
            return false;
        }
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(conn_id.to_string())
    }

    pub fn leave(&mut self, conn_id: &str, group: &str) -> bool {
        let Some(members) = self.groups.get_mut(group) else {
            return false;
        };
        let removed = members.remove(conn_id);
        if members.is_empty() {
            self.groups.remove(group);
        }
        removed
    }

    pub fn members(&self, group: &str) -> Vec<String> {
        self.groups
            .get(group)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Deliver to exactly one connection.
    pub fn emit_to<T: Serialize + ?Sized>(&mut self, conn_id: &str, event: &str, payload: &T) -> bool {
        let Some(frame) = self.encode(event, payload) else {
            return false;
        };
        self.deliver(conn_id, &frame)
    }

    /// Deliver to every member of `group` except `exclude`. Membership is
    /// taken as of this call. Returns the number of connections reached.
    pub fn emit_to_group<T: Serialize + ?Sized>(
        &mut self,
        group: &str,
        event: &str,
        payload: &T,
        exclude: Option<&str>,
    ) -> usize {
        let recipients: Vec<String> = self
            .members(group)
            .into_iter()
            .filter(|c| Some(c.as_str()) != exclude)
            .collect();
        if recipients.is_empty() {
            trace!(group, event, "emit: group has no recipients");
            return 0;
        }
        let Some(frame) = self.encode(event, payload) else {
            return 0;
        };
        recipients
            .iter()
            .filter(|c| self.deliver(c, &frame))
            .count()
    }

    /// Deliver to every bound connection. Binding a hospital joins its
    /// connection to [`BROADCAST_GROUP`], so attached but anonymous
    /// connections are not reached.
    pub fn emit_to_all<T: Serialize + ?Sized>(&mut self, event: &str, payload: &T) -> usize {
        self.emit_to_group(BROADCAST_GROUP, event, payload, None)
    }

    fn encode<T: Serialize + ?Sized>(&mut self, event: &str, payload: &T) -> Option<String> {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                error!(event, error = %e, "emit: failed to serialize payload");
                return None;
            },
        };
        self.seq += 1;
        match serde_json::to_string(&EventFrame::new(event, payload, self.seq)) {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!(event, error = %e, "emit: failed to serialize frame");
                None
            },
        }
    }

    fn deliver(&self, conn_id: &str, frame: &str) -> bool {
        match self.connections.get(conn_id) {
            Some(sender) => sender.send(frame.to_string()).is_ok(),
            None => {
                trace!(conn_id, "emit: connection gone");
                false
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn attach(presence: &mut PresenceChannel, conn_id: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        presence.attach(conn_id, tx);
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<EventFrame> {
        let mut frames = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            frames.push(serde_json::from_str(&raw).unwrap());
        }
        frames
    }

    #[test]
    fn group_emit_skips_excluded_sender() {
        let mut p = PresenceChannel::new();
        let mut a = attach(&mut p, "a");
        let mut b = attach(&mut p, "b");
        let mut c = attach(&mut p, "c");
        for conn in ["a", "b", "c"] {
            p.join(conn, "all");
        }

        let reached = p.emit_to_group("all", "ping", &json!({ "n": 1 }), Some("a"));
        assert_eq!(reached, 2);
        assert!(drain(&mut a).is_empty());
        assert_eq!(drain(&mut b)[0].event, "ping");
        assert_eq!(drain(&mut c)[0].payload, json!({ "n": 1 }));
    }

    #[test]
    fn join_and_leave_are_idempotent() {
        let mut p = PresenceChannel::new();
        let _a = attach(&mut p, "a");
        assert!(p.join("a", "g"));
        assert!(!p.join("a", "g"));
        assert_eq!(p.members("g"), vec!["a".to_string()]);
        assert!(p.leave("a", "g"));
        assert!(!p.leave("a", "g"));
        assert!(p.members("g").is_empty());
    }

    #[test]
    fn unknown_connection_cannot_join() {
        let mut p = PresenceChannel::new();
        assert!(!p.join("ghost", "g"));
        assert!(p.members("g").is_empty());
    }

    #[test]
    fn emit_to_missing_or_closed_connection_is_dropped() {
        let mut p = PresenceChannel::new();
        assert!(!p.emit_to("nobody", "x", &json!({})));

        let rx = attach(&mut p, "a");
        drop(rx);
        assert!(!p.emit_to("a", "x", &json!({})));
    }

    #[test]
    fn detach_leaves_all_groups() {
        let mut p = PresenceChannel::new();
        let _a = attach(&mut p, "a");
        let mut b = attach(&mut p, "b");
        p.join("a", "g1");
        p.join("a", "g2");
        p.join("b", "g2");

        assert!(p.detach("a"));
        assert!(p.members("g1").is_empty());
        assert_eq!(p.members("g2"), vec!["b".to_string()]);
        assert_eq!(p.emit_to_group("g2", "bye", &json!(null), None), 1);
        assert_eq!(drain(&mut b).len(), 1);
    }

    #[test]
    fn emit_to_all_skips_unbound_connections() {
        let mut p = PresenceChannel::new();
        let mut bound = attach(&mut p, "bound");
        let mut anonymous = attach(&mut p, "anonymous");
        p.join("bound", BROADCAST_GROUP);

        assert_eq!(p.emit_to_all("hospitals_updated", &json!([])), 1);
        assert_eq!(drain(&mut bound).len(), 1);
        assert!(drain(&mut anonymous).is_empty());
    }

    #[test]
    fn seq_increases_per_emission() {
        let mut p = PresenceChannel::new();
        let mut a = attach(&mut p, "a");
        p.emit_to("a", "one", &json!(1));
        p.emit_to("a", "two", &json!(2));
        let frames = drain(&mut a);
        assert_eq!(frames.len(), 2);
        assert!(frames[1].seq > frames[0].seq);
    }
}
