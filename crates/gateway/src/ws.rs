use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        body::Bytes,
        extract::ws::{Message, WebSocket},
    },
    futures::{SinkExt, StreamExt},
    medlink_protocol::ClientEvent,
    tokio::sync::mpsc,
    tracing::{debug, error, info, warn},
};

use crate::{error::HubError, state::GatewayState};

/// Drive one WebSocket session from upgrade to close.
///
/// Outbound frames are queued by the hub and written by a dedicated task,
/// which also sends keepalive pings. The read side applies each inbound
/// event in arrival order and ends the session on close, transport error,
/// or when the peer has been silent for longer than the ping timeout.
pub async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>, remote_addr: SocketAddr) {
    let conn_id = GatewayState::next_conn_id();
    let presence = state.config.presence.clone();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let idle_timeout = presence.ping_timeout();

    state.attach(&conn_id, tx).await;
    info!(conn_id = %conn_id, remote_ip = %remote_addr.ip(), "ws: connection opened");

    // The hub drops its sender on disconnect, which ends this task after
    // flushing whatever is still queued.
    let write_conn_id = conn_id.clone();
    tokio::spawn(async move {
        let mut ping = tokio::time::interval(presence.ping_interval());
        ping.tick().await;
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                        debug!(conn_id = %write_conn_id, "ws: write failed");
                        break;
                    }
                },
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                },
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        let next = match tokio::time::timeout(idle_timeout, ws_rx.next()).await {
            Ok(next) => next,
            Err(_) => {
                info!(conn_id = %conn_id, "ws: ping timeout");
                break;
            },
        };
        match next {
            Some(Ok(Message::Text(text))) => handle_text(&state, &conn_id, text.as_str()).await,
            Some(Ok(Message::Close(_))) | None => break,
            // Pings, pongs and binary frames only count as activity.
            Some(Ok(_)) => {},
            Some(Err(e)) => {
                debug!(conn_id = %conn_id, error = %e, "ws: read error");
                break;
            },
        }
    }

    let was_bound = state.disconnect(&conn_id).await;
    info!(conn_id = %conn_id, was_bound, "ws: connection closed");
}

async fn handle_text(state: &GatewayState, conn_id: &str, text: &str) {
    let event = match ClientEvent::parse(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(conn_id, error = %e, "ws: dropping frame");
            return;
        },
    };
    let name = event.name();
    match state.dispatch(conn_id, event).await {
        Ok(()) => debug!(conn_id, event = name, "ws: event handled"),
        Err(e) if e.is_benign() => debug!(conn_id, event = name, error = %e, "ws: event ignored"),
        Err(e @ HubError::Internal(_)) => error!(conn_id, event = name, error = %e, "ws: event failed"),
        Err(e) => warn!(conn_id, event = name, error = %e, "ws: event rejected"),
    }
}
