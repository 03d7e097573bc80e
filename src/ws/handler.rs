//! WebSocket upgrade handler. Registers a client, relays its messages to
//! everyone else, and unregisters it when the session ends.

use std::ops::ControlFlow;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::api::errors::ApiError;
use crate::api::state::SharedState;

use super::messages::{ErrorMessage, INVALID_FORMAT, InboundMessage, OutboundMessage};
use super::registry::{ClientHandle, ClientId};

/// GET /ws/events — upgrade to WebSocket.
pub async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<SharedState>,
) -> Result<Response, ApiError> {
    let ws = ws.map_err(|rejection| ApiError::InvalidRequest(rejection.body_text()))?;
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state))
        .into_response())
}

/// Core WebSocket session logic.
async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (handle, mut rx) = state.registry.open(state.config.client_buffer);
    let client_id = handle.id();
    let dropped = wait_closed(handle.close_signal());
    state.registry.add(handle.clone()).await;
    let active = state.registry.count().await;
    info!(client_id, active_connections = active, "client connected");

    let (mut sink, mut stream) = socket.split();

    // Writer task: forward queued frames → WS sink until the channel ends,
    // the socket fails, or the client is dropped from the registry.
    let write_timeout = state.config.send_timeout();
    let mut writer = tokio::spawn(async move {
        tokio::pin!(dropped);
        loop {
            let frame = tokio::select! {
                frame = rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
                _ = &mut dropped => {
                    debug!(client_id, "client unregistered, closing socket");
                    break;
                }
            };
            let send = sink.send(Message::Text(frame.to_string().into()));
            match tokio::time::timeout(write_timeout, send).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(client_id, error = %e, "socket write failed");
                    break;
                }
                Err(_) => {
                    warn!(client_id, "socket write timed out");
                    break;
                }
            }
        }
        let _ = tokio::time::timeout(write_timeout, sink.close()).await;
    });

    // Reader task: one inbound message is fully handled before the next is read.
    let reader_state = state.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            let flow = match msg {
                Ok(Message::Text(text)) => {
                    handle_client_message(&reader_state, &handle, &text).await
                }
                Ok(Message::Binary(_)) => {
                    let err = ErrorMessage::new(INVALID_FORMAT);
                    reply(&reader_state, &handle, err).await
                }
                Ok(Message::Close(_)) => ControlFlow::Break(()),
                Ok(_) => ControlFlow::Continue(()), // Ping / Pong handled by Axum
                Err(e) => {
                    error!(client_id = handle.id(), error = %e, "WS receive failed");
                    ControlFlow::Break(())
                }
            };
            if flow.is_break() {
                break;
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut writer => { reader.abort(); }
        _ = &mut reader => { writer.abort(); }
    }

    cleanup(&state, client_id).await;
}

/// Process a client-sent text frame: relay it, or answer the sender with an
/// error object.
async fn handle_client_message(
    state: &SharedState,
    handle: &ClientHandle,
    text: &str,
) -> ControlFlow<()> {
    // A client dropped by the dispatcher as unreachable does not get to
    // broadcast; end its session instead.
    if !state.registry.contains(handle.id()).await {
        warn!(client_id = handle.id(), "client no longer registered, closing session");
        return ControlFlow::Break(());
    }

    let inbound = match InboundMessage::decode(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(client_id = handle.id(), error = %e, "rejected inbound message");
            return reply(state, handle, e.reply()).await;
        }
    };

    debug!(
        client_id = handle.id(),
        len = inbound.message.len(),
        "relaying message"
    );
    let outbound = OutboundMessage::from(inbound);

    // Run the fan-out on its own task so a disconnect aborting this session
    // cannot cut it short for the other recipients.
    let dispatcher = state.dispatcher.clone();
    let sender = handle.id();
    let fanout = tokio::spawn(async move { dispatcher.broadcast(&outbound, Some(sender)).await });
    if let Err(e) = fanout.await {
        error!(client_id = sender, error = %e, "broadcast task failed");
    }
    ControlFlow::Continue(())
}

/// Unicast an error object back to the originating client.
async fn reply(state: &SharedState, handle: &ClientHandle, err: ErrorMessage) -> ControlFlow<()> {
    match handle.send(err.to_json().into(), state.config.send_timeout()).await {
        Ok(()) => ControlFlow::Continue(()),
        Err(e) => {
            warn!(client_id = handle.id(), error = %e, "could not reply to client");
            ControlFlow::Break(())
        }
    }
}

/// Resolves once the client's close signal fires (or its sender is gone).
async fn wait_closed(mut signal: watch::Receiver<bool>) {
    let _ = signal.wait_for(|closed| *closed).await;
}

/// Remove the client from the registry.
async fn cleanup(state: &SharedState, client_id: ClientId) {
    state.registry.remove(client_id).await;
    let active = state.registry.count().await;
    info!(client_id, active_connections = active, "client disconnected");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
