//! services/trip_api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! It forwards lifecycle state to the client and runs start/end transitions
//! on the client's behalf.

use crate::web::{
    prompt::{Outbound, WsRetryPrompt},
    protocol::{ClientMessage, ServerMessage},
    state::{AppState, ConnectionState},
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use trip_tracker_core::domain::{EndDraft, PhotoRef, TripState};
use trip_tracker_core::ports::UploadDecision;
use trip_tracker_core::{StartTripRequest, TripError};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Everything a connection's message handlers share.
struct Connection {
    id: Uuid,
    app_state: Arc<AppState>,
    state: Arc<Mutex<ConnectionState>>,
    outbound: Outbound,
    prompt: Arc<WsRetryPrompt>,
    decisions: mpsc::Sender<UploadDecision>,
}

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(ws: WebSocketUpgrade, State(app_state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let connection_id = Uuid::new_v4();
    info!(%connection_id, "New WebSocket connection established.");

    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();

    // --- 1. Writer and state forwarding ---
    // All outgoing frames go through one task so transitions running in the
    // background never contend for the socket.
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to encode server message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let token = CancellationToken::new();
    let forwarder = tokio::spawn(forward_state(
        app_state.controller.subscribe(),
        outbound.clone(),
        token.clone(),
    ));

    let (prompt, decisions) = WsRetryPrompt::new(outbound.clone());
    let connection = Connection {
        id: connection_id,
        app_state,
        state: Arc::new(Mutex::new(ConnectionState::default())),
        outbound,
        prompt: Arc::new(prompt),
        decisions,
    };

    // --- 2. Main Message Loop ---
    loop {
        if let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => handle_text_message(text.as_str(), &connection).await,
                Message::Binary(data) => handle_photo_frame(&data, &connection).await,
                Message::Close(_) => {
                    info!(%connection_id, "Client sent close message.");
                    break;
                }
                _ => {}
            }
        } else {
            info!(%connection_id, "Client disconnected.");
            break;
        }
    }

    // --- 3. Cleanup ---
    // Transitions already running are left to finish or roll back on their
    // own; dropping the decision sender cancels any open upload prompt.
    token.cancel();
    let _ = forwarder.await;
    let pending = connection.state.lock().await.pending_photo.take();
    if let Some(photo) = pending {
        connection.app_state.staging.discard(&photo).await;
    }
    drop(connection);
    writer.abort();
    info!(%connection_id, "WebSocket connection closed.");
}

/// Sends the current state, then every change until cancelled.
async fn forward_state(
    mut states: watch::Receiver<TripState>,
    outbound: Outbound,
    token: CancellationToken,
) {
    let current = states.borrow_and_update().clone();
    if outbound.send(ServerMessage::State { state: current }).is_err() {
        return;
    }
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                if outbound.send(ServerMessage::State { state }).is_err() {
                    break;
                }
            }
        }
    }
}

/// Stages a photo frame as the connection's pending photo, replacing any earlier one.
async fn handle_photo_frame(data: &[u8], connection: &Connection) {
    let staged = match connection.app_state.staging.stage(data).await {
        Ok(photo) => photo,
        Err(e) => {
            error!(connection_id = %connection.id, "Failed to stage photo: {}", e);
            let _ = connection.outbound.send(ServerMessage::Error {
                message: "The photo could not be read. Please take it again.".to_string(),
                recoverable: true,
            });
            return;
        }
    };

    let replaced = connection.state.lock().await.pending_photo.replace(staged);
    if let Some(old) = replaced {
        connection.app_state.staging.discard(&old).await;
    }
    let _ = connection
        .outbound
        .send(ServerMessage::PhotoReceived { bytes: data.len() });
}

/// Helper function to handle the logic for different `ClientMessage` variants.
async fn handle_text_message(text: &str, connection: &Connection) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(client_msg) => match client_msg {
            ClientMessage::StartTrip { starting_odometer } => {
                info!(connection_id = %connection.id, "StartTrip message received.");
                let photo = connection.state.lock().await.pending_photo.take();
                let request = StartTripRequest {
                    starting_odometer,
                    start_photo: photo.clone(),
                };
                let app_state = connection.app_state.clone();
                let state = connection.state.clone();
                let outbound = connection.outbound.clone();
                let prompt = connection.prompt.clone();
                tokio::spawn(async move {
                    let result = app_state
                        .controller
                        .start_trip(request, prompt.as_ref())
                        .await;
                    let (message, reusable) = match result {
                        Ok(started) => (
                            ServerMessage::TripStarted {
                                trip: started.trip,
                                cached: started.cached,
                            },
                            false,
                        ),
                        Err(e) => (error_message(&e), photo_reusable(&e)),
                    };
                    let keep = reusable && !outbound.is_closed();
                    settle_photo(&app_state, &state, photo, keep).await;
                    let _ = outbound.send(message);
                });
            }
            ClientMessage::EndTrip {
                ending_odometer,
                earnings,
            } => {
                info!(connection_id = %connection.id, "EndTrip message received.");
                let photo = connection.state.lock().await.pending_photo.take();
                let form = EndDraft {
                    ending_odometer,
                    earnings,
                    end_photo: photo.clone(),
                };
                let app_state = connection.app_state.clone();
                let state = connection.state.clone();
                let outbound = connection.outbound.clone();
                let prompt = connection.prompt.clone();
                tokio::spawn(async move {
                    let result = app_state.controller.end_trip(form, prompt.as_ref()).await;
                    let (message, reusable) = match result {
                        Ok(ended) => (ServerMessage::TripEnded { record: ended.record }, false),
                        Err(e) => (error_message(&e), photo_reusable(&e)),
                    };
                    let keep = reusable && !outbound.is_closed();
                    settle_photo(&app_state, &state, photo, keep).await;
                    let _ = outbound.send(message);
                });
            }
            ClientMessage::EditEndTrip {
                ending_odometer,
                earnings,
            } => {
                let end_photo = connection.state.lock().await.pending_photo.clone();
                let draft = EndDraft {
                    ending_odometer,
                    earnings,
                    end_photo,
                };
                if let Err(e) = connection.app_state.controller.update_end_draft(draft).await {
                    warn!(connection_id = %connection.id, "Draft update rejected: {}", e);
                    let _ = connection.outbound.send(error_message(&e));
                }
            }
            ClientMessage::RetryUpload => send_decision(connection, UploadDecision::Retry),
            ClientMessage::CancelUpload => send_decision(connection, UploadDecision::Cancel),
        },
        Err(e) => {
            warn!(connection_id = %connection.id, "Failed to deserialize client message: {}", e);
            let _ = connection.outbound.send(ServerMessage::Error {
                message: "Unrecognised message.".to_string(),
                recoverable: false,
            });
        }
    }
}

fn send_decision(connection: &Connection, decision: UploadDecision) {
    if let Err(e) = connection.decisions.try_send(decision) {
        warn!(connection_id = %connection.id, ?decision, "Upload decision dropped: {}", e);
    }
}

/// Whether the photo of a failed transition was never uploaded. Uploaded
/// photos are not offered again.
fn photo_reusable(e: &TripError) -> bool {
    matches!(
        e,
        TripError::Validation(_) | TripError::Precondition(_) | TripError::UploadCancelled { .. }
    )
}

fn error_message(e: &TripError) -> ServerMessage {
    ServerMessage::Error {
        message: e.user_message(),
        recoverable: e.is_recoverable(),
    }
}

/// Returns a photo to the connection when `keep` is set and no newer frame
/// has arrived; otherwise deletes it.
async fn settle_photo(
    app_state: &AppState,
    state: &Mutex<ConnectionState>,
    photo: Option<PhotoRef>,
    keep: bool,
) {
    let Some(photo) = photo else {
        return;
    };
    if keep {
        let mut connection = state.lock().await;
        if connection.pending_photo.is_none() {
            connection.pending_photo = Some(photo);
            return;
        }
    }
    app_state.staging.discard(&photo).await;
}
