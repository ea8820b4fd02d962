//! services/trip_api/src/web/prompt.rs
//!
//! Bridges the core upload retry loop to a WebSocket client: a failed upload
//! is announced with `upload_failed` and the loop waits for the client's
//! `retry_upload` or `cancel_upload`.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};
use trip_tracker_core::domain::PhotoPhase;
use trip_tracker_core::ports::{RetryPrompt, UploadDecision};

use crate::web::protocol::ServerMessage;

/// Queue of messages waiting to be written to one connection.
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

pub struct WsRetryPrompt {
    outbound: Outbound,
    decisions: Mutex<mpsc::Receiver<UploadDecision>>,
}

impl WsRetryPrompt {
    /// Returns the prompt and the sender the connection feeds client answers into.
    pub fn new(outbound: Outbound) -> (Self, mpsc::Sender<UploadDecision>) {
        let (decision_tx, decision_rx) = mpsc::channel(8);
        let prompt = Self {
            outbound,
            decisions: Mutex::new(decision_rx),
        };
        (prompt, decision_tx)
    }
}

#[async_trait]
impl RetryPrompt for WsRetryPrompt {
    async fn upload_failed(&self, phase: PhotoPhase, reason: &str) -> UploadDecision {
        let mut decisions = self.decisions.lock().await;

        // Answers sent while no prompt was open do not count.
        while let Ok(stale) = decisions.try_recv() {
            debug!(?stale, "Discarding unsolicited upload decision.");
        }

        let asked = self.outbound.send(ServerMessage::UploadFailed {
            phase,
            reason: reason.to_string(),
        });
        if asked.is_err() {
            info!(%phase, "Client is gone, cancelling the upload.");
            return UploadDecision::Cancel;
        }

        // A closed channel means the connection ended while waiting.
        decisions.recv().await.unwrap_or(UploadDecision::Cancel)
    }
}
