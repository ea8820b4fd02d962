//! services/trip_api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the app and the API server
//! for driving the trip lifecycle.

use serde::{Deserialize, Serialize};
use trip_tracker_core::domain::{ActiveTrip, PhotoPhase, RemoteTripRecord, TripState};

//=========================================================================================
// Messages Sent FROM the Client TO the Server
//=========================================================================================
// NOTE: Odometer photos are sent as raw Binary frames, not as part of this enum. The
// most recent frame is used by the next `start_trip` or `end_trip`.
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Confirms the start form. Requires a photo frame to have been sent first.
    StartTrip {
        #[serde(default)]
        starting_odometer: Option<String>,
    },

    /// Saves edits to the end form of the active trip without ending it.
    EditEndTrip {
        #[serde(default)]
        ending_odometer: Option<String>,
        #[serde(default)]
        earnings: Option<String>,
    },

    /// Confirms the end form. Requires a photo frame to have been sent first.
    EndTrip {
        #[serde(default)]
        ending_odometer: Option<String>,
        #[serde(default)]
        earnings: Option<String>,
    },

    /// Answers an `upload_failed` prompt.
    RetryUpload,
    CancelUpload,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The current lifecycle state; sent on connect and after every change.
    State { state: TripState },

    /// Acknowledges a photo frame.
    PhotoReceived { bytes: usize },

    TripStarted { trip: ActiveTrip, cached: bool },

    TripEnded { record: RemoteTripRecord },

    /// A photo upload attempt failed. The client must answer with
    /// `retry_upload` or `cancel_upload`.
    UploadFailed { phase: PhotoPhase, reason: String },

    /// Reports a failed action. `recoverable` tells the client whether
    /// resubmitting may succeed.
    Error { message: String, recoverable: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_use_snake_case_tags() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"start_trip","starting_odometer":"1000"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::StartTrip {
                starting_odometer: Some("1000".to_string())
            }
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"end_trip"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::EndTrip {
                ending_odometer: None,
                earnings: None
            }
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"cancel_upload"}"#).unwrap();
        assert_eq!(msg, ClientMessage::CancelUpload);
    }

    #[test]
    fn server_messages_nest_the_state_tag() {
        let json = serde_json::to_value(ServerMessage::State {
            state: TripState::Idle,
        })
        .unwrap();
        assert_eq!(json["type"], "state");
        assert_eq!(json["state"]["status"], "idle");

        let json = serde_json::to_value(ServerMessage::UploadFailed {
            phase: PhotoPhase::End,
            reason: "offline".to_string(),
        })
        .unwrap();
        assert_eq!(json["phase"], "end");
    }
}
