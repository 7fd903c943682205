//! RealtimeHub - event distribution
//!
//! ## Responsibilities
//!
//! - Broadcast core events to every subscribed collaborator
//! - `recording-finalized`: a recording row now exists
//! - `stream-dead`: a transcoder child exited without a stop request
//!
//! Delivery is fan-out over a broadcast channel; the web layer exposes it
//! as an SSE stream. Lagging subscribers lose old events, never block the
//! core.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Hub message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "kebab-case")]
pub enum HubMessage {
    RecordingFinalized(RecordingFinalizedMessage),
    StreamDead(StreamDeadMessage),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingFinalizedMessage {
    pub recording_id: i64,
    pub camera_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDeadMessage {
    pub camera_id: i64,
    pub reason: String,
}

pub struct RealtimeHub {
    tx: broadcast::Sender<HubMessage>,
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubMessage> {
        self.tx.subscribe()
    }

    pub fn broadcast(&self, message: HubMessage) {
        if self.tx.send(message).is_err() {
            // No subscribers is normal at startup
            tracing::debug!("Event dropped (no subscribers)");
        }
    }

    pub fn recording_finalized(&self, recording_id: i64, camera_id: i64) {
        self.broadcast(HubMessage::RecordingFinalized(RecordingFinalizedMessage {
            recording_id,
            camera_id,
        }));
    }

    pub fn stream_dead(&self, camera_id: i64, reason: impl Into<String>) {
        self.broadcast(HubMessage::StreamDead(StreamDeadMessage {
            camera_id,
            reason: reason.into(),
        }));
    }
}
