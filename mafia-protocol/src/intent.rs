//! Inbound intents clients submit, and the acks some of them expect.
//!
//! This is the wire shape the Protocol Adapter consumes; it carries no
//! behavior of its own (spec §4 "Protocol Adapter").

use serde::Deserialize;
use serde::Serialize;

use crate::ids::PlayerId;
use crate::ids::RoomCode;
use crate::room::RoomSettings;
use crate::room::RoomVisibility;

/// Optional correlation id a client attaches to an intent expecting an ack.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct CorrelationId(pub u64);

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum Intent {
    RoomCreate {
        name: String,
        visibility: RoomVisibility,
        settings: Option<RoomSettings>,
    },
    RoomJoin {
        code: RoomCode,
        user_id: PlayerId,
        username: String,
    },
    RoomLeave {
        code: RoomCode,
    },
    RoomKick {
        code: RoomCode,
        target_id: PlayerId,
    },
    RoomUpdateSettings {
        code: RoomCode,
        settings: RoomSettings,
    },
    GameStart {
        code: RoomCode,
    },
    NightAction {
        code: RoomCode,
        target_id: Option<PlayerId>,
    },
    VoteCast {
        code: RoomCode,
        target_id: Option<PlayerId>,
    },
    VoteRequestRemoval {
        code: RoomCode,
        target_id: PlayerId,
    },
    DayChat {
        code: RoomCode,
        content: String,
    },
    MafiaChat {
        code: RoomCode,
        content: String,
    },
    PlayerReconnect {
        code: RoomCode,
        user_id: PlayerId,
    },
}

/// A framed client message: a kind-tagged intent plus an optional ack
/// correlation id.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct IntentEnvelope {
    pub correlation_id: Option<CorrelationId>,
    pub intent: Intent,
}

/// Result of handling an intent that expects an acknowledgement.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct IntentAck {
    pub correlation_id: Option<CorrelationId>,
    pub success: bool,
    pub error: Option<AckError>,
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct AckError {
    pub code: String,
    pub message: String,
}
