//! Protocol Adapter (spec §4 "Protocol Adapter", SPEC_FULL.md §4.4): maps
//! wire-level [`Intent`]s to calls on [`MafiaGameServer`] and turns the
//! result into an [`IntentAck`]. Holds no business logic of its own — every
//! branch is a straight call-through, the same "thin mapping layer, no
//! behavior" role the teacher's socket handlers played before collapsing
//! into the single-writer queue model (spec §9 "Coroutine/async control
//! flow").
//!
//! No transport lives here: framing a wire message into an [`IntentEnvelope`]
//! and writing an [`Event`]/[`IntentAck`] back out over a socket is the
//! external transport collaborator's job (spec §6 Non-goals).

use mafia_protocol::AckError;
use mafia_protocol::Intent;
use mafia_protocol::IntentAck;
use mafia_protocol::IntentEnvelope;
use mafia_protocol::SessionToken;

use crate::MafiaGameError;
use crate::MafiaGameServer;

fn ack(correlation_id: Option<mafia_protocol::CorrelationId>, result: Result<(), MafiaGameError>) -> IntentAck {
    match result {
        Ok(()) => IntentAck { correlation_id, success: true, error: None },
        Err(err) => IntentAck {
            correlation_id,
            success: false,
            error: Some(AckError { code: err.code().to_string(), message: err.to_string() }),
        },
    }
}

/// Dispatches one framed client message to the engine and returns the ack
/// the transport should write back for this connection, if any.
///
/// Every [`Intent`] variant expects an ack per spec §6's "kind : payload →
/// ack?" table, including the ones spec.md marks "none" — a `none` response
/// still resolves to a `{success: true}` ack on the correlated id when the
/// client supplied one, so retried sends stay idempotent; transports that
/// don't care are free to ignore acks for those kinds.
pub fn dispatch_intent(server: &MafiaGameServer, token: SessionToken, envelope: IntentEnvelope) -> IntentAck {
    let correlation_id = envelope.correlation_id;

    match envelope.intent {
        Intent::RoomCreate { name, visibility, settings } => {
            match server.create_room(token, name, visibility, settings) {
                Ok(_room) => IntentAck { correlation_id, success: true, error: None },
                Err(err) => ack(correlation_id, Err(err)),
            }
        }
        Intent::RoomJoin { code, user_id, username } => {
            let _ = user_id; // the core keys the joining player off the verified session, not the wire payload
            let _ = username;
            match server.join_room(token, code) {
                Ok(_) => IntentAck { correlation_id, success: true, error: None },
                Err(err) => ack(correlation_id, Err(err)),
            }
        }
        Intent::RoomLeave { .. } => ack(correlation_id, server.leave_room(token)),
        Intent::RoomKick { target_id, .. } => ack(correlation_id, server.kick_player(token, target_id)),
        Intent::RoomUpdateSettings { settings, .. } => ack(correlation_id, server.update_settings(token, settings)),
        Intent::GameStart { .. } => {
            let mut rng = rand::rng();
            ack(correlation_id, server.start_game(token, &mut rng))
        }
        Intent::NightAction { target_id, .. } => ack(correlation_id, server.submit_night_action(token, target_id)),
        Intent::VoteCast { target_id, .. } => ack(correlation_id, server.cast_vote(token, target_id)),
        Intent::VoteRequestRemoval { target_id, .. } => ack(correlation_id, server.request_removal_vote(token, target_id)),
        Intent::DayChat { content, .. } => ack(correlation_id, server.day_chat(token, content)),
        Intent::MafiaChat { content, .. } => ack(correlation_id, server.mafia_chat(token, content)),
        Intent::PlayerReconnect { code, user_id } => match server.reconnect(token, code, user_id) {
            Ok(_) => IntentAck { correlation_id, success: true, error: None },
            Err(err) => ack(correlation_id, Err(err)),
        },
    }
}
