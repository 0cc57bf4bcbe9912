//! Event Dispatcher (spec §4.3): resolves an [`Audience`] to concrete
//! recipients and fans the event out to bounded per-player outbound queues.
//!
//! Generalizes the teacher's `MafiaGameServerInner::get_event_visibility`/
//! `get_clients_for_channel` (audience-by-channel over a `ClientSet`) from
//! three fixed channels (Public/Mafia/Spectator) to the full
//! `ALL_IN_ROOM`/`ALIVE`/`DEAD`/`MAFIA_TEAM`/`ROLE(r)`/`PLAYER(id)` audience
//! model spec §4.3 describes. The ordering guarantee ("no recipient sees
//! event N+1 before event N") falls out of pushing to a `VecDeque` under the
//! single per-room command-processing lock the engine holds while routing.

use std::collections::HashMap;
use std::collections::VecDeque;

use mafia_protocol::Audience;
use mafia_protocol::Event;
use mafia_protocol::PlayerId;
use mafia_protocol::Team;

use crate::consts::OUTBOUND_QUEUE_CAPACITY;
use crate::game::Game;
use crate::room::Room;

/// Resolves an [`Audience`] against current room/game state (spec §4.3).
/// `Dead`/`MafiaTeam`/`Role` require an active game; outside one they
/// resolve empty, matching the teacher's `EventChannel::Mafia` falling back
/// to an empty `ClientSet` when `active_game` is `None`.
pub fn resolve_audience(room: &Room, game: Option<&Game>, audience: &Audience) -> Vec<PlayerId> {
    match audience {
        Audience::AllInRoom => room.players.iter().map(|p| p.id.clone()).collect(),
        Audience::Player(id) => vec![id.clone()],
        Audience::Alive => match game {
            Some(game) => game.alive_players().cloned().collect(),
            None => room.players.iter().map(|p| p.id.clone()).collect(),
        },
        Audience::Dead => match game {
            Some(game) => room
                .players
                .iter()
                .map(|p| p.id.clone())
                .filter(|id| !game.alive_players().any(|alive| alive == id))
                .collect(),
            None => Vec::new(),
        },
        Audience::MafiaTeam => match game {
            Some(game) => game
                .alive_players()
                .filter(|id| game.team_of_public(id) == Some(Team::Mafia))
                .cloned()
                .collect(),
            None => Vec::new(),
        },
        Audience::Role(role) => match game {
            Some(game) => game
                .alive_players()
                .filter(|id| game.role_of_public(id) == Some(*role))
                .cloned()
                .collect(),
            None => Vec::new(),
        },
    }
}

/// Bounded per-player outbound queues (spec §5 "Resource policy": 256-event
/// cap per connection; overflow disconnects the connection without ending
/// the game). Mirrors the teacher's `Client::message_inbox`, generalized
/// from chat messages to the full `Event` vocabulary and keyed by the
/// stable `PlayerId` rather than a per-connection `ClientId`, so a
/// reconnect on the same identity resumes the same queue.
#[derive(Default)]
pub struct Dispatcher {
    queues: HashMap<PlayerId, VecDeque<Event>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures a queue exists for `id` (called on join/connect so a player
    /// with no events yet still has a well-defined empty inbox).
    pub fn ensure(&mut self, id: &PlayerId) {
        self.queues.entry(id.clone()).or_default();
    }

    pub fn forget(&mut self, id: &PlayerId) {
        self.queues.remove(id);
    }

    /// Pushes `event` to every recipient's queue. Returns the subset of
    /// recipients whose queue overflowed and were dropped as a result
    /// (spec §5: "on overflow, disconnect the connection").
    pub fn route(&mut self, recipients: &[PlayerId], event: Event) -> Vec<PlayerId> {
        let mut overflowed = Vec::new();

        for id in recipients {
            let queue = self.queues.entry(id.clone()).or_default();
            if queue.len() >= OUTBOUND_QUEUE_CAPACITY {
                overflowed.push(id.clone());
                continue;
            }
            queue.push_back(event.clone());
        }

        overflowed
    }

    /// Drains and returns every event queued for `id`, in order.
    pub fn take(&mut self, id: &PlayerId) -> Box<[Event]> {
        match self.queues.get_mut(id) {
            Some(queue) => queue.drain(..).collect(),
            None => Box::new([]),
        }
    }
}
