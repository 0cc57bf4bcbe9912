//! Outbound events the dispatcher routes to clients, and the audiences it
//! routes them to (spec §4.3).

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

use crate::chat::ChatMessage;
use crate::game::DeathCause;
use crate::game::GameOutcome;
use crate::game::GameStateView;
use crate::game::Phase;
use crate::ids::PlayerId;
use crate::role::Role;
use crate::room::RoomInfo;

/// Who a dispatched event is visible to (spec §4.3).
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Audience {
    AllInRoom,
    Alive,
    Dead,
    MafiaTeam,
    Role(Role),
    Player(PlayerId),
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum Event {
    RoomUpdated(RoomInfo),
    RoomPlayerJoined(crate::room::PlayerInfo),
    RoomPlayerLeft(PlayerId),
    RoomPlayerKicked(PlayerId),
    RoomError { message: String, code: String },

    GameStarted(GameStateView),
    GameRoleReveal { role: Role, team: crate::role::Team, teammates: Vec<PlayerId> },
    GameStateUpdate(GameStateView),
    GamePhaseChange { phase: Phase, timer_secs: u64, day_number: usize },
    GameEnd {
        winner: crate::game::WinCondition,
        winning_team: Option<crate::role::Team>,
        winning_players: Vec<PlayerId>,
    },

    TimerUpdate { remaining_secs: u64, phase: Phase },
    TimerRoleSpecific { remaining_secs: u64, for_role: Role },

    NightActionRequired { role: Role, timer_secs: u64, valid_targets: Vec<PlayerId> },
    NightActionConfirmed { action_type: crate::role::NightActionKind },
    NightResult { deaths: Vec<(PlayerId, DeathCause)>, someone_saved: bool },
    NightDetectiveResult { target_id: PlayerId, is_guilty: bool },
    NightDonResult { target_id: PlayerId, is_detective: bool },
    NightSpyResult { mafia_voters: Vec<PlayerId> },

    VoteStarted { timer_secs: u64, candidates: Vec<PlayerId> },
    VoteUpdate { votes: HashMap<PlayerId, Option<PlayerId>>, has_voted: bool },
    VoteResult {
        eliminated_id: Option<PlayerId>,
        eliminated_role: Option<Role>,
        vote_counts: HashMap<PlayerId, u32>,
    },

    PlayerEliminated { player_id: PlayerId, role: Option<Role>, reason: DeathCause },
    PlayerDisconnected(PlayerId),
    PlayerReconnected(PlayerId),

    DayChat(ChatMessage),
    MafiaChat(ChatMessage),
    MafiaVoteUpdate(HashMap<PlayerId, Option<PlayerId>>),

    Error { message: String, code: String },
}

impl From<GameOutcome> for Event {
    fn from(value: GameOutcome) -> Self {
        Event::GameEnd {
            winner: value.condition,
            winning_team: value.winning_team,
            winning_players: value.winning_players,
        }
    }
}
