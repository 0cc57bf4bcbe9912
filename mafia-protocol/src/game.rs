//! Public game-state views shared between the server core and its clients.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::ids::PlayerId;
use crate::role::Role;
use crate::role::Team;

/// A named segment of the game with its own timer and admissible intents.
///
/// The `NIGHT_PIPELINE` from spec §4.2 is the contiguous run of `*Action`
/// variants between `RoleReveal`/`Resolution` and `DayDiscussion`.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Phase {
    Lobby,
    RoleReveal,
    MafiaAction,
    DonAction,
    DetectiveAction,
    DoctorAction,
    BodyguardAction,
    JailorAction,
    VigilanteAction,
    SpyAction,
    MafiaHealerAction,
    SilencerAction,
    SerialKillerAction,
    CultLeaderAction,
    ArsonistAction,
    DayDiscussion,
    Voting,
    Resolution,
    GameOver,
}

/// Canonical night-pipeline order (spec §4.2). `MafiaAction` is gated on any
/// living role with [`Role::is_mafia_killer`], not just a literal `Mafia`.
pub const NIGHT_PIPELINE: &[Phase] = &[
    Phase::MafiaAction,
    Phase::DonAction,
    Phase::DetectiveAction,
    Phase::DoctorAction,
    Phase::BodyguardAction,
    Phase::JailorAction,
    Phase::VigilanteAction,
    Phase::SpyAction,
    Phase::MafiaHealerAction,
    Phase::SilencerAction,
    Phase::SerialKillerAction,
    Phase::CultLeaderAction,
    Phase::ArsonistAction,
];

impl Phase {
    /// The role whose action phase this is, if any.
    pub fn acting_role(self) -> Option<Role> {
        match self {
            Phase::MafiaAction => None, // gated on `Role::is_mafia_killer`, not one role
            Phase::DonAction => Some(Role::Don),
            Phase::DetectiveAction => Some(Role::Detective),
            Phase::DoctorAction => Some(Role::Doctor),
            Phase::BodyguardAction => Some(Role::Bodyguard),
            Phase::JailorAction => Some(Role::Jailor),
            Phase::VigilanteAction => Some(Role::Vigilante),
            Phase::SpyAction => Some(Role::Spy),
            Phase::MafiaHealerAction => Some(Role::MafiaHealer),
            Phase::SilencerAction => Some(Role::Silencer),
            Phase::SerialKillerAction => Some(Role::SerialKiller),
            Phase::CultLeaderAction => Some(Role::CultLeader),
            Phase::ArsonistAction => Some(Role::Arsonist),
            Phase::Lobby
            | Phase::RoleReveal
            | Phase::DayDiscussion
            | Phase::Voting
            | Phase::Resolution
            | Phase::GameOver => None,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum DeathCause {
    Vote,
    MafiaKill,
    Vigilante,
    SerialKiller,
    Arsonist,
    BodyguardTrade,
    Leave,
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct DeathRecord {
    pub player: PlayerId,
    pub role: Option<Role>,
    pub cause: DeathCause,
}

/// Named win condition a completed game resolved to (spec §4.2, §6
/// `game:end`). Kept distinct from `winning_team` so a client can tell
/// `JesterWins` (a `Neutral`-team role, same as a no-team `Draw`) apart
/// from every other outcome without guessing from `winning_team` alone.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum WinCondition {
    TownWins,
    MafiaWins,
    JesterWins,
    SerialKillerWins,
    Draw,
}

/// Outcome of a completed game.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct GameOutcome {
    pub condition: WinCondition,
    pub winning_team: Option<Team>,
    pub winning_players: Vec<PlayerId>,
}

/// Recipient-scoped view of the active game, built fresh for each observer
/// (spec §3 `GameState`, filtered per spec §4.3 "private information
/// isolation").
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct GameStateView {
    pub phase: Phase,
    pub day_number: usize,
    pub phase_timer_remaining_secs: u64,
    pub role_timer_remaining_secs: Option<u64>,
    pub alive: Vec<PlayerId>,
    pub dead: Vec<DeathRecord>,
    /// Populated only for the requesting player (and teammates, for Mafia).
    pub your_role: Option<Role>,
    pub teammates: Vec<PlayerId>,
    pub votes: HashMap<PlayerId, Option<PlayerId>>,
    pub pending_win: Option<GameOutcome>,
}

/// Immutable record handed to the external persistence collaborator on
/// `GAME_OVER` (spec §6 "Persistence collaborator").
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct GameRecord {
    pub room_name: Arc<str>,
    pub participants: Vec<PlayerId>,
    pub roles: HashMap<PlayerId, Role>,
    pub winner: Option<Team>,
    pub winning_players: Vec<PlayerId>,
    pub duration_secs: u64,
    pub day_count: usize,
}
