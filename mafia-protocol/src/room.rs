//! Room-level data: visibility, settings, and the player/room views sent to
//! clients.

use std::sync::Arc;
use std::time::SystemTime;

use serde::Deserialize;
use serde::Serialize;

use crate::ids::PlayerId;
use crate::ids::RoomCode;
use crate::ids::RoomId;

pub const DEFAULT_MIN_PLAYERS: usize = 3;
pub const DEFAULT_MAX_PLAYERS: usize = 20;

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum RoomVisibility {
    Public,
    Private,
}

/// How a tied day vote is resolved (spec §4.2 "Voting").
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum TieBreakPolicy {
    NoElimination,
    Revote,
    Random,
}

impl Default for TieBreakPolicy {
    fn default() -> Self {
        Self::NoElimination
    }
}

/// Host-configurable role toggles and timer durations.
///
/// Timer fields are seconds; implementers must clamp per-room overrides to
/// `[5, 600]` (spec §4.2).
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct RoomSettings {
    pub min_players: usize,
    pub max_players: usize,
    pub enable_godfather: bool,
    pub enable_don: bool,
    pub enable_vigilante: bool,
    pub enable_bodyguard: bool,
    pub enable_jester: bool,
    pub enable_mayor: bool,
    pub enable_spy: bool,
    pub enable_mafia_healer: bool,
    pub enable_silencer: bool,
    pub enable_serial_killer: bool,
    pub enable_cult_leader: bool,
    pub enable_arsonist: bool,
    pub tie_break: TieBreakPolicy,
    pub spectators_allowed: bool,
    pub reveal_role_on_death: bool,
    pub timers: TimerTable,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            min_players: DEFAULT_MIN_PLAYERS,
            max_players: DEFAULT_MAX_PLAYERS,
            enable_godfather: false,
            enable_don: false,
            enable_vigilante: false,
            enable_bodyguard: false,
            enable_jester: false,
            enable_mayor: false,
            enable_spy: false,
            enable_mafia_healer: false,
            enable_silencer: false,
            enable_serial_killer: false,
            enable_cult_leader: false,
            enable_arsonist: false,
            tie_break: TieBreakPolicy::default(),
            spectators_allowed: true,
            reveal_role_on_death: true,
            timers: TimerTable::default(),
        }
    }
}

/// Default timer table from spec §6, all in seconds.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TimerTable {
    pub role_reveal: u64,
    pub mafia_action: u64,
    pub don_action: u64,
    pub detective_action: u64,
    pub doctor_action: u64,
    pub bodyguard_action: u64,
    pub jailor_action: u64,
    pub vigilante_action: u64,
    pub spy_action: u64,
    pub mafia_healer_action: u64,
    pub silencer_action: u64,
    pub serial_killer_action: u64,
    pub cult_leader_action: u64,
    pub arsonist_action: u64,
    pub day_discussion: u64,
    pub voting: u64,
    pub resolution: u64,
}

impl Default for TimerTable {
    fn default() -> Self {
        Self {
            role_reveal: 10,
            mafia_action: 40,
            don_action: 25,
            detective_action: 25,
            doctor_action: 25,
            bodyguard_action: 20,
            jailor_action: 20,
            vigilante_action: 20,
            spy_action: 15,
            mafia_healer_action: 20,
            silencer_action: 15,
            serial_killer_action: 20,
            cult_leader_action: 20,
            arsonist_action: 20,
            day_discussion: 120,
            voting: 45,
            resolution: 10,
        }
    }
}

pub const TIMER_MIN_SECS: u64 = 5;
pub const TIMER_MAX_SECS: u64 = 600;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum PlayerStatus {
    Alive,
    Dead,
    Spectating,
}

/// Public information about a player inside a room.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub username: Arc<str>,
    pub avatar: Option<Arc<str>>,
    pub status: PlayerStatus,
    pub is_host: bool,
    pub is_connected: bool,
}

/// Public information about a room, shared with clients and the listing API.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub code: RoomCode,
    pub name: Arc<str>,
    pub visibility: RoomVisibility,
    pub host_id: PlayerId,
    pub players: Vec<PlayerInfo>,
    pub settings: RoomSettings,
    pub is_game_active: bool,
    pub created_at: SystemTime,
}
