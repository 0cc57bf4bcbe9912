//! Static role data: team, night action, investigation behavior, priority.
//!
//! Per-role behavior is a lookup into [`RoleCatalogEntry`], not a trait impl
//! per role; there is deliberately no dynamic dispatch here.

use serde::Deserialize;
use serde::Serialize;

/// A capability bundle assigned to a player for the whole game.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum Role {
    Villager,
    Mafia,
    Godfather,
    Mafioso,
    Don,
    Doctor,
    Detective,
    Bodyguard,
    Jailor,
    Vigilante,
    Spy,
    MafiaHealer,
    Silencer,
    SerialKiller,
    CultLeader,
    Arsonist,
    Jester,
    Mayor,
}

/// Winning coalition a role belongs to.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum Team {
    Town,
    Mafia,
    Neutral,
}

/// The kind of night action a role may submit, if any.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum NightActionKind {
    Kill,
    Investigate,
    Protect,
    Jail,
    Convert,
    Douse,
    Ignite,
    Silence,
}

/// Static per-role facts used by the game state machine's phase gate,
/// action intake, and resolution order.
#[derive(Copy, Clone, Debug)]
pub struct RoleCatalogEntry {
    pub role: Role,
    pub team: Team,
    pub night_action: Option<NightActionKind>,
    /// Lower runs first during night resolution (spec §4.2 resolution order).
    pub resolution_priority: u8,
    pub vote_weight: u32,
}

/// Returns the static catalog entry for a role.
pub fn catalog_entry(role: Role) -> RoleCatalogEntry {
    use NightActionKind::*;
    use Team::*;

    let (team, night_action, resolution_priority) = match role {
        Role::Villager => (Town, None, 0),
        Role::Mafia => (Mafia, Some(Kill), 5),
        Role::Godfather => (Mafia, Some(Kill), 5),
        Role::Mafioso => (Mafia, Some(Kill), 5),
        Role::Don => (Mafia, Some(Investigate), 7),
        Role::Doctor => (Town, Some(Protect), 4),
        Role::Detective => (Town, Some(Investigate), 7),
        Role::Bodyguard => (Town, Some(Protect), 4),
        Role::Jailor => (Town, Some(Jail), 1),
        Role::Vigilante => (Town, Some(Kill), 5),
        Role::Spy => (Town, Some(Investigate), 7),
        Role::MafiaHealer => (Mafia, Some(Protect), 4),
        Role::Silencer => (Mafia, Some(Silence), 3),
        Role::SerialKiller => (Neutral, Some(Kill), 5),
        Role::CultLeader => (Neutral, Some(Convert), 2),
        Role::Arsonist => (Neutral, Some(Douse), 5),
        Role::Jester => (Neutral, None, 0),
        Role::Mayor => (Town, None, 0),
    };

    RoleCatalogEntry {
        role,
        team,
        night_action,
        resolution_priority,
        vote_weight: if role == Role::Mayor { 2 } else { 1 },
    }
}

impl Role {
    pub fn team(self) -> Team {
        catalog_entry(self).team
    }

    pub fn night_action(self) -> Option<NightActionKind> {
        catalog_entry(self).night_action
    }

    pub fn vote_weight(self) -> u32 {
        catalog_entry(self).vote_weight
    }

    /// Whether this role submits during the collective `MAFIA_ACTION` phase.
    pub fn is_mafia_killer(self) -> bool {
        matches!(self, Role::Mafia | Role::Godfather | Role::Mafioso)
    }

    /// Whether `self`'s team membership is exposed as `TOWN` to Detective-style
    /// investigations rather than its true team (spec §4.2 step 3, S5).
    pub fn appears_innocent_to_detective(self) -> bool {
        matches!(self, Role::Godfather)
    }

    /// Whether a living player with this role is hostile enough to block a
    /// `TOWN_WINS` evaluation on its own (spec §4.2 win conditions).
    pub fn is_hostile_neutral(self) -> bool {
        matches!(self, Role::SerialKiller | Role::Arsonist | Role::CultLeader)
    }
}
