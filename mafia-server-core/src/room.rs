//! Room Manager (spec §4.1): lifecycle, membership, host election,
//! reconnection grace, and the code/id uniqueness invariants.
//!
//! Generalizes the teacher's `ClientState` (a single global client table
//! keyed by `ClientId`/`SessionToken`) into a per-room player table plus a
//! top-level room index, the split spec §9 "Shared mutable state" calls for.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use std::time::SystemTime;

use mafia_protocol::ChatRingBuffer;
use mafia_protocol::MAFIA_CHAT_CAPACITY;
use mafia_protocol::PUBLIC_CHAT_CAPACITY;
use mafia_protocol::PlayerId;
use mafia_protocol::PlayerInfo;
use mafia_protocol::PlayerStatus;
use mafia_protocol::RoomCode;
use mafia_protocol::RoomId;
use mafia_protocol::RoomInfo;
use mafia_protocol::RoomSettings;
use mafia_protocol::RoomVisibility;
use mafia_protocol::Seat;
use mafia_protocol::TIMER_MAX_SECS;
use mafia_protocol::TIMER_MIN_SECS;
use rand::Rng;
use tracing::field;

use crate::clock::Clock;
use crate::consts::LOBBY_DISCONNECT_GRACE_SECS;
use crate::consts::MID_GAME_DISCONNECT_GRACE_SECS;
use crate::consts::ROOM_CODE_ALLOC_RETRIES;
use crate::consts::ROOM_DESTRUCTION_GRACE_SECS;
use crate::error::MafiaGameError;
use crate::rng::generate_room_code;

/// A player seated in a room, with the bookkeeping a `PlayerInfo` doesn't carry.
#[derive(Clone, Debug)]
pub struct Player {
    pub id: PlayerId,
    pub username: String,
    pub avatar: Option<Arc<str>>,
    pub status: PlayerStatus,
    pub is_connected: bool,
    pub seat: Seat,
    /// Set while disconnected; eviction fires when this deadline passes.
    pub eviction_deadline: Option<Instant>,
}

impl Player {
    fn to_info(&self, host_id: &PlayerId) -> PlayerInfo {
        PlayerInfo {
            id: self.id.clone(),
            username: Arc::from(self.username.as_str()),
            avatar: self.avatar.clone(),
            status: self.status,
            is_host: &self.id == host_id,
            is_connected: self.is_connected,
        }
    }
}

/// A room: membership, settings, and the two chat ring buffers (spec §3
/// "Chat message"). Game state lives alongside this in the engine, not here
/// (spec §9: "room-owned player table... lookups go through the room").
pub struct Room {
    pub id: RoomId,
    pub code: RoomCode,
    pub name: Arc<str>,
    pub visibility: RoomVisibility,
    pub host_id: PlayerId,
    /// Insertion order; host transfer and seat assignment both rely on it.
    pub players: Vec<Player>,
    pub settings: RoomSettings,
    pub is_game_active: bool,
    pub created_at: SystemTime,
    pub public_chat: ChatRingBuffer,
    pub mafia_chat: ChatRingBuffer,
    /// Set once the room becomes empty; cleared if someone rejoins first.
    pub destruction_deadline: Option<Instant>,
    next_seat: usize,
}

impl Room {
    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| &p.id == id)
    }

    pub fn player_mut(&mut self, id: &PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| &p.id == id)
    }

    pub fn seat_of(&self, id: &PlayerId) -> Option<Seat> {
        self.player(id).map(|p| p.seat)
    }

    pub fn to_info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            code: self.code.clone(),
            name: self.name.clone(),
            visibility: self.visibility,
            host_id: self.host_id.clone(),
            players: self.players.iter().map(|p| p.to_info(&self.host_id)).collect(),
            settings: self.settings.clone(),
            is_game_active: self.is_game_active,
            created_at: self.created_at,
        }
    }

    fn next_host(&self) -> Option<PlayerId> {
        // earliest-joined remaining player, preferring a connected one
        // (spec §4.1 "Host transfer policy").
        self.players
            .iter()
            .find(|p| p.is_connected)
            .or_else(|| self.players.first())
            .map(|p| p.id.clone())
    }
}

fn validate_name(name: &str) -> Result<(), MafiaGameError> {
    let len = name.trim().chars().count();
    if len == 0 || len > 30 {
        return Err(MafiaGameError::InvalidName);
    }
    Ok(())
}

/// Clamps every timer in `settings.timers` to `[TIMER_MIN_SECS, TIMER_MAX_SECS]`
/// (spec §4.2 "Phase timers").
pub fn clamp_settings(settings: &mut RoomSettings) {
    settings.min_players = settings.min_players.max(3);
    settings.max_players = settings.max_players.max(settings.min_players);

    let t = &mut settings.timers;
    for field in [
        &mut t.role_reveal,
        &mut t.mafia_action,
        &mut t.don_action,
        &mut t.detective_action,
        &mut t.doctor_action,
        &mut t.bodyguard_action,
        &mut t.jailor_action,
        &mut t.vigilante_action,
        &mut t.spy_action,
        &mut t.mafia_healer_action,
        &mut t.silencer_action,
        &mut t.serial_killer_action,
        &mut t.cult_leader_action,
        &mut t.arsonist_action,
        &mut t.day_discussion,
        &mut t.voting,
        &mut t.resolution,
    ] {
        *field = (*field).clamp(TIMER_MIN_SECS, TIMER_MAX_SECS);
    }
}

/// Outcome of [`RoomManager::join_room`].
pub struct JoinOutcome {
    pub room_id: RoomId,
    pub is_reconnect: bool,
}

/// Indexes rooms by id and by join code; the one globally-guarded structure
/// in the engine (spec §5), everything else is room-scoped.
#[derive(Default)]
pub struct RoomManager {
    rooms: HashMap<RoomId, Room>,
    code_to_id: HashMap<RoomCode, RoomId>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: RoomId) -> Option<&Room> {
        self.rooms.get(&id)
    }

    pub fn get_mut(&mut self, id: RoomId) -> Option<&mut Room> {
        self.rooms.get_mut(&id)
    }

    pub fn id_for_code(&self, code: &RoomCode) -> Option<RoomId> {
        self.code_to_id.get(code).copied()
    }

    pub fn get_by_code(&self, code: &RoomCode) -> Result<&Room, MafiaGameError> {
        let code = RoomCode::normalize(&code.0);
        self.id_for_code(&code)
            .and_then(|id| self.get(id))
            .ok_or_else(|| MafiaGameError::RoomNotFound(code))
    }

    pub fn get_by_code_mut(&mut self, code: &RoomCode) -> Result<&mut Room, MafiaGameError> {
        let code = RoomCode::normalize(&code.0);
        let id = self
            .id_for_code(&code)
            .ok_or_else(|| MafiaGameError::RoomNotFound(code.clone()))?;
        self.get_mut(id).ok_or(MafiaGameError::RoomNotFound(code))
    }

    pub fn list_public_rooms(&self) -> Vec<RoomInfo> {
        self.rooms
            .values()
            .filter(|r| r.visibility == RoomVisibility::Public && !r.is_game_active)
            .map(Room::to_info)
            .collect()
    }

    #[tracing::instrument(skip_all, fields(name, visibility = field::debug(&visibility)))]
    pub fn create_room<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        host_id: PlayerId,
        host_username: String,
        name: String,
        visibility: RoomVisibility,
        settings: Option<RoomSettings>,
    ) -> Result<RoomId, MafiaGameError> {
        validate_name(&name)?;

        let mut settings = settings.unwrap_or_default();
        clamp_settings(&mut settings);

        let code = self.allocate_code(rng)?;
        let id = RoomId::new();

        let host = Player {
            id: host_id.clone(),
            username: host_username,
            avatar: None,
            status: PlayerStatus::Alive,
            is_connected: true,
            seat: Seat(0),
            eviction_deadline: None,
        };

        let room = Room {
            id,
            code: code.clone(),
            name: Arc::from(name.trim()),
            visibility,
            host_id,
            players: vec![host],
            settings,
            is_game_active: false,
            created_at: SystemTime::now(),
            public_chat: ChatRingBuffer::new(PUBLIC_CHAT_CAPACITY),
            mafia_chat: ChatRingBuffer::new(MAFIA_CHAT_CAPACITY),
            destruction_deadline: None,
            next_seat: 1,
        };

        tracing::info!(room_id = %id, code = %code, "room created");
        self.rooms.insert(id, room);
        self.code_to_id.insert(code, id);

        Ok(id)
    }

    fn allocate_code<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<RoomCode, MafiaGameError> {
        for _ in 0..ROOM_CODE_ALLOC_RETRIES {
            let candidate = generate_room_code(rng);
            if !self.code_to_id.contains_key(&candidate) {
                return Ok(candidate);
            }
        }

        // Widen on the 17th attempt: try an arbitrary number of further
        // draws. Collision here would mean the namespace is effectively
        // exhausted.
        for _ in 0..ROOM_CODE_ALLOC_RETRIES {
            let candidate = generate_room_code(rng);
            if !self.code_to_id.contains_key(&candidate) {
                return Ok(candidate);
            }
        }

        Err(MafiaGameError::Internal(
            "exhausted room code namespace".to_string(),
        ))
    }

    #[tracing::instrument(skip_all, fields(code = %code, user_id = %user_id))]
    pub fn join_room(
        &mut self,
        code: &RoomCode,
        user_id: PlayerId,
        username: String,
    ) -> Result<JoinOutcome, MafiaGameError> {
        let code = RoomCode::normalize(&code.0);
        let room_id = self
            .id_for_code(&code)
            .ok_or_else(|| MafiaGameError::RoomNotFound(code.clone()))?;
        let room = self.rooms.get_mut(&room_id).expect("indexed room exists");

        if let Some(player) = room.player_mut(&user_id) {
            player.is_connected = true;
            player.eviction_deadline = None;
            room.destruction_deadline = None;
            tracing::info!(room_id = %room_id, "player reconnected via join");
            return Ok(JoinOutcome { room_id, is_reconnect: true });
        }

        if room.is_game_active {
            return Err(MafiaGameError::RoomInGame(code));
        }

        if room.players.len() >= room.settings.max_players {
            return Err(MafiaGameError::RoomFull(code));
        }

        let seat = Seat(room.next_seat);
        room.next_seat += 1;
        room.players.push(Player {
            id: user_id,
            username,
            avatar: None,
            status: PlayerStatus::Alive,
            is_connected: true,
            seat,
            eviction_deadline: None,
        });
        room.destruction_deadline = None;

        Ok(JoinOutcome { room_id, is_reconnect: false })
    }

    /// Removes a player from a room. Returns the new host, if host transfer
    /// happened, and whether the room is now empty.
    #[tracing::instrument(skip_all, fields(code = %code, user_id = %user_id))]
    pub fn leave_room(
        &mut self,
        code: &RoomCode,
        user_id: &PlayerId,
        clock: &dyn Clock,
    ) -> Result<(Option<PlayerId>, bool), MafiaGameError> {
        let code = RoomCode::normalize(&code.0);
        let room_id = self
            .id_for_code(&code)
            .ok_or_else(|| MafiaGameError::RoomNotFound(code.clone()))?;
        let room = self.rooms.get_mut(&room_id).expect("indexed room exists");

        let was_host = &room.host_id == user_id;
        room.players.retain(|p| &p.id != user_id);

        if room.players.is_empty() {
            room.destruction_deadline =
                Some(clock.now() + std::time::Duration::from_secs(ROOM_DESTRUCTION_GRACE_SECS));
            return Ok((None, true));
        }

        if was_host {
            let new_host = room.next_host().expect("room is non-empty");
            room.host_id = new_host.clone();
            tracing::info!(room_id = %room_id, new_host = %new_host, "host transferred");
            return Ok((Some(new_host), false));
        }

        Ok((None, false))
    }

    #[tracing::instrument(skip_all, fields(code = %code, by_id = %by_id, target_id = %target_id))]
    pub fn kick_player(
        &mut self,
        code: &RoomCode,
        by_id: &PlayerId,
        target_id: &PlayerId,
    ) -> Result<(), MafiaGameError> {
        let room = self.get_by_code_mut(code)?;

        if &room.host_id != by_id {
            return Err(MafiaGameError::NotAuthorized(by_id.clone()));
        }
        if room.is_game_active {
            return Err(MafiaGameError::RoomInGame(room.code.clone()));
        }

        room.players.retain(|p| &p.id != target_id);
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(code = %code, by_id = %by_id))]
    pub fn update_settings(
        &mut self,
        code: &RoomCode,
        by_id: &PlayerId,
        mut patch: RoomSettings,
    ) -> Result<(), MafiaGameError> {
        let room = self.get_by_code_mut(code)?;

        if &room.host_id != by_id {
            return Err(MafiaGameError::NotAuthorized(by_id.clone()));
        }
        if room.is_game_active {
            return Err(MafiaGameError::RoomInGame(room.code.clone()));
        }

        clamp_settings(&mut patch);
        room.settings = patch;
        Ok(())
    }

    /// Marks a connection disconnected and schedules eviction after the
    /// appropriate grace (spec §4.1 `handleDisconnect`).
    #[tracing::instrument(skip_all, fields(code = %code, user_id = %user_id))]
    pub fn handle_disconnect(
        &mut self,
        code: &RoomCode,
        user_id: &PlayerId,
        clock: &dyn Clock,
    ) -> Result<(), MafiaGameError> {
        let room = self.get_by_code_mut(code)?;
        let grace = if room.is_game_active {
            MID_GAME_DISCONNECT_GRACE_SECS
        } else {
            LOBBY_DISCONNECT_GRACE_SECS
        };

        let player = room
            .player_mut(user_id)
            .ok_or_else(|| MafiaGameError::NotAuthorized(user_id.clone()))?;
        player.is_connected = false;
        player.eviction_deadline = Some(clock.now() + std::time::Duration::from_secs(grace));
        Ok(())
    }

    /// Players whose eviction grace has elapsed, per room. Does not mutate;
    /// callers decide whether eviction means `LEAVE` (mid-game) or a plain
    /// removal (lobby).
    pub fn sweep_evictions(&self, clock: &dyn Clock) -> Vec<(RoomId, PlayerId)> {
        let now = clock.now();
        self.rooms
            .values()
            .flat_map(|room| {
                room.players.iter().filter_map(move |p| {
                    if p.eviction_deadline.is_some_and(|d| d <= now) {
                        Some((room.id, p.id.clone()))
                    } else {
                        None
                    }
                })
            })
            .collect()
    }

    /// Rooms whose destruction grace has elapsed.
    pub fn sweep_destructible(&self, clock: &dyn Clock) -> Vec<RoomId> {
        let now = clock.now();
        self.rooms
            .values()
            .filter(|r| r.destruction_deadline.is_some_and(|d| d <= now))
            .map(|r| r.id)
            .collect()
    }

    pub fn destroy_room(&mut self, id: RoomId) {
        if let Some(room) = self.rooms.remove(&id) {
            self.code_to_id.remove(&room.code);
        }
    }

    pub fn set_game_active(&mut self, id: RoomId, active: bool) {
        if let Some(room) = self.rooms.get_mut(&id) {
            room.is_game_active = active;
        }
    }
}
