//! Authoritative server core for a real-time, multiplayer social-deduction
//! game: Room Manager, Game State Machine, and Event Dispatcher wired into
//! one engine ([`MafiaGameServer`]) that a thin transport layer drives.
//!
//! Generalizes the teacher's single `MafiaGameServer(Arc<RwLock<Inner>>)`
//! wrapping one global client table and at most one active game into many
//! independent rooms, each running its own [`game::Game`] behind its own
//! lock, while the room index itself stays under one globally-guarded
//! structure — the split spec §5 and §9 call for ("parallel execution
//! across rooms, single-writer per room"; "shared mutable state restricted
//! to the room index [and] the connection registry").

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use mafia_protocol::Audience;
use mafia_protocol::ChatKind;
use mafia_protocol::ChatMessage;
use mafia_protocol::Event;
use mafia_protocol::GameRecord;
use mafia_protocol::MessageId;
use mafia_protocol::PlayerId;
use mafia_protocol::RoomCode;
use mafia_protocol::RoomId;
use mafia_protocol::RoomInfo;
use mafia_protocol::RoomSettings;
use mafia_protocol::RoomVisibility;
use mafia_protocol::SessionToken;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

pub mod auth;
pub mod clock;
mod consts;
pub mod dispatcher;
mod error;
pub mod game;
pub mod protocol;
pub mod ratelimit;
pub mod room;

pub use auth::SessionVerifier;
pub use auth::TrustingVerifier;
pub use auth::VerifiedUser;
pub use error::MafiaGameError;

use clock::Clock;
use clock::SystemClock;
use dispatcher::Dispatcher;
use dispatcher::resolve_audience;
use game::Game;
use ratelimit::RateLimiter;
use room::RoomManager;

/// Immutable per-room game record handed to the external persistence
/// collaborator on `GAME_OVER` (spec §6 "Persistence collaborator").
/// Recorder failure is logged, never propagated.
pub trait GameRecorder: Send + Sync {
    fn record(&self, record: GameRecord);
}

/// Default recorder: drops the record after logging it. Real deployments
/// inject a collaborator backed by durable storage.
#[derive(Default)]
pub struct NoopRecorder;

impl GameRecorder for NoopRecorder {
    fn record(&self, record: GameRecord) {
        tracing::info!(room = %record.room_name, winner = ?record.winner, "game record dropped (no recorder configured)");
    }
}

pub struct MafiaGameServerConfig {
    pub verifier: Arc<dyn SessionVerifier>,
    pub recorder: Arc<dyn GameRecorder>,
    pub clock: Arc<dyn Clock>,
}

impl Default for MafiaGameServerConfig {
    fn default() -> Self {
        Self {
            verifier: Arc::new(TrustingVerifier),
            recorder: Arc::new(NoopRecorder),
            clock: Arc::new(SystemClock),
        }
    }
}

/// A single connection's identity and the room it is currently seated in,
/// if any. Keyed by `SessionToken`, the per-connection credential (spec §6
/// "Auth collaborator"); `player_id` is the stable identity used everywhere
/// else in the core.
struct Session {
    player_id: PlayerId,
    username: String,
    room_code: Option<RoomCode>,
}

/// Per-room game runtime: the [`Game`] plus the RNG stream driving its
/// ongoing tie-breaks, behind its own lock so rooms never block each other
/// (spec §5 "parallel execution across rooms, single-writer per room").
struct RoomRuntime {
    game: Game,
    rng: StdRng,
    started_at: Instant,
}

struct Engine {
    rooms: RwLock<RoomManager>,
    runtimes: RwLock<HashMap<RoomId, Arc<Mutex<RoomRuntime>>>>,
    sessions: RwLock<HashMap<SessionToken, Session>>,
    dispatcher: Mutex<Dispatcher>,
    rate_limiter: Mutex<RateLimiter>,
    next_message_id: std::sync::atomic::AtomicU64,
    config: MafiaGameServerConfig,
}

/// Manages every room's membership, game state, and outbound event
/// dispatch. Cloning shares the same underlying engine (cheap `Arc` clone),
/// matching the teacher's `#[derive(Clone)] MafiaGameServer`.
#[derive(Clone)]
pub struct MafiaGameServer(Arc<Engine>);

impl MafiaGameServer {
    pub fn new(config: MafiaGameServerConfig) -> Self {
        MafiaGameServer(Arc::new(Engine {
            rooms: RwLock::new(RoomManager::new()),
            runtimes: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            dispatcher: Mutex::new(Dispatcher::new()),
            rate_limiter: Mutex::new(RateLimiter::new()),
            next_message_id: std::sync::atomic::AtomicU64::new(0),
            config,
        }))
    }

    fn clock(&self) -> &dyn Clock {
        self.0.config.clock.as_ref()
    }

    fn next_message_id(&self) -> MessageId {
        MessageId(self.0.next_message_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
    }

    fn player_of(&self, token: SessionToken) -> Result<PlayerId, MafiaGameError> {
        self.0
            .sessions
            .read()
            .unwrap()
            .get(&token)
            .map(|s| s.player_id.clone())
            .ok_or(MafiaGameError::InvalidSessionToken(token))
    }

    fn username_of(&self, token: SessionToken) -> Result<String, MafiaGameError> {
        self.0
            .sessions
            .read()
            .unwrap()
            .get(&token)
            .map(|s| s.username.clone())
            .ok_or(MafiaGameError::InvalidSessionToken(token))
    }

    fn room_of(&self, token: SessionToken) -> Result<RoomCode, MafiaGameError> {
        self.0
            .sessions
            .read()
            .unwrap()
            .get(&token)
            .and_then(|s| s.room_code.clone())
            .ok_or(MafiaGameError::RoomNotFound(RoomCode::normalize("")))
    }

    fn rate_limit(&self, id: &PlayerId) -> Result<(), MafiaGameError> {
        self.0.rate_limiter.lock().unwrap().check(id, self.clock())
    }

    /// Validates a connection credential via the injected [`SessionVerifier`]
    /// and mints a fresh [`SessionToken`] for it (spec §6 "Auth
    /// collaborator"). Does not seat the player in any room.
    pub fn connect(&self, credential: &str) -> Result<(PlayerId, SessionToken), MafiaGameError> {
        let verified = self.0.config.verifier.verify(credential)?;
        let token = SessionToken::new();

        self.0.sessions.write().unwrap().insert(
            token,
            Session {
                player_id: verified.user_id.clone(),
                username: verified.username.clone(),
                room_code: None,
            },
        );
        self.0.dispatcher.lock().unwrap().ensure(&verified.user_id);

        Ok((verified.user_id, token))
    }

    /// Marks the connection's player disconnected in whatever room they're
    /// seated in, scheduling the appropriate grace eviction (spec §4.1
    /// `handleDisconnect`). The session mapping itself is retained so
    /// `take_events` still works for the disconnect-notification fan-out.
    pub fn disconnect(&self, token: SessionToken) -> Result<(), MafiaGameError> {
        let room_code = {
            let sessions = self.0.sessions.read().unwrap();
            let session = sessions.get(&token).ok_or(MafiaGameError::InvalidSessionToken(token))?;
            session.room_code.clone()
        };

        let Some(code) = room_code else {
            return Ok(());
        };

        let player_id = self.player_of(token)?;
        {
            let mut rooms = self.0.rooms.write().unwrap();
            rooms.handle_disconnect(&code, &player_id, self.clock())?;
        }

        self.broadcast_room(&code, Audience::AllInRoom, Event::PlayerDisconnected(player_id));
        Ok(())
    }

    fn runtime_for(&self, room_id: RoomId) -> Option<Arc<Mutex<RoomRuntime>>> {
        self.0.runtimes.read().unwrap().get(&room_id).cloned()
    }

    /// Routes `event` to every recipient of `audience` within `code`'s room,
    /// pushing to each recipient's bounded outbound queue and disconnecting
    /// any that overflow (spec §5).
    fn broadcast_room(&self, code: &RoomCode, audience: Audience, event: Event) {
        let rooms = self.0.rooms.read().unwrap();
        let Ok(room) = rooms.get_by_code(code) else { return };
        let runtime = self.runtime_for(room.id);
        let game_guard = runtime.as_ref().map(|r| r.lock().unwrap());

        let recipients = resolve_audience(room, game_guard.as_ref().map(|g| &g.game), &audience);
        drop(game_guard);

        let overflowed = self.0.dispatcher.lock().unwrap().route(&recipients, event);
        drop(rooms);

        for id in overflowed {
            tracing::warn!(player = %id, "outbound queue overflow, disconnecting connection");
            let _ = self.force_disconnect_player(code, &id);
        }
    }

    fn dispatch_many(&self, code: &RoomCode, events: Vec<(Audience, Event)>) {
        for (audience, event) in events {
            self.broadcast_room(code, audience, event);
        }
    }

    fn force_disconnect_player(&self, code: &RoomCode, id: &PlayerId) -> Result<(), MafiaGameError> {
        let mut rooms = self.0.rooms.write().unwrap();
        rooms.handle_disconnect(code, id, self.clock())
    }

    /// Handles `room:create` (spec §4.1, §6).
    pub fn create_room(
        &self,
        token: SessionToken,
        name: String,
        visibility: RoomVisibility,
        settings: Option<RoomSettings>,
    ) -> Result<RoomInfo, MafiaGameError> {
        let player_id = self.player_of(token)?;
        self.rate_limit(&player_id)?;
        let username = self.username_of(token)?;

        let mut rng = rand::rng();
        let room_id = {
            let mut rooms = self.0.rooms.write().unwrap();
            rooms.create_room(&mut rng, player_id.clone(), username, name, visibility, settings)?
        };

        {
            let mut sessions = self.0.sessions.write().unwrap();
            if let Some(session) = sessions.get_mut(&token) {
                let code = self.0.rooms.read().unwrap().get(room_id).unwrap().code.clone();
                session.room_code = Some(code);
            }
        }

        let info = {
            let rooms = self.0.rooms.read().unwrap();
            rooms.get(room_id).expect("just created").to_info()
        };

        // `IntentAck` carries no payload (spec §6 "room:create ... →
        // {success, room|error}" is satisfied via the normal event stream
        // rather than forking a second payload channel onto the ack).
        self.broadcast_room(&info.code, Audience::Player(player_id), Event::RoomUpdated(info.clone()));

        Ok(info)
    }

    /// Handles `room:join` (spec §4.1, §6). Returns the room view and
    /// whether this was a reconnect.
    pub fn join_room(
        &self,
        token: SessionToken,
        code: RoomCode,
    ) -> Result<(RoomInfo, bool), MafiaGameError> {
        let player_id = self.player_of(token)?;
        self.rate_limit(&player_id)?;
        let username = self.username_of(token)?;

        let outcome = {
            let mut rooms = self.0.rooms.write().unwrap();
            rooms.join_room(&code, player_id.clone(), username)?
        };

        {
            let mut sessions = self.0.sessions.write().unwrap();
            if let Some(session) = sessions.get_mut(&token) {
                session.room_code = Some(RoomCode::normalize(&code.0));
            }
        }

        let info = {
            let rooms = self.0.rooms.read().unwrap();
            rooms.get(outcome.room_id).expect("just joined").to_info()
        };

        if outcome.is_reconnect {
            self.send_reconnect_snapshot(outcome.room_id, &player_id);
        } else {
            self.broadcast_room(
                &info.code,
                Audience::AllInRoom,
                Event::RoomPlayerJoined(info.players.last().expect("just joined").clone()),
            );
        }
        self.broadcast_room(&info.code, Audience::AllInRoom, Event::RoomUpdated(info.clone()));

        Ok((info, outcome.is_reconnect))
    }

    /// Reconnect snapshot (spec §4.3 "Reconnect snapshot"): room info, a
    /// private role reveal, a private game-state view, then the public and
    /// (if applicable) mafia chat replays, in that order.
    fn send_reconnect_snapshot(&self, room_id: RoomId, player_id: &PlayerId) {
        let rooms = self.0.rooms.read().unwrap();
        let Some(room) = rooms.get(room_id) else { return };
        let code = room.code.clone();

        self.broadcast_room(&code, Audience::Player(player_id.clone()), Event::RoomUpdated(room.to_info()));

        let runtime = self.runtime_for(room_id);
        if let Some(runtime) = runtime {
            let runtime = runtime.lock().unwrap();
            let view = runtime.game.view_for(player_id);
            if let Some(role) = view.your_role {
                self.broadcast_room(
                    &code,
                    Audience::Player(player_id.clone()),
                    Event::GameRoleReveal { role, team: role.team(), teammates: view.teammates.clone() },
                );
            }
            self.broadcast_room(&code, Audience::Player(player_id.clone()), Event::GameStateUpdate(view));
        }

        for msg in room.public_chat.replay() {
            self.broadcast_room(&code, Audience::Player(player_id.clone()), Event::DayChat(msg.clone()));
        }
        let is_mafia = runtime
            .as_ref()
            .map(|r| r.lock().unwrap().game.team_of_public(player_id) == Some(mafia_protocol::Team::Mafia))
            .unwrap_or(false);
        if is_mafia {
            for msg in room.mafia_chat.replay() {
                self.broadcast_room(&code, Audience::Player(player_id.clone()), Event::MafiaChat(msg.clone()));
            }
        }

        self.broadcast_room(&code, Audience::AllInRoom, Event::PlayerReconnected(player_id.clone()));
    }

    /// Handles `room:leave` (spec §4.1, §4.2 "Player departure mid-game").
    pub fn leave_room(&self, token: SessionToken) -> Result<(), MafiaGameError> {
        let player_id = self.player_of(token)?;
        let code = self.room_of(token)?;

        let (new_host, became_empty) = {
            let mut rooms = self.0.rooms.write().unwrap();
            rooms.leave_room(&code, &player_id, self.clock())?
        };

        {
            let mut sessions = self.0.sessions.write().unwrap();
            if let Some(session) = sessions.get_mut(&token) {
                session.room_code = None;
            }
        }

        let room_id = {
            let rooms = self.0.rooms.read().unwrap();
            rooms.get_by_code(&code).ok().map(|r| r.id)
        };

        if let Some(room_id) = room_id {
            if let Some(runtime) = self.runtime_for(room_id) {
                let events = {
                    let mut runtime = runtime.lock().unwrap();
                    runtime.game.handle_departure(&player_id)
                };
                self.dispatch_many(&code, events);
                self.maybe_finish_game(room_id, &code);
            }
        }

        self.broadcast_room(&code, Audience::AllInRoom, Event::RoomPlayerLeft(player_id));
        if let Some(host) = new_host {
            if let Some(room_id) = room_id {
                let rooms = self.0.rooms.read().unwrap();
                if let Some(room) = rooms.get(room_id) {
                    self.broadcast_room(&code, Audience::AllInRoom, Event::RoomUpdated(room.to_info()));
                }
            }
            tracing::info!(new_host = %host, "host transferred");
        }

        if became_empty {
            self.0.runtimes.write().unwrap().remove(&room_id.unwrap_or(RoomId::new()));
        }

        Ok(())
    }

    /// Handles `room:kick` (spec §4.1).
    pub fn kick_player(&self, token: SessionToken, target_id: PlayerId) -> Result<(), MafiaGameError> {
        let player_id = self.player_of(token)?;
        let code = self.room_of(token)?;

        {
            let mut rooms = self.0.rooms.write().unwrap();
            rooms.kick_player(&code, &player_id, &target_id)?
        }

        if let Some((_, session)) = self
            .0
            .sessions
            .write()
            .unwrap()
            .iter_mut()
            .find(|(_, s)| s.player_id == target_id && s.room_code.as_ref() == Some(&code))
        {
            session.room_code = None;
        }

        self.broadcast_room(&code, Audience::AllInRoom, Event::RoomPlayerKicked(target_id));
        Ok(())
    }

    /// Handles `room:updateSettings` (spec §4.1).
    pub fn update_settings(&self, token: SessionToken, patch: RoomSettings) -> Result<(), MafiaGameError> {
        let player_id = self.player_of(token)?;
        let code = self.room_of(token)?;

        {
            let mut rooms = self.0.rooms.write().unwrap();
            rooms.update_settings(&code, &player_id, patch)?;
        }

        let rooms = self.0.rooms.read().unwrap();
        let room = rooms.get_by_code(&code)?;
        self.broadcast_room(&code, Audience::AllInRoom, Event::RoomUpdated(room.to_info()));
        Ok(())
    }

    /// Handles `room:list` (spec §4.1 `listPublicRooms`).
    pub fn list_public_rooms(&self) -> Vec<RoomInfo> {
        self.0.rooms.read().unwrap().list_public_rooms()
    }

    /// Handles `game:start` (spec §4.2 role assignment). Caller supplies the
    /// RNG stream so tests get deterministic role shuffles, mirroring the
    /// teacher's `Game::start<S: Rng>`.
    pub fn start_game<R: Rng + ?Sized>(&self, token: SessionToken, seed: &mut R) -> Result<(), MafiaGameError> {
        let player_id = self.player_of(token)?;
        let code = self.room_of(token)?;

        let (room_id, settings, player_ids) = {
            let rooms = self.0.rooms.read().unwrap();
            let room = rooms.get_by_code(&code)?;
            if room.host_id != player_id {
                return Err(MafiaGameError::NotAuthorized(player_id));
            }
            if room.is_game_active {
                return Err(MafiaGameError::GameInProgress(code.clone()));
            }
            (room.id, room.settings.clone(), room.players.iter().map(|p| p.id.clone()).collect::<Vec<_>>())
        };

        let (game, events) = Game::start(settings, player_ids, self.clock(), seed)?;
        let room_rng = StdRng::seed_from_u64(seed.random());

        self.0.runtimes.write().unwrap().insert(
            room_id,
            Arc::new(Mutex::new(RoomRuntime { game, rng: room_rng, started_at: Instant::now() })),
        );
        self.0.rooms.write().unwrap().set_game_active(room_id, true);

        self.dispatch_many(&code, events);
        Ok(())
    }

    fn with_runtime<T>(
        &self,
        code: &RoomCode,
        f: impl FnOnce(&mut RoomRuntime) -> Result<(T, Vec<(Audience, Event)>), MafiaGameError>,
    ) -> Result<T, MafiaGameError> {
        let room_id = {
            let rooms = self.0.rooms.read().unwrap();
            rooms.get_by_code(code)?.id
        };
        let runtime = self
            .runtime_for(room_id)
            .ok_or_else(|| MafiaGameError::NoGameInProgress(code.clone()))?;

        let (result, events) = {
            let mut runtime = runtime.lock().unwrap();
            f(&mut runtime)?
        };

        self.dispatch_many(code, events);
        self.maybe_finish_game(room_id, code);
        Ok(result)
    }

    /// Handles `night:action` (spec §4.2 "Action intake"): the server
    /// infers the action kind from the acting player's role and the
    /// current phase.
    pub fn submit_night_action(&self, token: SessionToken, target_id: Option<PlayerId>) -> Result<(), MafiaGameError> {
        let player_id = self.player_of(token)?;
        self.rate_limit(&player_id)?;
        let code = self.room_of(token)?;

        self.with_runtime(&code, |runtime| {
            let events = runtime.game.submit_night_action(&player_id, target_id)?;
            Ok(((), events))
        })
    }

    /// Handles `vote:cast` (spec §4.2 "Voting"). Idempotent: recasting
    /// before timer expiry overwrites the prior submission (last write
    /// wins, spec §7 "Retries").
    pub fn cast_vote(&self, token: SessionToken, target_id: Option<PlayerId>) -> Result<(), MafiaGameError> {
        let player_id = self.player_of(token)?;
        self.rate_limit(&player_id)?;
        let code = self.room_of(token)?;
        let clock = self.clock();

        self.with_runtime(&code, |runtime| {
            let RoomRuntime { game, rng, .. } = &mut *runtime;
            let events = game.cast_vote(&player_id, target_id, clock, rng)?;
            Ok(((), events))
        })
    }

    /// Handles `vote:requestRemoval` (spec §4.2 "Forced transitions"):
    /// host-only, 2-second notice before the early `VOTING` entry.
    pub fn request_removal_vote(&self, token: SessionToken, target_id: PlayerId) -> Result<(), MafiaGameError> {
        let player_id = self.player_of(token)?;
        let code = self.room_of(token)?;

        {
            let rooms = self.0.rooms.read().unwrap();
            let room = rooms.get_by_code(&code)?;
            if room.host_id != player_id {
                return Err(MafiaGameError::NotAuthorized(player_id));
            }
        }

        self.with_runtime(&code, |runtime| {
            runtime.game.request_removal_vote(target_id)?;
            Ok(((), Vec::new()))
        })
    }

    fn chat_ring_event(&self, code: &RoomCode, kind: ChatKind, sender: &PlayerId, content: String) -> Result<ChatMessage, MafiaGameError> {
        let trimmed = content.trim();
        if trimmed.is_empty() || trimmed.chars().count() > 500 {
            return Err(MafiaGameError::InvalidChatContent);
        }

        let rooms = self.0.rooms.read().unwrap();
        let room = rooms.get_by_code(code)?;
        let sender_username = room
            .player(sender)
            .map(|p| p.username.clone())
            .unwrap_or_else(|| sender.to_string());

        Ok(ChatMessage {
            id: self.next_message_id(),
            room_id: room.id,
            sender_id: Some(sender.clone()),
            sender_username,
            content: trimmed.to_string(),
            kind,
            timestamp_ms: 0,
        })
    }

    /// Handles `day:chat` (spec §3 "Chat message", §4.3). Silenced players
    /// (Silencer night-action, spec §4.2 step 3) are rejected during the
    /// day they were silenced for.
    pub fn day_chat(&self, token: SessionToken, content: String) -> Result<(), MafiaGameError> {
        let player_id = self.player_of(token)?;
        self.rate_limit(&player_id)?;
        let code = self.room_of(token)?;

        if let Some(runtime) = {
            let room_id = self.0.rooms.read().unwrap().get_by_code(&code)?.id;
            self.runtime_for(room_id)
        } {
            if runtime.lock().unwrap().game.is_silenced(&player_id) {
                return Err(MafiaGameError::NotAuthorized(player_id));
            }
        }

        let msg = self.chat_ring_event(&code, ChatKind::Player, &player_id, content)?;
        {
            let mut rooms = self.0.rooms.write().unwrap();
            let room = rooms.get_by_code_mut(&code)?;
            room.public_chat.push(msg.clone());
        }
        self.broadcast_room(&code, Audience::AllInRoom, Event::DayChat(msg));
        Ok(())
    }

    /// Handles `mafia:chat` (spec §3, §4.3 "private information isolation":
    /// only `MAFIA_TEAM` sees these).
    pub fn mafia_chat(&self, token: SessionToken, content: String) -> Result<(), MafiaGameError> {
        let player_id = self.player_of(token)?;
        self.rate_limit(&player_id)?;
        let code = self.room_of(token)?;

        {
            let room_id = self.0.rooms.read().unwrap().get_by_code(&code)?.id;
            let runtime = self
                .runtime_for(room_id)
                .ok_or_else(|| MafiaGameError::NoGameInProgress(code.clone()))?;
            let runtime = runtime.lock().unwrap();
            if runtime.game.team_of_public(&player_id) != Some(mafia_protocol::Team::Mafia) {
                return Err(MafiaGameError::NotAuthorized(player_id));
            }
        }

        let msg = self.chat_ring_event(&code, ChatKind::Mafia, &player_id, content)?;
        {
            let mut rooms = self.0.rooms.write().unwrap();
            let room = rooms.get_by_code_mut(&code)?;
            room.mafia_chat.push(msg.clone());
        }
        self.broadcast_room(&code, Audience::MafiaTeam, Event::MafiaChat(msg));
        Ok(())
    }

    /// Handles `player:reconnect` (spec §6): re-seats the connection's
    /// already-known player id in a room it was previously a member of.
    /// `user_id` is the identity the client claims to be resuming; the
    /// engine rejects the request if it doesn't match the credential this
    /// connection verified to at `connect` time, so one connection can't
    /// resume another player's seat.
    pub fn reconnect(&self, token: SessionToken, code: RoomCode, user_id: PlayerId) -> Result<RoomInfo, MafiaGameError> {
        let player_id = self.player_of(token)?;
        if player_id != user_id {
            return Err(MafiaGameError::NotAuthorized(player_id));
        }
        self.join_room(token, code).map(|(info, _)| info)
    }

    /// Drains every event queued for this connection's player (transport
    /// calls this to pump outbound frames).
    pub fn take_events(&self, token: SessionToken) -> Result<Box<[Event]>, MafiaGameError> {
        let player_id = self.player_of(token)?;
        Ok(self.0.dispatcher.lock().unwrap().take(&player_id))
    }

    /// Advances every active room's game by one tick and sweeps
    /// disconnect/destruction grace timers (spec §5 "Timers"). Intended to
    /// be called at 1 Hz by [`Self::start_server_ticker`] or an externally
    /// driven loop.
    pub fn do_tick(&self) {
        let room_ids: Vec<RoomId> = self.0.runtimes.read().unwrap().keys().copied().collect();

        for room_id in room_ids {
            let Some(runtime) = self.runtime_for(room_id) else { continue };
            let code = {
                let rooms = self.0.rooms.read().unwrap();
                match rooms.get(room_id) {
                    Some(room) => room.code.clone(),
                    None => continue,
                }
            };

            let events = {
                let mut runtime = runtime.lock().unwrap();
                let clock = self.clock();
                // Split borrow: `poll_tick` needs `&mut Game` and `&mut Rng`
                // from the same guard.
                let RoomRuntime { game, rng, .. } = &mut *runtime;
                game.poll_tick(clock, rng)
            };

            self.dispatch_many(&code, events);
            self.maybe_finish_game(room_id, &code);
        }

        self.sweep_room_lifecycle();
    }

    fn maybe_finish_game(&self, room_id: RoomId, code: &RoomCode) {
        let Some(runtime) = self.runtime_for(room_id) else { return };
        let is_over = runtime.lock().unwrap().game.is_over();
        if !is_over {
            return;
        }

        let record = {
            let runtime = runtime.lock().unwrap();
            let rooms = self.0.rooms.read().unwrap();
            let room_name = rooms.get(room_id).map(|r| r.name.clone()).unwrap_or_else(|| Arc::from(""));
            let duration = runtime.started_at.elapsed().as_secs();
            runtime.game.record(room_name, duration)
        };

        self.0.config.recorder.record(record);
        self.0.rooms.write().unwrap().set_game_active(room_id, false);
        self.0.runtimes.write().unwrap().remove(&room_id);
    }

    /// Sweeps eviction and room-destruction grace timers (spec §4.1, §5
    /// "Cancellation"). Players whose grace elapsed mid-game are treated as
    /// a `LEAVE`; in the lobby they're simply removed.
    fn sweep_room_lifecycle(&self) {
        let evictions = self.0.rooms.read().unwrap().sweep_evictions(self.clock());

        for (room_id, player_id) in evictions {
            let code = {
                let rooms = self.0.rooms.read().unwrap();
                match rooms.get(room_id) {
                    Some(room) => room.code.clone(),
                    None => continue,
                }
            };

            if let Some(runtime) = self.runtime_for(room_id) {
                let events = runtime.lock().unwrap().game.handle_departure(&player_id);
                self.dispatch_many(&code, events);
                self.maybe_finish_game(room_id, &code);
            }

            let _ = self.0.rooms.write().unwrap().leave_room(&code, &player_id, self.clock());
            self.0.dispatcher.lock().unwrap().forget(&player_id);
            self.0.rate_limiter.lock().unwrap().remove(&player_id);
            self.broadcast_room(&code, Audience::AllInRoom, Event::RoomPlayerLeft(player_id));
        }

        let destructible = self.0.rooms.read().unwrap().sweep_destructible(self.clock());
        for room_id in destructible {
            self.0.rooms.write().unwrap().destroy_room(room_id);
            self.0.runtimes.write().unwrap().remove(&room_id);
        }
    }

    /// Starts a background thread ticking the server at `tick_rate`
    /// (default 1 Hz per spec §4.2 "Phase timers"), stoppable via the
    /// returned [`TickerShutdown`].
    pub fn start_server_ticker(&self, tick_rate: Duration) -> (TickerShutdown, JoinHandle<()>) {
        let server = self.clone();
        let shutdown = TickerShutdown::new();

        let handle = thread::spawn({
            let shutdown = shutdown.clone();
            move || {
                loop {
                    if shutdown.is_shutdown() {
                        return;
                    }
                    server.do_tick();
                    thread::sleep(tick_rate);
                }
            }
        });

        (shutdown, handle)
    }
}

#[derive(Clone)]
pub struct TickerShutdown(Arc<AtomicBool>);

impl TickerShutdown {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    fn is_shutdown(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn do_shutdown(&self) {
        self.0.store(true, std::sync::atomic::Ordering::Relaxed);
    }
}
