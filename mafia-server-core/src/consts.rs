//! Constants governing rooms, timers, and connection bookkeeping (spec §4.1, §5, §7).

/// Default grace period before an empty room is destroyed.
pub const ROOM_DESTRUCTION_GRACE_SECS: u64 = 30;

/// Default disconnect-eviction grace while a room is still in the lobby.
pub const LOBBY_DISCONNECT_GRACE_SECS: u64 = 60;

/// Default disconnect-eviction grace once a game is in progress.
pub const MID_GAME_DISCONNECT_GRACE_SECS: u64 = 120;

/// Room-code length and retry policy: rehash on collision, widen after this
/// many attempts (astronomically unlikely to exhaust at 36^6).
pub const ROOM_CODE_ALLOC_RETRIES: u32 = 16;

/// Per-connection outbound event queue bound; overflow disconnects the
/// connection without ending the game.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Per-player intent rate limits; excess is dropped with `RATE_LIMITED`.
pub const INTENT_RATE_LIMIT_BURST_PER_SEC: u32 = 20;
pub const INTENT_RATE_LIMIT_SUSTAINED_PER_SEC: u32 = 5;

/// Safety valve on the night/day resolution loop: if a game somehow fails
/// to converge, abort it as a draw rather than spin forever.
pub const RESOLUTION_SAFETY_VALVE_ROUNDS: u32 = 100;

/// Flavor text for a night elimination, in the form `<PLAYER> <MESSAGE> the next morning.`
pub const NIGHT_DEATH_MESSAGES: &[&str] = &[
    "was found strangled by an untyped python",
    "was found brutally beat with a mechanical keyboard",
    "was found poisoned from eating expired ketchup",
    "never made it home because of 101 traffic",
    "was found pummelled by what appears to have been a gorilla",
    "was found unresponsive next to a beer tower",
];

/// Flavor text for a vote elimination, in the form `<PLAYER> <MESSAGE> that day.`
pub const DAY_DEATH_MESSAGES: &[&str] = &["was hung for their unforgivable sins"];
