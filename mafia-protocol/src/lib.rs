//! Data shared by the Mafia server core and its clients: identifiers, the
//! role catalog, room/game views, chat, and the wire-level intent/event
//! vocabulary.

mod chat;
mod event;
mod game;
mod ids;
mod intent;
mod role;
mod room;

pub use chat::ChatKind;
pub use chat::ChatMessage;
pub use chat::ChatRingBuffer;
pub use chat::MAFIA_CHAT_CAPACITY;
pub use chat::PUBLIC_CHAT_CAPACITY;
pub use event::Audience;
pub use event::Event;
pub use game::DeathCause;
pub use game::DeathRecord;
pub use game::GameOutcome;
pub use game::GameRecord;
pub use game::GameStateView;
pub use game::NIGHT_PIPELINE;
pub use game::Phase;
pub use game::WinCondition;
pub use ids::MessageId;
pub use ids::PlayerId;
pub use ids::RoomCode;
pub use ids::RoomId;
pub use ids::Seat;
pub use ids::SessionToken;
pub use intent::AckError;
pub use intent::CorrelationId;
pub use intent::Intent;
pub use intent::IntentAck;
pub use intent::IntentEnvelope;
pub use role::NightActionKind;
pub use role::Role;
pub use role::RoleCatalogEntry;
pub use role::Team;
pub use role::catalog_entry;
pub use room::DEFAULT_MAX_PLAYERS;
pub use room::DEFAULT_MIN_PLAYERS;
pub use room::PlayerInfo;
pub use room::PlayerStatus;
pub use room::RoomInfo;
pub use room::RoomSettings;
pub use room::RoomVisibility;
pub use room::TIMER_MAX_SECS;
pub use room::TIMER_MIN_SECS;
pub use room::TieBreakPolicy;
pub use room::TimerTable;
