//! Seedable random source (spec §2 "Random Source"): role shuffling, room
//! code generation, and tie-breaks. Thin wrappers over [`rand::Rng`] so call
//! sites stay generic over the injected generator, the same way the teacher
//! crate's `Game::start<S: Rng>` takes its seed.

use rand::Rng;
use rand::seq::IndexedRandom;
use rand::seq::SliceRandom;

use mafia_protocol::RoomCode;

/// Draws a fresh 6-character room code from the alphabet. Callers are
/// responsible for rehashing on collision against the live room index
/// (spec §4.1 "Code allocation").
pub fn generate_room_code<R: Rng + ?Sized>(rng: &mut R) -> RoomCode {
    let code: String = (0..RoomCode::LEN)
        .map(|_| *RoomCode::ALPHABET.choose(rng).expect("alphabet is non-empty") as char)
        .collect();

    RoomCode::normalize(&code)
}

/// Fisher-Yates shuffle in place, used for role assignment (spec §4.2 step 4).
pub fn shuffle<T, R: Rng + ?Sized>(items: &mut [T], rng: &mut R) {
    items.shuffle(rng);
}

/// Uniform pick among a non-empty slice, used for RNG tie-breaks.
pub fn choose<'a, T, R: Rng + ?Sized>(items: &'a [T], rng: &mut R) -> Option<&'a T> {
    items.choose(rng)
}
