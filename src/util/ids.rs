//! Random identifier generation for rooms, players, teams and handoff tokens

use rand::Rng;

/// Alphabet used for every generated identifier (letters, digits, `-` and `_`)
pub const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_";

/// Length of game, team and player ids
pub const ID_LENGTH: usize = 16;

/// Length of handoff tokens (192 bits of entropy)
pub const TOKEN_LENGTH: usize = 32;

pub type GameId = String;
pub type TeamId = String;
pub type PlayerId = String;
pub type Token = String;

/// Generate a random string of `len` characters from [`ID_ALPHABET`].
///
/// Backed by the thread-local CSPRNG, so values are unpredictable as well as unique.
pub fn random_string(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Fresh id for a game, team or player
pub fn new_id() -> String {
    random_string(ID_LENGTH)
}

/// Fresh handoff token
pub fn new_token() -> Token {
    random_string(TOKEN_LENGTH)
}
