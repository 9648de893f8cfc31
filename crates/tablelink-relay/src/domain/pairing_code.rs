//! Pairing codes.
//!
//! Codes are short enough to type from a screen and drawn from an alphabet
//! without look-alike characters (no `0/O`, `1/I`).

use tablelink_core::rng::DeterministicRng;

/// Characters a code may contain.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of every code.
pub const CODE_LENGTH: usize = 6;

/// Draws a fresh code.
#[must_use]
pub fn generate_code(rng: &mut dyn DeterministicRng) -> String {
    let last = u32::try_from(CODE_ALPHABET.len() - 1).unwrap_or(u32::MAX);
    (0..CODE_LENGTH)
        .map(|_| {
            let index = rng.next_u32_range(0, last) as usize;
            char::from(CODE_ALPHABET[index.min(CODE_ALPHABET.len() - 1)])
        })
        .collect()
}

/// Canonical form of a code as typed by a user: uppercase, with spaces and
/// dashes removed.
#[must_use]
pub fn normalize_code(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_uppercase()
}
