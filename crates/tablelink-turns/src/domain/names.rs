//! Combatant name normalization.
//!
//! Tabletops decorate names ("🔵 Test 2", "⚔️ Goblin's turn"). Two names
//! refer to the same combatant only when their normalized forms are equal;
//! prefixes never match ("Test 2" is not "Test 20").

/// Normalizes a combatant name or observer key.
///
/// Strips leading decoration (emoji, symbols, whitespace), a trailing
/// "'s turn", trailing punctuation, collapses inner whitespace and
/// lowercases.
#[must_use]
pub fn normalize_name(raw: &str) -> String {
    let stripped = raw
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .trim_end_matches(|c: char| !c.is_alphanumeric());
    let lowered = stripped.to_lowercase();

    let without_turn = ["'s turn", "\u{2019}s turn"]
        .iter()
        .find_map(|suffix| lowered.strip_suffix(suffix))
        .unwrap_or(&lowered);

    without_turn
        .trim_end_matches(|c: char| !c.is_alphanumeric())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Returns `true` if both names normalize to the same non-empty form.
#[must_use]
pub fn same_combatant(a: &str, b: &str) -> bool {
    let a = normalize_name(a);
    !a.is_empty() && a == normalize_name(b)
}
