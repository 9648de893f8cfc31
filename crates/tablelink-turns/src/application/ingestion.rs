//! Passive initiative ingestion from the tabletop chat log.
//!
//! Each newly appended log entry is offered to a chain of parsers. The
//! structured parser reads inline rolls the tabletop computed itself; the
//! freeform parser is a best-effort regex fallback for typed declarations.
//! It can miss phrasings outside its patterns and can accept a sentence
//! that merely mentions an initiative number; the `[0, 50]` range check is
//! the only guard against the latter.

use std::ops::RangeInclusive;
use std::sync::LazyLock;

use regex::Regex;
use tablelink_core::log::LogEntry;
use tracing::debug;

/// Leading markers of the tracker's own announcements. Entries starting
/// with one of these are never parsed.
pub const ANNOUNCEMENT_MARKERS: &[&str] = &["⚔", "▶", "🔄", "🏁"];

/// Initiative values outside this range are discarded.
pub const INITIATIVE_RANGE: RangeInclusive<i32> = 0..=50;

/// A combatant's initiative as read from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiativeDeclaration {
    /// Combatant name as written in the entry.
    pub name: String,
    /// Initiative total.
    pub initiative: i32,
}

/// A strategy for reading an initiative declaration out of a log entry.
pub trait InitiativeParser: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Returns the declaration in `entry`, if it holds one.
    fn parse(&self, entry: &LogEntry) -> Option<InitiativeDeclaration>;
}

/// Returns `true` if `text` is one of the tracker's own announcements.
#[must_use]
pub fn is_own_announcement(text: &str) -> bool {
    let text = text.trim_start();
    ANNOUNCEMENT_MARKERS
        .iter()
        .any(|marker| text.starts_with(marker))
}

fn mentions_initiative(text: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered.contains("initiative")
        || lowered
            .split_whitespace()
            .any(|word| word.trim_matches(|c: char| !c.is_alphanumeric()) == "init")
}

/// Reads inline rolls whose label mentions initiative.
#[derive(Debug, Default)]
pub struct StructuredRollParser;

impl InitiativeParser for StructuredRollParser {
    fn name(&self) -> &'static str {
        "structured"
    }

    fn parse(&self, entry: &LogEntry) -> Option<InitiativeDeclaration> {
        let roll = entry.inline_roll.as_ref()?;
        let label = roll.label.as_deref().unwrap_or(&entry.text);
        if !mentions_initiative(label) {
            return None;
        }
        let name = entry.speaker.as_deref()?.trim();
        if name.is_empty() {
            return None;
        }
        Some(InitiativeDeclaration {
            name: name.to_owned(),
            initiative: roll.total,
        })
    }
}

// "Initiative for Goblin 2: 12"
static INITIATIVE_FOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:initiative|init)\b.*?\b(?:for|of)\s+(?P<name>.+?)\s*[:=]\s*(?P<value>-?\d+)\s*$")
        .unwrap_or_else(|e| panic!("invalid initiative regex: {e}"))
});

// "Aria rolls initiative: 17", "Brom rolled Initiative: 1d20+2 [12] = 14"
static NAME_ROLLS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?P<name>.+?)\s+(?:rolls?|rolled|has|gets|got)\s+(?:an?\s+)?(?:initiative|init)\b.*?(?P<value>-?\d+)\s*$")
        .unwrap_or_else(|e| panic!("invalid initiative regex: {e}"))
});

// "Goblin's initiative is 12", "Goblin initiative: 12"
static NAME_INITIATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?P<name>.+?)(?:'s|\x{2019}s)?\s+(?:initiative|init)\s*(?:is|[:=])?\s*(?P<value>-?\d+)\s*$")
        .unwrap_or_else(|e| panic!("invalid initiative regex: {e}"))
});

// "Initiative: 17" or "rolls initiative 17", attributed to the speaker.
static SPEAKER_INITIATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:(?:rolls?|rolled)\s+)?(?:initiative|init)\b.*?(?P<value>-?\d+)\s*$")
        .unwrap_or_else(|e| panic!("invalid initiative regex: {e}"))
});

/// Regex fallback for typed initiative declarations.
#[derive(Debug, Default)]
pub struct FreeformParser;

impl FreeformParser {
    fn capture(regex: &Regex, text: &str, speaker: Option<&str>) -> Option<InitiativeDeclaration> {
        let captures = regex.captures(text)?;
        let initiative = captures.name("value")?.as_str().parse::<i32>().ok()?;
        let name = match captures.name("name") {
            Some(name) => name.as_str(),
            None => speaker?,
        }
        .trim();
        if name.is_empty() {
            return None;
        }
        Some(InitiativeDeclaration {
            name: name.to_owned(),
            initiative,
        })
    }
}

impl InitiativeParser for FreeformParser {
    fn name(&self) -> &'static str {
        "freeform"
    }

    fn parse(&self, entry: &LogEntry) -> Option<InitiativeDeclaration> {
        let text = entry.text.as_str();
        if !mentions_initiative(text) {
            return None;
        }
        let speaker = entry.speaker.as_deref();
        Self::capture(&INITIATIVE_FOR, text, speaker)
            .or_else(|| Self::capture(&SPEAKER_INITIATIVE, text, speaker))
            .or_else(|| Self::capture(&NAME_ROLLS, text, speaker))
            .or_else(|| Self::capture(&NAME_INITIATIVE, text, speaker))
    }
}

/// Runs log entries through the parser chain.
pub struct LogIngestor {
    parsers: Vec<Box<dyn InitiativeParser>>,
}

impl Default for LogIngestor {
    fn default() -> Self {
        Self::new(vec![Box::new(StructuredRollParser), Box::new(FreeformParser)])
    }
}

impl LogIngestor {
    /// Create an ingestor trying `parsers` in order.
    #[must_use]
    pub fn new(parsers: Vec<Box<dyn InitiativeParser>>) -> Self {
        Self { parsers }
    }

    /// Returns the first declaration any parser finds in `entry`, unless the
    /// entry is one of the tracker's own announcements or the value is out
    /// of range.
    #[must_use]
    pub fn ingest(&self, entry: &LogEntry) -> Option<InitiativeDeclaration> {
        if is_own_announcement(&entry.text) {
            return None;
        }
        let (parser, declaration) = self
            .parsers
            .iter()
            .find_map(|parser| parser.parse(entry).map(|d| (parser.name(), d)))?;
        if !INITIATIVE_RANGE.contains(&declaration.initiative) {
            debug!(parser, initiative = declaration.initiative, "discarded out-of-range initiative");
            return None;
        }
        debug!(parser, name = %declaration.name, initiative = declaration.initiative, "initiative observed");
        Some(declaration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declaration(name: &str, initiative: i32) -> Option<InitiativeDeclaration> {
        Some(InitiativeDeclaration {
            name: name.into(),
            initiative,
        })
    }

    fn text(speaker: Option<&str>, text: &str) -> LogEntry {
        LogEntry::text(speaker, text)
    }

    #[test]
    fn test_structured_inline_roll() {
        let entry = LogEntry::roll(Some("Aria"), Some("Initiative"), "1d20+3", 17);

        assert_eq!(LogIngestor::default().ingest(&entry), declaration("Aria", 17));
    }

    #[test]
    fn test_structured_roll_without_initiative_label_is_ignored() {
        let entry = LogEntry::roll(Some("Aria"), Some("Stealth"), "1d20+5", 17);

        assert_eq!(LogIngestor::default().ingest(&entry), None);
    }

    #[test]
    fn test_freeform_patterns() {
        let ingestor = LogIngestor::default();

        assert_eq!(
            ingestor.ingest(&text(None, "Aria rolls initiative: 17")),
            declaration("Aria", 17)
        );
        assert_eq!(
            ingestor.ingest(&text(None, "Brom rolled Initiative: 1d20+2 [12] = 14")),
            declaration("Brom", 14)
        );
        assert_eq!(
            ingestor.ingest(&text(None, "Initiative for Goblin 2: 12")),
            declaration("Goblin 2", 12)
        );
        assert_eq!(
            ingestor.ingest(&text(None, "Goblin's initiative is 9")),
            declaration("Goblin", 9)
        );
        assert_eq!(
            ingestor.ingest(&text(Some("Cole"), "Initiative: 11")),
            declaration("Cole", 11)
        );
    }

    #[test]
    fn test_unrelated_text_is_ignored() {
        let ingestor = LogIngestor::default();

        assert_eq!(ingestor.ingest(&text(Some("Aria"), "I attack the goblin for 12")), None);
        assert_eq!(ingestor.ingest(&text(None, "Initiative: 11")), None);
    }

    #[test]
    fn test_own_announcements_are_excluded() {
        let ingestor = LogIngestor::default();

        assert_eq!(
            ingestor.ingest(&text(None, "⚔️ Combat started: Aria has initiative 17")),
            None
        );
        assert_eq!(ingestor.ingest(&text(None, "▶️ Aria's turn (initiative 17)")), None);
        assert!(is_own_announcement("  🔄 Round 2"));
        assert!(!is_own_announcement("Aria rolls initiative: 17"));
    }

    #[test]
    fn test_out_of_range_values_are_discarded() {
        let ingestor = LogIngestor::default();

        assert_eq!(ingestor.ingest(&text(None, "Aria rolls initiative: 51")), None);
        assert_eq!(ingestor.ingest(&text(None, "Aria rolls initiative: -2")), None);
        assert_eq!(
            ingestor.ingest(&LogEntry::roll(Some("Aria"), Some("Initiative"), "1d20+40", 58)),
            None
        );
        assert_eq!(ingestor.ingest(&text(None, "Aria rolls initiative: 0")), declaration("Aria", 0));
        assert_eq!(ingestor.ingest(&text(None, "Aria rolls initiative: 50")), declaration("Aria", 50));
    }

    #[test]
    fn test_custom_parser_chain() {
        struct Always;
        impl InitiativeParser for Always {
            fn name(&self) -> &'static str {
                "always"
            }
            fn parse(&self, _entry: &LogEntry) -> Option<InitiativeDeclaration> {
                declaration("Dummy", 1)
            }
        }
        let ingestor = LogIngestor::new(vec![Box::new(Always)]);

        assert_eq!(ingestor.ingest(&text(None, "anything")), declaration("Dummy", 1));
        assert_eq!(ingestor.ingest(&text(None, "🏁 Combat ended")), None);
    }
}
