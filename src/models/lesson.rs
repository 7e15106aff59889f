use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Remaining-seat count at or below which a lesson counts as almost full.
const ALMOST_FULL_THRESHOLD: u32 = 3;

/// Schedule panels start with a five-character time prefix ("10:30");
/// anything shorter is not a lesson panel.
const TIME_PREFIX_CHARS: usize = 5;

static REMAINING_RE: OnceLock<Regex> = OnceLock::new();

fn remaining_re() -> &'static Regex {
    REMAINING_RE.get_or_init(|| Regex::new(r"\((\d+)\)").expect("remaining-seat pattern is valid"))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    Available,
    AlmostFull,
    Full,
    Unknown,
}

impl LessonStatus {
    /// Classify a remaining-seat count scraped from the booking page.
    pub fn from_remaining(remaining: u32) -> Self {
        match remaining {
            0 => LessonStatus::Full,
            r if r <= ALMOST_FULL_THRESHOLD => LessonStatus::AlmostFull,
            _ => LessonStatus::Available,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LessonStatus::Available => "available",
            LessonStatus::AlmostFull => "almost_full",
            LessonStatus::Full => "full",
            LessonStatus::Unknown => "unknown",
        }
    }
}

/// One class session as observed on the booking page at a single poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LessonSnapshot {
    /// Position-derived slot id within one day's panel listing.
    pub id: String,
    pub time: String,
    pub name: String,
    pub status: LessonStatus,
}

impl LessonSnapshot {
    /// Parse one schedule panel into a snapshot.
    ///
    /// Panel text looks like `10:30 Mega Dance(12)`: a time prefix, the
    /// lesson name, and optionally the remaining-seat count in parentheses.
    /// Returns `None` for text too short to carry the time prefix; a panel
    /// without a parseable count classifies as [`LessonStatus::Unknown`].
    pub fn parse(position: usize, text: &str) -> Option<Self> {
        let text = text.trim();
        if text.chars().count() < TIME_PREFIX_CHARS {
            return None;
        }

        let split = text
            .char_indices()
            .nth(TIME_PREFIX_CHARS)
            .map(|(index, _)| index)
            .unwrap_or(text.len());
        let time = text[..split].trim().to_string();
        let rest = text[split..].trim();

        let status = remaining_re()
            .captures(text)
            .and_then(|caps| caps[1].parse::<u32>().ok())
            .map_or(LessonStatus::Unknown, LessonStatus::from_remaining);

        let name = match remaining_re().find(rest) {
            Some(seat_count) => rest[..seat_count.start()].trim_end(),
            None => rest,
        }
        .to_string();

        Some(Self {
            id: format!("panel_{}", position + 1),
            time,
            name,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_remaining_seat_counts() {
        assert_eq!(LessonStatus::from_remaining(0), LessonStatus::Full);
        assert_eq!(LessonStatus::from_remaining(1), LessonStatus::AlmostFull);
        assert_eq!(LessonStatus::from_remaining(3), LessonStatus::AlmostFull);
        assert_eq!(LessonStatus::from_remaining(4), LessonStatus::Available);
        assert_eq!(LessonStatus::from_remaining(37), LessonStatus::Available);
    }

    #[test]
    fn parses_almost_full_panel() {
        let lesson = LessonSnapshot::parse(0, "10:30 Dance(2)").unwrap();
        assert_eq!(lesson.id, "panel_1");
        assert_eq!(lesson.time, "10:30");
        assert_eq!(lesson.name, "Dance");
        assert_eq!(lesson.status, LessonStatus::AlmostFull);
    }

    #[test]
    fn parses_full_and_available_panels() {
        let full = LessonSnapshot::parse(1, "10:30 Dance(0)").unwrap();
        assert_eq!(full.status, LessonStatus::Full);
        assert_eq!(full.id, "panel_2");

        let available = LessonSnapshot::parse(2, "10:30 Dance(12)").unwrap();
        assert_eq!(available.status, LessonStatus::Available);
    }

    #[test]
    fn panel_without_count_is_unknown() {
        let lesson = LessonSnapshot::parse(0, "10:30 Dance").unwrap();
        assert_eq!(lesson.name, "Dance");
        assert_eq!(lesson.status, LessonStatus::Unknown);
    }

    #[test]
    fn short_text_is_not_a_lesson() {
        assert!(LessonSnapshot::parse(0, "").is_none());
        assert!(LessonSnapshot::parse(0, "1030").is_none());
        assert!(LessonSnapshot::parse(0, "   x  ").is_none());
    }

    #[test]
    fn parses_multibyte_lesson_names() {
        let lesson = LessonSnapshot::parse(0, "18:00 メガダンス(37)").unwrap();
        assert_eq!(lesson.time, "18:00");
        assert_eq!(lesson.name, "メガダンス");
        assert_eq!(lesson.status, LessonStatus::Available);
    }

    #[test]
    fn time_only_panel_keeps_empty_name() {
        let lesson = LessonSnapshot::parse(0, "10:30").unwrap();
        assert_eq!(lesson.time, "10:30");
        assert_eq!(lesson.name, "");
        assert_eq!(lesson.status, LessonStatus::Unknown);
    }
}
