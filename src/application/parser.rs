//! Delisting announcement parser.
//!
//! Stateless text matching over raw channel messages. Most channel traffic
//! is unrelated chatter, so "no match" is the common, silent outcome; it is
//! never an error.

use crate::domain::events::DelistEvent;
use chrono::Utc;

/// Announcement phrasings that introduce a delisting clause, most specific
/// first. The first marker found wins. Matching is case-insensitive.
///
/// Examples:
/// - "Binance EN: Binance Will Delist CVP, EPX on 2024-08-19"
/// - "Binance Will Delist REEF"
const DELIST_MARKERS: &[&str] = &["binance en: binance will delist", "binance will delist"];

/// Parse a raw channel message into a [`DelistEvent`].
///
/// Returns `None` when no announcement pattern matches or the token list
/// comes out empty. Pure function apart from stamping the detection time.
pub fn parse(text: &str) -> Option<DelistEvent> {
    let lower = text.to_lowercase();
    let clause = locate_clause(&lower)?;
    let tokens = split_tokens(clause);
    if tokens.is_empty() {
        return None;
    }

    Some(DelistEvent {
        tokens,
        detected_at: Utc::now(),
        raw_text: text.to_string(),
    })
}

/// Locate the token-list substring: everything after the first matching
/// marker, cut at the end of the line and at the " on <date>" tail when
/// present.
fn locate_clause(lower: &str) -> Option<&str> {
    for marker in DELIST_MARKERS {
        if let Some(pos) = lower.find(marker) {
            let mut clause = &lower[pos + marker.len()..];
            if let Some(nl) = clause.find('\n') {
                clause = &clause[..nl];
            }
            if let Some(on) = clause.find(" on ") {
                clause = &clause[..on];
            }
            return Some(clause);
        }
    }
    None
}

/// Split a token-list clause on commas and the standalone word "and", then
/// reduce each fragment to its first alphanumeric run, upper-cased.
/// Fragments with no alphanumeric run are dropped silently.
fn split_tokens(clause: &str) -> Vec<String> {
    clause
        .replace(" and ", ",")
        .split(',')
        .filter_map(extract_symbol)
        .collect()
}

fn extract_symbol(fragment: &str) -> Option<String> {
    let start = fragment.find(|c: char| c.is_ascii_alphanumeric())?;
    let run: String = fragment[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    Some(run.to_uppercase())
}
