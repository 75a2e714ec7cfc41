//! Identifier normalisation and stable deduplication.
//!
//! Identifiers are the external lookup keys sent to the data provider.
//! They are opaque strings unless a job asks for [`IdentifierCheck::BookCodes`],
//! which accepts only ASINs, ISBN-10s and ISBN-13s. Every job passes its
//! identifiers through [`prepare_identifiers`] before anything is estimated
//! or spent.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

lazy_static! {
    /// Amazon Standard Identification Number (non-book products start with B)
    pub static ref ASIN_PATTERN: Regex = Regex::new(r"^B[0-9A-Z]{9}$").unwrap();

    /// ISBN-10, check digit may be X
    pub static ref ISBN10_PATTERN: Regex = Regex::new(r"^[0-9]{9}[0-9X]$").unwrap();

    /// ISBN-13 (Bookland prefixes only)
    pub static ref ISBN13_PATTERN: Regex = Regex::new(r"^97[89][0-9]{10}$").unwrap();
}

/// Shape of a recognised identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    Asin,
    Isbn10,
    Isbn13,
}

/// Classify an already-normalised identifier.
pub fn classify(identifier: &str) -> Option<IdentifierKind> {
    if ISBN13_PATTERN.is_match(identifier) {
        Some(IdentifierKind::Isbn13)
    } else if ISBN10_PATTERN.is_match(identifier) {
        Some(IdentifierKind::Isbn10)
    } else if ASIN_PATTERN.is_match(identifier) {
        Some(IdentifierKind::Asin)
    } else {
        None
    }
}

/// Normalise a raw identifier: trim, drop hyphens and inner spaces, upper-case.
///
/// Returns `None` when the result is not a recognised identifier shape.
pub fn normalize_identifier(raw: &str) -> Option<String> {
    let normalized: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    classify(&normalized).map(|_| normalized)
}

/// How raw identifiers are screened before dedup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierCheck {
    /// Trim and pass through anything non-blank
    #[default]
    Opaque,

    /// Normalise to ASIN/ISBN shape and reject the rest
    BookCodes,
}

impl IdentifierCheck {
    /// The identifier to look up, or `None` when the input is rejected.
    pub fn apply(&self, raw: &str) -> Option<String> {
        match self {
            IdentifierCheck::Opaque => {
                let trimmed = raw.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            IdentifierCheck::BookCodes => normalize_identifier(raw),
        }
    }
}

/// Remove duplicates while keeping the first occurrence of each identifier.
///
/// `["A1", "A2", "A1", "A3", "A2"]` becomes `["A1", "A2", "A3"]`.
pub fn dedup_identifiers<I, S>(identifiers: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for id in identifiers {
        let id = id.into();
        if seen.insert(id.clone()) {
            out.push(id);
        }
    }

    out
}

/// Outcome of preparing a raw identifier list for a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedIdentifiers {
    /// Normalised, deduplicated and capped identifiers, in first-seen order
    pub accepted: Vec<String>,

    /// Raw inputs rejected by the [`IdentifierCheck`]
    pub invalid: Vec<String>,

    /// How many unique identifiers were cut by the per-job cap
    pub dropped_over_cap: usize,
}

/// Screen with `check`, dedup (stable) and cap at `cap`.
pub fn prepare_identifiers<I, S>(raw: I, cap: usize, check: IdentifierCheck) -> PreparedIdentifiers
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut invalid = Vec::new();
    let mut normalized = Vec::new();

    for item in raw {
        let item = item.as_ref();
        match check.apply(item) {
            Some(id) => normalized.push(id),
            None => invalid.push(item.to_string()),
        }
    }

    let mut accepted = dedup_identifiers(normalized);
    let dropped_over_cap = accepted.len().saturating_sub(cap);
    accepted.truncate(cap);

    if !invalid.is_empty() {
        tracing::warn!(count = invalid.len(), ?check, "Dropping rejected identifiers");
    }

    PreparedIdentifiers {
        accepted,
        invalid,
        dropped_over_cap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let out = dedup_identifiers(["A1", "A2", "A1", "A3", "A2"]);
        assert_eq!(out, vec!["A1", "A2", "A3"]);
    }

    #[test]
    fn test_classify_shapes() {
        assert_eq!(classify("B00ZV9PXP2"), Some(IdentifierKind::Asin));
        assert_eq!(classify("059035342X"), Some(IdentifierKind::Isbn10));
        assert_eq!(classify("9780590353427"), Some(IdentifierKind::Isbn13));
        assert_eq!(classify("A1"), None);
        assert_eq!(classify("1234567890123"), None);
    }

    #[test]
    fn test_normalize_strips_hyphens_and_case() {
        assert_eq!(
            normalize_identifier(" 978-0-590-35342-7 "),
            Some("9780590353427".to_string())
        );
        assert_eq!(
            normalize_identifier("b00zv9pxp2"),
            Some("B00ZV9PXP2".to_string())
        );
        assert_eq!(normalize_identifier("not-an-id"), None);
    }

    #[test]
    fn test_prepare_dedups_after_normalizing_then_caps() {
        let prepared = prepare_identifiers(
            [
                "978-0-590-35342-7",
                "9780590353427",
                "junk",
                "B00ZV9PXP2",
                "059035342X",
            ],
            2,
            IdentifierCheck::BookCodes,
        );

        assert_eq!(prepared.accepted, vec!["9780590353427", "B00ZV9PXP2"]);
        assert_eq!(prepared.invalid, vec!["junk"]);
        assert_eq!(prepared.dropped_over_cap, 1);
    }

    #[test]
    fn test_opaque_check_keeps_any_non_blank_identifier() {
        let prepared = prepare_identifiers(
            ["A1", " A2 ", "A1", "", "A3", "A2", "   "],
            10,
            IdentifierCheck::default(),
        );

        assert_eq!(prepared.accepted, vec!["A1", "A2", "A3"]);
        assert_eq!(prepared.invalid.len(), 2);
        assert_eq!(prepared.dropped_over_cap, 0);
    }

    #[test]
    fn test_check_parses_from_snake_case() {
        let check: IdentifierCheck = serde_json::from_str(r#""book_codes""#).unwrap();
        assert_eq!(check, IdentifierCheck::BookCodes);
        assert_eq!(IdentifierCheck::default(), IdentifierCheck::Opaque);
    }

    proptest! {
        #[test]
        fn prop_dedup_is_idempotent_and_unique(input in prop::collection::vec("[A-C][0-3]", 0..40)) {
            let once = dedup_identifiers(input.clone());
            let twice = dedup_identifiers(once.clone());
            prop_assert_eq!(&once, &twice);

            let unique: HashSet<_> = once.iter().collect();
            prop_assert_eq!(unique.len(), once.len());

            // Output order is the order of first appearance in the input
            let mut cursor = 0;
            for id in &once {
                let pos = input.iter().position(|x| x == id).unwrap();
                prop_assert!(pos >= cursor);
                cursor = pos;
            }
        }
    }
}
