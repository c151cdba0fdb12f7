//! Hard rejection rules applied before profile scoring.
//!
//! These are profile-independent: a candidate that trips any rule is
//! rejected immediately with a recorded reason and never reaches scoring.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use super::candidate::Candidate;

/// Why a candidate was hard-rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NameTooShort,
    NameTooLong,
    Stopword,
    WordFragment,
    PiiEmail,
    PiiPhone,
    PiiNationalId,
    PiiPaymentCard,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NameTooShort => write!(f, "name shorter than 3 characters"),
            RejectReason::NameTooLong => write!(f, "name longer than 100 characters"),
            RejectReason::Stopword => write!(f, "name is a stopword"),
            RejectReason::WordFragment => write!(f, "name is a word fragment"),
            RejectReason::PiiEmail => write!(f, "name matches an email address"),
            RejectReason::PiiPhone => write!(f, "name matches a phone number"),
            RejectReason::PiiNationalId => write!(f, "name matches a national ID pattern"),
            RejectReason::PiiPaymentCard => write!(f, "name matches a payment card pattern"),
        }
    }
}

/// Common function words that never name a concept on their own.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "in",
    "into", "is", "it", "its", "new", "no", "not", "of", "on", "or", "our", "that", "the",
    "their", "this", "to", "use", "used", "using", "was", "were", "which", "will", "with",
    "your",
];

/// Suffix tokens that only occur as the tail of a real word. Seeing one
/// alone means the extractor split a word mid-token.
const WORD_FRAGMENTS: &[&str] = &[
    "able", "ance", "ation", "ing", "ion", "ism", "ity", "ive", "ization", "ize", "less",
    "ment", "ness", "ology", "ship", "sion", "tion", "ware",
];

lazy_static! {
    static ref EMAIL: Regex =
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap();
    // International and local phone shapes, 7+ digits with separators.
    static ref PHONE: Regex =
        Regex::new(r"^\+?[0-9][0-9 ().-]{5,18}[0-9]$").unwrap();
    // SSN-like triplets or bare 9-11 digit identifier runs.
    static ref NATIONAL_ID: Regex =
        Regex::new(r"^([0-9]{3}-[0-9]{2}-[0-9]{4}|[0-9]{9,11})$").unwrap();
    // 13-19 digits in groups of 3-6, separated by spaces or dashes.
    static ref PAYMENT_CARD: Regex =
        Regex::new(r"^[0-9]{4}([ -]?[0-9]{3,6}){2,3}$").unwrap();
}

/// Applies the hard rejection rules in order; the first match wins.
pub fn hard_reject(candidate: &Candidate) -> Option<RejectReason> {
    let name = candidate.name.trim();
    let chars = name.chars().count();

    if chars < 3 {
        return Some(RejectReason::NameTooShort);
    }
    if chars > 100 {
        return Some(RejectReason::NameTooLong);
    }

    let lower = name.to_lowercase();
    if STOPWORDS.contains(&lower.as_str()) {
        return Some(RejectReason::Stopword);
    }
    if WORD_FRAGMENTS.contains(&lower.trim_start_matches('-').trim_start_matches('_')) {
        return Some(RejectReason::WordFragment);
    }

    if EMAIL.is_match(name) {
        return Some(RejectReason::PiiEmail);
    }
    if PAYMENT_CARD.is_match(name) && digit_count(name) >= 13 {
        return Some(RejectReason::PiiPaymentCard);
    }
    if NATIONAL_ID.is_match(name) {
        return Some(RejectReason::PiiNationalId);
    }
    if PHONE.is_match(name) && digit_count(name) >= 7 {
        return Some(RejectReason::PiiPhone);
    }

    None
}

fn digit_count(s: &str) -> usize {
    s.chars().filter(|c| c.is_ascii_digit()).count()
}
