//! Plate grammar.
//!
//! Two letters (state), two digits (district), one or two letters (series),
//! four digits (number). No separators, uppercase only.

use lazy_static::lazy_static;
use regex::Regex;

/// Bit-exact grammar, matched against the whole normalized string
pub const PLATE_PATTERN: &str = r"^[A-Z]{2}[0-9]{2}[A-Z]{1,2}[0-9]{4}$";

/// Shortest and longest strings the grammar can accept
pub const MIN_PLATE_LEN: usize = 9;
pub const MAX_PLATE_LEN: usize = 10;

lazy_static! {
    static ref PLATE_RE: Regex = Regex::new(PLATE_PATTERN).unwrap();
}

/// Full-match check. No normalization is applied here.
pub fn matches_grammar(text: &str) -> bool {
    let len = text.len();
    (MIN_PLATE_LEN..=MAX_PLATE_LEN).contains(&len) && PLATE_RE.is_match(text)
}
