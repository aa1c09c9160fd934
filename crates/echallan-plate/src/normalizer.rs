//! OCR text normalization.
//!
//! Pipeline, in order:
//! - strip all whitespace
//! - uppercase
//! - confusable substitution (O→0, I→1, Z→2, S→5, B→8)
//!
//! The substitution is position-blind and lossy: it rewrites letters in the
//! state and series runs as well as in the digit runs. A string that already
//! satisfies the grammar after the first two steps is returned as-is, so
//! readings like `DL01AB1234` survive.

use crate::grammar::matches_grammar;
use serde::{Deserialize, Serialize};

/// Letter → digit pairs that OCR engines commonly confuse
pub const CONFUSABLES: [(char, char); 5] = [('O', '0'), ('I', '1'), ('Z', '2'), ('S', '5'), ('B', '8')];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedPlate {
    pub text: String,
    pub valid: bool,
}

/// Strip whitespace and uppercase.
pub fn clean(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Apply [`CONFUSABLES`] to every character.
pub fn substitute_confusables(text: &str) -> String {
    text.chars()
        .map(|c| {
            CONFUSABLES
                .iter()
                .find(|(from, _)| *from == c)
                .map(|(_, to)| *to)
                .unwrap_or(c)
        })
        .collect()
}

/// Normalize a raw OCR reading and validate it against the grammar.
pub fn normalize(raw: &str) -> NormalizedPlate {
    let cleaned = clean(raw);
    if matches_grammar(&cleaned) {
        return NormalizedPlate {
            text: cleaned,
            valid: true,
        };
    }

    let text = substitute_confusables(&cleaned);
    let valid = matches_grammar(&text);
    NormalizedPlate { text, valid }
}
