//! Query fingerprinting.
//!
//! Slow-query identifiers must stay stable across literal values, so the
//! normaliser strips literals and collapses whitespace before hashing. The
//! fingerprint is the first 16 hex chars of the SHA-256 of the normalised
//! text.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

fn string_literals() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"'(?:[^']|'')*'").unwrap())
}

fn numeric_literals() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d+(?:\.\d+)?\b").unwrap())
}

fn placeholders() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\d+").unwrap())
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Normalise a query: literals and placeholders become `?`, whitespace
/// collapses, case folds.
pub fn normalise_query(query: &str) -> String {
    let q = string_literals().replace_all(query, "?");
    let q = placeholders().replace_all(&q, "?");
    let q = numeric_literals().replace_all(&q, "?");
    let q = whitespace().replace_all(&q, " ");
    q.trim().to_lowercase()
}

/// Stable 16-hex-char fingerprint of a query.
pub fn query_hash(query: &str) -> String {
    let normalised = normalise_query(query);
    let digest = Sha256::digest(normalised.as_bytes());
    hex::encode(&digest[..8])
}
