//! MAC address normalization and matching.
//!
//! Normalizes an observed MAC and classifies it against the known-beacon
//! table, with fuzzy rules for the truncated/reversed forms vendor
//! extensions sometimes produce.

/// A vendor-specific "strict pattern": a distinctive substring that
/// uniquely identifies one known beacon. This is a data table, not
/// code — it lives next to the known-beacon definitions and is meant
/// to be edited without touching the matching logic.
#[derive(Debug, Clone)]
pub struct StrictPattern {
    pub pattern: String,
    pub canonical_mac: String,
}

pub fn normalize(raw: &str) -> String {
    raw.to_lowercase().replace([':', '-'], "")
}

fn strip_leading_zeros(s: &str) -> &str {
    let stripped = s.trim_start_matches('0');
    if stripped.is_empty() { "0" } else { stripped }
}

fn significant_len(s: &str) -> usize {
    strip_leading_zeros(s).len()
}

/// Byte-pairwise reversal of a hex string (e.g. `aabbcc` -> `ccbbaa`).
fn reverse_hex_bytes(s: &str) -> Option<String> {
    if s.is_empty() || s.len() % 2 != 0 {
        return None;
    }
    let mut pairs: Vec<&str> = Vec::with_capacity(s.len() / 2);
    let bytes = s.as_bytes();
    for chunk in bytes.chunks(2) {
        pairs.push(std::str::from_utf8(chunk).ok()?);
    }
    pairs.reverse();
    Some(pairs.concat())
}

fn match_exact_or_substring(candidate: &str, known_macs: &[String]) -> Option<String> {
    // Rule 1: exact match.
    if let Some(m) = known_macs.iter().find(|k| k.as_str() == candidate) {
        return Some(m.clone());
    }
    // Rule 2: substring either direction, leading zeros optionally stripped both sides.
    let cand_stripped = strip_leading_zeros(candidate);
    for k in known_macs {
        let k_stripped = strip_leading_zeros(k);
        if candidate.contains(k.as_str())
            || k.contains(candidate)
            || k.contains(cand_stripped)
            || candidate.contains(k_stripped)
        {
            return Some(k.clone());
        }
    }
    // Rule 3: prefix-of-8 match against any known MAC's first 8 chars.
    for k in known_macs {
        if k.len() >= 8 && candidate.contains(&k[..8]) {
            return Some(k.clone());
        }
    }
    None
}

/// Classify `raw` against the known-beacon table. Returns the full
/// canonical known MAC on match, `None` if the sighting should be
/// dropped.
pub fn match_mac(raw: &str, known_macs: &[String], strict_patterns: &[StrictPattern]) -> Option<String> {
    let normalized = normalize(raw);
    if significant_len(&normalized) < 4 {
        return None;
    }

    if let Some(m) = match_exact_or_substring(&normalized, known_macs) {
        return Some(m);
    }

    // Rule 4: byte-reversed candidate, same rules 2-3.
    if let Some(reversed) = reverse_hex_bytes(&normalized) {
        if let Some(m) = match_exact_or_substring(&reversed, known_macs) {
            return Some(m);
        }
    }

    // Rule 5: strict vendor patterns, last chance.
    for sp in strict_patterns {
        if normalized.contains(sp.pattern.as_str()) {
            return Some(sp.canonical_mac.clone());
        }
    }

    None
}
