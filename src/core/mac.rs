//! MAC address normalization and classification
//!
//! All keying and comparison in the daemon uses the canonical form:
//! uppercase hex octets joined by `:`. Old records may arrive lowercase or
//! dash-separated; everything is normalized on ingress.

use regex::Regex;
use std::sync::OnceLock;

fn mac_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})$").unwrap())
}

/// True when the string looks like a MAC address (colon or dash separated).
pub fn is_mac_address(s: &str) -> bool {
    mac_regex().is_match(s.trim())
}

/// Normalize a MAC to canonical form: uppercase, colon-separated.
///
/// Inputs that are not MAC-shaped are returned trimmed and uppercased so
/// that keying stays consistent even for malformed stack output.
pub fn normalize_mac(mac: &str) -> String {
    mac.trim().replace('-', ":").to_uppercase()
}

/// First three octets as an uppercase OUI string (`AABBCC`), used for
/// vendor lookups. Returns `None` for inputs without three octets.
pub fn oui_prefix(mac: &str) -> Option<String> {
    let parts: Vec<&str> = mac
        .trim()
        .split(|c| c == ':' || c == '-')
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() < 3 {
        return None;
    }
    let oui = format!("{}{}{}", parts[0], parts[1], parts[2]).to_uppercase();
    if oui.len() != 6 {
        return None;
    }
    Some(oui)
}

/// Address subtype of a random BLE address, from the two MSBs of the first
/// octet per the LE addressing scheme.
///
/// Returns `("public_or_unknown", "")` unless the stack marked the address
/// as random.
pub fn classify_address(mac: &str, hinted_random: bool) -> (&'static str, &'static str) {
    if !hinted_random {
        return ("public_or_unknown", "");
    }
    let first = mac
        .trim()
        .split(|c| c == ':' || c == '-')
        .next()
        .and_then(|o| u8::from_str_radix(o, 16).ok());
    let Some(b) = first else {
        return ("random", "");
    };
    match (b >> 6) & 0x03 {
        0 => ("random", "non_resolvable_private"),
        1 => ("random", "resolvable_private"),
        2 => ("random", "reserved"),
        _ => ("random", "static_random"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_mac("aa-bb-cc-dd-ee-ff");
        assert_eq!(once, "AA:BB:CC:DD:EE:FF");
        assert_eq!(normalize_mac(&once), once);
    }

    #[test]
    fn normalize_trims_and_uppercases() {
        assert_eq!(normalize_mac(" aa:bb:cc:dd:ee:01 "), "AA:BB:CC:DD:EE:01");
    }

    #[test]
    fn oui_extraction() {
        assert_eq!(oui_prefix("aa:bb:cc:dd:ee:ff").as_deref(), Some("AABBCC"));
        assert_eq!(oui_prefix("AA-BB-CC-DD-EE-FF").as_deref(), Some("AABBCC"));
        assert_eq!(oui_prefix("AABB"), None);
    }

    #[test]
    fn random_subtypes_follow_msb() {
        // 0b00xx_xxxx
        assert_eq!(
            classify_address("3F:00:00:00:00:01", true),
            ("random", "non_resolvable_private")
        );
        // 0b01xx_xxxx
        assert_eq!(
            classify_address("40:00:00:00:00:01", true),
            ("random", "resolvable_private")
        );
        // 0b10xx_xxxx
        assert_eq!(classify_address("80:00:00:00:00:01", true), ("random", "reserved"));
        // 0b11xx_xxxx
        assert_eq!(
            classify_address("C0:00:00:00:00:01", true),
            ("random", "static_random")
        );
    }

    #[test]
    fn public_when_not_hinted_random() {
        assert_eq!(
            classify_address("C0:00:00:00:00:01", false),
            ("public_or_unknown", "")
        );
    }
}
