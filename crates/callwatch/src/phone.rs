//! Phone number normalization.
//!
//! The same number arrives formatted differently depending on which platform
//! API reported it (a raw dialed string versus a formatted caller ID). Every
//! per-caller lookup keys on [`normalize`] output.

/// Key used for events that carry no phone number.
pub const UNKNOWN_NUMBER: &str = "Unknown";

/// Characters stripped by [`normalize`].
pub const FORMATTING_CHARS: [char; 5] = [' ', '-', '(', ')', '.'];

/// Normalize a raw phone number into its canonical key.
///
/// Removes spaces, hyphens, parentheses and periods. An absent input, or one
/// with nothing left after stripping, maps to [`UNKNOWN_NUMBER`]. The function
/// is idempotent.
///
/// ```
/// use callwatch::phone::normalize;
///
/// assert_eq!(normalize(Some("(021) 555-0100")), "0215550100");
/// assert_eq!(normalize(None), "Unknown");
/// ```
#[must_use]
pub fn normalize(raw: Option<&str>) -> String {
    let stripped: String = raw
        .unwrap_or_default()
        .chars()
        .filter(|c| !FORMATTING_CHARS.contains(c))
        .collect();

    if stripped.is_empty() {
        UNKNOWN_NUMBER.to_string()
    } else {
        stripped
    }
}

/// Whether a normalized key stands for an unknown caller.
#[must_use]
pub fn is_unknown(key: &str) -> bool {
    key == UNKNOWN_NUMBER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_formatting() {
        assert_eq!(normalize(Some("021-555-0100")), "0215550100");
        assert_eq!(normalize(Some("(021) 555.0100")), "0215550100");
        assert_eq!(normalize(Some("+64 21 555 0100")), "+64215550100");
    }

    #[test]
    fn test_normalize_empty_and_absent() {
        assert_eq!(normalize(None), UNKNOWN_NUMBER);
        assert_eq!(normalize(Some("")), UNKNOWN_NUMBER);
    }

    #[test]
    fn test_normalize_formatting_only_input() {
        assert_eq!(normalize(Some(" - ")), UNKNOWN_NUMBER);
        assert_eq!(normalize(Some("()")), UNKNOWN_NUMBER);
    }

    #[test]
    fn test_normalize_idempotent() {
        for raw in ["021-555-0100", "(09) 123 4567", "", " . ", "Unknown", "1.2.3"] {
            let once = normalize(Some(raw));
            assert_eq!(normalize(Some(&once)), once, "input {raw:?}");
        }
    }

    #[test]
    fn test_formatting_variants_share_a_key() {
        let variants = [
            "0211234567",
            "021 123 4567",
            "021-123-4567",
            "(021) 123-4567",
            "021.123.4567",
            " 0 2 1 1 2 3 4 5 6 7 ",
        ];
        for raw in variants {
            assert_eq!(normalize(Some(raw)), "0211234567", "input {raw:?}");
        }
    }

    #[test]
    fn test_other_characters_are_kept() {
        assert_eq!(normalize(Some("+1/555#12")), "+1/555#12");
    }

    #[test]
    fn test_is_unknown() {
        assert!(is_unknown(&normalize(None)));
        assert!(!is_unknown(&normalize(Some("0211234567"))));
    }
}
