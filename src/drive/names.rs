//! Entry name validation, wildcard masks and normalization.

use regex::{Regex, RegexBuilder};
use unicode_normalization::UnicodeNormalization;

/// Characters no entry name may contain.
const RESERVED_CHARS: &[char] = &['"', '*', '/', ':', '<', '>', '?', '\\', '|'];

/// Device names that can't be used as a file stem on common platforms.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "CLOCK$", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
    "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Whether `name` can't be stored as an entry name.
pub fn excluded_filename(name: &str) -> bool {
    if name.is_empty() || name == "." || name == ".." {
        return true;
    }
    if name.chars().any(|c| c.is_control() || RESERVED_CHARS.contains(&c)) {
        return true;
    }
    let stem = name.split('.').next().unwrap_or(name);
    RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
}

/// Whether the whole of `name` matches the `*`/`?` wildcard `mask`,
/// ignoring case.
pub fn matches_mask(mask: &str, name: &str) -> bool {
    mask_regex(mask, true).is_some_and(|re| re.is_match(name))
}

/// Whether `mask` matches anywhere inside `name`, ignoring case.
pub fn searches_mask(mask: &str, name: &str) -> bool {
    mask_regex(mask, false).is_some_and(|re| re.is_match(name))
}

fn mask_regex(mask: &str, anchored: bool) -> Option<Regex> {
    let mut pattern = String::with_capacity(mask.len() * 2 + 2);
    if anchored {
        pattern.push('^');
    }
    for c in mask.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    if anchored {
        pattern.push('$');
    }
    match RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
    {
        Ok(re) => Some(re),
        Err(e) => {
            log::warn!("Invalid name mask {:?}: {}", mask, e);
            None
        }
    }
}

/// NFC form used for listing keys.
pub fn normalize(name: &str) -> String {
    name.nfc().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excluded_filenames() {
        for name in ["", ".", "..", "a/b", "a:b", "what?", "tab\tname", "CON", "con.txt", "Lpt1"] {
            assert!(excluded_filename(name), "{:?} should be excluded", name);
        }
        for name in ["notes.txt", ".hidden", "console", "a b", "résumé"] {
            assert!(!excluded_filename(name), "{:?} should be allowed", name);
        }
    }

    #[test]
    fn test_matches_mask() {
        assert!(matches_mask("*.TXT", "notes.txt"));
        assert!(matches_mask("n?tes.*", "Notes.md"));
        assert!(matches_mask("*", ""));
        assert!(!matches_mask("*.txt", "notes.txt.bak"));
        assert!(!matches_mask("a.c", "abc"));
    }

    #[test]
    fn test_searches_mask() {
        assert!(searches_mask("tes", "notes.txt"));
        assert!(searches_mask("T?S", "notes.txt"));
        assert!(!searches_mask("xyz", "notes.txt"));
    }

    #[test]
    fn test_normalize_composes() {
        let decomposed = "re\u{0301}sume\u{0301}";
        assert_eq!(normalize(decomposed), "r\u{e9}sum\u{e9}");
        assert_eq!(normalize("plain"), "plain");
    }
}
