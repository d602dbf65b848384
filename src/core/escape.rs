//! Reserved-character codec for stored field keys.
//!
//! The document engine forbids `.` and `$` in field names, and settings
//! keys may contain both (`foo.alpha`, `$bar`). Keys are escaped to
//! full-width lookalikes on the way into storage and unescaped on the way
//! out. The substitution applies to top-level payload keys only; nested
//! keys and string values pass through untouched.

/// U+FF0E FULLWIDTH FULL STOP, standing in for `.`.
const FULLWIDTH_DOT: char = '\u{ff0e}';

/// U+FF04 FULLWIDTH DOLLAR SIGN, standing in for `$`.
const FULLWIDTH_DOLLAR: char = '\u{ff04}';

/// Replace reserved characters with their full-width stand-ins.
pub fn escape_key(key: &str) -> String {
    if !key.contains(['.', '$']) {
        return key.to_string();
    }
    key.chars()
        .map(|c| match c {
            '.' => FULLWIDTH_DOT,
            '$' => FULLWIDTH_DOLLAR,
            other => other,
        })
        .collect()
}

/// Invert [`escape_key`]. Unconditional: full-width stand-ins always map
/// back, whatever produced them.
pub fn unescape_key(key: &str) -> String {
    if !key.contains([FULLWIDTH_DOT, FULLWIDTH_DOLLAR]) {
        return key.to_string();
    }
    key.chars()
        .map(|c| match c {
            FULLWIDTH_DOT => '.',
            FULLWIDTH_DOLLAR => '$',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_replaces_reserved_characters() {
        assert_eq!(escape_key("foo.alpha"), "foo\u{ff0e}alpha");
        assert_eq!(escape_key("$bar"), "\u{ff04}bar");
        assert_eq!(escape_key("a.b$c.d"), "a\u{ff0e}b\u{ff04}c\u{ff0e}d");
    }

    #[test]
    fn escape_leaves_plain_keys_alone() {
        assert_eq!(escape_key("plain-key_09"), "plain-key_09");
        assert_eq!(escape_key(""), "");
    }

    #[test]
    fn unescape_inverts_escape() {
        for key in ["", "plain", "foo.alpha", "$bar", "$.", "..$$", "näme.ü$"] {
            assert_eq!(unescape_key(&escape_key(key)), key);
        }
    }

    #[test]
    fn unescape_is_unconditional() {
        // Full-width characters map back even when this codec did not
        // produce them.
        assert_eq!(unescape_key("pre\u{ff0e}made"), "pre.made");
        assert_eq!(unescape_key("\u{ff04}100"), "$100");
    }
}
