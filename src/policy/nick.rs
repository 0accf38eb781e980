//! Nick syntax and case mapping

use regex::Regex;
use std::sync::OnceLock;

fn nick_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z\[\]\\`_^{|}][A-Za-z0-9\[\]\\`_^{|}-]*$")
            .expect("nick pattern is a valid regex")
    })
}

/// Whether `nick` is a syntactically valid nick no longer than `max_len`
pub fn is_valid_nick(nick: &str, max_len: usize) -> bool {
    !nick.is_empty() && nick.len() <= max_len && nick_pattern().is_match(nick)
}

/// RFC 1459 lowercase: ASCII letters plus `[]\~` -> `{}|^`
pub fn irc_lower(c: char) -> char {
    match c {
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        '~' => '^',
        _ => c.to_ascii_lowercase(),
    }
}

/// Case-insensitive nick comparison under RFC 1459 case mapping
pub fn irc_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.chars().zip(b.chars()).all(|(x, y)| irc_lower(x) == irc_lower(y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_nicks() {
        assert!(is_valid_nick("alice", 30));
        assert!(is_valid_nick("[bot]", 30));
        assert!(is_valid_nick("a-b_c^9", 30));
        assert!(is_valid_nick("`quote", 30));
    }

    #[test]
    fn test_invalid_nicks() {
        assert!(!is_valid_nick("", 30));
        assert!(!is_valid_nick("9lives", 30));
        assert!(!is_valid_nick("-dash", 30));
        assert!(!is_valid_nick("has space", 30));
        assert!(!is_valid_nick("toolongnick", 5));
        assert!(!is_valid_nick("-", 30));
    }

    #[test]
    fn test_irc_eq() {
        assert!(irc_eq("Alice", "alice"));
        assert!(irc_eq("[foo]", "{FOO}"));
        assert!(irc_eq("a\\b~", "A|B^"));
        assert!(!irc_eq("alice", "alicf"));
        assert!(!irc_eq("alice", "alice2"));
    }
}
