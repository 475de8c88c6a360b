//! Glob matching for the local backend.
//!
//! Only `*` is special. It matches any run of characters, including none.
//! `?` and `[...]` are matched literally. The pattern is anchored at both
//! ends.

/// Check whether `key` matches `pattern`.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == key;
    }

    let fragments: Vec<&str> = pattern.split('*').collect();
    let (first, rest) = match fragments.split_first() {
        Some(parts) => parts,
        None => return false,
    };
    let (last, middle) = match rest.split_last() {
        Some(parts) => parts,
        None => return false,
    };

    if !key.starts_with(first) {
        return false;
    }
    let mut remaining = &key[first.len()..];

    for fragment in middle {
        if fragment.is_empty() {
            continue;
        }
        match remaining.find(fragment) {
            Some(pos) => remaining = &remaining[pos + fragment.len()..],
            None => return false,
        }
    }

    remaining.len() >= last.len() && remaining.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_prefix_pattern() {
        assert!(glob_match("subject:42:*", "subject:42:versions"));
        assert!(glob_match("subject:42:*", "subject:42:"));
        assert!(!glob_match("subject:42:*", "subject:420:versions"));
        assert!(!glob_match("subject:42:*", "xsubject:42:versions"));
    }

    #[test]
    fn test_exact_without_wildcard() {
        assert!(glob_match("subject:1:versions", "subject:1:versions"));
        assert!(!glob_match("subject:1:versions", "subject:1:versions2"));
    }

    #[test]
    fn test_infix_and_suffix() {
        assert!(glob_match("*:references:*", "subject:7:references:abc"));
        assert!(glob_match("*versions", "subject:7:versions"));
        assert!(!glob_match("*versions", "subject:7:versions:old"));
        assert!(glob_match("a*b*c", "abc"));
        assert!(!glob_match("a*b*c", "acb"));
    }

    #[test]
    fn test_overlapping_prefix_and_suffix() {
        // "ab*ba" must not reuse the shared "b" of "aba".
        assert!(!glob_match("ab*ba", "aba"));
        assert!(glob_match("ab*ba", "abba"));
    }

    #[test]
    fn test_other_metacharacters_are_literal() {
        assert!(glob_match("key?*", "key?1"));
        assert!(!glob_match("key?*", "keyA1"));
        assert!(glob_match("[ab]*", "[ab]x"));
        assert!(!glob_match("[ab]*", "ax"));
    }

    proptest! {
        #[test]
        fn prop_star_matches_everything(key in ".*") {
            prop_assert!(glob_match("*", &key));
        }

        #[test]
        fn prop_prefix_star_matches_extensions(prefix in "[a-z:0-9]{0,12}", tail in "[a-z:0-9]{0,12}") {
            let key = format!("{}{}", prefix, tail);
            let pattern = format!("{}*", prefix);
            prop_assert!(glob_match(&pattern, &key));
        }
    }
}
