//! Line matchers built from literals and patterns.

use regex::{Regex, RegexBuilder};

/// Build a regex matching `literal` anywhere in a line, case-insensitively,
/// with any run of whitespace in the literal matching any run in the line.
pub fn literal_regex(literal: &str) -> Regex {
    let pattern = literal
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|_| unreachable!("escaped literal is always a valid regex"))
}

/// A line predicate for `literal`. See [`literal_regex`].
pub fn literal(literal: &str) -> impl Fn(&str) -> bool + Send + Sync + 'static {
    pattern(literal_regex(literal))
}

/// A line predicate for a compiled regex.
pub fn pattern(re: Regex) -> impl Fn(&str) -> bool + Send + Sync + 'static {
    move |line: &str| re.is_match(line)
}

/// A predicate matching lines that start with `prefix`, ignoring ASCII case.
pub fn prefix(prefix: impl Into<String>) -> impl Fn(&str) -> bool + Send + Sync + 'static {
    let prefix = prefix.into();
    move |line: &str| {
        line.len() >= prefix.len()
            && line.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
    }
}
