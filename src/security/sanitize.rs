//! String sanitizers
//!
//! Applied after validation to strings that are sent to the server. Every
//! rule is repeated until the string stops changing, so removing one match
//! cannot splice together a new one.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static SCRIPT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("static regex")
});

static SCRIPT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?script\b[^>]*>").expect("static regex"));

static JS_PROTOCOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)javascript\s*:").expect("static regex"));

static EVENT_HANDLER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(on[a-z]{3,})\s*=").expect("static regex"));

/// `on...=` words that are not event handlers
const NOT_HANDLERS: &[&str] = &["onion", "online", "only", "onset", "onto", "onward", "onwards"];

static CODE_INJECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\brequire\s*\(|\bprocess\s*\.|\bglobal\s*\.").expect("static regex")
});

/// Characters with special meaning to paths, shells or markup
const PATH_SPECIAL: &[char] = &[
    '/', '\\', ':', '*', '?', '"', '\'', '<', '>', '|', '`', '$', '{', '}', ';',
];

fn until_stable(input: &str, step: impl Fn(&str) -> String) -> String {
    let mut current = input.to_string();
    loop {
        let next = step(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Remove script tags, `javascript:` prefixes and inline event handlers
pub fn sanitize_string(input: &str) -> String {
    until_stable(input, |s| {
        let s = SCRIPT_BLOCK.replace_all(s, "");
        let s = SCRIPT_TAG.replace_all(&s, "");
        let s = JS_PROTOCOL.replace_all(&s, "");
        EVENT_HANDLER
            .replace_all(&s, |caps: &Captures| {
                if NOT_HANDLERS.contains(&caps[1].to_lowercase().as_str()) {
                    caps[0].to_string()
                } else {
                    String::new()
                }
            })
            .into_owned()
    })
}

/// Remove `require(`, `process.` and `global.` from a console expression
pub fn sanitize_console_command(input: &str) -> String {
    until_stable(input, |s| CODE_INJECTION.replace_all(s, "").into_owned())
        .trim()
        .to_string()
}

/// Remove `..` and path-special characters from a memory path
pub fn sanitize_memory_path(input: &str) -> String {
    until_stable(input, |s| {
        s.replace("..", "")
            .chars()
            .filter(|c| !PATH_SPECIAL.contains(c) && !c.is_control())
            .collect()
    })
    .trim_matches(|c: char| c == '.' || c.is_whitespace())
    .to_string()
}
