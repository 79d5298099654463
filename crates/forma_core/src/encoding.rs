//! Reversible string and list encodings for tokens.
//!
//! String form: `${Token[<hint>.<registry>.<index>]}`, may appear anywhere in
//! a string. List form: `#{Token[<hint>.<registry>.<index>]}`, only as the
//! single element of a list.

use std::sync::OnceLock;

use regex::Regex;

use crate::token::TokenId;

const STRING_OPEN: &str = "${Token[";
const LIST_OPEN: &str = "#{Token[";
const CLOSE: &str = "]}";

fn string_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{Token\[([A-Za-z0-9_:/\-]+)\.([0-9]+)\.([0-9]+)\]\}")
            .expect("valid token pattern")
    })
}

fn list_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^#\{Token\[([A-Za-z0-9_:/\-]+)\.([0-9]+)\.([0-9]+)\]\}$")
            .expect("valid token pattern")
    })
}

/// A piece of a token-bearing string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment<'a> {
    Literal(&'a str),
    Token { id: TokenId, hint: &'a str },
}

pub fn encode_string(id: TokenId, hint: &str) -> String {
    format!("{}{}.{}{}", STRING_OPEN, hint, id, CLOSE)
}

pub fn encode_list(id: TokenId, hint: &str) -> String {
    format!("{}{}.{}{}", LIST_OPEN, hint, id, CLOSE)
}

/// Restrict a display hint to characters the encodings can carry.
pub fn sanitize_hint(hint: &str) -> String {
    let cleaned: String = hint
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '/' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "Token".to_string()
    } else {
        cleaned
    }
}

/// Whether the string carries at least one string-encoded token.
pub fn contains_token(s: &str) -> bool {
    s.contains(STRING_OPEN) && string_pattern().is_match(s)
}

/// Split a string into literal and token fragments, in order.
///
/// Empty literals are never produced.
pub fn split(s: &str) -> Vec<Fragment<'_>> {
    let mut fragments = Vec::new();
    let mut last = 0;
    for caps in string_pattern().captures_iter(s) {
        let (Some(whole), Some(hint)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let Some(id) = token_id(&caps) else {
            continue;
        };
        if whole.start() > last {
            fragments.push(Fragment::Literal(&s[last..whole.start()]));
        }
        fragments.push(Fragment::Token {
            id,
            hint: hint.as_str(),
        });
        last = whole.end();
    }
    if last < s.len() {
        fragments.push(Fragment::Literal(&s[last..]));
    }
    fragments
}

/// Decode a list-encoded token element.
pub fn parse_list_token(s: &str) -> Option<(TokenId, &str)> {
    if !s.starts_with(LIST_OPEN) {
        return None;
    }
    let caps = list_pattern().captures(s)?;
    let hint = caps.get(1)?.as_str();
    Some((token_id(&caps)?, hint))
}

fn token_id(caps: &regex::Captures<'_>) -> Option<TokenId> {
    let registry = caps.get(2)?.as_str().parse::<u32>().ok()?;
    let index = caps.get(3)?.as_str().parse::<u32>().ok()?;
    Some(TokenId::new(registry, index))
}

/// Whether the string contains a list-encoded token anywhere.
pub fn contains_list_token(s: &str) -> bool {
    s.contains(LIST_OPEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_interleaves_literals_and_tokens() {
        let s = format!(
            "prefix-{}-mid-{}",
            encode_string(TokenId::new(1, 3), "Bucket:Arn"),
            encode_string(TokenId::new(1, 7), "Name")
        );
        let fragments = split(&s);
        assert_eq!(
            fragments,
            vec![
                Fragment::Literal("prefix-"),
                Fragment::Token {
                    id: TokenId::new(1, 3),
                    hint: "Bucket:Arn"
                },
                Fragment::Literal("-mid-"),
                Fragment::Token {
                    id: TokenId::new(1, 7),
                    hint: "Name"
                },
            ]
        );
    }

    #[test]
    fn test_plain_strings_have_no_tokens() {
        assert!(!contains_token("hello ${world}"));
        assert!(!contains_token("${Token[no-id]}"));
        assert!(!contains_token("${Token[Name.3]}"));
        assert_eq!(split("plain"), vec![Fragment::Literal("plain")]);
    }

    #[test]
    fn test_list_token_must_match_whole_element() {
        let encoded = encode_list(TokenId::new(4, 2), "Subnets");
        assert_eq!(parse_list_token(&encoded), Some((TokenId::new(4, 2), "Subnets")));
        assert_eq!(parse_list_token(&format!("x{}", encoded)), None);
        assert!(contains_list_token(&format!("x{}", encoded)));
    }

    #[test]
    fn test_sanitize_hint() {
        assert_eq!(sanitize_hint("Bucket.Arn"), "Bucket_Arn");
        assert_eq!(sanitize_hint(""), "Token");
        assert_eq!(sanitize_hint("Stack/Bucket:Arn"), "Stack/Bucket:Arn");
    }
}
