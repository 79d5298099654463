//! Reference expressions inside blueprint strings.
//!
//! - `${Ref:<path>}`: the primary identifier of the construct at `path`.
//! - `${GetAtt:<path>.<Attribute>}`: a named attribute.
//!
//! `path` is relative to the enclosing stack (`Bucket`, `Network/Vpc`) or
//! absolute when its first component names another stack (`Storage/Bucket`).

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{BlueprintError, BlueprintResult};

/// A parsed reference expression and its position in the source string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub path: String,
    /// `None` for `Ref`.
    pub attribute: Option<String>,
    pub start: usize,
    pub end: usize,
}

fn candidate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{(?:Ref|GetAtt):[^}]*\}").expect("valid reference pattern")
    })
}

fn strict_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^\$\{(Ref|GetAtt):([A-Za-z0-9_\-]+(?:/[A-Za-z0-9_\-]+)*)(?:\.([A-Za-z0-9_.]+))?\}$",
        )
        .expect("valid reference pattern")
    })
}

/// Whether `s` contains anything that looks like a reference expression.
pub fn contains_expression(s: &str) -> bool {
    candidate_pattern().is_match(s)
}

/// Parse every reference expression in `s`.
pub fn parse(s: &str) -> BlueprintResult<Vec<Expression>> {
    let mut expressions = Vec::new();
    for candidate in candidate_pattern().find_iter(s) {
        let text = candidate.as_str();
        let captures = strict_pattern()
            .captures(text)
            .ok_or_else(|| BlueprintError::InvalidReference {
                reference: text.to_string(),
                reason: "expected ${Ref:<path>} or ${GetAtt:<path>.<Attribute>}".to_string(),
            })?;

        let is_get_att = &captures[1] == "GetAtt";
        let attribute = captures.get(3).map(|m| m.as_str().to_string());
        match (is_get_att, &attribute) {
            (false, Some(_)) => {
                return Err(BlueprintError::InvalidReference {
                    reference: text.to_string(),
                    reason: "Ref takes no attribute; use GetAtt".to_string(),
                })
            }
            (true, None) => {
                return Err(BlueprintError::InvalidReference {
                    reference: text.to_string(),
                    reason: "GetAtt needs an attribute after the path".to_string(),
                })
            }
            _ => {}
        }

        expressions.push(Expression {
            path: captures[2].to_string(),
            attribute,
            start: candidate.start(),
            end: candidate.end(),
        });
    }
    Ok(expressions)
}

/// Absolute paths `path` may denote from inside `stack`, most specific first.
pub fn candidate_paths(stack: &str, path: &str) -> [String; 2] {
    [format!("{}/{}", stack, path), path.to_string()]
}
