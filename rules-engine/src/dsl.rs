//! Compiles the `TAG['key'] == 'literal' || DIMENSION['key'] CONTAINS 'literal'`
//! match-expression grammar into structured atoms, and unwraps the quoted
//! value-expression literal.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DslError {
    #[error("empty match expression")]
    EmptyExpression,
    #[error("unparseable atom: {0}")]
    UnparseableAtom(String),
    #[error("value expression is not a quoted literal: {0}")]
    InvalidValueExpression(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Tag,
    Dimension,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    pub source: Source,
    pub key: String,
    pub op: Op,
    pub literal: String,
}

fn tag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"TAG\['([^']+)'\]\s*(==|CONTAINS)\s*'([^']*)'")
            .expect("static tag pattern is valid")
    })
}

fn dim_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:BUSINESS_)?DIMENSION\['([^']+)'\]\s*(==|CONTAINS)\s*'([^']*)'")
            .expect("static dimension pattern is valid")
    })
}

fn value_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^'([^']*)'$").expect("static value pattern is valid"))
}

fn parse_op(raw: &str) -> Op {
    if raw == "CONTAINS" {
        Op::Contains
    } else {
        Op::Eq
    }
}

/// Splits a match expression on ` || ` and parses each atom, trying the TAG
/// pattern then the DIMENSION pattern against the whole atom text (mirrors
/// the source project's independent-regex-search approach rather than a
/// tokenizing grammar, since the language has no nesting).
pub fn parse_match_expression(expr: &str) -> Result<Vec<Atom>, DslError> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err(DslError::EmptyExpression);
    }
    trimmed
        .split(" || ")
        .map(|part| parse_atom(part.trim()))
        .collect()
}

fn parse_atom(part: &str) -> Result<Atom, DslError> {
    if let Some(caps) = tag_pattern().captures(part) {
        return Ok(Atom {
            source: Source::Tag,
            key: caps[1].to_string(),
            op: parse_op(&caps[2]),
            literal: caps[3].to_string(),
        });
    }
    if let Some(caps) = dim_pattern().captures(part) {
        return Ok(Atom {
            source: Source::Dimension,
            key: caps[1].to_string(),
            op: parse_op(&caps[2]),
            literal: caps[3].to_string(),
        });
    }
    Err(DslError::UnparseableAtom(part.to_string()))
}

/// Unwraps a single-quoted value-expression literal.
pub fn parse_value_expression(expr: &str) -> Result<String, DslError> {
    let trimmed = expr.trim();
    value_pattern()
        .captures(trimmed)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| DslError::InvalidValueExpression(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_tag_eq_atom() {
        let atoms = parse_match_expression("TAG['env'] == 'prod'").unwrap();
        assert_eq!(atoms.len(), 1);
        assert_eq!(atoms[0].source, Source::Tag);
        assert_eq!(atoms[0].key, "env");
        assert_eq!(atoms[0].op, Op::Eq);
        assert_eq!(atoms[0].literal, "prod");
    }

    #[test]
    fn parses_disjunction_of_mixed_atoms() {
        let atoms =
            parse_match_expression("TAG['env'] == 'prod' || DIMENSION['tier'] CONTAINS 'gold'")
                .unwrap();
        assert_eq!(atoms.len(), 2);
        assert_eq!(atoms[1].source, Source::Dimension);
        assert_eq!(atoms[1].op, Op::Contains);
    }

    #[test]
    fn business_dimension_prefix_normalizes_to_dimension() {
        let atoms = parse_match_expression("BUSINESS_DIMENSION['tier'] == 'gold'").unwrap();
        assert_eq!(atoms[0].source, Source::Dimension);
        assert_eq!(atoms[0].key, "tier");
    }

    #[test]
    fn rejects_empty_expression() {
        assert_eq!(parse_match_expression("   "), Err(DslError::EmptyExpression));
    }

    #[test]
    fn rejects_unparseable_atom() {
        let result = parse_match_expression("NOT_A_THING['x'] == 'y'");
        assert!(matches!(result, Err(DslError::UnparseableAtom(_))));
    }

    #[test]
    fn unwraps_value_literal() {
        assert_eq!(parse_value_expression("'Production'").unwrap(), "Production");
    }

    #[test]
    fn rejects_unquoted_value() {
        assert!(parse_value_expression("Production").is_err());
    }
}
