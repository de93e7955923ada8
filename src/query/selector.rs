//! Series selector parser
//!
//! Parses the query surface's selector syntax into matchers:
//!
//! ```text
//! cpu_usage
//! cpu_usage{host="server01"}
//! cpu_usage{host!="server01",env=~"prod|stage",dc!~"eu-.*"}
//! ```
//!
//! All four label matching operators are supported: `=` (equality), `!=`
//! (inequality), `=~` (regex match) and `!~` (regex non-match). Regex
//! patterns are anchored to the full label value. Invalid syntax or an
//! invalid pattern is a [`QueryError`] surfaced directly to the caller.

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag, take_while, take_while1, take_while_m_n},
    character::complete::{char, multispace0},
    combinator::{all_consuming, map, opt, recognize, value},
    multi::separated_list0,
    sequence::delimited,
    IResult, Parser,
};
use regex::Regex;

use crate::error::QueryError;
use crate::types::Labels;

/// Label matching operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    /// Exact equality: `label="value"`
    Equals,
    /// Inequality: `label!="value"`
    NotEquals,
    /// Regex match: `label=~"pattern"`
    RegexMatch,
    /// Regex non-match: `label!~"pattern"`
    RegexNotMatch,
}

/// One label matcher from a selector
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMatcher {
    /// Label name
    pub name: String,
    /// Operator
    pub op: MatchOp,
    /// Literal value or regex pattern
    pub value: String,
}

/// A parsed selector: metric name plus label matchers
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    /// Metric name
    pub metric: String,
    /// Label matchers, all of which must hold
    pub matchers: Vec<LabelMatcher>,
}

/// Parse a selector string
pub fn parse_selector(input: &str) -> Result<Selector, QueryError> {
    match selector(input.trim()) {
        Ok((_, sel)) => Ok(sel),
        Err(_) => Err(QueryError::Parse(format!(
            "invalid selector: {:?}",
            input.trim()
        ))),
    }
}

/// A selector compiled for evaluation (regexes built once)
#[derive(Debug)]
pub struct CompiledSelector {
    /// Metric name
    pub metric: String,
    matchers: Vec<CompiledMatcher>,
}

#[derive(Debug)]
enum CompiledMatcher {
    Equals { name: String, value: String },
    NotEquals { name: String, value: String },
    Regex { name: String, re: Regex, negated: bool },
}

impl CompiledSelector {
    /// Compile a parsed selector, validating its regex patterns
    pub fn compile(selector: Selector) -> Result<Self, QueryError> {
        let mut matchers = Vec::with_capacity(selector.matchers.len());

        for m in selector.matchers {
            let compiled = match m.op {
                MatchOp::Equals => CompiledMatcher::Equals {
                    name: m.name,
                    value: m.value,
                },
                MatchOp::NotEquals => CompiledMatcher::NotEquals {
                    name: m.name,
                    value: m.value,
                },
                MatchOp::RegexMatch | MatchOp::RegexNotMatch => {
                    // Anchor to the full label value
                    let re = Regex::new(&format!("^(?:{})$", m.value)).map_err(|e| {
                        QueryError::InvalidRegex {
                            pattern: m.value.clone(),
                            message: e.to_string(),
                        }
                    })?;
                    CompiledMatcher::Regex {
                        name: m.name,
                        re,
                        negated: m.op == MatchOp::RegexNotMatch,
                    }
                },
            };
            matchers.push(compiled);
        }

        Ok(Self {
            metric: selector.metric,
            matchers,
        })
    }

    /// Whether a label set satisfies every matcher
    ///
    /// A label absent from the set matches as the empty string, so
    /// `label=""` selects series without that label.
    pub fn matches(&self, labels: &Labels) -> bool {
        self.matchers.iter().all(|m| match m {
            CompiledMatcher::Equals { name, value } => {
                labels.get(name).map(String::as_str).unwrap_or("") == value
            },
            CompiledMatcher::NotEquals { name, value } => {
                labels.get(name).map(String::as_str).unwrap_or("") != value
            },
            CompiledMatcher::Regex { name, re, negated } => {
                let hit = re.is_match(labels.get(name).map(String::as_str).unwrap_or(""));
                hit != *negated
            },
        })
    }
}

// ============================================================================
// Grammar
// ============================================================================

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

fn is_label_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn metric_name(input: &str) -> IResult<&str, &str> {
    recognize((
        take_while_m_n(1, 1, is_name_start),
        take_while(is_name_char),
    ))
    .parse(input)
}

fn label_name(input: &str) -> IResult<&str, &str> {
    recognize((
        take_while_m_n(1, 1, is_label_start),
        take_while(is_label_char),
    ))
    .parse(input)
}

fn match_op(input: &str) -> IResult<&str, MatchOp> {
    alt((
        value(MatchOp::RegexNotMatch, tag("!~")),
        value(MatchOp::NotEquals, tag("!=")),
        value(MatchOp::RegexMatch, tag("=~")),
        value(MatchOp::Equals, tag("=")),
    ))
    .parse(input)
}

fn quoted_value(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(
                take_while1(|c| c != '"' && c != '\\'),
                '\\',
                alt((
                    value('"', char('"')),
                    value('\\', char('\\')),
                    value('\n', char('n')),
                )),
            )),
            Option::unwrap_or_default,
        ),
        char('"'),
    )
    .parse(input)
}

fn matcher(input: &str) -> IResult<&str, LabelMatcher> {
    let (input, name) = label_name(input)?;
    let (input, _) = multispace0(input)?;
    let (input, op) = match_op(input)?;
    let (input, _) = multispace0(input)?;
    let (input, val) = quoted_value(input)?;
    Ok((
        input,
        LabelMatcher {
            name: name.to_string(),
            op,
            value: val,
        },
    ))
}

fn matcher_block(input: &str) -> IResult<&str, Vec<LabelMatcher>> {
    delimited(
        (char('{'), multispace0),
        separated_list0((multispace0, char(','), multispace0), matcher),
        (multispace0, opt(char(',')), multispace0, char('}')),
    )
    .parse(input)
}

fn selector(input: &str) -> IResult<&str, Selector> {
    all_consuming((
        metric_name,
        map(opt(matcher_block), Option::unwrap_or_default),
        multispace0,
    ))
    .parse(input)
    .map(|(rest, (metric, matchers, _))| {
        (
            rest,
            Selector {
                metric: metric.to_string(),
                matchers,
            },
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels_of(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_bare_metric_name() {
        let sel = parse_selector("cpu_usage").unwrap();
        assert_eq!(sel.metric, "cpu_usage");
        assert!(sel.matchers.is_empty());
    }

    #[test]
    fn test_selector_with_matchers() {
        let sel = parse_selector(r#"cpu_usage{host="a", env!="dev", dc=~"us-.*", os!~"win.*"}"#)
            .unwrap();

        assert_eq!(sel.metric, "cpu_usage");
        assert_eq!(sel.matchers.len(), 4);
        assert_eq!(sel.matchers[0].op, MatchOp::Equals);
        assert_eq!(sel.matchers[1].op, MatchOp::NotEquals);
        assert_eq!(sel.matchers[2].op, MatchOp::RegexMatch);
        assert_eq!(sel.matchers[3].op, MatchOp::RegexNotMatch);
    }

    #[test]
    fn test_invalid_selectors_rejected() {
        assert!(parse_selector("").is_err());
        assert!(parse_selector("1starts_with_digit").is_err());
        assert!(parse_selector("cpu{host=}").is_err());
        assert!(parse_selector("cpu{host=\"a\"").is_err());
        assert!(parse_selector("cpu{host=\"a\"} trailing").is_err());
        assert!(parse_selector("cpu and mem").is_err());
    }

    #[test]
    fn test_compiled_equality_matching() {
        let sel = CompiledSelector::compile(parse_selector(r#"m{host="a"}"#).unwrap()).unwrap();

        assert!(sel.matches(&labels_of(&[("host", "a"), ("dc", "x")])));
        assert!(!sel.matches(&labels_of(&[("host", "b")])));
        // Absent label matches as ""
        assert!(!sel.matches(&labels_of(&[])));
    }

    #[test]
    fn test_compiled_regex_matching() {
        let sel = CompiledSelector::compile(
            parse_selector(r#"m{dc=~"us-(east|west)", env!~"dev.*"}"#).unwrap(),
        )
        .unwrap();

        assert!(sel.matches(&labels_of(&[("dc", "us-east"), ("env", "prod")])));
        assert!(!sel.matches(&labels_of(&[("dc", "us-east"), ("env", "dev2")])));
        // Regex is full-anchored
        assert!(!sel.matches(&labels_of(&[("dc", "us-east-1"), ("env", "prod")])));
    }

    #[test]
    fn test_empty_value_matches_absent_label() {
        let sel = CompiledSelector::compile(parse_selector(r#"m{team=""}"#).unwrap()).unwrap();
        assert!(sel.matches(&labels_of(&[("host", "a")])));
        assert!(!sel.matches(&labels_of(&[("team", "core")])));
    }

    #[test]
    fn test_invalid_regex_is_query_error() {
        let err =
            CompiledSelector::compile(parse_selector(r#"m{dc=~"us-("}"#).unwrap()).unwrap_err();
        assert!(matches!(err, QueryError::InvalidRegex { .. }));
    }
}
