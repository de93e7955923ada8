//! Exposition format parser
//!
//! Parses the line-oriented metric exposition text pulled from scrape
//! targets into typed [`MetricSample`]s.
//!
//! # Supported Syntax
//!
//! ```text
//! # HELP http_requests_total Total HTTP requests served
//! # TYPE http_requests_total counter
//! http_requests_total{method="get",code="200"} 1027 1712345678000
//! http_requests_total{method="post",code="200"} 3
//! node_load1 1.5
//! ```
//!
//! `# HELP` and `# TYPE` comments update pending metadata for subsequent
//! data lines of that metric name. A data line is
//! `name{label="value",...} value [timestamp_ms]`; a missing timestamp
//! defaults to the scrape time passed by the caller.
//!
//! Parsing never aborts on a single bad line: unmatched lines are reported
//! as [`LineError`]s and skipped. The parser is a pure function with no
//! side effects; errors are data, not exceptions.

use std::collections::HashMap;
use std::fmt;

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag, take_while, take_while1, take_while_m_n},
    character::complete::{char, digit1, space0, space1},
    combinator::{all_consuming, map, opt, recognize, value},
    multi::separated_list0,
    number::complete::double,
    sequence::{delimited, preceded},
    IResult, Parser,
};

use crate::types::{Labels, MetricKind, MetricSample};

/// One malformed exposition line, recovered locally
///
/// Not an `Error` in the `thiserror` sense on purpose: line errors are part
/// of the parse result, and the surrounding scrape continues regardless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
    /// 1-based line number within the scraped body
    pub line_no: usize,

    /// The offending line, verbatim
    pub line: String,

    /// Why the line was rejected
    pub reason: String,
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {} ({:?})", self.line_no, self.reason, self.line)
    }
}

/// Result of parsing one exposition body
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// Successfully parsed samples, in input order
    pub samples: Vec<MetricSample>,

    /// Lines that did not match the grammar
    pub errors: Vec<LineError>,
}

/// Pending `# HELP` / `# TYPE` metadata per metric name
#[derive(Debug, Default, Clone)]
struct PendingMeta {
    help: Option<String>,
    kind: Option<MetricKind>,
}

/// Parse an exposition body into samples and line errors
///
/// `target_labels` (job, instance, any static labels) are merged into every
/// sample's label set and win on key collision. `scrape_time_ms` fills in
/// for data lines that carry no timestamp.
pub fn parse(text: &str, target_labels: &Labels, scrape_time_ms: i64) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    let mut pending: HashMap<String, PendingMeta> = HashMap::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        let line_no = idx + 1;

        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('#') {
            if let Err(reason) = apply_comment(rest.trim_start(), &mut pending) {
                outcome.errors.push(LineError {
                    line_no,
                    line: raw.to_string(),
                    reason,
                });
            }
            continue;
        }

        match data_line(line) {
            Ok((_, (name, pairs, val, ts))) => {
                let mut labels: Labels = pairs.into_iter().collect();
                // Target labels take precedence on collision
                for (k, v) in target_labels {
                    labels.insert(k.clone(), v.clone());
                }

                let meta = pending.get(name);
                outcome.samples.push(MetricSample {
                    name: name.to_string(),
                    labels,
                    value: val,
                    timestamp_ms: ts.unwrap_or(scrape_time_ms),
                    kind: meta.and_then(|m| m.kind),
                    help: meta.and_then(|m| m.help.clone()),
                });
            },
            Err(_) => {
                outcome.errors.push(LineError {
                    line_no,
                    line: raw.to_string(),
                    reason: "not a valid metric line".to_string(),
                });
            },
        }
    }

    outcome
}

/// Serialize samples back into exposition text
///
/// Emits `# HELP` / `# TYPE` once per metric name (first occurrence wins)
/// followed by the data lines with explicit timestamps. The output parses
/// back into the same `(name, labels, value)` tuples.
pub fn render(samples: &[MetricSample]) -> String {
    let mut out = String::new();
    let mut described: HashMap<&str, ()> = HashMap::new();

    for sample in samples {
        if described.insert(sample.name.as_str(), ()).is_none() {
            if let Some(help) = &sample.help {
                out.push_str(&format!("# HELP {} {}\n", sample.name, help));
            }
            if let Some(kind) = sample.kind {
                out.push_str(&format!("# TYPE {} {}\n", sample.name, kind));
            }
        }

        out.push_str(&sample.name);
        if !sample.labels.is_empty() {
            out.push('{');
            let mut first = true;
            for (k, v) in &sample.labels {
                if !first {
                    out.push(',');
                }
                first = false;
                out.push_str(&format!("{}=\"{}\"", k, escape_label_value(v)));
            }
            out.push('}');
        }
        out.push_str(&format!(" {} {}\n", sample.value, sample.timestamp_ms));
    }

    out
}

fn escape_label_value(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

/// Apply a `#` comment line to the pending metadata map
///
/// `HELP` and `TYPE` comments are recorded; any other comment is skipped
/// silently. A `TYPE` with an unknown kind is an error for that line only.
fn apply_comment(rest: &str, pending: &mut HashMap<String, PendingMeta>) -> Result<(), String> {
    if let Some(help_rest) = rest.strip_prefix("HELP ") {
        let mut parts = help_rest.trim_start().splitn(2, ' ');
        let name = parts.next().unwrap_or("");
        if name.is_empty() {
            return Err("HELP comment without a metric name".to_string());
        }
        let help = parts.next().unwrap_or("").to_string();
        pending.entry(name.to_string()).or_default().help = Some(help);
        return Ok(());
    }

    if let Some(type_rest) = rest.strip_prefix("TYPE ") {
        let mut parts = type_rest.trim_start().split_whitespace();
        let name = parts.next().unwrap_or("");
        let kind_str = parts.next().unwrap_or("");
        if name.is_empty() || kind_str.is_empty() {
            return Err("TYPE comment without name and kind".to_string());
        }
        let kind: MetricKind = kind_str
            .parse()
            .map_err(|_| format!("unknown metric kind {:?}", kind_str))?;
        pending.entry(name.to_string()).or_default().kind = Some(kind);
        return Ok(());
    }

    // Free-form comment
    Ok(())
}

// ============================================================================
// Data Line Grammar
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

/// Parse a metric name: `[a-zA-Z_:][a-zA-Z0-9_:]*`
fn metric_name(input: &str) -> IResult<&str, &str> {
    recognize((
        take_while_m_n(1, 1, is_name_start),
        take_while(is_name_char),
    ))
    .parse(input)
}

/// Parse a label name: `[a-zA-Z_][a-zA-Z0-9_]*`
fn label_name(input: &str) -> IResult<&str, &str> {
    recognize((
        take_while_m_n(1, 1, is_label_start),
        take_while(is_label_char),
    ))
    .parse(input)
}

/// Parse a quoted label value with `\"`, `\\` and `\n` escapes
fn label_value(input: &str) -> IResult<&str, String> {
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

/// Parse one `name="value"` pair
fn label_pair(input: &str) -> IResult<&str, (String, String)> {
    let (input, name) = label_name(input)?;
    let (input, _) = (space0, char('='), space0).parse(input)?;
    let (input, val) = label_value(input)?;
    Ok((input, (name.to_string(), val)))
}

/// Parse an optional `{label="value",...}` block (trailing comma allowed)
fn label_block(input: &str) -> IResult<&str, Vec<(String, String)>> {
    delimited(
        (char('{'), space0),
        separated_list0((space0, char(','), space0), label_pair),
        (space0, opt(char(',')), space0, char('}')),
    )
    .parse(input)
}

/// Parse a sample value, including the exposition specials
fn sample_value(input: &str) -> IResult<&str, f64> {
    alt((
        value(f64::INFINITY, tag("+Inf")),
        value(f64::NEG_INFINITY, tag("-Inf")),
        value(f64::NAN, tag("NaN")),
        double,
    ))
    .parse(input)
}

/// Parse an optional trailing timestamp in unix milliseconds
fn timestamp(input: &str) -> IResult<&str, i64> {
    map(recognize((opt(char('-')), digit1)), |s: &str| {
        s.parse::<i64>().unwrap_or(0)
    })
    .parse(input)
}

/// Parse a complete data line: `name{labels} value [timestamp]`
#[allow(clippy::type_complexity)]
fn data_line(input: &str) -> IResult<&str, (&str, Vec<(String, String)>, f64, Option<i64>)> {
    all_consuming((
        metric_name,
        map(opt(label_block), Option::unwrap_or_default),
        preceded(space1, sample_value),
        opt(preceded(space1, timestamp)),
        space0,
    ))
    .parse(input)
    .map(|(rest, (name, labels, val, ts, _))| (rest, (name, labels, val, ts)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Labels;

    fn target_labels() -> Labels {
        let mut labels = Labels::new();
        labels.insert("job".to_string(), "node".to_string());
        labels.insert("instance".to_string(), "localhost:9100".to_string());
        labels
    }

    const BODY: &str = "\
# HELP http_requests_total Total HTTP requests served\n\
# TYPE http_requests_total counter\n\
http_requests_total{method=\"get\",code=\"200\"} 1027 1712345678000\n\
http_requests_total{method=\"post\",code=\"200\"} 3\n\
node_load1 1.5\n";

    #[test]
    fn test_parse_well_formed_block() {
        let outcome = parse(BODY, &target_labels(), 999);

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.samples.len(), 3);

        let first = &outcome.samples[0];
        assert_eq!(first.name, "http_requests_total");
        assert_eq!(first.value, 1027.0);
        assert_eq!(first.timestamp_ms, 1712345678000);
        assert_eq!(first.kind, Some(MetricKind::Counter));
        assert_eq!(
            first.help.as_deref(),
            Some("Total HTTP requests served")
        );
        assert_eq!(first.labels.get("method").map(String::as_str), Some("get"));
        assert_eq!(first.labels.get("job").map(String::as_str), Some("node"));
    }

    #[test]
    fn test_missing_timestamp_defaults_to_scrape_time() {
        let outcome = parse("node_load1 1.5\n", &Labels::new(), 42_000);
        assert_eq!(outcome.samples[0].timestamp_ms, 42_000);
    }

    #[test]
    fn test_one_bad_line_among_valid_ones() {
        let text = "a_metric 1\nthis is not a metric line\nb_metric 2\nc_metric 3\n";
        let outcome = parse(text, &Labels::new(), 0);

        assert_eq!(outcome.samples.len(), 3);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].line_no, 2);
    }

    #[test]
    fn test_target_labels_win_on_collision() {
        let text = "up{job=\"self_reported\"} 1\n";
        let outcome = parse(text, &target_labels(), 0);

        assert_eq!(
            outcome.samples[0].labels.get("job").map(String::as_str),
            Some("node")
        );
    }

    #[test]
    fn test_help_type_attach_by_name_not_adjacency() {
        let text = "\
# TYPE alpha gauge\n\
# TYPE beta counter\n\
beta 2\n\
alpha 1\n";
        let outcome = parse(text, &Labels::new(), 0);

        assert_eq!(outcome.samples[0].kind, Some(MetricKind::Counter));
        assert_eq!(outcome.samples[1].kind, Some(MetricKind::Gauge));
    }

    #[test]
    fn test_unknown_type_kind_is_line_error() {
        let text = "# TYPE weird sparkline\nweird 1\n";
        let outcome = parse(text, &Labels::new(), 0);

        assert_eq!(outcome.errors.len(), 1);
        // The data line itself still parses, just without a kind
        assert_eq!(outcome.samples.len(), 1);
        assert_eq!(outcome.samples[0].kind, None);
    }

    #[test]
    fn test_free_comments_and_blank_lines_skipped() {
        let text = "# just a comment\n\n   \nnode_load1 0.5\n";
        let outcome = parse(text, &Labels::new(), 0);

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.samples.len(), 1);
    }

    #[test]
    fn test_escaped_label_values() {
        let text = "disk_free{path=\"C:\\\\data\",note=\"say \\\"hi\\\"\"} 9\n";
        let outcome = parse(text, &Labels::new(), 0);

        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        let labels = &outcome.samples[0].labels;
        assert_eq!(labels.get("path").map(String::as_str), Some("C:\\data"));
        assert_eq!(labels.get("note").map(String::as_str), Some("say \"hi\""));
    }

    #[test]
    fn test_empty_label_value_and_trailing_comma() {
        let text = "m{a=\"\",b=\"x\",} 1\n";
        let outcome = parse(text, &Labels::new(), 0);

        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        assert_eq!(
            outcome.samples[0].labels.get("a").map(String::as_str),
            Some("")
        );
    }

    #[test]
    fn test_special_values() {
        let text = "a +Inf\nb -Inf\nc NaN\nd -0.5\ne 1e3\n";
        let outcome = parse(text, &Labels::new(), 0);

        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        assert_eq!(outcome.samples[0].value, f64::INFINITY);
        assert_eq!(outcome.samples[1].value, f64::NEG_INFINITY);
        assert!(outcome.samples[2].value.is_nan());
        assert_eq!(outcome.samples[3].value, -0.5);
        assert_eq!(outcome.samples[4].value, 1000.0);
    }

    #[test]
    fn test_round_trip_preserves_tuples() {
        let outcome = parse(BODY, &Labels::new(), 7_000);
        let rendered = render(&outcome.samples);
        let reparsed = parse(&rendered, &Labels::new(), 7_000);

        assert!(reparsed.errors.is_empty(), "{:?}", reparsed.errors);

        let tuples = |samples: &[MetricSample]| {
            let mut v: Vec<(String, Labels, String)> = samples
                .iter()
                .map(|s| (s.name.clone(), s.labels.clone(), format!("{}", s.value)))
                .collect();
            v.sort();
            v
        };
        assert_eq!(tuples(&outcome.samples), tuples(&reparsed.samples));
    }
}
