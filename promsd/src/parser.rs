//! Prometheus text format parser
//!
//! This module provides a parser for the Prometheus text exposition format.
//! <https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md>
//!
//! Parsing is all-or-nothing. The first malformed line fails the whole
//! exposition and no partial [`MetricFamilyMap`] is produced.

use rustc_hash::FxHashMap;

use crate::model::{
    Bucket, Histogram, Labels, Metric, MetricFamily, MetricFamilyMap, MetricType, Quantile,
    Summary, UnknownMetricType, Value, parse_value,
};

/// Label carrying the rank of a summary quantile sample.
pub const QUANTILE_LABEL: &str = "quantile";
/// Label carrying the upper bound of a histogram bucket sample.
pub const BUCKET_LABEL: &str = "le";
/// The only label name a sample may not carry.
pub const RESERVED_NAME_LABEL: &str = "__name__";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
/// Errors that can occur while parsing Prometheus text format
pub enum ParseError {
    /// Unknown metric type in TYPE line
    #[error(transparent)]
    UnknownMetricType(#[from] UnknownMetricType),
    /// Invalid format in the line
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    /// Invalid value that cannot be parsed as a number
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// Missing value in metric line
    #[error("missing value")]
    MissingValue,
    /// Missing name in metric line
    #[error("missing metric name")]
    MissingName,
    /// Invalid label format
    #[error("invalid label: {0}")]
    InvalidLabel(String),
    /// A second TYPE line for the same family
    #[error("second TYPE line for metric family {0}")]
    DuplicateType(String),
    /// A second HELP line for the same family
    #[error("second HELP line for metric family {0}")]
    DuplicateHelp(String),
    /// A TYPE line after samples of its family were already seen
    #[error("TYPE line for metric family {0} after its samples")]
    TypeAfterSamples(String),
    /// A summary sample without a `quantile` label
    #[error("summary sample {0} has no quantile label")]
    MissingQuantile(String),
    /// A histogram bucket sample without an `le` label
    #[error("histogram bucket {0} has no le label")]
    MissingBucketBound(String),
    /// A sample whose name has no place in its family, e.g. a bare histogram sample
    #[error("unexpected sample {0} for its metric family")]
    UnexpectedSample(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("line {line}: {kind}")]
/// A [`ParseError`] located in the exposition text
pub struct Error {
    /// 1-based line number of the offending line
    pub line: usize,
    /// What was wrong with it
    #[source]
    pub kind: ParseError,
}

#[derive(Debug, Clone, PartialEq)]
/// A single parsed sample line
pub struct ParsedMetric {
    /// The metric name
    pub name: String,
    /// The metric value
    pub value: f64,
    /// The metric labels
    pub labels: Labels,
    /// Optional timestamp in milliseconds since Unix epoch
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
/// A single line of the exposition, after tokenizing
pub enum Line {
    /// `# HELP <name> <text>`
    Help {
        /// Family the text describes
        name: String,
        /// Unescaped help text
        help: String,
    },
    /// `# TYPE <name> <type>`
    Type {
        /// Family being declared
        name: String,
        /// Declared type
        metric_type: MetricType,
    },
    /// A sample line
    Sample(ParsedMetric),
}

/// Parse a complete exposition into its metric families.
///
/// # Errors
///
/// Returns the first malformed line found.
pub fn parse(text: &str) -> Result<MetricFamilyMap, Error> {
    PrometheusParser::new().parse_text(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Scalar,
    Quantile,
    Sum,
    Count,
    Bucket,
    Bare,
}

#[derive(Debug)]
struct Pending {
    family: MetricFamily,
    declared: bool,
    has_help: bool,
    // label set, minus quantile/le, to metric index for summaries and histograms
    index: FxHashMap<Labels, usize>,
}

impl Pending {
    fn new(name: &str) -> Self {
        Self {
            family: MetricFamily::new(name, MetricType::Untyped),
            declared: false,
            has_help: false,
            index: FxHashMap::default(),
        }
    }

    fn aggregate(&mut self, labels: Labels, timestamp: Option<i64>) -> &mut Value {
        let metrics = &mut self.family.metrics;
        let metric_type = self.family.metric_type;
        let idx = *self.index.entry(labels.clone()).or_insert_with(|| {
            let value = if metric_type == MetricType::Histogram {
                Value::Histogram(Histogram::default())
            } else {
                Value::Summary(Summary::default())
            };
            metrics.push(Metric {
                labels,
                value,
                timestamp: None,
            });
            metrics.len() - 1
        });
        let metric = &mut metrics[idx];
        if timestamp.is_some() {
            metric.timestamp = timestamp;
        }
        &mut metric.value
    }
}

#[derive(Debug, Default)]
/// Parser for Prometheus text exposition format
pub struct PrometheusParser {
    families: FxHashMap<String, Pending>,
}

impl PrometheusParser {
    /// Create a new parser instance
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a complete Prometheus text format response
    ///
    /// # Errors
    ///
    /// Returns the first malformed line found. The families assembled so far
    /// are discarded.
    pub fn parse_text(mut self, text: &str) -> Result<MetricFamilyMap, Error> {
        for (idx, line) in text.lines().enumerate() {
            self.parse_line(line)
                .map_err(|kind| Error { line: idx + 1, kind })?;
        }
        Ok(self.finish())
    }

    /// Parse a single line of Prometheus text format into the families
    /// assembled so far
    ///
    /// # Errors
    ///
    /// Returns an error if the line is malformed or contradicts earlier lines.
    pub fn parse_line(&mut self, line: &str) -> Result<(), ParseError> {
        match Self::tokenize(line)? {
            None => Ok(()),
            Some(Line::Help { name, help }) => self.describe(&name, help),
            Some(Line::Type { name, metric_type }) => self.declare(&name, metric_type),
            Some(Line::Sample(sample)) => self.apply(sample),
        }
    }

    /// Families with at least one sample, keyed by name
    fn finish(self) -> MetricFamilyMap {
        self.families
            .into_iter()
            .filter(|(_, pending)| !pending.family.metrics.is_empty())
            .map(|(name, pending)| (name, pending.family))
            .collect()
    }

    /// Split one line into its grammatical parts. Blank lines and plain
    /// comments yield `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is malformed.
    pub fn tokenize(line: &str) -> Result<Option<Line>, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        if let Some(comment) = line.strip_prefix('#') {
            return Self::parse_comment_line(comment);
        }
        Self::parse_metric_line(line).map(|sample| Some(Line::Sample(sample)))
    }

    fn parse_comment_line(comment: &str) -> Result<Option<Line>, ParseError> {
        let comment = comment.trim_start();
        let (keyword, rest) = comment
            .split_once(char::is_whitespace)
            .unwrap_or((comment, ""));
        let rest = rest.trim_start();
        let (name, rest) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));

        // HELP and TYPE lines lacking their operands are plain comments.
        match keyword {
            "HELP" if !name.is_empty() => {
                Self::validate_metric_name(name)?;
                Ok(Some(Line::Help {
                    name: name.to_string(),
                    help: Self::unescape_help(rest.trim_start())?,
                }))
            }
            "TYPE" if !name.is_empty() => {
                let Some(metric_type_str) = rest.split_ascii_whitespace().next() else {
                    return Ok(None);
                };
                Self::validate_metric_name(name)?;
                Ok(Some(Line::Type {
                    name: name.to_string(),
                    metric_type: metric_type_str.parse()?,
                }))
            }
            _ => Ok(None),
        }
    }

    fn unescape_help(text: &str) -> Result<String, ParseError> {
        let mut result = String::with_capacity(text.len());
        let mut chars = text.chars();
        while let Some(ch) = chars.next() {
            if ch == '\\' {
                match chars.next() {
                    Some('\\') => result.push('\\'),
                    Some('n') => result.push('\n'),
                    Some(c) => {
                        return Err(ParseError::InvalidFormat(format!(
                            "Invalid escape sequence in HELP: \\{c}"
                        )));
                    }
                    None => {
                        return Err(ParseError::InvalidFormat(
                            "Backslash at end of HELP text".to_string(),
                        ));
                    }
                }
            } else {
                result.push(ch);
            }
        }
        Ok(result)
    }

    fn parse_metric_line(line: &str) -> Result<ParsedMetric, ParseError> {
        let name_end = line
            .find(|c: char| c == '{' || c.is_whitespace())
            .ok_or(ParseError::MissingValue)?;
        let name = &line[..name_end];
        if name.is_empty() {
            return Err(ParseError::MissingName);
        }
        Self::validate_metric_name(name)?;

        let rest = line[name_end..].trim_start();
        let (labels, rest) = match rest.strip_prefix('{') {
            Some(labels_str) => Self::parse_labels(labels_str)?,
            None => (Labels::new(), rest),
        };
        let (value, timestamp) = Self::parse_value_and_timestamp(rest)?;

        Ok(ParsedMetric {
            name: name.to_string(),
            value,
            labels,
            timestamp,
        })
    }

    fn validate_metric_name(name: &str) -> Result<(), ParseError> {
        // [a-zA-Z_:][a-zA-Z0-9_:]*
        let mut chars = name.chars();
        let follows_pattern = chars
            .next()
            .is_some_and(|first| first.is_ascii_alphabetic() || first == '_' || first == ':')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':');
        if follows_pattern {
            Ok(())
        } else {
            Err(ParseError::InvalidFormat(format!(
                "Invalid metric name: {name}"
            )))
        }
    }

    /// Parse the inside of a `{...}` label block, returning the labels and
    /// whatever follows the closing brace.
    fn parse_labels(labels_str: &str) -> Result<(Labels, &str), ParseError> {
        let mut labels = Labels::new();
        let mut rest = labels_str.trim_start();

        loop {
            if let Some(after) = rest.strip_prefix('}') {
                return Ok((labels, after));
            }
            if rest.is_empty() {
                return Err(ParseError::InvalidFormat(
                    "Unclosed labels bracket".to_string(),
                ));
            }

            let (label_name, after_name) = rest
                .split_once('=')
                .ok_or_else(|| ParseError::InvalidLabel(format!("Label missing '=': {rest}")))?;
            let label_name = label_name.trim();

            if label_name.is_empty() {
                return Err(ParseError::InvalidLabel("Empty label key".to_string()));
            }

            Self::validate_label_name(label_name)?;

            let (label_value, after_value) = Self::parse_label_value(after_name.trim_start())?;
            if labels.insert(label_name.to_string(), label_value).is_some() {
                return Err(ParseError::InvalidLabel(format!(
                    "Duplicate label name: {label_name}"
                )));
            }

            rest = after_value.trim_start();
            if let Some(after) = rest.strip_prefix(',') {
                rest = after.trim_start();
            } else if !rest.starts_with('}') {
                return Err(ParseError::InvalidLabel(
                    "Expected ',' or '}' after label value".to_string(),
                ));
            }
        }
    }

    fn validate_label_name(name: &str) -> Result<(), ParseError> {
        if name == RESERVED_NAME_LABEL {
            return Err(ParseError::InvalidLabel(format!(
                "Label name {RESERVED_NAME_LABEL} is reserved"
            )));
        }

        // Label names SHOULD follow [a-zA-Z_][a-zA-Z0-9_]* but any UTF-8 is
        // accepted as long as it does not collide with the label syntax.
        if let Some(c) = name
            .chars()
            .find(|&c| c.is_whitespace() || matches!(c, '{' | '}' | ',' | '"' | '='))
        {
            return Err(ParseError::InvalidLabel(format!(
                "Invalid character {c:?} in label name {name}"
            )));
        }

        Ok(())
    }

    /// Parse a quoted label value with escape handling, returning the
    /// unescaped value and the text after the closing quote.
    fn parse_label_value(value: &str) -> Result<(String, &str), ParseError> {
        let Some(inner) = value.strip_prefix('"') else {
            return Err(ParseError::InvalidLabel(
                "Label value must be quoted".to_string(),
            ));
        };

        let mut result = String::with_capacity(inner.len());
        let mut chars = inner.char_indices();

        while let Some((idx, ch)) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some((_, '\\')) => result.push('\\'),
                    Some((_, '"')) => result.push('"'),
                    Some((_, 'n')) => result.push('\n'),
                    Some((_, c)) => {
                        return Err(ParseError::InvalidLabel(format!(
                            "Invalid escape sequence: \\{c}"
                        )));
                    }
                    None => {
                        return Err(ParseError::InvalidLabel(
                            "Backslash at end of label value".to_string(),
                        ));
                    }
                },
                '"' => return Ok((result, &inner[idx + 1..])),
                _ => result.push(ch),
            }
        }

        Err(ParseError::InvalidLabel(
            "Label value quotes not properly paired".to_string(),
        ))
    }

    fn parse_value_and_timestamp(value_str: &str) -> Result<(f64, Option<i64>), ParseError> {
        let mut parts = value_str.split_whitespace();

        let value_part = parts.next().ok_or(ParseError::MissingValue)?;

        // Check for comment markers
        if value_part.contains('#') {
            return Err(ParseError::InvalidFormat(
                "Value contains comment marker".to_string(),
            ));
        }

        let value = parse_value(value_part).map_err(ParseError::InvalidValue)?;

        let timestamp =
            if let Some(ts_str) = parts.next() {
                Some(ts_str.parse::<i64>().map_err(|_| {
                    ParseError::InvalidFormat(format!("Invalid timestamp: {ts_str}"))
                })?)
            } else {
                None
            };

        if let Some(extra) = parts.next() {
            return Err(ParseError::InvalidFormat(format!(
                "Unexpected trailing data: {extra}"
            )));
        }

        Ok((value, timestamp))
    }

    fn describe(&mut self, name: &str, help: String) -> Result<(), ParseError> {
        let pending = self
            .families
            .entry(name.to_string())
            .or_insert_with(|| Pending::new(name));
        if pending.has_help {
            return Err(ParseError::DuplicateHelp(name.to_string()));
        }
        pending.has_help = true;
        pending.family.help = help;
        Ok(())
    }

    fn declare(&mut self, name: &str, metric_type: MetricType) -> Result<(), ParseError> {
        let pending = self
            .families
            .entry(name.to_string())
            .or_insert_with(|| Pending::new(name));
        if pending.declared {
            return Err(ParseError::DuplicateType(name.to_string()));
        }
        if !pending.family.metrics.is_empty() {
            return Err(ParseError::TypeAfterSamples(name.to_string()));
        }
        pending.declared = true;
        pending.family.metric_type = metric_type;
        Ok(())
    }

    /// Find the family a sample name belongs to. A family already known under
    /// the full name wins over the `_sum`/`_count`/`_bucket` suffix rules.
    fn resolve<'a>(&self, name: &'a str) -> (&'a str, Role) {
        if let Some(pending) = self.families.get(name) {
            let role = match pending.family.metric_type {
                MetricType::Summary => Role::Quantile,
                MetricType::Histogram => Role::Bare,
                MetricType::Counter | MetricType::Gauge | MetricType::Untyped => Role::Scalar,
            };
            return (name, role);
        }

        for (suffix, role) in [
            ("_sum", Role::Sum),
            ("_count", Role::Count),
            ("_bucket", Role::Bucket),
        ] {
            if let Some(base) = name.strip_suffix(suffix)
                && let Some(pending) = self.families.get(base)
            {
                match (pending.family.metric_type, role) {
                    (MetricType::Histogram, _) | (MetricType::Summary, Role::Sum | Role::Count) => {
                        return (base, role);
                    }
                    _ => {}
                }
            }
        }

        (name, Role::Scalar)
    }

    fn apply(&mut self, sample: ParsedMetric) -> Result<(), ParseError> {
        let (family_name, role) = self.resolve(&sample.name);
        let family_name = family_name.to_string();
        let pending = self
            .families
            .entry(family_name.clone())
            .or_insert_with(|| Pending::new(&family_name));

        let ParsedMetric {
            name,
            value,
            mut labels,
            timestamp,
        } = sample;

        match role {
            Role::Scalar => {
                let value = Value::scalar(pending.family.metric_type, value)
                    .ok_or_else(|| ParseError::UnexpectedSample(name.clone()))?;
                pending.family.metrics.push(Metric {
                    labels,
                    value,
                    timestamp,
                });
            }
            Role::Quantile => {
                let quantile = labels
                    .remove(QUANTILE_LABEL)
                    .ok_or_else(|| ParseError::MissingQuantile(name.clone()))?;
                let quantile = parse_value(&quantile)
                    .map_err(|q| ParseError::InvalidLabel(format!("Invalid quantile: {q}")))?;
                if let Value::Summary(summary) = pending.aggregate(labels, timestamp) {
                    summary.quantiles.push(Quantile { quantile, value });
                }
            }
            Role::Bucket => {
                let bound = labels
                    .remove(BUCKET_LABEL)
                    .ok_or_else(|| ParseError::MissingBucketBound(name.clone()))?;
                let upper_bound = parse_value(&bound)
                    .map_err(|b| ParseError::InvalidLabel(format!("Invalid bucket bound: {b}")))?;
                let cumulative_count = Self::count(value);
                if let Value::Histogram(histogram) = pending.aggregate(labels, timestamp) {
                    histogram.buckets.push(Bucket {
                        upper_bound,
                        cumulative_count,
                    });
                }
            }
            Role::Sum => match pending.aggregate(labels, timestamp) {
                Value::Summary(Summary { sum, .. }) | Value::Histogram(Histogram { sum, .. }) => {
                    *sum = value;
                }
                _ => return Err(ParseError::UnexpectedSample(name)),
            },
            Role::Count => {
                let observed = Self::count(value);
                match pending.aggregate(labels, timestamp) {
                    Value::Summary(Summary { count, .. })
                    | Value::Histogram(Histogram { count, .. }) => *count = observed,
                    _ => return Err(ParseError::UnexpectedSample(name)),
                }
            }
            Role::Bare => return Err(ParseError::UnexpectedSample(name)),
        }

        Ok(())
    }

    /// Counts saturate: negative and NaN become 0, `+Inf` becomes `u64::MAX`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn count(value: f64) -> u64 {
        value as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(line: &str) -> Result<ParsedMetric, ParseError> {
        PrometheusParser::parse_metric_line(line)
    }

    #[test]
    fn test_tokenize_type_line() {
        assert_eq!(
            PrometheusParser::tokenize("# TYPE http_requests_total counter"),
            Ok(Some(Line::Type {
                name: "http_requests_total".to_string(),
                metric_type: MetricType::Counter,
            }))
        );
        assert_eq!(
            PrometheusParser::tokenize("# TYPE http_requests_total timer"),
            Err(ParseError::UnknownMetricType(UnknownMetricType(
                "timer".to_string()
            )))
        );
        // Without a type keyword or a name the line is only a comment
        assert_eq!(
            PrometheusParser::tokenize("# TYPE http_requests_total"),
            Ok(None)
        );
        assert_eq!(PrometheusParser::tokenize("# TYPE"), Ok(None));
    }

    #[test]
    fn test_tokenize_help_and_comments() {
        assert_eq!(
            PrometheusParser::tokenize(r"# HELP rpc_errors Errors, per path C:\\DIR\nnext"),
            Ok(Some(Line::Help {
                name: "rpc_errors".to_string(),
                help: "Errors, per path C:\\DIR\nnext".to_string(),
            }))
        );
        assert_eq!(
            PrometheusParser::tokenize("# HELP bare"),
            Ok(Some(Line::Help {
                name: "bare".to_string(),
                help: String::new(),
            }))
        );
        assert_eq!(PrometheusParser::tokenize("# HELP"), Ok(None));
        assert_eq!(PrometheusParser::tokenize("#   HELP   "), Ok(None));
        assert_eq!(
            PrometheusParser::tokenize("# A weird metric from before the epoch:"),
            Ok(None)
        );
        assert_eq!(PrometheusParser::tokenize("   "), Ok(None));
    }

    #[test]
    fn test_parse_metric_line_no_labels() {
        let result = sample("http_requests_total 1027").unwrap();
        assert_eq!(result.name, "http_requests_total");
        assert_eq!(result.value, 1027.0);
        assert!(result.labels.is_empty());
    }

    #[test]
    fn test_parse_metric_line_with_labels() {
        let result = sample("http_requests_total{method=\"GET\",code=\"200\"} 1027").unwrap();
        assert_eq!(result.name, "http_requests_total");
        assert_eq!(result.value, 1027.0);
        assert_eq!(result.labels.len(), 2);
        assert_eq!(result.labels["method"], "GET");
        assert_eq!(result.labels["code"], "200");
    }

    #[test]
    fn test_parse_metric_line_with_timestamp() {
        let result = sample("http_requests_total 1027 1729113558073").unwrap();
        assert_eq!(result.value, 1027.0);
        assert_eq!(result.timestamp, Some(1729113558073));

        let result = sample("http_requests_total 1027").unwrap();
        assert_eq!(result.timestamp, None);

        assert!(matches!(
            sample("http_requests_total 1027 1729113558073 extra"),
            Err(ParseError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_parse_invalid_value() {
        let result = sample("http_requests_total foobar");
        assert!(matches!(result, Err(ParseError::InvalidValue(_))));
        assert!(matches!(
            sample("http_requests_total"),
            Err(ParseError::MissingValue)
        ));
    }

    #[test]
    fn test_parse_empty_metric_name() {
        // Test empty name with labels
        let result = sample(" {}0 ");
        assert!(matches!(result, Err(ParseError::MissingName)));

        // Test completely empty name
        let result = sample(" 123");
        assert!(matches!(result, Err(ParseError::MissingName)));
    }

    #[test]
    fn test_parse_invalid_labels() {
        // Test empty label key
        let result = sample("metric{=\"value\"} 123");
        assert!(matches!(result, Err(ParseError::InvalidLabel(_))));

        // Test label without equals
        let result = sample("metric{key} 123");
        assert!(matches!(result, Err(ParseError::InvalidLabel(_))));

        // Duplicate label names
        let result = sample("metric{key=\"a\",key=\"b\"} 123");
        assert!(matches!(result, Err(ParseError::InvalidLabel(_))));

        // Unclosed block
        let result = sample("metric{key=\"a\"");
        assert!(matches!(result, Err(ParseError::InvalidFormat(_))));

        // Empty label value is allowed, as is a trailing comma
        assert!(sample("metric{key=\"\"} 123").is_ok());
        assert!(sample("metric{key=\"a\",} 123").is_ok());
    }

    #[test]
    fn test_label_name_validation() {
        // Only __name__ is reserved
        let result = sample("metric{__name__=\"value\"} 123");
        assert!(matches!(result, Err(ParseError::InvalidLabel(_))));
        let result = sample("metric{__meta=\"value\"} 123").unwrap();
        assert_eq!(result.labels["__meta"], "value");

        // Test valid label names
        assert!(sample("metric{valid_label=\"value\"} 123").is_ok());

        // Test UTF-8 label names (allowed but not recommended)
        assert!(sample("metric{français=\"value\"} 123").is_ok());
    }

    #[test]
    fn test_blank_before_labels() {
        let result = sample("metric {key=\"a\"} 123").unwrap();
        assert_eq!(result.name, "metric");
        assert_eq!(result.labels["key"], "a");
        assert_eq!(result.value, 123.0);

        let result = sample("metric \t {} 1").unwrap();
        assert!(result.labels.is_empty());
    }

    #[test]
    fn test_lenient_lines_do_not_fail_the_parse() {
        let text = "# TYPE foo\n# HELP\nfoo 1\nbar {__meta=\"x\"} 2\n";
        let families = parse(text).unwrap();
        assert_eq!(families.len(), 2);
        assert_eq!(families["foo"].metric_type, MetricType::Untyped);
        assert_eq!(families["foo"].metrics[0].value, Value::Untyped(1.0));
        assert_eq!(families["bar"].metrics[0].labels["__meta"], "x");
    }

    #[test]
    fn test_counts_saturate() {
        let text = "# TYPE foo summary\n\
                    foo_count{s=\"neg\"} -1\n\
                    foo_count{s=\"nan\"} NaN\n\
                    foo_count{s=\"inf\"} +Inf\n\
                    foo_count{s=\"frac\"} 2.9\n";
        let families = parse(text).unwrap();
        let counts: Vec<u64> = families["foo"]
            .metrics
            .iter()
            .map(|m| match &m.value {
                Value::Summary(summary) => summary.count,
                v => panic!("unexpected value {v:?}"),
            })
            .collect();
        assert_eq!(counts, vec![0, 0, u64::MAX, 2]);
    }

    #[test]
    fn test_label_value_escaping() {
        let result = sample(r#"metric{key="value with \"quotes\""} 123"#).unwrap();
        assert_eq!(result.labels["key"], "value with \"quotes\"");

        let result = sample(r#"metric{key="path\\to\\file"} 123"#).unwrap();
        assert_eq!(result.labels["key"], "path\\to\\file");

        let result = sample(r#"metric{key="line1\nline2"} 123"#).unwrap();
        assert_eq!(result.labels["key"], "line1\nline2");

        // Separators and braces inside a quoted value are data
        let result = sample(r#"metric{key="a,b}c",other="d"} 123"#).unwrap();
        assert_eq!(result.labels["key"], "a,b}c");
        assert_eq!(result.labels["other"], "d");

        let result = sample("metric{key=unquoted} 123");
        assert!(matches!(result, Err(ParseError::InvalidLabel(_))));

        let result = sample(r#"metric{key="invalid\x"} 123"#);
        assert!(matches!(result, Err(ParseError::InvalidLabel(_))));

        // Single quote character (edge case from fuzzer)
        let result = sample(r#"metric{key="} 123"#);
        assert!(matches!(result, Err(ParseError::InvalidLabel(_))));
    }

    #[test]
    fn test_special_float_values() {
        assert!(sample("metric NaN").unwrap().value.is_nan());
        assert_eq!(sample("metric +Inf").unwrap().value, f64::INFINITY);
        assert_eq!(sample("metric -Inf").unwrap().value, f64::NEG_INFINITY);
        assert_eq!(sample("metric 1.23e45").unwrap().value, 1.23e45);
        assert_eq!(sample("metric -42.5").unwrap().value, -42.5);
    }

    #[test]
    fn test_parse_full_text() {
        let text = r#"
# HELP http_requests_total The total number of HTTP requests.
# TYPE http_requests_total counter
http_requests_total{method="post",code="200"} 1027 1395066363000
http_requests_total{method="post",code="400"}    3 1395066363000

# TYPE memory_usage gauge
memory_usage 5264384
"#;

        let families = parse(text).unwrap();
        assert_eq!(families.len(), 2);

        let requests = &families["http_requests_total"];
        assert_eq!(requests.help, "The total number of HTTP requests.");
        assert_eq!(requests.metric_type, MetricType::Counter);
        assert_eq!(requests.metrics.len(), 2);
        assert_eq!(requests.metrics[0].value, Value::Counter(1027.0));
        assert_eq!(requests.metrics[0].timestamp, Some(1395066363000));
        assert_eq!(requests.metrics[1].value, Value::Counter(3.0));
        assert_eq!(requests.metrics[1].labels["code"], "400");

        let memory = &families["memory_usage"];
        assert_eq!(memory.metric_type, MetricType::Gauge);
        assert_eq!(memory.metrics[0].value, Value::Gauge(5264384.0));
    }

    #[test]
    fn test_untyped_and_empty_families() {
        let text = "# TYPE declared_only gauge\n# HELP helped_only nothing here\nloose 4\n";
        let families = parse(text).unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families["loose"].metric_type, MetricType::Untyped);
        assert_eq!(families["loose"].metrics[0].value, Value::Untyped(4.0));
    }

    #[test]
    fn test_summary_assembly() {
        let text = r#"
# TYPE rpc_duration_seconds summary
rpc_duration_seconds{service="a",quantile="0.5"} 4773
rpc_duration_seconds{service="a",quantile="0.9"} 9001
rpc_duration_seconds{service="b",quantile="0.5"} 12
rpc_duration_seconds_sum{service="a"} 1.7560473e+07
rpc_duration_seconds_count{service="a"} 2693
rpc_duration_seconds_sum{service="b"} 40
rpc_duration_seconds_count{service="b"} 3
"#;
        let families = parse(text).unwrap();
        assert_eq!(families.len(), 1);
        let family = &families["rpc_duration_seconds"];
        assert_eq!(family.metric_type, MetricType::Summary);
        assert_eq!(family.metrics.len(), 2);

        let a = &family.metrics[0];
        assert_eq!(a.labels.len(), 1);
        assert_eq!(a.labels["service"], "a");
        assert_eq!(
            a.value,
            Value::Summary(Summary {
                count: 2693,
                sum: 1.7560473e+07,
                quantiles: vec![
                    Quantile {
                        quantile: 0.5,
                        value: 4773.0
                    },
                    Quantile {
                        quantile: 0.9,
                        value: 9001.0
                    },
                ],
            })
        );

        let b = &family.metrics[1];
        assert_eq!(b.labels["service"], "b");
        assert!(matches!(&b.value, Value::Summary(s) if s.count == 3 && s.sum == 40.0));
    }

    #[test]
    fn test_histogram_assembly() {
        let text = r#"
# HELP http_request_duration_seconds A histogram of the request duration.
# TYPE http_request_duration_seconds histogram
http_request_duration_seconds_bucket{le="0.05"} 24054
http_request_duration_seconds_bucket{le="0.1"} 33444
http_request_duration_seconds_bucket{le="+Inf"} 144320
http_request_duration_seconds_sum 53423
http_request_duration_seconds_count 144320
"#;
        let families = parse(text).unwrap();
        let family = &families["http_request_duration_seconds"];
        assert_eq!(family.metric_type, MetricType::Histogram);
        assert_eq!(family.metrics.len(), 1);
        let Value::Histogram(histogram) = &family.metrics[0].value else {
            panic!("unexpected metric value");
        };
        assert_eq!(histogram.count, 144320);
        assert_eq!(histogram.sum, 53423.0);
        assert_eq!(histogram.buckets.len(), 3);
        assert_eq!(histogram.buckets[2].upper_bound, f64::INFINITY);
        assert_eq!(histogram.buckets[2].cumulative_count, 144320);
    }

    #[test]
    fn test_suffix_without_compound_family_is_its_own_family() {
        let text = "# TYPE foo counter\nfoo 1\nfoo_count 2\nfoo_bucket 3\n";
        let families = parse(text).unwrap();
        assert_eq!(families.len(), 3);
        assert_eq!(families["foo_count"].metric_type, MetricType::Untyped);
    }

    #[test]
    fn test_grammar_errors_fail_whole_parse() {
        let cases: [(&str, usize, ParseError); 8] = [
            (
                "# TYPE foo gauge\n# TYPE foo counter\n",
                2,
                ParseError::DuplicateType("foo".to_string()),
            ),
            (
                "# HELP foo a\n# HELP foo b\n",
                2,
                ParseError::DuplicateHelp("foo".to_string()),
            ),
            (
                "foo 1\n# TYPE foo gauge\n",
                2,
                ParseError::TypeAfterSamples("foo".to_string()),
            ),
            (
                "# TYPE foo summary\nfoo{a=\"b\"} 1\n",
                2,
                ParseError::MissingQuantile("foo".to_string()),
            ),
            (
                "# TYPE foo histogram\nfoo_bucket 1\n",
                2,
                ParseError::MissingBucketBound("foo_bucket".to_string()),
            ),
            (
                "# TYPE foo histogram\nfoo 1\n",
                2,
                ParseError::UnexpectedSample("foo".to_string()),
            ),
            (
                "# TYPE foo summary\nfoo{quantile=\"high\"} 1\n",
                2,
                ParseError::InvalidLabel("Invalid quantile: high".to_string()),
            ),
            (
                "# TYPE foo histogram\nfoo_bucket{le=\"x1\"} 1\n",
                2,
                ParseError::InvalidLabel("Invalid bucket bound: x1".to_string()),
            ),
        ];

        for (text, line, kind) in cases {
            assert_eq!(parse(text), Err(Error { line, kind }), "input: {text:?}");
        }

        let err = parse("good 1\nbad{ 1\n").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_parse_label_with_spaces() {
        let result = sample(
            r#"vector_build_info{arch="aarch64",debug="false",host="d0cf527728fe",revision="745babd 2024-09-11 14:55:36.802851761",rust_version="1.78",version="0.41.1"} 1 1729113558073"#
        ).unwrap();

        assert_eq!(result.name, "vector_build_info");
        assert_eq!(result.value, 1.0);
        assert_eq!(result.labels.len(), 6);
        assert_eq!(
            result.labels["revision"],
            "745babd 2024-09-11 14:55:36.802851761"
        );
    }

    // Property-based tests
    proptest! {
        #[test]
        fn prop_no_panic_on_any_input(input: String) {
            // Should not panic on any input
            let _ = parse(&input);
        }

        #[test]
        fn prop_empty_names_always_rejected(
            prefix in "[ \t]*",
            suffix in "[ \t]*",
            labels in "\\{[^}]*\\}",
            value in "[0-9]+",
        ) {
            // Empty metric name with labels
            let line = format!("{prefix}{labels}{suffix} {value}");
            let result = sample(&line);
            prop_assert!(matches!(result, Err(ParseError::MissingName)));
        }

        #[test]
        fn prop_valid_metric_names_accepted(
            name in "[a-zA-Z_:][a-zA-Z0-9_:]*",
            value in prop::num::f64::NORMAL | prop::num::f64::POSITIVE | prop::num::f64::NEGATIVE,
        ) {
            let line = format!("{name} {value}");
            let parsed = sample(&line);
            prop_assert!(parsed.is_ok());
            let parsed = parsed.unwrap();
            prop_assert_eq!(parsed.name, name);
            prop_assert_eq!(parsed.value, value);
        }

        #[test]
        fn prop_only_name_label_is_reserved(
            name in "[a-zA-Z_][a-zA-Z0-9_]*",
            label_suffix in "[a-zA-Z0-9_]*",
            value in "[0-9]+",
        ) {
            let label = format!("__{label_suffix}");
            let line = format!("{name}{{{label}=\"value\"}} {value}");
            let result = sample(&line);
            if label == RESERVED_NAME_LABEL {
                prop_assert!(matches!(result, Err(ParseError::InvalidLabel(_))));
            } else {
                prop_assert!(result.is_ok());
            }
        }

        #[test]
        fn prop_label_escaping_roundtrip(
            name in "[a-zA-Z_][a-zA-Z0-9_]*",
            label_name in "[a-zA-Z_][a-zA-Z0-9_]*",
            raw_value in ".*",
            metric_value in "[0-9]+",
        ) {
            prop_assume!(label_name != RESERVED_NAME_LABEL);

            let escaped = raw_value
                .replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace('\n', "\\n");

            let line = format!("{name}{{{label_name}=\"{escaped}\"}} {metric_value}");
            let parsed = sample(&line);
            prop_assert!(parsed.is_ok());
            let parsed = parsed.unwrap();
            prop_assert_eq!(parsed.labels.get(&label_name), Some(&raw_value));
        }

        #[test]
        fn prop_timestamp_parsing(
            name in "[a-zA-Z_][a-zA-Z0-9_]*",
            value in prop::num::f64::NORMAL,
            timestamp in prop::num::i64::ANY,
        ) {
            let line = format!("{name} {value} {timestamp}");
            let parsed = sample(&line);
            prop_assert!(parsed.is_ok());
            prop_assert_eq!(parsed.unwrap().timestamp, Some(timestamp));
        }
    }
}
