//! Render metric families back into the text exposition format
//!
//! The output parses back, via [`crate::parser::parse`], into the same
//! families: same names, types, label sets and values.

use std::fmt::Write as _;

use crate::{
    model::{Labels, MetricFamily, MetricFamilyMap, Value, format_value},
    parser::{BUCKET_LABEL, QUANTILE_LABEL},
};

/// Render every family, in map order.
#[must_use]
pub fn render(families: &MetricFamilyMap) -> String {
    let mut out = String::new();
    for family in families.values() {
        render_family(&mut out, family);
    }
    out
}

/// Append one family, its `# HELP` and `# TYPE` lines included.
pub fn render_family(out: &mut String, family: &MetricFamily) {
    let name = &family.name;
    if !family.help.is_empty() {
        let _ = writeln!(out, "# HELP {name} {}", escape_help(&family.help));
    }
    let _ = writeln!(out, "# TYPE {name} {}", family.metric_type);

    for metric in &family.metrics {
        let labels = &metric.labels;
        let ts = metric.timestamp;
        match &metric.value {
            Value::Counter(v) | Value::Gauge(v) | Value::Untyped(v) => {
                sample_line(out, name, labels, None, *v, ts);
            }
            Value::Summary(summary) => {
                for q in &summary.quantiles {
                    let extra = (QUANTILE_LABEL, format_value(q.quantile));
                    sample_line(out, name, labels, Some(extra), q.value, ts);
                }
                sample_line(out, &format!("{name}_sum"), labels, None, summary.sum, ts);
                let count = summary.count as f64;
                sample_line(out, &format!("{name}_count"), labels, None, count, ts);
            }
            Value::Histogram(histogram) => {
                let bucket_name = format!("{name}_bucket");
                for b in &histogram.buckets {
                    let extra = (BUCKET_LABEL, format_value(b.upper_bound));
                    let count = b.cumulative_count as f64;
                    sample_line(out, &bucket_name, labels, Some(extra), count, ts);
                }
                sample_line(out, &format!("{name}_sum"), labels, None, histogram.sum, ts);
                let count = histogram.count as f64;
                sample_line(out, &format!("{name}_count"), labels, None, count, ts);
            }
        }
    }
}

fn sample_line(
    out: &mut String,
    name: &str,
    labels: &Labels,
    extra: Option<(&str, String)>,
    value: f64,
    timestamp: Option<i64>,
) {
    out.push_str(name);

    let mut pairs: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label_value(v)))
        .collect();
    if let Some((k, v)) = extra {
        pairs.push(format!("{k}=\"{}\"", escape_label_value(&v)));
    }
    if !pairs.is_empty() {
        let _ = write!(out, "{{{}}}", pairs.join(","));
    }

    let _ = write!(out, " {}", format_value(value));
    if let Some(ts) = timestamp {
        let _ = write!(out, " {ts}");
    }
    out.push('\n');
}

/// Escape a label value: backslash, double quote and newline.
#[must_use]
pub fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}
