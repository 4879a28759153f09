//! The metric model shared by every pipeline stage
//!
//! Parsing produces a [`MetricFamilyMap`], every transform consumes one and
//! returns one, and the descriptor cache reads one. The map is ordered by
//! family name so that iteration, and therefore every stage, is
//! deterministic.

use std::{collections::BTreeMap, fmt, str::FromStr};

/// Label name to label value. Names are unique and iterate sorted.
pub type Labels = BTreeMap<String, String>;

/// Family name to family, the unit passed between pipeline stages.
pub type MetricFamilyMap = BTreeMap<String, MetricFamily>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Prometheus metric types
pub enum MetricType {
    /// A gauge is a metric that represents a single numerical value that can arbitrarily go up and down
    Gauge,
    /// A counter is a cumulative metric that represents a single monotonically increasing counter
    Counter,
    /// A histogram samples observations and counts them in configurable buckets
    Histogram,
    /// A summary samples observations
    Summary,
    /// An untyped metric for compatibility with systems that don't have typed metrics
    Untyped,
}

impl MetricType {
    /// The keyword used for this type in a `# TYPE` line.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
            Self::Histogram => "histogram",
            Self::Summary => "summary",
            Self::Untyped => "untyped",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown metric type: {0}")]
/// A `# TYPE` keyword that names no known metric type
pub struct UnknownMetricType(pub String);

impl FromStr for MetricType {
    type Err = UnknownMetricType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(Self::Counter),
            "gauge" => Ok(Self::Gauge),
            "histogram" => Ok(Self::Histogram),
            "summary" => Ok(Self::Summary),
            "untyped" => Ok(Self::Untyped),
            _ => Err(UnknownMetricType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// One quantile of a summary
pub struct Quantile {
    /// The quantile rank, in `[0, 1]`
    pub quantile: f64,
    /// The observed value at that rank
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// One bucket of a histogram
pub struct Bucket {
    /// Inclusive upper bound, the `le` label
    pub upper_bound: f64,
    /// Observations at or below `upper_bound`
    pub cumulative_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
/// The value of a summary sample
pub struct Summary {
    /// Total number of observations
    pub count: u64,
    /// Sum of all observations
    pub sum: f64,
    /// Quantiles in exposition order
    pub quantiles: Vec<Quantile>,
}

#[derive(Debug, Clone, Default, PartialEq)]
/// The value of a histogram sample
pub struct Histogram {
    /// Total number of observations
    pub count: u64,
    /// Sum of all observations
    pub sum: f64,
    /// Buckets in exposition order
    pub buckets: Vec<Bucket>,
}

#[derive(Debug, Clone, PartialEq)]
/// The value carried by a [`Metric`], shaped by its family's type
pub enum Value {
    /// Value of a counter sample
    Counter(f64),
    /// Value of a gauge sample
    Gauge(f64),
    /// Value of an untyped sample
    Untyped(f64),
    /// Value of a summary sample
    Summary(Summary),
    /// Value of a histogram sample
    Histogram(Histogram),
}

impl Value {
    /// The metric type this value belongs to.
    #[must_use]
    pub fn metric_type(&self) -> MetricType {
        match self {
            Self::Counter(_) => MetricType::Counter,
            Self::Gauge(_) => MetricType::Gauge,
            Self::Untyped(_) => MetricType::Untyped,
            Self::Summary(_) => MetricType::Summary,
            Self::Histogram(_) => MetricType::Histogram,
        }
    }

    /// Build the single-value variant for `metric_type`.
    ///
    /// Returns `None` for summaries and histograms, which carry more than one
    /// number.
    #[must_use]
    pub fn scalar(metric_type: MetricType, value: f64) -> Option<Self> {
        match metric_type {
            MetricType::Counter => Some(Self::Counter(value)),
            MetricType::Gauge => Some(Self::Gauge(value)),
            MetricType::Untyped => Some(Self::Untyped(value)),
            MetricType::Summary | MetricType::Histogram => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A single sample of a [`MetricFamily`]
pub struct Metric {
    /// The sample's labels
    pub labels: Labels,
    /// The sample's value
    pub value: Value,
    /// Optional timestamp in milliseconds since Unix epoch
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
/// All samples sharing one name, help text and type
pub struct MetricFamily {
    /// The family name
    pub name: String,
    /// Help text, empty if the exposition had no `# HELP` line
    pub help: String,
    /// The family type. Every metric's [`Value`] has this type.
    pub metric_type: MetricType,
    /// Samples in exposition order
    pub metrics: Vec<Metric>,
}

impl MetricFamily {
    /// Create an empty family.
    #[must_use]
    pub fn new(name: impl Into<String>, metric_type: MetricType) -> Self {
        Self {
            name: name.into(),
            help: String::new(),
            metric_type,
            metrics: Vec::new(),
        }
    }

    /// Builder-style setter for the help text.
    #[must_use]
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    /// Builder-style append of one sample.
    #[must_use]
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }
}

/// Format a sample value the way the text exposition format spells it.
///
/// Finite values use the shortest representation that parses back to the
/// same `f64`.
#[must_use]
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        format!("{value}")
    }
}

/// Parse a sample value, accepting the format's special spellings.
///
/// # Errors
///
/// Returns the offending input if it is not a number.
pub fn parse_value(value: &str) -> Result<f64, String> {
    match value {
        "NaN" => Ok(f64::NAN),
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        _ => value.parse::<f64>().map_err(|_| value.to_string()),
    }
}
