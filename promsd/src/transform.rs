//! Normalizing rewrites over parsed metric families
//!
//! Every transform consumes a [`MetricFamilyMap`] and returns a new one. None
//! of them can fail: the input already made it through the parser. They are
//! applied by [`Transforms::apply`] in a fixed order, omit then downcase then
//! flatten, so that the `_count`/`_sum` suffixes of flattened summaries land
//! on already-normalized names.

use serde::Deserialize;
use tracing::debug;

use crate::{
    model::{Metric, MetricFamily, MetricFamilyMap, MetricType, Value, format_value},
    parser::QUANTILE_LABEL,
};

/// Label key identifying the scraped component, dropped by
/// [`omit_component_name`].
pub const COMPONENT_LABEL: &str = "component";

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
/// Which optional transforms run. Summary flattening always runs.
pub struct Transforms {
    /// Strip [`COMPONENT_LABEL`] from every sample
    #[serde(default)]
    pub omit_component_name: bool,
    /// Lower-case every family name
    #[serde(default)]
    pub downcase_metric_names: bool,
}

impl Transforms {
    /// Run the enabled transforms in order.
    #[must_use]
    pub fn apply(self, families: MetricFamilyMap) -> MetricFamilyMap {
        let mut families = families;
        if self.omit_component_name {
            families = omit_component_name(families, COMPONENT_LABEL);
        }
        if self.downcase_metric_names {
            families = downcase_metric_names(families);
        }
        flatten_summary_metric_families(families)
    }
}

/// Remove `label` from every sample. Family names are untouched.
#[must_use]
pub fn omit_component_name(families: MetricFamilyMap, label: &str) -> MetricFamilyMap {
    families
        .into_iter()
        .map(|(name, mut family)| {
            for metric in &mut family.metrics {
                metric.labels.remove(label);
            }
            (name, family)
        })
        .collect()
}

/// Lower-case every family name.
///
/// When two names lower-case to the same string the family later in map
/// order replaces the earlier one. Map order is by name, so the result is
/// deterministic, e.g. `foo` replaces `FOO`.
#[must_use]
pub fn downcase_metric_names(families: MetricFamilyMap) -> MetricFamilyMap {
    let mut result = MetricFamilyMap::new();
    for (name, mut family) in families {
        let lowered = name.to_lowercase();
        family.name.clone_from(&lowered);
        if let Some(replaced) = result.insert(lowered, family) {
            debug!(
                "metric family {} replaced by {name} after downcasing",
                replaced.name
            );
        }
    }
    result
}

/// Split every summary family into primitive families.
///
/// A summary `x` becomes a counter `x_count`, a gauge `x_sum` and, if it has
/// any quantiles, an untyped `x` with one sample per quantile labelled
/// `quantile`. Derived families replace pass-through families of the same
/// name. Other types pass through unchanged.
#[must_use]
pub fn flatten_summary_metric_families(families: MetricFamilyMap) -> MetricFamilyMap {
    let mut result = MetricFamilyMap::new();
    let mut derived = Vec::new();

    for (name, family) in families {
        if family.metric_type == MetricType::Summary {
            derived.extend(flatten_summary(family));
        } else {
            result.insert(name, family);
        }
    }

    for family in derived {
        if result.contains_key(&family.name) {
            debug!(
                "flattened summary family {} replaces an existing family",
                family.name
            );
        }
        result.insert(family.name.clone(), family);
    }
    result
}

fn flatten_summary(family: MetricFamily) -> Vec<MetricFamily> {
    let MetricFamily {
        name,
        help,
        metrics,
        ..
    } = family;

    let mut count = MetricFamily::new(format!("{name}_count"), MetricType::Counter)
        .with_help(help.clone());
    let mut sum =
        MetricFamily::new(format!("{name}_sum"), MetricType::Gauge).with_help(help.clone());
    let mut quantiles = MetricFamily::new(name, MetricType::Untyped).with_help(help);

    for metric in metrics {
        let Value::Summary(summary) = metric.value else {
            continue;
        };
        count.metrics.push(Metric {
            labels: metric.labels.clone(),
            value: Value::Counter(summary.count as f64),
            timestamp: metric.timestamp,
        });
        sum.metrics.push(Metric {
            labels: metric.labels.clone(),
            value: Value::Gauge(summary.sum),
            timestamp: metric.timestamp,
        });
        for q in summary.quantiles {
            let mut labels = metric.labels.clone();
            labels.insert(QUANTILE_LABEL.to_string(), format_value(q.quantile));
            quantiles.metrics.push(Metric {
                labels,
                value: Value::Untyped(q.value),
                timestamp: metric.timestamp,
            });
        }
    }

    let mut flattened = vec![count, sum];
    if !quantiles.metrics.is_empty() {
        flattened.push(quantiles);
    }
    flattened
}
