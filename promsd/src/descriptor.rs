//! Metric descriptor reconciliation
//!
//! A descriptor is the backend's record of a metric: its name, type and label
//! schema. The [`DescriptorCache`] remembers every descriptor this process
//! knows of and, once per scrape cycle, reconciles the transformed metric
//! families against them in one of two modes:
//!
//! * [`Reconcile::Update`], for metrics in the custom namespace this process
//!   owns. Missing or stale descriptors are created or refreshed in the cache
//!   and reported so the exporter can push them.
//! * [`Reconcile::Validate`], for built-in metrics owned by someone else. The
//!   cache is only read; unknown and conflicting families are reported.
//!
//! Findings are advisory. Nothing here fails a scrape cycle.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{PoisonError, RwLock},
};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

use crate::model::{MetricFamily, MetricFamilyMap, MetricType};

/// Metrics prefix of the namespace this process owns descriptors in.
pub const CUSTOM_METRICS_PREFIX: &str = "custom.googleapis.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How a cycle reconciles its families against the cache
pub enum Reconcile {
    /// Create and refresh descriptors
    Update,
    /// Check families against descriptors, read-only
    Validate,
}

impl Reconcile {
    /// Pick the mode for a source exporting under `metrics_prefix`.
    #[must_use]
    pub fn for_prefix(metrics_prefix: &str) -> Self {
        if metrics_prefix.starts_with(CUSTOM_METRICS_PREFIX) {
            Self::Update
        } else {
            Self::Validate
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Who owns a descriptor
pub enum Namespace {
    /// Created by this process in the custom namespace
    Custom,
    /// Registered externally, only ever validated against
    BuiltIn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The parts of a family a descriptor pins down
pub struct Shape {
    /// Metric type
    pub metric_type: MetricType,
    /// Every label name used by any sample
    pub labels: BTreeSet<String>,
}

impl Shape {
    /// The shape observed in `family`.
    #[must_use]
    pub fn of(family: &MetricFamily) -> Self {
        Self {
            metric_type: family.metric_type,
            labels: family
                .metrics
                .iter()
                .flat_map(|m| m.labels.keys().cloned())
                .collect(),
        }
    }

    /// Whether a family of shape `observed` can be written under this one.
    #[must_use]
    pub fn admits(&self, observed: &Shape) -> bool {
        self.metric_type == observed.metric_type && observed.labels.is_subset(&self.labels)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The cache's record of one descriptor
pub struct DescriptorEntry {
    /// Metric name
    pub name: String,
    /// Type and label schema
    pub shape: Shape,
    /// Help text the descriptor was created with
    pub description: String,
    /// Ownership of the descriptor
    pub namespace: Namespace,
    /// Whether the name was explicitly whitelisted when last reconciled
    pub whitelisted: bool,
}

impl DescriptorEntry {
    /// A built-in descriptor, as registered outside this process.
    #[must_use]
    pub fn built_in(name: impl Into<String>, shape: Shape) -> Self {
        Self {
            name: name.into(),
            shape,
            description: String::new(),
            namespace: Namespace::BuiltIn,
            whitelisted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What reconciliation concluded about one family
pub enum Finding {
    /// No descriptor existed; one was created and must be pushed
    Created,
    /// The descriptor changed and must be pushed again
    Refreshed {
        /// Shape before the refresh
        previous: Shape,
    },
    /// No descriptor exists, the family cannot be exported
    Unknown,
    /// The family does not fit the existing descriptor
    Conflict {
        /// Shape of the existing descriptor
        expected: Shape,
        /// Shape of the scraped family
        observed: Shape,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Per-family findings of one reconciliation pass
pub struct Report {
    /// Mode the pass ran in
    pub reconcile: Reconcile,
    /// Findings by family name. Families with nothing to report are absent.
    pub findings: BTreeMap<String, Finding>,
    /// Families passed over because they are not whitelisted
    pub skipped: BTreeSet<String>,
}

impl Report {
    fn new(reconcile: Reconcile) -> Self {
        Self {
            reconcile,
            findings: BTreeMap::new(),
            skipped: BTreeSet::new(),
        }
    }

    /// Families whose descriptor has to be created or pushed again.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.findings
            .iter()
            .filter(|(_, f)| matches!(f, Finding::Created | Finding::Refreshed { .. }))
            .map(|(name, _)| name.as_str())
    }

    /// Whether the family `name` may be exported.
    #[must_use]
    pub fn is_exportable(&self, name: &str) -> bool {
        !self.skipped.contains(name)
            && !matches!(
                self.findings.get(name),
                Some(Finding::Unknown | Finding::Conflict { .. })
            )
    }
}

fn is_whitelisted(name: &str, whitelist: &FxHashSet<String>) -> bool {
    whitelist.is_empty() || whitelist.contains(name)
}

#[derive(Debug, Default)]
/// Process-wide record of known metric descriptors
///
/// Shared by reference, usually through an `Arc`, across concurrent scrape
/// cycles. An update pass holds the write lock for its whole duration and a
/// validate pass the read lock, so entries are never observed half-written
/// and concurrent updates are never lost.
pub struct DescriptorCache {
    descriptors: RwLock<FxHashMap<String, DescriptorEntry>>,
}

impl DescriptorCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the pass selected by `reconcile`.
    pub fn reconcile(
        &self,
        reconcile: Reconcile,
        families: &MetricFamilyMap,
        whitelist: &FxHashSet<String>,
    ) -> Report {
        match reconcile {
            Reconcile::Update => self.update_metric_descriptors(families, whitelist),
            Reconcile::Validate => self.validate_metric_descriptors(families, whitelist),
        }
    }

    /// Create or refresh the descriptor of every whitelisted family.
    ///
    /// A changed type replaces the descriptor's shape. New label names are
    /// merged into its schema; label names no longer observed are kept.
    /// The schema is the union of every label set seen, so a family that drops
    /// a label is not a change and triggers no refresh.
    pub fn update_metric_descriptors(
        &self,
        families: &MetricFamilyMap,
        whitelist: &FxHashSet<String>,
    ) -> Report {
        let mut report = Report::new(Reconcile::Update);
        let mut descriptors = self
            .descriptors
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for (name, family) in families {
            if !is_whitelisted(name, whitelist) {
                report.skipped.insert(name.clone());
                continue;
            }
            let observed = Shape::of(family);
            let whitelisted = whitelist.contains(name);

            let Some(entry) = descriptors.get_mut(name) else {
                info!("creating metric descriptor for {name}");
                descriptors.insert(
                    name.clone(),
                    DescriptorEntry {
                        name: name.clone(),
                        shape: observed,
                        description: family.help.clone(),
                        namespace: Namespace::Custom,
                        whitelisted,
                    },
                );
                report.findings.insert(name.clone(), Finding::Created);
                continue;
            };
            entry.whitelisted = whitelisted;

            let refreshed = if entry.shape.metric_type == observed.metric_type {
                let mut labels = entry.shape.labels.clone();
                labels.extend(observed.labels);
                Shape {
                    metric_type: observed.metric_type,
                    labels,
                }
            } else {
                observed
            };

            if refreshed == entry.shape && family.help == entry.description {
                debug!("metric descriptor for {name} is up to date");
                continue;
            }

            info!("refreshing metric descriptor for {name}");
            let previous = std::mem::replace(&mut entry.shape, refreshed);
            entry.description.clone_from(&family.help);
            report
                .findings
                .insert(name.clone(), Finding::Refreshed { previous });
        }

        report
    }

    /// Check every whitelisted family against its descriptor without
    /// modifying the cache.
    pub fn validate_metric_descriptors(
        &self,
        families: &MetricFamilyMap,
        whitelist: &FxHashSet<String>,
    ) -> Report {
        let mut report = Report::new(Reconcile::Validate);
        let descriptors = self
            .descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        for (name, family) in families {
            if !is_whitelisted(name, whitelist) {
                report.skipped.insert(name.clone());
                continue;
            }
            let observed = Shape::of(family);

            match descriptors.get(name) {
                None => {
                    warn!("no metric descriptor for {name}, it will not be exported");
                    report.findings.insert(name.clone(), Finding::Unknown);
                }
                Some(entry) if !entry.shape.admits(&observed) => {
                    warn!(
                        "metric {name} conflicts with its descriptor: expected {expected:?}, observed {observed:?}",
                        expected = entry.shape
                    );
                    report.findings.insert(
                        name.clone(),
                        Finding::Conflict {
                            expected: entry.shape.clone(),
                            observed,
                        },
                    );
                }
                Some(_) => debug!("metric {name} matches its descriptor"),
            }
        }

        report
    }

    /// Record a descriptor known to exist, replacing any previous record.
    pub fn register(&self, entry: DescriptorEntry) {
        self.descriptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.name.clone(), entry);
    }

    /// Replace every record at once, e.g. from a fresh backend listing.
    pub fn refresh(&self, entries: impl IntoIterator<Item = DescriptorEntry>) {
        let fresh: FxHashMap<String, DescriptorEntry> = entries
            .into_iter()
            .map(|entry| (entry.name.clone(), entry))
            .collect();
        *self
            .descriptors
            .write()
            .unwrap_or_else(PoisonError::into_inner) = fresh;
    }

    /// A copy of the record for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<DescriptorEntry> {
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Number of known descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no descriptor is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
