//! One scrape cycle, end to end
//!
//! [`run_cycle`] fetches a source and hands the text to [`build`], which
//! parses it, applies the transforms and reconciles the result against the
//! descriptor cache. A failing stage ends the cycle: later stages do not run,
//! no partial map is returned and the cache is left untouched.

use std::path::PathBuf;

use tracing::debug;

use crate::{
    config::SourceConfig,
    descriptor::{DescriptorCache, Reconcile, Report},
    fetch::{self, Fetcher},
    model::{MetricFamily, MetricFamilyMap},
    parser,
    transform::Transforms,
};

#[derive(Debug, thiserror::Error)]
/// Errors produced by a scrape cycle
pub enum Error {
    /// The scrape failed
    #[error("Fetch stage failed: {0}")]
    Fetch(#[from] fetch::Error),
    /// The scraped text is not valid exposition format
    #[error("Parse stage failed: {0}")]
    Parse(#[from] parser::Error),
}

impl Error {
    /// Name of the stage that failed.
    #[must_use]
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::Parse(_) => "parse",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// The result of one successful cycle
pub struct Outcome {
    /// Transformed families, ready for export
    pub families: MetricFamilyMap,
    /// What descriptor reconciliation concluded
    pub report: Report,
}

impl Outcome {
    /// Families the report allows to be exported.
    pub fn exportable(&self) -> impl Iterator<Item = (&str, &MetricFamily)> {
        self.families
            .iter()
            .filter(|(name, _)| self.report.is_exportable(name))
            .map(|(name, family)| (name.as_str(), family))
    }
}

/// Parse `text`, transform it and reconcile it against `cache`.
///
/// The reconcile mode follows `source.metrics_prefix`, see
/// [`Reconcile::for_prefix`].
///
/// # Errors
///
/// Function will error if `text` does not parse. The cache is not touched in
/// that case.
pub fn build(
    text: &str,
    source: &SourceConfig,
    transforms: Transforms,
    cache: &DescriptorCache,
) -> Result<Outcome, Error> {
    let families = parser::parse(text)?;
    debug!(
        "parsed {count} metric families for {component}",
        count = families.len(),
        component = source.component
    );
    let families = transforms.apply(families);
    let reconcile = Reconcile::for_prefix(&source.metrics_prefix);
    let report = cache.reconcile(reconcile, &families, &source.whitelisted);
    Ok(Outcome { families, report })
}

/// Scrape `source` with `fetcher`, then [`build`] the result.
///
/// # Errors
///
/// Function will error if the fetch or the parse stage fails.
pub async fn run_cycle(
    fetcher: &Fetcher,
    source: &SourceConfig,
    transforms: Transforms,
    cache: &DescriptorCache,
) -> Result<Outcome, Error> {
    let scrape = fetcher.fetch(source).await?;
    build(scrape.text(), source, transforms, cache)
}

/// Like [`run_cycle`], with a client built for this cycle only.
///
/// A certificate file that cannot be loaded fails this cycle alone and marks
/// the source unavailable, see [`fetch::fetch`].
///
/// # Errors
///
/// Function will error if the certificates cannot be loaded or the fetch or
/// parse stage fails.
pub async fn run_cycle_with_certs(
    source: &SourceConfig,
    trusted_cert_files: &[PathBuf],
    transforms: Transforms,
    cache: &DescriptorCache,
) -> Result<Outcome, Error> {
    let scrape = fetch::fetch(source, trusted_cert_files).await?;
    build(scrape.text(), source, transforms, cache)
}
