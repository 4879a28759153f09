//! Scrape one exposition endpoint
//!
//! A [`Fetcher`] holds an HTTP client trusting the system roots plus any
//! configured PEM files and performs exactly one GET per call, no retries.
//! Every call records the outcome in the [`AVAILABILITY_GAUGE`] for the
//! source's component, through whatever `metrics` recorder is installed.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use metrics::gauge;
use tracing::debug;

use crate::{config::SourceConfig, transform::COMPONENT_LABEL};

/// Gauge set to 1.0 after a successful scrape of a component and 0.0 after a
/// failed one.
pub const AVAILABILITY_GAUGE: &str = "component_metrics_available";

/// Longest response body, in bytes, kept in [`Error::HttpStatus`].
pub const MAX_ERROR_BODY_BYTES: usize = 512;

#[derive(Debug, thiserror::Error)]
/// Why a trusted certificate file was rejected
pub enum CertLoadReason {
    /// The file could not be read
    #[error("read failed: {0}")]
    Read(#[from] io::Error),
    /// The file holds no PEM certificate
    #[error("no PEM certificate found")]
    NoCertificates,
    /// A PEM block is not a valid certificate
    #[error("invalid certificate: {0}")]
    Invalid(#[source] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
/// Errors produced by [`Fetcher`]
pub enum Error {
    /// A trusted certificate file could not be loaded
    #[error("Failed to load trusted certificates from {path:?}: {reason}")]
    CertLoad {
        /// Certificate file path
        path: PathBuf,
        /// Underlying cause
        #[source]
        reason: CertLoadReason,
    },
    /// The HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] Box<reqwest::Error>),
    /// The request failed in transport, timeouts included
    #[error("Failed to scrape {uri}: {source}")]
    Network {
        /// Scraped URI
        uri: String,
        /// Underlying reqwest error
        #[source]
        source: Box<reqwest::Error>,
    },
    /// The endpoint answered with a status other than 200
    #[error("Scrape of {uri} returned status {status}: {body}")]
    HttpStatus {
        /// Scraped URI
        uri: String,
        /// Response status code
        status: u16,
        /// Response body, at most [`MAX_ERROR_BODY_BYTES`]
        body: String,
    },
    /// The response body could not be read
    #[error("Failed to read response body from {uri}: {source}")]
    Read {
        /// Scraped URI
        uri: String,
        /// Underlying reqwest error
        #[source]
        source: Box<reqwest::Error>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The raw exposition text of one successful scrape
pub struct ScrapeResult {
    body: String,
}

impl ScrapeResult {
    /// The exposition text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.body
    }

    /// Consume the result, returning the exposition text.
    #[must_use]
    pub fn into_text(self) -> String {
        self.body
    }
}

/// A reusable scraper
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    /// Create a new [`Fetcher`] trusting the system roots and every
    /// certificate in `trusted_cert_files`.
    ///
    /// # Errors
    ///
    /// Function will error if a certificate file cannot be loaded or the
    /// client cannot be built.
    pub fn new(trusted_cert_files: &[PathBuf]) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder();
        for path in trusted_cert_files {
            let certificates =
                load_certificates(path).map_err(|reason| Error::CertLoad {
                    path: path.clone(),
                    reason,
                })?;
            debug!(
                "trusting {count} certificates from {path:?}",
                count = certificates.len()
            );
            for certificate in certificates {
                builder = builder.add_root_certificate(certificate);
            }
        }
        let client = builder.build().map_err(|e| Error::Client(Box::new(e)))?;
        Ok(Self { client })
    }

    /// Scrape `source` once.
    ///
    /// # Errors
    ///
    /// Function will error if the endpoint cannot be reached in time, answers
    /// with a non-200 status or its body cannot be read.
    pub async fn fetch(&self, source: &SourceConfig) -> Result<ScrapeResult, Error> {
        let result = self.scrape(source).await;
        record_availability(&source.component, result.is_ok());
        result
    }

    async fn scrape(&self, source: &SourceConfig) -> Result<ScrapeResult, Error> {
        let uri = source.uri();
        let network = |e: reqwest::Error, uri: String| Error::Network {
            uri,
            source: Box::new(e),
        };

        let response = self
            .client
            .get(&uri)
            .timeout(source.timeout())
            .send()
            .await
            .map_err(|e| network(e, uri.clone()))?;
        let status = response.status();

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => return Err(network(e, uri)),
            Err(e) => {
                return Err(Error::Read {
                    uri,
                    source: Box::new(e),
                });
            }
        };

        if status != reqwest::StatusCode::OK {
            return Err(Error::HttpStatus {
                uri,
                status: status.as_u16(),
                body: truncate(body, MAX_ERROR_BODY_BYTES),
            });
        }

        debug!("scraped {len} bytes from {uri}", len = body.len());
        Ok(ScrapeResult { body })
    }
}

/// Scrape `source` once with a client built for this call.
///
/// # Errors
///
/// See [`Fetcher::new`] and [`Fetcher::fetch`]. The availability gauge is
/// cleared on every error, certificate failures included.
pub async fn fetch(
    source: &SourceConfig,
    trusted_cert_files: &[PathBuf],
) -> Result<ScrapeResult, Error> {
    match Fetcher::new(trusted_cert_files) {
        Ok(fetcher) => fetcher.fetch(source).await,
        Err(e) => {
            record_availability(&source.component, false);
            Err(e)
        }
    }
}

fn record_availability(component: &str, available: bool) {
    let value = if available { 1.0 } else { 0.0 };
    gauge!(AVAILABILITY_GAUGE, COMPONENT_LABEL => component.to_string()).set(value);
}

fn load_certificates(path: &Path) -> Result<Vec<reqwest::Certificate>, CertLoadReason> {
    let pem = fs::read(path)?;
    let certificates =
        reqwest::Certificate::from_pem_bundle(&pem).map_err(CertLoadReason::Invalid)?;
    if certificates.is_empty() {
        return Err(CertLoadReason::NoCertificates);
    }
    Ok(certificates)
}

/// Cut `body` to at most `max` bytes without splitting a character.
fn truncate(mut body: String, max: usize) -> String {
    if body.len() > max {
        let mut end = max;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
