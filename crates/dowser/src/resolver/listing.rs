//! URL derivation and artifact-index parsing.
//!
//! Job URLs are declared under the CI front end (`source_base_url`). The raw
//! job record lives at the same path under `storage_base_url`, and the
//! browsable artifact index mirrors the bucket path under
//! `artifact_index_prefix/gcs/<bucket>/`.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::config::SourceConfig;
use crate::error::{OperatorError, Result};

/// File name of the metric archive inside a job's artifacts.
pub const ARCHIVE_FILE_NAME: &str = "prometheus.tar";

/// Name of the job record beside a job's artifacts.
pub const JOB_RECORD_NAME: &str = "prowjob.json";

/// Location of the job record for `job_url`.
#[must_use]
pub fn metadata_url(sources: &SourceConfig, job_url: &str) -> String {
    let storage_path = job_url
        .trim_end_matches('/')
        .replace(&sources.source_base_url, &sources.storage_base_url);
    format!("{storage_path}/{JOB_RECORD_NAME}")
}

/// Root of the artifact index for `job_url`.
///
/// # Errors
///
/// Returns [`OperatorError::ForeignJobUrl`] if `job_url` is not under the
/// source base URL, and [`OperatorError::Config`] if the result is not a URL.
pub fn listing_root(sources: &SourceConfig, job_url: &str) -> Result<Url> {
    let base = sources.source_base_url.trim_end_matches('/');
    let relative = job_url
        .strip_prefix(base)
        .map(|rest| rest.trim_matches('/'))
        .filter(|rest| !rest.is_empty())
        .ok_or_else(|| OperatorError::ForeignJobUrl {
            url: job_url.to_string(),
            base: sources.source_base_url.clone(),
        })?;

    let bucket = sources
        .storage_base_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    let prefix = sources.artifact_index_prefix.trim_end_matches('/');

    let root = format!("{prefix}/gcs/{bucket}/{relative}/artifacts/");
    Url::parse(&root).map_err(|e| OperatorError::Config(format!("invalid listing url {root}: {e}")))
}

static HREF_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"href\s*=\s*["']([^"'#?]+)["']"#).unwrap_or_else(|_| unreachable!())
});

/// Every link in an HTML listing, resolved against `base`, sorted and
/// de-duplicated.
#[must_use]
pub fn extract_links(base: &Url, body: &str) -> Vec<Url> {
    let mut links: Vec<Url> = HREF_REGEX
        .captures_iter(body)
        .filter_map(|captures| captures.get(1))
        .filter_map(|href| base.join(href.as_str()).ok())
        .collect();
    links.sort();
    links.dedup();
    links
}

/// Whether `link` points at a metric archive.
#[must_use]
pub fn is_archive(link: &Url) -> bool {
    link.path().ends_with(&format!("/{ARCHIVE_FILE_NAME}"))
}

/// Whether `link` is a directory listing strictly below `parent`.
///
/// Listings link back to their parents; only descending keeps the walk
/// finite.
#[must_use]
pub fn is_subdirectory(parent: &Url, link: &Url) -> bool {
    link.origin() == parent.origin()
        && link.path().ends_with('/')
        && link.path().len() > parent.path().len()
        && link.path().starts_with(parent.path())
}
