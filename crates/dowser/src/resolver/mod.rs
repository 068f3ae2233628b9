//! Resolution of job URLs to job metadata and metric archives.
//!
//! Resolving a job takes two independent lookups:
//!
//! 1. The job record (`prowjob.json`), which supplies the canonical status
//!    URL, job name and timestamps. Failures here are tolerated: the job is
//!    still converged, with whatever metadata could be read.
//! 2. The metric archive, found by walking the job's artifact index. Without
//!    an archive there is nothing to ingest, so failure skips the job.
//!
//! Results are memoized in an [`ArchiveCache`] owned by the resolver. A
//! discovered archive is never searched for again; a cached job whose
//! record was incomplete only has the record reread.

pub mod cache;
pub mod fetch;
pub mod listing;

use std::collections::VecDeque;

use dowser_api::JobMetadata;
use tracing::{debug, warn};
use url::Url;

use crate::config::{OperatorConfig, SourceConfig};
use crate::error::{OperatorError, Result};

pub use cache::{ArchiveCache, CacheStats};
pub use fetch::{Fetcher, HttpFetcher};
use listing::{extract_links, is_archive, is_subdirectory, listing_root, metadata_url};

/// Deepest directory level below the artifact root that is searched.
pub const MAX_LISTING_DEPTH: usize = 4;

/// Upper bound on listings fetched while searching one job.
pub const MAX_LISTINGS: usize = 64;

/// A job URL with everything needed to build its storage workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedJob {
    /// URL the job was declared under.
    pub declared_url: String,
    /// Job metadata; possibly partial.
    pub metadata: JobMetadata,
    /// Download URL of the metric archive.
    pub archive_url: String,
}

impl ResolvedJob {
    /// Canonical status URL, the identity of the job's storage workload.
    #[must_use]
    pub fn canonical_url(&self) -> &str {
        self.metadata.canonical_url(&self.declared_url)
    }
}

/// Resolves job URLs, memoizing every discovered archive.
#[derive(Debug)]
pub struct MetadataResolver<F> {
    fetcher: F,
    cache: ArchiveCache,
    sources: SourceConfig,
}

impl<F: Fetcher> MetadataResolver<F> {
    /// Creates a resolver with an explicit cache.
    #[must_use]
    pub fn new(fetcher: F, cache: ArchiveCache, sources: SourceConfig) -> Self {
        Self {
            fetcher,
            cache,
            sources,
        }
    }

    /// Creates a resolver sized from the operator configuration.
    #[must_use]
    pub fn from_config(fetcher: F, config: &OperatorConfig) -> Self {
        Self::new(
            fetcher,
            ArchiveCache::new(config.cache.capacity, config.cache.ttl()),
            config.sources.clone(),
        )
    }

    /// The resolver's cache.
    pub fn cache(&self) -> &ArchiveCache {
        &self.cache
    }

    /// The underlying fetcher.
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Resolves `job_url`.
    ///
    /// Concurrent misses for the same URL may both go to the network; the
    /// cache lock is never held across a fetch.
    ///
    /// # Errors
    ///
    /// Returns an error if the job's metric archive cannot be found.
    pub async fn resolve(&self, job_url: &str) -> Result<ResolvedJob> {
        if let Some(job) = self.cache.get(job_url) {
            if job.metadata.is_complete() {
                debug!(url = %job_url, "resolved job from cache");
                return Ok(job);
            }
            return Ok(self.refresh(job_url, job).await);
        }

        let metadata = self.fetch_metadata(job_url).await;
        let archive_url = self.discover_archive(job_url).await?;

        let job = ResolvedJob {
            declared_url: job_url.to_string(),
            metadata,
            archive_url,
        };
        self.cache.insert(job_url, job.clone());

        Ok(job)
    }

    /// Rereads the record of a cached job with incomplete metadata, keeping
    /// its archive.
    async fn refresh(&self, job_url: &str, cached: ResolvedJob) -> ResolvedJob {
        let metadata = self
            .fetch_metadata(job_url)
            .await
            .or_previous(&cached.metadata);
        if metadata == cached.metadata {
            debug!(url = %job_url, "resolved job from cache, record unchanged");
            return cached;
        }

        debug!(url = %job_url, "refreshed job record");
        let job = ResolvedJob { metadata, ..cached };
        self.cache.insert(job_url, job.clone());
        job
    }

    async fn fetch_metadata(&self, job_url: &str) -> JobMetadata {
        let record_url = metadata_url(&self.sources, job_url);
        match self.fetcher.fetch(&record_url).await {
            Ok(document) => {
                let metadata = JobMetadata::from_json(&document);
                if metadata == JobMetadata::default() {
                    warn!(url = %job_url, record = %record_url, "couldn't decode job record");
                }
                metadata
            }
            Err(e) => {
                warn!(url = %job_url, record = %record_url, error = %e, "couldn't fetch job record");
                JobMetadata::default()
            }
        }
    }

    /// Breadth-first search of the artifact index for the metric archive.
    async fn discover_archive(&self, job_url: &str) -> Result<String> {
        let root = listing_root(&self.sources, job_url)?;
        let mut frontier: VecDeque<(Url, usize)> = VecDeque::from([(root.clone(), 0)]);
        let mut fetched = 0;

        while let Some((listing, depth)) = frontier.pop_front() {
            if fetched == MAX_LISTINGS {
                warn!(url = %job_url, limit = MAX_LISTINGS, "gave up searching artifact index");
                break;
            }
            fetched += 1;

            let body = match self.fetcher.fetch(listing.as_str()).await {
                Ok(body) => body,
                Err(e) if listing == root => return Err(e),
                Err(e) => {
                    debug!(listing = %listing, error = %e, "skipping unreadable listing");
                    continue;
                }
            };

            let links = extract_links(&listing, &body);
            if let Some(archive) = links.iter().find(|link| is_archive(link)) {
                debug!(url = %job_url, archive = %archive, "found prometheus archive");
                return Ok(archive.to_string());
            }

            if depth < MAX_LISTING_DEPTH {
                frontier.extend(
                    links
                        .into_iter()
                        .filter(|link| is_subdirectory(&listing, link))
                        .map(|link| (link, depth + 1)),
                );
            }
        }

        Err(OperatorError::ArchiveNotFound(job_url.to_string()))
    }
}
