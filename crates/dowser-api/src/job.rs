//! CI job metadata.
//!
//! The CI system publishes a JSON record per job run. Only a handful of its
//! fields matter to the operator, and the record is decoded leniently: each
//! field is extracted on its own so one malformed field never hides the rest.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The parts of a CI job record the operator consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    /// Canonical status URL of the job run (`status.url`).
    pub status_url: Option<String>,
    /// Job name (`spec.job`).
    pub job: Option<String>,
    /// Run start time (`status.startTime`).
    pub started: Option<DateTime<Utc>>,
    /// Run completion time (`status.completionTime`).
    pub completed: Option<DateTime<Utc>>,
}

impl JobMetadata {
    /// Decodes a job record, keeping every field that parses.
    ///
    /// Input that is not JSON at all yields empty metadata.
    #[must_use]
    pub fn from_json(document: &str) -> Self {
        serde_json::from_str::<Value>(document)
            .map(|value| Self::from_value(&value))
            .unwrap_or_default()
    }

    /// Extracts the known fields from an already-parsed record.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        Self {
            status_url: string_at(value, "/status/url"),
            job: string_at(value, "/spec/job"),
            started: timestamp_at(value, "/status/startTime"),
            completed: timestamp_at(value, "/status/completionTime"),
        }
    }

    /// Whether every field was present.
    ///
    /// A running job has no completion time yet, so incomplete metadata is
    /// expected to change on a later fetch.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.status_url.is_some()
            && self.job.is_some()
            && self.started.is_some()
            && self.completed.is_some()
    }

    /// Canonical URL of the run, falling back to the URL it was declared under.
    ///
    /// Both are normalized, so a job declared as `.../1/` names the same
    /// workload whether or not its record could be read.
    #[must_use]
    pub fn canonical_url<'a>(&'a self, declared_url: &'a str) -> &'a str {
        normalize_job_url(self.status_url.as_deref().unwrap_or(declared_url))
    }

    /// Fills the fields missing from `self` with those of `previous`.
    ///
    /// A refetched record that fails to decode must not erase what an
    /// earlier fetch learned.
    #[must_use]
    pub fn or_previous(self, previous: &Self) -> Self {
        Self {
            status_url: self.status_url.or_else(|| previous.status_url.clone()),
            job: self.job.or_else(|| previous.job.clone()),
            started: self.started.or(previous.started),
            completed: self.completed.or(previous.completed),
        }
    }
}

/// Strips trailing slashes from a job URL.
#[must_use]
pub fn normalize_job_url(url: &str) -> &str {
    url.trim_end_matches('/')
}

/// Formats a timestamp for annotations: RFC 3339, UTC, whole seconds.
///
/// Absent timestamps format as the empty string.
#[must_use]
pub fn format_timestamp(timestamp: Option<&DateTime<Utc>>) -> String {
    timestamp
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

fn string_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn timestamp_at(value: &Value, pointer: &str) -> Option<DateTime<Utc>> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_case::test_case;

    const RECORD: &str = r#"{
        "kind": "ProwJob",
        "spec": { "job": "e2e-aws", "type": "periodic" },
        "status": {
            "url": "https://prow.example.com/view/gs/bucket/logs/e2e-aws/42",
            "startTime": "2020-05-01T10:00:00Z",
            "completionTime": "2020-05-01T11:30:15.123Z",
            "state": "success"
        }
    }"#;

    mod decode {
        use super::*;
        use test_case::test_case;

        #[test]
        fn full_record() {
            let meta = JobMetadata::from_json(RECORD);
            assert_eq!(meta.job.as_deref(), Some("e2e-aws"));
            assert_eq!(
                meta.status_url.as_deref(),
                Some("https://prow.example.com/view/gs/bucket/logs/e2e-aws/42")
            );
            assert_eq!(meta.started, Utc.with_ymd_and_hms(2020, 5, 1, 10, 0, 0).single());
            assert!(meta.is_complete());
        }

        #[test]
        fn malformed_field_keeps_the_others() {
            let meta = JobMetadata::from_json(
                r#"{"spec":{"job":"e2e"},"status":{"url":"https://x/1","startTime":12345}}"#,
            );
            assert_eq!(meta.job.as_deref(), Some("e2e"));
            assert_eq!(meta.status_url.as_deref(), Some("https://x/1"));
            assert!(meta.started.is_none());
            assert!(!meta.is_complete());
        }

        #[test_case("" ; "empty document")]
        #[test_case("<html>not found</html>" ; "html error page")]
        #[test_case("[1, 2, 3]" ; "wrong shape")]
        fn garbage_yields_empty_metadata(document: &str) {
            assert_eq!(JobMetadata::from_json(document), JobMetadata::default());
        }
    }

    mod timestamps {
        use super::*;

        #[test]
        fn formats_utc_whole_seconds() {
            let meta = JobMetadata::from_json(RECORD);
            assert_eq!(format_timestamp(meta.completed.as_ref()), "2020-05-01T11:30:15Z");
        }

        #[test]
        fn offsets_are_normalized_to_utc() {
            let meta = JobMetadata::from_json(r#"{"status":{"startTime":"2020-05-01T12:00:00+02:00"}}"#);
            assert_eq!(format_timestamp(meta.started.as_ref()), "2020-05-01T10:00:00Z");
        }

        #[test]
        fn absent_timestamp_is_empty() {
            assert_eq!(format_timestamp(None), "");
        }
    }

    #[test_case("https://prow/view/1", "https://prow/view/1" ; "already normal")]
    #[test_case("https://prow/view/1/", "https://prow/view/1" ; "trailing slash")]
    #[test_case("https://prow/view/1//", "https://prow/view/1" ; "repeated slashes")]
    fn job_urls_are_normalized(url: &str, expected: &str) {
        assert_eq!(normalize_job_url(url), expected);
    }

    #[test]
    fn fallback_and_status_url_agree_modulo_trailing_slash() {
        let declared = "https://prow.example.com/view/gs/bucket/logs/e2e-aws/42/";
        let unread = JobMetadata::default();
        let read = JobMetadata::from_json(RECORD);
        assert_eq!(unread.canonical_url(declared), read.canonical_url(declared));
    }

    #[test]
    fn refreshed_metadata_keeps_earlier_fields() {
        let earlier = JobMetadata::from_json(RECORD);
        let refreshed =
            JobMetadata::from_json(r#"{"spec":{"job":"renamed"}}"#).or_previous(&earlier);
        assert_eq!(refreshed.job.as_deref(), Some("renamed"));
        assert_eq!(refreshed.status_url, earlier.status_url);
        assert_eq!(refreshed.completed, earlier.completed);

        assert_eq!(JobMetadata::default().or_previous(&earlier), earlier);
    }

    #[test]
    fn canonical_url_falls_back_to_declared() {
        let meta = JobMetadata::default();
        assert_eq!(meta.canonical_url("https://declared/1"), "https://declared/1");

        let meta = JobMetadata::from_json(RECORD);
        assert_eq!(
            meta.canonical_url("https://declared/1"),
            "https://prow.example.com/view/gs/bucket/logs/e2e-aws/42"
        );
    }
}
