use bytes::Bytes;
use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Day-MonthAbbrev-Year-Hour-Minute-Second.microsecond, e.g. `19-Oct-2026-14-03-27.104233`.
pub const TIMESTAMP_FORMAT: &str = "%d-%b-%Y-%H-%M-%S%.6f";

pub const ARTIFACT_SUFFIX: &str = "_annotated.jpg";

pub fn format_timestamp<Tz>(timestamp: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Blob name for an annotated frame captured at `timestamp` (already formatted).
pub fn artifact_name(timestamp: &str) -> String {
    format!("{}{}", timestamp, ARTIFACT_SUFFIX)
}

/// Metadata attached to every annotated frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub timestamp: String,
    pub objects: Vec<String>,
}

impl ArtifactMetadata {
    /// Labels are deduplicated and kept in a stable (sorted) order.
    pub fn new<I, S>(timestamp: String, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let objects: BTreeSet<String> = labels.into_iter().map(Into::into).collect();
        Self {
            timestamp,
            objects: objects.into_iter().collect(),
        }
    }

    /// Rebuilds metadata from the flat `timestamp` / `objects` fields stored remotely.
    pub fn from_fields(timestamp: &str, objects: &str) -> Self {
        Self::new(
            timestamp.to_string(),
            objects
                .split(',')
                .map(str::trim)
                .filter(|label| !label.is_empty()),
        )
    }

    pub fn objects_field(&self) -> String {
        self.objects.join(",")
    }
}

#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub content: Bytes,
    pub metadata: Option<ArtifactMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSummary {
    pub name: String,
    pub size: Option<u64>,
    pub metadata: Option<ArtifactMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactPage {
    pub items: Vec<ArtifactSummary>,
    pub next_marker: Option<String>,
}

/// One page of a listing: start strictly after `marker`, return at most `max_results`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub marker: Option<String>,
    pub max_results: usize,
}

impl PageRequest {
    pub fn first(max_results: usize) -> Self {
        Self {
            marker: None,
            max_results,
        }
    }

    pub fn after(marker: impl Into<String>, max_results: usize) -> Self {
        Self {
            marker: Some(marker.into()),
            max_results,
        }
    }
}
