//! Core types for tripdata-loader

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::Error;

/// Taxi-type label such as `yellow` or `green`
///
/// Labels are embedded in source URLs and object keys, so only lowercase ASCII
/// letters, digits, `_` and `-` are accepted.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Category(String);

impl Category {
    /// Create a validated category label
    pub fn new(label: impl Into<String>) -> Result<Self, Error> {
        let label = label.into();
        let valid = !label.is_empty()
            && label
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
        if !valid {
            return Err(Error::config(
                "schedule.categories",
                format!("invalid category label '{}'", label),
            ));
        }
        Ok(Self(label))
    }

    /// Get the label as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Category {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Category::new(value)
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.0
    }
}

impl std::str::FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::new(s)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A calendar month
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    /// Four-digit year
    pub year: i32,
    /// Month number, 1 through 12
    pub month: u32,
}

impl Period {
    /// Create a period, rejecting month numbers outside 1..=12
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    /// The period containing `date`
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// First day of this month
    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    /// The following month
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// File format published by the archive
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    /// Apache Parquet (`.parquet`), the current TLC publication format
    #[default]
    Parquet,
    /// Gzipped CSV (`.csv.gz`), used by the historical release mirrors
    CsvGz,
}

impl ArtifactFormat {
    /// File extension without the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactFormat::Parquet => "parquet",
            ArtifactFormat::CsvGz => "csv.gz",
        }
    }
}

/// One unit of source data: a category, a month and the format it is published in
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    /// Taxi type
    pub category: Category,
    /// Month of trip records
    pub period: Period,
    /// Published file format
    pub format: ArtifactFormat,
}

impl WorkItem {
    /// Create a work item
    pub fn new(category: Category, period: Period, format: ArtifactFormat) -> Self {
        Self {
            category,
            period,
            format,
        }
    }

    /// Canonical artifact name, e.g. `yellow_tripdata_2019-01.parquet`
    ///
    /// Shared by the staging file, the source URL suffix and the destination key.
    pub fn canonical_name(&self) -> String {
        format!(
            "{}_tripdata_{}.{}",
            self.category,
            self.period,
            self.format.extension()
        )
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_name())
    }
}

/// A work item that has been fully written to staging storage
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedArtifact {
    /// The work item this file belongs to
    pub item: WorkItem,
    /// Location in staging storage
    pub path: PathBuf,
    /// File size in bytes
    pub size_bytes: u64,
    /// True when an earlier run's file was reused instead of downloaded
    pub reused: bool,
}

/// Destination identity of an artifact
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RemoteArtifact {
    /// Bucket / container identifier
    pub container: String,
    /// Object key within the container
    pub key: String,
}

impl RemoteArtifact {
    /// Build the destination identity for a work item
    ///
    /// The key is `prefix` followed by the canonical name; it never depends on run state.
    pub fn for_item(container: &str, prefix: Option<&str>, item: &WorkItem) -> Self {
        Self {
            container: container.to_string(),
            key: format!("{}{}", prefix.unwrap_or_default(), item.canonical_name()),
        }
    }
}

impl fmt::Display for RemoteArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.key)
    }
}

/// Pipeline phase an attempt record belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Download into staging
    Fetch,
    /// Upload and verification
    Upload,
}

/// Final outcome of one item in one phase
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Phase completed (for uploads: verified at the destination)
    Succeeded,
    /// Phase failed; `code` is machine-readable, `reason` human-readable
    Failed {
        /// Reason code, e.g. `source_unavailable` or `verification_absent`
        code: String,
        /// Last error message
        reason: String,
    },
    /// Work stopped because the run was cancelled
    Cancelled,
}

/// Per-item, per-phase outcome used for the final report
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Canonical artifact name
    pub name: String,
    /// Phase that produced this record
    pub phase: Phase,
    /// Number of attempts made (fetches are never retried, so this is 0 or 1 there)
    pub attempts: u32,
    /// What happened
    pub outcome: Outcome,
}

impl AttemptRecord {
    /// A successful record
    pub fn succeeded(name: impl Into<String>, phase: Phase, attempts: u32) -> Self {
        Self {
            name: name.into(),
            phase,
            attempts,
            outcome: Outcome::Succeeded,
        }
    }

    /// A failed record
    pub fn failed(
        name: impl Into<String>,
        phase: Phase,
        attempts: u32,
        code: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            phase,
            attempts,
            outcome: Outcome::Failed {
                code: code.into(),
                reason: reason.into(),
            },
        }
    }

    /// A record for work interrupted by cancellation
    pub fn cancelled(name: impl Into<String>, phase: Phase, attempts: u32) -> Self {
        Self {
            name: name.into(),
            phase,
            attempts,
            outcome: Outcome::Cancelled,
        }
    }
}

/// Partition of every enumerated item after a run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Items confirmed present at the destination
    pub delivered: Vec<AttemptRecord>,
    /// Items whose upload attempts were exhausted
    pub abandoned: Vec<AttemptRecord>,
    /// Items that could not be staged
    pub fetch_failed: Vec<AttemptRecord>,
    /// Items not finished because the run was cancelled
    pub cancelled: Vec<AttemptRecord>,
}

impl RunSummary {
    /// Total number of items accounted for
    pub fn total(&self) -> usize {
        self.delivered.len() + self.abandoned.len() + self.fetch_failed.len() + self.cancelled.len()
    }

    /// True when every item was delivered
    pub fn is_success(&self) -> bool {
        self.abandoned.is_empty() && self.fetch_failed.is_empty() && self.cancelled.is_empty()
    }

    /// Process exit code: 0 when clean, 1 when any item was not delivered
    pub fn exit_code(&self) -> u8 {
        if self.is_success() { 0 } else { 1 }
    }

    /// Find the record for a canonical name in any partition
    pub fn find(&self, name: &str) -> Option<&AttemptRecord> {
        self.delivered
            .iter()
            .chain(&self.abandoned)
            .chain(&self.fetch_failed)
            .chain(&self.cancelled)
            .find(|r| r.name == name)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "delivered: {}, abandoned: {}, fetch-failed: {}, cancelled: {}",
            self.delivered.len(),
            self.abandoned.len(),
            self.fetch_failed.len(),
            self.cancelled.len()
        )?;
        let sections = [
            ("abandoned", &self.abandoned),
            ("fetch-failed", &self.fetch_failed),
            ("cancelled", &self.cancelled),
        ];
        for (label, records) in sections {
            for record in records {
                match &record.outcome {
                    Outcome::Failed { code, reason } => writeln!(
                        f,
                        "  {} {} after {} attempt(s) [{}]: {}",
                        label, record.name, record.attempts, code, reason
                    )?,
                    _ => writeln!(f, "  {} {}", label, record.name)?,
                }
            }
        }
        Ok(())
    }
}

/// Event emitted while a run progresses
///
/// Subscribe with [`crate::Pipeline::subscribe`]; events are informational and a slow
/// subscriber never blocks workers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Artifact is in staging storage
    Staged {
        /// Canonical name
        name: String,
        /// File size
        size_bytes: u64,
        /// Whether an existing staged file was reused
        reused: bool,
    },
    /// Artifact could not be staged
    FetchFailed {
        /// Canonical name
        name: String,
        /// Failure description
        reason: String,
    },
    /// An upload attempt is starting
    UploadAttempt {
        /// Canonical name
        name: String,
        /// 1-based attempt number
        attempt: u32,
    },
    /// Artifact verified at the destination
    Delivered {
        /// Canonical name
        name: String,
        /// Attempt that was verified
        attempts: u32,
    },
    /// Upload attempts exhausted
    Abandoned {
        /// Canonical name
        name: String,
        /// Attempts made
        attempts: u32,
        /// Last failure
        reason: String,
    },
    /// Item stopped by cancellation
    Cancelled {
        /// Canonical name
        name: String,
        /// Phase in which the item stopped
        phase: Phase,
    },
}
