//! Persistent entity types: queues, downloads, and chunks.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::sqlite::{SqliteArgumentValue, SqliteTypeInfo, SqliteValueRef};
use sqlx::{Decode, Encode, FromRow, Sqlite, Type};

use super::daytime::DayTime;

/// Lifecycle state of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadState {
    /// Waiting for queue capacity.
    Pending,
    /// Actively fetching bytes.
    InProgress,
    /// Suspended by the user, a failure, or a closed schedule window.
    Paused,
    /// All chunks fully delivered.
    Completed,
    /// Retries exhausted.
    Failed,
}

impl DownloadState {
    /// Returns the database string representation (stored uppercase).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DownloadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "PAUSED" => Ok(Self::Paused),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("invalid download state: {s}")),
        }
    }
}

impl Type<Sqlite> for DownloadState {
    fn type_info() -> SqliteTypeInfo {
        <&str as Type<Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, Sqlite> for DownloadState {
    fn encode_by_ref(
        &self,
        args: &mut Vec<SqliteArgumentValue<'q>>,
    ) -> Result<IsNull, BoxDynError> {
        args.push(SqliteArgumentValue::Text(Cow::Borrowed(self.as_str())));
        Ok(IsNull::No)
    }
}

impl<'r> Decode<'r, Sqlite> for DownloadState {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let text = <&str as Decode<Sqlite>>::decode(value)?;
        text.parse().map_err(Into::into)
    }
}

/// A named admission domain for downloads.
///
/// Each queue caps concurrent downloads, optionally caps aggregate bandwidth,
/// and optionally restricts activity to a daily wall-clock window.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Queue {
    /// Unique identifier.
    pub id: i64,
    /// Human-readable name.
    pub name: String,
    /// Absolute directory downloads are saved into.
    pub directory: String,
    /// Aggregate bandwidth ceiling in bytes per second; `None` is unlimited.
    pub max_bandwidth: Option<i64>,
    /// Daily window start, when `schedule_mode` is set.
    pub start_download: Option<DayTime>,
    /// Daily window end, when `schedule_mode` is set.
    pub end_download: Option<DayTime>,
    /// Retries granted to each download before it is marked FAILED.
    pub retry_limit: i64,
    /// Whether the daily window is enforced.
    pub schedule_mode: bool,
    /// Maximum concurrently active downloads.
    pub max_concurrent: i64,
}

/// Parameters for creating a queue.
#[derive(Debug, Clone)]
pub struct NewQueue {
    /// Human-readable name.
    pub name: String,
    /// Absolute directory downloads are saved into.
    pub directory: String,
    /// Aggregate bandwidth ceiling in bytes per second; `None` is unlimited.
    pub max_bandwidth: Option<i64>,
    /// Daily window start.
    pub start_download: Option<DayTime>,
    /// Daily window end.
    pub end_download: Option<DayTime>,
    /// Retries granted to each download.
    pub retry_limit: i64,
    /// Whether the daily window is enforced.
    pub schedule_mode: bool,
    /// Maximum concurrently active downloads.
    pub max_concurrent: i64,
}

/// Parameters for editing an existing queue.
#[derive(Debug, Clone)]
pub struct QueueUpdate {
    /// Queue to update.
    pub id: i64,
    /// New name.
    pub name: String,
    /// New download directory.
    pub directory: String,
    /// New bandwidth ceiling; `None` is unlimited.
    pub max_bandwidth: Option<i64>,
    /// New window start.
    pub start_download: Option<DayTime>,
    /// New window end.
    pub end_download: Option<DayTime>,
    /// New retry limit.
    pub retry_limit: i64,
    /// New schedule flag.
    pub schedule_mode: bool,
    /// New concurrency cap.
    pub max_concurrent: i64,
}

/// One URL targeted at one file within a queue.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Download {
    /// Unique identifier.
    pub id: i64,
    /// Owning queue.
    pub queue_id: i64,
    /// Source URL.
    pub url: String,
    /// Absolute save path.
    pub save_path: String,
    /// Lifecycle state.
    pub state: DownloadState,
    /// Retry attempts consumed so far.
    pub retries: i64,
}

/// A download row joined with its owning queue's name, for UI listings.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DownloadWithQueueName {
    /// Unique identifier.
    pub id: i64,
    /// Owning queue.
    pub queue_id: i64,
    /// Source URL.
    pub url: String,
    /// Absolute save path.
    pub save_path: String,
    /// Lifecycle state.
    pub state: DownloadState,
    /// Retry attempts consumed so far.
    pub retries: i64,
    /// Name of the owning queue.
    pub queue_name: String,
}

/// One contiguous byte range of a download; the unit of parallelism and
/// resumption.
///
/// `range_start` is inclusive, `range_end` exclusive, and `range_start <=
/// current_pointer <= range_end` at every observable instant. The chunk has
/// delivered all its bytes exactly when `current_pointer == range_end`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct DownloadChunk {
    /// Opaque globally-unique identifier.
    pub id: String,
    /// First byte of the range (inclusive).
    pub range_start: i64,
    /// One past the last byte of the range (exclusive).
    pub range_end: i64,
    /// Next byte to fetch.
    pub current_pointer: i64,
    /// Owning download.
    pub download_id: i64,
    /// True when the server rejected ranges and this chunk spans the whole
    /// resource.
    pub single_part: bool,
}

impl DownloadChunk {
    /// Bytes already delivered for this chunk.
    #[must_use]
    pub fn delivered(&self) -> i64 {
        self.current_pointer - self.range_start
    }

    /// Whether the chunk has delivered its full range.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.current_pointer == self.range_end
    }
}
