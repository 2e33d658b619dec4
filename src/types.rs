//! Core types shared across the posting pipeline

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for a queued job
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a fresh random job id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// JobId is persisted as TEXT (uuid string) in the queue database.
impl sqlx::Type<sqlx::Sqlite> for JobId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0.to_string(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(Uuid::parse_str(&s)?))
    }
}

/// Job lifecycle state. Transitions are monotonic except pending<->running:
/// a running job interrupted by shutdown returns to pending.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Queued, waiting for a consumer
    Pending,
    /// Leased by a consumer and in flight
    Running,
    /// Finished successfully (NZB written)
    Complete,
    /// Finished with an unrecoverable error
    Error,
    /// Cancelled by the caller
    Cancelled,
}

/// Relative scheduling priority. Higher sorts first out of the queue.
pub type Priority = i64;

/// A file to be posted, in the order it was supplied to the job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    /// Path on local disk
    pub path: PathBuf,
    /// Size in bytes at the time the job was created
    pub size: u64,
    /// 1-based ordinal among the files in this job
    pub order: u32,
}

/// A contiguous slice of a source file corresponding to one article.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    /// Which file this segment belongs to
    pub file: FileEntry,
    /// 1-based part number, contiguous within the file
    pub part: u32,
    /// Total number of parts for the file
    pub total_parts: u32,
    /// Byte offset within the file
    pub offset: u64,
    /// Length in bytes; equal to `article_size` except for the last part
    pub length: u64,
}

/// Per-article obfuscation behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObfuscationPolicy {
    /// Use the original file name and subject verbatim
    #[default]
    None,
    /// Stable random token per file
    Partial,
    /// Fresh random token per article
    Full,
}

/// Outcome classification of a single post attempt against the pool facade.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostOutcome {
    /// Accepted by the provider
    Ok,
    /// Retry locally against the same provider
    Transient,
    /// Do not retry against this provider
    Permanent,
    /// Credentials rejected
    Auth,
    /// Provider reports quota/retention exhaustion
    Quota,
}

/// Headers handed to the yEnc Article Builder for a single segment.
#[derive(Clone, Debug)]
pub struct Headers {
    /// Article subject line
    pub subject: String,
    /// `From` header value
    pub from: String,
    /// Newsgroups this article is posted to
    pub groups: Vec<String>,
    /// Message-ID, including angle brackets
    pub message_id: String,
    /// Article date (epoch seconds)
    pub date: i64,
    /// File name embedded in the `=ybegin` line
    pub yenc_name: String,
    /// Original, unobfuscated file name (for NZB bookkeeping)
    pub original_file_name: String,
    /// Original, unobfuscated subject (for NZB bookkeeping)
    pub original_subject: String,
    /// 1-based file ordinal within the job
    pub file_number: u32,
    /// 1-based part number
    pub part_number: u32,
    /// Total parts for the file
    pub total_parts: u32,
}

/// A ready-to-post article: headers plus an encoded yEnc body.
#[derive(Clone, Debug)]
pub struct Article {
    /// Headers used to build this article
    pub headers: Headers,
    /// Encoded body including `=ybegin`/`=ypart`/`=yend` trailer
    pub body: Vec<u8>,
    /// CRC32 of the decoded segment bytes
    pub pcrc32: u32,
    /// CRC32 of the whole file, present only on the last part once known
    pub full_crc32: Option<u32>,
    /// Number of times this article has already been reposted by Stage P4's
    /// post-check, carried across the repost round-trip through P3 so the
    /// count survives re-entry via the accepted channel.
    pub reposts: u32,
}

/// Result of a single article's posting, after all retries settled.
#[derive(Clone, Debug)]
pub struct PostResult {
    /// File this result belongs to
    pub file_number: u32,
    /// Part number within the file
    pub part_number: u32,
    /// Message-id that was actually accepted by the provider
    pub message_id: String,
    /// Provider that accepted the article
    pub provider: String,
    /// Encoded body size in bytes
    pub bytes: u64,
    /// Number of attempts made (1 = succeeded on the first try)
    pub attempts: u32,
}

/// Aggregate result of running the Poster over a job's file set.
#[derive(Clone, Debug, Default)]
pub struct PosterOutcome {
    /// Successful results, grouped by file ordinal, ordered by part number
    pub per_file_results: Vec<FilePostResult>,
    /// Files that failed outright (IOError, exhausted reposts, etc.)
    pub errors: Vec<FilePostError>,
}

/// Posting results for a single file.
#[derive(Clone, Debug)]
pub struct FilePostResult {
    /// File ordinal
    pub file_number: u32,
    /// Original (unobfuscated) file name
    pub file_name: String,
    /// Subject used for the NZB `<file>` entry
    pub subject: String,
    /// `From` used for the NZB `<file>` entry
    pub poster: String,
    /// Newsgroups used for the NZB `<file>` entry
    pub groups: Vec<String>,
    /// sha256 of the source file content
    pub sha256: String,
    /// Per-part results, not necessarily in part order
    pub segments: Vec<PostResult>,
}

/// A file that failed to post entirely.
#[derive(Clone, Debug)]
pub struct FilePostError {
    /// File ordinal
    pub file_number: u32,
    /// Original file name
    pub file_name: String,
    /// Summary of the failure
    pub message: String,
}
