use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Length limit for caller-supplied share ids
pub const MAX_SHARE_ID_LEN: usize = 128;
/// Random bytes behind a generated share id
const GENERATED_ID_BYTES: usize = 16;
/// Streaming progress never reports more than this before completion
pub const MAX_STREAMING_PERCENT: u8 = 90;

#[derive(Debug, thiserror::Error)]
pub enum ShareIdError {
    #[error("share id must not be empty")]
    Empty,
    #[error("share id longer than {MAX_SHARE_ID_LEN} characters")]
    TooLong,
    #[error("share id may only contain [A-Za-z0-9_-]")]
    InvalidCharacter,
    #[error("randomness unavailable: {0}")]
    Rng(#[from] getrandom::Error),
}

/// URL-safe share identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShareId(String);

impl ShareId {
    /// Generate a random identifier (16 bytes, base64url without padding).
    pub fn generate() -> Result<Self, ShareIdError> {
        let mut bytes = [0u8; GENERATED_ID_BYTES];
        getrandom::getrandom(&mut bytes)?;
        Ok(Self(URL_SAFE_NO_PAD.encode(bytes)))
    }

    pub fn parse(value: impl Into<String>) -> Result<Self, ShareIdError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ShareIdError::Empty);
        }
        if value.len() > MAX_SHARE_ID_LEN {
            return Err(ShareIdError::TooLong);
        }
        if !value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(ShareIdError::InvalidCharacter);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ShareId {
    type Err = ShareIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ShareId {
    type Error = ShareIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ShareId> for String {
    fn from(id: ShareId) -> Self {
        id.0
    }
}

impl AsRef<str> for ShareId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("malformed range header")]
    Malformed,
    #[error("multiple ranges are not supported")]
    MultipleRanges,
    #[error("range not satisfiable for {total} bytes")]
    NotSatisfiable { total: u64 },
}

/// Inclusive byte range over a plaintext
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Parse a `Range` header value against content of `total` bytes.
    ///
    /// Accepts a single `bytes=start-end` range. An empty start means 0, an
    /// empty end means the last byte, and `bytes=-N` selects the final `N`
    /// bytes.
    pub fn parse(header: &str, total: u64) -> Result<Self, RangeError> {
        let ranges = header
            .trim()
            .strip_prefix("bytes=")
            .ok_or(RangeError::Malformed)?
            .trim();
        if ranges.contains(',') {
            return Err(RangeError::MultipleRanges);
        }
        let (start, end) = ranges.split_once('-').ok_or(RangeError::Malformed)?;
        let (start, end) = (start.trim(), end.trim());
        let not_satisfiable = RangeError::NotSatisfiable { total };

        let range = match (start.is_empty(), end.is_empty()) {
            (true, true) => return Err(RangeError::Malformed),
            (true, false) => {
                let suffix = parse_offset(end)?;
                if suffix == 0 || suffix > total {
                    return Err(not_satisfiable);
                }
                Self {
                    start: total - suffix,
                    end: total - 1,
                }
            }
            (false, _) => {
                let start = parse_offset(start)?;
                let end = if end.is_empty() {
                    total.checked_sub(1).ok_or(not_satisfiable.clone())?
                } else {
                    parse_offset(end)?
                };
                Self { start, end }
            }
        };

        if range.start > range.end || range.end >= total {
            return Err(not_satisfiable);
        }
        Ok(range)
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value for the `Content-Range` header of a 206 response
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

fn parse_offset(value: &str) -> Result<u64, RangeError> {
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::Malformed);
    }
    value.parse().map_err(|_| RangeError::Malformed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Uploading,
    Complete,
}

/// Upload progress for a single share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub share_id: ShareId,
    pub percent: u8,
    pub status: ProgressStatus,
}

impl ProgressEvent {
    /// Progress after `processed` of `total` bytes, capped until completion.
    pub fn uploading(share_id: ShareId, processed: u64, total: u64) -> Self {
        let percent = if total == 0 {
            0
        } else {
            (processed.min(total) * 100 / total) as u8
        };
        Self {
            share_id,
            percent: percent.min(MAX_STREAMING_PERCENT),
            status: ProgressStatus::Uploading,
        }
    }

    pub fn complete(share_id: ShareId) -> Self {
        Self {
            share_id,
            percent: 100,
            status: ProgressStatus::Complete,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == ProgressStatus::Complete
    }
}
