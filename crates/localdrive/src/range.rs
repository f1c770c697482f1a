//! Byte-range streaming for media playback.
//!
//! Every response from this module is `206 Partial Content`, including
//! requests without a `Range` header (treated as the whole file). Only a
//! single range is honoured; there is no `If-Range` and no `416`. Ranges
//! past the end of the file are clamped or produce an empty body.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::LazyLock;

use axum::{
    body::Body,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::Stream;
use futures::stream;
use regex::Regex;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

use crate::error::{DriveError, io_or_not_found};

pub const CHUNK_SIZE: usize = 8 * 1024;

static RANGE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)-(\d*)").expect("Invalid regex pattern for Range header"));

/// A `Range` header as sent by the client, before the file size is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    pub start: u64,
    pub end: Option<u64>,
}

impl RangeRequest {
    /// Parse the first `start-end` pair in the header. `None` when nothing
    /// matches, which callers treat the same as a missing header.
    pub fn parse(header: &str) -> Option<Self> {
        let captures = RANGE_PATTERN.captures(header)?;
        let start = captures.get(1)?.as_str().parse().ok()?;
        let end = captures
            .get(2)
            .map(|m| m.as_str())
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse().ok());
        Some(Self { start, end })
    }

    pub fn full() -> Self {
        Self {
            start: 0,
            end: None,
        }
    }

    pub fn resolve(self, file_size: u64) -> ByteRange {
        let last = file_size.saturating_sub(1);
        let end = self.end.map_or(last, |end| end.min(last));

        if file_size == 0 || self.start >= file_size || self.start > end {
            return ByteRange {
                start: self.start,
                end: self.start,
                length: 0,
                file_size,
            };
        }

        ByteRange {
            start: self.start,
            end,
            length: end - self.start + 1,
            file_size,
        }
    }
}

/// A range resolved against a concrete file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
    pub length: u64,
    pub file_size: u64,
}

impl ByteRange {
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn content_range(&self) -> String {
        if self.is_empty() {
            format!("bytes */{}", self.file_size)
        } else {
            format!("bytes {}-{}/{}", self.start, self.end, self.file_size)
        }
    }
}

/// An opened file positioned at the start of its requested range.
pub struct RangedFile {
    pub range: ByteRange,
    pub content_type: String,
    file: fs::File,
}

impl RangedFile {
    pub async fn open(path: &Path, range_header: Option<&str>) -> Result<Self, DriveError> {
        let shown = path.display().to_string();
        let mut file = fs::File::open(path)
            .await
            .map_err(|e| io_or_not_found(e, &shown))?;
        let metadata = file.metadata().await?;
        if metadata.is_dir() {
            return Err(DriveError::NotFound(shown));
        }

        let request = range_header
            .and_then(RangeRequest::parse)
            .unwrap_or_else(RangeRequest::full);
        let range = request.resolve(metadata.len());

        if !range.is_empty() {
            file.seek(SeekFrom::Start(range.start)).await?;
        }

        let content_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string();

        debug!(
            "Streaming {} [{}] as {}",
            shown,
            range.content_range(),
            content_type
        );

        Ok(Self {
            range,
            content_type,
            file,
        })
    }

    /// Lazily read the range in chunks of at most [`CHUNK_SIZE`] bytes.
    ///
    /// A read error ends the stream early; the client sees a short body.
    pub fn into_chunks(self) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send {
        stream::unfold(
            (self.file, self.range.length),
            |(mut file, remaining)| async move {
                if remaining == 0 {
                    return None;
                }

                let want = remaining.min(CHUNK_SIZE as u64) as usize;
                let mut buf = vec![0u8; want];
                match file.read(&mut buf).await {
                    Ok(0) => None,
                    Ok(n) => {
                        buf.truncate(n);
                        Some((Ok(Bytes::from(buf)), (file, remaining - n as u64)))
                    }
                    Err(err) => {
                        warn!("Read error while streaming, truncating response: {}", err);
                        None
                    }
                }
            },
        )
    }
}

impl IntoResponse for RangedFile {
    fn into_response(self) -> Response {
        let headers = [
            (header::CONTENT_TYPE, self.content_type.clone()),
            (header::ACCEPT_RANGES, "bytes".to_string()),
            (header::CONTENT_RANGE, self.range.content_range()),
            (header::CONTENT_LENGTH, self.range.length.to_string()),
        ];
        let body = Body::from_stream(self.into_chunks());

        (StatusCode::PARTIAL_CONTENT, headers, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tempfile::TempDir;

    async fn collect(file: RangedFile) -> (Vec<u8>, usize) {
        let chunks: Vec<Bytes> = file
            .into_chunks()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        let count = chunks.len();
        (chunks.concat(), count)
    }

    #[test]
    fn test_parse_range_header() {
        assert_eq!(
            RangeRequest::parse("bytes=10-19"),
            Some(RangeRequest {
                start: 10,
                end: Some(19)
            })
        );
        assert_eq!(
            RangeRequest::parse("bytes=500-"),
            Some(RangeRequest {
                start: 500,
                end: None
            })
        );
        assert_eq!(
            RangeRequest::parse("bytes=0-1, 5-9"),
            Some(RangeRequest {
                start: 0,
                end: Some(1)
            })
        );
        assert_eq!(RangeRequest::parse("bytes=-500"), None);
        assert_eq!(RangeRequest::parse("garbage"), None);
    }

    #[test]
    fn test_resolve_range() {
        let range = RangeRequest {
            start: 10,
            end: Some(19),
        }
        .resolve(100);
        assert_eq!(range.length, 10);
        assert_eq!(range.content_range(), "bytes 10-19/100");

        let full = RangeRequest::full().resolve(100);
        assert_eq!((full.start, full.end, full.length), (0, 99, 100));
        assert_eq!(full.content_range(), "bytes 0-99/100");
    }

    #[test]
    fn test_resolve_clamps_and_empties() {
        let clamped = RangeRequest {
            start: 90,
            end: Some(500),
        }
        .resolve(100);
        assert_eq!((clamped.end, clamped.length), (99, 10));

        let past_end = RangeRequest {
            start: 100,
            end: None,
        }
        .resolve(100);
        assert!(past_end.is_empty());
        assert_eq!(past_end.content_range(), "bytes */100");

        let inverted = RangeRequest {
            start: 20,
            end: Some(10),
        }
        .resolve(100);
        assert!(inverted.is_empty());

        let empty_file = RangeRequest::full().resolve(0);
        assert!(empty_file.is_empty());
        assert_eq!(empty_file.content_range(), "bytes */0");
    }

    #[tokio::test]
    async fn test_stream_window() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.bin");
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        std::fs::write(&path, &payload).unwrap();

        let file = RangedFile::open(&path, Some("bytes=10-19")).await.unwrap();
        assert_eq!(file.range.content_range(), "bytes 10-19/1000");
        let (body, _) = collect(file).await;
        assert_eq!(body, payload[10..20]);
    }

    #[tokio::test]
    async fn test_stream_without_header_is_whole_file_in_chunks() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("movie.mp4");
        let payload = vec![7u8; CHUNK_SIZE * 2 + 100];
        std::fs::write(&path, &payload).unwrap();

        let file = RangedFile::open(&path, None).await.unwrap();
        assert_eq!(file.content_type, "video/mp4");
        assert_eq!(file.range.length, payload.len() as u64);
        let (body, chunks) = collect(file).await;
        assert_eq!(body.len(), payload.len());
        assert_eq!(chunks, 3);
    }

    #[tokio::test]
    async fn test_stream_past_end_is_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("short.txt");
        std::fs::write(&path, "hello").unwrap();

        let file = RangedFile::open(&path, Some("bytes=50-")).await.unwrap();
        assert!(file.range.is_empty());
        let (body, chunks) = collect(file).await;
        assert!(body.is_empty());
        assert_eq!(chunks, 0);
    }

    #[tokio::test]
    async fn test_stream_unknown_extension_and_missing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("blob.unknownext");
        std::fs::write(&path, "x").unwrap();

        let file = RangedFile::open(&path, None).await.unwrap();
        assert_eq!(file.content_type, "application/octet-stream");

        let missing = RangedFile::open(&temp.path().join("missing.mp4"), None).await;
        assert!(matches!(missing, Err(DriveError::NotFound(_))));

        let dir = RangedFile::open(temp.path(), None).await;
        assert!(matches!(dir, Err(DriveError::NotFound(_))));
    }
}
