//! Bounded in-memory capture of a child's output stream.

use serde::{Serialize, Serializer};

/// Default per-stream capture cap (4 MiB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;

/// Accumulates up to `limit` bytes and counts everything it is offered.
#[derive(Debug, Clone)]
pub struct CaptureBuffer {
    limit: usize,
    data: Vec<u8>,
    total_bytes: u64,
    truncated: bool,
}

impl CaptureBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            data: Vec::new(),
            total_bytes: 0,
            truncated: false,
        }
    }

    /// Append a chunk; bytes beyond the limit are counted and discarded.
    pub fn push(&mut self, chunk: &[u8]) {
        self.total_bytes += chunk.len() as u64;

        let room = self.limit.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.data.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    /// Flag the capture as incomplete (read error or interrupted drain).
    pub fn mark_truncated(&mut self) {
        self.truncated = true;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn finish(self) -> CapturedOutput {
        CapturedOutput {
            data: self.data,
            truncated: self.truncated,
            total_bytes: self.total_bytes,
        }
    }
}

/// Captured bytes of one stream, as carried in a result report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedOutput {
    #[serde(rename = "text", serialize_with = "serialize_lossy")]
    pub data: Vec<u8>,
    /// True when bytes were dropped: cap reached, read error, or drain interrupted.
    pub truncated: bool,
    /// Every byte the child wrote to the stream, kept or not.
    pub total_bytes: u64,
}

impl CapturedOutput {
    /// Captured bytes decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

fn serialize_lossy<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_under_limit() {
        let mut buffer = CaptureBuffer::new(16);
        buffer.push(b"hello ");
        buffer.push(b"world");
        let out = buffer.finish();
        assert_eq!(out.data, b"hello world");
        assert!(!out.truncated);
        assert_eq!(out.total_bytes, 11);
    }

    #[test]
    fn test_capture_truncates_and_keeps_counting() {
        let mut buffer = CaptureBuffer::new(4);
        buffer.push(b"abc");
        buffer.push(b"defg");
        buffer.push(b"hij");
        let out = buffer.finish();
        assert_eq!(out.data, b"abcd");
        assert!(out.truncated);
        assert_eq!(out.total_bytes, 10);
    }

    #[test]
    fn test_exact_limit_is_not_truncated() {
        let mut buffer = CaptureBuffer::new(3);
        buffer.push(b"abc");
        buffer.push(b"");
        assert!(!buffer.clone().finish().truncated);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_zero_limit_captures_nothing() {
        let mut buffer = CaptureBuffer::new(0);
        buffer.push(b"x");
        assert!(buffer.is_empty());
        assert!(buffer.finish().truncated);
    }

    #[test]
    fn test_serializes_as_text() {
        let out = CapturedOutput {
            data: b"hi\xff".to_vec(),
            truncated: false,
            total_bytes: 3,
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["text"], "hi\u{fffd}");
        assert_eq!(json["total_bytes"], 3);
    }
}
