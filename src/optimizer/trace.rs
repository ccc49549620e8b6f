// Unstructured optimizer trace.
//
// Human-readable text appended by the cost model while planning. Stored
// as a sequence of fixed-size segments so the buffer can grow without
// copying; once the configured cap is reached, a single spillover
// segment is overwritten repeatedly and only the over-by amount is
// accounted.

use std::collections::VecDeque;

/// Size of one trace segment in bytes.
pub const SEGMENT_SIZE: usize = 4096;

/// Bounded, segmented append-only text buffer.
#[derive(Debug)]
pub struct TraceBuffer {
    /// Cap in whole segments, rounded up from the byte budget
    max_segments: usize,
    segments: VecDeque<Vec<u8>>,
    /// Spillover segment once the cap is hit; repeatedly overwritten
    excess: Option<Vec<u8>>,
    /// Spillover segments completely filled and discarded
    full_excess_segments: u64,
}

impl TraceBuffer {
    /// `max_bytes` is rounded up so at least that many bytes fit.
    pub fn new(max_bytes: usize) -> Self {
        let max_segments = max_bytes / SEGMENT_SIZE + usize::from(max_bytes % SEGMENT_SIZE != 0);
        Self {
            max_segments,
            segments: VecDeque::new(),
            excess: None,
            full_excess_segments: 0,
        }
    }

    pub fn push_str(&mut self, text: &str) {
        let mut bytes = text.as_bytes();
        while !bytes.is_empty() {
            let seg = match self.writable_segment() {
                Some(seg) => seg,
                None => {
                    self.push_excess(bytes);
                    return;
                }
            };
            let room = SEGMENT_SIZE - seg.len();
            let take = room.min(bytes.len());
            seg.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
        }
    }

    fn writable_segment(&mut self) -> Option<&mut Vec<u8>> {
        let need_new = match self.segments.back() {
            Some(seg) => seg.len() >= SEGMENT_SIZE,
            None => true,
        };
        if need_new {
            if self.segments.len() >= self.max_segments {
                return None;
            }
            self.segments.push_back(Vec::with_capacity(SEGMENT_SIZE));
        }
        self.segments.back_mut()
    }

    fn push_excess(&mut self, mut bytes: &[u8]) {
        let excess = self.excess.get_or_insert_with(|| Vec::with_capacity(SEGMENT_SIZE));
        while !bytes.is_empty() {
            if excess.len() >= SEGMENT_SIZE {
                self.full_excess_segments += 1;
                excess.clear();
            }
            let take = (SEGMENT_SIZE - excess.len()).min(bytes.len());
            excess.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
        }
    }

    /// Bytes that did not fit in the capped segments.
    pub fn excess_bytes(&self) -> u64 {
        self.full_excess_segments * SEGMENT_SIZE as u64
            + self.excess.as_ref().map_or(0, |e| e.len() as u64)
    }

    /// Apply `sink` to each retained segment, freeing them as they are
    /// consumed so the trace never exists in memory twice.
    pub fn consume(&mut self, mut sink: impl FnMut(&[u8])) {
        while let Some(seg) = self.segments.pop_front() {
            sink(&seg);
        }
    }

    /// Copy of the retained contents. Intended for tests; a large trace
    /// should be drained with `consume`.
    pub fn to_string_lossy(&self) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            out.push_str(&String::from_utf8_lossy(seg));
        }
        out
    }

    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Per-compilation trace handle.
#[derive(Debug)]
pub struct OptimizerTrace {
    started: bool,
    buffer: TraceBuffer,
}

impl OptimizerTrace {
    pub fn new(enabled: bool, max_bytes: usize) -> Self {
        Self {
            started: enabled,
            buffer: TraceBuffer::new(max_bytes),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, 0)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Append one line of trace text. A no-op when tracing is off, so
    /// callers may format eagerly only behind `is_started`.
    pub fn note(&mut self, line: impl AsRef<str>) {
        if !self.started {
            return;
        }
        self.buffer.push_str(line.as_ref());
        self.buffer.push_str("\n");
    }

    pub fn contents(&self) -> &TraceBuffer {
        &self.buffer
    }

    pub fn contents_mut(&mut self) -> &mut TraceBuffer {
        &mut self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_read_back() {
        let mut buf = TraceBuffer::new(SEGMENT_SIZE * 2);
        buf.push_str("hello ");
        buf.push_str("world");
        assert_eq!(buf.to_string_lossy(), "hello world");
        assert_eq!(buf.excess_bytes(), 0);
    }

    #[test]
    fn test_segment_boundary() {
        let mut buf = TraceBuffer::new(SEGMENT_SIZE * 2);
        let chunk = "x".repeat(SEGMENT_SIZE - 1);
        buf.push_str(&chunk);
        buf.push_str("ab");
        assert_eq!(buf.len(), SEGMENT_SIZE + 1);
        assert_eq!(buf.to_string_lossy().len(), SEGMENT_SIZE + 1);
    }

    #[test]
    fn test_spillover_accounting() {
        let mut buf = TraceBuffer::new(SEGMENT_SIZE);
        buf.push_str(&"a".repeat(SEGMENT_SIZE));
        assert_eq!(buf.excess_bytes(), 0);
        buf.push_str(&"b".repeat(100));
        assert_eq!(buf.excess_bytes(), 100);
        // Overflowing the spillover segment keeps counting.
        buf.push_str(&"c".repeat(SEGMENT_SIZE));
        assert_eq!(buf.excess_bytes(), 100 + SEGMENT_SIZE as u64);
        // Retained contents are capped at max_bytes.
        assert_eq!(buf.len(), SEGMENT_SIZE);
    }

    #[test]
    fn test_consume_drains() {
        let mut buf = TraceBuffer::new(SEGMENT_SIZE * 4);
        buf.push_str(&"ab".repeat(SEGMENT_SIZE));
        let mut total = 0;
        buf.consume(|seg| total += seg.len());
        assert_eq!(total, SEGMENT_SIZE * 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_trace_off_is_noop() {
        let mut trace = OptimizerTrace::disabled();
        trace.note("should vanish");
        assert!(trace.contents().is_empty());
    }

    #[test]
    fn test_trace_on_records_lines() {
        let mut trace = OptimizerTrace::new(true, SEGMENT_SIZE);
        trace.note("estimated 50 rows");
        assert!(trace.contents().to_string_lossy().contains("estimated 50 rows"));
    }
}
