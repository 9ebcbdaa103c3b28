//! Bounded log sink (§4.2).
//!
//! Each job has two of these, one per standard stream. A sink is a plain
//! byte accumulator with a ceiling; it does not own or touch the upstream
//! stream itself. The "closing halts both sinks" behavior falls out of the
//! drain loop in `execution::job` owning the single [`LogStream`] — once
//! either sink reports full, the loop stops polling and drops the stream,
//! which tears down the underlying connection for both streams at once.

/// A capped byte accumulator. Bytes past the ceiling are silently dropped.
pub struct BoundedLogSink {
    buf: Vec<u8>,
    ceiling: usize,
}

impl BoundedLogSink {
    pub fn new(ceiling: usize) -> Self {
        Self {
            buf: Vec::with_capacity(ceiling.min(64 * 1024)),
            ceiling,
        }
    }

    /// Append as much of `data` as fits under the ceiling.
    ///
    /// Returns `true` if the ceiling has been reached (whether by this call
    /// or a previous one) — the caller should treat that as "stop reading
    /// this stream".
    pub fn write(&mut self, data: &[u8]) -> bool {
        if self.buf.len() < self.ceiling {
            let remaining = self.ceiling - self.buf.len();
            let take = remaining.min(data.len());
            self.buf.extend_from_slice(&data[..take]);
        }
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() >= self.ceiling
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The first `min(len(buf), ceiling)` bytes, UTF-8 decoded as-is.
    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_under_ceiling() {
        let mut sink = BoundedLogSink::new(1024);
        assert!(!sink.write(b"hello"));
        assert!(!sink.write(b" world"));
        assert_eq!(sink.into_string(), "hello world");
    }

    #[test]
    fn truncates_at_ceiling() {
        let mut sink = BoundedLogSink::new(4);
        assert!(!sink.write(b"he"));
        assert!(sink.write(b"llo there"));
        assert_eq!(sink.len(), 4);
        assert_eq!(sink.into_string(), "hell");
    }

    #[test]
    fn full_once_saturated_even_on_empty_write() {
        let mut sink = BoundedLogSink::new(2);
        assert!(sink.write(b"ab"));
        assert!(sink.write(b""));
    }

    #[test]
    fn zero_ceiling_is_immediately_full() {
        let mut sink = BoundedLogSink::new(0);
        assert!(sink.write(b"x"));
        assert_eq!(sink.into_string(), "");
    }
}
