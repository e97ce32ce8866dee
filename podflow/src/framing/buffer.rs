//! Delimiter-based accumulation buffer.

/// Accumulates byte chunks and yields every fully delimited segment.
///
/// The trailing undelimited remainder stays buffered until a later chunk
/// completes it. Carriage returns are discarded on entry so `\r\n` line
/// endings frame identically to `\n`.
#[derive(Debug, Clone)]
pub struct DelimitedBuffer {
    delimiter: &'static [u8],
    buffer: Vec<u8>,
    scan_from: usize,
}

impl DelimitedBuffer {
    /// Creates a buffer splitting on `delimiter`.
    #[must_use]
    pub fn new(delimiter: &'static [u8]) -> Self {
        Self {
            delimiter,
            buffer: Vec::new(),
            scan_from: 0,
        }
    }

    /// Appends a chunk and returns the segments it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut segments = Vec::new();
        let mut start = 0;
        let mut cursor = self.scan_from;
        while let Some(pos) = find(&self.buffer[cursor..], self.delimiter) {
            let end = cursor + pos;
            segments.push(self.buffer[start..end].to_vec());
            start = end + self.delimiter.len();
            cursor = start;
        }
        self.buffer.drain(..start);
        // A delimiter may straddle the next chunk boundary.
        self.scan_from = self.buffer.len().saturating_sub(self.delimiter.len() - 1);
        segments
    }

    /// Takes the undelimited remainder, if any.
    pub fn take_remainder(&mut self) -> Option<Vec<u8>> {
        self.scan_from = 0;
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    /// Returns the number of buffered bytes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emits_complete_segments_only() {
        let mut buf = DelimitedBuffer::new(b"\n\n");
        assert!(buf.push(b"a\nb").is_empty());
        let segments = buf.push(b"\n\nc");
        assert_eq!(segments, vec![b"a\nb".to_vec()]);
        assert_eq!(buf.pending(), 1);
    }

    #[test]
    fn test_delimiter_split_across_chunks() {
        let mut buf = DelimitedBuffer::new(b"\n\n");
        assert!(buf.push(b"first\n").is_empty());
        assert_eq!(buf.push(b"\nsecond\n\n"), vec![b"first".to_vec(), b"second".to_vec()]);
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn test_crlf_is_normalized() {
        let mut buf = DelimitedBuffer::new(b"\n");
        assert_eq!(buf.push(b"one\r\ntwo\r"), vec![b"one".to_vec()]);
        assert_eq!(buf.push(b"\n"), vec![b"two".to_vec()]);
    }

    #[test]
    fn test_take_remainder() {
        let mut buf = DelimitedBuffer::new(b"\n");
        buf.push(b"tail");
        assert_eq!(buf.take_remainder(), Some(b"tail".to_vec()));
        assert_eq!(buf.take_remainder(), None);
    }
}
