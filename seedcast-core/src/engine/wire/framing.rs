//! CRLF line framing for the wire protocol

use bytes::{Buf, BytesMut};

const TERMINATOR: &[u8] = b"\r\n";

/// Accumulates socket reads and yields complete lines in arrival order.
///
/// A partial line is kept until a later read completes it, including the
/// case where the CR and LF of one terminator arrive in different reads.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: BytesMut,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a read and returns every line it completed.
    ///
    /// Empty lines are skipped and invalid UTF-8 is replaced lossily.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self
            .buffer
            .windows(TERMINATOR.len())
            .position(|window| window == TERMINATOR)
        {
            let line = self.buffer.split_to(pos);
            self.buffer.advance(TERMINATOR.len());
            if !line.is_empty() {
                lines.push(String::from_utf8_lossy(&line).into_owned());
            }
        }
        lines
    }

    /// Bytes waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_single_and_multiple_lines() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"STATE 2\r\n"), vec!["STATE 2"]);
        assert_eq!(
            framer.push(b"STATE 2\r\nAUTH 1\r\n"),
            vec!["STATE 2", "AUTH 1"]
        );
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_partial_line_is_buffered() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"STATUS main:pre").is_empty());
        assert!(framer.push(b"buf;10\r").is_empty());
        assert_eq!(framer.push(b"\nAUTH"), vec!["STATUS main:prebuf;10"]);
        assert_eq!(framer.pending(), 4);
    }

    #[test]
    fn test_empty_lines_skipped() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"\r\n\r\nSHUTDOWN\r\n"), vec!["SHUTDOWN"]);
    }

    fn message() -> impl Strategy<Value = String> {
        "[A-Z]{2,8}( [a-z0-9=:;]{1,12}){0,3}"
    }

    proptest! {
        #[test]
        fn prop_framing_independent_of_chunking(
            messages in prop::collection::vec(message(), 1..12),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..16),
        ) {
            let stream: Vec<u8> = messages
                .iter()
                .flat_map(|m| format!("{m}\r\n").into_bytes())
                .collect();

            let mut offsets: Vec<usize> = cuts.iter().map(|c| c.index(stream.len())).collect();
            offsets.push(0);
            offsets.push(stream.len());
            offsets.sort_unstable();
            offsets.dedup();

            let mut framer = LineFramer::new();
            let mut received = Vec::new();
            for range in offsets.windows(2) {
                received.extend(framer.push(&stream[range[0]..range[1]]));
            }

            prop_assert_eq!(received, messages);
            prop_assert_eq!(framer.pending(), 0);
        }
    }
}
