//! Reassembly of blank-line delimited frames from an arbitrarily chunked byte stream.

const FRAME_DELIMITER: &[u8] = b"\n\n";

/// Buffers raw chunks and hands out complete frames in arrival order.
///
/// Carriage returns are dropped on intake so `\r\n\r\n` delimits frames the
/// same way `\n\n` does. Bytes are only decoded as UTF-8 once a frame is
/// complete, so a multi-byte character split across chunks survives intact.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer
            .extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));

        let mut frames = Vec::new();
        let mut frame_start = 0;
        // A delimiter may straddle the previous chunk boundary.
        let mut search_from = self.scanned.saturating_sub(FRAME_DELIMITER.len() - 1);

        while let Some(offset) = find_delimiter(&self.buffer[search_from..]) {
            let frame_end = search_from + offset;
            let frame = trim_leading_newlines(&self.buffer[frame_start..frame_end]);
            if !frame.is_empty() {
                frames.push(String::from_utf8_lossy(frame).into_owned());
            }
            frame_start = frame_end + FRAME_DELIMITER.len();
            search_from = frame_start;
        }

        self.buffer.drain(..frame_start);
        self.scanned = self.buffer.len();
        frames
    }

    /// Bytes held back waiting for a delimiter.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Ends the stream, discarding any unterminated frame.
    ///
    /// Returns how many non-newline bytes were dropped.
    pub fn finish(&mut self) -> usize {
        let discarded = trim_leading_newlines(&self.buffer).len();
        self.buffer.clear();
        self.scanned = 0;
        discarded
    }
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(FRAME_DELIMITER.len())
        .position(|window| window == FRAME_DELIMITER)
}

fn trim_leading_newlines(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|byte| *byte != b'\n')
        .unwrap_or(bytes.len());
    &bytes[start..]
}
