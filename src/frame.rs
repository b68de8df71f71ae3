//! Frame extraction from the raw meter byte stream.
//!
//! The meter pushes SML transmissions framed by an escape sequence. Only the
//! framing is recognised here; everything between the markers is opaque.

use tracing::{debug, warn};

/// Escape sequence followed by the version 1 begin marker
pub const START_MARKER: [u8; 8] = [0x1B, 0x1B, 0x1B, 0x1B, 0x01, 0x01, 0x01, 0x01];
/// Escape sequence followed by the end-of-message marker
pub const END_MARKER: [u8; 5] = [0x1B, 0x1B, 0x1B, 0x1B, 0x1A];

/// One complete start..=end delimited transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lowercase hex rendering, handy for logging raw telegrams.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

pub struct FrameExtractor {
    buf: Vec<u8>,
    max_frame_bytes: usize,
    dropped_frames: u64,
}

impl FrameExtractor {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::with_capacity(512),
            max_frame_bytes: max_frame_bytes.max(START_MARKER.len() + END_MARKER.len()),
            dropped_frames: 0,
        }
    }

    /// Push one byte; returns a frame once its end marker has been received.
    pub fn feed(&mut self, byte: u8) -> Option<Frame> {
        self.buf.push(byte);

        // A fresh start marker always wins over whatever came before it,
        // including a frame that was cut off mid-transmission.
        if self.buf.len() > START_MARKER.len() && self.buf.ends_with(&START_MARKER) {
            let skip = self.buf.len() - START_MARKER.len();
            if self.in_frame() {
                self.dropped_frames += 1;
                debug!(discarded = skip, "truncated frame superseded by new start marker");
            }
            self.buf.drain(..skip);
        }

        if !self.in_frame() {
            self.keep_marker_tail();
            return None;
        }

        if self.buf.len() >= START_MARKER.len() + END_MARKER.len() && self.buf.ends_with(&END_MARKER)
        {
            let frame = Frame(std::mem::take(&mut self.buf));
            debug!(len = frame.len(), "frame complete");
            return Some(frame);
        }

        if self.buf.len() > self.max_frame_bytes {
            self.dropped_frames += 1;
            warn!(
                limit = self.max_frame_bytes,
                "frame exceeded size limit without end marker; resynchronising"
            );
            // The next start marker may already be arriving across the cap.
            self.keep_marker_tail();
        }

        None
    }

    /// Feed a chunk, collecting every frame it completes.
    pub fn feed_slice(&mut self, bytes: &[u8]) -> Vec<Frame> {
        bytes.iter().filter_map(|b| self.feed(*b)).collect()
    }

    /// Bytes currently held while waiting for a frame to complete
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Partial frames discarded through truncation or overflow
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    fn in_frame(&self) -> bool {
        self.buf.starts_with(&START_MARKER)
    }

    /// Drop everything except what could still be a start marker prefix.
    fn keep_marker_tail(&mut self) {
        let keep = START_MARKER.len() - 1;
        if self.buf.len() > keep {
            let excess = self.buf.len() - keep;
            self.buf.drain(..excess);
        }
    }
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new(8192)
    }
}
