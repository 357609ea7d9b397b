//! Line-oriented accounting over the written byte stream.
//!
//! Three bounded structures, all implemented as plain arrays with
//! head/length bookkeeping:
//! - [`LinePositions`] — output byte offsets of recent delimiters, used
//!   to convert pipe back-pressure (bytes) into lines.
//! - [`TailBuffer`] — the most recent output bytes for the
//!   last-written display component.
//! - [`LineTracker`] — delimiter counting plus previous/in-flight line
//!   capture, driven once per written chunk.

/// Capacity of the delimiter-position ring.
pub const MAX_LINE_POSITIONS: usize = 100_000;

/// Longest previous-line capture.
pub const MAX_PREVIOUS_LINE: usize = 1024;

// ---------------------------------------------------------------------------
// Delimiter position ring
// ---------------------------------------------------------------------------

/// Circular array of output byte positions of recently written line
/// terminators, newest last.
#[derive(Debug)]
pub struct LinePositions {
    ring: Vec<u64>,
    head: usize,
    len: usize,
}

impl Default for LinePositions {
    fn default() -> Self {
        LinePositions {
            ring: Vec::new(),
            head: 0,
            len: 0,
        }
    }
}

impl LinePositions {
    pub fn push(&mut self, pos: u64) {
        if self.ring.is_empty() {
            self.ring = vec![0; MAX_LINE_POSITIONS];
        }
        self.ring[self.head] = pos;
        self.head = (self.head + 1) % self.ring.len();
        if self.len < self.ring.len() {
            self.len += 1;
        }
    }

    /// Number of recorded delimiters with output position strictly
    /// greater than `boundary`, walking backwards from the newest.
    pub fn count_after(&self, boundary: u64) -> u64 {
        let cap = self.ring.len();
        let mut count = 0;
        for i in 0..self.len {
            let idx = (self.head + cap - 1 - i) % cap;
            if self.ring[idx] > boundary {
                count += 1;
            } else {
                break;
            }
        }
        count
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// ---------------------------------------------------------------------------
// Last-written tail
// ---------------------------------------------------------------------------

/// Keeps the final `cap` bytes that passed through the output.
#[derive(Debug, Default)]
pub struct TailBuffer {
    buf: Vec<u8>,
    cap: usize,
}

impl TailBuffer {
    pub fn new(cap: usize) -> Self {
        TailBuffer {
            buf: Vec::with_capacity(cap),
            cap,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        if self.cap == 0 {
            return;
        }
        if data.len() >= self.cap {
            self.buf.clear();
            self.buf.extend_from_slice(&data[data.len() - self.cap..]);
            return;
        }
        let overflow = (self.buf.len() + data.len()).saturating_sub(self.cap);
        if overflow > 0 {
            self.buf.drain(..overflow);
        }
        self.buf.extend_from_slice(data);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

// ---------------------------------------------------------------------------
// Line tracker
// ---------------------------------------------------------------------------

/// Observes every written chunk: counts delimiters, records their
/// output positions, and (when enabled) maintains the last-written tail
/// and the previous / in-flight line buffers.
#[derive(Debug)]
pub struct LineTracker {
    delimiter: u8,
    /// Output byte position of the next byte to be observed.
    output_pos: u64,
    positions: LinePositions,
    track_positions: bool,
    tail: TailBuffer,
    track_lines: bool,
    prev_line: Vec<u8>,
    current_line: Vec<u8>,
}

impl LineTracker {
    /// `delimiter` is `\n` or NUL. `track_positions` enables the
    /// position ring (line mode), `tail_cap` the last-written tail
    /// (0 = off), `track_lines` the previous-line capture.
    pub fn new(delimiter: u8, track_positions: bool, tail_cap: usize, track_lines: bool) -> Self {
        LineTracker {
            delimiter,
            output_pos: 0,
            positions: LinePositions::default(),
            track_positions,
            tail: TailBuffer::new(tail_cap),
            track_lines,
            prev_line: Vec::new(),
            current_line: Vec::new(),
        }
    }

    /// Observes one written chunk; returns the number of delimiters in
    /// it.
    pub fn observe(&mut self, data: &[u8]) -> u64 {
        let mut delims = 0u64;
        if self.track_positions || self.track_lines {
            for (i, &b) in data.iter().enumerate() {
                if b == self.delimiter {
                    delims += 1;
                    if self.track_positions {
                        self.positions.push(self.output_pos + i as u64 + 1);
                    }
                    if self.track_lines {
                        self.prev_line = std::mem::take(&mut self.current_line);
                    }
                } else if self.track_lines && self.current_line.len() < MAX_PREVIOUS_LINE {
                    self.current_line.push(b);
                }
            }
        } else {
            delims = data.iter().filter(|&&b| b == self.delimiter).count() as u64;
        }
        self.tail.extend(data);
        self.output_pos += data.len() as u64;
        delims
    }

    /// Adjusts what is tracked after a remote format change. The tail
    /// is rebuilt when its capacity changes; captured lines persist.
    pub fn configure(&mut self, tail_cap: usize, track_lines: bool) {
        if self.tail.cap != tail_cap {
            let mut tail = TailBuffer::new(tail_cap);
            tail.extend(self.tail.as_bytes());
            self.tail = tail;
        }
        self.track_lines = track_lines;
    }

    /// Total output bytes observed so far.
    pub fn output_pos(&self) -> u64 {
        self.output_pos
    }

    /// Converts an amount of not-yet-consumed output bytes into the
    /// number of whole lines still sitting in the pipe.
    pub fn lines_after(&self, consumed_pos: u64) -> u64 {
        self.positions.count_after(consumed_pos)
    }

    pub fn last_written(&self) -> &[u8] {
        self.tail.as_bytes()
    }

    pub fn previous_line(&self) -> &[u8] {
        &self.prev_line
    }
}
