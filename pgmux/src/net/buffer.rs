//! Per-channel byte buffer.
//!
//! Bytes read from a channel's socket accumulate here until whole
//! messages are available. Complete messages are staged for the peer,
//! which drains them from the write cursor. Layout:
//!
//! ```text
//! 0          write_cursor        staged           filled        capacity
//! |---sent-----|-----pending------|----partial------|-----spare-----|
//! ```

/// Initial buffer size.
pub const INIT_BUF_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct Buffer {
    data: Vec<u8>,
    filled: usize,
    write_cursor: usize,
    staged: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new(INIT_BUF_SIZE)
    }
}

impl Buffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity.max(super::frame::HEADER_SIZE)],
            filled: 0,
            write_cursor: 0,
            staged: 0,
        }
    }

    /// Buffer capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes received so far.
    #[inline]
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    #[inline]
    pub fn filled_len(&self) -> usize {
        self.filled
    }

    /// Space available for the next read.
    #[inline]
    pub fn spare(&mut self) -> &mut [u8] {
        &mut self.data[self.filled..]
    }

    /// Record bytes written into [`Buffer::spare`].
    #[inline]
    pub fn advance(&mut self, n: usize) {
        self.filled = (self.filled + n).min(self.data.len());
    }

    /// Grow the buffer so it holds at least `size` bytes.
    /// Never shrinks and never touches buffered data.
    pub fn grow_to(&mut self, size: usize) {
        if size > self.data.len() {
            self.data.resize(size, 0);
        }
    }

    /// End of the bytes handed to the peer.
    #[inline]
    pub fn staged(&self) -> usize {
        self.staged
    }

    /// Hand everything up to `end` to the peer.
    pub fn stage(&mut self, end: usize) {
        self.staged = end.min(self.filled).max(self.write_cursor);
    }

    /// Number of staged bytes the peer hasn't written yet.
    #[inline]
    pub fn pending(&self) -> usize {
        self.staged - self.write_cursor
    }

    /// Staged bytes the peer hasn't written yet.
    #[inline]
    pub fn unsent(&self) -> &[u8] {
        &self.data[self.write_cursor..self.staged]
    }

    /// The peer wrote `n` bytes.
    #[inline]
    pub fn sent(&mut self, n: usize) {
        self.write_cursor = (self.write_cursor + n).min(self.staged);
    }

    /// Discard everything that was sent and move the
    /// partial message that follows to the front.
    pub fn compact(&mut self) {
        let sent = self.write_cursor;
        if sent > 0 {
            self.data.copy_within(sent..self.filled, 0);
            self.filled -= sent;
            self.staged -= sent;
            self.write_cursor = 0;
        }
    }

    /// Remove the first `n` unstaged bytes, e.g. a startup packet
    /// that is answered by the engine instead of being forwarded.
    pub fn consume(&mut self, n: usize) {
        debug_assert_eq!(self.pending(), 0);
        let n = n.min(self.filled);
        self.data.copy_within(n..self.filled, 0);
        self.filled -= n;
        self.write_cursor = 0;
        self.staged = 0;
    }

    /// Replace `start..end` with `replacement`, shifting whatever follows.
    pub fn splice(&mut self, start: usize, end: usize, replacement: &[u8]) {
        let end = end.min(self.filled);
        let start = start.min(end);
        let tail = self.filled - end;
        let new_end = start + replacement.len();

        self.grow_to(new_end + tail);
        self.data.copy_within(end..end + tail, new_end);
        self.data[start..new_end].copy_from_slice(replacement);
        self.filled = new_end + tail;
    }

    /// Replace the contents with `bytes`, all of them staged for the peer.
    pub fn load(&mut self, bytes: &[u8]) {
        self.grow_to(bytes.len());
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.filled = bytes.len();
        self.write_cursor = 0;
        self.staged = bytes.len();
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.filled = 0;
        self.write_cursor = 0;
        self.staged = 0;
    }
}
