//! Per-call accumulator for expect matching.
//!
//! Only the region that can hold a new match is searched after each
//! chunk: the fresh bytes plus `needle.len() - 1` bytes before them, so a
//! match straddling two chunks is still found without rescanning the
//! whole buffer.

use memchr::memmem::Finder;

/// Accumulates shell output for one expect call and looks for a literal needle.
#[derive(Debug)]
pub struct ExpectBuffer {
    finder: Finder<'static>,

    /// Everything received since the call started.
    buffer: Vec<u8>,

    /// Offset where the next search begins.
    search_from: usize,

    /// End offset of the match, once found.
    matched_at: Option<usize>,
}

impl ExpectBuffer {
    /// Create an empty buffer looking for `needle`.
    pub fn new(needle: &[u8]) -> Self {
        Self {
            finder: Finder::new(needle).into_owned(),
            buffer: Vec::with_capacity(4096),
            search_from: 0,
            matched_at: None,
        }
    }

    /// Append a chunk and report whether the needle is now present.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        if self.matched_at.is_some() {
            return true;
        }

        self.buffer.extend_from_slice(chunk);

        if let Some(pos) = self.finder.find(&self.buffer[self.search_from..]) {
            self.matched_at = Some(self.search_from + pos + self.needle_len());
            return true;
        }

        let overlap = self.needle_len().saturating_sub(1);
        self.search_from = self.buffer.len().saturating_sub(overlap);
        false
    }

    /// Whether the needle has been seen.
    pub fn is_matched(&self) -> bool {
        self.matched_at.is_some()
    }

    /// Output up to and including the match, or everything if unmatched.
    pub fn consumed(&self) -> &[u8] {
        match self.matched_at {
            Some(end) => &self.buffer[..end],
            None => &self.buffer,
        }
    }

    /// Get the buffer contents as a string (lossy UTF-8 conversion).
    pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.buffer)
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn needle_len(&self) -> usize {
        self.finder.needle().len()
    }
}
