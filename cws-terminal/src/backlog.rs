//! Bounded buffer for output produced while no transport is bound.

use std::collections::VecDeque;

/// Ring buffer of decoded output chunks, capped in bytes.
///
/// When full, the oldest output is evicted first. Evicted bytes are counted
/// so the loss can be reported on replay.
#[derive(Debug)]
pub struct OutputBacklog {
    chunks: VecDeque<String>,
    len: usize,
    capacity: usize,
    dropped: usize,
}

impl OutputBacklog {
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            len: 0,
            capacity,
            dropped: 0,
        }
    }

    pub fn push(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        let text = if text.len() > self.capacity {
            // Keep the newest bytes, cut on a char boundary.
            let mut start = text.len() - self.capacity;
            while !text.is_char_boundary(start) {
                start += 1;
            }
            self.dropped += start;
            text[start..].to_string()
        } else {
            text
        };

        while self.len + text.len() > self.capacity {
            match self.chunks.pop_front() {
                Some(old) => {
                    self.len -= old.len();
                    self.dropped += old.len();
                }
                None => break,
            }
        }

        if !text.is_empty() {
            self.len += text.len();
            self.chunks.push_back(text);
        }
    }

    /// Take everything buffered, oldest first, and the number of bytes lost
    /// since the last drain.
    pub fn drain(&mut self) -> (Vec<String>, usize) {
        self.len = 0;
        let dropped = std::mem::take(&mut self.dropped);
        (self.chunks.drain(..).collect(), dropped)
    }

    /// Oldest buffered chunk.
    pub fn pop_front(&mut self) -> Option<String> {
        let chunk = self.chunks.pop_front()?;
        self.len -= chunk.len();
        Some(chunk)
    }

    /// Put back a chunk just taken with [`pop_front`](Self::pop_front).
    pub fn requeue(&mut self, chunk: String) {
        self.len += chunk.len();
        self.chunks.push_front(chunk);
    }

    /// Bytes evicted since the last call.
    pub fn take_dropped(&mut self) -> usize {
        std::mem::take(&mut self.dropped)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }
}
