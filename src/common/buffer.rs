use std::collections::VecDeque;

/// Growable byte queue used for a connection's input and output sides.
#[derive(Debug)]
pub struct Buffer {
    data: VecDeque<u8>,
}

impl Buffer {
    pub fn new() -> Self {
        Self {
            data: VecDeque::new(),
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend(bytes.iter().copied());
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Readable bytes as one slice, without consuming them.
    pub fn peek(&mut self) -> &[u8] {
        self.data.make_contiguous()
    }

    /// Discard the first `n` readable bytes.
    pub fn consume(&mut self, n: usize) {
        self.data.drain(..n.min(self.data.len()));
    }

    pub fn retrieve_all(&mut self) -> Vec<u8> {
        self.data.drain(..).collect()
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}
