//! Growable append-only byte storage.

const INITIAL_CAPACITY: usize = 1024;

/// An append-only byte buffer that doubles its capacity when it runs out.
///
/// Used by the frame decoder to collect unmasked payload bytes as they arrive.
#[derive(Debug, Default)]
pub struct ByteAccumulator {
    data: Vec<u8>,
}

impl ByteAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    /// Create an accumulator with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Append `bytes`, doubling the capacity as often as needed.
    pub fn append(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.data.extend_from_slice(bytes);
    }

    /// Append a single byte.
    pub fn push(&mut self, byte: u8) {
        self.reserve(1);
        self.data.push(byte);
    }

    fn reserve(&mut self, additional: usize) {
        let needed = self.data.len() + additional;
        let mut capacity = self.data.capacity().max(INITIAL_CAPACITY);
        if needed <= self.data.capacity() {
            return;
        }
        while capacity < needed {
            capacity *= 2;
        }
        self.data.reserve_exact(capacity - self.data.len());
    }

    /// Number of bytes held.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current capacity.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// The bytes appended so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Take the contents, leaving the accumulator empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }
}
