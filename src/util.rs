//! Buffer types shared by the stream engine and the codecs.

/// Cursor over a borrowed slice, tracking how much of it has been used.
///
/// Codecs receive their input and output through this so the caller can see afterwards how
/// many bytes were consumed and produced.
#[derive(Debug)]
pub struct PartialBuffer<B: AsRef<[u8]>> {
    buffer: B,
    index: usize,
}

impl<B: AsRef<[u8]>> PartialBuffer<B> {
    /// Create a new [`PartialBuffer`] from the given underlying buffer.
    pub fn new(buffer: B) -> Self {
        Self { buffer, index: 0 }
    }

    /// Used part of the buffer.
    pub fn written(&self) -> &[u8] {
        &self.buffer.as_ref()[..self.index]
    }

    /// Unused part of the buffer.
    pub fn unwritten(&self) -> &[u8] {
        &self.buffer.as_ref()[self.index..]
    }

    /// Advance the used part.
    pub fn advance(&mut self, amount: usize) {
        self.index += amount;
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> PartialBuffer<B> {
    /// Mutable reference to the unused part of the buffer.
    pub fn unwritten_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[self.index..]
    }
}

/// Growable byte buffer with a consumed/filled window.
///
/// The bytes in `[skip, pos)` are the ones available to the consumer, `[0, skip)` were already
/// consumed but are kept around so short backwards seeks can be served without re-reading, and
/// `[pos, capacity)` is free space for the next read. `skip <= pos <= capacity` always holds.
#[derive(Debug, Default)]
pub struct WindowBuffer {
    data: Vec<u8>,
    skip: usize,
    pos: usize,
}

impl WindowBuffer {
    /// Creates an empty buffer, nothing is allocated until it is first grown.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total size of the allocation.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of consumed bytes still retained in front of the window.
    pub fn skip(&self) -> usize {
        self.skip
    }

    /// End of the filled region.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Bytes that are filled but not consumed yet.
    pub fn available(&self) -> &[u8] {
        &self.data[self.skip..self.pos]
    }

    /// Length of [`available`](Self::available).
    pub fn available_len(&self) -> usize {
        self.pos - self.skip
    }

    /// Room left after the filled region.
    pub fn free_len(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Marks `amount` available bytes as consumed.
    pub fn consume(&mut self, amount: usize) {
        assert!(amount <= self.available_len(), "consumed past the filled window");
        self.skip += amount;
    }

    /// Moves the consumed cursor anywhere inside the filled region, forwards or backwards.
    pub fn set_skip(&mut self, skip: usize) {
        assert!(skip <= self.pos, "moved past the filled window");
        self.skip = skip;
    }

    /// Free space after the filled region, to be written by the next read.
    pub fn unfilled_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.pos..]
    }

    /// Marks `amount` bytes written into [`unfilled_mut`](Self::unfilled_mut) as filled.
    pub fn fill(&mut self, amount: usize) {
        assert!(amount <= self.free_len(), "filled past the buffer capacity");
        self.pos += amount;
    }

    /// Copies as much of `input` as fits into the free space, returning the copied length.
    pub fn fill_from(&mut self, input: &[u8]) -> usize {
        let len = input.len().min(self.free_len());
        self.data[self.pos..self.pos + len].copy_from_slice(&input[..len]);
        self.pos += len;
        len
    }

    /// Drops the consumed region `[0, skip)`, moving the available bytes to the front.
    pub fn compress(&mut self) {
        if self.skip == 0 {
            return;
        }
        self.data.copy_within(self.skip..self.pos, 0);
        self.pos -= self.skip;
        self.skip = 0;
    }

    /// Grows the capacity by at least `bytes`, never past `max`.
    ///
    /// Returns `false` if the buffer was already at `max`.
    pub fn grow(&mut self, bytes: usize, max: usize) -> bool {
        let capacity = self.data.len();
        if capacity >= max {
            return false;
        }
        let wanted = capacity.saturating_add(bytes).max(1);
        let new_capacity = wanted
            .checked_next_power_of_two()
            .unwrap_or(usize::MAX)
            .min(max);
        self.data.resize(new_capacity, 0);
        true
    }

    /// Moves both cursors to `skip`, hiding the filled bytes after it.
    ///
    /// Returns the previous end of the filled region so that it can be handed back to
    /// [`restore`](Self::restore): the hidden bytes stay in memory untouched as long as nothing
    /// is filled in between.
    pub fn rewind_to(&mut self, skip: usize) -> usize {
        assert!(skip <= self.pos, "rewound past the filled window");
        let high_pos = self.pos;
        self.skip = skip;
        self.pos = skip;
        high_pos
    }

    /// Re-exposes bytes hidden by [`rewind_to`](Self::rewind_to).
    pub fn restore(&mut self, high_pos: usize) {
        assert!(
            self.pos <= high_pos && high_pos <= self.data.len(),
            "restored an invalid high-water mark"
        );
        self.pos = high_pos;
    }

    /// Empties the window while keeping the allocation.
    pub fn clear(&mut self) {
        self.skip = 0;
        self.pos = 0;
    }
}
