/// Fixed-capacity circular buffer. `head` is the most recently committed slot.
#[derive(Debug, Clone)]
pub(crate) struct Ring<T> {
    slots: Vec<T>,
    head: usize,
}

impl<T> Ring<T> {
    /// `len` must be non-zero; constructors validate before building rings.
    pub(crate) fn new(len: usize, fill: impl FnMut() -> T) -> Self {
        debug_assert!(len > 0, "ring capacity must be non-zero");
        let slots: Vec<T> = std::iter::repeat_with(fill).take(len).collect();
        Self {
            head: slots.len() - 1,
            slots,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Moves the cursor forward and returns the slot it now points at (the oldest one).
    pub(crate) fn advance(&mut self) -> &mut T {
        self.head = (self.head + 1) % self.slots.len();
        &mut self.slots[self.head]
    }

    pub(crate) fn head(&self) -> &T {
        &self.slots[self.head]
    }

    pub(crate) fn head_mut(&mut self) -> &mut T {
        &mut self.slots[self.head]
    }

    /// Slot `n` positions behind the head; `back(0)` is the head. Wraps around.
    pub(crate) fn back(&self, n: usize) -> &T {
        let len = self.slots.len();
        &self.slots[(self.head + len - n % len) % len]
    }

    /// Every slot, newest first.
    pub(crate) fn iter_newest(&self) -> impl Iterator<Item = &T> {
        (0..self.slots.len()).map(move |n| self.back(n))
    }

    /// Every slot, oldest first.
    pub(crate) fn iter_oldest(&self) -> impl Iterator<Item = &T> {
        (0..self.slots.len()).rev().map(move |n| self.back(n))
    }
}
