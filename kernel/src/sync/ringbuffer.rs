//! Fixed-size ring buffer for device input.
//!
//! Both the console input ring and the io event queue live inside the
//! kernel state, so every access already happens under the big kernel
//! lock and the buffer itself needs no atomics.
//!
//! ```text
//!    tail               head
//!     ▼                   ▼
//!   ┌───┬───┬───┬───┬───┬───┬───┬───┐
//!   │   │ A │ B │ C │ D │   │   │   │   N = 8
//!   └───┴───┴───┴───┴───┴───┴───┴───┘
//!     pop()             push()
//! ```

pub struct RingBuffer<T: Copy + Default, const N: usize> {
    buf: [T; N],
    /// next free slot
    head: usize,
    /// oldest unread element
    tail: usize,
    len: usize,
}

impl<T: Copy + Default, const N: usize> RingBuffer<T, N> {
    pub fn new() -> Self {
        Self {
            buf: [T::default(); N],
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == N
    }

    /// Append `value`; returns `false` and drops it when the buffer is full.
    pub fn push(&mut self, value: T) -> bool {
        if self.is_full() {
            return false;
        }
        self.buf[self.head] = value;
        self.head = (self.head + 1) % N;
        self.len += 1;
        true
    }

    /// Append `value`, discarding the oldest element when full.
    pub fn push_overwrite(&mut self, value: T) {
        if self.is_full() {
            self.pop();
        }
        self.push(value);
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let value = self.buf[self.tail];
        self.tail = (self.tail + 1) % N;
        self.len -= 1;
        Some(value)
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }
}

impl<T: Copy + Default, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
