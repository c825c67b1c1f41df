// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Wrapping cursor arithmetic for the circular data area.
//
// A cursor is an absolute byte offset into the mapped region that always lies
// in `[offset, top]`. All wrap and distance computations live here so they
// can be checked without mapping any shared memory.

use std::ops::Range;

/// An absolute, wrapping position inside a [`DataArea`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(pub u64);

impl Cursor {
    pub fn offset(self) -> usize {
        self.0 as usize
    }
}

/// The circular data area: `len` bytes starting at region offset `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataArea {
    offset: usize,
    len: usize,
}

impl DataArea {
    /// `len` must be non-zero.
    pub fn new(offset: usize, len: usize) -> Self {
        debug_assert!(len > 0, "data area must not be empty");
        Self { offset, len }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Last valid byte offset of the area.
    pub fn top(&self) -> usize {
        self.offset + self.len - 1
    }

    /// The initial cursor every client starts at after formatting.
    pub fn start(&self) -> Cursor {
        Cursor(self.offset as u64)
    }

    pub fn contains(&self, c: Cursor) -> bool {
        let o = c.offset();
        o >= self.offset && o <= self.top()
    }

    /// Move `c` forward by `n` bytes, wrapping past `top` back to `offset`.
    pub fn advance(&self, c: Cursor, n: usize) -> Cursor {
        let rel = (c.offset() - self.offset + n % self.len) % self.len;
        Cursor((self.offset + rel) as u64)
    }

    /// Forward distance from `from` to `to`, modulo the area length.
    /// Equal cursors are distance 0.
    pub fn distance(&self, from: Cursor, to: Cursor) -> usize {
        let f = from.offset() - self.offset;
        let t = to.offset() - self.offset;
        if t >= f {
            t - f
        } else {
            self.len - f + t
        }
    }

    /// Bytes a consumer at `consumer` can read when the producer is at `producer`.
    pub fn get_space(&self, consumer: Cursor, producer: Cursor) -> usize {
        self.distance(consumer, producer)
    }

    /// Bytes the producer may write given the consumer furthest behind it.
    ///
    /// One byte is always held back so that equal cursors mean "empty", never
    /// "full".
    pub fn put_space(&self, max_consumer_lag: usize) -> usize {
        self.len - 1 - max_consumer_lag.min(self.len - 1)
    }

    /// The (at most two) contiguous region ranges covering `n` bytes from `c`.
    /// The second range is empty unless the span wraps.
    pub fn segments(&self, c: Cursor, n: usize) -> [Range<usize>; 2] {
        debug_assert!(n <= self.len);
        let start = c.offset();
        let until_top = self.top() + 1 - start;
        if n <= until_top {
            [start..start + n, self.offset..self.offset]
        } else {
            [start..self.top() + 1, self.offset..self.offset + (n - until_top)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area() -> DataArea {
        DataArea::new(4096, 100)
    }

    #[test]
    fn advance_wraps_at_top() {
        let a = area();
        assert_eq!(a.top(), 4195);
        assert_eq!(a.advance(a.start(), 10), Cursor(4106));
        assert_eq!(a.advance(Cursor(4195), 1), Cursor(4096));
        assert_eq!(a.advance(Cursor(4190), 20), Cursor(4110));
        assert_eq!(a.advance(a.start(), 100), a.start());
    }

    #[test]
    fn distance_is_modular() {
        let a = area();
        assert_eq!(a.distance(Cursor(4100), Cursor(4100)), 0);
        assert_eq!(a.distance(Cursor(4100), Cursor(4150)), 50);
        assert_eq!(a.distance(Cursor(4150), Cursor(4100)), 50);
        assert_eq!(a.distance(Cursor(4195), Cursor(4096)), 1);
    }

    #[test]
    fn put_space_reserves_one_byte() {
        let a = area();
        assert_eq!(a.put_space(0), 99);
        assert_eq!(a.put_space(99), 0);
        assert_eq!(a.put_space(40), 59);
    }

    #[test]
    fn full_ring_never_looks_empty() {
        let a = area();
        let consumer = a.start();
        let producer = a.advance(consumer, a.put_space(0));
        assert_ne!(producer, consumer);
        assert_eq!(a.get_space(consumer, producer), 99);
        assert_eq!(a.put_space(a.get_space(consumer, producer)), 0);
    }

    #[test]
    fn segments_split_on_wrap() {
        let a = area();
        let [first, second] = a.segments(Cursor(4100), 20);
        assert_eq!(first, 4100..4120);
        assert!(second.is_empty());

        let [first, second] = a.segments(Cursor(4190), 20);
        assert_eq!(first, 4190..4196);
        assert_eq!(second, 4096..4110);
        assert_eq!(first.len() + second.len(), 20);
    }

    #[test]
    fn segments_end_exactly_at_top() {
        let a = area();
        let [first, second] = a.segments(Cursor(4186), 10);
        assert_eq!(first, 4186..4196);
        assert!(second.is_empty());
        assert_eq!(a.advance(Cursor(4186), 10), a.start());
    }
}
