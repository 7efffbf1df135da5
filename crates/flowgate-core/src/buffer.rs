//! Fixed-capacity byte sink
//!
//! A write either fits entirely or is refused; the buffer never truncates
//! and never grows past its capacity. Backing storage is reserved on
//! demand, so an idle exchange does not pin `capacity` bytes.

use crate::error::BufferOverflow;

/// Bounded byte buffer used for request and response bodies
#[derive(Debug, Clone)]
pub struct BoundedBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl BoundedBuffer {
    /// Create an empty buffer that will hold at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity,
        }
    }

    /// Adopt an already-buffered body without copying
    ///
    /// Fails (handing the body back) when it exceeds `capacity`.
    pub fn from_vec(body: Vec<u8>, capacity: usize) -> Result<Self, Vec<u8>> {
        if body.len() > capacity {
            return Err(body);
        }
        Ok(Self { data: body, capacity })
    }

    /// Append all of `bytes`, or nothing
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), BufferOverflow> {
        let attempted = self.data.len() + bytes.len();
        if attempted > self.capacity {
            return Err(BufferOverflow {
                capacity: self.capacity,
                attempted,
            });
        }
        if self.data.capacity() < attempted {
            self.data.reserve_exact(attempted - self.data.len());
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes that can still be written
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Discard contents, keeping capacity limit and storage
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Move the contents out, leaving the buffer empty
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }
}

impl AsRef<[u8]> for BoundedBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_up_to_capacity() {
        let mut buf = BoundedBuffer::new(8);
        buf.write(b"abcd").unwrap();
        buf.write(b"efgh").unwrap();
        assert_eq!(buf.as_slice(), b"abcdefgh");
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_overflow_is_all_or_nothing() {
        let mut buf = BoundedBuffer::new(5);
        buf.write(b"abc").unwrap();
        let err = buf.write(b"def").unwrap_err();
        assert_eq!(err, BufferOverflow { capacity: 5, attempted: 6 });
        // Nothing from the rejected write landed
        assert_eq!(buf.as_slice(), b"abc");
    }

    #[test]
    fn test_from_vec() {
        let buf = BoundedBuffer::from_vec(b"hello".to_vec(), 5).unwrap();
        assert_eq!(buf.len(), 5);

        let body = BoundedBuffer::from_vec(b"hello!".to_vec(), 5).unwrap_err();
        assert_eq!(body, b"hello!");
    }

    #[test]
    fn test_take_and_clear() {
        let mut buf = BoundedBuffer::new(16);
        buf.write(b"xyz").unwrap();
        assert_eq!(buf.take(), b"xyz");
        assert!(buf.is_empty());
        buf.write(b"q").unwrap();
        buf.clear();
        assert_eq!(buf.remaining(), 16);
    }
}
