use bytes::{Buf, Bytes, BytesMut};

/// Growable byte buffer with cheap prefix removal.
///
/// Backs the per-socket write queue and the framing filter's assembly buffer.
#[derive(Debug, Default)]
pub struct ByteQueue {
    buf: BytesMut,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Contiguous view of everything queued.
    pub fn chunk(&self) -> &[u8] {
        &self.buf
    }

    /// Drops the first `n` bytes.
    pub fn consume(&mut self, n: usize) {
        self.buf.advance(n);
    }

    /// Splits off the first `n` bytes as an owned, immutable chunk.
    pub fn take_front(&mut self, n: usize) -> Bytes {
        self.buf.split_to(n).freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_consume() {
        let mut queue = ByteQueue::new();
        queue.push(b"hello ");
        queue.push(b"world");
        assert_eq!(queue.len(), 11);

        queue.consume(6);
        assert_eq!(queue.chunk(), b"world");

        queue.consume(5);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_take_front_leaves_remainder() {
        let mut queue = ByteQueue::with_capacity(16);
        queue.push(b"PINGPO");
        let frame = queue.take_front(4);
        assert_eq!(&frame[..], b"PING");
        assert_eq!(queue.chunk(), b"PO");

        queue.clear();
        assert_eq!(queue.len(), 0);
    }
}
