use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

/// a chained byte buffer: cheap append/prepend of whole segments, front
/// drain, and an on-demand pullup into one contiguous slice.
///
/// bodies move through the filter chain as `ChainBuffer`s so that filters
/// can claim, buffer and re-inject data without copying every hop.
#[derive(Debug, Default)]
pub struct ChainBuffer {
    segments: VecDeque<Bytes>,
    len: usize,
}

impl ChainBuffer {
    pub fn new() -> Self {
        ChainBuffer {
            segments: VecDeque::new(),
            len: 0,
        }
    }

    pub fn from_bytes(bytes: Bytes) -> Self {
        let mut buf = ChainBuffer::new();
        buf.append(bytes);
        buf
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// append one segment to the back
    pub fn append(&mut self, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        self.len += bytes.len();
        self.segments.push_back(bytes);
    }

    pub fn append_slice(&mut self, slice: &[u8]) {
        self.append(Bytes::copy_from_slice(slice));
    }

    /// prepend one segment to the front
    pub fn prepend(&mut self, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        self.len += bytes.len();
        self.segments.push_front(bytes);
    }

    /// move every segment of `other` to the back of this buffer
    pub fn move_from(&mut self, other: &mut ChainBuffer) {
        self.len += other.len;
        other.len = 0;
        self.segments.append(&mut other.segments);
    }

    /// move every segment of `other` to the front of this buffer,
    /// preserving the order inside `other`
    pub fn prepend_from(&mut self, other: &mut ChainBuffer) {
        self.len += other.len;
        other.len = 0;
        while let Some(seg) = other.segments.pop_back() {
            self.segments.push_front(seg);
        }
    }

    /// discard `n` bytes from the front
    pub fn drain(&mut self, mut n: usize) {
        while n > 0 {
            let Some(front) = self.segments.front_mut() else {
                return;
            };
            if front.len() > n {
                let _ = front.split_to(n);
                self.len -= n;
                return;
            }
            n -= front.len();
            self.len -= front.len();
            self.segments.pop_front();
        }
    }

    /// coalesce into a single segment and return a view of it
    pub fn pullup(&mut self) -> &[u8] {
        if self.segments.len() > 1 {
            let mut merged = BytesMut::with_capacity(self.len);
            for seg in self.segments.drain(..) {
                merged.extend_from_slice(&seg);
            }
            self.segments.push_back(merged.freeze());
        }
        self.segments.front().map(|b| &b[..]).unwrap_or(&[])
    }

    /// take the whole content as one `Bytes`, leaving the buffer empty
    pub fn take_all(&mut self) -> Bytes {
        if self.segments.len() == 1 {
            self.len = 0;
            return self.segments.pop_front().unwrap_or_else(Bytes::new);
        }
        let mut merged = BytesMut::with_capacity(self.len);
        for seg in self.segments.drain(..) {
            merged.extend_from_slice(&seg);
        }
        self.len = 0;
        merged.freeze()
    }

    /// iterate the segments without coalescing
    pub fn chunks(&self) -> impl Iterator<Item = &Bytes> {
        self.segments.iter()
    }

    /// replace the whole content
    pub fn replace_with(&mut self, bytes: Bytes) {
        self.segments.clear();
        self.len = 0;
        self.append(bytes);
    }
}

impl From<Bytes> for ChainBuffer {
    fn from(bytes: Bytes) -> Self {
        ChainBuffer::from_bytes(bytes)
    }
}

impl From<&[u8]> for ChainBuffer {
    fn from(slice: &[u8]) -> Self {
        ChainBuffer::from_bytes(Bytes::copy_from_slice(slice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_prepend_preserve_order() {
        let mut buf = ChainBuffer::new();
        buf.append(Bytes::from_static(b"world"));
        buf.prepend(Bytes::from_static(b"hello "));
        assert_eq!(buf.len(), 11);
        assert_eq!(buf.pullup(), b"hello world");
    }

    #[test]
    fn drain_across_segment_boundaries() {
        let mut buf = ChainBuffer::new();
        buf.append(Bytes::from_static(b"abc"));
        buf.append(Bytes::from_static(b"defg"));
        buf.drain(5);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.pullup(), b"fg");
    }

    #[test]
    fn move_from_empties_the_source() {
        let mut a = ChainBuffer::from(&b"one "[..]);
        let mut b = ChainBuffer::from(&b"two"[..]);
        a.move_from(&mut b);
        assert!(b.is_empty());
        assert_eq!(a.pullup(), b"one two");
    }

    #[test]
    fn prepend_from_keeps_source_order() {
        let mut body = ChainBuffer::from(&b"tail"[..]);
        let mut held = ChainBuffer::new();
        held.append(Bytes::from_static(b"head-"));
        held.append(Bytes::from_static(b"mid-"));
        body.prepend_from(&mut held);
        assert_eq!(body.pullup(), b"head-mid-tail");
    }

    #[test]
    fn take_all_coalesces() {
        let mut buf = ChainBuffer::new();
        buf.append(Bytes::from_static(b"a"));
        buf.append(Bytes::from_static(b"b"));
        let all = buf.take_all();
        assert_eq!(&all[..], b"ab");
        assert!(buf.is_empty());
    }
}
