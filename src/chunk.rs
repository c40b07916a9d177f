//! The windowed-view-over-a-buffer abstraction, split into two concrete
//! types instead of one mode-tagged one: [`ByteView`] is a read-only scan
//! over bytes that already live somewhere else, [`ByteChunk`] is a
//! growable buffer that spills to an output sink once appending it would
//! push past its configured limit.
//!
//! [`ByteChunk`]'s backing storage is always borrowed from the caller
//! rather than allocated here, so a connection that reuses one across a
//! keep-alive's worth of requests never reallocates past its first growth.

use crate::errors::ErrorKind;
use memchr::memchr;
use std::io::Write;

/// A read-only window over an existing byte slice. `start` only ever
/// advances as bytes are consumed; there is no resize and no sink.
pub(crate) struct ByteView<'a> {
    buf: &'a [u8],
    start: usize,
    end: usize,
}

impl<'a> ByteView<'a> {
    /// A window over `buf[off..off + len]`.
    pub(crate) fn set_view(buf: &'a [u8], off: usize, len: usize) -> Self {
        ByteView {
            buf,
            start: off,
            end: off + len,
        }
    }

    #[inline]
    fn window(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    pub(crate) fn len(&self) -> usize {
        self.end - self.start
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub(crate) fn find_byte(&self, needle: u8) -> Option<usize> {
        memchr(needle, self.window()).map(|i| self.start + i)
    }

    pub(crate) fn starts_with(&self, prefix: &[u8]) -> bool {
        self.window().starts_with(prefix)
    }

    pub(crate) fn equals_ignore_case_ascii(&self, other: &[u8]) -> bool {
        let w = self.window();
        w.len() == other.len() && w.iter().zip(other).all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    /// Pulls up to `dest.len()` bytes out of the remaining window,
    /// advancing `start`. Returns the number of bytes copied.
    pub(crate) fn substract(&mut self, dest: &mut [u8]) -> usize {
        let n = self.len().min(dest.len());
        dest[..n].copy_from_slice(&self.buf[self.start..self.start + n]);
        self.start += n;
        n
    }
}

/// A growable buffer bounded by `limit`, optionally backed by an output
/// sink it spills to once appending would push past that bound. `buf` is
/// always borrowed rather than owned: the one live caller
/// ([`server::connection`](crate::server::connection)) hands in its
/// per-connection scratch buffer, so repeated use across a keep-alive
/// connection's requests never reallocates once it has grown to its
/// working size.
pub(crate) struct ByteChunk<'a> {
    buf: &'a mut Vec<u8>,
    limit: usize,
    sink: Option<&'a mut dyn Write>,
}

impl<'a> ByteChunk<'a> {
    /// An empty chunk bounded by `limit`, over `buf` (cleared first).
    /// `sink` receives bytes once appending would otherwise exceed
    /// `limit`; with no sink, that instead fails with
    /// [`BufferOverflow`](ErrorKind::BufferOverflow).
    pub(crate) fn new(buf: &'a mut Vec<u8>, limit: usize, sink: Option<&'a mut dyn Write>) -> Self {
        buf.clear();
        ByteChunk {
            buf,
            limit: limit.max(1),
            sink,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Grows the backing buffer toward `limit` to make room for `want`
    /// more bytes, doubling capacity each step, never past `limit`.
    fn make_space(&mut self, want: usize) {
        let desired = (self.buf.len() + want).min(self.limit);
        if self.buf.capacity() < desired {
            let grown = (2 * self.buf.capacity()).max(desired);
            self.buf.reserve(grown - self.buf.len());
        }
    }

    fn sink_write(&mut self, data: &[u8]) -> Result<(), ErrorKind> {
        match &mut self.sink {
            Some(sink) => {
                sink.write_all(data)?;
                Ok(())
            }
            None => Err(ErrorKind::BufferOverflow),
        }
    }

    /// Pushes the buffered bytes to the sink and empties the buffer.
    /// Fails with [`BufferOverflow`](ErrorKind::BufferOverflow) when
    /// there is nothing to flush to.
    pub(crate) fn flush(&mut self) -> Result<(), ErrorKind> {
        if self.buf.is_empty() {
            return Ok(());
        }
        match &mut self.sink {
            Some(sink) => {
                sink.write_all(self.buf)?;
                self.buf.clear();
                Ok(())
            }
            None => Err(ErrorKind::BufferOverflow),
        }
    }

    /// Appends `src`: bypass straight to the sink when the chunk is empty
    /// and `src` exactly fills `limit`; otherwise grow toward `limit` and
    /// copy in; otherwise fill to `limit`, flush, and repeat, streaming
    /// any remainder that still exceeds one buffer's worth directly to
    /// the sink.
    pub(crate) fn append(&mut self, mut src: &[u8]) -> Result<(), ErrorKind> {
        if self.is_empty() && src.len() == self.limit && self.sink.is_some() {
            return self.sink_write(src);
        }

        while !src.is_empty() {
            self.make_space(src.len());
            let room = self.limit - self.buf.len();

            if room == 0 {
                self.flush()?;
                continue;
            }

            let take = src.len().min(room);
            self.buf.extend_from_slice(&src[..take]);
            src = &src[take..];

            if src.is_empty() {
                break;
            }

            self.flush()?;

            if src.len() >= self.limit {
                let whole = src.len() - src.len() % self.limit;
                self.sink_write(&src[..whole])?;
                src = &src[whole..];
            }
        }

        Ok(())
    }

    pub(crate) fn append_byte(&mut self, b: u8) -> Result<(), ErrorKind> {
        self.append(&[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_finds_byte_and_scans_prefix() {
        let v = ByteView::set_view(b"GET /foo HTTP/1.1", 0, 17);
        assert_eq!(v.find_byte(b' '), Some(3));
        assert!(v.starts_with(b"GET"));
        assert!(!v.starts_with(b"POST"));
    }

    #[test]
    fn view_equals_ignore_case_ascii() {
        let v = ByteView::set_view(b"Keep-Alive", 0, 10);
        assert!(v.equals_ignore_case_ascii(b"keep-alive"));
        assert!(!v.equals_ignore_case_ascii(b"close"));
    }

    #[test]
    fn view_substract_drains_forward() {
        let mut v = ByteView::set_view(b"hello world", 0, 11);
        let mut dest = [0u8; 5];
        assert_eq!(v.substract(&mut dest), 5);
        assert_eq!(&dest, b"hello");
        assert_eq!(v.len(), 6);
    }

    #[test]
    fn chunk_with_sink_buffers_until_full_then_flushes() {
        let mut backing = Vec::new();
        let mut sink = Vec::new();
        let mut chunk = ByteChunk::new(&mut backing, 8, Some(&mut sink));

        chunk.append(b"abcd").unwrap();
        assert!(sink.is_empty());
        chunk.append(b"efgh").unwrap();
        assert!(sink.is_empty());
        chunk.append(b"i").unwrap();
        assert_eq!(sink, b"abcdefgh");

        chunk.flush().unwrap();
        assert_eq!(sink, b"abcdefghi");
    }

    #[test]
    fn chunk_streams_oversized_append_directly_to_sink() {
        let mut backing = Vec::new();
        let mut sink = Vec::new();
        let mut chunk = ByteChunk::new(&mut backing, 4, Some(&mut sink));

        chunk.append(b"0123456789").unwrap();
        chunk.flush().unwrap();

        assert_eq!(sink, b"0123456789");
    }

    #[test]
    fn chunk_without_sink_overflows_instead_of_flushing() {
        let mut backing = Vec::new();
        let mut chunk = ByteChunk::new(&mut backing, 4, None);

        assert_eq!(chunk.append(b"abcd"), Ok(()));
        assert_eq!(chunk.append_byte(b'e'), Err(ErrorKind::BufferOverflow));
    }

    #[test]
    fn chunk_reuses_backing_buffer_across_instances() {
        let mut backing = Vec::with_capacity(16);
        {
            let mut sink = Vec::new();
            let mut chunk = ByteChunk::new(&mut backing, 8, Some(&mut sink));
            chunk.append(b"abcd").unwrap();
            chunk.flush().unwrap();
        }
        assert!(backing.capacity() >= 8);
        let cap_before = backing.capacity();
        {
            let mut sink = Vec::new();
            let mut chunk = ByteChunk::new(&mut backing, 8, Some(&mut sink));
            chunk.append(b"wxyz").unwrap();
            chunk.flush().unwrap();
        }
        assert_eq!(backing.capacity(), cap_before);
    }
}
