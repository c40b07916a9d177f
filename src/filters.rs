//! The filter chain contract: input filters decode a request body out of
//! the raw bytes the parser buffered, output filters frame a response body
//! for the wire. Each filter owns whatever state it needs across calls
//! (a remaining-length counter, a chunk-size state machine) and `end()`
//! drains/finalizes so the next request on the same connection starts from
//! a clean boundary (the piece that matters for pipelining).

use crate::errors::ErrorKind;
use flate2::{write::GzEncoder, Compression};
use memchr::memchr;
use std::{io::Write, str};

/// Decodes a request body already sitting in a byte slice.
pub(crate) trait InputFilter {
    /// Consumes as much of `raw` as this filter's framing allows and
    /// returns the decoded bytes. May borrow directly from `raw` (identity,
    /// content-length) or from an internal accumulator (chunked).
    fn do_read<'a>(&mut self, raw: &'a [u8]) -> Result<&'a [u8], ErrorKind>;

    /// Called once after the last `do_read`; validates the body was fully
    /// framed (e.g. a content-length filter checks `remaining == 0`).
    fn end(&mut self) -> Result<(), ErrorKind> {
        Ok(())
    }
}

/// Frames a response body for the wire.
pub(crate) trait OutputFilter {
    /// Transforms `data` (the body bytes the handler produced) into the
    /// wire representation, writing the result into `out`.
    fn do_write(&mut self, data: &[u8], out: &mut Vec<u8>) -> Result<(), ErrorKind>;

    /// Appends whatever trailer the framing needs (the chunked terminator;
    /// nothing for identity/void).
    fn end(&mut self, _out: &mut Vec<u8>) -> Result<(), ErrorKind> {
        Ok(())
    }
}

/// Passes bytes through unchanged. Used when the full body already sits in
/// one contiguous slice whose length is known by construction.
pub(crate) struct IdentityInput;

impl InputFilter for IdentityInput {
    fn do_read<'a>(&mut self, raw: &'a [u8]) -> Result<&'a [u8], ErrorKind> {
        Ok(raw)
    }
}

/// Never yields a body. Used for requests/responses whose framing forbids
/// one (e.g. a bodyless status code on the output side).
pub(crate) struct VoidInput;

impl InputFilter for VoidInput {
    fn do_read<'a>(&mut self, _raw: &'a [u8]) -> Result<&'a [u8], ErrorKind> {
        Ok(&[])
    }
}

pub(crate) struct IdentityOutput;

impl OutputFilter for IdentityOutput {
    fn do_write(&mut self, data: &[u8], out: &mut Vec<u8>) -> Result<(), ErrorKind> {
        out.extend_from_slice(data);
        Ok(())
    }
}

pub(crate) struct VoidOutput;

impl OutputFilter for VoidOutput {
    fn do_write(&mut self, _data: &[u8], _out: &mut Vec<u8>) -> Result<(), ErrorKind> {
        Ok(())
    }
}

/// Enforces a declared `Content-Length` across however many `do_read`
/// calls it takes to see that many bytes; `end()` fails closed if fewer
/// arrived than promised.
pub(crate) struct ContentLengthInput {
    remaining: usize,
}

impl ContentLengthInput {
    pub(crate) fn new(declared: usize) -> Self {
        ContentLengthInput {
            remaining: declared,
        }
    }
}

impl InputFilter for ContentLengthInput {
    fn do_read<'a>(&mut self, raw: &'a [u8]) -> Result<&'a [u8], ErrorKind> {
        let take = raw.len().min(self.remaining);
        self.remaining -= take;
        Ok(&raw[..take])
    }

    fn end(&mut self) -> Result<(), ErrorKind> {
        match self.remaining {
            0 => Ok(()),
            n => Err(ErrorKind::BodyMismatch {
                expected: n,
                available: 0,
            }),
        }
    }
}

/// Decodes `Transfer-Encoding: chunked` in place: chunk-size lines and
/// chunk delimiters are stripped by shifting data left over the envelope
/// bytes that preceded it, so the decoded body always fits inside the
/// space it started in.
pub(crate) struct ChunkedInput {
    limit: usize,
}

impl ChunkedInput {
    pub(crate) fn new(limit: usize) -> Self {
        ChunkedInput { limit }
    }

    /// Decodes the chunked body starting at `buffer[start..end]` in place,
    /// consuming trailers up to the final blank line. Returns the length
    /// of the decoded body, which now sits at `[start, start + len)`, and
    /// the absolute position just past the message (trailers included).
    pub(crate) fn decode(
        &self,
        buffer: &mut [u8],
        start: usize,
        end: usize,
    ) -> Result<(usize, usize), ErrorKind> {
        let mut read = start;
        let mut write = start;

        loop {
            let (size_line, after_size) = find_line(buffer, read, end)?;

            let size_bytes = match memchr(b';', size_line) {
                Some(i) => &size_line[..i],
                None => size_line,
            };
            if size_bytes.is_empty() {
                return Err(ErrorKind::MalformedChunk);
            }
            let chunk_size = str::from_utf8(size_bytes)
                .ok()
                .and_then(|s| usize::from_str_radix(s.trim_end(), 16).ok())
                .ok_or(ErrorKind::MalformedChunk)?;

            read = after_size;

            if chunk_size == 0 {
                return skip_trailers(buffer, read, end, write, start);
            }

            if write - start + chunk_size > self.limit {
                return Err(ErrorKind::BodyTooLarge);
            }

            let data_end = read + chunk_size;
            if data_end > end {
                return Err(ErrorKind::MalformedChunk);
            }

            buffer.copy_within(read..data_end, write);
            write += chunk_size;
            read = data_end;

            let (trailing, after_crlf) = find_line(buffer, read, end)?;
            if !trailing.is_empty() {
                return Err(ErrorKind::MalformedChunk);
            }
            read = after_crlf;
        }
    }
}

fn skip_trailers(
    buffer: &[u8],
    mut read: usize,
    end: usize,
    write: usize,
    start: usize,
) -> Result<(usize, usize), ErrorKind> {
    loop {
        let (line, after) = find_line(buffer, read, end)?;
        read = after;
        if line.is_empty() {
            return Ok((write - start, read));
        }
    }
}

fn find_line(buffer: &[u8], pos: usize, end: usize) -> Result<(&[u8], usize), ErrorKind> {
    let slice = buffer.get(pos..end).ok_or(ErrorKind::MalformedChunk)?;
    let nl = memchr(b'\n', slice).ok_or(ErrorKind::MalformedChunk)?;

    let mut content_end = nl;
    if content_end > 0 && slice[content_end - 1] == b'\r' {
        content_end -= 1;
    }

    Ok((&slice[..content_end], pos + nl + 1))
}

/// Frames a response body as `Transfer-Encoding: chunked`. The body is
/// already fully buffered by the time a response commits (this engine
/// never streams to the socket mid-body), so the whole thing is emitted
/// as one chunk; `end()` writes the terminating `0\r\n\r\n`.
#[derive(Default)]
pub(crate) struct ChunkedOutput {
    finished: bool,
}

impl OutputFilter for ChunkedOutput {
    fn do_write(&mut self, data: &[u8], out: &mut Vec<u8>) -> Result<(), ErrorKind> {
        if data.is_empty() {
            return Ok(());
        }
        out.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
        out.extend_from_slice(data);
        out.extend_from_slice(b"\r\n");
        Ok(())
    }

    fn end(&mut self, out: &mut Vec<u8>) -> Result<(), ErrorKind> {
        if !self.finished {
            out.extend_from_slice(b"0\r\n\r\n");
            self.finished = true;
        }
        Ok(())
    }
}

/// Compresses a response body with `gzip`. Like [`ChunkedOutput`], the body
/// is already fully buffered by the time a response commits, so the whole
/// thing is encoded in one `do_write` call rather than streamed chunk by
/// chunk; `end()` is a no-op, since a gzip stream's own trailer (CRC32 +
/// length) is written when the encoder is finished, inside `do_write`.
#[derive(Default)]
pub(crate) struct GzipOutput;

impl OutputFilter for GzipOutput {
    fn do_write(&mut self, data: &[u8], out: &mut Vec<u8>) -> Result<(), ErrorKind> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
        encoder.write_all(data)?;
        out.extend_from_slice(&encoder.finish()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_input_passes_through() {
        let mut f = IdentityInput;
        assert_eq!(f.do_read(b"hello").unwrap(), b"hello");
    }

    #[test]
    fn void_input_is_always_empty() {
        let mut f = VoidInput;
        assert_eq!(f.do_read(b"hello").unwrap(), b"");
    }

    #[test]
    fn content_length_input_enforces_budget() {
        let mut f = ContentLengthInput::new(5);
        assert_eq!(f.do_read(b"hello world").unwrap(), b"hello");
        assert_eq!(f.end(), Ok(()));
    }

    #[test]
    fn content_length_input_end_fails_when_short() {
        let mut f = ContentLengthInput::new(10);
        assert_eq!(f.do_read(b"short").unwrap(), b"short");
        assert_eq!(
            f.end(),
            Err(ErrorKind::BodyMismatch {
                expected: 5,
                available: 0
            })
        );
    }

    #[test]
    fn chunked_input_decodes_multiple_chunks() {
        let mut buf = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n".to_vec();
        let len = buf.len();
        let f = ChunkedInput::new(4096);

        let (decoded_len, _after) = f.decode(&mut buf, 0, len).unwrap();
        assert_eq!(&buf[..decoded_len], b"Wikipedia");
    }

    #[test]
    fn chunked_input_rejects_oversized_body() {
        let mut buf = b"5\r\nHello\r\n0\r\n\r\n".to_vec();
        let len = buf.len();
        let f = ChunkedInput::new(2);

        assert_eq!(f.decode(&mut buf, 0, len), Err(ErrorKind::BodyTooLarge));
    }

    #[test]
    fn chunked_output_frames_single_chunk_with_terminator() {
        let mut f = ChunkedOutput::default();
        let mut out = Vec::new();

        f.do_write(b"hi there", &mut out).unwrap();
        f.end(&mut out).unwrap();

        assert_eq!(out, b"8\r\nhi there\r\n0\r\n\r\n");
    }

    #[test]
    fn chunked_output_skips_empty_write() {
        let mut f = ChunkedOutput::default();
        let mut out = Vec::new();

        f.do_write(b"", &mut out).unwrap();
        f.end(&mut out).unwrap();

        assert_eq!(out, b"0\r\n\r\n");
    }

    #[test]
    fn gzip_output_round_trips() {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let mut f = GzipOutput::default();
        let mut out = Vec::new();
        f.do_write(b"hello, hello, hello", &mut out).unwrap();

        assert_ne!(out, b"hello, hello, hello");

        let mut decompressed = String::new();
        GzDecoder::new(&out[..])
            .read_to_string(&mut decompressed)
            .unwrap();
        assert_eq!(decompressed, "hello, hello, hello");
    }

    #[test]
    fn void_output_drops_data() {
        let mut f = VoidOutput;
        let mut out = Vec::new();
        f.do_write(b"dropped", &mut out).unwrap();
        assert!(out.is_empty());
    }
}
