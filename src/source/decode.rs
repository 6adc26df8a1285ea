//! Streaming transcoding to UTF-8.

use std::io::{self, Read};

use encoding_rs::{CoderResult, Decoder, Encoding};

const IN_BUF: usize = 8 * 1024;
const OUT_BUF: usize = 16 * 1024;

/// Wraps a byte reader in any `encoding_rs` encoding and yields UTF-8.
///
/// A leading BOM is sniffed and removed (and overrides the declared encoding, as browsers do).
/// Malformed sequences are replaced with U+FFFD; [`DecodeReader::had_errors`] reports whether
/// that happened.
pub struct DecodeReader<R> {
    inner: R,
    decoder: Decoder,
    in_buf: Box<[u8]>,
    in_pos: usize,
    in_len: usize,
    out_buf: Box<[u8]>,
    out_pos: usize,
    out_len: usize,
    eof: bool,
    finished: bool,
    had_errors: bool,
}

impl<R: Read> DecodeReader<R> {
    pub fn new(inner: R, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            decoder: encoding.new_decoder(),
            in_buf: vec![0; IN_BUF].into_boxed_slice(),
            in_pos: 0,
            in_len: 0,
            out_buf: vec![0; OUT_BUF].into_boxed_slice(),
            out_pos: 0,
            out_len: 0,
            eof: false,
            finished: false,
            had_errors: false,
        }
    }

    pub fn had_errors(&self) -> bool {
        self.had_errors
    }
}

impl<R: Read> Read for DecodeReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.out_pos < self.out_len {
                let n = buf.len().min(self.out_len - self.out_pos);
                buf[..n].copy_from_slice(&self.out_buf[self.out_pos..self.out_pos + n]);
                self.out_pos += n;
                return Ok(n);
            }
            if self.finished {
                return Ok(0);
            }
            if self.in_pos == self.in_len && !self.eof {
                self.in_len = self.inner.read(&mut self.in_buf)?;
                self.in_pos = 0;
                self.eof = self.in_len == 0;
            }

            let (result, read, written, had_errors) = self.decoder.decode_to_utf8(
                &self.in_buf[self.in_pos..self.in_len],
                &mut self.out_buf,
                self.eof,
            );
            self.in_pos += read;
            self.out_pos = 0;
            self.out_len = written;
            self.had_errors |= had_errors;
            if self.eof && result == CoderResult::InputEmpty {
                self.finished = true;
            }
        }
    }
}
