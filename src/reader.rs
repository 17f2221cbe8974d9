//! `std::io::Read` adapter over the streaming decoder.

use std::io;

use crate::decode::{Decoder, DecoderResult};

/// A buffer size that avoids excessive calls into the source without
/// holding much memory; chosen to match the common copy-loop chunk.
const READ_BUF_SIZE: usize = 32 * 1024;

/// Decompresses a brotli stream read from the wrapped reader.
pub struct Reader<R: io::Read> {
    src: R,
    decoder: Decoder,
    buf: Vec<u8>,
    /// Window of undecoded input inside `buf`.
    buf_start: usize,
    buf_end: usize,
}

impl<R: io::Read> Reader<R> {
    pub fn new(src: R) -> Reader<R> {
        Reader {
            src,
            decoder: Decoder::new(),
            buf: vec![0; READ_BUF_SIZE],
            buf_start: 0,
            buf_end: 0,
        }
    }

    /// Re-arms the reader for a fresh stream from `src`.
    pub fn reset(&mut self, src: R) {
        self.src = src;
        self.decoder = Decoder::new();
        self.buf_start = 0;
        self.buf_end = 0;
    }

    /// Accept the large-window escape in the stream header.
    pub fn set_large_window(&mut self, enabled: bool) {
        self.decoder.set_large_window(enabled);
    }

    pub fn into_inner(self) -> R {
        self.src
    }

    fn fill(&mut self) -> io::Result<usize> {
        let n = self.src.read(&mut self.buf)?;
        self.buf_start = 0;
        self.buf_end = n;
        Ok(n)
    }
}

impl<R: io::Read> io::Read for Reader<R> {
    fn read(&mut self, p: &mut [u8]) -> io::Result<usize> {
        if !self.decoder.has_more_output() && self.buf_start == self.buf_end {
            if self.decoder.is_finished() {
                return Ok(0);
            }
            let m = self.fill()?;
            if m == 0 {
                // Proxy a clean EOF only when the stream is complete.
                if self.decoder.is_finished() {
                    return Ok(0);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "brotli: truncated stream",
                ));
            }
        }
        if p.is_empty() {
            return Ok(0);
        }

        loop {
            let (result, consumed, written) = self
                .decoder
                .decompress_stream(&self.buf[self.buf_start..self.buf_end], p);
            self.buf_start += consumed;
            match result {
                DecoderResult::Success => {
                    if self.buf_start < self.buf_end {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "brotli: excessive input",
                        ));
                    }
                    return Ok(written);
                }
                DecoderResult::Error(e) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("brotli: {}", e),
                    ));
                }
                DecoderResult::NeedsMoreOutput => {
                    if written == 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::Other,
                            "brotli: short output buffer",
                        ));
                    }
                    return Ok(written);
                }
                DecoderResult::NeedsMoreInput => {
                    // Don't block on the source when there is data to hand
                    // back already.
                    if written > 0 {
                        return Ok(written);
                    }
                    let m = self.fill()?;
                    if m == 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "brotli: truncated stream",
                        ));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn empty_stream_reads_as_eof() {
        let mut r = Reader::new(&[0x3Bu8][..]);
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let mut r = Reader::new(&[][..]);
        let mut out = Vec::new();
        let err = r.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn reset_reuses_the_instance() {
        let mut r = Reader::new(&[0x3Bu8][..]);
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        r.reset(&[0x06u8][..]);
        let mut out2 = Vec::new();
        r.read_to_end(&mut out2).unwrap();
        assert!(out2.is_empty());
    }
}
