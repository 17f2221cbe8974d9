//! `std::io::Write` adapter over the streaming encoder.

use std::io;

use crate::constants::{MAX_WINDOW_BITS, MIN_WINDOW_BITS};
use crate::encode::Encoder;
use crate::params::EncoderParams;

/// Compression settings for [`Writer`].
#[derive(Clone, Copy, Debug)]
pub struct WriterOptions {
    /// Compression-speed vs density trade-off, 0..=11.
    pub quality: i32,
    /// Base-2 logarithm of the sliding window, 10..=24. Zero selects the
    /// default window for the quality.
    pub lgwin: u32,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            quality: 6,
            lgwin: 0,
        }
    }
}

const DEFAULT_LGWIN: u32 = 22;

/// Compresses everything written to it into the wrapped writer. `flush`
/// makes all input written so far decodable; `close` finishes the stream.
pub struct Writer<W: io::Write> {
    dst: Option<W>,
    encoder: Encoder,
    options: WriterOptions,
}

fn writer_closed() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "brotli: Writer is closed")
}

impl<W: io::Write> Writer<W> {
    pub fn new(dst: W, options: WriterOptions) -> Writer<W> {
        let mut w = Writer {
            dst: None,
            encoder: Encoder::new(0, 0),
            options,
        };
        w.reset(dst);
        w
    }

    /// Re-arms the writer for a fresh stream into `dst`.
    pub fn reset(&mut self, dst: W) {
        let lgwin = if self.options.lgwin == 0 {
            DEFAULT_LGWIN
        } else {
            self.options.lgwin.clamp(MIN_WINDOW_BITS, MAX_WINDOW_BITS)
        };
        self.encoder = Encoder::with_params(EncoderParams::new(self.options.quality, lgwin));
        self.dst = Some(dst);
    }

    fn push_output(&mut self) -> io::Result<()> {
        if self.encoder.has_output() {
            let out = self.encoder.take_output();
            let dst = self.dst.as_mut().ok_or_else(writer_closed)?;
            dst.write_all(&out)?;
        }
        Ok(())
    }

    /// Emits the final meta-block and drops the destination. Writing after
    /// close reports an error.
    pub fn close(&mut self) -> io::Result<()> {
        if self.dst.is_none() {
            return Err(writer_closed());
        }
        self.encoder
            .finish()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.push_output()?;
        if let Some(dst) = self.dst.as_mut() {
            dst.flush()?;
        }
        self.dst = None;
        Ok(())
    }

    /// Closes the stream and returns the destination writer.
    pub fn into_inner(mut self) -> io::Result<W> {
        let mut dst = self.dst.take().ok_or_else(writer_closed)?;
        if !self.encoder.is_finished() {
            self.encoder
                .finish()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        }
        dst.write_all(&self.encoder.take_output())?;
        dst.flush()?;
        Ok(dst)
    }
}

impl<W: io::Write> io::Write for Writer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.dst.is_none() {
            return Err(writer_closed());
        }
        self.encoder
            .write(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.push_output()?;
        Ok(buf.len())
    }

    /// Emits all pending input as a decodable prefix. Costs compression
    /// density; the stream remains open.
    fn flush(&mut self) -> io::Result<()> {
        if self.dst.is_none() {
            return Err(writer_closed());
        }
        self.encoder
            .flush()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.push_output()?;
        self.dst.as_mut().ok_or_else(writer_closed)?.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn close_then_write_errors() {
        let mut w = Writer::new(Vec::new(), WriterOptions { quality: 5, lgwin: 22 });
        w.write_all(b"hi").unwrap();
        w.close().unwrap();
        assert!(w.write(b"x").is_err());
        assert!(w.close().is_err());
    }

    #[test]
    fn output_lands_in_destination() {
        let mut w = Writer::new(Vec::new(), WriterOptions::default());
        w.write_all(b"some bytes to squeeze").unwrap();
        w.close().unwrap();
    }
}
