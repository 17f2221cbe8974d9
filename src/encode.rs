//! Streaming encoder shell.
//!
//! Feeds input through a ring buffer; whenever a full input block has
//! accumulated (or the caller flushes/finishes), it runs the reference
//! search for the quality level, picks a meta-block strategy, and emits
//! the compressed bytes. Meta-blocks are not byte aligned, so the bit
//! writer's partial tail byte is carried across them; only flush and
//! finish pad the stream.

use log::debug;

use crate::backward_references::create_backward_references;
use crate::backward_references_hq::{
    create_hq_zopfli_backward_references, create_zopfli_backward_references,
};
use crate::bit_writer::BitWriter;
use crate::brotli_bit_stream::{
    store_meta_block, store_meta_block_fast, store_meta_block_trivial,
    store_uncompressed_meta_block,
};
use crate::bit_cost::bits_entropy;
use crate::command::Command;
use crate::context::ContextMode;
use crate::constants::{MAX_WINDOW_BITS, MIN_WINDOW_BITS};
use crate::hash::AnyHasher;
use crate::literal_cost::is_mostly_utf8;
use crate::metablock::{build_meta_block, MetaBlockSplit};
use crate::params::EncoderParams;
use crate::quality::{
    compute_rb_bits, max_metablock_size, HQ_ZOPFLIFICATION_QUALITY,
    MAX_NUM_DELAYED_SYMBOLS, MAX_QUALITY_FOR_STATIC_ENTROPY_CODES, MIN_QUALITY_FOR_BLOCK_SPLIT,
    MIN_QUALITY_FOR_CONTEXT_MODELING, MIN_QUALITY_FOR_HQ_BLOCK_SPLITTING,
    ZOPFLIFICATION_QUALITY,
};
use crate::ringbuffer::RingBuffer;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// The stream was already finished; no further writes are accepted.
    #[error("stream is finished")]
    StreamFinished,
    /// Parameters out of range at construction.
    #[error("invalid encoder parameters")]
    InvalidParameters,
}

/// Streaming Brotli encoder.
pub struct Encoder {
    params: EncoderParams,
    ringbuffer: RingBuffer,
    hasher: Option<AnyHasher>,
    bw: BitWriter,
    /// Compressed bytes ready to hand out.
    output: Vec<u8>,
    commands: Vec<Command>,
    num_literals: usize,
    last_insert_len: usize,
    dist_cache: [i32; 16],
    saved_dist_cache: [i32; 4],
    /// Total input accepted / covered by emitted meta-blocks / covered by
    /// the reference search.
    input_pos: u64,
    last_flush_pos: u64,
    last_processed_pos: u64,
    prev_byte: u8,
    prev_byte2: u8,
    header_written: bool,
    is_finished: bool,
}

impl Encoder {
    pub fn new(quality: i32, lgwin: u32) -> Encoder {
        Encoder::with_params(EncoderParams::new(quality, lgwin))
    }

    pub fn with_params(params: EncoderParams) -> Encoder {
        let rb_bits = compute_rb_bits(&params);
        Encoder {
            ringbuffer: RingBuffer::new(rb_bits, params.lgblock as u32),
            hasher: None,
            bw: BitWriter::new(),
            output: Vec::new(),
            commands: Vec::new(),
            num_literals: 0,
            last_insert_len: 0,
            dist_cache: [16, 15, 11, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            saved_dist_cache: [16, 15, 11, 4],
            input_pos: 0,
            last_flush_pos: 0,
            last_processed_pos: 0,
            prev_byte: 0,
            prev_byte2: 0,
            header_written: false,
            is_finished: false,
            params,
        }
    }

    pub fn params(&self) -> &EncoderParams {
        &self.params
    }

    pub fn is_finished(&self) -> bool {
        self.is_finished
    }

    #[inline]
    fn input_block_size(&self) -> usize {
        1usize << self.params.lgblock
    }

    /// Window-bits stream header (RFC 7932 section 9.1).
    fn write_stream_header(&mut self) {
        let lgwin = self.params.lgwin;
        debug_assert!((MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&lgwin));
        if lgwin == 16 {
            self.bw.write_bits(1, 0);
        } else if lgwin == 17 {
            self.bw.write_bits(7, 1);
        } else if lgwin > 17 {
            self.bw.write_bits(4, u64::from((lgwin - 17) << 1) | 1);
        } else {
            self.bw.write_bits(7, u64::from((lgwin - 8) << 4) | 1);
        }
        self.header_written = true;
    }

    /// Accepts plaintext. All input is consumed; compressed bytes
    /// accumulate in the internal output buffer.
    pub fn write(&mut self, mut data: &[u8]) -> Result<(), EncodeError> {
        if self.is_finished {
            return Err(EncodeError::StreamFinished);
        }
        if self.params.size_hint == 0 {
            // First write doubles as a size hint for hasher choice.
            self.params.size_hint = data.len();
            self.params.resolve();
        }
        while !data.is_empty() {
            let unprocessed = (self.input_pos - self.last_processed_pos) as usize;
            let room = self.input_block_size() - unprocessed;
            let take = room.min(data.len());
            self.ringbuffer.write(&data[..take]);
            self.input_pos += take as u64;
            data = &data[take..];
            if (self.input_pos - self.last_processed_pos) as usize == self.input_block_size() {
                self.encode_data(false, false);
            }
        }
        Ok(())
    }

    /// Emits a meta-block covering all pending input, then seals the byte
    /// with an empty metadata block (whose header mandates byte alignment),
    /// so everything written so far becomes decodable.
    pub fn flush(&mut self) -> Result<(), EncodeError> {
        if self.is_finished {
            return Err(EncodeError::StreamFinished);
        }
        self.encode_data(false, true);
        if self.bw.bit_pos() & 7 != 0 {
            // is_last=0, MNIBBLES=11 (metadata), reserved=0, MSKIPBYTES=00.
            self.bw.write_bits(6, 0x6);
            self.bw.jump_to_byte_boundary();
        }
        self.bw.drain_complete_bytes(&mut self.output);
        Ok(())
    }

    /// Emits the final meta-block (plus the last-block framing) and
    /// finishes the stream.
    pub fn finish(&mut self) -> Result<(), EncodeError> {
        if self.is_finished {
            return Err(EncodeError::StreamFinished);
        }
        self.encode_data(true, true);
        self.bw.drain_complete_bytes(&mut self.output);
        self.is_finished = true;
        Ok(())
    }

    /// Takes everything compressed so far.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Runs the reference search over unprocessed input and decides
    /// whether to emit a meta-block now or keep accumulating.
    fn encode_data(&mut self, is_last: bool, force_flush: bool) {
        if !self.header_written {
            self.write_stream_header();
        }
        let bytes = (self.input_pos - self.last_processed_pos) as usize;
        let mask = self.ringbuffer.mask() as usize;
        let wrapped_last_processed_pos = wrap_position(self.last_processed_pos);

        if bytes > 0 {
            let data = self.ringbuffer.buffer();
            let one_shot = self.last_processed_pos == 0 && is_last;
            let params = &self.params;
            let fresh = self.hasher.is_none();
            let hasher = self.hasher.get_or_insert_with(|| AnyHasher::new(params));
            if fresh {
                hasher.prepare(one_shot, bytes, data);
            }
            hasher.stitch_to_previous_block(bytes, wrapped_last_processed_pos, data, mask);

            match self.params.quality {
                ZOPFLIFICATION_QUALITY => {
                    let h10 = hasher.as_tree_hasher().expect("quality 10 uses the tree hasher");
                    create_zopfli_backward_references(
                        bytes,
                        wrapped_last_processed_pos,
                        data,
                        mask,
                        &self.params,
                        h10,
                        &mut self.dist_cache,
                        &mut self.last_insert_len,
                        &mut self.commands,
                        &mut self.num_literals,
                    );
                }
                HQ_ZOPFLIFICATION_QUALITY => {
                    let h10 = hasher.as_tree_hasher().expect("quality 11 uses the tree hasher");
                    create_hq_zopfli_backward_references(
                        bytes,
                        wrapped_last_processed_pos,
                        data,
                        mask,
                        &self.params,
                        h10,
                        &mut self.dist_cache,
                        &mut self.last_insert_len,
                        &mut self.commands,
                        &mut self.num_literals,
                    );
                }
                _ => {
                    create_backward_references(
                        bytes,
                        wrapped_last_processed_pos,
                        data,
                        mask,
                        &self.params,
                        hasher,
                        &mut self.dist_cache,
                        &mut self.last_insert_len,
                        &mut self.commands,
                        &mut self.num_literals,
                    );
                }
            }
            // Position wrap invalidates every stored hasher position.
            if wrap_position(self.input_pos) < wrapped_last_processed_pos {
                self.hasher = None;
            }
            self.last_processed_pos = self.input_pos;
        }

        {
            let max_length = max_metablock_size(&self.params);
            let max_literals = max_length / 8;
            let max_commands = max_length / 8;
            let processed_bytes = (self.input_pos - self.last_flush_pos) as usize;
            // Meta-block sizing is on the safe side: the next full input
            // block must still fit.
            let next_input_fits_metablock =
                processed_bytes + self.input_block_size() <= max_length;
            let should_flush = self.params.quality < MIN_QUALITY_FOR_BLOCK_SPLIT
                && self.num_literals + self.commands.len() >= MAX_NUM_DELAYED_SYMBOLS;
            if !is_last
                && !force_flush
                && !should_flush
                && next_input_fits_metablock
                && self.num_literals < max_literals
                && self.commands.len() < max_commands
            {
                // Merge with the next input block.
                return;
            }
        }

        // Materialize the trailing literal run.
        if self.last_insert_len > 0 {
            self.commands.push(Command::new_insert(self.last_insert_len));
            self.num_literals += self.last_insert_len;
            self.last_insert_len = 0;
        }

        if !is_last && self.input_pos == self.last_flush_pos {
            // Nothing new and nothing to finish.
            return;
        }

        let metablock_size = (self.input_pos - self.last_flush_pos) as usize;
        self.write_meta_block_internal(metablock_size, is_last);

        self.last_flush_pos = self.input_pos;
        if self.last_flush_pos > 0 {
            self.prev_byte = self
                .ringbuffer
                .byte_at((wrap_position(self.last_flush_pos) as usize).wrapping_sub(1) & mask);
        }
        if self.last_flush_pos > 1 {
            self.prev_byte2 = self
                .ringbuffer
                .byte_at((wrap_position(self.last_flush_pos) as usize).wrapping_sub(2) & mask);
        }
        self.commands.clear();
        self.num_literals = 0;
        self.saved_dist_cache
            .copy_from_slice(&self.dist_cache[..4]);
        self.bw.drain_complete_bytes(&mut self.output);
    }

    fn write_meta_block_internal(&mut self, bytes: usize, is_last: bool) {
        let wrapped_last_flush_pos = wrap_position(self.last_flush_pos) as usize;
        let mask = self.ringbuffer.mask() as usize;
        let data = self.ringbuffer.buffer();

        if bytes == 0 {
            // ISLAST and ISEMPTY framing only.
            self.bw.write_bits(2, 3);
            self.bw.jump_to_byte_boundary();
            return;
        }

        debug!(
            "meta-block: {} bytes, {} commands, quality {}, last={}",
            bytes,
            self.commands.len(),
            self.params.quality,
            is_last
        );

        if !should_compress(
            data,
            mask,
            wrapped_last_flush_pos,
            bytes,
            self.num_literals,
            self.commands.len(),
        ) {
            // The distance-cache updates of this block are void now.
            self.dist_cache[..4].copy_from_slice(&self.saved_dist_cache);
            store_uncompressed_meta_block(
                is_last,
                data,
                wrapped_last_flush_pos,
                mask,
                bytes,
                &mut self.bw,
            );
            return;
        }

        let literal_context_mode = choose_context_mode(
            &self.params,
            data,
            wrapped_last_flush_pos,
            mask,
            bytes,
        );
        let start_bit_pos = self.bw.bit_pos();

        if self.params.quality <= MAX_QUALITY_FOR_STATIC_ENTROPY_CODES {
            store_meta_block_fast(
                data,
                wrapped_last_flush_pos,
                bytes,
                mask,
                is_last,
                &self.params,
                &self.commands,
                &mut self.bw,
            );
        } else if self.params.quality < MIN_QUALITY_FOR_BLOCK_SPLIT {
            store_meta_block_trivial(
                data,
                wrapped_last_flush_pos,
                bytes,
                mask,
                is_last,
                &self.params,
                &self.commands,
                &mut self.bw,
            );
        } else {
            let mut block_params = self.params.clone();
            if self.params.quality < MIN_QUALITY_FOR_CONTEXT_MODELING {
                block_params.disable_literal_context_modeling = true;
            }
            let mut mb = MetaBlockSplit::default();
            build_meta_block(
                data,
                wrapped_last_flush_pos,
                mask,
                &block_params,
                self.prev_byte,
                self.prev_byte2,
                &self.commands,
                literal_context_mode,
                &mut mb,
            );
            store_meta_block(
                data,
                wrapped_last_flush_pos,
                bytes,
                mask,
                self.prev_byte,
                self.prev_byte2,
                is_last,
                &block_params,
                literal_context_mode,
                &self.commands,
                &mb,
                &mut self.bw,
            );
        }

        // An expansion is replaced by raw storage.
        let compressed_bytes = (self.bw.bit_pos() - start_bit_pos) >> 3;
        if bytes + 4 < compressed_bytes {
            self.dist_cache[..4].copy_from_slice(&self.saved_dist_cache);
            self.bw.rewind_to(start_bit_pos);
            store_uncompressed_meta_block(
                is_last,
                data,
                wrapped_last_flush_pos,
                mask,
                bytes,
                &mut self.bw,
            );
        }
    }
}

/// Wraps a stream position every 2 GiB, rounding down to a 1 GiB boundary,
/// so all in-flight positions stay well inside 32 bits.
#[inline]
fn wrap_position(pos: u64) -> usize {
    let mut result = pos as u32;
    let gb = pos >> 30;
    if gb > 2 {
        result = (result & ((1 << 30) - 1)) | ((((gb - 1) & 1) as u32 + 1) << 30);
    }
    result as usize
}

/// Cheap incompressibility screen: mostly-literal blocks with near-random
/// byte statistics go out uncompressed.
fn should_compress(
    data: &[u8],
    mask: usize,
    last_flush_pos: usize,
    bytes: usize,
    num_literals: usize,
    num_commands: usize,
) -> bool {
    if num_commands < (bytes >> 8) + 2
        && num_literals as f64 > 0.99 * bytes as f64 {
            let mut literal_histo = [0u32; 256];
            const SAMPLE_RATE: usize = 13;
            const MIN_ENTROPY: f64 = 7.92;
            let bit_cost_threshold = bytes as f64 * MIN_ENTROPY / SAMPLE_RATE as f64;
            let t = (bytes + SAMPLE_RATE - 1) / SAMPLE_RATE;
            let mut pos = last_flush_pos;
            for _ in 0..t {
                literal_histo[data[pos & mask] as usize] += 1;
                pos += SAMPLE_RATE;
            }
            if bits_entropy(&literal_histo) > bit_cost_threshold {
                return false;
            }
    }
    true
}

/// UTF-8 text models well under the UTF8 context mode; anything else gets
/// the signed mode at the qualities that can afford the check.
fn choose_context_mode(
    params: &EncoderParams,
    data: &[u8],
    pos: usize,
    mask: usize,
    length: usize,
) -> ContextMode {
    if params.quality >= MIN_QUALITY_FOR_HQ_BLOCK_SPLITTING
        && !is_mostly_utf8(data, pos, mask, length)
    {
        ContextMode::Signed
    } else {
        ContextMode::Utf8
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// One-shot helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Upper bound for the compressed size of `input_size` bytes
/// (valid for quality >= 2 without flushes).
pub fn max_compressed_size(input_size: usize) -> usize {
    // Every 2^24-byte meta-block costs at most 4 header bytes, plus the
    // stream header and final framing.
    let num_large_blocks = input_size >> 24;
    let overhead = 2 + (4 * num_large_blocks) + 3 + 1;
    let result = input_size + overhead;
    if input_size == 0 {
        2
    } else {
        result
    }
}

/// One-shot compression of `input` into a fresh buffer.
pub fn compress(input: &[u8], quality: i32, lgwin: u32) -> Vec<u8> {
    let params = EncoderParams::new(quality, lgwin).with_size_hint(input.len());
    let mut encoder = Encoder::with_params(params);
    encoder.write(input).expect("fresh encoder accepts input");
    encoder.finish().expect("fresh encoder finishes once");
    encoder.take_output()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_minimal_framing() {
        // lgwin 22 header is 4 bits (1 + 3-bit code 5), then ISLAST and
        // ISEMPTY; everything fits one byte: 0x3B.
        let out = compress(b"", 5, 22);
        assert_eq!(out, vec![0x3B]);
        // The 16-bit window header is a single '0' bit.
        let out = compress(b"", 5, 16);
        assert_eq!(out, vec![0x06]);
    }

    #[test]
    fn single_byte_round_trip_shape() {
        let out = compress(b"A", 5, 22);
        assert!(!out.is_empty());
        assert!(out.len() < 12);
    }

    #[test]
    fn finished_stream_rejects_writes() {
        let mut e = Encoder::new(5, 22);
        e.write(b"hi").unwrap();
        e.finish().unwrap();
        assert_eq!(e.write(b"x"), Err(EncodeError::StreamFinished));
        assert_eq!(e.finish(), Err(EncodeError::StreamFinished));
    }

    #[test]
    fn repetitive_data_compresses() {
        let data = b"<html><body><H1>Hello world</H1></body></html>".repeat(10);
        for q in 0..=11 {
            let out = compress(&data, q, 22);
            assert!(
                out.len() < data.len() / 2 + 20,
                "quality {}: {} vs {}",
                q,
                out.len(),
                data.len()
            );
        }
    }

    #[test]
    fn incompressible_data_stays_near_size() {
        let mut state = 0x9E37_79B9u32;
        let data: Vec<u8> = (0..1 << 16)
            .map(|_| {
                state = state.wrapping_mul(747796405).wrapping_add(2891336453);
                (state >> 24) as u8
            })
            .collect();
        let out = compress(&data, 5, 22);
        assert!(out.len() <= max_compressed_size(data.len()));
    }

    #[test]
    fn flush_pads_to_byte_boundary() {
        let mut e = Encoder::new(5, 22);
        e.write(b"hello hello hello hello").unwrap();
        e.flush().unwrap();
        let first = e.take_output();
        assert!(!first.is_empty());
        e.write(b" more data").unwrap();
        e.finish().unwrap();
        let second = e.take_output();
        assert!(!second.is_empty());
    }
}
