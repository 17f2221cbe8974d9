//! E2E Test Suite 02: Streaming
//!
//! Chunked decoding must match one-shot decoding for any chunk split;
//! flush boundaries must yield decodable prefixes; the encoder must emit
//! output before consuming the whole input on multi-block streams.

use std::io::{Read, Write};

use brotli::decode::{Decoder, DecoderResult};
use brotli::{compress, decompress, Encoder, Reader, Writer, WriterOptions};

fn xorshift_bytes(n: usize, mut state: u32) -> Vec<u8> {
    (0..n)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// Decodes `stream` feeding `chunk` input bytes at a time.
fn decode_chunked(stream: &[u8], chunk: usize) -> Vec<u8> {
    let mut decoder = Decoder::new();
    let mut out = Vec::new();
    let mut buf = [0u8; 997]; // odd size: output splits differently too
    let mut pos = 0;
    loop {
        let end = (pos + chunk).min(stream.len());
        let (result, consumed, written) = decoder.decompress_stream(&stream[pos..end], &mut buf);
        pos += consumed;
        out.extend_from_slice(&buf[..written]);
        match result {
            DecoderResult::Success => break,
            DecoderResult::NeedsMoreOutput => {}
            DecoderResult::NeedsMoreInput => {
                assert!(pos < stream.len(), "decoder starved at {}", pos);
            }
            DecoderResult::Error(e) => panic!("decode error: {:?}", e),
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: any chunking of the input decodes identically
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_chunked_decode_equivalence() {
    let data = b"stream me in small pieces, stream me in small pieces! ".repeat(120);
    for quality in [1, 5, 11] {
        let stream = compress(&data, quality, 22);
        let reference = decompress(&stream).unwrap();
        assert_eq!(reference, data);
        for chunk in [1, 2, 3, 7, 64, 1024, stream.len()] {
            assert_eq!(
                decode_chunked(&stream, chunk),
                data,
                "chunk size {} at quality {}",
                chunk,
                quality
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: single-byte chunks through the io::Read wrapper
// ─────────────────────────────────────────────────────────────────────────────

struct OneByteReader<'a>(&'a [u8]);

impl Read for OneByteReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.0.is_empty() || buf.is_empty() {
            return Ok(0);
        }
        buf[0] = self.0[0];
        self.0 = &self.0[1..];
        Ok(1)
    }
}

#[test]
fn test_reader_with_dribbling_source() {
    let data = b"dribble dribble dribble dribble".repeat(50);
    let stream = compress(&data, 5, 22);
    let mut reader = Reader::new(OneByteReader(&stream));
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, data);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: flush produces decodable prefixes
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_flush_prefix_property() {
    let part1 = b"first installment of the payload | ".repeat(40);
    let part2 = b"second installment, arriving later. ".repeat(40);

    let mut encoder = Encoder::new(5, 22);
    encoder.write(&part1).unwrap();
    encoder.flush().unwrap();
    let prefix = encoder.take_output();
    // Everything up to the flush decodes on its own as a stream prefix.
    let mut decoder = Decoder::new();
    let mut buf = vec![0u8; part1.len() + part2.len() + 64];
    let (result, consumed, written) = decoder.decompress_stream(&prefix, &mut buf);
    assert_eq!(result, DecoderResult::NeedsMoreInput);
    assert_eq!(consumed, prefix.len());
    assert_eq!(&buf[..written], &part1[..]);

    encoder.write(&part2).unwrap();
    encoder.finish().unwrap();
    let rest = encoder.take_output();

    let mut full = prefix;
    full.extend_from_slice(&rest);
    let mut expected = part1.clone();
    expected.extend_from_slice(&part2);
    assert_eq!(decompress(&full).unwrap(), expected);
}

#[test]
fn test_many_flushes() {
    let mut encoder = Encoder::new(4, 20);
    let mut expected = Vec::new();
    let mut stream = Vec::new();
    for i in 0..20 {
        let chunk = format!("chunk number {} with some repetition repetition; ", i);
        expected.extend_from_slice(chunk.as_bytes());
        encoder.write(chunk.as_bytes()).unwrap();
        encoder.flush().unwrap();
        stream.extend_from_slice(&encoder.take_output());
    }
    encoder.finish().unwrap();
    stream.extend_from_slice(&encoder.take_output());
    assert_eq!(decompress(&stream).unwrap(), expected);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: the encoder streams multi-block input incrementally
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_encoder_emits_before_the_end() {
    // 8 x 2^16 random bytes at lgwin 16: after writing half, some
    // compressed bytes must already exist.
    let data = xorshift_bytes(8 << 16, 0xAB);
    let mut encoder = Encoder::new(11, 16);
    let half = data.len() / 2;
    encoder.write(&data[..half]).unwrap();
    let emitted = encoder.take_output();
    assert!(
        !emitted.is_empty(),
        "no output after {} of {} bytes",
        half,
        data.len()
    );
    encoder.write(&data[half..]).unwrap();
    encoder.finish().unwrap();
    let mut stream = emitted;
    stream.extend_from_slice(&encoder.take_output());
    assert_eq!(decompress(&stream).unwrap(), data);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: Writer/Reader wrappers end to end
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_writer_reader_pipeline() {
    let data = b"pipe through the io wrappers ".repeat(333);
    let mut writer = Writer::new(Vec::new(), WriterOptions { quality: 7, lgwin: 21 });
    writer.write_all(&data).unwrap();
    writer.flush().unwrap();
    writer.write_all(&data).unwrap();
    let stream = writer.into_inner().unwrap();

    let mut reader = Reader::new(&stream[..]);
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    let mut expected = data.clone();
    expected.extend_from_slice(&data);
    assert_eq!(out, expected);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 6: tiny output buffers force NeedsMoreOutput cycles
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_minimal_output_buffer() {
    let data = b"output one byte at a time, please. ".repeat(60);
    let stream = compress(&data, 5, 22);
    let mut decoder = Decoder::new();
    let mut out = Vec::new();
    let mut pos = 0usize;
    let mut guard = 0usize;
    loop {
        let mut byte = [0u8; 1];
        let (result, consumed, written) = decoder.decompress_stream(&stream[pos..], &mut byte);
        pos += consumed;
        out.extend_from_slice(&byte[..written]);
        match result {
            DecoderResult::Success => break,
            DecoderResult::Error(e) => panic!("decode error: {:?}", e),
            _ => {}
        }
        guard += 1;
        assert!(guard < 10 * data.len() + 10_000, "no forward progress");
    }
    assert_eq!(out, data);
}
