//! E2E Test Suite 03: Error Handling
//!
//! Corrupt, truncated and over-long inputs must terminate in finite time
//! with a typed error (or a clean truncated result) — never a panic, never
//! an infinite loop, never a read past the supplied input.

use brotli::decode::{decompress, Decoder, DecoderResult, OneShotError};
use brotli::compress;

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: trailing data after a valid stream
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_trailing_data_rejected() {
    let mut stream = compress(b"valid payload", 5, 22);
    stream.push(0x55);
    assert_eq!(decompress(&stream), Err(OneShotError::ExcessiveInput));

    let mut stream = compress(b"", 5, 22);
    stream.extend_from_slice(b"extra");
    assert_eq!(decompress(&stream), Err(OneShotError::ExcessiveInput));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: truncation at every length
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_truncations_never_hang() {
    let data = b"hello world! ".repeat(100);
    let stream = compress(&data, 5, 22);
    for cut in 0..stream.len() {
        match decompress(&stream[..cut]) {
            Ok(_) => panic!("truncated stream decoded at cut {}", cut),
            Err(OneShotError::TruncatedInput) | Err(OneShotError::Decode(_)) => {}
            Err(OneShotError::ExcessiveInput) => {
                panic!("nonsense result for truncation at {}", cut)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: single-byte corruptions
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_bit_flips_terminate() {
    let data = b"hello world!".repeat(100);
    let stream = compress(&data, 5, 22);
    // Perturb five bytes at a time at deterministic positions; the decoder
    // must either error out or produce output, in finite time.
    let mut rng = 0x5EED_1234u32;
    for round in 0..60 {
        let mut corrupted = stream.clone();
        for _ in 0..5 {
            rng = rng.wrapping_mul(1664525).wrapping_add(1013904223);
            let pos = (rng as usize) % corrupted.len();
            rng = rng.wrapping_mul(1664525).wrapping_add(1013904223);
            corrupted[pos] ^= (rng >> 13) as u8 | 1;
        }
        match decompress(&corrupted) {
            Ok(_) | Err(_) => {} // termination is the property under test
        }
        let _ = round;
    }
}

#[test]
fn test_every_single_byte_corruption_of_a_small_stream() {
    let data = b"abcabcabcabc, deterministic!";
    let stream = compress(data, 5, 22);
    for pos in 0..stream.len() {
        for flip in [0x01u8, 0x80, 0xFF] {
            let mut corrupted = stream.clone();
            corrupted[pos] ^= flip;
            let _ = decompress(&corrupted); // must return, any result
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: specific malformed headers
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_invalid_window_bits() {
    // '1' then 3-bit 0 then 3-bit 1: the large-window escape, which is
    // rejected unless explicitly enabled.
    let stream = [0b0001_0001u8, 0x00];
    match decompress(&stream) {
        Err(OneShotError::Decode(e)) => assert_eq!(format!("{}", e), "WINDOW_BITS"),
        other => panic!("expected WINDOW_BITS error, got {:?}", other),
    }
}

#[test]
fn test_reserved_metadata_bit() {
    // lgwin16 ('0'), ISLAST=0, MNIBBLES=11 (metadata), reserved bit = 1.
    let stream = [0b0001_1100u8, 0x00];
    match decompress(&stream) {
        Err(OneShotError::Decode(e)) => assert_eq!(format!("{}", e), "RESERVED"),
        other => panic!("expected RESERVED error, got {:?}", other),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: errors are sticky
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_error_state_is_permanent() {
    let stream = [0b0001_1100u8, 0x00]; // RESERVED error stream
    let mut decoder = Decoder::new();
    let mut buf = [0u8; 64];
    let (r1, _, _) = decoder.decompress_stream(&stream, &mut buf);
    assert!(matches!(r1, DecoderResult::Error(_)));
    // Further calls keep reporting the error and consume nothing.
    let (r2, consumed, written) = decoder.decompress_stream(b"more bytes", &mut buf);
    assert!(matches!(r2, DecoderResult::Error(_)));
    assert_eq!((consumed, written), (0, 0));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 6: partial output before a mid-stream error survives
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_partial_output_is_a_plaintext_prefix() {
    let data = b"prefix-stable output please. ".repeat(200);
    let stream = compress(&data, 5, 22);
    // Truncate deep into the command stream, then decode what is there.
    let cut = stream.len() * 3 / 4;
    let mut decoder = Decoder::new();
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    let mut pos = 0;
    loop {
        let (result, consumed, written) = decoder.decompress_stream(&stream[pos..cut], &mut buf);
        pos += consumed;
        out.extend_from_slice(&buf[..written]);
        match result {
            DecoderResult::NeedsMoreOutput => continue,
            _ => break,
        }
    }
    assert!(out.len() <= data.len());
    assert_eq!(&out[..], &data[..out.len()], "output diverged from plaintext");
}
