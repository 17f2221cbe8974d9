//! E2E Test Suite 01: Round Trips
//!
//! Validates decode(encode(B, q, lgwin)) == B across qualities, window
//! sizes and input shapes, plus the framing of the smallest streams.

use brotli::{compress, decompress};

fn check_roundtrip(data: &[u8], quality: i32, lgwin: u32) {
    let compressed = compress(data, quality, lgwin);
    let decompressed = decompress(&compressed).unwrap_or_else(|e| {
        panic!(
            "decode failed at quality {} lgwin {} len {}: {:?}",
            quality,
            lgwin,
            data.len(),
            e
        )
    });
    assert_eq!(
        decompressed,
        data,
        "roundtrip mismatch at quality {} lgwin {} len {}",
        quality,
        lgwin,
        data.len()
    );
}

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

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: empty input uses minimal framing
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_empty_input_minimal_framing() {
    let compressed = compress(b"", 5, 22);
    assert!(
        compressed.len() <= 3,
        "empty stream took {} bytes",
        compressed.len()
    );
    assert_eq!(decompress(&compressed).unwrap(), b"");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: single byte
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_single_byte() {
    check_roundtrip(b"A", 5, 22);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: repeated HTML compresses well
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_repeated_html_ratio() {
    let data = b"<html><body><H1>Hello world</H1></body></html>".repeat(10);
    let compressed = compress(&data, 5, 22);
    assert!(
        compressed.len() < data.len() / 2 + 20,
        "compressed {} of {}",
        compressed.len(),
        data.len()
    );
    assert_eq!(decompress(&compressed).unwrap(), data);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: every quality on text
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_all_qualities_text() {
    let data = b"The quick brown fox jumps over the lazy dog. ".repeat(64);
    for quality in 0..=11 {
        check_roundtrip(&data, quality, 22);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: every quality on random bytes
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_all_qualities_random() {
    // Scaled-down flavor of the million-byte sweep, kept fast per quality.
    let data = xorshift_bytes(100_000, 0x1234_5678);
    for quality in 0..=11 {
        check_roundtrip(&data, quality, 22);
    }
}

#[test]
#[ignore = "long: a million random bytes across all 12 qualities"]
fn test_million_random_bytes_all_qualities() {
    let data = xorshift_bytes(1_000_000, 0xBEEF_CAFE);
    for quality in 0..=11 {
        check_roundtrip(&data, quality, 22);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 6: window sizes
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_window_range() {
    let data = b"windowed content, repeated a fair number of times. ".repeat(200);
    for lgwin in [10, 11, 16, 17, 18, 22, 24] {
        for quality in [1, 5, 9, 11] {
            check_roundtrip(&data, quality, lgwin);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 7: input shapes that stress specific coder paths
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_one_byte_runs() {
    // distance-1 overlap copies
    for len in [1usize, 2, 3, 40, 1000, 70_000] {
        check_roundtrip(&vec![b'x'; len], 5, 22);
        check_roundtrip(&vec![b'x'; len], 10, 22);
    }
}

#[test]
fn test_dictionary_friendly_text() {
    // Common English words live in the static dictionary.
    let data = b"time down life left back code data show only site city open just like free work information about the world ".repeat(8);
    for quality in [4, 5, 9, 10, 11] {
        check_roundtrip(&data, quality, 22);
    }
}

#[test]
fn test_utf8_and_binary_mix() {
    let mut data = Vec::new();
    data.extend_from_slice("káva čaj špičková kvalita – výborně ".repeat(50).as_bytes());
    data.extend(xorshift_bytes(5_000, 7));
    data.extend_from_slice(&b"ascii tail ascii tail ".repeat(40)[..]);
    for quality in [2, 5, 11] {
        check_roundtrip(&data, quality, 22);
    }
}

#[test]
fn test_alternating_regimes() {
    // Text, then noise, then text: exercises block splitting.
    let mut data = Vec::new();
    for chunk in 0..6 {
        if chunk % 2 == 0 {
            data.extend_from_slice(&b"structured structured structured ".repeat(100)[..]);
        } else {
            data.extend(xorshift_bytes(3_000, chunk as u32 + 99));
        }
    }
    for quality in [5, 9, 11] {
        check_roundtrip(&data, quality, 22);
    }
}

#[test]
fn test_sizes_around_block_boundaries() {
    // Inputs straddling the 1 << 14 and 1 << 16 input-block sizes.
    for size in [
        (1usize << 14) - 1,
        1 << 14,
        (1 << 14) + 1,
        (1 << 16) - 1,
        1 << 16,
        (1 << 16) + 1,
    ] {
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        for quality in [1, 3, 5, 10] {
            check_roundtrip(&data, quality, 18);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 8: re-encoding a decoded stream preserves content
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_reencode_stability() {
    let original = b"some mildly repetitive payload, payload, payload.".repeat(30);
    let stream1 = compress(&original, 9, 22);
    let decoded = decompress(&stream1).unwrap();
    let stream2 = compress(&decoded, 2, 20);
    assert_eq!(decompress(&stream2).unwrap(), original);
}
