//! E2E Test Suite 05: File round trips through the io wrappers
//!
//! Exercises the same path the CLI drives: compress a file through
//! `Writer`, decompress it back through `Reader`, byte-compare.

use std::fs::File;
use std::io::{Read, Write};

use brotli::{Reader, Writer, WriterOptions};
use tempfile::tempdir;

fn roundtrip_via_files(data: &[u8], quality: i32) -> Vec<u8> {
    let dir = tempdir().unwrap();
    let compressed_path = dir.path().join("payload.br");

    {
        let file = File::create(&compressed_path).unwrap();
        let mut writer = Writer::new(file, WriterOptions { quality, lgwin: 22 });
        writer.write_all(data).unwrap();
        writer.close().unwrap();
    }

    let file = File::open(&compressed_path).unwrap();
    let mut reader = Reader::new(file);
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    out
}

#[test]
fn test_text_file_roundtrip() {
    let data = b"line of text\nanother line of text\n".repeat(500);
    for quality in [0, 1, 5, 11] {
        assert_eq!(roundtrip_via_files(&data, quality), data);
    }
}

#[test]
fn test_binary_file_roundtrip() {
    let mut state = 0xDEAD_BEEFu32;
    let data: Vec<u8> = (0..200_000)
        .map(|_| {
            state = state.wrapping_mul(747796405).wrapping_add(2891336453);
            (state >> 17) as u8
        })
        .collect();
    assert_eq!(roundtrip_via_files(&data, 5), data);
}

#[test]
fn test_empty_file_roundtrip() {
    assert_eq!(roundtrip_via_files(b"", 5), b"");
}

#[test]
fn test_compressed_file_is_smaller_for_text() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("x.br");
    let data = b"compressible compressible compressible ".repeat(1000);
    {
        let file = File::create(&path).unwrap();
        let mut writer = Writer::new(file, WriterOptions::default());
        writer.write_all(&data).unwrap();
        writer.close().unwrap();
    }
    let meta = std::fs::metadata(&path).unwrap();
    assert!(
        (meta.len() as usize) < data.len() / 4,
        "{} not < {}",
        meta.len(),
        data.len() / 4
    );
}
