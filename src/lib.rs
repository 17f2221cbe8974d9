// Brotli (RFC 7932) — pure-Rust encoder and decoder

pub mod backward_references;
pub mod backward_references_hq;
pub mod bit_cost;
pub mod bit_reader;
pub mod bit_writer;
pub mod block_splitter;
pub mod brotli_bit_stream;
pub mod cluster;
pub mod command;
pub mod constants;
pub mod context;
pub mod decode;
pub mod dictionary;
pub mod encode;
pub mod entropy_encode;
pub mod entropy_encode_static;
pub mod hash;
pub mod histogram;
pub mod http;
pub mod huffman;
pub mod literal_cost;
pub mod metablock;
pub mod params;
pub mod prefix;
pub mod quality;
pub mod reader;
pub mod ringbuffer;
pub mod state;
pub mod writer;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level convenience re-exports for the most common API entry points.
// ─────────────────────────────────────────────────────────────────────────────

/// Streaming decompressor wrapping any `std::io::Read`.
pub use reader::Reader;

/// Streaming compressor wrapping any `std::io::Write`.
pub use writer::{Writer, WriterOptions};

/// One-shot compression into a fresh buffer.
pub use encode::compress;

/// One-shot decompression of a complete stream; rejects trailing bytes.
pub use decode::decompress;

/// Streaming encoder and decoder cores for callers that manage their own
/// buffers.
pub use decode::{DecodeError, Decoder, DecoderResult, OneShotError};
pub use encode::{max_compressed_size, EncodeError, Encoder};

/// Encoder tuning.
pub use params::EncoderParams;

/// HTTP `Accept-Encoding` negotiation.
pub use http::{negotiate_content_encoding, select_encoding, ContentEncoding};

/// Smallest supported sliding-window exponent.
pub use constants::MIN_WINDOW_BITS;
/// Largest sliding-window exponent outside large-window mode.
pub use constants::MAX_WINDOW_BITS;
/// Highest (densest, slowest) quality level.
pub use constants::MAX_QUALITY;
/// Lowest (fastest) quality level.
pub use constants::MIN_QUALITY;
