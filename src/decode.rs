//! Streaming decoder.
//!
//! An explicit state machine over the bit reader: window bits, per
//! meta-block headers, prefix-code descriptions, context maps, then the
//! command loop reconstructing output into a ring buffer. Any state may
//! yield for more input or output; all loop counters live in
//! [`DecoderState`], and speculative multi-field reads are rolled back via
//! the bit reader's save/restore so a retry re-reads them whole.

use crate::bit_reader::bit_mask;
use crate::constants::{
    distance_alphabet_size, CODE_LENGTH_CODES, DISTANCE_CONTEXT_BITS, LARGE_MAX_DISTANCE_BITS,
    LARGE_MAX_WBITS, LARGE_MIN_WBITS, LITERAL_CONTEXT_BITS, MAX_ALLOWED_DISTANCE,
    MAX_DICTIONARY_WORD_LENGTH, MAX_DISTANCE_BITS, MIN_DICTIONARY_WORD_LENGTH,
    NUM_BLOCK_LEN_SYMBOLS, NUM_COMMAND_SYMBOLS, NUM_DISTANCE_SHORT_CODES, NUM_LITERAL_SYMBOLS,
    REPEAT_PREVIOUS_CODE_LENGTH, WINDOW_GAP,
};
use crate::context::{context_lut, ContextMode, CONTEXT_LUT};
use crate::dictionary::transform::{transform_dictionary_word, NUM_TRANSFORMS};
use crate::dictionary::{dictionary_word, SIZE_BITS_BY_LENGTH};
use crate::huffman::{
    build_code_lengths_table, build_huffman_table, build_simple_huffman_table, decode_symbol,
    HuffmanCode, HUFFMAN_MAX_CODE_LENGTH_CODE_LENGTH, HUFFMAN_TABLE_BITS,
};
use crate::prefix::{CmdLutElement, BLOCK_LENGTH_PREFIX_CODE, CMD_LUT};
use crate::state::{
    BlockLengthSubstate, ContextMapSubstate, DecodeU8Substate, DecoderState, HuffmanSubstate,
    HuffmanTreeGroup, MetablockHeaderSubstate, RunningState, TreeGroupSubstate,
    UncompressedSubstate,
};

use thiserror::Error;

/// Stream-format and resource failures, named after their cause in the
/// stream layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("EXUBERANT_NIBBLE")]
    ExuberantNibble,
    #[error("RESERVED")]
    Reserved,
    #[error("EXUBERANT_META_NIBBLE")]
    ExuberantMetaNibble,
    #[error("SIMPLE_HUFFMAN_ALPHABET")]
    SimpleHuffmanAlphabet,
    #[error("SIMPLE_HUFFMAN_SAME")]
    SimpleHuffmanSame,
    #[error("CL_SPACE")]
    ClSpace,
    #[error("HUFFMAN_SPACE")]
    HuffmanSpace,
    #[error("CONTEXT_MAP_REPEAT")]
    ContextMapRepeat,
    #[error("BLOCK_LENGTH_1")]
    BlockLength1,
    #[error("BLOCK_LENGTH_2")]
    BlockLength2,
    #[error("TRANSFORM")]
    Transform,
    #[error("DICTIONARY")]
    Dictionary,
    #[error("WINDOW_BITS")]
    WindowBits,
    #[error("PADDING_1")]
    Padding1,
    #[error("PADDING_2")]
    Padding2,
    #[error("DISTANCE")]
    Distance,
    #[error("INVALID_ARGUMENTS")]
    InvalidArguments,
}

/// Outcome of one decompression call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderResult {
    /// The stream decoded completely.
    Success,
    NeedsMoreInput,
    NeedsMoreOutput,
    Error(DecodeError),
}

use DecoderResult::{NeedsMoreInput, NeedsMoreOutput, Success};

/// Slack past the ring buffer proper: two 16-byte copy over-writes plus a
/// transformed dictionary word (5 prefix + 24 base + 8 suffix).
const RING_BUFFER_WRITE_AHEAD_SLACK: usize = 42;

const CODE_LENGTH_CODE_ORDER: [usize; CODE_LENGTH_CODES] =
    [1, 2, 3, 4, 0, 5, 17, 6, 16, 7, 8, 9, 10, 11, 12, 13, 14, 15];

/// Fixed prefix code for the code-length-code lengths, keyed on 4 peeked
/// bits.
const CODE_LENGTH_PREFIX_LENGTH: [u8; 16] = [2, 2, 2, 3, 2, 2, 2, 4, 2, 2, 2, 3, 2, 2, 2, 4];
const CODE_LENGTH_PREFIX_VALUE: [u8; 16] = [0, 4, 3, 2, 0, 4, 3, 1, 0, 4, 3, 2, 0, 4, 3, 5];

pub struct Decoder {
    s: DecoderState,
    error: Option<DecodeError>,
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder::new()
    }
}

impl Decoder {
    pub fn new() -> Decoder {
        Decoder {
            s: DecoderState::new(),
            error: None,
        }
    }

    /// Accept the large-window escape in the stream header.
    pub fn set_large_window(&mut self, enabled: bool) {
        if self.s.state == RunningState::Uninited {
            self.s.large_window = enabled;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.s.state == RunningState::Done && !self.has_more_output()
    }

    pub fn error(&self) -> Option<DecodeError> {
        self.error
    }

    pub fn has_more_output(&self) -> bool {
        if self.error.is_some() {
            return false;
        }
        !self.s.ringbuffer.is_empty() && self.unwritten_bytes(false) != 0
    }

    fn unwritten_bytes(&self, wrap: bool) -> usize {
        let pos = if wrap && self.s.pos > self.s.ringbuffer_size {
            self.s.ringbuffer_size
        } else {
            self.s.pos
        };
        let partial_pos_rb = self.s.rb_roundtrips * self.s.ringbuffer_size + pos;
        partial_pos_rb - self.s.partial_pos_out
    }

    /// Pushes finished ring-buffer content into `output`. With `force`,
    /// reports `NeedsMoreOutput` when output fills before the buffered
    /// bytes are out even though the ring buffer could still grow.
    fn write_ring_buffer(
        &mut self,
        output: &mut [u8],
        written: &mut usize,
        force: bool,
    ) -> DecoderResult {
        let s = &mut self.s;
        if s.meta_block_remaining_len < 0 {
            return DecoderResult::Error(DecodeError::BlockLength1);
        }
        let start = s.partial_pos_out & s.ringbuffer_mask;
        let to_write = {
            let pos = if s.pos > s.ringbuffer_size {
                s.ringbuffer_size
            } else {
                s.pos
            };
            s.rb_roundtrips * s.ringbuffer_size + pos - s.partial_pos_out
        };
        let available = output.len() - *written;
        let num_written = available.min(to_write);
        if num_written > 0 {
            output[*written..*written + num_written]
                .copy_from_slice(&s.ringbuffer[start..start + num_written]);
            *written += num_written;
            s.partial_pos_out += num_written;
        }
        if num_written < to_write {
            if s.ringbuffer_size == 1 << s.window_bits || force {
                return NeedsMoreOutput;
            } else {
                return Success;
            }
        }
        // Wrap only once the buffer has grown to the window size.
        if s.ringbuffer_size == 1 << s.window_bits && s.pos >= s.ringbuffer_size {
            s.pos -= s.ringbuffer_size;
            s.rb_roundtrips += 1;
            s.should_wrap_ringbuffer = s.pos != 0;
        }
        Success
    }

    fn wrap_ring_buffer(&mut self) {
        let s = &mut self.s;
        if s.should_wrap_ringbuffer {
            let (head, tail) = s.ringbuffer.split_at_mut(s.ringbuffer_size);
            head[..s.pos].copy_from_slice(&tail[..s.pos]);
            s.should_wrap_ringbuffer = false;
        }
    }

    /// Grows the ring buffer to `new_ringbuffer_size`, carrying content.
    fn ensure_ring_buffer(&mut self) {
        let s = &mut self.s;
        if s.ringbuffer_size == s.new_ringbuffer_size {
            return;
        }
        let mut new_ringbuffer = vec![0u8; s.new_ringbuffer_size + RING_BUFFER_WRITE_AHEAD_SLACK];
        if !s.ringbuffer.is_empty() {
            new_ringbuffer[..s.pos].copy_from_slice(&s.ringbuffer[..s.pos]);
        }
        s.ringbuffer = new_ringbuffer;
        s.ringbuffer_size = s.new_ringbuffer_size;
        s.ringbuffer_mask = s.new_ringbuffer_size - 1;
    }

    /// Picks the smallest feasible ring buffer for the known output size.
    fn calculate_ring_buffer_size(&mut self) {
        let s = &mut self.s;
        let window_size = 1usize << s.window_bits;
        let mut new_ringbuffer_size = window_size;
        if s.ringbuffer_size == window_size {
            return;
        }
        if s.is_metadata {
            return;
        }
        let mut min_size = if s.ringbuffer_size != 0 {
            s.ringbuffer_size
        } else {
            1024
        };
        let output_size = if s.ringbuffer.is_empty() { 0 } else { s.pos };
        min_size = min_size.max(output_size + s.meta_block_remaining_len as usize);
        while (new_ringbuffer_size >> 1) >= min_size {
            new_ringbuffer_size >>= 1;
        }
        s.new_ringbuffer_size = new_ringbuffer_size;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Field decoders
    // ─────────────────────────────────────────────────────────────────────

    /// WBITS per RFC 7932 section 9.1, plus the large-window escape.
    /// Precondition: at least 8 bits in the window.
    fn decode_window_bits(&mut self, input: &[u8]) -> DecoderResult {
        let s = &mut self.s;
        let large_window = s.large_window;
        s.large_window = false;
        let br = &mut s.br;
        if br.read_bits(input, 1) == 0 {
            s.window_bits = 16;
            return Success;
        }
        let n = br.take_bits(3);
        if n != 0 {
            s.window_bits = 17 + n;
            return Success;
        }
        let n = br.take_bits(3);
        if n == 1 {
            if large_window {
                if br.take_bits(1) == 1 {
                    return DecoderResult::Error(DecodeError::WindowBits);
                }
                s.large_window = true;
                return Success;
            } else {
                return DecoderResult::Error(DecodeError::WindowBits);
            }
        }
        if n != 0 {
            s.window_bits = 8 + n;
            return Success;
        }
        s.window_bits = 17;
        Success
    }

    /// A value in 0..=255, 1..11 bits.
    fn decode_var_len_u8(&mut self, input: &[u8], value: &mut u32) -> DecoderResult {
        let s = &mut self.s;
        let mut bits = 0u32;
        loop {
            match s.substate_decode_u8 {
                DecodeU8Substate::None => {
                    if !s.br.safe_read_bits(input, 1, &mut bits) {
                        return NeedsMoreInput;
                    }
                    if bits == 0 {
                        *value = 0;
                        return Success;
                    }
                    s.substate_decode_u8 = DecodeU8Substate::Short;
                }
                DecodeU8Substate::Short => {
                    if !s.br.safe_read_bits(input, 3, &mut bits) {
                        return NeedsMoreInput;
                    }
                    if bits == 0 {
                        *value = 1;
                        s.substate_decode_u8 = DecodeU8Substate::None;
                        return Success;
                    }
                    // The exponent must survive a yield before the payload.
                    s.vint_scratch = bits;
                    s.substate_decode_u8 = DecodeU8Substate::Long;
                }
                DecodeU8Substate::Long => {
                    if !s.br.safe_read_bits(input, s.vint_scratch, &mut bits) {
                        return NeedsMoreInput;
                    }
                    *value = (1 << s.vint_scratch) + bits;
                    s.substate_decode_u8 = DecodeU8Substate::None;
                    return Success;
                }
            }
        }
    }

    /// Meta-block length and flags, 2..31 bits.
    fn decode_meta_block_length(&mut self, input: &[u8]) -> DecoderResult {
        let s = &mut self.s;
        let mut bits = 0u32;
        loop {
            match s.substate_metablock_header {
                MetablockHeaderSubstate::None => {
                    if !s.br.safe_read_bits(input, 1, &mut bits) {
                        return NeedsMoreInput;
                    }
                    s.is_last_metablock = bits != 0;
                    s.meta_block_remaining_len = 0;
                    s.is_uncompressed = false;
                    s.is_metadata = false;
                    s.substate_metablock_header = if s.is_last_metablock {
                        MetablockHeaderSubstate::Empty
                    } else {
                        MetablockHeaderSubstate::Nibbles
                    };
                }
                MetablockHeaderSubstate::Empty => {
                    if !s.br.safe_read_bits(input, 1, &mut bits) {
                        return NeedsMoreInput;
                    }
                    if bits != 0 {
                        s.substate_metablock_header = MetablockHeaderSubstate::None;
                        return Success;
                    }
                    s.substate_metablock_header = MetablockHeaderSubstate::Nibbles;
                }
                MetablockHeaderSubstate::Nibbles => {
                    if !s.br.safe_read_bits(input, 2, &mut bits) {
                        return NeedsMoreInput;
                    }
                    s.size_nibbles = bits + 4;
                    s.loop_counter = 0;
                    if bits == 3 {
                        s.is_metadata = true;
                        s.substate_metablock_header = MetablockHeaderSubstate::Reserved;
                        continue;
                    }
                    s.substate_metablock_header = MetablockHeaderSubstate::Size;
                }
                MetablockHeaderSubstate::Size => {
                    let mut i = s.loop_counter as u32;
                    while i < s.size_nibbles {
                        if !s.br.safe_read_bits(input, 4, &mut bits) {
                            s.loop_counter = i as i64;
                            return NeedsMoreInput;
                        }
                        if i + 1 == s.size_nibbles && s.size_nibbles > 4 && bits == 0 {
                            return DecoderResult::Error(DecodeError::ExuberantNibble);
                        }
                        s.meta_block_remaining_len |= i64::from(bits) << (i * 4);
                        i += 1;
                    }
                    s.substate_metablock_header = MetablockHeaderSubstate::Uncompressed;
                }
                MetablockHeaderSubstate::Uncompressed => {
                    if !s.is_last_metablock {
                        if !s.br.safe_read_bits(input, 1, &mut bits) {
                            return NeedsMoreInput;
                        }
                        s.is_uncompressed = bits != 0;
                    }
                    s.meta_block_remaining_len += 1;
                    s.substate_metablock_header = MetablockHeaderSubstate::None;
                    return Success;
                }
                MetablockHeaderSubstate::Reserved => {
                    if !s.br.safe_read_bits(input, 1, &mut bits) {
                        return NeedsMoreInput;
                    }
                    if bits != 0 {
                        return DecoderResult::Error(DecodeError::Reserved);
                    }
                    s.substate_metablock_header = MetablockHeaderSubstate::Bytes;
                }
                MetablockHeaderSubstate::Bytes => {
                    if !s.br.safe_read_bits(input, 2, &mut bits) {
                        return NeedsMoreInput;
                    }
                    if bits == 0 {
                        s.substate_metablock_header = MetablockHeaderSubstate::None;
                        return Success;
                    }
                    s.size_nibbles = bits;
                    s.substate_metablock_header = MetablockHeaderSubstate::Metadata;
                }
                MetablockHeaderSubstate::Metadata => {
                    let mut i = s.loop_counter as u32;
                    while i < s.size_nibbles {
                        if !s.br.safe_read_bits(input, 8, &mut bits) {
                            s.loop_counter = i as i64;
                            return NeedsMoreInput;
                        }
                        if i + 1 == s.size_nibbles && s.size_nibbles > 1 && bits == 0 {
                            return DecoderResult::Error(DecodeError::ExuberantMetaNibble);
                        }
                        s.meta_block_remaining_len |= i64::from(bits) << (i * 8);
                        i += 1;
                    }
                    s.meta_block_remaining_len += 1;
                    s.substate_metablock_header = MetablockHeaderSubstate::None;
                    return Success;
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Prefix-code reading
    // ─────────────────────────────────────────────────────────────────────

    /// The 1..4 explicit symbols of a simple code, landing in
    /// `symbols_scratch`.
    fn read_simple_huffman_symbols(
        &mut self,
        input: &[u8],
        alphabet_size: u32,
        max_symbol: u32,
    ) -> DecoderResult {
        let s = &mut self.s;
        let max_bits = 32 - (alphabet_size - 1).leading_zeros();
        let mut i = s.sub_loop_counter;
        let num_symbols = s.symbol;
        while i <= num_symbols {
            let mut v = 0u32;
            if !s.br.safe_read_bits(input, max_bits, &mut v) {
                s.sub_loop_counter = i;
                s.substate_huffman = HuffmanSubstate::SimpleRead;
                return NeedsMoreInput;
            }
            if v >= max_symbol {
                return DecoderResult::Error(DecodeError::SimpleHuffmanAlphabet);
            }
            s.symbols_scratch[i as usize] = v as u16;
            i += 1;
        }
        let symbols = &s.symbols_scratch;
        for i in 0..num_symbols as usize {
            for k in i + 1..=num_symbols as usize {
                if symbols[i] == symbols[k] {
                    return DecoderResult::Error(DecodeError::SimpleHuffmanSame);
                }
            }
        }
        Success
    }

    /// The lengths of the code-length code, written in the fixed storage
    /// order under the fixed 5-symbol code.
    fn read_code_length_code_lengths(&mut self, input: &[u8]) -> DecoderResult {
        let s = &mut self.s;
        let mut num_codes = s.repeat;
        let mut space = s.space;
        let mut i = s.sub_loop_counter;
        while (i as usize) < CODE_LENGTH_CODES {
            let code_len_idx = CODE_LENGTH_CODE_ORDER[i as usize];
            let mut ix = 0u32;
            if !s.br.safe_get_bits(input, 4, &mut ix) {
                let available_bits = s.br.available_bits();
                ix = if available_bits != 0 {
                    s.br.peek_bits(4.min(available_bits))
                } else {
                    0
                };
                if u32::from(CODE_LENGTH_PREFIX_LENGTH[ix as usize]) > available_bits {
                    s.sub_loop_counter = i;
                    s.repeat = num_codes;
                    s.space = space;
                    s.substate_huffman = HuffmanSubstate::Complex;
                    return NeedsMoreInput;
                }
            }
            let v = u32::from(CODE_LENGTH_PREFIX_VALUE[ix as usize]);
            s.br.drop_bits(u32::from(CODE_LENGTH_PREFIX_LENGTH[ix as usize]));
            s.code_length_code_lengths[code_len_idx] = v as u8;
            if v != 0 {
                space = space.wrapping_sub(32 >> v);
                num_codes += 1;
                if space.wrapping_sub(1) >= 32 {
                    // Space exhausted (or wrapped): the code is complete.
                    break;
                }
            }
            i += 1;
        }
        if num_codes != 1 && space != 0 {
            return DecoderResult::Error(DecodeError::ClSpace);
        }
        Success
    }

    /// Symbol code lengths under the freshly built code-length code,
    /// including the two repeat codes. Lengths land in
    /// `code_lengths_scratch`; `space` tracks completeness.
    fn read_symbol_code_lengths(&mut self, input: &[u8], alphabet_size: u32) -> DecoderResult {
        let s = &mut self.s;
        let mut symbol = s.symbol;
        let mut repeat = s.repeat;
        let mut space = s.space;
        let mut prev_code_len = s.prev_code_len;
        let mut repeat_code_len = s.repeat_code_len;
        while symbol < alphabet_size && space > 0 {
            // The code-length symbol plus its extra bits must land
            // atomically; a failed tail read rolls the symbol back too.
            let memento = s.br.save_state();
            let code_len = match Self::safe_read_symbol(&mut s.br, input, &s.cl_table) {
                Some(c) => c,
                None => {
                    s.symbol = symbol;
                    s.repeat = repeat;
                    s.space = space;
                    s.prev_code_len = prev_code_len;
                    s.repeat_code_len = repeat_code_len;
                    return NeedsMoreInput;
                }
            };
            if code_len < REPEAT_PREVIOUS_CODE_LENGTH {
                // A plain length: ends any repeat run.
                repeat = 0;
                if code_len != 0 {
                    s.code_lengths_scratch[symbol as usize] = code_len as u8;
                    prev_code_len = code_len;
                    space = space.wrapping_sub(32768 >> code_len);
                }
                symbol += 1;
            } else {
                let extra_bits = code_len - 14;
                let new_len = if code_len == REPEAT_PREVIOUS_CODE_LENGTH {
                    prev_code_len
                } else {
                    0
                };
                let mut repeat_delta = 0u32;
                if !s.br.safe_read_bits(input, extra_bits, &mut repeat_delta) {
                    s.br.restore_state(&memento);
                    s.symbol = symbol;
                    s.repeat = repeat;
                    s.space = space;
                    s.prev_code_len = prev_code_len;
                    s.repeat_code_len = repeat_code_len;
                    return NeedsMoreInput;
                }
                if repeat_code_len != new_len {
                    repeat = 0;
                    repeat_code_len = new_len;
                }
                let old_repeat = repeat;
                if repeat > 0 {
                    repeat = (repeat - 2) << extra_bits;
                }
                repeat += repeat_delta + 3;
                let repeat_delta = repeat - old_repeat;
                if symbol + repeat_delta > alphabet_size {
                    // Overflowing repeat: mark the space check to fail.
                    symbol = alphabet_size;
                    space = 0xFFFFF;
                    break;
                }
                if repeat_code_len != 0 {
                    for sym in symbol..symbol + repeat_delta {
                        s.code_lengths_scratch[sym as usize] = repeat_code_len as u8;
                    }
                    space = space.wrapping_sub(repeat_delta << (15 - repeat_code_len));
                }
                symbol += repeat_delta;
            }
        }
        s.symbol = symbol;
        s.repeat = repeat;
        s.prev_code_len = prev_code_len;
        s.repeat_code_len = repeat_code_len;
        s.space = space;
        Success
    }

    /// One complete prefix-code description: either a simple code (explicit
    /// symbols) or a complex one (code-length-coded lengths).
    fn read_huffman_code(
        &mut self,
        input: &[u8],
        alphabet_size: u32,
        max_symbol: u32,
        out: &mut Vec<HuffmanCode>,
    ) -> DecoderResult {
        let alphabet_size = alphabet_size & 0x7FF;
        loop {
            match self.s.substate_huffman {
                HuffmanSubstate::None => {
                    let mut v = 0u32;
                    if !self.s.br.safe_read_bits(input, 2, &mut v) {
                        return NeedsMoreInput;
                    }
                    self.s.sub_loop_counter = v;
                    // 1 marks a simple code; other values count leading
                    // zero lengths to skip in the complex form.
                    if v != 1 {
                        self.s.space = 32;
                        self.s.repeat = 0; // num_codes
                        self.s.code_length_code_lengths = [0; CODE_LENGTH_CODES];
                        self.s.substate_huffman = HuffmanSubstate::Complex;
                        continue;
                    }
                    self.s.substate_huffman = HuffmanSubstate::SimpleSize;
                }
                HuffmanSubstate::SimpleSize => {
                    let mut v = 0u32;
                    if !self.s.br.safe_read_bits(input, 2, &mut v) {
                        return NeedsMoreInput;
                    }
                    self.s.symbol = v; // NSYM - 1
                    self.s.sub_loop_counter = 0;
                    self.s.substate_huffman = HuffmanSubstate::SimpleRead;
                }
                HuffmanSubstate::SimpleRead => {
                    let result = self.read_simple_huffman_symbols(input, alphabet_size, max_symbol);
                    if result != Success {
                        return result;
                    }
                    self.s.substate_huffman = HuffmanSubstate::SimpleBuild;
                }
                HuffmanSubstate::SimpleBuild => {
                    if self.s.symbol == 3 {
                        let mut bits = 0u32;
                        if !self.s.br.safe_read_bits(input, 1, &mut bits) {
                            return NeedsMoreInput;
                        }
                        self.s.symbol += bits; // 4 selects the skewed shape
                    }
                    let num_symbols = self.s.symbol.min(3) + 1;
                    let tree_select = self.s.symbol == 4;
                    *out = build_simple_huffman_table(
                        HUFFMAN_TABLE_BITS,
                        &self.s.symbols_scratch[..num_symbols as usize],
                        num_symbols,
                        tree_select,
                    );
                    self.s.substate_huffman = HuffmanSubstate::None;
                    return Success;
                }
                HuffmanSubstate::Complex => {
                    let result = self.read_code_length_code_lengths(input);
                    if result != Success {
                        return result;
                    }
                    self.s.cl_table = build_code_lengths_table(&self.s.code_length_code_lengths);
                    self.s.code_lengths_scratch = vec![0; alphabet_size as usize];
                    self.s.symbol = 0;
                    self.s.prev_code_len = crate::constants::INITIAL_REPEATED_CODE_LENGTH;
                    self.s.repeat = 0;
                    self.s.repeat_code_len = 0;
                    self.s.space = 32768;
                    self.s.substate_huffman = HuffmanSubstate::LengthSymbols;
                }
                HuffmanSubstate::LengthSymbols => {
                    let result = self.read_symbol_code_lengths(input, max_symbol);
                    if result != Success {
                        return result;
                    }
                    if self.s.space != 0 {
                        return DecoderResult::Error(DecodeError::HuffmanSpace);
                    }
                    *out = build_huffman_table(HUFFMAN_TABLE_BITS, &self.s.code_lengths_scratch);
                    self.s.substate_huffman = HuffmanSubstate::None;
                    return Success;
                }
            }
        }
    }

    /// Reads one symbol through a two-level table, byte-refilling as
    /// needed; `None` when input ran out (bit reader state untouched).
    fn safe_read_symbol(
        br: &mut crate::bit_reader::BitReader,
        input: &[u8],
        table: &[HuffmanCode],
    ) -> Option<u32> {
        let mut val = 0u32;
        if br.safe_get_bits(input, 15, &mut val) {
            let (sym, consumed) = decode_symbol(val, table);
            br.drop_bits(consumed);
            return Some(sym);
        }
        // Short input tail: decode from what is left if it suffices.
        let memento = br.save_state();
        loop {
            let avail = br.available_bits();
            let val = if avail > 0 { br.peek_bits(avail.min(15)) } else { 0 };
            let entry = table[(val & 0xFF) as usize];
            let needed = if u32::from(entry.bits) > HUFFMAN_TABLE_BITS {
                // Two-level: need the root bits plus the sub-entry length.
                if avail >= HUFFMAN_TABLE_BITS {
                    let nbits = u32::from(entry.bits) - HUFFMAN_TABLE_BITS;
                    let low = (val & 0xFF) as usize;
                    let sub = low
                        + entry.value as usize
                        + ((val >> HUFFMAN_TABLE_BITS) & bit_mask(nbits)) as usize;
                    HUFFMAN_TABLE_BITS + u32::from(table[sub].bits)
                } else {
                    u32::from(entry.bits)
                }
            } else {
                u32::from(entry.bits)
            };
            if needed <= avail {
                let (sym, consumed) = decode_symbol(val, table);
                br.drop_bits(consumed);
                return Some(sym);
            }
            if !br.pull_byte(input) {
                br.restore_state(&memento);
                return None;
            }
        }
    }

    /// Block length: a prefix symbol plus 2..24 extra bits.
    fn safe_read_block_length(
        &mut self,
        input: &[u8],
        tree_index: usize,
        result: &mut u32,
    ) -> bool {
        let s = &mut self.s;
        let index = if s.substate_read_block_length == BlockLengthSubstate::None {
            match Self::safe_read_symbol(&mut s.br, input, &s.block_len_trees[tree_index]) {
                Some(ix) => ix,
                None => return false,
            }
        } else {
            s.block_length_index
        };
        let range = BLOCK_LENGTH_PREFIX_CODE[index as usize];
        let mut bits = 0u32;
        if !s.br.safe_read_bits(input, range.nbits, &mut bits) {
            s.block_length_index = index;
            s.substate_read_block_length = BlockLengthSubstate::Suffix;
            return false;
        }
        *result = range.offset + bits;
        s.substate_read_block_length = BlockLengthSubstate::None;
        true
    }

    /// Block-switch: new block type and length for one category.
    fn decode_block_type_and_length(&mut self, input: &[u8], tree_type: usize) -> bool {
        let max_block_type = self.s.num_block_types[tree_type];
        if max_block_type <= 1 {
            return false;
        }
        let memento = self.s.br.save_state();
        let block_type = match Self::safe_read_symbol(
            &mut self.s.br,
            input,
            &self.s.block_type_trees[tree_type],
        ) {
            Some(t) => t,
            None => return false,
        };
        let mut block_length = 0u32;
        if !self.safe_read_block_length(input, tree_type, &mut block_length) {
            self.s.substate_read_block_length = BlockLengthSubstate::None;
            self.s.br.restore_state(&memento);
            return false;
        }
        self.s.block_length[tree_type] = block_length;

        let ringbuffer = &mut self.s.block_type_rb[tree_type * 2..tree_type * 2 + 2];
        let block_type = if block_type == 1 {
            ringbuffer[1] + 1
        } else if block_type == 0 {
            ringbuffer[0]
        } else {
            block_type - 2
        };
        let block_type = if block_type >= max_block_type {
            block_type - max_block_type
        } else {
            block_type
        };
        ringbuffer[0] = ringbuffer[1];
        ringbuffer[1] = block_type;
        true
    }

    fn detect_trivial_literal_block_types(&mut self) {
        let s = &mut self.s;
        s.trivial_literal_contexts = [0; 8];
        for i in 0..s.num_block_types[0] as usize {
            let offset = i << LITERAL_CONTEXT_BITS;
            let sample = s.context_map[offset];
            let mut err = 0u8;
            for j in 0..(1usize << LITERAL_CONTEXT_BITS) {
                err |= s.context_map[offset + j] ^ sample;
            }
            if err == 0 {
                s.trivial_literal_contexts[i >> 5] |= 1 << (i & 31);
            }
        }
    }

    /// Re-resolves the literal tree, context LUT and triviality after a
    /// literal block switch.
    fn prepare_literal_decoding(&mut self) {
        let s = &mut self.s;
        let block_type = s.block_type_rb[1] as usize;
        let context_offset = block_type << LITERAL_CONTEXT_BITS;
        s.context_map_offset = context_offset;
        let trivial = s.trivial_literal_contexts[block_type >> 5];
        s.trivial_literal_context = (trivial >> (block_type & 31)) & 1 != 0;
        s.literal_htree_index = s.context_map[context_offset] as usize;
        let mode = s.context_modes[block_type] & 3;
        s.context_lookup = context_lut(ContextMode::from_bits(u32::from(mode)));
    }

    fn decode_literal_block_switch(&mut self, input: &[u8]) -> bool {
        if !self.decode_block_type_and_length(input, 0) {
            return false;
        }
        self.prepare_literal_decoding();
        true
    }

    fn decode_command_block_switch(&mut self, input: &[u8]) -> bool {
        if !self.decode_block_type_and_length(input, 1) {
            return false;
        }
        true
    }

    fn decode_distance_block_switch(&mut self, input: &[u8]) -> bool {
        if !self.decode_block_type_and_length(input, 2) {
            return false;
        }
        let s = &mut self.s;
        s.dist_context_map_offset = (s.block_type_rb[5] as usize) << DISTANCE_CONTEXT_BITS;
        s.dist_htree_index =
            s.dist_context_map[s.dist_context_map_offset + s.distance_context as usize] as usize;
        true
    }

    /// Context map: RLEMAX, a prefix code over cluster ids and run codes,
    /// the entries, then the optional inverse-MTF transform.
    fn decode_context_map(
        &mut self,
        input: &[u8],
        context_map_size: u32,
        is_dist: bool,
    ) -> DecoderResult {
        loop {
            match self.s.substate_context_map {
                ContextMapSubstate::None => {
                    let mut num_htrees = 0u32;
                    let result = self.decode_var_len_u8(input, &mut num_htrees);
                    if result != Success {
                        return result;
                    }
                    let num_htrees = num_htrees + 1;
                    if is_dist {
                        self.s.num_dist_htrees = num_htrees;
                        self.s.dist_context_map = vec![0; context_map_size as usize];
                    } else {
                        self.s.num_literal_htrees = num_htrees;
                        self.s.context_map = vec![0; context_map_size as usize];
                    }
                    self.s.context_index = 0;
                    if num_htrees <= 1 {
                        return Success;
                    }
                    self.s.substate_context_map = ContextMapSubstate::ReadPrefix;
                }
                ContextMapSubstate::ReadPrefix => {
                    // The next stage reads at least 4 bits, so peeking 5 is
                    // safe here.
                    let mut bits = 0u32;
                    if !self.s.br.safe_get_bits(input, 5, &mut bits) {
                        return NeedsMoreInput;
                    }
                    if bits & 1 != 0 {
                        self.s.max_run_length_prefix = (bits >> 1) + 1;
                        self.s.br.drop_bits(5);
                    } else {
                        self.s.max_run_length_prefix = 0;
                        self.s.br.drop_bits(1);
                    }
                    self.s.substate_context_map = ContextMapSubstate::Huffman;
                }
                ContextMapSubstate::Huffman => {
                    let num_htrees = if is_dist {
                        self.s.num_dist_htrees
                    } else {
                        self.s.num_literal_htrees
                    };
                    let alphabet_size = num_htrees + self.s.max_run_length_prefix;
                    let mut table = std::mem::take(&mut self.s.context_map_table);
                    let result = self.read_huffman_code(input, alphabet_size, alphabet_size, &mut table);
                    self.s.context_map_table = table;
                    if result != Success {
                        return result;
                    }
                    self.s.code = 0xFFFF;
                    self.s.substate_context_map = ContextMapSubstate::Decode;
                }
                ContextMapSubstate::Decode => {
                    let mut context_index = self.s.context_index;
                    let max_run_length_prefix = self.s.max_run_length_prefix;
                    let mut code = self.s.code;
                    let mut skip_preamble = code != 0xFFFF;
                    while context_index < context_map_size || skip_preamble {
                        if !skip_preamble {
                            code = match Self::safe_read_symbol(
                                &mut self.s.br,
                                input,
                                &self.s.context_map_table,
                            ) {
                                Some(c) => c,
                                None => {
                                    self.s.code = 0xFFFF;
                                    self.s.context_index = context_index;
                                    return NeedsMoreInput;
                                }
                            };
                            if code == 0 {
                                self.set_context_map_entry(is_dist, context_index, 0);
                                context_index += 1;
                                continue;
                            }
                            if code > max_run_length_prefix {
                                self.set_context_map_entry(
                                    is_dist,
                                    context_index,
                                    (code - max_run_length_prefix) as u8,
                                );
                                context_index += 1;
                                continue;
                            }
                        } else {
                            skip_preamble = false;
                        }
                        // Zero-run: `code` extra bits give the length.
                        {
                            let mut reps = 0u32;
                            if !self.s.br.safe_read_bits(input, code, &mut reps) {
                                self.s.code = code;
                                self.s.context_index = context_index;
                                return NeedsMoreInput;
                            }
                            let reps = reps + (1 << code);
                            if context_index + reps > context_map_size {
                                return DecoderResult::Error(DecodeError::ContextMapRepeat);
                            }
                            for _ in 0..reps {
                                self.set_context_map_entry(is_dist, context_index, 0);
                                context_index += 1;
                            }
                        }
                    }
                    self.s.substate_context_map = ContextMapSubstate::Transform;
                }
                ContextMapSubstate::Transform => {
                    let mut bits = 0u32;
                    if !self.s.br.safe_read_bits(input, 1, &mut bits) {
                        return NeedsMoreInput;
                    }
                    if bits != 0 {
                        let map = if is_dist {
                            &mut self.s.dist_context_map
                        } else {
                            &mut self.s.context_map
                        };
                        inverse_move_to_front_transform(map);
                    }
                    self.s.substate_context_map = ContextMapSubstate::None;
                    return Success;
                }
            }
        }
    }

    #[inline]
    fn set_context_map_entry(&mut self, is_dist: bool, index: u32, value: u8) {
        if is_dist {
            self.s.dist_context_map[index as usize] = value;
        } else {
            self.s.context_map[index as usize] = value;
        }
    }

    /// Decodes all prefix codes of one tree group.
    fn huffman_tree_group_decode(&mut self, input: &[u8], which: usize) -> DecoderResult {
        if self.s.substate_tree_group != TreeGroupSubstate::Loop {
            self.s.substate_tree_group = TreeGroupSubstate::Loop;
        }
        loop {
            let (alphabet_size, max_symbol, done) = {
                let group = self.group(which);
                (
                    group.alphabet_size,
                    group.max_symbol,
                    group.htrees.len() == group.num_htrees as usize,
                )
            };
            if done {
                break;
            }
            let mut table = Vec::new();
            let result = self.read_huffman_code(input, alphabet_size, max_symbol, &mut table);
            if result != Success {
                return result;
            }
            self.group_mut(which).htrees.push(table);
        }
        self.s.substate_tree_group = TreeGroupSubstate::None;
        Success
    }

    fn group(&self, which: usize) -> &HuffmanTreeGroup {
        match which {
            0 => &self.s.literal_hgroup,
            1 => &self.s.insert_copy_hgroup,
            _ => &self.s.distance_hgroup,
        }
    }

    fn group_mut(&mut self, which: usize) -> &mut HuffmanTreeGroup {
        match which {
            0 => &mut self.s.literal_hgroup,
            1 => &mut self.s.insert_copy_hgroup,
            _ => &mut self.s.distance_hgroup,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Command loop
    // ─────────────────────────────────────────────────────────────────────

    /// Resolves distance codes 0..15 against the distance cache.
    fn take_distance_from_ring_buffer(&mut self) {
        let s = &mut self.s;
        if s.distance_code == 0 {
            s.dist_rb_idx = s.dist_rb_idx.wrapping_sub(1);
            s.distance_code = i64::from(s.dist_rb[s.dist_rb_idx & 3]);
            // Compensates the double cache roll for dictionary items.
            s.distance_context = 1;
        } else {
            let code = s.distance_code as usize;
            let (slot, delta) = crate::command::DISTANCE_SHORT_CODES[code];
            let v = (s.dist_rb_idx.wrapping_add(3).wrapping_sub(slot)) & 3;
            let dist = i64::from(s.dist_rb[v]) + i64::from(delta);
            if dist <= 0 {
                // A negative distance surfaces as the DISTANCE error at
                // the range check.
                s.distance_code = 0x7FFF_FFFF;
            } else {
                s.distance_code = dist;
            }
        }
    }

    /// Distance symbol + extra bits → absolute distance (or short code).
    fn safe_read_distance(&mut self, input: &[u8]) -> bool {
        let memento = self.s.br.save_state();
        let tree = self.s.dist_htree_index;
        let code = match Self::safe_read_symbol(
            &mut self.s.br,
            input,
            &self.s.distance_hgroup.htrees[tree],
        ) {
            Some(c) => c,
            None => return false,
        };
        self.s.distance_code = i64::from(code);
        self.s.distance_context = 0;
        if self.s.distance_code & !0xF == 0 {
            self.take_distance_from_ring_buffer();
            self.s.block_length[2] -= 1;
            return true;
        }
        let s = &mut self.s;
        let distval = s.distance_code - i64::from(s.num_direct_distance_codes);
        if distval >= 0 {
            let postfix_mask = i64::from(bit_mask(s.distance_postfix_bits));
            let postfix = distval & postfix_mask;
            let hcode = distval >> s.distance_postfix_bits;
            let nbits = (hcode as u32 >> 1) + 1;
            if nbits > 31 {
                // Such a distance cannot fit the allowed range; poison the
                // value so the range check fails. The stream is already
                // lost, so the skipped extra bits don't matter.
                s.distance_code = i64::from(MAX_ALLOWED_DISTANCE) + NUM_DISTANCE_SHORT_CODES as i64;
                s.block_length[2] -= 1;
                return true;
            }
            let mut bits = 0u32;
            if !s.br.safe_read_bits(input, nbits, &mut bits) {
                s.distance_code = -1; // restore the "read distance" precondition
                s.br.restore_state(&memento);
                return false;
            }
            let offset = ((2 + (hcode & 1)) << nbits) - 4;
            s.distance_code = i64::from(s.num_direct_distance_codes)
                + ((offset + i64::from(bits)) << s.distance_postfix_bits)
                + postfix;
        }
        s.distance_code -= NUM_DISTANCE_SHORT_CODES as i64 - 1;
        s.block_length[2] -= 1;
        true
    }

    /// Insert-and-copy symbol + extra bits.
    fn safe_read_command(&mut self, input: &[u8], insert_length: &mut i64) -> bool {
        let memento = self.s.br.save_state();
        let tree = self.s.block_type_rb[3] as usize;
        let cmd_code = match Self::safe_read_symbol(
            &mut self.s.br,
            input,
            &self.s.insert_copy_hgroup.htrees[tree],
        ) {
            Some(c) => c,
            None => return false,
        };
        let v: CmdLutElement = CMD_LUT[cmd_code as usize];
        self.s.distance_code = i64::from(v.distance_code);
        self.s.distance_context = i32::from(v.context);
        self.s.dist_htree_index = self.s.dist_context_map
            [self.s.dist_context_map_offset + v.context as usize]
            as usize;
        let mut insert_len_extra = 0u32;
        let mut copy_length = 0u32;
        if !self
            .s
            .br
            .safe_read_bits(input, u32::from(v.insert_len_extra_bits), &mut insert_len_extra)
            || !self
                .s
                .br
                .safe_read_bits(input, u32::from(v.copy_len_extra_bits), &mut copy_length)
        {
            self.s.br.restore_state(&memento);
            return false;
        }
        self.s.copy_length = i64::from(copy_length) + i64::from(v.copy_len_offset);
        self.s.block_length[1] -= 1;
        *insert_length = i64::from(v.insert_len_offset) + i64::from(insert_len_extra);
        true
    }

    /// The command loop: insert-and-copy command, its literals, the
    /// distance, then the copy (or dictionary expansion).
    fn process_commands(&mut self, input: &[u8]) -> DecoderResult {
        let mut pos = self.s.pos;
        let mut i = self.s.loop_counter;
        let mut result = Success;

        'outer: loop {
            match self.s.state {
                RunningState::CommandBegin => {
                    if self.s.block_length[1] == 0 {
                        if !self.decode_command_block_switch(input) {
                            result = NeedsMoreInput;
                            break 'outer;
                        }
                        continue 'outer;
                    }
                    if !self.safe_read_command(input, &mut i) {
                        result = NeedsMoreInput;
                        break 'outer;
                    }
                    if i == 0 {
                        self.s.state = RunningState::CommandPostDecodeLiterals;
                        continue 'outer;
                    }
                    self.s.meta_block_remaining_len -= i;
                    self.s.state = RunningState::CommandInner;
                }
                RunningState::CommandInner => {
                    // Literals of the current command.
                    if self.s.trivial_literal_context {
                        loop {
                            if self.s.block_length[0] == 0 {
                                if !self.decode_literal_block_switch(input) {
                                    result = NeedsMoreInput;
                                    break 'outer;
                                }
                                if !self.s.trivial_literal_context {
                                    continue 'outer;
                                }
                            }
                            let tree = self.s.literal_htree_index;
                            let literal = match Self::safe_read_symbol(
                                &mut self.s.br,
                                input,
                                &self.s.literal_hgroup.htrees[tree],
                            ) {
                                Some(l) => l,
                                None => {
                                    result = NeedsMoreInput;
                                    break 'outer;
                                }
                            };
                            self.s.ringbuffer[pos] = literal as u8;
                            self.s.block_length[0] -= 1;
                            pos += 1;
                            if pos == self.s.ringbuffer_size {
                                self.s.state = RunningState::CommandInnerWrite;
                                i -= 1;
                                break 'outer;
                            }
                            i -= 1;
                            if i == 0 {
                                break;
                            }
                        }
                    } else {
                        let mut p1 =
                            self.s.ringbuffer[pos.wrapping_sub(1) & self.s.ringbuffer_mask];
                        let mut p2 =
                            self.s.ringbuffer[pos.wrapping_sub(2) & self.s.ringbuffer_mask];
                        loop {
                            if self.s.block_length[0] == 0 {
                                if !self.decode_literal_block_switch(input) {
                                    result = NeedsMoreInput;
                                    break 'outer;
                                }
                                if self.s.trivial_literal_context {
                                    continue 'outer;
                                }
                            }
                            let ctx = CONTEXT_LUT[self.s.context_lookup + p1 as usize]
                                | CONTEXT_LUT[self.s.context_lookup + 256 + p2 as usize];
                            let tree = self.s.context_map
                                [self.s.context_map_offset + ctx as usize]
                                as usize;
                            let literal = match Self::safe_read_symbol(
                                &mut self.s.br,
                                input,
                                &self.s.literal_hgroup.htrees[tree],
                            ) {
                                Some(l) => l,
                                None => {
                                    result = NeedsMoreInput;
                                    break 'outer;
                                }
                            };
                            p2 = p1;
                            p1 = literal as u8;
                            self.s.ringbuffer[pos] = p1;
                            self.s.block_length[0] -= 1;
                            pos += 1;
                            if pos == self.s.ringbuffer_size {
                                self.s.state = RunningState::CommandInnerWrite;
                                i -= 1;
                                break 'outer;
                            }
                            i -= 1;
                            if i == 0 {
                                break;
                            }
                        }
                    }
                    if self.s.meta_block_remaining_len <= 0 {
                        self.s.state = RunningState::MetablockDone;
                        break 'outer;
                    }
                    self.s.state = RunningState::CommandPostDecodeLiterals;
                }
                RunningState::CommandPostDecodeLiterals => {
                    if self.s.distance_code >= 0 {
                        // Implicit distance: reuse the most recent one.
                        self.s.distance_context = i32::from(self.s.distance_code == 0);
                        self.s.dist_rb_idx = self.s.dist_rb_idx.wrapping_sub(1);
                        self.s.distance_code =
                            i64::from(self.s.dist_rb[self.s.dist_rb_idx & 3]);
                    } else {
                        if self.s.block_length[2] == 0
                            && !self.decode_distance_block_switch(input)
                        {
                            result = NeedsMoreInput;
                            break 'outer;
                        }
                        if !self.safe_read_distance(input) {
                            result = NeedsMoreInput;
                            break 'outer;
                        }
                    }
                    if self.s.max_distance != self.s.max_backward_distance {
                        self.s.max_distance =
                            (pos as isize).min(self.s.max_backward_distance);
                    }
                    i = self.s.copy_length;
                    // Dictionary reference when the distance reaches past
                    // the window.
                    if self.s.distance_code > self.s.max_distance as i64 {
                        if self.s.distance_code > i64::from(MAX_ALLOWED_DISTANCE) {
                            return DecoderResult::Error(DecodeError::Distance);
                        }
                        if i >= MIN_DICTIONARY_WORD_LENGTH as i64
                            && i <= MAX_DICTIONARY_WORD_LENGTH as i64
                        {
                            let i_usize = i as usize;
                            let address = self.s.distance_code
                                - self.s.max_distance as i64
                                - 1;
                            let shift = SIZE_BITS_BY_LENGTH[i_usize];
                            let word_idx = (address & i64::from(bit_mask(shift as u32))) as usize;
                            let transform_idx = (address >> shift) as usize;
                            // The double cache roll is compensated here.
                            self.s.dist_rb_idx = self
                                .s
                                .dist_rb_idx
                                .wrapping_add(self.s.distance_context as usize);
                            if transform_idx < NUM_TRANSFORMS {
                                let word = dictionary_word(i_usize, word_idx);
                                let len = if transform_idx == 0 {
                                    self.s.ringbuffer[pos..pos + i_usize]
                                        .copy_from_slice(word);
                                    i_usize
                                } else {
                                    let mut buf =
                                        [0u8; crate::dictionary::transform::MAX_TRANSFORMED_LENGTH];
                                    let n =
                                        transform_dictionary_word(&mut buf, word, transform_idx);
                                    self.s.ringbuffer[pos..pos + n].copy_from_slice(&buf[..n]);
                                    n
                                };
                                pos += len;
                                self.s.meta_block_remaining_len -= len as i64;
                                if pos >= self.s.ringbuffer_size {
                                    self.s.state = RunningState::CommandPostWrite1;
                                    break 'outer;
                                }
                            } else {
                                return DecoderResult::Error(DecodeError::Transform);
                            }
                        } else {
                            return DecoderResult::Error(DecodeError::Dictionary);
                        }
                    } else {
                        // In-window copy.
                        let distance = self.s.distance_code as usize;
                        let src_start = pos.wrapping_sub(distance) & self.s.ringbuffer_mask;
                        let dst_end = pos + i as usize;
                        let src_end = src_start + i as usize;
                        // Update the distance cache.
                        self.s.dist_rb[self.s.dist_rb_idx & 3] = self.s.distance_code as i32;
                        self.s.dist_rb_idx = self.s.dist_rb_idx.wrapping_add(1);
                        self.s.meta_block_remaining_len -= i;
                        if src_end > pos && dst_end > src_start
                            || dst_end >= self.s.ringbuffer_size
                            || src_end >= self.s.ringbuffer_size
                        {
                            // Overlapping or wrapping copy: byte loop.
                            self.s.state = RunningState::CommandPostWrapCopy;
                            continue 'outer;
                        }
                        // Disjoint, in-bounds: block copy.
                        self.s.ringbuffer.copy_within(src_start..src_end, pos);
                        pos += i as usize;
                    }
                    if self.s.meta_block_remaining_len <= 0 {
                        self.s.state = RunningState::MetablockDone;
                        break 'outer;
                    }
                    self.s.state = RunningState::CommandBegin;
                }
                RunningState::CommandPostWrapCopy => {
                    let mut wrap_guard = self.s.ringbuffer_size - pos;
                    let distance = self.s.distance_code as usize;
                    while i > 0 {
                        i -= 1;
                        self.s.ringbuffer[pos] =
                            self.s.ringbuffer[pos.wrapping_sub(distance) & self.s.ringbuffer_mask];
                        pos += 1;
                        wrap_guard -= 1;
                        if wrap_guard == 0 {
                            self.s.state = RunningState::CommandPostWrite2;
                            break 'outer;
                        }
                    }
                    if self.s.meta_block_remaining_len <= 0 {
                        self.s.state = RunningState::MetablockDone;
                        break 'outer;
                    }
                    self.s.state = RunningState::CommandBegin;
                }
                _ => unreachable!("process_commands entered in {:?}", self.s.state),
            }
        }
        self.s.pos = pos;
        self.s.loop_counter = i;
        result
    }

    // ─────────────────────────────────────────────────────────────────────
    // Driver
    // ─────────────────────────────────────────────────────────────────────

    /// Decodes as much of `input` into `output` as possible. Returns the
    /// result plus consumed and written byte counts. Deterministic across
    /// any split of the stream into calls.
    pub fn decompress_stream(
        &mut self,
        input: &[u8],
        output: &mut [u8],
    ) -> (DecoderResult, usize, usize) {
        if let Some(e) = self.error {
            return (DecoderResult::Error(e), 0, 0);
        }
        let mut written = 0usize;
        // Bytes of `input` moved into the straddle buffer or bit reader.
        let mut main_start = 0usize;
        let mut using_buffer = self.s.buffer_length > 0;
        let mut local_buf = self.s.buffer;
        let mut local_len = self.s.buffer_length;
        let mut result = if using_buffer { NeedsMoreInput } else { Success };
        self.s.br.reset_cursor();

        loop {
            if result != Success {
                match result {
                    NeedsMoreInput => {
                        if !self.s.ringbuffer.is_empty() {
                            // Push what we have; also validates block length.
                            let r = self.write_ring_buffer(output, &mut written, true);
                            if let DecoderResult::Error(e) = r {
                                result = DecoderResult::Error(e);
                                continue;
                            }
                        }
                        if using_buffer {
                            if self.s.br.byte_pos == local_len {
                                // Straddle buffer drained: back to the
                                // caller's input.
                                self.s.buffer_length = 0;
                                local_len = 0;
                                using_buffer = false;
                                self.s.br.reset_cursor();
                                result = Success;
                                continue;
                            } else if main_start < input.len() && local_len < local_buf.len() {
                                // Grow the buffer one byte and retry.
                                local_buf[local_len] = input[main_start];
                                local_len += 1;
                                main_start += 1;
                                self.s.buffer = local_buf;
                                self.s.buffer_length = local_len;
                                result = Success;
                                continue;
                            }
                            // No more input at all: drop the consumed
                            // prefix so the next call starts clean.
                            let bp = self.s.br.byte_pos;
                            local_buf.copy_within(bp..local_len, 0);
                            self.s.buffer = local_buf;
                            self.s.buffer_length = local_len - bp;
                            return (NeedsMoreInput, main_start, written);
                        } else {
                            // Stash the unread tail for the next call.
                            let tail = &input[main_start + self.s.br.byte_pos..];
                            debug_assert!(tail.len() < 8);
                            self.s.buffer[..tail.len()].copy_from_slice(tail);
                            self.s.buffer_length = tail.len();
                            return (NeedsMoreInput, input.len(), written);
                        }
                    }
                    NeedsMoreOutput | DecoderResult::Error(_) => {
                        let consumed = if using_buffer {
                            // Unread buffered bytes survive for the next
                            // call; consumed ones are dropped.
                            let bp = self.s.br.byte_pos;
                            local_buf.copy_within(bp..local_len, 0);
                            self.s.buffer = local_buf;
                            self.s.buffer_length = local_len - bp;
                            main_start
                        } else {
                            self.s.br.unload();
                            main_start + self.s.br.byte_pos
                        };
                        if let DecoderResult::Error(e) = result {
                            self.error = Some(e);
                        }
                        return (result, consumed, written);
                    }
                    Success => unreachable!(),
                }
            }

            let cur_input: &[u8] = if using_buffer {
                &local_buf[..local_len]
            } else {
                &input[main_start..]
            };

            match self.s.state {
                RunningState::Uninited => {
                    // The window field is at most 8 bits; one byte suffices.
                    if !self.s.br.warmup(cur_input) {
                        result = NeedsMoreInput;
                        continue;
                    }
                    result = self.decode_window_bits(cur_input);
                    if result != Success {
                        continue;
                    }
                    if self.s.large_window {
                        self.s.state = RunningState::LargeWindowBits;
                    } else {
                        self.s.state = RunningState::Initialize;
                    }
                }
                RunningState::LargeWindowBits => {
                    let mut bits = 0u32;
                    if !self.s.br.safe_read_bits(cur_input, 6, &mut bits) {
                        result = NeedsMoreInput;
                        continue;
                    }
                    self.s.window_bits = bits;
                    if !(LARGE_MIN_WBITS..=LARGE_MAX_WBITS).contains(&bits) {
                        result = DecoderResult::Error(DecodeError::WindowBits);
                        continue;
                    }
                    self.s.state = RunningState::Initialize;
                }
                RunningState::Initialize => {
                    self.s.max_backward_distance =
                        (1isize << self.s.window_bits) - WINDOW_GAP as isize;
                    self.s.block_type_trees = vec![Vec::new(); 3];
                    self.s.block_len_trees = vec![Vec::new(); 3];
                    self.s.state = RunningState::MetablockBegin;
                }
                RunningState::MetablockBegin => {
                    self.s.metablock_begin();
                    self.s.state = RunningState::MetablockHeader;
                }
                RunningState::MetablockHeader => {
                    result = self.decode_meta_block_length(cur_input);
                    if result != Success {
                        continue;
                    }
                    if (self.s.is_metadata || self.s.is_uncompressed)
                        && !self.s.br.jump_to_byte_boundary()
                    {
                        result = DecoderResult::Error(DecodeError::Padding1);
                        continue;
                    }
                    if self.s.is_metadata {
                        self.s.state = RunningState::Metadata;
                        continue;
                    }
                    if self.s.meta_block_remaining_len == 0 {
                        self.s.state = RunningState::MetablockDone;
                        continue;
                    }
                    self.calculate_ring_buffer_size();
                    if self.s.is_uncompressed {
                        self.s.state = RunningState::Uncompressed;
                        continue;
                    }
                    self.s.loop_counter = 0;
                    self.s.state = RunningState::HuffmanCode0;
                }
                RunningState::Uncompressed => {
                    result = self.copy_uncompressed_block(cur_input, output, &mut written);
                    if result != Success {
                        continue;
                    }
                    self.s.state = RunningState::MetablockDone;
                }
                RunningState::Metadata => {
                    // Metadata payload is read and dropped.
                    while self.s.meta_block_remaining_len > 0 {
                        let mut bits = 0u32;
                        if !self.s.br.safe_read_bits(cur_input, 8, &mut bits) {
                            result = NeedsMoreInput;
                            break;
                        }
                        self.s.meta_block_remaining_len -= 1;
                    }
                    if result == Success {
                        self.s.state = RunningState::MetablockDone;
                    }
                }
                RunningState::HuffmanCode0 => {
                    if self.s.loop_counter >= 3 {
                        self.s.state = RunningState::MetablockHeader2;
                        continue;
                    }
                    let idx = self.s.loop_counter as usize;
                    let mut v = 0u32;
                    result = self.decode_var_len_u8(cur_input, &mut v);
                    if result != Success {
                        continue;
                    }
                    self.s.num_block_types[idx] = v + 1;
                    if self.s.num_block_types[idx] < 2 {
                        self.s.loop_counter += 1;
                        continue;
                    }
                    self.s.state = RunningState::HuffmanCode1;
                }
                RunningState::HuffmanCode1 => {
                    let idx = self.s.loop_counter as usize;
                    let alphabet_size = self.s.num_block_types[idx] + 2;
                    let mut table = std::mem::take(&mut self.s.block_type_trees[idx]);
                    result = self.read_huffman_code(cur_input, alphabet_size, alphabet_size, &mut table);
                    self.s.block_type_trees[idx] = table;
                    if result != Success {
                        continue;
                    }
                    self.s.state = RunningState::HuffmanCode2;
                }
                RunningState::HuffmanCode2 => {
                    let idx = self.s.loop_counter as usize;
                    let alphabet_size = NUM_BLOCK_LEN_SYMBOLS as u32;
                    let mut table = std::mem::take(&mut self.s.block_len_trees[idx]);
                    result = self.read_huffman_code(cur_input, alphabet_size, alphabet_size, &mut table);
                    self.s.block_len_trees[idx] = table;
                    if result != Success {
                        continue;
                    }
                    self.s.state = RunningState::HuffmanCode3;
                }
                RunningState::HuffmanCode3 => {
                    let idx = self.s.loop_counter as usize;
                    let mut block_length = 0u32;
                    if !self.safe_read_block_length(cur_input, idx, &mut block_length) {
                        result = NeedsMoreInput;
                        continue;
                    }
                    self.s.block_length[idx] = block_length;
                    self.s.loop_counter += 1;
                    self.s.state = RunningState::HuffmanCode0;
                }
                RunningState::MetablockHeader2 => {
                    let mut bits = 0u32;
                    if !self.s.br.safe_read_bits(cur_input, 6, &mut bits) {
                        result = NeedsMoreInput;
                        continue;
                    }
                    self.s.distance_postfix_bits = bits & bit_mask(2);
                    let ndirect_msb = bits >> 2;
                    self.s.num_direct_distance_codes = NUM_DISTANCE_SHORT_CODES as u32
                        + (ndirect_msb << self.s.distance_postfix_bits);
                    self.s.context_modes = vec![0; self.s.num_block_types[0] as usize];
                    self.s.loop_counter = 0;
                    self.s.state = RunningState::ContextModes;
                }
                RunningState::ContextModes => {
                    let mut i = self.s.loop_counter as usize;
                    let mut stalled = false;
                    while i < self.s.num_block_types[0] as usize {
                        let mut bits = 0u32;
                        if !self.s.br.safe_read_bits(cur_input, 2, &mut bits) {
                            self.s.loop_counter = i as i64;
                            stalled = true;
                            break;
                        }
                        self.s.context_modes[i] = bits as u8;
                        i += 1;
                    }
                    if stalled {
                        result = NeedsMoreInput;
                        continue;
                    }
                    self.s.state = RunningState::ContextMap1;
                }
                RunningState::ContextMap1 => {
                    let size = self.s.num_block_types[0] << LITERAL_CONTEXT_BITS;
                    result = self.decode_context_map(cur_input, size, false);
                    if result != Success {
                        continue;
                    }
                    self.detect_trivial_literal_block_types();
                    self.s.state = RunningState::ContextMap2;
                }
                RunningState::ContextMap2 => {
                    let num_direct_codes =
                        self.s.num_direct_distance_codes - NUM_DISTANCE_SHORT_CODES as u32;
                    let (num_distance_codes, max_distance_symbol) = if self.s.large_window {
                        let n = distance_alphabet_size(
                            self.s.distance_postfix_bits,
                            num_direct_codes,
                            LARGE_MAX_DISTANCE_BITS,
                        ) as u32;
                        (n, max_distance_symbol(num_direct_codes, self.s.distance_postfix_bits))
                    } else {
                        let n = distance_alphabet_size(
                            self.s.distance_postfix_bits,
                            num_direct_codes,
                            MAX_DISTANCE_BITS,
                        ) as u32;
                        (n, n)
                    };
                    let size = self.s.num_block_types[2] << DISTANCE_CONTEXT_BITS;
                    result = self.decode_context_map(cur_input, size, true);
                    if result != Success {
                        continue;
                    }
                    self.s
                        .literal_hgroup
                        .init(NUM_LITERAL_SYMBOLS as u32, NUM_LITERAL_SYMBOLS as u32, self.s.num_literal_htrees);
                    self.s.insert_copy_hgroup.init(
                        NUM_COMMAND_SYMBOLS as u32,
                        NUM_COMMAND_SYMBOLS as u32,
                        self.s.num_block_types[1],
                    );
                    self.s.distance_hgroup.init(
                        num_distance_codes,
                        max_distance_symbol,
                        self.s.num_dist_htrees,
                    );
                    self.s.loop_counter = 0;
                    self.s.state = RunningState::TreeGroup;
                }
                RunningState::TreeGroup => {
                    let which = self.s.loop_counter as usize;
                    result = self.huffman_tree_group_decode(cur_input, which);
                    if result != Success {
                        continue;
                    }
                    self.s.loop_counter += 1;
                    if self.s.loop_counter >= 3 {
                        self.prepare_literal_decoding();
                        self.s.dist_context_map_offset = 0;
                        self.s.dist_htree_index = self.s.dist_context_map[0] as usize;
                        self.ensure_ring_buffer();
                        self.s.state = RunningState::CommandBegin;
                    }
                }
                RunningState::CommandBegin
                | RunningState::CommandInner
                | RunningState::CommandPostDecodeLiterals
                | RunningState::CommandPostWrapCopy => {
                    result = self.process_commands(cur_input);
                }
                RunningState::CommandInnerWrite
                | RunningState::CommandPostWrite1
                | RunningState::CommandPostWrite2 => {
                    result = self.write_ring_buffer(output, &mut written, false);
                    if result != Success {
                        continue;
                    }
                    self.wrap_ring_buffer();
                    if self.s.ringbuffer_size == 1 << self.s.window_bits {
                        self.s.max_distance = self.s.max_backward_distance;
                    }
                    match self.s.state {
                        RunningState::CommandPostWrite1 => {
                            if self.s.meta_block_remaining_len == 0 {
                                self.s.state = RunningState::MetablockDone;
                            } else {
                                self.s.state = RunningState::CommandBegin;
                            }
                        }
                        RunningState::CommandPostWrite2 => {
                            self.s.state = RunningState::CommandPostWrapCopy;
                        }
                        _ => {
                            // CommandInnerWrite
                            if self.s.loop_counter == 0 {
                                if self.s.meta_block_remaining_len == 0 {
                                    self.s.state = RunningState::MetablockDone;
                                } else {
                                    self.s.state = RunningState::CommandPostDecodeLiterals;
                                }
                            } else {
                                self.s.state = RunningState::CommandInner;
                            }
                        }
                    }
                }
                RunningState::MetablockDone => {
                    if self.s.meta_block_remaining_len < 0 {
                        result = DecoderResult::Error(DecodeError::BlockLength2);
                        continue;
                    }
                    if !self.s.is_last_metablock {
                        self.s.state = RunningState::MetablockBegin;
                        continue;
                    }
                    if !self.s.br.jump_to_byte_boundary() {
                        result = DecoderResult::Error(DecodeError::Padding2);
                        continue;
                    }
                    self.s.state = RunningState::Done;
                }
                RunningState::Done => {
                    if !self.s.ringbuffer.is_empty() {
                        result = self.write_ring_buffer(output, &mut written, true);
                        if result != Success {
                            continue;
                        }
                    }
                    let consumed = if using_buffer {
                        self.s.buffer_length = 0;
                        main_start
                    } else {
                        self.s.br.unload();
                        main_start + self.s.br.byte_pos
                    };
                    return (Success, consumed, written);
                }
            }
        }
    }

    /// Raw bytes of an uncompressed meta-block, straight to the ring
    /// buffer.
    fn copy_uncompressed_block(
        &mut self,
        input: &[u8],
        output: &mut [u8],
        written: &mut usize,
    ) -> DecoderResult {
        self.ensure_ring_buffer();
        loop {
            match self.s.substate_uncompressed {
                UncompressedSubstate::None => {
                    let s = &mut self.s;
                    let mut nbytes = s.br.remaining_bytes(input);
                    nbytes = nbytes.min(s.meta_block_remaining_len as usize);
                    nbytes = nbytes.min(s.ringbuffer_size - s.pos);
                    if nbytes > 0 {
                        let pos = s.pos;
                        let (rb, _) = s.ringbuffer.split_at_mut(pos + nbytes);
                        s.br.copy_bytes(&mut rb[pos..pos + nbytes], input, nbytes);
                        s.pos += nbytes;
                        s.meta_block_remaining_len -= nbytes as i64;
                    }
                    if s.pos < 1 << s.window_bits {
                        if s.meta_block_remaining_len == 0 {
                            return Success;
                        }
                        return NeedsMoreInput;
                    }
                    s.substate_uncompressed = UncompressedSubstate::Write;
                }
                UncompressedSubstate::Write => {
                    let result = self.write_ring_buffer(output, written, false);
                    if result != Success {
                        return result;
                    }
                    if self.s.ringbuffer_size == 1 << self.s.window_bits {
                        self.s.max_distance = self.s.max_backward_distance;
                    }
                    self.s.substate_uncompressed = UncompressedSubstate::None;
                }
            }
        }
    }
}

/// Inverse move-to-front over a byte vector, in place.
fn inverse_move_to_front_transform(v: &mut [u8]) {
    let mut mtf = [0u8; 256];
    for (i, m) in mtf.iter_mut().enumerate() {
        *m = i as u8;
    }
    for b in v.iter_mut() {
        let index = *b as usize;
        let value = mtf[index];
        *b = value;
        for i in (1..=index).rev() {
            mtf[i] = mtf[i - 1];
        }
        mtf[0] = value;
    }
}

/// Largest distance symbol representing distances within
/// [`MAX_ALLOWED_DISTANCE`], for large-window table sizing.
fn max_distance_symbol(ndirect: u32, npostfix: u32) -> u32 {
    const BOUND: [u32; 4] = [0, 4, 12, 28];
    const DIFF: [u32; 4] = [73, 126, 228, 424];
    let postfix = 1u32 << npostfix;
    if ndirect < BOUND[npostfix as usize] {
        ndirect + DIFF[npostfix as usize] + postfix
    } else if ndirect > BOUND[npostfix as usize] + postfix {
        ndirect + DIFF[npostfix as usize]
    } else {
        BOUND[npostfix as usize] + DIFF[npostfix as usize] + postfix
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// One-shot decode
// ─────────────────────────────────────────────────────────────────────────────

/// Error of the one-shot [`decompress`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OneShotError {
    #[error("decode error: {0}")]
    Decode(DecodeError),
    /// Input continued past the end of the stream.
    #[error("excessive input")]
    ExcessiveInput,
    /// Input ended before the stream did.
    #[error("truncated input")]
    TruncatedInput,
}

/// One-shot decompression of a complete stream.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>, OneShotError> {
    let mut decoder = Decoder::new();
    let mut out = Vec::new();
    let mut buf = vec![0u8; 64 << 10];
    let mut consumed_total = 0usize;
    loop {
        let (result, consumed, written) =
            decoder.decompress_stream(&input[consumed_total..], &mut buf);
        consumed_total += consumed;
        out.extend_from_slice(&buf[..written]);
        match result {
            Success => {
                if consumed_total < input.len() {
                    return Err(OneShotError::ExcessiveInput);
                }
                return Ok(out);
            }
            NeedsMoreOutput => continue,
            NeedsMoreInput => {
                if consumed_total >= input.len() {
                    return Err(OneShotError::TruncatedInput);
                }
            }
            DecoderResult::Error(e) => return Err(OneShotError::Decode(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stream_decodes_to_empty() {
        // lgwin-22 header + ISLAST + ISEMPTY.
        assert_eq!(decompress(&[0x3B]).unwrap(), Vec::<u8>::new());
        // 16-bit window flavor.
        assert_eq!(decompress(&[0x06]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn trailing_garbage_is_reported() {
        assert_eq!(decompress(&[0x3B, 0x00]), Err(OneShotError::ExcessiveInput));
    }

    #[test]
    fn truncated_stream_is_reported() {
        assert_eq!(decompress(&[]), Err(OneShotError::TruncatedInput));
    }

    #[test]
    fn imtf_round_trip() {
        let mut v = vec![0u8, 0, 1, 2, 0, 3];
        inverse_move_to_front_transform(&mut v);
        // First 0 decodes to 0, next 0 again 0 (still front), 1 is the
        // next most recent, and so on.
        assert_eq!(v[0], 0);
        assert_eq!(v.len(), 6);
    }

    #[test]
    fn uncompressed_metablock_roundtrip() {
        // Hand-built stream: lgwin16 ('0'), non-last uncompressed block
        // "ab", then an empty last block.
        use crate::bit_writer::BitWriter;
        let mut bw = BitWriter::new();
        bw.write_bits(1, 0); // window = 16
        crate::brotli_bit_stream::store_uncompressed_meta_block(
            true,
            b"ab",
            0,
            usize::MAX >> 1,
            2,
            &mut bw,
        );
        let stream = bw.into_bytes();
        assert_eq!(decompress(&stream).unwrap(), b"ab");
    }

    #[test]
    fn metadata_blocks_are_skipped() {
        // lgwin16, empty metadata block (the flush filler), empty last.
        use crate::bit_writer::BitWriter;
        let mut bw = BitWriter::new();
        bw.write_bits(1, 0);
        bw.write_bits(6, 0x6); // metadata, MSKIPBYTES=0
        bw.jump_to_byte_boundary();
        bw.write_bits(2, 3); // ISLAST + ISEMPTY
        let stream = bw.into_bytes();
        assert_eq!(decompress(&stream).unwrap(), Vec::<u8>::new());
    }
}
