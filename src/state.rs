//! Decoder state: the machine's current position plus every loop counter
//! and scratch field needed to resume after an input or output stall.

use crate::bit_reader::BitReader;
use crate::constants::CODE_LENGTH_CODES;
use crate::huffman::HuffmanCode;

/// Top-level decoder states. Each resumable region of the stream layout is
/// one state; yields for more input or output land back in the same state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunningState {
    Uninited,
    LargeWindowBits,
    Initialize,
    MetablockBegin,
    MetablockHeader,
    MetablockHeader2,
    ContextModes,
    CommandBegin,
    CommandInner,
    CommandPostDecodeLiterals,
    CommandPostWrapCopy,
    Uncompressed,
    Metadata,
    CommandInnerWrite,
    MetablockDone,
    CommandPostWrite1,
    CommandPostWrite2,
    HuffmanCode0,
    HuffmanCode1,
    HuffmanCode2,
    HuffmanCode3,
    ContextMap1,
    ContextMap2,
    TreeGroup,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetablockHeaderSubstate {
    None,
    Empty,
    Nibbles,
    Size,
    Uncompressed,
    Reserved,
    Bytes,
    Metadata,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeGroupSubstate {
    None,
    Loop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextMapSubstate {
    None,
    ReadPrefix,
    Huffman,
    Decode,
    Transform,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UncompressedSubstate {
    None,
    Write,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HuffmanSubstate {
    None,
    SimpleSize,
    SimpleRead,
    SimpleBuild,
    Complex,
    LengthSymbols,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeU8Substate {
    None,
    Short,
    Long,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockLengthSubstate {
    None,
    Suffix,
}

/// A group of prefix-code tables sharing one alphabet (one table per
/// histogram of the meta-block).
#[derive(Default)]
pub struct HuffmanTreeGroup {
    pub alphabet_size: u32,
    pub max_symbol: u32,
    pub num_htrees: u32,
    pub htrees: Vec<Vec<HuffmanCode>>,
}

impl HuffmanTreeGroup {
    pub fn init(&mut self, alphabet_size: u32, max_symbol: u32, ntrees: u32) {
        self.alphabet_size = alphabet_size;
        self.max_symbol = max_symbol;
        self.num_htrees = ntrees;
        self.htrees = Vec::with_capacity(ntrees as usize);
    }
}

/// Full decoder state. Fields mirror the stream layout: whatever a state
/// needs across a yield lives here.
pub struct DecoderState {
    pub state: RunningState,
    pub substate_metablock_header: MetablockHeaderSubstate,
    pub substate_tree_group: TreeGroupSubstate,
    pub substate_context_map: ContextMapSubstate,
    pub substate_uncompressed: UncompressedSubstate,
    pub substate_huffman: HuffmanSubstate,
    pub substate_decode_u8: DecodeU8Substate,
    pub substate_read_block_length: BlockLengthSubstate,

    pub br: BitReader,
    /// Straddle buffer: tail bytes of an exhausted input kept until the
    /// next call supplies more.
    pub buffer: [u8; 8],
    pub buffer_length: usize,

    pub pos: usize,
    pub max_backward_distance: isize,
    pub max_distance: isize,
    pub ringbuffer: Vec<u8>,
    pub ringbuffer_size: usize,
    pub ringbuffer_mask: usize,
    pub new_ringbuffer_size: usize,
    pub rb_roundtrips: usize,
    pub partial_pos_out: usize,
    pub should_wrap_ringbuffer: bool,

    pub dist_rb: [i32; 4],
    pub dist_rb_idx: usize,

    pub loop_counter: i64,
    pub sub_loop_counter: u32,
    pub meta_block_remaining_len: i64,
    pub is_last_metablock: bool,
    pub is_uncompressed: bool,
    pub is_metadata: bool,
    pub size_nibbles: u32,
    pub window_bits: u32,
    pub large_window: bool,

    pub block_length: [u32; 3],
    pub block_length_index: u32,
    pub num_block_types: [u32; 3],
    pub block_type_rb: [u32; 6],
    pub block_type_trees: Vec<Vec<HuffmanCode>>,
    pub block_len_trees: Vec<Vec<HuffmanCode>>,

    pub distance_postfix_bits: u32,
    pub num_direct_distance_codes: u32,

    pub context_modes: Vec<u8>,
    pub context_map: Vec<u8>,
    pub dist_context_map: Vec<u8>,
    pub num_literal_htrees: u32,
    pub num_dist_htrees: u32,
    /// Active slices into the two context maps.
    pub context_map_offset: usize,
    pub dist_context_map_offset: usize,
    pub literal_htree_index: usize,
    pub dist_htree_index: usize,
    pub context_lookup: usize,
    pub trivial_literal_context: bool,
    pub trivial_literal_contexts: [u32; 8],
    pub distance_context: i32,

    pub literal_hgroup: HuffmanTreeGroup,
    pub insert_copy_hgroup: HuffmanTreeGroup,
    pub distance_hgroup: HuffmanTreeGroup,

    pub copy_length: i64,
    pub distance_code: i64,

    // Prefix-code reading scratch.
    pub symbol: u32,
    pub repeat: u32,
    pub space: u32,
    pub prev_code_len: u32,
    pub repeat_code_len: u32,
    pub code: u32,
    pub context_index: u32,
    pub max_run_length_prefix: u32,
    /// Resume slot for the variable-length u8 exponent.
    pub vint_scratch: u32,
    /// Explicit symbols of a simple code being read.
    pub symbols_scratch: [u16; 4],
    pub code_length_code_lengths: [u8; CODE_LENGTH_CODES],
    pub code_lengths_scratch: Vec<u8>,
    pub cl_table: Vec<HuffmanCode>,
    pub context_map_table: Vec<HuffmanCode>,
}

impl Default for DecoderState {
    fn default() -> Self {
        DecoderState::new()
    }
}

impl DecoderState {
    pub fn new() -> DecoderState {
        DecoderState {
            state: RunningState::Uninited,
            substate_metablock_header: MetablockHeaderSubstate::None,
            substate_tree_group: TreeGroupSubstate::None,
            substate_context_map: ContextMapSubstate::None,
            substate_uncompressed: UncompressedSubstate::None,
            substate_huffman: HuffmanSubstate::None,
            substate_decode_u8: DecodeU8Substate::None,
            substate_read_block_length: BlockLengthSubstate::None,
            br: BitReader::new(),
            buffer: [0; 8],
            buffer_length: 0,
            pos: 0,
            max_backward_distance: 0,
            max_distance: 0,
            ringbuffer: Vec::new(),
            ringbuffer_size: 0,
            ringbuffer_mask: 0,
            new_ringbuffer_size: 0,
            rb_roundtrips: 0,
            partial_pos_out: 0,
            should_wrap_ringbuffer: false,
            // The stream-start distance cache values are fixed.
            dist_rb: [16, 15, 11, 4],
            dist_rb_idx: 0,
            loop_counter: 0,
            sub_loop_counter: 0,
            meta_block_remaining_len: 0,
            is_last_metablock: false,
            is_uncompressed: false,
            is_metadata: false,
            size_nibbles: 0,
            window_bits: 0,
            large_window: false,
            block_length: [0; 3],
            block_length_index: 0,
            num_block_types: [0; 3],
            block_type_rb: [0; 6],
            block_type_trees: Vec::new(),
            block_len_trees: Vec::new(),
            distance_postfix_bits: 0,
            num_direct_distance_codes: 0,
            context_modes: Vec::new(),
            context_map: Vec::new(),
            dist_context_map: Vec::new(),
            num_literal_htrees: 0,
            num_dist_htrees: 0,
            context_map_offset: 0,
            dist_context_map_offset: 0,
            literal_htree_index: 0,
            dist_htree_index: 0,
            context_lookup: 0,
            trivial_literal_context: false,
            trivial_literal_contexts: [0; 8],
            distance_context: 0,
            literal_hgroup: HuffmanTreeGroup::default(),
            insert_copy_hgroup: HuffmanTreeGroup::default(),
            distance_hgroup: HuffmanTreeGroup::default(),
            copy_length: 0,
            distance_code: 0,
            symbol: 0,
            repeat: 0,
            space: 0,
            prev_code_len: 0,
            repeat_code_len: 0,
            code: 0,
            context_index: 0,
            max_run_length_prefix: 0,
            vint_scratch: 0,
            symbols_scratch: [0; 4],
            code_length_code_lengths: [0; CODE_LENGTH_CODES],
            code_lengths_scratch: Vec::new(),
            cl_table: Vec::new(),
            context_map_table: Vec::new(),
        }
    }

    /// Per-meta-block reset of split/context/tree state.
    pub fn metablock_begin(&mut self) {
        self.meta_block_remaining_len = 0;
        self.block_length = [1 << 24, 1 << 24, 1 << 24];
        self.num_block_types = [1, 1, 1];
        self.block_type_rb = [1, 0, 1, 0, 1, 0];
        self.context_map = Vec::new();
        self.context_modes = Vec::new();
        self.dist_context_map = Vec::new();
        self.context_map_offset = 0;
        self.dist_context_map_offset = 0;
        self.literal_htree_index = 0;
        self.dist_htree_index = 0;
        self.context_lookup = 0;
        self.literal_hgroup = HuffmanTreeGroup::default();
        self.insert_copy_hgroup = HuffmanTreeGroup::default();
        self.distance_hgroup = HuffmanTreeGroup::default();
    }
}
