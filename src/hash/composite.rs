//! Composite hashers (variants 35, 55 and 65): a short-range primary plus a
//! long-range rolling secondary. Both see every store; the search takes the
//! better of the two answers. The secondary never probes the dictionary —
//! the primary already does.

use super::{Hasher, HasherSearchResult, Rolling, RollingFast, H3, H54, H6};

pub struct CompositeHasher<A: Hasher, B: Hasher> {
    ha: A,
    hb: B,
}

/// Quick 2-way sweep + fast roller. Quality 3 with large windows.
pub type H35 = CompositeHasher<H3, RollingFast>;
/// 7-byte quick hasher + fast roller. Quality 4, large inputs, large windows.
pub type H55 = CompositeHasher<H54, RollingFast>;
/// Bucketed sweep + dense roller. Qualities 5..9 with large windows.
pub type H65 = CompositeHasher<H6, Rolling>;

impl H35 {
    pub fn new() -> Self {
        CompositeHasher {
            ha: H3::new(),
            hb: RollingFast::new(),
        }
    }
}

impl Default for H35 {
    fn default() -> Self {
        Self::new()
    }
}

impl H55 {
    pub fn new() -> Self {
        CompositeHasher {
            ha: H54::new(),
            hb: RollingFast::new(),
        }
    }
}

impl Default for H55 {
    fn default() -> Self {
        Self::new()
    }
}

impl H65 {
    pub fn new(
        bucket_bits: u32,
        block_bits: u32,
        hash_len: u32,
        num_last_distances_to_check: usize,
    ) -> Self {
        CompositeHasher {
            ha: H6::new(bucket_bits, block_bits, hash_len, num_last_distances_to_check),
            hb: Rolling::new(),
        }
    }
}

impl<A: Hasher, B: Hasher> Hasher for CompositeHasher<A, B> {
    fn hash_type_length(&self) -> usize {
        self.ha.hash_type_length().max(self.hb.hash_type_length())
    }

    fn store_lookahead(&self) -> usize {
        self.ha.store_lookahead().max(self.hb.store_lookahead())
    }

    fn prepare(&mut self, one_shot: bool, input_size: usize, data: &[u8]) {
        self.ha.prepare(one_shot, input_size, data);
        self.hb.prepare(one_shot, input_size, data);
    }

    fn store(&mut self, data: &[u8], mask: usize, ix: usize) {
        self.ha.store(data, mask, ix);
        self.hb.store(data, mask, ix);
    }

    fn store_range(&mut self, data: &[u8], mask: usize, ix_start: usize, ix_end: usize) {
        self.ha.store_range(data, mask, ix_start, ix_end);
        self.hb.store_range(data, mask, ix_start, ix_end);
    }

    fn stitch_to_previous_block(
        &mut self,
        num_bytes: usize,
        position: usize,
        ringbuffer: &[u8],
        ringbuffer_mask: usize,
    ) {
        self.ha
            .stitch_to_previous_block(num_bytes, position, ringbuffer, ringbuffer_mask);
        self.hb
            .stitch_to_previous_block(num_bytes, position, ringbuffer, ringbuffer_mask);
    }

    fn prepare_distance_cache(&self, distance_cache: &mut [i32; 16]) {
        self.ha.prepare_distance_cache(distance_cache);
        self.hb.prepare_distance_cache(distance_cache);
    }

    fn find_longest_match(
        &mut self,
        data: &[u8],
        ring_buffer_mask: usize,
        distance_cache: &[i32; 16],
        cur_ix: usize,
        max_length: usize,
        max_backward: usize,
        gap: usize,
        max_distance: usize,
        out: &mut HasherSearchResult,
    ) {
        self.ha.find_longest_match(
            data,
            ring_buffer_mask,
            distance_cache,
            cur_ix,
            max_length,
            max_backward,
            gap,
            max_distance,
            out,
        );
        self.hb.find_longest_match(
            data,
            ring_buffer_mask,
            distance_cache,
            cur_ix,
            max_length,
            max_backward,
            gap,
            max_distance,
            out,
        );
    }
}
