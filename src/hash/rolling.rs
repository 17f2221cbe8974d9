//! Rolling-hash finders for long-range matches (large-window mode).
//!
//! A polynomial hash over a 32-byte window rolls across the input, stepping
//! every `JUMP` bytes. Only keys falling into the low 1/64 of the hash space
//! are stored, which keeps the 16 Mi-entry table sparse while still catching
//! long repeats far beyond the sweep hashers' reach.

use super::{backward_reference_score, find_match_length, Hasher, HasherSearchResult};

const CHUNK_LEN: usize = 32;
const ROLLING_HASH_MUL32: u32 = 69069;
const INVALID_POS: u32 = 0xFFFF_FFFF;
const NUM_BUCKETS: usize = 1 << 24;

#[inline]
fn hash_byte(b: u8) -> u32 {
    // A table of 256 values would also do; adding one works about as well.
    u32::from(b) + 1
}

pub struct RollingHasher<const JUMP: usize> {
    state: u32,
    table: Vec<u32>,
    next_ix: usize,
    factor: u32,
    factor_remove: u32,
}

/// Rolls over every position. Secondary hasher of variant 65.
pub type Rolling = RollingHasher<1>;
/// Rolls in 4-byte steps. Secondary hasher of variants 35 and 55.
pub type RollingFast = RollingHasher<4>;

impl<const JUMP: usize> RollingHasher<JUMP> {
    pub fn new() -> Self {
        let factor = ROLLING_HASH_MUL32;
        // Multiplier of the byte leaving the window: factor^(CHUNK_LEN/JUMP)
        // modulo 2^32.
        let mut factor_remove: u32 = 1;
        let mut i = 0;
        while i < CHUNK_LEN {
            factor_remove = factor_remove.wrapping_mul(factor);
            i += JUMP;
        }
        RollingHasher {
            state: 0,
            table: vec![INVALID_POS; NUM_BUCKETS],
            next_ix: 0,
            factor,
            factor_remove,
        }
    }

    #[inline]
    fn roll_in(&self, state: u32, add: u8) -> u32 {
        self.factor.wrapping_mul(state).wrapping_add(hash_byte(add))
    }

    #[inline]
    fn roll(&self, state: u32, add: u8, remove: u8) -> u32 {
        self.factor
            .wrapping_mul(state)
            .wrapping_add(hash_byte(add))
            .wrapping_sub(self.factor_remove.wrapping_mul(hash_byte(remove)))
    }
}

impl<const JUMP: usize> Default for RollingHasher<JUMP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const JUMP: usize> Hasher for RollingHasher<JUMP> {
    fn hash_type_length(&self) -> usize {
        // A longer answer would suppress the primary hasher when composed.
        4
    }

    fn store_lookahead(&self) -> usize {
        4
    }

    fn prepare(&mut self, _one_shot: bool, input_size: usize, data: &[u8]) {
        // Too little data to fill the rolling window.
        if input_size < CHUNK_LEN {
            return;
        }
        self.state = 0;
        let mut i = 0;
        while i < CHUNK_LEN {
            self.state = self.roll_in(self.state, data[i]);
            i += JUMP;
        }
    }

    fn store(&mut self, _data: &[u8], _mask: usize, _ix: usize) {
        // Positions are folded in lazily during find_longest_match.
    }

    fn store_range(&mut self, _data: &[u8], _mask: usize, _ix_start: usize, _ix_end: usize) {}

    fn stitch_to_previous_block(
        &mut self,
        num_bytes: usize,
        position: usize,
        ringbuffer: &[u8],
        ring_buffer_mask: usize,
    ) {
        // Re-seed the rolling state at the new block's start position.
        let mut position = position;
        let mut available = num_bytes;
        if JUMP > 1 && position & (JUMP - 1) != 0 {
            let diff = JUMP - (position & (JUMP - 1));
            available = if diff > available { 0 } else { available - diff };
            position += diff;
        }
        let position_masked = position & ring_buffer_mask;
        if available > ring_buffer_mask - position_masked {
            available = ring_buffer_mask - position_masked;
        }
        self.prepare(false, available, &ringbuffer[position_masked..]);
        self.next_ix = position;
    }

    fn find_longest_match(
        &mut self,
        data: &[u8],
        ring_buffer_mask: usize,
        _distance_cache: &[i32; 16],
        cur_ix: usize,
        max_length: usize,
        max_backward: usize,
        _gap: usize,
        _max_distance: usize,
        out: &mut HasherSearchResult,
    ) {
        let cur_ix_masked = cur_ix & ring_buffer_mask;
        if JUMP > 1 && cur_ix & (JUMP - 1) != 0 {
            return;
        }
        // Not enough lookahead to keep the window rolling.
        if max_length < CHUNK_LEN {
            return;
        }
        let mut pos = self.next_ix;
        while pos <= cur_ix {
            let code = (self.state & ((NUM_BUCKETS as u32 * 64) - 1)) as usize;
            let rem = data[pos & ring_buffer_mask];
            let add = data[(pos + CHUNK_LEN) & ring_buffer_mask];
            self.state = self.roll(self.state, add, rem);
            if code < NUM_BUCKETS {
                let found_ix = self.table[code] as usize;
                self.table[code] = pos as u32;
                if pos == cur_ix && found_ix != INVALID_POS as usize {
                    // The 32-bit cast keeps distances meaningful even once
                    // positions exceed the table's value range.
                    let backward = (cur_ix.wrapping_sub(found_ix)) as u32 as usize;
                    if backward <= max_backward && backward > 0 {
                        let found_ix_masked = found_ix & ring_buffer_mask;
                        let len = find_match_length(
                            &data[found_ix_masked..],
                            &data[cur_ix_masked..],
                            max_length,
                        );
                        if len >= 4 && len > out.len {
                            let score = backward_reference_score(len, backward);
                            if score > out.score {
                                out.len = len;
                                out.distance = backward;
                                out.score = score;
                                out.len_code_delta = 0;
                            }
                        }
                    }
                }
            }
            pos += JUMP;
        }
        self.next_ix = cur_ix + JUMP;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::SCORE_BASE;

    #[test]
    fn finds_long_range_repeats() {
        // Two identical 64-byte chunks separated by filler. The chunk bytes
        // are chosen so the 32-byte window key falls into the stored slice
        // of the hash space (only 1/64 of keys are retained).
        let chunk: Vec<u8> = (0u8..64).map(|i| i.wrapping_mul(2).wrapping_add(39)).collect();
        let mut data = Vec::new();
        data.extend_from_slice(&chunk);
        data.extend(std::iter::repeat(0xEE).take(192));
        data.extend_from_slice(&chunk);
        data.extend(std::iter::repeat(0x11).take(64));

        let mask = usize::MAX >> 1;
        let mut h = RollingFast::new();
        h.prepare(true, data.len(), &data);
        let cache = [0i32; 16];
        let mut best = HasherSearchResult::new(SCORE_BASE);
        let target = 256; // start of the second chunk, 4-aligned
        for pos in (0..=target).step_by(4) {
            let mut out = HasherSearchResult::new(SCORE_BASE);
            h.find_longest_match(
                &data,
                mask,
                &cache,
                pos,
                data.len() - pos - CHUNK_LEN,
                pos,
                0,
                1 << 20,
                &mut out,
            );
            if pos == target {
                best = out;
            }
        }
        assert!(best.len >= CHUNK_LEN, "len = {}", best.len);
        assert_eq!(best.distance, 256);
    }
}
