//! Chained hashers with shared banks (variants 40, 41 and 42).
//!
//! Chain nodes store 16-bit deltas to their predecessor and live in
//! fixed-size banks; when a bank wraps, old chains lose their tails
//! naturally. A one-byte "tiny hash" per position cheaply rejects cache
//! probes that cannot match. Deeper chains are walked at higher qualities.

use super::{
    backward_reference_penalty_using_last_distance, backward_reference_score,
    backward_reference_score_using_last_distance, find_match_length, load32_le,
    prepare_distance_cache, search_in_static_dictionary, DictionarySearchStats, Hasher,
    HasherSearchResult, HASH_MUL32,
};

const BUCKET_BITS: u32 = 15;
const BUCKET_SIZE: usize = 1 << BUCKET_BITS;

#[derive(Clone, Copy, Default)]
struct Slot {
    delta: u16,
    next: u16,
}

pub struct ForgetfulChain<const NUM_BANKS: usize, const BANK_BITS: u32, const NUM_LAST: usize> {
    addr: Vec<u32>,
    head: Vec<u16>,
    tiny_hash: Box<[u8; 65536]>,
    banks: Vec<Slot>,
    free_slot_idx: [u16; NUM_BANKS],
    max_hops: usize,
    dict_stats: DictionarySearchStats,
}

/// Single 64 Ki-slot bank, 4 cache probes. Qualities 5..6 on small windows.
pub type H40 = ForgetfulChain<1, 16, 4>;
/// Same bank shape, 10 cache probes. Qualities 7..8.
pub type H41 = ForgetfulChain<1, 16, 10>;
/// 512 small banks, 16 cache probes. Quality 9.
pub type H42 = ForgetfulChain<512, 9, 16>;

impl<const NUM_BANKS: usize, const BANK_BITS: u32, const NUM_LAST: usize>
    ForgetfulChain<NUM_BANKS, BANK_BITS, NUM_LAST>
{
    pub fn new(quality: i32) -> Self {
        debug_assert!(NUM_BANKS <= 512);
        let base = if quality > 6 { 7usize } else { 8 };
        ForgetfulChain {
            addr: vec![0xCCCC_CCCC; BUCKET_SIZE],
            head: vec![0; BUCKET_SIZE],
            tiny_hash: Box::new([0; 65536]),
            banks: vec![Slot::default(); NUM_BANKS << BANK_BITS],
            free_slot_idx: [0; NUM_BANKS],
            max_hops: base << (quality.max(4) - 4),
            dict_stats: DictionarySearchStats::default(),
        }
    }

    #[inline]
    fn hash_bytes(data: &[u8]) -> usize {
        let h = load32_le(data).wrapping_mul(HASH_MUL32);
        (h >> (32 - BUCKET_BITS)) as usize
    }

    #[inline]
    fn bank_slot(&self, bank: usize, idx: usize) -> Slot {
        self.banks[(bank << BANK_BITS) + idx]
    }
}

impl<const NUM_BANKS: usize, const BANK_BITS: u32, const NUM_LAST: usize> Hasher
    for ForgetfulChain<NUM_BANKS, BANK_BITS, NUM_LAST>
{
    fn hash_type_length(&self) -> usize {
        4
    }

    fn store_lookahead(&self) -> usize {
        4
    }

    fn prepare(&mut self, one_shot: bool, input_size: usize, data: &[u8]) {
        let partial_prepare_threshold = BUCKET_SIZE >> 6;
        if one_shot && input_size <= partial_prepare_threshold {
            for i in 0..input_size {
                if data.len() >= i + 4 {
                    let bucket = Self::hash_bytes(&data[i..]);
                    // Chains are cut by the placeholder address: positions
                    // never reach it, so lookups terminate immediately.
                    self.addr[bucket] = 0xCCCC_CCCC;
                    self.head[bucket] = 0xCCCC;
                }
            }
        } else {
            self.addr.fill(0xCCCC_CCCC);
            self.head.fill(0);
        }
        self.tiny_hash.fill(0);
        self.free_slot_idx = [0; NUM_BANKS];
        self.dict_stats = DictionarySearchStats::default();
    }

    fn store(&mut self, data: &[u8], mask: usize, ix: usize) {
        let key = Self::hash_bytes(&data[ix & mask..]);
        let bank = key & (NUM_BANKS - 1);
        let bank_mask = (1usize << BANK_BITS) - 1;
        let idx = usize::from(self.free_slot_idx[bank]) & bank_mask;
        self.free_slot_idx[bank] = self.free_slot_idx[bank].wrapping_add(1);
        let mut delta = ix.wrapping_sub(self.addr[key] as usize);
        self.tiny_hash[ix as u16 as usize] = key as u8;
        if delta > 0xFFFF {
            delta = 0xFFFF;
        }
        self.banks[(bank << BANK_BITS) + idx] = Slot {
            delta: delta as u16,
            next: self.head[key],
        };
        self.addr[key] = ix as u32;
        self.head[key] = idx as u16;
    }

    fn prepare_distance_cache(&self, distance_cache: &mut [i32; 16]) {
        prepare_distance_cache(distance_cache, NUM_LAST);
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
        let cur_ix_masked = cur_ix & ring_buffer_mask;
        let min_score = out.score;
        let mut best_score = out.score;
        let mut best_len = out.len;
        let key = Self::hash_bytes(&data[cur_ix_masked..]);
        let tiny_hash = key as u8;
        out.len = 0;
        out.len_code_delta = 0;

        // Try the distance cache; slot 0 may yield 2-byte copies.
        for i in 0..NUM_LAST {
            let backward = distance_cache[i] as usize;
            let prev_ix = cur_ix.wrapping_sub(backward);
            if i > 0 && self.tiny_hash[prev_ix as u16 as usize] != tiny_hash {
                continue;
            }
            if prev_ix >= cur_ix || backward > max_backward {
                continue;
            }
            let prev_ix = prev_ix & ring_buffer_mask;
            let len = find_match_length(&data[prev_ix..], &data[cur_ix_masked..], max_length);
            if len >= 2 {
                let score = backward_reference_score_using_last_distance(len);
                if best_score < score {
                    let score = if i != 0 {
                        score.saturating_sub(backward_reference_penalty_using_last_distance(i))
                    } else {
                        score
                    };
                    if best_score < score {
                        best_score = score;
                        best_len = len;
                        out.len = best_len;
                        out.distance = backward;
                        out.score = best_score;
                    }
                }
            }
        }

        // Walk the chain, newest first, following stored deltas.
        {
            let bank = key & (NUM_BANKS - 1);
            let mut backward = 0usize;
            let mut hops = self.max_hops;
            let mut delta = cur_ix.wrapping_sub(self.addr[key] as usize);
            let mut slot = usize::from(self.head[key]);
            loop {
                if hops == 0 {
                    break;
                }
                hops -= 1;
                let last = slot;
                backward = backward.wrapping_add(delta);
                if backward > max_backward {
                    break;
                }
                let prev_ix = cur_ix.wrapping_sub(backward) & ring_buffer_mask;
                let s = self.bank_slot(bank, last);
                slot = usize::from(s.next);
                delta = usize::from(s.delta);
                if cur_ix_masked + best_len > ring_buffer_mask
                    || prev_ix + best_len > ring_buffer_mask
                    || cur_ix_masked + best_len >= data.len()
                    || prev_ix + best_len >= data.len()
                    || data[cur_ix_masked + best_len] != data[prev_ix + best_len]
                {
                    continue;
                }
                let len = find_match_length(&data[prev_ix..], &data[cur_ix_masked..], max_length);
                if len >= 4 {
                    let score = backward_reference_score(len, backward);
                    if best_score < score {
                        best_score = score;
                        best_len = len;
                        out.len = best_len;
                        out.distance = backward;
                        out.score = best_score;
                    }
                }
            }
            self.store(data, ring_buffer_mask, cur_ix);
        }

        if out.score == min_score {
            search_in_static_dictionary(
                &mut self.dict_stats,
                &data[cur_ix_masked..],
                max_length,
                max_backward + gap,
                max_distance,
                out,
                false,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::SCORE_BASE;

    #[test]
    fn chain_walk_finds_older_matches() {
        // Three copies of a phrase; the chain must reach past the newest.
        let data = b"hello world! hello world! hello world! and the rest....";
        let mut h = H40::new(6);
        h.prepare(true, data.len(), data);
        let mask = usize::MAX >> 1;
        for i in 0..26 {
            h.store(data, mask, i);
        }
        let mut out = HasherSearchResult::new(SCORE_BASE + 100);
        let cache = [4i32, 11, 15, 16, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        h.find_longest_match(data, mask, &cache, 26, data.len() - 26, 26, 0, 1 << 20, &mut out);
        assert!(out.len >= 13, "len = {}", out.len);
        assert_eq!(out.distance % 13, 0);
    }

    #[test]
    fn multi_bank_variant_behaves() {
        let data = b"abcdefgl-abcdefgl-abcdefgl-abcdefgl-padding tail bytes";
        let mut h = H42::new(9);
        h.prepare(true, data.len(), data);
        let mask = usize::MAX >> 1;
        for i in 0..27 {
            h.store(data, mask, i);
        }
        let mut out = HasherSearchResult::new(SCORE_BASE + 100);
        let mut cache = [4i32, 11, 15, 16, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        h.prepare_distance_cache(&mut cache);
        h.find_longest_match(data, mask, &cache, 27, data.len() - 27, 27, 0, 1 << 20, &mut out);
        assert!(out.len >= 9, "len = {}", out.len);
        assert_eq!(out.distance % 9, 0);
    }
}
