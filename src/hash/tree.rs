//! Binary-tree match finder (variant 10), used by the optimal parser.
//!
//! Every window position is a node in a binary tree keyed on the sorted
//! order of suffixes; insertion doubles as search, returning matches in
//! increasing length order. The tree root per 17-bit hash lives in
//! `buckets`; `forest` holds two child links per window position.

use crate::constants::WINDOW_GAP;
use crate::dictionary::static_dict::{
    find_all_static_dictionary_matches, INVALID_MATCH, MAX_STATIC_DICTIONARY_MATCH_LEN,
};
use crate::hash::{find_match_length, load32_le, Hasher, HasherSearchResult, HASH_MUL32};
use crate::params::EncoderParams;

const BUCKET_BITS: u32 = 17;
const BUCKET_SIZE: usize = 1 << BUCKET_BITS;
/// Matches at least this long re-root the tree without a full walk.
pub const MAX_TREE_COMP_LENGTH: usize = 128;
const MAX_TREE_SEARCH_DEPTH: usize = 64;

/// Upper bound on matches a single [`H10::find_all_matches`] call yields.
pub const MAX_NUM_MATCHES_H10: usize = 64 + MAX_TREE_SEARCH_DEPTH;

/// A (distance, length) candidate; dictionary matches additionally carry
/// the length code to emit.
#[derive(Clone, Copy, Debug, Default)]
pub struct BackwardMatch {
    pub distance: u32,
    length_and_code: u32,
}

impl BackwardMatch {
    pub fn new(dist: usize, len: usize) -> Self {
        BackwardMatch {
            distance: dist as u32,
            length_and_code: (len as u32) << 5,
        }
    }

    pub fn new_dictionary(dist: usize, len: usize, len_code: usize) -> Self {
        BackwardMatch {
            distance: dist as u32,
            length_and_code: ((len as u32) << 5) | if len == len_code { 0 } else { len_code as u32 },
        }
    }

    #[inline]
    pub fn length(&self) -> usize {
        (self.length_and_code >> 5) as usize
    }

    #[inline]
    pub fn length_code(&self) -> usize {
        let code = (self.length_and_code & 31) as usize;
        if code != 0 {
            code
        } else {
            self.length()
        }
    }
}

pub struct H10 {
    window_mask: usize,
    buckets: Vec<u32>,
    /// Left/right child links, two per window position.
    forest: Vec<u32>,
    invalid_pos: u32,
}

impl H10 {
    pub fn new(lgwin: u32) -> H10 {
        let window_mask = (1usize << lgwin) - 1;
        H10 {
            window_mask,
            buckets: Vec::new(),
            forest: Vec::new(),
            invalid_pos: 0u32.wrapping_sub(window_mask as u32),
        }
    }

    #[inline]
    fn hash_bytes(data: &[u8]) -> usize {
        let h = load32_le(data).wrapping_mul(HASH_MUL32);
        (h >> (32 - BUCKET_BITS)) as usize
    }

    #[inline]
    fn left_child(&self, pos: usize) -> usize {
        2 * (pos & self.window_mask)
    }

    #[inline]
    fn right_child(&self, pos: usize) -> usize {
        2 * (pos & self.window_mask) + 1
    }

    /// Inserts `cur_ix` into the tree and optionally collects matches in
    /// increasing length order. A `None` sink makes this a pure store.
    #[allow(clippy::too_many_arguments)]
    fn store_and_find_matches(
        &mut self,
        data: &[u8],
        cur_ix: usize,
        ring_buffer_mask: usize,
        max_length: usize,
        max_backward: usize,
        best_len: &mut usize,
        mut matches: Option<&mut Vec<BackwardMatch>>,
    ) {
        let cur_ix_masked = cur_ix & ring_buffer_mask;
        let max_comp_len = max_length.min(MAX_TREE_COMP_LENGTH);
        let should_reroot_tree = max_length >= MAX_TREE_COMP_LENGTH;
        let key = Self::hash_bytes(&data[cur_ix_masked..]);
        let mut prev_ix = self.buckets[key] as usize;
        let mut node_left = self.left_child(cur_ix);
        let mut node_right = self.right_child(cur_ix);
        let mut best_len_left = 0usize;
        let mut best_len_right = 0usize;
        if should_reroot_tree {
            self.buckets[key] = cur_ix as u32;
        }
        let mut depth_remaining = MAX_TREE_SEARCH_DEPTH;
        loop {
            let backward = cur_ix.wrapping_sub(prev_ix);
            let prev_ix_masked = prev_ix & ring_buffer_mask;
            if backward == 0 || backward > max_backward || depth_remaining == 0 {
                if should_reroot_tree {
                    self.forest[node_left] = self.invalid_pos;
                    self.forest[node_right] = self.invalid_pos;
                }
                break;
            }
            let cur_len = best_len_left.min(best_len_right);
            let len = cur_len
                + find_match_length(
                    &data[prev_ix_masked + cur_len..],
                    &data[cur_ix_masked + cur_len..],
                    max_length - cur_len,
                );
            if let Some(ms) = matches.as_mut() {
                if len > *best_len {
                    *best_len = len;
                    ms.push(BackwardMatch::new(backward, len));
                }
            }
            if len >= max_comp_len
                || cur_ix_masked + len >= data.len()
                || prev_ix_masked + len >= data.len()
            {
                if should_reroot_tree {
                    self.forest[node_left] = self.forest[self.left_child(prev_ix)];
                    self.forest[node_right] = self.forest[self.right_child(prev_ix)];
                }
                break;
            }
            // Descend on the suffix order of the first differing byte.
            if data[cur_ix_masked + len] > data[prev_ix_masked + len] {
                best_len_left = len;
                if should_reroot_tree {
                    self.forest[node_left] = prev_ix as u32;
                }
                node_left = self.right_child(prev_ix);
                prev_ix = self.forest[node_left] as usize;
            } else {
                best_len_right = len;
                if should_reroot_tree {
                    self.forest[node_right] = prev_ix as u32;
                }
                node_right = self.left_child(prev_ix);
                prev_ix = self.forest[node_right] as usize;
            }
            depth_remaining -= 1;
        }
    }

    /// All matches at `cur_ix`, in increasing length order, including static
    /// dictionary references. Returns the number of matches appended.
    #[allow(clippy::too_many_arguments)]
    pub fn find_all_matches(
        &mut self,
        data: &[u8],
        ring_buffer_mask: usize,
        cur_ix: usize,
        max_length: usize,
        max_backward: usize,
        gap: usize,
        params: &EncoderParams,
        matches: &mut Vec<BackwardMatch>,
    ) -> usize {
        let orig_len = matches.len();
        let cur_ix_masked = cur_ix & ring_buffer_mask;
        let mut best_len = 1usize;
        // Nearby 2-byte matches are cheap to code; scan a short window
        // directly before consulting the tree.
        let short_match_max_backward = if params.quality == 11 { 64 } else { 16 };
        let stop = cur_ix.saturating_sub(short_match_max_backward);
        let mut i = cur_ix;
        while i > stop && best_len <= 2 {
            i -= 1;
            let mut prev_ix = i;
            let backward = cur_ix - prev_ix;
            if backward > max_backward {
                break;
            }
            prev_ix &= ring_buffer_mask;
            if cur_ix_masked + 1 >= data.len()
                || prev_ix + 1 >= data.len()
                || data[cur_ix_masked] != data[prev_ix]
                || data[cur_ix_masked + 1] != data[prev_ix + 1]
            {
                continue;
            }
            let len =
                find_match_length(&data[prev_ix + 2..], &data[cur_ix_masked + 2..], max_length - 2)
                    + 2;
            if len > best_len {
                best_len = len;
                matches.push(BackwardMatch::new(backward, len));
            }
        }
        if best_len < max_length {
            self.store_and_find_matches(
                data,
                cur_ix,
                ring_buffer_mask,
                max_length,
                max_backward,
                &mut best_len,
                Some(matches),
            );
        }
        let mut dict_matches = [INVALID_MATCH; MAX_STATIC_DICTIONARY_MATCH_LEN + 1];
        let minlen = 4.max(best_len + 1);
        if data.len() >= cur_ix_masked + 4
            && find_all_static_dictionary_matches(
                &data[cur_ix_masked..],
                minlen,
                max_length,
                &mut dict_matches,
            )
        {
            let maxlen = MAX_STATIC_DICTIONARY_MATCH_LEN.min(max_length);
            for l in minlen..=maxlen {
                let dict_id = dict_matches[l];
                if dict_id < INVALID_MATCH {
                    let distance = max_backward + gap + (dict_id >> 5) as usize + 1;
                    if distance <= params.dist.max_distance {
                        matches.push(BackwardMatch::new_dictionary(
                            distance,
                            l,
                            (dict_id & 31) as usize,
                        ));
                    }
                }
            }
        }
        matches.len() - orig_len
    }

    pub fn store_range_tree(&mut self, data: &[u8], mask: usize, ix_start: usize, ix_end: usize) {
        for i in ix_start..ix_end {
            self.store(data, mask, i);
        }
    }
}

impl Hasher for H10 {
    fn hash_type_length(&self) -> usize {
        4
    }

    fn store_lookahead(&self) -> usize {
        MAX_TREE_COMP_LENGTH
    }

    fn prepare(&mut self, one_shot: bool, input_size: usize, _data: &[u8]) {
        let invalid_pos = self.invalid_pos;
        if self.buckets.is_empty() {
            self.buckets = vec![invalid_pos; BUCKET_SIZE];
        } else {
            self.buckets.fill(invalid_pos);
        }
        let num_nodes = if one_shot && input_size < self.window_mask + 1 {
            input_size
        } else {
            self.window_mask + 1
        };
        if self.forest.len() < 2 * num_nodes {
            self.forest = vec![0u32; 2 * num_nodes];
        }
    }

    fn store(&mut self, data: &[u8], mask: usize, ix: usize) {
        let max_backward = self.window_mask - WINDOW_GAP + 1;
        // A pure store: search result is discarded.
        let mut best_len = 0usize;
        self.store_and_find_matches(
            data,
            ix,
            mask,
            MAX_TREE_COMP_LENGTH,
            max_backward,
            &mut best_len,
            None,
        );
    }

    fn stitch_to_previous_block(
        &mut self,
        num_bytes: usize,
        position: usize,
        ringbuffer: &[u8],
        ringbuffer_mask: usize,
    ) {
        if num_bytes >= self.hash_type_length() - 1 && position >= MAX_TREE_COMP_LENGTH {
            // Insert the tail end of the last block; those positions could
            // not be stored before their lookahead bytes existed.
            let i_start = position - MAX_TREE_COMP_LENGTH + 1;
            let i_end = position.min(i_start + num_bytes);
            for i in i_start..i_end {
                let max_backward = self.window_mask - (WINDOW_GAP - 1).max(position - i);
                let mut best_len = 0usize;
                self.store_and_find_matches(
                    ringbuffer,
                    i,
                    ringbuffer_mask,
                    MAX_TREE_COMP_LENGTH,
                    max_backward,
                    &mut best_len,
                    None,
                );
            }
        }
    }

    fn find_longest_match(
        &mut self,
        _data: &[u8],
        _ring_buffer_mask: usize,
        _distance_cache: &[i32; 16],
        _cur_ix: usize,
        _max_length: usize,
        _max_backward: usize,
        _gap: usize,
        _max_distance: usize,
        _out: &mut HasherSearchResult,
    ) {
        unreachable!("the tree hasher is driven through find_all_matches");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::EncoderParams;

    #[test]
    fn matches_come_in_increasing_length() {
        let data = b"abcabcabcabc abcabcabcabc abcabcabcabc tail tail tail tail tail \
                     tail tail tail tail tail tail tail tail tail tail tail!"
            .to_vec();
        let params = EncoderParams::new(10, 22);
        let mut h = H10::new(16);
        h.prepare(true, data.len(), &data);
        let mask = (1usize << 16) - 1;
        for i in 0..26 {
            h.store(&data, mask, i);
        }
        let mut matches = Vec::new();
        let n = h.find_all_matches(&data, mask, 26, data.len() - 26 - 8, 26, 0, &params, &mut matches);
        assert!(n > 0);
        for w in matches.windows(2) {
            assert!(w[0].length() <= w[1].length());
        }
    }

    #[test]
    fn dictionary_matches_carry_length_codes() {
        let m = BackwardMatch::new_dictionary(100, 10, 12);
        assert_eq!(m.length(), 10);
        assert_eq!(m.length_code(), 12);
        let m = BackwardMatch::new(100, 10);
        assert_eq!(m.length_code(), 10);
    }
}
