//! Greedy backward-reference search.
//!
//! Walks the input, querying the hasher for the best match at each
//! position, with a bounded lazy look-ahead (a clearly better match one
//! byte later postpones the current one) and a skipping heuristic that
//! stops hammering the hash table on incompressible data. Emits the
//! command stream consumed by the meta-block writer.

use crate::command::{compute_distance_code, Command};
use crate::constants::max_backward_limit;
use crate::hash::{AnyHasher, Hasher, HasherSearchResult, SCORE_BASE};
use crate::params::EncoderParams;
use crate::quality::{
    literal_spree_length_for_sparse_search, MIN_QUALITY_FOR_EXTENSIVE_REFERENCE_SEARCH,
};

/// Minimum score for a match to beat emitting literals.
const MIN_SCORE: u64 = SCORE_BASE + 100;
/// A lazy match must beat the current one by this much.
const COST_DIFF_LAZY: u64 = 175;

#[allow(clippy::too_many_arguments)]
pub fn create_backward_references(
    num_bytes: usize,
    position: usize,
    ringbuffer: &[u8],
    ringbuffer_mask: usize,
    params: &EncoderParams,
    hasher: &mut AnyHasher,
    dist_cache: &mut [i32; 16],
    last_insert_len: &mut usize,
    commands: &mut Vec<Command>,
    num_literals: &mut usize,
) {
    crate::hash::dispatch!(hasher, h, {
        create_backward_references_impl(
            num_bytes,
            position,
            ringbuffer,
            ringbuffer_mask,
            params,
            &mut **h,
            dist_cache,
            last_insert_len,
            commands,
            num_literals,
        )
    })
}

#[allow(clippy::too_many_arguments)]
fn create_backward_references_impl<H: Hasher>(
    num_bytes: usize,
    position: usize,
    ringbuffer: &[u8],
    ringbuffer_mask: usize,
    params: &EncoderParams,
    hasher: &mut H,
    dist_cache: &mut [i32; 16],
    last_insert_len: &mut usize,
    commands: &mut Vec<Command>,
    num_literals: &mut usize,
) {
    let max_backward = max_backward_limit(params.lgwin);
    let hash_type_length = hasher.hash_type_length();
    let store_lookahead = hasher.store_lookahead();
    let mut insert_length = *last_insert_len;
    let pos_end = position + num_bytes;
    let store_end = if num_bytes >= store_lookahead {
        position + num_bytes - store_lookahead + 1
    } else {
        position
    };
    let random_heuristics_window_size = literal_spree_length_for_sparse_search(params);
    let mut apply_random_heuristics = position + random_heuristics_window_size;
    let gap = 0usize;

    let mut position = position;
    hasher.prepare_distance_cache(dist_cache);

    while position + hash_type_length < pos_end {
        let mut max_length = pos_end - position;
        let mut max_distance = position.min(max_backward);
        let mut sr = HasherSearchResult::new(MIN_SCORE);
        hasher.find_longest_match(
            ringbuffer,
            ringbuffer_mask,
            dist_cache,
            position,
            max_length,
            max_distance,
            gap,
            params.dist.max_distance,
            &mut sr,
        );
        if sr.score > MIN_SCORE {
            // Found a match; peek ahead for something even better before
            // committing. The look-ahead is bounded to 4 postponements.
            let mut delayed_backward_references_in_row = 0;
            max_length -= 1;
            loop {
                let mut sr2 = HasherSearchResult::new(MIN_SCORE);
                if params.quality < MIN_QUALITY_FOR_EXTENSIVE_REFERENCE_SEARCH {
                    sr2.len = (sr.len - 1).min(max_length);
                }
                max_distance = (position + 1).min(max_backward);
                hasher.find_longest_match(
                    ringbuffer,
                    ringbuffer_mask,
                    dist_cache,
                    position + 1,
                    max_length,
                    max_distance,
                    gap,
                    params.dist.max_distance,
                    &mut sr2,
                );
                if sr2.score >= sr.score + COST_DIFF_LAZY {
                    // Emit one literal and restart from the better match.
                    position += 1;
                    insert_length += 1;
                    sr = sr2;
                    delayed_backward_references_in_row += 1;
                    if delayed_backward_references_in_row < 4
                        && position + hash_type_length < pos_end
                    {
                        max_length -= 1;
                        continue;
                    }
                }
                break;
            }
            apply_random_heuristics = position + 2 * sr.len + random_heuristics_window_size;
            max_distance = position.min(max_backward);
            {
                let distance_code =
                    compute_distance_code(sr.distance, max_distance + gap, &dist_cache[..4]);
                if sr.distance <= max_distance + gap && distance_code > 0 {
                    dist_cache[3] = dist_cache[2];
                    dist_cache[2] = dist_cache[1];
                    dist_cache[1] = dist_cache[0];
                    dist_cache[0] = sr.distance as i32;
                    hasher.prepare_distance_cache(dist_cache);
                }
                commands.push(Command::new(
                    &params.dist,
                    insert_length,
                    sr.len,
                    sr.len_code_delta,
                    distance_code,
                ));
            }
            *num_literals += insert_length;
            insert_length = 0;

            // Put the copied span's keys into the hash table, but keep
            // self-repeating content from flooding it.
            let mut range_start = position + 2;
            let range_end = (position + sr.len).min(store_end);
            if sr.distance < sr.len >> 2 {
                range_start = range_end
                    .min(range_start.max((position + sr.len).saturating_sub(sr.distance << 2)));
            }
            hasher.store_range(ringbuffer, ringbuffer_mask, range_start, range_end);

            position += sr.len;
        } else {
            insert_length += 1;
            position += 1;

            // Long stretch without matches: assume the data is random and
            // probe more sparsely, inserting only a subset of positions.
            if position > apply_random_heuristics {
                if position > apply_random_heuristics + 4 * random_heuristics_window_size {
                    let margin = (store_lookahead - 1).max(4);
                    let pos_jump = (position + 16).min(pos_end - margin.min(pos_end));
                    while position < pos_jump {
                        hasher.store(ringbuffer, ringbuffer_mask, position);
                        insert_length += 4;
                        position += 4;
                    }
                } else {
                    let margin = (store_lookahead - 1).max(2);
                    let pos_jump = (position + 8).min(pos_end - margin.min(pos_end));
                    while position < pos_jump {
                        hasher.store(ringbuffer, ringbuffer_mask, position);
                        insert_length += 2;
                        position += 2;
                    }
                }
            }
        }
    }

    insert_length += pos_end - position;
    *last_insert_len = insert_length;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::AnyHasher;
    use crate::params::EncoderParams;

    fn run(data: &[u8], quality: i32) -> (Vec<Command>, usize, usize) {
        let params = EncoderParams::new(quality, 16).with_size_hint(data.len());
        let mut hasher = AnyHasher::new(&params);
        hasher.prepare(true, data.len(), data);
        let mut dist_cache = [16i32, 15, 11, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut last_insert_len = 0usize;
        let mut commands = Vec::new();
        let mut num_literals = 0usize;
        create_backward_references(
            data.len(),
            0,
            data,
            usize::MAX >> 1,
            &params,
            &mut hasher,
            &mut dist_cache,
            &mut last_insert_len,
            &mut commands,
            &mut num_literals,
        );
        (commands, last_insert_len, num_literals)
    }

    /// Sum of all commands plus the trailing insert must cover the input.
    fn check_coverage(data: &[u8], commands: &[Command], last_insert: usize) {
        let covered: usize = commands
            .iter()
            .map(|c| c.insert_len as usize + c.copy_len() as usize)
            .sum::<usize>()
            + last_insert;
        assert_eq!(covered, data.len());
    }

    #[test]
    fn repetitive_input_yields_copies() {
        let data = b"compression compression compression compression!".repeat(4);
        for q in [2, 4, 5, 9] {
            let (commands, last_insert, num_literals) = run(&data, q);
            check_coverage(&data, &commands, last_insert);
            assert!(!commands.is_empty(), "quality {}", q);
            assert!(
                num_literals < data.len() / 2,
                "quality {}: {} literals",
                q,
                num_literals
            );
        }
    }

    #[test]
    fn random_input_degenerates_to_literals() {
        // A xorshift stream has no repeats worth coding.
        let mut state = 0x1234_5678u32;
        let data: Vec<u8> = (0..4096)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state >> 24) as u8
            })
            .collect();
        let (commands, last_insert, _) = run(&data, 5);
        check_coverage(&data, &commands, last_insert);
    }

    #[test]
    fn one_byte_run_uses_short_distances() {
        let data = vec![b'a'; 600];
        let (commands, last_insert, _) = run(&data, 5);
        check_coverage(&data, &commands, last_insert);
        // The run must resolve into distance-1 style copies.
        assert!(commands.iter().any(|c| c.copy_len() > 8));
    }
}
