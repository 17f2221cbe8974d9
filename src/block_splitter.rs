//! Block splitting: partitioning a symbol stream into typed blocks.
//!
//! The splitter seeds a handful of entropy codes from random strides of the
//! stream, refines them by resampling, then iterates a Viterbi-style
//! labelling (switching codes costs bits) until the labels settle. Adjacent
//! runs with one label become blocks; their histograms are clustered so at
//! most 256 types remain.

use crate::cluster::cluster_histograms;
use crate::command::Command;
use crate::constants::fast_log2;
use crate::histogram::Histogram;
use crate::params::EncoderParams;
use crate::quality::HQ_ZOPFLIFICATION_QUALITY;

/// A (type, length) partition of one symbol category.
#[derive(Clone, Debug, Default)]
pub struct BlockSplit {
    pub num_types: usize,
    /// Block type per block, < `num_types`.
    pub types: Vec<u8>,
    /// Symbols per block; sums to the stream length.
    pub lengths: Vec<u32>,
}

impl BlockSplit {
    pub fn single_block(length: usize) -> BlockSplit {
        BlockSplit {
            num_types: 1,
            types: vec![0],
            lengths: vec![length as u32],
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.types.len()
    }
}

const MAX_LITERAL_HISTOGRAMS: usize = 100;
const MAX_COMMAND_HISTOGRAMS: usize = 50;
const LITERAL_BLOCK_SWITCH_COST: f64 = 28.1;
const COMMAND_BLOCK_SWITCH_COST: f64 = 13.5;
const DISTANCE_BLOCK_SWITCH_COST: f64 = 14.6;
const LITERAL_STRIDE_LENGTH: usize = 70;
const COMMAND_STRIDE_LENGTH: usize = 40;
const SYMBOLS_PER_LITERAL_HISTOGRAM: usize = 544;
const SYMBOLS_PER_COMMAND_HISTOGRAM: usize = 530;
const SYMBOLS_PER_DISTANCE_HISTOGRAM: usize = 544;
const MIN_LENGTH_FOR_BLOCK_SPLITTING: usize = 128;
const ITER_MUL_FOR_REFINING: usize = 2;
const MIN_ITERS_FOR_REFINING: usize = 100;
const MAX_NUMBER_OF_BLOCK_TYPES: usize = 256;

fn my_rand(seed: &mut u32) -> u32 {
    *seed = seed.wrapping_mul(16807);
    if *seed == 0 {
        *seed = 1;
    }
    *seed
}

#[inline]
fn bit_cost(count: usize) -> f64 {
    if count == 0 {
        -2.0
    } else {
        fast_log2(count)
    }
}

fn initial_entropy_codes<const N: usize>(
    data: &[u16],
    stride_length: usize,
    histograms: &mut [Histogram<N>],
) {
    let length = data.len();
    let num_histograms = histograms.len();
    let mut seed = 7u32;
    let block_length = length / num_histograms;
    for (i, h) in histograms.iter_mut().enumerate() {
        let mut pos = length * i / num_histograms;
        if i != 0 {
            pos += (my_rand(&mut seed) as usize) % block_length;
        }
        if pos + stride_length >= length {
            pos = length - stride_length - 1;
        }
        h.add_vector(&data[pos..pos + stride_length]);
    }
}

fn random_sample<const N: usize>(seed: &mut u32, data: &[u16], stride: usize, sample: &mut Histogram<N>) {
    let length = data.len();
    let stride = stride.min(length);
    let pos = if length == stride {
        0
    } else {
        (my_rand(seed) as usize) % (length - stride + 1)
    };
    sample.add_vector(&data[pos..pos + stride]);
}

fn refine_entropy_codes<const N: usize>(
    data: &[u16],
    stride_length: usize,
    histograms: &mut [Histogram<N>],
) {
    let num_histograms = histograms.len();
    let mut iters = ITER_MUL_FOR_REFINING * data.len() / stride_length + MIN_ITERS_FOR_REFINING;
    let mut seed = 7u32;
    iters = ((iters + num_histograms - 1) / num_histograms) * num_histograms;
    for i in 0..iters {
        let mut sample = Histogram::<N>::new();
        random_sample(&mut seed, data, stride_length, &mut sample);
        histograms[i % num_histograms].add_histogram(&sample);
    }
}

/// Viterbi-ish assignment of one entropy code per symbol. Returns the
/// number of resulting blocks and fills `block_id`.
fn find_blocks<const N: usize>(
    data: &[u16],
    block_switch_bitcost: f64,
    histograms: &[Histogram<N>],
    block_id: &mut [u8],
) -> usize {
    let length = data.len();
    let num_histograms = histograms.len();
    let data_size = N;
    if num_histograms <= 1 {
        block_id[..length].fill(0);
        return 1;
    }
    let bitmaplen = (num_histograms + 7) >> 3;
    // insert_cost[symbol * num_histograms + j]: bits to code `symbol` with
    // entropy code j.
    let mut insert_cost = vec![0f64; data_size * num_histograms];
    for (j, h) in histograms.iter().enumerate() {
        insert_cost[j] = fast_log2(h.total_count);
    }
    for i in (0..data_size).rev() {
        for j in 0..num_histograms {
            insert_cost[i * num_histograms + j] =
                insert_cost[j] - bit_cost(histograms[j].data[i] as usize);
        }
    }
    let mut cost = vec![0f64; num_histograms];
    let mut switch_signal = vec![0u8; length * bitmaplen];
    let mut num_blocks = 1usize;

    // cost[k] tracks how much worse code k is than the best at this byte,
    // capped at the block switch cost.
    for byte_ix in 0..length {
        let ix = byte_ix * bitmaplen;
        let insert_cost_ix = data[byte_ix] as usize * num_histograms;
        let mut min_cost = 1e99f64;
        let mut block_switch_cost = block_switch_bitcost;
        for (k, c) in cost.iter_mut().enumerate() {
            *c += insert_cost[insert_cost_ix + k];
            if *c < min_cost {
                min_cost = *c;
                block_id[byte_ix] = k as u8;
            }
        }
        // Cheaper switches near the start: more blocks help there.
        if byte_ix < 2000 {
            block_switch_cost *= 0.77 + 0.07 * byte_ix as f64 / 2000.0;
        }
        for (k, c) in cost.iter_mut().enumerate() {
            *c -= min_cost;
            if *c >= block_switch_cost {
                *c = block_switch_cost;
                switch_signal[ix + (k >> 3)] |= 1 << (k & 7);
            }
        }
    }

    // Trace back, switching only where the forward pass marked it free.
    {
        let mut byte_ix = length - 1;
        let mut ix = byte_ix * bitmaplen;
        let mut cur_id = block_id[byte_ix];
        while byte_ix > 0 {
            let mask = 1u8 << (cur_id & 7);
            byte_ix -= 1;
            ix -= bitmaplen;
            if switch_signal[ix + (cur_id >> 3) as usize] & mask != 0
                && cur_id != block_id[byte_ix]
            {
                cur_id = block_id[byte_ix];
                num_blocks += 1;
            }
            block_id[byte_ix] = cur_id;
        }
    }
    num_blocks
}

fn remap_block_ids(block_ids: &mut [u8], num_histograms: usize) -> usize {
    const INVALID: u16 = 256;
    let mut new_id = vec![INVALID; num_histograms];
    let mut next_id = 0u16;
    for id in block_ids.iter_mut() {
        if new_id[*id as usize] == INVALID {
            new_id[*id as usize] = next_id;
            next_id += 1;
        }
        *id = new_id[*id as usize] as u8;
    }
    next_id as usize
}

fn build_block_histograms<const N: usize>(
    data: &[u16],
    block_ids: &[u8],
    histograms: &mut Vec<Histogram<N>>,
    num_histograms: usize,
) {
    histograms.clear();
    histograms.resize(num_histograms, Histogram::new());
    for (i, &sym) in data.iter().enumerate() {
        histograms[block_ids[i] as usize].add(sym as usize);
    }
}

/// Builds the final (type, length) split from per-symbol block ids:
/// per-block histograms are clustered down to at most 256 types, and
/// adjacent blocks that land in one cluster merge.
fn cluster_blocks<const N: usize>(data: &[u16], block_ids: &[u8], split: &mut BlockSplit) {
    let length = data.len();
    // Collect the runs and one histogram per run.
    let mut histograms: Vec<Histogram<N>> = Vec::new();
    let mut run_lengths: Vec<u32> = Vec::new();
    {
        let mut cur = Histogram::<N>::new();
        let mut run_len = 0u32;
        for i in 0..length {
            cur.add(data[i] as usize);
            run_len += 1;
            if i + 1 == length || block_ids[i + 1] != block_ids[i] {
                histograms.push(std::mem::take(&mut cur));
                run_lengths.push(run_len);
                cur = Histogram::new();
                run_len = 0;
            }
        }
    }
    let mut symbols = Vec::new();
    let clustered = cluster_histograms(&histograms, MAX_NUMBER_OF_BLOCK_TYPES, &mut symbols);
    let num_types = clustered.len();

    split.types.clear();
    split.lengths.clear();
    split.num_types = num_types;
    for (i, &sym) in symbols.iter().enumerate() {
        if split.types.last() == Some(&(sym as u8)) {
            // Adjacent runs fell into one cluster: merge them.
            *split.lengths.last_mut().unwrap() += run_lengths[i];
        } else {
            split.types.push(sym as u8);
            split.lengths.push(run_lengths[i]);
        }
    }
}

fn split_byte_vector<const N: usize>(
    data: &[u16],
    symbols_per_histogram: usize,
    max_histograms: usize,
    sampling_stride_length: usize,
    block_switch_cost: f64,
    params: &EncoderParams,
    split: &mut BlockSplit,
) {
    let length = data.len();
    if length == 0 {
        split.num_types = 1;
        split.types = vec![0];
        split.lengths = vec![0];
        return;
    }
    if length < MIN_LENGTH_FOR_BLOCK_SPLITTING {
        *split = BlockSplit::single_block(length);
        return;
    }
    let mut num_histograms = length / symbols_per_histogram + 1;
    if num_histograms > max_histograms {
        num_histograms = max_histograms;
    }
    let mut histograms: Vec<Histogram<N>> = vec![Histogram::new(); num_histograms];
    initial_entropy_codes(data, sampling_stride_length, &mut histograms);
    refine_entropy_codes(data, sampling_stride_length, &mut histograms);

    let mut block_ids = vec![0u8; length];
    let iters = if params.quality < HQ_ZOPFLIFICATION_QUALITY {
        3
    } else {
        10
    };
    for _ in 0..iters {
        find_blocks(data, block_switch_cost, &histograms, &mut block_ids);
        let n = remap_block_ids(&mut block_ids, histograms.len());
        build_block_histograms(data, &block_ids, &mut histograms, n);
    }
    cluster_blocks::<N>(data, &block_ids, split);
}

/// Splits the three symbol streams of a command sequence.
#[allow(clippy::too_many_arguments)]
pub fn split_block(
    cmds: &[Command],
    data: &[u8],
    pos: usize,
    mask: usize,
    params: &EncoderParams,
    literal_split: &mut BlockSplit,
    insert_and_copy_split: &mut BlockSplit,
    dist_split: &mut BlockSplit,
) {
    {
        // Collect the literal stream.
        let mut literals: Vec<u16> = Vec::new();
        let mut from_pos = pos & mask;
        for cmd in cmds {
            for j in 0..cmd.insert_len as usize {
                literals.push(u16::from(data[(from_pos + j) & mask]));
            }
            from_pos = (from_pos + cmd.insert_len as usize + cmd.copy_len() as usize) & mask;
        }
        split_byte_vector::<{ crate::constants::NUM_LITERAL_SYMBOLS }>(
            &literals,
            SYMBOLS_PER_LITERAL_HISTOGRAM,
            MAX_LITERAL_HISTOGRAMS,
            LITERAL_STRIDE_LENGTH,
            LITERAL_BLOCK_SWITCH_COST,
            params,
            literal_split,
        );
    }
    {
        let insert_and_copy_codes: Vec<u16> = cmds.iter().map(|c| c.cmd_prefix).collect();
        split_byte_vector::<{ crate::constants::NUM_COMMAND_SYMBOLS }>(
            &insert_and_copy_codes,
            SYMBOLS_PER_COMMAND_HISTOGRAM,
            MAX_COMMAND_HISTOGRAMS,
            COMMAND_STRIDE_LENGTH,
            COMMAND_BLOCK_SWITCH_COST,
            params,
            insert_and_copy_split,
        );
    }
    {
        let distance_prefixes: Vec<u16> = cmds
            .iter()
            .filter(|c| c.copy_len() > 0 && c.cmd_prefix >= 128)
            .map(|c| c.dist_prefix & 0x3FF)
            .collect();
        split_byte_vector::<{ crate::constants::NUM_HISTOGRAM_DISTANCE_SYMBOLS }>(
            &distance_prefixes,
            SYMBOLS_PER_DISTANCE_HISTOGRAM,
            MAX_COMMAND_HISTOGRAMS,
            COMMAND_STRIDE_LENGTH,
            DISTANCE_BLOCK_SWITCH_COST,
            params,
            dist_split,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::NUM_LITERAL_SYMBOLS;

    fn check_split(split: &BlockSplit, total: usize) {
        assert_eq!(split.types.len(), split.lengths.len());
        assert_eq!(
            split.lengths.iter().map(|&l| l as usize).sum::<usize>(),
            total
        );
        for &t in &split.types {
            assert!((t as usize) < split.num_types);
        }
        // No two adjacent blocks share a type.
        for w in split.types.windows(2) {
            assert_ne!(w[0], w[1]);
        }
    }

    #[test]
    fn short_streams_become_one_block() {
        let data: Vec<u16> = (0..100).map(|i| (i % 7) as u16).collect();
        let params = crate::params::EncoderParams::new(9, 22);
        let mut split = BlockSplit::default();
        split_byte_vector::<NUM_LITERAL_SYMBOLS>(&data, 544, 100, 70, 28.1, &params, &mut split);
        assert_eq!(split.num_types, 1);
        check_split(&split, 100);
    }

    #[test]
    fn bimodal_stream_splits() {
        // First half text-ish, second half high bytes: two regimes.
        let mut data: Vec<u16> = Vec::new();
        let mut state = 11u32;
        for _ in 0..3000 {
            state = state.wrapping_mul(48271) % 0x7FFF_FFFF;
            data.push((b'a' + (state % 26) as u8) as u16);
        }
        for _ in 0..3000 {
            state = state.wrapping_mul(48271) % 0x7FFF_FFFF;
            data.push(0xE0 + (state % 16) as u16);
        }
        let params = crate::params::EncoderParams::new(9, 22);
        let mut split = BlockSplit::default();
        split_byte_vector::<NUM_LITERAL_SYMBOLS>(&data, 544, 100, 70, 28.1, &params, &mut split);
        check_split(&split, 6000);
        assert!(split.num_types >= 2, "expected a split, got {:?}", split.num_types);
    }
}
