//! Symbol-frequency histograms for the three coded alphabets.
//!
//! One const-generic type covers literals (256), insert-and-copy commands
//! (704) and distance codes (544 effective); the encoder works with the
//! aliases below.

use crate::block_splitter::BlockSplit;
use crate::command::Command;
use crate::constants::{
    DISTANCE_CONTEXT_BITS, LITERAL_CONTEXT_BITS, NUM_COMMAND_SYMBOLS,
    NUM_HISTOGRAM_DISTANCE_SYMBOLS, NUM_LITERAL_SYMBOLS,
};
use crate::context::context;

#[derive(Clone)]
pub struct Histogram<const N: usize> {
    pub data: [u32; N],
    pub total_count: usize,
    /// Cached population cost; refreshed by the clustering passes.
    pub bit_cost: f64,
}

pub type HistogramLiteral = Histogram<NUM_LITERAL_SYMBOLS>;
pub type HistogramCommand = Histogram<NUM_COMMAND_SYMBOLS>;
pub type HistogramDistance = Histogram<NUM_HISTOGRAM_DISTANCE_SYMBOLS>;

impl<const N: usize> Default for Histogram<N> {
    fn default() -> Self {
        Histogram {
            data: [0; N],
            total_count: 0,
            bit_cost: f64::MAX,
        }
    }
}

impl<const N: usize> Histogram<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.data = [0; N];
        self.total_count = 0;
        self.bit_cost = f64::MAX;
    }

    #[inline]
    pub fn add(&mut self, val: usize) {
        self.data[val] += 1;
        self.total_count += 1;
    }

    pub fn add_vector(&mut self, vals: &[u16]) {
        self.total_count += vals.len();
        for &v in vals {
            self.data[v as usize] += 1;
        }
    }

    pub fn add_histogram(&mut self, other: &Histogram<N>) {
        self.total_count += other.total_count;
        for i in 0..N {
            self.data[i] += other.data[i];
        }
    }

    pub const fn alphabet_size() -> usize {
        N
    }
}

/// Walks a block split one symbol at a time, yielding the active block type.
pub struct BlockSplitIterator<'a> {
    split: &'a BlockSplit,
    idx: usize,
    pub block_type: usize,
    length: usize,
}

impl<'a> BlockSplitIterator<'a> {
    pub fn new(split: &'a BlockSplit) -> Self {
        BlockSplitIterator {
            split,
            idx: 0,
            block_type: 0,
            length: split.lengths.first().copied().unwrap_or(0) as usize,
        }
    }

    pub fn next(&mut self) {
        if self.length == 0 {
            self.idx += 1;
            self.block_type = self.split.types[self.idx] as usize;
            self.length = self.split.lengths[self.idx] as usize;
        }
        self.length -= 1;
    }
}

/// Distributes the symbols of a command stream over per-(type, context)
/// histograms, following all three block splits in parallel.
#[allow(clippy::too_many_arguments)]
pub fn build_histograms_with_context(
    cmds: &[Command],
    literal_split: &BlockSplit,
    insert_and_copy_split: &BlockSplit,
    dist_split: &BlockSplit,
    ringbuffer: &[u8],
    start_pos: usize,
    mask: usize,
    mut prev_byte: u8,
    mut prev_byte2: u8,
    context_modes: Option<&[usize]>,
    literal_histograms: &mut [HistogramLiteral],
    insert_and_copy_histograms: &mut [HistogramCommand],
    copy_dist_histograms: &mut [HistogramDistance],
) {
    let mut pos = start_pos;
    let mut literal_it = BlockSplitIterator::new(literal_split);
    let mut insert_and_copy_it = BlockSplitIterator::new(insert_and_copy_split);
    let mut dist_it = BlockSplitIterator::new(dist_split);

    for cmd in cmds {
        insert_and_copy_it.next();
        insert_and_copy_histograms[insert_and_copy_it.block_type].add(cmd.cmd_prefix as usize);
        for _ in 0..cmd.insert_len {
            literal_it.next();
            let ctx = match context_modes {
                Some(modes) => {
                    let lut = modes[literal_it.block_type];
                    (literal_it.block_type << LITERAL_CONTEXT_BITS)
                        + context(prev_byte, prev_byte2, lut) as usize
                }
                None => literal_it.block_type,
            };
            literal_histograms[ctx].add(ringbuffer[pos & mask] as usize);
            prev_byte2 = prev_byte;
            prev_byte = ringbuffer[pos & mask];
            pos += 1;
        }
        pos += cmd.copy_len() as usize;
        if cmd.copy_len() != 0 {
            prev_byte2 = ringbuffer[(pos.wrapping_sub(2)) & mask];
            prev_byte = ringbuffer[(pos.wrapping_sub(1)) & mask];
            if cmd.cmd_prefix >= 128 {
                dist_it.next();
                let ctx = ((dist_it.block_type as u32) << DISTANCE_CONTEXT_BITS)
                    + cmd.distance_context();
                copy_dist_histograms[ctx as usize].add((cmd.dist_prefix & 0x3FF) as usize);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_tracks_totals() {
        let mut h = HistogramLiteral::new();
        h.add(10);
        h.add(10);
        h.add(20);
        assert_eq!(h.total_count, 3);
        assert_eq!(h.data[10], 2);
        let mut h2 = HistogramLiteral::new();
        h2.add(10);
        h2.add_histogram(&h);
        assert_eq!(h2.total_count, 4);
        assert_eq!(h2.data[10], 3);
    }

    #[test]
    fn split_iterator_follows_lengths() {
        let split = BlockSplit {
            num_types: 2,
            types: vec![0, 1, 0],
            lengths: vec![2, 1, 3],
        };
        let mut it = BlockSplitIterator::new(&split);
        let mut seen = Vec::new();
        for _ in 0..6 {
            it.next();
            seen.push(it.block_type);
        }
        assert_eq!(seen, vec![0, 0, 1, 0, 0, 0]);
    }
}
