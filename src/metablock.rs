//! Meta-block assembly: block splits, histograms and context maps.

use crate::block_splitter::{split_block, BlockSplit};
use crate::command::Command;
use crate::constants::{DISTANCE_CONTEXT_BITS, LITERAL_CONTEXT_BITS};
use crate::context::{context_lut, ContextMode};
use crate::cluster::cluster_histograms;
use crate::histogram::{
    build_histograms_with_context, HistogramCommand, HistogramDistance, HistogramLiteral,
};
use crate::params::EncoderParams;

const MAX_NUMBER_OF_HISTOGRAMS: usize = 256;

/// Everything the bit-stream writer needs to emit one compressed
/// meta-block: three splits, two context maps, three histogram groups.
#[derive(Default)]
pub struct MetaBlockSplit {
    pub literal_split: BlockSplit,
    pub command_split: BlockSplit,
    pub distance_split: BlockSplit,
    /// (type << 6 | context) -> literal histogram index; empty for the
    /// trivial identity mapping.
    pub literal_context_map: Vec<u32>,
    /// (type << 2 | context) -> distance histogram index.
    pub distance_context_map: Vec<u32>,
    pub literal_histograms: Vec<HistogramLiteral>,
    pub command_histograms: Vec<HistogramCommand>,
    pub distance_histograms: Vec<HistogramDistance>,
}

/// Builds the full meta-block model: refine-by-merge block splits for all
/// three categories, per-(type, context) histograms, and clustered context
/// maps capped at 256 histograms per category.
#[allow(clippy::too_many_arguments)]
pub fn build_meta_block(
    ringbuffer: &[u8],
    pos: usize,
    mask: usize,
    params: &EncoderParams,
    prev_byte: u8,
    prev_byte2: u8,
    cmds: &[Command],
    literal_context_mode: ContextMode,
    mb: &mut MetaBlockSplit,
) {
    split_block(
        cmds,
        ringbuffer,
        pos,
        mask,
        params,
        &mut mb.literal_split,
        &mut mb.command_split,
        &mut mb.distance_split,
    );

    let modeling = !params.disable_literal_context_modeling;
    let literal_context_multiplier = if modeling {
        1usize << LITERAL_CONTEXT_BITS
    } else {
        1
    };
    let context_modes: Option<Vec<usize>> = if modeling {
        Some(vec![context_lut(literal_context_mode); mb.literal_split.num_types])
    } else {
        None
    };

    let mut literal_histograms =
        vec![HistogramLiteral::new(); mb.literal_split.num_types * literal_context_multiplier];
    let mut distance_histograms = vec![
        HistogramDistance::new();
        mb.distance_split.num_types << DISTANCE_CONTEXT_BITS
    ];
    mb.command_histograms = vec![HistogramCommand::new(); mb.command_split.num_types];

    build_histograms_with_context(
        cmds,
        &mb.literal_split,
        &mb.command_split,
        &mb.distance_split,
        ringbuffer,
        pos,
        mask,
        prev_byte,
        prev_byte2,
        context_modes.as_deref(),
        &mut literal_histograms,
        &mut mb.command_histograms,
        &mut distance_histograms,
    );

    // Histogram ids must fit the one-byte context-map alphabet.
    let mut literal_symbols = Vec::new();
    mb.literal_histograms = cluster_histograms(
        &literal_histograms,
        MAX_NUMBER_OF_HISTOGRAMS,
        &mut literal_symbols,
    );
    if modeling {
        mb.literal_context_map = literal_symbols;
    } else {
        // One histogram per block type: spread the assignment over all 64
        // contexts of each type.
        mb.literal_context_map =
            vec![0; mb.literal_split.num_types << LITERAL_CONTEXT_BITS];
        for (ty, &sym) in literal_symbols.iter().enumerate() {
            for ctx in 0..(1usize << LITERAL_CONTEXT_BITS) {
                mb.literal_context_map[(ty << LITERAL_CONTEXT_BITS) + ctx] = sym;
            }
        }
    }

    let mut distance_symbols = Vec::new();
    mb.distance_histograms = cluster_histograms(
        &distance_histograms,
        MAX_NUMBER_OF_HISTOGRAMS,
        &mut distance_symbols,
    );
    mb.distance_context_map = distance_symbols;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::EncoderParams;

    fn commands_for(data: &[u8]) -> Vec<Command> {
        // One insert-only command covering everything keeps the test
        // focused on the model assembly.
        vec![Command::new_insert(data.len())]
    }

    #[test]
    fn maps_cover_all_type_context_pairs() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let params = EncoderParams::new(9, 22);
        let mut mb = MetaBlockSplit::default();
        build_meta_block(
            &data,
            0,
            usize::MAX >> 1,
            &params,
            0,
            0,
            &commands_for(&data),
            ContextMode::Utf8,
            &mut mb,
        );
        assert_eq!(
            mb.literal_context_map.len(),
            mb.literal_split.num_types << LITERAL_CONTEXT_BITS
        );
        assert_eq!(
            mb.distance_context_map.len(),
            mb.distance_split.num_types << DISTANCE_CONTEXT_BITS
        );
        for &ix in &mb.literal_context_map {
            assert!((ix as usize) < mb.literal_histograms.len());
        }
        for &ix in &mb.distance_context_map {
            assert!((ix as usize) < mb.distance_histograms.len());
        }
        assert_eq!(mb.command_histograms.len(), mb.command_split.num_types);
        assert!(mb.literal_histograms.len() <= 256);
    }

    #[test]
    fn disabled_modeling_expands_per_type() {
        let data: Vec<u8> = (0..2048u32).map(|i| (i * 7 % 256) as u8).collect();
        let mut params = EncoderParams::new(4, 22);
        params.disable_literal_context_modeling = true;
        let mut mb = MetaBlockSplit::default();
        build_meta_block(
            &data,
            0,
            usize::MAX >> 1,
            &params,
            0,
            0,
            &commands_for(&data),
            ContextMode::Utf8,
            &mut mb,
        );
        // All 64 contexts of a type share one histogram.
        for ty in 0..mb.literal_split.num_types {
            let base = mb.literal_context_map[ty << LITERAL_CONTEXT_BITS];
            for ctx in 0..64 {
                assert_eq!(mb.literal_context_map[(ty << LITERAL_CONTEXT_BITS) + ctx], base);
            }
        }
    }
}
