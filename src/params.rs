//! Encoder parameter records.

use crate::constants::{distance_alphabet_size, MAX_DISTANCE_BITS};
use crate::quality;

/// Shape parameters of the selected hasher variant.
#[derive(Clone, Copy, Debug, Default)]
pub struct HasherParams {
    pub hasher_type: i32,
    pub bucket_bits: u32,
    pub block_bits: u32,
    pub hash_len: u32,
    pub num_last_distances_to_check: usize,
}

/// Distance alphabet parameters. NPOSTFIX and NDIRECT stay zero: the
/// parameter search that would raise them only activates for font-style
/// inputs, which this encoder does not special-case.
#[derive(Clone, Copy, Debug)]
pub struct DistanceParams {
    pub distance_postfix_bits: u32,
    pub num_direct_distance_codes: u32,
    pub alphabet_size: usize,
    pub max_distance: usize,
}

impl Default for DistanceParams {
    fn default() -> Self {
        DistanceParams {
            distance_postfix_bits: 0,
            num_direct_distance_codes: 0,
            alphabet_size: distance_alphabet_size(0, 0, MAX_DISTANCE_BITS),
            // ndirect + (1 << (maxbits + npostfix + 2)) - (1 << (npostfix + 2))
            max_distance: (1 << (MAX_DISTANCE_BITS + 2)) - 4,
        }
    }
}

/// Encoding parameters with the quality-derived fields resolved.
#[derive(Clone, Debug)]
pub struct EncoderParams {
    pub quality: i32,
    pub lgwin: u32,
    pub lgblock: i32,
    pub size_hint: usize,
    pub disable_literal_context_modeling: bool,
    pub large_window: bool,
    pub hasher: HasherParams,
    pub dist: DistanceParams,
}

impl EncoderParams {
    pub fn new(quality: i32, lgwin: u32) -> EncoderParams {
        let mut params = EncoderParams {
            quality,
            lgwin,
            lgblock: 0,
            size_hint: 0,
            disable_literal_context_modeling: false,
            large_window: false,
            hasher: HasherParams::default(),
            dist: DistanceParams::default(),
        };
        params.resolve();
        params
    }

    /// Re-derives the dependent fields after quality/lgwin/size_hint change.
    pub fn resolve(&mut self) {
        quality::sanitize_params(self);
        self.lgblock = quality::compute_lg_block(self);
        self.hasher = quality::choose_hasher(self);
    }

    pub fn with_size_hint(mut self, size_hint: usize) -> EncoderParams {
        self.size_hint = size_hint;
        self.resolve();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_distance_params_match_the_format() {
        let d = DistanceParams::default();
        assert_eq!(d.alphabet_size, 64);
        assert_eq!(d.max_distance, 0x3FF_FFFC);
    }

    #[test]
    fn size_hint_switches_to_the_long_hasher() {
        let p = EncoderParams::new(4, 22).with_size_hint(2 << 20);
        assert_eq!(p.hasher.hasher_type, 54);
        let p = EncoderParams::new(4, 22).with_size_hint(1 << 10);
        assert_eq!(p.hasher.hasher_type, 4);
    }
}
