//! The static dictionary mandated by RFC 7932 appendix A.
//!
//! The 122 784-byte word list is embedded verbatim; words are grouped by
//! length (4..=24), each group holding `1 << size_bits` words. A dictionary
//! reference addresses a word by (length, index) and an optional transform
//! applied on output.

pub mod static_dict;
pub mod transform;

/// Raw word list, words of one length stored back to back.
pub static DICTIONARY_DATA: &[u8; 122_784] = include_bytes!("dictionary.bin");

/// log2(number of words) per word length; zero for unused lengths 0..=3.
pub const SIZE_BITS_BY_LENGTH: [u8; 25] = [
    0, 0, 0, 0, 10, 10, 11, 11, 10, 10, 10, 10, 10, 9, 9, 8, 7, 7, 8, 7, 7, 6, 6, 5, 5,
];

/// Byte offset of each length group inside [`DICTIONARY_DATA`].
pub const OFFSETS_BY_LENGTH: [u32; 25] = compute_offsets();

const fn compute_offsets() -> [u32; 25] {
    let mut offsets = [0u32; 25];
    let mut i = 0;
    while i < 24 {
        let nwords = if i < 4 { 0 } else { 1u32 << SIZE_BITS_BY_LENGTH[i] };
        offsets[i + 1] = offsets[i] + (i as u32) * nwords;
        i += 1;
    }
    offsets
}

/// The bytes of dictionary word `(len, index)`, untransformed.
#[inline]
pub fn dictionary_word(len: usize, index: usize) -> &'static [u8] {
    debug_assert!((4..=24).contains(&len));
    debug_assert!(index < (1 << SIZE_BITS_BY_LENGTH[len]));
    let offset = OFFSETS_BY_LENGTH[len] as usize + len * index;
    &DICTIONARY_DATA[offset..offset + len]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_span_the_whole_blob() {
        // Total size = offset after the last group.
        let last = 24;
        let total = OFFSETS_BY_LENGTH[last] as usize + last * (1usize << SIZE_BITS_BY_LENGTH[last]);
        assert_eq!(total, DICTIONARY_DATA.len());
    }

    #[test]
    fn known_words_resolve() {
        // The length-4 group famously starts with common English words.
        assert_eq!(dictionary_word(4, 0), b"time");
        assert_eq!(dictionary_word(4, 1), b"down");
        assert_eq!(dictionary_word(4, 2), b"life");
    }
}
