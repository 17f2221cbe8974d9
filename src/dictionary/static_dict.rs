//! Encoder-side static dictionary matching.
//!
//! Finds dictionary words (optionally transformed) matching the bytes at the
//! current position. Two lookup structures are carried verbatim from the
//! reference word list: a bucketed chain of `DictWord`s keyed by a 15-bit
//! hash of the first four bytes (exhaustive search, used by the optimal
//! parser), and a flat 2-slot probe table keyed by a 14-bit hash (cheap
//! fallback probe for the greedy hashers).

use crate::dictionary::transform::CUTOFF_TRANSFORMS;
use crate::dictionary::{DICTIONARY_DATA, OFFSETS_BY_LENGTH, SIZE_BITS_BY_LENGTH};
use crate::hash::find_match_length;

pub const MAX_STATIC_DICTIONARY_MATCH_LEN: usize = 37;
/// Sentinel for "no match of this length".
pub const INVALID_MATCH: u32 = 0xFFF_FFFF;

const DICT_HASH_MUL32: u32 = 0x1E35_A7BD;
const DICT_NUM_BITS: u32 = 15;

static BUCKETS: &[u8; 65536] = include_bytes!("static_dict_buckets.bin");
static DICT_WORDS: &[u8; 126_820] = include_bytes!("static_dict_words.bin");
static HASH_WORDS: &[u8; 65536] = include_bytes!("static_dict_hash_words.bin");
static HASH_LENGTHS: &[u8; 32768] = include_bytes!("static_dict_hash_lengths.bin");

/// A word reference in the chained lookup table. Bit 7 of `len` marks the
/// end of a bucket chain.
#[derive(Clone, Copy)]
struct DictWord {
    len: u8,
    transform: u8,
    idx: u16,
}

#[inline]
fn bucket(i: usize) -> usize {
    u16::from_le_bytes([BUCKETS[2 * i], BUCKETS[2 * i + 1]]) as usize
}

#[inline]
fn dict_word(i: usize) -> DictWord {
    let b = &DICT_WORDS[4 * i..4 * i + 4];
    DictWord {
        len: b[0],
        transform: b[1],
        idx: u16::from_le_bytes([b[2], b[3]]),
    }
}

#[inline]
fn hash(data: &[u8]) -> usize {
    let h = u32::from_le_bytes([data[0], data[1], data[2], data[3]]).wrapping_mul(DICT_HASH_MUL32);
    (h >> (32 - DICT_NUM_BITS)) as usize
}

/// 14-bit probe-table hash (two consecutive slots per value).
#[inline]
pub fn hash14(data: &[u8]) -> usize {
    let h = u32::from_le_bytes([data[0], data[1], data[2], data[3]]).wrapping_mul(DICT_HASH_MUL32);
    (h >> (32 - 14)) as usize
}

/// Probe-table item at `key`: packed `(word_idx << 5) | len`, zero if empty.
#[inline]
pub fn hash_table_item(key: usize) -> usize {
    HASH_LENGTHS[key] as usize | ((u16::from_le_bytes([HASH_WORDS[2 * key], HASH_WORDS[2 * key + 1]]) as usize) << 5)
}

#[inline]
fn add_match(distance: usize, len: usize, len_code: usize, matches: &mut [u32; 38]) {
    let m = ((distance << 5) + len_code) as u32;
    if m < matches[len] {
        matches[len] = m;
    }
}

#[inline]
fn word_bytes(id: usize, len: usize) -> &'static [u8] {
    let offset = OFFSETS_BY_LENGTH[len] as usize + len * id;
    &DICTIONARY_DATA[offset..offset + len]
}

#[inline]
fn dict_match_length(data: &[u8], id: usize, len: usize, maxlen: usize) -> usize {
    find_match_length(word_bytes(id, len), data, len.min(maxlen))
}

/// True when `data` matches word `w` under its (identity or uppercase)
/// transform for the full word length.
fn is_match(w: DictWord, data: &[u8], max_length: usize) -> bool {
    let len = (w.len & 0x1F) as usize;
    if len > max_length || data.len() < len {
        return false;
    }
    let dict = word_bytes(w.idx as usize, len);
    match w.transform {
        0 => find_match_length(dict, data, len) == len,
        10 => {
            // Uppercase-first: the table only references ASCII words.
            dict[0].is_ascii_lowercase()
                && (dict[0] ^ 32) == data[0]
                && find_match_length(&dict[1..], &data[1..], len - 1) == len - 1
        }
        _ => {
            // Uppercase-all.
            dict.iter().zip(data).all(|(&d, &b)| {
                if d.is_ascii_lowercase() {
                    (d ^ 32) == b
                } else {
                    d == b
                }
            })
        }
    }
}

/// Suffix continuations of a fully matched identity word, as
/// (suffix, transform id) pairs; every pair whose suffix follows the word
/// in the input contributes a match.
const IDENTITY_SUFFIXES: &[(&[u8], usize)] = &[
    (b" ", 1),
    (b" a ", 28),
    (b" as ", 46),
    (b" at ", 60),
    (b" and ", 10),
    (b" by ", 38),
    (b" in ", 16),
    (b" is ", 47),
    (b" for ", 25),
    (b" from ", 37),
    (b" of ", 8),
    (b" on ", 45),
    (b" not ", 80),
    (b" the ", 5),
    (b" that ", 29),
    (b" to ", 17),
    (b" with ", 35),
    (b"\"", 19),
    (b"\">", 21),
    (b".", 20),
    (b". ", 31),
    (b". The ", 43),
    (b". This ", 75),
    (b",", 76),
    (b", ", 14),
    (b"\n", 22),
    (b"\n\t", 50),
    (b"]", 24),
    (b"'", 36),
    (b":", 51),
    (b"(", 57),
    (b"=\"", 70),
    (b"='", 86),
    (b"al ", 84),
    (b"ed ", 53),
    (b"er ", 82),
    (b"est ", 95),
    (b"ful ", 90),
    (b"ive ", 92),
    (b"ize ", 100),
    (b"less ", 93),
    (b"ly ", 61),
    (b"ous ", 106),
];

/// Suffix continuations of an uppercased word:
/// (suffix, all-caps transform id, first-caps transform id).
const UPPERCASE_SUFFIXES: &[(&[u8], usize, usize)] = &[
    (b" ", 68, 4),
    (b"\"", 87, 66),
    (b"\">", 97, 69),
    (b".", 101, 79),
    (b". ", 114, 88),
    (b",", 112, 99),
    (b", ", 107, 58),
    (b"'", 94, 74),
    (b"(", 113, 78),
    (b"=\"", 105, 104),
    (b"='", 116, 108),
];

/// For every length `l`, records the lowest-distance dictionary reference
/// producing an `l`-byte match at `data`, as `(distance << 5) | len_code`.
/// `matches` must be pre-filled with [`INVALID_MATCH`].
pub fn find_all_static_dictionary_matches(
    data: &[u8],
    min_length: usize,
    max_length: usize,
    matches: &mut [u32; 38],
) -> bool {
    let mut has_found_match = false;

    let mut offset = bucket(hash(data));
    let mut end = offset == 0;
    while !end {
        let mut w = dict_word(offset);
        offset += 1;
        let l = (w.len & 0x1F) as usize;
        let n = 1usize << SIZE_BITS_BY_LENGTH[l];
        let id = w.idx as usize;
        end = w.len & 0x80 != 0;
        w.len = l as u8;
        if w.transform == 0 {
            let matchlen = dict_match_length(data, id, l, max_length);

            // Transform "" + identity + ""
            if matchlen == l {
                add_match(id, l, l, matches);
                has_found_match = true;
            }

            // Omit-last-1, and the "ing " continuation it enables.
            if matchlen >= l - 1 {
                add_match(id + 12 * n, l - 1, l, matches);
                if l + 2 < max_length && data.len() > l + 2 && data[l - 1..].starts_with(b"ing ") {
                    add_match(id + 49 * n, l + 3, l, matches);
                }
                has_found_match = true;
            }

            // Omit-last-2..9 via the cut-off transforms.
            let minlen = if l > 9 { min_length.max(l - 9) } else { min_length };
            let maxlen = matchlen.min(l.saturating_sub(2));
            let mut len = minlen;
            while len <= maxlen {
                let cut = l - len;
                let transform_id =
                    (cut << 2) + ((CUTOFF_TRANSFORMS >> (cut as u64 * 6)) & 0x3F) as usize;
                add_match(id + transform_id * n, len, l, matches);
                has_found_match = true;
                len += 1;
            }

            if matchlen < l || l + 6 >= max_length {
                continue;
            }

            // "" + identity + <suffix>
            let s = &data[l..];
            for &(suffix, tid) in IDENTITY_SUFFIXES {
                if s.starts_with(suffix) {
                    add_match(id + tid * n, l + suffix.len(), l, matches);
                }
            }
        } else {
            // Uppercase-first stores transform 10; everything else in the
            // table is uppercase-all.
            let is_all_caps = w.transform != 10;
            if !is_match(w, data, max_length) {
                continue;
            }
            add_match(id + (if is_all_caps { 44 } else { 9 }) * n, l, l, matches);
            has_found_match = true;
            if l + 1 >= max_length {
                continue;
            }
            let s = &data[l..];
            for &(suffix, all_id, first_id) in UPPERCASE_SUFFIXES {
                if s.starts_with(suffix) {
                    let tid = if is_all_caps { all_id } else { first_id };
                    add_match(id + tid * n, l + suffix.len(), l, matches);
                }
            }
        }
    }

    // Transforms with prefixes " " and "."
    if max_length >= 5 && (data[0] == b' ' || data[0] == b'.') {
        let is_space = data[0] == b' ';
        let mut offset = bucket(hash(&data[1..]));
        let mut end = offset == 0;
        while !end {
            let mut w = dict_word(offset);
            offset += 1;
            let l = (w.len & 0x1F) as usize;
            let n = 1usize << SIZE_BITS_BY_LENGTH[l];
            let id = w.idx as usize;
            end = w.len & 0x80 != 0;
            w.len = l as u8;
            if w.transform == 0 {
                if !is_match(w, &data[1..], max_length - 1) {
                    continue;
                }
                add_match(id + (if is_space { 6 } else { 32 }) * n, l + 1, l, matches);
                has_found_match = true;
                if l + 2 >= max_length {
                    continue;
                }
                let s = &data[l + 1..];
                if s.starts_with(b" ") {
                    add_match(id + (if is_space { 2 } else { 77 }) * n, l + 2, l, matches);
                } else if s.starts_with(b"(") {
                    add_match(id + (if is_space { 89 } else { 67 }) * n, l + 2, l, matches);
                } else if is_space {
                    if s.starts_with(b",") {
                        add_match(id + 103 * n, l + 2, l, matches);
                        if s.starts_with(b", ") {
                            add_match(id + 33 * n, l + 3, l, matches);
                        }
                    } else if s.starts_with(b".") {
                        add_match(id + 71 * n, l + 2, l, matches);
                        if s.starts_with(b". ") {
                            add_match(id + 52 * n, l + 3, l, matches);
                        }
                    } else if s.starts_with(b"=\"") {
                        add_match(id + 81 * n, l + 3, l, matches);
                    } else if s.starts_with(b"='") {
                        add_match(id + 98 * n, l + 3, l, matches);
                    }
                }
            } else if is_space {
                let is_all_caps = w.transform != 10;
                if !is_match(w, &data[1..], max_length - 1) {
                    continue;
                }
                add_match(id + (if is_all_caps { 85 } else { 30 }) * n, l + 1, l, matches);
                has_found_match = true;
                if l + 2 >= max_length {
                    continue;
                }
                let s = &data[l + 1..];
                if s.starts_with(b" ") {
                    add_match(id + (if is_all_caps { 83 } else { 15 }) * n, l + 2, l, matches);
                } else if s.starts_with(b",") {
                    if !is_all_caps {
                        add_match(id + 109 * n, l + 2, l, matches);
                    }
                    if s.starts_with(b", ") {
                        add_match(id + (if is_all_caps { 111 } else { 65 }) * n, l + 3, l, matches);
                    }
                } else if s.starts_with(b".") {
                    add_match(id + (if is_all_caps { 115 } else { 96 }) * n, l + 2, l, matches);
                    if s.starts_with(b". ") {
                        add_match(id + (if is_all_caps { 117 } else { 91 }) * n, l + 3, l, matches);
                    }
                } else if s.starts_with(b"=\"") {
                    add_match(id + (if is_all_caps { 110 } else { 118 }) * n, l + 3, l, matches);
                } else if s.starts_with(b"='") {
                    add_match(id + (if is_all_caps { 119 } else { 120 }) * n, l + 3, l, matches);
                }
            }
        }
    }

    // Transforms with prefixes "e ", "s ", ", " and "\xC2\xA0".
    if max_length >= 6
        && ((data[1] == b' ' && (data[0] == b'e' || data[0] == b's' || data[0] == b','))
            || (data[0] == 0xC2 && data[1] == 0xA0))
    {
        let mut offset = bucket(hash(&data[2..]));
        let mut end = offset == 0;
        while !end {
            let mut w = dict_word(offset);
            offset += 1;
            let l = (w.len & 0x1F) as usize;
            let n = 1usize << SIZE_BITS_BY_LENGTH[l];
            let id = w.idx as usize;
            end = w.len & 0x80 != 0;
            w.len = l as u8;
            if w.transform == 0 && is_match(w, &data[2..], max_length - 2) {
                if data[0] == 0xC2 {
                    add_match(id + 102 * n, l + 2, l, matches);
                    has_found_match = true;
                } else if l + 2 < max_length && data.len() > l + 2 && data[l + 2] == b' ' {
                    let t = match data[0] {
                        b'e' => 18,
                        b's' => 7,
                        _ => 13,
                    };
                    add_match(id + t * n, l + 3, l, matches);
                    has_found_match = true;
                }
            }
        }
    }

    // Transforms with prefixes " the " and ".com/".
    if max_length >= 9 && (data.starts_with(b" the ") || data.starts_with(b".com/")) {
        let mut offset = bucket(hash(&data[5..]));
        let mut end = offset == 0;
        while !end {
            let mut w = dict_word(offset);
            offset += 1;
            let l = (w.len & 0x1F) as usize;
            let n = 1usize << SIZE_BITS_BY_LENGTH[l];
            let id = w.idx as usize;
            end = w.len & 0x80 != 0;
            w.len = l as u8;
            if w.transform == 0 && is_match(w, &data[5..], max_length - 5) {
                add_match(
                    id + if data[0] == b' ' { 41 } else { 72 } * n,
                    l + 5,
                    l,
                    matches,
                );
                has_found_match = true;
                if l + 5 < max_length && data[0] == b' ' {
                    let s = &data[l + 5..];
                    if l + 8 < max_length && s.starts_with(b" of ") {
                        add_match(id + 62 * n, l + 9, l, matches);
                        if l + 12 < max_length && s.starts_with(b" of the ") {
                            add_match(id + 73 * n, l + 13, l, matches);
                        }
                    }
                }
            }
        }
    }

    has_found_match
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::transform::{transform_dictionary_word, MAX_TRANSFORMED_LENGTH};

    fn find(data: &[u8]) -> [u32; 38] {
        let mut matches = [INVALID_MATCH; 38];
        find_all_static_dictionary_matches(data, 4, data.len(), &mut matches);
        matches
    }

    /// Expands a recorded match back into bytes and checks it against the
    /// input, the way the decoder would.
    fn verify_matches(data: &[u8], matches: &[u32; 38]) {
        for (len, &m) in matches.iter().enumerate() {
            if m == INVALID_MATCH {
                continue;
            }
            let len_code = (m & 31) as usize;
            let dist = (m >> 5) as usize;
            let shift = SIZE_BITS_BY_LENGTH[len_code];
            let word_idx = dist & ((1 << shift) - 1);
            let transform_idx = dist >> shift;
            let word = crate::dictionary::dictionary_word(len_code, word_idx);
            let mut buf = [0u8; MAX_TRANSFORMED_LENGTH];
            let n = transform_dictionary_word(&mut buf, word, transform_idx);
            assert_eq!(n, len, "match length for len {}", len);
            assert_eq!(&buf[..n], &data[..n], "match content for len {}", len);
        }
    }

    #[test]
    fn finds_identity_words() {
        let data = b"time for a break";
        let matches = find(data);
        assert_ne!(matches[4], INVALID_MATCH);
        verify_matches(data, &matches);
    }

    #[test]
    fn finds_suffix_transforms() {
        // "time " should match via identity + " " suffix (length 5).
        let data = b"time is on our side, always";
        let matches = find(data);
        assert_ne!(matches[5], INVALID_MATCH, "expected 'time ' match");
        verify_matches(data, &matches);
    }

    #[test]
    fn finds_uppercase_first_words() {
        let data = b"Time and again";
        let matches = find(data);
        assert_ne!(matches[4], INVALID_MATCH);
        verify_matches(data, &matches);
    }

    #[test]
    fn finds_space_prefixed_words() {
        let data = b" time after time";
        let matches = find(data);
        assert_ne!(matches[5], INVALID_MATCH, "expected ' time' match");
        verify_matches(data, &matches);
    }

    #[test]
    fn cutoff_matches_shorten_words() {
        // A long word matched partially produces omit-last matches.
        let data = b"informatio"; // "information" cut short
        let matches = find(data);
        verify_matches(data, &matches);
    }

    #[test]
    fn probe_table_items_are_consistent() {
        // Every non-empty probe item must reference a real word whose first
        // four bytes hash back to the probed slot family.
        let mut seen = 0;
        for key in (0..32768).step_by(97) {
            let item = hash_table_item(key);
            if item == 0 {
                continue;
            }
            let len = item & 0x1F;
            let idx = item >> 5;
            if !(4..=24).contains(&len) {
                continue;
            }
            assert!(idx < (1 << SIZE_BITS_BY_LENGTH[len]));
            seen += 1;
        }
        assert!(seen > 0);
    }
}
