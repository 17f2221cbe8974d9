//! Length and distance prefix-code tables.
//!
//! Covers the fixed alphabets of RFC 7932 section 5: insert/copy length
//! codes, the combined 704-symbol insert-and-copy command alphabet, the
//! block-length code, and distance prefix encoding for arbitrary
//! NPOSTFIX/NDIRECT parameters.

use once_cell::sync::Lazy;

use crate::constants::{log2_floor_non_zero, NUM_COMMAND_SYMBOLS, NUM_DISTANCE_SHORT_CODES};

/// First insert length of each insert length code.
pub const INS_BASE: [u32; 24] = [
    0, 1, 2, 3, 4, 5, 6, 8, 10, 14, 18, 26, 34, 50, 66, 98, 130, 194, 322, 578, 1090, 2114, 6210,
    22594,
];

/// Extra bits per insert length code.
pub const INS_EXTRA: [u32; 24] = [
    0, 0, 0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 7, 8, 9, 10, 12, 14, 24,
];

/// First copy length of each copy length code.
pub const COPY_BASE: [u32; 24] = [
    2, 3, 4, 5, 6, 7, 8, 9, 10, 12, 14, 18, 22, 30, 38, 54, 70, 102, 134, 198, 326, 582, 1094,
    2118,
];

/// Extra bits per copy length code.
pub const COPY_EXTRA: [u32; 24] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 7, 8, 9, 10, 24,
];

#[inline]
pub fn get_insert_length_code(insertlen: usize) -> u16 {
    if insertlen < 6 {
        insertlen as u16
    } else if insertlen < 130 {
        let nbits = log2_floor_non_zero(insertlen - 2) - 1;
        ((nbits << 1) as usize + ((insertlen - 2) >> nbits) + 2) as u16
    } else if insertlen < 2114 {
        (log2_floor_non_zero(insertlen - 66) + 10) as u16
    } else if insertlen < 6210 {
        21
    } else if insertlen < 22594 {
        22
    } else {
        23
    }
}

#[inline]
pub fn get_copy_length_code(copylen: usize) -> u16 {
    if copylen < 10 {
        (copylen - 2) as u16
    } else if copylen < 134 {
        let nbits = log2_floor_non_zero(copylen - 6) - 1;
        ((nbits << 1) as usize + ((copylen - 6) >> nbits) + 4) as u16
    } else if copylen < 2118 {
        (log2_floor_non_zero(copylen - 70) + 12) as u16
    } else {
        23
    }
}

#[inline]
pub fn get_insert_extra(inscode: u16) -> u32 {
    INS_EXTRA[inscode as usize]
}

#[inline]
pub fn get_insert_base(inscode: u16) -> u32 {
    INS_BASE[inscode as usize]
}

#[inline]
pub fn get_copy_extra(copycode: u16) -> u32 {
    COPY_EXTRA[copycode as usize]
}

#[inline]
pub fn get_copy_base(copycode: u16) -> u32 {
    COPY_BASE[copycode as usize]
}

/// Merges an insert and a copy length code into the combined command symbol
/// (RFC 7932 section 5.3). The first 128 symbols imply distance code zero.
pub fn combine_length_codes(inscode: u16, copycode: u16, use_last_distance: bool) -> u16 {
    let bits64 = (copycode & 0x7) | ((inscode & 0x7) << 3);
    if use_last_distance && inscode < 8 && copycode < 16 {
        if copycode < 8 {
            bits64
        } else {
            bits64 | 64
        }
    } else {
        // Cell offsets for the nine (insert-range, copy-range) combinations,
        // packed the same way the specification lays the table out.
        let mut offset = 2 * ((copycode as u32 >> 3) + 3 * (inscode as u32 >> 3));
        offset = (offset << 5) + 0x40 + ((0x52_0D40 >> offset) & 0xC0);
        offset as u16 | bits64
    }
}

/// Computes the command symbol for an (insert, copy) length pair.
pub fn get_length_code(insertlen: usize, copylen: usize, use_last_distance: bool) -> u16 {
    let inscode = get_insert_length_code(insertlen);
    let copycode = get_copy_length_code(copylen);
    combine_length_codes(inscode, copycode, use_last_distance)
}

/// Encodes an intermediate distance code (short codes and direct codes pass
/// through; larger distances get a bucketed prefix). The returned symbol
/// carries its extra-bit count in the upper 6 bits.
pub fn prefix_encode_copy_distance(
    distance_code: usize,
    num_direct_codes: usize,
    postfix_bits: u32,
) -> (u16, u32) {
    if distance_code < NUM_DISTANCE_SHORT_CODES + num_direct_codes {
        return (distance_code as u16, 0);
    }
    let dist =
        (1usize << (postfix_bits + 2)) + (distance_code - NUM_DISTANCE_SHORT_CODES - num_direct_codes);
    let bucket = (log2_floor_non_zero(dist) - 1) as usize;
    let postfix_mask = (1usize << postfix_bits) - 1;
    let postfix = dist & postfix_mask;
    let prefix = (dist >> bucket) & 1;
    let offset = (2 + prefix) << bucket;
    let nbits = bucket as u32 - postfix_bits;
    let code = (nbits as usize) << 10
        | (NUM_DISTANCE_SHORT_CODES
            + num_direct_codes
            + ((2 * (nbits as usize - 1) + prefix) << postfix_bits)
            + postfix);
    let extra = ((dist - offset) >> postfix_bits) as u32;
    (code as u16, extra)
}

// ─────────────────────────────────────────────────────────────────────────────
// Block-length prefix code (26 symbols)
// ─────────────────────────────────────────────────────────────────────────────

/// Value range of one block-length prefix symbol: [offset, offset + 2^nbits).
#[derive(Clone, Copy)]
pub struct PrefixCodeRange {
    pub offset: u32,
    pub nbits: u32,
}

pub const BLOCK_LENGTH_PREFIX_CODE: [PrefixCodeRange; 26] = [
    PrefixCodeRange { offset: 1, nbits: 2 },
    PrefixCodeRange { offset: 5, nbits: 2 },
    PrefixCodeRange { offset: 9, nbits: 2 },
    PrefixCodeRange { offset: 13, nbits: 2 },
    PrefixCodeRange { offset: 17, nbits: 3 },
    PrefixCodeRange { offset: 25, nbits: 3 },
    PrefixCodeRange { offset: 33, nbits: 3 },
    PrefixCodeRange { offset: 41, nbits: 3 },
    PrefixCodeRange { offset: 49, nbits: 4 },
    PrefixCodeRange { offset: 65, nbits: 4 },
    PrefixCodeRange { offset: 81, nbits: 4 },
    PrefixCodeRange { offset: 97, nbits: 4 },
    PrefixCodeRange { offset: 113, nbits: 5 },
    PrefixCodeRange { offset: 145, nbits: 5 },
    PrefixCodeRange { offset: 177, nbits: 5 },
    PrefixCodeRange { offset: 209, nbits: 5 },
    PrefixCodeRange { offset: 241, nbits: 6 },
    PrefixCodeRange { offset: 305, nbits: 6 },
    PrefixCodeRange { offset: 369, nbits: 7 },
    PrefixCodeRange { offset: 497, nbits: 8 },
    PrefixCodeRange { offset: 753, nbits: 9 },
    PrefixCodeRange { offset: 1265, nbits: 10 },
    PrefixCodeRange { offset: 2289, nbits: 11 },
    PrefixCodeRange { offset: 4337, nbits: 12 },
    PrefixCodeRange { offset: 8433, nbits: 13 },
    PrefixCodeRange { offset: 16625, nbits: 24 },
];

/// Symbol for a block length (1..=16 793 840).
pub fn block_length_prefix_code(len: u32) -> u32 {
    let mut code: u32 = if len >= 177 {
        if len >= 753 {
            20
        } else {
            14
        }
    } else if len >= 41 {
        7
    } else {
        0
    };
    while code < 25 && len >= BLOCK_LENGTH_PREFIX_CODE[code as usize + 1].offset {
        code += 1;
    }
    code
}

/// Symbol plus its extra-bit count and value for a block length.
pub fn get_block_length_prefix_code(len: u32) -> (u32, u32, u32) {
    let code = block_length_prefix_code(len);
    let range = BLOCK_LENGTH_PREFIX_CODE[code as usize];
    (code, range.nbits, len - range.offset)
}

// ─────────────────────────────────────────────────────────────────────────────
// Command look-up table (decoder side)
// ─────────────────────────────────────────────────────────────────────────────

/// Decoded view of one insert-and-copy command symbol.
#[derive(Clone, Copy)]
pub struct CmdLutElement {
    pub insert_len_extra_bits: u8,
    pub copy_len_extra_bits: u8,
    /// 0 for the implicit "reuse last distance" commands, -1 otherwise.
    pub distance_code: i8,
    /// Distance context derived from the copy length, 0..=3.
    pub context: u8,
    pub insert_len_offset: u16,
    pub copy_len_offset: u16,
}

/// Insert-range high bits per 64-command block past the implicit region.
const INSERT_RANGE_LUT: [u16; 9] = [0, 0, 8, 8, 0, 16, 8, 16, 16];
/// Copy-range high bits per 64-command block past the implicit region.
const COPY_RANGE_LUT: [u16; 9] = [0, 8, 0, 8, 16, 0, 16, 8, 16];

fn build_cmd_lut() -> Vec<CmdLutElement> {
    let mut lut = Vec::with_capacity(NUM_COMMAND_SYMBOLS);
    for cmd in 0..NUM_COMMAND_SYMBOLS as u16 {
        let (inscode, copycode, distance_code) = if cmd < 128 {
            // Implicit distance zero: insert codes 0..7, copy codes 0..15.
            ((cmd >> 3) & 7, (cmd & 7) | ((cmd >> 6) << 3), 0i8)
        } else {
            let block = ((cmd >> 6) - 2) as usize;
            (
                INSERT_RANGE_LUT[block] | ((cmd >> 3) & 7),
                COPY_RANGE_LUT[block] | (cmd & 7),
                -1i8,
            )
        };
        let context = if copycode > 2 { 3 } else { copycode as u8 };
        lut.push(CmdLutElement {
            insert_len_extra_bits: INS_EXTRA[inscode as usize] as u8,
            copy_len_extra_bits: COPY_EXTRA[copycode as usize] as u8,
            distance_code,
            context,
            insert_len_offset: INS_BASE[inscode as usize] as u16,
            copy_len_offset: COPY_BASE[copycode as usize] as u16,
        });
    }
    lut
}

/// Per-symbol decode data for the 704 command symbols.
pub static CMD_LUT: Lazy<Vec<CmdLutElement>> = Lazy::new(build_cmd_lut);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_codes_cover_their_ranges() {
        for code in 0..24u16 {
            let lo = INS_BASE[code as usize] as usize;
            let hi = lo + ((1usize << INS_EXTRA[code as usize]) - 1);
            assert_eq!(get_insert_length_code(lo), code);
            assert_eq!(get_insert_length_code(hi.min(1 << 24)), code);
        }
    }

    #[test]
    fn copy_codes_cover_their_ranges() {
        for code in 0..24u16 {
            let lo = COPY_BASE[code as usize] as usize;
            let hi = lo + ((1usize << COPY_EXTRA[code as usize]) - 1);
            assert_eq!(get_copy_length_code(lo), code);
            assert_eq!(get_copy_length_code(hi.min(1 << 24)), code);
        }
    }

    #[test]
    fn combined_codes_round_trip_through_lut() {
        for ins in 0..24u16 {
            for copy in 0..24u16 {
                for &use_last in &[false, true] {
                    let cmd = combine_length_codes(ins, copy, use_last);
                    let el = CMD_LUT[cmd as usize];
                    assert_eq!(u32::from(el.insert_len_offset), INS_BASE[ins as usize]);
                    assert_eq!(u32::from(el.copy_len_offset), COPY_BASE[copy as usize]);
                    assert_eq!(u32::from(el.insert_len_extra_bits), INS_EXTRA[ins as usize]);
                    assert_eq!(u32::from(el.copy_len_extra_bits), COPY_EXTRA[copy as usize]);
                    if use_last && ins < 8 && copy < 16 {
                        assert!(cmd < 128);
                        assert_eq!(el.distance_code, 0);
                    } else {
                        assert!(cmd >= 128);
                        assert_eq!(el.distance_code, -1);
                    }
                }
            }
        }
    }

    #[test]
    fn block_length_code_boundaries() {
        for (code, range) in BLOCK_LENGTH_PREFIX_CODE.iter().enumerate() {
            assert_eq!(block_length_prefix_code(range.offset) as usize, code);
            let top = range.offset + (1 << range.nbits) - 1;
            assert_eq!(block_length_prefix_code(top) as usize, code);
        }
    }

    #[test]
    fn distance_prefix_small_codes_pass_through() {
        for code in 0..16usize {
            assert_eq!(prefix_encode_copy_distance(code, 0, 0), (code as u16, 0));
        }
    }

    #[test]
    fn distance_prefix_round_trips() {
        // Decode rule: distance = ((2 + (hcode & 1)) << nbits) - 4 + extra
        // (postfix 0, ndirect 0), then +1 after short-code bias removal.
        for distance in [1usize, 2, 3, 4, 5, 100, 1000, 65535, 1 << 22] {
            let dist_code = distance + NUM_DISTANCE_SHORT_CODES - 1;
            let (sym, extra) = prefix_encode_copy_distance(dist_code, 0, 0);
            let code = (sym & 0x3FF) as usize;
            let nbits = u32::from(sym >> 10);
            assert!(code >= NUM_DISTANCE_SHORT_CODES);
            let hcode = code - NUM_DISTANCE_SHORT_CODES;
            let decoded =
                ((2 + (hcode & 1)) << nbits) - 4 + extra as usize + NUM_DISTANCE_SHORT_CODES;
            // Undo the intermediate-code bias.
            assert_eq!(decoded - NUM_DISTANCE_SHORT_CODES + 1, distance);
        }
    }
}
