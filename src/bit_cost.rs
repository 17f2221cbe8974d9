//! Bit-cost estimates for histograms: entropy and the cost of actually
//! serializing a prefix code for the population.

use crate::constants::{fast_log2, CODE_LENGTH_CODES, REPEAT_ZERO_CODE_LENGTH};
use crate::histogram::Histogram;

/// Shannon entropy of `population` in bits; also returns the total count.
pub fn shannon_entropy(population: &[u32]) -> (f64, usize) {
    let mut sum: usize = 0;
    let mut retval = 0.0;
    for &p in population {
        let p = p as usize;
        sum += p;
        retval -= p as f64 * fast_log2(p);
    }
    if sum != 0 {
        retval += sum as f64 * fast_log2(sum);
    }
    (retval, sum)
}

/// Entropy clamped below by one bit per symbol occurrence.
pub fn bits_entropy(population: &[u32]) -> f64 {
    let (mut retval, sum) = shannon_entropy(population);
    if retval < sum as f64 {
        retval = sum as f64;
    }
    retval
}

const ONE_SYMBOL_HISTOGRAM_COST: f64 = 12.0;
const TWO_SYMBOL_HISTOGRAM_COST: f64 = 20.0;
const THREE_SYMBOL_HISTOGRAM_COST: f64 = 28.0;
const FOUR_SYMBOL_HISTOGRAM_COST: f64 = 37.0;

/// Estimated bits to encode this histogram's data under its own prefix code,
/// including the cost of describing the code itself.
pub fn population_cost<const N: usize>(histogram: &Histogram<N>) -> f64 {
    if histogram.total_count == 0 {
        return ONE_SYMBOL_HISTOGRAM_COST;
    }
    let mut s = [0usize; 5];
    let mut count = 0;
    for i in 0..N {
        if histogram.data[i] > 0 {
            if count < 5 {
                s[count] = i;
            }
            count += 1;
            if count > 4 {
                break;
            }
        }
    }
    match count {
        1 => return ONE_SYMBOL_HISTOGRAM_COST,
        2 => return TWO_SYMBOL_HISTOGRAM_COST + histogram.total_count as f64,
        3 => {
            let h0 = histogram.data[s[0]];
            let h1 = histogram.data[s[1]];
            let h2 = histogram.data[s[2]];
            let histomax = h0.max(h1).max(h2);
            return THREE_SYMBOL_HISTOGRAM_COST
                + 2.0 * (f64::from(h0) + f64::from(h1) + f64::from(h2))
                - f64::from(histomax);
        }
        4 => {
            let mut histo = [0u32; 4];
            for i in 0..4 {
                histo[i] = histogram.data[s[i]];
            }
            histo.sort_unstable_by(|a, b| b.cmp(a));
            let h23 = histo[2] + histo[3];
            let histomax = h23.max(histo[0]);
            return FOUR_SYMBOL_HISTOGRAM_COST + 3.0 * f64::from(h23)
                + 2.0 * (f64::from(histo[0]) + f64::from(histo[1]))
                - f64::from(histomax);
        }
        _ => {}
    }

    // General case: entropy of the data plus an approximation of the
    // code-length-code overhead. The loop builds a simplified code-length
    // histogram using the zero-repeat code 17 but not the non-zero repeat 16.
    let mut bits = 0.0;
    let mut max_depth: usize = 1;
    let mut depth_histo = [0u32; CODE_LENGTH_CODES];
    let log2total = fast_log2(histogram.total_count);
    let mut i = 0;
    while i < N {
        if histogram.data[i] > 0 {
            // -log2(P(symbol)) = log2(total) - log2(count(symbol))
            let log2p = log2total - fast_log2(histogram.data[i] as usize);
            let mut depth = (log2p + 0.5) as usize;
            bits += f64::from(histogram.data[i]) * log2p;
            if depth > 15 {
                depth = 15;
            }
            if depth > max_depth {
                max_depth = depth;
            }
            depth_histo[depth] += 1;
            i += 1;
        } else {
            // Run of zeros: count the 17-codes needed to skip it.
            let mut reps: u32 = 1;
            let mut k = i + 1;
            while k < N && histogram.data[k] == 0 {
                reps += 1;
                k += 1;
            }
            i += reps as usize;
            if i == N {
                // The final zero run is implicit, not coded.
                break;
            }
            if reps < 3 {
                depth_histo[0] += reps;
            } else {
                reps -= 2;
                while reps > 0 {
                    depth_histo[REPEAT_ZERO_CODE_LENGTH as usize] += 1;
                    bits += 3.0;
                    reps >>= 3;
                }
            }
        }
    }
    // Code-length-code preamble plus its entropy.
    bits += (18 + 2 * max_depth) as f64;
    bits += bits_entropy(&depth_histo);
    bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::HistogramLiteral;

    #[test]
    fn entropy_of_uniform_pair_is_one_bit_each() {
        let (e, total) = shannon_entropy(&[8, 8]);
        assert_eq!(total, 16);
        assert!((e - 16.0).abs() < 1e-9);
    }

    #[test]
    fn entropy_floor_is_total_count() {
        // Highly skewed distributions still cost one bit per symbol.
        assert!(bits_entropy(&[1000, 1]) >= 1001.0);
    }

    #[test]
    fn small_population_costs() {
        let mut h = HistogramLiteral::new();
        assert_eq!(population_cost(&h), 12.0);
        h.add(7);
        h.add(7);
        assert_eq!(population_cost(&h), 12.0);
        h.add(8);
        assert_eq!(population_cost(&h), 20.0 + 3.0);
    }

    #[test]
    fn dense_population_cost_tracks_entropy() {
        let mut h = HistogramLiteral::new();
        for i in 0..64usize {
            for _ in 0..10 {
                h.add(i);
            }
        }
        let cost = population_cost(&h);
        // 640 symbols over 64 equiprobable values: ~6 bits each plus code.
        assert!(cost > 6.0 * 640.0 * 0.95);
        assert!(cost < 6.0 * 640.0 + 400.0);
    }
}
