//! Histogram clustering by bit-cost.
//!
//! Greedy pair merging: repeatedly combine the two clusters whose union
//! costs the least extra bits. A lazy one-element "priority queue" (best
//! pair up front, unsorted tail) keeps the bookkeeping cheap. Once no merge
//! saves bits, merging continues reluctantly only if the cluster budget is
//! still exceeded.

use crate::bit_cost::population_cost;
use crate::constants::fast_log2;
use crate::histogram::Histogram;

#[derive(Clone, Copy, Default)]
struct HistogramPair {
    idx1: usize,
    idx2: usize,
    cost_combo: f64,
    cost_diff: f64,
}

/// "Less" means a worse merge candidate.
fn pair_is_less(p1: &HistogramPair, p2: &HistogramPair) -> bool {
    if p1.cost_diff != p2.cost_diff {
        p1.cost_diff > p2.cost_diff
    } else {
        (p1.idx2 - p1.idx1) > (p2.idx2 - p2.idx1)
    }
}

/// Entropy gained by keeping the clusters of these sizes separate.
fn cluster_cost_diff(size_a: usize, size_b: usize) -> f64 {
    let size_c = size_a + size_b;
    size_a as f64 * fast_log2(size_a) + size_b as f64 * fast_log2(size_b)
        - size_c as f64 * fast_log2(size_c)
}

fn compare_and_push_to_queue<const N: usize>(
    out: &[Histogram<N>],
    cluster_size: &[usize],
    idx1: usize,
    idx2: usize,
    max_num_pairs: usize,
    pairs: &mut Vec<HistogramPair>,
) {
    if idx1 == idx2 {
        return;
    }
    let (idx1, idx2) = if idx2 < idx1 { (idx2, idx1) } else { (idx1, idx2) };
    let mut p = HistogramPair {
        idx1,
        idx2,
        cost_combo: 0.0,
        cost_diff: 0.5 * cluster_cost_diff(cluster_size[idx1], cluster_size[idx2]),
    };
    p.cost_diff -= out[idx1].bit_cost;
    p.cost_diff -= out[idx2].bit_cost;

    let is_good_pair = if out[idx1].total_count == 0 {
        p.cost_combo = out[idx2].bit_cost;
        true
    } else if out[idx2].total_count == 0 {
        p.cost_combo = out[idx1].bit_cost;
        true
    } else {
        let threshold = if pairs.is_empty() {
            1e99
        } else {
            pairs[0].cost_diff.max(0.0)
        };
        let mut combo = out[idx1].clone();
        combo.add_histogram(&out[idx2]);
        let cost_combo = population_cost(&combo);
        if cost_combo < threshold - p.cost_diff {
            p.cost_combo = cost_combo;
            true
        } else {
            false
        }
    };
    if is_good_pair {
        p.cost_diff += p.cost_combo;
        if !pairs.is_empty() && pair_is_less(&pairs[0], &p) {
            // Promote the new best; the old head joins the tail.
            if pairs.len() < max_num_pairs {
                let old = pairs[0];
                pairs.push(old);
            }
            pairs[0] = p;
        } else if pairs.len() < max_num_pairs {
            pairs.push(p);
        }
    }
}

/// Merges clusters while profitable, then down to `max_clusters` if needed.
/// Returns the new number of clusters; `clusters` is truncated in place and
/// `symbols` re-pointed at surviving cluster indices.
fn histogram_combine<const N: usize>(
    out: &mut [Histogram<N>],
    cluster_size: &mut [usize],
    symbols: &mut [u32],
    clusters: &mut Vec<usize>,
    max_clusters: usize,
    max_num_pairs: usize,
) {
    let mut cost_diff_threshold = 0.0f64;
    let mut min_cluster_size = 1usize;
    let mut pairs: Vec<HistogramPair> = Vec::new();

    for idx1 in 0..clusters.len() {
        for idx2 in idx1 + 1..clusters.len() {
            compare_and_push_to_queue(
                out,
                cluster_size,
                clusters[idx1],
                clusters[idx2],
                max_num_pairs,
                &mut pairs,
            );
        }
    }

    while clusters.len() > min_cluster_size {
        if pairs.is_empty() || pairs[0].cost_diff >= cost_diff_threshold {
            // No merge saves bits: keep merging only to honor the budget.
            cost_diff_threshold = 1e99;
            min_cluster_size = max_clusters;
            continue;
        }
        let best_idx1 = pairs[0].idx1;
        let best_idx2 = pairs[0].idx2;
        let (a, b) = if best_idx1 < best_idx2 {
            let (left, right) = out.split_at_mut(best_idx2);
            (&mut left[best_idx1], &right[0])
        } else {
            unreachable!("pairs are ordered");
        };
        a.add_histogram(b);
        a.bit_cost = pairs[0].cost_combo;
        cluster_size[best_idx1] += cluster_size[best_idx2];
        for s in symbols.iter_mut() {
            if *s == best_idx2 as u32 {
                *s = best_idx1 as u32;
            }
        }
        clusters.retain(|&c| c != best_idx2);

        // Drop pairs touching the merged clusters, keeping the best first.
        let mut kept: Vec<HistogramPair> = Vec::with_capacity(pairs.len());
        for p in pairs.iter() {
            if p.idx1 == best_idx1
                || p.idx2 == best_idx1
                || p.idx1 == best_idx2
                || p.idx2 == best_idx2
            {
                continue;
            }
            if !kept.is_empty() && pair_is_less(&kept[0], p) {
                let old = kept[0];
                kept[0] = *p;
                kept.push(old);
            } else {
                kept.push(*p);
            }
        }
        pairs = kept;

        for i in 0..clusters.len() {
            compare_and_push_to_queue(
                out,
                cluster_size,
                best_idx1,
                clusters[i],
                max_num_pairs,
                &mut pairs,
            );
        }
    }
}

/// Cost of encoding `histogram` with the code of `candidate`.
fn histogram_bit_cost_distance<const N: usize>(
    histogram: &Histogram<N>,
    candidate: &Histogram<N>,
) -> f64 {
    if histogram.total_count == 0 {
        0.0
    } else {
        let mut tmp = histogram.clone();
        tmp.add_histogram(candidate);
        population_cost(&tmp) - candidate.bit_cost
    }
}

/// Reassigns each input histogram to its cheapest cluster, then rebuilds
/// the cluster histograms from their final membership.
fn histogram_remap<const N: usize>(
    inp: &[Histogram<N>],
    clusters: &[usize],
    out: &mut [Histogram<N>],
    symbols: &mut [u32],
) {
    for (i, h) in inp.iter().enumerate() {
        let mut best_out = if i == 0 {
            symbols[0] as usize
        } else {
            symbols[i - 1] as usize
        };
        let mut best_bits = histogram_bit_cost_distance(h, &out[best_out]);
        for &c in clusters {
            let cur_bits = histogram_bit_cost_distance(h, &out[c]);
            if cur_bits < best_bits {
                best_bits = cur_bits;
                best_out = c;
            }
        }
        symbols[i] = best_out as u32;
    }
    for &c in clusters {
        out[c].clear();
    }
    for (i, h) in inp.iter().enumerate() {
        out[symbols[i] as usize].add_histogram(h);
    }
}

/// Renumbers surviving clusters consecutively, in order of first use.
/// Returns the cluster count.
fn histogram_reindex<const N: usize>(out: &mut Vec<Histogram<N>>, symbols: &mut [u32]) -> usize {
    const INVALID: u32 = u32::MAX;
    let mut new_index = vec![INVALID; out.len()];
    let mut next_index = 0u32;
    for &s in symbols.iter() {
        if new_index[s as usize] == INVALID {
            new_index[s as usize] = next_index;
            next_index += 1;
        }
    }
    let mut tmp: Vec<Histogram<N>> = vec![Histogram::new(); next_index as usize];
    for s in symbols.iter_mut() {
        let ni = new_index[*s as usize];
        tmp[ni as usize] = out[*s as usize].clone();
        *s = ni;
    }
    *out = tmp;
    next_index as usize
}

const MAX_INPUT_HISTOGRAMS: usize = 64;

/// Clusters `inp` into at most `max_histograms` output histograms;
/// `histogram_symbols[i]` receives the cluster of input `i`.
/// Returns the clustered histograms.
pub fn cluster_histograms<const N: usize>(
    inp: &[Histogram<N>],
    max_histograms: usize,
    histogram_symbols: &mut Vec<u32>,
) -> Vec<Histogram<N>> {
    let in_size = inp.len();
    let mut cluster_size = vec![1usize; in_size];
    let mut out: Vec<Histogram<N>> = Vec::with_capacity(in_size);
    histogram_symbols.clear();
    for (i, h) in inp.iter().enumerate() {
        let mut c = h.clone();
        c.bit_cost = population_cost(h);
        out.push(c);
        histogram_symbols.push(i as u32);
    }

    // First pass: combine within batches to bound the pair queue.
    let mut clusters: Vec<usize> = Vec::new();
    let pairs_capacity = MAX_INPUT_HISTOGRAMS * MAX_INPUT_HISTOGRAMS / 2;
    let mut i = 0;
    while i < in_size {
        let num_to_combine = (in_size - i).min(MAX_INPUT_HISTOGRAMS);
        let mut batch: Vec<usize> = (i..i + num_to_combine).collect();
        histogram_combine(
            &mut out,
            &mut cluster_size,
            &mut histogram_symbols[i..i + num_to_combine],
            &mut batch,
            MAX_INPUT_HISTOGRAMS,
            pairs_capacity,
        );
        clusters.extend_from_slice(&batch);
        i += num_to_combine;
    }

    // Second pass: collapse similar histograms across the whole input.
    let max_num_pairs = (64 * clusters.len()).min(clusters.len() * (clusters.len() / 2));
    histogram_combine(
        &mut out,
        &mut cluster_size,
        histogram_symbols,
        &mut clusters,
        max_histograms,
        max_num_pairs.max(1),
    );

    histogram_remap(inp, &clusters, &mut out, histogram_symbols);
    histogram_reindex(&mut out, histogram_symbols);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::HistogramLiteral;

    fn histo(fill: &[(usize, u32)]) -> HistogramLiteral {
        let mut h = HistogramLiteral::new();
        for &(sym, count) in fill {
            for _ in 0..count {
                h.add(sym);
            }
        }
        h
    }

    #[test]
    fn identical_histograms_collapse() {
        let a = histo(&[(10, 50), (20, 50)]);
        let inputs = vec![a.clone(), a.clone(), a.clone(), a];
        let mut symbols = Vec::new();
        let out = cluster_histograms(&inputs, 256, &mut symbols);
        assert_eq!(out.len(), 1);
        assert!(symbols.iter().all(|&s| s == 0));
    }

    #[test]
    fn distinct_histograms_stay_apart() {
        let a = histo(&[(0, 1000)]);
        let b = histo(&[(255, 1000)]);
        let inputs = vec![a.clone(), b.clone(), a, b];
        let mut symbols = Vec::new();
        let out = cluster_histograms(&inputs, 256, &mut symbols);
        assert_eq!(out.len(), 2);
        assert_eq!(symbols[0], symbols[2]);
        assert_eq!(symbols[1], symbols[3]);
        assert_ne!(symbols[0], symbols[1]);
    }

    #[test]
    fn cluster_budget_is_enforced() {
        // 20 mutually distinct histograms, budget of 4.
        let inputs: Vec<HistogramLiteral> =
            (0..20).map(|i| histo(&[(i * 12, 400), (i * 12 + 5, 100)])).collect();
        let mut symbols = Vec::new();
        let out = cluster_histograms(&inputs, 4, &mut symbols);
        assert!(out.len() <= 4);
        assert!(symbols.iter().all(|&s| (s as usize) < out.len()));
    }
}
