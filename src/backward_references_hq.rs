//! Zopfli-style optimal parsing (qualities 10 and 11).
//!
//! Computes a per-position shortest path under an estimated bit-cost model:
//! every byte gets a node, matches become weighted edges, and the cheapest
//! command sequence falls out of a forward relaxation sweep. Quality 11
//! runs the sweep twice, refitting the cost model to the first pass's
//! command histograms.

use crate::command::Command;
use crate::constants::{fast_log2, max_backward_limit, NUM_COMMAND_SYMBOLS};
use crate::hash::{find_match_length, BackwardMatch, Hasher, H10, MAX_NUM_MATCHES_H10};
use crate::literal_cost::estimate_bit_costs_for_literals;
use crate::params::EncoderParams;
use crate::prefix::{
    combine_length_codes, get_copy_extra, get_copy_length_code, get_insert_extra,
    get_insert_length_code, prefix_encode_copy_distance,
};
use crate::quality::{max_zopfli_candidates, max_zopfli_len, LONG_COPY_QUICK_STEP};

const INFINITY: f32 = 1.7e38;

/// Distance-cache slot probed by each of the 16 short-code candidates.
const DISTANCE_CACHE_INDEX: [usize; 16] = [0, 1, 2, 3, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1];
/// Offset applied to the probed slot for each candidate.
const DISTANCE_CACHE_OFFSET: [i32; 16] = [0, 0, 0, 0, -1, 1, -2, 2, -3, 3, -1, 1, -2, 2, -3, 3];

/// Per-position node of the shortest-path sweep.
///
/// `cost` is live during the forward sweep; once the path is traced back,
/// `next` overwrites the role of the scratch fields (the sweep never reads
/// `cost` again), so both can coexist as plain fields.
#[derive(Clone, Copy)]
pub struct ZopfliNode {
    /// Copy length, with a length-code modifier in the high bits.
    length: u32,
    distance: u32,
    /// Distance short-code selector (high 5 bits) and the insert length
    /// preceding the copy (low 27 bits).
    dcode_insert_length: u32,
    cost: f32,
    next: u32,
    shortcut: u32,
}

impl ZopfliNode {
    fn stub() -> Self {
        ZopfliNode {
            length: 1,
            distance: 0,
            dcode_insert_length: 0,
            cost: INFINITY,
            next: 0,
            shortcut: 0,
        }
    }

    #[inline]
    fn copy_length(&self) -> usize {
        (self.length & 0x1FF_FFFF) as usize
    }

    #[inline]
    fn length_code(&self) -> usize {
        let modifier = (self.length >> 25) as usize;
        self.copy_length() + 9 - modifier
    }

    #[inline]
    fn copy_distance(&self) -> usize {
        self.distance as usize
    }

    #[inline]
    fn insert_length(&self) -> usize {
        (self.dcode_insert_length & 0x7FF_FFFF) as usize
    }

    #[inline]
    fn distance_code(&self) -> usize {
        let short_code = (self.dcode_insert_length >> 27) as usize;
        if short_code == 0 {
            self.copy_distance() + crate::constants::NUM_DISTANCE_SHORT_CODES - 1
        } else {
            short_code - 1
        }
    }

    #[inline]
    fn command_length(&self) -> usize {
        self.copy_length() + self.insert_length()
    }
}

fn init_zopfli_nodes(array: &mut Vec<ZopfliNode>, length: usize) {
    array.clear();
    array.resize(length, ZopfliNode::stub());
}

/// Histogram-based cost model.
struct ZopfliCostModel {
    cost_cmd: [f32; NUM_COMMAND_SYMBOLS],
    cost_dist: Vec<f32>,
    distance_histogram_size: usize,
    /// Prefix sums: literal_costs[i] is the cost of the first i literals.
    literal_costs: Vec<f32>,
    min_cost_cmd: f32,
    num_bytes: usize,
}

impl ZopfliCostModel {
    fn new(params: &EncoderParams, num_bytes: usize) -> Self {
        let distance_histogram_size = params
            .dist
            .alphabet_size
            .min(crate::constants::NUM_HISTOGRAM_DISTANCE_SYMBOLS);
        ZopfliCostModel {
            cost_cmd: [0.0; NUM_COMMAND_SYMBOLS],
            cost_dist: vec![0.0; params.dist.alphabet_size],
            distance_histogram_size,
            literal_costs: vec![0.0; num_bytes + 2],
            min_cost_cmd: 0.0,
            num_bytes,
        }
    }

    fn set_from_literal_costs(&mut self, position: usize, ringbuffer: &[u8], ringbuffer_mask: usize) {
        let num_bytes = self.num_bytes;
        {
            let (head, tail) = self.literal_costs.split_at_mut(1);
            head[0] = 0.0;
            estimate_bit_costs_for_literals(
                position,
                num_bytes,
                ringbuffer_mask,
                ringbuffer,
                &mut tail[..num_bytes],
            );
        }
        // Kahan-style carry keeps the prefix sums stable over megabytes.
        let mut literal_carry = 0.0f32;
        for i in 0..num_bytes {
            literal_carry += self.literal_costs[i + 1];
            self.literal_costs[i + 1] = self.literal_costs[i] + literal_carry;
            literal_carry -= self.literal_costs[i + 1] - self.literal_costs[i];
        }
        for i in 0..NUM_COMMAND_SYMBOLS {
            self.cost_cmd[i] = fast_log2(11 + i) as f32;
        }
        for i in 0..self.distance_histogram_size {
            self.cost_dist[i] = fast_log2(20 + i) as f32;
        }
        self.min_cost_cmd = fast_log2(11) as f32;
    }

    fn set_from_commands(
        &mut self,
        position: usize,
        ringbuffer: &[u8],
        ringbuffer_mask: usize,
        commands: &[Command],
        last_insert_len: usize,
    ) {
        let mut histogram_literal = [0u32; 256];
        let mut histogram_cmd = [0u32; NUM_COMMAND_SYMBOLS];
        let mut histogram_dist = vec![0u32; self.distance_histogram_size];
        let mut pos = position - last_insert_len;

        for cmd in commands {
            let inslength = cmd.insert_len as usize;
            let copylength = cmd.copy_len() as usize;
            let distcode = (cmd.dist_prefix & 0x3FF) as usize;
            histogram_cmd[cmd.cmd_prefix as usize] += 1;
            if cmd.cmd_prefix >= 128 && distcode < self.distance_histogram_size {
                histogram_dist[distcode] += 1;
            }
            for j in 0..inslength {
                histogram_literal[ringbuffer[(pos + j) & ringbuffer_mask] as usize] += 1;
            }
            pos += inslength + copylength;
        }

        let mut cost_literal = [0.0f32; 256];
        set_cost(&histogram_literal, true, &mut cost_literal);
        set_cost(&histogram_cmd, false, &mut self.cost_cmd);
        set_cost(&histogram_dist, false, &mut self.cost_dist);

        self.min_cost_cmd = self
            .cost_cmd
            .iter()
            .fold(INFINITY, |acc, &c| acc.min(c));

        // Rebuild literal prefix sums from the fitted literal costs.
        let num_bytes = self.num_bytes;
        self.literal_costs[0] = 0.0;
        let mut literal_carry = 0.0f32;
        for i in 0..num_bytes {
            literal_carry += cost_literal[ringbuffer[(position + i) & ringbuffer_mask] as usize];
            self.literal_costs[i + 1] = self.literal_costs[i] + literal_carry;
            literal_carry -= self.literal_costs[i + 1] - self.literal_costs[i];
        }
    }

    #[inline]
    fn command_cost(&self, cmdcode: u16) -> f32 {
        self.cost_cmd[cmdcode as usize]
    }

    #[inline]
    fn distance_cost(&self, distcode: usize) -> f32 {
        self.cost_dist[distcode]
    }

    #[inline]
    fn literal_costs(&self, from: usize, to: usize) -> f32 {
        self.literal_costs[to] - self.literal_costs[from]
    }
}

/// Shannon costs with a flat penalty for unseen symbols.
fn set_cost(histogram: &[u32], literal_histogram: bool, cost: &mut [f32]) {
    let sum: usize = histogram.iter().map(|&x| x as usize).sum();
    let log2sum = fast_log2(sum) as f32;
    let mut missing_symbol_sum = sum;
    if !literal_histogram {
        missing_symbol_sum += histogram.iter().filter(|&&x| x == 0).count();
    }
    let missing_symbol_cost = fast_log2(missing_symbol_sum) as f32 + 2.0;
    for (i, c) in cost.iter_mut().enumerate().take(histogram.len()) {
        if histogram[i] == 0 {
            *c = missing_symbol_cost;
            continue;
        }
        *c = log2sum - fast_log2(histogram[i] as usize) as f32;
        if *c < 1.0 {
            *c = 1.0;
        }
    }
}

#[derive(Clone, Copy, Default)]
struct PosData {
    pos: usize,
    distance_cache: [i32; 4],
    costdiff: f32,
    cost: f32,
}

/// The 8 cheapest recent command start positions, ordered by cost
/// difference against coding everything as literals.
struct StartPosQueue {
    q: [PosData; 8],
    idx: usize,
}

impl StartPosQueue {
    fn new() -> Self {
        StartPosQueue {
            q: [PosData::default(); 8],
            idx: 0,
        }
    }

    fn len(&self) -> usize {
        self.idx.min(8)
    }

    fn push(&mut self, posdata: PosData) {
        let mut offset = (!self.idx) & 7;
        self.idx += 1;
        let len = self.len();
        self.q[offset] = posdata;
        // Restore order: at most len-1 adjacent swaps.
        for _ in 1..len {
            if self.q[offset & 7].costdiff > self.q[(offset + 1) & 7].costdiff {
                self.q.swap(offset & 7, (offset + 1) & 7);
            }
            offset += 1;
        }
    }

    fn at(&self, k: usize) -> &PosData {
        &self.q[(k.wrapping_sub(self.idx)) & 7]
    }
}

/// Minimum copy length that could still improve any future position.
fn compute_minimum_copy_length(
    start_cost: f32,
    nodes: &[ZopfliNode],
    num_bytes: usize,
    pos: usize,
) -> usize {
    let mut min_cost = start_cost;
    let mut len = 2usize;
    let mut next_len_bucket = 4usize;
    let mut next_len_offset = 10usize;
    while pos + len <= num_bytes && nodes[pos + len].cost <= min_cost {
        // Already reached with no more than the lower bound: nothing
        // shorter than len can help.
        len += 1;
        if len == next_len_offset {
            // Next copy-length code bucket costs one more extra bit.
            min_cost += 1.0;
            next_len_offset += next_len_bucket;
            next_len_bucket *= 2;
        }
    }
    len
}

/// Index of the last command that updated the distance cache on the
/// shortest path to `pos` (0 if none).
fn compute_distance_shortcut(
    block_start: usize,
    pos: usize,
    max_backward_limit: usize,
    gap: usize,
    nodes: &[ZopfliNode],
) -> u32 {
    let clen = nodes[pos].copy_length();
    let ilen = nodes[pos].insert_length();
    let dist = nodes[pos].copy_distance();
    // Distances into the static dictionary and short-code 0 do not update
    // the cache, so the shortcut skips over them.
    if pos == 0 {
        0
    } else if dist + clen <= block_start + pos + gap
        && dist <= max_backward_limit + gap
        && nodes[pos].distance_code() > 0
    {
        pos as u32
    } else {
        nodes[pos - clen - ilen].shortcut
    }
}

/// The four distances the cache would hold at `block_start + pos` if the
/// shortest path were taken.
fn compute_distance_cache(
    pos: usize,
    starting_dist_cache: &[i32],
    nodes: &[ZopfliNode],
    dist_cache: &mut [i32; 4],
) {
    let mut idx = 0;
    let mut p = nodes[pos].shortcut as usize;
    while idx < 4 && p > 0 {
        let ilen = nodes[p].insert_length();
        let clen = nodes[p].copy_length();
        let dist = nodes[p].copy_distance();
        dist_cache[idx] = dist as i32;
        idx += 1;
        // By the array invariant, p >= clen + ilen >= 2.
        p = nodes[p - clen - ilen].shortcut as usize;
    }
    let mut fill = 0;
    while idx < 4 {
        dist_cache[idx] = starting_dist_cache[fill];
        fill += 1;
        idx += 1;
    }
}

#[allow(clippy::too_many_arguments)]
fn evaluate_node(
    block_start: usize,
    pos: usize,
    max_backward_limit: usize,
    gap: usize,
    starting_dist_cache: &[i32],
    model: &ZopfliCostModel,
    queue: &mut StartPosQueue,
    nodes: &mut [ZopfliNode],
) {
    // Save the cost: computing the shortcut repurposes the scratch space.
    let node_cost = nodes[pos].cost;
    nodes[pos].shortcut =
        compute_distance_shortcut(block_start, pos, max_backward_limit, gap, nodes);
    if node_cost <= model.literal_costs(0, pos) {
        let mut posdata = PosData {
            pos,
            distance_cache: [0; 4],
            costdiff: node_cost - model.literal_costs(0, pos),
            cost: node_cost,
        };
        compute_distance_cache(pos, starting_dist_cache, nodes, &mut posdata.distance_cache);
        queue.push(posdata);
    }
}

#[inline]
#[allow(clippy::too_many_arguments)]
fn update_zopfli_node(
    nodes: &mut [ZopfliNode],
    pos: usize,
    start_pos: usize,
    len: usize,
    len_code: usize,
    dist: usize,
    short_code: usize,
    cost: f32,
) {
    let next = &mut nodes[pos + len];
    next.length = (len | (len + 9 - len_code) << 25) as u32;
    next.distance = dist as u32;
    next.dcode_insert_length = ((short_code << 27) | (pos - start_pos)) as u32;
    next.cost = cost;
}

/// Relaxes all edges leaving the cheapest start positions through `pos`.
/// Returns the longest copy length applied (for the skip heuristic).
#[allow(clippy::too_many_arguments)]
fn update_nodes(
    num_bytes: usize,
    block_start: usize,
    pos: usize,
    ringbuffer: &[u8],
    ringbuffer_mask: usize,
    params: &EncoderParams,
    max_backward_limit: usize,
    starting_dist_cache: &[i32],
    num_matches: usize,
    matches: &[BackwardMatch],
    model: &ZopfliCostModel,
    queue: &mut StartPosQueue,
    nodes: &mut [ZopfliNode],
) -> usize {
    let cur_ix = block_start + pos;
    let cur_ix_masked = cur_ix & ringbuffer_mask;
    let max_distance = cur_ix.min(max_backward_limit);
    let max_len = num_bytes - pos;
    let max_zopfli_len = max_zopfli_len(params);
    let max_iters = max_zopfli_candidates(params);
    let gap = 0usize;
    let mut result = 0usize;

    evaluate_node(
        block_start,
        pos,
        max_backward_limit,
        gap,
        starting_dist_cache,
        model,
        queue,
        nodes,
    );

    let min_len = {
        let posdata = queue.at(0);
        let min_cost = posdata.cost + model.min_cost_cmd + model.literal_costs(posdata.pos, pos);
        compute_minimum_copy_length(min_cost, nodes, num_bytes, pos)
    };

    // Walk the start candidates in order of increasing cost difference.
    let queue_len = queue.len();
    for k in 0..max_iters.min(queue_len) {
        let posdata = *queue.at(k);
        let start = posdata.pos;
        let inscode = get_insert_length_code(pos - start);
        let start_costdiff = posdata.costdiff;
        let base_cost =
            start_costdiff + get_insert_extra(inscode) as f32 + model.literal_costs(0, pos);
        let mut best_len = min_len - 1;

        // Distance-cache candidates first: their codes are cheapest.
        let mut j = 0;
        while j < crate::constants::NUM_DISTANCE_SHORT_CODES && best_len < max_len {
            let idx = DISTANCE_CACHE_INDEX[j];
            let backward = (posdata.distance_cache[idx] + DISTANCE_CACHE_OFFSET[j]) as usize;
            let prev_ix = cur_ix.wrapping_sub(backward);
            if cur_ix_masked + best_len > ringbuffer_mask {
                break;
            }
            if backward > max_distance + gap {
                // Word dictionary reference: ignore here.
                j += 1;
                continue;
            }
            if backward > max_distance || prev_ix >= cur_ix {
                j += 1;
                continue;
            }
            let prev_ix = prev_ix & ringbuffer_mask;
            if prev_ix + best_len > ringbuffer_mask
                || cur_ix_masked + best_len >= ringbuffer.len()
                || prev_ix + best_len >= ringbuffer.len()
                || ringbuffer[cur_ix_masked + best_len] != ringbuffer[prev_ix + best_len]
            {
                j += 1;
                continue;
            }
            let len = find_match_length(
                &ringbuffer[prev_ix..],
                &ringbuffer[cur_ix_masked..],
                max_len,
            );
            {
                let dist_cost = base_cost + model.distance_cost(j);
                for l in (best_len + 1)..=len {
                    let copycode = get_copy_length_code(l);
                    let cmdcode = combine_length_codes(inscode, copycode, j == 0);
                    let base = if cmdcode < 128 { base_cost } else { dist_cost };
                    let cost = base
                        + get_copy_extra(copycode) as f32
                        + model.command_cost(cmdcode);
                    if cost < nodes[pos + l].cost {
                        update_zopfli_node(nodes, pos, start, l, l, backward, j + 1, cost);
                        result = result.max(l);
                    }
                    best_len = l;
                }
            }
            j += 1;
        }

        // Beyond the first couple of iterations only fresh cache hits help.
        if k >= 2 {
            continue;
        }

        // All matches from the tree, lengths increasing.
        let mut len = min_len;
        for m in matches.iter().take(num_matches) {
            let dist = m.distance as usize;
            let is_dictionary_match = dist > max_distance + gap;
            // The cache candidates above covered the short codes.
            let dist_code = dist + crate::constants::NUM_DISTANCE_SHORT_CODES - 1;
            let (dist_symbol, _) = prefix_encode_copy_distance(
                dist_code,
                params.dist.num_direct_distance_codes as usize,
                params.dist.distance_postfix_bits,
            );
            let distnumextra = u32::from(dist_symbol >> 10);
            let dist_cost = base_cost
                + distnumextra as f32
                + model.distance_cost((dist_symbol & 0x3FF) as usize);
            let max_match_len = m.length();
            if len < max_match_len && (is_dictionary_match || max_match_len > max_zopfli_len) {
                len = max_match_len;
            }
            while len <= max_match_len {
                let len_code = if is_dictionary_match {
                    m.length_code()
                } else {
                    len
                };
                let copycode = get_copy_length_code(len_code);
                let cmdcode = combine_length_codes(inscode, copycode, false);
                let cost =
                    dist_cost + get_copy_extra(copycode) as f32 + model.command_cost(cmdcode);
                if cost < nodes[pos + len].cost {
                    update_zopfli_node(nodes, pos, start, len, len_code, dist, 0, cost);
                    result = result.max(len);
                }
                len += 1;
            }
        }
    }
    result
}

/// Walks back from the terminal node and reverses the path by writing the
/// `next` links. Returns the number of commands on the path.
fn compute_shortest_path_from_nodes(num_bytes: usize, nodes: &mut [ZopfliNode]) -> usize {
    let mut index = num_bytes;
    // Skip trailing cost-free literal nodes.
    while nodes[index].insert_length() == 0 && nodes[index].length == 1 {
        index -= 1;
    }
    nodes[index].next = u32::MAX;
    let mut num_commands = 0;
    while index != 0 {
        let len = nodes[index].command_length();
        index -= len;
        nodes[index].next = len as u32;
        num_commands += 1;
    }
    num_commands
}

/// Turns the traced path into commands, replaying the distance-cache
/// updates exactly as the greedy emitter would.
#[allow(clippy::too_many_arguments)]
pub fn zopfli_create_commands(
    num_bytes: usize,
    block_start: usize,
    nodes: &[ZopfliNode],
    dist_cache: &mut [i32; 16],
    last_insert_len: &mut usize,
    params: &EncoderParams,
    commands: &mut Vec<Command>,
    num_literals: &mut usize,
) {
    let max_backward = max_backward_limit(params.lgwin);
    let mut pos = 0usize;
    let mut offset = nodes[0].next;
    let gap = 0usize;
    let mut first = true;
    while offset != u32::MAX {
        let next = &nodes[pos + offset as usize];
        let copy_length = next.copy_length();
        let mut insert_length = next.insert_length();
        pos += insert_length;
        offset = next.next;
        if first {
            insert_length += *last_insert_len;
            *last_insert_len = 0;
            first = false;
        }
        let distance = next.copy_distance();
        let len_code = next.length_code();
        let max_distance = (block_start + pos).min(max_backward);
        let is_dictionary = distance > max_distance + gap;
        let dist_code = next.distance_code();
        commands.push(Command::new(
            &params.dist,
            insert_length,
            copy_length,
            len_code as i32 - copy_length as i32,
            dist_code,
        ));
        if !is_dictionary && dist_code > 0 {
            dist_cache[3] = dist_cache[2];
            dist_cache[2] = dist_cache[1];
            dist_cache[1] = dist_cache[0];
            dist_cache[0] = distance as i32;
        }
        *num_literals += insert_length;
        pos += copy_length;
    }
    *last_insert_len += num_bytes - pos;
}

/// Single-pass zopflification with the literal-estimate cost model.
#[allow(clippy::too_many_arguments)]
pub fn zopfli_compute_shortest_path(
    num_bytes: usize,
    position: usize,
    ringbuffer: &[u8],
    ringbuffer_mask: usize,
    params: &EncoderParams,
    dist_cache: &[i32; 16],
    hasher: &mut H10,
    nodes: &mut [ZopfliNode],
) -> usize {
    let max_backward = max_backward_limit(params.lgwin);
    let max_zopfli = max_zopfli_len(params);
    let mut model = ZopfliCostModel::new(params, num_bytes);
    let mut queue = StartPosQueue::new();
    let mut matches: Vec<BackwardMatch> = Vec::with_capacity(2 * (MAX_NUM_MATCHES_H10 + 64));
    let store_end = if num_bytes >= hasher.store_lookahead() {
        position + num_bytes - hasher.store_lookahead() + 1
    } else {
        position
    };
    let gap = 0usize;
    nodes[0].length = 0;
    nodes[0].cost = 0.0;
    model.set_from_literal_costs(position, ringbuffer, ringbuffer_mask);
    let hash_type_length = hasher.hash_type_length();
    let mut i = 0usize;
    while i + hash_type_length - 1 < num_bytes {
        let pos = position + i;
        let max_distance = pos.min(max_backward);
        matches.clear();
        let mut num_matches = hasher.find_all_matches(
            ringbuffer,
            ringbuffer_mask,
            pos,
            num_bytes - i,
            max_distance,
            gap,
            params,
            &mut matches,
        );
        if num_matches > 0 && matches[num_matches - 1].length() > max_zopfli {
            matches[0] = matches[num_matches - 1];
            num_matches = 1;
        }
        let mut skip = update_nodes(
            num_bytes,
            position,
            i,
            ringbuffer,
            ringbuffer_mask,
            params,
            max_backward,
            &dist_cache[..4],
            num_matches,
            &matches,
            &model,
            &mut queue,
            nodes,
        );
        if skip < LONG_COPY_QUICK_STEP {
            skip = 0;
        }
        if num_matches == 1 && matches[0].length() > max_zopfli {
            skip = skip.max(matches[0].length());
        }
        if skip > 1 {
            // Feed the copied span to the hasher, then race past it,
            // evaluating nodes so the queue stays accurate.
            hasher.store_range_tree(
                ringbuffer,
                ringbuffer_mask,
                pos + 1,
                (pos + skip).min(store_end),
            );
            skip -= 1;
            while skip != 0 {
                i += 1;
                if i + hash_type_length - 1 >= num_bytes {
                    break;
                }
                evaluate_node(
                    position,
                    i,
                    max_backward,
                    gap,
                    &dist_cache[..4],
                    &model,
                    &mut queue,
                    nodes,
                );
                skip -= 1;
            }
        }
        i += 1;
    }
    compute_shortest_path_from_nodes(num_bytes, nodes)
}

fn zopfli_iterate(
    num_bytes: usize,
    position: usize,
    ringbuffer: &[u8],
    ringbuffer_mask: usize,
    params: &EncoderParams,
    gap: usize,
    dist_cache: &[i32; 16],
    model: &ZopfliCostModel,
    num_matches: &[u32],
    matches: &[BackwardMatch],
    nodes: &mut [ZopfliNode],
) -> usize {
    let max_backward = max_backward_limit(params.lgwin);
    let max_zopfli = max_zopfli_len(params);
    let mut queue = StartPosQueue::new();
    let mut cur_match_pos = 0usize;
    nodes[0].length = 0;
    nodes[0].cost = 0.0;
    let mut i = 0usize;
    while i + 3 < num_bytes {
        let mut skip = update_nodes(
            num_bytes,
            position,
            i,
            ringbuffer,
            ringbuffer_mask,
            params,
            max_backward,
            &dist_cache[..4],
            num_matches[i] as usize,
            &matches[cur_match_pos..],
            model,
            &mut queue,
            nodes,
        );
        if skip < LONG_COPY_QUICK_STEP {
            skip = 0;
        }
        cur_match_pos += num_matches[i] as usize;
        if num_matches[i] == 1 && matches[cur_match_pos - 1].length() > max_zopfli {
            skip = skip.max(matches[cur_match_pos - 1].length());
        }
        if skip > 1 {
            skip -= 1;
            while skip != 0 {
                i += 1;
                if i + 3 >= num_bytes {
                    break;
                }
                evaluate_node(
                    position,
                    i,
                    max_backward,
                    gap,
                    &dist_cache[..4],
                    model,
                    &mut queue,
                    nodes,
                );
                cur_match_pos += num_matches[i] as usize;
                skip -= 1;
            }
        }
        i += 1;
    }
    compute_shortest_path_from_nodes(num_bytes, nodes)
}

/// Quality 10: one planner pass over matches found on the fly.
#[allow(clippy::too_many_arguments)]
pub fn create_zopfli_backward_references(
    num_bytes: usize,
    position: usize,
    ringbuffer: &[u8],
    ringbuffer_mask: usize,
    params: &EncoderParams,
    hasher: &mut H10,
    dist_cache: &mut [i32; 16],
    last_insert_len: &mut usize,
    commands: &mut Vec<Command>,
    num_literals: &mut usize,
) {
    let mut nodes = Vec::new();
    init_zopfli_nodes(&mut nodes, num_bytes + 1);
    zopfli_compute_shortest_path(
        num_bytes,
        position,
        ringbuffer,
        ringbuffer_mask,
        params,
        dist_cache,
        hasher,
        &mut nodes,
    );
    zopfli_create_commands(
        num_bytes,
        position,
        &nodes,
        dist_cache,
        last_insert_len,
        params,
        commands,
        num_literals,
    );
}

/// Quality 11: collect all matches up front, then plan twice — first with
/// estimated literal costs, then with a model refit to the first pass.
#[allow(clippy::too_many_arguments)]
pub fn create_hq_zopfli_backward_references(
    num_bytes: usize,
    position: usize,
    ringbuffer: &[u8],
    ringbuffer_mask: usize,
    params: &EncoderParams,
    hasher: &mut H10,
    dist_cache: &mut [i32; 16],
    last_insert_len: &mut usize,
    commands: &mut Vec<Command>,
    num_literals: &mut usize,
) {
    let max_backward = max_backward_limit(params.lgwin);
    let mut num_matches = vec![0u32; num_bytes];
    let mut matches: Vec<BackwardMatch> = Vec::with_capacity(4 * num_bytes + 1);
    let store_end = if num_bytes >= hasher.store_lookahead() {
        position + num_bytes - hasher.store_lookahead() + 1
    } else {
        position
    };
    let gap = 0usize;
    let hash_type_length = hasher.hash_type_length();

    let mut i = 0usize;
    while i + hash_type_length - 1 < num_bytes {
        let pos = position + i;
        let max_distance = pos.min(max_backward);
        let max_length = num_bytes - i;
        let cur_match_pos = matches.len();
        let num_found = hasher.find_all_matches(
            ringbuffer,
            ringbuffer_mask,
            pos,
            max_length,
            max_distance,
            gap,
            params,
            &mut matches,
        );
        num_matches[i] = num_found as u32;
        if num_found > 0 {
            let match_len = matches.last().unwrap().length();
            if match_len > crate::quality::MAX_ZOPFLI_LEN_QUALITY_11 {
                // One overwhelming match: keep only it and skip its span.
                let skip = match_len - 1;
                let last = *matches.last().unwrap();
                matches.truncate(cur_match_pos);
                matches.push(last);
                num_matches[i] = 1;
                hasher.store_range_tree(
                    ringbuffer,
                    ringbuffer_mask,
                    pos + 1,
                    (pos + match_len).min(store_end),
                );
                for nm in num_matches.iter_mut().skip(i + 1).take(skip) {
                    *nm = 0;
                }
                i += skip;
            }
        }
        i += 1;
    }

    let orig_num_literals = *num_literals;
    let orig_last_insert_len = *last_insert_len;
    let orig_dist_cache: [i32; 4] = dist_cache[..4].try_into().unwrap();
    let orig_num_commands = commands.len();
    let mut nodes = Vec::new();
    let mut model = ZopfliCostModel::new(params, num_bytes);
    for pass in 0..2 {
        init_zopfli_nodes(&mut nodes, num_bytes + 1);
        if pass == 0 {
            model.set_from_literal_costs(position, ringbuffer, ringbuffer_mask);
        } else {
            model.set_from_commands(
                position,
                ringbuffer,
                ringbuffer_mask,
                &commands[orig_num_commands..],
                orig_last_insert_len,
            );
        }
        commands.truncate(orig_num_commands);
        *num_literals = orig_num_literals;
        *last_insert_len = orig_last_insert_len;
        dist_cache[..4].copy_from_slice(&orig_dist_cache);
        zopfli_iterate(
            num_bytes,
            position,
            ringbuffer,
            ringbuffer_mask,
            params,
            gap,
            dist_cache,
            &model,
            &num_matches,
            &matches,
            &mut nodes,
        );
        zopfli_create_commands(
            num_bytes,
            position,
            &nodes,
            dist_cache,
            last_insert_len,
            params,
            commands,
            num_literals,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{Hasher, H10};
    use crate::params::EncoderParams;

    fn plan(data: &[u8], quality: i32) -> (Vec<Command>, usize, usize) {
        let params = EncoderParams::new(quality, 16).with_size_hint(data.len());
        let mut hasher = H10::new(16);
        hasher.prepare(true, data.len(), data);
        let mut dist_cache = [16i32, 15, 11, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut last_insert_len = 0usize;
        let mut commands = Vec::new();
        let mut num_literals = 0usize;
        let mask = usize::MAX >> 1;
        if quality >= 11 {
            create_hq_zopfli_backward_references(
                data.len(),
                0,
                data,
                mask,
                &params,
                &mut hasher,
                &mut dist_cache,
                &mut last_insert_len,
                &mut commands,
                &mut num_literals,
            );
        } else {
            create_zopfli_backward_references(
                data.len(),
                0,
                data,
                mask,
                &params,
                &mut hasher,
                &mut dist_cache,
                &mut last_insert_len,
                &mut commands,
                &mut num_literals,
            );
        }
        (commands, last_insert_len, num_literals)
    }

    fn check_coverage(data: &[u8], commands: &[Command], last_insert: usize) {
        let covered: usize = commands
            .iter()
            .map(|c| c.insert_len as usize + c.copy_len() as usize)
            .sum::<usize>()
            + last_insert;
        assert_eq!(covered, data.len());
    }

    #[test]
    fn zopfli_covers_the_input() {
        let data = b"the optimal parser finds the optimal parse of the optimal input. \
                     the optimal parser finds it twice."
            .to_vec();
        for q in [10, 11] {
            let (commands, last_insert, _) = plan(&data, q);
            check_coverage(&data, &commands, last_insert);
            assert!(!commands.is_empty(), "quality {}", q);
            assert!(
                commands.iter().any(|c| c.copy_len() >= 4),
                "quality {} found no copies",
                q
            );
        }
    }

    #[test]
    fn zopfli_handles_short_input() {
        let data = b"tiny".to_vec();
        let (commands, last_insert, _) = plan(&data, 10);
        check_coverage(&data, &commands, last_insert);
    }

    #[test]
    fn long_runs_are_taken_whole() {
        let mut data = b"prefix ".to_vec();
        data.extend(std::iter::repeat(b'x').take(400));
        data.extend_from_slice(b" suffix");
        let (commands, last_insert, _) = plan(&data, 10);
        check_coverage(&data, &commands, last_insert);
        assert!(commands.iter().any(|c| c.copy_len() > 100));
    }
}
