//! Codebook bit-block schema selection: spec.md §4.3.
//!
//! Given a histogram `d[k]` (count of column values needing exactly `k`
//! bits, `k` ranging `0..=max_bits`), choose the bit-block schema --
//! an ascending sequence of block widths summing to `max_bits` -- that
//! minimizes the number of bits a column actually costs to store, among
//! two competing ways of marking where a value's encoding ends:
//!
//! - formula 1 (continuation-bit scheme, spec.md §4.2's codec): every
//!   block but the schema's last is followed by a continue/stop flag.
//! - formula 2 (size-prefix scheme): a `⌈log₂ k⌉`-bit header names how
//!   many of the `k` blocks the value occupies, up front.
//!
//! All orderings of up to `max_blocks` (default 5) blocks summing to
//! `max_bits` are tried; the cheapest wins, with ties within `EPSILON_BITS`
//! broken in favor of fewer blocks (fewer blocks decode faster).

/// Tie-break window: schemes within this many bits of the cheapest are
/// considered equivalent, and the one with fewer blocks is preferred.
pub const EPSILON_BITS: u64 = 80 * 1024 * 1024;

pub const DEFAULT_MAX_BLOCKS: u32 = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodingScheme {
    pub block_sizes: Vec<u32>,
    pub formula_id: u8,
    pub cost: u64,
}

/// Cost of the continuation-bit scheme (formula 1): every block but the
/// schema's last costs one extra flag bit for every value that reaches it.
fn formula1_cost(blocks: &[u32], d: &[u64]) -> u64 {
    let mut ret: u64 = 0;
    let mut numbits: u32 = 0;
    let mut k: usize = 2;
    for (i, &b) in blocks.iter().enumerate() {
        numbits += b;
        let extrabits = if i + 1 == blocks.len() { i as u32 } else { (i + 1) as u32 };
        while k <= numbits as usize {
            if let Some(&count) = d.get(k) {
                ret += count * (numbits + extrabits) as u64;
            }
            k += 1;
        }
    }
    ret
}

/// Cost of the size-prefix scheme (formula 2): a fixed `⌈log₂ k⌉`-bit
/// header up front names how many of the schema's `k` blocks are used.
fn formula2_cost(blocks: &[u32], d: &[u64]) -> u64 {
    let mut ret: u64 = 0;
    let extrabits: u32 = if blocks.len() == 1 {
        0
    } else {
        (blocks.len() as f64).log2().ceil() as u32
    };
    let mut numbits: u32 = 0;
    let mut k: usize = 2;
    for &b in blocks {
        numbits += b;
        while k <= numbits as usize {
            if let Some(&count) = d.get(k) {
                ret += count * (numbits + extrabits) as u64;
            }
            k += 1;
        }
    }
    ret
}

fn enumerate_rec(
    d: &[u64],
    bins: &mut Vec<u32>,
    pos: usize,
    num_tokens: u32,
    schemes: &mut Vec<EncodingScheme>,
) {
    if pos + 1 == bins.len() {
        bins[pos] = num_tokens;
        schemes.push(EncodingScheme {
            block_sizes: bins.clone(),
            formula_id: 1,
            cost: formula1_cost(bins, d),
        });
        schemes.push(EncodingScheme {
            block_sizes: bins.clone(),
            formula_id: 2,
            cost: formula2_cost(bins, d),
        });
        return;
    }
    let limit = num_tokens + 1 - bins.len() as u32 + pos as u32;
    for t in 1..=limit {
        bins[pos] = t;
        enumerate_rec(d, bins, pos + 1, num_tokens - t, schemes);
    }
}

/// Every way to partition `d.len() - 1` bits into `1..=max_blocks` ordered,
/// positive-width blocks, scored under both cost formulas.
pub fn enumerate_schemes(d: &[u64], max_blocks: u32) -> Vec<EncodingScheme> {
    let mut schemes = Vec::new();
    let max_blocks = max_blocks.min(d.len() as u32);
    let num_tokens = d.len() as u32 - 1;
    let mut bins: Vec<u32> = Vec::new();
    while (bins.len() as u32) < max_blocks {
        bins.push(0);
        enumerate_rec(d, &mut bins, 0, num_tokens, &mut schemes);
    }
    schemes
}

/// Picks the cheapest scheme for `d`, breaking near-ties in favor of fewer
/// blocks. `d[k]` is the count of values needing exactly `k` bits; `d.len()
/// - 1` is the column's maximum bit width.
pub fn best_scheme(d: &[u64], max_blocks: u32) -> EncodingScheme {
    let mut schemes = enumerate_schemes(d, max_blocks);
    schemes.sort_by(|a, b| {
        a.cost
            .cmp(&b.cost)
            .then_with(|| a.block_sizes.len().cmp(&b.block_sizes.len()))
    });
    let mut best = 0;
    for i in 1..schemes.len() {
        if schemes[i].cost.saturating_sub(schemes[0].cost) >= EPSILON_BITS {
            break;
        }
        if schemes[i].block_sizes.len() < schemes[best].block_sizes.len() {
            best = i;
        }
    }
    schemes.remove(best)
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn single_block_schema_has_no_formula2_header() {
        let d = vec![0u64; 9]; // max_bits = 8
        let schemes = enumerate_schemes(&d, 1);
        assert_eq!(schemes.len(), 2); // one partition, two formulas
        assert!(schemes.iter().all(|s| s.block_sizes == vec![8]));
    }

    #[test]
    fn enumerate_schemes_covers_every_ordered_partition() {
        // max_bits = 3 into up to 2 blocks: [3], [1,2], [2,1].
        let d = vec![0u64; 4];
        let schemes = enumerate_schemes(&d, 2);
        let mut partitions: Vec<Vec<u32>> =
            schemes.iter().map(|s| s.block_sizes.clone()).collect();
        partitions.sort();
        partitions.dedup();
        assert!(partitions.contains(&vec![3]));
        assert!(partitions.contains(&vec![1, 2]));
        assert!(partitions.contains(&vec![2, 1]));
    }

    #[test]
    fn best_scheme_prefers_fewer_blocks_within_epsilon() {
        // All values need exactly 8 bits: a single 8-bit block is free of
        // continuation overhead and should always win outright.
        let mut d = vec![0u64; 9];
        d[8] = 1_000_000;
        let chosen = best_scheme(&d, 4);
        assert_eq!(chosen.block_sizes, vec![8]);
    }

    #[test]
    fn best_scheme_picks_multi_block_when_distribution_is_skewed() {
        // Almost all values need only 2 bits, a few need up to 16: a
        // multi-block schema should beat a single wide fixed-width block.
        let mut d = vec![0u64; 17];
        d[2] = 1_000_000;
        d[16] = 10;
        let wide = EncodingScheme {
            block_sizes: vec![16],
            formula_id: 1,
            cost: formula1_cost(&[16], &d),
        };
        let chosen = best_scheme(&d, 5);
        assert!(chosen.cost <= wide.cost);
        assert!(chosen.block_sizes.len() >= 2);
    }

    #[test]
    fn cost_is_zero_for_empty_histogram() {
        let d = vec![0u64; 5];
        let chosen = best_scheme(&d, 3);
        assert_eq!(chosen.cost, 0);
    }
}
