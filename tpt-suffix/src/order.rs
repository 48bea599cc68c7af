//! Token orderings over corpus positions: spec.md §4.7, §9 ("re-implement as
//! a trait with two comparison orderings"), replacing the teacher-era
//! template-over-token-type design with a small trait so the same array
//! core in `sarray.rs` serves both a left-to-right suffix array (spec.md
//! §3.9's TPSA) and a right-to-left "prefix array" reading of the same
//! corpus, without duplicating the comparison/search logic.
//!
//! `token_at` returns the token `depth` steps into the suffix/prefix
//! starting at `(sid, start_offset)`, or `None` once the traversal runs off
//! the sentence's boundary. `None` always sorts before any real token id,
//! which is spec.md §3.9's "a shorter suffix precedes a longer one sharing
//! the same prefix" rule.

use crate::ctrack::CorpusTrack;

pub trait TokenOrder: Clone {
    fn token_at(&self, corpus: &CorpusTrack, sid: u32, start_offset: u32, depth: u32) -> Option<u32>;
}

/// Ordinary suffix array order: `depth` counts forward from `start_offset`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LeftToRight;

impl TokenOrder for LeftToRight {
    fn token_at(&self, corpus: &CorpusTrack, sid: u32, start_offset: u32, depth: u32) -> Option<u32> {
        let (_, end) = corpus.sentence_bounds(sid);
        let pos = start_offset + depth;
        if pos < end {
            Some(corpus.token_at(pos))
        } else {
            None
        }
    }
}

/// Prefix-array order: `depth` counts backward from `start_offset`, stopping
/// at the sentence's start. Gives the same array core a second, symmetric
/// traversal direction without a second copy of the search code.
#[derive(Clone, Copy, Debug, Default)]
pub struct RightToLeft;

impl TokenOrder for RightToLeft {
    fn token_at(&self, corpus: &CorpusTrack, sid: u32, start_offset: u32, depth: u32) -> Option<u32> {
        let (start, _) = corpus.sentence_bounds(sid);
        if depth > start_offset - start {
            None
        } else {
            Some(corpus.token_at(start_offset - depth))
        }
    }
}

/// Compares the token at `depth` of the suffix/prefix rooted at
/// `(sid, start_offset)` against `target`. `None` (sentence ran out) sorts
/// as `Less`.
pub fn cmp_one<O: TokenOrder>(
    order: &O,
    corpus: &CorpusTrack,
    sid: u32,
    start_offset: u32,
    depth: u32,
    target: u32,
) -> std::cmp::Ordering {
    match order.token_at(corpus, sid, start_offset, depth) {
        None => std::cmp::Ordering::Less,
        Some(t) => t.cmp(&target),
    }
}

/// Compares the suffix/prefix rooted at `(sid, start_offset)` against `key`
/// token-by-token. Reaching the end of `key` without a mismatch returns
/// `Equal` -- spec.md §4.7's "key-is-prefix-of-suffix" case, which is
/// exactly the membership test `lower_bound`/`upper_bound` need.
pub fn cmp_prefix<O: TokenOrder>(
    order: &O,
    corpus: &CorpusTrack,
    sid: u32,
    start_offset: u32,
    key: &[u32],
) -> std::cmp::Ordering {
    for (depth, &k) in key.iter().enumerate() {
        match order.token_at(corpus, sid, start_offset, depth as u32) {
            None => return std::cmp::Ordering::Less,
            Some(t) => match t.cmp(&k) {
                std::cmp::Ordering::Equal => continue,
                other => return other,
            },
        }
    }
    std::cmp::Ordering::Equal
}

/// Total order between two corpus positions' full suffixes/prefixes, used
/// only at build time to sort every position into the array.
pub fn compare_full<O: TokenOrder>(
    order: &O,
    corpus: &CorpusTrack,
    a: (u32, u32),
    b: (u32, u32),
) -> std::cmp::Ordering {
    let mut depth = 0u32;
    loop {
        let ta = order.token_at(corpus, a.0, a.1, depth);
        let tb = order.token_at(corpus, b.0, b.1, depth);
        match (ta, tb) {
            (None, None) => return std::cmp::Ordering::Equal,
            (None, Some(_)) => return std::cmp::Ordering::Less,
            (Some(_), None) => return std::cmp::Ordering::Greater,
            (Some(x), Some(y)) => match x.cmp(&y) {
                std::cmp::Ordering::Equal => depth += 1,
                other => return other,
            },
        }
    }
}
