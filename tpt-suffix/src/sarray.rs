//! Suffix / token-sequence array core: spec.md §3.9, §4.7. A sorted list of
//! corpus positions `(sid, offset)` packed as TIP pairs (reusing
//! `tpt_codec::tip`'s role-tagged bytes rather than inventing a second
//! "walk back to the last stop-bit" scheme, since TIP already is exactly
//! that, with the role bit removing the first/second-half ambiguity a bare
//! TUI pair would have -- see DESIGN.md), grouped by the first token of
//! each entry's suffix/prefix for O(1) top-level restriction.
//!
//! Generic over [`TokenOrder`] so the same core serves both a left-to-right
//! suffix array and a right-to-left prefix array (spec.md §9's redesign of
//! the teacher's templated-on-token-type reader).

use std::cmp::Ordering;
use std::sync::OnceLock;

use tpt_base::{err, ioutil::MmapReader, Result};
use tpt_codec::{entry_bounds_containing, read_tip, write_tip};

use crate::ctrack::CorpusTrack;
use crate::order::{cmp_one, cmp_prefix, compare_full, TokenOrder};

const HEADER_WIDTH: usize = 8 + 4; // index_start: u64, num_top_ids: u32

pub struct SuffixArrayBuilder;

impl SuffixArrayBuilder {
    /// Builds the array over every token position in `corpus`. `vocab_size`
    /// bounds the top-level group index (token ids must be `< vocab_size`).
    pub fn build<O: TokenOrder>(corpus: &CorpusTrack, order: &O, vocab_size: u32) -> Vec<u8> {
        let mut positions = Vec::new();
        for sid in 0..corpus.num_sentences() {
            let (start, end) = corpus.sentence_bounds(sid);
            for off in start..end {
                positions.push((sid, off));
            }
        }
        positions.sort_by(|&a, &b| compare_full(order, corpus, a, b));

        let mut entries = Vec::new();
        let mut group_offsets = vec![0u64; vocab_size as usize + 1];
        let mut next_tok = 0u32;
        for &(sid, off) in &positions {
            let tok = order
                .token_at(corpus, sid, off, 0)
                .expect("every enumerated position has a token at depth 0");
            let capped = tok.min(vocab_size.saturating_sub(1));
            while next_tok <= capped && (next_tok as usize) < group_offsets.len() {
                group_offsets[next_tok as usize] = entries.len() as u64;
                next_tok += 1;
            }
            write_tip(&mut entries, sid as u64, off as u64);
        }
        while (next_tok as usize) < group_offsets.len() {
            group_offsets[next_tok as usize] = entries.len() as u64;
            next_tok += 1;
        }

        let mut out = Vec::with_capacity(HEADER_WIDTH + entries.len() + group_offsets.len() * 8);
        out.extend_from_slice(&0u64.to_le_bytes()); // index_start placeholder
        out.extend_from_slice(&vocab_size.to_le_bytes());
        debug_assert_eq!(out.len(), HEADER_WIDTH);
        out.extend_from_slice(&entries);
        let index_start = out.len() as u64;
        for g in &group_offsets {
            out.extend_from_slice(&g.to_le_bytes());
        }
        out[0..8].copy_from_slice(&index_start.to_le_bytes());
        out
    }
}

/// A memory-mapped, built suffix/prefix array.
#[derive(Clone)]
pub struct SuffixArrayReader<O: TokenOrder> {
    bytes: MmapReader,
    corpus: CorpusTrack,
    num_top_ids: u32,
    entries_start: usize,
    index_start: usize,
    order: O,
    total_entries: std::sync::Arc<OnceLock<u64>>,
}

impl<O: TokenOrder> SuffixArrayReader<O> {
    pub fn parse(bytes: MmapReader, corpus: CorpusTrack, order: O) -> Result<Self> {
        let slice = bytes.as_slice();
        if slice.len() < HEADER_WIDTH {
            return Err(err("suffix array: truncated header"));
        }
        let index_start = u64::from_le_bytes(slice[0..8].try_into().unwrap()) as usize;
        let num_top_ids = u32::from_le_bytes(slice[8..12].try_into().unwrap());
        let needed = index_start + (num_top_ids as usize + 1) * 8;
        if slice.len() < needed {
            return Err(err("suffix array: buffer shorter than declared group index"));
        }
        Ok(SuffixArrayReader {
            bytes,
            corpus,
            num_top_ids,
            entries_start: HEADER_WIDTH,
            index_start,
            order,
            total_entries: std::sync::Arc::new(OnceLock::new()),
        })
    }

    fn bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    fn group_offset(&self, t: u32) -> u64 {
        let pos = self.index_start + t as usize * 8;
        u64::from_le_bytes(self.bytes()[pos..pos + 8].try_into().unwrap())
    }

    /// Byte range `[lo, hi)` of entries starting with top-level token `t`,
    /// or `None` if `t` is outside the array's vocabulary range.
    fn group_bytes(&self, t: u32) -> Option<(usize, usize)> {
        if t >= self.num_top_ids {
            return None;
        }
        let lo = self.entries_start + self.group_offset(t) as usize;
        let hi = self.entries_start + self.group_offset(t + 1) as usize;
        Some((lo, hi))
    }

    fn whole_range(&self) -> (usize, usize) {
        (self.entries_start, self.index_start)
    }

    fn entry_at(&self, bytes: &[u8], region_start: usize, mid: usize) -> Result<(usize, usize, u32, u32)> {
        let (es, ee) = entry_bounds_containing(bytes, region_start, mid)?;
        let (sid, off, _) = read_tip(bytes, es)?;
        Ok((es, ee, sid as u32, off as u32))
    }

    /// Smallest position in `[lo, hi)` whose entry satisfies `pred`, given
    /// `pred` is monotonic (false, ..., false, true, ..., true) over the range.
    fn partition_point(&self, lo: usize, hi: usize, mut pred: impl FnMut(u32, u32) -> bool) -> Result<usize> {
        let bytes = self.bytes();
        let (mut lo, mut hi) = (lo, hi);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (es, ee, sid, off) = self.entry_at(bytes, lo, mid)?;
            if pred(sid, off) {
                hi = es;
            } else {
                lo = ee;
            }
        }
        Ok(lo)
    }

    /// Smallest byte position `p` in `[array_start, array_end]` such that
    /// every entry at or after `p` has `key` as a prefix (or is past it).
    /// Empty `key` returns the array's start, per spec.md §8's "a sentence
    /// with 0 tokens" boundary case.
    pub fn lower_bound(&self, key: &[u32]) -> Option<usize> {
        if key.is_empty() {
            return Some(self.whole_range().0);
        }
        let (lo, hi) = self.group_bytes(key[0])?;
        Some(
            self.partition_point(lo, hi, |sid, off| {
                cmp_prefix(&self.order, self.corpus(), sid, off, key) != Ordering::Less
            })
            .expect("well-formed suffix array region"),
        )
    }

    /// Smallest byte position strictly past every entry matching `key`.
    pub fn upper_bound(&self, key: &[u32]) -> Option<usize> {
        if key.is_empty() {
            return Some(self.whole_range().1);
        }
        let (lo, hi) = self.group_bytes(key[0])?;
        Some(
            self.partition_point(lo, hi, |sid, off| {
                cmp_prefix(&self.order, self.corpus(), sid, off, key) == Ordering::Greater
            })
            .expect("well-formed suffix array region"),
        )
    }

    fn corpus(&self) -> &CorpusTrack {
        &self.corpus
    }

    pub fn num_top_ids(&self) -> u32 {
        self.num_top_ids
    }

    pub fn array_bounds(&self) -> (usize, usize) {
        self.whole_range()
    }

    /// Exact count of entries in byte range `[lo, hi)`, decoding each.
    pub fn raw_count(&self, lo: usize, hi: usize) -> Result<u64> {
        let bytes = self.bytes();
        let mut pos = lo;
        let mut n = 0u64;
        while pos < hi {
            let (_, _, after) = read_tip(bytes, pos)?;
            pos = after;
            n += 1;
        }
        Ok(n)
    }

    /// `O(1)` estimate of the entry count in `[lo, hi)`, within ~20% for
    /// typical data (spec.md §4.7), using the array-wide average entry
    /// width computed once and cached.
    pub fn approx_count(&self, lo: usize, hi: usize) -> Result<f64> {
        let avg = self.average_entry_width()?;
        if avg <= 0.0 {
            return Ok(0.0);
        }
        Ok((hi - lo) as f64 / avg)
    }

    fn average_entry_width(&self) -> Result<f64> {
        let (start, end) = self.whole_range();
        if start == end {
            return Ok(0.0);
        }
        let total = *self.total_entries.get_or_init(|| self.raw_count(start, end).unwrap_or(0));
        if total == 0 {
            Ok(0.0)
        } else {
            Ok((end - start) as f64 / total as f64)
        }
    }

    /// Number of distinct sentence ids among entries in `[lo, hi)`.
    pub fn sentence_count(&self, lo: usize, hi: usize) -> Result<u64> {
        let bytes = self.bytes();
        let mut pos = lo;
        let mut seen = std::collections::HashSet::new();
        while pos < hi {
            let (sid, _, after) = read_tip(bytes, pos)?;
            seen.insert(sid);
            pos = after;
        }
        Ok(seen.len() as u64)
    }

    /// Uniformly samples up to `n` entries from `[lo, hi)` without decoding
    /// the whole range up front for large spans: picks random byte offsets
    /// and resynchronizes each to its containing entry.
    pub fn random_sample(&self, lo: usize, hi: usize, n: usize, rng: &mut impl rand::Rng) -> Result<Vec<(u32, u32)>> {
        if lo >= hi {
            return Ok(Vec::new());
        }
        let bytes = self.bytes();
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let mid = lo + rng.gen_range(0..(hi - lo));
            let (_, _, sid, off) = self.entry_at(bytes, lo, mid)?;
            out.push((sid, off));
        }
        Ok(out)
    }

    /// A fresh [`TreeIterator`] positioned at the array's root (depth 0,
    /// the whole array).
    pub fn tree_iter(&self) -> TreeIterator<'_, O> {
        let (lo, hi) = self.whole_range();
        TreeIterator { array: self, stack: vec![Frame { depth: 0, lo, hi }] }
    }
}

#[derive(Clone, Copy, Debug)]
struct Frame {
    depth: u32,
    lo: usize,
    hi: usize,
}

/// A restartable depth-first walk over the virtual trie of suffixes/prefixes
/// spec.md §4.7 describes: a stack of `(lower, upper)` byte-range bounds,
/// one per matched depth, with `down`/`over`/`up` implementing the DFS and
/// `extend` jumping straight to a known child token (what `lower_bound`-style
/// callers use instead of `down`ing through every sibling).
pub struct TreeIterator<'a, O: TokenOrder> {
    array: &'a SuffixArrayReader<O>,
    stack: Vec<Frame>,
}

impl<'a, O: TokenOrder> TreeIterator<'a, O> {
    pub fn depth(&self) -> u32 {
        self.stack.last().unwrap().depth
    }

    pub fn bounds(&self) -> (usize, usize) {
        let f = self.stack.last().unwrap();
        (f.lo, f.hi)
    }

    fn first_token_in(&self, lo: usize, hi: usize, depth: u32) -> Result<Option<u32>> {
        let bytes = self.array.bytes();
        let mut pos = lo;
        while pos < hi {
            let (_, ee, sid, off) = self.array.entry_at(bytes, lo, pos)?;
            if let Some(tok) = self.array.order.token_at(self.array.corpus(), sid, off, depth) {
                return Ok(Some(tok));
            }
            pos = ee;
        }
        Ok(None)
    }

    /// Narrows the current frame to the sub-range whose token at this depth
    /// equals `token`, pushing a new frame one level deeper. Returns `false`
    /// (leaving the stack unchanged) if no entry matches.
    pub fn extend(&mut self, token: u32) -> Result<bool> {
        let top = *self.stack.last().unwrap();
        let lo = self.array.partition_point(top.lo, top.hi, |sid, off| {
            cmp_one(&self.array.order, self.array.corpus(), sid, off, top.depth, token) != Ordering::Less
        })?;
        let hi = self.array.partition_point(top.lo, top.hi, |sid, off| {
            cmp_one(&self.array.order, self.array.corpus(), sid, off, top.depth, token) == Ordering::Greater
        })?;
        if lo >= hi {
            return Ok(false);
        }
        self.stack.push(Frame { depth: top.depth + 1, lo, hi });
        Ok(true)
    }

    /// Descends into the first child token of the current frame (skipping
    /// entries that terminate exactly here, which have no children of their
    /// own), or returns `None` if the current frame has no children.
    pub fn down(&mut self) -> Result<Option<u32>> {
        let top = *self.stack.last().unwrap();
        match self.first_token_in(top.lo, top.hi, top.depth)? {
            Some(tok) => {
                self.extend(tok)?;
                Ok(Some(tok))
            }
            None => Ok(None),
        }
    }

    /// Moves from the current frame to its next sibling under the same
    /// parent, or returns `None` if there is none.
    pub fn over(&mut self) -> Result<Option<u32>> {
        if self.stack.len() < 2 {
            return Ok(None);
        }
        let top = self.stack.pop().unwrap();
        let parent = *self.stack.last().unwrap();
        let found = match self.first_token_in(top.hi, parent.hi, parent.depth)? {
            Some(tok) => {
                self.extend(tok)?;
                Some(tok)
            }
            None => None,
        };
        if found.is_none() {
            self.stack.push(top);
        }
        Ok(found)
    }

    /// Pops back to the parent frame. `false` (no-op) at the root.
    pub fn up(&mut self) -> bool {
        if self.stack.len() > 1 {
            self.stack.pop();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ctrack::CorpusTrackBuilder;
    use crate::order::LeftToRight;
    use test_log::test;

    // spec.md §8 seed test 6: three sentences [a b c], [a b d], [a b c e],
    // with a=0, b=1, c=2, d=3, e=4.
    fn build_corpus() -> (CorpusTrack, SuffixArrayReader<LeftToRight>) {
        let mut b = CorpusTrackBuilder::new();
        b.push_sentence(vec![0, 1, 2]);
        b.push_sentence(vec![0, 1, 3]);
        b.push_sentence(vec![0, 1, 2, 4]);
        let ctrack_bytes = b.build();
        let corpus = CorpusTrack::parse(MmapReader::from_bytes_for_test(ctrack_bytes)).unwrap();
        let sa_bytes = SuffixArrayBuilder::build(&corpus, &LeftToRight, 5);
        let reader = SuffixArrayReader::parse(MmapReader::from_bytes_for_test(sa_bytes), corpus.clone(), LeftToRight)
            .unwrap();
        (corpus, reader)
    }

    #[test]
    fn lower_upper_bound_span_exactly_matching_entries() {
        let (_corpus, sa) = build_corpus();

        let lo = sa.lower_bound(&[0, 1]).unwrap();
        let hi = sa.upper_bound(&[0, 1]).unwrap();
        assert_eq!(sa.raw_count(lo, hi).unwrap(), 3);

        let lo = sa.lower_bound(&[0, 1, 2]).unwrap();
        let hi = sa.upper_bound(&[0, 1, 2]).unwrap();
        assert_eq!(sa.raw_count(lo, hi).unwrap(), 2);

        let lo = sa.lower_bound(&[1, 3]).unwrap();
        let hi = sa.upper_bound(&[1, 3]).unwrap();
        assert_eq!(sa.raw_count(lo, hi).unwrap(), 1);
    }

    #[test]
    fn out_of_vocabulary_token_is_not_found() {
        let (_corpus, sa) = build_corpus();
        assert!(sa.lower_bound(&[99]).is_none());
    }

    #[test]
    fn empty_key_spans_the_whole_array() {
        let (_corpus, sa) = build_corpus();
        let (array_start, array_end) = sa.array_bounds();
        assert_eq!(sa.lower_bound(&[]), Some(array_start));
        assert_eq!(sa.upper_bound(&[]), Some(array_end));
    }

    #[test]
    fn sentence_count_counts_distinct_sentences_only() {
        let (_corpus, sa) = build_corpus();
        let lo = sa.lower_bound(&[0, 1]).unwrap();
        let hi = sa.upper_bound(&[0, 1]).unwrap();
        assert_eq!(sa.sentence_count(lo, hi).unwrap(), 3);
    }

    #[test]
    fn approx_count_is_close_to_raw_count() {
        let (_corpus, sa) = build_corpus();
        let (lo, hi) = sa.array_bounds();
        let approx = sa.approx_count(lo, hi).unwrap();
        let raw = sa.raw_count(lo, hi).unwrap() as f64;
        assert!((approx - raw).abs() <= raw * 0.2 + 1.0);
    }

    #[test]
    fn tree_iterator_walks_down_over_and_up() {
        let (_corpus, sa) = build_corpus();
        let mut it = sa.tree_iter();
        let t0 = it.down().unwrap().unwrap();
        assert_eq!(t0, 0); // only 'a' starts any suffix at depth 0
        assert!(it.over().unwrap().is_none()); // no sibling token at depth 0

        let t1 = it.down().unwrap().unwrap();
        assert_eq!(t1, 1); // "a b..." is the only continuation
        let t2 = it.down().unwrap().unwrap();
        assert!(t2 == 2 || t2 == 3); // 'c' or 'd' depending on sort order
        assert!(it.up());
        assert_eq!(it.depth(), 2);
    }

    #[test]
    fn random_sample_returns_entries_within_range() {
        let (_corpus, sa) = build_corpus();
        let (lo, hi) = sa.array_bounds();
        let mut rng = rand::thread_rng();
        let sample = sa.random_sample(lo, hi, 5, &mut rng).unwrap();
        assert_eq!(sample.len(), 5);
        for (sid, _) in sample {
            assert!(sid < 3);
        }
    }
}
