//! Read side of the tightly packed phrase table (spec.md §4.8's third
//! pass, and the `tppt_dump` program of spec.md §6.3).

use std::fmt::Write as _;

use tpt_base::{err, ioutil::MmapReader, Result};
use tpt_codec::Schema;
use tpt_index::{Codebook, CodebookSet, SequenceRepository, TokenIndex};
use tpt_trie::{Node, TrieReader, ValueCache};

use crate::config::TppConfig;
use crate::payload::{decode_payload, DecodedCandidate};

/// One resolved phrase-table entry: a fully materialized target phrase
/// plus its scores, counts, and (if present) word alignment.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub target_ids: Vec<u32>,
    pub scores: Vec<f32>,
    pub counts: Vec<u32>,
    pub alignment: Option<Vec<Vec<u32>>>,
}

/// A memory-mapped tightly packed phrase table. Bundles the src/trg
/// vocabularies, the target sequence repository, the trie, the codebook
/// set, and the target-phrase-reference table a lookup needs to turn a
/// trie hit into fully materialized candidates.
pub struct PhraseTable {
    src_tdx: TokenIndex,
    trg_tdx: TokenIndex,
    trg_repo: SequenceRepository,
    trie: TrieReader,
    codebooks: CodebookSet,
    trg_ref_table: Vec<u64>,
    config: TppConfig,
    target_ref_schema: Schema,
    cache: ValueCache<Vec<DecodedCandidate>>,
}

impl PhraseTable {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        src_tdx: MmapReader,
        trg_tdx: MmapReader,
        trg_repo_dat: MmapReader,
        trg_repo_idx: MmapReader,
        trie_bytes: MmapReader,
        codebooks_bytes: &[u8],
        trg_ref_table_bytes: &[u8],
        config: TppConfig,
    ) -> Result<Self> {
        let src_tdx = TokenIndex::parse(src_tdx, 0)?;
        let trg_tdx = TokenIndex::parse(trg_tdx, 0)?;
        let trg_repo = SequenceRepository::parse(trg_repo_dat, trg_repo_idx, trg_tdx.num_tokens())?;
        let trie = TrieReader::parse(trie_bytes)?;
        let codebooks = CodebookSet::parse(codebooks_bytes)?;
        let trg_ref_table = parse_trg_ref_table(trg_ref_table_bytes)?;
        let target_ref_schema = Schema::new(vec![config.target_ref_bits])?;

        Ok(PhraseTable {
            src_tdx,
            trg_tdx,
            trg_repo,
            trie,
            codebooks,
            trg_ref_table,
            config,
            target_ref_schema,
            cache: ValueCache::new(),
        })
    }

    pub fn src_vocab(&self) -> &TokenIndex {
        &self.src_tdx
    }

    pub fn trg_vocab(&self) -> &TokenIndex {
        &self.trg_tdx
    }

    pub fn num_float_scores(&self) -> u32 {
        self.config.num_float_scores
    }

    fn float_books(&self) -> &[Codebook] {
        &self.codebooks.books[..self.config.num_float_scores as usize]
    }

    fn count_book(&self) -> Option<&Codebook> {
        if self.config.num_count_columns > 0 {
            self.codebooks.books.get(self.config.num_float_scores as usize)
        } else {
            None
        }
    }

    fn alignment_book(&self) -> Option<&Codebook> {
        if self.config.has_alignments {
            let idx = self.config.num_float_scores as usize + usize::from(self.config.num_count_columns > 0);
            self.codebooks.books.get(idx)
        } else {
            None
        }
    }

    /// Looks up every candidate whose source phrase is `tokens[i..j]`.
    /// Returns an empty vector if no phrase in the table matches exactly
    /// that span (unlike [`tpt_trie::Node::find`], this does not fall
    /// back to a shorter prefix -- phrase-table lookups are keyed on the
    /// whole span the caller asked for).
    pub fn lookup(&self, tokens: &[u32], i: usize, j: usize) -> Result<Vec<Candidate>> {
        if j <= i || j > tokens.len() {
            return Ok(Vec::new());
        }
        let Some(mut node) = self.trie.find(tokens[i]) else {
            return Ok(Vec::new());
        };
        for &tid in &tokens[i + 1..j] {
            match node.find(&self.trie, tid)? {
                Some(n) => node = n,
                None => return Ok(Vec::new()),
            }
        }
        if !node.has_value() {
            return Ok(Vec::new());
        }
        let Some(pos) = node.payload_pos(&self.trie)? else {
            return Ok(Vec::new());
        };

        let decoded = self.cache.get_or_decode(pos, || {
            let bytes = self.trie.payload_bytes(pos);
            decode_payload(
                bytes,
                &self.target_ref_schema,
                self.float_books(),
                self.count_book(),
                self.config.num_count_columns as usize,
                self.alignment_book(),
            )
        })?;

        decoded.iter().map(|c| self.materialize(c)).collect()
    }

    fn materialize(&self, c: &DecodedCandidate) -> Result<Candidate> {
        let offset = *self
            .trg_ref_table
            .get(c.target_ref_id as usize)
            .ok_or_else(|| err("tppt: target-phrase reference out of range"))?;
        let target_ids = self.trg_repo.sequence(offset)?;
        let scores = c
            .float_values
            .iter()
            .map(|v| match v {
                tpt_index::Value::Float(f) => *f,
                tpt_index::Value::UInt(u) => *u as f32,
            })
            .collect();
        Ok(Candidate { target_ids, scores, counts: c.counts.clone(), alignment: c.alignment.clone() })
    }

    /// Renders every row of the table as `src ||| trg ||| scores [||| a=...] [||| c=...]`,
    /// the plain-text format `tppt_dump` (spec.md §6.3) writes to stdout, in
    /// source-phrase order. Sorting within a source phrase follows build
    /// order (spec.md §8's `tppt_dump(build(P)) == sort(P)` round-trip is up
    /// to a caller-side sort of `P`, not an ordering guarantee this makes).
    pub fn dump(&self) -> Result<Vec<String>> {
        let mut rows = Vec::new();
        let mut path = Vec::new();
        for (tid, node) in self.trie.root_children() {
            path.push(tid);
            self.dump_node(node, &mut path, &mut rows)?;
            path.pop();
        }
        Ok(rows)
    }

    fn dump_node(&self, node: Node, path: &mut Vec<u32>, rows: &mut Vec<String>) -> Result<()> {
        if node.has_value() {
            let pos = node
                .payload_pos(&self.trie)?
                .ok_or_else(|| err("tppt: accepting node reported no payload position"))?;
            let decoded = self.cache.get_or_decode(pos, || {
                let bytes = self.trie.payload_bytes(pos);
                decode_payload(
                    bytes,
                    &self.target_ref_schema,
                    self.float_books(),
                    self.count_book(),
                    self.config.num_count_columns as usize,
                    self.alignment_book(),
                )
            })?;
            let src_words: Vec<&str> = path.iter().map(|&t| self.src_tdx.string_of(t)).collect::<Result<_>>()?;
            let src_text = src_words.join(" ");
            for c in decoded.iter() {
                let candidate = self.materialize(c)?;
                rows.push(self.format_row(&src_text, &candidate));
            }
        }
        for (tid, child) in node.children(&self.trie)? {
            path.push(tid);
            self.dump_node(child, path, rows)?;
            path.pop();
        }
        Ok(())
    }

    fn format_row(&self, src_text: &str, candidate: &Candidate) -> String {
        let trg_words: Vec<&str> = candidate
            .target_ids
            .iter()
            .map(|&t| self.trg_tdx.string_of(t).unwrap_or("<bad-id>"))
            .collect();
        let mut line = format!("{src_text} ||| {}", trg_words.join(" "));
        let scores: Vec<String> = candidate.scores.iter().map(|s| format!("{s}")).collect();
        write!(line, " ||| {}", scores.join(" ")).expect("String write is infallible");
        if let Some(sets) = &candidate.alignment {
            let links: Vec<String> = sets
                .iter()
                .enumerate()
                .flat_map(|(i, set)| set.iter().map(move |&j| format!("{i}-{j}")))
                .collect();
            write!(line, " ||| a={}", links.join(" ")).expect("String write is infallible");
        }
        if !candidate.counts.is_empty() {
            let counts: Vec<String> = candidate.counts.iter().map(|c| format!("{c}")).collect();
            write!(line, " ||| c={}", counts.join(" ")).expect("String write is infallible");
        }
        line
    }
}

fn parse_trg_ref_table(bytes: &[u8]) -> Result<Vec<u64>> {
    if bytes.len() < 4 {
        return Err(err("tppt: truncated target-reference table header"));
    }
    let n = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let need = 4 + n * 8;
    if bytes.len() < need {
        return Err(err("tppt: truncated target-reference table body"));
    }
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let p = 4 + i * 8;
        out.push(u64::from_le_bytes(bytes[p..p + 8].try_into().unwrap()));
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    use crate::builder::build;
    use crate::text::TextRow;

    fn row(src: &str, trg: &str, scores: &[f32]) -> TextRow {
        TextRow {
            src: src.split_whitespace().map(String::from).collect(),
            trg: trg.split_whitespace().map(String::from).collect(),
            float_scores: scores.to_vec(),
            alignment: None,
            counts: Vec::new(),
        }
    }

    fn open(artifacts: &crate::builder::BuildArtifacts) -> PhraseTable {
        PhraseTable::open(
            MmapReader::from_bytes_for_test(artifacts.src_tdx.clone()),
            MmapReader::from_bytes_for_test(artifacts.trg_tdx.clone()),
            MmapReader::from_bytes_for_test(artifacts.trg_repo_dat.clone()),
            MmapReader::from_bytes_for_test(artifacts.trg_repo_idx.clone()),
            MmapReader::from_bytes_for_test(artifacts.trie.clone()),
            &artifacts.codebooks,
            &artifacts.trg_ref_table,
            artifacts.config.clone(),
        )
        .unwrap()
    }

    #[test]
    fn round_trips_a_small_table_through_build_and_lookup() {
        let rows = vec![row("a b", "x y", &[0.5, 0.9]), row("a b", "z", &[0.1, 0.2]), row("c", "w", &[1.0, 1.0])];
        let artifacts = build(&rows, 16).unwrap();
        let table = open(&artifacts);

        let a = table.src_vocab().find("a").unwrap();
        let b = table.src_vocab().find("b").unwrap();
        let c = table.src_vocab().find("c").unwrap();

        let hits = table.lookup(&[a, b], 0, 2).unwrap();
        assert_eq!(hits.len(), 2);
        let mut targets: Vec<Vec<u32>> = hits.iter().map(|h| h.target_ids.clone()).collect();
        targets.sort();
        let x = table.trg_vocab().find("x").unwrap();
        let y = table.trg_vocab().find("y").unwrap();
        let z = table.trg_vocab().find("z").unwrap();
        let mut expected = vec![vec![x, y], vec![z]];
        expected.sort();
        assert_eq!(targets, expected);

        let hits_c = table.lookup(&[c], 0, 1).unwrap();
        assert_eq!(hits_c.len(), 1);
        assert_eq!(hits_c[0].scores, vec![1.0, 1.0]);
    }

    #[test]
    fn unknown_span_returns_no_candidates() {
        let rows = vec![row("a", "x", &[1.0])];
        let artifacts = build(&rows, 16).unwrap();
        let table = open(&artifacts);
        let missing = table.src_vocab().find("a").unwrap() + 1000;
        assert!(table.lookup(&[missing], 0, 1).unwrap().is_empty());
    }
}
