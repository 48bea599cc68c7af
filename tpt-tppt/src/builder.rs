//! The three-pass TPPT assembler: spec.md §4.8's `textpt_encode_phrases` /
//! `textpt_encode_scores` / `textpt_assemble` pipeline, collapsed into one
//! in-memory build since this crate does not need to stream the
//! intermediate `.tdx`/`.repos`/`.col`/`.cbk` files through separate
//! processes to get the same bytes on disk.

use std::collections::{BTreeMap, HashMap};

use tpt_base::{err, Result};
use tpt_codec::Schema;
use tpt_index::{Codebook, CodebookBuilder, CodebookSet, SequenceRepositoryBuilder, TokenIndexBuilder, Value};
use tpt_trie::{TrieBuilderNode, TrieWriter};
use tracing::info;

use crate::config::{bits_for_count, TppConfig, FORMAT_VERSION};
use crate::payload::{encode_payload, flatten_alignment, EncodedCandidate};
use crate::text::TextRow;

/// Every file `textpt_assemble` (and the passes before it) would leave on
/// disk, named after the suffixes spec.md §6.3 assigns them. `src_repo_*`
/// and `src_col`/`trg_col` are kept only for pipeline fidelity -- a
/// [`crate::reader::PhraseTable`] does not reopen them, since the trie
/// already holds everything a lookup needs.
pub struct BuildArtifacts {
    pub src_tdx: Vec<u8>,
    pub trg_tdx: Vec<u8>,
    pub src_repo_dat: Vec<u8>,
    pub src_repo_idx: Vec<u8>,
    pub trg_repo_dat: Vec<u8>,
    pub trg_repo_idx: Vec<u8>,
    pub src_col: Vec<u64>,
    pub trg_col: Vec<u64>,
    pub codebooks: Vec<u8>,
    pub trg_ref_table: Vec<u8>,
    pub trie: Vec<u8>,
    pub config: TppConfig,
}

struct RowIds {
    src_ids: Vec<u32>,
    src_prelim: u64,
    trg_prelim: u64,
}

fn build_vocab(rows: &[TextRow], side: impl Fn(&TextRow) -> &[String]) -> (TokenIndexBuilder, HashMap<String, u32>) {
    let mut freq: HashMap<&str, u64> = HashMap::new();
    for row in rows {
        for w in side(row) {
            *freq.entry(w.as_str()).or_insert(0) += 1;
        }
    }
    let mut words: Vec<&str> = freq.keys().copied().collect();
    words.sort_by(|a, b| freq[b].cmp(&freq[a]).then_with(|| a.cmp(b)));

    let mut builder = TokenIndexBuilder::new();
    let mut ids = HashMap::with_capacity(words.len());
    for w in words {
        let id = builder.push(w);
        ids.insert(w.to_string(), id);
    }
    (builder, ids)
}

fn ids_of(words: &[String], table: &HashMap<String, u32>) -> Result<Vec<u32>> {
    words
        .iter()
        .map(|w| table.get(w.as_str()).copied().ok_or_else(|| err(format!("tppt build: unresolved token {w:?}"))))
        .collect()
}

/// Builds every TPPT artifact from already-tokenized rows. `max_blocks`
/// bounds each codebook's [`tpt_codec::Schema`] search (spec.md §4.2).
pub fn build(rows: &[TextRow], max_blocks: u32) -> Result<BuildArtifacts> {
    let Some(first) = rows.first() else {
        return Err(err("tppt build: cannot build a phrase table from zero rows"));
    };
    let num_float_scores = first.float_scores.len();
    let num_count_columns = first.counts.len();
    let has_alignments = first.alignment.is_some();
    for row in rows {
        if row.float_scores.len() != num_float_scores || row.counts.len() != num_count_columns || row.alignment.is_some() != has_alignments {
            return Err(err("tppt build: all rows must share the same score/count/alignment shape"));
        }
    }

    info!(
        rows = rows.len(),
        num_float_scores, num_count_columns, has_alignments, "tppt build: encode-phrases pass starting"
    );
    let (src_builder, src_ids) = build_vocab(rows, |r| &r.src);
    let (trg_builder, trg_ids) = build_vocab(rows, |r| &r.trg);
    info!(src_vocab = src_builder.len(), trg_vocab = trg_builder.len(), "tppt build: vocabularies assigned");

    let mut src_tdx = Vec::new();
    src_builder.serialize_into(&mut src_tdx);
    let mut trg_tdx = Vec::new();
    trg_builder.serialize_into(&mut trg_tdx);

    let mut src_repo = SequenceRepositoryBuilder::new();
    let mut trg_repo = SequenceRepositoryBuilder::new();

    let mut row_ids = Vec::with_capacity(rows.len());
    for row in rows {
        let sids = ids_of(&row.src, &src_ids)?;
        let tids = ids_of(&row.trg, &trg_ids)?;
        let src_prelim = src_repo.insert(&sids);
        let trg_prelim = trg_repo.insert(&tids);
        row_ids.push(RowIds { src_ids: sids, src_prelim, trg_prelim });
    }

    let (src_repo_dat, src_remap, src_repo_idx) = src_repo.build(src_builder.len());
    let (trg_repo_dat, trg_remap, trg_repo_idx) = trg_repo.build(trg_builder.len());

    let src_col: Vec<u64> = row_ids.iter().map(|r| src_remap[&r.src_prelim]).collect();
    let trg_col: Vec<u64> = row_ids.iter().map(|r| trg_remap[&r.trg_prelim]).collect();

    // Compact target-phrase-reference table: one entry per distinct trg
    // final offset, in first-seen order, so the payload's `target_ref`
    // field needs only `ceil(log2(|table|))` bits instead of the raw
    // byte-offset width (spec.md §3.6).
    let mut trg_ref_table: Vec<u64> = Vec::new();
    let mut trg_ref_id_of: HashMap<u64, u32> = HashMap::new();
    for &offset in &trg_col {
        trg_ref_id_of.entry(offset).or_insert_with(|| {
            let id = trg_ref_table.len() as u32;
            trg_ref_table.push(offset);
            id
        });
    }
    let target_ref_bits = bits_for_count(trg_ref_table.len() as u32);
    let target_ref_schema = Schema::new(vec![target_ref_bits])?;
    info!(
        distinct_target_refs = trg_ref_table.len(),
        target_ref_bits,
        "tppt build: encode-scores pass: target-phrase-reference table assembled"
    );

    let mut float_builders: Vec<CodebookBuilder> = (0..num_float_scores).map(|_| CodebookBuilder::new_float()).collect();
    for row in rows {
        for (i, &s) in row.float_scores.iter().enumerate() {
            float_builders[i].observe(Value::Float(s));
        }
    }
    let float_books: Vec<Codebook> = float_builders
        .into_iter()
        .map(|b| b.build(max_blocks))
        .collect::<Result<Vec<_>>>()?;

    let count_book = if num_count_columns > 0 {
        let mut cb = CodebookBuilder::new_uint();
        for row in rows {
            for &c in &row.counts {
                cb.observe(Value::UInt(c));
            }
        }
        Some(cb.build(max_blocks)?)
    } else {
        None
    };

    let alignment_book = if has_alignments {
        let mut ab = CodebookBuilder::new_uint();
        ab.observe(Value::UInt(tpt_codec::EMPTY_SET_LINK as u32));
        ab.observe(Value::UInt(tpt_codec::ALIGNMENT_STREAM_TERMINATOR as u32));
        for row in rows {
            if let Some(sets) = &row.alignment {
                for link in flatten_alignment(sets) {
                    ab.observe(Value::UInt(link as u32));
                }
            }
        }
        Some(ab.build(max_blocks)?)
    } else {
        None
    };

    // Group rows by source-phrase identity so every candidate sharing a
    // source phrase lands in the same trie node's payload.
    let mut groups: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
    for (i, r) in row_ids.iter().enumerate() {
        groups.entry(r.src_prelim).or_default().push(i);
    }

    let mut root = TrieBuilderNode::new();
    for indices in groups.values() {
        let sids = &row_ids[indices[0]].src_ids;
        let mut node = &mut root;
        for &tid in sids.iter() {
            node = node.child(tid);
        }

        let mut candidates = Vec::with_capacity(indices.len());
        for &ri in indices {
            let row = &rows[ri];
            let trg_offset = trg_col[ri];
            let target_ref_id = trg_ref_id_of[&trg_offset];
            let float_ids = row
                .float_scores
                .iter()
                .zip(&float_books)
                .map(|(&s, book)| book.id_of(Value::Float(s)))
                .collect::<Result<Vec<_>>>()?;
            let count_ids = match &count_book {
                Some(book) => row.counts.iter().map(|&c| book.id_of(Value::UInt(c))).collect::<Result<Vec<_>>>()?,
                None => Vec::new(),
            };
            let alignment_links = row.alignment.as_ref().map(|sets| flatten_alignment(sets));
            candidates.push(EncodedCandidate { target_ref_id, float_ids, count_ids, alignment_links });
        }

        let payload = encode_payload(&candidates, &target_ref_schema, &float_books, count_book.as_ref(), alignment_book.as_ref())?;
        node.set_payload(payload);
    }

    let defaults = [num_float_scores as u64, target_ref_bits as u64];
    let trie = TrieWriter::build(&root, src_builder.len(), defaults);

    let mut all_books = float_books.clone();
    if let Some(b) = &count_book {
        all_books.push(b.clone());
    }
    if let Some(b) = &alignment_book {
        all_books.push(b.clone());
    }
    let mut codebooks = Vec::new();
    CodebookSet::new(all_books).serialize_into(&mut codebooks, true);

    let mut trg_ref_bytes = Vec::new();
    trg_ref_bytes.extend_from_slice(&(trg_ref_table.len() as u32).to_le_bytes());
    for &o in &trg_ref_table {
        trg_ref_bytes.extend_from_slice(&o.to_le_bytes());
    }

    let config = TppConfig {
        format_version: FORMAT_VERSION,
        num_float_scores: num_float_scores as u32,
        num_count_columns: num_count_columns as u32,
        has_alignments,
        target_ref_bits,
    };

    info!(trie_bytes = trie.len(), num_codebooks = config.num_codebooks(), "tppt build: assemble pass done");
    Ok(BuildArtifacts {
        src_tdx,
        trg_tdx,
        src_repo_dat,
        src_repo_idx,
        trg_repo_dat,
        trg_repo_idx,
        src_col,
        trg_col,
        codebooks,
        trg_ref_table: trg_ref_bytes,
        trie,
        config,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    fn row(src: &str, trg: &str, scores: &[f32]) -> TextRow {
        TextRow {
            src: src.split_whitespace().map(String::from).collect(),
            trg: trg.split_whitespace().map(String::from).collect(),
            float_scores: scores.to_vec(),
            alignment: None,
            counts: Vec::new(),
        }
    }

    #[test]
    fn rejects_empty_input() {
        assert!(build(&[], 16).is_err());
    }

    #[test]
    fn rejects_inconsistent_row_shapes() {
        let rows = vec![row("a", "x", &[1.0]), row("b", "y", &[1.0, 2.0])];
        assert!(build(&rows, 16).is_err());
    }

    #[test]
    fn builds_a_small_table_with_shared_source_phrase() {
        let rows = vec![row("a b", "x y", &[0.5, 0.9]), row("a b", "z", &[0.1, 0.2]), row("c", "w", &[1.0, 1.0])];
        let artifacts = build(&rows, 16).unwrap();
        assert_eq!(artifacts.config.num_float_scores, 2);
        assert!(!artifacts.trie.is_empty());
        assert_eq!(artifacts.trg_col.len(), 3);
        assert!(!artifacts.trg_ref_table.is_empty());
    }
}
