//! The three-pass TPLM assembler collapsed into one in-memory build, the
//! same simplification `tpt_tppt::builder` makes (spec.md §4.9): parse,
//! assign frequency-sorted IDs, group by reverse context, assemble the
//! trie. Per-order value IDs are assigned by descending frequency exactly
//! as [`tpt_index::CodebookBuilder::build`] already does for every column,
//! which is what spec.md §4.9 names explicitly for this model.

use std::collections::HashMap;

use tpt_base::{err, Result};
use tpt_codec::{write_tip, write_tui};
use tpt_index::{Codebook, CodebookBuilder, CodebookSet, TokenIndexBuilder, Value};
use tpt_trie::{TrieBuilderNode, TrieWriter};
use tracing::info;

use crate::arpa::ArpaModel;

pub struct BuildArtifacts {
    pub tdx: Vec<u8>,
    pub codebooks: Vec<u8>,
    pub unigram_pvals: Vec<u8>,
    pub trie: Vec<u8>,
    pub max_order: u32,
    pub unk_id: u32,
}

fn build_vocab(model: &ArpaModel) -> (TokenIndexBuilder, HashMap<String, u32>) {
    let mut freq: HashMap<&str, u64> = HashMap::new();
    for order in &model.orders {
        for entry in order {
            for t in &entry.tokens {
                *freq.entry(t.as_str()).or_insert(0) += 1;
            }
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

fn resolve(tokens: &[String], ids: &HashMap<String, u32>) -> Result<Vec<u32>> {
    tokens
        .iter()
        .map(|t| ids.get(t.as_str()).copied().ok_or_else(|| err(format!("tplm build: unresolved token {t:?}"))))
        .collect()
}

/// Builds every TPLM artifact from an already-parsed ARPA model.
/// `unk_token` MUST name a token present in the order-1 section; its
/// unigram probability becomes `oov_unigram_prob` (spec.md §8 seed test 5).
pub fn build(model: &ArpaModel, unk_token: &str, max_blocks: u32) -> Result<BuildArtifacts> {
    let max_order = model.max_order();
    if max_order == 0 {
        return Err(err("tplm build: ARPA model has no n-gram sections"));
    }

    info!(max_order, "tplm build: arpalm-encode pass starting");
    let (vocab_builder, ids) = build_vocab(model);
    let vocab_len = vocab_builder.len();
    info!(vocab_len, "tplm build: vocabulary assigned");
    let unk_id = *ids.get(unk_token).ok_or_else(|| err(format!("tplm build: unk token {unk_token:?} not present in the model")))?;

    let mut tdx_builder = vocab_builder;
    tdx_builder.set_unknown(unk_id);
    let mut tdx = Vec::new();
    tdx_builder.serialize_into(&mut tdx);

    // Resolve every entry's tokens to vocabulary IDs up front.
    let mut resolved: Vec<Vec<(Vec<u32>, f32, Option<f32>)>> = Vec::with_capacity(model.orders.len());
    for order in &model.orders {
        let mut out = Vec::with_capacity(order.len());
        for entry in order {
            out.push((resolve(&entry.tokens, &ids)?, entry.log_prob, entry.backoff));
        }
        resolved.push(out);
    }

    let mut pval_builders: Vec<CodebookBuilder> = (0..max_order).map(|_| CodebookBuilder::new_float()).collect();
    for (k, order) in resolved.iter().enumerate() {
        for &(_, log_prob, _) in order {
            pval_builders[k].observe(Value::Float(log_prob));
        }
    }
    let pval_books: Vec<Codebook> = pval_builders.into_iter().map(|b| b.build(max_blocks)).collect::<Result<Vec<_>>>()?;

    let mut bow_builders: Vec<CodebookBuilder> = (0..max_order.saturating_sub(1)).map(|_| CodebookBuilder::new_float()).collect();
    for k in 0..(max_order.saturating_sub(1)) as usize {
        for &(_, _, backoff) in &resolved[k] {
            bow_builders[k].observe(Value::Float(backoff.unwrap_or(0.0)));
        }
    }
    let bow_books: Vec<Codebook> = bow_builders.into_iter().map(|b| b.build(max_blocks)).collect::<Result<Vec<_>>>()?;

    let mut unigram_log_prob: HashMap<u32, f32> = HashMap::with_capacity(vocab_len as usize);
    for (toks, log_prob, _) in &resolved[0] {
        unigram_log_prob.insert(toks[0], *log_prob);
    }
    let unigram_ids: Vec<u32> = (0..vocab_len)
        .map(|id| {
            let log_prob = unigram_log_prob
                .get(&id)
                .ok_or_else(|| err(format!("tplm build: token id {id} has no unigram probability")))?;
            pval_books[0].id_of(Value::Float(*log_prob))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut root = TrieBuilderNode::new();
    for k in 1..max_order as usize {
        let mut bow_by_context: HashMap<Vec<u32>, f32> = HashMap::new();
        for (toks, _, backoff) in &resolved[k - 1] {
            bow_by_context.insert(toks.clone(), backoff.unwrap_or(0.0));
        }
        let mut next_by_context: HashMap<Vec<u32>, Vec<(u32, f32)>> = HashMap::new();
        for (toks, log_prob, _) in &resolved[k] {
            let (context, last) = toks.split_at(k);
            next_by_context.entry(context.to_vec()).or_default().push((last[0], *log_prob));
        }

        let mut contexts: Vec<Vec<u32>> = bow_by_context.keys().cloned().collect();
        for c in next_by_context.keys() {
            if !bow_by_context.contains_key(c) {
                contexts.push(c.clone());
            }
        }

        for context in contexts {
            let mut node = &mut root;
            for &tid in context.iter().rev() {
                node = node.child(tid);
            }

            let bow = bow_by_context.get(&context).copied().unwrap_or(0.0);
            let bow_id = bow_books[k - 1].id_of(Value::Float(bow))?;

            let mut pairs = next_by_context.remove(&context).unwrap_or_default();
            pairs.sort_by_key(|&(tok, _)| tok);

            let mut payload = Vec::new();
            write_tui(&mut payload, bow_id as u64);
            let mut tip_bytes = Vec::new();
            for (tok, log_prob) in &pairs {
                let pval_id = pval_books[k].id_of(Value::Float(*log_prob))?;
                write_tip(&mut tip_bytes, *tok as u64, pval_id as u64);
            }
            write_tui(&mut payload, tip_bytes.len() as u64);
            payload.extend_from_slice(&tip_bytes);

            node.set_payload(payload);
        }
    }

    let defaults = [max_order as u64, unk_id as u64];
    let trie = TrieWriter::build(&root, vocab_len, defaults);

    let mut all_books = pval_books;
    all_books.extend(bow_books);
    let mut codebooks = Vec::new();
    CodebookSet::new(all_books).serialize_into(&mut codebooks, true);

    let mut unigram_pvals = Vec::new();
    unigram_pvals.extend_from_slice(&(unigram_ids.len() as u32).to_le_bytes());
    for id in unigram_ids {
        unigram_pvals.extend_from_slice(&id.to_le_bytes());
    }

    info!(trie_bytes = trie.len(), "tplm build: arpalm-assemble pass done");
    Ok(BuildArtifacts { tdx, codebooks, unigram_pvals, trie, max_order, unk_id })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arpa::parse_arpa;
    use test_log::test;

    #[test]
    fn builds_the_seed_two_gram_model() {
        let text = "\\data\\\n\\1-grams:\n-99 <s>\n-1.0 a -0.3\n-2.0 b\n-1.5 </s>\n-3.0 <unk>\n\n\\2-grams:\n-0.3010299957 a b\n\n\\end\\\n";
        let model = parse_arpa(text).unwrap();
        let artifacts = build(&model, "<unk>", 16).unwrap();
        assert_eq!(artifacts.max_order, 2);
        assert!(!artifacts.trie.is_empty());
        assert!(!artifacts.codebooks.is_empty());
    }

    #[test]
    fn rejects_a_missing_unk_token() {
        let text = "\\data\\\n\\1-grams:\n-1.0 a\n\\end\\\n";
        let model = parse_arpa(text).unwrap();
        assert!(build(&model, "<unk>", 16).is_err());
    }
}
