//! Read side of the tightly packed language model (spec.md §4.9's lookup
//! contract, `word_prob`/`word_prob_with_depth`).

use tpt_base::{err, ioutil::MmapReader, Result};
use tpt_codec::{read_tip, read_tui};
use tpt_index::{Codebook, CodebookSet, TokenIndex, Value};
use tpt_trie::{TrieReader, ValueCache};

struct DecodedNode {
    bow: f32,
    /// `(predicted_token_id, log_prob)`, sorted by token id for binary search.
    pvals: Vec<(u32, f32)>,
}

fn as_f32(v: Value) -> Result<f32> {
    match v {
        Value::Float(f) => Ok(f),
        Value::UInt(_) => Err(err("tplm: probability/back-off codebook produced a non-float value")),
    }
}

/// A memory-mapped tightly packed back-off n-gram language model.
///
/// Per spec.md §5's open question on the TPLM reader's lookup cache: this
/// caches *decoded node payloads* keyed by byte position, the same
/// thread-safe scheme [`tpt_trie::ValueCache`] already gives TPPT -- not
/// the flagged-as-questionable `(word_id, context_vector)` result cache,
/// which is not implemented (see DESIGN.md).
pub struct LanguageModel {
    vocab: TokenIndex,
    trie: TrieReader,
    pval_books: Vec<Codebook>,
    bow_books: Vec<Codebook>,
    unigram_pvals: Vec<u32>,
    max_order: u32,
    unk_id: u32,
    cache: ValueCache<DecodedNode>,
}

impl LanguageModel {
    pub fn open(tdx: MmapReader, trie_bytes: MmapReader, codebooks_bytes: &[u8], unigram_pvals_bytes: &[u8]) -> Result<Self> {
        let vocab = TokenIndex::parse(tdx, 0)?;
        let trie = TrieReader::parse(trie_bytes)?;
        let [max_order, unk_id] = trie.defaults();
        let max_order = max_order as u32;
        let unk_id = unk_id as u32;

        let codebooks = CodebookSet::parse(codebooks_bytes)?;
        if codebooks.books.len() != (2 * max_order as usize).saturating_sub(1) {
            return Err(err("tplm: codebook count does not match the model's max order"));
        }
        let pval_books: Vec<Codebook> = codebooks.books[..max_order as usize].to_vec();
        let bow_books: Vec<Codebook> = codebooks.books[max_order as usize..].to_vec();

        let unigram_pvals = parse_unigram_table(unigram_pvals_bytes)?;
        if unigram_pvals.len() as u32 != vocab.num_tokens() {
            return Err(err("tplm: unigram table length does not match vocabulary size"));
        }

        Ok(LanguageModel { vocab, trie, pval_books, bow_books, unigram_pvals, max_order, unk_id, cache: ValueCache::new() })
    }

    pub fn vocab(&self) -> &TokenIndex {
        &self.vocab
    }

    pub fn max_order(&self) -> u32 {
        self.max_order
    }

    pub fn unk_id(&self) -> u32 {
        self.unk_id
    }

    fn decode_node(&self, pos: u64, depth: u32) -> Result<std::sync::Arc<DecodedNode>> {
        self.cache.get_or_decode(pos, || {
            let bytes = self.trie.payload_bytes(pos);
            let (bow_id, next) = read_tui(bytes, 0)?;
            let (tip_len, next) = read_tui(bytes, next)?;
            let tip_len = tip_len as usize;
            let end = next + tip_len;
            let mut pvals = Vec::new();
            let mut p = next;
            while p < end {
                let (tok, pval_id, after) = read_tip(bytes, p)?;
                let log_prob = as_f32(self.pval_books[depth as usize].value_of(pval_id as u32)?)?;
                pvals.push((tok as u32, log_prob));
                p = after;
            }
            let bow = as_f32(self.bow_books[depth as usize - 1].value_of(bow_id as u32)?)?;
            Ok(DecodedNode { bow, pvals })
        })
    }

    /// `log10 P(w | context)`, `context` nearest-word-first (spec.md §4.9).
    pub fn word_prob(&self, w: u32, context: &[u32]) -> Result<f32> {
        Ok(self.word_prob_with_depth(w, context)?.0)
    }

    /// As [`Self::word_prob`], additionally reporting the order of the
    /// longest context that actually matched `w`.
    pub fn word_prob_with_depth(&self, w: u32, context: &[u32]) -> Result<(f32, u32)> {
        let mut nodes = Vec::new();
        if let Some(&first) = context.first() {
            if let Some(n) = self.trie.find(first) {
                nodes.push(n);
                for &tok in &context[1..] {
                    match nodes.last().unwrap().find(&self.trie, tok)? {
                        Some(n2) => nodes.push(n2),
                        None => break,
                    }
                }
            }
        }

        let mut backoff = 0.0f32;
        for depth in (1..=nodes.len()).rev() {
            if !nodes[depth - 1].has_value() {
                continue;
            }
            let Some(pos) = nodes[depth - 1].payload_pos(&self.trie)? else {
                continue;
            };
            let decoded = self.decode_node(pos, depth as u32)?;
            if let Ok(idx) = decoded.pvals.binary_search_by_key(&w, |&(t, _)| t) {
                return Ok((decoded.pvals[idx].1 + backoff, depth as u32 + 1));
            }
            backoff += decoded.bow;
        }

        let id = *self
            .unigram_pvals
            .get(w as usize)
            .ok_or_else(|| err("tplm: word id out of vocabulary range"))?;
        let p = as_f32(self.pval_books[0].value_of(id)?)?;
        Ok((p + backoff, 1))
    }

    /// `word_prob` against `<unk>`'s own unigram probability -- the value
    /// spec.md §8 seed test 5 calls `oov_unigram_prob`.
    pub fn oov_unigram_prob(&self) -> Result<f32> {
        let id = self.unigram_pvals[self.unk_id as usize];
        as_f32(self.pval_books[0].value_of(id)?)
    }
}

fn parse_unigram_table(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() < 4 {
        return Err(err("tplm: truncated unigram table header"));
    }
    let n = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let need = 4 + n * 4;
    if bytes.len() < need {
        return Err(err("tplm: truncated unigram table body"));
    }
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let p = 4 + i * 4;
        out.push(u32::from_le_bytes(bytes[p..p + 4].try_into().unwrap()));
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    use crate::arpa::parse_arpa;
    use crate::builder::build;

    fn open(text: &str, unk: &str) -> LanguageModel {
        let model = parse_arpa(text).unwrap();
        let artifacts = build(&model, unk, 16).unwrap();
        LanguageModel::open(
            MmapReader::from_bytes_for_test(artifacts.tdx),
            MmapReader::from_bytes_for_test(artifacts.trie),
            &artifacts.codebooks,
            &artifacts.unigram_pvals,
        )
        .unwrap()
    }

    /// spec.md §8 seed test 5.
    #[test]
    fn unigram_and_backoff_seed_case() {
        let text = "\\data\\\n\\1-grams:\n-5.0 <s>\n-1.0 a -0.3\n-2.0 b\n-4.0 </s>\n-9.0 <unk>\n\n\\2-grams:\n-0.3010299957 a b\n\n\\end\\\n";
        let lm = open(text, "<unk>");

        let a = lm.vocab().find("a").unwrap();
        let b = lm.vocab().find("b").unwrap();
        let unk = lm.vocab().find("<unk>").unwrap();

        let p_b_given_a = lm.word_prob(b, &[a]).unwrap();
        assert!((p_b_given_a - (0.5f32).log10()).abs() < 1e-5, "got {p_b_given_a}");

        let p_unk_given_a = lm.word_prob(unk, &[a]).unwrap();
        let expected = lm.oov_unigram_prob().unwrap() + -0.3f32;
        assert!((p_unk_given_a - expected).abs() < 1e-5, "got {p_unk_given_a}, expected {expected}");
    }

    #[test]
    fn empty_context_is_the_unigram_probability() {
        let text = "\\data\\\n\\1-grams:\n-1.0 a\n-9.0 <unk>\n\n\\end\\\n";
        let lm = open(text, "<unk>");
        let a = lm.vocab().find("a").unwrap();
        let (p, order) = lm.word_prob_with_depth(a, &[]).unwrap();
        assert_eq!(order, 1);
        assert_eq!(p, -1.0);
    }
}
