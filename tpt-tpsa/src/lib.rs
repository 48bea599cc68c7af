//! L5: corpus track (`.mct`) and suffix array (`.msa`) file assembly,
//! spec.md §3.9, §6.3's `mmctrack_build`/`mmsufa_build` programs. The wire
//! formats themselves live in `tpt-suffix`; this crate is the glue that
//! turns whitespace-tokenized text plus a token index into those files, and
//! a convenience type bundling the three mmaps a caller needs open at once.

use tpt_base::{ioutil::MmapReader, Result};
use tpt_index::TokenIndex;
use tpt_suffix::{CorpusTrack, CorpusTrackBuilder, SuffixArrayBuilder, SuffixArrayReader, TokenOrder};

/// Builds a `.mct` corpus track from whitespace-tokenized lines, mapping
/// each word through `vocab`. Out-of-vocabulary words fall back to
/// `vocab`'s `<unk>` id if one is configured, else the line is rejected.
pub fn build_corpus_track<'a>(vocab: &TokenIndex, lines: impl Iterator<Item = &'a str>) -> Result<Vec<u8>> {
    let mut builder = CorpusTrackBuilder::new();
    for line in lines {
        let mut ids = Vec::new();
        for word in line.split_whitespace() {
            let id = match vocab.find(word) {
                Some(id) => id,
                None => vocab
                    .unk_id()
                    .ok_or_else(|| tpt_base::err(format!("mmctrack_build: out-of-vocabulary word {word:?}")))?,
            };
            ids.push(id);
        }
        builder.push_sentence(ids);
    }
    Ok(builder.build())
}

/// Builds a `.msa` suffix (or prefix, depending on `order`) array over an
/// already-built corpus track.
pub fn build_suffix_array<O: TokenOrder>(corpus: &CorpusTrack, order: &O, vocab_size: u32) -> Vec<u8> {
    SuffixArrayBuilder::build(corpus, order, vocab_size)
}

/// The three mmaps a suffix-array query needs open together: the token
/// dictionary (for turning query words into ids), the corpus track (for
/// resolving hits back to sentence text), and the array itself.
#[derive(Clone)]
pub struct TpSuffixArray<O: TokenOrder> {
    vocab: TokenIndex,
    corpus: CorpusTrack,
    array: SuffixArrayReader<O>,
}

impl<O: TokenOrder> TpSuffixArray<O> {
    pub fn open(vocab_bytes: MmapReader, corpus_bytes: MmapReader, array_bytes: MmapReader, order: O) -> Result<Self> {
        let vocab = TokenIndex::parse(vocab_bytes, 0)?;
        let corpus = CorpusTrack::parse(corpus_bytes)?;
        let array = SuffixArrayReader::parse(array_bytes, corpus.clone(), order)?;
        Ok(TpSuffixArray { vocab, corpus, array })
    }

    pub fn vocab(&self) -> &TokenIndex {
        &self.vocab
    }

    pub fn corpus(&self) -> &CorpusTrack {
        &self.corpus
    }

    pub fn array(&self) -> &SuffixArrayReader<O> {
        &self.array
    }

    /// Resolves a whitespace-tokenized phrase to ids and runs `lower_bound`
    /// / `upper_bound`, returning `None` if any word is out of vocabulary.
    pub fn find_span(&self, phrase: &str) -> Option<(usize, usize)> {
        let mut ids = Vec::new();
        for word in phrase.split_whitespace() {
            ids.push(self.vocab.find(word)?);
        }
        let lo = self.array.lower_bound(&ids)?;
        let hi = self.array.upper_bound(&ids)?;
        Some((lo, hi))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;
    use tpt_index::TokenIndexBuilder;
    use tpt_suffix::LeftToRight;

    fn build_vocab() -> TokenIndex {
        let mut b = TokenIndexBuilder::new();
        b.push("a");
        b.push("b");
        b.push("c");
        b.push("<unk>");
        b.set_unknown(3);
        let mut buf = Vec::new();
        b.serialize_into(&mut buf);
        TokenIndex::parse(MmapReader::from_bytes_for_test(buf), 0).unwrap()
    }

    #[test]
    fn build_and_query_round_trip() {
        let vocab = build_vocab();
        let lines = vec!["a b c", "a b", "c a b"];
        let ctrack_bytes = build_corpus_track(&vocab, lines.into_iter()).unwrap();
        let corpus = CorpusTrack::parse(MmapReader::from_bytes_for_test(ctrack_bytes.clone())).unwrap();

        let sa_bytes = build_suffix_array(&corpus, &LeftToRight, vocab.num_tokens());

        let vocab_bytes = {
            let mut b = TokenIndexBuilder::new();
            b.push("a");
            b.push("b");
            b.push("c");
            b.push("<unk>");
            b.set_unknown(3);
            let mut buf = Vec::new();
            b.serialize_into(&mut buf);
            buf
        };

        let tpsa = TpSuffixArray::open(
            MmapReader::from_bytes_for_test(vocab_bytes),
            MmapReader::from_bytes_for_test(ctrack_bytes),
            MmapReader::from_bytes_for_test(sa_bytes),
            LeftToRight,
        )
        .unwrap();

        let (lo, hi) = tpsa.find_span("a b").unwrap();
        assert_eq!(tpsa.array().raw_count(lo, hi).unwrap(), 2);

        assert!(tpsa.find_span("zzz").is_none());
    }

    #[test]
    fn out_of_vocabulary_word_without_unk_is_rejected() {
        let mut b = TokenIndexBuilder::new();
        b.push("a");
        let mut buf = Vec::new();
        b.serialize_into(&mut buf);
        let vocab = TokenIndex::parse(MmapReader::from_bytes_for_test(buf), 0).unwrap();

        let lines = vec!["a zzz"];
        assert!(build_corpus_track(&vocab, lines.into_iter()).is_err());
    }
}
