//! Subcommand bodies for spec.md §6.3's `vocab_build`, `mmctrack_build`,
//! and `mmsufa_build`.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use tpt_base::{err, ioutil::MmapReader, Result};
use tpt_index::{TokenIndex, TokenIndexBuilder};
use tpt_suffix::{CorpusTrack, LeftToRight, RightToLeft};
use tracing::info;

fn read_stdin() -> Result<String> {
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .map_err(|e| err(format!("failed to read stdin: {e}")))?;
    Ok(text)
}

fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).map_err(|e| err(format!("failed to write {}: {e}", path.display())))
}

/// `vocab_build`: whitespace-tokenizes stdin, assigns ids by descending
/// frequency (ties broken alphabetically -- the same convention
/// `tpt_tppt`/`tpt_tplm` use for their own vocabularies), and writes a
/// `.tdx` token index.
pub fn vocab_build(out: &Path, unk: Option<&str>) -> Result<()> {
    let text = read_stdin()?;
    let mut freq: HashMap<&str, u64> = HashMap::new();
    for word in text.split_whitespace() {
        *freq.entry(word).or_insert(0) += 1;
    }
    if let Some(u) = unk {
        freq.entry(u).or_insert(0);
    }
    let words = sort_by_frequency(&freq);

    let mut builder = TokenIndexBuilder::new();
    let mut ids = HashMap::with_capacity(words.len());
    for w in &words {
        let id = builder.push(*w);
        ids.insert(*w, id);
    }
    if let Some(u) = unk {
        builder.set_unknown(ids[u]);
    }

    let mut bytes = Vec::new();
    builder.serialize_into(&mut bytes);
    write(out, &bytes)?;
    info!(vocab_size = words.len(), out = %out.display(), "vocab_build: done");
    Ok(())
}

/// `mmctrack_build`: maps whitespace-tokenized stdin through `tdx` and
/// writes a packed `.mct` corpus track.
pub fn mmctrack_build(tdx: &Path, out: &Path) -> Result<()> {
    let vocab = TokenIndex::parse(MmapReader::open(tdx)?, 0)?;
    let text = read_stdin()?;
    let bytes = tpt_tpsa::build_corpus_track(&vocab, text.lines())?;
    write(out, &bytes)?;
    info!(out = %out.display(), "mmctrack_build: done");
    Ok(())
}

/// `mmsufa_build`: builds a `.msa` suffix (`ltr`) or prefix (`rtl`) array
/// over an already-built corpus track. `vocab_size` bounds the array's
/// top-level group index (spec.md §3.9); when not given, it defaults to
/// one past the highest token id actually observed in the corpus.
pub fn mmsufa_build(mct: &Path, out: &Path, order: &str, vocab_size: Option<u32>) -> Result<()> {
    let corpus = CorpusTrack::parse(MmapReader::open(mct)?)?;
    let vocab_size = match vocab_size {
        Some(v) => v,
        None => max_token_id(&corpus) + 1,
    };

    let bytes = match order {
        "ltr" => tpt_tpsa::build_suffix_array(&corpus, &LeftToRight, vocab_size),
        "rtl" => tpt_tpsa::build_suffix_array(&corpus, &RightToLeft, vocab_size),
        other => return Err(err(format!("mmsufa_build: unknown --order {other:?} (expected ltr or rtl)"))),
    };
    write(out, &bytes)?;
    info!(out = %out.display(), order, vocab_size, "mmsufa_build: done");
    Ok(())
}

fn max_token_id(corpus: &CorpusTrack) -> u32 {
    let mut max = 0u32;
    for sid in 0..corpus.num_sentences() {
        let (start, end) = corpus.sentence_bounds(sid);
        for pos in start..end {
            max = max.max(corpus.token_at(pos));
        }
    }
    max
}

/// Descending by count, ties broken alphabetically -- the same convention
/// `tpt_tppt`/`tpt_tplm` use for their own vocabularies.
fn sort_by_frequency<'a>(freq: &HashMap<&'a str, u64>) -> Vec<&'a str> {
    let mut words: Vec<&str> = freq.keys().copied().collect();
    words.sort_by(|a, b| freq[b].cmp(&freq[a]).then_with(|| a.cmp(b)));
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_by_descending_frequency() {
        let mut freq = HashMap::new();
        freq.insert("the", 5u64);
        freq.insert("cat", 2);
        freq.insert("sat", 1);
        assert_eq!(sort_by_frequency(&freq), vec!["the", "cat", "sat"]);
    }

    #[test]
    fn breaks_ties_alphabetically() {
        let mut freq = HashMap::new();
        freq.insert("banana", 3u64);
        freq.insert("apple", 3);
        freq.insert("cherry", 1);
        assert_eq!(sort_by_frequency(&freq), vec!["apple", "banana", "cherry"]);
    }
}
