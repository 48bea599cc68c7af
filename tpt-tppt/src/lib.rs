//! L4: the tightly packed phrase table (TPPT), spec.md §3.6, §4.8, §6.3.
//!
//! A TPPT groups phrase-table rows by source phrase into a tightly packed
//! trie (see [`tpt_trie`]) keyed on source-token IDs, with each accepting
//! node's payload holding every candidate translation for that source
//! phrase: a reference into the target sequence repository, per-column
//! codebook-compressed scores and counts, and (optionally) word
//! alignments, packed per spec.md §3.6 (see [`payload`]).

mod builder;
mod config;
mod introspect;
mod payload;
mod reader;
mod text;

pub use builder::{build, BuildArtifacts};
pub use config::{bits_for_count, TppConfig, FORMAT_VERSION};
pub use introspect::{check_file_exists, num_scores, total_memmap_size};
pub use payload::{decode_payload, encode_payload, flatten_alignment, DecodedCandidate, EncodedCandidate};
pub use reader::{Candidate, PhraseTable};
pub use text::{parse_line, TextRow};
