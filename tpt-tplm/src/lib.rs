//! L4: the tightly packed back-off language model (TPLM), spec.md §3.7,
//! §4.9, §6.3.
//!
//! A TPLM is a trie keyed by *reverse* context token sequences (nearest
//! word first): the node reached by walking `context` holds, per
//! spec.md §3.7, a back-off weight for that context plus a sorted list of
//! `(predicted_token, probability)` pairs for every word actually observed
//! to continue it. Unigram probabilities -- context length zero -- live in
//! a flat top-level array instead of a trie node, since there is no
//! shorter context to back off from (spec.md §2's "top-level
//! token-indexed root").

mod arpa;
mod builder;
mod reader;

pub use arpa::{parse_arpa, ArpaEntry, ArpaModel};
pub use builder::{build, BuildArtifacts};
pub use reader::LanguageModel;
