//! Layer 3's other shared structure (alongside `tpt-trie`): the packed
//! corpus track and the generic suffix/token-sequence array core (spec.md
//! §3.9, §4.7) that both TPSA (`tpt-tpsa`) and any future prefix-array
//! consumer build on.

pub mod ctrack;
pub mod order;
pub mod sarray;

pub use ctrack::{CorpusTrack, CorpusTrackBuilder};
pub use order::{cmp_one, cmp_prefix, compare_full, LeftToRight, RightToLeft, TokenOrder};
pub use sarray::{SuffixArrayBuilder, SuffixArrayReader, TreeIterator};
