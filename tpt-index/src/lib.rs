//! Layer 2: the codebook, token index, and sequence repository structures
//! shared by every tightly packed format built on top of them.

mod codebook;
mod root_index;
mod seqrepo;
mod token_index;

pub use codebook::{Codebook, CodebookBuilder, CodebookSet, Value};
pub use root_index::{RootIndex, RootIndexBuilder, ENTRY_WIDTH as ROOT_INDEX_ENTRY_WIDTH};
pub use seqrepo::{SequenceRepository, SequenceRepositoryBuilder};
pub use token_index::{TokenIndex, TokenIndexBuilder};
