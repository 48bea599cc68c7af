//! Layer 1 codecs shared by every tightly packed format: the tight
//! unsigned integer (TUI), the configurable bit-block value (BBV), the
//! tight-indexed pair (TIP) used for sorted `(key, offset)` lists, and the
//! cost-driven bit-block schema selection used when building codebooks.

mod alignlink;
mod bitblock;
mod scheme;
mod tip;
mod tui;

pub use alignlink::{decode_alignment_link, encode_alignment_link, ALIGNMENT_STREAM_TERMINATOR, EMPTY_SET_LINK};
pub use bitblock::{BitReader, BitWriter, Schema};
pub use scheme::{best_scheme, enumerate_schemes, EncodingScheme, DEFAULT_MAX_BLOCKS, EPSILON_BITS};
pub use tip::{
    binary_search_by_first, byte_role, entry_bounds_containing, read_tip, scan_back_to_terminal,
    write_tip,
};
pub use tui::{read_tui, tui_len, write_tui};
