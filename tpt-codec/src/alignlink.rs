//! Alignment link: spec.md §3.6's per-source-token packed word-alignment
//! entry, shared verbatim by TPPT candidate payloads (§3.6) and the TPA
//! word-alignment file (§3.8, which names §3.6's scheme directly rather
//! than defining its own).
//!
//! A source token's alignment set is a sequence of links, one per aligned
//! target index, with the last link in the set flagged; an empty set is the
//! single reserved value `1` (which cannot arise from a real link, since
//! `target_index + 1 >= 1` is shifted left by one bit before the flag is
//! OR'd in). A TPPT candidate's whole alignment stream (one or more sets)
//! is itself terminated by a distinct reserved value, `0`, so a reader
//! sharing one unaligned bitstream across candidates (spec.md §3.6) knows
//! where this candidate's alignment ends without mistaking an in-stream
//! empty-set marker for the end of the stream.

/// Reserved value meaning "this source token aligns to nothing".
pub const EMPTY_SET_LINK: u64 = 1;

/// Reserved value terminating a candidate's whole alignment-link stream,
/// distinct from [`EMPTY_SET_LINK`].
pub const ALIGNMENT_STREAM_TERMINATOR: u64 = 0;

/// Packs one non-empty alignment entry.
pub fn encode_alignment_link(target_index: u32, is_last: bool) -> u64 {
    ((target_index as u64 + 1) << 1) | is_last as u64
}

/// `None` for the empty-set sentinel, else `(target_index, is_last)`.
pub fn decode_alignment_link(link: u64) -> Option<(u32, bool)> {
    if link == EMPTY_SET_LINK {
        return None;
    }
    let is_last = link & 1 != 0;
    let target_plus_one = (link >> 1) as u32;
    Some((target_plus_one - 1, is_last))
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn empty_set_round_trips_to_none() {
        assert_eq!(decode_alignment_link(EMPTY_SET_LINK), None);
    }

    #[test]
    fn terminator_is_distinct_from_the_empty_set_sentinel() {
        assert_ne!(ALIGNMENT_STREAM_TERMINATOR, EMPTY_SET_LINK);
    }

    #[test]
    fn nonempty_links_round_trip() {
        for target in [0u32, 1, 7, 4095] {
            for is_last in [false, true] {
                let link = encode_alignment_link(target, is_last);
                assert_ne!(link, EMPTY_SET_LINK);
                assert_eq!(decode_alignment_link(link), Some((target, is_last)));
            }
        }
    }
}
