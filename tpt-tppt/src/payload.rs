//! Per-candidate TPPT node payload: spec.md §3.6. A `num_candidates` TUI
//! prefix, then one bit-packed stream (not realigned to a byte boundary
//! between candidates) holding, per candidate in row order: the
//! target-phrase reference, each float-score column, each count column,
//! and (if the table carries alignments) a run of alignment links
//! terminated by the dedicated end-of-stream sentinel, `0`, read until
//! consumed (spec.md §3.6, §3.8, §1's "read until an encoded `0` sentinel
//! is consumed"; [`tpt_codec::encode_alignment_link`]). That `0` is
//! distinct from the per-source-token empty-set marker `1`
//! ([`tpt_codec::EMPTY_SET_LINK`]), which can occur any number of times
//! inside the stream before the terminator.

use tpt_base::Result;
use tpt_codec::{decode_alignment_link, encode_alignment_link, read_tui, write_tui, BitReader, BitWriter, Schema};
use tpt_index::{Codebook, Value};

/// One already-resolved candidate, ready for [`encode_payload`]: codebook
/// IDs have already been looked up, and alignment links have already been
/// flattened into `(source_index, target_index, is_last)` triples via
/// [`flatten_alignment`].
pub struct EncodedCandidate {
    pub target_ref_id: u32,
    pub float_ids: Vec<u32>,
    pub count_ids: Vec<u32>,
    pub alignment_links: Option<Vec<u64>>,
}

/// Flattens a per-source-token alignment (one target-index set per source
/// position) into the link stream spec.md §3.6 describes: nonempty sets
/// emit one link per member with the last member flagged, empty sets emit
/// the shared empty-set sentinel.
pub fn flatten_alignment(sets: &[Vec<u32>]) -> Vec<u64> {
    let mut links = Vec::new();
    for set in sets {
        if set.is_empty() {
            links.push(tpt_codec::EMPTY_SET_LINK);
            continue;
        }
        let last = set.len() - 1;
        for (i, &target) in set.iter().enumerate() {
            links.push(encode_alignment_link(target, i == last));
        }
    }
    links
}

fn unflatten_alignment(links: &[u64]) -> Vec<Vec<u32>> {
    let mut sets = Vec::new();
    let mut cur = Vec::new();
    for &link in links {
        match decode_alignment_link(link) {
            None => sets.push(Vec::new()),
            Some((target, is_last)) => {
                cur.push(target);
                if is_last {
                    sets.push(std::mem::take(&mut cur));
                }
            }
        }
    }
    sets
}

pub fn encode_payload(
    candidates: &[EncodedCandidate],
    target_ref_schema: &Schema,
    float_books: &[Codebook],
    count_book: Option<&Codebook>,
    alignment_book: Option<&Codebook>,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_tui(&mut out, candidates.len() as u64);

    let mut w = BitWriter::new();
    for c in candidates {
        w.write_value(target_ref_schema, c.target_ref_id as u128)?;
        for (&id, book) in c.float_ids.iter().zip(float_books) {
            book.encode_id(&mut w, id)?;
        }
        if let Some(book) = count_book {
            for &id in &c.count_ids {
                book.encode_id(&mut w, id)?;
            }
        }
        if let Some(book) = alignment_book {
            if let Some(links) = &c.alignment_links {
                for &link in links {
                    let id = book.id_of(Value::UInt(link as u32))?;
                    book.encode_id(&mut w, id)?;
                }
            }
            let terminator_id = book.id_of(Value::UInt(tpt_codec::ALIGNMENT_STREAM_TERMINATOR as u32))?;
            book.encode_id(&mut w, terminator_id)?;
        }
    }
    out.extend_from_slice(&w.into_bytes());
    Ok(out)
}

pub struct DecodedCandidate {
    pub target_ref_id: u32,
    pub float_values: Vec<Value>,
    pub counts: Vec<u32>,
    pub alignment: Option<Vec<Vec<u32>>>,
}

pub fn decode_payload(
    bytes: &[u8],
    target_ref_schema: &Schema,
    float_books: &[Codebook],
    count_book: Option<&Codebook>,
    num_count_columns: usize,
    alignment_book: Option<&Codebook>,
) -> Result<Vec<DecodedCandidate>> {
    let (num_candidates, bit_start) = read_tui(bytes, 0)?;
    let mut r = BitReader::new(bytes, bit_start as u64 * 8);
    let mut out = Vec::with_capacity(num_candidates as usize);
    for _ in 0..num_candidates {
        let target_ref_id = r.read_value(target_ref_schema)? as u32;

        let mut float_values = Vec::with_capacity(float_books.len());
        for book in float_books {
            let id = book.decode_id(&mut r)?;
            float_values.push(book.value_of(id)?);
        }

        let mut counts = Vec::with_capacity(num_count_columns);
        if let Some(book) = count_book {
            for _ in 0..num_count_columns {
                let id = book.decode_id(&mut r)?;
                match book.value_of(id)? {
                    Value::UInt(u) => counts.push(u),
                    Value::Float(_) => return Err(tpt_base::err("tppt: count book produced a float value")),
                }
            }
        }

        let alignment = if let Some(book) = alignment_book {
            let mut links = Vec::new();
            loop {
                let id = book.decode_id(&mut r)?;
                let v = match book.value_of(id)? {
                    Value::UInt(u) => u as u64,
                    Value::Float(_) => return Err(tpt_base::err("tppt: alignment book produced a float value")),
                };
                if v == tpt_codec::ALIGNMENT_STREAM_TERMINATOR {
                    break;
                }
                links.push(v);
            }
            Some(unflatten_alignment(&links))
        } else {
            None
        };

        out.push(DecodedCandidate { target_ref_id, float_values, counts, alignment });
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;
    use tpt_index::CodebookBuilder;

    #[test]
    fn round_trips_without_alignments() {
        let target_ref_schema = Schema::new(vec![4]).unwrap();

        let mut fb = CodebookBuilder::new_float();
        fb.observe(Value::Float(1.0));
        fb.observe(Value::Float(0.5));
        let float_book = fb.build(5).unwrap();

        let cand = EncodedCandidate {
            target_ref_id: 3,
            float_ids: vec![float_book.id_of(Value::Float(0.5)).unwrap()],
            count_ids: vec![],
            alignment_links: None,
        };
        let bytes = encode_payload(&[cand], &target_ref_schema, &[float_book.clone()], None, None).unwrap();
        let decoded = decode_payload(&bytes, &target_ref_schema, &[float_book], None, 0, None).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].target_ref_id, 3);
        assert_eq!(decoded[0].float_values, vec![Value::Float(0.5)]);
    }

    #[test]
    fn round_trips_with_alignment_sets_including_empty_ones() {
        let target_ref_schema = Schema::new(vec![3]).unwrap();
        let sets = vec![vec![0u32, 1], vec![], vec![2]];
        let links = flatten_alignment(&sets);

        let mut ab = CodebookBuilder::new_uint();
        ab.observe(Value::UInt(tpt_codec::EMPTY_SET_LINK as u32));
        ab.observe(Value::UInt(tpt_codec::ALIGNMENT_STREAM_TERMINATOR as u32));
        for &l in &links {
            ab.observe(Value::UInt(l as u32));
        }
        let alignment_book = ab.build(5).unwrap();

        let cand = EncodedCandidate {
            target_ref_id: 1,
            float_ids: vec![],
            count_ids: vec![],
            alignment_links: Some(links),
        };
        let bytes = encode_payload(&[cand], &target_ref_schema, &[], None, Some(&alignment_book)).unwrap();
        let decoded = decode_payload(&bytes, &target_ref_schema, &[], None, 0, Some(&alignment_book)).unwrap();
        assert_eq!(decoded[0].alignment, Some(sets));
    }

    /// An embedded empty-set marker (value `1`) must not be mistaken for the
    /// stream terminator (value `0`): a second candidate sharing the
    /// bitstream must decode correctly past the first candidate's
    /// mid-stream empty set.
    #[test]
    fn embedded_empty_set_does_not_terminate_the_stream_early() {
        let target_ref_schema = Schema::new(vec![3]).unwrap();
        let sets_a = vec![vec![], vec![0u32]];
        let sets_b = vec![vec![1u32]];
        let links_a = flatten_alignment(&sets_a);
        let links_b = flatten_alignment(&sets_b);

        let mut ab = CodebookBuilder::new_uint();
        ab.observe(Value::UInt(tpt_codec::EMPTY_SET_LINK as u32));
        ab.observe(Value::UInt(tpt_codec::ALIGNMENT_STREAM_TERMINATOR as u32));
        for &l in links_a.iter().chain(&links_b) {
            ab.observe(Value::UInt(l as u32));
        }
        let alignment_book = ab.build(5).unwrap();

        let candidates = vec![
            EncodedCandidate { target_ref_id: 0, float_ids: vec![], count_ids: vec![], alignment_links: Some(links_a) },
            EncodedCandidate { target_ref_id: 1, float_ids: vec![], count_ids: vec![], alignment_links: Some(links_b) },
        ];
        let bytes = encode_payload(&candidates, &target_ref_schema, &[], None, Some(&alignment_book)).unwrap();
        let decoded = decode_payload(&bytes, &target_ref_schema, &[], None, 0, Some(&alignment_book)).unwrap();
        assert_eq!(decoded[0].alignment, Some(sets_a));
        assert_eq!(decoded[1].target_ref_id, 1);
        assert_eq!(decoded[1].alignment, Some(sets_b));
    }

    #[test]
    fn multiple_candidates_share_one_bitstream() {
        let target_ref_schema = Schema::new(vec![5]).unwrap();
        let mut fb = CodebookBuilder::new_float();
        fb.observe(Value::Float(0.1));
        fb.observe(Value::Float(0.9));
        let book = fb.build(5).unwrap();

        let candidates: Vec<EncodedCandidate> = (0..5u32)
            .map(|i| EncodedCandidate {
                target_ref_id: i,
                float_ids: vec![book.id_of(if i % 2 == 0 { Value::Float(0.1) } else { Value::Float(0.9) }).unwrap()],
                count_ids: vec![],
                alignment_links: None,
            })
            .collect();
        let bytes = encode_payload(&candidates, &target_ref_schema, &[book.clone()], None, None).unwrap();
        let decoded = decode_payload(&bytes, &target_ref_schema, &[book], None, 0, None).unwrap();
        assert_eq!(decoded.len(), 5);
        for (i, d) in decoded.iter().enumerate() {
            assert_eq!(d.target_ref_id, i as u32);
        }
    }
}
