//! L5: the tightly packed word-alignment file (TPA), spec.md §3.8, §4.10,
//! §6.2. Line-indexed random access to per-sentence word-alignment sets,
//! each set packed as a run of TUI-encoded "alignment links"
//! (`(target_index+1) << 1 | is_last`, with `1` reserved for the empty set
//! -- spec.md §3.6's link scheme, reused verbatim here).
//!
//! The green-format text wire format this wraps is explicitly out of scope
//! (spec.md §1): callers hand `push_line` already-parsed per-source-token
//! target-index sets, and `get` returns the same shape back.

use tpt_base::{err, ioutil::MmapReader, Result};
use tpt_codec::{decode_alignment_link, encode_alignment_link, read_tui, write_tui};

pub const MAGIC: &[u8] = b"Portage tightly packed alignment track v1.0";
const MIDDLE_SUFFIX: &[u8] = b": end of data, beginning of index";
const FINAL_SUFFIX: &[u8] = b": end of index and file.";
const PARAM_BLOCK_WIDTH: usize = 4 + 8 + 8; // line_count:u32, index_start:i64, index_end:i64

fn marker(suffix: &[u8]) -> Vec<u8> {
    let mut m = MAGIC.to_vec();
    m.extend_from_slice(suffix);
    m
}

pub struct TpaWriter {
    out: Vec<u8>,
    starts: Vec<u64>,
}

impl TpaWriter {
    pub fn new() -> Self {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&[0u8; PARAM_BLOCK_WIDTH]); // stamped in `finish`
        TpaWriter { out, starts: Vec::new() }
    }

    /// Appends one sentence's alignment: one target-index set per source
    /// token, in source-token order.
    pub fn push_line(&mut self, sets: &[Vec<u32>]) {
        self.starts.push(self.out.len() as u64);
        for set in sets {
            if set.is_empty() {
                write_tui(&mut self.out, tpt_codec::EMPTY_SET_LINK);
                continue;
            }
            let last = set.len() - 1;
            for (i, &target) in set.iter().enumerate() {
                write_tui(&mut self.out, encode_alignment_link(target, i == last));
            }
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        let line_count = self.starts.len() as u32;
        let data_end = self.out.len() as u64;

        self.out.extend_from_slice(&marker(MIDDLE_SUFFIX));
        let index_start = self.out.len() as u64;
        for &s in &self.starts {
            self.out.extend_from_slice(&s.to_le_bytes());
        }
        self.out.extend_from_slice(&data_end.to_le_bytes());
        let index_end = self.out.len() as u64;
        self.out.extend_from_slice(&marker(FINAL_SUFFIX));

        let p = MAGIC.len();
        self.out[p..p + 4].copy_from_slice(&line_count.to_le_bytes());
        self.out[p + 4..p + 12].copy_from_slice(&(index_start as i64).to_le_bytes());
        self.out[p + 12..p + 20].copy_from_slice(&(index_end as i64).to_le_bytes());
        self.out
    }
}

impl Default for TpaWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// A memory-mapped `.tpa` file: `get(i)` is O(1) via the trailing index.
pub struct TpaReader {
    bytes: MmapReader,
    line_count: u32,
    index_start: usize,
}

impl TpaReader {
    pub fn parse(bytes: MmapReader) -> Result<Self> {
        let slice = bytes.as_slice();
        if slice.len() < MAGIC.len() + PARAM_BLOCK_WIDTH || &slice[..MAGIC.len()] != MAGIC {
            return Err(err("tpa: missing or mismatched header magic"));
        }
        let p = MAGIC.len();
        let line_count = u32::from_le_bytes(slice[p..p + 4].try_into().unwrap());
        let index_start = i64::from_le_bytes(slice[p + 4..p + 12].try_into().unwrap());
        let index_end = i64::from_le_bytes(slice[p + 12..p + 20].try_into().unwrap());
        if index_end < index_start || index_end - index_start != (line_count as i64 + 1) * 8 {
            return Err(err("tpa: index_end/index_start inconsistent with line_count"));
        }
        let (index_start, index_end) = (index_start as usize, index_end as usize);
        if slice.len() < index_end {
            return Err(err("tpa: file truncated before declared index end"));
        }

        let middle = marker(MIDDLE_SUFFIX);
        if index_start < middle.len() || slice[index_start - middle.len()..index_start] != middle[..] {
            return Err(err("tpa: missing middle marker before index"));
        }
        let fin = marker(FINAL_SUFFIX);
        if slice.len() < index_end + fin.len() || slice[index_end..index_end + fin.len()] != fin[..] {
            return Err(err("tpa: missing final marker after index"));
        }

        let data_start = p + PARAM_BLOCK_WIDTH;
        if line_count > 0 {
            let first_offset = u64::from_le_bytes(slice[index_start..index_start + 8].try_into().unwrap());
            if first_offset as usize != data_start {
                return Err(err("tpa: first line offset does not follow the parameter block"));
            }
        }

        Ok(TpaReader { bytes, line_count, index_start })
    }

    pub fn size(&self) -> u32 {
        self.line_count
    }

    fn index_entry(&self, i: u32) -> u64 {
        let pos = self.index_start + i as usize * 8;
        u64::from_le_bytes(self.bytes.as_slice()[pos..pos + 8].try_into().unwrap())
    }

    /// The per-source-token target-index sets for sentence `i`.
    pub fn get(&self, i: u32) -> Result<Vec<Vec<u32>>> {
        if i >= self.line_count {
            return Err(err("tpa: line index out of range"));
        }
        let start = self.index_entry(i) as usize;
        let end = self.index_entry(i + 1) as usize;
        let slice = self.bytes.as_slice();
        let mut pos = start;
        let mut sets = Vec::new();
        let mut cur = Vec::new();
        while pos < end {
            let (link, next) = read_tui(slice, pos)?;
            pos = next;
            let Some((target, is_last)) = decode_alignment_link(link) else {
                sets.push(Vec::new());
                continue;
            };
            cur.push(target);
            if is_last {
                sets.push(std::mem::take(&mut cur));
            }
        }
        Ok(sets)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    fn sets(rows: &[&[u32]]) -> Vec<Vec<u32>> {
        rows.iter().map(|r| r.to_vec()).collect()
    }

    /// spec.md §8 seed test 1: an 8-line file, asserting shape on line 3
    /// (0-indexed) of the 15-token sentence. "six empty sets" is taken as
    /// one sentence of six unaligned tokens (each an empty set), which is
    /// what keeps the 15-token sentence at index 3 as the assertions below
    /// require; an eighth trailing sentence pads the file out to the
    /// asserted `size() == 8`.
    #[test]
    fn seed_test_tpa_round_trip() {
        let mut w = TpaWriter::new();
        w.push_line(&sets(&[&[0, 1], &[3]]));
        w.push_line(&sets(&[&[], &[1, 2, 3], &[]]));
        w.push_line(&sets(&[&[], &[], &[], &[], &[], &[]]));
        w.push_line(&sets(&[
            &[0, 1],
            &[8],
            &[2],
            &[4, 5, 17],
            &[7],
            &[6, 10],
            &[6, 9],
            &[2, 3],
            &[11],
            &[12],
            &[13],
            &[14],
            &[17],
            &[15, 16],
            &[18],
        ]));
        w.push_line(&sets(&[&[0]; 17]));
        w.push_line(&sets(&[&[0]; 19]));
        w.push_line(&sets(&[&[0]; 21]));
        w.push_line(&sets(&[&[0]]));

        let bytes = MmapReader::from_bytes_for_test(w.finish());
        let reader = TpaReader::parse(bytes).unwrap();

        assert_eq!(reader.size(), 8);
        let line3 = reader.get(3).unwrap();
        assert_eq!(line3.len(), 15);
        assert_eq!(line3[0], vec![0, 1]);
        assert_eq!(line3[3], vec![4, 5, 17]);
        assert_eq!(line3[14], vec![18]);

        assert_eq!(reader.get(0).unwrap(), sets(&[&[0, 1], &[3]]));
        assert_eq!(reader.get(1).unwrap(), sets(&[&[], &[1, 2, 3], &[]]));
        assert_eq!(reader.get(2).unwrap(), sets(&[&[], &[], &[], &[], &[], &[]]));
    }

    #[test]
    fn empty_file_has_zero_lines() {
        let w = TpaWriter::new();
        let bytes = MmapReader::from_bytes_for_test(w.finish());
        let reader = TpaReader::parse(bytes).unwrap();
        assert_eq!(reader.size(), 0);
        assert!(reader.get(0).is_err());
    }

    #[test]
    fn corrupt_magic_is_rejected() {
        let w = TpaWriter::new();
        let mut bytes = w.finish();
        bytes[0] ^= 0xff;
        let mapped = MmapReader::from_bytes_for_test(bytes);
        assert!(TpaReader::parse(mapped).is_err());
    }
}
