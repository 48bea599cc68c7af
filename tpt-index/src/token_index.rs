//! Token index (tdx): spec.md §3.2. A memory-mapped, alphabetically
//! sorted string dictionary giving `string -> id` in `O(log V)` by binary
//! search and `id -> string` in `O(1)` once a reverse table has been
//! materialized on first use.

use std::sync::OnceLock;

use tpt_base::{err, ioutil::MmapReader, Result};

const HEADER_WIDTH: usize = 8; // num_tokens:u32, unk_id:u32
const ENTRY_WIDTH: usize = 8; // offset_into_strings:u32, id:u32

pub struct TokenIndexBuilder {
    strings: Vec<String>,
    unk_id: Option<u32>,
}

impl TokenIndexBuilder {
    pub fn new() -> Self {
        TokenIndexBuilder { strings: Vec::new(), unk_id: None }
    }

    /// Inserts `s`, returning its id. Does not deduplicate -- callers that
    /// want a string -> id map during building should keep their own.
    pub fn push(&mut self, s: impl Into<String>) -> u32 {
        let id = self.strings.len() as u32;
        self.strings.push(s.into());
        id
    }

    pub fn set_unknown(&mut self, id: u32) {
        self.unk_id = Some(id);
    }

    pub fn len(&self) -> u32 {
        self.strings.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn string(&self, id: u32) -> &str {
        &self.strings[id as usize]
    }

    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        let v = self.strings.len() as u32;
        let unk_id = self.unk_id.unwrap_or(v);
        out.extend_from_slice(&v.to_le_bytes());
        out.extend_from_slice(&unk_id.to_le_bytes());

        let mut order: Vec<u32> = (0..v).collect();
        order.sort_by(|&a, &b| self.strings[a as usize].cmp(&self.strings[b as usize]));

        let mut offsets = Vec::with_capacity(order.len());
        let mut cur = 0u32;
        for &id in &order {
            offsets.push(cur);
            cur += self.strings[id as usize].len() as u32 + 1;
        }
        for (k, &id) in order.iter().enumerate() {
            out.extend_from_slice(&offsets[k].to_le_bytes());
            out.extend_from_slice(&id.to_le_bytes());
        }
        for &id in &order {
            out.extend_from_slice(self.strings[id as usize].as_bytes());
            out.push(0);
        }
    }
}

impl Default for TokenIndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A read view over a serialized token index. `base` lets this structure be
/// embedded as a block inside a larger file (e.g. a TPPT with src+trg
/// indices back to back).
#[derive(Clone)]
pub struct TokenIndex {
    bytes: MmapReader,
    base: usize,
    num_tokens: u32,
    unk_id: u32,
    strings_start: usize,
    reverse: std::sync::Arc<OnceLock<Vec<u32>>>,
}

impl TokenIndex {
    pub fn parse(bytes: MmapReader, base: usize) -> Result<Self> {
        let slice = bytes.as_slice();
        if slice.len() < base + HEADER_WIDTH {
            return Err(err("token index: truncated header"));
        }
        let num_tokens = read_u32(slice, base)?;
        let unk_id = read_u32(slice, base + 4)?;
        let strings_start = base + HEADER_WIDTH + num_tokens as usize * ENTRY_WIDTH;
        if slice.len() < strings_start {
            return Err(err("token index: truncated entries table"));
        }
        // Every entry's string must be an in-bounds, null-terminated, valid
        // UTF-8 run -- checked once here so `string_at_offset` never has to
        // fail later on a corrupt file (spec.md: format errors are fatal
        // and must wrap a sentence describing the violated invariant).
        for i in 0..num_tokens {
            let pos = base + HEADER_WIDTH + i as usize * ENTRY_WIDTH;
            let offset = read_u32(slice, pos)?;
            let start = strings_start + offset as usize;
            let rest = slice
                .get(start..)
                .ok_or_else(|| err("token index: string offset out of bounds"))?;
            let len = memchr::memchr(0, rest).ok_or_else(|| err("token index: unterminated string"))?;
            std::str::from_utf8(&rest[..len]).map_err(|e| err(format!("token index: non-utf8 string: {e}")))?;
        }
        Ok(TokenIndex {
            bytes,
            base,
            num_tokens,
            unk_id,
            strings_start,
            reverse: std::sync::Arc::new(OnceLock::new()),
        })
    }

    pub fn num_tokens(&self) -> u32 {
        self.num_tokens
    }

    pub fn unk_id(&self) -> Option<u32> {
        if self.unk_id == self.num_tokens {
            None
        } else {
            Some(self.unk_id)
        }
    }

    fn entry(&self, i: u32) -> (u32, u32) {
        let slice = self.bytes.as_slice();
        let pos = self.base + HEADER_WIDTH + i as usize * ENTRY_WIDTH;
        let offset = u32::from_le_bytes(slice[pos..pos + 4].try_into().unwrap());
        let id = u32::from_le_bytes(slice[pos + 4..pos + 8].try_into().unwrap());
        (offset, id)
    }

    /// `parse` already validated that every entry's offset names an
    /// in-bounds, null-terminated, valid UTF-8 run, so this never fails in
    /// practice; entries not reachable through `parse` (there are none) are
    /// the only way this invariant could be violated.
    fn string_at_offset(&self, offset: u32) -> &str {
        let slice = self.bytes.as_slice();
        let start = self.strings_start + offset as usize;
        let len = memchr::memchr(0, &slice[start..]).expect("token index: unterminated string");
        std::str::from_utf8(&slice[start..start + len]).expect("token index: non-utf8 string")
    }

    /// Binary search by the referenced string, `O(log V)`.
    pub fn find(&self, s: &str) -> Option<u32> {
        let mut lo = 0u32;
        let mut hi = self.num_tokens;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (offset, id) = self.entry(mid);
            match self.string_at_offset(offset).cmp(s) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Some(id),
            }
        }
        None
    }

    fn reverse_table(&self) -> &[u32] {
        self.reverse.get_or_init(|| {
            let mut table = vec![0u32; self.num_tokens as usize];
            for i in 0..self.num_tokens {
                let (offset, id) = self.entry(i);
                table[id as usize] = offset;
            }
            table
        })
    }

    /// `id -> string`, `O(1)` after the reverse table has been built once.
    pub fn string_of(&self, id: u32) -> Result<&str> {
        if id >= self.num_tokens {
            return Err(err("token index: id out of range"));
        }
        let offset = self.reverse_table()[id as usize];
        Ok(self.string_at_offset(offset))
    }
}

fn read_u32(buf: &[u8], pos: usize) -> Result<u32> {
    buf.get(pos..pos + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| err("token index: truncated buffer"))
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    fn build(words: &[&str]) -> TokenIndex {
        let mut b = TokenIndexBuilder::new();
        for w in words {
            b.push(*w);
        }
        let mut buf = Vec::new();
        b.serialize_into(&mut buf);
        let mapped = MmapReader::from_bytes_for_test(buf);
        TokenIndex::parse(mapped, 0).unwrap()
    }

    #[test]
    fn entries_sorted_and_ids_are_a_permutation() {
        let idx = build(&["banana", "apple", "cherry"]);
        assert_eq!(idx.num_tokens(), 3);
        assert_eq!(idx.find("apple"), Some(1));
        assert_eq!(idx.find("banana"), Some(0));
        assert_eq!(idx.find("cherry"), Some(2));
        assert_eq!(idx.find("durian"), None);
    }

    #[test]
    fn reverse_lookup_matches_original_ids() {
        let idx = build(&["zebra", "apple", "mango"]);
        for id in 0..idx.num_tokens() {
            let s = idx.string_of(id).unwrap().to_string();
            assert_eq!(idx.find(&s), Some(id));
        }
    }

    #[test]
    fn unknown_id_defaults_to_vocab_size() {
        let idx = build(&["a", "b"]);
        assert_eq!(idx.unk_id(), None);
    }

    #[test]
    fn corrupt_string_offset_is_rejected_at_parse_not_a_panic() {
        let mut b = TokenIndexBuilder::new();
        b.push("apple");
        b.push("banana");
        let mut buf = Vec::new();
        b.serialize_into(&mut buf);
        // Point the first entry's string offset past the end of the file.
        let entry_pos = HEADER_WIDTH;
        let corrupt = (buf.len() as u32 + 1000).to_le_bytes();
        buf[entry_pos..entry_pos + 4].copy_from_slice(&corrupt);
        let mapped = MmapReader::from_bytes_for_test(buf);
        assert!(TokenIndex::parse(mapped, 0).is_err());
    }

    #[test]
    fn truncated_string_missing_terminator_is_rejected() {
        let mut b = TokenIndexBuilder::new();
        b.push("apple");
        let mut buf = Vec::new();
        b.serialize_into(&mut buf);
        buf.pop(); // drop the trailing null terminator
        let mapped = MmapReader::from_bytes_for_test(buf);
        assert!(TokenIndex::parse(mapped, 0).is_err());
    }

    #[test]
    fn explicit_unknown_id_is_preserved() {
        let mut b = TokenIndexBuilder::new();
        b.push("a");
        b.push("<unk>");
        b.set_unknown(1);
        let mut buf = Vec::new();
        b.serialize_into(&mut buf);
        let mapped = MmapReader::from_bytes_for_test(buf);
        let idx = TokenIndex::parse(mapped, 0).unwrap();
        assert_eq!(idx.unk_id(), Some(1));
    }
}
