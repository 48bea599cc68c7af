//! Root index: a fixed-width `(offset: u64, flags: u8)` array keyed by
//! token ID, per spec.md §3.5. Shared by the tightly packed trie's
//! top-level lookup and the sequence repository's `.idx` (spec.md §3.4
//! points back at §3.5's layout for exactly this reason), so it lives at
//! this layer rather than being duplicated in `tpt-trie`.

use tpt_base::{err, ioutil::MmapReader, Result};

pub const ENTRY_WIDTH: usize = 9; // 8-byte offset + 1-byte flags

#[derive(Default, Clone, Debug)]
pub struct RootIndexBuilder {
    entries: Vec<(u64, u8)>,
}

impl RootIndexBuilder {
    pub fn new(num_tokens: usize) -> Self {
        RootIndexBuilder { entries: vec![(0, 0); num_tokens] }
    }

    pub fn set(&mut self, token_id: u32, offset: u64, flags: u8) {
        self.entries[token_id as usize] = (offset, flags);
    }

    pub fn num_tokens(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        for &(offset, flags) in &self.entries {
            out.extend_from_slice(&offset.to_le_bytes());
            out.push(flags);
        }
    }
}

/// A read view over a serialized root index, typically a slice of a larger
/// memory-mapped file (hence the `base` byte offset).
#[derive(Clone)]
pub struct RootIndex {
    bytes: MmapReader,
    base: usize,
    num_tokens: u32,
}

impl RootIndex {
    pub fn parse(bytes: MmapReader, base: usize, num_tokens: u32) -> Result<Self> {
        let needed = base + num_tokens as usize * ENTRY_WIDTH;
        if bytes.len() < needed {
            return Err(err("root index: buffer shorter than num_tokens * entry width"));
        }
        Ok(RootIndex { bytes, base, num_tokens })
    }

    pub fn num_tokens(&self) -> u32 {
        self.num_tokens
    }

    /// `None` if there is no top-level entry for `token_id` (offset == 0).
    pub fn get(&self, token_id: u32) -> Option<(u64, u8)> {
        if token_id >= self.num_tokens {
            return None;
        }
        let pos = self.base + token_id as usize * ENTRY_WIDTH;
        let slice = self.bytes.as_slice();
        let offset = u64::from_le_bytes(slice[pos..pos + 8].try_into().unwrap());
        let flags = slice[pos + 8];
        if offset == 0 {
            None
        } else {
            Some((offset, flags))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn round_trips_through_mmap() {
        let mut builder = RootIndexBuilder::new(4);
        builder.set(0, 10, 0b01);
        builder.set(2, 99, 0b11);
        let mut buf = Vec::new();
        builder.serialize_into(&mut buf);
        let mapped = MmapReader::from_bytes_for_test(buf);
        let idx = RootIndex::parse(mapped, 0, 4).unwrap();
        assert_eq!(idx.get(0), Some((10, 0b01)));
        assert_eq!(idx.get(1), None);
        assert_eq!(idx.get(2), Some((99, 0b11)));
        assert_eq!(idx.get(3), None);
    }

    #[test]
    fn out_of_range_token_id_is_none() {
        let builder = RootIndexBuilder::new(2);
        let mut buf = Vec::new();
        builder.serialize_into(&mut buf);
        let mapped = MmapReader::from_bytes_for_test(buf);
        let idx = RootIndex::parse(mapped, 0, 2).unwrap();
        assert_eq!(idx.get(5), None);
    }
}
