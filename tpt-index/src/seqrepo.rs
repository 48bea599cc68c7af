//! Sequence repository: spec.md §3.4, §4.4. A reverse-linked list of
//! `(token_id, back_offset)` nodes built from an in-memory trie over every
//! token-ID sequence seen while building, so that sequences sharing a
//! common path share its storage.
//!
//! §4.4's write-up narrates "children before parent" for the writer, which
//! is the tightly packed trie's (§3.5/§4.5) wiring, not this format's: a
//! repository node's `back_offset` subtracts to its *parent's* position
//! (§3.4's invariant, `current_offset - back_offset == parent_offset`),
//! which only type-checks if the parent is written before the child. This
//! writer does exactly that -- root first, each child immediately after
//! its parent -- and the resulting files satisfy §3.4's invariant exactly;
//! see DESIGN.md for the full resolution of that narrative/invariant
//! mismatch.

use std::collections::{BTreeMap, HashMap};

use tpt_base::{err, ioutil::MmapReader, Result};
use tpt_codec::{read_tui, write_tui};

use crate::root_index::{RootIndex, RootIndexBuilder};

#[derive(Default)]
struct SeqNode {
    children: BTreeMap<u32, SeqNode>,
    prelim_id: Option<u64>,
}

/// Builds the in-memory trie of inserted sequences, assigning each distinct
/// path a strictly positive, monotonically increasing preliminary ID.
pub struct SequenceRepositoryBuilder {
    root: SeqNode,
    next_id: u64,
}

impl SequenceRepositoryBuilder {
    pub fn new() -> Self {
        SequenceRepositoryBuilder { root: SeqNode::default(), next_id: 0 }
    }

    /// Inserts `tokens`, returning the sequence's preliminary ID. Repeated
    /// insertion of the same path returns the same ID.
    pub fn insert(&mut self, tokens: &[u32]) -> u64 {
        let mut cur = &mut self.root;
        for &tid in tokens {
            cur = cur.children.entry(tid).or_default();
        }
        if let Some(id) = cur.prelim_id {
            id
        } else {
            self.next_id += 1;
            cur.prelim_id = Some(self.next_id);
            self.next_id
        }
    }

    /// Serializes the `.dat` payload and a remap from preliminary ID to
    /// final node byte offset, plus a `.idx` root keyed by the first token
    /// of each top-level sequence (`num_root_tokens` sizes that index).
    pub fn build(self, num_root_tokens: u32) -> (Vec<u8>, HashMap<u64, u64>, Vec<u8>) {
        let mut dat = Vec::new();
        let mut remap = HashMap::new();

        // Synthetic root: token_id = 0, back_offset = 0, at offset 0.
        write_tui(&mut dat, 0);
        write_tui(&mut dat, 0);
        if let Some(id) = self.root.prelim_id {
            remap.insert(id, 0);
        }

        let mut root_idx = RootIndexBuilder::new(num_root_tokens as usize);
        for (&tid, child) in &self.root.children {
            let offset = write_subtree(&mut dat, 0, tid, child, &mut remap);
            if tid < num_root_tokens {
                root_idx.set(tid, offset, 0);
            }
        }
        let mut idx = Vec::new();
        root_idx.serialize_into(&mut idx);
        (dat, remap, idx)
    }
}

impl Default for SequenceRepositoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn write_subtree(
    dat: &mut Vec<u8>,
    parent_offset: u64,
    token_id: u32,
    node: &SeqNode,
    remap: &mut HashMap<u64, u64>,
) -> u64 {
    let offset = dat.len() as u64;
    write_tui(dat, token_id as u64);
    write_tui(dat, offset - parent_offset);
    if let Some(id) = node.prelim_id {
        remap.insert(id, offset);
    }
    for (&tid, child) in &node.children {
        write_subtree(dat, offset, tid, child, remap);
    }
    offset
}

/// A read view over a built sequence repository's `.dat`/`.idx` pair.
#[derive(Clone)]
pub struct SequenceRepository {
    dat: MmapReader,
    idx: RootIndex,
}

impl SequenceRepository {
    pub fn parse(dat: MmapReader, idx_bytes: MmapReader, num_root_tokens: u32) -> Result<Self> {
        let idx = RootIndex::parse(idx_bytes, 0, num_root_tokens)?;
        Ok(SequenceRepository { dat, idx })
    }

    pub fn root_offset(&self, token_id: u32) -> Option<u64> {
        self.idx.get(token_id).map(|(offset, _)| offset)
    }

    fn read_node(&self, offset: u64) -> Result<(u32, u64)> {
        let slice = self.dat.as_slice();
        let (token_id, pos) = read_tui(slice, offset as usize)?;
        let (back_offset, _) = read_tui(slice, pos)?;
        Ok((token_id as u32, back_offset))
    }

    /// Walks back from `offset` to the root, returning the sequence in
    /// forward order.
    pub fn sequence(&self, mut offset: u64) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        while offset != 0 {
            let (token_id, back_offset) = self.read_node(offset)?;
            ids.push(token_id);
            if back_offset == 0 || back_offset > offset {
                return Err(err("sequence repository: corrupt back_offset during walk-back"));
            }
            offset -= back_offset;
        }
        ids.reverse();
        Ok(ids)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn shared_prefixes_reuse_nodes_and_round_trip() {
        let mut b = SequenceRepositoryBuilder::new();
        let id_abc = b.insert(&[1, 2, 3]);
        let id_ab = b.insert(&[1, 2]);
        let id_abd = b.insert(&[1, 2, 4]);
        assert_ne!(id_abc, id_ab);
        assert_ne!(id_abc, id_abd);

        let (dat, remap, idx) = b.build(8);
        let dat_mapped = MmapReader::from_bytes_for_test(dat);
        let idx_mapped = MmapReader::from_bytes_for_test(idx);
        let repo = SequenceRepository::parse(dat_mapped, idx_mapped, 8).unwrap();

        assert_eq!(repo.sequence(remap[&id_abc]).unwrap(), vec![1, 2, 3]);
        assert_eq!(repo.sequence(remap[&id_ab]).unwrap(), vec![1, 2]);
        assert_eq!(repo.sequence(remap[&id_abd]).unwrap(), vec![1, 2, 4]);
    }

    #[test]
    fn repeated_insert_of_same_path_reuses_id() {
        let mut b = SequenceRepositoryBuilder::new();
        let a = b.insert(&[5, 6]);
        let c = b.insert(&[5, 6]);
        assert_eq!(a, c);
    }

    #[test]
    fn root_index_reaches_each_top_level_token() {
        let mut b = SequenceRepositoryBuilder::new();
        b.insert(&[1]);
        b.insert(&[2, 9]);
        let (dat, remap, idx) = b.build(4);
        let repo = SequenceRepository::parse(
            MmapReader::from_bytes_for_test(dat),
            MmapReader::from_bytes_for_test(idx),
            4,
        )
        .unwrap();
        assert!(repo.root_offset(1).is_some());
        assert!(repo.root_offset(2).is_some());
        assert!(repo.root_offset(3).is_none());
        let _ = remap;
    }
}
