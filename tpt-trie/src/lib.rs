//! Layer 3: the tightly packed trie (spec.md §3.5, §4.5, §4.6) shared by
//! TPPT's source-phrase trie and TPLM's reverse-context trie. The payload
//! bytes stored at `HAS_VALUE` nodes are opaque here -- §3.6/§3.7 define
//! what they mean, and are implemented by `tpt-tppt`/`tpt-tplm`.
//!
//! Node-relative back-offsets only ever point to already-written children,
//! so the writer is a straightforward post-order DFS: write every child
//! before the node that owns them, then the node's own child index (sorted
//! by token ID, as TIP pairs), then its back-offset and payload. The
//! "inline forward-offset" optimization spec.md §3.7 describes for
//! childless, valueless TPLM leaf nodes (storing `bow_id` directly as the
//! node's position) is not implemented: every node this writer produces
//! carries real flags, so `child_flags` is never `0` and `child_ref` is
//! always the back-offset case. This only costs a few bytes per such node
//! versus the optimized encoding; see DESIGN.md.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tpt_base::{err, ioutil::MmapReader, Result};
use tpt_codec::{binary_search_by_first, read_tip, read_tui, write_tip, write_tui};
use tpt_index::{RootIndex, RootIndexBuilder};

pub const FLAGBITS: u32 = 2;
pub const HAS_CHILD: u8 = 0b01;
pub const HAS_VALUE: u8 = 0b10;

const HEADER_WIDTH: usize = 8 + 4 + 16; // root_index_start, num_root_tokens, two u64 defaults

/// An in-memory trie of inserted token-ID paths, ready to be serialized by
/// [`TrieWriter::build`]. Payload bytes for an accepting node are supplied
/// already encoded, since their meaning is layer-specific.
#[derive(Default)]
pub struct TrieBuilderNode {
    children: BTreeMap<u32, TrieBuilderNode>,
    payload: Option<Vec<u8>>,
}

impl TrieBuilderNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&mut self, token_id: u32) -> &mut TrieBuilderNode {
        self.children.entry(token_id).or_default()
    }

    pub fn set_payload(&mut self, bytes: Vec<u8>) {
        self.payload = Some(bytes);
    }

    pub fn children(&self) -> &BTreeMap<u32, TrieBuilderNode> {
        &self.children
    }
}

pub struct TrieWriter;

impl TrieWriter {
    /// Serializes `root`'s children into one file: header, node data
    /// (post-order DFS), then the root index at the offset it records.
    pub fn build(root: &TrieBuilderNode, num_root_tokens: u32, defaults: [u64; 2]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0u64.to_le_bytes()); // root_index_start placeholder
        out.extend_from_slice(&num_root_tokens.to_le_bytes());
        out.extend_from_slice(&defaults[0].to_le_bytes());
        out.extend_from_slice(&defaults[1].to_le_bytes());
        debug_assert_eq!(out.len(), HEADER_WIDTH);

        let mut root_idx = RootIndexBuilder::new(num_root_tokens as usize);
        for (&tid, child) in &root.children {
            let (pos, flags) = write_node(&mut out, child);
            if tid < num_root_tokens {
                root_idx.set(tid, pos, flags);
            }
        }
        let root_index_start = out.len() as u64;
        root_idx.serialize_into(&mut out);
        out[0..8].copy_from_slice(&root_index_start.to_le_bytes());
        out
    }
}

fn write_node(out: &mut Vec<u8>, node: &TrieBuilderNode) -> (u64, u8) {
    let mut child_entries = Vec::with_capacity(node.children.len());
    for (&tid, child) in &node.children {
        let (pos, flags) = write_node(out, child);
        child_entries.push((tid, flags, pos));
    }

    let has_child = !child_entries.is_empty();
    let idx_start = out.len() as u64;
    if has_child {
        for (tid, flags, child_pos) in &child_entries {
            let key = ((*tid as u64) << FLAGBITS) | (*flags as u64);
            let child_ref = idx_start - child_pos;
            write_tip(out, key, child_ref);
        }
    }

    let pos = out.len() as u64;
    let mut flags = 0u8;
    if has_child {
        flags |= HAS_CHILD;
        write_tui(out, pos - idx_start);
    }
    if let Some(payload) = &node.payload {
        flags |= HAS_VALUE;
        out.extend_from_slice(payload);
    }
    (pos, flags)
}

/// A node reference within a [`TrieReader`]: a byte position plus the flags
/// the parent's child index (or the root index) recorded for it.
#[derive(Clone, Copy, Debug)]
pub struct Node {
    pos: u64,
    flags: u8,
}

impl Node {
    pub fn has_child(&self) -> bool {
        self.flags & HAS_CHILD != 0
    }

    pub fn has_value(&self) -> bool {
        self.flags & HAS_VALUE != 0
    }

    /// Binary-searches this node's child index for `token_id`.
    pub fn find(&self, reader: &TrieReader, token_id: u32) -> Result<Option<Node>> {
        if !self.has_child() {
            return Ok(None);
        }
        let slice = reader.bytes.as_slice();
        let (idx_back_offset, _) = read_tui(slice, self.pos as usize)?;
        let idx_start = self
            .pos
            .checked_sub(idx_back_offset)
            .ok_or_else(|| err("trie: idx_back_offset exceeds node position"))?;
        let found = binary_search_by_first(slice, idx_start as usize, self.pos as usize, |first| {
            (first >> FLAGBITS).cmp(&(token_id as u64))
        })?;
        Ok(found.map(|(first, child_ref, _, _)| {
            let child_flags = (first & ((1u64 << FLAGBITS) - 1)) as u8;
            let child_pos = idx_start - child_ref;
            Node { pos: child_pos, flags: child_flags }
        }))
    }

    /// Every `(token_id, child)` pair in this node's child index, in token
    /// order. Unlike [`Self::find`] (one binary-searched lookup), this
    /// walks the whole index sequentially -- for traversal tools like a
    /// full-table dump, not for hot lookup paths.
    pub fn children(&self, reader: &TrieReader) -> Result<Vec<(u32, Node)>> {
        if !self.has_child() {
            return Ok(Vec::new());
        }
        let slice = reader.bytes.as_slice();
        let (idx_back_offset, _) = read_tui(slice, self.pos as usize)?;
        let idx_start = self
            .pos
            .checked_sub(idx_back_offset)
            .ok_or_else(|| err("trie: idx_back_offset exceeds node position"))?;
        let mut out = Vec::new();
        let mut p = idx_start as usize;
        while p < self.pos as usize {
            let (key, child_ref, after) = read_tip(slice, p)?;
            let tid = (key >> FLAGBITS) as u32;
            let flags = (key & ((1u64 << FLAGBITS) - 1)) as u8;
            let child_pos = idx_start - child_ref;
            out.push((tid, Node { pos: child_pos, flags }));
            p = after;
        }
        Ok(out)
    }

    /// Byte position of this node's payload, if it has one -- skipping the
    /// child-index back-offset field when present.
    pub fn payload_pos(&self, reader: &TrieReader) -> Result<Option<u64>> {
        if !self.has_value() {
            return Ok(None);
        }
        let mut pos = self.pos as usize;
        if self.has_child() {
            let (_, after) = read_tui(reader.bytes.as_slice(), pos)?;
            pos = after;
        }
        Ok(Some(pos as u64))
    }
}

/// Constructor-time state for a memory-mapped tightly packed trie: the
/// cached root index plus the two format-specific "default" values every
/// trie file carries (spec.md §3.5).
pub struct TrieReader {
    bytes: MmapReader,
    root_idx: RootIndex,
    defaults: [u64; 2],
}

impl TrieReader {
    pub fn parse(bytes: MmapReader) -> Result<Self> {
        let slice = bytes.as_slice();
        if slice.len() < HEADER_WIDTH {
            return Err(err("trie: truncated header"));
        }
        let root_index_start = u64::from_le_bytes(slice[0..8].try_into().unwrap());
        let num_root_tokens = u32::from_le_bytes(slice[8..12].try_into().unwrap());
        let d0 = u64::from_le_bytes(slice[12..20].try_into().unwrap());
        let d1 = u64::from_le_bytes(slice[20..28].try_into().unwrap());
        let root_idx = RootIndex::parse(bytes.clone(), root_index_start as usize, num_root_tokens)?;
        Ok(TrieReader { bytes, root_idx, defaults: [d0, d1] })
    }

    pub fn defaults(&self) -> [u64; 2] {
        self.defaults
    }

    pub fn num_root_tokens(&self) -> u32 {
        self.root_idx.num_tokens()
    }

    pub fn find(&self, token_id: u32) -> Option<Node> {
        self.root_idx
            .get(token_id)
            .map(|(pos, flags)| Node { pos, flags })
    }

    /// Every `(token_id, child)` pair at the root, in token order. Scans
    /// the whole root vocabulary rather than following a packed index --
    /// meant for traversal tools, not hot lookup paths.
    pub fn root_children(&self) -> impl Iterator<Item = (u32, Node)> + '_ {
        (0..self.num_root_tokens()).filter_map(move |tid| self.find(tid).map(|n| (tid, n)))
    }

    pub fn payload_bytes<'a>(&'a self, pos: u64) -> &'a [u8] {
        &self.bytes.as_slice()[pos as usize..]
    }

    /// Chains `find` calls across `tokens[start..end]`, returning the
    /// deepest node with a value along the way, plus the one-past index of
    /// the token it was reached at. `None` if no prefix of `tokens[start..]`
    /// reaches an accepting node.
    pub fn deepest_value(
        &self,
        tokens: &[u32],
        start: usize,
        end: usize,
    ) -> Result<Option<(usize, Node)>> {
        let end = end.min(tokens.len());
        if start >= end {
            return Ok(None);
        }
        let mut node = match self.find(tokens[start]) {
            Some(n) => n,
            None => return Ok(None),
        };
        let mut best = if node.has_value() { Some((start + 1, node)) } else { None };
        let mut k = start + 1;
        while k < end {
            match node.find(self, tokens[k])? {
                Some(n) => {
                    node = n;
                    if node.has_value() {
                        best = Some((k + 1, node));
                    }
                    k += 1;
                }
                None => break,
            }
        }
        Ok(best)
    }
}

/// A thread-safe cache of decoded node payloads keyed by value-start byte
/// position (spec.md §5: `Node::value` "MUST either make this cache
/// thread-safe ... or document that [the reader] is not safe for
/// concurrent use" -- this implements the former).
pub struct ValueCache<V> {
    inner: RwLock<std::collections::HashMap<u64, Arc<V>>>,
}

impl<V> ValueCache<V> {
    pub fn new() -> Self {
        ValueCache { inner: RwLock::new(std::collections::HashMap::new()) }
    }

    pub fn get_or_decode(
        &self,
        pos: u64,
        decode: impl FnOnce() -> Result<V>,
    ) -> Result<Arc<V>> {
        if let Some(v) = self.inner.read().expect("value cache poisoned").get(&pos) {
            return Ok(v.clone());
        }
        let v = Arc::new(decode()?);
        self.inner
            .write()
            .expect("value cache poisoned")
            .insert(pos, v.clone());
        Ok(v)
    }
}

impl<V> Default for ValueCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    fn build_simple_trie() -> Vec<u8> {
        let mut root = TrieBuilderNode::new();
        root.child(1).set_payload(b"one".to_vec());
        let two = root.child(2);
        two.child(3).set_payload(b"two-three".to_vec());
        two.set_payload(b"two".to_vec());
        TrieWriter::build(&root, 8, [42, 99])
    }

    #[test]
    fn root_level_find_reaches_accepting_nodes() {
        let bytes = MmapReader::from_bytes_for_test(build_simple_trie());
        let reader = TrieReader::parse(bytes).unwrap();
        assert_eq!(reader.defaults(), [42, 99]);

        let one = reader.find(1).unwrap();
        assert!(one.has_value());
        assert!(!one.has_child());
        let pos = one.payload_pos(&reader).unwrap().unwrap();
        assert_eq!(&reader.payload_bytes(pos)[..3], b"one");

        assert!(reader.find(5).is_none());
    }

    #[test]
    fn nested_find_reaches_grandchild() {
        let bytes = MmapReader::from_bytes_for_test(build_simple_trie());
        let reader = TrieReader::parse(bytes).unwrap();

        let two = reader.find(2).unwrap();
        assert!(two.has_value());
        assert!(two.has_child());
        let two_pos = two.payload_pos(&reader).unwrap().unwrap();
        assert_eq!(&reader.payload_bytes(two_pos)[..3], b"two");

        let three = two.find(&reader, 3).unwrap().unwrap();
        assert!(three.has_value());
        let three_pos = three.payload_pos(&reader).unwrap().unwrap();
        assert_eq!(&reader.payload_bytes(three_pos)[..9], b"two-three");

        assert!(two.find(&reader, 99).unwrap().is_none());
    }

    #[test]
    fn deepest_value_walks_as_far_as_possible() {
        let bytes = MmapReader::from_bytes_for_test(build_simple_trie());
        let reader = TrieReader::parse(bytes).unwrap();

        let (end, node) = reader.deepest_value(&[2, 3], 0, 2).unwrap().unwrap();
        assert_eq!(end, 2);
        let pos = node.payload_pos(&reader).unwrap().unwrap();
        assert_eq!(&reader.payload_bytes(pos)[..9], b"two-three");

        // A trailing unknown token doesn't erase the deepest match found so far.
        let (end, node) = reader.deepest_value(&[2, 3, 404], 0, 3).unwrap().unwrap();
        assert_eq!(end, 2);
        let pos = node.payload_pos(&reader).unwrap().unwrap();
        assert_eq!(&reader.payload_bytes(pos)[..9], b"two-three");
    }

    #[test]
    fn children_and_root_children_enumerate_every_entry() {
        let bytes = MmapReader::from_bytes_for_test(build_simple_trie());
        let reader = TrieReader::parse(bytes).unwrap();

        let roots: Vec<u32> = reader.root_children().map(|(tid, _)| tid).collect();
        assert_eq!(roots, vec![1, 2]);

        let two = reader.find(2).unwrap();
        let kids = two.children(&reader).unwrap();
        assert_eq!(kids.len(), 1);
        assert_eq!(kids[0].0, 3);
        assert!(kids[0].1.has_value());

        let one = reader.find(1).unwrap();
        assert!(one.children(&reader).unwrap().is_empty());
    }

    #[test]
    fn value_cache_decodes_once_per_position() {
        let cache: ValueCache<u32> = ValueCache::new();
        let calls = std::sync::atomic::AtomicUsize::new(0);
        for _ in 0..5 {
            let v = cache
                .get_or_decode(10, || {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(7u32)
                })
                .unwrap();
            assert_eq!(*v, 7);
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
