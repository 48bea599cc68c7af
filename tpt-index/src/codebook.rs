//! Codebook: spec.md §3.3. Maps compact per-column value IDs back to the
//! `f32`/`u32` values they stand for, plus the bit-block schema (spec.md
//! §4.2/§4.3) used to pack those IDs into a column's encoded stream.
//!
//! IDs are assigned by descending observed frequency -- the most common
//! value gets ID 0 -- so that the bit-block schema, which costs more bits
//! for larger IDs, spends the fewest bits on the values that occur most.
//! This is the same rationale spec.md §4.9 names explicitly for TPLM
//! probability/back-off value IDs, generalized here to every codebook.

use std::collections::HashMap;

use ordered_float::OrderedFloat;
use tpt_base::{err, Result};
use tpt_codec::{best_scheme, BitReader, BitWriter, Schema};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Float(f32),
    UInt(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum ValueKey {
    Float(OrderedFloat<f32>),
    UInt(u32),
}

impl From<Value> for ValueKey {
    fn from(v: Value) -> Self {
        match v {
            Value::Float(f) => ValueKey::Float(OrderedFloat(f)),
            Value::UInt(u) => ValueKey::UInt(u),
        }
    }
}

fn bits_needed(v: u64) -> u32 {
    if v == 0 {
        1
    } else {
        64 - v.leading_zeros()
    }
}

pub struct CodebookBuilder {
    is_float: bool,
    counts: HashMap<ValueKey, u64>,
}

impl CodebookBuilder {
    pub fn new_float() -> Self {
        CodebookBuilder { is_float: true, counts: HashMap::new() }
    }

    pub fn new_uint() -> Self {
        CodebookBuilder { is_float: false, counts: HashMap::new() }
    }

    pub fn observe(&mut self, v: Value) {
        debug_assert_eq!(matches!(v, Value::Float(_)), self.is_float);
        *self.counts.entry(v.into()).or_insert(0) += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn build(self, max_blocks: u32) -> Result<Codebook> {
        if self.counts.is_empty() {
            return Err(err("codebook: cannot build from zero observed values"));
        }
        let mut entries: Vec<(ValueKey, u64)> = self.counts.into_iter().collect();
        // Descending frequency, then a deterministic tiebreak on the value itself.
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| key_order(&a.0, &b.0)));

        let num_values = entries.len() as u32;
        let max_bits = bits_needed((num_values - 1) as u64);
        let mut d = vec![0u64; max_bits as usize + 1];
        for (id, (_, freq)) in entries.iter().enumerate() {
            let bits = bits_needed(id as u64);
            d[bits as usize] += freq;
        }
        let scheme = best_scheme(&d, max_blocks);
        let schema = Schema::new(scheme.block_sizes)?;

        let mut values = Vec::with_capacity(entries.len());
        let mut index = HashMap::with_capacity(entries.len());
        for (id, (key, _)) in entries.into_iter().enumerate() {
            values.push(key_to_value(key, self.is_float));
            index.insert(key, id as u32);
        }
        Ok(Codebook { is_float: self.is_float, values, index, schema })
    }
}

fn key_order(a: &ValueKey, b: &ValueKey) -> std::cmp::Ordering {
    match (a, b) {
        (ValueKey::Float(x), ValueKey::Float(y)) => x.cmp(y),
        (ValueKey::UInt(x), ValueKey::UInt(y)) => x.cmp(y),
        _ => std::cmp::Ordering::Equal,
    }
}

fn key_to_value(k: ValueKey, is_float: bool) -> Value {
    match (k, is_float) {
        (ValueKey::Float(f), true) => Value::Float(f.0),
        (ValueKey::UInt(u), false) => Value::UInt(u),
        _ => unreachable!("codebook value kind mismatch"),
    }
}

/// A built codebook: values indexed by ID plus the bit-block schema used to
/// pack IDs for this column.
#[derive(Clone, Debug)]
pub struct Codebook {
    is_float: bool,
    values: Vec<Value>,
    index: HashMap<ValueKey, u32>,
    schema: Schema,
}

impl Codebook {
    pub fn is_float(&self) -> bool {
        self.is_float
    }

    pub fn num_values(&self) -> u32 {
        self.values.len() as u32
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn id_of(&self, v: Value) -> Result<u32> {
        self.index
            .get(&v.into())
            .copied()
            .ok_or_else(|| err("codebook: value not present in built codebook"))
    }

    pub fn value_of(&self, id: u32) -> Result<Value> {
        self.values
            .get(id as usize)
            .copied()
            .ok_or_else(|| err("codebook: id out of range for num_values"))
    }

    pub fn encode_id(&self, w: &mut BitWriter, id: u32) -> Result<usize> {
        if id >= self.num_values() {
            return Err(err("codebook: id out of range for num_values, refusing to encode"));
        }
        w.write_value(&self.schema, id as u128)
    }

    pub fn decode_id(&self, r: &mut BitReader) -> Result<u32> {
        let v = r.read_value(&self.schema)?;
        u32::try_from(v).map_err(|_| err("codebook: decoded id overflows u32"))
    }

    fn type_tag(&self) -> &'static [u8; 8] {
        if self.is_float {
            b"float   "
        } else {
            b"uint32_t"
        }
    }

    fn serialize_book(&self, out: &mut Vec<u8>, v2: bool) {
        if v2 {
            out.extend_from_slice(self.type_tag());
        }
        out.extend_from_slice(&self.num_values().to_le_bytes());
        out.extend_from_slice(&(self.schema.len() as u32).to_le_bytes());
        for &w in self.schema.widths() {
            out.extend_from_slice(&w.to_le_bytes());
        }
        for v in &self.values {
            match v {
                Value::Float(f) => out.extend_from_slice(&f.to_le_bytes()),
                Value::UInt(u) => out.extend_from_slice(&u.to_le_bytes()),
            }
        }
    }

    fn parse_book(buf: &[u8], mut pos: usize, is_float: bool) -> Result<(Codebook, usize)> {
        let num_values = read_u32(buf, pos)?;
        pos += 4;
        let num_blocks = read_u32(buf, pos)?;
        pos += 4;
        let mut widths = Vec::with_capacity(num_blocks as usize);
        for _ in 0..num_blocks {
            widths.push(read_u32(buf, pos)?);
            pos += 4;
        }
        let schema = Schema::new(widths)?;
        let mut values = Vec::with_capacity(num_values as usize);
        let mut index = HashMap::with_capacity(num_values as usize);
        for id in 0..num_values {
            let v = if is_float {
                Value::Float(f32::from_le_bytes(read_bytes4(buf, pos)?))
            } else {
                Value::UInt(read_u32(buf, pos)?)
            };
            pos += 4;
            values.push(v);
            index.insert(v.into(), id);
        }
        Ok((Codebook { is_float, values, index, schema }, pos))
    }
}

fn read_u32(buf: &[u8], pos: usize) -> Result<u32> {
    Ok(u32::from_le_bytes(read_bytes4(buf, pos)?))
}

fn read_bytes4(buf: &[u8], pos: usize) -> Result<[u8; 4]> {
    buf.get(pos..pos + 4)
        .ok_or_else(|| err("codebook: truncated buffer"))?
        .try_into()
        .map_err(|_| err("codebook: truncated buffer"))
}

const V2_MAGIC: &[u8; 8] = b"TPCBKV2\0";

/// A sequence of per-column codebooks, as written for one TPPT/TPLM file.
#[derive(Default, Clone, Debug)]
pub struct CodebookSet {
    pub books: Vec<Codebook>,
}

impl CodebookSet {
    pub fn new(books: Vec<Codebook>) -> Self {
        CodebookSet { books }
    }

    /// Emits v1 layout unless `force_v2`, or any book is a `uint32_t`/float
    /// mix requiring the type tags (v2 is required once any non-3rd-column
    /// score, count, or alignment book exists -- spec.md §3.3).
    pub fn serialize_into(&self, out: &mut Vec<u8>, force_v2: bool) {
        if force_v2 {
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(V2_MAGIC);
            out.extend_from_slice(&(self.books.len() as u32).to_le_bytes());
            for b in &self.books {
                b.serialize_book(out, true);
            }
        } else {
            out.extend_from_slice(&(self.books.len() as u32).to_le_bytes());
            for b in &self.books {
                b.serialize_book(out, false);
            }
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        let first = read_u32(buf, 0)?;
        if first == 0 {
            let magic = buf
                .get(4..12)
                .ok_or_else(|| err("codebook set: truncated v2 magic"))?;
            if magic != V2_MAGIC {
                return Err(err("codebook set: v2 marker present but magic does not match"));
            }
            let num_books = read_u32(buf, 12)?;
            let mut pos = 16;
            let mut books = Vec::with_capacity(num_books as usize);
            for _ in 0..num_books {
                let tag = buf
                    .get(pos..pos + 8)
                    .ok_or_else(|| err("codebook set: truncated v2 type tag"))?;
                let is_float = match tag {
                    b"float   " => true,
                    b"uint32_t" => false,
                    _ => return Err(err("codebook set: unrecognized v2 type tag")),
                };
                pos += 8;
                let (book, next) = Codebook::parse_book(buf, pos, is_float)?;
                pos = next;
                books.push(book);
            }
            Ok(CodebookSet { books })
        } else {
            let num_books = first;
            let mut pos = 4;
            let mut books = Vec::with_capacity(num_books as usize);
            for _ in 0..num_books {
                // v1 has no type tag; spec.md §3.3 reserves it for the
                // original float-score-only phrase tables.
                let (book, next) = Codebook::parse_book(buf, pos, true)?;
                pos = next;
                books.push(book);
            }
            Ok(CodebookSet { books })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn frequent_values_get_low_ids() {
        let mut b = CodebookBuilder::new_float();
        for _ in 0..100 {
            b.observe(Value::Float(0.5));
        }
        for _ in 0..3 {
            b.observe(Value::Float(0.1));
        }
        b.observe(Value::Float(0.9));
        let cb = b.build(5).unwrap();
        assert_eq!(cb.value_of(0).unwrap(), Value::Float(0.5));
        assert_eq!(cb.id_of(Value::Float(0.5)).unwrap(), 0);
    }

    #[test]
    fn encode_decode_round_trips_every_id() {
        let mut b = CodebookBuilder::new_uint();
        for v in 0..50u32 {
            for _ in 0..(v + 1) {
                b.observe(Value::UInt(v));
            }
        }
        let cb = b.build(5).unwrap();
        let mut w = BitWriter::new();
        for id in 0..cb.num_values() {
            w.write_value(cb.schema(), id as u128).unwrap();
        }
        let bytes = w.into_bytes();
        let mut r = BitReader::new(&bytes, 0);
        for id in 0..cb.num_values() {
            assert_eq!(r.read_value(cb.schema()).unwrap(), id as u128);
        }
    }

    #[test]
    fn v2_round_trip_through_serialize_and_parse() {
        let mut bf = CodebookBuilder::new_float();
        bf.observe(Value::Float(1.0));
        bf.observe(Value::Float(2.0));
        let cbf = bf.build(5).unwrap();

        let mut bu = CodebookBuilder::new_uint();
        bu.observe(Value::UInt(7));
        let cbu = bu.build(5).unwrap();

        let set = CodebookSet::new(vec![cbf, cbu]);
        let mut buf = Vec::new();
        set.serialize_into(&mut buf, true);
        let parsed = CodebookSet::parse(&buf).unwrap();
        assert_eq!(parsed.books.len(), 2);
        assert!(parsed.books[0].is_float());
        assert!(!parsed.books[1].is_float());
        assert_eq!(parsed.books[1].value_of(0).unwrap(), Value::UInt(7));
    }

    #[test]
    fn v1_round_trip_through_serialize_and_parse() {
        let mut bf = CodebookBuilder::new_float();
        bf.observe(Value::Float(3.5));
        let cbf = bf.build(5).unwrap();
        let set = CodebookSet::new(vec![cbf]);
        let mut buf = Vec::new();
        set.serialize_into(&mut buf, false);
        let parsed = CodebookSet::parse(&buf).unwrap();
        assert_eq!(parsed.books.len(), 1);
        assert_eq!(parsed.books[0].value_of(0).unwrap(), Value::Float(3.5));
    }

    #[test]
    fn out_of_range_id_is_rejected() {
        let mut b = CodebookBuilder::new_uint();
        b.observe(Value::UInt(1));
        let cb = b.build(5).unwrap();
        let mut w = BitWriter::new();
        assert!(cb.encode_id(&mut w, 99).is_err());
    }
}
