//! Canonical byte codec (spec §6 "Serializer contract").
//!
//! This is the L0 layer: a pure `Value ↔ bytes` codec with a fixed header
//! and deterministic field ordering, so that identical logical values
//! always produce identical bytes — the property the whole dedup layer
//! (§4.4) depends on. Everything above this module only ever touches the
//! canonical bytes through [`encode`], [`decode`], or the zero-copy
//! [`ValueView`].
//!
//! Frame layout, in order:
//!
//! ```text
//! b'B' b'\n' version:u32           -- fixed header
//! type_tag:u32
//! n_other_attrs:u64  [name_len:u32 name:bytes value:<recursive>]*
//! has_dims:u8        [n_dims:u32 dims:u64*]?
//! has_class:u8       [n_classes:u32 [len:u32 bytes]*]?
//! <type-specific payload>
//! ```

use crate::error::{Error, Result};
use crate::value::{Attributes, Data, Value};

/// Magic prefix every encoded value starts with.
pub const MAGIC: [u8; 2] = [b'B', b'\n'];
/// Current codec version, bumped on any incompatible framing change.
pub const CODEC_VERSION: u32 = 1;

/// Encodes a value into its canonical byte representation.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&CODEC_VERSION.to_le_bytes());
    encode_body(value, &mut buf);
    buf
}

fn encode_body(value: &Value, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&value.raw_type_tag().to_le_bytes());

    buf.extend_from_slice(&(value.attributes.other.len() as u64).to_le_bytes());
    for (name, val) in &value.attributes.other {
        write_str(buf, name);
        encode_body(val, buf);
    }

    if value.attributes.dims.is_empty() {
        buf.push(0);
    } else {
        buf.push(1);
        buf.extend_from_slice(&(value.attributes.dims.len() as u32).to_le_bytes());
        for d in &value.attributes.dims {
            buf.extend_from_slice(&d.to_le_bytes());
        }
    }

    if value.attributes.class.is_empty() {
        buf.push(0);
    } else {
        buf.push(1);
        buf.extend_from_slice(&(value.attributes.class.len() as u32).to_le_bytes());
        for c in &value.attributes.class {
            write_str(buf, c);
        }
    }

    match &value.data {
        Data::Null => {}
        Data::Logical(v) => {
            buf.extend_from_slice(&(v.len() as u64).to_le_bytes());
            for e in v {
                let raw = e.map(|b| b as i32).unwrap_or(crate::value::NA_INTEGER);
                buf.extend_from_slice(&raw.to_le_bytes());
            }
        }
        Data::Integer(v) => {
            buf.extend_from_slice(&(v.len() as u64).to_le_bytes());
            for e in v {
                let raw = e.unwrap_or(crate::value::NA_INTEGER);
                buf.extend_from_slice(&raw.to_le_bytes());
            }
        }
        Data::Double(v) => {
            buf.extend_from_slice(&(v.len() as u64).to_le_bytes());
            for e in v {
                buf.extend_from_slice(&e.to_bits().to_le_bytes());
            }
        }
        Data::Complex(v) => {
            buf.extend_from_slice(&(v.len() as u64).to_le_bytes());
            for (re, im) in v {
                buf.extend_from_slice(&re.to_bits().to_le_bytes());
                buf.extend_from_slice(&im.to_bits().to_le_bytes());
            }
        }
        Data::Character(v) => {
            buf.extend_from_slice(&(v.len() as u64).to_le_bytes());
            for e in v {
                match e {
                    None => buf.extend_from_slice(&(-1i32).to_le_bytes()),
                    Some(s) => {
                        buf.extend_from_slice(&(s.len() as i32).to_le_bytes());
                        buf.extend_from_slice(s.as_bytes());
                    }
                }
            }
        }
        Data::Raw(v) => {
            buf.extend_from_slice(&(v.len() as u64).to_le_bytes());
            buf.extend_from_slice(v);
        }
        Data::List(v) => {
            buf.extend_from_slice(&(v.len() as u64).to_le_bytes());
            for e in v {
                encode_body(e, buf);
            }
        }
        Data::Environment | Data::Closure => {
            // Elided: no payload, just the type tag already written above.
        }
        Data::Generic {
            length,
            bytes,
            ..
        } => {
            buf.extend_from_slice(&length.to_le_bytes());
            buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
            buf.extend_from_slice(bytes);
        }
    }
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(Error::Codec("unexpected end of buffer".to_string()));
        }
        let s = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.u64()?))
    }

    fn str(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::Codec(e.to_string()))
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n)?;
        Ok(())
    }

    fn skip_str(&mut self) -> Result<()> {
        let len = self.u32()? as usize;
        self.skip(len)
    }
}

/// Decodes a value from its canonical byte representation.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    let mut cur = Cursor::new(bytes);
    let magic = cur.take(2)?;
    if magic != MAGIC {
        return Err(Error::Codec("bad magic prefix".to_string()));
    }
    let version = cur.u32()?;
    if version != CODEC_VERSION {
        return Err(Error::Codec(format!("unsupported codec version {version}")));
    }
    decode_body(&mut cur)
}

fn decode_body(cur: &mut Cursor<'_>) -> Result<Value> {
    let type_tag = cur.u32()?;

    let n_other = cur.u64()?;
    let mut other = Vec::with_capacity(n_other as usize);
    for _ in 0..n_other {
        let name = cur.str()?;
        let val = decode_body(cur)?;
        other.push((name, val));
    }

    let has_dims = cur.u8()?;
    let dims = if has_dims == 1 {
        let n = cur.u32()?;
        let mut d = Vec::with_capacity(n as usize);
        for _ in 0..n {
            d.push(cur.u64()?);
        }
        d
    } else {
        Vec::new()
    };

    let has_class = cur.u8()?;
    let class = if has_class == 1 {
        let n = cur.u32()?;
        let mut c = Vec::with_capacity(n as usize);
        for _ in 0..n {
            c.push(cur.str()?);
        }
        c
    } else {
        Vec::new()
    };

    let attributes = Attributes { class, dims, other };

    use crate::model::ValueType::*;
    let data = match crate::model::ValueType::from_tag(type_tag) {
        Null => Data::Null,
        Logical => {
            let len = cur.u64()?;
            let mut v = Vec::with_capacity(len as usize);
            for _ in 0..len {
                let raw = cur.i32()?;
                v.push(if raw == crate::value::NA_INTEGER {
                    None
                } else {
                    Some(raw != 0)
                });
            }
            Data::Logical(v)
        }
        Integer => {
            let len = cur.u64()?;
            let mut v = Vec::with_capacity(len as usize);
            for _ in 0..len {
                let raw = cur.i32()?;
                v.push(if raw == crate::value::NA_INTEGER {
                    None
                } else {
                    Some(raw)
                });
            }
            Data::Integer(v)
        }
        Double => {
            let len = cur.u64()?;
            let mut v = Vec::with_capacity(len as usize);
            for _ in 0..len {
                v.push(cur.f64()?);
            }
            Data::Double(v)
        }
        Complex => {
            let len = cur.u64()?;
            let mut v = Vec::with_capacity(len as usize);
            for _ in 0..len {
                let re = cur.f64()?;
                let im = cur.f64()?;
                v.push((re, im));
            }
            Data::Complex(v)
        }
        Character => {
            let len = cur.u64()?;
            let mut v = Vec::with_capacity(len as usize);
            for _ in 0..len {
                let l = cur.i32()?;
                if l < 0 {
                    v.push(None);
                } else {
                    let bytes = cur.take(l as usize)?;
                    v.push(Some(
                        String::from_utf8(bytes.to_vec()).map_err(|e| Error::Codec(e.to_string()))?,
                    ));
                }
            }
            Data::Character(v)
        }
        Raw => {
            let len = cur.u64()?;
            Data::Raw(cur.take(len as usize)?.to_vec())
        }
        List => {
            let len = cur.u64()?;
            let mut v = Vec::with_capacity(len as usize);
            for _ in 0..len {
                v.push(decode_body(cur)?);
            }
            Data::List(v)
        }
        Environment => Data::Environment,
        Closure => Data::Closure,
        _ => {
            let length = cur.u64()?;
            let n_bytes = cur.u64()?;
            let bytes = cur.take(n_bytes as usize)?.to_vec();
            Data::Generic {
                type_tag,
                length,
                bytes,
            }
        }
    };

    Ok(Value { data, attributes })
}

/// Advances past one encoded value's body without materializing it into a
/// [`Value`] — same framing as [`decode_body`], but every field is skipped
/// rather than collected into a `Vec`/`String`. Used by [`ValueView`] to
/// walk past nested attribute values it doesn't need to inspect.
fn skip_body(cur: &mut Cursor<'_>) -> Result<()> {
    let type_tag = cur.u32()?;

    let n_other = cur.u64()?;
    for _ in 0..n_other {
        cur.skip_str()?;
        skip_body(cur)?;
    }

    let has_dims = cur.u8()?;
    if has_dims == 1 {
        let n = cur.u32()?;
        cur.skip(n as usize * 8)?;
    }

    let has_class = cur.u8()?;
    if has_class == 1 {
        let n = cur.u32()?;
        for _ in 0..n {
            cur.skip_str()?;
        }
    }

    use crate::model::ValueType::*;
    match crate::model::ValueType::from_tag(type_tag) {
        Null | Environment | Closure => {}
        Logical | Integer => {
            let len = cur.u64()?;
            cur.skip(len as usize * 4)?;
        }
        Double => {
            let len = cur.u64()?;
            cur.skip(len as usize * 8)?;
        }
        Complex => {
            let len = cur.u64()?;
            cur.skip(len as usize * 16)?;
        }
        Character => {
            let len = cur.u64()?;
            for _ in 0..len {
                let l = cur.i32()?;
                if l >= 0 {
                    cur.skip(l as usize)?;
                }
            }
        }
        Raw => {
            let len = cur.u64()?;
            cur.skip(len as usize)?;
        }
        List => {
            let len = cur.u64()?;
            for _ in 0..len {
                skip_body(cur)?;
            }
        }
        Symbol | Language | Promise | Special | Builtin | S4 | Reserved => {
            let _length = cur.u64()?;
            let n_bytes = cur.u64()?;
            cur.skip(n_bytes as usize)?;
        }
    }
    Ok(())
}

/// A view over an encoded value's header and, for [`ValueView::has_na`],
/// its flat payload — used by the integrity checker's fast pass and the
/// search index's slow-path NA scan (spec §4.6, §4.7) without fully
/// decoding into a [`Value`]. Nested attribute values are walked with
/// [`skip_body`] rather than materialized.
pub struct ValueView<'a> {
    bytes: &'a [u8],
}

impl<'a> ValueView<'a> {
    /// Parses only the magic prefix and version; does not validate or
    /// materialize the payload.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < 6 || bytes[0..2] != MAGIC {
            return Err(Error::Codec("bad magic prefix".to_string()));
        }
        Ok(ValueView { bytes })
    }

    pub fn type_tag(&self) -> Result<u32> {
        let mut cur = Cursor::new(&self.bytes[6..]);
        cur.u32()
    }

    /// Walks past the attribute section to the type-specific payload and
    /// scans its elements directly for an NA/missing sentinel, without
    /// building the intermediate `Vec<Option<_>>`/`String`s a full decode
    /// would (mirrors `find_na` over a raw element buffer in the original
    /// implementation this system is modeled on). Matches
    /// [`crate::value::Data::has_na`]: only the scalar vector kinds can
    /// carry NA, so every other type reports `false`.
    pub fn has_na(&self) -> Result<bool> {
        let mut cur = Cursor::new(&self.bytes[6..]);
        let type_tag = cur.u32()?;
        skip_attributes(&mut cur)?;

        use crate::model::ValueType::*;
        match crate::model::ValueType::from_tag(type_tag) {
            Logical | Integer => {
                let len = cur.u64()?;
                for _ in 0..len {
                    if cur.i32()? == crate::value::NA_INTEGER {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Double => {
                let len = cur.u64()?;
                for _ in 0..len {
                    if crate::value::is_na_double(cur.f64()?) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Complex => {
                let len = cur.u64()?;
                for _ in 0..len {
                    let re = cur.f64()?;
                    let im = cur.f64()?;
                    if crate::value::is_na_double(re) || crate::value::is_na_double(im) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Character => {
                let len = cur.u64()?;
                for _ in 0..len {
                    let l = cur.i32()?;
                    if l < 0 {
                        return Ok(true);
                    }
                    cur.skip(l as usize)?;
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    /// Reads `n_other` directly off the header and counts the `dims`/`class`
    /// flags, skipping over each nested attribute value with [`skip_body`]
    /// rather than decoding it (spec §4.4 `n_attributes`).
    pub fn n_attributes(&self) -> Result<u64> {
        let mut cur = Cursor::new(&self.bytes[6..]);
        let _type_tag = cur.u32()?;
        let n_other = cur.u64()?;
        for _ in 0..n_other {
            cur.skip_str()?;
            skip_body(&mut cur)?;
        }

        let mut n = n_other;
        let has_dims = cur.u8()?;
        if has_dims == 1 {
            n += 1;
            let nd = cur.u32()?;
            cur.skip(nd as usize * 8)?;
        }
        let has_class = cur.u8()?;
        if has_class == 1 {
            n += 1;
        }
        Ok(n)
    }
}

/// Skips the `n_other`/`dims`/`class` attribute section, leaving the
/// cursor positioned at the start of the type-specific payload.
fn skip_attributes(cur: &mut Cursor<'_>) -> Result<()> {
    let n_other = cur.u64()?;
    for _ in 0..n_other {
        cur.skip_str()?;
        skip_body(cur)?;
    }

    let has_dims = cur.u8()?;
    if has_dims == 1 {
        let n = cur.u32()?;
        cur.skip(n as usize * 8)?;
    }

    let has_class = cur.u8()?;
    if has_class == 1 {
        let n = cur.u32()?;
        for _ in 0..n {
            cur.skip_str()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::na_double;

    #[test]
    fn round_trips_integer_vector_with_na() {
        let v = Value::new(Data::Integer(vec![Some(1), None, Some(3)]));
        let bytes = encode(&v);
        assert_eq!(decode(&bytes).unwrap(), v);
    }

    #[test]
    fn round_trips_character_vector_with_na() {
        let v = Value::new(Data::Character(vec![Some("a".into()), None]));
        let bytes = encode(&v);
        assert_eq!(decode(&bytes).unwrap(), v);
    }

    #[test]
    fn round_trips_nested_list_and_attributes() {
        let mut inner = Value::new(Data::Double(vec![1.0, na_double()]));
        inner.attributes.class = vec!["numeric".into()];
        let outer = Value::new(Data::List(vec![inner.clone(), Value::new(Data::Null)]));
        let bytes = encode(&outer);
        assert_eq!(decode(&bytes).unwrap(), outer);
    }

    #[test]
    fn identical_values_produce_identical_bytes() {
        let a = Value::new(Data::Integer(vec![Some(1), Some(2)]));
        let b = Value::new(Data::Integer(vec![Some(1), Some(2)]));
        assert_eq!(encode(&a), encode(&b));
    }

    #[test]
    fn environments_elide_to_sentinel() {
        let v = Value::new(Data::List(vec![Value::new(Data::Environment)]));
        let bytes = encode(&v);
        let back = decode(&bytes).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn generic_values_keep_their_raw_type_tag_across_the_reserved_range() {
        let a = Value::new(Data::Generic {
            type_tag: 20,
            length: 1,
            bytes: vec![1, 2, 3],
        });
        let b = Value::new(Data::Generic {
            type_tag: 23,
            length: 1,
            bytes: vec![1, 2, 3],
        });
        let encoded_a = encode(&a);
        let encoded_b = encode(&b);
        assert_ne!(encoded_a, encoded_b, "distinct reserved type tags must not collapse to the same bytes");
        assert_eq!(decode(&encoded_a).unwrap(), a);
        assert_eq!(decode(&encoded_b).unwrap(), b);
    }

    #[test]
    fn value_view_has_na_matches_full_decode() {
        let with_na = Value::new(Data::Double(vec![1.0, na_double(), 3.0]));
        let without_na = Value::new(Data::Double(vec![1.0, 2.0, 3.0]));
        assert!(ValueView::parse(&encode(&with_na)).unwrap().has_na().unwrap());
        assert!(!ValueView::parse(&encode(&without_na)).unwrap().has_na().unwrap());
    }

    #[test]
    fn value_view_has_na_skips_past_other_attributes_to_the_payload() {
        let mut v = Value::new(Data::Integer(vec![Some(1), None]));
        v.attributes.other.push(("names".to_string(), Value::new(Data::Character(vec![Some("a".into()), Some("b".into())]))));
        assert!(ValueView::parse(&encode(&v)).unwrap().has_na().unwrap());
    }

    #[test]
    fn value_view_n_attributes_matches_full_decode() {
        let mut v = Value::new(Data::Double(vec![1.0, 2.0]));
        v.attributes.class = vec!["numeric".into()];
        v.attributes.dims = vec![2];
        v.attributes.other.push(("foo".to_string(), Value::new(Data::Null)));
        let bytes = encode(&v);
        assert_eq!(ValueView::parse(&bytes).unwrap().n_attributes().unwrap(), v.n_attributes());
        assert_eq!(v.n_attributes(), 3);
    }
}
