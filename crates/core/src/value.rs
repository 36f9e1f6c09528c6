//! In-memory representation of a stored value.
//!
//! `Value` is the logical form callers pass to `add` and get back from
//! `get_value`: a tagged algebraic record (scalar vectors, raw bytes,
//! lists, or an opaque generic payload for everything else). It is
//! deliberately simple — the hard part of this system is what happens to
//! bytes *after* a value is encoded, not the value model itself.

use crate::model::ValueType;

/// NA sentinel bit pattern for `f64` elements. Chosen to be a quiet NaN
/// distinguishable from ordinary NaN results in the common case, without
/// requiring a parallel validity bitmap per vector (spec does not mandate
/// bit-for-bit compatibility with any other vector representation, only
/// that NA-presence is detectable).
pub const NA_REAL_BITS: u64 = 0x7FF0_0000_0000_07A2;

/// NA sentinel for `i32` elements (logical and integer vectors).
pub const NA_INTEGER: i32 = i32::MIN;

/// Returns whether a double's bit pattern is the NA sentinel.
pub fn is_na_double(x: f64) -> bool {
    x.to_bits() == NA_REAL_BITS
}

/// Returns an NA double.
pub fn na_double() -> f64 {
    f64::from_bits(NA_REAL_BITS)
}

/// Attributes carried by a value besides its core payload.
///
/// `class` and `dims` are singled out because the search index and the
/// provenance layer need to reason about them specifically (spec §4.4,
/// §4.6); `other` only ever contributes to `n_attributes`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attributes {
    /// The `class` attribute, in declaration order (order is semantically
    /// significant, spec §3). Empty means "no class attribute".
    pub class: Vec<String>,
    /// The `dim` attribute, if any: `[]` for unset, `[n]` for a 1-D array
    /// with an explicit dim, `[rows, cols]` for a matrix, etc.
    pub dims: Vec<u64>,
    /// Any other named attribute; only its presence/count matters here.
    pub other: Vec<(String, Value)>,
}

impl Attributes {
    pub fn is_empty(&self) -> bool {
        self.class.is_empty() && self.dims.is_empty() && self.other.is_empty()
    }

    /// `n_attributes` as defined in spec §4.4: counts every attribute,
    /// including `class`/`dim` when present.
    pub fn count(&self) -> u64 {
        let mut n = self.other.len() as u64;
        if !self.class.is_empty() {
            n += 1;
        }
        if !self.dims.is_empty() {
            n += 1;
        }
        n
    }
}

/// The payload of a value, tagged by [`ValueType`].
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Null,
    Logical(Vec<Option<bool>>),
    Integer(Vec<Option<i32>>),
    Double(Vec<f64>),
    Complex(Vec<(f64, f64)>),
    Character(Vec<Option<String>>),
    Raw(Vec<u8>),
    List(Vec<Value>),
    /// Not stored as a top-level id (spec §9); elided to a sentinel when
    /// nested inside a `List`.
    Environment,
    /// Not stored as a top-level id (spec §9); elided to a sentinel when
    /// nested inside a `List`.
    Closure,
    /// Catch-all for symbols, language objects, S4 instances, and any
    /// value kind the codec does not give first-class treatment to. The
    /// bytes are opaque to the core; `length` is the element count the
    /// caller reports for query purposes (0 if not meaningful).
    Generic {
        type_tag: u32,
        length: u64,
        bytes: Vec<u8>,
    },
}

impl Data {
    pub fn value_type(&self) -> ValueType {
        match self {
            Data::Null => ValueType::Null,
            Data::Logical(_) => ValueType::Logical,
            Data::Integer(_) => ValueType::Integer,
            Data::Double(_) => ValueType::Double,
            Data::Complex(_) => ValueType::Complex,
            Data::Character(_) => ValueType::Character,
            Data::Raw(_) => ValueType::Raw,
            Data::List(_) => ValueType::List,
            Data::Environment => ValueType::Environment,
            Data::Closure => ValueType::Closure,
            Data::Generic { type_tag, .. } => ValueType::from_tag(*type_tag),
        }
    }

    /// The tag to persist in `static_meta.type_tag` and the codec header.
    ///
    /// Distinct from `value_type().tag()`: for first-class variants the two
    /// agree, but a `Generic` carries its own on-the-wire `type_tag`, which
    /// may fall outside the first-class range and collapse to
    /// [`ValueType::Reserved`] under `value_type()`. Two `Generic` values
    /// with different raw tags are different values and must hash
    /// differently, so persistence always uses the raw tag, never the
    /// classified one.
    pub fn raw_type_tag(&self) -> u32 {
        match self {
            Data::Generic { type_tag, .. } => *type_tag,
            other => other.value_type().tag(),
        }
    }

    /// `length` as defined in spec §4.4.
    pub fn length(&self) -> u64 {
        match self {
            Data::Null => 0,
            Data::Logical(v) => v.len() as u64,
            Data::Integer(v) => v.len() as u64,
            Data::Double(v) => v.len() as u64,
            Data::Complex(v) => v.len() as u64,
            Data::Character(v) => v.len() as u64,
            Data::Raw(v) => v.len() as u64,
            Data::List(v) => v.len() as u64,
            Data::Environment | Data::Closure => 0,
            Data::Generic { length, .. } => *length,
        }
    }

    /// Whether this data contains at least one NA/missing element
    /// (spec §4.6 `na_index`).
    pub fn has_na(&self) -> bool {
        match self {
            Data::Logical(v) | Data::Integer(v) => v.iter().any(|e| e.is_none()),
            Data::Double(v) => v.iter().any(|e| is_na_double(*e)),
            Data::Complex(v) => v
                .iter()
                .any(|(re, im)| is_na_double(*re) || is_na_double(*im)),
            Data::Character(v) => v.iter().any(|e| e.is_none()),
            _ => false,
        }
    }
}

/// A complete logical value: payload plus attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub data: Data,
    pub attributes: Attributes,
}

impl Value {
    pub fn new(data: Data) -> Self {
        Value {
            data,
            attributes: Attributes::default(),
        }
    }

    pub fn with_attributes(data: Data, attributes: Attributes) -> Self {
        Value { data, attributes }
    }

    pub fn value_type(&self) -> ValueType {
        self.data.value_type()
    }

    /// See [`Data::raw_type_tag`].
    pub fn raw_type_tag(&self) -> u32 {
        self.data.raw_type_tag()
    }

    pub fn length(&self) -> u64 {
        self.data.length()
    }

    pub fn n_attributes(&self) -> u64 {
        self.attributes.count()
    }

    pub fn n_dims(&self) -> u32 {
        self.attributes.dims.len() as u32
    }

    /// `n_rows` as defined in spec §4.4: the length for 1-D values, the
    /// first dim for matrices/arrays, or the length of the first column
    /// for a data-frame-shaped list (a `List` whose `class` includes
    /// `"data.frame"`).
    pub fn n_rows(&self) -> u32 {
        match self.attributes.dims.len() {
            0 => self.length() as u32,
            1 => self.attributes.dims[0] as u32,
            _ => self.attributes.dims[0] as u32,
        }
        .max(self.data_frame_row_count().unwrap_or(0))
    }

    fn data_frame_row_count(&self) -> Option<u32> {
        if !self.attributes.dims.is_empty() {
            return None;
        }
        if !self
            .attributes
            .class
            .iter()
            .any(|c| c == "data.frame")
        {
            return None;
        }
        match &self.data {
            Data::List(cols) => cols.first().map(|c| c.length() as u32),
            _ => None,
        }
    }

    pub fn has_na(&self) -> bool {
        self.data.has_na()
    }

    pub fn has_class(&self) -> bool {
        !self.attributes.class.is_empty()
    }

    pub fn is_vector(&self) -> bool {
        self.length() != 1 && !matches!(self.data, Data::Environment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_is_not_a_vector() {
        let v = Value::new(Data::Integer(vec![Some(1)]));
        assert!(!v.is_vector());
    }

    #[test]
    fn multi_element_is_a_vector() {
        let v = Value::new(Data::Integer(vec![Some(1), Some(2)]));
        assert!(v.is_vector());
    }

    #[test]
    fn na_detection_for_doubles() {
        let v = Value::new(Data::Double(vec![1.0, na_double(), 3.0]));
        assert!(v.has_na());
        let v = Value::new(Data::Double(vec![1.0, 2.0, 3.0]));
        assert!(!v.has_na());
    }

    #[test]
    fn matrix_n_rows_uses_first_dim() {
        let mut v = Value::new(Data::Double(vec![0.0; 6]));
        v.attributes.dims = vec![2, 3];
        assert_eq!(v.n_rows(), 2);
        assert_eq!(v.n_dims(), 2);
    }
}
