//! Field tables and tagged field values
//!
//! The self-describing composite type of the wire format. A table is an
//! ordered run of `name | tag | value` entries behind a four-byte byte-length
//! prefix, so a reader can skip a table it does not care about without
//! parsing it. Values may themselves contain tables and arrays; recursion is
//! capped at [`MAX_FIELD_NESTING`](super::MAX_FIELD_NESTING) in both
//! directions.

use bytes::{Buf, BufMut, Bytes};

use super::{Error, MAX_FIELD_NESTING, Result, wire};

/// A tagged field value as carried inside tables and arrays.
///
/// The one-byte wire tag and the decoded payload always agree; an
/// unrecognized tag is a hard decode error, never a silent default.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Boolean, tag `t`
    Bool(bool),
    /// Signed 8-bit integer, tag `b`
    I8(i8),
    /// Signed 16-bit integer, tag `U`
    I16(i16),
    /// Signed 32-bit integer, tag `I`
    I32(i32),
    /// Signed 64-bit integer, tag `L`
    I64(i64),
    /// 32-bit float, tag `f`
    F32(f32),
    /// 64-bit double, tag `d`
    F64(f64),
    /// Decimal: scale octet plus signed 32-bit mantissa, tag `D`
    Decimal {
        /// Number of decimal digits after the point
        scale: u8,
        /// Scaled integer value
        mantissa: i32,
    },
    /// Short string (≤255 bytes), tag `s`
    ShortString(String),
    /// Long string, tag `S`
    LongString(String),
    /// Array of field values, tag `A`
    Array(Vec<FieldValue>),
    /// 64-bit POSIX timestamp, tag `T`
    Timestamp(u64),
    /// Nested table, tag `F`
    Table(Table),
    /// Void/null, tag `V`
    Void,
    /// Raw byte run, tag `x`
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// The one-byte wire tag for this value.
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            Self::Bool(_) => b't',
            Self::I8(_) => b'b',
            Self::I16(_) => b'U',
            Self::I32(_) => b'I',
            Self::I64(_) => b'L',
            Self::F32(_) => b'f',
            Self::F64(_) => b'd',
            Self::Decimal { .. } => b'D',
            Self::ShortString(_) => b's',
            Self::LongString(_) => b'S',
            Self::Array(_) => b'A',
            Self::Timestamp(_) => b'T',
            Self::Table(_) => b'F',
            Self::Void => b'V',
            Self::Bytes(_) => b'x',
        }
    }

    fn encode(&self, out: &mut Vec<u8>, depth: usize) -> Result<()> {
        wire::write_u8(out, self.tag());
        match self {
            Self::Bool(v) => wire::write_u8(out, u8::from(*v)),
            Self::I8(v) => wire::write_u8(out, *v as u8),
            Self::I16(v) => wire::write_u16(out, *v as u16),
            Self::I32(v) => wire::write_u32(out, *v as u32),
            Self::I64(v) => wire::write_u64(out, *v as u64),
            Self::F32(v) => wire::write_u32(out, v.to_bits()),
            Self::F64(v) => wire::write_u64(out, v.to_bits()),
            Self::Decimal { scale, mantissa } => {
                wire::write_u8(out, *scale);
                wire::write_u32(out, *mantissa as u32);
            }
            Self::ShortString(s) => wire::write_short_string(out, s)?,
            Self::LongString(s) => wire::write_long_string(out, s),
            Self::Array(items) => {
                if depth >= MAX_FIELD_NESTING {
                    return Err(Error::NestingTooDeep {
                        max: MAX_FIELD_NESTING,
                    });
                }
                let mut body = Vec::new();
                for item in items {
                    item.encode(&mut body, depth + 1)?;
                }
                wire::write_u32(out, body.len() as u32);
                out.put_slice(&body);
            }
            Self::Timestamp(v) => wire::write_u64(out, *v),
            Self::Table(t) => t.encode_nested(out, depth)?,
            Self::Void => {}
            Self::Bytes(b) => wire::write_long_bytes(out, b),
        }
        Ok(())
    }

    fn decode(buf: &mut Bytes, depth: usize) -> Result<Self> {
        let tag = wire::read_u8(buf)?;
        let value = match tag {
            b't' => Self::Bool(wire::read_u8(buf)? != 0),
            b'b' => Self::I8(wire::read_u8(buf)? as i8),
            b'U' => Self::I16(wire::read_u16(buf)? as i16),
            b'I' => Self::I32(wire::read_u32(buf)? as i32),
            b'L' => Self::I64(wire::read_u64(buf)? as i64),
            b'f' => Self::F32(f32::from_bits(wire::read_u32(buf)?)),
            b'd' => Self::F64(f64::from_bits(wire::read_u64(buf)?)),
            b'D' => Self::Decimal {
                scale: wire::read_u8(buf)?,
                mantissa: wire::read_u32(buf)? as i32,
            },
            b's' => Self::ShortString(wire::read_short_string(buf)?),
            b'S' => Self::LongString(wire::read_long_string(buf)?),
            b'A' => {
                if depth >= MAX_FIELD_NESTING {
                    return Err(Error::NestingTooDeep {
                        max: MAX_FIELD_NESTING,
                    });
                }
                let declared = wire::read_u32(buf)? as usize;
                let mut body = take_exact(buf, declared)?;
                let mut items = Vec::new();
                while body.has_remaining() {
                    let item = Self::decode(&mut body, depth + 1).map_err(|e| {
                        exact_consumption_error(e, declared, declared - body.remaining(), false)
                    })?;
                    items.push(item);
                }
                Self::Array(items)
            }
            b'T' => Self::Timestamp(wire::read_u64(buf)?),
            b'F' => Self::Table(Table::decode_nested(buf, depth)?),
            b'V' => Self::Void,
            b'x' => Self::Bytes(wire::read_long_bytes(buf)?),
            tag => return Err(Error::UnknownFieldTag { tag }),
        };
        Ok(value)
    }
}

/// One named slot in a table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableEntry {
    /// Entry name, a short string (≤255 bytes)
    pub name: String,
    /// Entry value
    pub value: FieldValue,
}

/// An ordered field table.
///
/// Insertion order is the wire order and is preserved across a round trip.
/// Duplicate names are legal on the wire and are kept as-is; [`Table::get`]
/// returns the first match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    entries: Vec<TableEntry>,
}

impl Table {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, keeping any existing entry with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.entries.push(TableEntry {
            name: name.into(),
            value,
        });
    }

    /// Look up the first entry with the given name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.value)
    }

    /// Entries in wire order.
    #[must_use]
    pub fn entries(&self) -> &[TableEntry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode the table: `u32 byte-length | entries…`.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        self.encode_nested(out, 0)
    }

    fn encode_nested(&self, out: &mut Vec<u8>, depth: usize) -> Result<()> {
        if depth >= MAX_FIELD_NESTING {
            return Err(Error::NestingTooDeep {
                max: MAX_FIELD_NESTING,
            });
        }
        let mut body = Vec::new();
        for entry in &self.entries {
            wire::write_short_string(&mut body, &entry.name)?;
            entry.value.encode(&mut body, depth + 1)?;
        }
        wire::write_u32(out, body.len() as u32);
        out.put_slice(&body);
        Ok(())
    }

    /// Decode a table, consuming exactly the declared byte length.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::TableLengthMismatch`] if the entries run past the
    /// declared length, or any entry-level format error.
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        Self::decode_nested(buf, 0)
    }

    fn decode_nested(buf: &mut Bytes, depth: usize) -> Result<Self> {
        if depth >= MAX_FIELD_NESTING {
            return Err(Error::NestingTooDeep {
                max: MAX_FIELD_NESTING,
            });
        }
        let declared = wire::read_u32(buf)? as usize;
        let mut body = take_exact(buf, declared)?;

        let mut entries = Vec::new();
        while body.has_remaining() {
            let consumed = declared - body.remaining();
            let entry = Self::decode_entry(&mut body, depth)
                .map_err(|e| exact_consumption_error(e, declared, consumed, true))?;
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    fn decode_entry(body: &mut Bytes, depth: usize) -> Result<TableEntry> {
        let name = wire::read_short_string(body)?;
        let value = FieldValue::decode(body, depth + 1)?;
        Ok(TableEntry { name, value })
    }
}

/// Split off exactly `len` bytes, or report how short the input is.
fn take_exact(buf: &mut Bytes, len: usize) -> Result<Bytes> {
    let got = buf.remaining();
    if got < len {
        return Err(Error::Truncated { needed: len, got });
    }
    Ok(buf.split_to(len))
}

/// An entry that reads past its container's declared length shows up as a
/// truncation of the sub-buffer; report it as the container-level mismatch.
fn exact_consumption_error(err: Error, declared: usize, consumed: usize, table: bool) -> Error {
    match err {
        Error::Truncated { .. } if table => Error::TableLengthMismatch { declared, consumed },
        Error::Truncated { .. } => Error::ArrayLengthMismatch { declared, consumed },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(table: &Table) -> Table {
        let mut out = Vec::new();
        table.encode(&mut out).unwrap();
        let mut buf = Bytes::from(out);
        let decoded = Table::decode(&mut buf).unwrap();
        assert!(buf.is_empty(), "decode left trailing bytes");
        decoded
    }

    fn sample_table() -> Table {
        let mut inner = Table::new();
        inner.insert("retries", FieldValue::I32(-3));

        let mut mid = Table::new();
        mid.insert("nested", FieldValue::Table(inner));
        mid.insert("weights", FieldValue::Array(vec![
            FieldValue::F64(0.25),
            FieldValue::Bool(true),
            FieldValue::Void,
        ]));

        let mut t = Table::new();
        t.insert("product", FieldValue::LongString("marling".into()));
        t.insert("version", FieldValue::ShortString("0.1.0".into()));
        t.insert("capabilities", FieldValue::Table(mid));
        t.insert("started", FieldValue::Timestamp(1_700_000_000));
        t.insert("price", FieldValue::Decimal { scale: 2, mantissa: 1999 });
        t.insert("blob", FieldValue::Bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]));
        t.insert("tiny", FieldValue::I8(-1));
        t.insert("mid", FieldValue::I16(-2));
        t.insert("big", FieldValue::I64(i64::MIN));
        t.insert("ratio", FieldValue::F32(1.5));
        t
    }

    #[test]
    fn roundtrip_all_variants_nested_depth_three() {
        let original = sample_table();
        assert_eq!(roundtrip(&original), original);
    }

    #[test]
    fn empty_table_is_four_zero_bytes() {
        let mut out = Vec::new();
        Table::new().encode(&mut out).unwrap();
        assert_eq!(out, [0, 0, 0, 0]);
    }

    #[test]
    fn insertion_order_preserved() {
        let mut t = Table::new();
        t.insert("z", FieldValue::I32(1));
        t.insert("a", FieldValue::I32(2));
        t.insert("m", FieldValue::I32(3));

        let decoded = roundtrip(&t);
        let names: Vec<_> = decoded.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["z", "a", "m"]);
    }

    #[test]
    fn duplicate_names_roundtrip_and_get_returns_first() {
        let mut t = Table::new();
        t.insert("key", FieldValue::I32(1));
        t.insert("key", FieldValue::I32(2));

        let decoded = roundtrip(&t);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.get("key"), Some(&FieldValue::I32(1)));
    }

    #[test]
    fn unknown_tag_is_hard_error() {
        let mut out = Vec::new();
        let mut body = Vec::new();
        wire::write_short_string(&mut body, "weird").unwrap();
        body.push(b'Q');
        wire::write_u32(&mut out, body.len() as u32);
        out.extend_from_slice(&body);

        let err = Table::decode(&mut Bytes::from(out)).unwrap_err();
        assert!(matches!(err, Error::UnknownFieldTag { tag: b'Q' }));
    }

    #[test]
    fn entries_overrunning_declared_length_fail() {
        let mut t = Table::new();
        t.insert("k", FieldValue::I64(42));
        let mut out = Vec::new();
        t.encode(&mut out).unwrap();

        // Shrink the declared length so the entry reads past it.
        out[3] -= 4;
        out.truncate(out.len() - 4);

        let err = Table::decode(&mut Bytes::from(out)).unwrap_err();
        assert!(matches!(err, Error::TableLengthMismatch { .. }));
    }

    #[test]
    fn declared_length_past_input_fails() {
        let mut out = Vec::new();
        wire::write_u32(&mut out, 100);
        out.extend_from_slice(&[0u8; 10]);

        let err = Table::decode(&mut Bytes::from(out)).unwrap_err();
        assert!(matches!(err, Error::Truncated { needed: 100, got: 10 }));
    }

    #[test]
    fn encode_rejects_pathological_nesting() {
        let mut t = Table::new();
        t.insert("leaf", FieldValue::Void);
        for _ in 0..MAX_FIELD_NESTING {
            let mut outer = Table::new();
            outer.insert("inner", FieldValue::Table(t));
            t = outer;
        }

        let err = t.encode(&mut Vec::new()).unwrap_err();
        assert!(matches!(err, Error::NestingTooDeep { .. }));
    }

    #[test]
    fn decode_rejects_pathological_nesting() {
        // Hand-build `MAX_FIELD_NESTING + 1` levels of `F`-tagged nesting.
        let mut body = vec![0u8, 0, 0, 0];
        for _ in 0..=MAX_FIELD_NESTING {
            let mut outer = Vec::new();
            let mut entry = Vec::new();
            wire::write_short_string(&mut entry, "t").unwrap();
            entry.push(b'F');
            entry.extend_from_slice(&body);
            wire::write_u32(&mut outer, entry.len() as u32);
            outer.extend_from_slice(&entry);
            body = outer;
        }

        let err = Table::decode(&mut Bytes::from(body)).unwrap_err();
        assert!(matches!(err, Error::NestingTooDeep { .. }));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn leaf_value() -> impl Strategy<Value = FieldValue> {
            prop_oneof![
                any::<bool>().prop_map(FieldValue::Bool),
                any::<i8>().prop_map(FieldValue::I8),
                any::<i16>().prop_map(FieldValue::I16),
                any::<i32>().prop_map(FieldValue::I32),
                any::<i64>().prop_map(FieldValue::I64),
                any::<u64>().prop_map(FieldValue::Timestamp),
                (any::<u8>(), any::<i32>())
                    .prop_map(|(scale, mantissa)| FieldValue::Decimal { scale, mantissa }),
                "[a-z]{0,32}".prop_map(FieldValue::ShortString),
                "[ -~]{0,200}".prop_map(FieldValue::LongString),
                prop::collection::vec(any::<u8>(), 0..64).prop_map(FieldValue::Bytes),
                Just(FieldValue::Void),
            ]
        }

        fn field_value() -> impl Strategy<Value = FieldValue> {
            leaf_value().prop_recursive(3, 24, 4, |inner| {
                prop_oneof![
                    prop::collection::vec(inner.clone(), 0..4).prop_map(FieldValue::Array),
                    prop::collection::vec(("[a-z]{1,16}", inner), 0..4).prop_map(|entries| {
                        let mut t = Table::new();
                        for (name, value) in entries {
                            t.insert(name, value);
                        }
                        FieldValue::Table(t)
                    }),
                ]
            })
        }

        proptest! {
            /// Property: any encodable table round-trips byte-exactly.
            #[test]
            fn prop_table_roundtrip(
                entries in prop::collection::vec(("[a-z]{1,16}", field_value()), 0..8)
            ) {
                let mut table = Table::new();
                for (name, value) in entries {
                    table.insert(name, value);
                }

                let mut out = Vec::new();
                table.encode(&mut out).unwrap();
                let mut buf = Bytes::from(out.clone());
                let decoded = Table::decode(&mut buf).unwrap();

                prop_assert_eq!(&decoded, &table);

                // Re-encoding the decoded table reproduces the same bytes.
                let mut again = Vec::new();
                decoded.encode(&mut again).unwrap();
                prop_assert_eq!(again, out);
            }
        }
    }
}
