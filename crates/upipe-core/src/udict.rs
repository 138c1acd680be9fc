//! Ordered attribute dictionary backing every data unit.
//!
//! Attributes are keyed by `(type, name)`: the same name may exist under
//! two different types and the entries are distinct. Names are arbitrary
//! UTF-8; dot-separated prefixes (`"f."` flow, `"k."` clock, `"p."`
//! picture, `"b."` block) are organizational convention only.
//!
//! In memory a dictionary is an ordered vector of typed entries; lookups
//! are linear because real dictionaries hold a handful of attributes. At
//! persistence boundaries the dictionary round-trips through a compact
//! wire layout where frequently-used keys collapse to a single shorthand
//! byte.

use std::borrow::Cow;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::upool::Upool;

/// Closed set of attribute value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrType {
    /// Raw bytes.
    Opaque,
    /// UTF-8 string.
    String,
    /// Presence flag with no payload.
    Void,
    /// Boolean.
    Bool,
    /// Unsigned fitting one byte.
    SmallUnsigned,
    /// Signed fitting one byte.
    SmallInt,
    /// 64-bit unsigned.
    Unsigned,
    /// 64-bit signed.
    Int,
    /// Rational number.
    Rational,
    /// Double-precision float.
    Float,
}

impl AttrType {
    /// Wire tag for this type.
    fn wire_tag(self) -> u8 {
        match self {
            AttrType::Opaque => 1,
            AttrType::String => 2,
            AttrType::Void => 3,
            AttrType::Bool => 4,
            AttrType::SmallUnsigned => 5,
            AttrType::SmallInt => 6,
            AttrType::Unsigned => 7,
            AttrType::Int => 8,
            AttrType::Rational => 9,
            AttrType::Float => 10,
        }
    }

    fn from_wire_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => AttrType::Opaque,
            2 => AttrType::String,
            3 => AttrType::Void,
            4 => AttrType::Bool,
            5 => AttrType::SmallUnsigned,
            6 => AttrType::SmallInt,
            7 => AttrType::Unsigned,
            8 => AttrType::Int,
            9 => AttrType::Rational,
            10 => AttrType::Float,
            _ => return None,
        })
    }
}

impl std::fmt::Display for AttrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opaque => write!(f, "opaque"),
            Self::String => write!(f, "string"),
            Self::Void => write!(f, "void"),
            Self::Bool => write!(f, "bool"),
            Self::SmallUnsigned => write!(f, "small_unsigned"),
            Self::SmallInt => write!(f, "small_int"),
            Self::Unsigned => write!(f, "unsigned"),
            Self::Int => write!(f, "int"),
            Self::Rational => write!(f, "rational"),
            Self::Float => write!(f, "float"),
        }
    }
}

/// Rational value (`num / den`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rational {
    pub num: i64,
    pub den: u64,
}

impl Rational {
    pub fn new(num: i64, den: u64) -> Self {
        Self { num, den }
    }
}

/// One attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Opaque(Vec<u8>),
    String(String),
    Void,
    Bool(bool),
    SmallUnsigned(u8),
    SmallInt(i8),
    Unsigned(u64),
    Int(i64),
    Rational(Rational),
    Float(f64),
}

impl AttrValue {
    /// The type this value is stored under.
    pub fn attr_type(&self) -> AttrType {
        match self {
            AttrValue::Opaque(_) => AttrType::Opaque,
            AttrValue::String(_) => AttrType::String,
            AttrValue::Void => AttrType::Void,
            AttrValue::Bool(_) => AttrType::Bool,
            AttrValue::SmallUnsigned(_) => AttrType::SmallUnsigned,
            AttrValue::SmallInt(_) => AttrType::SmallInt,
            AttrValue::Unsigned(_) => AttrType::Unsigned,
            AttrValue::Int(_) => AttrType::Int,
            AttrValue::Rational(_) => AttrType::Rational,
            AttrValue::Float(_) => AttrType::Float,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Value};
        match self {
            AttrValue::Opaque(bytes) => json!({ "len": bytes.len() }),
            AttrValue::String(s) => Value::String(s.clone()),
            AttrValue::Void => Value::Null,
            AttrValue::Bool(b) => json!(b),
            AttrValue::SmallUnsigned(v) => json!(v),
            AttrValue::SmallInt(v) => json!(v),
            AttrValue::Unsigned(v) => json!(v),
            AttrValue::Int(v) => json!(v),
            AttrValue::Rational(r) => json!({ "num": r.num, "den": r.den }),
            AttrValue::Float(v) => json!(v),
        }
    }
}

/// Serializable view of one attribute, for introspection dumps.
#[derive(Debug, Clone, Serialize)]
pub struct AttrSnapshot {
    /// Attribute name.
    pub name: String,
    /// Attribute type label.
    pub attr_type: String,
    /// Rendered value.
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    ty: AttrType,
    name: Cow<'static, str>,
    value: AttrValue,
}

// ---------------------------------------------------------------------------
// Shorthand table
// ---------------------------------------------------------------------------

/// Wire shorthands for hot keys. A shorthand byte replaces the explicit
/// `(type, name)` header on the wire; anything not listed here is written
/// with the long form.
const SHORTHANDS: &[(u8, AttrType, &str)] = &[
    (0x80, AttrType::String, "f.def"),
    (0x81, AttrType::Unsigned, "f.id"),
    (0x82, AttrType::String, "f.name"),
    (0x83, AttrType::Void, "f.end"),
    (0x84, AttrType::Unsigned, "k.sys.date"),
    (0x85, AttrType::SmallUnsigned, "k.sys.type"),
    (0x86, AttrType::Unsigned, "k.prog.date"),
    (0x87, AttrType::SmallUnsigned, "k.prog.type"),
    (0x88, AttrType::Unsigned, "k.orig.date"),
    (0x89, AttrType::SmallUnsigned, "k.orig.type"),
    (0x8a, AttrType::Unsigned, "k.dts_pts_delay"),
    (0x8b, AttrType::Unsigned, "k.cr_dts_delay"),
    (0x8c, AttrType::Unsigned, "k.duration"),
    (0x8d, AttrType::Void, "k.random"),
    (0x8e, AttrType::Void, "k.discontinuity"),
    (0x8f, AttrType::Unsigned, "k.latency"),
];

fn shorthand_for(ty: AttrType, name: &str) -> Option<u8> {
    SHORTHANDS
        .iter()
        .find(|(_, t, n)| *t == ty && *n == name)
        .map(|(b, _, _)| *b)
}

fn shorthand_lookup(byte: u8) -> Option<(AttrType, &'static str)> {
    SHORTHANDS
        .iter()
        .find(|(b, _, _)| *b == byte)
        .map(|(_, t, n)| (*t, *n))
}

// ---------------------------------------------------------------------------
// Dictionary
// ---------------------------------------------------------------------------

/// Ordered `(type, name) → value` map.
pub struct Udict {
    entries: Vec<Entry>,
    mgr: Option<Arc<UdictMgr>>,
}

impl Udict {
    /// Create a standalone dictionary not attached to a manager.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            mgr: None,
        }
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no attribute is set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Set an attribute, replacing any previous value under the same
    /// `(type, name)` key. The entry's position is preserved on replace.
    pub fn set(&mut self, name: impl Into<Cow<'static, str>>, value: AttrValue) {
        let name = name.into();
        let ty = value.attr_type();
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.ty == ty && e.name == name)
        {
            entry.value = value;
        } else {
            self.entries.push(Entry { ty, name, value });
        }
    }

    /// Look up an attribute by `(type, name)`.
    pub fn get(&self, ty: AttrType, name: &str) -> Option<&AttrValue> {
        self.entries
            .iter()
            .find(|e| e.ty == ty && e.name == name)
            .map(|e| &e.value)
    }

    /// Delete an attribute. Returns `Error::Unhandled` when absent.
    pub fn delete(&mut self, ty: AttrType, name: &str) -> Result<()> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.ty == ty && e.name == name)
            .ok_or(Error::Unhandled)?;
        self.entries.remove(pos);
        Ok(())
    }

    /// Iterate attributes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (AttrType, &str, &AttrValue)> {
        self.entries.iter().map(|e| (e.ty, e.name.as_ref(), &e.value))
    }

    /// Remove every attribute.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    // -- typed accessors ----------------------------------------------------

    pub fn get_opaque(&self, name: &str) -> Option<&[u8]> {
        match self.get(AttrType::Opaque, name)? {
            AttrValue::Opaque(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        match self.get(AttrType::String, name)? {
            AttrValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_void(&self, name: &str) -> bool {
        self.get(AttrType::Void, name).is_some()
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(AttrType::Bool, name)? {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_small_unsigned(&self, name: &str) -> Option<u8> {
        match self.get(AttrType::SmallUnsigned, name)? {
            AttrValue::SmallUnsigned(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_unsigned(&self, name: &str) -> Option<u64> {
        match self.get(AttrType::Unsigned, name)? {
            AttrValue::Unsigned(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.get(AttrType::Int, name)? {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_float(&self, name: &str) -> Option<f64> {
        match self.get(AttrType::Float, name)? {
            AttrValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_rational(&self, name: &str) -> Option<Rational> {
        match self.get(AttrType::Rational, name)? {
            AttrValue::Rational(v) => Some(*v),
            _ => None,
        }
    }

    /// Serializable dump of every attribute, in order.
    pub fn snapshot(&self) -> Vec<AttrSnapshot> {
        self.entries
            .iter()
            .map(|e| AttrSnapshot {
                name: e.name.to_string(),
                attr_type: e.ty.to_string(),
                value: e.value.to_json(),
            })
            .collect()
    }

    // -- wire layout --------------------------------------------------------

    /// Export to the compact wire layout.
    ///
    /// Each entry is either a shorthand byte, or `0x00` followed by a type
    /// tag and a length-prefixed name; the value encoding follows.
    pub fn export(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * 16);
        for entry in &self.entries {
            match shorthand_for(entry.ty, &entry.name) {
                Some(byte) => out.push(byte),
                None => {
                    out.push(0x00);
                    out.push(entry.ty.wire_tag());
                    let name = entry.name.as_bytes();
                    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
                    out.extend_from_slice(name);
                }
            }
            export_value(&mut out, &entry.value);
        }
        out
    }

    /// Import a wire-layout blob, appending its attributes to this
    /// dictionary.
    pub fn import(&mut self, wire: &[u8]) -> Result<()> {
        let mut cur = wire;
        while !cur.is_empty() {
            let (ty, name): (AttrType, Cow<'static, str>) = if cur[0] >= 0x80 {
                let (ty, name) = shorthand_lookup(cur[0]).ok_or(Error::Invalid)?;
                cur = &cur[1..];
                (ty, Cow::Borrowed(name))
            } else {
                if cur[0] != 0x00 || cur.len() < 4 {
                    return Err(Error::Invalid);
                }
                let ty = AttrType::from_wire_tag(cur[1]).ok_or(Error::Invalid)?;
                let name_len = u16::from_le_bytes([cur[2], cur[3]]) as usize;
                if cur.len() < 4 + name_len {
                    return Err(Error::Invalid);
                }
                let name = std::str::from_utf8(&cur[4..4 + name_len])
                    .map_err(|_| Error::Invalid)?
                    .to_owned();
                cur = &cur[4 + name_len..];
                (ty, Cow::Owned(name))
            };
            let (value, rest) = import_value(ty, cur)?;
            cur = rest;
            self.set(name, value);
        }
        Ok(())
    }
}

impl Default for Udict {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Udict {
    fn clone(&self) -> Self {
        // Duplicates stay attached to the same manager so their storage is
        // recycled through the same pool.
        let mut dup = match self.mgr.as_ref() {
            Some(mgr) => mgr.alloc(),
            None => Udict::new(),
        };
        dup.entries.extend(self.entries.iter().cloned());
        dup
    }
}

impl Drop for Udict {
    fn drop(&mut self) {
        if let Some(mgr) = self.mgr.take() {
            let mut entries = std::mem::take(&mut self.entries);
            entries.clear();
            let _ = mgr.pool.push(entries);
        }
    }
}

impl std::fmt::Debug for Udict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for e in &self.entries {
            map.entry(&format_args!("{}:{}", e.ty, e.name), &e.value);
        }
        map.finish()
    }
}

fn export_value(out: &mut Vec<u8>, value: &AttrValue) {
    match value {
        AttrValue::Opaque(bytes) => {
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(bytes);
        }
        AttrValue::String(s) => {
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        AttrValue::Void => {}
        AttrValue::Bool(b) => out.push(u8::from(*b)),
        AttrValue::SmallUnsigned(v) => out.push(*v),
        AttrValue::SmallInt(v) => out.push(*v as u8),
        AttrValue::Unsigned(v) => out.extend_from_slice(&v.to_le_bytes()),
        AttrValue::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
        AttrValue::Rational(r) => {
            out.extend_from_slice(&r.num.to_le_bytes());
            out.extend_from_slice(&r.den.to_le_bytes());
        }
        AttrValue::Float(v) => out.extend_from_slice(&v.to_bits().to_le_bytes()),
    }
}

fn import_value(ty: AttrType, cur: &[u8]) -> Result<(AttrValue, &[u8])> {
    fn take<const N: usize>(cur: &[u8]) -> Result<([u8; N], &[u8])> {
        if cur.len() < N {
            return Err(Error::Invalid);
        }
        let mut buf = [0u8; N];
        buf.copy_from_slice(&cur[..N]);
        Ok((buf, &cur[N..]))
    }

    Ok(match ty {
        AttrType::Opaque | AttrType::String => {
            let (len, rest) = take::<4>(cur)?;
            let len = u32::from_le_bytes(len) as usize;
            if rest.len() < len {
                return Err(Error::Invalid);
            }
            let (payload, rest2) = rest.split_at(len);
            let value = if ty == AttrType::Opaque {
                AttrValue::Opaque(payload.to_vec())
            } else {
                AttrValue::String(
                    std::str::from_utf8(payload)
                        .map_err(|_| Error::Invalid)?
                        .to_owned(),
                )
            };
            (value, rest2)
        }
        AttrType::Void => (AttrValue::Void, cur),
        AttrType::Bool => {
            let (b, rest) = take::<1>(cur)?;
            (AttrValue::Bool(b[0] != 0), rest)
        }
        AttrType::SmallUnsigned => {
            let (b, rest) = take::<1>(cur)?;
            (AttrValue::SmallUnsigned(b[0]), rest)
        }
        AttrType::SmallInt => {
            let (b, rest) = take::<1>(cur)?;
            (AttrValue::SmallInt(b[0] as i8), rest)
        }
        AttrType::Unsigned => {
            let (b, rest) = take::<8>(cur)?;
            (AttrValue::Unsigned(u64::from_le_bytes(b)), rest)
        }
        AttrType::Int => {
            let (b, rest) = take::<8>(cur)?;
            (AttrValue::Int(i64::from_le_bytes(b)), rest)
        }
        AttrType::Rational => {
            let (num, rest) = take::<8>(cur)?;
            let (den, rest2) = take::<8>(rest)?;
            (
                AttrValue::Rational(Rational {
                    num: i64::from_le_bytes(num),
                    den: u64::from_le_bytes(den),
                }),
                rest2,
            )
        }
        AttrType::Float => {
            let (b, rest) = take::<8>(cur)?;
            (AttrValue::Float(f64::from_bits(u64::from_le_bytes(b))), rest)
        }
    })
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Factory recycling dictionary storage.
pub struct UdictMgr {
    pool: Upool<Vec<Entry>>,
    weak_self: std::sync::Weak<UdictMgr>,
}

impl UdictMgr {
    /// Create a manager caching up to `pool_depth` retired entry tables.
    pub fn new(pool_depth: usize) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            pool: Upool::new(pool_depth),
            weak_self: weak.clone(),
        })
    }

    /// Allocate an empty dictionary, reusing pooled storage when possible.
    pub fn alloc(&self) -> Udict {
        let entries = self.pool.pop().unwrap_or_default();
        Udict {
            entries,
            mgr: self.weak_self.upgrade(),
        }
    }

    /// Drop all cached storage.
    pub fn vacuum(&self) {
        self.pool.vacuum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Basic map behavior
    // -----------------------------------------------------------------------

    #[test]
    fn test_set_get_roundtrip() {
        let mut dict = Udict::new();
        dict.set("f.def", AttrValue::String("block.".into()));
        dict.set("k.duration", AttrValue::Unsigned(40_000));
        assert_eq!(dict.get_string("f.def"), Some("block."));
        assert_eq!(dict.get_unsigned("k.duration"), Some(40_000));
        assert_eq!(dict.len(), 2);
    }

    #[test]
    fn test_same_name_different_types_are_distinct() {
        let mut dict = Udict::new();
        dict.set("x.val", AttrValue::Unsigned(1));
        dict.set("x.val", AttrValue::Int(-1));
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get_unsigned("x.val"), Some(1));
        assert_eq!(dict.get_int("x.val"), Some(-1));
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut dict = Udict::new();
        dict.set("a", AttrValue::Unsigned(1));
        dict.set("b", AttrValue::Unsigned(2));
        dict.set("a", AttrValue::Unsigned(3));
        let order: Vec<&str> = dict.iter().map(|(_, n, _)| n).collect();
        assert_eq!(order, ["a", "b"]);
        assert_eq!(dict.get_unsigned("a"), Some(3));
    }

    #[test]
    fn test_delete_absent_is_unhandled() {
        let mut dict = Udict::new();
        assert_eq!(dict.delete(AttrType::Void, "missing"), Err(Error::Unhandled));
        dict.set("flag", AttrValue::Void);
        assert!(dict.delete(AttrType::Void, "flag").is_ok());
        assert!(!dict.get_void("flag"));
    }

    #[test]
    fn test_void_presence() {
        let mut dict = Udict::new();
        assert!(!dict.get_void("k.random"));
        dict.set("k.random", AttrValue::Void);
        assert!(dict.get_void("k.random"));
    }

    // -----------------------------------------------------------------------
    // Wire layout
    // -----------------------------------------------------------------------

    #[test]
    fn test_wire_roundtrip_all_types() {
        let mut dict = Udict::new();
        dict.set("o", AttrValue::Opaque(vec![1, 2, 3]));
        dict.set("s", AttrValue::String("hello".into()));
        dict.set("v", AttrValue::Void);
        dict.set("b", AttrValue::Bool(true));
        dict.set("su", AttrValue::SmallUnsigned(200));
        dict.set("si", AttrValue::SmallInt(-100));
        dict.set("u", AttrValue::Unsigned(u64::MAX - 1));
        dict.set("i", AttrValue::Int(i64::MIN + 1));
        dict.set("r", AttrValue::Rational(Rational::new(30_000, 1_001)));
        dict.set("f", AttrValue::Float(0.5));

        let wire = dict.export();
        let mut back = Udict::new();
        back.import(&wire).unwrap();
        assert_eq!(back.len(), dict.len());
        for (ty, name, value) in dict.iter() {
            assert_eq!(back.get(ty, name), Some(value), "attr {name}");
        }
    }

    #[test]
    fn test_wire_shorthand_is_one_byte() {
        let mut dict = Udict::new();
        dict.set("f.def", AttrValue::String("void.".into()));
        let wire = dict.export();
        // shorthand byte + u32 length + payload
        assert_eq!(wire.len(), 1 + 4 + 5);
        assert_eq!(wire[0], 0x80);

        let mut back = Udict::new();
        back.import(&wire).unwrap();
        assert_eq!(back.get_string("f.def"), Some("void."));
    }

    #[test]
    fn test_wire_import_rejects_garbage() {
        let mut dict = Udict::new();
        assert_eq!(dict.import(&[0x7f]), Err(Error::Invalid));
        assert_eq!(dict.import(&[0x00, 99, 0, 0]), Err(Error::Invalid));
    }

    #[test]
    fn test_wire_truncated_value_rejected() {
        let mut dict = Udict::new();
        dict.set("k.duration", AttrValue::Unsigned(1));
        let wire = dict.export();
        let mut back = Udict::new();
        assert_eq!(back.import(&wire[..wire.len() - 1]), Err(Error::Invalid));
    }

    // -----------------------------------------------------------------------
    // Manager and duplication
    // -----------------------------------------------------------------------

    #[test]
    fn test_mgr_recycles_storage() {
        let mgr = UdictMgr::new(2);
        {
            let mut dict = mgr.alloc();
            dict.set("a", AttrValue::Unsigned(1));
        }
        // The entry table went back to the pool, cleared.
        let dict = mgr.alloc();
        assert!(dict.is_empty());
    }

    #[test]
    fn test_clone_is_deep() {
        let mgr = UdictMgr::new(2);
        let mut dict = mgr.alloc();
        dict.set("f.def", AttrValue::String("pic.".into()));
        let mut dup = dict.clone();
        dup.set("f.def", AttrValue::String("sound.".into()));
        assert_eq!(dict.get_string("f.def"), Some("pic."));
        assert_eq!(dup.get_string("f.def"), Some("sound."));
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut dict = Udict::new();
        dict.set("f.def", AttrValue::String("block.".into()));
        dict.set("k.duration", AttrValue::Unsigned(27_000_000));
        let snap = dict.snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"f.def\""));
        assert!(json.contains("27000000"));
    }
}
