//! # Struct Mapping
//!
//! Purpose: Map flat ordered name/value sequences (hash-style replies) to
//! typed records and back, with embedded-field promotion and shadowing.
//!
//! ## Design Principles
//! 1. **Registration Over Reflection**: Types opt in through the [`Record`]
//!    trait, which declares fields and provides typed accessors by path.
//! 2. **Compile Once**: Field declarations are compiled into a `StructSpec`
//!    and memoized per type for the process lifetime.
//! 3. **Shallow Wins**: A field name declared nearer the root suppresses
//!    the same name promoted from a deeper embedding; same-depth duplicates
//!    are dropped entirely.
//! 4. **Absence Preserves**: Scanning an empty value leaves the destination
//!    field untouched.

use std::any::TypeId;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::{Error, Result};
use crate::proto::Arg;
use crate::reply::parse_bool;

/// Static declaration of one record field.
///
/// The wire name resolves from the primary tag, then the json tag, then the
/// field name itself. A tag of `-` excludes the field. The only recognized
/// tag modifier is `omitempty`.
#[derive(Debug)]
pub struct FieldDef {
    pub name: &'static str,
    pub tag: Option<&'static str>,
    pub json_tag: Option<&'static str>,
    pub kind: FieldKind,
}

/// Whether a declaration is a plain value or an embedded sub-record.
#[derive(Debug)]
pub enum FieldKind {
    Value,
    /// Promoted sub-record; the function returns the embedded type's defs.
    Embedded(fn() -> &'static [FieldDef]),
}

impl FieldDef {
    /// Untagged field: wire name is the field name.
    pub const fn value(name: &'static str) -> FieldDef {
        FieldDef {
            name,
            tag: None,
            json_tag: None,
            kind: FieldKind::Value,
        }
    }

    /// Field with a primary tag, e.g. `"score,omitempty"` or `"-"`.
    pub const fn tagged(name: &'static str, tag: &'static str) -> FieldDef {
        FieldDef {
            name,
            tag: Some(tag),
            json_tag: None,
            kind: FieldKind::Value,
        }
    }

    /// Field carrying only a secondary json tag, used when no primary tag
    /// is present.
    pub const fn json_tagged(name: &'static str, tag: &'static str) -> FieldDef {
        FieldDef {
            name,
            tag: None,
            json_tag: Some(tag),
            kind: FieldKind::Value,
        }
    }

    /// Embedded sub-record whose fields are promoted at depth + 1.
    pub const fn embedded(name: &'static str, fields: fn() -> &'static [FieldDef]) -> FieldDef {
        FieldDef {
            name,
            tag: None,
            json_tag: None,
            kind: FieldKind::Embedded(fields),
        }
    }
}

/// A type that can be scanned from and flattened to wire name/value pairs.
///
/// Field paths are chains of declared field names; embedded records are
/// addressed by delegating the path tail to the embedded impl:
///
/// ```ignore
/// fn read_field(&self, path: &[&str]) -> Option<Arg> {
///     match path {
///         ["score"] => Some(self.score.to_arg()),
///         ["base", rest @ ..] => self.base.read_field(rest),
///         _ => None,
///     }
/// }
/// ```
pub trait Record: 'static {
    /// Field declarations in order.
    fn fields() -> &'static [FieldDef];

    /// Reads the runtime value at a field path.
    fn read_field(&self, path: &[&str]) -> Option<Arg>;

    /// Parses a wire string into the field at a path.
    fn write_field(&mut self, path: &[&str], raw: &str) -> Result<()>;
}

/// Typed string conversion for scannable field types.
pub trait WireField {
    fn to_arg(&self) -> Arg;
    fn assign(&mut self, raw: &str) -> Result<()>;
}

fn cannot_convert(raw: &str, target: &str) -> Error {
    Error::Argument(format!("cannot convert {raw:?} to {target}"))
}

macro_rules! numeric_wire_field {
    ($variant:ident as $wide:ty: $($ty:ty),*) => {
        $(impl WireField for $ty {
            fn to_arg(&self) -> Arg {
                Arg::$variant(*self as $wide)
            }

            fn assign(&mut self, raw: &str) -> Result<()> {
                *self = raw
                    .parse::<$ty>()
                    .map_err(|_| cannot_convert(raw, stringify!($ty)))?;
                Ok(())
            }
        })*
    };
}

numeric_wire_field!(Int as i64: i8, i16, i32, i64, isize);
numeric_wire_field!(Uint as u64: u8, u16, u32, u64, usize);
numeric_wire_field!(Float as f64: f32, f64);

impl WireField for bool {
    fn to_arg(&self) -> Arg {
        Arg::Bool(*self)
    }

    fn assign(&mut self, raw: &str) -> Result<()> {
        *self = parse_bool(raw).ok_or_else(|| cannot_convert(raw, "bool"))?;
        Ok(())
    }
}

impl WireField for String {
    fn to_arg(&self) -> Arg {
        Arg::Str(self.clone())
    }

    fn assign(&mut self, raw: &str) -> Result<()> {
        *self = raw.to_string();
        Ok(())
    }
}

impl WireField for Vec<u8> {
    fn to_arg(&self) -> Arg {
        Arg::Bytes(self.clone())
    }

    fn assign(&mut self, raw: &str) -> Result<()> {
        *self = raw.as_bytes().to_vec();
        Ok(())
    }
}

/// One compiled mapping entry.
#[derive(Debug, Clone)]
pub(crate) struct FieldSpec {
    pub(crate) name: &'static str,
    pub(crate) path: Vec<&'static str>,
    pub(crate) omit_empty: bool,
}

/// Compiled mapping for one record type: declaration-ordered entries plus
/// a wire-name index.
#[derive(Debug, Default)]
pub(crate) struct StructSpec {
    pub(crate) list: Vec<FieldSpec>,
    pub(crate) by_name: HashMap<&'static str, FieldSpec>,
}

fn compile(
    defs: &'static [FieldDef],
    depth: &mut HashMap<&'static str, usize>,
    path: &mut Vec<&'static str>,
    spec: &mut StructSpec,
    type_name: &'static str,
) -> Result<()> {
    for def in defs {
        match def.kind {
            FieldKind::Embedded(fields) => {
                path.push(def.name);
                compile(fields(), depth, path, spec, type_name)?;
                path.pop();
            }
            FieldKind::Value => {
                let mut wire_name = def.name;
                let mut omit_empty = false;
                if let Some(tag) = def.tag.or(def.json_tag) {
                    let mut parts = tag.split(',');
                    let head = parts.next().unwrap_or("");
                    if head == "-" {
                        continue;
                    }
                    if !head.is_empty() {
                        wire_name = head;
                    }
                    for modifier in parts {
                        match modifier {
                            "omitempty" => omit_empty = true,
                            other => {
                                return Err(Error::Argument(format!(
                                    "unknown field flag {other:?} for type {type_name}"
                                )))
                            }
                        }
                    }
                }

                let current = path.len();
                match depth.get(wire_name).copied() {
                    Some(recorded) if current == recorded => {
                        // Same-depth collision: ambiguous, both entries go.
                        spec.by_name.remove(wire_name);
                        spec.list.retain(|fs| fs.name != wire_name);
                    }
                    Some(recorded) if current > recorded => {
                        // A shallower occurrence already won.
                    }
                    _ => {
                        // First sighting, or shallower than the recorded one.
                        spec.by_name.remove(wire_name);
                        spec.list.retain(|fs| fs.name != wire_name);
                        let mut field_path = path.clone();
                        field_path.push(def.name);
                        let fs = FieldSpec {
                            name: wire_name,
                            path: field_path,
                            omit_empty,
                        };
                        depth.insert(wire_name, current);
                        spec.by_name.insert(wire_name, fs.clone());
                        spec.list.push(fs);
                    }
                }
            }
        }
    }
    Ok(())
}

fn spec_cache() -> &'static RwLock<HashMap<TypeId, Arc<StructSpec>>> {
    static CACHE: OnceLock<RwLock<HashMap<TypeId, Arc<StructSpec>>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Returns the compiled spec for `T`, building and caching it on first use.
pub(crate) fn spec_for<T: Record>() -> Result<Arc<StructSpec>> {
    let key = TypeId::of::<T>();
    if let Some(spec) = spec_cache()
        .read()
        .expect("spec cache lock poisoned")
        .get(&key)
    {
        return Ok(Arc::clone(spec));
    }

    let mut cache = spec_cache().write().expect("spec cache lock poisoned");
    if let Some(spec) = cache.get(&key) {
        // Lost the build race to another thread.
        return Ok(Arc::clone(spec));
    }

    let mut spec = StructSpec::default();
    let mut depth = HashMap::new();
    let mut path = Vec::new();
    compile(
        T::fields(),
        &mut depth,
        &mut path,
        &mut spec,
        std::any::type_name::<T>(),
    )?;
    let spec = Arc::new(spec);
    cache.insert(key, Arc::clone(&spec));
    Ok(spec)
}

/// Scans alternating names and values into a record. The `hgetall` and
/// `multi_hget` commands return replies in this format.
///
/// Empty values mean "not present" and leave the destination field at its
/// current value; names the record does not declare are skipped.
pub fn scan_struct<T: Record>(src: &[String], dest: &mut T) -> Result<()> {
    if src.len() % 2 != 0 {
        return Err(Error::Argument(
            "scan expects an even number of values".to_string(),
        ));
    }
    let spec = spec_for::<T>()?;
    for pair in src.chunks_exact(2) {
        let value = pair[1].as_str();
        if value.is_empty() {
            continue;
        }
        let fs = match spec.by_name.get(pair[0].as_str()) {
            Some(fs) => fs,
            None => continue,
        };
        dest.write_field(&fs.path, value)?;
    }
    Ok(())
}

/// Builder for command argument lists from structured values.
#[derive(Debug, Clone, Default)]
pub struct Args(Vec<Arg>);

impl Args {
    pub fn new() -> Args {
        Args(Vec::new())
    }

    /// Appends one argument.
    pub fn add(mut self, value: impl Into<Arg>) -> Args {
        self.0.push(value.into());
        self
    }

    /// Appends alternating wire names and field values of a record, in
    /// compiled declaration order. A non-empty `keys` slice restricts the
    /// output to those wire names; omit-empty fields are skipped when their
    /// value renders empty.
    pub fn add_flat_struct<T: Record>(mut self, record: &T, keys: &[&str]) -> Result<Args> {
        let spec = spec_for::<T>()?;
        for fs in &spec.list {
            if !keys.is_empty() && !keys.contains(&fs.name) {
                continue;
            }
            let value = record.read_field(&fs.path).ok_or_else(|| {
                Error::Argument(format!(
                    "record {} has no field at path {:?}",
                    std::any::type_name::<T>(),
                    fs.path
                ))
            })?;
            if fs.omit_empty && value.is_empty_value() {
                continue;
            }
            self.0.push(Arg::Str(fs.name.to_string()));
            self.0.push(value);
        }
        Ok(self)
    }

    /// Flattens an optional record: `None` appends nothing.
    pub fn add_flat_opt<T: Record>(self, record: Option<&T>, keys: &[&str]) -> Result<Args> {
        match record {
            Some(record) => self.add_flat_struct(record, keys),
            None => Ok(self),
        }
    }

    /// Appends alternating keys and values of a mapping in its natural
    /// iteration order.
    pub fn add_flat_map<K, V>(mut self, entries: impl IntoIterator<Item = (K, V)>) -> Args
    where
        K: Into<Arg>,
        V: Into<Arg>,
    {
        for (key, value) in entries {
            self.0.push(key.into());
            self.0.push(value.into());
        }
        self
    }

    /// Appends each element of a sequence as a bare positional argument.
    pub fn add_flat_seq<V: Into<Arg>>(mut self, items: impl IntoIterator<Item = V>) -> Args {
        for item in items {
            self.0.push(item.into());
        }
        self
    }

    pub fn into_vec(self) -> Vec<Arg> {
        self.0
    }
}

impl Deref for Args {
    type Target = [Arg];

    fn deref(&self) -> &[Arg] {
        &self.0
    }
}

impl From<Args> for Vec<Arg> {
    fn from(args: Args) -> Vec<Arg> {
        args.into_vec()
    }
}
