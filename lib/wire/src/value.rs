//! The typed-value model (C1): a tagged union over the sixteen value kinds the container format
//! can carry, plus the name+children wrapper used to build an ordered, non-unique multi-map.
use byteorder::{ByteOrder, LittleEndian};
use flux::error::{Error, Result};
use std::sync::Arc;

/// A single named entry in a container or nested container. Identity is positional: two entries
/// with the same name are distinct list elements, not overwrites of each other.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedValue {
    pub name: String,
    pub value: Value,
}

impl NamedValue {
    pub fn new(name: impl Into<String>, value: Value) -> NamedValue {
        NamedValue {
            name: name.into(),
            value,
        }
    }
}

/// Fills an `n`-byte little-endian buffer via `write` and returns it as a `Vec<u8>`.
fn le_bytes(n: usize, write: impl FnOnce(&mut [u8])) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    write(&mut buf);
    buf
}

/// A typed value. `Bytes` and `Container` wrap their payload in an `Arc` so that a shallow
/// `Container::copy` can share the underlying allocation with the original instead of walking
/// the whole tree; a deep copy rebuilds fresh `Arc`s recursively (see `Container::copy`).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Short(i8),
    UShort(u8),
    Int(i16),
    UInt(u16),
    Long(i32),
    ULong(u32),
    LLong(i64),
    ULLong(u64),
    Float(f32),
    Double(f64),
    Bytes(Arc<Vec<u8>>),
    String(String),
    Container(Arc<Vec<NamedValue>>),
}

impl Value {
    pub fn bytes(data: Vec<u8>) -> Value {
        Value::Bytes(Arc::new(data))
    }

    pub fn container(children: Vec<NamedValue>) -> Value {
        Value::Container(Arc::new(children))
    }

    /// Single-character type tag from the fixed alphabet:
    /// `0=null 1=bool 2=short 3=ushort 4=int 5=uint 6=long 7=ulong 8=llong 9=ullong a=float
    /// b=double c=bytes d=string e=container`.
    pub fn type_code(&self) -> u8 {
        match self {
            Value::Null => b'0',
            Value::Bool(_) => b'1',
            Value::Short(_) => b'2',
            Value::UShort(_) => b'3',
            Value::Int(_) => b'4',
            Value::UInt(_) => b'5',
            Value::Long(_) => b'6',
            Value::ULong(_) => b'7',
            Value::LLong(_) => b'8',
            Value::ULLong(_) => b'9',
            Value::Float(_) => b'a',
            Value::Double(_) => b'b',
            Value::Bytes(_) => b'c',
            Value::String(_) => b'd',
            Value::Container(_) => b'e',
        }
    }

    /// Raw, unescaped byte payload for leaf values. `None` for containers: their children are
    /// serialized structurally by the container writer instead of as a byte blob.
    fn raw_bytes(&self) -> Option<Vec<u8>> {
        Some(match self {
            Value::Null => Vec::new(),
            Value::Bool(v) => vec![*v as u8],
            Value::Short(v) => vec![*v as u8],
            Value::UShort(v) => vec![*v],
            Value::Int(v) => le_bytes(2, |buf| LittleEndian::write_i16(buf, *v)),
            Value::UInt(v) => le_bytes(2, |buf| LittleEndian::write_u16(buf, *v)),
            Value::Long(v) => le_bytes(4, |buf| LittleEndian::write_i32(buf, *v)),
            Value::ULong(v) => le_bytes(4, |buf| LittleEndian::write_u32(buf, *v)),
            Value::LLong(v) => le_bytes(8, |buf| LittleEndian::write_i64(buf, *v)),
            Value::ULLong(v) => le_bytes(8, |buf| LittleEndian::write_u64(buf, *v)),
            Value::Float(v) => le_bytes(4, |buf| LittleEndian::write_f32(buf, *v)),
            Value::Double(v) => le_bytes(8, |buf| LittleEndian::write_f64(buf, *v)),
            Value::Bytes(v) => (**v).clone(),
            Value::String(s) => s.as_bytes().to_vec(),
            Value::Container(_) => return None,
        })
    }

    fn from_raw_bytes(type_code: u8, data: &[u8]) -> Result<Value> {
        fn need(type_code: u8, data: &[u8], n: usize) -> Result<()> {
            if data.len() != n {
                Err(Error::ContainerParse(format!(
                    "expected {} byte(s) for type code '{}', got {}",
                    n, type_code as char, data.len()
                )))
            } else {
                Ok(())
            }
        }

        Ok(match type_code {
            b'0' => Value::Null,
            b'1' => {
                need(type_code, data, 1)?;
                Value::Bool(data[0] != 0)
            }
            b'2' => {
                need(type_code, data, 1)?;
                Value::Short(data[0] as i8)
            }
            b'3' => {
                need(type_code, data, 1)?;
                Value::UShort(data[0])
            }
            b'4' => {
                need(type_code, data, 2)?;
                Value::Int(LittleEndian::read_i16(data))
            }
            b'5' => {
                need(type_code, data, 2)?;
                Value::UInt(LittleEndian::read_u16(data))
            }
            b'6' => {
                need(type_code, data, 4)?;
                Value::Long(LittleEndian::read_i32(data))
            }
            b'7' => {
                need(type_code, data, 4)?;
                Value::ULong(LittleEndian::read_u32(data))
            }
            b'8' => {
                need(type_code, data, 8)?;
                Value::LLong(LittleEndian::read_i64(data))
            }
            b'9' => {
                need(type_code, data, 8)?;
                Value::ULLong(LittleEndian::read_u64(data))
            }
            b'a' => {
                need(type_code, data, 4)?;
                Value::Float(LittleEndian::read_f32(data))
            }
            b'b' => {
                need(type_code, data, 8)?;
                Value::Double(LittleEndian::read_f64(data))
            }
            b'c' => Value::bytes(data.to_vec()),
            b'd' => Value::String(
                String::from_utf8(data.to_vec()).map_err(|e| Error::ContainerParse(e.to_string()))?,
            ),
            other => {
                return Err(Error::ContainerParse(format!(
                    "unknown type code '{}'",
                    other as char
                )))
            }
        })
    }
}

/// Escape a leaf value's raw bytes for embedding in the textual format:
/// `;` -> `//0`, `]` -> `//1`, `[` -> `//2`, `//` -> `///`.
pub(crate) fn escape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] == b'/' && i + 1 < data.len() && data[i + 1] == b'/' {
            out.extend_from_slice(b"///");
            i += 2;
        } else if data[i] == b';' {
            out.extend_from_slice(b"//0");
            i += 1;
        } else if data[i] == b']' {
            out.extend_from_slice(b"//1");
            i += 1;
        } else if data[i] == b'[' {
            out.extend_from_slice(b"//2");
            i += 1;
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}

/// Reverse of `escape`.
pub(crate) fn unescape(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] == b'/' && i + 1 < data.len() && data[i + 1] == b'/' {
            match data.get(i + 2) {
                Some(b'0') => out.push(b';'),
                Some(b'1') => out.push(b']'),
                Some(b'2') => out.push(b'['),
                Some(b'/') => {
                    out.push(b'/');
                    out.push(b'/');
                }
                _ => return Err(Error::ContainerParse("truncated escape sequence".into())),
            }
            i += 3;
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// Writes `[<name>,<type_code>,<data>]`, recursing into children for container values.
pub(crate) fn write_value(nv: &NamedValue, out: &mut Vec<u8>) {
    out.push(b'[');
    out.extend_from_slice(nv.name.as_bytes());
    out.push(b',');
    out.push(nv.value.type_code());
    out.push(b',');
    match &nv.value {
        Value::Container(children) => {
            for child in children.iter() {
                write_value(child, out);
            }
        }
        _ => {
            let raw = nv.value.raw_bytes().expect("leaf value must carry raw bytes");
            out.extend_from_slice(&escape(&raw));
        }
    }
    out.push(b']');
}

/// Parses a single `[<name>,<type_code>,<data>]` token starting at `pos`. Returns the value and
/// the index just past its closing `]`.
pub(crate) fn parse_value(bytes: &[u8], pos: usize) -> Result<(NamedValue, usize)> {
    if bytes.get(pos) != Some(&b'[') {
        return Err(Error::ContainerParse("expected '['".into()));
    }

    let mut i = pos + 1;
    let name_start = i;
    while bytes.get(i) != Some(&b',') {
        i += 1;
        if i >= bytes.len() {
            return Err(Error::ContainerParse("truncated value header".into()));
        }
    }
    let name =
        String::from_utf8(bytes[name_start..i].to_vec()).map_err(|e| Error::ContainerParse(e.to_string()))?;
    i += 1;

    let type_code = *bytes
        .get(i)
        .ok_or_else(|| Error::ContainerParse("missing type code".into()))?;
    i += 1;

    if bytes.get(i) != Some(&b',') {
        return Err(Error::ContainerParse("expected ',' after type code".into()));
    }
    i += 1;

    let data_end = scan_data_span(bytes, i)?;

    let value = if type_code == b'e' {
        Value::container(parse_value_sequence(&bytes[i..data_end])?)
    } else {
        let raw = unescape(&bytes[i..data_end])?;
        Value::from_raw_bytes(type_code, &raw)?
    };

    Ok((NamedValue { name, value }, data_end + 1))
}

/// Parses a back-to-back (nested container children) or `;`-separated (top-level body) run of
/// value tokens until `bytes` is exhausted.
pub(crate) fn parse_value_sequence(bytes: &[u8]) -> Result<Vec<NamedValue>> {
    let mut values = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        if bytes[pos] == b';' {
            pos += 1;
            continue;
        }
        let (nv, next) = parse_value(bytes, pos)?;
        values.push(nv);
        pos = next;
    }
    Ok(values)
}

/// Parses a run of `[name,field,field,...]` tokens that carry plain escaped strings with no type
/// code, the shape used by the container header (`[source,<id>,<sub_id>];...`). Returns each
/// entry's name and its unescaped field list, in order.
pub(crate) fn parse_value_sequence_raw(bytes: &[u8]) -> Result<Vec<(String, Vec<String>)>> {
    let mut entries = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        if bytes[pos] == b';' {
            pos += 1;
            continue;
        }
        if bytes[pos] != b'[' {
            return Err(Error::ContainerParse("expected '[' in header entry".into()));
        }
        let close = scan_data_span(bytes, pos + 1)?;
        let body = &bytes[pos + 1..close];

        let mut fields: Vec<String> = Vec::new();
        let mut field_start = 0;
        let mut i = 0;
        while i < body.len() {
            match body[i] {
                b'/' if i + 1 < body.len() && body[i + 1] == b'/' => i += 3,
                b',' => {
                    fields.push(String::from_utf8(unescape(&body[field_start..i])?)
                        .map_err(|e| Error::ContainerParse(e.to_string()))?);
                    i += 1;
                    field_start = i;
                }
                _ => i += 1,
            }
        }
        fields.push(
            String::from_utf8(unescape(&body[field_start..])?)
                .map_err(|e| Error::ContainerParse(e.to_string()))?,
        );

        if fields.is_empty() {
            return Err(Error::ContainerParse("empty header entry".into()));
        }
        let name = fields.remove(0);
        entries.push((name, fields));
        pos = close + 1;
    }
    Ok(entries)
}

/// Scans forward from `i` (the first byte of a value's data span) to the index of the `]` that
/// closes this value, treating nested (unescaped) brackets as depth markers and skipping
/// three-byte escape sequences whole so an escaped `]`/`[` is never mistaken for a structural one.
fn scan_data_span(bytes: &[u8], mut i: usize) -> Result<usize> {
    let mut depth = 0i32;
    while i < bytes.len() {
        match bytes[i] {
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => {
                if i + 2 >= bytes.len() {
                    return Err(Error::ContainerParse("truncated escape sequence".into()));
                }
                i += 3;
            }
            b'[' => {
                depth += 1;
                i += 1;
            }
            b']' => {
                if depth == 0 {
                    return Ok(i);
                }
                depth -= 1;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Err(Error::ContainerParse("unterminated value".into()))
}
