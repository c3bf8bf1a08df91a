//! Container: a root message with an envelope header and an ordered list of top-level values
//! (C1). Serialization follows the stable textual format:
//! `@header={[source,<sid>,<ssid>];[target,<tid>,<tsid>];[message_type,<mt>];};@data={<value>;...};`
use crate::value::{self, NamedValue, Value};
use flux::error::{Error, Result};

/// Envelope fields carried by every container. `indication_id` is the caller-chosen correlation
/// token used for file and request/response exchanges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub source_id: String,
    pub source_sub_id: String,
    pub target_id: String,
    pub target_sub_id: String,
    pub message_type: String,
    pub indication_id: Option<String>,
}

/// A structured message: an envelope plus an ordered, non-unique multi-map of named values.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub header: Header,
    values: Vec<NamedValue>,
}

impl Container {
    pub fn new_container(
        source_id: impl Into<String>,
        source_sub_id: impl Into<String>,
        target_id: impl Into<String>,
        target_sub_id: impl Into<String>,
        message_type: impl Into<String>,
        values: Vec<NamedValue>,
    ) -> Container {
        Container {
            header: Header {
                source_id: source_id.into(),
                source_sub_id: source_sub_id.into(),
                target_id: target_id.into(),
                target_sub_id: target_sub_id.into(),
                message_type: message_type.into(),
                indication_id: None,
            },
            values,
        }
    }

    pub fn with_indication_id(mut self, indication_id: impl Into<String>) -> Container {
        self.header.indication_id = Some(indication_id.into());
        self
    }

    /// Appends a value. Multiple values may share a name; all are kept in insertion order.
    pub fn add(&mut self, value: NamedValue) {
        self.values.push(value);
    }

    /// Removes every occurrence of `name`.
    pub fn remove(&mut self, name: &str) {
        self.values.retain(|nv| nv.name != name);
    }

    /// All values with the given name, in insertion order.
    pub fn value_array(&self, name: &str) -> Vec<&Value> {
        self.values.iter().filter(|nv| nv.name == name).map(|nv| &nv.value).collect()
    }

    /// The `index`-th value with the given name, if any.
    pub fn get_value(&self, name: &str, index: usize) -> Option<&Value> {
        self.values.iter().filter(|nv| nv.name == name).nth(index).map(|nv| &nv.value)
    }

    pub fn values(&self) -> &[NamedValue] {
        &self.values
    }

    /// Exchanges source and target identifiers in place. Its own inverse: applying it twice
    /// restores the original header.
    pub fn swap_header(&mut self) {
        std::mem::swap(&mut self.header.source_id, &mut self.header.target_id);
        std::mem::swap(&mut self.header.source_sub_id, &mut self.header.target_sub_id);
    }

    /// Deep copy recurses into nested containers and rebuilds fresh allocations throughout;
    /// shallow copy clones the top-level value list but shares nested `Bytes`/`Container`
    /// payloads (via `Arc`) with the original.
    pub fn copy(&self, deep: bool) -> Container {
        Container {
            header: self.header.clone(),
            values: if deep {
                deep_clone_values(&self.values)
            } else {
                self.values.clone()
            },
        }
    }

    /// Serializes the envelope and body into the stable textual format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"@header={");
        write_header_entry(&mut out, "source", &self.header.source_id, &self.header.source_sub_id);
        write_header_entry(&mut out, "target", &self.header.target_id, &self.header.target_sub_id);
        out.extend_from_slice(b"[message_type,");
        out.extend_from_slice(&value::escape(self.header.message_type.as_bytes()));
        out.extend_from_slice(b"];");
        if let Some(indication_id) = &self.header.indication_id {
            out.extend_from_slice(b"[indication_id,");
            out.extend_from_slice(&value::escape(indication_id.as_bytes()));
            out.extend_from_slice(b"];");
        }
        out.extend_from_slice(b"};@data={");
        for nv in &self.values {
            value::write_value(nv, &mut out);
            out.push(b';');
        }
        out.extend_from_slice(b"};");
        out
    }

    /// Parses the textual format produced by `serialize`. Fails atomically: no partial state is
    /// ever exposed on error.
    pub fn deserialize(bytes: &[u8]) -> Result<Container> {
        let bytes = strip_prefix(bytes, b"@header={")?;
        let (header_body, rest) = split_on_matching_brace(bytes)?;
        let header = parse_header(header_body)?;

        let rest = strip_prefix(rest, b";@data={")
            .or_else(|_| strip_prefix(rest, b"@data={"))?;
        let (data_body, rest) = split_on_matching_brace(rest)?;
        if !rest.is_empty() && rest != b";" {
            return Err(Error::ContainerParse("trailing bytes after container body".into()));
        }

        let values = value::parse_value_sequence(data_body)?;

        Ok(Container { header, values })
    }
}

fn deep_clone_values(values: &[NamedValue]) -> Vec<NamedValue> {
    values.iter().map(|nv| NamedValue::new(nv.name.clone(), deep_clone_value(&nv.value))).collect()
}

fn deep_clone_value(value: &Value) -> Value {
    match value {
        Value::Bytes(bytes) => Value::bytes((**bytes).clone()),
        Value::Container(children) => Value::container(deep_clone_values(children)),
        other => other.clone(),
    }
}

fn write_header_entry(out: &mut Vec<u8>, name: &str, id: &str, sub_id: &str) {
    out.push(b'[');
    out.extend_from_slice(name.as_bytes());
    out.push(b',');
    out.extend_from_slice(&value::escape(id.as_bytes()));
    out.push(b',');
    out.extend_from_slice(&value::escape(sub_id.as_bytes()));
    out.extend_from_slice(b"];");
}

fn strip_prefix<'a>(bytes: &'a [u8], prefix: &[u8]) -> Result<&'a [u8]> {
    bytes
        .strip_prefix(prefix)
        .ok_or_else(|| Error::ContainerParse(format!("expected marker {:?}", String::from_utf8_lossy(prefix))))
}

/// Splits `bytes` (which starts right after an opening `{`) at the matching `}`, honoring
/// nested `[...]` depth the same way value parsing does, and returns (body, remainder-after-`}`).
fn split_on_matching_brace(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    let mut depth = 0i32;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => i += 3,
            b'[' => {
                depth += 1;
                i += 1;
            }
            b']' => {
                depth -= 1;
                i += 1;
            }
            b'}' if depth == 0 => return Ok((&bytes[..i], &bytes[i + 1..])),
            _ => i += 1,
        }
    }
    Err(Error::ContainerParse("missing closing '}'".into()))
}

fn parse_header(bytes: &[u8]) -> Result<Header> {
    let entries = value::parse_value_sequence_raw(bytes)?;

    let mut source_id = None;
    let mut source_sub_id = None;
    let mut target_id = None;
    let mut target_sub_id = None;
    let mut message_type = None;
    let mut indication_id = None;

    for (name, parts) in entries {
        match name.as_str() {
            "source" => {
                source_id = parts.first().cloned();
                source_sub_id = parts.get(1).cloned();
            }
            "target" => {
                target_id = parts.first().cloned();
                target_sub_id = parts.get(1).cloned();
            }
            "message_type" => message_type = parts.first().cloned(),
            "indication_id" => indication_id = parts.first().cloned(),
            other => return Err(Error::ContainerParse(format!("unknown header entry '{}'", other))),
        }
    }

    Ok(Header {
        source_id: source_id.ok_or_else(|| Error::ContainerParse("missing source id".into()))?,
        source_sub_id: source_sub_id.unwrap_or_default(),
        target_id: target_id.ok_or_else(|| Error::ContainerParse("missing target id".into()))?,
        target_sub_id: target_sub_id.unwrap_or_default(),
        message_type: message_type.ok_or_else(|| Error::ContainerParse("missing message_type".into()))?,
        indication_id,
    })
}
