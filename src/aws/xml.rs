//! XML response decoding
//!
//! Query and REST-XML APIs answer in XML. Responses are converted into
//! `serde_json::Value` so every service flows through the same record
//! pipeline as the JSON APIs:
//!
//! - the root element is dropped and its content returned
//! - elements whose children are all `<item>` or `<member>` become arrays
//! - repeated sibling elements become arrays
//! - keys are capitalized (`instanceId` -> `InstanceId`) unless an alias
//!   table renames them (`reservationSet` -> `Reservations`)
//! - leaf text stays a string; empty `...Set` elements become `[]`

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

#[derive(Debug, thiserror::Error)]
#[error("invalid XML at byte {position}: {message}")]
pub struct XmlError {
    pub position: u64,
    pub message: String,
}

struct Frame {
    name: String,
    children: Vec<(String, Value)>,
    text: String,
}

impl Frame {
    fn new(name: String) -> Self {
        Self {
            name,
            children: Vec::new(),
            text: String::new(),
        }
    }

    fn finish(self, aliases: Option<&HashMap<String, String>>) -> Value {
        if self.children.is_empty() {
            if !self.text.is_empty() {
                return Value::String(self.text);
            }
            return empty_value(&self.name);
        }

        if self
            .children
            .iter()
            .all(|(name, _)| name == "item" || name == "member")
        {
            return Value::Array(self.children.into_iter().map(|(_, v)| v).collect());
        }

        let mut map = Map::new();
        let mut repeated: HashSet<String> = HashSet::new();
        for (name, value) in self.children {
            let key = rename(&name, aliases);
            match map.get_mut(&key) {
                Some(Value::Array(items)) if repeated.contains(&key) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                    repeated.insert(key);
                }
                None => {
                    map.insert(key, value);
                }
            }
        }
        Value::Object(map)
    }
}

fn empty_value(name: &str) -> Value {
    if name.ends_with("Set") {
        Value::Array(Vec::new())
    } else {
        Value::String(String::new())
    }
}

fn rename(name: &str, aliases: Option<&HashMap<String, String>>) -> String {
    if let Some(alias) = aliases.and_then(|a| a.get(name)) {
        return alias.clone();
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Convert an XML document into JSON, applying `aliases` to element names
pub fn to_value(
    xml: &str,
    aliases: Option<&HashMap<String, String>>,
) -> Result<Value, XmlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<Value> = None;

    let fail = |reader: &Reader<&[u8]>, message: String| XmlError {
        position: reader.buffer_position() as u64,
        message,
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                stack.push(Frame::new(name));
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let value = empty_value(&name);
                match stack.last_mut() {
                    Some(parent) => parent.children.push((name, value)),
                    None => root = Some(value),
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| fail(&reader, e.to_string()))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                let Some(frame) = stack.pop() else {
                    return Err(fail(&reader, "unbalanced closing tag".to_string()));
                };
                let name = frame.name.clone();
                let value = frame.finish(aliases);
                match stack.last_mut() {
                    Some(parent) => parent.children.push((name, value)),
                    None => root = Some(value),
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(fail(&reader, e.to_string())),
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(fail(&reader, "unexpected end of document".to_string()));
    }
    root.ok_or_else(|| XmlError {
        position: 0,
        message: "empty document".to_string(),
    })
}

/// View a value as a list: arrays as-is, a lone object as one element,
/// anything else as nothing. Single repeated elements decode as objects.
pub fn as_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![value],
        _ => Vec::new(),
    }
}
