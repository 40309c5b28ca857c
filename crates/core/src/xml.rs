//! XML bodies as JSON values
//!
//! Request bodies are written from a JSON object (one element per key,
//! repeated elements for arrays, nested elements for objects). Response
//! bodies are read back the same way: leaf elements become strings,
//! elements with children become objects, and repeated siblings become
//! arrays. Attributes are ignored.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use serde_json::{Map, Value};

use crate::parameters::filters::scalar_text;

/// Serialize `fields` as `<root>...</root>` with an XML declaration
///
/// # Errors
/// Returns the writer's error message.
pub fn encode(root: &str, fields: &Map<String, Value>) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    let mut writer = Writer::new(&mut out);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| e.to_string())?;
    writer.write_event(Event::Start(BytesStart::new(root))).map_err(|e| e.to_string())?;
    for (name, value) in fields {
        write_value(&mut writer, name, value)?;
    }
    writer.write_event(Event::End(BytesEnd::new(root))).map_err(|e| e.to_string())?;
    Ok(out)
}

fn write_value(writer: &mut Writer<&mut Vec<u8>>, name: &str, value: &Value) -> Result<(), String> {
    match value {
        Value::Array(items) => {
            for item in items {
                write_value(writer, name, item)?;
            }
        }
        Value::Object(map) => {
            writer.write_event(Event::Start(BytesStart::new(name))).map_err(|e| e.to_string())?;
            for (child, value) in map {
                write_value(writer, child, value)?;
            }
            writer.write_event(Event::End(BytesEnd::new(name))).map_err(|e| e.to_string())?;
        }
        Value::Null => {
            writer.write_event(Event::Empty(BytesStart::new(name))).map_err(|e| e.to_string())?;
        }
        scalar => {
            let text = scalar_text(scalar).unwrap_or_default();
            writer.write_event(Event::Start(BytesStart::new(name))).map_err(|e| e.to_string())?;
            writer.write_event(Event::Text(BytesText::new(&text))).map_err(|e| e.to_string())?;
            writer.write_event(Event::End(BytesEnd::new(name))).map_err(|e| e.to_string())?;
        }
    }
    Ok(())
}

struct Frame {
    name: String,
    children: Map<String, Value>,
    text: String,
}

impl Frame {
    fn new(name: String) -> Self {
        Self { name, children: Map::new(), text: String::new() }
    }

    fn into_value(self) -> (String, Value) {
        let value = if self.children.is_empty() {
            Value::String(self.text)
        } else {
            Value::Object(self.children)
        };
        (self.name, value)
    }
}

fn insert_child(parent: &mut Map<String, Value>, name: String, value: Value) {
    match parent.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            parent.insert(name, value);
        }
    }
}

/// Parse a document into its root element name and value
///
/// # Errors
/// Returns a message for malformed XML or a document with no root element.
pub fn decode(content: &str) -> Result<(String, Value), String> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Err(e) => return Err(format!("XML parse error: {}", e)),
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                stack.push(Frame::new(name));
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.children, name, Value::String(String::new())),
                    None => root = Some((name, Value::String(String::new()))),
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(|e| e.to_string())?;
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::End(_)) => {
                let Some(frame) = stack.pop() else {
                    return Err("unbalanced closing tag".to_string());
                };
                let (name, value) = frame.into_value();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.children, name, value),
                    None => root = Some((name, value)),
                }
            }
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err("unexpected end of document".to_string());
    }
    root.ok_or_else(|| "document has no root element".to_string())
}
