//! Typed view of a tool's JSON-Schema input, for humans.
//!
//! Tool servers describe their arguments as JSON Schema. [`SchemaNode`]
//! parses the subset that matters for display (objects, scalars, enums,
//! arrays) and renders it as a parameter list or an example argument
//! object. Anything unrecognised becomes [`SchemaNode::Any`].

use serde_json::{Map, Value, json};
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    Object {
        properties: Vec<Property>,
        required: Vec<String>,
    },
    String {
        allowed: Vec<String>,
    },
    Number,
    Integer,
    Boolean,
    Array {
        items: Box<SchemaNode>,
    },
    Any,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub description: Option<String>,
    pub node: SchemaNode,
    pub default: Option<Value>,
    pub examples: Vec<Value>,
}

impl SchemaNode {
    pub fn parse(schema: &Value) -> Self {
        let Some(obj) = schema.as_object() else {
            return Self::Any;
        };

        match type_name(obj) {
            Some("object") => Self::parse_object(obj),
            Some("string") => Self::String {
                allowed: obj
                    .get("enum")
                    .and_then(Value::as_array)
                    .map(|values| values.iter().map(display_value).collect())
                    .unwrap_or_default(),
            },
            Some("number") => Self::Number,
            Some("integer") => Self::Integer,
            Some("boolean") => Self::Boolean,
            Some("array") => Self::Array {
                items: Box::new(obj.get("items").map(Self::parse).unwrap_or(Self::Any)),
            },
            _ if obj.contains_key("properties") => Self::parse_object(obj),
            _ => Self::Any,
        }
    }

    fn parse_object(obj: &Map<String, Value>) -> Self {
        let properties = obj
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, schema)| Property {
                        name: name.clone(),
                        description: schema
                            .get("description")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        node: Self::parse(schema),
                        default: schema.get("default").cloned(),
                        examples: schema
                            .get("examples")
                            .and_then(Value::as_array)
                            .cloned()
                            .unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let required = obj
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        Self::Object {
            properties,
            required,
        }
    }

    pub fn type_label(&self) -> String {
        match self {
            Self::Object { .. } => "object".into(),
            Self::String { .. } => "string".into(),
            Self::Number => "number".into(),
            Self::Integer => "integer".into(),
            Self::Boolean => "boolean".into(),
            Self::Array { items } => format!("array of {}", items.type_label()),
            Self::Any => "any".into(),
        }
    }

    /// One line per parameter, nested objects indented by two spaces.
    ///
    /// `- name (type, required): description [one of: a, b]`
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let Self::Object {
            properties,
            required,
        } = self
        else {
            return;
        };

        for prop in properties {
            let indent = "  ".repeat(depth);
            let presence = if required.contains(&prop.name) {
                "required"
            } else {
                "optional"
            };
            let _ = write!(
                out,
                "{indent}- {} ({}, {presence})",
                prop.name,
                prop.node.type_label()
            );
            if let Some(desc) = &prop.description {
                let _ = write!(out, ": {desc}");
            }
            if let Self::String { allowed } = &prop.node {
                if !allowed.is_empty() {
                    let _ = write!(out, " [one of: {}]", allowed.join(", "));
                }
            }
            out.push('\n');

            prop.node.render_into(out, depth + 1);
        }
    }

    /// An example argument value: `default`, else the first example, else
    /// the first enum value, else a placeholder for the type.
    pub fn example(&self) -> Value {
        self.example_named("value")
    }

    fn example_named(&self, name: &str) -> Value {
        match self {
            Self::Object { properties, .. } => {
                let map: Map<String, Value> = properties
                    .iter()
                    .map(|p| (p.name.clone(), p.example()))
                    .collect();
                Value::Object(map)
            }
            Self::String { allowed } => allowed
                .first()
                .map(|v| json!(v))
                .unwrap_or_else(|| json!(format!("<{name}>"))),
            Self::Number | Self::Integer => json!(0),
            Self::Boolean => json!(false),
            Self::Array { .. } => json!([]),
            Self::Any => Value::Null,
        }
    }
}

impl Property {
    fn example(&self) -> Value {
        if let Some(default) = &self.default {
            return default.clone();
        }
        if let Some(first) = self.examples.first() {
            return first.clone();
        }
        self.node.example_named(&self.name)
    }
}

/// `"type"` may be a string or a list such as `["string", "null"]`.
fn type_name(obj: &Map<String, Value>) -> Option<&str> {
    match obj.get("type")? {
        Value::String(s) => Some(s.as_str()),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null"),
        _ => None,
    }
}

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": { "type": "string", "description": "City name", "examples": ["Shanghai"] },
                "days": { "type": "integer", "default": 3 },
                "units": { "type": "string", "enum": ["metric", "imperial"] },
                "detail": {
                    "type": "object",
                    "properties": {
                        "hourly": { "type": "boolean", "description": "Include hourly data" }
                    }
                },
                "tags": { "type": "array", "items": { "type": "string" } },
                "note": { "type": ["string", "null"] }
            },
            "required": ["city"]
        })
    }

    #[test]
    fn parses_nested_structure() {
        let node = SchemaNode::parse(&weather_schema());
        let SchemaNode::Object { properties, required } = &node else {
            panic!("expected object");
        };
        assert_eq!(required, &vec!["city".to_string()]);
        let tags = properties.iter().find(|p| p.name == "tags").unwrap();
        assert_eq!(tags.node.type_label(), "array of string");
        let note = properties.iter().find(|p| p.name == "note").unwrap();
        assert_eq!(note.node.type_label(), "string");
    }

    #[test]
    fn renders_one_line_per_parameter() {
        let text = SchemaNode::parse(&weather_schema()).render();
        assert!(text.contains("- city (string, required): City name\n"));
        assert!(text.contains("- units (string, optional) [one of: metric, imperial]\n"));
        assert!(text.contains("  - hourly (boolean, optional): Include hourly data\n"));
    }

    #[test]
    fn example_prefers_default_then_examples_then_enum() {
        let example = SchemaNode::parse(&weather_schema()).example();
        assert_eq!(example["city"], "Shanghai");
        assert_eq!(example["days"], 3);
        assert_eq!(example["units"], "metric");
        assert_eq!(example["detail"]["hourly"], false);
        assert_eq!(example["tags"], json!([]));
        assert_eq!(example["note"], "<note>");
    }

    #[test]
    fn non_schema_values_are_any() {
        assert_eq!(SchemaNode::parse(&json!(true)), SchemaNode::Any);
        assert_eq!(SchemaNode::parse(&json!({"type": "object"})).render(), "");
    }
}
