//! Schema model and the canonical XML codec
//!
//! Schemas travel as a small XML dialect. Encoding is canonical: a schema
//! always encodes to the same bytes, and decoding a canonical document then
//! encoding it again reproduces it exactly. Signatures depend on this.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::error::{CodecError, CodecResult};

/// Canonical text of the built-in empty schema
pub const DEFAULT_MODEL_XML: &str = "<model>\n  <schema/>\n</model>";

/// Names starting with this prefix are internal and never schema fields
pub const RESERVED_PREFIX: &str = "_";

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Identity of a materialized schema lineage
///
/// Assigned once per decoded or freshly built schema. Clones keep it, so an
/// edited clone is recognised as the same lineage by the transient cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    fn next() -> Self {
        Self(NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw counter value
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Kind of value a field holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Free text
    Text,
    /// Signed 64-bit integer
    Int,
    /// Finite 64-bit float
    Float,
    /// Boolean flag
    Bool,
}

impl FieldKind {
    /// Name used in the `type` attribute
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Bool => "bool",
        }
    }

    /// Look up a kind by its `type` attribute
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "text" | "str" | "string" => Some(FieldKind::Text),
            "int" | "integer" => Some(FieldKind::Int),
            "float" => Some(FieldKind::Float),
            "bool" | "boolean" => Some(FieldKind::Bool),
            _ => None,
        }
    }

    /// Parse a serialized default for a field of this kind
    pub fn parse_value(self, field: &str, raw: &str) -> CodecResult<Value> {
        let invalid = || CodecError::InvalidValue {
            field: field.to_string(),
            what: "default",
            raw: raw.to_string(),
        };

        match self {
            FieldKind::Text => Ok(Value::Text(raw.to_string())),
            FieldKind::Int => raw.trim().parse().map(Value::Int).map_err(|_| invalid()),
            FieldKind::Float => match raw.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(Value::Float(v)),
                _ => Err(invalid()),
            },
            FieldKind::Bool => parse_bool(raw).map(Value::Bool).ok_or_else(invalid),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field value or default
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    /// No value
    #[default]
    Null,
    /// Text value
    Text(String),
    /// Integer value
    Int(i64),
    /// Float value
    Float(f64),
    /// Boolean value
    Bool(bool),
}

impl Value {
    /// Kind of this value, `None` for null
    pub fn kind(&self) -> Option<FieldKind> {
        match self {
            Value::Null => None,
            Value::Text(_) => Some(FieldKind::Text),
            Value::Int(_) => Some(FieldKind::Int),
            Value::Float(_) => Some(FieldKind::Float),
            Value::Bool(_) => Some(FieldKind::Bool),
        }
    }

    /// Whether this is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Text content, if this is a text value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, if this is an integer value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean content, if this is a boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Serialized form used in the `default` attribute
    fn render(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            Value::Int(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Bool(v) => Some(v.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.render() {
            Some(text) => f.write_str(&text),
            None => f.write_str("null"),
        }
    }
}

/// A named, typed field with a default value
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Value kind
    pub kind: FieldKind,
    /// Optional human-readable title
    pub title: Option<String>,
    /// Whether a value is required
    pub required: bool,
    /// Default value, null when unset
    pub default: Value,
}

impl Field {
    /// Create an optional field without title or default
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            title: None,
            required: false,
            default: Value::Null,
        }
    }

    /// Set the title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the default value
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = default;
        self
    }

    /// Mark the field as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn validate(&self) -> CodecResult<()> {
        let name_ok = !self.name.is_empty()
            && !self.name.starts_with(RESERVED_PREFIX)
            && self
                .name
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !name_ok {
            return Err(CodecError::InvalidFieldName(self.name.clone()));
        }

        if let Some(kind) = self.default.kind() {
            if kind != self.kind {
                return Err(CodecError::KindMismatch {
                    field: self.name.clone(),
                    kind: self.kind.as_str(),
                });
            }
        }

        if let Value::Float(v) = self.default {
            if !v.is_finite() {
                return Err(CodecError::InvalidValue {
                    field: self.name.clone(),
                    what: "default",
                    raw: v.to_string(),
                });
            }
        }

        let texts = self.title.iter().map(String::as_str).chain(self.default.as_text());
        for text in texts {
            if !text.chars().all(is_xml_char) {
                return Err(CodecError::InvalidCharacter(self.name.clone()));
            }
        }

        Ok(())
    }
}

/// A materialized schema: an ordered list of fields
#[derive(Debug)]
pub struct Schema {
    instance: InstanceId,
    fields: Vec<Field>,
}

impl Schema {
    /// Create an empty schema with a fresh instance id
    pub fn new() -> Self {
        Self {
            instance: InstanceId::next(),
            fields: Vec::new(),
        }
    }

    /// Build a schema from fields, validating each
    pub fn with_fields(fields: impl IntoIterator<Item = Field>) -> CodecResult<Self> {
        let mut schema = Self::new();
        for field in fields {
            schema.push_field(field)?;
        }
        Ok(schema)
    }

    /// Lineage identity of this schema object
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Copy with a fresh instance id, unrelated to this lineage
    pub fn detached(&self) -> Self {
        Self {
            instance: InstanceId::next(),
            fields: self.fields.clone(),
        }
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Field names in declaration order
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Look up a field by name
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether a field with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Default value configured for a field
    pub fn default_for(&self, name: &str) -> Option<&Value> {
        self.get(name).map(|f| &f.default)
    }

    /// Append a field, rejecting duplicates and invalid definitions
    pub fn push_field(&mut self, field: Field) -> CodecResult<()> {
        field.validate()?;
        if self.contains(&field.name) {
            return Err(CodecError::DuplicateField(field.name));
        }
        self.fields.push(field);
        Ok(())
    }

    /// Remove a field by name
    pub fn remove_field(&mut self, name: &str) -> Option<Field> {
        let index = self.fields.iter().position(|f| f.name == name)?;
        Some(self.fields.remove(index))
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Schema {
    fn clone(&self) -> Self {
        Self {
            instance: self.instance,
            fields: self.fields.clone(),
        }
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

/// Encode a schema to its canonical text
pub fn encode(schema: &Schema) -> String {
    if schema.is_empty() {
        return DEFAULT_MODEL_XML.to_string();
    }

    let mut out = String::from("<model>\n  <schema>\n");
    for field in &schema.fields {
        out.push_str("    <field name=\"");
        push_escaped(&mut out, &field.name);
        out.push_str("\" type=\"");
        out.push_str(field.kind.as_str());
        out.push('"');

        if let Some(title) = &field.title {
            out.push_str(" title=\"");
            push_escaped(&mut out, title);
            out.push('"');
        }

        if field.required {
            out.push_str(" required=\"true\"");
        }

        if let Some(raw) = field.default.render() {
            out.push_str(" default=\"");
            push_escaped(&mut out, &raw);
            out.push('"');
        }

        out.push_str("/>\n");
    }
    out.push_str("  </schema>\n</model>");
    out
}

/// Decode schema text
///
/// Accepts a bare `<schema>` root or `<model><schema>`. Empty text decodes
/// to the empty schema.
pub fn decode(text: &str) -> CodecResult<Schema> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Schema::new());
    }

    let doc =
        roxmltree::Document::parse(text).map_err(|e| CodecError::Malformed(e.to_string()))?;
    let root = doc.root_element();

    let schema_node = match root.tag_name().name() {
        "schema" => Some(root),
        "model" => {
            let mut schema_node = None;
            for child in root.children().filter(|n| n.is_element()) {
                match child.tag_name().name() {
                    "schema" if schema_node.is_none() => schema_node = Some(child),
                    other => {
                        return Err(CodecError::UnexpectedElement {
                            expected: "schema",
                            found: other.to_string(),
                        });
                    }
                }
            }
            schema_node
        }
        other => {
            return Err(CodecError::UnexpectedElement {
                expected: "model",
                found: other.to_string(),
            });
        }
    };

    let mut schema = Schema::new();
    let Some(schema_node) = schema_node else {
        return Ok(schema);
    };

    for node in schema_node.children().filter(|n| n.is_element()) {
        if node.tag_name().name() != "field" {
            return Err(CodecError::UnexpectedElement {
                expected: "field",
                found: node.tag_name().name().to_string(),
            });
        }
        schema.push_field(decode_field(node)?)?;
    }

    Ok(schema)
}

fn decode_field(node: roxmltree::Node<'_, '_>) -> CodecResult<Field> {
    let name = node.attribute("name").ok_or(CodecError::MissingAttribute {
        element: "field",
        attribute: "name",
    })?;

    let kind = match node.attribute("type") {
        Some(raw) => FieldKind::from_name(raw).ok_or_else(|| CodecError::UnknownFieldType {
            field: name.to_string(),
            kind: raw.to_string(),
        })?,
        None => FieldKind::Text,
    };

    // Child elements win over attributes of the same name.
    let child_text = |tag: &str| {
        node.children()
            .find(|n| n.is_element() && n.tag_name().name() == tag)
            .map(|n| n.text().unwrap_or(""))
    };

    let mut field = Field::new(name, kind);

    if let Some(title) = child_text("title").or_else(|| node.attribute("title")) {
        field.title = Some(title.to_string());
    }

    if let Some(raw) = child_text("required").or_else(|| node.attribute("required")) {
        field.required = parse_bool(raw).ok_or_else(|| CodecError::InvalidValue {
            field: name.to_string(),
            what: "required",
            raw: raw.to_string(),
        })?;
    }

    if let Some(raw) = child_text("default").or_else(|| node.attribute("default")) {
        field.default = kind.parse_value(name, raw)?;
    }

    Ok(field)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\t' | '\n' | '\r'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

fn push_escaped(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#9;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_schema_encodes_to_default_model() {
        assert_eq!(encode(&Schema::new()), DEFAULT_MODEL_XML);
        assert!(decode(DEFAULT_MODEL_XML).unwrap().is_empty());
        assert!(decode("   ").unwrap().is_empty());
    }

    #[test]
    fn test_decode_bare_schema_root() {
        let schema = decode("<schema><field name='age' default='0'/></schema>").unwrap();
        assert_eq!(schema.field_names(), vec!["age"]);
        let field = schema.get("age").unwrap();
        assert_eq!(field.kind, FieldKind::Text);
        assert_eq!(field.default, Value::Text("0".to_string()));
    }

    #[test]
    fn test_decode_child_elements() {
        let xml = r#"
            <model xmlns="http://namespaces.example.org/schema">
              <schema>
                <field name="count" type="int">
                  <title>Count</title>
                  <required>True</required>
                  <default>7</default>
                  <description>ignored</description>
                </field>
              </schema>
            </model>
        "#;
        let schema = decode(xml).unwrap();
        let field = schema.get("count").unwrap();
        assert_eq!(field.title.as_deref(), Some("Count"));
        assert!(field.required);
        assert_eq!(field.default, Value::Int(7));
    }

    #[test]
    fn test_encode_canonical_layout() {
        let schema = Schema::with_fields([
            Field::new("title", FieldKind::Text).with_default(Value::Text(String::new())),
            Field::new("age", FieldKind::Int)
                .with_title("Age \"years\"")
                .required(),
        ])
        .unwrap();

        let expected = "<model>\n  <schema>\n    \
            <field name=\"title\" type=\"text\" default=\"\"/>\n    \
            <field name=\"age\" type=\"int\" title=\"Age &quot;years&quot;\" required=\"true\"/>\n  \
            </schema>\n</model>";
        assert_eq!(encode(&schema), expected);
    }

    #[test]
    fn test_decode_rejects_malformed_text() {
        assert!(matches!(decode("<schema><field"), Err(CodecError::Malformed(_))));
        assert!(matches!(
            decode("<schema><thing/></schema>"),
            Err(CodecError::UnexpectedElement { .. })
        ));
        assert!(matches!(
            decode("<schema><field type='int'/></schema>"),
            Err(CodecError::MissingAttribute { .. })
        ));
        assert!(matches!(
            decode("<schema><field name='a' type='blob'/></schema>"),
            Err(CodecError::UnknownFieldType { .. })
        ));
        assert!(matches!(
            decode("<schema><field name='a' type='int' default='x'/></schema>"),
            Err(CodecError::InvalidValue { .. })
        ));
        assert!(matches!(
            decode("<schema><field name='a'/><field name='a'/></schema>"),
            Err(CodecError::DuplicateField(_))
        ));
        assert!(matches!(
            decode("<schema><field name='_v_hidden'/></schema>"),
            Err(CodecError::InvalidFieldName(_))
        ));
    }

    #[test]
    fn test_push_field_checks_default_kind() {
        let mut schema = Schema::new();
        let err = schema
            .push_field(Field::new("n", FieldKind::Int).with_default(Value::Bool(true)))
            .unwrap_err();
        assert!(matches!(err, CodecError::KindMismatch { .. }));
        let err = schema
            .push_field(Field::new("t", FieldKind::Text).with_default(Value::Text("\u{1}".into())))
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidCharacter(_)));
    }

    #[test]
    fn test_clone_keeps_lineage_detached_does_not() {
        let schema = Schema::new();
        assert_eq!(schema.clone().instance(), schema.instance());
        assert_ne!(schema.detached().instance(), schema.instance());
        assert_ne!(Schema::new().instance(), schema.instance());
    }

    fn arb_value(kind: FieldKind) -> BoxedStrategy<Value> {
        match kind {
            FieldKind::Text => prop_oneof![
                Just(Value::Null),
                "[ -~\t\n]{0,12}".prop_map(Value::Text)
            ]
            .boxed(),
            FieldKind::Int => prop_oneof![Just(Value::Null), any::<i64>().prop_map(Value::Int)].boxed(),
            FieldKind::Float => prop_oneof![
                Just(Value::Null),
                (-1.0e9f64..1.0e9).prop_map(Value::Float)
            ]
            .boxed(),
            FieldKind::Bool => prop_oneof![Just(Value::Null), any::<bool>().prop_map(Value::Bool)].boxed(),
        }
    }

    fn arb_field() -> impl Strategy<Value = Field> {
        (
            prop_oneof![
                Just(FieldKind::Text),
                Just(FieldKind::Int),
                Just(FieldKind::Float),
                Just(FieldKind::Bool)
            ],
            "[a-z][a-z0-9_]{0,8}",
            proptest::option::of("[ -~]{0,12}"),
            any::<bool>(),
        )
            .prop_flat_map(|(kind, name, title, required)| {
                arb_value(kind).prop_map(move |default| Field {
                    name: name.clone(),
                    kind,
                    title: title.clone(),
                    required,
                    default,
                })
            })
    }

    fn arb_schema() -> impl Strategy<Value = Schema> {
        proptest::collection::vec(arb_field(), 0..6).prop_map(|fields| {
            let mut schema = Schema::new();
            for field in fields {
                // Duplicate names are simply skipped.
                let _ = schema.push_field(field);
            }
            schema
        })
    }

    proptest! {
        #[test]
        fn prop_reencoding_is_byte_identical(schema in arb_schema()) {
            let text = encode(&schema);
            let decoded = decode(&text).unwrap();
            prop_assert_eq!(&decoded, &schema);
            prop_assert_eq!(encode(&decoded), text);
        }
    }
}
