//! Typed step inputs and `{{ Name }}` references.
//!
//! Input templates are parsed once, when a definition is built. A string that
//! is exactly one reference keeps the referenced value's JSON type; a string
//! with embedded references is rendered as text.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*\}\}")
        .expect("reference pattern is valid")
});

/// A reference to a workflow parameter or to a prior step's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueRef {
    /// `{{ Name }}`
    Parameter(String),
    /// `{{ Step.Output }}`. Outputs of delegated workflows carry a dotted
    /// name, as in `{{ Step.Inner.Output }}`.
    Output {
        /// Producing step.
        step: String,
        /// Output name within the step.
        output: String,
    },
}

impl ValueRef {
    /// Parses the inside of a `{{ }}` pair.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        match path.trim().split_once('.') {
            Some((step, output)) => Self::Output {
                step: step.to_string(),
                output: output.to_string(),
            },
            None => Self::Parameter(path.trim().to_string()),
        }
    }

    /// Creates a parameter reference.
    #[must_use]
    pub fn parameter(name: impl Into<String>) -> Self {
        Self::Parameter(name.into())
    }

    /// Creates an output reference.
    #[must_use]
    pub fn output(step: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Output {
            step: step.into(),
            output: output.into(),
        }
    }

    /// Key of the referenced value in the parameter or output map.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Parameter(name) => name.clone(),
            Self::Output { step, output } => format!("{step}.{output}"),
        }
    }
}

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{{ {} }}}}", self.key())
    }
}

/// Values visible to a step: bound parameters and outputs so far.
#[derive(Debug, Clone, Copy)]
pub struct Bindings<'a> {
    parameters: &'a BTreeMap<String, Value>,
    outputs: &'a BTreeMap<String, Value>,
}

impl<'a> Bindings<'a> {
    /// Creates bindings over an execution's parameters and outputs.
    #[must_use]
    pub fn new(parameters: &'a BTreeMap<String, Value>, outputs: &'a BTreeMap<String, Value>) -> Self {
        Self { parameters, outputs }
    }

    /// Looks up a reference. Outputs of skipped steps are absent.
    #[must_use]
    pub fn lookup(&self, reference: &ValueRef) -> Option<&'a Value> {
        match reference {
            ValueRef::Parameter(name) => self.parameters.get(name),
            ValueRef::Output { .. } => self.outputs.get(&reference.key()),
        }
    }
}

/// A piece of an interpolated string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text.
    Text(String),
    /// An embedded reference.
    Ref(ValueRef),
}

/// A step input template.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    /// A value without references.
    Literal(Value),
    /// A string that is exactly one reference.
    Ref(ValueRef),
    /// A string with embedded references.
    Interpolated(Vec<Segment>),
    /// An array containing references.
    List(Vec<InputValue>),
    /// An object containing references.
    Map(BTreeMap<String, InputValue>),
}

/// Text form of a value used for interpolation and string comparison.
#[must_use]
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_text(text: &str) -> InputValue {
    let mut segments = Vec::new();
    let mut last = 0;
    for caps in REFERENCE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            segments.push(Segment::Text(text[last..whole.start()].to_string()));
        }
        segments.push(Segment::Ref(ValueRef::parse(&caps[1])));
        last = whole.end();
    }
    if segments.is_empty() {
        return InputValue::Literal(Value::String(text.to_string()));
    }
    if last < text.len() {
        segments.push(Segment::Text(text[last..].to_string()));
    }
    match segments.as_slice() {
        [Segment::Ref(reference)] => InputValue::Ref(reference.clone()),
        _ => InputValue::Interpolated(segments),
    }
}

impl InputValue {
    /// Parses a JSON template. Parts without references stay literal.
    #[must_use]
    pub fn parse(template: &Value) -> Self {
        match template {
            Value::String(text) => parse_text(text),
            Value::Array(items) => {
                let parsed: Vec<Self> = items.iter().map(Self::parse).collect();
                if parsed.iter().all(Self::is_literal) {
                    Self::Literal(template.clone())
                } else {
                    Self::List(parsed)
                }
            }
            Value::Object(fields) => {
                let parsed: BTreeMap<String, Self> =
                    fields.iter().map(|(k, v)| (k.clone(), Self::parse(v))).collect();
                if parsed.values().all(Self::is_literal) {
                    Self::Literal(template.clone())
                } else {
                    Self::Map(parsed)
                }
            }
            other => Self::Literal(other.clone()),
        }
    }

    /// Creates a reference input.
    #[must_use]
    pub fn reference(reference: ValueRef) -> Self {
        Self::Ref(reference)
    }

    /// Returns true if no references are involved.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    /// Every reference in the template, in order of appearance.
    #[must_use]
    pub fn references(&self) -> Vec<&ValueRef> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a ValueRef>) {
        match self {
            Self::Literal(_) => {}
            Self::Ref(reference) => out.push(reference),
            Self::Interpolated(segments) => out.extend(segments.iter().filter_map(|s| match s {
                Segment::Ref(reference) => Some(reference),
                Segment::Text(_) => None,
            })),
            Self::List(items) => items.iter().for_each(|i| i.collect_references(out)),
            Self::Map(fields) => fields.values().for_each(|v| v.collect_references(out)),
        }
    }

    /// Resolves the template. Returns the first reference that has no value
    /// when resolution is incomplete.
    ///
    /// # Errors
    ///
    /// Returns the unresolved reference.
    pub fn resolve(&self, bindings: &Bindings<'_>) -> Result<Value, ValueRef> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Ref(reference) => bindings
                .lookup(reference)
                .cloned()
                .ok_or_else(|| reference.clone()),
            Self::Interpolated(segments) => {
                let mut text = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(t) => text.push_str(t),
                        Segment::Ref(reference) => {
                            let value = bindings.lookup(reference).ok_or_else(|| reference.clone())?;
                            text.push_str(&value_text(value));
                        }
                    }
                }
                Ok(Value::String(text))
            }
            Self::List(items) => items
                .iter()
                .map(|item| item.resolve(bindings))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Self::Map(fields) => fields
                .iter()
                .map(|(k, v)| v.resolve(bindings).map(|value| (k.clone(), value)))
                .collect::<Result<Map<String, Value>, _>>()
                .map(Value::Object),
        }
    }

    /// Resolves the template, yielding `None` when a reference is absent.
    #[must_use]
    pub fn try_resolve(&self, bindings: &Bindings<'_>) -> Option<Value> {
        self.resolve(bindings).ok()
    }
}

impl From<Value> for InputValue {
    fn from(value: Value) -> Self {
        Self::parse(&value)
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        parse_text(value)
    }
}

impl From<ValueRef> for InputValue {
    fn from(value: ValueRef) -> Self {
        Self::Ref(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn scope() -> (BTreeMap<String, Value>, BTreeMap<String, Value>) {
        let mut parameters = BTreeMap::new();
        parameters.insert("AuditAccountId".to_string(), json!("222222222222"));
        let mut outputs = BTreeMap::new();
        outputs.insert("GetDetectorId.DetectorId".to_string(), json!("det-1"));
        outputs.insert("Nested.Inner.Count".to_string(), json!(3));
        (parameters, outputs)
    }

    #[test]
    fn test_parse_reference_kinds() {
        assert_eq!(ValueRef::parse("AuditAccountId"), ValueRef::parameter("AuditAccountId"));
        assert_eq!(
            ValueRef::parse(" GetDetectorId.DetectorId "),
            ValueRef::output("GetDetectorId", "DetectorId")
        );
        assert_eq!(
            ValueRef::parse("Nested.Inner.Count"),
            ValueRef::output("Nested", "Inner.Count")
        );
        assert_eq!(ValueRef::output("A", "B").to_string(), "{{ A.B }}");
    }

    #[test]
    fn test_whole_reference_keeps_type() {
        let (p, o) = scope();
        let bindings = Bindings::new(&p, &o);
        let input = InputValue::from("{{ Nested.Inner.Count }}");
        assert!(matches!(input, InputValue::Ref(_)));
        assert_eq!(input.resolve(&bindings).unwrap(), json!(3));
    }

    #[test]
    fn test_interpolation_renders_text() {
        let (p, o) = scope();
        let bindings = Bindings::new(&p, &o);
        let input = InputValue::from("arn:aws:iam::{{AuditAccountId}}:root/{{ Nested.Inner.Count }}");
        assert_eq!(
            input.resolve(&bindings).unwrap(),
            json!("arn:aws:iam::222222222222:root/3")
        );
        assert_eq!(input.references().len(), 2);
    }

    #[test]
    fn test_nested_structures() {
        let (p, o) = scope();
        let bindings = Bindings::new(&p, &o);
        let input = InputValue::parse(&json!([
            {"AccountId": "{{ AuditAccountId }}", "Email": "a@x"},
            {"AccountId": "333", "Email": "b@x"}
        ]));
        assert!(matches!(input, InputValue::List(_)));
        assert_eq!(
            input.resolve(&bindings).unwrap(),
            json!([
                {"AccountId": "222222222222", "Email": "a@x"},
                {"AccountId": "333", "Email": "b@x"}
            ])
        );
    }

    #[test]
    fn test_literals_stay_literal() {
        assert!(InputValue::parse(&json!({"Enable": true, "Name": "x"})).is_literal());
        assert!(InputValue::from("{{ssm:/superwerker/account_id_audit}}").is_literal());
    }

    #[test]
    fn test_missing_reference_is_reported() {
        let (p, o) = scope();
        let bindings = Bindings::new(&p, &o);
        let input = InputValue::from("{{ Skipped.Value }}");
        assert_eq!(input.resolve(&bindings).unwrap_err(), ValueRef::output("Skipped", "Value"));
        assert!(input.try_resolve(&bindings).is_none());
    }
}
