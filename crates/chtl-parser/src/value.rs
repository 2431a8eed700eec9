//! Evaluated style values and the ordered property map they live in.

use std::fmt;

/// The result of evaluating a style property value.
#[derive(Debug, Clone, PartialEq)]
pub enum StyleValue {
    Numeric { value: f64, unit: String },
    Str(String),
    Bool(bool),
    Empty,
}

impl StyleValue {
    pub fn numeric(value: f64, unit: impl Into<String>) -> Self {
        StyleValue::Numeric {
            value,
            unit: unit.into(),
        }
    }

    /// Classify literal text: `100px` is numeric, `true` boolean, `"a b"` a
    /// string without its quotes, empty text `Empty`, anything else a string.
    pub fn from_literal(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return StyleValue::Empty;
        }
        match raw {
            "true" => return StyleValue::Bool(true),
            "false" => return StyleValue::Bool(false),
            _ => {}
        }
        if let Some(inner) = unquote(raw) {
            return StyleValue::Str(inner.to_string());
        }
        match parse_dimension(raw) {
            Some((value, unit)) => StyleValue::numeric(value, unit),
            None => StyleValue::Str(raw.to_string()),
        }
    }

    /// Name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            StyleValue::Numeric { .. } => "number",
            StyleValue::Str(_) => "string",
            StyleValue::Bool(_) => "boolean",
            StyleValue::Empty => "empty",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, StyleValue::Empty)
    }

    /// CSS text of the value.
    pub fn to_css(&self) -> String {
        match self {
            StyleValue::Numeric { value, unit } => format!("{}{unit}", format_number(*value)),
            StyleValue::Str(s) => s.clone(),
            StyleValue::Bool(b) => b.to_string(),
            StyleValue::Empty => String::new(),
        }
    }
}

impl fmt::Display for StyleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_css())
    }
}

/// Format a number the way CSS expects: `150`, `0.5`, `33.3333`.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let text = format!("{value:.4}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn unquote(raw: &str) -> Option<&str> {
    let bytes = raw.as_bytes();
    if raw.len() >= 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[raw.len() - 1] == bytes[0]
    {
        Some(&raw[1..raw.len() - 1])
    } else {
        None
    }
}

/// Split `-12.5px` into `(-12.5, "px")`; `None` unless the whole text is a dimension.
fn parse_dimension(raw: &str) -> Option<(f64, &str)> {
    let number_len = raw
        .char_indices()
        .take_while(|&(i, c)| c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+')))
        .count();
    let (number, unit) = raw.split_at(number_len);
    if !number.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    if unit != "%" && !unit.bytes().all(|b| b.is_ascii_alphabetic()) {
        return None;
    }
    number.parse().ok().map(|value| (value, unit))
}

/// Insertion-ordered map with last-writer-wins updates.
///
/// Overwriting a key keeps its original position, so a property keeps its
/// place in the rule when a later block overrides it.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyMap<V> {
    entries: Vec<(String, V)>,
}

impl<V> Default for PropertyMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> PropertyMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let at = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(at).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge `other` into `self`, `other` winning on conflicts.
    pub fn extend(&mut self, other: PropertyMap<V>) {
        for (key, value) in other.entries {
            self.insert(key, value);
        }
    }
}
