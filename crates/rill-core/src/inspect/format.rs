//! Deterministic value rendering.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Marker appended to truncated output.
pub const ELLIPSIS: char = '…';

/// Default output length limit, in characters.
pub const DEFAULT_LIMIT: usize = 200;

/// Quoting of string leaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "QuoteRepr", into = "QuoteRepr")]
pub enum Quote {
    #[default]
    Double,
    Single,
    /// Strings are written raw.
    None,
}

impl Quote {
    fn char(self) -> Option<char> {
        match self {
            Self::Double => Some('"'),
            Self::Single => Some('\''),
            Self::None => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum QuoteRepr {
    Flag(bool),
    Name(String),
}

impl TryFrom<QuoteRepr> for Quote {
    type Error = String;

    fn try_from(repr: QuoteRepr) -> Result<Self, Self::Error> {
        match repr {
            QuoteRepr::Flag(false) => Ok(Self::None),
            QuoteRepr::Flag(true) => Ok(Self::Double),
            QuoteRepr::Name(name) => match name.as_str() {
                "double" => Ok(Self::Double),
                "single" => Ok(Self::Single),
                "none" => Ok(Self::None),
                other => Err(format!("unknown quote style `{other}`")),
            },
        }
    }
}

impl From<Quote> for QuoteRepr {
    fn from(quote: Quote) -> Self {
        match quote {
            Quote::Double => Self::Name("double".into()),
            Quote::Single => Self::Name("single".into()),
            Quote::None => Self::Flag(false),
        }
    }
}

/// Pretty-printing of composite values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Option<IndentRepr>", into = "Option<IndentRepr>")]
pub enum Indent {
    /// Single line.
    #[default]
    None,
    Spaces(usize),
    Tab,
}

impl Indent {
    fn unit(self) -> Option<String> {
        match self {
            Self::None => None,
            Self::Spaces(n) => Some(" ".repeat(n)),
            Self::Tab => Some("\t".to_string()),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum IndentRepr {
    Width(usize),
    Text(String),
}

impl TryFrom<Option<IndentRepr>> for Indent {
    type Error = String;

    fn try_from(repr: Option<IndentRepr>) -> Result<Self, Self::Error> {
        match repr {
            None | Some(IndentRepr::Width(0)) => Ok(Self::None),
            Some(IndentRepr::Width(n)) => Ok(Self::Spaces(n)),
            Some(IndentRepr::Text(t)) if t == "\t" => Ok(Self::Tab),
            Some(IndentRepr::Text(t)) if !t.is_empty() && t.chars().all(|c| c == ' ') => {
                Ok(Self::Spaces(t.len()))
            }
            Some(IndentRepr::Text(t)) => Err(format!("invalid indent {t:?}")),
        }
    }
}

impl From<Indent> for Option<IndentRepr> {
    fn from(indent: Indent) -> Self {
        match indent {
            Indent::None => None,
            Indent::Spaces(n) => Some(IndentRepr::Width(n)),
            Indent::Tab => Some(IndentRepr::Text("\t".into())),
        }
    }
}

/// Options for [`format`].
///
/// In JSON, `limit` takes a number, or `null` / `"Infinity"` to disable
/// truncation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatOptions {
    pub quote: Quote,
    pub indent: Indent,
    #[serde(with = "limit")]
    pub limit: Option<usize>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            quote: Quote::Double,
            indent: Indent::None,
            limit: Some(DEFAULT_LIMIT),
        }
    }
}

impl FormatOptions {
    /// Options without truncation.
    pub fn unlimited() -> Self {
        Self {
            limit: None,
            ..Self::default()
        }
    }
}

mod limit {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Count(usize),
        Float(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(limit: &Option<usize>, s: S) -> Result<S::Ok, S::Error> {
        limit.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<usize>, D::Error> {
        match Option::<Repr>::deserialize(d)? {
            None => Ok(None),
            Some(Repr::Count(n)) => Ok(Some(n)),
            Some(Repr::Float(f)) if f.is_infinite() && f > 0.0 => Ok(None),
            Some(Repr::Float(f)) if f >= 0.0 => Ok(Some(f as usize)),
            Some(Repr::Text(t)) if t == "Infinity" => Ok(None),
            Some(_) => Err(serde::de::Error::custom(
                "limit must be a non-negative number, null or \"Infinity\"",
            )),
        }
    }
}

/// Render a value for display.
///
/// The result depends only on `value` and `options`. Output longer than
/// `options.limit` characters is cut to exactly `limit` characters, the last
/// of which is [`ELLIPSIS`].
pub fn format(value: &Value, options: &FormatOptions) -> String {
    let writer = Writer {
        quote: options.quote,
        indent: options.indent.unit(),
    };
    let mut out = String::new();
    writer.value(value, 0, &mut out);
    match options.limit {
        Some(limit) => truncate(out, limit),
        None => out,
    }
}

fn truncate(text: String, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text;
    }
    let mut out: String = text.chars().take(limit.saturating_sub(1)).collect();
    out.push(ELLIPSIS);
    out
}

/// Render a number the way the notebook's host language prints it.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.into();
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0" } else { "0" }.into();
    }
    let abs = n.abs();
    if !(1e-6..1e21).contains(&abs) {
        let text = format!("{n:e}");
        return match text.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => text,
        };
    }
    format!("{n}")
}

struct Writer {
    quote: Quote,
    indent: Option<String>,
}

impl Writer {
    fn value(&self, value: &Value, depth: usize, out: &mut String) {
        match value {
            Value::Undefined => out.push_str("undefined"),
            Value::Null => out.push_str("null"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Number(n) => out.push_str(&format_number(*n)),
            Value::String(s) => self.string(s, out),
            Value::Date(d) => out.push_str(&d.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()),
            Value::Function(f) => match f.name() {
                Some(name) => {
                    let _ = write!(out, "[Function: {name}]");
                }
                None => out.push_str("[Function (anonymous)]"),
            },
            Value::Error { name, message } if message.is_empty() => out.push_str(name),
            Value::Error { name, message } => {
                let _ = write!(out, "{name}: {message}");
            }
            Value::Array(items) => {
                let parts = items.iter().map(|v| self.render(v, depth + 1)).collect();
                self.group("", '[', ']', parts, depth, out);
            }
            Value::Object(fields) => {
                let parts = self.fields(fields, depth);
                self.group("", '{', '}', parts, depth, out);
            }
            Value::Instance { class, fields } => {
                let parts = self.fields(fields, depth);
                self.group(&format!("{class} "), '{', '}', parts, depth, out);
            }
            Value::Map(entries) => {
                let parts = entries
                    .iter()
                    .map(|(k, v)| {
                        format!(
                            "{} => {}",
                            self.render(k, depth + 1),
                            self.render(v, depth + 1)
                        )
                    })
                    .collect();
                self.group(&format!("Map({}) ", entries.len()), '{', '}', parts, depth, out);
            }
            Value::Set(items) => {
                let parts = items.iter().map(|v| self.render(v, depth + 1)).collect();
                self.group(&format!("Set({}) ", items.len()), '{', '}', parts, depth, out);
            }
        }
    }

    fn render(&self, value: &Value, depth: usize) -> String {
        let mut out = String::new();
        self.value(value, depth, &mut out);
        out
    }

    fn fields(&self, fields: &[(String, Value)], depth: usize) -> Vec<String> {
        fields
            .iter()
            .map(|(k, v)| format!("{}: {}", self.key(k), self.render(v, depth + 1)))
            .collect()
    }

    fn key(&self, key: &str) -> String {
        let is_ident = key
            .chars()
            .next()
            .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
            && key.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$');
        if is_ident {
            return key.to_string();
        }
        let mut out = String::new();
        let quote = match self.quote {
            Quote::None => Quote::Double,
            q => q,
        };
        Writer {
            quote,
            indent: None,
        }
        .string(key, &mut out);
        out
    }

    fn string(&self, s: &str, out: &mut String) {
        let Some(q) = self.quote.char() else {
            out.push_str(s);
            return;
        };
        out.push(q);
        for c in s.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if c == q => {
                    out.push('\\');
                    out.push(c);
                }
                c => out.push(c),
            }
        }
        out.push(q);
    }

    fn group(
        &self,
        prefix: &str,
        open: char,
        close: char,
        parts: Vec<String>,
        depth: usize,
        out: &mut String,
    ) {
        out.push_str(prefix);
        out.push(open);
        match &self.indent {
            _ if parts.is_empty() => {}
            None => out.push_str(&parts.join(", ")),
            Some(unit) => {
                let inner = unit.repeat(depth + 1);
                for (i, part) in parts.iter().enumerate() {
                    out.push('\n');
                    out.push_str(&inner);
                    out.push_str(part);
                    if i + 1 < parts.len() {
                        out.push(',');
                    }
                }
                out.push('\n');
                out.push_str(&unit.repeat(depth));
            }
        }
        out.push(close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fmt(value: &Value) -> String {
        format(value, &FormatOptions::default())
    }

    #[test]
    fn test_primitives() {
        assert_eq!(fmt(&Value::Undefined), "undefined");
        assert_eq!(fmt(&Value::Null), "null");
        assert_eq!(fmt(&Value::from(true)), "true");
        assert_eq!(fmt(&Value::from(42)), "42");
        assert_eq!(fmt(&Value::from(-1.5)), "-1.5");
        assert_eq!(fmt(&Value::from(0.1 + 0.2)), "0.30000000000000004");
        assert_eq!(fmt(&Value::Number(f64::INFINITY)), "Infinity");
        assert_eq!(fmt(&Value::Number(1e21)), "1e+21");
        assert_eq!(fmt(&Value::Number(1.5e-7)), "1.5e-7");
        assert_eq!(fmt(&Value::from("hi")), "\"hi\"");
    }

    #[test]
    fn test_quote_styles() {
        let value = Value::from("it's \"x\"");
        let single = FormatOptions {
            quote: Quote::Single,
            ..Default::default()
        };
        let raw = FormatOptions {
            quote: Quote::None,
            ..Default::default()
        };
        assert_eq!(fmt(&value), r#""it's \"x\"""#);
        assert_eq!(format(&value, &single), r#"'it\'s "x"'"#);
        assert_eq!(format(&value, &raw), r#"it's "x""#);
    }

    #[test]
    fn test_composites_single_line() {
        let value = Value::object([
            ("a", Value::from(1)),
            ("b", Value::Array(vec!["x".into(), Value::Null])),
            ("my key", Value::Object(vec![])),
        ]);
        assert_eq!(fmt(&value), r#"{a: 1, b: ["x", null], "my key": {}}"#);

        let map = Value::Map(vec![("k".into(), 1.into()), (2.into(), true.into())]);
        assert_eq!(fmt(&map), r#"Map(2) {"k" => 1, 2 => true}"#);

        let set = Value::Set(vec![1.into(), 2.into()]);
        assert_eq!(fmt(&set), "Set(2) {1, 2}");
    }

    #[test]
    fn test_instances_dates_functions_errors() {
        let point = Value::Instance {
            class: "Point".into(),
            fields: vec![("x".into(), 1.into()), ("y".into(), 2.into())],
        };
        assert_eq!(fmt(&point), "Point {x: 1, y: 2}");

        let date = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(fmt(&Value::Date(date)), "2024-03-01T12:30:00.000Z");

        let named = crate::value::Function::native("double", |_| Ok(Value::Undefined));
        let anonymous = crate::value::Function::native("", |_| Ok(Value::Undefined));
        assert_eq!(fmt(&Value::Function(named)), "[Function: double]");
        assert_eq!(fmt(&Value::Function(anonymous)), "[Function (anonymous)]");

        assert_eq!(fmt(&Value::error("TypeError", "bad")), "TypeError: bad");
    }

    #[test]
    fn test_indented() {
        let value = Value::object([
            ("a", Value::from(1)),
            ("b", Value::Array(vec![1.into(), 2.into()])),
            ("c", Value::Array(vec![])),
        ]);
        let two = FormatOptions {
            indent: Indent::Spaces(2),
            ..Default::default()
        };
        assert_eq!(
            format(&value, &two),
            "{\n  a: 1,\n  b: [\n    1,\n    2\n  ],\n  c: []\n}"
        );

        let tab = FormatOptions {
            indent: Indent::Tab,
            ..Default::default()
        };
        assert_eq!(
            format(&Value::Array(vec![1.into()]), &tab),
            "[\n\t1\n]"
        );
    }

    #[test]
    fn test_limit() {
        let value = Value::Array((0..100).map(Value::from).collect());
        let full = format(&value, &FormatOptions::unlimited());
        assert!(!full.contains(ELLIPSIS));
        assert!(full.chars().count() > DEFAULT_LIMIT);

        let cut = fmt(&value);
        assert_eq!(cut.chars().count(), DEFAULT_LIMIT);
        assert!(cut.ends_with(ELLIPSIS));
        assert!(full.starts_with(cut.trim_end_matches(ELLIPSIS)));

        let short = FormatOptions {
            limit: Some(5),
            ..Default::default()
        };
        assert_eq!(format(&Value::from("abcdefgh"), &short), "\"abc…");
    }

    #[test]
    fn test_idempotent() {
        let value = Value::object([("x", Value::Set(vec!["a".into()]))]);
        let options = FormatOptions {
            indent: Indent::Spaces(4),
            limit: Some(12),
            ..Default::default()
        };
        assert_eq!(format(&value, &options), format(&value, &options));
    }

    #[test]
    fn test_options_from_json() {
        let options: FormatOptions =
            serde_json::from_str(r#"{"quote": false, "indent": "\t", "limit": null}"#).unwrap();
        assert_eq!(
            options,
            FormatOptions {
                quote: Quote::None,
                indent: Indent::Tab,
                limit: None
            }
        );

        let options: FormatOptions =
            serde_json::from_str(r#"{"quote": "single", "indent": 2}"#).unwrap();
        assert_eq!(options.quote, Quote::Single);
        assert_eq!(options.indent, Indent::Spaces(2));
        assert_eq!(options.limit, Some(DEFAULT_LIMIT));

        let options: FormatOptions = serde_json::from_str(r#"{"limit": "Infinity"}"#).unwrap();
        assert_eq!(options.limit, None);

        assert!(serde_json::from_str::<FormatOptions>(r#"{"quote": "backtick"}"#).is_err());
    }
}
