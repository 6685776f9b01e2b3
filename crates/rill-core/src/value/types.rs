//! Dynamic values flowing between cells.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// A value bound to a name, emitted for display, or passed to a function.
///
/// Composite variants keep insertion order so that rendering is
/// deterministic.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    /// Plain key-value mapping.
    Object(Vec<(String, Value)>),
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
    /// A value of a named class with its own fields.
    Instance {
        class: String,
        fields: Vec<(String, Value)>,
    },
    Date(DateTime<Utc>),
    Function(Function),
    Error {
        name: String,
        message: String,
    },
}

impl Value {
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Name of the value's type, as used in runtime error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Map(_) => "map",
            Self::Set(_) => "set",
            Self::Instance { .. } => "instance",
            Self::Date(_) => "date",
            Self::Function(_) => "function",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Look up a named field of an object, instance or error.
    pub fn field(&self, name: &str) -> Option<Value> {
        match self {
            Self::Object(fields) | Self::Instance { fields, .. } => fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone()),
            Self::Error { name: n, message } => match name {
                "name" => Some(Self::String(n.clone())),
                "message" => Some(Self::String(message.clone())),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let options = crate::inspect::FormatOptions {
            quote: crate::inspect::Quote::None,
            limit: None,
            ..Default::default()
        };
        f.write_str(&crate::inspect::format(self, &options))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(date: DateTime<Utc>) -> Self {
        Self::Date(date)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Self::Function(f)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Something that can be called with values.
///
/// `Err` carries the thrown value.
pub trait Callable: Send + Sync {
    fn call(&self, args: Vec<Value>) -> Result<Value, Value>;

    fn as_any(&self) -> &dyn Any;
}

struct NativeFn<F>(F);

impl<F> Callable for NativeFn<F>
where
    F: Fn(Vec<Value>) -> Result<Value, Value> + Send + Sync + 'static,
{
    fn call(&self, args: Vec<Value>) -> Result<Value, Value> {
        (self.0)(args)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A function value. Two functions are equal only if they are the same
/// function object.
#[derive(Clone)]
pub struct Function {
    name: Option<String>,
    callable: Arc<dyn Callable>,
}

impl Function {
    pub fn new(name: Option<String>, callable: Arc<dyn Callable>) -> Self {
        Self { name, callable }
    }

    /// Wrap a Rust closure.
    pub fn native<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, Value> + Send + Sync + 'static,
    {
        Self {
            name: Some(name.into()),
            callable: Arc::new(NativeFn(f)),
        }
    }

    /// `None` for anonymous functions.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }

    pub fn call(&self, args: Vec<Value>) -> Result<Value, Value> {
        self.callable.call(args)
    }

    pub fn callable(&self) -> &dyn Callable {
        self.callable.as_ref()
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.callable, &other.callable)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "Function({name})"),
            None => f.write_str("Function(anonymous)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
    }

    #[test]
    fn test_field_lookup() {
        let point = Value::Instance {
            class: "Point".into(),
            fields: vec![("x".into(), 1.into()), ("y".into(), 2.into())],
        };
        assert_eq!(point.field("y"), Some(Value::from(2)));
        assert_eq!(point.field("z"), None);

        let err = Value::error("TypeError", "bad");
        assert_eq!(err.field("message"), Some(Value::from("bad")));
    }

    #[test]
    fn test_function_identity() {
        let f = Function::native("inc", |args| {
            let n = args.first().and_then(Value::as_f64).unwrap_or(0.0);
            Ok(Value::Number(n + 1.0))
        });
        let g = Function::native("inc", |_| Ok(Value::Undefined));

        assert_eq!(f, f.clone());
        assert_ne!(f, g);
        assert_eq!(f.call(vec![1.into()]), Ok(Value::from(2)));
        assert_eq!(f.name(), Some("inc"));
    }

    #[test]
    fn test_from_json_keeps_shape() {
        let json = serde_json::json!({"a": [1, "two", null], "b": true});
        let value = Value::from(json);
        assert_eq!(
            value,
            Value::object([
                (
                    "a",
                    Value::Array(vec![1.into(), "two".into(), Value::Null])
                ),
                ("b", Value::Bool(true)),
            ])
        );
    }
}
