#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Declared type of an expression result or of an event's underlying payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum ValueType {
    Null,
    Bool,
    Int64,
    Float64,
    Utf8,
    /// Structured payload identified by its record type name.
    Record(String),
    /// Resolved only at evaluation time.
    Any,
}

impl ValueType {
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int64 | Self::Float64)
    }

    /// True when a value of type `other` can be used where `self` is expected.
    #[must_use]
    pub fn accepts(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Any, _) | (_, Self::Null) => true,
            (Self::Float64, Self::Int64) => true,
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool => f.write_str("bool"),
            Self::Int64 => f.write_str("int64"),
            Self::Float64 => f.write_str("float64"),
            Self::Utf8 => f.write_str("utf8"),
            Self::Record(name) => write!(f, "record<{name}>"),
            Self::Any => f.write_str("any"),
        }
    }
}

/// Named structured payload carried by record-typed events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    type_name: String,
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(type_name: impl Into<String>, fields: BTreeMap<String, Value>) -> Self {
        Self {
            type_name: type_name.into(),
            fields,
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }
}

/// A runtime value. `Null` doubles as the absent result of an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Record(Arc<Record>),
}

impl Value {
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Null => ValueType::Null,
            Self::Bool(_) => ValueType::Bool,
            Self::Int64(_) => ValueType::Int64,
            Self::Float64(_) => ValueType::Float64,
            Self::Utf8(_) => ValueType::Utf8,
            Self::Record(record) => ValueType::Record(record.type_name.clone()),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(v) => Some(*v as f64),
            Self::Float64(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Widens integers when a floating-point result is required; every other
    /// value passes through unchanged.
    #[must_use]
    pub fn coerce(self, target: &ValueType) -> Self {
        match (self, target) {
            (Self::Int64(v), ValueType::Float64) => Self::Float64(v as f64),
            (other, _) => other,
        }
    }

    /// Equality that treats two NaN floats as the same value.
    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float64(a), Self::Float64(b)) => (a.is_nan() && b.is_nan()) || a == b,
            _ => self == other,
        }
    }

    /// Literal text for the value as it appears in expression text.
    #[must_use]
    pub fn to_literal(&self) -> String {
        match self {
            Self::Null => "null".to_owned(),
            Self::Bool(v) => v.to_string(),
            Self::Int64(v) => v.to_string(),
            Self::Float64(v) => {
                let text = v.to_string();
                if v.is_finite() && !text.contains(['.', 'e', 'E']) {
                    format!("{text}.0")
                } else {
                    text
                }
            }
            Self::Utf8(v) => format!("'{}'", v.replace('\\', "\\\\").replace('\'', "\\'")),
            Self::Record(record) => format!("{}{{..}}", record.type_name),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Self::Record(Arc::new(value))
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("implicit conversion from {left} to {right} is not allowed for arithmetic")]
    NonNumericOperands { left: ValueType, right: ValueType },
    #[error("implicit conversion between {left} and {right} is not allowed for comparison")]
    IncomparableOperands { left: ValueType, right: ValueType },
    #[error("{context} requires a bool operand but found {found}")]
    NonBooleanOperand {
        context: &'static str,
        found: ValueType,
    },
    #[error("event of type '{event_type}' requires an underlying {expected} but found {found}")]
    UnderlyingMismatch {
        event_type: String,
        expected: ValueType,
        found: ValueType,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithmeticOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
        }
    }

    #[must_use]
    pub fn is_multiplicative(self) -> bool {
        matches!(self, Self::Mul | Self::Div | Self::Mod)
    }

    /// Result type of `left <op> right`. Division always produces a float.
    pub fn result_type(self, left: &ValueType, right: &ValueType) -> Result<ValueType, TypeError> {
        let promoted = numeric_promotion(left, right)?;
        Ok(match self {
            Self::Div => ValueType::Float64,
            _ => promoted,
        })
    }

    /// Applies the operator. Absent operands, division by zero and integer
    /// overflow all produce `Value::Null`.
    #[must_use]
    pub fn apply(self, left: &Value, right: &Value) -> Value {
        match (left, right) {
            (Value::Int64(a), Value::Int64(b)) => self.apply_i64(*a, *b),
            _ => match (left.as_f64(), right.as_f64()) {
                (Some(a), Some(b)) => self.apply_f64(a, b),
                _ => Value::Null,
            },
        }
    }

    fn apply_i64(self, a: i64, b: i64) -> Value {
        let out = match self {
            Self::Add => a.checked_add(b),
            Self::Sub => a.checked_sub(b),
            Self::Mul => a.checked_mul(b),
            Self::Div => {
                return if b == 0 {
                    Value::Null
                } else {
                    Value::Float64(a as f64 / b as f64)
                };
            }
            Self::Mod => a.checked_rem(b),
        };
        out.map_or(Value::Null, Value::Int64)
    }

    fn apply_f64(self, a: f64, b: f64) -> Value {
        match self {
            Self::Add => Value::Float64(a + b),
            Self::Sub => Value::Float64(a - b),
            Self::Mul => Value::Float64(a * b),
            Self::Div | Self::Mod if b == 0.0 => Value::Null,
            Self::Div => Value::Float64(a / b),
            Self::Mod => Value::Float64(a % b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationalOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl RelationalOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    #[must_use]
    pub fn is_equality(self) -> bool {
        matches!(self, Self::Eq | Self::Ne)
    }

    pub fn check_operands(self, left: &ValueType, right: &ValueType) -> Result<(), TypeError> {
        let compatible = match (left, right) {
            (ValueType::Null | ValueType::Any, _) | (_, ValueType::Null | ValueType::Any) => true,
            (a, b) if a.is_numeric() && b.is_numeric() => true,
            (ValueType::Utf8, ValueType::Utf8) => true,
            (ValueType::Bool, ValueType::Bool) => self.is_equality(),
            (ValueType::Record(a), ValueType::Record(b)) => self.is_equality() && a == b,
            _ => false,
        };
        if compatible {
            Ok(())
        } else {
            Err(TypeError::IncomparableOperands {
                left: left.clone(),
                right: right.clone(),
            })
        }
    }

    /// Compares two values; any absent operand yields `Value::Null`.
    #[must_use]
    pub fn apply(self, left: &Value, right: &Value) -> Value {
        if left.is_null() || right.is_null() {
            return Value::Null;
        }
        match compare_values(left, right) {
            Some(ordering) => Value::Bool(match self {
                Self::Eq => ordering == Ordering::Equal,
                Self::Ne => ordering != Ordering::Equal,
                Self::Lt => ordering == Ordering::Less,
                Self::Le => ordering != Ordering::Greater,
                Self::Gt => ordering == Ordering::Greater,
                Self::Ge => ordering != Ordering::Less,
            }),
            None => match self {
                Self::Eq => Value::Bool(left == right),
                Self::Ne => Value::Bool(left != right),
                _ => Value::Null,
            },
        }
    }
}

fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
        (Value::Utf8(a), Value::Utf8(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    }
}

pub fn numeric_promotion(left: &ValueType, right: &ValueType) -> Result<ValueType, TypeError> {
    use ValueType::{Any, Float64, Int64, Null};

    let out = match (left, right) {
        (Int64, Int64) => Int64,
        (Float64, Int64 | Float64) | (Int64, Float64) => Float64,
        (Null, Null) => Null,
        (Null, other) | (other, Null) if other.is_numeric() => other.clone(),
        (Any, other) | (other, Any) if other.is_numeric() || matches!(other, Any | Null) => Any,
        _ => {
            return Err(TypeError::NonNumericOperands {
                left: left.clone(),
                right: right.clone(),
            });
        }
    };
    Ok(out)
}

/// Three-valued `and`: false dominates, then absence.
#[must_use]
pub fn logical_and(left: &Value, right: &Value) -> Value {
    match (left.as_bool(), right.as_bool()) {
        (Some(false), _) | (_, Some(false)) => Value::Bool(false),
        (Some(true), Some(true)) => Value::Bool(true),
        _ => Value::Null,
    }
}

/// Three-valued `or`: true dominates, then absence.
#[must_use]
pub fn logical_or(left: &Value, right: &Value) -> Value {
    match (left.as_bool(), right.as_bool()) {
        (Some(true), _) | (_, Some(true)) => Value::Bool(true),
        (Some(false), Some(false)) => Value::Bool(false),
        _ => Value::Null,
    }
}

#[must_use]
pub fn logical_not(value: &Value) -> Value {
    value.as_bool().map_or(Value::Null, |v| Value::Bool(!v))
}

/// Describes one kind of event: its name, the type of its underlying payload
/// and the properties readable from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventType {
    name: String,
    underlying: ValueType,
    properties: BTreeMap<String, ValueType>,
}

impl EventType {
    pub fn new(
        name: impl Into<String>,
        underlying: ValueType,
        properties: BTreeMap<String, ValueType>,
    ) -> Self {
        Self {
            name: name.into(),
            underlying,
            properties,
        }
    }

    /// Record-backed event type whose underlying type is `Record(name)`.
    pub fn record<I, K>(name: impl Into<String>, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, ValueType)>,
        K: Into<String>,
    {
        let name = name.into();
        Self {
            underlying: ValueType::Record(name.clone()),
            name,
            properties: properties
                .into_iter()
                .map(|(key, ty)| (key.into(), ty))
                .collect(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn underlying_type(&self) -> &ValueType {
        &self.underlying
    }

    #[must_use]
    pub fn property_type(&self, property: &str) -> Option<&ValueType> {
        self.properties.get(property)
    }

    #[must_use]
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }
}

/// An event handle: the event type plus the underlying payload it wraps.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBean {
    event_type: Arc<EventType>,
    underlying: Value,
}

impl EventBean {
    pub fn new(event_type: Arc<EventType>, underlying: Value) -> Result<Self, TypeError> {
        let found = underlying.value_type();
        let expected = event_type.underlying_type();
        if found == ValueType::Null || !expected.accepts(&found) {
            return Err(TypeError::UnderlyingMismatch {
                event_type: event_type.name().to_owned(),
                expected: expected.clone(),
                found,
            });
        }
        Ok(Self {
            event_type,
            underlying,
        })
    }

    /// Builds a record-backed event; the record takes the event type's name.
    pub fn record<I, K>(event_type: Arc<EventType>, fields: I) -> Result<Self, TypeError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let type_name = match event_type.underlying_type() {
            ValueType::Record(name) => name.clone(),
            _ => event_type.name().to_owned(),
        };
        let fields = fields
            .into_iter()
            .map(|(key, value)| (key.into(), value))
            .collect();
        Self::new(event_type, Value::from(Record::new(type_name, fields)))
    }

    #[must_use]
    pub fn event_type(&self) -> &Arc<EventType> {
        &self.event_type
    }

    #[must_use]
    pub fn underlying(&self) -> &Value {
        &self.underlying
    }

    /// Reads a property from the underlying record; missing fields read as null.
    #[must_use]
    pub fn get(&self, property: &str) -> Value {
        match &self.underlying {
            Value::Record(record) => record.field(property).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

/// One event slot per stream participating in a query. A slot is `None` when
/// no event is available for that stream in the current evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamTuple {
    slots: Vec<Option<Arc<EventBean>>>,
}

impl StreamTuple {
    #[must_use]
    pub fn new(slots: Vec<Option<Arc<EventBean>>>) -> Self {
        Self { slots }
    }

    #[must_use]
    pub fn absent(len: usize) -> Self {
        Self {
            slots: vec![None; len],
        }
    }

    #[must_use]
    pub fn single(event: EventBean) -> Self {
        Self {
            slots: vec![Some(Arc::new(event))],
        }
    }

    pub fn set(&mut self, index: usize, event: Option<Arc<EventBean>>) {
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        self.slots[index] = event;
    }

    /// Event at `index`; a slot past the end reads as absent.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&EventBean> {
        self.slots.get(index).and_then(Option::as_deref)
    }

    /// Shared handle to the event at `index`, for callers that keep it.
    #[must_use]
    pub fn get_shared(&self, index: usize) -> Option<&Arc<EventBean>> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl From<Vec<Option<EventBean>>> for StreamTuple {
    fn from(slots: Vec<Option<EventBean>>) -> Self {
        Self {
            slots: slots.into_iter().map(|slot| slot.map(Arc::new)).collect(),
        }
    }
}
