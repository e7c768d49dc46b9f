use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const MAX_DIMENSION: usize = 2;

/// Scalar type of a parameter or of the return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IoType {
    Int,
    Long,
    Float,
    Double,
    Str,
    Bool,
}

impl IoType {
    pub fn name(&self) -> &'static str {
        match self {
            IoType::Int => "int",
            IoType::Long => "long",
            IoType::Float => "float",
            IoType::Double => "double",
            IoType::Str => "str",
            IoType::Bool => "bool",
        }
    }

    /// Check a scalar against the range of this type.
    pub fn check_scalar(&self, value: &Value) -> std::result::Result<(), String> {
        let ok = match (self, value) {
            (IoType::Int, Value::Int(x)) => i32::try_from(*x).is_ok(),
            (IoType::Long, Value::Int(_)) => true,
            (IoType::Float, Value::Float(x)) => {
                *x == 0.0 || (f32::MIN_POSITIVE as f64 <= x.abs() && x.abs() <= f32::MAX as f64)
            }
            (IoType::Double, Value::Float(x)) => {
                *x == 0.0 || (f64::MIN_POSITIVE <= x.abs() && x.abs() <= f64::MAX)
            }
            (IoType::Str, Value::Str(s)) => s.is_ascii() && !s.contains('"'),
            (IoType::Bool, Value::Bool(_)) => true,
            _ => {
                return Err(format!(
                    "expected a {} scalar, found {}",
                    self.name(),
                    value
                ))
            }
        };
        if ok {
            Ok(())
        } else {
            Err(format!("{} is out of range for {}", value, self.name()))
        }
    }
}

impl FromStr for IoType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let t = match s.trim() {
            "int" | "integer" | "int32" => IoType::Int,
            "long" | "long long" | "long long int" | "int64" => IoType::Long,
            "float" | "float32" => IoType::Float,
            "double" | "real" | "float64" => IoType::Double,
            "str" | "string" | "char*" => IoType::Str,
            "bool" | "boolean" => IoType::Bool,
            other => return Err(Error::Config(format!("there is no io type `{}`", other))),
        };
        Ok(t)
    }
}

impl TryFrom<String> for IoType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<IoType> for String {
    fn from(v: IoType) -> Self {
        v.name().into()
    }
}

impl fmt::Display for IoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared (type, nesting dimension) of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    #[serde(rename = "type")]
    pub io_type: IoType,
    pub dimension: usize,
}

impl Shape {
    pub fn new(io_type: IoType, dimension: usize) -> Result<Self> {
        let shape = Self { io_type, dimension };
        shape.check_valid()?;
        Ok(shape)
    }

    pub fn scalar(io_type: IoType) -> Self {
        Self {
            io_type,
            dimension: 0,
        }
    }

    pub fn check_valid(&self) -> Result<()> {
        if self.dimension > MAX_DIMENSION {
            return Err(Error::Config(format!(
                "dimension {} exceeds the maximum of {}",
                self.dimension, MAX_DIMENSION
            )));
        }
        Ok(())
    }

    /// Check a whole value against this shape: nesting, scalar ranges, and
    /// rectangularity of multi-dimensional arrays.
    pub fn check(&self, value: &Value) -> std::result::Result<(), String> {
        check_nested(self.io_type, self.dimension, value)
    }
}

fn check_nested(io_type: IoType, dimension: usize, value: &Value) -> std::result::Result<(), String> {
    if dimension == 0 {
        return io_type.check_scalar(value);
    }
    let items = match value {
        Value::List(items) => items,
        other => return Err(format!("expected a sequence, found {}", other)),
    };
    for item in items {
        check_nested(io_type, dimension - 1, item)?;
    }
    if dimension > 1 {
        let mut lengths = items.iter().map(|item| match item {
            Value::List(inner) => inner.len(),
            _ => 0,
        });
        if let Some(first) = lengths.next() {
            if lengths.any(|len| len != first) {
                return Err("sequence is not rectangular".into());
            }
        }
    }
    Ok(())
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.io_type)?;
        for _ in 0..self.dimension {
            f.write_str("[]")?;
        }
        Ok(())
    }
}

/// A structured value; integers of every width share [`Value::Int`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    List(Vec<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(x) => write!(f, "{}", x),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Bool(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// A named parameter of the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(flatten)]
    pub shape: Shape,
}
