//! Runtime values as seen by the dependency engine.
//!
//! This is the thin slice of the array value model that recompute procedures
//! need: numeric scalars, nested vectors, and element-wise arithmetic with
//! scalar extension. Cached values are owned by the cache; readers always get
//! a clone.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A numeric scalar or a vector of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Array(Vec<Value>),
}

impl Value {
    pub fn add(&self, other: &Value) -> Result<Value> {
        self.zip_with(other, "add", &|a: &Value, b: &Value| match (a, b) {
            (Value::Int(x), Value::Int(y)) => Ok(x
                .checked_add(*y)
                .map(Value::Int)
                .unwrap_or(Value::Float(*x as f64 + *y as f64))),
            _ => Ok(Value::Float(a.as_f64()? + b.as_f64()?)),
        })
    }

    pub fn subtract(&self, other: &Value) -> Result<Value> {
        self.zip_with(other, "subtract", &|a: &Value, b: &Value| match (a, b) {
            (Value::Int(x), Value::Int(y)) => Ok(x
                .checked_sub(*y)
                .map(Value::Int)
                .unwrap_or(Value::Float(*x as f64 - *y as f64))),
            _ => Ok(Value::Float(a.as_f64()? - b.as_f64()?)),
        })
    }

    pub fn multiply(&self, other: &Value) -> Result<Value> {
        self.zip_with(other, "multiply", &|a: &Value, b: &Value| match (a, b) {
            (Value::Int(x), Value::Int(y)) => Ok(x
                .checked_mul(*y)
                .map(Value::Int)
                .unwrap_or(Value::Float(*x as f64 * *y as f64))),
            _ => Ok(Value::Float(a.as_f64()? * b.as_f64()?)),
        })
    }

    /// Division always yields floats. A zero divisor is a domain error.
    pub fn divide(&self, other: &Value) -> Result<Value> {
        self.zip_with(other, "divide", &|a: &Value, b: &Value| {
            let divisor = b.as_f64()?;
            if divisor == 0.0 {
                return Err(Error::Domain("divide"));
            }
            Ok(Value::Float(a.as_f64()? / divisor))
        })
    }

    pub fn negate(&self) -> Result<Value> {
        match self {
            Value::Int(x) => Ok(x
                .checked_neg()
                .map(Value::Int)
                .unwrap_or(Value::Float(-(*x as f64)))),
            Value::Float(x) => Ok(Value::Float(-x)),
            Value::Array(items) => items
                .iter()
                .map(Value::negate)
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
        }
    }

    /// Select element `index` from a vector.
    pub fn select(&self, index: i64) -> Result<Value> {
        match self {
            Value::Array(items) => usize::try_from(index)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .ok_or(Error::Index {
                    index,
                    length: items.len(),
                }),
            _ => Err(Error::Type("index")),
        }
    }

    /// Interpret this value as an integer index.
    ///
    /// Floats are accepted when they are whole numbers.
    pub fn as_index(&self) -> Result<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(*f as i64),
            Value::Float(_) => Err(Error::Domain("index")),
            Value::Array(items) if items.len() == 1 => items[0].as_index(),
            Value::Array(_) => Err(Error::Length("index")),
        }
    }

    fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Int(x) => Ok(*x as f64),
            Value::Float(x) => Ok(*x),
            Value::Array(_) => Err(Error::Type("scalar")),
        }
    }

    /// Apply a scalar function element-wise, extending scalars over vectors.
    fn zip_with(
        &self,
        other: &Value,
        op: &'static str,
        f: &dyn Fn(&Value, &Value) -> Result<Value>,
    ) -> Result<Value> {
        match (self, other) {
            (Value::Array(left), Value::Array(right)) => {
                if left.len() != right.len() {
                    return Err(Error::Length(op));
                }
                left.iter()
                    .zip(right)
                    .map(|(l, r)| l.zip_with(r, op, f))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Array)
            }
            (Value::Array(left), scalar) => left
                .iter()
                .map(|l| l.zip_with(scalar, op, f))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            (scalar, Value::Array(right)) => right
                .iter()
                .map(|r| scalar.zip_with(r, op, f))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            (left, right) => f(left, right),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Vec<i64>> for Value {
    fn from(values: Vec<i64>) -> Self {
        Value::Array(values.into_iter().map(Value::Int).collect())
    }
}
