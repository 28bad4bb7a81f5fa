//! Typed coercion of a parameter literal into a component's declared
//! parameter type, used at the canvas `Set`/`BatchSetParameters` boundary.
//!
//! Parameters are typed (int, float, bool, string, component reference);
//! conversion happens once, at the boundary, and fails closed on mismatch
//! rather than attempting a lossy coercion.

use crate::Value;

/// The declared type of a component parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParamType {
    /// A signed 64-bit integer.
    Int,
    /// A 64-bit floating point number.
    Float,
    /// A boolean.
    Bool,
    /// A string.
    String,
    /// A reference to another component instance.
    Component,
}

/// Error returned when a literal cannot be coerced into the target type.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("cannot coerce value {value:?} into parameter type {target:?}")]
pub struct CoercionError {
    /// The value that failed to coerce.
    pub value: Value,
    /// The parameter type it was coerced against.
    pub target: ParamType,
}

/// Coerces a literal `Value` into the component's declared `ParamType`.
///
/// Numeric widening between int and float is allowed in either direction
/// (an integer literal assigned to a float parameter, or a whole-valued
/// float literal assigned to an int parameter); every other cross-type
/// coercion fails closed.
pub fn coerce(value: Value, target: ParamType) -> Result<Value, CoercionError> {
    let coerced = match (target, &value) {
        (ParamType::Int, Value::I64(_)) => value,
        (ParamType::Int, Value::U64(v)) => Value::I64(*v as i64),
        (ParamType::Int, Value::F64(v)) if v.fract() == 0.0 => Value::I64(*v as i64),
        (ParamType::Float, Value::F64(_)) => value,
        (ParamType::Float, Value::I64(v)) => Value::F64(*v as f64),
        (ParamType::Float, Value::U64(v)) => Value::F64(*v as f64),
        (ParamType::Bool, Value::Bool(_)) => value,
        (ParamType::String, Value::String(_)) => value,
        (ParamType::Component, Value::Component(_)) => value,
        _ => {
            return Err(CoercionError { value, target });
        }
    };
    Ok(coerced)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn coerces_matching_types() {
        assert_eq!(coerce(Value::I64(3), ParamType::Int).unwrap(), Value::I64(3));
        assert_eq!(coerce(Value::F64(3.5), ParamType::Float).unwrap(), Value::F64(3.5));
        assert_eq!(coerce(Value::Bool(true), ParamType::Bool).unwrap(), Value::Bool(true));
        assert_eq!(
            coerce(Value::String("x".into()), ParamType::String).unwrap(),
            Value::String("x".into())
        );
        assert_eq!(
            coerce(Value::Component("a.b".into()), ParamType::Component).unwrap(),
            Value::Component("a.b".into())
        );
    }

    #[test]
    fn widens_numeric_types() {
        assert_eq!(coerce(Value::I64(3), ParamType::Float).unwrap(), Value::F64(3.0));
        assert_eq!(coerce(Value::F64(3.0), ParamType::Int).unwrap(), Value::I64(3));
    }

    #[test]
    fn rejects_fractional_float_as_int() {
        assert!(coerce(Value::F64(3.5), ParamType::Int).is_err());
    }

    #[test]
    fn rejects_cross_type_mismatch() {
        assert!(coerce(Value::Bool(true), ParamType::String).is_err());
        assert!(coerce(Value::String("x".into()), ParamType::Component).is_err());
    }
}
