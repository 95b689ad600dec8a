//! Script values seen by typed array element writes
//!
//! Only the shapes the buffer layer needs: primitives, and host objects whose
//! primitive conversion runs arbitrary code (a `valueOf` that may detach or
//! resize the very buffer being written).

use std::fmt;
use std::sync::Arc;

use crate::error::{VmError, VmResult};
use crate::number::{number_to_string, string_to_number};

type ToPrimitiveFn = dyn Fn() -> VmResult<Value> + Send + Sync;

/// A host object, opaque except for its primitive conversion
#[derive(Clone)]
pub struct HostObject {
    to_primitive: Arc<ToPrimitiveFn>,
}

impl HostObject {
    /// Create an object whose ToPrimitive runs `f`
    pub fn new(f: impl Fn() -> VmResult<Value> + Send + Sync + 'static) -> Self {
        Self {
            to_primitive: Arc::new(f),
        }
    }

    /// Run the object's primitive conversion
    pub fn to_primitive(&self) -> VmResult<Value> {
        match (self.to_primitive)()? {
            Value::Object(_) => Err(VmError::type_error(
                "Cannot convert object to primitive value",
            )),
            primitive => Ok(primitive),
        }
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostObject")
    }
}

impl PartialEq for HostObject {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.to_primitive, &other.to_primitive)
    }
}

/// A script value
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Boolean(bool),
    /// Number (IEEE 754 double)
    Number(f64),
    /// BigInt, wide enough for both 64-bit element kinds
    BigInt(i128),
    /// String
    String(Arc<str>),
    /// Host object
    Object(HostObject),
}

impl Value {
    /// Create a number value
    pub fn number(n: f64) -> Self {
        Self::Number(n)
    }

    /// Create a string value
    pub fn string(s: &str) -> Self {
        Self::String(Arc::from(s))
    }

    /// Create an object value with the given primitive conversion
    pub fn object(f: impl Fn() -> VmResult<Value> + Send + Sync + 'static) -> Self {
        Self::Object(HostObject::new(f))
    }

    /// Check if undefined
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Get the number, if this is one
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// ToNumber; host objects run their primitive conversion first
    pub fn to_number(&self) -> VmResult<f64> {
        match self {
            Self::Undefined => Ok(f64::NAN),
            Self::Null => Ok(0.0),
            Self::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Self::Number(n) => Ok(*n),
            Self::String(s) => Ok(string_to_number(s)),
            Self::BigInt(_) => Err(VmError::type_error(
                "Cannot convert a BigInt value to a number",
            )),
            Self::Object(obj) => obj.to_primitive()?.to_number(),
        }
    }

    /// ToBigInt
    pub fn to_big_int(&self) -> VmResult<i128> {
        match self {
            Self::BigInt(n) => Ok(*n),
            Self::Boolean(b) => Ok(i128::from(*b)),
            Self::String(s) => string_to_big_int(s)
                .ok_or_else(|| VmError::syntax_error(format!("Cannot convert {s} to a BigInt"))),
            Self::Number(n) => Err(VmError::type_error(format!(
                "Cannot convert {} to a BigInt",
                number_to_string(*n)
            ))),
            Self::Undefined => Err(VmError::type_error("Cannot convert undefined to a BigInt")),
            Self::Null => Err(VmError::type_error("Cannot convert null to a BigInt")),
            Self::Object(obj) => obj.to_primitive()?.to_big_int(),
        }
    }

    /// SameValue: NaN equals NaN, +0 and -0 differ
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => {
                if a.is_nan() && b.is_nan() {
                    true
                } else {
                    a == b && a.is_sign_negative() == b.is_sign_negative()
                }
            }
            _ => self == other,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

/// StringToBigInt for decimal literals; `None` when the string is not one
fn string_to_big_int(s: &str) -> Option<i128> {
    let trimmed = crate::number::trim_js_whitespace(s);
    if trimmed.is_empty() {
        return Some(0);
    }
    let (negative, digits) = match trimmed.as_bytes()[0] {
        b'-' => (true, &trimmed[1..]),
        b'+' => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let magnitude: i128 = digits.parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}
