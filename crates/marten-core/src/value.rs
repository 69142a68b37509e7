//! Guest values
//!
//! [`Value`] is the boxed representation every generic instruction operates
//! on. Frames store the common primitives (bool, int, long, double) as raw
//! bits beside a tag instead, so a `Value` is only constructed when a slot
//! escapes to the generic paths or to host code.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Host-defined object payload carried opaquely through the interpreter
pub trait HostObject: Any + fmt::Debug + Send + Sync {
    /// Downcast support
    fn as_any(&self) -> &dyn Any;

    /// Name shown in diagnostics
    fn type_name(&self) -> &'static str {
        "object"
    }
}

/// Shared reference to a host object
pub type ObjectRef = Arc<dyn HostObject>;

/// A guest value
#[derive(Debug, Clone)]
pub enum Value {
    /// The null reference
    Null,
    /// Boolean
    Bool(bool),
    /// 8-bit integer
    Byte(i8),
    /// UTF-16 code unit
    Char(u16),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// 32-bit float
    Float(f32),
    /// 64-bit float
    Double(f64),
    /// Immutable string
    Str(Arc<str>),
    /// Host object
    Object(ObjectRef),
}

/// Failure of a primitive operation, mapped to a guest exception at the
/// throwing site (which knows the bci)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpError {
    /// Operand types outside the operation's domain
    TypeMismatch(&'static str),
    /// Integer division or remainder by zero
    DivisionByZero,
}

impl OpError {
    /// Guest-visible message for this failure
    pub fn message(&self) -> &'static str {
        match self {
            Self::TypeMismatch(op) => op,
            Self::DivisionByZero => "division by zero",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Byte(a), Self::Byte(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            // identity equality for host objects
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Value {
    /// Truthiness used by conditional branches
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Byte(b) => *b != 0,
            Self::Char(c) => *c != 0,
            Self::Int(i) => *i != 0,
            Self::Long(l) => *l != 0,
            Self::Float(f) => *f != 0.0,
            Self::Double(d) => *d != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Object(_) => true,
        }
    }

    /// Name shown in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Byte(_) => "byte",
            Self::Char(_) => "char",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Str(_) => "string",
            Self::Object(o) => o.type_name(),
        }
    }

    /// Numeric view as i64, if the value is a fixed-width integer
    fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Byte(b) => Some(*b as i64),
            Self::Char(c) => Some(*c as i64),
            Self::Int(i) => Some(*i as i64),
            Self::Long(l) => Some(*l),
            _ => None,
        }
    }

    /// Numeric view as f64, for mixed float arithmetic
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f as f64),
            Self::Double(d) => Some(*d),
            _ => self.as_i64().map(|i| i as f64),
        }
    }

    fn is_float(&self) -> bool {
        matches!(self, Self::Float(_) | Self::Double(_))
    }

    fn binary_numeric(
        lhs: &Value,
        rhs: &Value,
        op_name: &'static str,
        int_op: impl Fn(i32, i32) -> i32,
        long_op: impl Fn(i64, i64) -> i64,
        double_op: impl Fn(f64, f64) -> f64,
    ) -> Result<Value, OpError> {
        if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
            return Ok(Value::Int(int_op(*a, *b)));
        }
        if lhs.is_float() || rhs.is_float() {
            let (a, b) = match (lhs.as_f64(), rhs.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(OpError::TypeMismatch(op_name)),
            };
            return Ok(Value::Double(double_op(a, b)));
        }
        match (lhs.as_i64(), rhs.as_i64()) {
            (Some(a), Some(b)) => Ok(Value::Long(long_op(a, b))),
            _ => Err(OpError::TypeMismatch(op_name)),
        }
    }

    /// Generic addition; concatenates when the left operand is a string
    pub fn add(lhs: &Value, rhs: &Value) -> Result<Value, OpError> {
        if let Value::Str(a) = lhs {
            let mut out = String::with_capacity(a.len() + 8);
            out.push_str(a);
            rhs.render_into(&mut out);
            return Ok(Value::Str(Arc::from(out.as_str())));
        }
        Self::binary_numeric(
            lhs,
            rhs,
            "unsupported operands for +",
            i32::wrapping_add,
            i64::wrapping_add,
            |a, b| a + b,
        )
    }

    /// Generic subtraction
    pub fn sub(lhs: &Value, rhs: &Value) -> Result<Value, OpError> {
        Self::binary_numeric(
            lhs,
            rhs,
            "unsupported operands for -",
            i32::wrapping_sub,
            i64::wrapping_sub,
            |a, b| a - b,
        )
    }

    /// Generic multiplication
    pub fn mul(lhs: &Value, rhs: &Value) -> Result<Value, OpError> {
        Self::binary_numeric(
            lhs,
            rhs,
            "unsupported operands for *",
            i32::wrapping_mul,
            i64::wrapping_mul,
            |a, b| a * b,
        )
    }

    /// Generic division
    pub fn div(lhs: &Value, rhs: &Value) -> Result<Value, OpError> {
        if !lhs.is_float() && !rhs.is_float() {
            if let Some(0) = rhs.as_i64() {
                return Err(OpError::DivisionByZero);
            }
        }
        Self::binary_numeric(
            lhs,
            rhs,
            "unsupported operands for /",
            i32::wrapping_div,
            i64::wrapping_div,
            |a, b| a / b,
        )
    }

    /// Generic arithmetic negation
    pub fn neg(value: &Value) -> Result<Value, OpError> {
        match value {
            Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
            Value::Long(l) => Ok(Value::Long(l.wrapping_neg())),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Double(d) => Ok(Value::Double(-d)),
            Value::Byte(b) => Ok(Value::Int(-(*b as i32))),
            _ => Err(OpError::TypeMismatch("unsupported operand for unary -")),
        }
    }

    /// Generic ordered comparison; `Ordering::is_lt` style predicates are
    /// applied by the caller
    pub fn compare(lhs: &Value, rhs: &Value) -> Result<std::cmp::Ordering, OpError> {
        if let (Value::Str(a), Value::Str(b)) = (lhs, rhs) {
            return Ok(a.cmp(b));
        }
        if lhs.is_float() || rhs.is_float() {
            let (a, b) = match (lhs.as_f64(), rhs.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(OpError::TypeMismatch("unsupported operands for comparison")),
            };
            return a
                .partial_cmp(&b)
                .ok_or(OpError::TypeMismatch("comparison of NaN"));
        }
        match (lhs.as_i64(), rhs.as_i64()) {
            (Some(a), Some(b)) => Ok(a.cmp(&b)),
            _ => Err(OpError::TypeMismatch("unsupported operands for comparison")),
        }
    }

    fn render_into(&self, out: &mut String) {
        use std::fmt::Write as _;
        let _ = match self {
            Self::Null => write!(out, "null"),
            Self::Bool(b) => write!(out, "{b}"),
            Self::Byte(b) => write!(out, "{b}"),
            Self::Char(c) => match char::from_u32(*c as u32) {
                Some(c) => write!(out, "{c}"),
                None => write!(out, "\u{FFFD}"),
            },
            Self::Int(i) => write!(out, "{i}"),
            Self::Long(l) => write!(out, "{l}"),
            Self::Float(f) => write!(out, "{f}"),
            Self::Double(d) => write!(out, "{d}"),
            Self::Str(s) => write!(out, "{s}"),
            Self::Object(o) => write!(out, "<{}>", o.type_name()),
        };
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.render_into(&mut out);
        f.write_str(&out)
    }
}
