//! Primitive/composite types, constants and intervals.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar element type carried by every expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum PrimitiveType {
    /// Not yet determined.
    Unk,
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Statement-like expressions (blocks, loops, assignments).
    Void,
}

impl PrimitiveType {
    /// True for the integer types.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            PrimitiveType::Int8 | PrimitiveType::Int16 | PrimitiveType::Int32 | PrimitiveType::Int64
        )
    }

    /// True for the floating-point types.
    pub fn is_float(self) -> bool {
        matches!(self, PrimitiveType::Float32 | PrimitiveType::Float64)
    }

    /// The `cinn_*_t` alias used in emitted C.
    pub fn c_alias(self) -> &'static str {
        match self {
            PrimitiveType::Boolean => "cinn_boolean_t",
            PrimitiveType::Int8 => "cinn_int8_t",
            PrimitiveType::Int16 => "cinn_int16_t",
            PrimitiveType::Int32 => "cinn_int32_t",
            PrimitiveType::Int64 => "cinn_int64_t",
            PrimitiveType::Float32 => "cinn_float32_t",
            PrimitiveType::Float64 => "cinn_float64_t",
            PrimitiveType::Void => "void",
            PrimitiveType::Unk => panic!("unk type has no C alias"),
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrimitiveType::Unk => "unk",
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::Int8 => "int8",
            PrimitiveType::Int16 => "int16",
            PrimitiveType::Int32 => "int32",
            PrimitiveType::Int64 => "int64",
            PrimitiveType::Float32 => "float32",
            PrimitiveType::Float64 => "float64",
            PrimitiveType::Void => "void",
        };
        write!(f, "{}", s)
    }
}

/// Vector shape of an expression; the composite type dictates width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompositeType {
    /// Plain scalar.
    Primitive,
    /// 128-bit vector (width 4 for f32).
    Simd128,
    /// 256-bit vector (width 8 for f32).
    Simd256,
}

impl CompositeType {
    /// The composite type for a SIMD vector width.
    pub fn from_width(width: usize) -> CompositeType {
        match width {
            4 => CompositeType::Simd128,
            8 => CompositeType::Simd256,
            _ => panic!("unsupported SIMD vector width {}", width),
        }
    }

    /// True for the SIMD variants.
    pub fn is_simd(self) -> bool {
        !matches!(self, CompositeType::Primitive)
    }
}

impl fmt::Display for CompositeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompositeType::Primitive => "primitive",
            CompositeType::Simd128 => "simd128",
            CompositeType::Simd256 => "simd256",
        };
        write!(f, "{}", s)
    }
}

/// A literal value of some primitive type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum ConstantValue {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
}

impl ConstantValue {
    fn ptype(self) -> PrimitiveType {
        match self {
            ConstantValue::Int8(_) => PrimitiveType::Int8,
            ConstantValue::Int16(_) => PrimitiveType::Int16,
            ConstantValue::Int32(_) => PrimitiveType::Int32,
            ConstantValue::Int64(_) => PrimitiveType::Int64,
            ConstantValue::Float32(_) => PrimitiveType::Float32,
            ConstantValue::Float64(_) => PrimitiveType::Float64,
        }
    }
}

/// A literal or named symbolic constant, used for tensor dimensions
/// and interval bounds. A symbolic constant has `value_set() == false`
/// and a non-empty name (e.g. `"M"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constant {
    name: String,
    value: Option<ConstantValue>,
    ptype: PrimitiveType,
}

impl Constant {
    /// A named symbolic constant (integer-typed by default).
    pub fn symbolic(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: None,
            ptype: PrimitiveType::Int32,
        }
    }

    /// The constant's name; empty for pure literals.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a literal value is present.
    pub fn value_set(&self) -> bool {
        self.value.is_some()
    }

    /// The primitive type of the constant.
    pub fn ptype(&self) -> PrimitiveType {
        self.ptype
    }

    /// True for integer-typed constants, including symbolic ones.
    pub fn is_integer(&self) -> bool {
        self.ptype.is_integer()
    }

    /// The integer value. Panics when the constant is symbolic or not
    /// integer-typed.
    pub fn int_val(&self) -> i64 {
        match self.value {
            Some(ConstantValue::Int8(v)) => v as i64,
            Some(ConstantValue::Int16(v)) => v as i64,
            Some(ConstantValue::Int32(v)) => v as i64,
            Some(ConstantValue::Int64(v)) => v,
            _ => panic!("constant `{}` has no integer value", self),
        }
    }
}

impl From<i32> for Constant {
    fn from(v: i32) -> Self {
        Self {
            name: String::new(),
            value: Some(ConstantValue::Int32(v)),
            ptype: PrimitiveType::Int32,
        }
    }
}

impl From<i64> for Constant {
    fn from(v: i64) -> Self {
        Self {
            name: String::new(),
            value: Some(ConstantValue::Int64(v)),
            ptype: PrimitiveType::Int64,
        }
    }
}

impl From<f32> for Constant {
    fn from(v: f32) -> Self {
        Self {
            name: String::new(),
            value: Some(ConstantValue::Float32(v)),
            ptype: PrimitiveType::Float32,
        }
    }
}

impl From<f64> for Constant {
    fn from(v: f64) -> Self {
        Self {
            name: String::new(),
            value: Some(ConstantValue::Float64(v)),
            ptype: PrimitiveType::Float64,
        }
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        // names win when both are set
        if !self.name.is_empty() && self.name == other.name {
            return true;
        }
        if self.ptype != other.ptype {
            return false;
        }
        match (self.value, other.value) {
            (Some(a), Some(b)) => {
                debug_assert_eq!(a.ptype(), b.ptype());
                match (a, b) {
                    (ConstantValue::Int8(x), ConstantValue::Int8(y)) => x == y,
                    (ConstantValue::Int16(x), ConstantValue::Int16(y)) => x == y,
                    (ConstantValue::Int32(x), ConstantValue::Int32(y)) => x == y,
                    (ConstantValue::Int64(x), ConstantValue::Int64(y)) => x == y,
                    (ConstantValue::Float32(x), ConstantValue::Float32(y)) => x == y,
                    (ConstantValue::Float64(x), ConstantValue::Float64(y)) => x == y,
                    _ => false,
                }
            }
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(ConstantValue::Int8(x)) => write!(f, "{}", x),
            Some(ConstantValue::Int16(x)) => write!(f, "{}", x),
            Some(ConstantValue::Int32(x)) => write!(f, "{}", x),
            Some(ConstantValue::Int64(x)) => write!(f, "{}", x),
            Some(ConstantValue::Float32(x)) => write!(f, "{}", fmt_f32(x)),
            Some(ConstantValue::Float64(x)) => write!(f, "{}", fmt_float(x)),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Render a float the way the emitter does: integral values print
/// without a fractional part (`0`, `3`), everything else in the
/// shortest round-trip form (`1.2`).
pub fn fmt_float(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// `f32` variant of [`fmt_float`].
pub fn fmt_f32(v: f32) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// A closed interval with `Constant` bounds, attached to `Var`s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    lower: Constant,
    upper: Constant,
}

impl Interval {
    /// Create from two bounds.
    pub fn new(lower: Constant, upper: Constant) -> Self {
        Self { lower, upper }
    }

    /// Lower bound.
    pub fn lower_bound(&self) -> &Constant {
        &self.lower
    }

    /// Upper bound.
    pub fn upper_bound(&self) -> &Constant {
        &self.upper
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Interval({}, {})", self.lower, self.upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_equality_by_name() {
        let a = Constant::symbolic("M");
        let b = Constant::symbolic("M");
        let c = Constant::symbolic("N");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_constant_equality_by_value() {
        let a = Constant::from(20);
        let b = Constant::from(20);
        let c = Constant::from(30);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.int_val(), 20);
    }

    #[test]
    fn test_float_formatting() {
        assert_eq!(fmt_float(0.0), "0");
        assert_eq!(fmt_float(3.0), "3");
        assert_eq!(fmt_f32(1.2f32), "1.2");
        assert_eq!(fmt_f32(0.1f32), "0.1");
    }

    #[test]
    fn test_simd_width() {
        assert_eq!(CompositeType::from_width(4), CompositeType::Simd128);
        assert_eq!(CompositeType::from_width(8), CompositeType::Simd256);
    }
}
