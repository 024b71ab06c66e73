use std::collections::BTreeMap;

use thiserror::Error;

/// Operator applied by [`LocalBlock::apply_binary_op`](crate::block::LocalBlock::apply_binary_op).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Shl,
    Shr,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("unsupported operands for {op:?}: {lhs} and {rhs}")]
    Unsupported {
        op: BinaryOp,
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("division by zero")]
    DivideByZero,
    #[error("overflow in {0:?}")]
    Overflow(BinaryOp),
}

/// Software value held by a local block.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Lists and maps may be mutated in place by their owner, so they never compare unchanged.
    pub fn is_composite(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_))
    }

    /// Returns true if storing `self` over `previous` counts as a change.
    pub fn changed_from(&self, previous: &Value) -> bool {
        self.is_composite() || self != previous
    }

    /// Combines `self` with `rhs`.
    ///
    /// Integers use checked arithmetic; a signed operand promotes an
    /// unsigned one to signed, and any float promotes both to float.
    pub fn apply(&self, op: BinaryOp, rhs: &Value) -> Result<Value, ValueError> {
        let unsupported = || ValueError::Unsupported {
            op,
            lhs: self.type_name(),
            rhs: rhs.type_name(),
        };

        match (self, rhs) {
            (Value::UInt(a), Value::UInt(b)) => uint_op(op, *a, *b).map(Value::UInt),
            (Value::Int(_) | Value::UInt(_), Value::Int(_) | Value::UInt(_)) => {
                let a = self.as_i64().ok_or(ValueError::Overflow(op))?;
                let b = rhs.as_i64().ok_or(ValueError::Overflow(op))?;
                int_op(op, a, b).map(Value::Int)
            }
            (Value::Float(_), Value::Int(_) | Value::UInt(_) | Value::Float(_))
            | (Value::Int(_) | Value::UInt(_), Value::Float(_)) => {
                let (Some(a), Some(b)) = (self.as_f64(), rhs.as_f64()) else {
                    return Err(unsupported());
                };
                float_op(op, a, b).ok_or_else(unsupported)?.map(Value::Float)
            }
            (Value::Bool(a), Value::Bool(b)) => match op {
                BinaryOp::And => Ok(Value::Bool(a & b)),
                BinaryOp::Or => Ok(Value::Bool(a | b)),
                BinaryOp::Xor => Ok(Value::Bool(a ^ b)),
                _ => Err(unsupported()),
            },
            _ => Err(unsupported()),
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }
}

fn int_op(op: BinaryOp, a: i64, b: i64) -> Result<i64, ValueError> {
    let overflow = ValueError::Overflow(op);
    match op {
        BinaryOp::Div | BinaryOp::Mod if b == 0 => Err(ValueError::DivideByZero),
        BinaryOp::Add => a.checked_add(b).ok_or(overflow),
        BinaryOp::Sub => a.checked_sub(b).ok_or(overflow),
        BinaryOp::Mul => a.checked_mul(b).ok_or(overflow),
        BinaryOp::Div => a.checked_div(b).ok_or(overflow),
        BinaryOp::Mod => a.checked_rem(b).ok_or(overflow),
        BinaryOp::Pow => {
            let exp = u32::try_from(b).map_err(|_| overflow.clone())?;
            a.checked_pow(exp).ok_or(overflow)
        }
        BinaryOp::Shl | BinaryOp::Shr => {
            let n = u32::try_from(b).ok().filter(|n| *n < i64::BITS).ok_or(overflow)?;
            Ok(if op == BinaryOp::Shl { a << n } else { a >> n })
        }
        BinaryOp::And => Ok(a & b),
        BinaryOp::Or => Ok(a | b),
        BinaryOp::Xor => Ok(a ^ b),
    }
}

fn uint_op(op: BinaryOp, a: u64, b: u64) -> Result<u64, ValueError> {
    let overflow = ValueError::Overflow(op);
    match op {
        BinaryOp::Div | BinaryOp::Mod if b == 0 => Err(ValueError::DivideByZero),
        BinaryOp::Add => a.checked_add(b).ok_or(overflow),
        BinaryOp::Sub => a.checked_sub(b).ok_or(overflow),
        BinaryOp::Mul => a.checked_mul(b).ok_or(overflow),
        BinaryOp::Div => Ok(a / b),
        BinaryOp::Mod => Ok(a % b),
        BinaryOp::Pow => {
            let exp = u32::try_from(b).map_err(|_| overflow.clone())?;
            a.checked_pow(exp).ok_or(overflow)
        }
        BinaryOp::Shl | BinaryOp::Shr => {
            let n = u32::try_from(b).ok().filter(|n| *n < u64::BITS).ok_or(overflow)?;
            Ok(if op == BinaryOp::Shl { a << n } else { a >> n })
        }
        BinaryOp::And => Ok(a & b),
        BinaryOp::Or => Ok(a | b),
        BinaryOp::Xor => Ok(a ^ b),
    }
}

/// Returns `None` for operators that have no float meaning.
fn float_op(op: BinaryOp, a: f64, b: f64) -> Option<Result<f64, ValueError>> {
    let r = match op {
        BinaryOp::Div | BinaryOp::Mod if b == 0.0 => return Some(Err(ValueError::DivideByZero)),
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        BinaryOp::Pow => a.powf(b),
        BinaryOp::Shl | BinaryOp::Shr | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
            return None;
        }
    };
    Some(Ok(r))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic() {
        let v = Value::Int(7);
        assert_eq!(v.apply(BinaryOp::Add, &Value::Int(3)), Ok(Value::Int(10)));
        assert_eq!(v.apply(BinaryOp::Sub, &Value::Int(10)), Ok(Value::Int(-3)));
        assert_eq!(v.apply(BinaryOp::Mod, &Value::Int(4)), Ok(Value::Int(3)));
        assert_eq!(v.apply(BinaryOp::Pow, &Value::Int(2)), Ok(Value::Int(49)));
        assert_eq!(v.apply(BinaryOp::Shl, &Value::Int(2)), Ok(Value::Int(28)));
        assert_eq!(v.apply(BinaryOp::Xor, &Value::Int(1)), Ok(Value::Int(6)));
    }

    #[test]
    fn unsigned_stays_unsigned_and_mixes_to_signed() {
        let v = Value::UInt(0xF0);
        assert_eq!(v.apply(BinaryOp::Or, &Value::UInt(0x0F)), Ok(Value::UInt(0xFF)));
        assert_eq!(v.apply(BinaryOp::Shr, &Value::UInt(4)), Ok(Value::UInt(0x0F)));
        assert_eq!(v.apply(BinaryOp::Sub, &Value::Int(0x100)), Ok(Value::Int(-0x10)));
        assert_eq!(
            Value::UInt(0).apply(BinaryOp::Sub, &Value::UInt(1)),
            Err(ValueError::Overflow(BinaryOp::Sub))
        );
    }

    #[test]
    fn float_promotion() {
        assert_eq!(
            Value::Int(3).apply(BinaryOp::Mul, &Value::Float(0.5)),
            Ok(Value::Float(1.5))
        );
        assert_eq!(
            Value::Float(2.0).apply(BinaryOp::Pow, &Value::UInt(3)),
            Ok(Value::Float(8.0))
        );
        assert!(matches!(
            Value::Float(1.0).apply(BinaryOp::Shl, &Value::Int(1)),
            Err(ValueError::Unsupported { .. })
        ));
    }

    #[test]
    fn division_by_zero_is_rejected() {
        for op in [BinaryOp::Div, BinaryOp::Mod] {
            assert_eq!(
                Value::Int(1).apply(op, &Value::Int(0)),
                Err(ValueError::DivideByZero)
            );
            assert_eq!(
                Value::UInt(1).apply(op, &Value::UInt(0)),
                Err(ValueError::DivideByZero)
            );
            assert_eq!(
                Value::Float(1.0).apply(op, &Value::Float(0.0)),
                Err(ValueError::DivideByZero)
            );
        }
    }

    #[test]
    fn bool_logic_and_non_numeric_operands() {
        assert_eq!(
            Value::Bool(true).apply(BinaryOp::Xor, &Value::Bool(true)),
            Ok(Value::Bool(false))
        );
        assert!(matches!(
            Value::Str("ab".into()).apply(BinaryOp::Add, &Value::Str("cd".into())),
            Err(ValueError::Unsupported { lhs: "str", .. })
        ));
        assert!(
            Value::List(vec![])
                .apply(BinaryOp::Add, &Value::List(vec![]))
                .is_err()
        );
    }

    #[test]
    fn composite_values_always_change() {
        let list = Value::List(vec![]);
        assert!(list.changed_from(&list.clone()));
        assert!(!Value::Int(1).changed_from(&Value::Int(1)));
        assert!(Value::Int(1).changed_from(&Value::Int(2)));
    }

    #[test]
    fn shift_out_of_range_overflows() {
        assert_eq!(
            Value::Int(1).apply(BinaryOp::Shl, &Value::Int(64)),
            Err(ValueError::Overflow(BinaryOp::Shl))
        );
        assert_eq!(
            Value::Int(1).apply(BinaryOp::Shr, &Value::Int(-1)),
            Err(ValueError::Overflow(BinaryOp::Shr))
        );
    }
}
