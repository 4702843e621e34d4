//! Operator semantics shared by the VM and the evaluator.
//!
//! Unsupported operand types produce an [`Object::Error`] value. The only
//! fault is integer division by zero, which aborts the run.

use std::rc::Rc;

use super::{MapEntry, Object, implicit_bool, truthy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OpFault {
    #[error("integer division by zero")]
    DivisionByZero,
}

pub type OpResult = Result<Object, OpFault>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    GreaterThan,
    Equal,
    NotEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::GreaterThan => ">",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Increment,
    Decrement,
}

impl Step {
    pub fn symbol(self) -> &'static str {
        match self {
            Step::Increment => "++",
            Step::Decrement => "--",
        }
    }

    fn delta(self) -> i64 {
        match self {
            Step::Increment => 1,
            Step::Decrement => -1,
        }
    }
}

pub fn binary(op: BinaryOp, left: &Object, right: &Object) -> OpResult {
    match op {
        BinaryOp::Equal => return Ok(Object::Boolean(equals(left, right))),
        BinaryOp::NotEqual => return Ok(Object::Boolean(!equals(left, right))),
        BinaryOp::And => return Ok(Object::Boolean(implicit_bool(left) && implicit_bool(right))),
        BinaryOp::Or => return Ok(Object::Boolean(implicit_bool(left) || implicit_bool(right))),
        _ => {}
    }

    match (left, right) {
        (Object::Error(_), _) => Ok(left.clone()),
        (_, Object::Error(_)) => Ok(right.clone()),
        (Object::Integer(l), Object::Integer(r)) => integer_op(op, *l, *r),
        (Object::Integer(_) | Object::Double(_), Object::Integer(_) | Object::Double(_)) => {
            Ok(double_op(op, as_double(left), as_double(right)))
        }
        (Object::Str(l), Object::Str(r)) if op == BinaryOp::Add => {
            let mut joined = String::with_capacity(l.len() + r.len());
            joined.push_str(l);
            joined.push_str(r);
            Ok(Object::string(joined))
        }
        _ => Ok(unsupported_infix(op, left, right)),
    }
}

fn as_double(obj: &Object) -> f64 {
    match obj {
        Object::Integer(n) => *n as f64,
        Object::Double(n) => *n,
        _ => f64::NAN,
    }
}

fn integer_op(op: BinaryOp, l: i64, r: i64) -> OpResult {
    Ok(match op {
        BinaryOp::Add => Object::Integer(l.wrapping_add(r)),
        BinaryOp::Sub => Object::Integer(l.wrapping_sub(r)),
        BinaryOp::Mul => Object::Integer(l.wrapping_mul(r)),
        BinaryOp::Div => {
            if r == 0 {
                return Err(OpFault::DivisionByZero);
            }
            Object::Integer(l.wrapping_div(r))
        }
        BinaryOp::GreaterThan => Object::Boolean(l > r),
        _ => unsupported_infix(op, &Object::Integer(l), &Object::Integer(r)),
    })
}

fn double_op(op: BinaryOp, l: f64, r: f64) -> Object {
    match op {
        BinaryOp::Add => Object::Double(l + r),
        BinaryOp::Sub => Object::Double(l - r),
        BinaryOp::Mul => Object::Double(l * r),
        BinaryOp::Div => Object::Double(l / r),
        BinaryOp::GreaterThan => Object::Boolean(l > r),
        _ => unsupported_infix(op, &Object::Double(l), &Object::Double(r)),
    }
}

fn unsupported_infix(op: BinaryOp, left: &Object, right: &Object) -> Object {
    if left.kind() == right.kind() {
        Object::error(format!("unsupported infix: {} {} {}", left.kind(), op.symbol(), right.kind()))
    } else {
        Object::error(format!("type mismatch: {} {} {}", left.kind(), op.symbol(), right.kind()))
    }
}

/// The language's `==`. Booleans coerce the other side with [`implicit_bool`], numbers
/// compare by value across integer/double, reference types compare by identity.
pub fn equals(left: &Object, right: &Object) -> bool {
    match (left, right) {
        (Object::Boolean(_), _) | (_, Object::Boolean(_)) => implicit_bool(left) == implicit_bool(right),
        (Object::Integer(l), Object::Integer(r)) => l == r,
        (Object::Integer(_) | Object::Double(_), Object::Integer(_) | Object::Double(_)) => {
            as_double(left) == as_double(right)
        }
        (Object::Str(l), Object::Str(r)) => l == r,
        (Object::Null, Object::Null) => true,
        (Object::Array(l), Object::Array(r)) => Rc::ptr_eq(l, r),
        (Object::Map(l), Object::Map(r)) => Rc::ptr_eq(l, r),
        (Object::CompiledFunction(l), Object::CompiledFunction(r)) => Rc::ptr_eq(l, r),
        (Object::Closure(l), Object::Closure(r)) => Rc::ptr_eq(l, r),
        (Object::Function(l), Object::Function(r)) => Rc::ptr_eq(l, r),
        (Object::Builtin(l), Object::Builtin(r)) => l.name == r.name,
        (Object::Error(l), Object::Error(r)) => l == r,
        _ => false,
    }
}

pub fn negate(operand: &Object) -> Object {
    match operand {
        Object::Integer(n) => Object::Integer(n.wrapping_neg()),
        Object::Double(n) => Object::Double(-n),
        Object::Error(_) => operand.clone(),
        other => Object::error(format!("unsupported prefix: -{}", other.kind())),
    }
}

pub fn bang(operand: &Object) -> Object {
    Object::Boolean(!truthy(operand))
}

/// `++`/`--` applied to a number; returns the new value.
pub fn step(step: Step, postfix: bool, operand: &Object) -> Object {
    match operand {
        Object::Integer(n) => Object::Integer(n.wrapping_add(step.delta())),
        Object::Double(n) => Object::Double(n + step.delta() as f64),
        Object::Error(_) => operand.clone(),
        other if postfix => Object::error(format!("unsupported postfix: {}{}", other.kind(), step.symbol())),
        other => Object::error(format!("unsupported prefix: {}{}", step.symbol(), other.kind())),
    }
}

pub fn index(container: &Object, index: &Object) -> Object {
    match (container, index) {
        (Object::Array(items), Object::Integer(i)) => {
            let items = items.borrow();
            usize::try_from(*i)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or_else(|| Object::error(format!("index out of range: {}", i)))
        }
        (Object::Map(store), key) => match key.hash_key() {
            Some(hash) => match store.borrow().get(&hash) {
                Some(entry) => entry.value.clone(),
                None => Object::error(format!("key doesn't exist: {}", key)),
            },
            None => Object::error(format!("unusable as map key: {}", key.kind())),
        },
        (Object::Error(_), _) => container.clone(),
        _ => Object::error(format!(
            "index operator not supported: {}[{}]",
            container.kind(),
            index.kind()
        )),
    }
}

/// `container[index] = value`, mutating the shared collection. Returns the
/// stored value, or an error value when the assignment is not possible.
pub fn set_index(container: &Object, index: &Object, value: Object) -> Object {
    match (container, index) {
        (Object::Array(items), Object::Integer(i)) => {
            let mut items = items.borrow_mut();
            match usize::try_from(*i).ok().and_then(|i| items.get_mut(i)) {
                Some(slot) => {
                    *slot = value.clone();
                    value
                }
                None => Object::error(format!("index out of range: {}", i)),
            }
        }
        (Object::Map(store), key) => match key.hash_key() {
            Some(hash) => {
                store.borrow_mut().insert(hash, MapEntry { key: key.clone(), value: value.clone() });
                value
            }
            None => Object::error(format!("unusable as map key: {}", key.kind())),
        },
        _ => Object::error(format!(
            "index assignment not supported: {}[{}]",
            container.kind(),
            index.kind()
        )),
    }
}
