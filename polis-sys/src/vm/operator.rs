use std::cmp::Ordering;

use crate::vm::error::ValueResult;
use crate::vm::value::Value;

use crate::vm::error::RuntimeError::{*};
use crate::vm::opcode::Opcode::{*};

pub fn binary_add(a1: Value, a2: Value) -> ValueResult {
    match (a1, a2) {
        (Value::Int(i1), Value::Int(i2)) => Ok(Value::Int(i1.wrapping_add(i2))),
        (Value::Str(s1), Value::Str(s2)) => Ok(Value::Str(format!("{}{}", s1, s2))),
        (l, r) => TypeErrorBinaryOp(OpAdd, l, r).err(),
    }
}

pub fn binary_sub(a1: Value, a2: Value) -> ValueResult {
    match (a1, a2) {
        (Value::Int(i1), Value::Int(i2)) => Ok(Value::Int(i1.wrapping_sub(i2))),
        (l, r) => TypeErrorBinaryOp(OpSub, l, r).err(),
    }
}

pub fn binary_mul(a1: Value, a2: Value) -> ValueResult {
    match (a1, a2) {
        (Value::Int(i1), Value::Int(i2)) => Ok(Value::Int(i1.wrapping_mul(i2))),
        (l, r) => TypeErrorBinaryOp(OpMul, l, r).err(),
    }
}

/// Integer division truncates toward zero. A zero divisor is an error.
pub fn binary_div(a1: Value, a2: Value) -> ValueResult {
    match (a1, a2) {
        (Value::Int(i1), Value::Int(i2)) if i2 != 0 => Ok(Value::Int(i1.wrapping_div(i2))),
        (l, r) => TypeErrorBinaryOp(OpDiv, l, r).err(),
    }
}

/// Modulo is the truncated remainder, matching the division above so that
/// `(a / b) * b + (a % b) == a` holds. A zero divisor is an error.
pub fn binary_mod(a1: Value, a2: Value) -> ValueResult {
    match (a1, a2) {
        (Value::Int(i1), Value::Int(i2)) if i2 != 0 => Ok(Value::Int(i1.wrapping_rem(i2))),
        (l, r) => TypeErrorBinaryOp(OpMod, l, r).err(),
    }
}

pub fn binary_equals(a1: Value, a2: Value) -> ValueResult {
    Ok(Value::Bool(a1.is_equal(&a2)))
}

pub fn binary_not_equals(a1: Value, a2: Value) -> ValueResult {
    Ok(Value::Bool(!a1.is_equal(&a2)))
}

pub fn binary_less_than(a1: Value, a2: Value) -> ValueResult {
    compare(a1, a2, |ord| ord == Ordering::Less)
}

pub fn binary_less_than_or_equal(a1: Value, a2: Value) -> ValueResult {
    compare(a1, a2, |ord| ord != Ordering::Greater)
}

pub fn binary_greater_than(a1: Value, a2: Value) -> ValueResult {
    compare(a1, a2, |ord| ord == Ordering::Greater)
}

pub fn binary_greater_than_or_equal(a1: Value, a2: Value) -> ValueResult {
    compare(a1, a2, |ord| ord != Ordering::Less)
}

fn compare(a1: Value, a2: Value, accept: fn(Ordering) -> bool) -> ValueResult {
    match a1.cmp_payload(&a2) {
        Some(ord) => Ok(Value::Bool(accept(ord))),
        None => TypeErrorCannotCompare(a1, a2).err(),
    }
}

/// Membership `lhs in rhs`. Unsupported operand shapes are a soft `false`,
/// never an error, so policies stay robust against malformed input data.
pub fn binary_in(lhs: Value, rhs: Value) -> Value {
    let found = match &rhs {
        Value::List(l) => l.borrow().iter().any(|v| v.is_equal(&lhs)),
        Value::Dict(d) => d.borrow().contains_key(&lhs.key_str()),
        Value::Str(s) => match &lhs {
            Value::Str(sub) => s.contains(sub.as_str()),
            _ => false,
        },
        Value::Foreign(obj) => obj.borrow().contains(&lhs).unwrap_or(false),
        _ => false,
    };
    Value::Bool(found)
}

pub fn unary_not(a1: Value) -> Value {
    Value::Bool(!a1.as_bool())
}

/// Indexed read: `container[key]`, `Nil` on any miss. Negative list and
/// string indices count from the end.
pub fn get_index(container: &Value, key: &Value) -> Value {
    match (container, key) {
        (Value::List(l), Value::Int(i)) => {
            let list = l.borrow();
            match wrap_index(list.len(), *i) {
                Some(index) => list[index].clone(),
                None => Value::Nil,
            }
        }
        (Value::Dict(d), k) => d.borrow().get(&k.key_str()).cloned().unwrap_or(Value::Nil),
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            match wrap_index(chars.len(), *i) {
                Some(index) => Value::str(chars[index].to_string()),
                None => Value::Nil,
            }
        }
        (Value::Foreign(obj), k) => obj.borrow().get_index(k).unwrap_or(Value::Nil),
        _ => Value::Nil,
    }
}

/// Indexed write: `container[key] = value`. Misses are silently dropped.
pub fn set_index(container: &Value, key: Value, value: Value) {
    match (container, &key) {
        (Value::List(l), Value::Int(i)) => {
            let mut list = l.borrow_mut();
            if let Some(index) = wrap_index(list.len(), *i) {
                list[index] = value;
            }
        }
        (Value::Dict(d), k) => {
            d.borrow_mut().insert(k.key_str(), value);
        }
        (Value::Foreign(obj), k) => {
            obj.borrow_mut().set_index(k, value);
        }
        _ => {}
    }
}

fn wrap_index(len: usize, index: i64) -> Option<usize> {
    let wrapped = if index < 0 { len as i64 + index } else { index };
    if wrapped >= 0 && (wrapped as usize) < len {
        Some(wrapped as usize)
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use crate::vm::operator;
    use crate::vm::value::Value;
    use crate::vm::value::Value::Int;

    #[test]
    fn test_binary_div_truncates_toward_zero() {
        assert_eq!(Int(-1), operator::binary_div(Int(-5), Int(3)).unwrap());
        assert_eq!(Int(0), operator::binary_div(Int(-2), Int(3)).unwrap());
        assert_eq!(Int(0), operator::binary_div(Int(2), Int(3)).unwrap());
        assert_eq!(Int(1), operator::binary_div(Int(5), Int(3)).unwrap());
        assert_eq!(Int(1), operator::binary_div(Int(-5), Int(-3)).unwrap());
        assert_eq!(Int(-1), operator::binary_div(Int(5), Int(-3)).unwrap());

        assert!(operator::binary_div(Int(5), Int(0)).is_err());
    }

    #[test]
    fn test_binary_mod_is_truncated_remainder() {
        assert_eq!(Int(2), operator::binary_mod(Int(11), Int(3)).unwrap());
        assert_eq!(Int(0), operator::binary_mod(Int(12), Int(3)).unwrap());
        assert_eq!(Int(-2), operator::binary_mod(Int(-5), Int(3)).unwrap());

        assert!(operator::binary_mod(Int(5), Int(0)).is_err());
    }

    #[test]
    fn test_binary_add_concatenates_strings() {
        assert_eq!(Value::str("ab"), operator::binary_add(Value::str("a"), Value::str("b")).unwrap());
        assert!(operator::binary_add(Value::str("a"), Int(1)).is_err());
    }

    #[test]
    fn test_binary_in_is_soft() {
        let list = Value::list(vec![Int(1), Int(2)]);
        assert_eq!(Value::Bool(true), operator::binary_in(Int(2), list.clone()));
        assert_eq!(Value::Bool(false), operator::binary_in(Int(3), list));
        assert_eq!(Value::Bool(false), operator::binary_in(Int(1), Int(2)));
        assert_eq!(Value::Bool(true), operator::binary_in(Value::str("ell"), Value::str("hello")));
    }

    #[test]
    fn test_get_index_misses_are_nil() {
        let list = Value::list(vec![Int(10), Int(20)]);
        assert_eq!(Int(20), operator::get_index(&list, &Int(1)));
        assert_eq!(Int(20), operator::get_index(&list, &Int(-1)));
        assert_eq!(Value::Nil, operator::get_index(&list, &Int(5)));
        assert_eq!(Value::Nil, operator::get_index(&Int(1), &Int(0)));
    }

    #[test]
    fn test_set_index_through_alias() {
        let list = Value::list(vec![Int(0), Int(1)]);
        let alias = list.clone();
        operator::set_index(&alias, Int(1), Int(99));
        assert_eq!(Int(99), operator::get_index(&list, &Int(1)));
    }

    #[test]
    fn test_dict_key_coercion_on_store_and_lookup() {
        let dict = Value::dict(vec![]);
        operator::set_index(&dict, Int(1), Value::str("one"));
        assert_eq!(Value::str("one"), operator::get_index(&dict, &Int(1)));
        assert_eq!(Value::str("one"), operator::get_index(&dict, &Value::str("1")));
    }
}
