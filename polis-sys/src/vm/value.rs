use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use itertools::Itertools;

use crate::vm::error::ValueResult;
use crate::vm::host::HostObject;
use crate::vm::opcode::Instruction;

pub type ListRef = Rc<RefCell<Vec<Value>>>;
pub type DictMap = IndexMap<String, Value, FxBuildHasher>;
pub type DictRef = Rc<RefCell<DictMap>>;
pub type ForeignRef = Rc<RefCell<dyn HostObject>>;

/// The value universe of the virtual machine.
///
/// Lists and dicts are shared-ownership containers: cloning a `Value` clones
/// the reference, and mutation through one alias is visible through all
/// others. Everything else is semantically immutable.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    List(ListRef),
    Dict(DictRef),
    Function(Rc<FunctionImpl>),
    NativeFunction(Rc<NativeFunctionImpl>),
    BoundMethod(Box<BoundMethodImpl>),
    Foreign(ForeignRef),
}

/// Discriminator for a value's variant, used as the method table key.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum Type {
    Nil,
    Bool,
    Int,
    Str,
    List,
    Dict,
    Function,
    NativeFunction,
    Method,
    Foreign,
}

/// A compiled function: its instruction stream, arity, and the parameter
/// names used to build an activation frame on call.
#[derive(PartialEq, Debug)]
pub struct FunctionImpl {
    pub code: Vec<Instruction>,
    pub nargs: u32,
    pub params: Vec<String>,
}

/// A host callable bridged into the value model. `nargs` is exact unless
/// `variadic` is set, in which case it is the minimum argument count.
pub struct NativeFunctionImpl {
    pub name: String,
    pub nargs: u32,
    pub variadic: bool,
    pub func: Box<dyn Fn(Vec<Value>) -> ValueResult>,
}

impl fmt::Debug for NativeFunctionImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunctionImpl")
            .field("name", &self.name)
            .field("nargs", &self.nargs)
            .field("variadic", &self.variadic)
            .finish()
    }
}

/// A callable paired with the receiver that produced it. Transient: exists
/// only between a `GetAttr` and the `OpFuncEval` that consumes it.
#[derive(Debug, Clone)]
pub struct BoundMethodImpl {
    pub func: Value,
    pub receiver: Value,
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(pairs: Vec<(String, Value)>) -> Value {
        let mut map: DictMap = IndexMap::with_hasher(FxBuildHasher::default());
        for (k, v) in pairs {
            map.insert(k, v);
        }
        Value::Dict(Rc::new(RefCell::new(map)))
    }

    pub fn function(code: Vec<Instruction>, params: Vec<String>) -> Value {
        let nargs = params.len() as u32;
        Value::Function(Rc::new(FunctionImpl { code, nargs, params }))
    }

    pub fn native(
        name: impl Into<String>,
        nargs: u32,
        variadic: bool,
        func: impl Fn(Vec<Value>) -> ValueResult + 'static,
    ) -> Value {
        Value::NativeFunction(Rc::new(NativeFunctionImpl {
            name: name.into(),
            nargs,
            variadic,
            func: Box::new(func),
        }))
    }

    pub fn bound_method(func: Value, receiver: Value) -> Value {
        Value::BoundMethod(Box::new(BoundMethodImpl { func, receiver }))
    }

    pub fn foreign(obj: impl HostObject + 'static) -> Value {
        Value::Foreign(Rc::new(RefCell::new(obj)))
    }

    pub fn ty(&self) -> Type {
        match self {
            Value::Nil => Type::Nil,
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int,
            Value::Str(_) => Type::Str,
            Value::List(_) => Type::List,
            Value::Dict(_) => Type::Dict,
            Value::Function(_) => Type::Function,
            Value::NativeFunction(_) => Type::NativeFunction,
            Value::BoundMethod(_) => Type::Method,
            Value::Foreign(_) => Type::Foreign,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// The total boolean projection used by conditional jumps.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Function(_) => true,
            Value::NativeFunction(_) => true,
            Value::BoundMethod(_) => true,
            Value::Foreign(obj) => obj.borrow().truthy(),
        }
    }

    /// Payload equality. Bool and Int compare numerically across kinds, so
    /// `1 == true`; lists and dicts compare element-wise; functions compare
    /// structurally so a deserialized program equals its source program.
    pub fn is_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(l), Value::Bool(r)) => l == r,
            (Value::Int(l), Value::Int(r)) => l == r,
            (Value::Bool(l), Value::Int(r)) | (Value::Int(r), Value::Bool(l)) => (*l as i64) == *r,
            (Value::Str(l), Value::Str(r)) => l == r,
            (Value::List(l), Value::List(r)) => {
                Rc::ptr_eq(l, r) || {
                    let (l, r) = (l.borrow(), r.borrow());
                    l.len() == r.len() && l.iter().zip(r.iter()).all(|(a, b)| a.is_equal(b))
                }
            }
            (Value::Dict(l), Value::Dict(r)) => {
                Rc::ptr_eq(l, r) || {
                    let (l, r) = (l.borrow(), r.borrow());
                    l.len() == r.len()
                        && l.iter().all(|(k, v)| r.get(k).map_or(false, |o| v.is_equal(o)))
                }
            }
            (Value::Function(l), Value::Function(r)) => Rc::ptr_eq(l, r) || **l == **r,
            (Value::NativeFunction(l), Value::NativeFunction(r)) => Rc::ptr_eq(l, r),
            (Value::BoundMethod(l), Value::BoundMethod(r)) => {
                l.func.is_equal(&r.func) && l.receiver.is_equal(&r.receiver)
            }
            (Value::Foreign(l), Value::Foreign(r)) => Rc::ptr_eq(l, r),
            _ => false,
        }
    }

    /// Payload ordering, defined within Int, Bool, Str and List (and across
    /// Int/Bool numerically). `None` means the pair cannot be compared.
    pub fn cmp_payload(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(l), Value::Int(r)) => Some(l.cmp(r)),
            (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
            (Value::Bool(l), Value::Int(r)) => Some((*l as i64).cmp(r)),
            (Value::Int(l), Value::Bool(r)) => Some(l.cmp(&(*r as i64))),
            (Value::Str(l), Value::Str(r)) => Some(l.cmp(r)),
            (Value::List(l), Value::List(r)) => {
                let (l, r) = (l.borrow(), r.borrow());
                for (a, b) in l.iter().zip(r.iter()) {
                    match a.cmp_payload(b)? {
                        Ordering::Equal => {}
                        ord => return Some(ord),
                    }
                }
                Some(l.len().cmp(&r.len()))
            }
            _ => None,
        }
    }

    /// Display form: strings unquoted. Used by `Print` and the CLI.
    pub fn as_str(&self) -> String {
        match self {
            Value::Nil => String::from("nil"),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Str(s) => s.clone(),
            Value::List(l) => format!("[{}]", l.borrow().iter().map(|t| t.to_repr_str()).join(", ")),
            Value::Dict(d) => format!(
                "{{{}}}",
                d.borrow().iter().map(|(k, v)| format!("{}: {}", k, v.to_repr_str())).join(", ")
            ),
            Value::Function(f) => format!("fn({})", f.params.join(", ")),
            Value::NativeFunction(f) => f.name.clone(),
            Value::BoundMethod(b) => b.func.as_str(),
            Value::Foreign(obj) => obj.borrow().repr(),
        }
    }

    /// Display form with strings quoted, for nesting inside containers.
    pub fn to_repr_str(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s),
            v => v.as_str(),
        }
    }

    pub fn as_type_str(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
            Value::NativeFunction(_) => "native function",
            Value::BoundMethod(_) => "bound method",
            Value::Foreign(obj) => obj.borrow().type_names()[0],
        }
    }

    /// Coerces a value into a dict key. Non-string keys take their textual
    /// representation, on store and on lookup alike.
    pub fn key_str(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            v => v.as_str(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.is_equal(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifts host primitives into the matching value variant.
pub trait IntoValue {
    fn to_value(self) -> Value;
}

impl IntoValue for () {
    fn to_value(self) -> Value {
        Value::Nil
    }
}

impl IntoValue for bool {
    fn to_value(self) -> Value {
        Value::Bool(self)
    }
}

impl IntoValue for i64 {
    fn to_value(self) -> Value {
        Value::Int(self)
    }
}

impl IntoValue for usize {
    fn to_value(self) -> Value {
        Value::Int(self as i64)
    }
}

impl IntoValue for String {
    fn to_value(self) -> Value {
        Value::Str(self)
    }
}

impl IntoValue for &str {
    fn to_value(self) -> Value {
        Value::Str(String::from(self))
    }
}

impl IntoValue for char {
    fn to_value(self) -> Value {
        Value::Str(self.to_string())
    }
}

impl IntoValue for Vec<Value> {
    fn to_value(self) -> Value {
        Value::list(self)
    }
}

impl IntoValue for Option<Value> {
    fn to_value(self) -> Value {
        self.unwrap_or(Value::Nil)
    }
}

#[cfg(test)]
mod test {
    use crate::vm::value::Value;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.as_bool());
        assert!(!Value::Bool(false).as_bool());
        assert!(Value::Bool(true).as_bool());
        assert!(!Value::Int(0).as_bool());
        assert!(Value::Int(-3).as_bool());
        assert!(!Value::str("").as_bool());
        assert!(Value::str("x").as_bool());
        assert!(!Value::list(vec![]).as_bool());
        assert!(Value::list(vec![Value::Nil]).as_bool());
        assert!(!Value::dict(vec![]).as_bool());
        assert!(Value::dict(vec![(String::from("k"), Value::Nil)]).as_bool());
    }

    #[test]
    fn test_cross_kind_equality() {
        assert!(Value::Int(1).is_equal(&Value::Bool(true)));
        assert!(Value::Bool(false).is_equal(&Value::Int(0)));
        assert!(!Value::Int(2).is_equal(&Value::Bool(true)));
        assert!(!Value::str("1").is_equal(&Value::Int(1)));
        assert!(!Value::Nil.is_equal(&Value::Bool(false)));
    }

    #[test]
    fn test_list_equality_is_structural() {
        let a = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let c = Value::list(vec![Value::Int(1)]);
        assert!(a.is_equal(&b));
        assert!(!a.is_equal(&c));
    }

    #[test]
    fn test_display() {
        let v = Value::list(vec![Value::Int(1), Value::str("a"), Value::Nil]);
        assert_eq!("[1, 'a', nil]", v.as_str());
        let d = Value::dict(vec![(String::from("name"), Value::str("alice"))]);
        assert_eq!("{name: 'alice'}", d.as_str());
    }

    #[test]
    fn test_key_coercion() {
        assert_eq!("1", Value::Int(1).key_str());
        assert_eq!("true", Value::Bool(true).key_str());
        assert_eq!("k", Value::str("k").key_str());
    }
}
