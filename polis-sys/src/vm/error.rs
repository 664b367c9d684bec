use std::fmt;

use crate::vm::opcode::Opcode;
use crate::vm::value::Value;

pub type ValueResult = Result<Value, Box<RuntimeError>>;

/// Fatal conditions raised by the VM. Soft failures (attribute or index
/// misses, unsupported membership operands) never reach this type: they
/// yield `Nil` or `false` instead.
#[derive(PartialEq, Debug, Clone)]
pub enum RuntimeError {
    ValueIsNotFunctionEvaluable(Value),
    ValueIsNotIterable(Value),
    ValueIsNotAnIterator(Value),

    /// (callee description, expected, actual)
    IncorrectNumberOfArguments(String, u32, u32),
    IncorrectNumberOfArgumentsVariadicAtLeast(String, u32, u32),

    TypeErrorUnaryOp(Opcode, Value),
    TypeErrorBinaryOp(Opcode, Value, Value),
    TypeErrorCannotCompare(Value, Value),
    TypeErrorArgMustNotBeEmpty(&'static str),
    TypeErrorFunc1(&'static str, Value),
    TypeErrorFunc2(&'static str, Value, Value),

    UnsupportedSetAttr,
    InvalidInstructionArgument(Opcode, Value),
}

impl RuntimeError {
    /// Shorthand used throughout the VM to bail out of an opcode handler.
    pub fn err<T>(self) -> Result<T, Box<RuntimeError>> {
        Err(Box::new(self))
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::ValueIsNotFunctionEvaluable(v) => {
                write!(f, "Tried to evaluate {} but it is not a function", v.format_error())
            }
            RuntimeError::ValueIsNotIterable(v) => {
                write!(f, "Tried to iterate {} but it is not an iterable", v.format_error())
            }
            RuntimeError::ValueIsNotAnIterator(v) => {
                write!(f, "Tried to step {} but it is not an iterator", v.format_error())
            }
            RuntimeError::IncorrectNumberOfArguments(name, e, a) => {
                write!(f, "Incorrect number of arguments for {}: expected {}, got {}", name, e, a)
            }
            RuntimeError::IncorrectNumberOfArgumentsVariadicAtLeast(name, e, a) => {
                write!(f, "Incorrect number of arguments for {}: expected at least {}, got {}", name, e, a)
            }
            RuntimeError::TypeErrorUnaryOp(op, v) => {
                write!(f, "TypeError: cannot apply unary '{}' to {}", op.format_error(), v.format_error())
            }
            RuntimeError::TypeErrorBinaryOp(op, l, r) => {
                write!(f, "TypeError: cannot {} {} and {}", op.format_error(), l.format_error(), r.format_error())
            }
            RuntimeError::TypeErrorCannotCompare(l, r) => {
                write!(f, "TypeError: cannot compare {} to {}", l.format_error(), r.format_error())
            }
            RuntimeError::TypeErrorArgMustNotBeEmpty(name) => {
                write!(f, "TypeError: argument to '{}' must not be empty", name)
            }
            RuntimeError::TypeErrorFunc1(name, v) => {
                write!(f, "TypeError: incorrect argument for {}: got {}", name, v.format_error())
            }
            RuntimeError::TypeErrorFunc2(name, v1, v2) => {
                write!(f, "TypeError: incorrect arguments for {}: got {} and {}", name, v1.format_error(), v2.format_error())
            }
            RuntimeError::UnsupportedSetAttr => {
                write!(f, "SetAttr is not supported by this virtual machine")
            }
            RuntimeError::InvalidInstructionArgument(op, v) => {
                write!(f, "Invalid argument {} for opcode {:?}", v.format_error(), op)
            }
        }
    }
}

trait AsError {
    fn format_error(&self) -> String;
}

impl AsError for Value {
    fn format_error(&self) -> String {
        format!("'{}' of type '{}'", self.as_str(), self.as_type_str())
    }
}

impl AsError for Opcode {
    fn format_error(&self) -> String {
        String::from(match self {
            Opcode::OpAdd => "add",
            Opcode::OpSub => "subtract",
            Opcode::OpMul => "multiply",
            Opcode::OpDiv => "divide",
            Opcode::OpMod => "modulo",
            Opcode::OpIn => "test membership of",
            Opcode::UnaryLogicalNot => "not",
            Opcode::OpIndex => "index",
            Opcode::StoreIndex => "index-assign",
            _ => return format!("{:?}", self),
        })
    }
}
