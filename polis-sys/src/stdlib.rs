//! The interpreter's seeded environment: builtin globals, native methods on
//! the builtin variants, and a handful of methods written in the policy
//! language itself, compiled at startup and attached through the method
//! table.

use std::io::Write;

use itertools::Itertools;

use crate::compiler;
use crate::vm::error::ValueResult;
use crate::vm::host::Range;
use crate::vm::value::{IntoValue, Type, Value};
use crate::vm::{Interpreter, MethodKey};

use crate::vm::error::RuntimeError::{*};

pub fn install<W: Write>(interp: &mut Interpreter<W>) {
    interp.register_native("range", 1, false, native_range);
    interp.register_native("len", 1, false, native_len);

    // Method arities count the receiver.
    interp.register_method(MethodKey::Kind(Type::List), "append", Value::native("append", 2, false, list_append));
    interp.register_method(MethodKey::Kind(Type::List), "pop", Value::native("pop", 1, false, list_pop));
    interp.register_method(MethodKey::Kind(Type::Dict), "keys", Value::native("keys", 1, false, dict_keys));
    interp.register_method(MethodKey::Kind(Type::Str), "fmt", Value::native("fmt", 1, true, str_fmt));
    interp.register_method(MethodKey::Kind(Type::Str), "join", Value::native("join", 2, false, str_join));

    register_dsl_method(interp, LIST_EACH, "__list_each", "each", MethodKey::Kind(Type::List));
    register_dsl_method(interp, LIST_MAP, "__list_map", "map", MethodKey::Kind(Type::List));
    register_dsl_method(interp, LIST_FILTER, "__list_filter", "filter", MethodKey::Kind(Type::List));
    register_dsl_method(interp, LIST_EACH, "__list_each", "each", MethodKey::Host("range"));
    register_dsl_method(interp, LIST_FILTER, "__list_filter", "filter", MethodKey::Host("range"));
}

/// Compiles a method written in the policy language, executes its `def` so
/// the function lands in globals, then moves it into the method table.
fn register_dsl_method<W: Write>(
    interp: &mut Interpreter<W>,
    src: &str,
    func_name: &str,
    attach_as: &str,
    key: MethodKey,
) {
    let compiled = compiler::compile(src).expect("stdlib method source must compile");
    interp.exec(&compiled.code).expect("stdlib method must execute");
    let func = interp
        .globals
        .remove(func_name)
        .expect("stdlib method must define its function");
    interp.register_method(key, attach_as, func);
}

const LIST_EACH: &str = "\
def __list_each(l, f)
    for x in l
        f(x)
    end
end
";

const LIST_MAP: &str = "\
def __list_map(l, f)
    ret = []
    for x in l
        z = f(x)
        ret.append(z)
    end
    return ret
end
";

const LIST_FILTER: &str = "\
def __list_filter(l, f)
    ret = []
    for x in l
        cond = f(x)
        if cond:
            ret.append(x)
        end
    end
    return ret
end
";

// ===== Builtin globals ===== //

fn native_range(args: Vec<Value>) -> ValueResult {
    match args.into_iter().next() {
        Some(Value::Int(n)) => Ok(Value::foreign(Range { start: 0, stop: n })),
        Some(v) => TypeErrorFunc1("range", v).err(),
        None => TypeErrorFunc1("range", Value::Nil).err(),
    }
}

fn native_len(args: Vec<Value>) -> ValueResult {
    let v = args.into_iter().next().unwrap_or(Value::Nil);
    match &v {
        Value::Str(s) => Ok(s.chars().count().to_value()),
        Value::List(l) => Ok(l.borrow().len().to_value()),
        Value::Dict(d) => Ok(d.borrow().len().to_value()),
        Value::Foreign(obj) => match obj.borrow().length() {
            Some(n) => Ok(n.to_value()),
            None => TypeErrorFunc1("len", v.clone()).err(),
        },
        _ => TypeErrorFunc1("len", v.clone()).err(),
    }
}

// ===== List methods ===== //

fn list_append(mut args: Vec<Value>) -> ValueResult {
    let item = args.pop().unwrap_or(Value::Nil);
    let receiver = args.pop().unwrap_or(Value::Nil);
    match &receiver {
        Value::List(l) => {
            l.borrow_mut().push(item);
            Ok(receiver.clone())
        }
        _ => TypeErrorFunc2("append", receiver.clone(), item).err(),
    }
}

fn list_pop(mut args: Vec<Value>) -> ValueResult {
    let receiver = args.pop().unwrap_or(Value::Nil);
    match &receiver {
        Value::List(l) => {
            let popped = l.borrow_mut().pop();
            match popped {
                Some(v) => Ok(v),
                None => TypeErrorArgMustNotBeEmpty("pop").err(),
            }
        }
        _ => TypeErrorFunc1("pop", receiver.clone()).err(),
    }
}

// ===== Dict methods ===== //

fn dict_keys(mut args: Vec<Value>) -> ValueResult {
    let receiver = args.pop().unwrap_or(Value::Nil);
    match &receiver {
        Value::Dict(d) => Ok(Value::list(d.borrow().keys().map(|k| Value::str(k.clone())).collect())),
        _ => TypeErrorFunc1("keys", receiver.clone()).err(),
    }
}

// ===== String methods ===== //

/// `%s` and `%d` substitute the next argument's display form; `%%` is a
/// literal percent. Leftover directives pass through untouched.
fn str_fmt(args: Vec<Value>) -> ValueResult {
    let mut iter = args.into_iter();
    let receiver = iter.next().unwrap_or(Value::Nil);
    let template = match &receiver {
        Value::Str(s) => s.clone(),
        _ => return TypeErrorFunc1("fmt", receiver.clone()).err(),
    };

    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s') | Some('d') => out.push_str(&iter.next().unwrap_or(Value::Nil).as_str()),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    Ok(Value::Str(out))
}

fn str_join(args: Vec<Value>) -> ValueResult {
    let mut iter = args.into_iter();
    let sep = iter.next().unwrap_or(Value::Nil);
    let list = iter.next().unwrap_or(Value::Nil);
    match (&sep, &list) {
        (Value::Str(s), Value::List(l)) => {
            Ok(Value::Str(l.borrow().iter().map(|v| v.as_str()).join(s.as_str())))
        }
        _ => TypeErrorFunc2("join", sep.clone(), list.clone()).err(),
    }
}
