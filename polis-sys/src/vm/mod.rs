use std::io::Write;

use fxhash::FxHashMap;

use crate::stdlib;
use crate::trace;
use crate::vm::error::{RuntimeError, ValueResult};
use crate::vm::host::{CharIter, DictKeyIter, ListIter, Step};
use crate::vm::opcode::{Instruction, Opcode};
use crate::vm::value::{BoundMethodImpl, Type, Value};

use crate::vm::error::RuntimeError::{*};
use crate::vm::opcode::Opcode::{*};

pub mod error;
pub mod host;
pub mod opcode;
pub mod operator;
pub mod value;

/// Invoked before each instruction with `(pc, opcode, argument, stack)`.
pub type TraceHook = Box<dyn FnMut(usize, &Opcode, &Value, &[Value])>;

/// Key into the method table: either a value variant, or a Foreign host
/// type name. Host lookups walk the receiver's `type_names()` in order, so
/// a more specific name shadows a more general one.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum MethodKey {
    Kind(Type),
    Host(&'static str),
}

type Methods = FxHashMap<String, Value>;

/// A single-threaded bytecode interpreter. Owns the operand stack, the
/// globals, the activation-frame stack, and the method table; `Print`
/// output goes to the supplied writer.
pub struct Interpreter<W: Write> {
    pub(crate) stack: Vec<Value>,
    pub(crate) globals: FxHashMap<String, Value>,
    frames: Vec<FxHashMap<String, Value>>,
    method_table: FxHashMap<MethodKey, Methods>,
    trace_hook: Option<TraceHook>,
    pub(crate) write: W,
}

impl<W: Write> Interpreter<W> {
    pub fn new(write: W) -> Interpreter<W> {
        let mut interpreter = Interpreter {
            stack: Vec::new(),
            globals: FxHashMap::default(),
            frames: Vec::new(),
            method_table: FxHashMap::default(),
            trace_hook: None,
            write,
        };
        stdlib::install(&mut interpreter);
        interpreter
    }

    // ===== Embedding API ===== //

    pub fn store_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    pub fn load_global(&self, name: &str) -> Value {
        self.globals.get(name).cloned().unwrap_or(Value::Nil)
    }

    pub fn register_native(
        &mut self,
        name: &str,
        nargs: u32,
        variadic: bool,
        func: impl Fn(Vec<Value>) -> ValueResult + 'static,
    ) {
        self.store_global(name, Value::native(name, nargs, variadic, func));
    }

    pub fn register_method(&mut self, key: MethodKey, name: impl Into<String>, func: Value) {
        self.method_table.entry(key).or_default().insert(name.into(), func);
    }

    pub fn set_trace_hook(&mut self, hook: Option<TraceHook>) {
        self.trace_hook = hook;
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    /// Resolves a method for a receiver: Foreign receivers walk their host
    /// type names most-specific first, everything else keys on the variant.
    pub fn resolve_method(&self, receiver: &Value, name: &str) -> Option<Value> {
        if let Value::Foreign(obj) = receiver {
            let type_names = obj.borrow().type_names();
            for type_name in type_names.iter().copied() {
                let found = self
                    .method_table
                    .get(&MethodKey::Host(type_name))
                    .and_then(|methods| methods.get(name));
                if let Some(func) = found {
                    return Some(func.clone());
                }
            }
            return None;
        }
        self.method_table
            .get(&MethodKey::Kind(receiver.ty()))
            .and_then(|methods| methods.get(name))
            .cloned()
    }

    // ===== Execution ===== //

    /// Runs an instruction list to completion. `Return` yields the popped
    /// top of stack; falling off the end yields `Nil`.
    pub fn exec(&mut self, code: &[Instruction]) -> ValueResult {
        let mut pc: usize = 0;
        while pc < code.len() {
            let insn = &code[pc];

            if let Some(hook) = &mut self.trace_hook {
                hook(pc, &insn.op, &insn.arg, &self.stack);
            }

            let mut next_pc = pc + 1;
            match insn.op {
                Push => {
                    trace::trace_interpreter!("push {}", insn.arg.to_repr_str());
                    self.push(insn.arg.clone());
                }
                Pop => {
                    self.pop();
                }

                Store => {
                    let name = expect_str(insn)?;
                    trace::trace_interpreter!("store global {}", name);
                    let value = self.pop();
                    self.globals.insert(String::from(name), value);
                }
                PushGlobal => {
                    let name = expect_str(insn)?;
                    trace::trace_interpreter!("push global {}", name);
                    let value = self.globals.get(name).cloned().unwrap_or(Value::Nil);
                    self.push(value);
                }
                StoreLocal => {
                    let name = expect_str(insn)?;
                    trace::trace_interpreter!("store local {}", name);
                    let value = self.pop();
                    match self.frames.last_mut() {
                        Some(frame) => {
                            frame.insert(String::from(name), value);
                        }
                        // Top-level loop variables land here: no frame in
                        // flight degrades to a global store.
                        None => {
                            self.globals.insert(String::from(name), value);
                        }
                    }
                }
                PushLocal => {
                    let name = expect_str(insn)?;
                    trace::trace_interpreter!("push local {}", name);
                    let value = self
                        .frames
                        .last()
                        .and_then(|frame| frame.get(name))
                        .cloned()
                        .unwrap_or(Value::Nil);
                    self.push(value);
                }

                MakeList => {
                    let n = expect_int(insn)? as usize;
                    let items = self.pop_n(n);
                    self.push(Value::list(items));
                }
                MakeDict => {
                    let n = expect_int(insn)? as usize;
                    let mut pairs: Vec<(String, Value)> = Vec::with_capacity(n);
                    for _ in 0..n {
                        let value = self.pop();
                        let key = self.pop();
                        pairs.push((key.key_str(), value));
                    }
                    pairs.reverse();
                    self.push(Value::dict(pairs));
                }

                OpIndex => {
                    let key = self.pop();
                    let container = self.pop();
                    self.push(operator::get_index(&container, &key));
                }
                StoreIndex => {
                    let value = self.pop();
                    let key = self.pop();
                    let container = self.pop();
                    operator::set_index(&container, key, value);
                }
                GetAttr => {
                    let name = expect_str(insn)?;
                    trace::trace_interpreter!("getattr {}", name);
                    let receiver = self.pop();
                    match self.resolve_method(&receiver, name) {
                        Some(func) => {
                            let bound = Value::bound_method(func, receiver);
                            self.push(bound);
                        }
                        None => {
                            // Only Foreign receivers have a host attribute
                            // surface; everything else misses to Nil.
                            let fallback = match &receiver {
                                Value::Foreign(obj) => obj.borrow().getattr(name),
                                _ => None,
                            };
                            self.push(fallback.unwrap_or(Value::Nil));
                        }
                    }
                }
                SetAttr => return UnsupportedSetAttr.err(),

                OpFuncEval => {
                    let n = expect_int(insn)? as usize;
                    trace::trace_interpreter!("call with {} args", n);
                    let args = self.pop_n(n);
                    let callee = self.pop();
                    let ret = self.call_value(callee, args)?;
                    self.push(ret);
                }
                Return => return Ok(self.pop()),

                OpAdd => self.binary(operator::binary_add)?,
                OpSub => self.binary(operator::binary_sub)?,
                OpMul => self.binary(operator::binary_mul)?,
                OpDiv => self.binary(operator::binary_div)?,
                OpMod => self.binary(operator::binary_mod)?,

                OpEqual => self.binary(operator::binary_equals)?,
                OpNotEqual => self.binary(operator::binary_not_equals)?,
                OpGreaterThan => self.binary(operator::binary_greater_than)?,
                OpLessThan => self.binary(operator::binary_less_than)?,
                OpGreaterThanEqual => self.binary(operator::binary_greater_than_or_equal)?,
                OpLessThanEqual => self.binary(operator::binary_less_than_or_equal)?,
                OpIn => {
                    let rhs = self.pop();
                    let lhs = self.pop();
                    self.push(operator::binary_in(lhs, rhs));
                }
                UnaryLogicalNot => {
                    let value = self.pop();
                    self.push(operator::unary_not(value));
                }

                Jump => {
                    let offset = expect_int(insn)?;
                    trace::trace_interpreter!("jump {:+}", offset);
                    next_pc = add_offset(pc, offset);
                }
                JumpIfTrue => {
                    let cond = self.pop();
                    if cond.as_bool() {
                        next_pc = add_offset(pc, expect_int(insn)?);
                    }
                }
                JumpIfFalse => {
                    let cond = self.pop();
                    if !cond.as_bool() {
                        next_pc = add_offset(pc, expect_int(insn)?);
                    }
                }

                InitIterable => {
                    let value = self.pop();
                    let iter = self.make_iter(value)?;
                    self.push(iter);
                }
                TestIterable => {
                    let iter = self.pop();
                    let step = match &iter {
                        Value::Foreign(obj) => obj.borrow_mut().step(),
                        _ => None,
                    };
                    match step {
                        Some(Step::Yield(item)) => {
                            self.push(iter);
                            self.push(item);
                            self.push(Value::Bool(true));
                        }
                        Some(Step::Done) => {
                            self.push(iter);
                            self.push(Value::Bool(false));
                        }
                        None => return ValueIsNotAnIterator(iter).err(),
                    }
                }

                Print => {
                    let value = self.pop();
                    let text = value.as_str();
                    writeln!(&mut self.write, "{}", text).unwrap();
                }
            }
            pc = next_pc;
        }
        Ok(Value::Nil)
    }

    /// The call protocol. Bound methods prepend their receiver and re-enter;
    /// functions get a fresh activation frame and run to completion on the
    /// shared operand stack; natives check arity (exact, or a variadic
    /// minimum) and run host-side.
    pub fn call_value(&mut self, callee: Value, mut args: Vec<Value>) -> ValueResult {
        match callee {
            Value::BoundMethod(bound) => {
                let BoundMethodImpl { func, receiver } = *bound;
                args.insert(0, receiver);
                self.call_value(func, args)
            }
            Value::Function(func) => {
                if func.nargs as usize != args.len() {
                    return IncorrectNumberOfArguments(
                        format!("fn({})", func.params.join(", ")),
                        func.nargs,
                        args.len() as u32,
                    )
                    .err();
                }
                self.push_frame(&func.params, args);
                let ret = self.exec(&func.code);
                self.frames.pop();
                ret
            }
            Value::NativeFunction(native) => {
                let nargs = args.len() as u32;
                if native.variadic {
                    if nargs < native.nargs {
                        return IncorrectNumberOfArgumentsVariadicAtLeast(
                            native.name.clone(),
                            native.nargs,
                            nargs,
                        )
                        .err();
                    }
                } else if nargs != native.nargs {
                    return IncorrectNumberOfArguments(native.name.clone(), native.nargs, nargs)
                        .err();
                }
                (native.func)(args)
            }
            v => ValueIsNotFunctionEvaluable(v).err(),
        }
    }

    fn make_iter(&self, value: Value) -> ValueResult {
        match value {
            Value::List(list) => Ok(Value::foreign(ListIter::new(list))),
            Value::Dict(dict) => Ok(Value::foreign(DictKeyIter::new(&dict))),
            Value::Str(s) => Ok(Value::foreign(CharIter::new(&s))),
            Value::Foreign(obj) => {
                let iter = obj.borrow().make_iter();
                match iter {
                    Some(it) => Ok(it),
                    None => ValueIsNotIterable(Value::Foreign(obj)).err(),
                }
            }
            v => ValueIsNotIterable(v).err(),
        }
    }

    fn push_frame(&mut self, params: &[String], args: Vec<Value>) {
        let mut frame: FxHashMap<String, Value> = FxHashMap::default();
        for (name, value) in params.iter().zip(args) {
            frame.insert(name.clone(), value);
        }
        self.frames.push(frame);
    }

    fn binary(&mut self, f: fn(Value, Value) -> ValueResult) -> Result<(), Box<RuntimeError>> {
        let rhs = self.pop();
        let lhs = self.pop();
        let ret = f(lhs, rhs)?;
        self.push(ret);
        Ok(())
    }

    // ===== Stack helpers ===== //

    fn push(&mut self, value: Value) {
        trace::trace_interpreter_stack!("push {}", value.to_repr_str());
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        trace::trace_interpreter_stack!("pop");
        self.stack.pop().unwrap_or(Value::Nil)
    }

    fn pop_n(&mut self, n: usize) -> Vec<Value> {
        let at = self.stack.len().saturating_sub(n);
        self.stack.split_off(at)
    }
}

/// The stock trace hook: one line per instruction to stdout, in the shape
/// `[pc=N] Opcode, arg | stack=[..]`.
pub fn default_trace_hook() -> TraceHook {
    Box::new(|pc, op, arg, stack| {
        let snapshot: Vec<String> = stack.iter().map(|v| v.to_repr_str()).collect();
        println!("[pc={}] {:?}, {} | stack=[{}]", pc, op, arg.to_repr_str(), snapshot.join(", "));
    })
}

fn add_offset(pc: usize, offset: i64) -> usize {
    (pc as i64 + offset) as usize
}

fn expect_int(insn: &Instruction) -> Result<i64, Box<RuntimeError>> {
    match &insn.arg {
        Value::Int(i) => Ok(*i),
        _ => InvalidInstructionArgument(insn.op, insn.arg.clone()).err(),
    }
}

fn expect_str(insn: &Instruction) -> Result<&str, Box<RuntimeError>> {
    match &insn.arg {
        Value::Str(s) => Ok(s.as_str()),
        _ => InvalidInstructionArgument(insn.op, insn.arg.clone()).err(),
    }
}

#[cfg(test)]
mod test {
    use crate::compiler;
    use crate::vm::value::Value;
    use crate::vm::Interpreter;

    #[test] fn test_arithmetic() { assert_eq!(Value::Int(9), run("return (1 + 2) * 3")); }
    #[test] fn test_arithmetic_precedence() { assert_eq!(Value::Int(7), run("return 1 + 2 * 3")); }
    #[test] fn test_unary_minus() { assert_eq!(Value::Int(-4), run("return -4")); }
    #[test] fn test_unary_minus_expr() { assert_eq!(Value::Int(-6), run("return -(1 + 2) * 2")); }
    #[test] fn test_division_truncates() { assert_eq!(Value::Int(-1), run("return -5 / 3")); }
    #[test] fn test_modulo() { assert_eq!(Value::Int(2), run("return 11 % 3")); }
    #[test] fn test_string_concat() { assert_eq!(Value::str("ab"), run("return 'a' + 'b'")); }

    #[test] fn test_comparison_and_in() { assert_eq!(Value::Bool(true), run("return 2 in [1,2,3] and (3 <= 3) and (4 > 1)")); }
    #[test] fn test_not() { assert_eq!(Value::Bool(true), run("return not (1 == 2)")); }
    #[test] fn test_and_is_bool() { assert_eq!(Value::Bool(true), run("return 1 and 2")); }
    #[test] fn test_or_is_bool() { assert_eq!(Value::Bool(true), run("return 0 or 'x'")); }
    #[test] fn test_and_short_circuit() { run_str("x = 0\n1 == 2 and mutate()\nreturn x", "", Value::Int(0)); }
    #[test] fn test_cross_kind_equality() { assert_eq!(Value::Bool(true), run("return 1 == true")); }
    #[test] fn test_membership_unsupported_is_false() { assert_eq!(Value::Bool(false), run("return 1 in 2")); }

    #[test] fn test_nil_literal() { assert_eq!(Value::Nil, run("return nil")); }
    #[test] fn test_implicit_nil_return() { assert_eq!(Value::Nil, run("return")); }
    #[test] fn test_fall_off_end_is_nil() { assert_eq!(Value::Nil, run("x = 1")); }

    #[test] fn test_list_index() { assert_eq!(Value::Int(20), run("xs = [10,20,30]\nreturn xs[1]")); }
    #[test] fn test_list_negative_index() { assert_eq!(Value::Int(30), run("xs = [10,20,30]\nreturn xs[-1]")); }
    #[test] fn test_list_index_miss_is_nil() { assert_eq!(Value::Nil, run("return [1,2][5]")); }
    #[test] fn test_list_store_index() { assert_eq!(Value::Int(99), run("xs = [0,1,2]\nxs[1] := 99\nreturn xs[1]")); }
    #[test] fn test_dict_literal_index() { assert_eq!(Value::str("alice"), run("u = {name: 'alice', age: 30}\nreturn u['name']")); }
    #[test] fn test_dict_nested_store() { assert_eq!(Value::str("alice"), run("u = {team: {lead: 'bob'}}\nu['team']['lead'] := 'alice'\nreturn u['team']['lead']")); }
    #[test] fn test_dict_attr_is_nil() { assert_eq!(Value::Nil, run("u = {team: {lead: 'bob'}}\nreturn u.team")); }
    #[test] fn test_dict_attr_miss_is_nil() { assert_eq!(Value::Nil, run("return {a: 1}.b")); }
    #[test] fn test_attr_on_nil_is_nil() { assert_eq!(Value::Nil, run("return nil.anything")); }
    #[test] fn test_dict_int_key_coerces() { assert_eq!(Value::str("one"), run("d = {}\nd[1] := 'one'\nreturn d['1']")); }
    #[test] fn test_string_index() { assert_eq!(Value::str("e"), run("return 'hello'[1]")); }

    #[test] fn test_list_aliasing() { assert_eq!(Value::Int(5), run("a = [1,2]\nb = a\nb[0] := 5\nreturn a[0]")); }

    #[test]
    fn test_if_elif_else_prints() {
        let src = "\
def greet(x)
    if x == 'root':
        print 'greetings, allmighty root'
    elif x == 'admin':
        print 'hi there, mr admin'
    else
        print 'hello, humble user'
    end
    return nil
end

greet('user')
greet('root')
greet('admin')
";
        run_str(src, "hello, humble user\ngreetings, allmighty root\nhi there, mr admin\n", Value::Nil);
    }

    #[test]
    fn test_for_over_range_no_stack_leak() {
        run_str("for x in range(3): print(x) end", "0\n1\n2\n", Value::Nil);
    }

    #[test]
    fn test_for_over_string() {
        run_str("for c in 'ab': print(c) end", "a\nb\n", Value::Nil);
    }

    #[test]
    fn test_for_over_dict_keys() {
        run_str("d = {a: 1, b: 2}\nfor k in d: print(k) end", "a\nb\n", Value::Nil);
    }

    #[test]
    fn test_functions_and_list_append() {
        let src = "\
def add(x, y)
    return x + y
end
xs = []
for i in range(3):
    xs.append(add(i, 10))
end
return xs[1]
";
        assert_eq!(Value::Int(11), run(src));
    }

    #[test]
    fn test_lambda_factory() {
        assert_eq!(Value::Int(42), run("def mk() return (x, n) => x + n end\nf = mk()\nreturn f(41, 1)"));
    }

    #[test]
    fn test_lambda_single_param() {
        assert_eq!(Value::Int(10), run("f = x => x * 5\nreturn f(2)"));
    }

    #[test]
    fn test_lambda_block_body() {
        let src = "\
f = (x) =>
    y = x + 1
    return y * 2
end
return f(3)
";
        assert_eq!(Value::Int(8), run(src));
    }

    #[test]
    fn test_lambda_does_not_capture() {
        // The free name resolves as a global at call time, not the enclosing
        // function's local.
        let src = "\
def mk(n)
    f = (x) => x + n
    return f(41)
end
n = 1
return mk(5)
";
        assert_eq!(Value::Int(42), run(src));
    }

    #[test]
    fn test_locals_do_not_leak_to_globals() {
        assert_eq!(Value::Nil, run("def f() x = 1 return x end\nf()\nreturn x"));
    }

    #[test]
    fn test_globals_readable_inside_function() {
        assert_eq!(Value::Int(7), run("g = 7\ndef f() return g end\nreturn f()"));
    }

    #[test]
    fn test_statements_after_return_are_dead() {
        run_str("def f() return 1 print 'nope' end\nf()", "", Value::Nil);
    }

    #[test]
    fn test_nested_calls_share_stack() {
        assert_eq!(Value::Int(22), run("def dbl(x) return x * 2 end\ndef inc(x) return x + 1 end\nreturn dbl(inc(dbl(inc(4))))"));
    }

    #[test]
    fn test_method_chain() {
        assert_eq!(Value::Int(3), run("l = [1,2,3]\nreturn l.pop()"));
    }

    #[test]
    fn test_each_with_lambda() {
        assert_eq!(Value::Int(10), run("l = []\n[1, 2, 3].each(i => l.append(i * 10))\nreturn l[0]"));
    }

    #[test]
    fn test_map_over_list() {
        assert_eq!(Value::Int(4), run("return [1,2,3].map(x => x * 2)[1]"));
    }

    #[test]
    fn test_filter_over_range() {
        assert_eq!(Value::Int(4), run("evens = range(6).filter(x => x % 2 == 0)\nreturn evens[2]"));
    }

    #[test]
    fn test_len_builtin() {
        assert_eq!(Value::Int(3), run("return len([1,2,3])"));
        assert_eq!(Value::Int(5), run("return len('hello')"));
        assert_eq!(Value::Int(4), run("return len(range(4))"));
    }

    #[test]
    fn test_dict_keys_method() {
        assert_eq!(Value::str("a"), run("return {a: 1, b: 2}.keys()[0]"));
    }

    #[test]
    fn test_str_fmt() {
        assert_eq!(Value::str("hello, world"), run("return '%s, %s'.fmt('hello', 'world')"));
    }

    #[test]
    fn test_str_join() {
        assert_eq!(Value::str("one,two"), run("return ','.join(['one', 'two'])"));
    }

    #[test]
    fn test_arity_mismatch_is_fatal() {
        run_err("def f(x) return x end\nreturn f(1, 2)");
    }

    #[test]
    fn test_calling_non_callable_is_fatal() {
        run_err("x = 1\nreturn x(2)");
    }

    #[test]
    fn test_iterating_non_iterable_is_fatal() {
        run_err("for x in 5: print(x) end");
    }

    #[test]
    fn test_bound_method_arity_counts_receiver() {
        // append is declared with arity 2: the receiver plus one argument.
        run_err("[].append(1, 2)");
    }

    #[test]
    fn test_method_resolution_is_deterministic() {
        let vm: Interpreter<Vec<u8>> = Interpreter::new(Vec::new());
        let list = Value::list(vec![]);
        let a = vm.resolve_method(&list, "append").unwrap();
        let b = vm.resolve_method(&list, "append").unwrap();
        assert!(a.is_equal(&b));
    }

    #[test]
    fn test_trace_hook_sees_every_instruction() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let compiled = compiler::compile("return 1 + 2").unwrap();
        let count = Rc::new(RefCell::new(0usize));
        let seen = count.clone();
        let mut vm = Interpreter::new(Vec::new());
        vm.set_trace_hook(Some(Box::new(move |_, _, _, _| {
            *seen.borrow_mut() += 1;
        })));
        vm.exec(&compiled.code).unwrap();
        assert_eq!(compiled.code.len(), *count.borrow());
    }

    // ===== Harness ===== //

    fn run(src: &str) -> Value {
        let compiled = compiler::compile(src).unwrap();
        let mut vm = Interpreter::new(Vec::new());
        let ret = vm.exec(&compiled.code).unwrap();
        assert!(vm.stack.is_empty());
        ret
    }

    fn run_str(src: &str, expected_out: &str, expected_ret: Value) {
        let compiled = compiler::compile(src).unwrap();
        let mut buf: Vec<u8> = Vec::new();
        {
            let mut vm = Interpreter::new(&mut buf);
            let ret = vm.exec(&compiled.code).unwrap();
            assert!(vm.stack.is_empty());
            assert_eq!(expected_ret, ret);
        }
        assert_eq!(expected_out, String::from_utf8(buf).unwrap());
    }

    fn run_err(src: &str) {
        let compiled = compiler::compile(src).unwrap();
        let mut vm = Interpreter::new(Vec::new());
        assert!(vm.exec(&compiled.code).is_err());
    }
}
