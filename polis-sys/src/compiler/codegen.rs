use fxhash::FxHashSet;

use crate::compiler::ast::{BinaryOp, Block, Expr, LValueHop, LambdaBody, Stmt};
use crate::vm::opcode::{Instruction, Opcode};
use crate::vm::value::Value;

use crate::vm::opcode::Opcode::{*};

/// Lowers a syntax tree into a flat instruction list.
///
/// Scoping: a stack of local-name sets, pushed per function body. An
/// assignment inside a function implicitly declares a new local unless the
/// name is already local; top-level assignments are globals. Reads mirror
/// the same rule, so a free name inside a lambda resolves as a global at
/// call time (no closures).
pub struct CodeGen {
    code: Vec<Instruction>,
    local_scopes: Vec<FxHashSet<String>>,
}

impl CodeGen {
    pub fn new() -> CodeGen {
        CodeGen {
            code: Vec::new(),
            local_scopes: Vec::new(),
        }
    }

    pub fn compile(mut self, block: &Block) -> Vec<Instruction> {
        self.emit_block(block);
        self.code
    }

    // ===== Emission helpers ===== //

    fn emit(&mut self, op: Opcode, arg: Value) -> usize {
        let index = self.code.len();
        self.code.push(Instruction::new(op, arg));
        index
    }

    fn emit_op(&mut self, op: Opcode) -> usize {
        self.emit(op, Value::Nil)
    }

    /// Emits a jump with a zero offset, to be patched later.
    fn reserve(&mut self, op: Opcode) -> usize {
        self.emit(op, Value::Int(0))
    }

    /// Jump offsets are relative: `target = index_of_jump + offset`.
    fn patch(&mut self, jump: usize, target: usize) {
        self.code[jump].arg = Value::Int(target as i64 - jump as i64);
    }

    fn patch_here(&mut self, jump: usize) {
        let here = self.code.len();
        self.patch(jump, here);
    }

    // ===== Statements ===== //

    fn emit_block(&mut self, block: &Block) {
        for statement in &block.0 {
            self.emit_stmt(statement);
            // Everything after an emitted return is unreachable.
            if matches!(self.code.last(), Some(insn) if insn.op == Return) {
                break;
            }
        }
    }

    fn emit_stmt(&mut self, statement: &Stmt) {
        match statement {
            Stmt::Assign(name, value) => {
                self.emit_expr(value);
                self.emit_store(name);
            }
            Stmt::LValueAssign(name, hops, value) => self.emit_lvalue_assign(name, hops, value),
            Stmt::Print(expr) => {
                self.emit_expr(expr);
                self.emit_op(Print);
            }
            Stmt::Return(expr) => {
                match expr {
                    Some(e) => self.emit_expr(e),
                    None => {
                        self.emit(Push, Value::Nil);
                    }
                }
                self.emit_op(Return);
            }
            Stmt::If(arms, else_block) => {
                let mut end_jumps: Vec<usize> = Vec::new();
                for (condition, block) in arms {
                    self.emit_expr(condition);
                    let jump_if_false = self.reserve(JumpIfFalse);
                    self.emit_block(block);
                    end_jumps.push(self.reserve(Jump));
                    self.patch_here(jump_if_false);
                }
                if let Some(block) = else_block {
                    self.emit_block(block);
                }
                for jump in end_jumps {
                    self.patch_here(jump);
                }
            }
            Stmt::For(name, iterable, body) => {
                self.emit_expr(iterable);
                self.emit_op(InitIterable);

                let loop_top = self.code.len();
                self.emit_op(TestIterable);
                let jump_exit = self.reserve(JumpIfFalse);
                self.emit_store(name);

                self.emit_block(body);

                let jump_back = self.reserve(Jump);
                self.patch(jump_back, loop_top);
                self.patch_here(jump_exit);
                // Discard the iterator handle left under the sentinel.
                self.emit_op(Pop);
            }
            Stmt::Def(name, params, body) => {
                let function = compile_function(params, body);
                self.emit(Push, function);
                // `def` always binds globally, even inside another function.
                self.emit(Store, Value::str(name.clone()));
            }
            Stmt::Expr(expr) => {
                self.emit_expr(expr);
                self.emit_op(Pop);
            }
        }
    }

    /// `base.hop[key] := value`: reload the base, walk all hops but the
    /// last to bring the penultimate container to the top, then write
    /// through the final hop. The base binding itself is never overwritten.
    fn emit_lvalue_assign(&mut self, name: &str, hops: &[LValueHop], value: &Expr) {
        self.emit_load(name);

        let (last, walk) = match hops.split_last() {
            Some(split) => split,
            None => return,
        };
        for hop in walk {
            match hop {
                LValueHop::Attr(attr) => {
                    self.emit(GetAttr, Value::str(attr.clone()));
                }
                LValueHop::Index(key) => {
                    self.emit_expr(key);
                    self.emit_op(OpIndex);
                }
            }
        }
        match last {
            LValueHop::Attr(attr) => {
                self.emit_expr(value);
                self.emit(SetAttr, Value::str(attr.clone()));
            }
            LValueHop::Index(key) => {
                self.emit_expr(key);
                self.emit_expr(value);
                self.emit_op(StoreIndex);
            }
        }
    }

    // ===== Expressions ===== //

    fn emit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Nil => {
                self.emit(Push, Value::Nil);
            }
            Expr::True => {
                self.emit(Push, Value::Bool(true));
            }
            Expr::False => {
                self.emit(Push, Value::Bool(false));
            }
            Expr::Int(i) => {
                self.emit(Push, Value::Int(*i));
            }
            Expr::Str(s) => {
                self.emit(Push, Value::str(s.clone()));
            }
            Expr::Name(name) => self.emit_load(name),

            Expr::List(items) => {
                for item in items {
                    self.emit_expr(item);
                }
                self.emit(MakeList, Value::Int(items.len() as i64));
            }
            Expr::Dict(pairs) => {
                for (key, value) in pairs {
                    self.emit(Push, Value::str(key.clone()));
                    self.emit_expr(value);
                }
                self.emit(MakeDict, Value::Int(pairs.len() as i64));
            }

            Expr::Binary(op, lhs, rhs) => {
                self.emit_expr(lhs);
                self.emit_expr(rhs);
                self.emit_op(binary_opcode(*op));
            }

            // Short-circuit lowering. The result is always a Bool: both
            // operands are consumed by conditional jumps, and the value is
            // materialized by the push-true / push-false tail.
            Expr::And(lhs, rhs) => {
                self.emit_expr(lhs);
                let jump_false_lhs = self.reserve(JumpIfFalse);
                self.emit_expr(rhs);
                let jump_false_rhs = self.reserve(JumpIfFalse);
                self.emit(Push, Value::Bool(true));
                let jump_end = self.reserve(Jump);
                self.patch_here(jump_false_lhs);
                self.patch_here(jump_false_rhs);
                self.emit(Push, Value::Bool(false));
                self.patch_here(jump_end);
            }
            Expr::Or(lhs, rhs) => {
                self.emit_expr(lhs);
                let jump_true_lhs = self.reserve(JumpIfTrue);
                self.emit_expr(rhs);
                let jump_true_rhs = self.reserve(JumpIfTrue);
                self.emit(Push, Value::Bool(false));
                let jump_end = self.reserve(Jump);
                self.patch_here(jump_true_lhs);
                self.patch_here(jump_true_rhs);
                self.emit(Push, Value::Bool(true));
                self.patch_here(jump_end);
            }
            Expr::Not(operand) => {
                self.emit_expr(operand);
                self.emit_op(UnaryLogicalNot);
            }
            Expr::Neg(operand) => {
                self.emit(Push, Value::Int(0));
                self.emit_expr(operand);
                self.emit_op(OpSub);
            }

            Expr::Call(callee, args) => {
                self.emit_expr(callee);
                for arg in args {
                    self.emit_expr(arg);
                }
                self.emit(OpFuncEval, Value::Int(args.len() as i64));
            }
            Expr::Index(container, key) => {
                self.emit_expr(container);
                self.emit_expr(key);
                self.emit_op(OpIndex);
            }
            Expr::Attr(receiver, name) => {
                self.emit_expr(receiver);
                self.emit(GetAttr, Value::str(name.clone()));
            }

            Expr::Lambda(params, body) => {
                let function = match body {
                    LambdaBody::Expr(e) => compile_lambda(params, e),
                    LambdaBody::Block(b) => compile_function(params, b),
                };
                self.emit(Push, function);
            }
        }
    }

    fn emit_load(&mut self, name: &str) {
        if self.local_scopes.last().map_or(false, |scope| scope.contains(name)) {
            self.emit(PushLocal, Value::str(name));
        } else {
            self.emit(PushGlobal, Value::str(name));
        }
    }

    fn emit_store(&mut self, name: &str) {
        match self.local_scopes.last_mut() {
            Some(scope) => {
                scope.insert(String::from(name));
                self.emit(StoreLocal, Value::str(name));
            }
            None => {
                self.emit(Store, Value::str(name));
            }
        }
    }
}

/// Compiles a function or block-bodied lambda in a fresh compiler seeded
/// with the parameter names; a trailing implicit `nil` return guarantees
/// the body ends with `Return` even when control falls through.
fn compile_function(params: &[String], body: &Block) -> Value {
    let mut inner = CodeGen::new();
    inner.local_scopes.push(params.iter().cloned().collect());
    inner.emit_block(body);
    inner.emit(Push, Value::Nil);
    inner.emit_op(Return);
    Value::function(inner.code, params.to_vec())
}

/// Compiles an expression-bodied lambda: the expression's value is the
/// return value.
fn compile_lambda(params: &[String], body: &Expr) -> Value {
    let mut inner = CodeGen::new();
    inner.local_scopes.push(params.iter().cloned().collect());
    inner.emit_expr(body);
    inner.emit_op(Return);
    Value::function(inner.code, params.to_vec())
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => OpAdd,
        BinaryOp::Sub => OpSub,
        BinaryOp::Mul => OpMul,
        BinaryOp::Div => OpDiv,
        BinaryOp::Mod => OpMod,
        BinaryOp::Equal => OpEqual,
        BinaryOp::NotEqual => OpNotEqual,
        BinaryOp::GreaterThan => OpGreaterThan,
        BinaryOp::LessThan => OpLessThan,
        BinaryOp::GreaterThanEqual => OpGreaterThanEqual,
        BinaryOp::LessThanEqual => OpLessThanEqual,
        BinaryOp::In => OpIn,
    }
}

#[cfg(test)]
mod test {
    use crate::compiler;
    use crate::vm::opcode::{Instruction, Opcode};
    use crate::vm::value::Value;

    use crate::vm::opcode::Opcode::{*};

    #[test]
    fn test_list_assignment_stream() {
        let code = compile("l = [1,2]");
        assert_eq!(
            vec![
                Instruction::new(Push, Value::Int(1)),
                Instruction::new(Push, Value::Int(2)),
                Instruction::new(MakeList, Value::Int(2)),
                Instruction::new(Store, Value::str("l")),
            ],
            code
        );
    }

    #[test]
    fn test_if_jump_shape() {
        let code = compile("if 1: print 2 end");
        assert_eq!(
            vec![
                Instruction::new(Push, Value::Int(1)),
                Instruction::new(JumpIfFalse, Value::Int(4)),
                Instruction::new(Push, Value::Int(2)),
                Instruction::of(Print),
                Instruction::new(Jump, Value::Int(1)),
            ],
            code
        );
    }

    #[test]
    fn test_for_loop_shape() {
        let code = compile("for i in xs: print i end");
        assert_eq!(
            vec![
                Instruction::new(PushGlobal, Value::str("xs")),
                Instruction::of(InitIterable),
                Instruction::of(TestIterable),
                Instruction::new(JumpIfFalse, Value::Int(5)),
                Instruction::new(Store, Value::str("i")),
                Instruction::new(PushGlobal, Value::str("i")),
                Instruction::of(Print),
                Instruction::new(Jump, Value::Int(-5)),
                Instruction::of(Pop),
            ],
            code
        );
    }

    #[test]
    fn test_expression_statement_pops() {
        let code = compile("f()");
        assert_eq!(
            vec![
                Instruction::new(PushGlobal, Value::str("f")),
                Instruction::new(OpFuncEval, Value::Int(0)),
                Instruction::of(Pop),
            ],
            code
        );
    }

    #[test]
    fn test_statements_after_return_are_not_emitted() {
        let code = compile("return 1\nprint 2");
        assert_eq!(
            vec![Instruction::new(Push, Value::Int(1)), Instruction::of(Return)],
            code
        );
    }

    #[test]
    fn test_jump_targets_stay_in_bounds() {
        let sources = [
            "if a: print 1 elif b: print 2 else print 3 end",
            "return 1 and 2 or not 3",
            "for i in range(3): if i > 1: print i end end",
        ];
        for src in sources {
            let code = compile(src);
            for (pc, insn) in code.iter().enumerate() {
                if insn.op.is_jump() {
                    let offset = match insn.arg {
                        Value::Int(i) => i,
                        _ => panic!("jump argument must be an int"),
                    };
                    let target = pc as i64 + offset;
                    assert!(
                        target >= 0 && target <= code.len() as i64,
                        "jump at {} lands at {} outside [0, {}]",
                        pc,
                        target,
                        code.len()
                    );
                }
            }
        }
    }

    #[test]
    fn test_and_produces_bool_shape() {
        let code = compile("return 1 and 2");
        assert_eq!(
            vec![
                Instruction::new(Push, Value::Int(1)),
                Instruction::new(JumpIfFalse, Value::Int(5)),
                Instruction::new(Push, Value::Int(2)),
                Instruction::new(JumpIfFalse, Value::Int(3)),
                Instruction::new(Push, Value::Bool(true)),
                Instruction::new(Jump, Value::Int(2)),
                Instruction::new(Push, Value::Bool(false)),
                Instruction::of(Return),
            ],
            code
        );
    }

    #[test]
    fn test_function_bodies_end_with_return() {
        let code = compile("def f(x) x = x + 1 end");
        let function = match &code[0] {
            insn if insn.op == Push => match &insn.arg {
                Value::Function(f) => f.clone(),
                v => panic!("expected a function constant, got {:?}", v),
            },
            insn => panic!("expected a push, got {:?}", insn),
        };
        assert!(!function.code.is_empty());
        assert_eq!(Return, function.code.last().unwrap().op);
        assert_eq!(1, function.nargs);
        assert_eq!(vec![String::from("x")], function.params);
    }

    #[test]
    fn test_assignment_in_function_is_local() {
        let code = compile("def f() x = 1 return x end");
        let function = match &code[0].arg {
            Value::Function(f) => f.clone(),
            v => panic!("expected a function constant, got {:?}", v),
        };
        assert_eq!(StoreLocal, function.code[1].op);
        assert_eq!(PushLocal, function.code[2].op);
    }

    #[test]
    fn test_global_read_in_function() {
        let code = compile("def f() return g end");
        let function = match &code[0].arg {
            Value::Function(f) => f.clone(),
            v => panic!("expected a function constant, got {:?}", v),
        };
        assert_eq!(PushGlobal, function.code[0].op);
    }

    #[test]
    fn test_lambda_does_not_see_enclosing_locals() {
        let code = compile("def mk(n) return (x) => x + n end");
        let outer = match &code[0].arg {
            Value::Function(f) => f.clone(),
            v => panic!("expected a function constant, got {:?}", v),
        };
        let lambda = outer
            .code
            .iter()
            .find_map(|insn| match &insn.arg {
                Value::Function(f) => Some(f.clone()),
                _ => None,
            })
            .unwrap();
        // `x` is the lambda's own parameter; `n` is free and resolves as a
        // global at call time.
        assert_eq!(PushLocal, lambda.code[0].op);
        assert_eq!(PushGlobal, lambda.code[1].op);
    }

    #[test]
    fn test_nested_lvalue_assignment() {
        let code = compile("u['team']['lead'] := 'alice'");
        assert_eq!(
            vec![
                Instruction::new(PushGlobal, Value::str("u")),
                Instruction::new(Push, Value::str("team")),
                Instruction::of(OpIndex),
                Instruction::new(Push, Value::str("lead")),
                Instruction::new(Push, Value::str("alice")),
                Instruction::of(StoreIndex),
            ],
            code
        );
    }

    fn compile(src: &str) -> Vec<Instruction> {
        compiler::compile(src).unwrap().code
    }
}
