/// The syntax tree handed to the code generator. Produced by
/// `compiler::parser`, printable with `{:#?}` for the CLI's parse-tree mode.

#[derive(PartialEq, Debug, Clone)]
pub struct Block(pub Vec<Stmt>);

#[derive(PartialEq, Debug, Clone)]
pub enum Stmt {
    /// `NAME = expr`
    Assign(String, Expr),
    /// `NAME (.NAME | [expr])+ := expr` — assignment through a container.
    LValueAssign(String, Vec<LValueHop>, Expr),
    /// `print expr`
    Print(Expr),
    /// `return [expr]`
    Return(Option<Expr>),
    /// `if expr block (elif expr block)* [else block] end`
    If(Vec<(Expr, Block)>, Option<Block>),
    /// `for NAME in expr block end`
    For(String, Expr, Block),
    /// `def NAME(params) block end`
    Def(String, Vec<String>, Block),
    /// An expression evaluated for its side effects; the result is dropped.
    Expr(Expr),
}

#[derive(PartialEq, Debug, Clone)]
pub enum LValueHop {
    /// `.NAME`
    Attr(String),
    /// `[expr]`
    Index(Expr),
}

#[derive(PartialEq, Debug, Clone)]
pub enum Expr {
    Nil,
    True,
    False,
    Int(i64),
    Str(String),
    Name(String),

    /// `[e, ...]`
    List(Vec<Expr>),
    /// `{ key: expr, ... }` — keys are bare names or string literals.
    Dict(Vec<(String, Expr)>),

    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),

    /// `f(args)` over an arbitrary callee expression.
    Call(Box<Expr>, Vec<Expr>),
    /// `c[k]`
    Index(Box<Expr>, Box<Expr>),
    /// `x.name`
    Attr(Box<Expr>, String),

    /// `NAME => expr`, `(params) => expr`, or `(params) => block end`.
    Lambda(Vec<String>, LambdaBody),
}

#[derive(PartialEq, Debug, Clone)]
pub enum LambdaBody {
    Expr(Box<Expr>),
    Block(Block),
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
    GreaterThanEqual,
    LessThanEqual,
    In,
}
