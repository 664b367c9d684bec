use crate::compiler::ast::Block;
use crate::compiler::codegen::CodeGen;
use crate::compiler::parser::ParserError;
use crate::compiler::scanner::ScanError;
use crate::vm::opcode::Instruction;

pub mod ast;
pub mod codegen;
pub mod parser;
pub mod scanner;

#[derive(Debug, Clone)]
pub enum CompileError {
    Scan(ScanError),
    Parse(ParserError),
}

impl CompileError {
    pub fn lineno(&self) -> usize {
        match self {
            CompileError::Scan(e) => e.lineno,
            CompileError::Parse(e) => e.lineno,
        }
    }
}

#[derive(Debug)]
pub struct CompileResult {
    pub code: Vec<Instruction>,
}

/// Scans, parses, and lowers source text to bytecode. Scan errors are
/// collected and reported together; the parser aborts on its first error.
pub fn compile(text: &str) -> Result<CompileResult, Vec<CompileError>> {
    let tree = parse(text)?;
    let code = CodeGen::new().compile(&tree);
    Ok(CompileResult { code })
}

/// Front half of `compile`, exposed for the CLI's parse-tree mode.
pub fn parse(text: &str) -> Result<Block, Vec<CompileError>> {
    let scan_result = scanner::scan(text);
    if !scan_result.errors.is_empty() {
        return Err(scan_result.errors.into_iter().map(CompileError::Scan).collect());
    }
    parser::parse(scan_result).map_err(|e| vec![CompileError::Parse(e)])
}
