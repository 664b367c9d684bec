//! Human-readable bytecode listings for the CLI's `-d` mode.

use std::rc::Rc;

use crate::vm::opcode::Instruction;
use crate::vm::value::{FunctionImpl, Value};

/// Renders one line per instruction, with jump targets resolved using the
/// VM's rule (`target = pc + offset`). Nested function bodies are appended
/// as their own sections.
pub fn disassemble(code: &[Instruction]) -> String {
    let mut sections: Vec<String> = Vec::new();
    disassemble_section("<main>", code, &mut sections);
    sections.join("\n\n")
}

fn disassemble_section(title: &str, code: &[Instruction], sections: &mut Vec<String>) {
    let mut lines: Vec<String> = vec![format!("-- {} --", title)];
    let mut nested: Vec<Rc<FunctionImpl>> = Vec::new();

    for (pc, insn) in code.iter().enumerate() {
        if let Value::Function(func) = &insn.arg {
            nested.push(func.clone());
        }
        let arg = arg_str(&insn.arg);
        let target = jump_target(pc, insn, code.len());
        if arg.is_empty() && target.is_empty() {
            lines.push(format!("{:04}: {:?}", pc, insn.op));
        } else {
            lines.push(format!("{:04}: {:<18} {}{}", pc, format!("{:?}", insn.op), arg, target));
        }
    }
    sections.push(lines.join("\n"));

    for func in nested {
        disassemble_section(&format!("fn({})", func.params.join(", ")), &func.code, sections);
    }
}

fn arg_str(arg: &Value) -> String {
    match arg {
        Value::Nil => String::new(),
        Value::Int(i) => i.to_string(),
        Value::Str(s) => format!("'{}'", s),
        Value::Bool(b) => b.to_string(),
        Value::Function(func) => format!("fn({})", func.params.join(", ")),
        v => v.to_repr_str(),
    }
}

fn jump_target(pc: usize, insn: &Instruction, code_len: usize) -> String {
    if !insn.op.is_jump() {
        return String::new();
    }
    match &insn.arg {
        Value::Int(offset) => {
            let target = pc as i64 + offset;
            if target >= 0 && target <= code_len as i64 {
                format!(" -> @{}", target)
            } else {
                format!(" -> @{} (out of range)", target)
            }
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod test {
    use crate::compiler;
    use crate::disasm;

    #[test]
    fn test_disassemble_resolves_jump_targets() {
        let code = compiler::compile("if 1: print 2 end").unwrap().code;
        let listing = disasm::disassemble(&code);
        let jump_if_false = listing.lines().find(|l| l.contains("JumpIfFalse")).unwrap();
        assert!(jump_if_false.starts_with("0001:"));
        assert!(jump_if_false.ends_with("4 -> @5"));
        let jump = listing.lines().find(|l| l.contains("Jump ")).unwrap();
        assert!(jump.ends_with("1 -> @5"));
    }

    #[test]
    fn test_disassemble_includes_function_bodies() {
        let code = compiler::compile("def add(x, y) return x + y end").unwrap().code;
        let listing = disasm::disassemble(&code);
        assert!(listing.contains("-- <main> --"));
        assert!(listing.contains("-- fn(x, y) --"));
        assert!(listing.contains("OpAdd"));
    }

    #[test]
    fn test_disassemble_plain_opcode_has_no_padding() {
        let code = compiler::compile("1").unwrap().code;
        let listing = disasm::disassemble(&code);
        assert!(listing.contains("0001: Pop"));
    }
}
