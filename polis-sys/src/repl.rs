use std::io::Write;

use crate::compiler;
use crate::reporting::ErrorReporter;
use crate::vm::opcode::Opcode;
use crate::vm::value::Value;
use crate::vm::{default_trace_hook, Interpreter};

/// Line source for the REPL; the CLI front-end backs this with rustyline.
pub trait Reader {
    /// `None` ends the session; `Some(Err(..))` reports a read failure.
    fn read(&mut self, prompt: &'static str) -> Option<Result<String, String>>;
}

const PROMPT: &'static str = "polis> ";

/// Runs the REPL against an interpreter the caller has already seeded.
/// Commands: `:q`/`:quit`, `:trace`, `:globals`, `:stack`. The trailing pop
/// of an expression statement is stripped so the line's value echoes back.
pub fn run<R: Reader, W: Write>(mut reader: R, interp: &mut Interpreter<W>) -> Result<(), String> {
    let mut tracing: bool = false;
    loop {
        let line = match reader.read(PROMPT) {
            None => break,
            Some(Err(e)) => return Err(e),
            Some(Ok(line)) => line,
        };
        let src = line.trim();
        if src.is_empty() {
            continue;
        }

        match src {
            ":q" | ":quit" => break,
            ":trace" => {
                tracing = !tracing;
                interp.set_trace_hook(if tracing { Some(default_trace_hook()) } else { None });
                let _ = writeln!(interp.write, "trace = {}", tracing);
                continue;
            }
            ":globals" => {
                let lines: Vec<String> = interp
                    .globals
                    .iter()
                    .map(|(k, v)| format!("{} => {}", k, v.to_repr_str()))
                    .collect();
                for text in lines {
                    let _ = writeln!(interp.write, "{}", text);
                }
                continue;
            }
            ":stack" => {
                let lines: Vec<String> = interp.stack.iter().map(|v| v.to_repr_str()).collect();
                let _ = writeln!(interp.write, "[{}]", lines.join(", "));
                continue;
            }
            _ => {}
        }

        let mut compiled = match compiler::compile(src) {
            Ok(compiled) => compiled,
            Err(errors) => {
                let reporter = ErrorReporter::new(src, "<repl>");
                for error in &errors {
                    let _ = writeln!(interp.write, "{}", reporter.format_compile_error(error));
                }
                continue;
            }
        };

        // Keep the final expression's value around so it can be echoed.
        if matches!(compiled.code.last(), Some(insn) if insn.op == Opcode::Pop) {
            compiled.code.pop();
        }

        match interp.exec(&compiled.code) {
            Ok(_) => {}
            Err(e) => {
                let _ = writeln!(interp.write, "{}", e);
            }
        }
        if !interp.stack.is_empty() {
            let value = interp.stack.pop().unwrap_or(Value::Nil);
            let _ = writeln!(interp.write, "{}", value.to_repr_str());
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::repl;
    use crate::repl::Reader;
    use crate::vm::Interpreter;

    struct ScriptedReader {
        lines: Vec<&'static str>,
        index: usize,
    }

    impl Reader for ScriptedReader {
        fn read(&mut self, _prompt: &'static str) -> Option<Result<String, String>> {
            let line = self.lines.get(self.index)?;
            self.index += 1;
            Some(Ok(String::from(*line)))
        }
    }

    fn run_session(lines: Vec<&'static str>) -> String {
        let mut buf: Vec<u8> = Vec::new();
        {
            let mut interp = Interpreter::new(&mut buf);
            let reader = ScriptedReader { lines, index: 0 };
            repl::run(reader, &mut interp).unwrap();
        }
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_expression_result_echoes() {
        let out = run_session(vec!["1 + 2"]);
        assert_eq!("3\n", out);
    }

    #[test]
    fn test_state_persists_across_lines() {
        let out = run_session(vec!["x = 21", "x * 2"]);
        assert_eq!("42\n", out);
    }

    #[test]
    fn test_quit_command() {
        let out = run_session(vec![":q", "1 + 1"]);
        assert_eq!("", out);
    }

    #[test]
    fn test_compile_error_is_reported() {
        let out = run_session(vec!["y = (2"]);
        assert!(out.contains("Unexpected end of file"));
    }
}
