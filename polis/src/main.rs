use std::io::Write;
use std::{fs, io};

use rustyline::error::ReadlineError;
use rustyline::{DefaultEditor, Editor};

use polis_sys::repl::Reader;
use polis_sys::vm::host::JsonHost;
use polis_sys::{compiler, disasm, repl};
use polis_sys::{default_trace_hook, CompileError, ErrorReporter, Interpreter, Value};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let mut options: Options = match parse_args(args) {
        Some(args) => args,
        None => return,
    };
    let result = match options.file.take() {
        Some(name) => run_main(name, options),
        None => run_repl(),
    };
    match result {
        Ok(()) => {}
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

fn run_main(name: String, options: Options) -> Result<(), String> {
    let text: String = fs::read_to_string(&name).map_err(|_| format!("Unable to read file '{}'", name))?;

    match options.mode {
        Mode::ParseTree => {
            let tree = compiler::parse(&text).map_err(|e| format_errors(&text, &name, e))?;
            println!("{:#?}", tree);
            Ok(())
        }
        Mode::Disassembly => {
            let compiled = compiler::compile(&text).map_err(|e| format_errors(&text, &name, e))?;
            println!("{}", disasm::disassemble(&compiled.code));
            Ok(())
        }
        Mode::Default => {
            let compiled = compiler::compile(&text).map_err(|e| format_errors(&text, &name, e))?;
            let mut vm = Interpreter::new(io::stdout());
            seed_demo_globals(&mut vm);
            if options.trace {
                vm.set_trace_hook(Some(default_trace_hook()));
            }
            match vm.exec(&compiled.code) {
                Ok(value) => {
                    println!("policy return: {}", value.as_str());
                    Ok(())
                }
                Err(e) => Err(e.to_string()),
            }
        }
    }
}

fn run_repl() -> Result<(), String> {
    println!("Welcome to polis! (exit with ':q' or Ctrl-C)");
    let mut vm = Interpreter::new(io::stdout());
    seed_demo_globals(&mut vm);
    repl::run(EditorRepl { editor: Editor::new().unwrap() }, &mut vm)
}

/// The demo authorization token every embedding of the original front-end
/// ships with; handy for poking at Foreign semantics from the REPL.
fn seed_demo_globals<W: Write>(vm: &mut Interpreter<W>) {
    let token = serde_json::json!({"roles": {"my_client": ["admin", "driver"]}});
    vm.store_global("token", Value::foreign(JsonHost::new(token)));
}

fn format_errors(text: &str, name: &str, errors: Vec<CompileError>) -> String {
    let reporter = ErrorReporter::new(text, name);
    errors
        .iter()
        .map(|e| reporter.format_compile_error(e))
        .collect::<Vec<String>>()
        .join("\n")
}

fn parse_args(args: Vec<String>) -> Option<Options> {
    let mut iter = args.into_iter();
    let mut options: Options = Options {
        file: None,
        mode: Mode::Default,
        trace: false,
    };

    if iter.next().is_none() {
        panic!("Unexpected first argument");
    }

    for arg in iter.by_ref() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                return None;
            }
            "-a" | "--parse-tree" => options.mode.set(Mode::ParseTree).ok()?,
            "-d" | "--disassembly" => options.mode.set(Mode::Disassembly).ok()?,
            "--trace" => options.trace = true,
            a => {
                options.file = Some(String::from(a));
                break;
            }
        }
    }

    Some(options)
}

struct EditorRepl {
    editor: DefaultEditor,
}

impl Reader for EditorRepl {
    fn read(&mut self, prompt: &'static str) -> Option<Result<String, String>> {
        io::stdout().flush().unwrap();
        match self.editor.readline(prompt) {
            Ok(line) => {
                self.editor.add_history_entry(line.as_str()).unwrap();
                Some(Ok(line))
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => None,
            Err(e) => Some(Err(format!("Error: {}", e))),
        }
    }
}

fn print_help() {
    println!("polis [options] <file>");
    println!("When invoked with no arguments, this will open a REPL for the polis policy language (exit with ':q' or Ctrl-C)");
    println!("Options:");
    println!("  -h --help        : Show this message and then exit.");
    println!("  -a --parse-tree  : Print the parsed syntax tree without running the policy.");
    println!("  -d --disassembly : Print the compiled bytecode without running the policy.");
    println!("  --trace          : Print each instruction and a stack snapshot while running.");
}

struct Options {
    file: Option<String>,
    mode: Mode,
    trace: bool,
}

#[derive(Eq, PartialEq)]
enum Mode {
    Default,
    ParseTree,
    Disassembly,
}

impl Mode {
    fn set(&mut self, new: Mode) -> Result<(), String> {
        if *self != Mode::Default {
            Err(String::from("Must only specify one of --parse-tree or --disassembly"))
        } else {
            *self = new;
            Ok(())
        }
    }
}
