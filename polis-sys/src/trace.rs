/// Compile-time gated trace output. Each macro expands to nothing unless the
/// matching cargo feature is enabled, so release builds carry no cost.

#[macro_export]
macro_rules! trace_parser {
    ($($arg:tt)*) => ({
        #[cfg(feature = "trace_parser")]
        println!("[parser] {}", format!($($arg)*));
    });
}

#[macro_export]
macro_rules! trace_interpreter {
    ($($arg:tt)*) => ({
        #[cfg(feature = "trace_interpreter")]
        println!("[vm] {}", format!($($arg)*));
    });
}

#[macro_export]
macro_rules! trace_interpreter_stack {
    ($($arg:tt)*) => ({
        #[cfg(feature = "trace_interpreter_stack")]
        println!("[stack] {}", format!($($arg)*));
    });
}

pub use crate::{trace_interpreter, trace_interpreter_stack, trace_parser};
