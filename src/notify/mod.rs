//! Operator-facing output: colored tables, summaries and progress.

pub mod console;

pub use console::{format_table, ConsoleOutput};
