//! Merle compiler library.
//!
//! Provides the scanner, the recursive-descent parser and the bytecode
//! compiler that lowers an AST into an executable [`merle_runtime::Routine`].

pub mod ast;
pub mod compile;
pub mod parser;
pub mod scanner;
pub mod token;

pub use ast::Ast;
pub use compile::{compile_file, compile_source, Compiler};
pub use parser::Parser;
pub use scanner::{tokenize, Scanner};
pub use token::{Lexeme, Token};
