//! Monkey: lexer, parser, bytecode compiler with a closure-capable stack VM,
//! and a tree-walking evaluator over the same object model.

pub mod ast;
pub mod code;
pub mod compiler;
pub mod diagnostic;
pub mod interpreter;
pub mod lexer;
pub mod object;
pub mod parser;
pub mod repl;
pub mod vm;
