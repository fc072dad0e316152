pub mod lexer;
pub mod ast;
pub mod types;
pub mod trace;
pub mod parser;
pub mod printer;
pub mod ir;
pub mod llvm;
pub mod resolve;
pub mod codegen;
pub mod error;
pub mod unit;
