use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::codegen::CodegenError;
use crate::lexer::LexError;
use crate::parser::ParseError;


#[derive(Debug, Error)]
pub enum CompileError {
    #[error("could not read source file {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("could not write {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("{}: lexing failed at {source}", .path.display())]
    Lex { path: PathBuf, source: LexError },
    #[error("{}: parsing failed at {source}", .path.display())]
    Parse { path: PathBuf, source: ParseError },
    #[error("{}: code generation failed at {source}", .path.display())]
    Codegen { path: PathBuf, source: CodegenError },
    #[error("cannot use include {}: {source}", .path.display())]
    Include { path: PathBuf, source: walkdir::Error },
    #[error("command `{command}` failed")]
    Tool { command: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}
