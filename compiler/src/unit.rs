//! One source file taken from disk to LLVM IR text.

use std::fs;
use std::path::{Path, PathBuf};

use crate::ast::Program;
use crate::codegen::{Compiler, Dependency};
use crate::error::CompileError;
use crate::lexer::lex;
use crate::llvm::emit_ir;
use crate::parser::{parse_with, ParseOptions};
use crate::resolve::PackageResolver;
use crate::trace::Trace;


#[derive(Debug)]
pub struct Unit {
    pub path: PathBuf,
    pub program: Program,
    pub ir: String,
    pub dependencies: Vec<Dependency>,
    /// Parser and code generator warnings, in that order.
    pub warnings: Vec<String>,
}

pub fn compile_file(
    path: &Path,
    is_entry: bool,
    options: ParseOptions,
    resolver: &dyn PackageResolver,
    trace: &mut dyn Trace,
) -> Result<Unit, CompileError> {
    let source = fs::read_to_string(path)
        .map_err(|source| CompileError::Read { path: path.to_path_buf(), source })?;
    let tokens = lex(&source)
        .map_err(|source| CompileError::Lex { path: path.to_path_buf(), source })?;
    trace.event(&format!("{}: {} tokens", path.display(), tokens.len()));

    let parsed = parse_with(&tokens, options, trace)
        .map_err(|source| CompileError::Parse { path: path.to_path_buf(), source })?;
    let mut warnings: Vec<String> = parsed.warnings.iter().map(|w| w.to_string()).collect();

    let working_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let (module, dependencies) = Compiler::new(&working_dir, is_entry)
        .with_source(path)
        .with_resolver(resolver)
        .with_trace(Box::new(&mut *trace))
        .compile(&parsed.program)
        .map_err(|source| CompileError::Codegen { path: path.to_path_buf(), source })?;
    warnings.extend(module.warnings.iter().cloned());

    Ok(Unit {
        path: path.to_path_buf(),
        program: parsed.program,
        ir: emit_ir(&module),
        dependencies,
        warnings,
    })
}
