//! Lowers a parsed program to an intermediate [`Module`].
//!
//! Declarations are collected before any body is lowered, so functions and
//! classes may be used ahead of their definition. Every local lives in a
//! stack slot; reads and writes go through `load` and `store`.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::ast::{self, BinOp, Expr, Program, Stmt, TypeName, Visibility};
use crate::ir::{BlockExit, ClassType, Declaration, Function, FunctionEnv, IrType, Module, Op, Register, Value};
use crate::lexer::lex;
use crate::parser::parse;
use crate::printer;
use crate::resolve::{resolve_import_path, NoPackages, PackageResolver};
use crate::trace::{NoTrace, Trace};
use crate::types::Type;


#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum Dependency {
    /// CaffeineC source that must be compiled and linked.
    Source(PathBuf),
    /// C source, header or object handed to the linker as is.
    Native(PathBuf),
}

#[derive(Debug, PartialEq, Clone, Error)]
pub enum CodegenErrorKind {
    #[error("undefined variable")]
    UndefinedVariable,
    #[error("undefined function")]
    UndefinedFunction,
    #[error("undefined class")]
    UndefinedClass,
    #[error("undefined field")]
    UndefinedField,
    #[error("undefined method")]
    UndefinedMethod,
    #[error("unknown type")]
    UnknownType,
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("expected {expected} arguments, found {found}")]
    ArityMismatch { expected: usize, found: usize },
    #[error("only places can be assigned to")]
    InvalidAssignTarget,
    #[error("private member accessed from outside its class")]
    PrivateAccess,
    #[error("already defined")]
    Redefinition,
    #[error("return outside of a function")]
    ReturnOutsideFunction,
    #[error("missing return")]
    MissingReturn,
    #[error("`main` is reserved in the entry module")]
    MainRedefinition,
    #[error("declarations are only allowed at the top level")]
    NestedDeclaration,
    #[error("cannot use {}: {reason}", .path.display())]
    DependencyResolution { path: PathBuf, reason: String },
    #[error("cannot parse {}: {message}", .path.display())]
    ImportParse { path: PathBuf, message: String },
}

#[derive(Debug, PartialEq, Clone, Error)]
#[error("{node}: {kind}")]
pub struct CodegenError {
    pub node: String,
    pub kind: CodegenErrorKind,
}

fn fail<T>(node: &str, kind: CodegenErrorKind) -> Result<T, CodegenError> {
    Err(CodegenError { node: node.to_string(), kind })
}

fn expect_type(node: &str, expected: &Type, found: &Type) -> Result<(), CodegenError> {
    if expected == found {
        Ok(())
    } else {
        fail(node, CodegenErrorKind::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        })
    }
}

fn always_returns(body: &[Stmt]) -> bool {
    body.iter().any(|stmt| match stmt {
        Stmt::Return(_) => true,
        Stmt::If { then, otherwise, .. } => always_returns(then) && always_returns(otherwise),
        _ => false,
    })
}

fn is_declaration(stmt: &Stmt) -> bool {
    matches!(stmt, Stmt::FuncDecl(_) | Stmt::Class(_) | Stmt::Extern(_) | Stmt::Import(_))
}

#[derive(Debug, Clone, PartialEq)]
struct Callable {
    symbol: String,
    params: Vec<Type>,
    ret: Type,
    visibility: Visibility,
    receiver: bool,
    /// Defined in another object file and declared on first use.
    external: bool,
}

impl Callable {
    fn ir_params(&self) -> Vec<IrType> {
        let receiver = if self.receiver { Some(IrType::Ptr) } else { None };
        receiver.into_iter().chain(self.params.iter().map(Type::ir)).collect()
    }

    fn declaration(&self) -> Declaration {
        Declaration { name: self.symbol.clone(), params: self.ir_params(), ret: self.ret.ir() }
    }
}

#[derive(Debug, Clone)]
struct FieldInfo {
    name: String,
    ty: Type,
    visibility: Visibility,
    index: usize,
}

#[derive(Debug, Clone)]
struct ClassInfo {
    fields: Vec<FieldInfo>,
    methods: HashMap<String, Callable>,
    constructor: Option<Callable>,
}

impl ClassInfo {
    fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FrameKind {
    Main,
    Function,
    Method,
    Constructor,
}

struct Local {
    ty: Type,
    slot: Register,
}

/// State of the function whose body is being lowered.
struct Frame {
    env: FunctionEnv,
    scopes: Vec<HashMap<String, Local>>,
    ret: Type,
    kind: FrameKind,
    class: Option<String>,
    this: Option<Value>,
}

impl Frame {
    fn new(arity: usize, ret: Type, kind: FrameKind, class: Option<String>) -> Frame {
        let this = if kind == FrameKind::Method { Some(Value::Reg(0)) } else { None };
        Frame {
            env: FunctionEnv::new(arity),
            scopes: vec![HashMap::new()],
            ret,
            kind,
            class,
            this,
        }
    }

    fn lookup(&self, name: &str) -> Option<&Local> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn own_class(&self, class: &str) -> bool {
        self.class.as_deref() == Some(class)
    }
}

pub struct Compiler<'c> {
    working_dir: PathBuf,
    is_entry: bool,
    resolver: &'c dyn PackageResolver,
    trace: Box<dyn Trace + 'c>,
    module: Module,
    functions: HashMap<String, Callable>,
    classes: HashMap<String, ClassInfo>,
    dependencies: Vec<Dependency>,
    visited: HashSet<PathBuf>,
}

pub fn compile(
    program: &Program,
    working_dir: &Path,
    is_entry: bool,
) -> Result<(Module, Vec<Dependency>), CodegenError> {
    Compiler::new(working_dir, is_entry).compile(program)
}

impl<'c> Compiler<'c> {
    pub fn new(working_dir: &Path, is_entry: bool) -> Compiler<'c> {
        Compiler {
            working_dir: working_dir.to_path_buf(),
            is_entry,
            resolver: &NoPackages,
            trace: Box::new(NoTrace),
            module: Module::new("main"),
            functions: HashMap::new(),
            classes: HashMap::new(),
            dependencies: Vec::new(),
            visited: HashSet::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: &'c dyn PackageResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_trace(mut self, trace: Box<dyn Trace + 'c>) -> Self {
        self.trace = trace;
        self
    }

    /// Names the module after `path` and keeps imports from pulling the
    /// file back in.
    pub fn with_source(mut self, path: &Path) -> Self {
        if let Some(name) = path.file_name() {
            self.module.name = name.to_string_lossy().into_owned();
        }
        self.visited.insert(fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()));
        self
    }

    pub fn compile(mut self, program: &Program) -> Result<(Module, Vec<Dependency>), CodegenError> {
        for stmt in program {
            if let Stmt::Import(path) = stmt {
                self.import(path)?;
            }
        }
        self.declare_items(program, false)?;

        for stmt in program {
            match stmt {
                Stmt::FuncDecl(f) => self.define_function(f)?,
                Stmt::Class(c) => self.define_class(c)?,
                _ => {}
            }
        }

        if self.is_entry {
            self.define_main(program)?;
        } else {
            for stmt in program.iter().filter(|stmt| !is_declaration(stmt)) {
                let text = printer::statement(stmt);
                let warning = format!(
                    "top-level statement skipped outside the entry module: {}",
                    text.lines().next().unwrap_or_default());
                self.trace.event(&warning);
                self.module.warnings.push(warning);
            }
        }

        Ok((self.module, self.dependencies))
    }

    fn add_dependency(&mut self, dependency: Dependency) {
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
    }

    fn import(&mut self, path: &str) -> Result<(), CodegenError> {
        let resolved = resolve_import_path(path, &self.working_dir, self.resolver, &mut *self.trace);
        let extension = resolved.extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        match extension.as_str() {
            "c" | "cpp" | "h" | "o" => {
                if !resolved.is_file() {
                    return fail(path, CodegenErrorKind::DependencyResolution {
                        path: resolved,
                        reason: "file not found".to_string(),
                    });
                }
                self.trace.event(&format!("native dependency {}", resolved.display()));
                self.add_dependency(Dependency::Native(resolved));
                Ok(())
            }
            "cffc" => self.import_source(path, resolved),
            _ => fail(path, CodegenErrorKind::DependencyResolution {
                path: resolved,
                reason: "unsupported file type".to_string(),
            }),
        }
    }

    fn import_source(&mut self, node: &str, path: PathBuf) -> Result<(), CodegenError> {
        let key = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if !self.visited.insert(key) {
            return Ok(());
        }

        let source = fs::read_to_string(&path).map_err(|e| CodegenError {
            node: node.to_string(),
            kind: CodegenErrorKind::DependencyResolution { path: path.clone(), reason: e.to_string() },
        })?;
        let import_parse = |message: String| CodegenError {
            node: node.to_string(),
            kind: CodegenErrorKind::ImportParse { path: path.clone(), message },
        };
        let tokens = lex(&source).map_err(|e| import_parse(e.to_string()))?;
        let parsed = parse(&tokens).map_err(|e| import_parse(e.to_string()))?;

        self.trace.event(&format!("import {}", path.display()));
        self.add_dependency(Dependency::Source(path.clone()));

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let working_dir = std::mem::replace(&mut self.working_dir, dir);
        let nested = parsed.program.iter().try_for_each(|stmt| match stmt {
            Stmt::Import(p) => self.import(p),
            _ => Ok(()),
        });
        self.working_dir = working_dir;
        nested?;

        self.declare_items(&parsed.program, true)
    }

    fn resolve_type(&self, ty: &TypeName) -> Result<Type, CodegenError> {
        match ty {
            TypeName::Primitive(p) => Ok(Type::from(*p)),
            TypeName::Class(name) if self.classes.contains_key(name) => Ok(Type::Class(name.clone())),
            TypeName::Class(name) => fail(name, CodegenErrorKind::UnknownType),
        }
    }

    fn value_type(&self, ty: &TypeName, node: &str) -> Result<Type, CodegenError> {
        let resolved = self.resolve_type(ty)?;
        if resolved == Type::Void {
            return fail(node, CodegenErrorKind::TypeMismatch {
                expected: "value type".to_string(),
                found: resolved.to_string(),
            });
        }
        Ok(resolved)
    }

    fn callable(
        &self,
        symbol: String,
        sig: &ast::Signature,
        visibility: Visibility,
        receiver: bool,
        external: bool,
    ) -> Result<Callable, CodegenError> {
        let params = sig.params.iter()
            .map(|p| self.value_type(&p.ty, &p.name))
            .collect::<Result<Vec<_>, _>>()?;
        let ret = self.resolve_type(&sig.return_type)?;
        Ok(Callable { symbol, params, ret, visibility, receiver, external })
    }

    fn declare_function(&mut self, callable: Callable, node: &str) -> Result<(), CodegenError> {
        if let Some(existing) = self.functions.get(node) {
            // an extern may be repeated with the same signature
            if existing.external && callable.external && *existing == callable {
                return Ok(());
            }
            return fail(node, CodegenErrorKind::Redefinition);
        }
        self.functions.insert(node.to_string(), callable);
        Ok(())
    }

    fn declare_items(&mut self, program: &Program, external: bool) -> Result<(), CodegenError> {
        let classes: Vec<&ast::Class> = program.iter()
            .filter_map(|stmt| match stmt {
                Stmt::Class(c) => Some(c),
                _ => None,
            })
            .collect();

        for class in &classes {
            if self.classes.contains_key(&class.name) {
                return fail(&class.name, CodegenErrorKind::Redefinition);
            }
            let info = ClassInfo { fields: Vec::new(), methods: HashMap::new(), constructor: None };
            self.classes.insert(class.name.clone(), info);
        }
        for class in &classes {
            self.declare_class(class, external)?;
        }

        for stmt in program {
            match stmt {
                Stmt::FuncDecl(f) => {
                    if self.is_entry && !external && f.name() == "main" {
                        return fail(f.name(), CodegenErrorKind::MainRedefinition);
                    }
                    let callable = self.callable(
                        f.name().to_string(), &f.signature, Visibility::Public, false, external)?;
                    self.declare_function(callable, f.name())?;
                }
                Stmt::Extern(sig) => {
                    let callable = self.callable(
                        sig.name.clone(), sig, Visibility::Public, false, true)?;
                    self.declare_function(callable, &sig.name)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn declare_class(&mut self, class: &ast::Class, external: bool) -> Result<(), CodegenError> {
        let mut fields: Vec<FieldInfo> = Vec::new();
        let mut ordered: Vec<&ast::Field> = class.fields.iter().collect();
        ordered.sort_by_key(|f| f.index);
        for field in ordered {
            let node = format!("{}.{}", class.name, field.name);
            if fields.iter().any(|f| f.name == field.name) {
                return fail(&node, CodegenErrorKind::Redefinition);
            }
            fields.push(FieldInfo {
                name: field.name.clone(),
                ty: self.value_type(&field.ty, &node)?,
                visibility: field.visibility,
                index: field.index,
            });
        }

        let mut methods = HashMap::new();
        for method in &class.methods {
            let symbol = format!("{}.{}", class.name, method.name());
            if methods.contains_key(method.name()) {
                return fail(&symbol, CodegenErrorKind::Redefinition);
            }
            let callable = self.callable(
                symbol, &method.signature, method.visibility, true, external)?;
            methods.insert(method.name().to_string(), callable);
        }

        let symbol = format!("{}.new", class.name);
        let mut constructor = match &class.constructor {
            Some(ctor) => self.callable(symbol, &ctor.signature, Visibility::Public, false, external)?,
            None => Callable {
                symbol,
                params: Vec::new(),
                ret: Type::Void,
                visibility: Visibility::Public,
                receiver: false,
                external,
            },
        };
        constructor.ret = Type::Class(class.name.clone());

        self.module.classes.push(ClassType {
            name: class.name.clone(),
            fields: fields.iter().map(|f| f.ty.ir()).collect(),
        });
        self.trace.event(&format!(
            "declare class `{}` with {} fields", class.name, fields.len()));
        self.classes.insert(class.name.clone(), ClassInfo {
            fields,
            methods,
            constructor: Some(constructor),
        });
        Ok(())
    }

    fn class_info(&self, class: &str) -> Result<&ClassInfo, CodegenError> {
        match self.classes.get(class) {
            Some(info) => Ok(info),
            None => fail(class, CodegenErrorKind::UndefinedClass),
        }
    }

    fn constructor(&self, class: &str) -> Result<Callable, CodegenError> {
        match &self.class_info(class)?.constructor {
            Some(ctor) => Ok(ctor.clone()),
            None => fail(class, CodegenErrorKind::UndefinedClass),
        }
    }

    fn define_main(&mut self, program: &Program) -> Result<(), CodegenError> {
        let mut frame = Frame::new(0, Type::Int, FrameKind::Main, None);
        for stmt in program.iter().filter(|stmt| !is_declaration(stmt)) {
            self.statement(&mut frame, stmt)?;
        }
        let blocks = frame.env.finish(BlockExit::Return(Some((IrType::I32, Value::Int(0)))));
        self.module.functions.push(Function {
            name: "main".to_string(),
            params: Vec::new(),
            ret: IrType::I32,
            blocks,
        });
        Ok(())
    }

    fn define_function(&mut self, f: &ast::Function) -> Result<(), CodegenError> {
        let callable = match self.functions.get(f.name()) {
            Some(callable) => callable.clone(),
            None => return fail(f.name(), CodegenErrorKind::UndefinedFunction),
        };
        self.define_body(&callable, f.params(), &f.body, FrameKind::Function, None)
    }

    fn define_class(&mut self, class: &ast::Class) -> Result<(), CodegenError> {
        let constructor = self.constructor(&class.name)?;
        let (params, body): (&[ast::Param], &[Stmt]) = match &class.constructor {
            Some(ctor) => (ctor.params(), ctor.body.as_slice()),
            None => (&[], &[]),
        };
        self.define_body(&constructor, params, body, FrameKind::Constructor, Some(&class.name))?;

        for method in &class.methods {
            let callable = self.class_info(&class.name)?
                .methods
                .get(method.name())
                .cloned();
            match callable {
                Some(callable) => self.define_body(
                    &callable, method.params(), &method.body, FrameKind::Method, Some(&class.name))?,
                None => return fail(method.name(), CodegenErrorKind::UndefinedMethod),
            }
        }
        Ok(())
    }

    fn define_body(
        &mut self,
        callable: &Callable,
        params: &[ast::Param],
        body: &[Stmt],
        kind: FrameKind,
        class: Option<&str>,
    ) -> Result<(), CodegenError> {
        let offset = if callable.receiver { 1 } else { 0 };
        let mut frame = Frame::new(params.len() + offset, callable.ret.clone(), kind, class.map(String::from));

        for (i, (param, ty)) in params.iter().zip(&callable.params).enumerate() {
            self.define_local(&mut frame, &param.name, ty.clone(), Value::Reg((i + offset) as Register))?;
        }

        if let (FrameKind::Constructor, Some(class)) = (kind, class) {
            let size = frame.env.fresh_register();
            frame.env.push_op(Op::SizeOf { dst: size, class: class.to_string() });
            let object = self.runtime_call(
                &mut frame, "rt_alloc", vec![(IrType::I64, Value::Reg(size))], IrType::Ptr);
            frame.this = object.map(Value::Reg);
        }

        let returns_value = kind != FrameKind::Constructor && callable.ret != Type::Void;
        if returns_value && !always_returns(body) {
            return fail(&callable.symbol, CodegenErrorKind::MissingReturn);
        }

        for stmt in body {
            self.statement(&mut frame, stmt)?;
        }

        let fallthrough = match (kind, &frame.this) {
            (FrameKind::Constructor, Some(this)) => BlockExit::Return(Some((IrType::Ptr, this.clone()))),
            _ if returns_value => BlockExit::Unreachable,
            _ => BlockExit::Return(None),
        };
        self.trace.event(&format!("define `{}`", callable.symbol));
        self.module.functions.push(Function {
            name: callable.symbol.clone(),
            params: callable.ir_params(),
            ret: callable.ret.ir(),
            blocks: frame.env.finish(fallthrough),
        });
        Ok(())
    }

    fn runtime_call(
        &mut self,
        frame: &mut Frame,
        name: &str,
        args: Vec<(IrType, Value)>,
        ret: IrType,
    ) -> Option<Register> {
        self.module.declare(Declaration {
            name: name.to_string(),
            params: args.iter().map(|(ty, _)| *ty).collect(),
            ret,
        });
        let dst = if ret == IrType::Void { None } else { Some(frame.env.fresh_register()) };
        frame.env.push_op(Op::Call { dst, ret, function: name.to_string(), args });
        dst
    }

    fn define_local(
        &mut self,
        frame: &mut Frame,
        name: &str,
        ty: Type,
        value: Value,
    ) -> Result<(), CodegenError> {
        let ir = ty.ir();
        let slot = frame.env.alloca(ir);
        frame.env.push_op(Op::Store { ty: ir, value, ptr: Value::Reg(slot) });
        match frame.scopes.last_mut() {
            Some(scope) if !scope.contains_key(name) => {
                scope.insert(name.to_string(), Local { ty, slot });
                Ok(())
            }
            _ => fail(name, CodegenErrorKind::Redefinition),
        }
    }

    fn scoped(&mut self, frame: &mut Frame, body: &[Stmt]) -> Result<(), CodegenError> {
        frame.scopes.push(HashMap::new());
        let result = body.iter().try_for_each(|stmt| self.statement(frame, stmt));
        frame.scopes.pop();
        result
    }

    fn condition(&mut self, frame: &mut Frame, cond: &Expr) -> Result<Value, CodegenError> {
        let (value, ty) = self.expr(frame, cond)?;
        expect_type(&printer::expression(cond), &Type::Bool, &ty)?;
        Ok(value)
    }

    fn definition(
        &mut self,
        frame: &mut Frame,
        name: &str,
        ty: &Option<TypeName>,
        expr: &Expr,
    ) -> Result<(), CodegenError> {
        let (value, found) = self.expr(frame, expr)?;
        if found == Type::Void {
            return fail(&printer::expression(expr), CodegenErrorKind::TypeMismatch {
                expected: "value".to_string(),
                found: found.to_string(),
            });
        }
        if let Some(ty) = ty {
            let declared = self.value_type(ty, name)?;
            expect_type(name, &declared, &found)?;
        }
        self.define_local(frame, name, found, value)
    }

    fn assign(&mut self, frame: &mut Frame, target: &Expr, expr: &Expr) -> Result<(), CodegenError> {
        let (ptr, expected) = self.place(frame, target)?;
        let (value, found) = self.expr(frame, expr)?;
        expect_type(&printer::expression(target), &expected, &found)?;
        frame.env.push_op(Op::Store { ty: expected.ir(), value, ptr });
        Ok(())
    }

    fn statement(&mut self, frame: &mut Frame, stmt: &Stmt) -> Result<(), CodegenError> {
        match stmt {
            Stmt::Define { name, ty, expr } => self.definition(frame, name, ty, expr),
            Stmt::Assign { target, expr } => self.assign(frame, target, expr),
            Stmt::If { cond, then, otherwise } => {
                let cond = self.condition(frame, cond)?;
                let cond_end = frame.env.current_block_id();

                let then_start = frame.env.split_block();
                self.scoped(frame, then)?;
                let then_end = frame.env.current_block_id();

                let otherwise = if otherwise.is_empty() {
                    None
                } else {
                    let start = frame.env.split_block();
                    self.scoped(frame, otherwise)?;
                    Some((start, frame.env.current_block_id()))
                };

                let merge = frame.env.split_block();
                let negative = otherwise.map_or(merge, |(start, _)| start);
                frame.env.seal(cond_end, BlockExit::Branch(cond, then_start, negative));
                frame.env.seal(then_end, BlockExit::Jump(merge));
                if let Some((_, end)) = otherwise {
                    frame.env.seal(end, BlockExit::Jump(merge));
                }
                Ok(())
            }
            Stmt::While { cond, body } => {
                let before = frame.env.current_block_id();
                let header = frame.env.split_block();
                frame.env.seal(before, BlockExit::Jump(header));

                let cond = self.condition(frame, cond)?;
                let cond_end = frame.env.current_block_id();

                let body_start = frame.env.split_block();
                self.scoped(frame, body)?;
                let body_end = frame.env.current_block_id();
                frame.env.seal(body_end, BlockExit::Jump(header));

                let exit = frame.env.split_block();
                frame.env.seal(cond_end, BlockExit::Branch(cond, body_start, exit));
                Ok(())
            }
            Stmt::For { init_name, init_ty, init_expr, cond, step_target, step_expr, body } => {
                frame.scopes.push(HashMap::new());
                let result = self.definition(frame, init_name, init_ty, init_expr)
                    .and_then(|_| self.for_loop(frame, cond, step_target, step_expr, body));
                frame.scopes.pop();
                result
            }
            Stmt::Return(expr) => {
                let exit = self.return_exit(frame, expr.as_ref())?;
                let current = frame.env.current_block_id();
                frame.env.seal(current, exit);
                frame.env.split_block();
                Ok(())
            }
            Stmt::Print(expr) => {
                let (value, ty) = self.expr(frame, expr)?;
                let function = match ty {
                    Type::Int => "rt_print_int",
                    Type::Float64 => "rt_print_float",
                    Type::Bool => "rt_print_bool",
                    Type::String => "rt_print_str",
                    Type::Duration => "rt_print_duration",
                    _ => return fail(&printer::expression(expr), CodegenErrorKind::TypeMismatch {
                        expected: "printable value".to_string(),
                        found: ty.to_string(),
                    }),
                };
                self.runtime_call(frame, function, vec![(ty.ir(), value)], IrType::Void);
                Ok(())
            }
            Stmt::Sleep(expr) => {
                let (value, ty) = self.expr(frame, expr)?;
                expect_type(&printer::expression(expr), &Type::Duration, &ty)?;
                self.runtime_call(frame, "rt_sleep", vec![(IrType::I64, value)], IrType::Void);
                Ok(())
            }
            Stmt::Call(name, args) => {
                self.call(frame, name, args)?;
                Ok(())
            }
            Stmt::MethodCall { receiver, method, args } => {
                self.method_call(frame, &Expr::Var(receiver.clone()), method, args)?;
                Ok(())
            }
            Stmt::FuncDecl(_) | Stmt::Class(_) | Stmt::Extern(_) | Stmt::Import(_) => {
                let text = printer::statement(stmt);
                fail(text.lines().next().unwrap_or_default(), CodegenErrorKind::NestedDeclaration)
            }
        }
    }

    fn for_loop(
        &mut self,
        frame: &mut Frame,
        cond: &Expr,
        step_target: &Expr,
        step_expr: &Expr,
        body: &[Stmt],
    ) -> Result<(), CodegenError> {
        let before = frame.env.current_block_id();
        let header = frame.env.split_block();
        frame.env.seal(before, BlockExit::Jump(header));

        let cond = self.condition(frame, cond)?;
        let cond_end = frame.env.current_block_id();

        let body_start = frame.env.split_block();
        self.scoped(frame, body)?;
        let body_end = frame.env.current_block_id();

        let step = frame.env.split_block();
        frame.env.seal(body_end, BlockExit::Jump(step));
        self.assign(frame, step_target, step_expr)?;
        let step_end = frame.env.current_block_id();
        frame.env.seal(step_end, BlockExit::Jump(header));

        let exit = frame.env.split_block();
        frame.env.seal(cond_end, BlockExit::Branch(cond, body_start, exit));
        Ok(())
    }

    fn return_exit(&mut self, frame: &mut Frame, expr: Option<&Expr>) -> Result<BlockExit, CodegenError> {
        let node = expr.map_or_else(|| "return".to_string(), printer::expression);
        match frame.kind {
            FrameKind::Main => fail(&node, CodegenErrorKind::ReturnOutsideFunction),
            FrameKind::Constructor => {
                if let Some(expr) = expr {
                    let (_, found) = self.expr(frame, expr)?;
                    expect_type(&node, &Type::Void, &found)?;
                }
                match &frame.this {
                    Some(this) => Ok(BlockExit::Return(Some((IrType::Ptr, this.clone())))),
                    None => Ok(BlockExit::Unreachable),
                }
            }
            FrameKind::Function | FrameKind::Method => {
                let (value, found) = match expr {
                    Some(expr) => self.expr(frame, expr)?,
                    None => (Value::Null, Type::Void),
                };
                expect_type(&node, &frame.ret, &found)?;
                if found == Type::Void {
                    Ok(BlockExit::Return(None))
                } else {
                    Ok(BlockExit::Return(Some((found.ir(), value))))
                }
            }
        }
    }

    fn field_ptr(
        &self,
        frame: &mut Frame,
        node: &str,
        class: &str,
        object: Value,
        field: &str,
    ) -> Result<(Value, Type), CodegenError> {
        let info = match self.class_info(class)?.field(field) {
            Some(info) => info.clone(),
            None => return fail(node, CodegenErrorKind::UndefinedField),
        };
        if info.visibility == Visibility::Private && !frame.own_class(class) {
            return fail(node, CodegenErrorKind::PrivateAccess);
        }
        let dst = frame.env.fresh_register();
        frame.env.push_op(Op::FieldPtr { dst, class: class.to_string(), object, index: info.index });
        Ok((Value::Reg(dst), info.ty))
    }

    /// The address and type of an assignable expression.
    fn place(&mut self, frame: &mut Frame, e: &Expr) -> Result<(Value, Type), CodegenError> {
        match e {
            Expr::Var(name) => {
                if let Some(local) = frame.lookup(name) {
                    return Ok((Value::Reg(local.slot), local.ty.clone()));
                }
                if let (Some(class), Some(this)) = (frame.class.clone(), frame.this.clone()) {
                    let has_field = self.class_info(&class)?.field(name).is_some();
                    if has_field {
                        return self.field_ptr(frame, name, &class, this, name);
                    }
                }
                fail(name, CodegenErrorKind::UndefinedVariable)
            }
            Expr::Field(receiver, name) => {
                let node = printer::expression(e);
                let (object, ty) = self.expr(frame, receiver)?;
                match ty.class_name() {
                    Some(class) => self.field_ptr(frame, &node, class, object, name),
                    None => fail(&node, CodegenErrorKind::TypeMismatch {
                        expected: "class instance".to_string(),
                        found: ty.to_string(),
                    }),
                }
            }
            _ => fail(&printer::expression(e), CodegenErrorKind::InvalidAssignTarget),
        }
    }

    fn expr(&mut self, frame: &mut Frame, e: &Expr) -> Result<(Value, Type), CodegenError> {
        match e {
            Expr::Int(i) => Ok((Value::Int(*i), Type::Int)),
            Expr::Float(f) => Ok((Value::Float(*f), Type::Float64)),
            Expr::Bool(b) => Ok((Value::Bool(*b), Type::Bool)),
            Expr::Duration(ns) => Ok((Value::Int(*ns), Type::Duration)),
            Expr::Str(s) => Ok((self.module.intern_string(s), Type::String)),
            Expr::Var(name) if name == "this" && frame.this.is_some() => {
                match (&frame.this, &frame.class) {
                    (Some(this), Some(class)) => Ok((this.clone(), Type::Class(class.clone()))),
                    _ => fail(name, CodegenErrorKind::UndefinedVariable),
                }
            }
            Expr::Var(_) | Expr::Field(_, _) => {
                let (ptr, ty) = self.place(frame, e)?;
                let dst = frame.env.fresh_register();
                frame.env.push_op(Op::Load { dst, ty: ty.ir(), ptr });
                Ok((Value::Reg(dst), ty))
            }
            Expr::BinOp(op, l, r) if op.is_logical() => self.short_circuit(frame, *op, l, r),
            Expr::BinOp(op, l, r) => {
                let node = printer::expression(e);
                let (left, lt) = self.expr(frame, l)?;
                let (right, rt) = self.expr(frame, r)?;
                expect_type(&node, &lt, &rt)?;

                let comparable = lt.is_numeric() || (lt == Type::Bool && matches!(op, BinOp::Eq | BinOp::Ne));
                let allowed = if op.is_arithmetic() { lt.is_numeric() } else { comparable };
                if !allowed {
                    return fail(&node, CodegenErrorKind::TypeMismatch {
                        expected: "numeric operands".to_string(),
                        found: lt.to_string(),
                    });
                }

                let dst = frame.env.fresh_register();
                if op.is_arithmetic() {
                    frame.env.push_op(Op::Binary { dst, ty: lt.ir(), operator: *op, left, right });
                    Ok((Value::Reg(dst), lt))
                } else {
                    frame.env.push_op(Op::Compare { dst, ty: lt.ir(), operator: *op, left, right });
                    Ok((Value::Reg(dst), Type::Bool))
                }
            }
            Expr::Not(inner) => {
                let value = self.condition(frame, inner)?;
                let dst = frame.env.fresh_register();
                frame.env.push_op(Op::Not { dst, value });
                Ok((Value::Reg(dst), Type::Bool))
            }
            Expr::Call(name, args) => self.call(frame, name, args),
            Expr::MethodCall(receiver, method, args) => self.method_call(frame, receiver, method, args),
            Expr::New(class, args) => {
                let constructor = self.constructor(class)?;
                let args = self.arguments(frame, class, &constructor, args)?;
                Ok(self.emit_call(frame, &constructor, args))
            }
        }
    }

    /// `&&` and `||` only evaluate the right operand when it decides the
    /// result.
    fn short_circuit(
        &mut self,
        frame: &mut Frame,
        op: BinOp,
        l: &Expr,
        r: &Expr,
    ) -> Result<(Value, Type), CodegenError> {
        let left = self.condition(frame, l)?;
        let left_end = frame.env.current_block_id();

        let right_start = frame.env.split_block();
        let right = self.condition(frame, r)?;
        let right_end = frame.env.current_block_id();

        let merge = frame.env.split_block();
        let (positive, negative, decided) = match op {
            BinOp::Or => (merge, right_start, true),
            _ => (right_start, merge, false),
        };
        frame.env.seal(left_end, BlockExit::Branch(left, positive, negative));
        frame.env.seal(right_end, BlockExit::Jump(merge));

        let dst = frame.env.fresh_register();
        frame.env.push_op(Op::Phi {
            dst,
            ty: IrType::I1,
            incoming: vec![(Value::Bool(decided), left_end), (right, right_end)],
        });
        Ok((Value::Reg(dst), Type::Bool))
    }

    fn arguments(
        &mut self,
        frame: &mut Frame,
        node: &str,
        callable: &Callable,
        args: &[Expr],
    ) -> Result<Vec<(IrType, Value)>, CodegenError> {
        if args.len() != callable.params.len() {
            return fail(node, CodegenErrorKind::ArityMismatch {
                expected: callable.params.len(),
                found: args.len(),
            });
        }
        let mut values = Vec::new();
        for (arg, expected) in args.iter().zip(&callable.params) {
            let (value, found) = self.expr(frame, arg)?;
            expect_type(&printer::expression(arg), expected, &found)?;
            values.push((found.ir(), value));
        }
        Ok(values)
    }

    fn emit_call(&mut self, frame: &mut Frame, callable: &Callable, args: Vec<(IrType, Value)>) -> (Value, Type) {
        if callable.external {
            self.module.declare(callable.declaration());
        }
        let dst = if callable.ret == Type::Void { None } else { Some(frame.env.fresh_register()) };
        frame.env.push_op(Op::Call {
            dst,
            ret: callable.ret.ir(),
            function: callable.symbol.clone(),
            args,
        });
        (dst.map_or(Value::Null, Value::Reg), callable.ret.clone())
    }

    fn call(&mut self, frame: &mut Frame, name: &str, args: &[Expr]) -> Result<(Value, Type), CodegenError> {
        let callable = match self.functions.get(name) {
            Some(callable) => callable.clone(),
            None => return fail(name, CodegenErrorKind::UndefinedFunction),
        };
        let args = self.arguments(frame, name, &callable, args)?;
        Ok(self.emit_call(frame, &callable, args))
    }

    fn method_call(
        &mut self,
        frame: &mut Frame,
        receiver: &Expr,
        method: &str,
        args: &[Expr],
    ) -> Result<(Value, Type), CodegenError> {
        let node = format!("{}.{}", printer::expression(receiver), method);
        let (object, ty) = self.expr(frame, receiver)?;
        let class = match ty.class_name() {
            Some(class) => class.to_string(),
            None => return fail(&node, CodegenErrorKind::TypeMismatch {
                expected: "class instance".to_string(),
                found: ty.to_string(),
            }),
        };
        let callable = match self.class_info(&class)?.methods.get(method) {
            Some(callable) => callable.clone(),
            None => return fail(&node, CodegenErrorKind::UndefinedMethod),
        };
        if callable.visibility == Visibility::Private && !frame.own_class(&class) {
            return fail(&node, CodegenErrorKind::PrivateAccess);
        }

        let mut values = vec![(IrType::Ptr, object)];
        values.extend(self.arguments(frame, &node, &callable, args)?);
        Ok(self.emit_call(frame, &callable, values))
    }
}
