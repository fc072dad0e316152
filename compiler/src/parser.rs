use std::fmt;

use thiserror::Error;

use crate::lexer::*;
use crate::ast::*;
use crate::trace::{NoTrace, Trace};
use crate::types::Primitive;

// Grammar:
// P -> S* eof
// S -> var sym (: X)? = E ;
//    | if E B (else (if ... | B))?
//    | while E B
//    | for (? var sym (: X)? = E ; E ; Q )? B
//    | func G B | class sym { M* } | extern func G ;
//    | print E ; | sleep E ; | return E? ; | import (string | sym) ;
//    | sym ( A ) ; | sym . sym ( A ) ; | Q ;
// G -> sym ( (sym : X ,)* ) (: X)?
// M -> func G B | private func G B | private? sym : X ; | classname ( ... ) B
// Q -> T = E
// T -> sym (. sym)*
// E -> L ((+ | -) L)*
// L -> K ((&& | ||) K)*
// K -> U ((> | < | >= | <= | == | !=) U)*
// U -> ! U | R
// R -> V ((* | /) V)*
// V -> number | number unit | - number | string | true | false
//    | new sym ( A ) | sym ( A ) | T | T . sym ( A ) | ( E )

#[derive(Debug, PartialEq, Error)]
pub enum ParseError {
    #[error("{location}: expected {expected}, found {found}")]
    Syntax { location: Position, expected: String, found: String },
    #[error("{location}: unknown type `{name}`")]
    UnknownType { location: Position, name: String },
    #[error("{location}: unknown duration unit `{unit}`")]
    UnknownDurationUnit { location: Position, unit: String },
    #[error("{location}: class `{class}` already has a constructor")]
    DuplicateConstructor { location: Position, class: String },
}

/// A token that cannot start a statement. It is skipped.
#[derive(Debug, PartialEq, Clone)]
pub struct Warning {
    pub location: Position,
    pub token: String,
}

#[derive(Debug, PartialEq)]
pub struct Parsed {
    pub program: Program,
    pub warnings: Vec<Warning>,
}

/// What to do with a second constructor in the same class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateConstructors {
    /// The constructor parsed last replaces the earlier ones.
    LastWins,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    pub duplicate_constructors: DuplicateConstructors,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions { duplicate_constructors: DuplicateConstructors::LastWins }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[W] {} unexpected token: {}", self.location, self.token)
    }
}

type ParseResult<'a, T> = Result<(T, &'a [Token<'a>]), ParseError>;

fn describe(tok: &Token) -> String {
    match tok.0 {
        TokenClass::EOF => "end of input".to_string(),
        _ => format!("`{}`", tok.1),
    }
}

fn expected<'a, T>(ts: &'a [Token<'a>], what: &str) -> Result<T, ParseError> {
    Err(ParseError::Syntax {
        location: ts[0].2,
        expected: what.to_string(),
        found: describe(&ts[0]),
    })
}

fn is_class(ts: &[Token], offset: usize, class: TokenClass) -> bool {
    ts.get(offset).map_or(false, |tok| tok.0 == class)
}

fn is_punct(ts: &[Token], offset: usize, p: &str) -> bool {
    matches!(ts.get(offset), Some(Token(TokenClass::Punct, s, _)) if *s == p)
}

fn is_ident(ts: &[Token], offset: usize, name: &str) -> bool {
    matches!(ts.get(offset), Some(Token(TokenClass::Ident, s, _)) if *s == name)
}

fn token<'a>(ts: &'a [Token<'a>], expected_tc: TokenClass, what: &str) -> ParseResult<'a, &'a str> {
    let Token(tc, tstr, _) = &ts[0];
    if *tc == expected_tc && *tc != TokenClass::EOF {
        Ok((*tstr, &ts[1..]))
    } else {
        expected(ts, what)
    }
}

fn punct<'a>(ts: &'a [Token<'a>], p: &str) -> ParseResult<'a, ()> {
    if is_punct(ts, 0, p) {
        Ok(((), &ts[1..]))
    } else {
        expected(ts, &format!("`{}`", p))
    }
}

fn keyword<'a>(ts: &'a [Token<'a>], kw: &str) -> ParseResult<'a, ()> {
    if is_ident(ts, 0, kw) {
        Ok(((), &ts[1..]))
    } else {
        expected(ts, &format!("`{}`", kw))
    }
}

fn ident<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, String> {
    let (name, rest) = token(ts, TokenClass::Ident, "identifier")?;
    Ok((name.to_string(), rest))
}

/// `( item, item, ... )`
fn list<'a, T>(
    ts: &'a [Token<'a>],
    item: &dyn Fn(&'a [Token<'a>]) -> ParseResult<'a, T>,
) -> ParseResult<'a, Vec<T>> {
    let (_, mut rest) = punct(ts, "(")?;
    let mut items = Vec::new();
    if is_punct(rest, 0, ")") {
        return Ok((items, &rest[1..]));
    }
    loop {
        let (value, rest_) = item(rest)?;
        items.push(value);
        if is_punct(rest_, 0, ",") {
            rest = &rest_[1..];
        } else {
            let (_, rest_) = punct(rest_, ")")?;
            return Ok((items, rest_));
        }
    }
}

fn arguments<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, Vec<Expr>> {
    list(ts, &expression)
}

fn type_name<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, TypeName> {
    let (name, rest) = token(ts, TokenClass::Ident, "type name")?;
    let ty = match Primitive::from_name(name) {
        Some(p) => TypeName::Primitive(p),
        None => TypeName::Class(name.to_string()),
    };
    Ok((ty, rest))
}

/// Constructor parameters only accept the fixed primitive table.
fn primitive_type<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, TypeName> {
    let (name, rest) = token(ts, TokenClass::Ident, "type name")?;
    match Primitive::from_name(name) {
        Some(p) if p != Primitive::Void => Ok((TypeName::Primitive(p), rest)),
        _ => Err(ParseError::UnknownType { location: ts[0].2, name: name.to_string() }),
    }
}

fn param<'a>(
    ts: &'a [Token<'a>],
    ty: &dyn Fn(&'a [Token<'a>]) -> ParseResult<'a, TypeName>,
) -> ParseResult<'a, Param> {
    let (name, rest) = ident(ts)?;
    let (_, rest) = punct(rest, ":")?;
    let (ty, rest) = ty(rest)?;
    Ok((Param { name, ty }, rest))
}

fn signature<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, Signature> {
    let (name, rest) = ident(ts)?;
    let (params, rest) = list(rest, &|ts| param(ts, &type_name))?;
    let (return_type, rest) = if is_punct(rest, 0, ":") {
        type_name(&rest[1..])?
    } else {
        (TypeName::Primitive(Primitive::Void), rest)
    };
    Ok((Signature { name, params, return_type }, rest))
}

fn duration_unit(unit: &str) -> Option<i64> {
    let nanos = match unit {
        "ns" => 1,
        "us" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 60 * 60 * 1_000_000_000,
        _ => return None,
    };
    Some(nanos)
}

fn number<'a>(ts: &'a [Token<'a>], negative: bool) -> ParseResult<'a, Expr> {
    let Token(_, text, location) = &ts[0];
    let literal = if negative { format!("-{}", text) } else { text.to_string() };

    if let Some(Token(TokenClass::Ident, unit, unit_location)) = ts.get(1) {
        let scale = duration_unit(unit).ok_or_else(|| ParseError::UnknownDurationUnit {
            location: *unit_location,
            unit: unit.to_string(),
        })?;
        let nanos = literal.parse::<i64>().ok().and_then(|n| n.checked_mul(scale));
        return match nanos {
            Some(n) => Ok((Expr::Duration(n), &ts[2..])),
            None => expected(ts, "integer duration magnitude within 64 bits"),
        };
    }

    if text.contains('.') {
        match literal.parse::<f64>() {
            Ok(f) => Ok((Expr::Float(f), &ts[1..])),
            Err(_) => expected(ts, "floating-point literal"),
        }
    } else {
        match literal.parse::<i64>() {
            Ok(i) => Ok((Expr::Int(i), &ts[1..])),
            Err(_) => Err(ParseError::Syntax {
                location: *location,
                expected: "integer literal within 64 bits".to_string(),
                found: literal,
            }),
        }
    }
}

fn string<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, String> {
    let (text, rest) = token(ts, TokenClass::String, "string literal")?;
    let mut value = String::new();
    let mut chars = text[1..text.len() - 1].chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            value.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => value.push('\n'),
            Some('t') => value.push('\t'),
            Some('r') => value.push('\r'),
            Some('0') => value.push('\0'),
            Some(c @ '"') | Some(c @ '\\') => value.push(c),
            other => {
                return Err(ParseError::Syntax {
                    location: ts[0].2,
                    expected: "escape sequence".to_string(),
                    found: format!("`\\{}`", other.map(String::from).unwrap_or_default()),
                })
            }
        }
    }
    Ok((value, rest))
}

/// `sym (. sym)*`, the left-hand side of an assignment.
fn place<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, Expr> {
    let (name, mut rest) = ident(ts)?;
    let mut expr = Expr::Var(name);
    while is_punct(rest, 0, ".") {
        let (member, rest_) = ident(&rest[1..])?;
        expr = Expr::Field(Box::new(expr), member);
        rest = rest_;
    }
    Ok((expr, rest))
}

fn identifier<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, Expr> {
    let (name, mut rest) = ident(ts)?;
    let mut expr = Expr::Var(name);
    while is_punct(rest, 0, ".") {
        let (member, rest_) = ident(&rest[1..])?;
        if is_punct(rest_, 0, "(") {
            let (args, rest_) = arguments(rest_)?;
            return Ok((Expr::MethodCall(Box::new(expr), member, args), rest_));
        }
        expr = Expr::Field(Box::new(expr), member);
        rest = rest_;
    }
    Ok((expr, rest))
}

fn factor<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, Expr> {
    match &ts[0] {
        Token(TokenClass::Number, _, _) => number(ts, false),
        Token(TokenClass::String, _, _) => {
            let (s, rest) = string(ts)?;
            Ok((Expr::Str(s), rest))
        }
        Token(TokenClass::Ident, text, _) => match *text {
            "true" | "True" => Ok((Expr::Bool(true), &ts[1..])),
            "false" | "False" => Ok((Expr::Bool(false), &ts[1..])),
            "new" => {
                let (class, rest) = ident(&ts[1..])?;
                let (args, rest) = arguments(rest)?;
                Ok((Expr::New(class, args), rest))
            }
            _ if is_punct(ts, 1, "(") => {
                let (name, rest) = ident(ts)?;
                let (args, rest) = arguments(rest)?;
                Ok((Expr::Call(name, args), rest))
            }
            _ => identifier(ts),
        },
        Token(TokenClass::Punct, "(", _) => {
            let (expr, rest) = expression(&ts[1..])?;
            let (_, rest) = punct(rest, ")")?;
            Ok((expr, rest))
        }
        Token(TokenClass::Punct, "-", _) if is_class(ts, 1, TokenClass::Number) => {
            number(&ts[1..], true)
        }
        _ => expected(ts, "expression"),
    }
}

fn term<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, Expr> {
    let (mut expr, mut rest) = factor(ts)?;
    loop {
        let op = if is_punct(rest, 0, "*") {
            BinOp::Mul
        } else if is_punct(rest, 0, "/") {
            BinOp::Div
        } else {
            break;
        };
        let (right, rest_) = factor(&rest[1..])?;
        expr = Expr::binop(op, expr, right);
        rest = rest_;
    }
    Ok((expr, rest))
}

fn unary<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, Expr> {
    if is_punct(ts, 0, "!") && !is_punct(ts, 1, "=") {
        let (expr, rest) = unary(&ts[1..])?;
        Ok((Expr::Not(Box::new(expr)), rest))
    } else {
        term(ts)
    }
}

/// Reads a comparison or logical operator, joining a trailing `=`, `|` or
/// `&` token onto the first character.
fn operator<'a>(ts: &'a [Token<'a>]) -> Option<(BinOp, &'a [Token<'a>])> {
    let first = match &ts[0] {
        Token(TokenClass::Punct, s, _) if matches!(*s, ">" | "<" | "=" | "!" | "|" | "&") => *s,
        _ => return None,
    };
    let (text, rest) = match ts.get(1) {
        Some(Token(TokenClass::Punct, s, _)) if matches!(*s, "=" | "|" | "&") => {
            (format!("{}{}", first, s), &ts[2..])
        }
        _ => (first.to_string(), &ts[1..]),
    };
    let op = match text.as_str() {
        ">" => BinOp::Gt,
        ">=" => BinOp::Ge,
        "<" => BinOp::Lt,
        "<=" => BinOp::Le,
        "==" => BinOp::Eq,
        "!=" => BinOp::Ne,
        "&&" => BinOp::And,
        "||" => BinOp::Or,
        _ => return None,
    };
    Some((op, rest))
}

fn relational<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, Expr> {
    let (mut expr, mut rest) = unary(ts)?;
    while let Some((op, rest_)) = operator(rest) {
        if op.is_logical() {
            break;
        }
        let (right, rest_) = unary(rest_)?;
        expr = Expr::binop(op, expr, right);
        rest = rest_;
    }
    Ok((expr, rest))
}

fn logical<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, Expr> {
    let (mut expr, mut rest) = relational(ts)?;
    while let Some((op, rest_)) = operator(rest) {
        if !op.is_logical() {
            break;
        }
        let (right, rest_) = relational(rest_)?;
        expr = Expr::binop(op, expr, right);
        rest = rest_;
    }
    Ok((expr, rest))
}

pub fn expression<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, Expr> {
    let (mut expr, mut rest) = logical(ts)?;
    loop {
        let op = if is_punct(rest, 0, "+") {
            BinOp::Add
        } else if is_punct(rest, 0, "-") {
            BinOp::Sub
        } else {
            break;
        };
        let (right, rest_) = logical(&rest[1..])?;
        expr = Expr::binop(op, expr, right);
        rest = rest_;
    }
    Ok((expr, rest))
}

/// `T = E` without the terminating semicolon.
fn assignment_body<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, (Expr, Expr)> {
    let (target, rest) = place(ts)?;
    let (_, rest) = punct(rest, "=")?;
    let (expr, rest) = expression(rest)?;
    Ok(((target, expr), rest))
}

fn field<'a>(ts: &'a [Token<'a>], visibility: Visibility, index: usize) -> ParseResult<'a, Field> {
    let (name, rest) = ident(ts)?;
    let (_, rest) = punct(rest, ":")?;
    let (ty, rest) = type_name(rest)?;
    let (_, rest) = punct(rest, ";")?;
    Ok((Field { name, ty, visibility, index }, rest))
}

struct Grammar<'o> {
    options: ParseOptions,
    trace: &'o mut dyn Trace,
    warnings: Vec<Warning>,
}

impl<'o> Grammar<'o> {
    fn program<'a>(&mut self, mut ts: &'a [Token<'a>]) -> Result<Program, ParseError> {
        let mut statements = Vec::new();
        while ts[0].0 != TokenClass::EOF {
            let (stmt, rest) = self.statement(ts)?;
            statements.extend(stmt);
            ts = rest;
        }
        Ok(statements)
    }

    fn statement<'a>(&mut self, ts: &'a [Token<'a>]) -> ParseResult<'a, Option<Stmt>> {
        let Token(tc, text, location) = &ts[0];
        if *tc != TokenClass::Ident {
            let warning = Warning { location: *location, token: text.to_string() };
            self.trace.event(&warning.to_string());
            self.warnings.push(warning);
            return Ok((None, &ts[1..]));
        }

        let (stmt, rest) = match *text {
            "var" => {
                let ((name, ty, expr), rest) = self.definition(ts)?;
                (Stmt::Define { name, ty, expr }, rest)
            }
            "if" => self.conditional(ts)?,
            "while" => {
                let (cond, rest) = expression(&ts[1..])?;
                let (body, rest) = self.block(rest)?;
                (Stmt::While { cond, body }, rest)
            }
            "for" => self.for_loop(ts)?,
            "func" => {
                let (f, rest) = self.function(&ts[1..], Visibility::Public)?;
                (Stmt::FuncDecl(f), rest)
            }
            "class" => {
                let (c, rest) = self.class(ts)?;
                (Stmt::Class(c), rest)
            }
            "print" => {
                let (expr, rest) = expression(&ts[1..])?;
                let (_, rest) = punct(rest, ";")?;
                (Stmt::Print(expr), rest)
            }
            "sleep" => {
                let (expr, rest) = expression(&ts[1..])?;
                let (_, rest) = punct(rest, ";")?;
                (Stmt::Sleep(expr), rest)
            }
            "return" => {
                if is_punct(ts, 1, ";") {
                    (Stmt::Return(None), &ts[2..])
                } else {
                    let (expr, rest) = expression(&ts[1..])?;
                    let (_, rest) = punct(rest, ";")?;
                    (Stmt::Return(Some(expr)), rest)
                }
            }
            "extern" => {
                let (_, rest) = keyword(&ts[1..], "func")?;
                let (sig, rest) = signature(rest)?;
                let (_, rest) = punct(rest, ";")?;
                (Stmt::Extern(sig), rest)
            }
            "import" => {
                let (path, rest) = if is_class(ts, 1, TokenClass::String) {
                    string(&ts[1..])?
                } else {
                    ident(&ts[1..])?
                };
                let (_, rest) = punct(rest, ";")?;
                (Stmt::Import(path), rest)
            }
            _ if is_punct(ts, 1, "(") => {
                let (name, rest) = ident(ts)?;
                let (args, rest) = arguments(rest)?;
                let (_, rest) = punct(rest, ";")?;
                (Stmt::Call(name, args), rest)
            }
            _ if is_punct(ts, 1, ".") && is_punct(ts, 3, "(") => {
                let (receiver, rest) = ident(ts)?;
                let (method, rest) = ident(&rest[1..])?;
                let (args, rest) = arguments(rest)?;
                let (_, rest) = punct(rest, ";")?;
                (Stmt::MethodCall { receiver, method, args }, rest)
            }
            _ => {
                let ((target, expr), rest) = assignment_body(ts)?;
                let (_, rest) = punct(rest, ";")?;
                (Stmt::Assign { target, expr }, rest)
            }
        };
        Ok((Some(stmt), rest))
    }

    fn block<'a>(&mut self, ts: &'a [Token<'a>]) -> ParseResult<'a, Vec<Stmt>> {
        let (_, mut rest) = punct(ts, "{")?;
        let mut body = Vec::new();
        while !is_punct(rest, 0, "}") {
            if rest[0].0 == TokenClass::EOF {
                return expected(rest, "`}`");
            }
            let (stmt, rest_) = self.statement(rest)?;
            body.extend(stmt);
            rest = rest_;
        }
        Ok((body, &rest[1..]))
    }

    fn definition<'a>(
        &mut self,
        ts: &'a [Token<'a>],
    ) -> ParseResult<'a, (String, Option<TypeName>, Expr)> {
        let (_, rest) = keyword(ts, "var")?;
        let (name, rest) = ident(rest)?;
        let (ty, rest) = if is_punct(rest, 0, ":") {
            let (ty, rest) = type_name(&rest[1..])?;
            (Some(ty), rest)
        } else {
            (None, rest)
        };
        let (_, rest) = punct(rest, "=")?;
        let (expr, rest) = expression(rest)?;
        let (_, rest) = punct(rest, ";")?;
        Ok(((name, ty, expr), rest))
    }

    fn conditional<'a>(&mut self, ts: &'a [Token<'a>]) -> ParseResult<'a, Stmt> {
        let (_, rest) = keyword(ts, "if")?;
        let (cond, rest) = expression(rest)?;
        let (then, rest) = self.block(rest)?;
        if !is_ident(rest, 0, "else") {
            return Ok((Stmt::If { cond, then, otherwise: Vec::new() }, rest));
        }
        let (otherwise, rest) = if is_ident(rest, 1, "if") {
            let (nested, rest) = self.conditional(&rest[1..])?;
            (vec![nested], rest)
        } else {
            self.block(&rest[1..])?
        };
        Ok((Stmt::If { cond, then, otherwise }, rest))
    }

    fn for_loop<'a>(&mut self, ts: &'a [Token<'a>]) -> ParseResult<'a, Stmt> {
        let (_, rest) = keyword(ts, "for")?;
        let parenthesized = is_punct(rest, 0, "(");
        let rest = if parenthesized { &rest[1..] } else { rest };

        let (init_name, init_ty, init_expr, rest) = match self.statement(rest)? {
            (Some(Stmt::Define { name, ty, expr }), rest_) => (name, ty, expr, rest_),
            _ => return expected(rest, "variable definition in `for` initializer"),
        };
        let (cond, rest) = expression(rest)?;
        let (_, rest) = punct(rest, ";")?;

        if !is_class(rest, 0, TokenClass::Ident) {
            return expected(rest, "assignment in `for` step");
        }
        let ((step_target, step_expr), rest) = assignment_body(rest)?;
        let rest = if parenthesized { punct(rest, ")")?.1 } else { rest };

        let (body, rest) = self.block(rest)?;
        self.trace.event(&format!("{}: for loop over `{}`", ts[0].2, init_name));
        Ok((Stmt::For { init_name, init_ty, init_expr, cond, step_target, step_expr, body }, rest))
    }

    fn function<'a>(&mut self, ts: &'a [Token<'a>], visibility: Visibility) -> ParseResult<'a, Function> {
        let (signature, rest) = signature(ts)?;
        let (body, rest) = self.block(rest)?;
        Ok((Function { signature, body, visibility }, rest))
    }

    fn constructor<'a>(&mut self, ts: &'a [Token<'a>]) -> ParseResult<'a, Function> {
        let (name, rest) = ident(ts)?;
        let (params, rest) = list(rest, &|ts| param(ts, &primitive_type))?;
        let (body, rest) = self.block(rest)?;
        let signature = Signature { name, params, return_type: TypeName::Primitive(Primitive::Void) };
        Ok((Function { signature, body, visibility: Visibility::Public }, rest))
    }

    fn class<'a>(&mut self, ts: &'a [Token<'a>]) -> ParseResult<'a, Class> {
        let (_, rest) = keyword(ts, "class")?;
        let (name, rest) = ident(rest)?;
        let (_, mut rest) = punct(rest, "{")?;

        let mut fields: Vec<Field> = Vec::new();
        let mut methods = Vec::new();
        let mut constructor = None;

        while !is_punct(rest, 0, "}") {
            if rest[0].0 == TokenClass::EOF {
                return expected(rest, "`}`");
            }
            if is_ident(rest, 0, "func") {
                let (method, rest_) = self.function(&rest[1..], Visibility::Public)?;
                methods.push(method);
                rest = rest_;
            } else if is_ident(rest, 0, "private") {
                if is_ident(rest, 1, "func") {
                    let (method, rest_) = self.function(&rest[2..], Visibility::Private)?;
                    methods.push(method);
                    rest = rest_;
                } else {
                    let (f, rest_) = field(&rest[1..], Visibility::Private, fields.len())?;
                    fields.push(f);
                    rest = rest_;
                }
            } else if is_ident(rest, 0, &name) {
                let location = rest[0].2;
                let (ctor, rest_) = self.constructor(rest)?;
                if constructor.is_some() {
                    if self.options.duplicate_constructors == DuplicateConstructors::Reject {
                        return Err(ParseError::DuplicateConstructor { location, class: name });
                    }
                    self.trace.event(&format!(
                        "{}: constructor of `{}` replaces an earlier one", location, name));
                }
                constructor = Some(ctor);
                rest = rest_;
            } else {
                let (f, rest_) = field(rest, Visibility::Public, fields.len())?;
                fields.push(f);
                rest = rest_;
            }
        }

        self.trace.event(&format!(
            "class `{}`: {} fields, {} methods", name, fields.len(), methods.len()));
        Ok((Class { name, fields, methods, constructor }, &rest[1..]))
    }
}

pub fn parse(ts: &[Token]) -> Result<Parsed, ParseError> {
    parse_with(ts, ParseOptions::default(), &mut NoTrace)
}

/// Parses a token sequence. Whitespace tokens are ignored and a missing
/// end-of-input token is supplied.
pub fn parse_with(
    ts: &[Token],
    options: ParseOptions,
    trace: &mut dyn Trace,
) -> Result<Parsed, ParseError> {
    let mut tokens = ts.to_vec();
    trim_ws(&mut tokens);
    if tokens.last().map(|tok| tok.0) != Some(TokenClass::EOF) {
        let end = tokens.last().map(|tok| tok.2).unwrap_or(Position(1, 1));
        tokens.push(Token(TokenClass::EOF, "", end));
    }

    let mut grammar = Grammar { options, trace, warnings: Vec::new() };
    let program = grammar.program(&tokens)?;
    Ok(Parsed { program, warnings: grammar.warnings })
}


#[cfg(test)]
mod test {
    use crate::lexer::{Position, lex};
    use crate::ast::*;
    use crate::trace::Recorder;
    use crate::types::Primitive;
    use super::*;

    fn parse_str(s: &str) -> Program {
        let toks = lex(s).unwrap();
        parse(&toks).unwrap().program
    }

    fn parse_err(s: &str) -> ParseError {
        let toks = lex(s).unwrap();
        parse(&toks).unwrap_err()
    }

    fn define(name: &str, expr: Expr) -> Stmt {
        Stmt::Define { name: name.to_string(), ty: None, expr }
    }

    fn int_type() -> TypeName {
        TypeName::Primitive(Primitive::Int)
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(parse_str("var x = 2 + 3 * 4;"), vec![
            define("x", Expr::add(Expr::int(2), Expr::mul(Expr::int(3), Expr::int(4)))),
        ]);

        assert_eq!(parse_str("var x = (2 + 3) * 4;"), vec![
            define("x", Expr::mul(Expr::add(Expr::int(2), Expr::int(3)), Expr::int(4))),
        ]);

        assert_eq!(parse_str("var x = 1 - 2 - 3;"), vec![
            define("x", Expr::sub(Expr::sub(Expr::int(1), Expr::int(2)), Expr::int(3))),
        ]);

        assert_eq!(parse_str("var x = 8 / 2 * 3;"), vec![
            define("x", Expr::mul(
                Expr::binop(BinOp::Div, Expr::int(8), Expr::int(2)),
                Expr::int(3))),
        ]);
    }

    #[test]
    fn comparison_and_logical_tier() {
        assert_eq!(parse_str("var b = 1 < 2 && 3 > 2;"), vec![
            define("b", Expr::binop(
                BinOp::And,
                Expr::binop(BinOp::Lt, Expr::int(1), Expr::int(2)),
                Expr::binop(BinOp::Gt, Expr::int(3), Expr::int(2)))),
        ]);

        assert_eq!(parse_str("var b = a >= 1 || a <= 2 || a != 3;"), vec![
            define("b", Expr::binop(
                BinOp::Or,
                Expr::binop(
                    BinOp::Or,
                    Expr::binop(BinOp::Ge, Expr::var("a"), Expr::int(1)),
                    Expr::binop(BinOp::Le, Expr::var("a"), Expr::int(2))),
                Expr::binop(BinOp::Ne, Expr::var("a"), Expr::int(3)))),
        ]);

        // additive binds loosest
        assert_eq!(parse_str("var b = 1 + 2 == 3;"), vec![
            define("b", Expr::add(
                Expr::int(1),
                Expr::binop(BinOp::Eq, Expr::int(2), Expr::int(3)))),
        ]);

        assert_eq!(parse_str("var b = !ok && x == 2 * y;"), vec![
            define("b", Expr::binop(
                BinOp::And,
                Expr::Not(Box::new(Expr::var("ok"))),
                Expr::binop(
                    BinOp::Eq,
                    Expr::var("x"),
                    Expr::mul(Expr::int(2), Expr::var("y"))))),
        ]);
    }

    #[test]
    fn literals() {
        assert_eq!(parse_str("var a = 1.5; var b = True; var c = false; var d = \"hi\\n\"; var e = -7;"), vec![
            define("a", Expr::Float(1.5)),
            define("b", Expr::Bool(true)),
            define("c", Expr::Bool(false)),
            define("d", Expr::Str("hi\n".to_string())),
            define("e", Expr::Int(-7)),
        ]);
    }

    #[test]
    fn durations() {
        assert_eq!(parse_str("sleep 100ms;"), vec![
            Stmt::Sleep(Expr::Duration(100 * 1_000_000)),
        ]);
        assert_eq!(parse_str("var d = 2h + 3s - 5ns;"), vec![
            define("d", Expr::sub(
                Expr::add(
                    Expr::Duration(2 * 3600 * 1_000_000_000),
                    Expr::Duration(3 * 1_000_000_000)),
                Expr::Duration(5))),
        ]);
        assert_eq!(
            parse_err("sleep 100bogus;"),
            ParseError::UnknownDurationUnit { location: Position(1, 10), unit: "bogus".to_string() });
    }

    #[test]
    fn for_loop_decomposition() {
        let program = parse_str("for (var i: int = 0; i < 10; i = i + 1) { print i; }");
        assert_eq!(program, vec![
            Stmt::For {
                init_name: "i".to_string(),
                init_ty: Some(int_type()),
                init_expr: Expr::int(0),
                cond: Expr::binop(BinOp::Lt, Expr::var("i"), Expr::int(10)),
                step_target: Expr::var("i"),
                step_expr: Expr::add(Expr::var("i"), Expr::int(1)),
                body: vec![Stmt::Print(Expr::var("i"))],
            },
        ]);

        match parse_err("for (print 1; i < 10; i = i + 1) { }") {
            ParseError::Syntax { expected, .. } =>
                assert_eq!(expected, "variable definition in `for` initializer"),
            e => panic!("unexpected error {:?}", e),
        }

        match parse_err("for (var i = 0; i < 10; 5) { }") {
            ParseError::Syntax { expected, .. } =>
                assert_eq!(expected, "assignment in `for` step"),
            e => panic!("unexpected error {:?}", e),
        }
    }

    #[test]
    fn control_flow() {
        assert_eq!(parse_str("if x > 1 { y = 1; } else if x > 0 { y = 2; } else { y = 3; } while y { y = y - 1; }"), vec![
            Stmt::If {
                cond: Expr::binop(BinOp::Gt, Expr::var("x"), Expr::int(1)),
                then: vec![Stmt::Assign { target: Expr::var("y"), expr: Expr::int(1) }],
                otherwise: vec![Stmt::If {
                    cond: Expr::binop(BinOp::Gt, Expr::var("x"), Expr::int(0)),
                    then: vec![Stmt::Assign { target: Expr::var("y"), expr: Expr::int(2) }],
                    otherwise: vec![Stmt::Assign { target: Expr::var("y"), expr: Expr::int(3) }],
                }],
            },
            Stmt::While {
                cond: Expr::var("y"),
                body: vec![Stmt::Assign {
                    target: Expr::var("y"),
                    expr: Expr::sub(Expr::var("y"), Expr::int(1)),
                }],
            },
        ]);
    }

    #[test]
    fn functions() {
        assert_eq!(parse_str("func add(a: int, b: int): int { return a + b; } func hello() { print \"hi\"; return; }"), vec![
            Stmt::FuncDecl(Function {
                signature: Signature {
                    name: "add".to_string(),
                    params: vec![Param::new("a", int_type()), Param::new("b", int_type())],
                    return_type: int_type(),
                },
                body: vec![Stmt::Return(Some(Expr::add(Expr::var("a"), Expr::var("b"))))],
                visibility: Visibility::Public,
            }),
            Stmt::FuncDecl(Function {
                signature: Signature {
                    name: "hello".to_string(),
                    params: vec![],
                    return_type: TypeName::Primitive(Primitive::Void),
                },
                body: vec![Stmt::Print(Expr::Str("hi".to_string())), Stmt::Return(None)],
                visibility: Visibility::Public,
            }),
        ]);

        assert_eq!(parse_str("extern func puts(s: string): int; import \"./util.cffc\"; import util;"), vec![
            Stmt::Extern(Signature {
                name: "puts".to_string(),
                params: vec![Param::new("s", TypeName::Primitive(Primitive::String))],
                return_type: int_type(),
            }),
            Stmt::Import("./util.cffc".to_string()),
            Stmt::Import("util".to_string()),
        ]);
    }

    #[test]
    fn class_field_indexing() {
        let program = parse_str("
            class Counter {
                a: int;
                func bump(): int { return a; }
                private b: float64;
                Counter(start: int) { a = start; }
                c: Point;
            }");
        let class = match &program[0] {
            Stmt::Class(c) => c,
            s => panic!("unexpected statement {:?}", s),
        };
        let indices: Vec<(&str, usize, Visibility)> = class.fields.iter()
            .map(|f| (f.name.as_str(), f.index, f.visibility))
            .collect();
        assert_eq!(indices, vec![
            ("a", 0, Visibility::Public),
            ("b", 1, Visibility::Private),
            ("c", 2, Visibility::Public),
        ]);
        assert_eq!(class.field("c").map(|f| &f.ty), Some(&TypeName::Class("Point".to_string())));
        assert_eq!(class.methods.len(), 1);
        let ctor = class.constructor.as_ref().unwrap();
        assert_eq!(ctor.params(), &[Param::new("start", int_type())]);
        assert_eq!(ctor.return_type(), &TypeName::Primitive(Primitive::Void));
    }

    #[test]
    fn private_methods() {
        let program = parse_str("class A { private func secret(): int { return 1; } func open() { } }");
        match &program[0] {
            Stmt::Class(c) => {
                assert_eq!(c.methods[0].visibility, Visibility::Private);
                assert_eq!(c.methods[1].visibility, Visibility::Public);
            }
            s => panic!("unexpected statement {:?}", s),
        }
    }

    #[test]
    fn constructor_parameters_use_primitive_table() {
        assert_eq!(
            parse_err("class A { A(p: Point) { } }"),
            ParseError::UnknownType { location: Position(1, 16), name: "Point".to_string() });
    }

    #[test]
    fn last_constructor_wins() {
        let program = parse_str("class A { x: int; A() { x = 1; } A(v: int) { x = v; } }");
        match &program[0] {
            Stmt::Class(c) => {
                let ctor = c.constructor.as_ref().unwrap();
                assert_eq!(ctor.params(), &[Param::new("v", int_type())]);
                assert_eq!(ctor.body, vec![
                    Stmt::Assign { target: Expr::var("x"), expr: Expr::var("v") },
                ]);
            }
            s => panic!("unexpected statement {:?}", s),
        }
    }

    #[test]
    fn duplicate_constructor_can_be_rejected() {
        let toks = lex("class A { A() { } A() { } }").unwrap();
        let options = ParseOptions { duplicate_constructors: DuplicateConstructors::Reject };
        assert_eq!(
            parse_with(&toks, options, &mut Recorder::default()),
            Err(ParseError::DuplicateConstructor {
                location: Position(1, 19),
                class: "A".to_string(),
            }));
    }

    #[test]
    fn dispatch_disambiguation() {
        assert_eq!(parse_str("obj.method(1, x);"), vec![
            Stmt::MethodCall {
                receiver: "obj".to_string(),
                method: "method".to_string(),
                args: vec![Expr::int(1), Expr::var("x")],
            },
        ]);

        assert_eq!(parse_str("obj.field = 2; f(3);"), vec![
            Stmt::Assign { target: Expr::field(Expr::var("obj"), "field"), expr: Expr::int(2) },
            Stmt::Call("f".to_string(), vec![Expr::int(3)]),
        ]);

        assert_eq!(parse_err("obj.field;"), ParseError::Syntax {
            location: Position(1, 10),
            expected: "`=`".to_string(),
            found: "`;`".to_string(),
        });
    }

    #[test]
    fn expression_forms() {
        assert_eq!(parse_str("var p = new Point(1, 2); var q = p.pos.x; var r = p.norm() * 2; var s = max(a, b);"), vec![
            define("p", Expr::new_object("Point", vec![Expr::int(1), Expr::int(2)])),
            define("q", Expr::field(Expr::field(Expr::var("p"), "pos"), "x")),
            define("r", Expr::mul(
                Expr::MethodCall(Box::new(Expr::var("p")), "norm".to_string(), vec![]),
                Expr::int(2))),
            define("s", Expr::call("max", vec![Expr::var("a"), Expr::var("b")])),
        ]);
    }

    #[test]
    fn warnings_skip_tokens() {
        let toks = lex("; 42 x = 1;").unwrap();
        let mut recorder = Recorder::default();
        let parsed = parse_with(&toks, ParseOptions::default(), &mut recorder).unwrap();
        assert_eq!(parsed.program, vec![
            Stmt::Assign { target: Expr::var("x"), expr: Expr::int(1) },
        ]);
        assert_eq!(parsed.warnings, vec![
            Warning { location: Position(1, 1), token: ";".to_string() },
            Warning { location: Position(1, 3), token: "42".to_string() },
        ]);
        assert_eq!(recorder.0, vec![
            "[W] 1:1 unexpected token: ;".to_string(),
            "[W] 1:3 unexpected token: 42".to_string(),
        ]);
    }

    #[test]
    fn parse_errors() {
        assert_eq!(parse_err("var x = ;"), ParseError::Syntax {
            location: Position(1, 9),
            expected: "expression".to_string(),
            found: "`;`".to_string(),
        });

        assert_eq!(parse_err("func f() { print 1;"), ParseError::Syntax {
            location: Position(1, 20),
            expected: "`}`".to_string(),
            found: "end of input".to_string(),
        });

        assert_eq!(parse_err("var x = 99999999999999999999;"), ParseError::Syntax {
            location: Position(1, 9),
            expected: "integer literal within 64 bits".to_string(),
            found: "99999999999999999999".to_string(),
        });
    }
}
