//! Renders an AST back to source text that parses to the same tree.

use crate::ast::*;
use crate::types::Primitive;


fn type_name(ty: &TypeName) -> &str {
    match ty {
        TypeName::Primitive(p) => p.name(),
        TypeName::Class(name) => name,
    }
}

fn quote(s: &str) -> String {
    let mut out = String::from("\"");
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn float(f: f64) -> String {
    let s = f.to_string();
    if s.contains('.') { s } else { format!("{}.0", s) }
}

fn arguments(args: &[Expr]) -> String {
    args.iter().map(expression).collect::<Vec<_>>().join(", ")
}

pub fn expression(e: &Expr) -> String {
    match e {
        Expr::Int(i) => i.to_string(),
        Expr::Float(f) => float(*f),
        Expr::Bool(b) => b.to_string(),
        Expr::Str(s) => quote(s),
        Expr::Duration(ns) => format!("{}ns", ns),
        Expr::Var(name) => name.clone(),
        Expr::Field(receiver, name) => format!("{}.{}", expression(receiver), name),
        Expr::BinOp(op, l, r) => format!("({} {} {})", expression(l), op.symbol(), expression(r)),
        Expr::Not(e) => format!("!{}", expression(e)),
        Expr::Call(name, args) => format!("{}({})", name, arguments(args)),
        Expr::MethodCall(receiver, method, args) => {
            format!("{}.{}({})", expression(receiver), method, arguments(args))
        }
        Expr::New(class, args) => format!("new {}({})", class, arguments(args)),
    }
}

fn params(params: &[Param]) -> String {
    params.iter()
        .map(|p| format!("{}: {}", p.name, type_name(&p.ty)))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn signature(sig: &Signature) -> String {
    let head = format!("{}({})", sig.name, params(&sig.params));
    match &sig.return_type {
        TypeName::Primitive(Primitive::Void) => head,
        ty => format!("{}: {}", head, type_name(ty)),
    }
}

struct Printer {
    out: String,
    depth: usize,
}

impl Printer {
    fn line(&mut self, text: &str) {
        for _ in 0..self.depth {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn block(&mut self, opening: &str, body: &[Stmt]) {
        self.line(&format!("{} {{", opening));
        self.depth += 1;
        for stmt in body {
            self.statement(stmt);
        }
        self.depth -= 1;
    }

    fn function(&mut self, f: &Function) {
        let prefix = match f.visibility {
            Visibility::Public => "func",
            Visibility::Private => "private func",
        };
        self.block(&format!("{} {}", prefix, signature(&f.signature)), &f.body);
        self.line("}");
    }

    fn class(&mut self, c: &Class) {
        self.line(&format!("class {} {{", c.name));
        self.depth += 1;
        let mut fields: Vec<&Field> = c.fields.iter().collect();
        fields.sort_by_key(|f| f.index);
        for f in fields {
            let prefix = match f.visibility {
                Visibility::Public => "",
                Visibility::Private => "private ",
            };
            self.line(&format!("{}{}: {};", prefix, f.name, type_name(&f.ty)));
        }
        if let Some(ctor) = &c.constructor {
            self.block(&format!("{}({})", c.name, params(ctor.params())), &ctor.body);
            self.line("}");
        }
        for method in &c.methods {
            self.function(method);
        }
        self.depth -= 1;
        self.line("}");
    }

    fn statement(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Define { name, ty, expr } => {
                let annotation = match ty {
                    Some(ty) => format!(": {}", type_name(ty)),
                    None => String::new(),
                };
                self.line(&format!("var {}{} = {};", name, annotation, expression(expr)));
            }
            Stmt::Assign { target, expr } => {
                self.line(&format!("{} = {};", expression(target), expression(expr)));
            }
            Stmt::If { cond, then, otherwise } => {
                self.block(&format!("if {}", expression(cond)), then);
                if otherwise.is_empty() {
                    self.line("}");
                } else {
                    self.block("} else", otherwise);
                    self.line("}");
                }
            }
            Stmt::While { cond, body } => {
                self.block(&format!("while {}", expression(cond)), body);
                self.line("}");
            }
            Stmt::For { init_name, init_ty, init_expr, cond, step_target, step_expr, body } => {
                let annotation = match init_ty {
                    Some(ty) => format!(": {}", type_name(ty)),
                    None => String::new(),
                };
                self.block(&format!(
                    "for (var {}{} = {}; {}; {} = {})",
                    init_name, annotation, expression(init_expr), expression(cond),
                    expression(step_target), expression(step_expr)), body);
                self.line("}");
            }
            Stmt::Return(None) => self.line("return;"),
            Stmt::Return(Some(e)) => self.line(&format!("return {};", expression(e))),
            Stmt::Print(e) => self.line(&format!("print {};", expression(e))),
            Stmt::Sleep(e) => self.line(&format!("sleep {};", expression(e))),
            Stmt::FuncDecl(f) => self.function(f),
            Stmt::Call(name, args) => self.line(&format!("{}({});", name, arguments(args))),
            Stmt::MethodCall { receiver, method, args } => {
                self.line(&format!("{}.{}({});", receiver, method, arguments(args)));
            }
            Stmt::Class(c) => self.class(c),
            Stmt::Extern(sig) => self.line(&format!("extern func {};", signature(sig))),
            Stmt::Import(path) => self.line(&format!("import {};", quote(path))),
        }
    }
}

pub fn statement(stmt: &Stmt) -> String {
    let mut printer = Printer { out: String::new(), depth: 0 };
    printer.statement(stmt);
    printer.out
}

pub fn program(program: &Program) -> String {
    let mut printer = Printer { out: String::new(), depth: 0 };
    for stmt in program {
        printer.statement(stmt);
    }
    printer.out
}


#[cfg(test)]
mod test {
    use crate::lexer::lex;
    use crate::parser::parse;
    use crate::ast::*;
    use super::{expression, program};

    fn parse_str(s: &str) -> Program {
        let toks = lex(s).unwrap();
        parse(&toks).unwrap().program
    }

    #[test]
    fn expressions() {
        assert_eq!(
            expression(&Expr::add(Expr::int(1), Expr::mul(Expr::var("x"), Expr::Float(2.0)))),
            "(1 + (x * 2.0))");
        assert_eq!(
            expression(&Expr::Not(Box::new(Expr::field(Expr::var("p"), "ok")))),
            "!p.ok");
        assert_eq!(expression(&Expr::Duration(1_500)), "1500ns");
        assert_eq!(expression(&Expr::Str("a\"b\n".to_string())), r#""a\"b\n""#);
        assert_eq!(
            expression(&Expr::new_object("P", vec![Expr::int(-3), Expr::call("f", vec![])])),
            "new P(-3, f())");
    }

    #[test]
    fn reparses_to_the_same_tree() {
        let source = r#"
            import "./lib.cffc";
            extern func puts(s: string): int;

            class Counter {
                private count: int;
                Counter(start: int) {
                    count = start;
                }
                func bump(by: int): int {
                    count = count + by;
                    return count;
                }
                label: string;
                private func reset() {
                    this.count = 0;
                }
            }

            func fib(n: int): int {
                if n < 2 {
                    return n;
                } else if n == 2 {
                    return 1;
                }
                return fib(n - 1) + fib(n - 2);
            }

            var c: Counter = new Counter(10);
            c.bump(2);
            var ok = !(1 < 2 && 3 > 2) || false;
            var total = 0;
            for (var i: int = 0; i < 10; i = i + 1) {
                total = total + i * 2 / 1;
            }
            while total > 0 {
                total = total - -1;
            }
            var wait = 1s + 250ms;
            sleep wait;
            print "done\t\"ok\"";
            print 3.25;
            print c.label;
            print fib(10);
        "#;

        let first = parse_str(source);
        let printed = program(&first);
        let second = parse_str(&printed);
        assert_eq!(first, second);
        assert_eq!(program(&second), printed);
    }
}
