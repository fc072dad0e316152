use crate::types::Primitive;


#[derive(Debug, PartialEq, Copy, Clone)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, PartialEq, Clone)]
pub enum TypeName {
    Primitive(Primitive),
    Class(String),
}

#[derive(Debug, PartialEq, Clone)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    /// Nanoseconds.
    Duration(i64),
    Var(String),
    Field(Box<Expr>, String),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Call(String, Vec<Expr>),
    MethodCall(Box<Expr>, String, Vec<Expr>),
    New(String, Vec<Expr>),
}

#[derive(Debug, PartialEq, Copy, Clone)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Param {
    pub name: String,
    pub ty: TypeName,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Signature {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: TypeName,
}

/// Free functions, methods and constructors share this shape.
#[derive(Debug, PartialEq, Clone)]
pub struct Function {
    pub signature: Signature,
    pub body: Vec<Stmt>,
    pub visibility: Visibility,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Field {
    pub name: String,
    pub ty: TypeName,
    pub visibility: Visibility,
    pub index: usize,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Class {
    pub name: String,
    pub fields: Vec<Field>,
    pub methods: Vec<Function>,
    pub constructor: Option<Function>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Stmt {
    Define { name: String, ty: Option<TypeName>, expr: Expr },
    Assign { target: Expr, expr: Expr },
    If { cond: Expr, then: Vec<Stmt>, otherwise: Vec<Stmt> },
    While { cond: Expr, body: Vec<Stmt> },
    For {
        init_name: String,
        init_ty: Option<TypeName>,
        init_expr: Expr,
        cond: Expr,
        step_target: Expr,
        step_expr: Expr,
        body: Vec<Stmt>,
    },
    Return(Option<Expr>),
    Print(Expr),
    Sleep(Expr),
    FuncDecl(Function),
    Call(String, Vec<Expr>),
    MethodCall { receiver: String, method: String, args: Vec<Expr> },
    Class(Class),
    Extern(Signature),
    Import(String),
}

pub type Program = Vec<Stmt>;

impl Expr {
    pub fn int(i: i64) -> Expr {
        Expr::Int(i)
    }
    pub fn var(name: &str) -> Expr {
        Expr::Var(name.to_string())
    }
    pub fn binop(op: BinOp, l: Expr, r: Expr) -> Expr {
        Expr::BinOp(op, Box::new(l), Box::new(r))
    }
    pub fn add(l: Expr, r: Expr) -> Expr {
        Expr::binop(BinOp::Add, l, r)
    }
    pub fn sub(l: Expr, r: Expr) -> Expr {
        Expr::binop(BinOp::Sub, l, r)
    }
    pub fn mul(l: Expr, r: Expr) -> Expr {
        Expr::binop(BinOp::Mul, l, r)
    }
    pub fn field(receiver: Expr, name: &str) -> Expr {
        Expr::Field(Box::new(receiver), name.to_string())
    }
    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call(name.to_string(), args)
    }
    pub fn new_object(class: &str, args: Vec<Expr>) -> Expr {
        Expr::New(class.to_string(), args)
    }
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div)
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

impl Param {
    pub fn new(name: &str, ty: TypeName) -> Param {
        Param { name: name.to_string(), ty }
    }
}

impl Function {
    pub fn name(&self) -> &str {
        &self.signature.name
    }
    pub fn params(&self) -> &[Param] {
        &self.signature.params
    }
    pub fn return_type(&self) -> &TypeName {
        &self.signature.return_type
    }
}

impl Class {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}
