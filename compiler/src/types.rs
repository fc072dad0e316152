use std::fmt;

use crate::ir::IrType;


#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub enum Primitive {
    Int,
    Float64,
    Bool,
    String,
    Duration,
    Void,
}

/// A resolved type. Class types are only constructed once the class is known.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum Type {
    Int,
    Float64,
    Bool,
    String,
    Duration,
    Void,
    Class(String),
}

impl Primitive {
    pub fn from_name(name: &str) -> Option<Primitive> {
        let p = match name {
            "int" => Primitive::Int,
            "float64" => Primitive::Float64,
            "bool" => Primitive::Bool,
            "string" => Primitive::String,
            "duration" => Primitive::Duration,
            "void" => Primitive::Void,
            _ => return None,
        };
        Some(p)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Primitive::Int => "int",
            Primitive::Float64 => "float64",
            Primitive::Bool => "bool",
            Primitive::String => "string",
            Primitive::Duration => "duration",
            Primitive::Void => "void",
        }
    }
}

impl From<Primitive> for Type {
    fn from(p: Primitive) -> Type {
        match p {
            Primitive::Int => Type::Int,
            Primitive::Float64 => Type::Float64,
            Primitive::Bool => Type::Bool,
            Primitive::String => Type::String,
            Primitive::Duration => Type::Duration,
            Primitive::Void => Type::Void,
        }
    }
}

impl Type {
    pub fn ir(&self) -> IrType {
        match self {
            Type::Int | Type::Duration => IrType::I64,
            Type::Float64 => IrType::Double,
            Type::Bool => IrType::I1,
            Type::String | Type::Class(_) => IrType::Ptr,
            Type::Void => IrType::Void,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float64 | Type::Duration)
    }

    pub fn class_name(&self) -> Option<&str> {
        match self {
            Type::Class(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Float64 => write!(f, "float64"),
            Type::Bool => write!(f, "bool"),
            Type::String => write!(f, "string"),
            Type::Duration => write!(f, "duration"),
            Type::Void => write!(f, "void"),
            Type::Class(name) => write!(f, "{}", name),
        }
    }
}
