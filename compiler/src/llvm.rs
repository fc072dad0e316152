use crate::ast::BinOp;
use crate::ir::{Block, BlockExit, ClassType, Declaration, Function, IrType, Module, Op, Value};


fn value(v: &Value) -> String {
    match v {
        Value::Reg(r) => format!("%t{}", r),
        Value::Int(i) => i.to_string(),
        // LLVM accepts any double as its 64-bit pattern in hex.
        Value::Float(f) => format!("0x{:016X}", f.to_bits()),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Global(name) => format!("@{}", name),
    }
}

fn typed_list(items: &[(IrType, Value)]) -> String {
    items.iter()
        .map(|(ty, v)| format!("{} {}", ty, value(v)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn type_list(types: &[IrType]) -> String {
    types.iter().map(|ty| ty.name()).collect::<Vec<_>>().join(", ")
}

fn string_constant(index: usize, s: &str, out: &mut String) {
    let mut escaped = String::new();
    for b in s.bytes() {
        if b == b'"' || b == b'\\' || !(0x20..0x7f).contains(&b) {
            escaped.push_str(&format!("\\{:02X}", b));
        } else {
            escaped.push(b as char);
        }
    }
    out.push_str(&format!(
        "@.str.{} = private unnamed_addr constant [{} x i8] c\"{}\\00\"\n",
        index, s.len() + 1, escaped));
}

fn arithmetic(operator: BinOp, ty: IrType) -> &'static str {
    let float = ty == IrType::Double;
    match (operator, float) {
        (BinOp::Add, false) => "add",
        (BinOp::Sub, false) => "sub",
        (BinOp::Mul, false) => "mul",
        (BinOp::Div, false) => "sdiv",
        (BinOp::Add, true) => "fadd",
        (BinOp::Sub, true) => "fsub",
        (BinOp::Mul, true) => "fmul",
        (BinOp::Div, true) => "fdiv",
        _ => "unreachable",
    }
}

fn comparison(operator: BinOp, ty: IrType) -> &'static str {
    let float = ty == IrType::Double;
    match (operator, float) {
        (BinOp::Gt, false) => "icmp sgt",
        (BinOp::Ge, false) => "icmp sge",
        (BinOp::Lt, false) => "icmp slt",
        (BinOp::Le, false) => "icmp sle",
        (BinOp::Eq, false) => "icmp eq",
        (BinOp::Ne, false) => "icmp ne",
        (BinOp::Gt, true) => "fcmp ogt",
        (BinOp::Ge, true) => "fcmp oge",
        (BinOp::Lt, true) => "fcmp olt",
        (BinOp::Le, true) => "fcmp ole",
        (BinOp::Eq, true) => "fcmp oeq",
        (BinOp::Ne, true) => "fcmp one",
        _ => "unreachable",
    }
}

fn emit_op(op: &Op, out: &mut String) {
    match op {
        Op::Binary { dst, ty, operator, left, right } => {
            out.push_str(&format!(
                "  %t{} = {} {} {}, {}\n",
                dst, arithmetic(*operator, *ty), ty, value(left), value(right)));
        }
        Op::Compare { dst, ty, operator, left, right } => {
            out.push_str(&format!(
                "  %t{} = {} {} {}, {}\n",
                dst, comparison(*operator, *ty), ty, value(left), value(right)));
        }
        Op::Not { dst, value: v } => {
            out.push_str(&format!("  %t{} = xor i1 {}, true\n", dst, value(v)));
        }
        Op::Phi { dst, ty, incoming } => {
            let incoming = incoming.iter()
                .map(|(v, block)| format!("[{}, %B{}]", value(v), block))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("  %t{} = phi {} {}\n", dst, ty, incoming));
        }
        Op::Alloca { dst, ty } => {
            out.push_str(&format!("  %t{} = alloca {}\n", dst, ty));
        }
        Op::Load { dst, ty, ptr } => {
            out.push_str(&format!("  %t{} = load {}, ptr {}\n", dst, ty, value(ptr)));
        }
        Op::Store { ty, value: v, ptr } => {
            out.push_str(&format!("  store {} {}, ptr {}\n", ty, value(v), value(ptr)));
        }
        Op::FieldPtr { dst, class, object, index } => {
            out.push_str(&format!(
                "  %t{} = getelementptr inbounds %{}, ptr {}, i32 0, i32 {}\n",
                dst, class, value(object), index));
        }
        Op::SizeOf { dst, class } => {
            out.push_str(&format!(
                "  %t{}.end = getelementptr %{}, ptr null, i32 1\n", dst, class));
            out.push_str(&format!(
                "  %t{} = ptrtoint ptr %t{}.end to i64\n", dst, dst));
        }
        Op::Call { dst, ret, function, args } => {
            let assign = match dst {
                Some(dst) => format!("%t{} = ", dst),
                None => String::new(),
            };
            out.push_str(&format!(
                "  {}call {} @{}({})\n", assign, ret, function, typed_list(args)));
        }
    }
}

fn emit_exit(exit: &Option<BlockExit>, out: &mut String) {
    match exit {
        Some(BlockExit::Return(None)) => out.push_str("  ret void\n"),
        Some(BlockExit::Return(Some((ty, v)))) => {
            out.push_str(&format!("  ret {} {}\n", ty, value(v)));
        }
        Some(BlockExit::Jump(block_id)) => {
            out.push_str(&format!("  br label %B{}\n", block_id));
        }
        Some(BlockExit::Branch(cond, positive, negative)) => {
            out.push_str(&format!(
                "  br i1 {}, label %B{}, label %B{}\n", value(cond), positive, negative));
        }
        Some(BlockExit::Unreachable) | None => out.push_str("  unreachable\n"),
    }
}

fn emit_blocks(blocks: &[Block], out: &mut String) {
    for (block_id, block) in blocks.iter().enumerate() {
        out.push_str(&format!("B{}:\n", block_id));
        for op in &block.ops {
            emit_op(op, out);
        }
        emit_exit(&block.exit, out);
    }
}

fn emit_function_ir(function: &Function, out: &mut String) {
    let params = function.params.iter()
        .enumerate()
        .map(|(i, ty)| format!("{} %t{}", ty, i))
        .collect::<Vec<_>>()
        .join(", ");
    out.push_str(&format!("define {} @{}({}) {{\n", function.ret, function.name, params));
    emit_blocks(&function.blocks, out);
    out.push_str("}\n");
}

fn emit_class_type(class: &ClassType, out: &mut String) {
    out.push_str(&format!("%{} = type {{ {} }}\n", class.name, type_list(&class.fields)));
}

/// `i1` parameters are zero-extended, as C callees expect of `bool`.
fn declaration_params(types: &[IrType]) -> String {
    types.iter()
        .map(|ty| match ty {
            IrType::I1 => "i1 zeroext",
            ty => ty.name(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn emit_declaration(declaration: &Declaration, out: &mut String) {
    out.push_str(&format!(
        "declare {} @{}({})\n",
        declaration.ret, declaration.name, declaration_params(&declaration.params)));
}

pub fn emit_ir(module: &Module) -> String {
    let mut out = String::new();
    out.push_str(&format!("; ModuleID = '{}'\n", module.name));
    out.push_str(&format!("source_filename = \"{}\"\n", module.name));

    if !module.classes.is_empty() {
        out.push('\n');
        for class in &module.classes {
            emit_class_type(class, &mut out);
        }
    }

    if !module.strings.is_empty() {
        out.push('\n');
        for (index, s) in module.strings.iter().enumerate() {
            string_constant(index, s, &mut out);
        }
    }

    if !module.declarations.is_empty() {
        out.push('\n');
        for declaration in &module.declarations {
            emit_declaration(declaration, &mut out);
        }
    }

    for function in &module.functions {
        out.push('\n');
        emit_function_ir(function, &mut out);
    }

    out
}
