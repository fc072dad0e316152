use std::fmt;

use crate::ast::BinOp;


pub type Register = u64;
pub type BlockId = usize;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum IrType {
    I1,
    I32,
    I64,
    Double,
    Ptr,
    Void,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Value {
    Reg(Register),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
    /// A module-level symbol such as a string constant.
    Global(String),
}

#[derive(Debug, PartialEq, Clone)]
pub enum Op {
    Binary { dst: Register, ty: IrType, operator: BinOp, left: Value, right: Value },
    Compare { dst: Register, ty: IrType, operator: BinOp, left: Value, right: Value },
    Not { dst: Register, value: Value },
    Phi { dst: Register, ty: IrType, incoming: Vec<(Value, BlockId)> },
    Alloca { dst: Register, ty: IrType },
    Load { dst: Register, ty: IrType, ptr: Value },
    Store { ty: IrType, value: Value, ptr: Value },
    FieldPtr { dst: Register, class: String, object: Value, index: usize },
    SizeOf { dst: Register, class: String },
    Call { dst: Option<Register>, ret: IrType, function: String, args: Vec<(IrType, Value)> },
}

#[derive(Debug, PartialEq, Clone)]
pub enum BlockExit {
    Return(Option<(IrType, Value)>),
    Jump(BlockId),
    Branch(Value, BlockId, BlockId),
    Unreachable,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Block {
    pub ops: Vec<Op>,
    pub exit: Option<BlockExit>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<IrType>,
    pub ret: IrType,
    pub blocks: Vec<Block>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Declaration {
    pub name: String,
    pub params: Vec<IrType>,
    pub ret: IrType,
}

#[derive(Debug, PartialEq, Clone)]
pub struct ClassType {
    pub name: String,
    pub fields: Vec<IrType>,
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct Module {
    pub name: String,
    pub classes: Vec<ClassType>,
    pub strings: Vec<String>,
    pub declarations: Vec<Declaration>,
    pub functions: Vec<Function>,
    pub warnings: Vec<String>,
}

impl IrType {
    pub fn name(&self) -> &'static str {
        match self {
            IrType::I1 => "i1",
            IrType::I32 => "i32",
            IrType::I64 => "i64",
            IrType::Double => "double",
            IrType::Ptr => "ptr",
            IrType::Void => "void",
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Module {
    pub fn new(name: &str) -> Module {
        Module { name: name.to_string(), ..Module::default() }
    }

    /// Returns the global holding `s`, adding it on first use.
    pub fn intern_string(&mut self, s: &str) -> Value {
        let index = match self.strings.iter().position(|existing| existing == s) {
            Some(i) => i,
            None => {
                self.strings.push(s.to_string());
                self.strings.len() - 1
            }
        };
        Value::Global(format!(".str.{}", index))
    }

    /// Declarations keep the order in which they were first needed.
    pub fn declare(&mut self, declaration: Declaration) {
        if !self.declarations.iter().any(|d| d.name == declaration.name) {
            self.declarations.push(declaration);
        }
    }
}

impl Block {
    fn new() -> Block {
        Block {
            ops: Vec::new(),
            exit: None,
        }
    }
}

/// Builds the blocks of a single function. New blocks are appended after
/// the current one, and the last block is always the one receiving ops.
pub struct FunctionEnv {
    register_counter: u64,
    allocas: usize,
    blocks: Vec<Block>,
}

impl FunctionEnv {
    /// Registers `0..arity` hold the arguments.
    pub fn new(arity: usize) -> FunctionEnv {
        FunctionEnv {
            register_counter: arity as u64,
            allocas: 0,
            blocks: vec![Block::new()],
        }
    }

    pub fn fresh_register(&mut self) -> Register {
        let c = self.register_counter;
        self.register_counter += 1;
        c
    }

    pub fn current_block_id(&self) -> BlockId {
        self.blocks.len() - 1
    }

    /// Starts a new block without linking it to the current one.
    pub fn split_block(&mut self) -> BlockId {
        self.blocks.push(Block::new());
        self.current_block_id()
    }

    pub fn push_op(&mut self, op: Op) {
        let current = self.current_block_id();
        self.blocks[current].ops.push(op);
    }

    /// Stack slots all live at the top of the entry block.
    pub fn alloca(&mut self, ty: IrType) -> Register {
        let dst = self.fresh_register();
        self.blocks[0].ops.insert(self.allocas, Op::Alloca { dst, ty });
        self.allocas += 1;
        dst
    }

    /// Sets the exit of `block` unless it already has one.
    pub fn seal(&mut self, block: BlockId, exit: BlockExit) {
        let block = &mut self.blocks[block];
        if block.exit.is_none() {
            block.exit = Some(exit);
        }
    }

    pub fn finish(mut self, fallthrough: BlockExit) -> Vec<Block> {
        for block in self.blocks.iter_mut() {
            if block.exit.is_none() {
                block.exit = Some(fallthrough.clone());
            }
        }
        self.blocks
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn allocas_are_hoisted() {
        let mut env = FunctionEnv::new(1);
        let a = env.alloca(IrType::I64);
        env.push_op(Op::Store { ty: IrType::I64, value: Value::Reg(0), ptr: Value::Reg(a) });
        env.split_block();
        let b = env.alloca(IrType::I1);
        let blocks = env.finish(BlockExit::Return(None));

        assert_eq!(blocks, vec![
            Block {
                ops: vec![
                    Op::Alloca { dst: 1, ty: IrType::I64 },
                    Op::Alloca { dst: 2, ty: IrType::I1 },
                    Op::Store { ty: IrType::I64, value: Value::Reg(0), ptr: Value::Reg(1) },
                ],
                exit: Some(BlockExit::Return(None)),
            },
            Block {
                ops: vec![],
                exit: Some(BlockExit::Return(None)),
            },
        ]);
        assert_eq!((a, b), (1, 2));
    }

    #[test]
    fn sealed_blocks_keep_their_exit() {
        let mut env = FunctionEnv::new(0);
        env.seal(0, BlockExit::Unreachable);
        env.seal(0, BlockExit::Jump(1));
        assert_eq!(env.finish(BlockExit::Return(None))[0].exit, Some(BlockExit::Unreachable));
    }

    #[test]
    fn strings_and_declarations_are_deduplicated() {
        let mut module = Module::new("m");
        assert_eq!(module.intern_string("a"), Value::Global(".str.0".to_string()));
        assert_eq!(module.intern_string("b"), Value::Global(".str.1".to_string()));
        assert_eq!(module.intern_string("a"), Value::Global(".str.0".to_string()));

        let decl = Declaration { name: "rt_sleep".to_string(), params: vec![IrType::I64], ret: IrType::Void };
        module.declare(decl.clone());
        module.declare(decl);
        assert_eq!(module.declarations.len(), 1);
    }
}
