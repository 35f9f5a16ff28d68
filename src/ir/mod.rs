//! A small typed IR with structured control flow.
//!
//! This is the concrete instruction builder and module the emitters target.
//! Functions hold a tree of instructions (loops and branches own their
//! bodies), values are numbered per function, and the module's function table
//! doubles as the outlined-kernel cache: a function name is a cache key, and
//! "already emitted" is a name lookup.

pub mod builder;
pub mod interp;

use crate::common::Dtype;
use indexmap::IndexMap;

/// A function-local SSA-ish value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Bool,
    I32,
    I64,
    Scalar(Dtype),
    Vector(Dtype, u32),
    Ptr(Dtype),
    /// An opaque pointer (e.g. the runtime's run-options argument).
    BytePtr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpPred {
    Eq,
    Ne,
    Slt,
    Sle,
}

/// Element arithmetic, scalar or lane-wise vector, dispatched on dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Imm {
    Bool(bool),
    I32(i32),
    I64(i64),
    Zero(Dtype),
    ZeroVector(Dtype, u32),
}

#[derive(Debug, Clone)]
pub enum Inst {
    Const {
        out: Value,
        imm: Imm,
    },
    IntBin {
        out: Value,
        op: IntOp,
        lhs: Value,
        rhs: Value,
    },
    Cmp {
        out: Value,
        pred: CmpPred,
        lhs: Value,
        rhs: Value,
    },
    Arith {
        out: Value,
        op: ArithOp,
        lhs: Value,
        rhs: Value,
    },
    /// Broadcasts a scalar into every lane of a vector.
    Splat {
        out: Value,
        scalar: Value,
        lanes: u32,
    },
    LoadScalar {
        out: Value,
        ptr: Value,
        index: Value,
    },
    LoadVector {
        out: Value,
        ptr: Value,
        index: Value,
        lanes: u32,
    },
    StoreScalar {
        value: Value,
        ptr: Value,
        index: Value,
    },
    StoreVector {
        value: Value,
        ptr: Value,
        index: Value,
    },
    /// Pointer arithmetic in elements of the pointee type.
    PtrOffset {
        out: Value,
        ptr: Value,
        offset: Value,
    },
    /// Two-source lane shuffle; mask indices address `a`'s lanes then `b`'s.
    Shuffle {
        out: Value,
        a: Value,
        b: Value,
        mask: Vec<u32>,
    },
    ExtractLane {
        out: Value,
        vec: Value,
        lane: u32,
    },
    Real {
        out: Value,
        value: Value,
    },
    Imag {
        out: Value,
        value: Value,
    },
    MakeComplex {
        out: Value,
        re: Value,
        im: Value,
    },
    /// A single stack slot of the given scalar or vector type.
    Alloca {
        out: Value,
        ty: Type,
    },
    Memset {
        ptr: Value,
        byte: u8,
        size_bytes: u64,
        align: u32,
    },
    Call {
        callee: String,
        args: Vec<Value>,
    },
    For {
        name: String,
        indvar: Value,
        start: Value,
        end: Value,
        step: Value,
        body: Vec<Inst>,
    },
    If {
        cond: Value,
        then_body: Vec<Inst>,
        else_body: Vec<Inst>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FnAttrs {
    pub fast_math: bool,
    pub optimize_for_size: bool,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<Type>,
    pub attrs: FnAttrs,
    pub(crate) value_types: Vec<Type>,
    pub body: Vec<Inst>,
}

impl Function {
    pub fn value_type(&self, v: Value) -> Type {
        self.value_types[v.0 as usize]
    }

    /// Visits every instruction in the function, including loop and branch
    /// bodies, in emission order.
    pub fn for_each_inst(&self, f: &mut dyn FnMut(&Inst)) {
        fn walk(body: &[Inst], f: &mut dyn FnMut(&Inst)) {
            for inst in body {
                f(inst);
                match inst {
                    Inst::For { body, .. } => walk(body, f),
                    Inst::If {
                        then_body,
                        else_body,
                        ..
                    } => {
                        walk(then_body, f);
                        walk(else_body, f);
                    }
                    _ => (),
                }
            }
        }
        walk(&self.body, f)
    }
}

#[derive(Debug, Default)]
pub struct Module {
    functions: IndexMap<String, Function>,
}

impl Module {
    pub fn new() -> Module {
        Module::default()
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn get_function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    pub(crate) fn insert_function(&mut self, func: Function) {
        let prior = self.functions.insert(func.name.clone(), func);
        assert!(prior.is_none(), "function emitted twice");
    }

    /// Counts call sites referencing `name` across every function.
    pub fn count_calls_to(&self, name: &str) -> usize {
        let mut count = 0;
        for func in self.functions() {
            func.for_each_inst(&mut |inst| {
                if let Inst::Call { callee, .. } = inst {
                    if callee == name {
                        count += 1;
                    }
                }
            });
        }
        count
    }
}
