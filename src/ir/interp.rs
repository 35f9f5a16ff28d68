//! Executes emitted functions against byte buffers.
//!
//! Buffers hold little-endian element encodings; pointers are (buffer,
//! byte-offset) pairs carrying their pointee type. F16 arithmetic widens to
//! f32 per operation and truncates back, matching how half-precision is
//! lowered on current CPU targets. Integer element arithmetic wraps.

use super::{ArithOp, CmpPred, Imm, Inst, IntOp, Module, Type, Value};
use crate::common::Dtype;
use half::f16;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarVal {
    F16(f16),
    F32(f32),
    F64(f64),
    C64(f32, f32),
    S32(i32),
    S64(i64),
}

impl ScalarVal {
    pub fn dtype(&self) -> Dtype {
        match self {
            ScalarVal::F16(_) => Dtype::F16,
            ScalarVal::F32(_) => Dtype::F32,
            ScalarVal::F64(_) => Dtype::F64,
            ScalarVal::C64(..) => Dtype::C64,
            ScalarVal::S32(_) => Dtype::S32,
            ScalarVal::S64(_) => Dtype::S64,
        }
    }

    pub fn zero(dtype: Dtype) -> ScalarVal {
        match dtype {
            Dtype::F16 => ScalarVal::F16(f16::ZERO),
            Dtype::F32 => ScalarVal::F32(0.0),
            Dtype::F64 => ScalarVal::F64(0.0),
            Dtype::C64 => ScalarVal::C64(0.0, 0.0),
            Dtype::S32 => ScalarVal::S32(0),
            Dtype::S64 => ScalarVal::S64(0),
            Dtype::U8 | Dtype::S8 => panic!("no emitted-code representation for {dtype}"),
        }
    }

    /// The value as f64; panics for complex.
    pub fn to_f64(self) -> f64 {
        match self {
            ScalarVal::F16(v) => v.to_f64(),
            ScalarVal::F32(v) => f64::from(v),
            ScalarVal::F64(v) => v,
            ScalarVal::S32(v) => f64::from(v),
            ScalarVal::S64(v) => v as f64,
            ScalarVal::C64(..) => panic!("complex value has no single f64 form"),
        }
    }

    pub fn from_f64(dtype: Dtype, v: f64) -> ScalarVal {
        match dtype {
            Dtype::F16 => ScalarVal::F16(f16::from_f64(v)),
            Dtype::F32 => ScalarVal::F32(v as f32),
            Dtype::F64 => ScalarVal::F64(v),
            _ => panic!("from_f64 is only defined for floating-point types"),
        }
    }
}

fn scalar_bin(op: ArithOp, a: ScalarVal, b: ScalarVal) -> ScalarVal {
    match (a, b) {
        (ScalarVal::F16(x), ScalarVal::F16(y)) => {
            let (x, y) = (x.to_f32(), y.to_f32());
            ScalarVal::F16(f16::from_f32(match op {
                ArithOp::Add => x + y,
                ArithOp::Sub => x - y,
                ArithOp::Mul => x * y,
            }))
        }
        (ScalarVal::F32(x), ScalarVal::F32(y)) => ScalarVal::F32(match op {
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
        }),
        (ScalarVal::F64(x), ScalarVal::F64(y)) => ScalarVal::F64(match op {
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
        }),
        (ScalarVal::S32(x), ScalarVal::S32(y)) => ScalarVal::S32(match op {
            ArithOp::Add => x.wrapping_add(y),
            ArithOp::Sub => x.wrapping_sub(y),
            ArithOp::Mul => x.wrapping_mul(y),
        }),
        (ScalarVal::S64(x), ScalarVal::S64(y)) => ScalarVal::S64(match op {
            ArithOp::Add => x.wrapping_add(y),
            ArithOp::Sub => x.wrapping_sub(y),
            ArithOp::Mul => x.wrapping_mul(y),
        }),
        // Complex arithmetic is decomposed into real/imag ops before emission.
        (a, b) => panic!("mismatched or unsupported operands: {a:?} {op:?} {b:?}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PtrVal {
    pub buffer: usize,
    pub byte_offset: i64,
    pub dtype: Option<Dtype>,
}

impl PtrVal {
    pub fn new(buffer: usize, dtype: Dtype) -> PtrVal {
        PtrVal {
            buffer,
            byte_offset: 0,
            dtype: Some(dtype),
        }
    }

    pub fn untyped(buffer: usize) -> PtrVal {
        PtrVal {
            buffer,
            byte_offset: 0,
            dtype: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RtVal {
    Bool(bool),
    I32(i32),
    I64(i64),
    Scalar(ScalarVal),
    Vector(Vec<ScalarVal>),
    Ptr(PtrVal),
}

impl RtVal {
    fn as_i64(&self) -> i64 {
        match self {
            RtVal::I64(v) => *v,
            other => panic!("expected i64, got {other:?}"),
        }
    }

    fn as_bool(&self) -> bool {
        match self {
            RtVal::Bool(v) => *v,
            other => panic!("expected bool, got {other:?}"),
        }
    }

    fn as_ptr(&self) -> PtrVal {
        match self {
            RtVal::Ptr(p) => *p,
            other => panic!("expected pointer, got {other:?}"),
        }
    }

    fn as_scalar(&self) -> ScalarVal {
        match self {
            RtVal::Scalar(s) => *s,
            other => panic!("expected scalar, got {other:?}"),
        }
    }

    fn as_vector(&self) -> &[ScalarVal] {
        match self {
            RtVal::Vector(v) => v,
            other => panic!("expected vector, got {other:?}"),
        }
    }
}

pub(crate) fn decode_scalar(buf: &[u8], byte_offset: usize, dtype: Dtype) -> ScalarVal {
    let at = |n: usize| -> &[u8] { &buf[byte_offset..byte_offset + n] };
    match dtype {
        Dtype::F16 => ScalarVal::F16(f16::from_le_bytes(at(2).try_into().unwrap())),
        Dtype::F32 => ScalarVal::F32(f32::from_le_bytes(at(4).try_into().unwrap())),
        Dtype::F64 => ScalarVal::F64(f64::from_le_bytes(at(8).try_into().unwrap())),
        Dtype::C64 => ScalarVal::C64(
            f32::from_le_bytes(buf[byte_offset..byte_offset + 4].try_into().unwrap()),
            f32::from_le_bytes(buf[byte_offset + 4..byte_offset + 8].try_into().unwrap()),
        ),
        Dtype::S32 => ScalarVal::S32(i32::from_le_bytes(at(4).try_into().unwrap())),
        Dtype::S64 => ScalarVal::S64(i64::from_le_bytes(at(8).try_into().unwrap())),
        Dtype::U8 | Dtype::S8 => panic!("no emitted-code representation for {dtype}"),
    }
}

pub(crate) fn encode_scalar(buf: &mut [u8], byte_offset: usize, value: ScalarVal) {
    match value {
        ScalarVal::F16(v) => buf[byte_offset..byte_offset + 2].copy_from_slice(&v.to_le_bytes()),
        ScalarVal::F32(v) => buf[byte_offset..byte_offset + 4].copy_from_slice(&v.to_le_bytes()),
        ScalarVal::F64(v) => buf[byte_offset..byte_offset + 8].copy_from_slice(&v.to_le_bytes()),
        ScalarVal::C64(re, im) => {
            buf[byte_offset..byte_offset + 4].copy_from_slice(&re.to_le_bytes());
            buf[byte_offset + 4..byte_offset + 8].copy_from_slice(&im.to_le_bytes());
        }
        ScalarVal::S32(v) => buf[byte_offset..byte_offset + 4].copy_from_slice(&v.to_le_bytes()),
        ScalarVal::S64(v) => buf[byte_offset..byte_offset + 8].copy_from_slice(&v.to_le_bytes()),
    }
}

/// Flat storage the evaluator reads and writes through pointers.
#[derive(Debug, Default)]
pub struct Memory {
    buffers: Vec<Vec<u8>>,
}

impl Memory {
    pub fn new() -> Memory {
        Memory::default()
    }

    pub fn alloc(&mut self, bytes: Vec<u8>) -> usize {
        self.buffers.push(bytes);
        self.buffers.len() - 1
    }

    pub fn alloc_zeroed(&mut self, len: usize) -> usize {
        self.alloc(vec![0; len])
    }

    pub fn buffer(&self, id: usize) -> &[u8] {
        &self.buffers[id]
    }

    pub fn buffer_mut(&mut self, id: usize) -> &mut [u8] {
        &mut self.buffers[id]
    }

    fn elem_offset(ptr: PtrVal, index: i64) -> usize {
        let dtype = ptr.dtype.expect("element access through an untyped pointer");
        usize::try_from(ptr.byte_offset + index * i64::from(dtype.size())).unwrap()
    }

    pub fn read_scalar(&self, ptr: PtrVal, index: i64) -> ScalarVal {
        let dtype = ptr.dtype.unwrap();
        decode_scalar(&self.buffers[ptr.buffer], Self::elem_offset(ptr, index), dtype)
    }

    pub fn write_scalar(&mut self, ptr: PtrVal, index: i64, value: ScalarVal) {
        let offset = Self::elem_offset(ptr, index);
        encode_scalar(&mut self.buffers[ptr.buffer], offset, value);
    }
}

pub type ExternalFn = Box<dyn Fn(&mut Memory, &[RtVal])>;

/// Runs module functions; unresolved callees fall back to registered
/// external symbols (the runtime matmul library) and otherwise panic,
/// since an unknown symbol is a precondition bug in the emitter.
pub struct Evaluator<'m> {
    module: &'m Module,
    externals: HashMap<String, ExternalFn>,
}

impl<'m> Evaluator<'m> {
    pub fn new(module: &'m Module) -> Self {
        Evaluator {
            module,
            externals: HashMap::new(),
        }
    }

    pub fn register_external(&mut self, name: impl Into<String>, f: ExternalFn) {
        self.externals.insert(name.into(), f);
    }

    pub fn run(&self, name: &str, args: &[RtVal], mem: &mut Memory) {
        let func = self
            .module
            .get_function(name)
            .unwrap_or_else(|| panic!("no function named {name}"));
        assert_eq!(args.len(), func.params.len());
        let mut values: Vec<Option<RtVal>> = vec![None; func.value_types.len()];
        for (slot, arg) in values.iter_mut().zip(args) {
            *slot = Some(arg.clone());
        }
        self.exec_body(&func.body, &mut values, mem);
    }

    fn get(values: &[Option<RtVal>], v: Value) -> RtVal {
        values[v.0 as usize]
            .clone()
            .expect("value used before definition")
    }

    fn set(values: &mut [Option<RtVal>], v: Value, rt: RtVal) {
        values[v.0 as usize] = Some(rt);
    }

    fn exec_body(&self, body: &[Inst], values: &mut [Option<RtVal>], mem: &mut Memory) {
        for inst in body {
            self.exec_inst(inst, values, mem);
        }
    }

    fn exec_inst(&self, inst: &Inst, values: &mut [Option<RtVal>], mem: &mut Memory) {
        match inst {
            Inst::Const { out, imm } => {
                let rt = match imm {
                    Imm::Bool(v) => RtVal::Bool(*v),
                    Imm::I32(v) => RtVal::I32(*v),
                    Imm::I64(v) => RtVal::I64(*v),
                    Imm::Zero(dt) => RtVal::Scalar(ScalarVal::zero(*dt)),
                    Imm::ZeroVector(dt, lanes) => {
                        RtVal::Vector(vec![ScalarVal::zero(*dt); *lanes as usize])
                    }
                };
                Self::set(values, *out, rt);
            }
            Inst::IntBin { out, op, lhs, rhs } => {
                let rt = match op {
                    IntOp::And => RtVal::Bool(
                        Self::get(values, *lhs).as_bool() && Self::get(values, *rhs).as_bool(),
                    ),
                    IntOp::Or => RtVal::Bool(
                        Self::get(values, *lhs).as_bool() || Self::get(values, *rhs).as_bool(),
                    ),
                    IntOp::Add => RtVal::I64(
                        Self::get(values, *lhs).as_i64() + Self::get(values, *rhs).as_i64(),
                    ),
                    IntOp::Sub => RtVal::I64(
                        Self::get(values, *lhs).as_i64() - Self::get(values, *rhs).as_i64(),
                    ),
                    IntOp::Mul => RtVal::I64(
                        Self::get(values, *lhs).as_i64() * Self::get(values, *rhs).as_i64(),
                    ),
                };
                Self::set(values, *out, rt);
            }
            Inst::Cmp {
                out,
                pred,
                lhs,
                rhs,
            } => {
                let (a, b) = (
                    Self::get(values, *lhs).as_i64(),
                    Self::get(values, *rhs).as_i64(),
                );
                let r = match pred {
                    CmpPred::Eq => a == b,
                    CmpPred::Ne => a != b,
                    CmpPred::Slt => a < b,
                    CmpPred::Sle => a <= b,
                };
                Self::set(values, *out, RtVal::Bool(r));
            }
            Inst::Arith { out, op, lhs, rhs } => {
                let rt = match (Self::get(values, *lhs), Self::get(values, *rhs)) {
                    (RtVal::Scalar(a), RtVal::Scalar(b)) => RtVal::Scalar(scalar_bin(*op, a, b)),
                    (RtVal::Vector(a), RtVal::Vector(b)) => {
                        assert_eq!(a.len(), b.len());
                        RtVal::Vector(
                            a.into_iter()
                                .zip(b)
                                .map(|(x, y)| scalar_bin(*op, x, y))
                                .collect(),
                        )
                    }
                    (a, b) => panic!("arith on {a:?} and {b:?}"),
                };
                Self::set(values, *out, rt);
            }
            Inst::Splat { out, scalar, lanes } => {
                let s = Self::get(values, *scalar).as_scalar();
                Self::set(values, *out, RtVal::Vector(vec![s; *lanes as usize]));
            }
            Inst::LoadScalar { out, ptr, index } => {
                let p = Self::get(values, *ptr).as_ptr();
                let i = Self::get(values, *index).as_i64();
                Self::set(values, *out, RtVal::Scalar(mem.read_scalar(p, i)));
            }
            Inst::LoadVector {
                out,
                ptr,
                index,
                lanes,
            } => {
                let p = Self::get(values, *ptr).as_ptr();
                let i = Self::get(values, *index).as_i64();
                let v = (0..i64::from(*lanes))
                    .map(|l| mem.read_scalar(p, i + l))
                    .collect();
                Self::set(values, *out, RtVal::Vector(v));
            }
            Inst::StoreScalar { value, ptr, index } => {
                let p = Self::get(values, *ptr).as_ptr();
                let i = Self::get(values, *index).as_i64();
                let v = Self::get(values, *value).as_scalar();
                mem.write_scalar(p, i, v);
            }
            Inst::StoreVector { value, ptr, index } => {
                let p = Self::get(values, *ptr).as_ptr();
                let i = Self::get(values, *index).as_i64();
                let rt = Self::get(values, *value);
                for (l, &s) in rt.as_vector().iter().enumerate() {
                    mem.write_scalar(p, i + l as i64, s);
                }
            }
            Inst::PtrOffset { out, ptr, offset } => {
                let mut p = Self::get(values, *ptr).as_ptr();
                let off = Self::get(values, *offset).as_i64();
                let dtype = p.dtype.expect("offsetting an untyped pointer");
                p.byte_offset += off * i64::from(dtype.size());
                Self::set(values, *out, RtVal::Ptr(p));
            }
            Inst::Shuffle { out, a, b, mask } => {
                let va = Self::get(values, *a);
                let vb = Self::get(values, *b);
                let (la, lb) = (va.as_vector(), vb.as_vector());
                let picked = mask
                    .iter()
                    .map(|&i| {
                        let i = i as usize;
                        if i < la.len() {
                            la[i]
                        } else {
                            lb[i - la.len()]
                        }
                    })
                    .collect();
                Self::set(values, *out, RtVal::Vector(picked));
            }
            Inst::ExtractLane { out, vec, lane } => {
                let v = Self::get(values, *vec);
                Self::set(values, *out, RtVal::Scalar(v.as_vector()[*lane as usize]));
            }
            Inst::Real { out, value } => {
                let ScalarVal::C64(re, _) = Self::get(values, *value).as_scalar() else {
                    panic!("real of a non-complex value");
                };
                Self::set(values, *out, RtVal::Scalar(ScalarVal::F32(re)));
            }
            Inst::Imag { out, value } => {
                let ScalarVal::C64(_, im) = Self::get(values, *value).as_scalar() else {
                    panic!("imag of a non-complex value");
                };
                Self::set(values, *out, RtVal::Scalar(ScalarVal::F32(im)));
            }
            Inst::MakeComplex { out, re, im } => {
                let (ScalarVal::F32(re), ScalarVal::F32(im)) = (
                    Self::get(values, *re).as_scalar(),
                    Self::get(values, *im).as_scalar(),
                ) else {
                    panic!("complex components must be f32");
                };
                Self::set(values, *out, RtVal::Scalar(ScalarVal::C64(re, im)));
            }
            Inst::Alloca { out, ty } => {
                let bytes = match ty {
                    Type::Scalar(dt) => usize::from(dt.size()),
                    Type::Vector(dt, lanes) => usize::from(dt.size()) * *lanes as usize,
                    other => panic!("cannot alloca {other:?}"),
                };
                let dtype = match ty {
                    Type::Scalar(dt) | Type::Vector(dt, _) => *dt,
                    _ => unreachable!(),
                };
                let buffer = mem.alloc_zeroed(bytes);
                Self::set(values, *out, RtVal::Ptr(PtrVal::new(buffer, dtype)));
            }
            Inst::Memset {
                ptr,
                byte,
                size_bytes,
                align: _,
            } => {
                let p = Self::get(values, *ptr).as_ptr();
                let start = usize::try_from(p.byte_offset).unwrap();
                let end = start + usize::try_from(*size_bytes).unwrap();
                mem.buffer_mut(p.buffer)[start..end].fill(*byte);
            }
            Inst::Call { callee, args } => {
                let arg_values: Vec<RtVal> = args.iter().map(|&a| Self::get(values, a)).collect();
                if self.module.has_function(callee) {
                    self.run(callee, &arg_values, mem);
                } else if let Some(external) = self.externals.get(callee) {
                    external(mem, &arg_values);
                } else {
                    panic!("call to unresolved symbol {callee}");
                }
            }
            Inst::For {
                name: _,
                indvar,
                start,
                end,
                step,
                body,
            } => {
                let start = Self::get(values, *start).as_i64();
                let end = Self::get(values, *end).as_i64();
                let step = Self::get(values, *step).as_i64();
                assert!(step > 0, "loop step must be positive");
                let mut i = start;
                while i < end {
                    Self::set(values, *indvar, RtVal::I64(i));
                    self.exec_body(body, values, mem);
                    i += step;
                }
            }
            Inst::If {
                cond,
                then_body,
                else_body,
            } => {
                if Self::get(values, *cond).as_bool() {
                    self.exec_body(then_body, values, mem);
                } else {
                    self.exec_body(else_body, values, mem);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::FuncBuilder;
    use crate::ir::FnAttrs;

    fn f32_buf(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn read_f32s(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn test_loop_accumulates_into_memory() {
        // out[0] = sum of in[0..8]
        let mut module = Module::new();
        let mut fb = FuncBuilder::new(
            &mut module,
            "sum",
            vec![Type::Ptr(Dtype::F32), Type::Ptr(Dtype::F32)],
            FnAttrs::default(),
        );
        let params = fb.param_values();
        let (input, out) = (params[0], params[1]);
        let zero = fb.const_i64(0);
        let end = fb.const_i64(8);
        let one = fb.const_i64(1);
        let zval = fb.zero_scalar(Dtype::F32);
        fb.store_scalar(zval, out, zero);
        fb.for_loop("sum", zero, end, one, |fb, i| {
            let x = fb.load_scalar(input, i);
            let acc = fb.load_scalar(out, zero);
            let s = fb.arith(ArithOp::Add, acc, x);
            fb.store_scalar(s, out, zero);
        });
        fb.finish();

        let mut mem = Memory::new();
        let input = mem.alloc(f32_buf(&[1., 2., 3., 4., 5., 6., 7., 8.]));
        let out = mem.alloc_zeroed(4);
        Evaluator::new(&module).run(
            "sum",
            &[
                RtVal::Ptr(PtrVal::new(input, Dtype::F32)),
                RtVal::Ptr(PtrVal::new(out, Dtype::F32)),
            ],
            &mut mem,
        );
        assert_eq!(read_f32s(mem.buffer(out)), vec![36.0]);
    }

    #[test]
    fn test_vector_ops_and_shuffle() {
        let mut module = Module::new();
        let mut fb = FuncBuilder::new(
            &mut module,
            "shuf",
            vec![Type::Ptr(Dtype::F32), Type::Ptr(Dtype::F32)],
            FnAttrs::default(),
        );
        let params = fb.param_values();
        let zero = fb.const_i64(0);
        let a = fb.load_vector(params[0], zero, 4);
        let four = fb.const_i64(4);
        let b = fb.load_vector(params[0], four, 4);
        // Even lanes of a followed by odd lanes of b.
        let s = fb.shuffle(a, b, vec![0, 2, 5, 7]);
        fb.store_vector(s, params[1], zero);
        fb.finish();

        let mut mem = Memory::new();
        let input = mem.alloc(f32_buf(&[0., 1., 2., 3., 10., 11., 12., 13.]));
        let out = mem.alloc_zeroed(16);
        Evaluator::new(&module).run(
            "shuf",
            &[
                RtVal::Ptr(PtrVal::new(input, Dtype::F32)),
                RtVal::Ptr(PtrVal::new(out, Dtype::F32)),
            ],
            &mut mem,
        );
        assert_eq!(read_f32s(mem.buffer(out)), vec![0., 2., 11., 13.]);
    }

    #[test]
    fn test_if_and_memset() {
        let mut module = Module::new();
        let mut fb = FuncBuilder::new(
            &mut module,
            "reset",
            vec![Type::Ptr(Dtype::F32)],
            FnAttrs::default(),
        );
        let params = fb.param_values();
        let t = fb.const_bool(true);
        fb.if_then_else(
            t,
            |fb| fb.memset(params[0], 0, 8, 16),
            |_fb| {},
        );
        fb.finish();

        let mut mem = Memory::new();
        let buf = mem.alloc(f32_buf(&[1.0, 2.0, 3.0]));
        Evaluator::new(&module).run(
            "reset",
            &[RtVal::Ptr(PtrVal::new(buf, Dtype::F32))],
            &mut mem,
        );
        assert_eq!(read_f32s(mem.buffer(buf)), vec![0.0, 0.0, 3.0]);
    }

    #[test]
    fn test_call_resolves_module_functions_first() {
        let mut module = Module::new();
        let mut inner = FuncBuilder::new(
            &mut module,
            "write_one",
            vec![Type::Ptr(Dtype::F32)],
            FnAttrs::default(),
        );
        let params = inner.param_values();
        let zero = inner.const_i64(0);
        let z = inner.zero_scalar(Dtype::F32);
        let one_bits = inner.load_scalar(params[0], zero);
        let v = inner.arith(ArithOp::Add, z, one_bits);
        inner.store_scalar(v, params[0], zero);
        inner.finish();

        let mut outer = FuncBuilder::new(
            &mut module,
            "main",
            vec![Type::Ptr(Dtype::F32)],
            FnAttrs::default(),
        );
        let params = outer.param_values();
        outer.call("write_one", &[params[0]]);
        outer.finish();

        let mut mem = Memory::new();
        let buf = mem.alloc(f32_buf(&[5.0]));
        Evaluator::new(&module).run(
            "main",
            &[RtVal::Ptr(PtrVal::new(buf, Dtype::F32))],
            &mut mem,
        );
        assert_eq!(read_f32s(mem.buffer(buf)), vec![5.0]);
    }

    #[test]
    fn test_f16_roundtrip_through_arith() {
        let mut module = Module::new();
        let mut fb = FuncBuilder::new(
            &mut module,
            "dbl",
            vec![Type::Ptr(Dtype::F16)],
            FnAttrs::default(),
        );
        let params = fb.param_values();
        let zero = fb.const_i64(0);
        let x = fb.load_scalar(params[0], zero);
        let y = fb.arith(ArithOp::Add, x, x);
        fb.store_scalar(y, params[0], zero);
        fb.finish();

        let mut mem = Memory::new();
        let buf = mem.alloc(f16::from_f32(1.5).to_le_bytes().to_vec());
        Evaluator::new(&module).run(
            "dbl",
            &[RtVal::Ptr(PtrVal::new(buf, Dtype::F16))],
            &mut mem,
        );
        let got = f16::from_le_bytes(mem.buffer(buf)[0..2].try_into().unwrap());
        assert_eq!(got.to_f32(), 3.0);
    }
}
