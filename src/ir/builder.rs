use super::{ArithOp, CmpPred, FnAttrs, Function, Imm, Inst, IntOp, Module, Type, Value};
use crate::common::Dtype;

/// Appends typed instructions to a function under construction.
///
/// Structured control flow is built with closures: `for_loop` and
/// `if_then_else` run the body closure against a fresh instruction frame and
/// attach the result to the enclosing instruction. `finish` moves the
/// completed function into the module.
pub struct FuncBuilder<'m> {
    module: &'m mut Module,
    name: String,
    params: Vec<Type>,
    attrs: FnAttrs,
    value_types: Vec<Type>,
    frames: Vec<Vec<Inst>>,
}

impl<'m> FuncBuilder<'m> {
    pub fn new(module: &'m mut Module, name: &str, params: Vec<Type>, attrs: FnAttrs) -> Self {
        assert!(
            !module.has_function(name),
            "a function named {name} was already emitted"
        );
        let value_types = params.clone();
        FuncBuilder {
            module,
            name: name.to_owned(),
            params,
            attrs,
            value_types,
            frames: vec![Vec::new()],
        }
    }

    pub fn module(&self) -> &Module {
        self.module
    }

    pub fn module_mut(&mut self) -> &mut Module {
        self.module
    }

    pub fn param_values(&self) -> Vec<Value> {
        (0..self.params.len() as u32).map(Value).collect()
    }

    pub fn value_type(&self, v: Value) -> Type {
        self.value_types[v.0 as usize]
    }

    fn new_value(&mut self, ty: Type) -> Value {
        let v = Value(self.value_types.len() as u32);
        self.value_types.push(ty);
        v
    }

    fn push(&mut self, inst: Inst) {
        self.frames.last_mut().unwrap().push(inst);
    }

    pub fn finish(self) {
        let FuncBuilder {
            module,
            name,
            params,
            attrs,
            value_types,
            mut frames,
        } = self;
        assert_eq!(frames.len(), 1, "unterminated control-flow frame");
        module.insert_function(Function {
            name,
            params,
            attrs,
            value_types,
            body: frames.pop().unwrap(),
        });
    }

    pub fn const_i64(&mut self, value: i64) -> Value {
        let out = self.new_value(Type::I64);
        self.push(Inst::Const {
            out,
            imm: Imm::I64(value),
        });
        out
    }

    pub fn const_i32(&mut self, value: i32) -> Value {
        let out = self.new_value(Type::I32);
        self.push(Inst::Const {
            out,
            imm: Imm::I32(value),
        });
        out
    }

    pub fn const_bool(&mut self, value: bool) -> Value {
        let out = self.new_value(Type::Bool);
        self.push(Inst::Const {
            out,
            imm: Imm::Bool(value),
        });
        out
    }

    pub fn zero_scalar(&mut self, dtype: Dtype) -> Value {
        let out = self.new_value(Type::Scalar(dtype));
        self.push(Inst::Const {
            out,
            imm: Imm::Zero(dtype),
        });
        out
    }

    pub fn zero_vector(&mut self, dtype: Dtype, lanes: u32) -> Value {
        let out = self.new_value(Type::Vector(dtype, lanes));
        self.push(Inst::Const {
            out,
            imm: Imm::ZeroVector(dtype, lanes),
        });
        out
    }

    fn int_bin(&mut self, op: IntOp, lhs: Value, rhs: Value) -> Value {
        let ty = self.value_type(lhs);
        debug_assert_eq!(ty, self.value_type(rhs));
        debug_assert!(match op {
            IntOp::And | IntOp::Or => ty == Type::Bool,
            _ => ty == Type::I64,
        });
        let out = self.new_value(ty);
        self.push(Inst::IntBin { out, op, lhs, rhs });
        out
    }

    pub fn int_add(&mut self, lhs: Value, rhs: Value) -> Value {
        self.int_bin(IntOp::Add, lhs, rhs)
    }

    pub fn int_sub(&mut self, lhs: Value, rhs: Value) -> Value {
        self.int_bin(IntOp::Sub, lhs, rhs)
    }

    pub fn int_mul(&mut self, lhs: Value, rhs: Value) -> Value {
        self.int_bin(IntOp::Mul, lhs, rhs)
    }

    pub fn and_(&mut self, lhs: Value, rhs: Value) -> Value {
        self.int_bin(IntOp::And, lhs, rhs)
    }

    pub fn or_(&mut self, lhs: Value, rhs: Value) -> Value {
        self.int_bin(IntOp::Or, lhs, rhs)
    }

    pub fn icmp(&mut self, pred: CmpPred, lhs: Value, rhs: Value) -> Value {
        debug_assert_eq!(self.value_type(lhs), Type::I64);
        debug_assert_eq!(self.value_type(rhs), Type::I64);
        let out = self.new_value(Type::Bool);
        self.push(Inst::Cmp {
            out,
            pred,
            lhs,
            rhs,
        });
        out
    }

    pub fn arith(&mut self, op: ArithOp, lhs: Value, rhs: Value) -> Value {
        let ty = self.value_type(lhs);
        debug_assert_eq!(ty, self.value_type(rhs));
        let out = self.new_value(ty);
        self.push(Inst::Arith { out, op, lhs, rhs });
        out
    }

    pub fn splat(&mut self, scalar: Value, lanes: u32) -> Value {
        let Type::Scalar(dtype) = self.value_type(scalar) else {
            panic!("splat requires a scalar operand");
        };
        let out = self.new_value(Type::Vector(dtype, lanes));
        self.push(Inst::Splat { out, scalar, lanes });
        out
    }

    fn pointee(&self, ptr: Value) -> Dtype {
        match self.value_type(ptr) {
            Type::Ptr(dtype) => dtype,
            other => panic!("expected a typed pointer, got {other:?}"),
        }
    }

    pub fn load_scalar(&mut self, ptr: Value, index: Value) -> Value {
        let dtype = self.pointee(ptr);
        let out = self.new_value(Type::Scalar(dtype));
        self.push(Inst::LoadScalar { out, ptr, index });
        out
    }

    pub fn load_vector(&mut self, ptr: Value, index: Value, lanes: u32) -> Value {
        let dtype = self.pointee(ptr);
        let out = self.new_value(Type::Vector(dtype, lanes));
        self.push(Inst::LoadVector {
            out,
            ptr,
            index,
            lanes,
        });
        out
    }

    pub fn store_scalar(&mut self, value: Value, ptr: Value, index: Value) {
        debug_assert_eq!(self.value_type(value), Type::Scalar(self.pointee(ptr)));
        self.push(Inst::StoreScalar { value, ptr, index });
    }

    pub fn store_vector(&mut self, value: Value, ptr: Value, index: Value) {
        debug_assert!(matches!(self.value_type(value), Type::Vector(dt, _) if dt == self.pointee(ptr)));
        self.push(Inst::StoreVector { value, ptr, index });
    }

    pub fn ptr_offset(&mut self, ptr: Value, offset: Value) -> Value {
        let ty = self.value_type(ptr);
        let out = self.new_value(ty);
        self.push(Inst::PtrOffset { out, ptr, offset });
        out
    }

    pub fn shuffle(&mut self, a: Value, b: Value, mask: Vec<u32>) -> Value {
        let Type::Vector(dtype, _) = self.value_type(a) else {
            panic!("shuffle requires vector operands");
        };
        let out = self.new_value(Type::Vector(dtype, mask.len() as u32));
        self.push(Inst::Shuffle { out, a, b, mask });
        out
    }

    pub fn extract_lane(&mut self, vec: Value, lane: u32) -> Value {
        let Type::Vector(dtype, lanes) = self.value_type(vec) else {
            panic!("extract_lane requires a vector operand");
        };
        debug_assert!(lane < lanes);
        let out = self.new_value(Type::Scalar(dtype));
        self.push(Inst::ExtractLane { out, vec, lane });
        out
    }

    pub fn real(&mut self, value: Value) -> Value {
        debug_assert_eq!(self.value_type(value), Type::Scalar(Dtype::C64));
        let out = self.new_value(Type::Scalar(Dtype::F32));
        self.push(Inst::Real { out, value });
        out
    }

    pub fn imag(&mut self, value: Value) -> Value {
        debug_assert_eq!(self.value_type(value), Type::Scalar(Dtype::C64));
        let out = self.new_value(Type::Scalar(Dtype::F32));
        self.push(Inst::Imag { out, value });
        out
    }

    pub fn make_complex(&mut self, re: Value, im: Value) -> Value {
        let out = self.new_value(Type::Scalar(Dtype::C64));
        self.push(Inst::MakeComplex { out, re, im });
        out
    }

    pub fn alloca(&mut self, ty: Type) -> Value {
        let dtype = match ty {
            Type::Scalar(dt) | Type::Vector(dt, _) => dt,
            other => panic!("cannot alloca {other:?}"),
        };
        let out = self.new_value(Type::Ptr(dtype));
        self.push(Inst::Alloca { out, ty });
        out
    }

    pub fn memset(&mut self, ptr: Value, byte: u8, size_bytes: u64, align: u32) {
        self.push(Inst::Memset {
            ptr,
            byte,
            size_bytes,
            align,
        });
    }

    pub fn call(&mut self, callee: &str, args: &[Value]) {
        self.push(Inst::Call {
            callee: callee.to_owned(),
            args: args.to_vec(),
        });
    }

    pub fn for_loop(
        &mut self,
        name: &str,
        start: Value,
        end: Value,
        step: Value,
        body: impl FnOnce(&mut Self, Value),
    ) {
        let indvar = self.new_value(Type::I64);
        self.frames.push(Vec::new());
        body(self, indvar);
        let body_insts = self.frames.pop().unwrap();
        self.push(Inst::For {
            name: name.to_owned(),
            indvar,
            start,
            end,
            step,
            body: body_insts,
        });
    }

    pub fn if_then_else(
        &mut self,
        cond: Value,
        then_body: impl FnOnce(&mut Self),
        else_body: impl FnOnce(&mut Self),
    ) {
        debug_assert_eq!(self.value_type(cond), Type::Bool);
        self.frames.push(Vec::new());
        then_body(self);
        let then_insts = self.frames.pop().unwrap();
        self.frames.push(Vec::new());
        else_body(self);
        let else_insts = self.frames.pop().unwrap();
        self.push(Inst::If {
            cond,
            then_body: then_insts,
            else_body: else_insts,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_records_function_shape() {
        let mut module = Module::new();
        let mut fb = FuncBuilder::new(
            &mut module,
            "f",
            vec![Type::Ptr(Dtype::F32)],
            FnAttrs::default(),
        );
        let params = fb.param_values();
        let zero = fb.const_i64(0);
        let x = fb.load_scalar(params[0], zero);
        fb.store_scalar(x, params[0], zero);
        fb.finish();

        let func = module.get_function("f").unwrap();
        assert_eq!(func.params.len(), 1);
        assert_eq!(func.body.len(), 3);
    }

    #[test]
    #[should_panic(expected = "already emitted")]
    fn test_duplicate_function_names_rejected() {
        let mut module = Module::new();
        FuncBuilder::new(&mut module, "f", vec![], FnAttrs::default()).finish();
        FuncBuilder::new(&mut module, "f", vec![], FnAttrs::default()).finish();
    }

    #[test]
    fn test_nested_loops_attach_to_parent_frame() {
        let mut module = Module::new();
        let mut fb = FuncBuilder::new(&mut module, "loops", vec![], FnAttrs::default());
        let start = fb.const_i64(0);
        let end = fb.const_i64(4);
        let step = fb.const_i64(1);
        fb.for_loop("outer", start, end, step, |fb, _i| {
            fb.for_loop("inner", start, end, step, |_fb, _j| {});
        });
        fb.finish();

        let func = module.get_function("loops").unwrap();
        let Inst::For { body, .. } = func.body.last().unwrap() else {
            panic!("expected a loop");
        };
        assert!(matches!(body.last().unwrap(), Inst::For { .. }));
    }
}
