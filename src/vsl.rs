//! Vector support library: typed scalar and vector primitives over the IR
//! builder, parameterized by element type and vector width.

use crate::common::Dtype;
use crate::ir::builder::FuncBuilder;
use crate::ir::{ArithOp, Type, Value};
use crate::utils::is_power_of_two;

pub struct Vsl {
    dtype: Dtype,
    vector_size: u32,
}

impl Vsl {
    pub fn new(dtype: Dtype, vector_size: i64) -> Vsl {
        assert!(vector_size > 0);
        Vsl {
            dtype,
            vector_size: u32::try_from(vector_size).unwrap(),
        }
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn vector_size(&self) -> i64 {
        i64::from(self.vector_size)
    }

    pub fn load_vector(&self, b: &mut FuncBuilder, ptr: Value, index: Value) -> Value {
        b.load_vector(ptr, index, self.vector_size)
    }

    pub fn load_scalar(&self, b: &mut FuncBuilder, ptr: Value, index: Value) -> Value {
        b.load_scalar(ptr, index)
    }

    /// Loads `ptr[index]` and fans it out to every lane.
    pub fn load_broadcast(&self, b: &mut FuncBuilder, ptr: Value, index: Value) -> Value {
        let scalar = b.load_scalar(ptr, index);
        b.splat(scalar, self.vector_size)
    }

    pub fn store_vector(&self, b: &mut FuncBuilder, value: Value, ptr: Value, index: Value) {
        b.store_vector(value, ptr, index);
    }

    pub fn store_scalar(&self, b: &mut FuncBuilder, value: Value, ptr: Value, index: Value) {
        b.store_scalar(value, ptr, index);
    }

    pub fn add(&self, b: &mut FuncBuilder, lhs: Value, rhs: Value) -> Value {
        b.arith(ArithOp::Add, lhs, rhs)
    }

    pub fn mul(&self, b: &mut FuncBuilder, lhs: Value, rhs: Value) -> Value {
        b.arith(ArithOp::Mul, lhs, rhs)
    }

    /// Lane-wise `x * y + acc`.
    pub fn mul_add(&self, b: &mut FuncBuilder, x: Value, y: Value, acc: Value) -> Value {
        let product = b.arith(ArithOp::Mul, x, y);
        b.arith(ArithOp::Add, product, acc)
    }

    pub fn zero_vector(&self, b: &mut FuncBuilder) -> Value {
        b.zero_vector(self.dtype, self.vector_size)
    }

    pub fn zero_scalar(&self, b: &mut FuncBuilder) -> Value {
        b.zero_scalar(self.dtype)
    }

    /// Pointer arithmetic in elements.
    pub fn compute_offset_pointer(&self, b: &mut FuncBuilder, base: Value, offset: Value) -> Value {
        b.ptr_offset(base, offset)
    }

    /// Reduces each input vector to the sum of its lanes.
    ///
    /// When the vector count equals the vector width (and both are a power of
    /// two), this emits log2(width) rounds of paired even/odd shuffle-adds so
    /// the reduction stays in vector registers; an addend vector, when
    /// supplied, is folded in with a single vector add before the lanes are
    /// extracted. Otherwise each vector is reduced with a scalar extract-add
    /// chain and the addend lanes are added individually.
    pub fn compute_horizontal_sums(
        &self,
        b: &mut FuncBuilder,
        vectors: Vec<Value>,
        addend: Option<Value>,
    ) -> Vec<Value> {
        let count = vectors.len() as u32;
        if count == self.vector_size && count > 1 && is_power_of_two(u64::from(count)) {
            return self.shuffle_reduce(b, vectors, addend);
        }
        vectors
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                let mut sum = b.extract_lane(v, 0);
                for lane in 1..self.vector_size {
                    let x = b.extract_lane(v, lane);
                    sum = b.arith(ArithOp::Add, sum, x);
                }
                if let Some(addend) = addend {
                    let lane = b.extract_lane(addend, i as u32);
                    sum = b.arith(ArithOp::Add, sum, lane);
                }
                sum
            })
            .collect()
    }

    fn shuffle_reduce(
        &self,
        b: &mut FuncBuilder,
        mut vectors: Vec<Value>,
        addend: Option<Value>,
    ) -> Vec<Value> {
        let width = self.vector_size;
        // Each round halves the vector count: hadd(a, b) yields the adjacent
        // pair sums of a in its low half and of b in its high half, so after
        // log2(width) rounds lane i of the survivor holds the full sum of
        // input vector i.
        while vectors.len() > 1 {
            let mut next = Vec::with_capacity(vectors.len() / 2);
            for pair in vectors.chunks(2) {
                let (a, bb) = (pair[0], pair[1]);
                let evens = (0..2 * width).step_by(2).collect::<Vec<_>>();
                let odds = (1..2 * width).step_by(2).collect::<Vec<_>>();
                let lo = b.shuffle(a, bb, evens);
                let hi = b.shuffle(a, bb, odds);
                next.push(b.arith(ArithOp::Add, lo, hi));
            }
            vectors = next;
        }
        let mut reduced = vectors.pop().unwrap();
        if let Some(addend) = addend {
            reduced = b.arith(ArithOp::Add, reduced, addend);
        }
        (0..width).map(|lane| b.extract_lane(reduced, lane)).collect()
    }
}

/// An alloca-backed mutable scalar, for accumulators that live across loop
/// iterations.
pub struct ScalarVariable {
    slot: Value,
}

impl ScalarVariable {
    pub fn new(vsl: &Vsl, b: &mut FuncBuilder, initial: Value) -> ScalarVariable {
        let slot = b.alloca(Type::Scalar(vsl.dtype()));
        let var = ScalarVariable { slot };
        var.set(b, initial);
        var
    }

    pub fn get(&self, b: &mut FuncBuilder) -> Value {
        let zero = b.const_i64(0);
        b.load_scalar(self.slot, zero)
    }

    pub fn set(&self, b: &mut FuncBuilder, value: Value) {
        let zero = b.const_i64(0);
        b.store_scalar(value, self.slot, zero);
    }
}

/// An alloca-backed mutable vector.
pub struct VectorVariable {
    slot: Value,
    lanes: u32,
}

impl VectorVariable {
    pub fn new(vsl: &Vsl, b: &mut FuncBuilder, initial: Value) -> VectorVariable {
        let lanes = u32::try_from(vsl.vector_size()).unwrap();
        let slot = b.alloca(Type::Vector(vsl.dtype(), lanes));
        let var = VectorVariable { slot, lanes };
        var.set(b, initial);
        var
    }

    pub fn get(&self, b: &mut FuncBuilder) -> Value {
        let zero = b.const_i64(0);
        b.load_vector(self.slot, zero, self.lanes)
    }

    pub fn set(&self, b: &mut FuncBuilder, value: Value) {
        let zero = b.const_i64(0);
        b.store_vector(value, self.slot, zero);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::interp::{Evaluator, Memory, PtrVal, RtVal};
    use crate::ir::{FnAttrs, Module};

    fn run_hsums(width: i64, count: usize, input: &[f32], addend: Option<&[f32]>) -> Vec<f32> {
        let mut module = Module::new();
        let mut params = vec![Type::Ptr(Dtype::F32), Type::Ptr(Dtype::F32)];
        if addend.is_some() {
            params.push(Type::Ptr(Dtype::F32));
        }
        let mut fb = FuncBuilder::new(&mut module, "hsums", params, FnAttrs::default());
        let pv = fb.param_values();
        let vsl = Vsl::new(Dtype::F32, width);
        let vectors = (0..count)
            .map(|i| {
                let at = fb.const_i64(i as i64 * width);
                vsl.load_vector(&mut fb, pv[0], at)
            })
            .collect::<Vec<_>>();
        let addend_vec = addend.map(|_| {
            let zero = fb.const_i64(0);
            vsl.load_vector(&mut fb, pv[2], zero)
        });
        let sums = vsl.compute_horizontal_sums(&mut fb, vectors, addend_vec);
        for (i, s) in sums.iter().enumerate() {
            let at = fb.const_i64(i as i64);
            vsl.store_scalar(&mut fb, *s, pv[1], at);
        }
        fb.finish();

        let mut mem = Memory::new();
        let inp = mem.alloc(input.iter().flat_map(|v| v.to_le_bytes()).collect());
        let out = mem.alloc_zeroed(count.max(width as usize) * 4);
        let mut args = vec![
            RtVal::Ptr(PtrVal::new(inp, Dtype::F32)),
            RtVal::Ptr(PtrVal::new(out, Dtype::F32)),
        ];
        if let Some(a) = addend {
            let ab = mem.alloc(a.iter().flat_map(|v| v.to_le_bytes()).collect());
            args.push(RtVal::Ptr(PtrVal::new(ab, Dtype::F32)));
        }
        Evaluator::new(&module).run("hsums", &args, &mut mem);
        mem.buffer(out)
            .chunks_exact(4)
            .take(count)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn test_horizontal_sums_shuffle_form() {
        // 4 vectors of width 4; sums are 6, 22, 38, 54.
        let input: Vec<f32> = (0..16).map(|v| v as f32).collect();
        assert_eq!(run_hsums(4, 4, &input, None), vec![6.0, 22.0, 38.0, 54.0]);
    }

    #[test]
    fn test_horizontal_sums_shuffle_form_width8() {
        let input: Vec<f32> = (0..64).map(|v| v as f32).collect();
        let expect: Vec<f32> = (0..8)
            .map(|i| (8 * i..8 * i + 8).map(|v| v as f32).sum())
            .collect();
        assert_eq!(run_hsums(8, 8, &input, None), expect);
    }

    #[test]
    fn test_horizontal_sums_with_addend() {
        let input: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let addend = [100.0, 200.0, 300.0, 400.0];
        assert_eq!(
            run_hsums(4, 4, &input, Some(&addend)),
            vec![106.0, 222.0, 338.0, 454.0]
        );
    }

    #[test]
    fn test_horizontal_sums_scalar_fallback() {
        // 3 vectors of width 4 takes the extract-add path.
        let input: Vec<f32> = (0..12).map(|v| v as f32).collect();
        assert_eq!(run_hsums(4, 3, &input, None), vec![6.0, 22.0, 38.0]);
    }
}
