//! Checks emitted dot kernels against a naive reference.
//!
//! [run_emitted_dot] builds a one-function module around the dispatcher and
//! interprets it; [reference_dot] is the naive triple loop (any rank, any
//! layout), accumulating in f64 for floating-point types, in a pair of f64s
//! for complex, and with wrapping arithmetic at the target width for the
//! integer types so integral results can be compared bit-exactly.

use crate::common::Dtype;
use crate::dot::{emit_dot_operation, DotOp, EmitError, EmitOptions};
use crate::ir::builder::FuncBuilder;
use crate::ir::interp::{decode_scalar, encode_scalar, Evaluator, Memory, PtrVal, RtVal, ScalarVal};
use crate::ir::{FnAttrs, Module, Type};
use crate::runtime;
use crate::shape::TensorShape;
use crate::target::TargetFeatures;
use half::f16;
use ndarray::linalg::general_mat_mul;
use ndarray::Array2;
use num_traits::{One, Zero};

/// Relative tolerance appropriate to an element type (0 means bit-exact).
pub fn rel_tolerance(dtype: Dtype) -> f64 {
    match dtype {
        Dtype::F16 => 1e-3,
        Dtype::F32 => 1e-5,
        Dtype::F64 => 1e-12,
        Dtype::C64 => 1e-5,
        _ => 0.0,
    }
}

/// Emits `dot` through the dispatcher into a fresh module, runs it, and
/// returns the bytes of the result buffer.
///
/// `target_prefill` seeds the result buffer (defaults to zeros); passing
/// garbage here is how result-buffer-zeroing is checked.
pub fn run_emitted_dot(
    dot: &DotOp,
    options: &EmitOptions,
    target_features: &dyn TargetFeatures,
    lhs: &[u8],
    rhs: &[u8],
    addend: Option<&[u8]>,
    target_prefill: Option<&[u8]>,
) -> Result<Vec<u8>, EmitError> {
    assert_eq!(lhs.len() as u64, dot.lhs.byte_size());
    assert_eq!(rhs.len() as u64, dot.rhs.byte_size());

    let dtype = dot.target.dtype();
    let mut module = Module::new();
    let mut params = vec![
        Type::BytePtr,
        Type::Ptr(dtype),
        Type::Ptr(dot.lhs.dtype()),
        Type::Ptr(dot.rhs.dtype()),
    ];
    if addend.is_some() {
        params.push(Type::Ptr(dtype));
    }
    let mut fb = FuncBuilder::new(&mut module, "dot_kernel", params, FnAttrs::default());
    let param_values = fb.param_values();
    emit_dot_operation(
        dot,
        param_values[1],
        param_values[2],
        param_values[3],
        addend.map(|_| param_values[4]),
        param_values[0],
        target_features,
        options,
        &mut fb,
    )?;
    fb.finish();

    let mut mem = Memory::new();
    let run_options_buf = mem.alloc(Vec::new());
    let target_len = dot.target.byte_size() as usize;
    let target_buf = match target_prefill {
        Some(prefill) => {
            assert_eq!(prefill.len(), target_len);
            mem.alloc(prefill.to_vec())
        }
        None => mem.alloc_zeroed(target_len),
    };
    let lhs_buf = mem.alloc(lhs.to_vec());
    let rhs_buf = mem.alloc(rhs.to_vec());
    let mut args = vec![
        RtVal::Ptr(PtrVal::untyped(run_options_buf)),
        RtVal::Ptr(PtrVal::new(target_buf, dtype)),
        RtVal::Ptr(PtrVal::new(lhs_buf, dot.lhs.dtype())),
        RtVal::Ptr(PtrVal::new(rhs_buf, dot.rhs.dtype())),
    ];
    if let Some(addend) = addend {
        assert_eq!(addend.len() as u64, dot.target.byte_size());
        let addend_buf = mem.alloc(addend.to_vec());
        args.push(RtVal::Ptr(PtrVal::new(addend_buf, dtype)));
    }

    let mut evaluator = Evaluator::new(&module);
    runtime::install(&mut evaluator);
    evaluator.run("dot_kernel", &args, &mut mem);
    Ok(mem.buffer(target_buf).to_vec())
}

enum Accum {
    Real(f64),
    Complex(f64, f64),
    S32(i32),
    S64(i64),
}

impl Accum {
    fn new(dtype: Dtype) -> Accum {
        match dtype {
            Dtype::C64 => Accum::Complex(0.0, 0.0),
            Dtype::S32 => Accum::S32(0),
            Dtype::S64 => Accum::S64(0),
            _ => Accum::Real(0.0),
        }
    }

    fn fma(&mut self, a: ScalarVal, b: ScalarVal) {
        match self {
            Accum::Real(acc) => *acc += a.to_f64() * b.to_f64(),
            Accum::Complex(re, im) => {
                let (ScalarVal::C64(ar, ai), ScalarVal::C64(br, bi)) = (a, b) else {
                    panic!("complex accumulator fed non-complex values");
                };
                let (ar, ai, br, bi) = (f64::from(ar), f64::from(ai), f64::from(br), f64::from(bi));
                *re += ar * br - ai * bi;
                *im += ar * bi + ai * br;
            }
            Accum::S32(acc) => {
                let (ScalarVal::S32(a), ScalarVal::S32(b)) = (a, b) else {
                    panic!("s32 accumulator fed non-s32 values");
                };
                *acc = acc.wrapping_add(a.wrapping_mul(b));
            }
            Accum::S64(acc) => {
                let (ScalarVal::S64(a), ScalarVal::S64(b)) = (a, b) else {
                    panic!("s64 accumulator fed non-s64 values");
                };
                *acc = acc.wrapping_add(a.wrapping_mul(b));
            }
        }
    }

    fn add_scalar(&mut self, v: ScalarVal) {
        match self {
            Accum::Real(acc) => *acc += v.to_f64(),
            Accum::Complex(re, im) => {
                let ScalarVal::C64(vr, vi) = v else {
                    panic!("complex accumulator fed non-complex addend");
                };
                *re += f64::from(vr);
                *im += f64::from(vi);
            }
            Accum::S32(acc) => {
                let ScalarVal::S32(v) = v else { panic!() };
                *acc = acc.wrapping_add(v);
            }
            Accum::S64(acc) => {
                let ScalarVal::S64(v) = v else { panic!() };
                *acc = acc.wrapping_add(v);
            }
        }
    }

    fn finish(self, dtype: Dtype) -> ScalarVal {
        match self {
            Accum::Real(acc) => ScalarVal::from_f64(dtype, acc),
            Accum::Complex(re, im) => ScalarVal::C64(re as f32, im as f32),
            Accum::S32(acc) => ScalarVal::S32(acc),
            Accum::S64(acc) => ScalarVal::S64(acc),
        }
    }
}

fn advance(index: &mut [u64], dims: &[u64]) -> bool {
    for d in (0..dims.len()).rev() {
        index[d] += 1;
        if index[d] < dims[d] {
            return true;
        }
        index[d] = 0;
    }
    false
}

fn linear_offset(shape: &TensorShape, index: &[u64]) -> usize {
    let strides = shape.strides();
    let elems: u64 = index.iter().zip(strides.iter()).map(|(i, s)| i * s).sum();
    usize::try_from(elems).unwrap() * usize::from(shape.dtype().size())
}

/// The naive reference: for every target element, reduce over the
/// contraction dimension; the addend, when present, is added in.
pub fn reference_dot(dot: &DotOp, lhs: &[u8], rhs: &[u8], addend: Option<&[u8]>) -> Vec<u8> {
    assert_eq!(lhs.len() as u64, dot.lhs.byte_size());
    assert_eq!(rhs.len() as u64, dot.rhs.byte_size());

    let dtype = dot.target.dtype();
    let mut out = vec![0u8; dot.target.byte_size() as usize];

    let lhs_rank = dot.lhs.rank();
    let lhs_reduction_dim = dot.lhs_contracting_dim;
    let rhs_reduction_dim = dot.rhs_contracting_dim;
    let reduction_size = if dot.lhs.is_scalar() {
        1
    } else {
        dot.lhs.dim(lhs_reduction_dim)
    };

    let target_dims = dot.target.dims().to_vec();
    let mut target_index = vec![0u64; target_dims.len()];
    let lhs_free_dims: Vec<usize> = (0..lhs_rank).filter(|&d| d != lhs_reduction_dim).collect();
    let rhs_free_dims: Vec<usize> = (0..dot.rhs.rank())
        .filter(|&d| d != rhs_reduction_dim)
        .collect();

    loop {
        let mut accum = Accum::new(dtype);
        for r in 0..reduction_size {
            let lhs_element = if dot.lhs.is_scalar() {
                decode_scalar(lhs, 0, dtype)
            } else {
                let mut full = vec![0u64; lhs_rank];
                full[lhs_reduction_dim] = r;
                for (slot, &d) in lhs_free_dims.iter().enumerate() {
                    full[d] = target_index[slot];
                }
                decode_scalar(lhs, linear_offset(&dot.lhs, &full), dtype)
            };
            let rhs_element = if dot.rhs.is_scalar() {
                decode_scalar(rhs, 0, dtype)
            } else {
                let mut full = vec![0u64; dot.rhs.rank()];
                full[rhs_reduction_dim] = r;
                for (slot, &d) in rhs_free_dims.iter().enumerate() {
                    full[d] = target_index[lhs_free_dims.len() + slot];
                }
                decode_scalar(rhs, linear_offset(&dot.rhs, &full), dtype)
            };
            accum.fma(lhs_element, rhs_element);
        }

        let target_offset = linear_offset(&dot.target, &target_index);
        if let Some(addend) = addend {
            accum.add_scalar(decode_scalar(addend, target_offset, dtype));
        }
        encode_scalar(&mut out, target_offset, accum.finish(dtype));

        if !advance(&mut target_index, &target_dims) {
            break;
        }
    }

    out
}

fn scalars_close(dtype: Dtype, got: ScalarVal, want: ScalarVal, tol: f64) -> bool {
    match dtype {
        Dtype::C64 => {
            let (ScalarVal::C64(gr, gi), ScalarVal::C64(wr, wi)) = (got, want) else {
                return false;
            };
            let close = |g: f32, w: f32| {
                f64::from((g - w).abs()) <= tol * f64::from(w.abs()).max(1.0)
            };
            close(gr, wr) && close(gi, wi)
        }
        Dtype::S32 | Dtype::S64 => got == want,
        _ => {
            let (g, w) = (got.to_f64(), want.to_f64());
            (g - w).abs() <= tol * w.abs().max(1.0)
        }
    }
}

/// Asserts elementwise closeness of two result buffers laid out as `shape`.
/// Only logical elements are compared; padding bytes are ignored.
pub fn assert_allclose(shape: &TensorShape, got: &[u8], want: &[u8]) {
    let dtype = shape.dtype();
    let tol = rel_tolerance(dtype);
    let dims = shape.dims().to_vec();
    let mut index = vec![0u64; dims.len()];
    loop {
        let offset = linear_offset(shape, &index);
        let g = decode_scalar(got, offset, dtype);
        let w = decode_scalar(want, offset, dtype);
        assert!(
            scalars_close(dtype, g, w, tol),
            "mismatch at {index:?}: got {g:?}, want {w:?} (tol {tol})"
        );
        if !advance(&mut index, &dims) {
            break;
        }
    }
}

/// Emits and runs `dot`, then checks the result against [reference_dot].
#[allow(clippy::too_many_arguments)]
pub fn check_emitted_dot(
    dot: &DotOp,
    options: &EmitOptions,
    target_features: &dyn TargetFeatures,
    lhs: &[u8],
    rhs: &[u8],
    addend: Option<&[u8]>,
    target_prefill: Option<&[u8]>,
) {
    let got = run_emitted_dot(dot, options, target_features, lhs, rhs, addend, target_prefill)
        .expect("emission failed");
    let want = reference_dot(dot, lhs, rhs, addend);
    assert_allclose(&dot.target, &got, &want);
}

pub fn pack_f32(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn unpack_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

pub fn pack_f64(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn pack_f16(values: &[f32]) -> Vec<u8> {
    values
        .iter()
        .flat_map(|v| f16::from_f32(*v).to_le_bytes())
        .collect()
}

pub fn pack_c64(values: &[(f32, f32)]) -> Vec<u8> {
    values
        .iter()
        .flat_map(|(re, im)| {
            re.to_le_bytes()
                .into_iter()
                .chain(im.to_le_bytes())
                .collect::<Vec<_>>()
        })
        .collect()
}

pub fn unpack_c64(bytes: &[u8]) -> Vec<(f32, f32)> {
    bytes
        .chunks_exact(8)
        .map(|chunk| {
            (
                f32::from_le_bytes(chunk[0..4].try_into().unwrap()),
                f32::from_le_bytes(chunk[4..8].try_into().unwrap()),
            )
        })
        .collect()
}

/// Scatters logically-ordered (row-major) f32 values into a buffer laid out
/// per `shape`. With a row-major unpadded shape this is [pack_f32].
pub fn lay_out_f32(shape: &TensorShape, logical: &[f32]) -> Vec<u8> {
    assert_eq!(logical.len() as u64, shape.element_count());
    let mut out = vec![0u8; shape.byte_size() as usize];
    let dims = shape.dims().to_vec();
    let mut index = vec![0u64; dims.len()];
    for value in logical {
        encode_scalar(
            &mut out,
            linear_offset(shape, &index),
            ScalarVal::F32(*value),
        );
        advance(&mut index, &dims);
    }
    out
}

/// Gathers a buffer laid out per `shape` back into logical row-major order.
pub fn gather_f32(shape: &TensorShape, bytes: &[u8]) -> Vec<f32> {
    let dims = shape.dims().to_vec();
    let mut index = vec![0u64; dims.len()];
    let mut out = Vec::with_capacity(shape.element_count() as usize);
    loop {
        let ScalarVal::F32(v) = decode_scalar(bytes, linear_offset(shape, &index), Dtype::F32)
        else {
            unreachable!();
        };
        out.push(v);
        if !advance(&mut index, &dims) {
            break;
        }
    }
    out
}

/// A second, independent rank-2 reference for row-major canonical matmuls,
/// routed through `ndarray`; used to cross-check [reference_dot] itself.
pub fn ndarray_matmul<T>(m: usize, k: usize, n: usize, lhs: Vec<T>, rhs: Vec<T>) -> Vec<T>
where
    T: ndarray::LinalgScalar,
{
    let lhs = Array2::from_shape_vec((m, k), lhs).unwrap();
    let rhs = Array2::from_shape_vec((k, n), rhs).unwrap();
    let mut out = Array2::<T>::zeros((m, n));
    general_mat_mul(T::one(), &lhs, &rhs, T::zero(), &mut out);
    out.into_raw_vec()
}

#[cfg(test)]
pub(crate) fn random_f32s(count: usize, rng: &mut impl rand::Rng) -> Vec<f32> {
    (0..count).map(|_| rng.gen_range(-2.0..2.0)).collect()
}
