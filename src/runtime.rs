//! The runtime matmul library: the symbol table the emitter links against
//! and native implementations the evaluator can dispatch to.
//!
//! The called functions all share one signature,
//! `void(run_options: byte*, out: T*, lhs: T*, rhs: T*, m: i64, n: i64,
//! k: i64, transpose_lhs: i32, transpose_rhs: i32)`, and interpret every
//! matrix as column-major. The multi-threaded entry points accept the
//! opaque run-options value but execute sequentially here; a threaded
//! runtime would pull its thread pool out of it.

use crate::common::Dtype;
use crate::ir::interp::{Evaluator, Memory, PtrVal, RtVal, ScalarVal};
use itertools::iproduct;

/// Selects the external function implementing a rank-2 dot for `dtype`.
///
/// Returns `None` for element types the runtime has no kernel for. F16 has
/// no alternate-backend build, so the flag is ignored for it.
pub fn matmul_symbol_name(
    dtype: Dtype,
    multi_threaded: bool,
    alternate_backend: bool,
) -> Option<&'static str> {
    match (dtype, multi_threaded, alternate_backend) {
        (Dtype::F16, false, _) => Some("__tiledot_matmul_f16"),
        (Dtype::F16, true, _) => Some("__tiledot_matmul_mt_f16"),
        (Dtype::F32, false, false) => Some("__tiledot_matmul_f32"),
        (Dtype::F32, true, false) => Some("__tiledot_matmul_mt_f32"),
        (Dtype::F32, false, true) => Some("__tiledot_blas_matmul_f32"),
        (Dtype::F32, true, true) => Some("__tiledot_blas_matmul_mt_f32"),
        (Dtype::F64, false, false) => Some("__tiledot_matmul_f64"),
        (Dtype::F64, true, false) => Some("__tiledot_matmul_mt_f64"),
        (Dtype::F64, false, true) => Some("__tiledot_blas_matmul_f64"),
        (Dtype::F64, true, true) => Some("__tiledot_blas_matmul_mt_f64"),
        _ => None,
    }
}

fn all_symbols() -> Vec<(&'static str, Dtype)> {
    let mut symbols: Vec<(&'static str, Dtype)> = Vec::new();
    for (dtype, mt, alt) in iproduct!(
        [Dtype::F16, Dtype::F32, Dtype::F64],
        [false, true],
        [false, true]
    ) {
        if let Some(name) = matmul_symbol_name(dtype, mt, alt) {
            // F16 ignores the alternate-backend flag, so skip repeats.
            if !symbols.iter().any(|(existing, _)| *existing == name) {
                symbols.push((name, dtype));
            }
        }
    }
    symbols
}

/// Registers every runtime matmul symbol with the evaluator.
pub fn install(evaluator: &mut Evaluator) {
    for (name, dtype) in all_symbols() {
        evaluator.register_external(name, matmul_entry(dtype));
    }
}

fn arg_ptr(args: &[RtVal], i: usize) -> PtrVal {
    match &args[i] {
        RtVal::Ptr(p) => *p,
        other => panic!("runtime matmul argument {i} should be a pointer, got {other:?}"),
    }
}

fn arg_i64(args: &[RtVal], i: usize) -> i64 {
    match &args[i] {
        RtVal::I64(v) => *v,
        other => panic!("runtime matmul argument {i} should be an i64, got {other:?}"),
    }
}

fn arg_i32(args: &[RtVal], i: usize) -> i32 {
    match &args[i] {
        RtVal::I32(v) => *v,
        other => panic!("runtime matmul argument {i} should be an i32, got {other:?}"),
    }
}

fn matmul_entry(dtype: Dtype) -> Box<dyn Fn(&mut Memory, &[RtVal])> {
    Box::new(move |mem, args| {
        assert_eq!(args.len(), 9, "runtime matmul takes 9 arguments");
        let out = arg_ptr(args, 1);
        let lhs = arg_ptr(args, 2);
        let rhs = arg_ptr(args, 3);
        let m = arg_i64(args, 4);
        let n = arg_i64(args, 5);
        let k = arg_i64(args, 6);
        let transpose_lhs = arg_i32(args, 7) != 0;
        let transpose_rhs = arg_i32(args, 8) != 0;

        // Column-major addressing; a transposed operand's buffer holds the
        // transposed extents.
        let lhs_index = |i: i64, l: i64| if transpose_lhs { l + i * k } else { i + l * m };
        let rhs_index = |l: i64, j: i64| if transpose_rhs { j + l * n } else { l + j * k };

        for j in 0..n {
            for i in 0..m {
                let mut acc = 0.0f64;
                for l in 0..k {
                    let a = mem.read_scalar(lhs, lhs_index(i, l)).to_f64();
                    let b = mem.read_scalar(rhs, rhs_index(l, j)).to_f64();
                    acc += a * b;
                }
                mem.write_scalar(out, i + j * m, ScalarVal::from_f64(dtype, acc));
            }
        }
    })
}
