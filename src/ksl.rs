//! Kernel support library: structured control-flow emission and the
//! outlined-kernel helper.

use crate::ir::builder::FuncBuilder;
use crate::ir::{CmpPred, FnAttrs, Value};

/// Loop bounds can be given as compile-time constants or as IR values.
pub trait IntoBound {
    fn into_bound(self, b: &mut FuncBuilder) -> Value;
}

impl IntoBound for i64 {
    fn into_bound(self, b: &mut FuncBuilder) -> Value {
        b.const_i64(self)
    }
}

impl IntoBound for Value {
    fn into_bound(self, _b: &mut FuncBuilder) -> Value {
        self
    }
}

/// Emits a counted loop invoking `body(induction_var)`.
pub fn for_loop<'m>(
    b: &mut FuncBuilder<'m>,
    name: &str,
    start: impl IntoBound,
    end: impl IntoBound,
    step: i64,
    body: impl FnOnce(&mut FuncBuilder<'m>, Value),
) {
    let start = start.into_bound(b);
    let end = end.into_bound(b);
    let step = b.const_i64(step);
    b.for_loop(name, start, end, step, body);
}

/// Like [for_loop], but the first iteration is peeled so the body sees a
/// compile-time flag. Used to fuse the initialize-accumulator-on-first-
/// iteration idiom without a branch in the steady state.
pub fn for_loop_peeled<'m>(
    b: &mut FuncBuilder<'m>,
    name: &str,
    start: i64,
    end: i64,
    step: i64,
    mut body: impl FnMut(&mut FuncBuilder<'m>, Value, bool),
) {
    if start >= end {
        return;
    }
    let first = b.const_i64(start);
    body(b, first, true);
    if start + step < end {
        for_loop(b, name, start + step, end, step, |b, iv| body(b, iv, false));
    }
}

/// Like [for_loop], but the body also receives `indvar == start` as a
/// runtime flag.
pub fn for_loop_with_first_flag<'m>(
    b: &mut FuncBuilder<'m>,
    name: &str,
    start: impl IntoBound,
    end: impl IntoBound,
    step: i64,
    body: impl FnOnce(&mut FuncBuilder<'m>, Value, Value),
) {
    let start = start.into_bound(b);
    let end = end.into_bound(b);
    let step = b.const_i64(step);
    b.for_loop(name, start, end, step, |b, iv| {
        let is_first = b.icmp(CmpPred::Eq, iv, start);
        body(b, iv, is_first);
    });
}

pub fn if_then_else<'m>(
    b: &mut FuncBuilder<'m>,
    cond: Value,
    then_body: impl FnOnce(&mut FuncBuilder<'m>),
    else_body: impl FnOnce(&mut FuncBuilder<'m>),
) {
    b.if_then_else(cond, then_body, else_body);
}

/// Wraps `body` in a named function and emits a call to it.
///
/// If a function named `cache_key` already exists in the module only the
/// call is emitted, so repeated dots with identical configurations share one
/// kernel body. `None` arguments are dropped (an absent addend changes the
/// key, so arities stay consistent per key).
pub fn emit_and_call_outlined_kernel(
    b: &mut FuncBuilder,
    fast_math: bool,
    optimize_for_size: bool,
    cache_key: &str,
    args: &[Option<Value>],
    body: impl FnOnce(&mut FuncBuilder, &[Value]),
) {
    let kept: Vec<Value> = args.iter().copied().flatten().collect();
    if !b.module().has_function(cache_key) {
        let param_types = kept.iter().map(|&v| b.value_type(v)).collect::<Vec<_>>();
        let attrs = FnAttrs {
            fast_math,
            optimize_for_size,
        };
        let mut kernel = FuncBuilder::new(b.module_mut(), cache_key, param_types, attrs);
        let params = kernel.param_values();
        body(&mut kernel, &params);
        kernel.finish();
    }
    b.call(cache_key, &kept);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Dtype;
    use crate::ir::interp::{Evaluator, Memory, PtrVal, RtVal};
    use crate::ir::{ArithOp, Module, Type};

    fn read_f32s(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    /// Resets the slot on the first iteration and doubles it afterwards,
    /// exercising the initialize-vs-accumulate split of the peeled loop.
    fn emit_first_flag_counter(fb: &mut FuncBuilder, out: Value, iters: i64) {
        for_loop_peeled(fb, "count", 0, iters, 1, |fb, _iv, is_first| {
            let zero = fb.const_i64(0);
            if is_first {
                let z = fb.zero_scalar(Dtype::F32);
                fb.store_scalar(z, out, zero);
            } else {
                let current = fb.load_scalar(out, zero);
                let doubled = fb.arith(ArithOp::Add, current, current);
                fb.store_scalar(doubled, out, zero);
            }
        });
    }

    #[test]
    fn test_peeled_loop_body_sees_compile_time_flag() {
        // Start the buffer at 3.0. The first iteration resets it to 0.0 and
        // each of the remaining iterations doubles it, so any nonzero result
        // would mean the flag was wrong.
        let mut module = Module::new();
        let mut fb = FuncBuilder::new(
            &mut module,
            "main",
            vec![Type::Ptr(Dtype::F32)],
            crate::ir::FnAttrs::default(),
        );
        let params = fb.param_values();
        emit_first_flag_counter(&mut fb, params[0], 5);
        fb.finish();

        let mut mem = Memory::new();
        let buf = mem.alloc(3.0f32.to_le_bytes().to_vec());
        Evaluator::new(&module).run(
            "main",
            &[RtVal::Ptr(PtrVal::new(buf, Dtype::F32))],
            &mut mem,
        );
        assert_eq!(read_f32s(mem.buffer(buf)), vec![0.0]);
    }

    #[test]
    fn test_peeled_loop_with_empty_range_emits_nothing() {
        let mut module = Module::new();
        let mut fb = FuncBuilder::new(&mut module, "main", vec![], crate::ir::FnAttrs::default());
        for_loop_peeled(&mut fb, "none", 0, 0, 4, |_fb, _iv, _first| {
            panic!("body must not be invoked for an empty range");
        });
        fb.finish();
        assert!(module.get_function("main").unwrap().body.is_empty());
    }

    #[test]
    fn test_runtime_first_flag() {
        // out[i] = 1.0 if i is the first iteration else 2.0, for i in 2..6.
        let mut module = Module::new();
        let mut fb = FuncBuilder::new(
            &mut module,
            "main",
            vec![Type::Ptr(Dtype::F32), Type::Ptr(Dtype::F32)],
            crate::ir::FnAttrs::default(),
        );
        let params = fb.param_values();
        let (consts, out) = (params[0], params[1]);
        for_loop_with_first_flag(&mut fb, "flagged", 2, 6, 1, |fb, iv, is_first| {
            if_then_else(
                fb,
                is_first,
                |fb| {
                    let zero = fb.const_i64(0);
                    let one = fb.load_scalar(consts, zero);
                    fb.store_scalar(one, out, iv);
                },
                |fb| {
                    let one_idx = fb.const_i64(1);
                    let two = fb.load_scalar(consts, one_idx);
                    fb.store_scalar(two, out, iv);
                },
            );
        });
        fb.finish();

        let mut mem = Memory::new();
        let consts = mem.alloc([1.0f32, 2.0].iter().flat_map(|v| v.to_le_bytes()).collect());
        let out = mem.alloc_zeroed(6 * 4);
        Evaluator::new(&module).run(
            "main",
            &[
                RtVal::Ptr(PtrVal::new(consts, Dtype::F32)),
                RtVal::Ptr(PtrVal::new(out, Dtype::F32)),
            ],
            &mut mem,
        );
        assert_eq!(
            read_f32s(mem.buffer(out)),
            vec![0.0, 0.0, 1.0, 2.0, 2.0, 2.0]
        );
    }

    #[test]
    fn test_outlined_kernel_dedup() {
        let mut module = Module::new();
        let mut fb = FuncBuilder::new(
            &mut module,
            "main",
            vec![Type::Ptr(Dtype::F32)],
            crate::ir::FnAttrs::default(),
        );
        let params = fb.param_values();
        for _ in 0..2 {
            emit_and_call_outlined_kernel(
                &mut fb,
                true,
                false,
                "incr_f32_once",
                &[Some(params[0])],
                |kb, kp| {
                    let zero = kb.const_i64(0);
                    let x = kb.load_scalar(kp[0], zero);
                    let y = kb.arith(ArithOp::Add, x, x);
                    kb.store_scalar(y, kp[0], zero);
                },
            );
        }
        fb.finish();

        // One outlined function, two call sites.
        assert_eq!(module.functions().count(), 2);
        assert_eq!(module.count_calls_to("incr_f32_once"), 2);
        let kernel = module.get_function("incr_f32_once").unwrap();
        assert!(kernel.attrs.fast_math);
        assert!(!kernel.attrs.optimize_for_size);

        // Both calls execute: 1.0 doubles twice.
        let mut mem = Memory::new();
        let buf = mem.alloc(1.0f32.to_le_bytes().to_vec());
        Evaluator::new(&module).run(
            "main",
            &[RtVal::Ptr(PtrVal::new(buf, Dtype::F32))],
            &mut mem,
        );
        assert_eq!(read_f32s(mem.buffer(buf)), vec![4.0]);
    }

    #[test]
    fn test_outlined_kernel_drops_absent_args() {
        let mut module = Module::new();
        let mut fb = FuncBuilder::new(
            &mut module,
            "main",
            vec![Type::Ptr(Dtype::F32), Type::Ptr(Dtype::F32)],
            crate::ir::FnAttrs::default(),
        );
        let params = fb.param_values();
        emit_and_call_outlined_kernel(
            &mut fb,
            false,
            false,
            "no_addend",
            &[Some(params[0]), None, Some(params[1])],
            |_kb, kp| {
                assert_eq!(kp.len(), 2);
            },
        );
        fb.finish();
        assert_eq!(module.get_function("no_addend").unwrap().params.len(), 2);
    }
}
