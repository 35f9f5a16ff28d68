//! Dot-operation dispatch: picks scalar, tiled-GEMV, GEBP, runtime-call, or
//! naive loop-nest emission for a dot descriptor and appends the chosen
//! kernel to the caller's module.

use crate::common::Dtype;
use crate::gebp::{GebpConfig, GebpDims, MatrixMatrixBlockPanelEmitter};
use crate::gemv::{ColumnMajorGemvEmitter, GemvConfig, GemvKind, RowMajorGemvEmitter};
use crate::ir::builder::FuncBuilder;
use crate::ir::{ArithOp, Type, Value};
use crate::ksl;
use crate::runtime;
use crate::shape::TensorShape;
use crate::target::{TargetFeatures, RUNTIME_EXPECTED_TENSOR_ALIGNMENT};
use serde::{Deserialize, Serialize};

/// Default vector width when the target cannot report its register size.
const UNKNOWN_TARGET_VECTOR_REGISTER_SIZE: i64 = 4;

/// A dot operation: `target = lhs · rhs`, contracting `lhs_contracting_dim`
/// against `rhs_contracting_dim`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DotOp {
    pub lhs: TensorShape,
    pub rhs: TensorShape,
    pub target: TensorShape,
    pub lhs_contracting_dim: usize,
    pub rhs_contracting_dim: usize,
}

impl DotOp {
    pub fn new(
        lhs: TensorShape,
        rhs: TensorShape,
        target: TensorShape,
        lhs_contracting_dim: usize,
        rhs_contracting_dim: usize,
    ) -> DotOp {
        assert_eq!(lhs.dtype(), rhs.dtype());
        assert_eq!(lhs.dtype(), target.dtype());
        if !lhs.is_scalar() && !rhs.is_scalar() {
            assert!(lhs_contracting_dim < lhs.rank());
            assert!(rhs_contracting_dim < rhs.rank());
            assert_eq!(target.rank(), lhs.rank() + rhs.rank() - 2);
        }
        DotOp {
            lhs,
            rhs,
            target,
            lhs_contracting_dim,
            rhs_contracting_dim,
        }
    }
}

/// Matmul dimensions derived once from a rank-2 dot descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatMulDims {
    pub m: i64,
    pub k: i64,
    pub n: i64,
    pub lhs_column_major: bool,
    pub lhs_non_canonical: bool,
    pub rhs_column_major: bool,
    pub rhs_non_canonical: bool,
    pub target_column_major: bool,
}

impl MatMulDims {
    pub fn from_dot(dot: &DotOp) -> MatMulDims {
        assert_eq!(dot.target.rank(), 2);
        MatMulDims {
            m: dot.lhs.dim(1 - dot.lhs_contracting_dim) as i64,
            k: dot.lhs.dim(dot.lhs_contracting_dim) as i64,
            n: dot.rhs.dim(1 - dot.rhs_contracting_dim) as i64,
            lhs_column_major: dot.lhs.minor(0) == 0,
            lhs_non_canonical: dot.lhs_contracting_dim == 0,
            rhs_column_major: dot.rhs.minor(0) == 0,
            rhs_non_canonical: dot.rhs_contracting_dim == 1,
            target_column_major: dot.target.minor(0) == 0,
        }
    }
}

/// Per-module emission configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EmitOptions {
    pub fast_math: bool,
    pub optimize_for_size: bool,
    /// Whether the runtime-library path targets the multi-threaded entry
    /// points. The tiled IR GEMM is disabled in that mode.
    pub multi_threaded_runtime: bool,
    /// Gates the GEBP path; off by default.
    pub experimental_ir_gemm: bool,
    /// Selects the alternate runtime backend symbols (F32/F64 only).
    pub alternate_runtime_backend: bool,
    pub gemv_tiling_factor: i64,
    /// `(tile_m, tile_k, tile_n_in_vector_width)` for the GEBP kernel.
    pub gemm_tile: (i64, i64, i64),
}

impl Default for EmitOptions {
    fn default() -> Self {
        EmitOptions {
            fast_math: false,
            optimize_for_size: false,
            multi_threaded_runtime: false,
            experimental_ir_gemm: false,
            alternate_runtime_backend: false,
            gemv_tiling_factor: 8,
            gemm_tile: (12, 2, 8),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum EmitError {
    #[error("unsupported element type {0} for dot emission")]
    UnsupportedType(Dtype),
}

/// Emits `target = lhs · rhs` (`addend + lhs · rhs` on the paths that accept
/// an addend) into the function under construction.
///
/// `run_options` is an opaque pointer forwarded verbatim to the runtime
/// library path. Fails only for element types outside
/// {F16, F32, F64, C64, S32, S64}; once dispatch begins, emission cannot
/// fail.
#[allow(clippy::too_many_arguments)]
pub fn emit_dot_operation(
    dot: &DotOp,
    target: Value,
    lhs: Value,
    rhs: Value,
    addend: Option<Value>,
    run_options: Value,
    target_features: &dyn TargetFeatures,
    options: &EmitOptions,
    b: &mut FuncBuilder,
) -> Result<(), EmitError> {
    let dtype = dot.target.dtype();
    if !matches!(
        dtype,
        Dtype::F16 | Dtype::F32 | Dtype::F64 | Dtype::C64 | Dtype::S32 | Dtype::S64
    ) {
        return Err(EmitError::UnsupportedType(dtype));
    }
    let emitter = DotOpEmitter {
        dot,
        target,
        lhs,
        rhs,
        addend,
        run_options,
        target_features,
        options,
    };
    emitter.emit(b)
}

/// For vector-matrix products contracting the RHS along dimension 0, making
/// the RHS column-major is always profitable: the kernel then walks it with
/// contiguous column loads. Returns the operand index to re-lay-out.
pub fn profitable_to_make_dot_operand_column_major(dot: &DotOp) -> Option<usize> {
    if dot.target.rank() == 2 && dot.target.dim(0) == 1 && dot.rhs_contracting_dim == 0 {
        return Some(1);
    }
    None
}

struct DotOpEmitter<'a> {
    dot: &'a DotOp,
    target: Value,
    lhs: Value,
    rhs: Value,
    addend: Option<Value>,
    run_options: Value,
    target_features: &'a dyn TargetFeatures,
    options: &'a EmitOptions,
}

impl DotOpEmitter<'_> {
    fn emit(&self, b: &mut FuncBuilder) -> Result<(), EmitError> {
        if self.dot.lhs.is_scalar() || self.dot.rhs.is_scalar() {
            assert!(
                self.dot.lhs.is_scalar() && self.dot.rhs.is_scalar(),
                "mixed scalar/array dot operands"
            );
            self.emit_scalar_dot(b);
            return Ok(());
        }

        assert_eq!(
            self.dot.lhs.dim(self.dot.lhs_contracting_dim),
            self.dot.rhs.dim(self.dot.rhs_contracting_dim),
            "contraction dimensions must have equal sizes"
        );

        if self.emit_tiled_dot_if_profitable(b) {
            return Ok(());
        }

        assert!(
            self.addend.is_none(),
            "addend fusion is only supported on the tiled paths"
        );

        if self.potentially_implemented_as_runtime_dot() {
            return self.emit_call_to_runtime(b);
        }

        self.emit_naive_loop_nest(b);
        Ok(())
    }

    fn mat_mult_dims(&self) -> MatMulDims {
        MatMulDims::from_dot(self.dot)
    }

    /// Matrix-vector products of floating-point or integral type lower to
    /// the tiled IR emitters. The tiled paths address operands through their
    /// minor extents, so padded buffers are excluded.
    fn profitable_to_implement_in_tiled_ir(&self) -> bool {
        let shape = &self.dot.target;
        shape.rank() == 2
            && (shape.dim(0) == 1 || shape.dim(1) == 1)
            && (shape.dtype().is_floating_point() || shape.dtype().is_integral())
            && !self.dot.lhs.is_padded()
            && !self.dot.rhs.is_padded()
            && !self.dot.target.is_padded()
    }

    fn vector_register_element_size(&self, dtype: Dtype) -> i64 {
        // The register size for the compilation target is not always known;
        // fall back to a default IR vector width when it is not.
        let reported = self.target_features.vector_register_num_elements(dtype);
        if reported == 0 {
            UNKNOWN_TARGET_VECTOR_REGISTER_SIZE
        } else {
            reported
        }
    }

    fn emit_tiled_dot_if_profitable(&self, b: &mut FuncBuilder) -> bool {
        if self.dot.target.rank() != 2 {
            return false;
        }

        let dtype = self.dot.target.dtype();
        if !dtype.is_floating_point() && !dtype.is_integral() {
            return false;
        }

        if self.dot.lhs.is_padded() || self.dot.rhs.is_padded() || self.dot.target.is_padded() {
            return false;
        }

        let mat_mult_dims = self.mat_mult_dims();
        let mut is_column_major_matrix_vector = false;
        let mut is_row_major_matrix_vector = false;

        let mut m = 0;
        let mut k = 0;
        let mut swap_operands = false;

        if mat_mult_dims.m == 1 {
            // A vector times a matrix; the kernel sees the transposed RHS as
            // its matrix, so an effectively row-major RHS means an
            // effectively column-major kernel LHS.
            let rhs_effectively_row_major =
                mat_mult_dims.rhs_non_canonical ^ !mat_mult_dims.rhs_column_major;
            k = mat_mult_dims.k;
            m = mat_mult_dims.n;
            swap_operands = true;
            if rhs_effectively_row_major {
                is_column_major_matrix_vector = true;
            } else {
                is_row_major_matrix_vector = true;
            }
        }

        if mat_mult_dims.n == 1 {
            let lhs_effectively_column_major =
                mat_mult_dims.lhs_non_canonical ^ mat_mult_dims.lhs_column_major;
            m = mat_mult_dims.m;
            k = mat_mult_dims.k;
            swap_operands = false;
            if lhs_effectively_column_major {
                is_column_major_matrix_vector = true;
            } else {
                is_row_major_matrix_vector = true;
            }
        }

        if !is_column_major_matrix_vector && !is_row_major_matrix_vector {
            return self.emit_experimental_gebp_dot_if_enabled(b, &mat_mult_dims);
        }

        let tiling_factor = self.options.gemv_tiling_factor;
        assert!(tiling_factor > 0);

        let result_op = self.target;
        let (lhs_op, rhs_op) = if swap_operands {
            (self.rhs, self.lhs)
        } else {
            (self.lhs, self.rhs)
        };

        let vector_register_element_size = self.vector_register_element_size(dtype);

        if is_column_major_matrix_vector {
            log::debug!("emitting column major matrix-vector multiply with m = {m} and k = {k}");
            let config = GemvConfig {
                kind: GemvKind::ColumnMajor,
                dtype,
                tile_rows: vector_register_element_size,
                tile_cols: tiling_factor,
                m,
                k,
                has_addend: self.addend.is_some(),
            };
            ksl::emit_and_call_outlined_kernel(
                b,
                self.options.fast_math,
                self.options.optimize_for_size,
                &config.cache_key(),
                &[Some(lhs_op), Some(rhs_op), self.addend, Some(result_op)],
                |kernel, params| {
                    let (addend, result) = if config.has_addend {
                        (Some(params[2]), params[3])
                    } else {
                        (None, params[2])
                    };
                    ColumnMajorGemvEmitter::new(config.clone(), params[0], params[1], addend, result)
                        .emit(kernel);
                },
            );
        } else {
            log::debug!("emitting row major matrix-vector multiply with m = {m} and k = {k}");
            let config = GemvConfig {
                kind: GemvKind::RowMajor,
                dtype,
                tile_rows: tiling_factor,
                tile_cols: vector_register_element_size,
                m,
                k,
                has_addend: self.addend.is_some(),
            };
            ksl::emit_and_call_outlined_kernel(
                b,
                self.options.fast_math,
                self.options.optimize_for_size,
                &config.cache_key(),
                &[Some(lhs_op), Some(rhs_op), self.addend, Some(result_op)],
                |kernel, params| {
                    let (addend, result) = if config.has_addend {
                        (Some(params[2]), params[3])
                    } else {
                        (None, params[2])
                    };
                    RowMajorGemvEmitter::new(config.clone(), params[0], params[1], addend, result)
                        .emit(kernel);
                },
            );
        }

        true
    }

    fn emit_experimental_gebp_dot_if_enabled(
        &self,
        b: &mut FuncBuilder,
        mat_mult_dims: &MatMulDims,
    ) -> bool {
        if !self.options.experimental_ir_gemm || self.options.multi_threaded_runtime {
            return false;
        }

        if mat_mult_dims.lhs_non_canonical || mat_mult_dims.rhs_non_canonical {
            return false;
        }

        let dtype = self.dot.target.dtype();
        match dtype {
            Dtype::F32 | Dtype::F64 | Dtype::S32 | Dtype::S64 => (),
            _ => return false,
        }

        if !(mat_mult_dims.lhs_column_major == mat_mult_dims.rhs_column_major
            && mat_mult_dims.rhs_column_major == mat_mult_dims.target_column_major)
        {
            return false;
        }

        let mut lhs = self.lhs;
        let mut rhs = self.rhs;
        let target = self.target;
        let mut m = mat_mult_dims.m;
        let k = mat_mult_dims.k;
        let mut n = mat_mult_dims.n;

        // A column-major GEMM is a row-major GEMM over the transposes:
        // (A·B)ᵀ = Bᵀ·Aᵀ.
        if mat_mult_dims.lhs_column_major {
            std::mem::swap(&mut lhs, &mut rhs);
            std::mem::swap(&mut m, &mut n);
        }

        // GEBP is purely additive: a single bulk zero of the result is
        // cheaper and more vectorizable than per-tile initialization.
        let size_bytes = (m * n) as u64 * u64::from(dtype.size());
        b.memset(
            target,
            0,
            size_bytes,
            self.target_features.minimum_alignment_for_allocation(size_bytes),
        );

        let max_target_vector_width = self.vector_register_element_size(dtype);
        let (tile_size_m, tile_size_k, tile_size_n_in_vector_width) = self.options.gemm_tile;

        let config = GebpConfig {
            dtype,
            dims: GebpDims { m, k, n },
            max_vectorization_width: max_target_vector_width,
            max_vector_count: tile_size_n_in_vector_width,
            min_vectorization_width: std::cmp::min(4, max_target_vector_width),
            tile_m: tile_size_m,
            tile_k: tile_size_k,
        };

        log::debug!("emitting GEBP kernel with config {}", config.cache_key());

        ksl::emit_and_call_outlined_kernel(
            b,
            self.options.fast_math,
            self.options.optimize_for_size,
            &config.cache_key(),
            &[Some(lhs), Some(rhs), Some(target)],
            |kernel, params| {
                MatrixMatrixBlockPanelEmitter::new(config.clone(), params[0], params[1], params[2])
                    .emit(kernel);
            },
        );

        true
    }

    fn is_rank2_with_no_padding(shape: &TensorShape) -> bool {
        shape.rank() == 2 && !shape.is_padded()
    }

    fn are_valid_runtime_shapes(&self) -> bool {
        let output_type = self.dot.target.dtype();
        if !matches!(output_type, Dtype::F16 | Dtype::F32 | Dtype::F64) {
            return false;
        }

        if !(Self::is_rank2_with_no_padding(&self.dot.lhs)
            && Self::is_rank2_with_no_padding(&self.dot.rhs)
            && Self::is_rank2_with_no_padding(&self.dot.target))
        {
            return false;
        }

        let is_aligned = |shape: &TensorShape| {
            self.target_features
                .minimum_alignment_for_allocation(shape.byte_size())
                >= RUNTIME_EXPECTED_TENSOR_ALIGNMENT
        };
        if !is_aligned(&self.dot.lhs)
            || !is_aligned(&self.dot.rhs)
            || !is_aligned(&self.dot.target)
        {
            return false;
        }

        // The runtime interprets its operands as column-major, and the
        // emitter's layout transform assumes the three buffers agree on
        // storage order; disagreement falls through to the loop nest.
        let dims = self.mat_mult_dims();
        dims.lhs_column_major == dims.rhs_column_major
            && dims.rhs_column_major == dims.target_column_major
    }

    fn potentially_implemented_as_runtime_dot(&self) -> bool {
        if self.profitable_to_implement_in_tiled_ir() {
            return false;
        }
        self.are_valid_runtime_shapes()
    }

    fn emit_scalar_dot(&self, b: &mut FuncBuilder) {
        let zero = b.const_i64(0);
        let lhs_value = b.load_scalar(self.lhs, zero);
        let rhs_value = b.load_scalar(self.rhs, zero);
        let result = if self.dot.target.dtype().is_complex() {
            let lhs_real = b.real(lhs_value);
            let lhs_imag = b.imag(lhs_value);
            let rhs_real = b.real(rhs_value);
            let rhs_imag = b.imag(rhs_value);
            let ac = b.arith(ArithOp::Mul, lhs_real, rhs_real);
            let bd = b.arith(ArithOp::Mul, lhs_imag, rhs_imag);
            let real = b.arith(ArithOp::Sub, ac, bd);
            let ad = b.arith(ArithOp::Mul, lhs_real, rhs_imag);
            let bc = b.arith(ArithOp::Mul, lhs_imag, rhs_real);
            let imag = b.arith(ArithOp::Add, ad, bc);
            b.make_complex(real, imag)
        } else {
            b.arith(ArithOp::Mul, lhs_value, rhs_value)
        };
        b.store_scalar(result, self.target, zero);
    }

    /// Calls the runtime library. The runtime expects column-major operands,
    /// so a row-major dot is rewritten through (A·B)ᵀ = Bᵀ·Aᵀ: swap the
    /// operands, `m` with `n`, and the two transpose flags.
    fn emit_call_to_runtime(&self, b: &mut FuncBuilder) -> Result<(), EmitError> {
        let dtype = self.dot.target.dtype();
        let fn_name = runtime::matmul_symbol_name(
            dtype,
            self.options.multi_threaded_runtime,
            self.options.alternate_runtime_backend,
        )
        .ok_or(EmitError::UnsupportedType(dtype))?;

        let mut dims = self.mat_mult_dims();
        assert_eq!(dims.lhs_column_major, dims.rhs_column_major);

        let mut lhs = self.lhs;
        let mut rhs = self.rhs;
        let mut transpose_lhs = dims.lhs_non_canonical;
        let mut transpose_rhs = dims.rhs_non_canonical;

        if !dims.lhs_column_major {
            std::mem::swap(&mut dims.m, &mut dims.n);
            std::mem::swap(&mut lhs, &mut rhs);
            std::mem::swap(&mut transpose_lhs, &mut transpose_rhs);
        }

        log::debug!(
            "emitting runtime matmul call to {fn_name} with m = {}, n = {}, k = {}",
            dims.m,
            dims.n,
            dims.k
        );

        let m = b.const_i64(dims.m);
        let n = b.const_i64(dims.n);
        let k = b.const_i64(dims.k);
        let transpose_lhs = b.const_i32(i32::from(transpose_lhs));
        let transpose_rhs = b.const_i32(i32::from(transpose_rhs));
        b.call(
            fn_name,
            &[
                self.run_options,
                self.target,
                lhs,
                rhs,
                m,
                n,
                k,
                transpose_lhs,
                transpose_rhs,
            ],
        );
        Ok(())
    }

    /// The fallback for any rank and element type: a perfect loop nest over
    /// the non-contraction dimensions of the LHS, then of the RHS, with an
    /// innermost reduction into a stack accumulator.
    fn emit_naive_loop_nest(&self, b: &mut FuncBuilder) {
        let lhs_shape = &self.dot.lhs;
        let rhs_shape = &self.dot.rhs;
        let lhs_reduction_dim = self.dot.lhs_contracting_dim;
        let rhs_reduction_dim = self.dot.rhs_contracting_dim;
        let dtype = self.dot.target.dtype();

        // Outermost loops first: each operand's dimensions in major-to-minor
        // order, skipping the reduction dimension.
        let mut order: Vec<(usize, usize, i64)> = Vec::new();
        for (operand, shape, reduction_dim) in [
            (0, lhs_shape, lhs_reduction_dim),
            (1, rhs_shape, rhs_reduction_dim),
        ] {
            for i in (0..shape.rank()).rev() {
                let dim = shape.minor(i);
                if dim != reduction_dim {
                    order.push((operand, dim, shape.dim(dim) as i64));
                }
            }
        }

        let accum_slot = b.alloca(Type::Scalar(dtype));
        let reduction_size = lhs_shape.dim(lhs_reduction_dim) as i64;

        let mut lhs_index: Vec<Option<Value>> = vec![None; lhs_shape.rank()];
        let mut rhs_index: Vec<Option<Value>> = vec![None; rhs_shape.rank()];
        self.emit_operand_loop_nest(
            b,
            &order,
            0,
            &mut lhs_index,
            &mut rhs_index,
            &mut |b, lhs_index, rhs_index| {
                let zero = b.const_i64(0);
                let zero_value = b.zero_scalar(dtype);
                b.store_scalar(zero_value, accum_slot, zero);

                ksl::for_loop(b, "reduction", 0, reduction_size, 1, |b, r| {
                    let full_lhs: Vec<Value> = (0..lhs_shape.rank())
                        .map(|d| {
                            if d == lhs_reduction_dim {
                                r
                            } else {
                                lhs_index[d].unwrap()
                            }
                        })
                        .collect();
                    let full_rhs: Vec<Value> = (0..rhs_shape.rank())
                        .map(|d| {
                            if d == rhs_reduction_dim {
                                r
                            } else {
                                rhs_index[d].unwrap()
                            }
                        })
                        .collect();
                    let lhs_offset = emit_linear_index(b, lhs_shape, &full_lhs);
                    let lhs_element = b.load_scalar(self.lhs, lhs_offset);
                    let rhs_offset = emit_linear_index(b, rhs_shape, &full_rhs);
                    let rhs_element = b.load_scalar(self.rhs, rhs_offset);

                    let accum = b.load_scalar(accum_slot, zero);
                    let updated = if dtype.is_complex() {
                        let lhs_real = b.real(lhs_element);
                        let lhs_imag = b.imag(lhs_element);
                        let rhs_real = b.real(rhs_element);
                        let rhs_imag = b.imag(rhs_element);
                        let ac = b.arith(ArithOp::Mul, lhs_real, rhs_real);
                        let bd = b.arith(ArithOp::Mul, lhs_imag, rhs_imag);
                        let product_real = b.arith(ArithOp::Sub, ac, bd);
                        let ad = b.arith(ArithOp::Mul, lhs_real, rhs_imag);
                        let bc = b.arith(ArithOp::Mul, lhs_imag, rhs_real);
                        let product_imag = b.arith(ArithOp::Add, ad, bc);
                        let accum_real = b.real(accum);
                        let accum_imag = b.imag(accum);
                        let new_real = b.arith(ArithOp::Add, accum_real, product_real);
                        let new_imag = b.arith(ArithOp::Add, accum_imag, product_imag);
                        b.make_complex(new_real, new_imag)
                    } else {
                        let product = b.arith(ArithOp::Mul, lhs_element, rhs_element);
                        b.arith(ArithOp::Add, accum, product)
                    };
                    b.store_scalar(updated, accum_slot, zero);
                });

                let result = b.load_scalar(accum_slot, zero);

                // The target index is the concatenation of the non-reduction
                // LHS and RHS indices, in logical dimension order.
                let mut target_index: Vec<Value> = Vec::new();
                for (d, index) in lhs_index.iter().enumerate() {
                    if d != lhs_reduction_dim {
                        target_index.push(index.unwrap());
                    }
                }
                for (d, index) in rhs_index.iter().enumerate() {
                    if d != rhs_reduction_dim {
                        target_index.push(index.unwrap());
                    }
                }
                let target_offset = emit_linear_index(b, &self.dot.target, &target_index);
                b.store_scalar(result, self.target, target_offset);
            },
        );
    }

    fn emit_operand_loop_nest(
        &self,
        b: &mut FuncBuilder,
        order: &[(usize, usize, i64)],
        pos: usize,
        lhs_index: &mut Vec<Option<Value>>,
        rhs_index: &mut Vec<Option<Value>>,
        inner: &mut dyn FnMut(&mut FuncBuilder, &[Option<Value>], &[Option<Value>]),
    ) {
        if pos == order.len() {
            inner(b, lhs_index, rhs_index);
            return;
        }
        let (operand, dim, size) = order[pos];
        let name = format!("dot.{}.{dim}", if operand == 0 { "lhs" } else { "rhs" });
        ksl::for_loop(b, &name, 0, size, 1, |b, indvar| {
            if operand == 0 {
                lhs_index[dim] = Some(indvar);
            } else {
                rhs_index[dim] = Some(indvar);
            }
            self.emit_operand_loop_nest(b, order, pos + 1, lhs_index, rhs_index, inner);
        });
    }
}

fn emit_linear_index(b: &mut FuncBuilder, shape: &TensorShape, indices: &[Value]) -> Value {
    let strides = shape.strides();
    let mut total = b.const_i64(0);
    for (index, stride) in indices.iter().zip(strides.iter()) {
        let stride = b.const_i64(*stride as i64);
        let term = b.int_mul(*index, stride);
        total = b.int_add(total, term);
    }
    total
}
