//! Tiled matrix-matrix block-panel kernel (GEBP, after Goto & Van De Geijn,
//! "High-performance implementation of the level-3 BLAS").
//!
//! Supports canonical contraction only (LHS contracts dimension 1, RHS
//! dimension 0) over row-major matrices, and is purely additive over the
//! result: the caller zeroes the result region before invoking the kernel.

use crate::common::Dtype;
use crate::ir::builder::FuncBuilder;
use crate::ir::Value;
use crate::ksl;
use crate::tile::MemoryTile;
use crate::utils::{is_power_of_two, round_down};
use crate::vsl::Vsl;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct GebpDims {
    pub m: i64,
    pub k: i64,
    pub n: i64,
}

impl fmt::Display for GebpDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.m, self.k, self.n)
    }
}

/// Configuration of the GEBP emitter. As with [crate::gemv::GemvConfig], the
/// emitted IR must be a function of this record; its cache key names the
/// outlined kernel.
///
/// `max_vectorization_width` is the widest vector the kernel will use (wider
/// than the machine's registers is fine, the backend legalizes).
/// `max_vector_count` bounds how many such vectors one N-slab processes at
/// once, and `min_vectorization_width` is the narrowest admissible vector
/// before the kernel devolves to a scalar column loop. The innermost
/// reduction multiplies a `[tile_m, tile_k]` LHS tile with a
/// `[tile_k, vector_width]` RHS tile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GebpConfig {
    pub dtype: Dtype,
    pub dims: GebpDims,
    pub max_vectorization_width: i64,
    pub max_vector_count: i64,
    pub min_vectorization_width: i64,
    pub tile_m: i64,
    pub tile_k: i64,
}

impl GebpConfig {
    pub fn cache_key(&self) -> String {
        format!(
            "gebp_{}_{}_{}_{}_{}_{}",
            self.dtype,
            self.dims,
            self.max_vectorization_width,
            self.min_vectorization_width,
            self.tile_m,
            self.tile_k
        )
    }
}

pub struct MatrixMatrixBlockPanelEmitter {
    config: GebpConfig,
    lhs: Value,
    rhs: Value,
    result: Value,
}

impl MatrixMatrixBlockPanelEmitter {
    pub fn new(config: GebpConfig, lhs: Value, rhs: Value, result: Value) -> Self {
        assert!(
            config.max_vectorization_width > 0
                && is_power_of_two(config.max_vectorization_width as u64)
        );
        assert!(config.max_vector_count > 0);
        assert!(
            config.min_vectorization_width > 0
                && is_power_of_two(config.min_vectorization_width as u64)
        );
        assert!(config.max_vectorization_width >= config.min_vectorization_width);
        assert!(config.tile_k > 0);
        MatrixMatrixBlockPanelEmitter {
            config,
            lhs,
            rhs,
            result,
        }
    }

    pub fn config(&self) -> &GebpConfig {
        &self.config
    }

    fn dims(&self) -> GebpDims {
        self.config.dims
    }

    fn max_vectorization_width(&self) -> i64 {
        self.config.max_vectorization_width
    }

    fn max_vector_count(&self) -> i64 {
        self.config.max_vector_count
    }

    fn min_vectorization_width(&self) -> i64 {
        self.config.min_vectorization_width
    }

    fn tile_m(&self) -> i64 {
        self.config.tile_m
    }

    fn tile_k(&self) -> i64 {
        self.config.tile_k
    }

    pub fn emit(&self, b: &mut FuncBuilder) {
        self.handle_residues_on_n(b);
    }

    /// The `n` dimension can only be iterated for an extent divisible by the
    /// vectorization width, so walk N in decreasing widths: first the largest
    /// extent divisible by `max_vector_count * max_vectorization_width`, then
    /// one fewer vector per step down to one, then halved widths, until the
    /// minimum width is passed; trailing columns run scalar.
    fn handle_residues_on_n(&self, b: &mut FuncBuilder) {
        let mut current_vectorization_width =
            self.max_vector_count() * self.max_vectorization_width();
        let mut current_vector_count = self.max_vector_count();

        let mut n_start = 0;
        while n_start != self.dims().n
            && current_vectorization_width >= self.min_vectorization_width()
        {
            let n_end = self.dims().n - (self.dims().n % current_vectorization_width);
            if n_start != n_end {
                let vsl = Vsl::new(self.config.dtype, current_vectorization_width);
                let n_start_val = b.const_i64(n_start);
                let n_end_val = b.const_i64(n_end);
                self.handle_residues_on_k(b, &vsl, n_start_val, n_end_val);
                n_start = n_end;
            }
            if current_vector_count == 1 {
                current_vectorization_width /= 2;
            } else {
                current_vector_count -= 1;
                current_vectorization_width =
                    current_vector_count * self.max_vectorization_width();
            }
        }

        if n_start != self.dims().n {
            let vsl = Vsl::new(self.config.dtype, 1);
            ksl::for_loop(b, "epi.n", n_start, self.dims().n, 1, |b, n_i| {
                let one = b.const_i64(1);
                let n_i_next = b.int_add(n_i, one);
                self.handle_residues_on_k(b, &vsl, n_i, n_i_next);
            });
        }
    }

    fn handle_residues_on_k(&self, b: &mut FuncBuilder, vsl: &Vsl, n_start: Value, n_end: Value) {
        let mut k_start = 0;
        let k_end = round_down(self.dims().k, self.tile_k());
        if k_end != k_start {
            let k_start_val = b.const_i64(k_start);
            let k_end_val = b.const_i64(k_end);
            self.handle_residues_on_m(b, vsl, self.tile_k(), k_start_val, k_end_val, n_start, n_end);
            k_start = k_end;
        }

        if k_start != self.dims().k {
            let k_start_val = b.const_i64(k_start);
            let k_end_val = b.const_i64(self.dims().k);
            self.handle_residues_on_m(
                b,
                vsl,
                self.dims().k - k_start,
                k_start_val,
                k_end_val,
                n_start,
                n_end,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_residues_on_m(
        &self,
        b: &mut FuncBuilder,
        vsl: &Vsl,
        tile_size_k: i64,
        k_start: Value,
        k_end: Value,
        n_start: Value,
        n_end: Value,
    ) {
        let m_end = round_down(self.dims().m, self.tile_m());
        let zero = b.const_i64(0);
        let m_end_val = b.const_i64(m_end);
        self.emit_tiled_reduction_loop(
            b,
            vsl,
            tile_size_k,
            k_start,
            k_end,
            n_start,
            n_end,
            self.tile_m(),
            zero,
            m_end_val,
        );

        if m_end != self.dims().m {
            let m_start_val = b.const_i64(m_end);
            let m_full_val = b.const_i64(self.dims().m);
            self.emit_tiled_reduction_loop(
                b,
                vsl,
                tile_size_k,
                k_start,
                k_end,
                n_start,
                n_end,
                self.dims().m - m_end,
                m_start_val,
                m_full_val,
            );
        }
    }

    /// The inner reduction: broadcast a `[tile_m, tile_k]` LHS tile, then for
    /// each vector-wide slice of N, FMA it against the `[tile_k, width]` RHS
    /// tile into the `[tile_m, width]` result tile.
    #[allow(clippy::too_many_arguments)]
    fn emit_tiled_reduction_loop(
        &self,
        b: &mut FuncBuilder,
        vsl: &Vsl,
        tile_size_k: i64,
        k_start: Value,
        k_end: Value,
        n_start: Value,
        n_end: Value,
        tile_size_m: i64,
        m_start: Value,
        m_end: Value,
    ) {
        ksl::for_loop(b, "dot.m", m_start, m_end, tile_size_m, |b, m_i| {
            let result_memory_tile =
                MemoryTile::new(vsl, b, self.result, self.dims().n, m_i, tile_size_m);
            let lhs_memory_tile =
                MemoryTile::new(vsl, b, self.lhs, self.dims().k, m_i, tile_size_m);

            ksl::for_loop(b, "dot.k", k_start, k_end, tile_size_k, |b, k_i| {
                let rhs_memory_tile =
                    MemoryTile::new(vsl, b, self.rhs, self.dims().n, k_i, tile_size_k);
                let lhs_tile = lhs_memory_tile.load_broadcast_tile(vsl, b, k_i, tile_size_k);

                ksl::for_loop(b, "dot.n", n_start, n_end, vsl.vector_size(), |b, n_i| {
                    let rhs_tile = rhs_memory_tile.load_tile(vsl, b, n_i);
                    let mut result_tile = result_memory_tile.load_tile(vsl, b, n_i);
                    for r_m_i in 0..usize::try_from(tile_size_m).unwrap() {
                        for r_k_i in 0..usize::try_from(tile_size_k).unwrap() {
                            result_tile[r_m_i] = vsl.mul_add(
                                b,
                                lhs_tile[r_m_i][r_k_i],
                                rhs_tile[r_k_i],
                                result_tile[r_m_i],
                            );
                        }
                    }
                    result_memory_tile.store_tile(vsl, b, &result_tile, n_i);
                });
            });
        });
    }
}

#[cfg(all(test, feature = "verification"))]
mod tests {
    use super::*;
    use crate::ir::interp::{Evaluator, Memory, PtrVal, RtVal};
    use crate::ir::{FnAttrs, Module, Type};
    use crate::verification::{pack_f32, unpack_f32};

    /// Emits the panel kernel directly (no dispatcher, no memset) and runs
    /// it against a pre-filled result buffer.
    fn run_gebp(config: &GebpConfig, lhs: &[f32], rhs: &[f32], result_init: &[f32]) -> Vec<f32> {
        let mut module = Module::new();
        let mut fb = FuncBuilder::new(
            &mut module,
            "gebp_test",
            vec![
                Type::Ptr(config.dtype),
                Type::Ptr(config.dtype),
                Type::Ptr(config.dtype),
            ],
            FnAttrs::default(),
        );
        let pv = fb.param_values();
        MatrixMatrixBlockPanelEmitter::new(config.clone(), pv[0], pv[1], pv[2]).emit(&mut fb);
        fb.finish();

        let mut mem = Memory::new();
        let lhs_buf = mem.alloc(pack_f32(lhs));
        let rhs_buf = mem.alloc(pack_f32(rhs));
        let result_buf = mem.alloc(pack_f32(result_init));
        Evaluator::new(&module).run(
            "gebp_test",
            &[
                RtVal::Ptr(PtrVal::new(lhs_buf, config.dtype)),
                RtVal::Ptr(PtrVal::new(rhs_buf, config.dtype)),
                RtVal::Ptr(PtrVal::new(result_buf, config.dtype)),
            ],
            &mut mem,
        );
        unpack_f32(mem.buffer(result_buf))
    }

    fn naive_matmul(m: usize, k: usize, n: usize, lhs: &[f32], rhs: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0f32; m * n];
        for i in 0..m {
            for j in 0..n {
                let mut acc = 0.0f64;
                for l in 0..k {
                    acc += f64::from(lhs[i * k + l]) * f64::from(rhs[l * n + j]);
                }
                out[i * n + j] = acc as f32;
            }
        }
        out
    }

    fn config(m: i64, k: i64, n: i64) -> GebpConfig {
        GebpConfig {
            dtype: Dtype::F32,
            dims: GebpDims { m, k, n },
            max_vectorization_width: 4,
            max_vector_count: 2,
            min_vectorization_width: 2,
            tile_m: 2,
            tile_k: 3,
        }
    }

    #[test]
    fn test_cache_key_format() {
        let c = config(16, 16, 16);
        assert_eq!(c.cache_key(), "gebp_f32_16x16x16_4_2_2_3");
    }

    #[test]
    fn test_identity_times_identity() {
        // 16x16 identity squared, with the tile sizes that exercise uneven
        // m/k tiling (tile_m=2, tile_k=3, width 4).
        let n = 16usize;
        let mut identity = vec![0.0f32; n * n];
        for i in 0..n {
            identity[i * n + i] = 1.0;
        }
        let c = GebpConfig {
            max_vector_count: 1,
            min_vectorization_width: 4,
            ..config(16, 16, 16)
        };
        let got = run_gebp(&c, &identity, &identity, &vec![0.0; n * n]);
        assert_eq!(got, identity);
    }

    #[test]
    fn test_kernel_is_additive_over_result() {
        let (m, k, n) = (4usize, 3usize, 5usize);
        let lhs: Vec<f32> = (0..m * k).map(|v| v as f32 * 0.5).collect();
        let rhs: Vec<f32> = (0..k * n).map(|v| (v % 7) as f32 - 3.0).collect();
        let init: Vec<f32> = (0..m * n).map(|v| 100.0 + v as f32).collect();
        let got = run_gebp(&config(m as i64, k as i64, n as i64), &lhs, &rhs, &init);
        let product = naive_matmul(m, k, n, &lhs, &rhs);
        for i in 0..m * n {
            let want = init[i] + product[i];
            assert!((got[i] - want).abs() <= 1e-4, "i={i}: got {}, want {want}", got[i]);
        }
    }

    #[test]
    fn test_residue_passes_cover_all_dimensions() {
        // Sizes around the tile parameters hit every residue path: the
        // width walk on N, the K split, and the M split.
        let sizes = [1i64, 2, 3, 4, 5, 11];
        for (&m, &k, &n) in itertools::iproduct!(&sizes, &sizes, &sizes) {
            let lhs: Vec<f32> = (0..m * k).map(|v| (v % 13) as f32 - 6.0).collect();
            let rhs: Vec<f32> = (0..k * n).map(|v| (v % 5) as f32 * 0.75).collect();
            let got = run_gebp(&config(m, k, n), &lhs, &rhs, &vec![0.0; (m * n) as usize]);
            let want = naive_matmul(m as usize, k as usize, n as usize, &lhs, &rhs);
            for i in 0..(m * n) as usize {
                assert!(
                    (got[i] - want[i]).abs() <= 1e-4 * want[i].abs().max(1.0),
                    "m={m} k={k} n={n} i={i}: got {}, want {}",
                    got[i],
                    want[i]
                );
            }
        }
    }

    #[test]
    fn test_scalar_width_epilogue_on_prime_n() {
        // n=7 with min width 4 leaves a 3-column scalar epilogue.
        let c = GebpConfig {
            max_vector_count: 1,
            min_vectorization_width: 4,
            ..config(3, 4, 7)
        };
        let lhs: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let rhs: Vec<f32> = (0..28).map(|v| (v as f32) * 0.25 - 2.0).collect();
        let got = run_gebp(&c, &lhs, &rhs, &vec![0.0; 21]);
        let want = naive_matmul(3, 4, 7, &lhs, &rhs);
        for i in 0..21 {
            assert!((got[i] - want[i]).abs() <= 1e-4 * want[i].abs().max(1.0));
        }
    }
}
