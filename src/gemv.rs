//! Tiled matrix-vector product emitters.
//!
//! Both emitters compute `result[0..m) = [addend +] lhs · rhs[0..k)` for a
//! rank-2 LHS and are purely additive over the result buffer once the first
//! column/row has initialized it. They logically split the LHS into four
//! segments
//!
//! ```text
//!   +----------------+---+
//!   |       A        | B |
//!   +----------------+---+
//!   |       C        | D |
//!   +----------------+---+
//! ```
//!
//! where `A` is the largest submatrix evenly divisible into
//! `tile_rows × tile_cols` tiles; the remaining segments are handled by
//! scalar epilogues and a reduced-size run of the main loop body.

use crate::common::Dtype;
use crate::ir::builder::FuncBuilder;
use crate::ir::Value;
use crate::ksl;
use crate::tile::MemoryTile;
use crate::utils::{is_power_of_two, round_down};
use crate::vsl::{ScalarVariable, VectorVariable, Vsl};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum GemvKind {
    ColumnMajor,
    RowMajor,
}

impl GemvKind {
    fn name(&self) -> &'static str {
        match self {
            GemvKind::ColumnMajor => "col_major_gemv",
            GemvKind::RowMajor => "row_major_gemv",
        }
    }
}

/// Configuration shared by the two GEMV emitters.
///
/// The IR emitted (modulo the values naming the input and output buffers)
/// must be a function of this record: the cache key derived from it decides
/// whether an already-outlined kernel can be reused.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GemvConfig {
    pub kind: GemvKind,
    pub dtype: Dtype,
    pub tile_rows: i64,
    pub tile_cols: i64,
    pub m: i64,
    pub k: i64,
    pub has_addend: bool,
}

impl GemvConfig {
    pub fn cache_key(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}_{}{}",
            self.kind.name(),
            self.dtype,
            self.tile_rows,
            self.tile_cols,
            self.m,
            self.k,
            if self.has_addend { "_with_addend" } else { "" }
        )
    }
}

/// Multiplies a column-major `[M, K]` matrix with a `K`-vector.
///
/// The vector width is `tile_rows`, so each tile of `A` pairs `tile_cols`
/// column vectors of the LHS with `tile_cols` broadcast RHS elements and
/// accumulates into one result vector per row group. An inner scalar
/// epilogue covers `C`, and a reduced-column run of the outer body covers
/// `B`/`D`. Whether the result is initialized (from the addend or zero) or
/// accumulated is decided by whether the current column group is the first.
pub struct ColumnMajorGemvEmitter {
    config: GemvConfig,
    lhs: Value,
    rhs: Value,
    addend: Option<Value>,
    result: Value,
    vsl: Vsl,
}

impl ColumnMajorGemvEmitter {
    pub fn new(
        config: GemvConfig,
        lhs: Value,
        rhs: Value,
        addend: Option<Value>,
        result: Value,
    ) -> Self {
        assert_eq!(config.kind, GemvKind::ColumnMajor);
        assert!(config.tile_rows > 0 && is_power_of_two(config.tile_rows as u64));
        assert!(!config.has_addend || addend.is_some());
        let vsl = Vsl::new(config.dtype, config.tile_rows);
        ColumnMajorGemvEmitter {
            config,
            lhs,
            rhs,
            addend,
            result,
            vsl,
        }
    }

    pub fn config(&self) -> &GemvConfig {
        &self.config
    }

    fn m(&self) -> i64 {
        self.config.m
    }

    fn k(&self) -> i64 {
        self.config.k
    }

    fn tile_rows(&self) -> i64 {
        self.config.tile_rows
    }

    fn tile_cols(&self) -> i64 {
        self.config.tile_cols
    }

    pub fn emit(&self, b: &mut FuncBuilder) {
        let column_remainder = self.k() % self.tile_cols();
        let column_limit = self.k() - column_remainder;

        ksl::for_loop_peeled(
            b,
            "dot.outer.tiled",
            0,
            column_limit,
            self.tile_cols(),
            |b, column, is_first_column| {
                self.emit_outer_loop_body(b, column, self.tile_cols(), is_first_column)
            },
        );

        if column_remainder != 0 {
            let column = b.const_i64(column_limit);
            self.emit_outer_loop_body(b, column, column_remainder, column_limit == 0);
        }
    }

    fn emit_outer_loop_body(
        &self,
        b: &mut FuncBuilder,
        column: Value,
        column_count: i64,
        is_first_column: bool,
    ) {
        let lhs_memory_tile = self.lhs_memory_tile(b, column, column_count);
        let rhs_tile = self.load_rhs_tile(b, column, column_count);
        self.emit_inner_loop_tiled(b, &lhs_memory_tile, &rhs_tile, column_count, is_first_column);
        self.emit_inner_loop_epilogue(b, column, column_count, is_first_column);
    }

    fn lhs_memory_tile(
        &self,
        b: &mut FuncBuilder,
        column_start: Value,
        column_count: i64,
    ) -> MemoryTile {
        MemoryTile::new(&self.vsl, b, self.lhs, self.m(), column_start, column_count)
    }

    /// Loads a tile of values from the RHS: `count` contiguous elements, each
    /// broadcast to the vector width.
    fn load_rhs_tile(&self, b: &mut FuncBuilder, offset: Value, count: i64) -> Vec<Value> {
        let base_pointer = self.vsl.compute_offset_pointer(b, self.rhs, offset);
        (0..count)
            .map(|i| {
                let i_val = b.const_i64(i);
                self.vsl.load_broadcast(b, base_pointer, i_val)
            })
            .collect()
    }

    fn emit_inner_loop_tiled(
        &self,
        b: &mut FuncBuilder,
        lhs_memory_tile: &MemoryTile,
        rhs_tile: &[Value],
        columns: i64,
        is_first_column: bool,
    ) {
        let row_limit = round_down(self.m(), self.tile_rows());

        ksl::for_loop(b, "dot.inner.tiled", 0, row_limit, self.tile_rows(), |b, row| {
            let lhs_tile = lhs_memory_tile.load_tile(&self.vsl, b, row);
            let mut accumulator = if is_first_column {
                match self.addend {
                    Some(addend) => self.vsl.load_vector(b, addend, row),
                    None => self.vsl.zero_vector(b),
                }
            } else {
                self.vsl.load_vector(b, self.result, row)
            };
            for i in 0..usize::try_from(columns).unwrap() {
                accumulator = self.vsl.mul_add(b, lhs_tile[i], rhs_tile[i], accumulator);
            }
            self.vsl.store_vector(b, accumulator, self.result, row);
        });
    }

    fn emit_inner_loop_epilogue(
        &self,
        b: &mut FuncBuilder,
        current_tile_col: Value,
        columns: i64,
        is_first_tiled_column: bool,
    ) {
        let row_start = round_down(self.m(), self.tile_rows());
        if row_start == self.m() {
            return;
        }

        // for (col = current_tile_col; col < columns + current_tile_col; col++)
        //   for (row = row_start; row < m; row++)
        //     result[row] += lhs[row, col] * rhs[col]
        // where the very first column initializes result[row] instead.
        let columns_val = b.const_i64(columns);
        let col_end = b.int_add(columns_val, current_tile_col);

        ksl::for_loop_with_first_flag(
            b,
            "dot.inner.epilg.outer",
            current_tile_col,
            col_end,
            1,
            |b, col, is_first_scalar_col| {
                let rhs_element = self.vsl.load_scalar(b, self.rhs, col);
                let m_val = b.const_i64(self.m());
                let total_offset = b.int_mul(col, m_val);
                let lhs_base_pointer = self.vsl.compute_offset_pointer(b, self.lhs, total_offset);
                ksl::for_loop(
                    b,
                    "dot.inner.epilg.inner",
                    row_start,
                    self.m(),
                    1,
                    |b, scalar_row| {
                        let lhs_element = self.vsl.load_scalar(b, lhs_base_pointer, scalar_row);
                        let product = self.vsl.mul(b, lhs_element, rhs_element);
                        let tiled_flag = b.const_bool(is_first_tiled_column);
                        let setting_result_first_time = b.and_(is_first_scalar_col, tiled_flag);
                        ksl::if_then_else(
                            b,
                            setting_result_first_time,
                            |b| match self.addend {
                                Some(addend) => {
                                    let addend_element =
                                        self.vsl.load_scalar(b, addend, scalar_row);
                                    let sum = self.vsl.add(b, addend_element, product);
                                    self.vsl.store_scalar(b, sum, self.result, scalar_row);
                                }
                                None => {
                                    self.vsl.store_scalar(b, product, self.result, scalar_row);
                                }
                            },
                            |b| {
                                let current = self.vsl.load_scalar(b, self.result, scalar_row);
                                let sum = self.vsl.add(b, current, product);
                                self.vsl.store_scalar(b, sum, self.result, scalar_row);
                            },
                        );
                    },
                );
            },
        );
    }
}

/// Multiplies a row-major `[M, K]` matrix with a `K`-vector.
///
/// The vector width is `tile_cols`. Each row group keeps `tile_rows` vector
/// accumulators over the K dimension plus `tile_rows` scalar accumulators for
/// the K remainder (`B`), and finishes with a horizontal reduction; the row
/// remainder (`C`/`D`) reruns the outer body with a reduced row count.
pub struct RowMajorGemvEmitter {
    config: GemvConfig,
    lhs: Value,
    rhs: Value,
    addend: Option<Value>,
    result: Value,
    vsl: Vsl,
}

impl RowMajorGemvEmitter {
    pub fn new(
        config: GemvConfig,
        lhs: Value,
        rhs: Value,
        addend: Option<Value>,
        result: Value,
    ) -> Self {
        assert_eq!(config.kind, GemvKind::RowMajor);
        assert!(config.tile_cols > 0 && is_power_of_two(config.tile_cols as u64));
        assert!(!config.has_addend || addend.is_some());
        let vsl = Vsl::new(config.dtype, config.tile_cols);
        RowMajorGemvEmitter {
            config,
            lhs,
            rhs,
            addend,
            result,
            vsl,
        }
    }

    pub fn config(&self) -> &GemvConfig {
        &self.config
    }

    fn m(&self) -> i64 {
        self.config.m
    }

    fn k(&self) -> i64 {
        self.config.k
    }

    fn tile_rows(&self) -> i64 {
        self.config.tile_rows
    }

    fn tile_cols(&self) -> i64 {
        self.config.tile_cols
    }

    pub fn emit(&self, b: &mut FuncBuilder) {
        let row_remainder = self.m() % self.tile_rows();
        let row_limit = self.m() - row_remainder;

        ksl::for_loop(b, "dot.outer.tiled", 0, row_limit, self.tile_rows(), |b, row| {
            self.emit_outer_loop_body(b, row, self.tile_rows())
        });

        if row_remainder != 0 {
            let row = b.const_i64(row_limit);
            self.emit_outer_loop_body(b, row, row_remainder);
        }
    }

    fn lhs_memory_tile(&self, b: &mut FuncBuilder, row_start: Value, row_count: i64) -> MemoryTile {
        MemoryTile::new(&self.vsl, b, self.lhs, self.k(), row_start, row_count)
    }

    fn emit_outer_loop_body(&self, b: &mut FuncBuilder, row: Value, row_count: i64) {
        let lhs_memory_tile = self.lhs_memory_tile(b, row, row_count);
        let mut vector_accumulators = Vec::with_capacity(row_count as usize);
        let mut scalar_accumulators = Vec::with_capacity(row_count as usize);
        for _ in 0..row_count {
            let zero_vec = self.vsl.zero_vector(b);
            vector_accumulators.push(VectorVariable::new(&self.vsl, b, zero_vec));
            let zero = self.vsl.zero_scalar(b);
            scalar_accumulators.push(ScalarVariable::new(&self.vsl, b, zero));
        }
        self.emit_inner_loop_tiled(b, &lhs_memory_tile, row_count, &vector_accumulators);
        self.emit_inner_loop_epilogue(b, row, row_count, &scalar_accumulators);

        let accumulator_values: Vec<Value> =
            vector_accumulators.iter().map(|var| var.get(b)).collect();
        let horizontal_sums = if row_count == self.vsl.vector_size() {
            let addend_vec = self.addend.map(|addend| self.vsl.load_vector(b, addend, row));
            self.vsl
                .compute_horizontal_sums(b, accumulator_values, addend_vec)
        } else {
            self.vsl.compute_horizontal_sums(b, accumulator_values, None)
        };

        for i in 0..usize::try_from(row_count).unwrap() {
            let scalar_sum = scalar_accumulators[i].get(b);
            let mut result_value = self.vsl.add(b, horizontal_sums[i], scalar_sum);
            let i_val = b.const_i64(i as i64);
            let offset = b.int_add(i_val, row);
            if let Some(addend) = self.addend {
                if row_count != self.vsl.vector_size() {
                    let addend_element = self.vsl.load_scalar(b, addend, offset);
                    result_value = self.vsl.add(b, addend_element, result_value);
                }
            }
            self.vsl.store_scalar(b, result_value, self.result, offset);
        }
    }

    fn emit_inner_loop_tiled(
        &self,
        b: &mut FuncBuilder,
        lhs_memory_tile: &MemoryTile,
        rows: i64,
        vector_accumulators: &[VectorVariable],
    ) {
        let column_limit = round_down(self.k(), self.tile_cols());

        ksl::for_loop(b, "dot.inner.tiled", 0, column_limit, self.tile_cols(), |b, col| {
            let lhs_tile = lhs_memory_tile.load_tile(&self.vsl, b, col);
            let rhs_value = self.vsl.load_vector(b, self.rhs, col);
            for i in 0..usize::try_from(rows).unwrap() {
                let old_sum = vector_accumulators[i].get(b);
                let product = self.vsl.mul(b, rhs_value, lhs_tile[i]);
                let new_sum = self.vsl.add(b, old_sum, product);
                vector_accumulators[i].set(b, new_sum);
            }
        });
    }

    fn emit_inner_loop_epilogue(
        &self,
        b: &mut FuncBuilder,
        current_tile_row: Value,
        rows: i64,
        scalar_accumulators: &[ScalarVariable],
    ) {
        let column_start = round_down(self.k(), self.tile_cols());
        if column_start == self.k() {
            return;
        }

        for r in 0..usize::try_from(rows).unwrap() {
            let r_val = b.const_i64(r as i64);
            let row_index = b.int_add(r_val, current_tile_row);
            let k_val = b.const_i64(self.k());
            let total_offset = b.int_mul(row_index, k_val);
            let lhs_base_pointer = self.vsl.compute_offset_pointer(b, self.lhs, total_offset);
            ksl::for_loop(
                b,
                "dot.inner.epilg.inner",
                column_start,
                self.k(),
                1,
                |b, scalar_col| {
                    let lhs_element = self.vsl.load_scalar(b, lhs_base_pointer, scalar_col);
                    let rhs_element = self.vsl.load_scalar(b, self.rhs, scalar_col);
                    let product = self.vsl.mul(b, lhs_element, rhs_element);
                    let old_value = scalar_accumulators[r].get(b);
                    let new_value = self.vsl.add(b, old_value, product);
                    scalar_accumulators[r].set(b, new_value);
                },
            );
        }
    }
}
