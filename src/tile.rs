//! Tiled access to an in-memory rank-2 array.

use crate::ir::builder::FuncBuilder;
use crate::ir::Value;
use crate::vsl::Vsl;

/// A typed view over `tile_size_along_major_dim` rows or columns of a rank-2
/// buffer, rooted at a fixed major-dimension offset.
///
/// Construction materializes one base pointer per major-dimension slot,
/// `base + minor_extent * (major_offset + i)`, so later tile operations only
/// pay a minor-dimension index. The tile size along the minor dimension is
/// the vector width and is implied by the [Vsl] passed to each operation.
pub struct MemoryTile {
    pointers: Vec<Value>,
}

impl MemoryTile {
    pub fn new(
        vsl: &Vsl,
        b: &mut FuncBuilder,
        matrix: Value,
        matrix_size_along_minor_dim: i64,
        major_dim_offset: Value,
        tile_size_along_major_dim: i64,
    ) -> MemoryTile {
        let mut pointers = Vec::with_capacity(usize::try_from(tile_size_along_major_dim).unwrap());
        for i in 0..tile_size_along_major_dim {
            let i_val = b.const_i64(i);
            let major = b.int_add(i_val, major_dim_offset);
            let minor_extent = b.const_i64(matrix_size_along_minor_dim);
            let total_offset = b.int_mul(minor_extent, major);
            pointers.push(vsl.compute_offset_pointer(b, matrix, total_offset));
        }
        MemoryTile { pointers }
    }

    /// Loads one vector per major-dimension slot at `minor_dim_offset`.
    pub fn load_tile(&self, vsl: &Vsl, b: &mut FuncBuilder, minor_dim_offset: Value) -> Vec<Value> {
        self.pointers
            .iter()
            .map(|&p| vsl.load_vector(b, p, minor_dim_offset))
            .collect()
    }

    /// Stores `tile` back at `minor_dim_offset`.
    pub fn store_tile(
        &self,
        vsl: &Vsl,
        b: &mut FuncBuilder,
        tile: &[Value],
        minor_dim_offset: Value,
    ) {
        assert_eq!(tile.len(), self.pointers.len());
        for (&value, &pointer) in tile.iter().zip(&self.pointers) {
            vsl.store_vector(b, value, pointer, minor_dim_offset);
        }
    }

    /// Loads a `tile_size × middle_size` grid where entry `(i, j)` is
    /// `matrix[major_offset + i][minor_dim_offset + j]` broadcast to every
    /// lane. Hoists a 2-D LHS sub-tile into broadcasts for reuse across the
    /// RHS tile lanes.
    pub fn load_broadcast_tile(
        &self,
        vsl: &Vsl,
        b: &mut FuncBuilder,
        minor_dim_offset: Value,
        tile_size_along_middle_dim: i64,
    ) -> Vec<Vec<Value>> {
        self.pointers
            .iter()
            .map(|&pointer| {
                (0..tile_size_along_middle_dim)
                    .map(|j| {
                        let j_val = b.const_i64(j);
                        let index = b.int_add(minor_dim_offset, j_val);
                        vsl.load_broadcast(b, pointer, index)
                    })
                    .collect()
            })
            .collect()
    }
}
