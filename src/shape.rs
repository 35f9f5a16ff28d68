use crate::common::Dtype;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub type DimSize = u64;
pub type Dims = SmallVec<[DimSize; 4]>;

/// A tensor shape together with its physical layout.
///
/// `minor_to_major` names logical dimensions from the fastest-varying
/// (stride-1) to the slowest; a rank-2 shape with `minor_to_major == [0, 1]`
/// is column-major. `padded_dims`, when present, gives the physical extent
/// allocated for each logical dimension (at least the logical extent); the
/// tiled and runtime paths refuse padded operands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct TensorShape {
    dims: Dims,
    minor_to_major: SmallVec<[u8; 4]>,
    padded_dims: Option<Dims>,
    dtype: Dtype,
}

impl TensorShape {
    pub fn new(dims: &[DimSize], minor_to_major: &[u8], dtype: Dtype) -> TensorShape {
        assert_eq!(dims.len(), minor_to_major.len());
        assert!(dims.iter().all(|&d| d > 0), "dimensions must be non-zero");
        let mut seen = vec![false; dims.len()];
        for &d in minor_to_major {
            assert!(
                usize::from(d) < dims.len() && !seen[usize::from(d)],
                "minor_to_major must be a permutation of the dimensions"
            );
            seen[usize::from(d)] = true;
        }
        TensorShape {
            dims: SmallVec::from_slice(dims),
            minor_to_major: SmallVec::from_slice(minor_to_major),
            padded_dims: None,
            dtype,
        }
    }

    pub fn row_major(dims: &[DimSize], dtype: Dtype) -> TensorShape {
        let m2m = (0..dims.len() as u8).rev().collect::<Vec<_>>();
        TensorShape::new(dims, &m2m, dtype)
    }

    pub fn col_major(dims: &[DimSize], dtype: Dtype) -> TensorShape {
        let m2m = (0..dims.len() as u8).collect::<Vec<_>>();
        TensorShape::new(dims, &m2m, dtype)
    }

    pub fn scalar(dtype: Dtype) -> TensorShape {
        TensorShape::new(&[], &[], dtype)
    }

    /// Replaces the physical extents with `padded`, which must dominate the
    /// logical extents elementwise.
    pub fn with_padding(mut self, padded: &[DimSize]) -> TensorShape {
        assert_eq!(padded.len(), self.dims.len());
        assert!(padded.iter().zip(&self.dims).all(|(&p, &d)| p >= d));
        self.padded_dims = Some(SmallVec::from_slice(padded));
        self
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn dims(&self) -> &[DimSize] {
        &self.dims
    }

    pub fn dim(&self, d: usize) -> DimSize {
        self.dims[d]
    }

    /// The logical dimension found at minor position `i` (0 = stride-1).
    pub fn minor(&self, i: usize) -> usize {
        usize::from(self.minor_to_major[i])
    }

    pub fn is_padded(&self) -> bool {
        self.padded_dims.is_some()
    }

    pub fn element_count(&self) -> u64 {
        self.dims.iter().product()
    }

    fn physical_dim(&self, d: usize) -> DimSize {
        match &self.padded_dims {
            Some(padded) => padded[d],
            None => self.dims[d],
        }
    }

    /// Bytes occupied by the physical allocation (padded extents included).
    pub fn byte_size(&self) -> u64 {
        (0..self.rank())
            .map(|d| self.physical_dim(d))
            .product::<u64>()
            * u64::from(self.dtype.size())
    }

    /// Per-logical-dimension strides in elements.
    pub fn strides(&self) -> Dims {
        let mut strides: Dims = SmallVec::from_elem(0, self.rank());
        let mut running = 1;
        for &d in &self.minor_to_major {
            strides[usize::from(d)] = running;
            running *= self.physical_dim(usize::from(d));
        }
        strides
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major_strides() {
        let shape = TensorShape::row_major(&[3, 5], Dtype::F32);
        assert_eq!(shape.strides().as_slice(), &[5, 1]);
        assert_eq!(shape.minor(0), 1);
        assert_eq!(shape.byte_size(), 60);
    }

    #[test]
    fn test_col_major_strides() {
        let shape = TensorShape::col_major(&[3, 5], Dtype::F64);
        assert_eq!(shape.strides().as_slice(), &[1, 3]);
        assert_eq!(shape.minor(0), 0);
    }

    #[test]
    fn test_rank3_mixed_layout_strides() {
        // Logical [2, 3, 4] with minor-to-major {1, 0, 2}.
        let shape = TensorShape::new(&[2, 3, 4], &[1, 0, 2], Dtype::F32);
        assert_eq!(shape.strides().as_slice(), &[3, 1, 6]);
    }

    #[test]
    fn test_padded_strides_and_size() {
        let shape = TensorShape::row_major(&[3, 5], Dtype::F32).with_padding(&[4, 8]);
        assert!(shape.is_padded());
        assert_eq!(shape.strides().as_slice(), &[8, 1]);
        assert_eq!(shape.byte_size(), 4 * 8 * 4);
        assert_eq!(shape.element_count(), 15);
    }

    #[test]
    fn test_scalar_shape() {
        let shape = TensorShape::scalar(Dtype::C64);
        assert!(shape.is_scalar());
        assert_eq!(shape.rank(), 0);
        assert_eq!(shape.byte_size(), 8);
    }

    #[test]
    #[should_panic(expected = "permutation")]
    fn test_rejects_bad_layout() {
        TensorShape::new(&[2, 2], &[0, 0], Dtype::F32);
    }
}
