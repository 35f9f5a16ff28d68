use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Element types a dot operation can carry.
///
/// The emitters only generate arithmetic for a subset of these (see
/// [crate::dot::emit_dot_operation]); the small integer types exist so shape
/// arithmetic can describe operands the dispatcher must reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum Dtype {
    U8,
    S8,
    S32,
    S64,
    F16,
    F32,
    F64,
    C64,
}

impl Dtype {
    /// The bytes required to represent a value of this Dtype.
    pub fn size(&self) -> u8 {
        match self {
            Dtype::U8 | Dtype::S8 => 1,
            Dtype::S32 | Dtype::F32 => 4,
            Dtype::F16 => 2,
            Dtype::S64 | Dtype::F64 | Dtype::C64 => 8,
        }
    }

    pub fn is_floating_point(&self) -> bool {
        matches!(self, Dtype::F16 | Dtype::F32 | Dtype::F64)
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, Dtype::U8 | Dtype::S8 | Dtype::S32 | Dtype::S64)
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, Dtype::C64)
    }
}

impl Display for Dtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dtype::U8 => write!(f, "u8"),
            Dtype::S8 => write!(f, "s8"),
            Dtype::S32 => write!(f, "s32"),
            Dtype::S64 => write!(f, "s64"),
            Dtype::F16 => write!(f, "f16"),
            Dtype::F32 => write!(f, "f32"),
            Dtype::F64 => write!(f, "f64"),
            Dtype::C64 => write!(f, "c64"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_dtype_sizes() {
        assert_eq!(Dtype::F16.size(), 2);
        assert_eq!(Dtype::F32.size(), 4);
        assert_eq!(Dtype::F64.size(), 8);
        assert_eq!(Dtype::C64.size(), 8);
        assert_eq!(Dtype::S32.size(), 4);
        assert_eq!(Dtype::S64.size(), 8);
    }

    #[test]
    fn test_dtype_classification() {
        assert!(Dtype::F16.is_floating_point());
        assert!(!Dtype::C64.is_floating_point());
        assert!(Dtype::C64.is_complex());
        assert!(Dtype::S64.is_integral());
        assert!(!Dtype::S64.is_floating_point());
    }

    proptest! {
        #[test]
        fn test_dtype_display_names_are_cache_key_safe(dt in any::<Dtype>()) {
            let name = dt.to_string();
            prop_assert!(name.chars().all(|c| c.is_ascii_alphanumeric()));
            prop_assert!(matches!(dt.size(), 1 | 2 | 4 | 8));
        }
    }
}
