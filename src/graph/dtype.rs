//! Logical tensor data types

use std::fmt;

use crate::error::{FuseError, FuseResult};

/// Element type of a logical tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    /// Not yet inferred
    #[default]
    Undef,
    /// 32-bit float
    F32,
    /// 16-bit IEEE float
    F16,
    /// 16-bit brain float
    Bf16,
    /// 32-bit signed integer
    S32,
    /// 8-bit signed integer
    S8,
    /// 8-bit unsigned integer
    U8,
    /// Boolean
    Boolean,
}

impl DataType {
    /// Size in bytes of one element
    pub fn size(self) -> FuseResult<usize> {
        match self {
            DataType::F32 | DataType::S32 => Ok(4),
            DataType::F16 | DataType::Bf16 => Ok(2),
            DataType::S8 | DataType::U8 | DataType::Boolean => Ok(1),
            DataType::Undef => Err(FuseError::InvalidAttribute {
                name: "dtype".to_string(),
                reason: "undefined data type has no size".to_string(),
            }),
        }
    }

    /// Floating point types
    pub fn is_float(self) -> bool {
        matches!(self, DataType::F32 | DataType::F16 | DataType::Bf16)
    }

    /// s8 or u8
    pub fn is_int8(self) -> bool {
        matches!(self, DataType::S8 | DataType::U8)
    }

    /// Canonical lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Undef => "undef",
            DataType::F32 => "f32",
            DataType::F16 => "f16",
            DataType::Bf16 => "bf16",
            DataType::S32 => "s32",
            DataType::S8 => "s8",
            DataType::U8 => "u8",
            DataType::Boolean => "boolean",
        }
    }

    /// Parse a canonical name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "undef" => Some(DataType::Undef),
            "f32" => Some(DataType::F32),
            "f16" => Some(DataType::F16),
            "bf16" => Some(DataType::Bf16),
            "s32" => Some(DataType::S32),
            "s8" => Some(DataType::S8),
            "u8" => Some(DataType::U8),
            "boolean" => Some(DataType::Boolean),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_size() {
        assert_eq!(DataType::F32.size().unwrap(), 4);
        assert_eq!(DataType::Bf16.size().unwrap(), 2);
        assert_eq!(DataType::U8.size().unwrap(), 1);
        assert!(DataType::Undef.size().is_err());
    }

    #[test]
    fn test_classification() {
        assert!(DataType::Bf16.is_float());
        assert!(!DataType::S8.is_float());
        assert!(DataType::S8.is_int8());
        assert!(DataType::U8.is_int8());
        assert!(!DataType::S32.is_int8());
    }

    #[test]
    fn test_name_roundtrip() {
        for dt in [DataType::F32, DataType::Bf16, DataType::S8, DataType::U8] {
            assert_eq!(DataType::from_name(dt.as_str()), Some(dt));
        }
        assert_eq!(DataType::from_name("f64"), None);
    }
}
