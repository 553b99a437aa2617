use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type carried by a tensor edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DType {
    F32,
    F16,
    BF16,
    F64,
    I8,
    U8,
    I16,
    I32,
    I64,
    Bool,
    #[default]
    Undefined,
}

impl DType {
    pub fn size_of(&self) -> Option<usize> {
        match self {
            DType::I8 | DType::U8 | DType::Bool => Some(1),
            DType::F16 | DType::BF16 | DType::I16 => Some(2),
            DType::F32 | DType::I32 => Some(4),
            DType::F64 | DType::I64 => Some(8),
            DType::Undefined => None,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F16 | DType::BF16 | DType::F64)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DType::F32 => "float32",
            DType::F16 => "float16",
            DType::BF16 => "bfloat16",
            DType::F64 => "float64",
            DType::I8 => "int8",
            DType::U8 => "uint8",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::Bool => "bool",
            DType::Undefined => "undefined",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data layout tag.
///
/// The 5-D and fractal layouts are the blocked formats used by on-chip cube units;
/// their dimensions do not line up with the logical shape, so channel-sensitive
/// checks must go through [`Format::channel_axis`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Format {
    #[default]
    ND,
    NCHW,
    NHWC,
    HWCN,
    NC1HWC0,
    FractalZ,
    FractalNZ,
    Reserved,
}

impl Format {
    /// Axis holding the channel count for 4-D layouts, if the layout has one.
    pub fn channel_axis(&self) -> Option<usize> {
        match self {
            Format::NCHW => Some(1),
            Format::NHWC => Some(3),
            Format::HWCN => Some(2),
            _ => None,
        }
    }

    pub fn is_fractal(&self) -> bool {
        matches!(self, Format::NC1HWC0 | Format::FractalZ | Format::FractalNZ)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Format::ND => "ND",
            Format::NCHW => "NCHW",
            Format::NHWC => "NHWC",
            Format::HWCN => "HWCN",
            Format::NC1HWC0 => "NC1HWC0",
            Format::FractalZ => "FRACTAL_Z",
            Format::FractalNZ => "FRACTAL_NZ",
            Format::Reserved => "RESERVED",
        };
        f.write_str(s)
    }
}
