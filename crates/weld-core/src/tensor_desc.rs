use crate::{DType, Format, Shape, ShapeRange};

/// Descriptor of the tensor flowing along one data edge.
///
/// Produced by shape/type inference and replaced wholesale when it changes;
/// passes only read it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TensorDesc {
    pub shape: Shape,
    pub format: Format,
    /// Layout the framework declared before any format transformation.
    pub origin_format: Format,
    pub dtype: DType,
    pub shape_range: Option<ShapeRange>,
}

impl TensorDesc {
    pub fn new(shape: impl Into<Shape>, format: Format, dtype: DType) -> Self {
        Self {
            shape: shape.into(),
            format,
            origin_format: format,
            dtype,
            shape_range: None,
        }
    }

    /// Descriptor with nothing known yet, used for slots awaiting inference.
    pub fn undefined() -> Self {
        Self {
            shape: Shape::unknown_rank(),
            ..Default::default()
        }
    }

    pub fn with_shape_range(mut self, range: ShapeRange) -> Self {
        self.shape_range = Some(range);
        self
    }

    pub fn with_origin_format(mut self, format: Format) -> Self {
        self.origin_format = format;
        self
    }

    /// Whether the descriptor pins down shape and element type.
    pub fn is_static(&self) -> bool {
        self.shape.is_fully_known() && self.dtype != DType::Undefined
    }

    /// Channel count read through the descriptor's layout, when known.
    pub fn channels(&self) -> Option<i64> {
        let axis = self.format.channel_axis()?;
        if self.shape.rank()? != 4 {
            return None;
        }
        self.shape.known_dim(axis)
    }
}
